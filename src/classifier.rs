//! Intent classification
//!
//! Maps raw request text to one of the routable intents with a confidence.
//! - `LlmIntentClassifier`: prompts a model for `category|confidence`
//! - `KeywordIntentClassifier`: offline keyword scoring (development, tests)

use crate::error::{OrchestrationError, Result};
use crate::llm::TextGenerator;
use crate::models::{Classification, Intent};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, request_text: &str) -> Result<Classification>;
}

const ROUTER_PROMPT: &str = r#"You are an investment assistant router. Analyze the user's message and determine their primary intent.

User Message: "{user_message}"

Classify into one of these categories:
1. profile_analysis - User wants to discuss their investment profile, risk tolerance, goals
2. portfolio_creation - User wants portfolio recommendations or asset allocation advice
3. market_research - User asks about specific stocks, market trends, economic analysis
4. question_answering - General investment education, explaining concepts, how-to questions

Respond with ONLY the category name and a confidence score (0-1).
Format: category_name|confidence_score

Examples:
- "I'm 30 years old and want to start investing" → profile_analysis|0.95
- "What stocks should I buy?" → portfolio_creation|0.85
- "How is Tesla performing?" → market_research|0.90
- "What is a P/E ratio?" → question_answering|0.95
"#;

/// Parse `category_name|confidence_score`.
///
/// Returns `None` when the shape or the number is wrong. An unrecognized
/// label parses to `Intent::Unknown`; resolving it is the router's job.
pub fn parse_classification(raw: &str) -> Option<Classification> {
    let line = raw.trim().lines().next()?.trim();
    let (label, confidence) = line.split_once('|')?;
    if confidence.contains('|') {
        return None;
    }
    let confidence: f32 = confidence.trim().parse().ok()?;
    Some(Classification::new(Intent::from_label(label), confidence))
}

/// Model-backed classifier
pub struct LlmIntentClassifier {
    generator: Arc<dyn TextGenerator>,
}

impl LlmIntentClassifier {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl IntentClassifier for LlmIntentClassifier {
    async fn classify(&self, request_text: &str) -> Result<Classification> {
        let prompt = ROUTER_PROMPT.replace("{user_message}", request_text);
        let raw = self.generator.generate(&prompt).await?;

        parse_classification(&raw).ok_or_else(|| {
            OrchestrationError::Classification(format!(
                "unparsable classifier output: {:?}",
                raw.chars().take(100).collect::<String>()
            ))
        })
    }
}

/// Static keyword lists, no allocation
const PROFILE_KEYWORDS: &[&str] = &[
    "years old", "i'm", "i am", "my age", "retire", "retirement", "risk tolerance",
    "my goals", "my income", "salary", "saving for", "conservative", "aggressive",
    "profile", "start investing",
];

const PORTFOLIO_KEYWORDS: &[&str] = &[
    "portfolio", "allocation", "allocate", "rebalance", "diversify", "build",
    "create", "construct", "recommend", "suggest", "what should i buy",
    "stocks should i", "etf mix", "asset mix",
];

const MARKET_KEYWORDS: &[&str] = &[
    "performing", "price", "stock", "ticker", "market trend", "shares of",
    "buy or sell", "earnings", "analysis of", "outlook", "tesla", "apple",
    "microsoft", "nvidia", "amazon", "google",
];

const QUESTION_KEYWORDS: &[&str] = &[
    "what is", "what are", "what's", "explain", "how does", "how do", "define",
    "definition", "meaning", "difference between", "concept",
];

/// Offline classifier
pub struct KeywordIntentClassifier;

impl KeywordIntentClassifier {
    /// Sync core, also used by the async trait impl
    pub fn classify_text(text: &str) -> Classification {
        let lowered = text.to_lowercase();
        let score = |keywords: &[&str]| {
            keywords
                .iter()
                .filter(|kw| lowered.contains(**kw))
                .count()
        };

        // Tie order: the more specific intent wins
        let scored = [
            (Intent::PortfolioCreation, score(PORTFOLIO_KEYWORDS)),
            (Intent::MarketResearch, score(MARKET_KEYWORDS)),
            (Intent::ProfileAnalysis, score(PROFILE_KEYWORDS)),
            (Intent::QuestionAnswering, score(QUESTION_KEYWORDS)),
        ];

        let (intent, best) = scored
            .iter()
            .copied()
            .fold((Intent::QuestionAnswering, 0), |acc, candidate| {
                if candidate.1 > acc.1 {
                    candidate
                } else {
                    acc
                }
            });

        if best == 0 {
            return Classification::fallback();
        }

        let confidence = (0.5 + 0.1 * best as f32).min(0.95);
        Classification::new(intent, confidence)
    }
}

#[async_trait]
impl IntentClassifier for KeywordIntentClassifier {
    async fn classify(&self, request_text: &str) -> Result<Classification> {
        Ok(Self::classify_text(request_text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::llm::CannedGenerator;

    #[test]
    fn test_parse_well_formed() {
        let c = parse_classification("portfolio_creation|0.9").unwrap();
        assert_eq!(c.intent, Intent::PortfolioCreation);
        assert!((c.confidence - 0.9).abs() < f32::EPSILON);

        let c = parse_classification("  market_research | 0.75 \nextra chatter").unwrap();
        assert_eq!(c.intent, Intent::MarketResearch);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_classification("").is_none());
        assert!(parse_classification("portfolio_creation").is_none());
        assert!(parse_classification("portfolio_creation|high").is_none());
        assert!(parse_classification("a|0.2|b").is_none());
    }

    #[test]
    fn test_parse_unknown_label_and_clamp() {
        let c = parse_classification("weather_report|1.4").unwrap();
        assert_eq!(c.intent, Intent::Unknown);
        assert_eq!(c.confidence, 1.0);
    }

    #[tokio::test]
    async fn test_llm_classifier() {
        let generator = Arc::new(CannedGenerator::new("market_research|0.90"));
        let classifier = LlmIntentClassifier::new(generator);

        let c = classifier.classify("How is Tesla performing?").await.unwrap();
        assert_eq!(c.intent, Intent::MarketResearch);
    }

    #[tokio::test]
    async fn test_llm_classifier_unparsable() {
        let generator = Arc::new(CannedGenerator::new("I think this is about stocks"));
        let classifier = LlmIntentClassifier::new(generator);

        let err = classifier.classify("How is Tesla performing?").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::GenericStage);
    }

    #[test]
    fn test_keyword_intents() {
        let cases = vec![
            ("I'm 30 years old and want to start investing for retirement", Intent::ProfileAnalysis),
            ("Build me an aggressive portfolio", Intent::PortfolioCreation),
            ("How is Tesla stock performing?", Intent::MarketResearch),
            ("What is compound interest?", Intent::QuestionAnswering),
        ];

        for (text, expected) in cases {
            assert_eq!(
                KeywordIntentClassifier::classify_text(text).intent,
                expected,
                "{}",
                text
            );
        }
    }

    #[test]
    fn test_keyword_no_match_defaults() {
        let c = KeywordIntentClassifier::classify_text("hi");
        assert_eq!(c, Classification::fallback());
    }
}
