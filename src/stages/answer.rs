//! Investment education Q&A backed by a small concept knowledge base

use super::Stage;
use crate::error::Result;
use crate::llm::TextGenerator;
use crate::models::{Answer, Context, EducationType, Intent, StageOutput};
use async_trait::async_trait;
use std::sync::Arc;

pub struct Concept {
    pub key: &'static str,
    pub keywords: &'static [&'static str],
    pub definition: &'static str,
    pub key_points: &'static [&'static str],
    pub example: Option<&'static str>,
    pub related: &'static [&'static str],
}

/// Checked in order; the first concept with a matching keyword wins
pub const KNOWLEDGE_BASE: &[Concept] = &[
    Concept {
        key: "compound_interest",
        keywords: &["compound", "compounding"],
        definition: "Interest earned on both the original principal and previously earned interest, creating exponential growth over time.",
        key_points: &[
            "Time is the most important factor in compound growth",
            "Small amounts invested early can outperform large amounts invested later",
        ],
        example: Some("10,000 invested at 8% becomes 10,800 after one year and 11,664 after two."),
        related: &["time_value_of_money", "inflation", "dollar_cost_averaging"],
    },
    Concept {
        key: "diversification",
        keywords: &["diversify", "diversification", "spread risk"],
        definition: "Spreading investments across assets, sectors, or geographies to reduce overall portfolio risk.",
        key_points: &[
            "Reduces company-specific risk",
            "Achievable through asset classes, sectors, or geography",
        ],
        example: None,
        related: &["asset_allocation", "risk_return_relationship", "etf"],
    },
    Concept {
        key: "pe_ratio",
        keywords: &["p/e ratio", "pe ratio", "price earnings", "price to earnings"],
        definition: "Share price divided by earnings per share; how much investors pay for each unit of earnings.",
        key_points: &[
            "High P/E can signal growth expectations or overvaluation",
            "Compare within the same industry",
        ],
        example: Some("A stock at 100 with earnings of 5 per share has a P/E of 20."),
        related: &["roe", "stocks"],
    },
    Concept {
        key: "etf",
        keywords: &["etf", "exchange traded fund", "index fund"],
        definition: "A basket of securities that trades on an exchange like a single stock.",
        key_points: &["Low expense ratios", "Intraday liquidity", "Broad diversification in one trade"],
        example: None,
        related: &["diversification", "mutual_funds", "asset_allocation"],
    },
    Concept {
        key: "bonds",
        keywords: &["bond", "fixed income", "debt securities"],
        definition: "Loans to governments or companies that pay periodic interest and return principal at maturity.",
        key_points: &["Prices move inversely to interest rates", "Lower volatility than stocks"],
        example: None,
        related: &["asset_allocation", "inflation", "risk_return_relationship"],
    },
    Concept {
        key: "dollar_cost_averaging",
        keywords: &["dollar cost", "sip", "systematic investment"],
        definition: "Investing a fixed amount at regular intervals regardless of price.",
        key_points: &["Buys more units when prices are low", "Removes market-timing pressure"],
        example: None,
        related: &["compound_interest", "market_volatility"],
    },
    Concept {
        key: "asset_allocation",
        keywords: &["asset allocation", "portfolio allocation"],
        definition: "How a portfolio is divided among asset classes such as stocks, bonds, and cash.",
        key_points: &["The main driver of long-run portfolio risk", "Should reflect horizon and risk tolerance"],
        example: None,
        related: &["diversification", "bonds", "risk_return_relationship"],
    },
    Concept {
        key: "inflation",
        keywords: &["inflation", "purchasing power"],
        definition: "The general rise in prices that erodes the purchasing power of money over time.",
        key_points: &["Cash loses real value under inflation", "Real return = nominal return minus inflation"],
        example: None,
        related: &["time_value_of_money", "bonds"],
    },
];

const EDUCATIONAL_PROMPT: &str = r#"You are a patient, knowledgeable investment educator.

User Question: {user_question}

Relevant Financial Concept Information:
{concept_info}

Provide a clear, beginner-friendly explanation, include a practical example if available, and mention related concepts. Keep it around 200-300 words."#;

const GENERAL_QUERY_PROMPT: &str = r#"You are a helpful investment education assistant. The user has asked a general investment question.

User Question: {user_question}

Provide a clear, beginner-friendly, practical answer of around 150-250 words. If the question requires personalized advice, recommend consulting a financial advisor."#;

const GENERAL_SUGGESTION: &str =
    "For more specific concepts, try asking about topics like 'compound interest', 'diversification', or 'asset allocation'.";

pub fn find_concept(query: &str) -> Option<&'static Concept> {
    let lowered = query.to_lowercase();
    KNOWLEDGE_BASE
        .iter()
        .find(|concept| concept.keywords.iter().any(|kw| lowered.contains(kw)))
}

fn format_concept_info(concept: &Concept) -> String {
    let mut out = format!("Definition: {}\n\n", concept.definition);

    if !concept.key_points.is_empty() {
        out.push_str("Key Points:\n");
        for point in concept.key_points {
            out.push_str(&format!("• {}\n", point));
        }
        out.push('\n');
    }
    if let Some(example) = concept.example {
        out.push_str(&format!("Example: {}\n\n", example));
    }
    if !concept.related.is_empty() {
        out.push_str(&format!("Related Concepts: {}\n", concept.related.join(", ")));
    }

    out
}

pub struct QuestionAnswerer {
    generator: Arc<dyn TextGenerator>,
}

impl QuestionAnswerer {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }
}

#[async_trait]
impl Stage for QuestionAnswerer {
    fn name(&self) -> &'static str {
        "question_answerer"
    }

    fn intent(&self) -> Intent {
        Intent::QuestionAnswering
    }

    async fn apply(&self, context: &Context) -> Result<StageOutput> {
        let question = &context.user_message;

        let answer = match find_concept(question) {
            Some(concept) => {
                let prompt = EDUCATIONAL_PROMPT
                    .replace("{user_question}", question)
                    .replace("{concept_info}", &format_concept_info(concept));
                Answer {
                    response: self.generator.generate(&prompt).await?,
                    education_type: EducationType::ConceptExplanation,
                    concept_explained: Some(concept.key.to_string()),
                    related_concepts: concept.related.iter().take(3).map(|s| s.to_string()).collect(),
                    suggestion: None,
                }
            }
            None => {
                let prompt = GENERAL_QUERY_PROMPT.replace("{user_question}", question);
                Answer {
                    response: self.generator.generate(&prompt).await?,
                    education_type: EducationType::GeneralGuidance,
                    concept_explained: None,
                    related_concepts: Vec::new(),
                    suggestion: Some(GENERAL_SUGGESTION.to_string()),
                }
            }
        };

        Ok(StageOutput::Answer(answer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::CannedGenerator;

    #[test]
    fn test_find_concept() {
        assert_eq!(find_concept("What is compound interest?").map(|c| c.key), Some("compound_interest"));
        assert_eq!(find_concept("Explain the P/E ratio").map(|c| c.key), Some("pe_ratio"));
        assert!(find_concept("How do I open a brokerage account?").is_none());
    }

    #[test]
    fn test_concept_info_formatting() {
        let concept = find_concept("compounding").unwrap();
        let info = format_concept_info(concept);
        assert!(info.starts_with("Definition:"));
        assert!(info.contains("Example:"));
        assert!(info.contains("Related Concepts: time_value_of_money"));
    }

    #[tokio::test]
    async fn test_concept_answer() {
        let generator = Arc::new(
            CannedGenerator::new("general").with_rule("Relevant Financial Concept", "concept answer"),
        );
        let stage = QuestionAnswerer::new(generator);

        let ctx = Context::new("How does diversification work?", vec![]);
        let StageOutput::Answer(a) = stage.apply(&ctx).await.unwrap() else {
            panic!("expected answer output");
        };
        assert_eq!(a.response, "concept answer");
        assert_eq!(a.education_type, EducationType::ConceptExplanation);
        assert_eq!(a.related_concepts.len(), 3);
    }

    #[tokio::test]
    async fn test_general_answer() {
        let stage = QuestionAnswerer::new(Arc::new(CannedGenerator::new("general")));

        let ctx = Context::new("How do I open a brokerage account?", vec![]);
        let StageOutput::Answer(a) = stage.apply(&ctx).await.unwrap() else {
            panic!("expected answer output");
        };
        assert_eq!(a.education_type, EducationType::GeneralGuidance);
        assert!(a.suggestion.is_some());
    }
}
