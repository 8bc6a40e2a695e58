//! Core data models for the investment orchestrator

use crate::error::{OrchestrationError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

//
// ================= Intent =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    ProfileAnalysis,
    PortfolioCreation,
    MarketResearch,
    QuestionAnswering,
    /// Classification was missing or unparsable
    Unknown,
    /// The pipeline failed
    Error,
}

impl Intent {
    /// Intents that map to a stage
    pub const ROUTABLE: [Intent; 4] = [
        Intent::ProfileAnalysis,
        Intent::PortfolioCreation,
        Intent::MarketResearch,
        Intent::QuestionAnswering,
    ];

    /// Parse a classifier label; anything outside the closed set is `Unknown`.
    pub fn from_label(label: &str) -> Intent {
        match label.trim().to_lowercase().as_str() {
            "profile_analysis" => Intent::ProfileAnalysis,
            "portfolio_creation" => Intent::PortfolioCreation,
            "market_research" => Intent::MarketResearch,
            "question_answering" => Intent::QuestionAnswering,
            "error" => Intent::Error,
            _ => Intent::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::ProfileAnalysis => "profile_analysis",
            Intent::PortfolioCreation => "portfolio_creation",
            Intent::MarketResearch => "market_research",
            Intent::QuestionAnswering => "question_answering",
            Intent::Unknown => "unknown",
            Intent::Error => "error",
        }
    }

    pub fn is_routable(&self) -> bool {
        Self::ROUTABLE.contains(self)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifier verdict; confidence is always within [0, 1]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Classification {
    pub intent: Intent,
    pub confidence: f32,
}

impl Classification {
    pub fn new(intent: Intent, confidence: f32) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self { intent, confidence }
    }

    /// Used when the classifier fails or its output cannot be parsed
    pub fn fallback() -> Self {
        Self::new(Intent::QuestionAnswering, 0.5)
    }
}

//
// ================= Request =================
//

/// Inbound request as seen by the orchestrator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvestmentRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_history: Vec<String>,
    /// Rate limiting identity; `None` shares the anonymous bucket
    #[serde(default)]
    pub user_id: Option<String>,
    /// Values carried over from an earlier run (e.g. a parsed profile)
    #[serde(default)]
    pub prior_context: Map<String, Value>,
}

impl InvestmentRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_prior_context(mut self, prior: Map<String, Value>) -> Self {
        self.prior_context = prior;
        self
    }
}

//
// ================= Context =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextHeader {
    pub request_id: Option<String>,
    pub intent: Intent,
    pub confidence: f32,
    /// Seconds from dispatch start to completion
    pub response_time: Option<f64>,
}

/// Per-request accumulator. Keys are never removed; later writes win.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    pub header: ContextHeader,
    pub user_message: String,
    pub conversation_history: Vec<String>,
    values: BTreeMap<String, Value>,
    output: Option<StageOutput>,
}

impl Context {
    pub fn new(user_message: impl Into<String>, conversation_history: Vec<String>) -> Self {
        Self {
            header: ContextHeader {
                request_id: None,
                intent: Intent::Unknown,
                confidence: 0.0,
                response_time: None,
            },
            user_message: user_message.into(),
            conversation_history,
            values: BTreeMap::new(),
            output: None,
        }
    }

    pub fn from_request(request: &InvestmentRequest) -> Self {
        let mut context = Self::new(
            request.message.clone(),
            request.conversation_history.clone(),
        );
        for (key, value) in &request.prior_context {
            context.set(key.clone(), value.clone());
        }
        context
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn set_classification(&mut self, classification: Classification) {
        self.header.intent = classification.intent;
        self.header.confidence = classification.confidence;
    }

    /// Merge a stage's output. Fields are flattened into the value map
    /// (last-write-wins); on serialization failure nothing is written.
    pub fn merge(&mut self, output: StageOutput) -> Result<()> {
        let fields = output.fields()?;
        for (key, value) in fields {
            self.values.insert(key, value);
        }
        self.output = Some(output);
        Ok(())
    }

    pub fn output(&self) -> Option<&StageOutput> {
        self.output.as_ref()
    }
}

//
// ================= Stage outputs =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProfileAnalysis {
    pub risk_tolerance: String,
    pub investment_horizon: String,
    pub age_range: String,
    pub income_level: String,
    pub investment_goals: Vec<String>,
    pub reasoning: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Allocation {
    pub equity: f64,
    pub bonds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EtfPosition {
    pub ticker: String,
    pub weight: f64,
    pub price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioRecommendation {
    pub recommended_allocation: Allocation,
    pub etf_selection: Vec<EtfPosition>,
    pub builder_reasoning: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    Buy,
    Sell,
    Hold,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketResearch {
    pub stock_symbol: Option<String>,
    pub current_price: f64,
    pub price_change_pct: f64,
    pub technical_signals: BTreeMap<String, String>,
    pub market_analysis: String,
    pub recommendation: Recommendation,
    pub confidence_score: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EducationType {
    ConceptExplanation,
    GeneralGuidance,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub response: String,
    pub education_type: EducationType,
    pub concept_explained: Option<String>,
    pub related_concepts: Vec<String>,
    pub suggestion: Option<String>,
}

/// One variant per stage output shape
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageOutput {
    Profile(ProfileAnalysis),
    Portfolio(PortfolioRecommendation),
    MarketResearch(MarketResearch),
    Answer(Answer),
}

impl StageOutput {
    pub fn intent(&self) -> Intent {
        match self {
            StageOutput::Profile(_) => Intent::ProfileAnalysis,
            StageOutput::Portfolio(_) => Intent::PortfolioCreation,
            StageOutput::MarketResearch(_) => Intent::MarketResearch,
            StageOutput::Answer(_) => Intent::QuestionAnswering,
        }
    }

    /// Human readable response text
    pub fn summary(&self) -> &str {
        match self {
            StageOutput::Profile(p) => &p.reasoning,
            StageOutput::Portfolio(p) => &p.builder_reasoning,
            StageOutput::MarketResearch(m) => &m.market_analysis,
            StageOutput::Answer(a) => &a.response,
        }
    }

    fn fields(&self) -> Result<Map<String, Value>> {
        let value = match self {
            StageOutput::Profile(p) => serde_json::to_value(p)?,
            StageOutput::Portfolio(p) => serde_json::to_value(p)?,
            StageOutput::MarketResearch(m) => serde_json::to_value(m)?,
            StageOutput::Answer(a) => serde_json::to_value(a)?,
        };
        match value {
            Value::Object(map) => Ok(map),
            other => Err(OrchestrationError::Stage(format!(
                "stage output is not an object: {}",
                other
            ))),
        }
    }
}

//
// ================= Records =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub intent: Intent,
    pub duration: Duration,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentTiming {
    pub component_name: String,
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub error_id: Uuid,
    pub kind: crate::error::ErrorKind,
    pub message: String,
    pub severity: crate::error::ErrorSeverity,
    pub timestamp: DateTime<Utc>,
    pub context: Value,
}

//
// ================= Responses =================
//

/// Preconfigured response returned after retries are exhausted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FallbackResponse {
    pub response: String,
    pub intent: Intent,
    pub confidence: f32,
    pub degraded: bool,
}

impl FallbackResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            response: message.into(),
            intent: Intent::Error,
            confidence: 0.0,
            degraded: true,
        }
    }
}

#[derive(Debug, Clone)]
pub enum OrchestrationResponse {
    Completed(Context),
    Fallback(FallbackResponse),
}

impl OrchestrationResponse {
    pub fn is_degraded(&self) -> bool {
        matches!(self, OrchestrationResponse::Fallback(_))
    }

    pub fn intent(&self) -> Intent {
        match self {
            OrchestrationResponse::Completed(ctx) => ctx.header.intent,
            OrchestrationResponse::Fallback(f) => f.intent,
        }
    }

    pub fn context(&self) -> Option<&Context> {
        match self {
            OrchestrationResponse::Completed(ctx) => Some(ctx),
            OrchestrationResponse::Fallback(_) => None,
        }
    }
}

//
// ================= Health =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ComponentStats {
    pub count: usize,
    pub avg_duration: f64,
    pub min_duration: f64,
    pub max_duration: f64,
    pub last_duration: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthState,
    pub timestamp: DateTime<Utc>,
    pub uptime: f64,
    pub requests_processed: u64,
    pub error_rate: f64,
    pub avg_response_time: f64,
    pub system_cpu: f64,
    pub system_memory: f64,
    pub component_stats: BTreeMap<String, ComponentStats>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_answer() -> StageOutput {
        StageOutput::Answer(Answer {
            response: "Compounding is growth on growth.".to_string(),
            education_type: EducationType::ConceptExplanation,
            concept_explained: Some("compound_interest".to_string()),
            related_concepts: vec!["inflation".to_string()],
            suggestion: None,
        })
    }

    #[test]
    fn test_intent_labels() {
        assert_eq!(Intent::from_label("portfolio_creation"), Intent::PortfolioCreation);
        assert_eq!(Intent::from_label("  Market_Research "), Intent::MarketResearch);
        assert_eq!(Intent::from_label("weather"), Intent::Unknown);
        assert_eq!(Intent::from_label(""), Intent::Unknown);
        assert!(!Intent::Unknown.is_routable());
        assert!(Intent::QuestionAnswering.is_routable());
    }

    #[test]
    fn test_confidence_is_clamped() {
        assert_eq!(Classification::new(Intent::MarketResearch, 1.7).confidence, 1.0);
        assert_eq!(Classification::new(Intent::MarketResearch, -0.2).confidence, 0.0);
        assert_eq!(Classification::new(Intent::MarketResearch, f32::NAN).confidence, 0.0);
    }

    #[test]
    fn test_merge_flattens_fields() {
        let mut ctx = Context::new("What is compound interest?", vec![]);
        ctx.merge(sample_answer()).unwrap();

        assert_eq!(ctx.get_str("education_type"), Some("concept_explanation"));
        assert_eq!(ctx.get_str("concept_explained"), Some("compound_interest"));
        assert_eq!(ctx.output().map(StageOutput::intent), Some(Intent::QuestionAnswering));
    }

    #[test]
    fn test_last_write_wins() {
        let request = InvestmentRequest::new("hi").with_prior_context(
            json!({"response": "old", "risk_tolerance": "aggressive"})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let mut ctx = Context::from_request(&request);
        ctx.merge(sample_answer()).unwrap();

        assert_eq!(ctx.get_str("response"), Some("Compounding is growth on growth."));
        // untouched prior keys survive
        assert_eq!(ctx.get_str("risk_tolerance"), Some("aggressive"));
    }

    #[test]
    fn test_stage_output_tagging() {
        let value = serde_json::to_value(sample_answer()).unwrap();
        assert_eq!(value["kind"], "answer");
    }
}
