//! Intent routing
//!
//! RECEIVED → CLASSIFIED → DISPATCHED → COMPLETED, with ERRORED reachable
//! from any state. Exactly one stage runs per dispatch.

use crate::classifier::IntentClassifier;
use crate::error::{ErrorKind, OrchestrationError, Result};
use crate::models::{Classification, Context, Intent};
use crate::stages::StageRegistry;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterState {
    Received,
    Classified,
    Dispatched,
    Completed,
    Errored,
}

impl RouterState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RouterState::Completed | RouterState::Errored)
    }
}

impl fmt::Display for RouterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RouterState::Received => "received",
            RouterState::Classified => "classified",
            RouterState::Dispatched => "dispatched",
            RouterState::Completed => "completed",
            RouterState::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// Ordered record of the states one run passed through
#[derive(Debug, Clone, Default)]
pub struct RouterTrace {
    states: Vec<RouterState>,
}

impl RouterTrace {
    fn enter(&mut self, state: RouterState) {
        debug!(state = %state, "Router transition");
        self.states.push(state);
    }

    pub fn states(&self) -> &[RouterState] {
        &self.states
    }

    pub fn last(&self) -> Option<RouterState> {
        self.states.last().copied()
    }
}

pub struct Router {
    classifier: Arc<dyn IntentClassifier>,
    registry: StageRegistry,
}

impl Router {
    pub fn new(classifier: Arc<dyn IntentClassifier>, registry: StageRegistry) -> Self {
        Self {
            classifier,
            registry,
        }
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    /// Classify, degrading to question answering instead of failing.
    /// Unroutable labels keep their confidence; unusable classifier output
    /// gets 0.5. Transient failures are returned so the caller can retry.
    pub async fn classify(&self, request_text: &str) -> Result<Classification> {
        match self.classifier.classify(request_text).await {
            Ok(c) if c.intent.is_routable() => Ok(c),
            Ok(c) => {
                debug!(label = %c.intent, "Unroutable intent, using question_answering");
                Ok(Classification::new(Intent::QuestionAnswering, c.confidence))
            }
            Err(e) if e.kind() == ErrorKind::TransientService => Err(e),
            Err(e) => {
                warn!(error = %e, "Classifier failed, using question_answering");
                Ok(Classification::fallback())
            }
        }
    }

    pub async fn dispatch(&self, context: Context) -> Result<Context> {
        self.dispatch_traced(context).await.0
    }

    /// Run the state machine, also returning the visited states
    pub async fn dispatch_traced(&self, mut context: Context) -> (Result<Context>, RouterTrace) {
        let mut trace = RouterTrace::default();
        trace.enter(RouterState::Received);

        let classification = match self.classify(&context.user_message).await {
            Ok(classification) => classification,
            Err(e) => {
                trace.enter(RouterState::Errored);
                return (Err(e), trace);
            }
        };
        context.set_classification(classification);
        trace.enter(RouterState::Classified);

        let stage = match self
            .registry
            .get(classification.intent)
            .or_else(|| self.registry.get(Intent::QuestionAnswering))
        {
            Some(stage) => stage,
            None => {
                trace.enter(RouterState::Errored);
                return (
                    Err(OrchestrationError::Configuration(format!(
                        "no stage registered for {}",
                        classification.intent
                    ))),
                    trace,
                );
            }
        };

        trace.enter(RouterState::Dispatched);
        debug!(
            stage = stage.name(),
            intent = %classification.intent,
            confidence = classification.confidence,
            "Dispatching"
        );

        let output = match stage.apply(&context).await {
            Ok(output) => output,
            Err(e) => {
                trace.enter(RouterState::Errored);
                return (Err(e), trace);
            }
        };

        if let Err(e) = context.merge(output) {
            trace.enter(RouterState::Errored);
            return (Err(e), trace);
        }

        trace.enter(RouterState::Completed);
        (Ok(context), trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::KeywordIntentClassifier;
    use crate::models::{Answer, EducationType, StageOutput};
    use crate::stages::{create_default_registry, Stage, StaticQuoteProvider};
    use crate::llm::CannedGenerator;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedClassifier(Result<Classification>);

    #[async_trait]
    impl IntentClassifier for FixedClassifier {
        async fn classify(&self, _request_text: &str) -> Result<Classification> {
            match &self.0 {
                Ok(c) => Ok(*c),
                Err(OrchestrationError::TransientService(msg)) => {
                    Err(OrchestrationError::TransientService(msg.clone()))
                }
                Err(e) => Err(OrchestrationError::Classification(e.to_string())),
            }
        }
    }

    /// Counts calls; writes one key named after its intent
    struct CountingStage {
        intent: Intent,
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Stage for CountingStage {
        fn name(&self) -> &'static str {
            self.intent.as_str()
        }

        fn intent(&self) -> Intent {
            self.intent
        }

        async fn apply(&self, _context: &Context) -> Result<StageOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(OrchestrationError::Stage("stage exploded".into()));
            }
            Ok(StageOutput::Answer(Answer {
                response: format!("handled by {}", self.intent),
                education_type: EducationType::GeneralGuidance,
                concept_explained: Some(self.intent.as_str().to_string()),
                related_concepts: vec![],
                suggestion: None,
            }))
        }
    }

    fn counting_registry(fail: Option<Intent>) -> (StageRegistry, Vec<(Intent, Arc<AtomicUsize>)>) {
        let mut registry = StageRegistry::new();
        let mut counters = Vec::new();
        for intent in Intent::ROUTABLE {
            let calls = Arc::new(AtomicUsize::new(0));
            registry.register(Arc::new(CountingStage {
                intent,
                calls: calls.clone(),
                fail: fail == Some(intent),
            }));
            counters.push((intent, calls));
        }
        (registry, counters)
    }

    fn calls_for(counters: &[(Intent, Arc<AtomicUsize>)], intent: Intent) -> usize {
        counters
            .iter()
            .find(|(i, _)| *i == intent)
            .map(|(_, c)| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    fn total_calls(counters: &[(Intent, Arc<AtomicUsize>)]) -> usize {
        counters.iter().map(|(_, c)| c.load(Ordering::SeqCst)).sum()
    }

    #[tokio::test]
    async fn test_exactly_one_stage_runs() {
        for intent in Intent::ROUTABLE {
            let (registry, counters) = counting_registry(None);
            let classifier = FixedClassifier(Ok(Classification::new(intent, 0.8)));
            let router = Router::new(Arc::new(classifier), registry);

            let (result, trace) = router.dispatch_traced(Context::new("hello", vec![])).await;
            let ctx = result.unwrap();

            assert_eq!(total_calls(&counters), 1);
            assert_eq!(calls_for(&counters, intent), 1);
            assert_eq!(ctx.header.intent, intent);
            assert_eq!(
                trace.states(),
                &[
                    RouterState::Received,
                    RouterState::Classified,
                    RouterState::Dispatched,
                    RouterState::Completed
                ]
            );
        }
    }

    #[tokio::test]
    async fn test_unknown_label_routes_to_question_answering() {
        let (registry, counters) = counting_registry(None);
        let classifier = FixedClassifier(Ok(Classification::new(Intent::Unknown, 0.3)));
        let router = Router::new(Arc::new(classifier), registry);

        let ctx = router.dispatch(Context::new("??", vec![])).await.unwrap();

        assert_eq!(ctx.header.intent, Intent::QuestionAnswering);
        assert!((ctx.header.confidence - 0.3).abs() < f32::EPSILON);
        assert_eq!(calls_for(&counters, Intent::QuestionAnswering), 1);
        assert_eq!(total_calls(&counters), 1);
    }

    #[tokio::test]
    async fn test_classifier_failure_defaults() {
        let (registry, counters) = counting_registry(None);
        let classifier = FixedClassifier(Err(OrchestrationError::Classification("garbage".into())));
        let router = Router::new(Arc::new(classifier), registry);

        let ctx = router.dispatch(Context::new("??", vec![])).await.unwrap();

        assert_eq!(ctx.header.intent, Intent::QuestionAnswering);
        assert_eq!(ctx.header.confidence, 0.5);
        assert_eq!(calls_for(&counters, Intent::QuestionAnswering), 1);
    }

    #[tokio::test]
    async fn test_transient_classifier_failure_is_returned() {
        let (registry, counters) = counting_registry(None);
        let classifier =
            FixedClassifier(Err(OrchestrationError::TransientService("model offline".into())));
        let router = Router::new(Arc::new(classifier), registry);

        let (result, trace) = router.dispatch_traced(Context::new("Build me a portfolio", vec![])).await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientService);
        assert_eq!(trace.states(), &[RouterState::Received, RouterState::Errored]);
        assert_eq!(total_calls(&counters), 0);
    }

    #[tokio::test]
    async fn test_failing_stage_contributes_nothing() {
        let (registry, counters) = counting_registry(Some(Intent::MarketResearch));
        let classifier = FixedClassifier(Ok(Classification::new(Intent::MarketResearch, 0.9)));
        let router = Router::new(Arc::new(classifier), registry);

        let (result, trace) = router.dispatch_traced(Context::new("AAPL?", vec![])).await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::GenericStage);
        assert_eq!(trace.last(), Some(RouterState::Errored));
        assert_eq!(total_calls(&counters), 1);
    }

    #[tokio::test]
    async fn test_portfolio_keys_only() {
        let generator = Arc::new(CannedGenerator::new("unused"));
        let registry = create_default_registry(generator, Arc::new(StaticQuoteProvider::new()));
        let classifier = FixedClassifier(Ok(Classification::new(Intent::PortfolioCreation, 0.9)));
        let router = Router::new(Arc::new(classifier), registry);

        let ctx = router
            .dispatch(Context::new("Build me a portfolio", vec![]))
            .await
            .unwrap();

        assert_eq!(ctx.header.intent, Intent::PortfolioCreation);
        assert!((ctx.header.confidence - 0.9).abs() < f32::EPSILON);
        assert!(ctx.contains_key("recommended_allocation"));
        assert!(ctx.contains_key("etf_selection"));
        for foreign in ["risk_tolerance", "market_analysis", "education_type", "response"] {
            assert!(!ctx.contains_key(foreign), "unexpected key {}", foreign);
        }
    }

    #[tokio::test]
    async fn test_keyword_classifier_end_to_end() {
        let generator = Arc::new(CannedGenerator::new("Compounding means growth on growth."));
        let registry = create_default_registry(generator, Arc::new(StaticQuoteProvider::new()));
        let router = Router::new(Arc::new(KeywordIntentClassifier), registry);

        let ctx = router
            .dispatch(Context::new("What is compound interest?", vec![]))
            .await
            .unwrap();

        assert_eq!(ctx.header.intent, Intent::QuestionAnswering);
        assert_eq!(ctx.get_str("concept_explained"), Some("compound_interest"));
    }
}
