//! Stage trait and registry
//!
//! A stage handles exactly one intent. The router treats all stages
//! uniformly: read the context, return a typed output or a typed error.

use crate::error::{OrchestrationError, Result};
use crate::llm::TextGenerator;
use crate::models::{Context, Intent, StageOutput};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

pub mod answer;
pub mod market;
pub mod portfolio;
pub mod profile;

pub use answer::QuestionAnswerer;
pub use market::{MarketResearcher, MarketSnapshot, QuoteProvider, StaticQuoteProvider};
pub use portfolio::PortfolioBuilder;
pub use profile::ProfileAnalyzer;

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;
    fn intent(&self) -> Intent;
    async fn apply(&self, context: &Context) -> Result<StageOutput>;
}

/// Fixed intent → stage lookup table
pub struct StageRegistry {
    stages: HashMap<Intent, Arc<dyn Stage>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self {
            stages: HashMap::new(),
        }
    }

    /// Registers under `stage.intent()`, replacing any previous entry
    pub fn register(&mut self, stage: Arc<dyn Stage>) {
        self.stages.insert(stage.intent(), stage);
    }

    pub fn get(&self, intent: Intent) -> Option<Arc<dyn Stage>> {
        self.stages.get(&intent).cloned()
    }

    pub fn list(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.stages.values().map(|s| s.name()).collect();
        names.sort_unstable();
        names
    }

    /// Every routable intent must have a stage
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = Intent::ROUTABLE
            .iter()
            .filter(|intent| !self.stages.contains_key(*intent))
            .map(Intent::as_str)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(OrchestrationError::Configuration(format!(
                "no stage registered for: {}",
                missing.join(", ")
            )))
        }
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry with the four standard stages
pub fn create_default_registry(
    generator: Arc<dyn TextGenerator>,
    quotes: Arc<dyn QuoteProvider>,
) -> StageRegistry {
    let mut registry = StageRegistry::new();
    registry.register(Arc::new(ProfileAnalyzer::new(generator.clone())));
    registry.register(Arc::new(PortfolioBuilder::new(Some(quotes.clone()))));
    registry.register(Arc::new(MarketResearcher::new(generator.clone(), quotes)));
    registry.register(Arc::new(QuestionAnswerer::new(generator)));
    registry
}
