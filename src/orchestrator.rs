//! Orchestrator facade
//!
//! INPUT → ADMIT → VALIDATE → CLASSIFY → DISPATCH → (RETRY | FALLBACK) → RESPOND
//!
//! Owns the rate limiter, the resilient executor and the collectors they
//! report into. Transports (HTTP, CLI) only talk to this type.

use crate::classifier::{IntentClassifier, LlmIntentClassifier};
use crate::config::OrchestratorConfig;
use crate::error::{OrchestrationError, Result};
use crate::executor::ResilientExecutor;
use crate::llm::{OllamaClient, TextGenerator};
use crate::models::{
    ComponentStats, HealthState, HealthStatus, InvestmentRequest, OrchestrationResponse,
};
use crate::monitoring::{
    ErrorStats, MetricsSummary, ResourceProbe, ResourceSampler, SamplerHandle, Telemetry,
};
use crate::rate_limit::{RateLimiter, ANONYMOUS_IDENTITY};
use crate::router::Router;
use crate::stages::{create_default_registry, QuoteProvider, StageRegistry};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Error rate at or above which health reports `degraded`
const DEGRADED_ERROR_RATE: f64 = 0.5;

/// Detailed collector dump served by `/metrics`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsReport {
    pub metrics: MetricsSummary,
    pub performance: BTreeMap<String, ComponentStats>,
    pub errors: ErrorStats,
    pub rate_limit_enabled: bool,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    limiter: RateLimiter,
    executor: ResilientExecutor,
    telemetry: Telemetry,
}

impl Orchestrator {
    /// Fails with a configuration error when the config is invalid or a
    /// routable intent has no stage.
    pub fn new(
        config: OrchestratorConfig,
        classifier: Arc<dyn IntentClassifier>,
        registry: StageRegistry,
    ) -> Result<Self> {
        let telemetry = Telemetry::new(config.metrics_window_size);
        Self::with_telemetry(config, classifier, registry, telemetry)
    }

    /// Same as [`Orchestrator::new`], reporting into existing collectors
    pub fn with_telemetry(
        config: OrchestratorConfig,
        classifier: Arc<dyn IntentClassifier>,
        registry: StageRegistry,
        telemetry: Telemetry,
    ) -> Result<Self> {
        config.validate()?;
        registry.validate()?;

        let router = Router::new(classifier, registry);
        let executor = ResilientExecutor::new(router, &config, telemetry.clone());
        let limiter = RateLimiter::new(config.max_requests_per_minute, config.rate_limit_enabled);

        info!(
            environment = %config.environment,
            max_retries = config.max_retries,
            rate_limit_enabled = config.rate_limit_enabled,
            stages = ?executor.router().registry().list(),
            "Orchestrator initialized"
        );

        Ok(Self {
            config,
            limiter,
            executor,
            telemetry,
        })
    }

    /// LLM classifier and the four standard stages, all on one generator
    pub fn with_generator(
        config: OrchestratorConfig,
        generator: Arc<dyn TextGenerator>,
        quotes: Arc<dyn QuoteProvider>,
    ) -> Result<Self> {
        let classifier = Arc::new(LlmIntentClassifier::new(generator.clone()));
        let registry = create_default_registry(generator, quotes);
        Self::new(config, classifier, registry)
    }

    /// Ollama-backed orchestrator from configuration; token usage is
    /// reported to the orchestrator's own metrics
    pub fn from_config(config: OrchestratorConfig, quotes: Arc<dyn QuoteProvider>) -> Result<Self> {
        let telemetry = Telemetry::new(config.metrics_window_size);
        let generator: Arc<dyn TextGenerator> = Arc::new(
            OllamaClient::from_config(&config)?.with_usage_metrics(telemetry.metrics.clone()),
        );
        let classifier = Arc::new(LlmIntentClassifier::new(generator.clone()));
        let registry = create_default_registry(generator, quotes);
        Self::with_telemetry(config, classifier, registry, telemetry)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub async fn invoke(&self, request: InvestmentRequest) -> Result<OrchestrationResponse> {
        if !self.limiter.admit(request.user_id.as_deref()) {
            let identity = request
                .user_id
                .clone()
                .unwrap_or_else(|| ANONYMOUS_IDENTITY.to_string());
            let err = OrchestrationError::RateLimited(identity);
            self.telemetry.metrics.record_error(err.kind(), err.severity());
            self.telemetry.errors.record(&err, json!({ "user_id": request.user_id }));
            return Err(err);
        }

        self.executor.invoke(&request).await
    }

    /// Start host sampling at the configured interval
    pub fn start_sampler(&self, probe: Arc<dyn ResourceProbe>) -> SamplerHandle {
        ResourceSampler::new(probe, self.telemetry.metrics.clone(), self.config.sample_interval)
            .start()
    }

    pub fn health_status(&self) -> HealthStatus {
        let summary = self.telemetry.metrics.summary();

        let status = if summary.total_requests == 0 || summary.error_rate < DEGRADED_ERROR_RATE {
            HealthState::Healthy
        } else {
            warn!(error_rate = summary.error_rate, "Health degraded");
            HealthState::Degraded
        };

        HealthStatus {
            status,
            timestamp: Utc::now(),
            uptime: summary.uptime,
            requests_processed: summary.total_requests,
            error_rate: summary.error_rate,
            avg_response_time: summary.avg_response_time,
            system_cpu: summary.system_cpu,
            system_memory: summary.system_memory,
            component_stats: self.telemetry.performance.stats(),
        }
    }

    pub fn metrics_report(&self) -> MetricsReport {
        MetricsReport {
            metrics: self.telemetry.metrics.summary(),
            performance: self.telemetry.performance.stats(),
            errors: self.telemetry.errors.stats(),
            rate_limit_enabled: self.limiter.is_enabled(),
        }
    }
}
