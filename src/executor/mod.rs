//! Resilient execution around the router
//!
//! validate → dispatch (timed, bounded by the call timeout) → retry with
//! backoff → fallback. Backoff waits are async sleeps and only suspend the
//! request being retried.

use crate::config::OrchestratorConfig;
use crate::error::{OrchestrationError, Result};
use crate::models::{Context, FallbackResponse, Intent, InvestmentRequest, OrchestrationResponse, RequestRecord};
use crate::monitoring::Telemetry;
use crate::router::Router;
use chrono::Utc;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;
use tracing::{info, warn};

mod policy;

pub use policy::RetryPolicy;

/// Name of the timing region wrapping each dispatch attempt
pub const DISPATCH_TIMING: &str = "dispatch";

pub struct ResilientExecutor {
    router: Router,
    policy: RetryPolicy,
    telemetry: Telemetry,
    max_request_length: usize,
    call_timeout: Duration,
    fallback_message: Option<String>,
    request_counter: AtomicU64,
}

impl ResilientExecutor {
    pub fn new(router: Router, config: &OrchestratorConfig, telemetry: Telemetry) -> Self {
        Self {
            router,
            policy: RetryPolicy::from_config(config),
            telemetry,
            max_request_length: config.request_max_length,
            call_timeout: config.call_timeout,
            fallback_message: config.fallback_message.clone(),
            request_counter: AtomicU64::new(0),
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Non-empty after trimming, at most `max_request_length` characters
    pub fn validate(&self, message: &str) -> Result<()> {
        if message.trim().is_empty() {
            return Err(OrchestrationError::Validation(
                "request message must not be empty".to_string(),
            ));
        }
        let length = message.chars().count();
        if length > self.max_request_length {
            return Err(OrchestrationError::Validation(format!(
                "request message is {} characters; the maximum is {}",
                length, self.max_request_length
            )));
        }
        Ok(())
    }

    /// `req_{unix seconds}_{counter}`; unique within this process only
    fn next_request_id(&self) -> String {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let n = self.request_counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("req_{}_{}", secs, n)
    }

    /// Every failed attempt lands in the error log
    fn log_attempt_failure(&self, err: &OrchestrationError, request_id: Option<&str>, attempt: u32) {
        self.telemetry.errors.record(
            err,
            json!({
                "request_id": request_id,
                "attempt": attempt,
            }),
        );
    }

    async fn attempt(&self, context: Context) -> Result<Context> {
        let _timing = self.telemetry.performance.time(DISPATCH_TIMING);
        match tokio::time::timeout(self.call_timeout, self.router.dispatch(context)).await {
            Ok(result) => result,
            Err(_) => Err(OrchestrationError::TransientService(format!(
                "dispatch did not finish within {:?}",
                self.call_timeout
            ))),
        }
    }

    pub async fn invoke(&self, request: &InvestmentRequest) -> Result<OrchestrationResponse> {
        if let Err(e) = self.validate(&request.message) {
            self.telemetry.metrics.record_error(e.kind(), e.severity());
            self.log_attempt_failure(&e, None, 0);
            return Err(e);
        }

        let started = Instant::now();
        let request_id = self.next_request_id();
        let mut base = Context::from_request(request);
        base.header.request_id = Some(request_id.clone());

        let mut attempt: u32 = 0;
        loop {
            let attempt_started = Instant::now();
            let start_time = Utc::now();
            let result = self.attempt(base.clone()).await;
            let duration = attempt_started.elapsed();

            let err = match result {
                Ok(mut context) => {
                    self.telemetry.metrics.record_request(RequestRecord {
                        id: request_id.clone(),
                        start_time,
                        intent: context.header.intent,
                        duration,
                        success: true,
                    });

                    let response_time = started.elapsed().as_secs_f64();
                    context.header.response_time = Some(response_time);
                    info!(
                        request_id = %request_id,
                        intent = %context.header.intent,
                        attempts = attempt + 1,
                        response_time = response_time,
                        "Request completed"
                    );
                    return Ok(OrchestrationResponse::Completed(context));
                }
                Err(e) => e,
            };

            self.telemetry.metrics.record_request(RequestRecord {
                id: request_id.clone(),
                start_time,
                intent: Intent::Error,
                duration,
                success: false,
            });
            self.log_attempt_failure(&err, Some(&request_id), attempt + 1);

            match self.policy.next_delay(err.kind(), attempt) {
                Some(delay) => {
                    warn!(
                        request_id = %request_id,
                        attempt = attempt + 1,
                        kind = %err.kind(),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    // counted once per invocation, by its final failure
                    self.telemetry.metrics.record_error(err.kind(), err.severity());
                    return self.exhausted(&request_id, err);
                }
            }
        }
    }

    fn exhausted(&self, request_id: &str, err: OrchestrationError) -> Result<OrchestrationResponse> {
        match &self.fallback_message {
            Some(message) => {
                warn!(
                    request_id = %request_id,
                    kind = %err.kind(),
                    "Retries exhausted, returning fallback response"
                );
                Ok(OrchestrationResponse::Fallback(FallbackResponse::new(message.clone())))
            }
            None => Err(err),
        }
    }
}
