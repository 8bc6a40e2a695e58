//! Investment Orchestrator
//!
//! Routes free-form investment requests to exactly one specialized stage:
//! - Classifies intent (profile, portfolio, market research, Q&A)
//! - Dispatches through a fixed intent → stage table
//! - Retries transient failures with backoff, then falls back
//! - Rate limits callers over a sliding 60 second window
//! - Aggregates request metrics, component timings and host gauges
//!
//! FLOW:
//! INPUT → ADMIT → VALIDATE → CLASSIFY → DISPATCH → (RETRY | FALLBACK) → RESPOND

pub mod api;
pub mod classifier;
pub mod config;
pub mod error;
pub mod executor;
pub mod llm;
pub mod models;
pub mod monitoring;
pub mod orchestrator;
pub mod rate_limit;
pub mod router;
pub mod stages;

pub use error::{OrchestrationError, Result};

// Re-export common types
pub use config::OrchestratorConfig;
pub use models::*;
pub use orchestrator::Orchestrator;
