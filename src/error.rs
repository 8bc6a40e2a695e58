//! Error types for the investment orchestrator
//!
//! Every failure carries an [`ErrorKind`] so retry decisions are made by
//! inspecting data rather than matching on concrete variants at call sites.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transient service error: {0}")]
    TransientService(String),

    #[error("Stage error: {0}")]
    Stage(String),

    #[error("Classification error: {0}")]
    Classification(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Rate limit exceeded for {0}")]
    RateLimited(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure taxonomy used by the retry policy and the error counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    TransientService,
    GenericStage,
    Configuration,
    RateLimited,
}

/// How long to wait between attempts for a retryable kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `delay * 2^attempt`
    Exponential,
    /// `delay`
    Constant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl OrchestrationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestrationError::Validation(_) => ErrorKind::Validation,
            OrchestrationError::TransientService(_) => ErrorKind::TransientService,
            OrchestrationError::Configuration(_) => ErrorKind::Configuration,
            OrchestrationError::RateLimited(_) => ErrorKind::RateLimited,
            OrchestrationError::Http(e) if e.is_timeout() || e.is_connect() => {
                ErrorKind::TransientService
            }
            OrchestrationError::Io(e) if is_transient_io(e) => ErrorKind::TransientService,
            OrchestrationError::Stage(_)
            | OrchestrationError::Classification(_)
            | OrchestrationError::Serialization(_)
            | OrchestrationError::Http(_)
            | OrchestrationError::Io(_) => ErrorKind::GenericStage,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::RateLimited => ErrorSeverity::Low,
            ErrorKind::GenericStage => ErrorSeverity::Medium,
            ErrorKind::TransientService => ErrorSeverity::High,
            ErrorKind::Configuration => ErrorSeverity::Critical,
        }
    }
}

fn is_transient_io(e: &std::io::Error) -> bool {
    use std::io::ErrorKind as Io;
    matches!(
        e.kind(),
        Io::TimedOut | Io::ConnectionRefused | Io::ConnectionReset | Io::ConnectionAborted
    )
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::TransientService | ErrorKind::GenericStage)
    }

    /// Backoff strategy, or `None` for kinds that abort immediately
    pub fn backoff(&self) -> Option<Backoff> {
        match self {
            ErrorKind::TransientService => Some(Backoff::Exponential),
            ErrorKind::GenericStage => Some(Backoff::Constant),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::TransientService => "transient_service",
            ErrorKind::GenericStage => "generic_stage",
            ErrorKind::Configuration => "configuration",
            ErrorKind::RateLimited => "rate_limited",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorSeverity::Low => "low",
            ErrorSeverity::Medium => "medium",
            ErrorSeverity::High => "high",
            ErrorSeverity::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(OrchestrationError::TransientService("timeout".into()).kind().is_retryable());
        assert!(OrchestrationError::Stage("boom".into()).kind().is_retryable());
        assert!(!OrchestrationError::Validation("empty".into()).kind().is_retryable());
        assert!(!OrchestrationError::Configuration("bad".into()).kind().is_retryable());
    }

    #[test]
    fn test_backoff_by_kind() {
        assert_eq!(ErrorKind::TransientService.backoff(), Some(Backoff::Exponential));
        assert_eq!(ErrorKind::GenericStage.backoff(), Some(Backoff::Constant));
        assert_eq!(ErrorKind::Validation.backoff(), None);
    }

    #[test]
    fn test_io_timeout_is_transient() {
        let err = OrchestrationError::from(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "slow",
        ));
        assert_eq!(err.kind(), ErrorKind::TransientService);

        let err = OrchestrationError::from(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ));
        assert_eq!(err.kind(), ErrorKind::GenericStage);
    }

    #[test]
    fn test_severity() {
        assert_eq!(OrchestrationError::Configuration("x".into()).severity(), ErrorSeverity::Critical);
        assert_eq!(OrchestrationError::Validation("x".into()).severity(), ErrorSeverity::Low);
        assert!(ErrorSeverity::High > ErrorSeverity::Medium);
    }
}
