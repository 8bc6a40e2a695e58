//! Error frequency log
//!
//! Each failure is recorded once, emitted as a structured event at a level
//! matching its severity, and counted under `"{kind}:{message prefix}"`.

use super::{lock, BoundedWindow};
use crate::error::{ErrorSeverity, OrchestrationError};
use crate::models::ErrorRecord;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

const KEY_MESSAGE_CHARS: usize = 100;
const TOP_ERRORS: usize = 10;
const RECENT_CAPACITY: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorStats {
    pub total_errors: u64,
    pub error_frequency: BTreeMap<String, u64>,
    /// Highest counts first, at most ten
    pub most_common: Vec<(String, u64)>,
}

#[derive(Default)]
struct Inner {
    total: u64,
    frequency: HashMap<String, u64>,
}

pub struct ErrorLog {
    inner: Mutex<Inner>,
    recent: Mutex<BoundedWindow<ErrorRecord>>,
}

pub fn frequency_key(kind: &str, message: &str) -> String {
    let prefix: String = message.chars().take(KEY_MESSAGE_CHARS).collect();
    format!("{}:{}", kind, prefix)
}

impl ErrorLog {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            recent: Mutex::new(BoundedWindow::new(RECENT_CAPACITY)),
        }
    }

    pub fn record(&self, err: &OrchestrationError, context: Value) -> ErrorRecord {
        let record = ErrorRecord {
            error_id: Uuid::new_v4(),
            kind: err.kind(),
            message: err.to_string(),
            severity: err.severity(),
            timestamp: Utc::now(),
            context,
        };

        match record.severity {
            ErrorSeverity::Critical | ErrorSeverity::High => error!(
                error_id = %record.error_id,
                kind = %record.kind,
                severity = %record.severity,
                context = %record.context,
                "{}", record.message
            ),
            ErrorSeverity::Medium => warn!(
                error_id = %record.error_id,
                kind = %record.kind,
                context = %record.context,
                "{}", record.message
            ),
            ErrorSeverity::Low => info!(
                error_id = %record.error_id,
                kind = %record.kind,
                "{}", record.message
            ),
        }

        {
            let mut inner = lock(&self.inner);
            inner.total += 1;
            *inner
                .frequency
                .entry(frequency_key(record.kind.as_str(), &record.message))
                .or_insert(0) += 1;
        }
        lock(&self.recent).push(record.clone());

        record
    }

    pub fn recent(&self) -> Vec<ErrorRecord> {
        lock(&self.recent).iter().cloned().collect()
    }

    pub fn stats(&self) -> ErrorStats {
        let inner = lock(&self.inner);

        let mut most_common: Vec<(String, u64)> = inner
            .frequency
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        most_common.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        most_common.truncate(TOP_ERRORS);

        ErrorStats {
            total_errors: inner.total,
            error_frequency: inner.frequency.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            most_common,
        }
    }
}

impl Default for ErrorLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn test_key_truncates_message() {
        let long = "x".repeat(250);
        let key = frequency_key("generic_stage", &long);
        assert_eq!(key.len(), "generic_stage:".len() + 100);
    }

    #[test]
    fn test_record_counts_by_key() {
        let log = ErrorLog::new();
        let timeout = OrchestrationError::TransientService("ollama timed out".into());
        let stage = OrchestrationError::Stage("bad reply".into());

        log.record(&timeout, json!({"attempt": 1}));
        log.record(&timeout, json!({"attempt": 2}));
        let record = log.record(&stage, Value::Null);

        assert_eq!(record.kind, ErrorKind::GenericStage);
        assert_eq!(record.severity, ErrorSeverity::Medium);

        let stats = log.stats();
        assert_eq!(stats.total_errors, 3);
        assert_eq!(stats.most_common[0].1, 2);
        assert!(stats.most_common[0].0.starts_with("transient_service:"));
        assert_eq!(log.recent().len(), 3);
    }

    #[test]
    fn test_top_ten_only() {
        let log = ErrorLog::new();
        for i in 0..15 {
            log.record(&OrchestrationError::Stage(format!("failure {}", i)), Value::Null);
        }
        let stats = log.stats();
        assert_eq!(stats.error_frequency.len(), 15);
        assert_eq!(stats.most_common.len(), 10);
    }
}
