//! Request metrics
//!
//! Totals are lock-free atomics; the bounded windows and the per-label
//! counters each sit behind their own mutex.

use super::sampler::ResourceSample;
use super::{lock, BoundedWindow};
use crate::error::{ErrorKind, ErrorSeverity};
use crate::models::{Intent, RequestRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

const REQUESTS_PER_MINUTE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub started_at: DateTime<Utc>,
    /// Seconds since the collector was created
    pub uptime: f64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub requests_per_minute: usize,
    /// Mean of the response-time window, in seconds
    pub avg_response_time: f64,
    pub error_rate: f64,
    pub intent_distribution: BTreeMap<String, u64>,
    pub errors_by_kind: BTreeMap<String, u64>,
    pub errors_by_severity: BTreeMap<String, u64>,
    pub system_cpu: f64,
    pub system_memory: f64,
    pub total_tokens: u64,
    /// Tokens over all recorded requests, including failed attempts
    pub avg_tokens_per_request: f64,
    pub tokens_by_model: BTreeMap<String, u64>,
}

#[derive(Default)]
struct ErrorCounters {
    by_kind: BTreeMap<ErrorKind, u64>,
    by_severity: BTreeMap<ErrorSeverity, u64>,
}

#[derive(Default)]
struct LlmUsage {
    total_tokens: u64,
    by_model: BTreeMap<String, u64>,
}

struct Gauges {
    cpu: BoundedWindow<f64>,
    memory: BoundedWindow<f64>,
}

pub struct MetricsCollector {
    started: Instant,
    started_at: DateTime<Utc>,
    total: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    records: Mutex<BoundedWindow<RequestRecord>>,
    arrivals: Mutex<BoundedWindow<Instant>>,
    intents: Mutex<BTreeMap<Intent, u64>>,
    errors: Mutex<ErrorCounters>,
    gauges: Mutex<Gauges>,
    llm: Mutex<LlmUsage>,
}

impl MetricsCollector {
    pub fn new(window_size: usize) -> Self {
        Self {
            started: Instant::now(),
            started_at: Utc::now(),
            total: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            records: Mutex::new(BoundedWindow::new(window_size)),
            arrivals: Mutex::new(BoundedWindow::new(window_size)),
            intents: Mutex::new(BTreeMap::new()),
            errors: Mutex::new(ErrorCounters::default()),
            gauges: Mutex::new(Gauges {
                cpu: BoundedWindow::new(window_size),
                memory: BoundedWindow::new(window_size),
            }),
            llm: Mutex::new(LlmUsage::default()),
        }
    }

    pub fn record_request(&self, record: RequestRecord) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if record.success {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }

        *lock(&self.intents).entry(record.intent).or_insert(0) += 1;
        lock(&self.arrivals).push(Instant::now());
        lock(&self.records).push(record);
    }

    pub fn record_error(&self, kind: ErrorKind, severity: ErrorSeverity) {
        let mut errors = lock(&self.errors);
        *errors.by_kind.entry(kind).or_insert(0) += 1;
        *errors.by_severity.entry(severity).or_insert(0) += 1;
    }

    pub fn record_llm_usage(&self, model: &str, tokens: u64) {
        let mut llm = lock(&self.llm);
        llm.total_tokens += tokens;
        *llm.by_model.entry(model.to_string()).or_insert(0) += tokens;
    }

    pub fn record_resource_sample(&self, sample: ResourceSample) {
        let mut gauges = lock(&self.gauges);
        gauges.cpu.push(sample.cpu_percent);
        gauges.memory.push(sample.memory_percent);
    }

    pub fn total_requests(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn error_count(&self, kind: ErrorKind) -> u64 {
        lock(&self.errors).by_kind.get(&kind).copied().unwrap_or(0)
    }

    pub fn recent_requests(&self) -> Vec<RequestRecord> {
        lock(&self.records).iter().cloned().collect()
    }

    pub fn summary(&self) -> MetricsSummary {
        let now = Instant::now();
        let total = self.total.load(Ordering::Relaxed);
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);

        let requests_per_minute = lock(&self.arrivals)
            .iter()
            .filter(|at| now.saturating_duration_since(**at) <= REQUESTS_PER_MINUTE_WINDOW)
            .count();

        let avg_response_time = {
            let records = lock(&self.records);
            if records.is_empty() {
                0.0
            } else {
                records.iter().map(|r| r.duration.as_secs_f64()).sum::<f64>() / records.len() as f64
            }
        };

        let intent_distribution = lock(&self.intents)
            .iter()
            .map(|(intent, count)| (intent.to_string(), *count))
            .collect();

        let (errors_by_kind, errors_by_severity) = {
            let errors = lock(&self.errors);
            (
                errors.by_kind.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
                errors.by_severity.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            )
        };

        let (system_cpu, system_memory) = {
            let gauges = lock(&self.gauges);
            (
                gauges.cpu.latest().copied().unwrap_or(0.0),
                gauges.memory.latest().copied().unwrap_or(0.0),
            )
        };

        let (total_tokens, tokens_by_model) = {
            let llm = lock(&self.llm);
            (llm.total_tokens, llm.by_model.clone())
        };

        MetricsSummary {
            started_at: self.started_at,
            uptime: now.saturating_duration_since(self.started).as_secs_f64(),
            total_requests: total,
            successful_requests: succeeded,
            failed_requests: failed,
            requests_per_minute,
            avg_response_time,
            error_rate: failed as f64 / total.max(1) as f64,
            intent_distribution,
            errors_by_kind,
            errors_by_severity,
            system_cpu,
            system_memory,
            total_tokens,
            avg_tokens_per_request: total_tokens as f64 / total.max(1) as f64,
            tokens_by_model,
        }
    }
}
