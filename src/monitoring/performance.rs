//! Scoped timing of named operations

use super::{lock, BoundedWindow};
use crate::models::{ComponentStats, ComponentTiming};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_TIMING_CAPACITY: usize = 100;

pub struct PerformanceMonitor {
    capacity: usize,
    timings: Mutex<HashMap<String, BoundedWindow<ComponentTiming>>>,
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TIMING_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            timings: Mutex::new(HashMap::new()),
        }
    }

    /// Start a timing region; the sample is recorded when the guard drops
    pub fn time(&self, name: impl Into<String>) -> TimingGuard<'_> {
        TimingGuard {
            monitor: self,
            name: name.into(),
            started: Instant::now(),
        }
    }

    pub fn record(&self, name: &str, duration: Duration) {
        let timing = ComponentTiming {
            component_name: name.to_string(),
            duration,
            timestamp: Utc::now(),
        };
        let mut timings = lock(&self.timings);
        timings
            .entry(name.to_string())
            .or_insert_with(|| BoundedWindow::new(self.capacity))
            .push(timing);
    }

    pub fn sample_count(&self, name: &str) -> usize {
        lock(&self.timings).get(name).map_or(0, BoundedWindow::len)
    }

    /// Per-component aggregates, in seconds. Components without samples
    /// are left out.
    pub fn stats(&self) -> BTreeMap<String, ComponentStats> {
        let timings = lock(&self.timings);
        timings
            .iter()
            .filter_map(|(name, window)| {
                let secs: Vec<f64> = window.iter().map(|t| t.duration.as_secs_f64()).collect();
                let last = *secs.last()?;
                let stats = ComponentStats {
                    count: secs.len(),
                    avg_duration: secs.iter().sum::<f64>() / secs.len() as f64,
                    min_duration: secs.iter().copied().fold(f64::INFINITY, f64::min),
                    max_duration: secs.iter().copied().fold(0.0, f64::max),
                    last_duration: last,
                };
                Some((name.clone(), stats))
            })
            .collect()
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TimingGuard<'a> {
    monitor: &'a PerformanceMonitor,
    name: String,
    started: Instant,
}

impl TimingGuard<'_> {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for TimingGuard<'_> {
    fn drop(&mut self) {
        self.monitor.record(&self.name, self.started.elapsed());
    }
}
