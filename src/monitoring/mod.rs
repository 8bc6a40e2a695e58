//! Observability: request metrics, component timings, host gauges and the
//! error frequency log.
//!
//! All collectors are plain structs shared through `Arc`; nothing here is
//! a process-global.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub mod error_log;
pub mod metrics;
pub mod performance;
pub mod sampler;

pub use error_log::{ErrorLog, ErrorStats};
pub use metrics::{MetricsCollector, MetricsSummary};
pub use performance::{PerformanceMonitor, TimingGuard};
pub use sampler::{ProcfsProbe, ResourceProbe, ResourceSample, ResourceSampler, SamplerHandle};

/// The collectors one orchestrator instance reports into
#[derive(Clone)]
pub struct Telemetry {
    pub metrics: Arc<MetricsCollector>,
    pub performance: Arc<PerformanceMonitor>,
    pub errors: Arc<ErrorLog>,
}

impl Telemetry {
    pub fn new(window_size: usize) -> Self {
        Self {
            metrics: Arc::new(MetricsCollector::new(window_size)),
            performance: Arc::new(PerformanceMonitor::new()),
            errors: Arc::new(ErrorLog::new()),
        }
    }
}

/// Every critical section leaves its structure consistent, so a poisoned
/// lock is still safe to use.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fixed-capacity FIFO; pushing past capacity evicts the oldest entry
#[derive(Debug, Clone)]
pub struct BoundedWindow<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedWindow<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oldest_evicted_first() {
        let mut window = BoundedWindow::new(3);
        for i in 1..=5 {
            window.push(i);
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.iter().copied().collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_eq!(window.latest(), Some(&5));
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let mut window = BoundedWindow::new(0);
        window.push("a");
        window.push("b");
        assert_eq!(window.capacity(), 1);
        assert_eq!(window.latest(), Some(&"b"));
    }
}
