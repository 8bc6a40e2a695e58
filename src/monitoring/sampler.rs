//! Background host resource sampling
//!
//! One long-lived task per sampler, owned through a [`SamplerHandle`].
//! Probe failures never end the loop: the sampler logs, waits two
//! intervals and tries again.

use super::metrics::MetricsCollector;
use super::lock;
use crate::error::{OrchestrationError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

#[async_trait]
pub trait ResourceProbe: Send + Sync {
    async fn sample(&self) -> Result<ResourceSample>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub idle: u64,
    pub total: u64,
}

/// Aggregate `cpu` line of `/proc/stat`; idle includes iowait
pub fn parse_cpu_times(stat: &str) -> Option<CpuTimes> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|f| f.parse().ok())
        .collect::<Option<_>>()?;
    if fields.len() < 4 {
        return None;
    }
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    Some(CpuTimes {
        idle,
        total: fields.iter().sum(),
    })
}

/// Used memory as a percentage, from `MemTotal` and `MemAvailable`
pub fn parse_memory_percent(meminfo: &str) -> Option<f64> {
    let value_of = |key: &str| -> Option<f64> {
        meminfo
            .lines()
            .find(|l| l.starts_with(key))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    };
    let total = value_of("MemTotal:")?;
    let available = value_of("MemAvailable:")?;
    if total <= 0.0 {
        return None;
    }
    Some(((total - available) / total * 100.0).clamp(0.0, 100.0))
}

fn cpu_percent(previous: Option<CpuTimes>, current: CpuTimes) -> f64 {
    let (idle, total) = match previous {
        Some(prev) if current.total > prev.total => (
            current.idle.saturating_sub(prev.idle),
            current.total - prev.total,
        ),
        _ => (current.idle, current.total),
    };
    if total == 0 {
        return 0.0;
    }
    ((total - idle.min(total)) as f64 / total as f64 * 100.0).clamp(0.0, 100.0)
}

/// Linux procfs probe. CPU is the busy share since the previous sample
/// (since boot on the first one).
pub struct ProcfsProbe {
    previous: Mutex<Option<CpuTimes>>,
}

impl ProcfsProbe {
    pub fn new() -> Self {
        Self {
            previous: Mutex::new(None),
        }
    }
}

impl Default for ProcfsProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceProbe for ProcfsProbe {
    async fn sample(&self) -> Result<ResourceSample> {
        let stat = tokio::fs::read_to_string("/proc/stat").await?;
        let meminfo = tokio::fs::read_to_string("/proc/meminfo").await?;

        let times = parse_cpu_times(&stat)
            .ok_or_else(|| OrchestrationError::Stage("unreadable /proc/stat".to_string()))?;
        let memory_percent = parse_memory_percent(&meminfo)
            .ok_or_else(|| OrchestrationError::Stage("unreadable /proc/meminfo".to_string()))?;

        let previous = lock(&self.previous).replace(times);

        Ok(ResourceSample {
            cpu_percent: cpu_percent(previous, times),
            memory_percent,
        })
    }
}

pub struct ResourceSampler {
    probe: Arc<dyn ResourceProbe>,
    metrics: Arc<MetricsCollector>,
    interval: Duration,
}

/// Running sampler; dropping it without `stop` leaves the task running
pub struct SamplerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SamplerHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Resource sampler task ended abnormally");
        }
    }
}

impl ResourceSampler {
    pub fn new(
        probe: Arc<dyn ResourceProbe>,
        metrics: Arc<MetricsCollector>,
        interval: Duration,
    ) -> Self {
        Self {
            probe,
            metrics,
            interval,
        }
    }

    pub fn start(self) -> SamplerHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let Self {
            probe,
            metrics,
            interval,
        } = self;

        let task = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs_f64(), "Resource sampler started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match probe.sample().await {
                            Ok(sample) => {
                                debug!(
                                    cpu = sample.cpu_percent,
                                    memory = sample.memory_percent,
                                    "Resource sample"
                                );
                                metrics.record_resource_sample(sample);
                            }
                            Err(e) => {
                                warn!(error = %e, "Resource sampling failed, backing off");
                                tokio::select! {
                                    _ = tokio::time::sleep(interval * 2) => {}
                                    _ = shutdown_rx.changed() => break,
                                }
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }

            info!("Resource sampler stopped");
        });

        SamplerHandle { shutdown, task }
    }
}
