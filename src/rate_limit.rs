//! Sliding-window rate limiting per caller identity
//!
//! Each identity keeps the timestamps of its admitted requests from the
//! last 60 seconds. Check-and-record happens under one lock, so two
//! concurrent calls can never both take the last slot.

use crate::monitoring::lock;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const RATE_WINDOW: Duration = Duration::from_secs(60);
pub const ANONYMOUS_IDENTITY: &str = "anonymous";

pub struct RateLimiter {
    max_per_window: usize,
    enabled: bool,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_requests_per_minute: usize, enabled: bool) -> Self {
        Self {
            max_per_window: max_requests_per_minute,
            enabled,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Admit or reject one request. Rejected requests are not recorded.
    pub fn admit(&self, identity: Option<&str>) -> bool {
        if !self.enabled {
            return true;
        }

        let identity = identity
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(ANONYMOUS_IDENTITY);
        let now = Instant::now();

        let mut windows = lock(&self.windows);
        let window = windows.entry(identity.to_string()).or_default();

        while let Some(oldest) = window.front() {
            if now.saturating_duration_since(*oldest) >= RATE_WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= self.max_per_window {
            warn!(
                identity = identity,
                limit = self.max_per_window,
                "Rate limit exceeded"
            );
            return false;
        }

        window.push_back(now);
        debug!(identity = identity, used = window.len(), "Request admitted");
        true
    }

    /// Requests currently counted against `identity`
    pub fn in_window(&self, identity: &str) -> usize {
        let now = Instant::now();
        lock(&self.windows).get(identity).map_or(0, |window| {
            window
                .iter()
                .filter(|at| now.saturating_duration_since(**at) < RATE_WINDOW)
                .count()
        })
    }
}
