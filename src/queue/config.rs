//! Queue Configuration
//!
//! Concurrency, rate-window and timeout limits for one request queue.

use std::time::Duration;

/// Limits for a [`RequestQueue`](super::RequestQueue).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Tasks allowed to run at once
    pub concurrency: usize,
    /// Rate window length; 0 disables rate limiting
    pub interval_ms: u64,
    /// Task starts allowed per window
    pub interval_cap: usize,
    /// Per-task timeout; 0 disables it
    pub task_timeout_ms: u64,
}

impl QueueConfig {
    /// General scraping lane.
    pub fn scraper() -> Self {
        Self {
            concurrency: 2,
            interval_ms: 1000,
            interval_cap: 3,
            task_timeout_ms: 30_000,
        }
    }

    /// Latency-sensitive lane.
    pub fn priority() -> Self {
        Self {
            concurrency: 1,
            interval_ms: 500,
            interval_cap: 2,
            task_timeout_ms: 15_000,
        }
    }

    /// Same limits with concurrency and cap raised to at least one.
    pub fn normalized(mut self) -> Self {
        self.concurrency = self.concurrency.max(1);
        self.interval_cap = self.interval_cap.max(1);
        self
    }

    pub fn interval(&self) -> Option<Duration> {
        (self.interval_ms > 0).then(|| Duration::from_millis(self.interval_ms))
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        (self.task_timeout_ms > 0).then(|| Duration::from_millis(self.task_timeout_ms))
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::scraper()
    }
}
