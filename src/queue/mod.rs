//! Queue Module
//!
//! Rate-limited request queues that pace outbound scraping.

mod config;
#[allow(clippy::module_inception)]
mod queue;

pub use config::QueueConfig;
pub use queue::{QueueStats, RequestQueue};

/// Which of the two shared queues a fetch goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueLane {
    /// General scraping
    #[default]
    Default,
    /// Latency-sensitive lookups
    Priority,
}
