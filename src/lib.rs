//! Otaku Proxy - scrape scheduling core for an anime catalog proxy
//!
//! Provides a TTL cache that prefers Redis and falls back to process memory,
//! retry with exponential backoff, and rate-limited request queues that pace
//! scraping of the source site.

pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod queue;
pub mod retry;
pub mod scraper;
pub mod state;
pub mod tasks;

pub use cache::{CacheResource, CacheService, CacheStore};
pub use config::Config;
pub use error::{ApiError, ErrorKind, Result};
pub use queue::{QueueConfig, QueueLane, RequestQueue};
pub use retry::{with_retry, with_retry_and_timeout, with_timeout, RetryExecutor, RetryPolicy};
pub use scraper::ScraperClient;
pub use state::AppState;
pub use tasks::spawn_sweep_task;
