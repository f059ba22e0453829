//! Cache Backend Module
//!
//! Capability interface shared by the preferred (Redis) and fallback
//! (in-process) stores.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Errors raised by a backend. These never leave the cache module: the
/// composite store absorbs them and degrades to the fallback.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Backend did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Which backend served (or would serve) a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Redis,
    Memory,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Redis => "redis",
            BackendKind::Memory => "memory",
        }
    }
}

/// Key-value storage with expiry.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Value for `key`, `None` when absent or expired.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Stores `value` expiring `ttl_secs` from now. `ttl_secs` is never zero.
    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()>;

    /// Removes `key`; `Ok(false)` when it was not present.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Keys matching a `*` glob.
    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>>;

    /// Remaining lifetime of `key` in milliseconds, `None` if absent.
    async fn ttl_ms(&self, key: &str) -> StoreResult<Option<u64>>;

    async fn ping(&self) -> StoreResult<bool>;
}
