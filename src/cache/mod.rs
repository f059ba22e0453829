//! Cache Module
//!
//! Key/value cache with TTL expiration: Redis when reachable, an in-process
//! map otherwise, and a typed JSON service on top.

mod backend;
mod entry;
mod keys;
mod memory;
mod pattern;
mod redis_store;
mod service;
mod stats;
mod store;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use backend::{BackendKind, CacheBackend, StoreError, StoreResult};
pub use entry::CacheEntry;
pub use keys::{CacheKey, CacheResource, CacheTtls, KEY_DELIMITER};
pub use memory::MemoryStore;
pub use pattern::GlobPattern;
pub use redis_store::RedisStore;
pub use service::{CacheService, CachedValue};
pub use stats::{CacheStats, StatsRecorder};
pub use store::CacheStore;

// == Public Constants ==
/// Default interval in seconds between sweeps of the in-process store
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
