//! Cache Store Module
//!
//! Composite store: a preferred backend (Redis) in front of the in-process
//! fallback. Backend failures are absorbed here and never reach callers;
//! the store degrades to the fallback and logs each transition once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache::backend::{BackendKind, CacheBackend, StoreError};
use crate::cache::{MemoryStore, RedisStore};
use crate::config::{CacheBackendChoice, CacheSettings};

// == Cache Store ==
pub struct CacheStore {
    preferred: Option<Arc<dyn CacheBackend>>,
    fallback: Arc<MemoryStore>,
    degraded: AtomicBool,
}

impl CacheStore {
    // == Constructors ==
    /// Store without a preferred backend.
    pub fn memory_only() -> Self {
        Self {
            preferred: None,
            fallback: Arc::new(MemoryStore::new()),
            degraded: AtomicBool::new(false),
        }
    }

    /// Store preferring `backend`, with a fresh in-process fallback.
    pub fn with_preferred(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            preferred: Some(backend),
            fallback: Arc::new(MemoryStore::new()),
            degraded: AtomicBool::new(false),
        }
    }

    /// Probes the configured backend once. An unreachable Redis leaves the
    /// store in memory-only mode for its whole lifetime.
    pub async fn connect(settings: &CacheSettings) -> Self {
        match &settings.backend {
            CacheBackendChoice::Memory => {
                info!("Cache backend: in-memory");
                Self::memory_only()
            }
            CacheBackendChoice::Redis(redis) => match RedisStore::connect(redis).await {
                Ok(store) => Self::with_preferred(Arc::new(store)),
                Err(e) => {
                    warn!(
                        "Redis not available at {}, using in-memory cache: {}",
                        redis.endpoint(),
                        e
                    );
                    Self::memory_only()
                }
            },
        }
    }

    // == Accessors ==
    /// The in-process store, for the background sweep.
    pub fn fallback(&self) -> Arc<MemoryStore> {
        Arc::clone(&self.fallback)
    }

    pub fn has_preferred(&self) -> bool {
        self.preferred.is_some()
    }

    /// True while the preferred backend is failing.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Backend currently serving reads.
    pub fn active_backend(&self) -> BackendKind {
        match &self.preferred {
            Some(backend) if !self.is_degraded() => backend.kind(),
            _ => BackendKind::Memory,
        }
    }

    // == Health Transitions ==
    fn preferred_failed(&self, op: &str, key: &str, err: &StoreError) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            warn!(
                "Preferred cache backend failed on {} '{}', falling back to in-memory cache: {}",
                op, key, err
            );
        } else {
            debug!("Preferred cache backend still failing on {} '{}': {}", op, key, err);
        }
    }

    fn preferred_ok(&self) {
        if self.degraded.swap(false, Ordering::Relaxed) {
            info!("Preferred cache backend recovered");
        }
    }

    // == Get ==
    /// Value for `key`, `None` on a miss. Never fails.
    pub async fn get(&self, key: &str) -> Option<String> {
        if let Some(preferred) = &self.preferred {
            match preferred.get(key).await {
                Ok(value) => {
                    self.preferred_ok();
                    return value;
                }
                Err(e) => self.preferred_failed("get", key, &e),
            }
        }
        self.fallback.lookup(key).await
    }

    // == Set ==
    /// Stores `value` for `ttl_secs`. A zero TTL removes the key instead.
    pub async fn set(&self, key: &str, value: &str, ttl_secs: u64) {
        if ttl_secs == 0 {
            self.delete(key).await;
            return;
        }

        if let Some(preferred) = &self.preferred {
            match preferred.set(key, value, ttl_secs).await {
                Ok(()) => {
                    self.preferred_ok();
                    return;
                }
                Err(e) => self.preferred_failed("set", key, &e),
            }
        }
        self.fallback.insert(key, value, ttl_secs).await;
    }

    // == Delete ==
    /// Removes `key` from both backends. Returns whether anything was removed.
    pub async fn delete(&self, key: &str) -> bool {
        let mut removed = false;
        if let Some(preferred) = &self.preferred {
            match preferred.delete(key).await {
                Ok(found) => {
                    self.preferred_ok();
                    removed |= found;
                }
                Err(e) => self.preferred_failed("delete", key, &e),
            }
        }
        removed |= self.fallback.remove(key).await;
        removed
    }

    // == Keys ==
    /// Keys matching a `*` glob on the active backend.
    pub async fn keys(&self, pattern: &str) -> Vec<String> {
        if let Some(preferred) = &self.preferred {
            match preferred.keys(pattern).await {
                Ok(keys) => {
                    self.preferred_ok();
                    return keys;
                }
                Err(e) => self.preferred_failed("keys", pattern, &e),
            }
        }
        self.fallback.matching_keys(pattern).await
    }

    // == TTL ==
    /// Remaining lifetime of `key` in milliseconds.
    pub async fn ttl_ms(&self, key: &str) -> Option<u64> {
        if let Some(preferred) = &self.preferred {
            match preferred.ttl_ms(key).await {
                Ok(ttl) => {
                    self.preferred_ok();
                    return ttl;
                }
                Err(e) => self.preferred_failed("ttl", key, &e),
            }
        }
        self.fallback.remaining_ms(key).await
    }

    // == Ping ==
    /// Health of the active backend. When the preferred backend stops
    /// answering the store is serving from the fallback, which is healthy.
    pub async fn ping(&self) -> bool {
        if let Some(preferred) = &self.preferred {
            match preferred.ping().await {
                Ok(true) => {
                    self.preferred_ok();
                    return true;
                }
                Ok(false) => {
                    let err = StoreError::Unavailable("PING not answered".to_string());
                    self.preferred_failed("ping", "-", &err);
                }
                Err(e) => self.preferred_failed("ping", "-", &e),
            }
        }
        true
    }
}
