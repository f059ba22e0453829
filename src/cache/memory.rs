//! Memory Store Module
//!
//! In-process fallback store: a HashMap of expiring entries behind an async
//! RwLock. Expired entries are evicted lazily on read and in bulk by the
//! background sweep.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::warn;

use crate::cache::backend::{BackendKind, CacheBackend, StoreResult};
use crate::cache::entry::now_ms;
use crate::cache::{CacheEntry, GlobPattern};

// == Memory Store ==
/// Fallback cache storage. Always available, never fails.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryStore {
    // == Constructor ==
    pub fn new() -> Self {
        Self::default()
    }

    // == Set ==
    /// Stores a value, replacing any previous entry and its TTL.
    pub async fn insert(&self, key: &str, value: &str, ttl_secs: u64) {
        let entry = CacheEntry::new(value.to_string(), ttl_secs);
        self.entries.write().await.insert(key.to_string(), entry);
    }

    // == Get ==
    /// Returns the value if present and not expired. An expired entry found
    /// here is removed.
    pub async fn lookup(&self, key: &str) -> Option<String> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired() => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        let mut entries = self.entries.write().await;
        // Re-check under the write lock: a concurrent set may have replaced it.
        if entries.get(key).is_some_and(|entry| entry.is_expired()) {
            entries.remove(key);
        }
        entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value.clone())
    }

    // == Delete ==
    pub async fn remove(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    // == Keys ==
    /// Live keys matching a `*` glob.
    pub async fn matching_keys(&self, pattern: &str) -> Vec<String> {
        let glob = match GlobPattern::new(pattern) {
            Ok(glob) => glob,
            Err(e) => {
                warn!("Ignoring unusable cache key pattern '{}': {}", pattern, e);
                return Vec::new();
            }
        };

        let now = now_ms();
        self.entries
            .read()
            .await
            .iter()
            .filter(|(key, entry)| !entry.is_expired_at(now) && glob.matches(key))
            .map(|(key, _)| key.clone())
            .collect()
    }

    // == TTL ==
    pub async fn remaining_ms(&self, key: &str) -> Option<u64> {
        self.entries
            .read()
            .await
            .get(key)
            .and_then(CacheEntry::ttl_remaining_ms)
    }

    // == Cleanup Expired ==
    /// Removes all expired entries, returning how many were dropped.
    pub async fn cleanup_expired(&self) -> usize {
        let now = now_ms();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        before - entries.len()
    }

    // == Length ==
    /// Number of stored entries, including expired ones not yet swept.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheBackend for MemoryStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.lookup(key).await)
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()> {
        self.insert(key, value, ttl_secs).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.remove(key).await)
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        Ok(self.matching_keys(pattern).await)
    }

    async fn ttl_ms(&self, key: &str) -> StoreResult<Option<u64>> {
        Ok(self.remaining_ms(key).await)
    }

    async fn ping(&self) -> StoreResult<bool> {
        Ok(true)
    }
}
