//! Cache Service Module
//!
//! Typed JSON facade over [`CacheStore`]. Values are serialized with
//! serde_json; a value that no longer decodes is treated as a miss.

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::{BackendKind, CacheStats, CacheStore, StatsRecorder};
use crate::error::Result;
use crate::models::CacheMetadata;

/// Outcome of [`CacheService::get_or_set`].
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue<T> {
    pub data: T,
    /// True when `data` came from the cache rather than the compute closure
    pub cached: bool,
}

// == Cache Service ==
#[derive(Clone)]
pub struct CacheService {
    store: Arc<CacheStore>,
    stats: Arc<StatsRecorder>,
}

impl CacheService {
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self {
            store,
            stats: Arc::new(StatsRecorder::new()),
        }
    }

    pub fn store(&self) -> Arc<CacheStore> {
        Arc::clone(&self.store)
    }

    pub fn active_backend(&self) -> BackendKind {
        self.store.active_backend()
    }

    // == Get ==
    /// Decoded value for `key`, or `None` when absent, expired or undecodable.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let Some(raw) = self.store.get(key).await else {
            self.stats.record_miss();
            debug!("Cache miss: {}", key);
            return None;
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                self.stats.record_hit();
                debug!("Cache hit: {}", key);
                Some(value)
            }
            Err(e) => {
                self.stats.record_miss();
                warn!("Discarding undecodable cache entry '{}': {}", key, e);
                None
            }
        }
    }

    // == Set ==
    /// Stores `value` for `ttl_secs`. Encoding failures are logged and dropped.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl_secs: u64) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Not caching '{}', value failed to encode: {}", key, e);
                return;
            }
        };

        self.store.set(key, &raw, ttl_secs).await;
        self.stats.record_write();
        debug!("Cache set: {} ({}s)", key, ttl_secs);
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.store.delete(key).await
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.store.ttl_ms(key).await.is_some()
    }

    // == Metadata ==
    /// Whether `key` is cached and, if so, when it expires.
    pub async fn get_metadata(&self, key: &str) -> CacheMetadata {
        let backend = self.store.active_backend();
        match self.store.ttl_ms(key).await {
            Some(remaining) if remaining > 0 => CacheMetadata::hit(remaining, backend),
            _ => CacheMetadata::miss(backend),
        }
    }

    // == Invalidate ==
    /// Deletes every key matching the `*` glob and returns how many went.
    pub async fn invalidate_pattern(&self, pattern: &str) -> usize {
        let keys = self.store.keys(pattern).await;
        let mut removed = 0;
        for key in &keys {
            if self.store.delete(key).await {
                removed += 1;
            }
        }

        if removed > 0 {
            debug!("Invalidated {} keys matching '{}'", removed, pattern);
        }
        removed
    }

    // == Get Or Set ==
    /// Returns the cached value, or runs `compute`, caches its result and
    /// returns it. `compute` runs at most once and its error is returned
    /// unchanged; nothing is cached on failure.
    pub async fn get_or_set<T, F, Fut>(
        &self,
        key: &str,
        compute: F,
        ttl_secs: u64,
    ) -> Result<CachedValue<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(data) = self.get::<T>(key).await {
            return Ok(CachedValue { data, cached: true });
        }

        let data = compute().await?;
        self.set(key, &data, ttl_secs).await;
        Ok(CachedValue {
            data,
            cached: false,
        })
    }

    pub async fn ping(&self) -> bool {
        self.store.ping().await
    }

    pub async fn stats(&self) -> CacheStats {
        let fallback_entries = self.store.fallback().len().await;
        self.stats
            .snapshot(fallback_entries, self.store.active_backend())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheResource;
    use crate::error::ApiError;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Anime {
        title: String,
    }

    fn service() -> CacheService {
        CacheService::new(Arc::new(CacheStore::memory_only()))
    }

    fn one_piece() -> Anime {
        Anime {
            title: "One Piece".to_string(),
        }
    }

    #[tokio::test]
    async fn test_set_then_get_with_metadata() {
        let cache = service();
        let key = CacheResource::Anime.key(&["one-piece"]);
        assert_eq!(key.as_str(), "otaku:anime:one-piece");

        cache.set(key.as_str(), &one_piece(), 3600).await;

        assert_eq!(cache.get::<Anime>(key.as_str()).await, Some(one_piece()));
        let meta = cache.get_metadata(key.as_str()).await;
        assert!(meta.cached);
        assert_eq!(meta.backend, BackendKind::Memory);

        let expires = chrono::DateTime::parse_from_rfc3339(meta.expires_at.as_deref().unwrap())
            .unwrap();
        let remaining = expires.signed_duration_since(chrono::Utc::now());
        assert!(remaining.num_seconds() > 3500);
        assert!(remaining.num_seconds() <= 3600);
    }

    #[tokio::test]
    async fn test_metadata_for_absent_key() {
        let cache = service();
        let meta = cache.get_metadata("otaku:anime:missing").await;
        assert!(!meta.cached);
        assert!(meta.expires_at.is_none());
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss() {
        let cache = service();
        cache.store().set("key", "not json", 300).await;

        assert_eq!(cache.get::<Anime>("key").await, None);
        assert_eq!(cache.stats().await.misses, 1);
    }

    #[tokio::test]
    async fn test_wrong_shape_is_a_miss() {
        let cache = service();
        cache.set("key", &vec![1, 2, 3], 300).await;
        assert_eq!(cache.get::<Anime>("key").await, None);
    }

    #[tokio::test]
    async fn test_zero_ttl_is_immediately_absent() {
        let cache = service();
        cache.set("key", &one_piece(), 0).await;

        assert_eq!(cache.get::<Anime>("key").await, None);
        assert!(!cache.exists("key").await);
    }

    #[tokio::test]
    async fn test_invalidate_pattern_counts_matches() {
        let cache = service();
        cache.set("otaku:search:naruto:1", &1, 300).await;
        cache.set("otaku:search:naruto:2", &2, 300).await;
        cache.set("otaku:search:bleach:1", &3, 300).await;
        cache.set("otaku:anime:naruto", &4, 300).await;

        assert_eq!(cache.invalidate_pattern("otaku:search:naruto:*").await, 2);
        assert!(!cache.exists("otaku:search:naruto:1").await);
        assert!(cache.exists("otaku:search:bleach:1").await);
        assert_eq!(cache.invalidate_pattern("otaku:search:naruto:*").await, 0);
    }

    #[tokio::test]
    async fn test_get_or_set_computes_once_then_hits() {
        let cache = service();
        let calls = AtomicUsize::new(0);

        let first = cache
            .get_or_set(
                "otaku:anime:one-piece",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(one_piece())
                },
                3600,
            )
            .await
            .unwrap();
        assert!(!first.cached);

        let second = cache
            .get_or_set(
                "otaku:anime:one-piece",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(one_piece())
                },
                3600,
            )
            .await
            .unwrap();

        assert!(second.cached);
        assert_eq!(second.data, one_piece());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_or_set_propagates_error_without_caching() {
        let cache = service();

        let result = cache
            .get_or_set::<Anime, _, _>(
                "otaku:anime:missing",
                || async { Err(ApiError::NotFound("Anime".to_string())) },
                3600,
            )
            .await;

        assert!(matches!(result, Err(ApiError::NotFound(_))));
        assert!(!cache.exists("otaku:anime:missing").await);
    }

    #[tokio::test]
    async fn test_stats_track_hits_misses_writes() {
        let cache = service();
        cache.set("key", &one_piece(), 300).await;
        let _ = cache.get::<Anime>("key").await;
        let _ = cache.get::<Anime>("other").await;

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.fallback_entries, 1);
        assert!(cache.ping().await);
    }
}
