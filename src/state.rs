//! Application State
//!
//! Shared handles every endpoint handler needs: the cache service, the
//! scraper and the two request queues.

use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::info;

use crate::cache::{BackendKind, CacheResource, CacheService, CacheStore, CacheTtls};
use crate::config::{CacheBackendChoice, Config};
use crate::error::Result;
use crate::models::{
    ApiResponse, CacheMetadata, CheckResult, HealthChecks, HealthReport, QueueChecks,
};
use crate::queue::{QueueLane, RequestQueue};
use crate::scraper::ScraperClient;
use crate::tasks::spawn_sweep_task;

/// Application state shared across all handlers.
///
/// Cheap to clone; clones share the same cache, scraper and queues.
#[derive(Clone)]
pub struct AppState {
    pub cache: CacheService,
    pub scraper: Arc<ScraperClient>,
    /// General scraping lane
    pub queue: RequestQueue,
    /// Latency-sensitive lane
    pub priority_queue: RequestQueue,
    ttls: Arc<CacheTtls>,
    sweep_interval_secs: u64,
    redis_configured: bool,
    started: Instant,
}

impl AppState {
    /// Builds the state around an already constructed store.
    pub fn new(store: CacheStore, config: &Config) -> Result<Self> {
        let scraper = ScraperClient::new(
            &config.source_base_url,
            config.scraper.clone(),
            config.retry.clone(),
        )?;

        Ok(Self {
            cache: CacheService::new(Arc::new(store)),
            scraper: Arc::new(scraper),
            queue: RequestQueue::new("scraper", config.queue.clone()),
            priority_queue: RequestQueue::new("priority", config.priority_queue.clone()),
            ttls: Arc::new(config.cache.ttls.clone()),
            sweep_interval_secs: config.cache.sweep_interval_secs,
            redis_configured: matches!(config.cache.backend, CacheBackendChoice::Redis(_)),
            started: Instant::now(),
        })
    }

    /// Creates a new AppState from configuration, probing the configured
    /// cache backend once.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store = CacheStore::connect(&config.cache).await;
        let state = Self::new(store, config)?;
        info!(
            "Scrape core ready: source {}, cache backend {}",
            config.source_base_url,
            state.cache.active_backend().as_str()
        );
        Ok(state)
    }

    pub fn queue_for(&self, lane: QueueLane) -> &RequestQueue {
        match lane {
            QueueLane::Default => &self.queue,
            QueueLane::Priority => &self.priority_queue,
        }
    }

    pub fn ttl_for(&self, resource: CacheResource) -> u64 {
        self.ttls.get(resource)
    }

    // == Fetch Cached ==
    /// Serves `resource`/`params` from cache, or fetches `path` through the
    /// `lane` queue, parses the page with `parse` and caches the result.
    pub async fn fetch_cached<T, S, P>(
        &self,
        resource: CacheResource,
        params: &[S],
        path: &str,
        lane: QueueLane,
        parse: P,
    ) -> Result<ApiResponse<T>>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        S: AsRef<str>,
        P: FnOnce(String) -> Result<T>,
    {
        let key = resource.key(params);
        let ttl = self.ttl_for(resource);
        let queue = self.queue_for(lane).clone();
        let scraper = Arc::clone(&self.scraper);
        let path = path.to_string();

        let value = self
            .cache
            .get_or_set(
                key.as_str(),
                || async move {
                    let page = queue
                        .add(move || async move { scraper.fetch(&path).await }, 0)
                        .await?;
                    parse(page)
                },
                ttl,
            )
            .await?;

        let cache = self.metadata_for(key.as_str(), value.cached, ttl).await;
        Ok(ApiResponse::new(value.data, cache))
    }

    /// Metadata for a value just returned for `key`. An entry read from
    /// cache that expires before its TTL is looked up is still reported as
    /// cached, expiring now.
    async fn metadata_for(&self, key: &str, cached: bool, ttl_secs: u64) -> CacheMetadata {
        if !cached {
            return CacheMetadata::fresh(ttl_secs, self.cache.active_backend());
        }

        let metadata = self.cache.get_metadata(key).await;
        if metadata.cached {
            metadata
        } else {
            CacheMetadata::hit(0, metadata.backend)
        }
    }

    /// Drops every cached entry of `resource`.
    pub async fn invalidate(&self, resource: CacheResource) -> usize {
        self.cache.invalidate_pattern(&resource.pattern()).await
    }

    // == Background ==
    /// Starts the periodic sweep of the in-process store.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        spawn_sweep_task(self.cache.store().fallback(), self.sweep_interval_secs)
    }

    // == Health ==
    /// Cache and queue status, plus a round trip to the source site when
    /// `probe_source` is set.
    pub async fn health(&self, probe_source: bool) -> HealthReport {
        let backend = self.cache.active_backend();
        let cache = if !self.cache.ping().await {
            CheckResult::error("Cache backend not responding")
        } else if self.redis_configured && backend == BackendKind::Memory {
            CheckResult::degraded("Redis unavailable, serving from in-memory cache")
        } else {
            CheckResult::ok(Some(format!("{} backend", backend.as_str())))
        };

        let source = if probe_source {
            Some(match self.scraper.probe().await {
                Ok(elapsed) => CheckResult::ok(None).with_response_time(elapsed),
                Err(e) => CheckResult::error(e.to_string()),
            })
        } else {
            None
        };

        let checks = HealthChecks {
            cache,
            source,
            queues: QueueChecks {
                default: self.queue.stats(),
                priority: self.priority_queue.stats(),
            },
            stats: self.cache.stats().await,
        };
        HealthReport::new(self.started.elapsed().as_secs(), checks)
    }

    /// Waits for both queues to drain.
    pub async fn shutdown(&self) {
        info!("Draining request queues");
        tokio::join!(self.queue.on_idle(), self.priority_queue.on_idle());
        info!("Request queues drained");
    }
}
