//! Redis Store Module
//!
//! Preferred cache backend. Uses a `ConnectionManager` so a dropped
//! connection is re-established in the background; every command is bounded
//! by the configured command timeout so a dead server cannot stall callers.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use tracing::{debug, info};

use crate::cache::backend::{BackendKind, CacheBackend, StoreError, StoreResult};
use crate::config::RedisSettings;

/// Keys requested per SCAN round trip.
const SCAN_BATCH: usize = 1000;

/// Rewrites a `*` glob into a Redis MATCH pattern. Redis also treats `?`,
/// `[...]` and `\` as special; those are escaped so `*` stays the only
/// wildcard, as in the fallback store.
pub fn match_pattern(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len());
    for c in glob.chars() {
        if matches!(c, '\\' | '?' | '[' | ']') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Redis-backed cache.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    endpoint: String,
    command_timeout: Duration,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("endpoint", &self.endpoint)
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

impl RedisStore {
    /// Opens a connection and verifies it answers PING.
    pub async fn connect(settings: &RedisSettings) -> StoreResult<Self> {
        let client = Client::open(settings.url())?;
        let connect_timeout = settings.connect_timeout();

        let conn = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(connect_timeout))??;

        let store = Self {
            conn,
            endpoint: settings.endpoint(),
            command_timeout: settings.command_timeout(),
        };

        if !store.ping().await? {
            return Err(StoreError::Unavailable(format!(
                "{} did not answer PING",
                store.endpoint
            )));
        }

        info!("Redis connected at {}", store.endpoint);
        Ok(store)
    }

    async fn bounded<T, F>(&self, command: F) -> StoreResult<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        tokio::time::timeout(self.command_timeout, command)
            .await
            .map_err(|_| StoreError::Timeout(self.command_timeout))?
            .map_err(StoreError::from)
    }
}

#[async_trait]
impl CacheBackend for RedisStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Redis
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        self.bounded(async move { conn.get::<_, Option<String>>(key).await })
            .await
    }

    async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        self.bounded(async move {
            redis::cmd("SETEX")
                .arg(key)
                .arg(ttl_secs)
                .arg(value)
                .query_async::<_, ()>(&mut conn)
                .await
        })
        .await?;

        debug!("Redis SETEX {} ({}s)", key, ttl_secs);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let removed = self
            .bounded(async move { conn.del::<_, i64>(key).await })
            .await?;
        Ok(removed > 0)
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = match_pattern(pattern);

        let mut keys = self
            .bounded(async move {
                let mut cursor: u64 = 0;
                let mut found = Vec::new();

                loop {
                    let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn)
                        .await?;

                    found.extend(batch);
                    if next == 0 {
                        break;
                    }
                    cursor = next;
                }

                Ok::<_, redis::RedisError>(found)
            })
            .await?;

        // SCAN may report a key more than once.
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    async fn ttl_ms(&self, key: &str) -> StoreResult<Option<u64>> {
        let mut conn = self.conn.clone();
        // PTTL answers -2 for a missing key and -1 for one without expiry.
        let pttl = self
            .bounded(async move { conn.pttl::<_, i64>(key).await })
            .await?;
        Ok((pttl > 0).then_some(pttl as u64))
    }

    async fn ping(&self) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let reply = self
            .bounded(async move {
                redis::cmd("PING")
                    .query_async::<_, String>(&mut conn)
                    .await
            })
            .await?;
        Ok(reply == "PONG")
    }
}
