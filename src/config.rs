//! Configuration Module
//!
//! Handles loading and managing scrape core configuration from environment
//! variables. Unset or unparsable variables fall back to their defaults.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::{CacheResource, CacheTtls, DEFAULT_SWEEP_INTERVAL_SECS};
use crate::queue::QueueConfig;
use crate::retry::RetryPolicy;
use crate::scraper::ScraperSettings;

/// Default source site.
pub const DEFAULT_SOURCE_BASE_URL: &str = "https://otakudesu.best";

// == Redis Settings ==
#[derive(Clone, PartialEq, Eq)]
pub struct RedisSettings {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
    /// Bound on the startup connect and PING
    pub connect_timeout_ms: u64,
    /// Bound on each command after startup
    pub command_timeout_ms: u64,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            db: 0,
            connect_timeout_ms: 5000,
            command_timeout_ms: 2000,
        }
    }
}

impl RedisSettings {
    /// `redis://[:password@]host:port/db`
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }

    /// `host:port`, safe to log.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

impl fmt::Debug for RedisSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("db", &self.db)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("command_timeout_ms", &self.command_timeout_ms)
            .finish()
    }
}

// == Cache Settings ==
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackendChoice {
    /// In-process store only
    Memory,
    /// Redis, falling back to the in-process store
    Redis(RedisSettings),
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: CacheBackendChoice,
    /// Interval in seconds between sweeps of the in-process store
    pub sweep_interval_secs: u64,
    pub ttls: CacheTtls,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackendChoice::Redis(RedisSettings::default()),
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            ttls: CacheTtls::new(),
        }
    }
}

// == Config ==
/// Scrape core configuration.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Site every relative scrape path resolves against
    pub source_base_url: String,
    pub cache: CacheSettings,
    pub scraper: ScraperSettings,
    pub retry: RetryPolicy,
    /// General scraping lane
    pub queue: QueueConfig,
    /// Latency-sensitive lane
    pub priority_queue: QueueConfig,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SOURCE_BASE_URL` - Source site (default: https://otakudesu.best)
    /// - `CACHE_BACKEND` - `redis` or `memory` (default: redis)
    /// - `REDIS_HOST`, `REDIS_PORT`, `REDIS_PASSWORD`, `REDIS_DB`
    /// - `REDIS_CONNECT_TIMEOUT_MS` (default: 5000), `REDIS_COMMAND_TIMEOUT_MS` (default: 2000)
    /// - `CACHE_SWEEP_INTERVAL` - Fallback sweep in seconds (default: 60)
    /// - `CACHE_TTL_<RESOURCE>` - TTL override in seconds, e.g. `CACHE_TTL_ANIME`
    /// - `SCRAPER_TIMEOUT` (default: 10000), `SCRAPER_MAX_RETRIES` (default: 3)
    /// - `SCRAPER_DELAY_MIN` (default: 500), `SCRAPER_DELAY_MAX` (default: 2000)
    /// - `RETRY_INITIAL_DELAY_MS` (default: 1000), `RETRY_MAX_DELAY_MS` (default: 10000)
    /// - `RETRY_BACKOFF_FACTOR` (default: 2)
    /// - `QUEUE_CONCURRENCY`, `QUEUE_INTERVAL_MS`, `QUEUE_INTERVAL_CAP`, `QUEUE_TIMEOUT_MS`
    /// - `PRIORITY_QUEUE_CONCURRENCY`, `PRIORITY_QUEUE_INTERVAL_MS`,
    ///   `PRIORITY_QUEUE_INTERVAL_CAP`, `PRIORITY_QUEUE_TIMEOUT_MS`
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary variable source.
    pub fn from_lookup<L>(lookup: L) -> Self
    where
        L: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let backend = match lookup("CACHE_BACKEND").as_deref().map(str::trim) {
            Some(choice) if choice.eq_ignore_ascii_case("memory") => CacheBackendChoice::Memory,
            _ => {
                let redis = RedisSettings::default();
                CacheBackendChoice::Redis(RedisSettings {
                    host: lookup("REDIS_HOST").unwrap_or(redis.host),
                    port: parse_var(&lookup, "REDIS_PORT").unwrap_or(redis.port),
                    password: lookup("REDIS_PASSWORD").filter(|p| !p.is_empty()),
                    db: parse_var(&lookup, "REDIS_DB").unwrap_or(redis.db),
                    connect_timeout_ms: parse_var(&lookup, "REDIS_CONNECT_TIMEOUT_MS")
                        .unwrap_or(redis.connect_timeout_ms),
                    command_timeout_ms: parse_var(&lookup, "REDIS_COMMAND_TIMEOUT_MS")
                        .unwrap_or(redis.command_timeout_ms),
                })
            }
        };

        let mut ttls = CacheTtls::new();
        for resource in CacheResource::ALL {
            let name = format!("CACHE_TTL_{}", resource.name().to_uppercase());
            if let Some(ttl) = parse_var(&lookup, &name) {
                ttls.set(resource, ttl);
            }
        }

        Self {
            source_base_url: lookup("SOURCE_BASE_URL")
                .filter(|url| !url.trim().is_empty())
                .unwrap_or(defaults.source_base_url),
            cache: CacheSettings {
                backend,
                sweep_interval_secs: parse_var(&lookup, "CACHE_SWEEP_INTERVAL")
                    .unwrap_or(defaults.cache.sweep_interval_secs),
                ttls,
            },
            scraper: ScraperSettings {
                timeout_ms: parse_var(&lookup, "SCRAPER_TIMEOUT")
                    .unwrap_or(defaults.scraper.timeout_ms),
                max_retries: parse_var(&lookup, "SCRAPER_MAX_RETRIES")
                    .unwrap_or(defaults.scraper.max_retries),
                delay_min_ms: parse_var(&lookup, "SCRAPER_DELAY_MIN")
                    .unwrap_or(defaults.scraper.delay_min_ms),
                delay_max_ms: parse_var(&lookup, "SCRAPER_DELAY_MAX")
                    .unwrap_or(defaults.scraper.delay_max_ms),
            },
            retry: RetryPolicy {
                max_retries: parse_var(&lookup, "SCRAPER_MAX_RETRIES")
                    .unwrap_or(defaults.retry.max_retries),
                initial_delay_ms: parse_var(&lookup, "RETRY_INITIAL_DELAY_MS")
                    .unwrap_or(defaults.retry.initial_delay_ms),
                max_delay_ms: parse_var(&lookup, "RETRY_MAX_DELAY_MS")
                    .unwrap_or(defaults.retry.max_delay_ms),
                backoff_factor: parse_var::<f64, _>(&lookup, "RETRY_BACKOFF_FACTOR")
                    .filter(|factor| factor.is_finite() && *factor >= 1.0)
                    .unwrap_or(defaults.retry.backoff_factor),
            },
            queue: queue_config(&lookup, "QUEUE", defaults.queue),
            priority_queue: queue_config(&lookup, "PRIORITY_QUEUE", defaults.priority_queue),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source_base_url: DEFAULT_SOURCE_BASE_URL.to_string(),
            cache: CacheSettings::default(),
            scraper: ScraperSettings::default(),
            retry: RetryPolicy::default(),
            queue: QueueConfig::scraper(),
            priority_queue: QueueConfig::priority(),
        }
    }
}

fn parse_var<T, L>(lookup: &L, name: &str) -> Option<T>
where
    T: FromStr,
    L: Fn(&str) -> Option<String>,
{
    lookup(name).and_then(|v| v.trim().parse().ok())
}

fn queue_config<L>(lookup: &L, prefix: &str, defaults: QueueConfig) -> QueueConfig
where
    L: Fn(&str) -> Option<String>,
{
    let name = |suffix: &str| format!("{}_{}", prefix, suffix);
    QueueConfig {
        concurrency: parse_var(lookup, &name("CONCURRENCY")).unwrap_or(defaults.concurrency),
        interval_ms: parse_var(lookup, &name("INTERVAL_MS")).unwrap_or(defaults.interval_ms),
        interval_cap: parse_var(lookup, &name("INTERVAL_CAP")).unwrap_or(defaults.interval_cap),
        task_timeout_ms: parse_var(lookup, &name("TIMEOUT_MS"))
            .unwrap_or(defaults.task_timeout_ms),
    }
}
