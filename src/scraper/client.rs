//! Scraper Client
//!
//! Paced, retried HTTP fetches against the source site. Every attempt gets a
//! fresh User-Agent and Referer; non-2xx statuses are mapped onto the error
//! taxonomy so the retry executor can tell final failures from transient ones.

use std::fmt;
use std::time::Duration;

use reqwest::header::{REFERER, USER_AGENT};
use reqwest::StatusCode;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, error};

use crate::error::{ApiError, Result};
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::scraper::headers::{default_headers, jitter, random_referer, random_user_agent};

// == Scraper Settings ==
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScraperSettings {
    /// Per-request timeout
    pub timeout_ms: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Lower pacing bound, also the minimum gap between requests
    pub delay_min_ms: u64,
    pub delay_max_ms: u64,
}

impl Default for ScraperSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_retries: 3,
            delay_min_ms: 500,
            delay_max_ms: 2000,
        }
    }
}

impl ScraperSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// == Scraper Client ==
pub struct ScraperClient {
    http: reqwest::Client,
    base_url: String,
    settings: ScraperSettings,
    executor: RetryExecutor,
    last_request: Mutex<Option<Instant>>,
}

impl fmt::Debug for ScraperClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScraperClient")
            .field("base_url", &self.base_url)
            .field("settings", &self.settings)
            .finish()
    }
}

impl ScraperClient {
    /// `policy` supplies the backoff schedule; its retry count is replaced by
    /// `settings.max_retries`.
    pub fn new(base_url: &str, settings: ScraperSettings, policy: RetryPolicy) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout())
            .default_headers(default_headers())
            .build()
            .map_err(|e| ApiError::Internal(format!("HTTP client setup failed: {}", e)))?;

        let executor = RetryExecutor::new(policy.with_max_retries(settings.max_retries))
            .with_timeout(settings.timeout());

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            settings,
            executor,
            last_request: Mutex::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn settings(&self) -> &ScraperSettings {
        &self.settings
    }

    /// Absolute URL for a path on the source site.
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    // == Fetch ==
    /// Page body for `path` on the source site.
    pub async fn fetch(&self, path: &str) -> Result<String> {
        self.pace().await;
        let url = self.url_for(path);
        self.executor
            .run(|| self.fetch_once(&url, path, None))
            .await
    }

    /// Page body for an absolute URL off the source site. Paced by jitter
    /// only, with the source site as referer.
    pub async fn fetch_external(&self, url: &str) -> Result<String> {
        let delay = jitter(self.settings.delay_min_ms, self.settings.delay_max_ms);
        if !delay.is_zero() {
            sleep(delay).await;
        }
        self.executor
            .run(|| self.fetch_once(url, url, Some(&self.base_url)))
            .await
    }

    /// Single un-paced, un-retried GET of the site root. Returns the round
    /// trip time.
    pub async fn probe(&self) -> Result<Duration> {
        let started = Instant::now();
        self.fetch_once(&self.url_for("/"), "/", None).await?;
        Ok(started.elapsed())
    }

    async fn fetch_once(&self, url: &str, target: &str, referer: Option<&str>) -> Result<String> {
        let referer = match referer {
            Some(referer) => referer,
            None => random_referer(),
        };
        debug!("Scraping request: GET {}", url);

        let response = self
            .http
            .get(url)
            .header(USER_AGENT, random_user_agent())
            .header(REFERER, referer)
            .send()
            .await
            .map_err(|e| {
                error!("Scraping failed: {}: {}", url, e);
                ApiError::from(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            error!("Scraping failed: {} answered {}", url, status);
            return Err(classify_status(status, target));
        }

        let body = response.text().await?;
        debug!("Scraping response: {} {} ({} bytes)", url, status.as_u16(), body.len());
        Ok(body)
    }

    /// Random jitter, then at least `delay_min_ms` since the previous request.
    async fn pace(&self) {
        let delay = jitter(self.settings.delay_min_ms, self.settings.delay_max_ms);
        if !delay.is_zero() {
            sleep(delay).await;
        }

        let min_gap = Duration::from_millis(self.settings.delay_min_ms);
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < min_gap {
                sleep(min_gap - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Error for a non-2xx answer to a request for `target`.
pub fn classify_status(status: StatusCode, target: &str) -> ApiError {
    match status {
        StatusCode::NOT_FOUND => ApiError::NotFound(format!("Resource {}", target)),
        StatusCode::FORBIDDEN => {
            ApiError::ServiceUnavailable("Access denied by source website".to_string())
        }
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimitExceeded,
        other => ApiError::UpstreamFetch(format!("HTTP {} for {}", other.as_u16(), target)),
    }
}
