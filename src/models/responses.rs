//! Response DTOs
//!
//! Shapes handed back to endpoint handlers for serialization.

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;

use crate::cache::{BackendKind, CacheStats};
use crate::queue::QueueStats;

// == Cache Metadata ==
/// Cache status attached to every served payload.
///
/// `cached == true` always comes with an `expires_at` in the future. A value
/// that was just computed carries `cached == false` and the expiry it was
/// stored with; an absent key carries `cached == false` and no expiry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetadata {
    pub cached: bool,
    pub expires_at: Option<String>,
    pub backend: BackendKind,
}

impl CacheMetadata {
    /// Key absent or expired.
    pub fn miss(backend: BackendKind) -> Self {
        Self {
            cached: false,
            expires_at: None,
            backend,
        }
    }

    /// Served from cache with `remaining_ms` left.
    pub fn hit(remaining_ms: u64, backend: BackendKind) -> Self {
        Self {
            cached: true,
            expires_at: Some(expiry_after_ms(remaining_ms)),
            backend,
        }
    }

    /// Just computed and stored for `ttl_secs`.
    pub fn fresh(ttl_secs: u64, backend: BackendKind) -> Self {
        Self {
            cached: false,
            expires_at: Some(expiry_after_ms(ttl_secs.saturating_mul(1000))),
            backend,
        }
    }
}

fn expiry_after_ms(ms: u64) -> String {
    let offset = ChronoDuration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX));
    Utc::now()
        .checked_add_signed(offset)
        .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC)
        .to_rfc3339()
}

// == Api Response ==
/// Success envelope: `{ success: true, data, cache }`.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    pub cache: CacheMetadata,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T, cache: CacheMetadata) -> Self {
        Self {
            success: true,
            data,
            cache,
        }
    }
}

// == Health ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Error,
}

/// Outcome of one health probe.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
}

impl CheckResult {
    pub fn ok(message: Option<String>) -> Self {
        Self {
            status: HealthStatus::Ok,
            message,
            response_time_ms: None,
        }
    }

    pub fn with_response_time(mut self, elapsed: std::time::Duration) -> Self {
        self.response_time_ms = Some(elapsed.as_millis().min(u64::MAX as u128) as u64);
        self
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            message: Some(message.into()),
            response_time_ms: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Error,
            message: Some(message.into()),
            response_time_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueChecks {
    pub default: QueueStats,
    pub priority: QueueStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthChecks {
    pub cache: CheckResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<CheckResult>,
    pub queues: QueueChecks,
    pub stats: CacheStats,
}

/// Aggregate health of the scrape core.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: String,
    pub uptime_secs: u64,
    pub checks: HealthChecks,
}

impl HealthReport {
    /// A failing cache is an error; a failing upstream or a cache running on
    /// its fallback only degrades the service.
    pub fn new(uptime_secs: u64, checks: HealthChecks) -> Self {
        let status = if checks.cache.status == HealthStatus::Error {
            HealthStatus::Error
        } else if checks.cache.status == HealthStatus::Degraded
            || checks
                .source
                .as_ref()
                .is_some_and(|source| source.status != HealthStatus::Ok)
        {
            HealthStatus::Degraded
        } else {
            HealthStatus::Ok
        };

        Self {
            status,
            timestamp: Utc::now().to_rfc3339(),
            uptime_secs,
            checks,
        }
    }
}
