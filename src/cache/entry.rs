//! Cache Entry Module
//!
//! A serialized value with an absolute expiry, as held by the fallback store.

use chrono::Utc;

// == Cache Entry ==
/// A single stored value and its lifetime.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Serialized (JSON) value
    pub value: String,
    /// Expiration timestamp (Unix milliseconds)
    pub expires_at_ms: i64,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates an entry expiring `ttl_secs` from now.
    pub fn new(value: String, ttl_secs: u64) -> Self {
        let now = now_ms();
        let ttl_ms = i64::try_from(ttl_secs.saturating_mul(1000)).unwrap_or(i64::MAX);

        Self {
            value,
            expires_at_ms: now.saturating_add(ttl_ms),
        }
    }

    // == Is Expired ==
    /// An entry is expired once the current time reaches its expiry, so a
    /// zero TTL yields an entry that is never readable.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_ms())
    }

    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }

    // == Time To Live ==
    /// Remaining lifetime in milliseconds, `None` once expired.
    pub fn ttl_remaining_ms(&self) -> Option<u64> {
        let remaining = self.expires_at_ms - now_ms();
        if remaining > 0 {
            Some(remaining as u64)
        } else {
            None
        }
    }
}

// == Utility Functions ==
/// Current Unix timestamp in milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
