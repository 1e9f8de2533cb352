//! Cache Entry Module
//!
//! Defines the structure for individual cache entries with TTL support.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// == Cache Entry ==
/// Represents a single cache entry with value and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<V> {
    /// The stored value
    pub value: V,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Expiration timestamp (Unix milliseconds), None = no expiration
    pub expires_at: Option<u64>,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a new cache entry with optional TTL.
    ///
    /// # Arguments
    /// * `value` - The value to store
    /// * `ttl` - Optional time-to-live measured from now
    pub fn new(value: V, ttl: Option<Duration>) -> Self {
        let now = current_timestamp_ms();
        Self {
            value,
            created_at: now,
            expires_at: ttl.map(|ttl| expiry_from(now, ttl)),
        }
    }

    // == Is Expired ==
    /// Checks if the entry has expired.
    ///
    /// An entry is expired once the current time reaches its expiration time,
    /// so a zero TTL is never observable as live.
    pub fn is_expired(&self) -> bool {
        is_expired_at(self.expires_at, current_timestamp_ms())
    }

    /// Inverse of [`is_expired`](Self::is_expired).
    pub fn is_live(&self) -> bool {
        !self.is_expired()
    }

    // == Time To Live ==
    /// Returns the remaining lifetime, or None if no expiration is set.
    ///
    /// # Returns
    /// - `Some(Duration::ZERO)` if the entry has expired
    /// - `Some(remaining)` if the entry has TTL and hasn't expired
    /// - `None` if the entry has no TTL (never expires)
    pub fn ttl_remaining(&self) -> Option<Duration> {
        remaining_from(self.expires_at, current_timestamp_ms())
    }

    // == Refresh ==
    /// Resets the expiration relative to now, leaving the value untouched.
    pub fn refresh(&mut self, ttl: Option<Duration>) {
        self.expires_at = ttl.map(|ttl| expiry_from(current_timestamp_ms(), ttl));
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Absolute expiry for a TTL starting at `now_ms`.
pub fn expiry_from(now_ms: u64, ttl: Duration) -> u64 {
    let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
    now_ms.saturating_add(ttl_ms)
}

/// Liveness rule shared by every store: expired once `now >= expires_at`.
pub fn is_expired_at(expires_at: Option<u64>, now_ms: u64) -> bool {
    match expires_at {
        Some(expires) => now_ms >= expires,
        None => false,
    }
}

/// Remaining lifetime at `now_ms`, clamped to zero.
pub fn remaining_from(expires_at: Option<u64>, now_ms: u64) -> Option<Duration> {
    expires_at.map(|expires| Duration::from_millis(expires.saturating_sub(now_ms)))
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_entry_creation_no_ttl() {
        let entry = CacheEntry::new("test_value".to_string(), None);

        assert_eq!(entry.value, "test_value");
        assert!(entry.expires_at.is_none());
        assert!(entry.is_live());
    }

    #[test]
    fn test_entry_creation_with_ttl() {
        let entry = CacheEntry::new(7u32, Some(Duration::from_secs(60)));

        assert_eq!(entry.value, 7);
        assert!(entry.expires_at.is_some());
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_entry_expiration() {
        let entry = CacheEntry::new("v", Some(Duration::from_millis(50)));
        assert!(!entry.is_expired());

        sleep(Duration::from_millis(80));

        assert!(entry.is_expired());
        assert_eq!(entry.ttl_remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn test_ttl_remaining() {
        let entry = CacheEntry::new("v", Some(Duration::from_secs(10)));

        let remaining = entry.ttl_remaining().unwrap();
        assert!(remaining <= Duration::from_secs(10));
        assert!(remaining >= Duration::from_secs(9));
    }

    #[test]
    fn test_ttl_remaining_no_expiration() {
        let entry = CacheEntry::new("v", None);
        assert!(entry.ttl_remaining().is_none());
    }

    #[test]
    fn test_zero_ttl_is_immediately_expired() {
        let entry = CacheEntry::new("v", Some(Duration::ZERO));
        assert!(entry.is_expired());
    }

    #[test]
    fn test_expiration_boundary_condition() {
        assert!(is_expired_at(Some(100), 100));
        assert!(!is_expired_at(Some(100), 99));
        assert!(!is_expired_at(None, u64::MAX));
    }

    #[test]
    fn test_refresh_keeps_value_and_creation_time() {
        let mut entry = CacheEntry::new("v", Some(Duration::from_millis(10)));
        let created = entry.created_at;

        entry.refresh(Some(Duration::from_secs(60)));
        assert_eq!(entry.value, "v");
        assert_eq!(entry.created_at, created);
        assert!(entry.ttl_remaining().unwrap() > Duration::from_secs(59));

        entry.refresh(None);
        assert!(entry.expires_at.is_none());
    }

    #[test]
    fn test_huge_ttl_saturates() {
        assert_eq!(expiry_from(10, Duration::MAX), u64::MAX);
    }
}
