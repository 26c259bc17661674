//! Cache entry with an absolute expiry.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::clock;

/// A cached value and the instant it stops being visible.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    /// The cached value
    pub value: T,
    /// When the entry expires
    pub expires_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    /// Create an entry expiring `ttl` after `now`.
    pub fn new(value: T, ttl: Duration, now: DateTime<Utc>) -> Self {
        Self {
            value,
            expires_at: clock::expires_at(now, ttl),
        }
    }

    /// Create an entry with an absolute expiry.
    pub fn until(value: T, expires_at: DateTime<Utc>) -> Self {
        Self { value, expires_at }
    }

    /// Whether the entry must be treated as absent at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        clock::is_expired(self.expires_at, now)
    }

    /// Time left before expiry.
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Option<Duration> {
        clock::remaining_ttl(self.expires_at, now)
    }
}
