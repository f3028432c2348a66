//! Time-bounded cache entries

use std::time::Duration;
use tokio::time::Instant;

/// Smallest lifetime an entry can have.
const MIN_TTL: Duration = Duration::from_millis(1);

/// Lifetime used when the requested one overflows the clock.
const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// A cached value with its validity window.
///
/// `expires_at` is always strictly after `created_at`. Timestamps come from
/// `tokio::time` so tests can drive expiry with a paused clock.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl<T> CacheEntry<T> {
    /// Create an entry valid for `ttl` from now.
    pub fn new(data: T, ttl: Duration) -> Self {
        let created_at = Instant::now();
        let ttl = ttl.clamp(MIN_TTL, MAX_TTL);
        let expires_at = created_at.checked_add(ttl).unwrap_or(created_at + MIN_TTL);
        Self { data, created_at, expires_at }
    }

    /// Valid iff `now < expires_at`.
    pub fn is_valid_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Instant::now())
    }

    /// Time elapsed since the entry was created.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}
