//! Per-participant lap data cache

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::ttl::TtlCache;
use crate::types::Lap;

/// Lap cache key: one participant's laps in one session block of one result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LapKey {
    pub result_id: u64,
    pub cust_id: i64,
    pub simsession_number: i32,
}

impl LapKey {
    pub fn new(result_id: u64, cust_id: i64, simsession_number: i32) -> Self {
        Self { result_id, cust_id, simsession_number }
    }
}

/// Time-to-live store of lap lists.
///
/// Lap data for a finished race never changes, so the ttl only bounds memory.
pub struct LapCache {
    inner: Arc<TtlCache<LapKey, Arc<[Lap]>>>,
}

impl LapCache {
    /// One hour, long enough to cover a browsing session.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

    pub fn new(ttl: Duration) -> Self {
        Self { inner: Arc::new(TtlCache::new(ttl)) }
    }

    pub fn get(&self, key: &LapKey) -> Option<Arc<[Lap]>> {
        self.inner.get(key)
    }

    pub fn insert(&self, key: LapKey, laps: Arc<[Lap]>) {
        self.inner.insert(key, laps);
    }

    /// Drop every participant's laps for a result.
    pub fn invalidate_result(&self, result_id: u64) -> usize {
        let removed = self.inner.remove_where(|key| key.result_id == result_id);
        debug!(result_id, removed, "Invalidated cached laps");
        removed
    }

    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn hit_rate(&self) -> f64 {
        self.inner.hit_rate()
    }

    /// Start the periodic sweep; stops when `cancel` fires.
    pub fn spawn_sweeper(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        self.inner.spawn_sweeper(interval, cancel)
    }
}

impl Default for LapCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn laps(count: i32) -> Arc<[Lap]> {
        (1..=count).map(|n| Lap { lap_number: n, time: 90.0 + n as f64, invalid: false }).collect()
    }

    #[test]
    fn keys_include_session_number() {
        let cache = LapCache::default();
        cache.insert(LapKey::new(100, 7, 0), laps(3));

        assert_eq!(cache.get(&LapKey::new(100, 7, 0)).map(|l| l.len()), Some(3));
        assert!(cache.get(&LapKey::new(100, 7, -1)).is_none());
        assert!(cache.get(&LapKey::new(101, 7, 0)).is_none());
    }

    #[test]
    fn invalidate_result_leaves_other_results() {
        let cache = LapCache::default();
        cache.insert(LapKey::new(100, 7, 0), laps(1));
        cache.insert(LapKey::new(100, 8, 0), laps(1));
        cache.insert(LapKey::new(200, 7, 0), laps(1));

        assert_eq!(cache.invalidate_result(100), 2);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_an_hour() {
        let cache = LapCache::default();
        let key = LapKey::new(1, 1, 0);
        cache.insert(key, laps(2));

        tokio::time::advance(Duration::from_secs(59 * 60)).await;
        assert!(cache.get(&key).is_some());
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(cache.get(&key).is_none());
    }
}
