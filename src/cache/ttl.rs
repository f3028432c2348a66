//! Generic time-to-live store with lazy and periodic eviction

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::entry::CacheEntry;

/// Keyed store whose entries expire after a fixed time-to-live.
///
/// Expired entries are dropped when read, and in bulk by
/// [`purge_expired`](TtlCache::purge_expired) or a background sweeper.
pub struct TtlCache<K, V> {
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get a live value, evicting it first if it has expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock();
        let now = Instant::now();

        match entries.get(key) {
            Some(entry) if entry.is_valid_at(now) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.data.clone())
            }
            Some(_) => {
                entries.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                trace!("Evicted expired entry on read");
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace a value with a fresh time-to-live.
    pub fn insert(&self, key: K, value: V) {
        self.entries.lock().insert(key, CacheEntry::new(value, self.ttl));
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.lock().remove(key).map(|entry| entry.data)
    }

    /// Drop every entry whose key matches `predicate`, returning how many went.
    pub fn remove_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&K) -> bool,
    {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| !predicate(key));
        before - entries.len()
    }

    /// Drop all expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_valid_at(now));
        before - entries.len()
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Fraction of reads that were served from the cache.
    pub fn hit_rate(&self) -> f64 {
        hit_rate(self.hits.load(Ordering::Relaxed), self.misses.load(Ordering::Relaxed))
    }

    /// Spawn a task that purges expired entries every `interval` until cancelled.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()>
    where
        K: Sync,
        V: Sync,
    {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "Cache sweeper started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = cache.purge_expired();
                        if removed > 0 {
                            debug!(removed, remaining = cache.len(), "Swept expired cache entries");
                        }
                    }
                }
            }

            info!("Cache sweeper stopped");
        })
    }
}

pub(crate) fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 { 0.0 } else { hits as f64 / total as f64 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn lazy_eviction_on_read() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.insert("a", 1);

        assert_eq!(cache.get(&"a"), Some(1));
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"a"), None);
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.hit_rate(), 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn insert_refreshes_ttl() {
        let cache = TtlCache::new(Duration::from_secs(10));
        cache.insert(1, "old");
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.insert(1, "new");
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(cache.get(&1), Some("new"));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_bounds_memory() {
        let cache = Arc::new(TtlCache::new(Duration::from_secs(30)));
        for i in 0..10 {
            cache.insert(i, i * 2);
        }

        let cancel = CancellationToken::new();
        let handle = cache.spawn_sweeper(Duration::from_secs(60), cancel.clone());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(cache.is_empty());

        cancel.cancel();
        handle.await.expect("sweeper should stop cleanly");
    }

    #[test]
    fn remove_where_filters_by_key() {
        let cache = TtlCache::new(Duration::from_secs(30));
        cache.insert((1, 10), "a");
        cache.insert((1, 11), "b");
        cache.insert((2, 10), "c");

        assert_eq!(cache.remove_where(|(result, _)| *result == 1), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.remove(&(2, 10)), Some("c"));
    }

    #[test]
    fn hit_rate_handles_empty_counters() {
        assert_eq!(hit_rate(0, 0), 0.0);
        assert_eq!(hit_rate(3, 1), 0.75);
    }
}
