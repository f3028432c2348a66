//! In-flight and completed result fetches, shared between callers

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

use super::ttl::hit_rate;
use crate::Result;
use crate::types::RaceResult;

/// A fetch that any number of callers can await.
pub type SharedFetch = Shared<BoxFuture<'static, Result<Arc<RaceResult>>>>;

/// Outcome of [`ResultPromiseCache::claim`].
pub enum Claim {
    /// The caller's future was installed; the generation identifies it.
    Owner(u64),
    /// Another fetch already holds the key.
    Existing(SharedFetch),
}

struct Slot {
    generation: u64,
    fetch: SharedFetch,
}

/// Keyed store of result fetches that guarantees one upstream sequence per key.
///
/// The lookup-or-insert step happens under a single lock. A fetch that fails
/// removes its own slot before any waiter sees the error, so the next request
/// starts from scratch. Successful fetches stay until evicted.
pub struct ResultPromiseCache {
    slots: Mutex<HashMap<u64, Slot>>,
    next_generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for ResultPromiseCache {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

impl ResultPromiseCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Return the existing fetch for `result_id`, or start one with `factory`.
    ///
    /// `factory` runs at most once per key while a slot exists, and only
    /// builds the future; nothing is polled under the lock.
    pub fn get_or_create<F, Fut>(self: &Arc<Self>, result_id: u64, factory: F) -> SharedFetch
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<RaceResult>>> + Send + 'static,
    {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get(&result_id) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(result_id, generation = slot.generation, "Joining existing result fetch");
            return slot.fetch.clone();
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let generation = self.next_generation();
        let fetch = self.evicting_on_error(result_id, generation, factory());
        slots.insert(result_id, Slot { generation, fetch: fetch.clone() });
        debug!(result_id, generation, "Started result fetch");
        fetch
    }

    /// Install `fetch` for `result_id` unless a slot already exists.
    pub fn claim<Fut>(self: &Arc<Self>, result_id: u64, fetch: Fut) -> Claim
    where
        Fut: Future<Output = Result<Arc<RaceResult>>> + Send + 'static,
    {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get(&result_id) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Claim::Existing(slot.fetch.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let generation = self.next_generation();
        let fetch = self.evicting_on_error(result_id, generation, fetch);
        slots.insert(result_id, Slot { generation, fetch });
        Claim::Owner(generation)
    }

    /// Replace the slot with a completed value, if `generation` still owns it.
    pub fn replace(&self, result_id: u64, generation: u64, result: Arc<RaceResult>) -> bool {
        let mut slots = self.slots.lock();
        match slots.get_mut(&result_id) {
            Some(slot) if slot.generation == generation => {
                slot.fetch = ready(result);
                true
            }
            _ => false,
        }
    }

    /// Remove the slot for `result_id` regardless of owner.
    pub fn evict(&self, result_id: u64) -> bool {
        self.slots.lock().remove(&result_id).is_some()
    }

    /// Remove the slot only if `generation` still owns it.
    pub fn evict_generation(&self, result_id: u64, generation: u64) -> bool {
        let mut slots = self.slots.lock();
        match slots.get(&result_id) {
            Some(slot) if slot.generation == generation => {
                slots.remove(&result_id);
                debug!(result_id, generation, "Evicted result fetch");
                true
            }
            _ => false,
        }
    }

    /// Whether a slot exists for `result_id`.
    pub fn contains(&self, result_id: u64) -> bool {
        self.slots.lock().contains_key(&result_id)
    }

    /// Completed value for `result_id`, without waiting.
    pub fn peek(&self, result_id: u64) -> Option<Arc<RaceResult>> {
        let slots = self.slots.lock();
        match slots.get(&result_id)?.fetch.peek() {
            Some(Ok(result)) => Some(Arc::clone(result)),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slots whose fetch has not resolved yet.
    pub fn in_flight(&self) -> usize {
        self.slots.lock().values().filter(|slot| slot.fetch.peek().is_none()).count()
    }

    pub fn hit_rate(&self) -> f64 {
        hit_rate(self.hits.load(Ordering::Relaxed), self.misses.load(Ordering::Relaxed))
    }

    fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    fn evicting_on_error<Fut>(self: &Arc<Self>, result_id: u64, generation: u64, fetch: Fut) -> SharedFetch
    where
        Fut: Future<Output = Result<Arc<RaceResult>>> + Send + 'static,
    {
        let cache: Weak<Self> = Arc::downgrade(self);
        async move {
            let outcome = fetch.await;
            if outcome.is_err() {
                if let Some(cache) = cache.upgrade() {
                    cache.evict_generation(result_id, generation);
                }
            }
            outcome
        }
        .boxed()
        .shared()
    }
}

fn ready(result: Arc<RaceResult>) -> SharedFetch {
    let fetch = futures::future::ready(Ok(result)).boxed().shared();
    // Drive it once so `peek` reports the value straight away
    let _ = fetch.clone().now_or_never();
    fetch
}
