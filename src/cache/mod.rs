//! In-memory caches for results and lap data.
//!
//! Both caches are plain values constructed by the caller and injected into
//! [`ResultService`](crate::ResultService); nothing here is process-global.
//!
//! - [`LapCache`] keeps per-participant lap lists under a time-to-live
//! - [`ResultPromiseCache`] keeps one shared fetch per result identifier
//! - [`TtlCache`] is the generic store behind the lap cache

mod entry;
mod lap;
mod promise;
mod ttl;

use serde::{Deserialize, Serialize};

pub use entry::CacheEntry;
pub use lap::{LapCache, LapKey};
pub use promise::{Claim, ResultPromiseCache, SharedFetch};
pub use ttl::TtlCache;

/// Snapshot of cache occupancy and effectiveness.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Result fetches held, pending or complete
    pub entries: usize,
    /// Fraction of result requests that joined an existing fetch
    pub hit_rate: f64,
    /// Result fetches still pending
    pub in_flight: usize,
    pub lap_entries: usize,
    pub lap_hit_rate: f64,
}
