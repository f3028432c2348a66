//! Race result fetching, normalization and caching.
//!
//! Paddock turns the raw result documents of an online racing statistics
//! service into normalized race results with per-participant lap data, while
//! keeping upstream traffic polite and deduplicated.
//!
//! # Features
//!
//! - **Race session resolution**: picks the race block out of practice,
//!   qualifying and heat sessions with inconsistent naming
//! - **Paced lap fetching**: per-call delay, batch pauses, participant cap and
//!   escalation after throttling
//! - **Deduplication**: one upstream sequence per result, no matter how many
//!   callers ask at once
//! - **Progressive loading**: a coarse result first, then laps participant by
//!   participant
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use paddock::{
//!     LapDataOptions, PipelineConfig, RawLapChunk, RawResult, ResultService, ResultsApi,
//!     ResultsError, StaticSession,
//! };
//!
//! struct Client;
//!
//! #[async_trait::async_trait]
//! impl ResultsApi for Client {
//!     async fn get_result(&self, _result_id: u64) -> paddock::Result<RawResult> {
//!         Err(ResultsError::network("offline"))
//!     }
//!
//!     async fn get_lap_data(
//!         &self,
//!         _cust_id: i64,
//!         _result_id: u64,
//!         _simsession_number: i32,
//!         _options: LapDataOptions,
//!     ) -> paddock::Result<Vec<RawLapChunk>> {
//!         Ok(Vec::new())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> paddock::Result<()> {
//!     let session = Arc::new(StaticSession::new(Arc::new(Client)));
//!     let service = ResultService::new(session, PipelineConfig::default())?;
//!
//!     if let Some(result) = service.fetch_result(71_234_567).await? {
//!         println!("P{} at {}", result.finish_position, result.track_name);
//!     }
//!     Ok(())
//! }
//! ```

// Core types and error handling
pub mod config;
mod error;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Pipeline stages
pub mod aggregator;
pub mod cache;
pub mod limiter;
mod pipeline;
pub mod provider;
pub mod resolver;
pub mod transform;

// Caller-facing API
pub mod progressive;
pub mod service;

pub use error::*;
pub use types::*;

pub use aggregator::{AggregateReport, AggregationObserver, LapAggregator};
pub use cache::{CacheStats, LapCache, ResultPromiseCache};
pub use config::{CacheConfig, PipelineConfig, RateLimitConfig};
pub use limiter::{BackoffPolicy, FetchPlan, RateLimiter};
pub use progressive::{LoadEvent, LoadPhase, ProgressiveStream};
pub use provider::{ResultsApi, SessionProvider, StaticSession};
pub use resolver::{Resolution, ResolveError, resolve_race_session};
pub use service::{FetchOptions, ResultService, ResultServiceBuilder};
pub use transform::{DefaultTransformer, Transformer};
