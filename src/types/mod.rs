//! Core types for race result data.
//!
//! This module provides the two halves of the data model:
//! - [`raw`] mirrors the upstream statistics service payloads
//! - [`RaceResult`], [`Participant`] and [`Lap`] form the stable domain model
//!   handed to UI and reporting layers
//!
//! ## Usage Example
//!
//! ```rust
//! use paddock::types::{laps_from_chunks, RawLap, RawLapChunk};
//!
//! let chunk = RawLapChunk {
//!     chunk_index: 0,
//!     laps: vec![RawLap { cust_id: 42, lap_number: 1, lap_time: 1_382_000, ..Default::default() }],
//! };
//!
//! let laps = laps_from_chunks(42, &[chunk]).unwrap();
//! assert_eq!(laps[0].lap_number, 1);
//! assert!((laps[0].time - 138.2).abs() < 1e-9);
//! ```

mod lap;
pub mod raw;
mod result;

pub use lap::{Lap, LapShapeError, TIME_UNITS_PER_SECOND, laps_from_chunks, seconds_from_units};
pub use raw::{LapDataOptions, RawLap, RawLapChunk, RawParticipant, RawResult, RawSession, RawTrack};
pub use result::{LapDataByParticipant, Participant, RaceResult};
