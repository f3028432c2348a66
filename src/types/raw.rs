//! Upstream payload shapes.
//!
//! These mirror the statistics service's JSON documents closely enough to
//! deserialize them. Every struct is `#[serde(default)]` so that a missing or
//! renamed field degrades to absent data instead of a hard parse failure.

use serde::{Deserialize, Serialize};

/// Raw result document returned by `get_result`.
#[derive(Default, Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RawResult {
    /// Upstream sub-session identifier
    pub subsession_id: u64,
    pub series_name: String,
    pub start_time: String,
    pub track: RawTrack,
    pub event_strength_of_field: Option<i32>,
    pub license_category: Option<String>,
    /// One block per simulated session (practice, qualify, race...)
    pub session_results: Vec<RawSession>,
}

#[derive(Default, Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RawTrack {
    pub track_id: i32,
    pub track_name: String,
    pub config_name: Option<String>,
}

/// One session block inside a result.
#[derive(Default, Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RawSession {
    /// 0 for the main event, negative for earlier sessions
    pub simsession_number: i32,
    pub simsession_type_name: String,
    pub simsession_name: String,
    /// `None` when the block carries no result list at all
    pub results: Option<Vec<RawParticipant>>,
}

impl RawSession {
    /// Number of entrants listed in this block.
    pub fn participant_count(&self) -> usize {
        self.results.as_ref().map_or(0, Vec::len)
    }

    /// Labels this block is known by, type name first.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        [self.simsession_type_name.as_str(), self.simsession_name.as_str()]
            .into_iter()
            .map(str::trim)
            .filter(|label| !label.is_empty())
    }
}

/// One participant row inside a session block.
#[derive(Default, Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RawParticipant {
    pub cust_id: i64,
    pub display_name: String,
    /// Zero-based, as reported upstream
    pub starting_position: i32,
    /// Zero-based, as reported upstream
    pub finish_position: i32,
    pub incidents: i32,
    pub laps_complete: i32,
    pub laps_lead: i32,
    /// Ten-thousandths of a second, -1 when no valid lap was set
    pub best_lap_time: i64,
    pub oldi_rating: i32,
    pub newi_rating: i32,
    pub old_sub_level: i32,
    pub new_sub_level: i32,
    pub car_name: String,
    pub car_class_name: Option<String>,
}

/// Options for the per-participant lap endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LapDataOptions {
    /// Follow pagination until every chunk has been fetched
    pub all_chunks: bool,
}

impl Default for LapDataOptions {
    fn default() -> Self {
        Self { all_chunks: true }
    }
}

/// One page of lap rows from the lap endpoint.
#[derive(Default, Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RawLapChunk {
    pub chunk_index: u32,
    pub laps: Vec<RawLap>,
}

/// A single lap row.
#[derive(Default, Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RawLap {
    pub cust_id: i64,
    pub lap_number: i32,
    /// Ten-thousandths of a second, -1 when the lap has no time
    pub lap_time: i64,
    pub incident: bool,
    pub lap_events: Vec<String>,
}
