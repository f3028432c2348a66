//! Lap records and conversion from upstream lap chunks.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::raw::{RawLap, RawLapChunk};

/// Upstream time unit: ten-thousandths of a second.
pub const TIME_UNITS_PER_SECOND: f64 = 10_000.0;

/// Lap event flag the upstream uses for laps that do not count.
const INVALID_LAP_EVENT: &str = "invalid";

/// Converts an upstream time value to seconds, `None` for "no time".
pub fn seconds_from_units(units: i64) -> Option<f64> {
    (units > 0).then(|| units as f64 / TIME_UNITS_PER_SECOND)
}

/// A single completed lap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
#[serde(rename_all = "camelCase")]
pub struct Lap {
    pub lap_number: i32,
    /// Seconds, 0.0 when the upstream recorded no time
    pub time: f64,
    pub invalid: bool,
}

impl Lap {
    /// Convert an upstream lap row.
    pub fn from_raw(raw: &RawLap) -> Self {
        let time = seconds_from_units(raw.lap_time);
        let flagged = raw.lap_events.iter().any(|event| event.eq_ignore_ascii_case(INVALID_LAP_EVENT));

        Lap { lap_number: raw.lap_number, time: time.unwrap_or(0.0), invalid: time.is_none() || flagged }
    }
}

/// Why a lap response was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LapShapeError {
    NoChunks,
    NoLaps,
    NegativeLapNumber(i32),
    ForeignParticipant { expected: i64, found: i64 },
}

impl std::fmt::Display for LapShapeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LapShapeError::NoChunks => f.write_str("response contained no chunks"),
            LapShapeError::NoLaps => f.write_str("response contained no laps"),
            LapShapeError::NegativeLapNumber(n) => write!(f, "lap number {} is negative", n),
            LapShapeError::ForeignParticipant { expected, found } => {
                write!(f, "lap row for {} in response for {}", found, expected)
            }
        }
    }
}

/// Validate a full lap response and flatten it into ordered laps.
///
/// Chunks may overlap; later rows for the same lap number win. Rows with a
/// `cust_id` of zero are treated as belonging to the requested participant.
pub fn laps_from_chunks(cust_id: i64, chunks: &[RawLapChunk]) -> Result<Vec<Lap>, LapShapeError> {
    if chunks.is_empty() {
        return Err(LapShapeError::NoChunks);
    }

    let mut by_number = BTreeMap::new();
    for raw in chunks.iter().flat_map(|chunk| chunk.laps.iter()) {
        if raw.cust_id != 0 && raw.cust_id != cust_id {
            return Err(LapShapeError::ForeignParticipant { expected: cust_id, found: raw.cust_id });
        }
        if raw.lap_number < 0 {
            return Err(LapShapeError::NegativeLapNumber(raw.lap_number));
        }
        by_number.insert(raw.lap_number, Lap::from_raw(raw));
    }

    if by_number.is_empty() {
        return Err(LapShapeError::NoLaps);
    }

    Ok(by_number.into_values().collect())
}
