//! Normalized race result model.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::lap::Lap;

/// Lap lists keyed by participant customer id.
pub type LapDataByParticipant = HashMap<i64, Arc<[Lap]>>;

/// Outcome of one completed race, viewed from a focus driver.
///
/// Values are never mutated after construction. Enrichment with lap data
/// produces a new value through [`RaceResult::with_lap_data`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
#[serde(rename_all = "camelCase")]
pub struct RaceResult {
    /// Upstream sub-session identifier
    pub id: u64,
    pub track_name: String,
    pub series_name: String,
    /// Start time as reported upstream (ISO 8601)
    pub date: String,
    pub car: String,
    pub category: String,
    /// One-based
    pub start_position: i32,
    /// One-based
    pub finish_position: i32,
    pub incidents: i32,
    pub strength_of_field: Option<i32>,
    pub laps_led: i32,
    pub irating_change: i32,
    pub safety_rating_change: f32,
    /// Seconds
    pub fastest_lap: Option<f64>,
    pub participants: Vec<Participant>,
}

impl RaceResult {
    /// Returns a copy with each participant's laps replaced from `laps`.
    ///
    /// Participants without an entry keep whatever laps they already had.
    pub fn with_lap_data(&self, laps: &LapDataByParticipant) -> RaceResult {
        let participants = self
            .participants
            .iter()
            .map(|participant| match laps.get(&participant.cust_id) {
                Some(entry) => Participant { laps: entry.to_vec(), ..participant.clone() },
                None => participant.clone(),
            })
            .collect();

        RaceResult { participants, ..self.clone() }
    }

    /// Look up a participant by customer id.
    pub fn participant(&self, cust_id: i64) -> Option<&Participant> {
        self.participants.iter().find(|participant| participant.cust_id == cust_id)
    }

    /// Whether every participant has lap data attached.
    pub fn has_complete_laps(&self) -> bool {
        self.participants.iter().all(|participant| !participant.laps.is_empty())
    }
}

/// A single entrant in a race.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub name: String,
    pub cust_id: i64,
    /// One-based
    pub start_position: i32,
    /// One-based
    pub finish_position: i32,
    pub incidents: i32,
    /// Seconds
    pub fastest_lap: Option<f64>,
    pub irating: i32,
    /// Empty until lap data has been fetched for this participant
    #[serde(default)]
    pub laps: Vec<Lap>,
}
