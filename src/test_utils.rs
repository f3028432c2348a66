//! Test utilities: payload builders and a scripted upstream
//!
//! This module provides deterministic stand-ins for the statistics service
//! so pipeline behaviour can be asserted without network access. Timing is
//! recorded with `tokio::time`, so tests running on a paused clock see exact
//! rate-limit spacing.

#![cfg(any(test, feature = "benchmark"))]

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use crate::provider::{ResultsApi, SessionProvider};
use crate::transform::{DefaultTransformer, Transformer};
use crate::types::{
    LapDataByParticipant, LapDataOptions, RaceResult, RawLap, RawLapChunk, RawParticipant,
    RawResult, RawSession, RawTrack,
};
use crate::{Result, ResultsError};

/// Customer ids in generated fields start here.
pub const FIRST_CUST_ID: i64 = 1001;

/// Laps generated per participant by [`ScriptedApi`].
pub const SCRIPTED_LAPS: i32 = 4;

/// A participant row finishing at zero-based `finish_position`.
pub fn raw_participant(cust_id: i64, finish_position: i32) -> RawParticipant {
    RawParticipant {
        cust_id,
        display_name: format!("Driver {}", cust_id),
        starting_position: finish_position,
        finish_position,
        incidents: 2,
        laps_complete: SCRIPTED_LAPS,
        laps_lead: if finish_position == 0 { SCRIPTED_LAPS } else { 0 },
        best_lap_time: 1_382_000 + finish_position as i64 * 1_000,
        oldi_rating: 1500,
        newi_rating: 1525,
        old_sub_level: 250,
        new_sub_level: 265,
        car_name: "Porsche 911 GT3 R".to_string(),
        car_class_name: Some("GT3".to_string()),
    }
}

/// A session block with `participants` generated entrants.
pub fn raw_session(type_name: &str, simsession_number: i32, participants: usize) -> RawSession {
    let count = participants as i32;
    let results = (0..count)
        .map(|i| RawParticipant {
            starting_position: (i + 1) % count,
            ..raw_participant(FIRST_CUST_ID + i as i64, i)
        })
        .collect();

    RawSession {
        simsession_number,
        simsession_type_name: type_name.to_string(),
        simsession_name: String::new(),
        results: Some(results),
    }
}

/// A result document whose blocks are numbered so the last one is the main event.
pub fn raw_result(result_id: u64, sessions: &[(&str, usize)]) -> RawResult {
    let last = sessions.len() as i32 - 1;
    RawResult {
        subsession_id: result_id,
        series_name: "GT3 Sprint Series".to_string(),
        start_time: "2024-03-01T18:00:00Z".to_string(),
        track: RawTrack { track_id: 163, track_name: "Spa-Francorchamps".to_string(), config_name: None },
        event_strength_of_field: Some(2150),
        license_category: Some("Road".to_string()),
        session_results: sessions
            .iter()
            .enumerate()
            .map(|(i, (name, count))| raw_session(name, i as i32 - last, *count))
            .collect(),
    }
}

/// A transformed race result without laps.
pub fn sample_race_result(result_id: u64, participants: usize) -> RaceResult {
    let raw = raw_result(result_id, &[("RACE", participants.max(1))]);
    let race = &raw.session_results[0];
    let mut result = DefaultTransformer::new()
        .transform(&raw, race, &LapDataByParticipant::new())
        .unwrap_or_else(|| panic!("generated result {} should transform", result_id));
    result.participants.truncate(participants);
    result
}

/// Generated lap chunks for a participant, split across two pages.
pub fn scripted_chunks(cust_id: i64) -> Vec<RawLapChunk> {
    let laps: Vec<RawLap> = (1..=SCRIPTED_LAPS)
        .map(|lap_number| RawLap {
            cust_id,
            lap_number,
            lap_time: 1_400_000 + lap_number as i64 * 500,
            incident: false,
            lap_events: Vec::new(),
        })
        .collect();
    let (first, second) = laps.split_at(laps.len() / 2);

    vec![
        RawLapChunk { chunk_index: 0, laps: first.to_vec() },
        RawLapChunk { chunk_index: 1, laps: second.to_vec() },
    ]
}

/// Scripted upstream with call accounting.
#[derive(Default)]
pub struct ScriptedApi {
    results: HashMap<u64, RawResult>,
    result_delay: Duration,
    lap_delay: Duration,
    lap_errors: HashMap<i64, ResultsError>,
    empty_laps: HashSet<i64>,
    fail_next_result: Mutex<Option<ResultsError>>,
    result_calls: AtomicUsize,
    lap_calls: Mutex<Vec<(i64, Instant)>>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(mut self, raw: RawResult) -> Self {
        self.results.insert(raw.subsession_id, raw);
        self
    }

    /// Make `get_result` take `delay` before answering.
    pub fn with_result_delay(mut self, delay: Duration) -> Self {
        self.result_delay = delay;
        self
    }

    /// Make `get_lap_data` take `delay` before answering.
    pub fn with_lap_delay(mut self, delay: Duration) -> Self {
        self.lap_delay = delay;
        self
    }

    pub fn with_lap_error(mut self, cust_id: i64, error: ResultsError) -> Self {
        self.lap_errors.insert(cust_id, error);
        self
    }

    pub fn with_empty_laps(mut self, cust_id: i64) -> Self {
        self.empty_laps.insert(cust_id);
        self
    }

    /// Fail the next `get_result` call only.
    pub fn fail_next_result(&self, error: ResultsError) {
        *self.fail_next_result.lock() = Some(error);
    }

    pub fn result_calls(&self) -> usize {
        self.result_calls.load(Ordering::SeqCst)
    }

    /// Customer ids passed to `get_lap_data`, in call order.
    pub fn lap_calls(&self) -> Vec<i64> {
        self.lap_calls.lock().iter().map(|(cust_id, _)| *cust_id).collect()
    }

    /// Elapsed time between consecutive `get_lap_data` calls.
    pub fn lap_call_gaps(&self) -> Vec<Duration> {
        let calls = self.lap_calls.lock();
        calls.windows(2).map(|pair| pair[1].1.duration_since(pair[0].1)).collect()
    }
}

#[async_trait::async_trait]
impl ResultsApi for ScriptedApi {
    async fn get_result(&self, result_id: u64) -> Result<RawResult> {
        self.result_calls.fetch_add(1, Ordering::SeqCst);
        if !self.result_delay.is_zero() {
            tokio::time::sleep(self.result_delay).await;
        }

        if let Some(error) = self.fail_next_result.lock().take() {
            return Err(error);
        }

        self.results
            .get(&result_id)
            .cloned()
            .ok_or_else(|| ResultsError::network_with_status(format!("result {} not found", result_id), 404))
    }

    async fn get_lap_data(
        &self,
        cust_id: i64,
        _result_id: u64,
        _simsession_number: i32,
        options: LapDataOptions,
    ) -> Result<Vec<RawLapChunk>> {
        self.lap_calls.lock().push((cust_id, Instant::now()));
        if !self.lap_delay.is_zero() {
            tokio::time::sleep(self.lap_delay).await;
        }

        if let Some(error) = self.lap_errors.get(&cust_id) {
            return Err(error.clone());
        }
        if self.empty_laps.contains(&cust_id) {
            return Ok(Vec::new());
        }

        let mut chunks = scripted_chunks(cust_id);
        if !options.all_chunks {
            chunks.truncate(1);
        }
        Ok(chunks)
    }
}

/// Session provider that hands out one client, or fails with a fixed error.
pub struct ScriptedSession {
    client: Arc<ScriptedApi>,
    failure: Mutex<Option<ResultsError>>,
    calls: AtomicUsize,
}

impl ScriptedSession {
    pub fn new(client: Arc<ScriptedApi>) -> Self {
        Self { client, failure: Mutex::new(None), calls: AtomicUsize::new(0) }
    }

    /// Fail every `ensure_session` call until cleared.
    pub fn set_failure(&self, failure: Option<ResultsError>) {
        *self.failure.lock() = failure;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SessionProvider for ScriptedSession {
    async fn ensure_session(&self) -> Result<Arc<dyn ResultsApi>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failure.lock().clone() {
            Some(error) => Err(error),
            None => Ok(Arc::clone(&self.client) as Arc<dyn ResultsApi>),
        }
    }
}
