//! Batched, rate-limited lap collection for a race field

use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::cache::{LapCache, LapKey};
use crate::limiter::RateLimiter;
use crate::provider::ResultsApi;
use crate::types::{Lap, LapDataByParticipant, LapDataOptions, RawParticipant, RawSession, laps_from_chunks};
use crate::{Result, ResultsError};

/// Receives progress while a field is being aggregated.
///
/// All methods have no-op defaults; `()` is the silent observer used by the
/// blocking path.
pub trait AggregationObserver: Send {
    /// Called before each eligible participant is looked up.
    fn on_progress(&mut self, _processed: usize, _total: usize, _participant: &str) {}

    /// Called with each participant's laps, from the cache or the upstream.
    fn on_participant(&mut self, _cust_id: i64, _laps: &Arc<[Lap]>) {}

    /// Checked between participants; `true` stops the aggregation.
    fn is_cancelled(&self) -> bool {
        false
    }
}

impl AggregationObserver for () {}

/// Summary of one aggregation run.
#[derive(Debug, Default)]
pub struct AggregateReport {
    pub laps: LapDataByParticipant,
    /// Participants whose laps came from the upstream
    pub fetched: usize,
    pub cache_hits: usize,
    /// Participants beyond the cap, or all of them when fetching is disabled
    pub skipped: usize,
    /// Absorbed per-participant failures
    pub failures: Vec<ResultsError>,
}

/// Collects lap data for every participant in a race block.
pub struct LapAggregator {
    limiter: Arc<RateLimiter>,
    cache: Arc<LapCache>,
}

impl LapAggregator {
    pub fn new(limiter: Arc<RateLimiter>, cache: Arc<LapCache>) -> Self {
        Self { limiter, cache }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn cache(&self) -> &Arc<LapCache> {
        &self.cache
    }

    /// Participants that will receive progress callbacks for `race`.
    pub fn eligible(&self, race: &RawSession) -> usize {
        if self.limiter.enabled() { self.limiter.plan(race.participant_count()).eligible } else { 0 }
    }

    /// Fetch laps for the race block's participants, in list order.
    ///
    /// A failing participant is logged and left without laps. The run fails
    /// only on authentication-class errors or cancellation.
    pub async fn aggregate<O>(
        &self,
        client: &dyn ResultsApi,
        result_id: u64,
        race: &RawSession,
        observer: &mut O,
    ) -> Result<AggregateReport>
    where
        O: AggregationObserver + ?Sized,
    {
        let entrants = race.results.as_deref().unwrap_or_default();
        let mut report = AggregateReport::default();

        if !self.limiter.enabled() {
            debug!(result_id, "Lap fetching disabled, returning without laps");
            report.skipped = entrants.len();
            return Ok(report);
        }

        let plan = self.limiter.plan(entrants.len());
        report.skipped = plan.skipped;
        if plan.skipped > 0 {
            info!(
                result_id,
                eligible = plan.eligible,
                skipped = plan.skipped,
                "Participant cap reached, remaining entrants keep empty laps"
            );
        }

        let mut previous_batch_fetched = false;
        for (batch_index, batch) in plan.batches.iter().enumerate() {
            if batch_index > 0 && previous_batch_fetched {
                self.limiter.pause_between_batches();
            }
            trace!(result_id, batch = batch_index, range = ?batch, "Processing participant batch");

            let fetched_before = report.fetched + report.failures.len();
            for index in batch.clone() {
                if observer.is_cancelled() {
                    return Err(ResultsError::Cancelled { result_id });
                }

                let entrant = &entrants[index];
                observer.on_progress(index, plan.eligible, &entrant.display_name);
                self.collect_one(client, result_id, race.simsession_number, entrant, observer, &mut report)
                    .await?;
            }
            previous_batch_fetched = report.fetched + report.failures.len() > fetched_before;
        }

        info!(
            result_id,
            fetched = report.fetched,
            cache_hits = report.cache_hits,
            failed = report.failures.len(),
            skipped = report.skipped,
            "Lap aggregation complete"
        );
        Ok(report)
    }

    async fn collect_one<O>(
        &self,
        client: &dyn ResultsApi,
        result_id: u64,
        simsession_number: i32,
        entrant: &RawParticipant,
        observer: &mut O,
        report: &mut AggregateReport,
    ) -> Result<()>
    where
        O: AggregationObserver + ?Sized,
    {
        let cust_id = entrant.cust_id;
        let key = LapKey::new(result_id, cust_id, simsession_number);

        if let Some(laps) = self.cache.get(&key) {
            trace!(result_id, cust_id, "Lap cache hit");
            report.cache_hits += 1;
            observer.on_participant(cust_id, &laps);
            report.laps.insert(cust_id, laps);
            return Ok(());
        }

        self.limiter.acquire().await;
        let response = client
            .get_lap_data(cust_id, result_id, simsession_number, LapDataOptions { all_chunks: true })
            .await;
        self.limiter.record_outcome(matches!(&response, Err(e) if e.is_throttling()));

        let laps = match response {
            Ok(chunks) => laps_from_chunks(cust_id, &chunks)
                .map_err(|shape| ResultsError::participant_failed(cust_id, shape.to_string())),
            Err(e) if e.is_authentication() => return Err(e),
            Err(e) => Err(ResultsError::participant_failed(cust_id, e.to_string())),
        };

        match laps {
            Ok(laps) => {
                let laps: Arc<[Lap]> = laps.into();
                debug!(result_id, cust_id, laps = laps.len(), "Fetched participant laps");
                self.cache.insert(key, Arc::clone(&laps));
                observer.on_participant(cust_id, &laps);
                report.laps.insert(cust_id, laps);
                report.fetched += 1;
            }
            Err(e) => {
                warn!(result_id, cust_id, error = %e, "Skipping participant without laps");
                report.failures.push(e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::test_utils::{ScriptedApi, raw_result};
    use std::time::Duration;
    use tokio::time::Instant;

    fn aggregator(config: RateLimitConfig) -> LapAggregator {
        LapAggregator::new(Arc::new(RateLimiter::new(config)), Arc::new(LapCache::default()))
    }

    fn config(delay_ms: u64, batch_size: usize, max_participants: usize) -> RateLimitConfig {
        RateLimitConfig { enabled: true, delay_ms, batch_size, max_participants, retry_delay_multiplier: 2.0 }
    }

    #[derive(Default)]
    struct Recorder {
        progress: Vec<(usize, usize, String)>,
        updates: Vec<i64>,
    }

    impl AggregationObserver for Recorder {
        fn on_progress(&mut self, processed: usize, total: usize, participant: &str) {
            self.progress.push((processed, total, participant.to_string()));
        }

        fn on_participant(&mut self, cust_id: i64, _laps: &Arc<[Lap]>) {
            self.updates.push(cust_id);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cap_limits_fetch_attempts() {
        let raw = raw_result(10, &[("RACE", 5)]);
        let api = ScriptedApi::new().with_result(raw.clone());
        let aggregator = aggregator(config(100, 10, 3));

        let report = aggregator
            .aggregate(&api, 10, &raw.session_results[0], &mut ())
            .await
            .expect("aggregation should succeed");

        assert_eq!(api.lap_calls().len(), 3);
        assert_eq!(report.fetched, 3);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.laps.len(), 3);
        assert!(!report.laps.contains_key(&1004));
        assert!(!report.laps.contains_key(&1005));
    }

    #[tokio::test(start_paused = true)]
    async fn failures_do_not_abort_the_field() {
        let raw = raw_result(10, &[("RACE", 4)]);
        let api = ScriptedApi::new()
            .with_result(raw.clone())
            .with_lap_error(1002, ResultsError::network("connection reset"))
            .with_empty_laps(1003);
        let aggregator = aggregator(config(0, 10, 60));

        let report = aggregator
            .aggregate(&api, 10, &raw.session_results[0], &mut ())
            .await
            .expect("aggregation should succeed");

        assert_eq!(api.lap_calls().len(), 4);
        assert_eq!(report.fetched, 2);
        assert_eq!(report.failures.len(), 2);
        assert!(report.failures.iter().all(|e| e.kind() == crate::ErrorKind::ParticipantFetchFailed));
        assert!(report.laps.contains_key(&1001));
        assert!(report.laps.contains_key(&1004));
    }

    #[tokio::test(start_paused = true)]
    async fn authentication_errors_propagate() {
        let raw = raw_result(10, &[("RACE", 3)]);
        let api = ScriptedApi::new().with_result(raw.clone()).with_lap_error(1002, ResultsError::CaptchaRequired);
        let aggregator = aggregator(config(0, 10, 60));

        let err = aggregator.aggregate(&api, 10, &raw.session_results[0], &mut ()).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::CaptchaRequired);
        assert_eq!(api.lap_calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_hits_skip_fetch_and_delay() {
        let raw = raw_result(10, &[("RACE", 3)]);
        let api = ScriptedApi::new().with_result(raw.clone());
        let aggregator = aggregator(config(500, 2, 60));
        let race = &raw.session_results[0];

        aggregator.aggregate(&api, 10, race, &mut ()).await.expect("first run should succeed");
        assert_eq!(api.lap_calls().len(), 3);

        // Let the limiter's pending slot lapse so only new delays would show
        tokio::time::advance(Duration::from_secs(5)).await;
        let start = Instant::now();
        let mut recorder = Recorder::default();
        let report = aggregator.aggregate(&api, 10, race, &mut recorder).await.expect("second run should succeed");

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(api.lap_calls().len(), 3);
        assert_eq!(report.cache_hits, 3);
        assert_eq!(recorder.updates, vec![1001, 1002, 1003]);
    }

    #[tokio::test(start_paused = true)]
    async fn spacing_includes_batch_pause() {
        let raw = raw_result(10, &[("RACE", 4)]);
        let api = ScriptedApi::new().with_result(raw.clone());
        let aggregator = aggregator(config(100, 2, 60));

        aggregator.aggregate(&api, 10, &raw.session_results[0], &mut ()).await.expect("run should succeed");

        let gaps = api.lap_call_gaps();
        assert_eq!(
            gaps,
            vec![Duration::from_millis(100), Duration::from_millis(200), Duration::from_millis(100)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_call_escalates_next_delay() {
        let raw = raw_result(10, &[("RACE", 5)]);
        let api = ScriptedApi::new()
            .with_result(raw.clone())
            .with_lap_error(1002, ResultsError::network_with_status("Too Many Requests", 429));
        let aggregator = aggregator(RateLimitConfig { retry_delay_multiplier: 3.0, ..config(100, 10, 60) });

        let report = aggregator
            .aggregate(&api, 10, &raw.session_results[0], &mut ())
            .await
            .expect("run should succeed");

        assert_eq!(report.failures.len(), 1);
        let gaps = api.lap_call_gaps();
        assert_eq!(gaps[0], Duration::from_millis(100));
        assert_eq!(gaps[1], Duration::from_millis(300));
        assert_eq!(gaps[2], Duration::from_millis(100));
        assert_eq!(gaps[3], Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn progress_reports_every_eligible_participant() {
        let raw = raw_result(10, &[("RACE", 3)]);
        let api = ScriptedApi::new().with_result(raw.clone()).with_lap_error(1003, ResultsError::network("boom"));
        let aggregator = aggregator(config(0, 2, 60));
        let mut recorder = Recorder::default();

        aggregator
            .aggregate(&api, 10, &raw.session_results[0], &mut recorder)
            .await
            .expect("run should succeed");

        let processed: Vec<(usize, usize)> = recorder.progress.iter().map(|(p, t, _)| (*p, *t)).collect();
        assert_eq!(processed, vec![(0, 3), (1, 3), (2, 3)]);
        assert_eq!(recorder.progress[0].2, "Driver 1001");
        assert_eq!(recorder.updates, vec![1001, 1002]);
    }

    #[tokio::test]
    async fn disabled_fetching_skips_everything() {
        let raw = raw_result(10, &[("RACE", 3)]);
        let api = ScriptedApi::new().with_result(raw.clone());
        let aggregator = aggregator(RateLimitConfig { enabled: false, ..RateLimitConfig::default() });

        let report = aggregator.aggregate(&api, 10, &raw.session_results[0], &mut ()).await.expect("run should succeed");
        assert!(report.laps.is_empty());
        assert_eq!(report.skipped, 3);
        assert!(api.lap_calls().is_empty());
        assert_eq!(aggregator.eligible(&raw.session_results[0]), 0);
    }
}
