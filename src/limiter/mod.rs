//! Client-side rate limiting for the per-participant lap endpoint.
//!
//! The limiter is a single-slot leaky bucket: every upstream call reserves
//! the next free slot, and each completed call pushes the following slot out
//! by the [`BackoffPolicy`] delay. One limiter can be shared by any number of
//! tasks; calls are spaced regardless of which task issues them.
//!
//! ```text
//! call 1 ──delay──► call 2 (throttled) ──delay × multiplier──► call 3 ──delay──► ...
//! ```
//!
//! The limiter never retries a failed call. It only learns from the outcome
//! through [`RateLimiter::record_outcome`].

mod backoff;

use parking_lot::Mutex;
use std::ops::Range;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::config::RateLimitConfig;

pub use backoff::BackoffPolicy;

/// Which participants get lap fetches, and in which batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPlan {
    /// Participants eligible for a lap fetch (the first `eligible` in order)
    pub eligible: usize,
    /// Participants beyond the cap; their laps stay empty
    pub skipped: usize,
    /// Index ranges into the participant list, in processing order
    pub batches: Vec<Range<usize>>,
}

#[derive(Debug, Default)]
struct PacingState {
    next_slot: Option<Instant>,
}

/// Paces lap endpoint calls and caps participants per race.
pub struct RateLimiter {
    config: RateLimitConfig,
    policy: BackoffPolicy,
    state: Mutex<PacingState>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let policy = BackoffPolicy::new(config.delay(), config.retry_delay_multiplier);
        Self { config, policy, state: Mutex::new(PacingState::default()) }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    /// When false, lap fetching is skipped entirely.
    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Split `participants` into capped, fixed-size batches.
    pub fn plan(&self, participants: usize) -> FetchPlan {
        let eligible = participants.min(self.config.max_participants);
        let batch_size = self.config.batch_size.max(1);
        let batches = (0..eligible)
            .step_by(batch_size)
            .map(|start| start..(start + batch_size).min(eligible))
            .collect();

        FetchPlan { eligible, skipped: participants - eligible, batches }
    }

    /// Wait for the next call slot and reserve it.
    pub async fn acquire(&self) {
        let slot = {
            let mut state = self.state.lock();
            let now = Instant::now();
            let slot = state.next_slot.map_or(now, |next| next.max(now));
            // Provisional spacing in case the caller never reports back
            state.next_slot = Some(slot + self.policy.base());
            slot
        };

        let wait = slot.saturating_duration_since(Instant::now());
        if !wait.is_zero() {
            trace!(wait_ms = wait.as_millis() as u64, "Rate limiting lap fetch");
            tokio::time::sleep_until(slot).await;
        }
    }

    /// Record how the call that held the last slot ended.
    pub fn record_outcome(&self, throttled: bool) {
        let delay = self.policy.delay_after(throttled);
        if throttled {
            warn!(delay_ms = delay.as_millis() as u64, "Upstream throttling detected, escalating next delay");
        }

        let mut state = self.state.lock();
        let earliest = Instant::now() + delay;
        state.next_slot = Some(state.next_slot.map_or(earliest, |next| next.max(earliest)));
    }

    /// Add the inter-batch pause before the next slot.
    pub fn pause_between_batches(&self) {
        let mut state = self.state.lock();
        let now = Instant::now();
        let base = state.next_slot.map_or(now, |next| next.max(now));
        state.next_slot = Some(base + self.policy.base());
        debug!(delay_ms = self.config.delay_ms, "Batch boundary pause scheduled");
    }

    /// Time until the next slot opens.
    pub fn time_until_next_slot(&self) -> Duration {
        self.state
            .lock()
            .next_slot
            .map_or(Duration::ZERO, |next| next.saturating_duration_since(Instant::now()))
    }
}
