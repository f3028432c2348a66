//! Delay policy for the lap endpoint

use std::time::Duration;

/// Decides how long to wait before the next upstream call.
///
/// Escalation is transient: a throttled call lengthens only the wait that
/// immediately follows it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    base: Duration,
    multiplier: f64,
}

impl BackoffPolicy {
    /// Longest delay the policy will ever return.
    pub const MAX_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

    /// Non-finite multipliers fall back to 1.0.
    pub fn new(base: Duration, multiplier: f64) -> Self {
        let multiplier = if multiplier.is_finite() { multiplier.max(1.0) } else { 1.0 };
        Self { base: base.min(Self::MAX_DELAY), multiplier }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Delay to hold after a call completes.
    pub fn delay_after(&self, throttled: bool) -> Duration {
        if !throttled {
            return self.base;
        }
        Duration::try_from_secs_f64(self.base.as_secs_f64() * self.multiplier)
            .map_or(Self::MAX_DELAY, |delay| delay.min(Self::MAX_DELAY))
    }
}
