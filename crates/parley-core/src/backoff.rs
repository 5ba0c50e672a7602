//! Reconnect backoff.
//!
//! Delay for attempt `n` (zero based) is `initial * multiplier^n`, capped at
//! `max`, then jittered by up to `jitter_percent` in either direction. The
//! random input comes from the caller's [`crate::Environment`] so simulated
//! runs are reproducible.

use std::time::Duration;

/// Delay before the first reconnect attempt.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on any single delay (before jitter).
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Growth factor between attempts.
pub const DEFAULT_MULTIPLIER: u32 = 2;

/// Jitter applied to each delay, as a percentage of the delay.
pub const DEFAULT_JITTER_PERCENT: u32 = 25;

/// Attempts allowed before giving up and surfacing the failure.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;

/// Backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay before the first attempt.
    pub initial: Duration,
    /// Growth factor between attempts.
    pub multiplier: u32,
    /// Cap on the un-jittered delay.
    pub max: Duration,
    /// Jitter in percent of the delay (0..=100).
    pub jitter_percent: u32,
    /// Attempts before [`Backoff::next_delay`] returns `None`.
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: DEFAULT_INITIAL_DELAY,
            multiplier: DEFAULT_MULTIPLIER,
            max: DEFAULT_MAX_DELAY,
            jitter_percent: DEFAULT_JITTER_PERCENT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Attempt counter producing capped, jittered exponential delays.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    /// Create a fresh backoff (no attempts made).
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Attempts scheduled since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether another attempt is allowed.
    pub fn has_attempts_remaining(&self) -> bool {
        self.attempt < self.config.max_attempts
    }

    /// Forget all attempts. Call after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    ///
    /// `random` is any uniformly distributed value; it only selects the jitter
    /// offset.
    pub fn next_delay(&mut self, random: u64) -> Option<Duration> {
        if !self.has_attempts_remaining() {
            return None;
        }

        let base = self.base_delay(self.attempt);
        self.attempt += 1;

        Some(jitter(base, self.config.jitter_percent.min(100), random))
    }

    /// Un-jittered delay for attempt `n`.
    fn base_delay(&self, n: u32) -> Duration {
        let factor = self.config.multiplier.max(1).saturating_pow(n);
        self.config.initial.saturating_mul(factor).min(self.config.max)
    }
}

/// Spread `base` uniformly over `base ± percent%`.
fn jitter(base: Duration, percent: u32, random: u64) -> Duration {
    let base_ms = base.as_millis() as u64;
    let span = base_ms * u64::from(percent) / 100;
    if span == 0 {
        return base;
    }

    // offset in [0, 2*span], shifted to [-span, +span]
    let offset = random % (2 * span + 1);
    Duration::from_millis(base_ms - span + offset)
}
