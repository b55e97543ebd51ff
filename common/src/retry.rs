// Retry strategies
// Exponential backoff drives automatic re-scheduling of failed deliveries;
// a fixed short delay covers outcome writes after a transport call.

use crate::models::{FailureKind, PlatformRecord, PublicationStatus};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Retry strategy trait for calculating retry delays
pub trait RetryStrategy: Send + Sync {
    /// Delay before retry number `attempt` (0-based); None once retries are exhausted
    fn next_delay(&self, attempt: u32) -> Option<Duration>;

    fn max_retries(&self) -> u32;

    fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries()
    }
}

/// Exponential backoff with jitter
/// Sequence with the defaults: 60s, 3m, 9m, 27m, capped at 1h
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay_secs: u64,
    max_delay_secs: u64,
    /// 0.0 to 1.0
    jitter_factor: f64,
    max_retries: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base_delay_secs: 60,
            max_delay_secs: 3600,
            jitter_factor: 0.1,
            max_retries: 3,
        }
    }
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(
        base_delay_secs: u64,
        max_delay_secs: u64,
        jitter_factor: f64,
        max_retries: u32,
    ) -> Self {
        Self {
            base_delay_secs,
            max_delay_secs,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
            max_retries,
        }
    }

    /// base * 3^attempt, capped at max_delay
    fn calculate_base_delay(&self, attempt: u32) -> u64 {
        let factor = 3_u64.checked_pow(attempt).unwrap_or(u64::MAX);
        self.base_delay_secs
            .saturating_mul(factor)
            .min(self.max_delay_secs)
    }

    /// Returns delay in milliseconds
    fn add_jitter_ms<R: Rng>(&self, base_delay_secs: u64, rng: &mut R) -> u64 {
        let base_delay_ms = base_delay_secs.saturating_mul(1000);
        if self.jitter_factor == 0.0 {
            return base_delay_ms;
        }

        let jitter_range_ms = (base_delay_ms as f64 * self.jitter_factor) as u64;
        let jitter_ms = if jitter_range_ms > 0 {
            rng.gen_range(0..=jitter_range_ms)
        } else {
            0
        };

        base_delay_ms.saturating_add(jitter_ms)
    }

    /// Same as `next_delay`, with the jitter drawn from `seed`
    pub fn next_delay_seeded(&self, attempt: u32, seed: u64) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let base_delay_secs = self.calculate_base_delay(attempt);
        Some(Duration::from_millis(self.add_jitter_ms(base_delay_secs, &mut rng)))
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        let base_delay_secs = self.calculate_base_delay(attempt);
        Some(Duration::from_millis(
            self.add_jitter_ms(base_delay_secs, &mut rand::thread_rng()),
        ))
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

/// Fixed delay retry strategy
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
    max_retries: u32,
}

impl FixedDelay {
    pub fn new(delay: Duration, max_retries: u32) -> Self {
        Self { delay, max_retries }
    }
}

impl RetryStrategy for FixedDelay {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }
        Some(self.delay)
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

/// Decides when a failed delivery goes back on the schedule
///
/// Only transport failures qualify. Content and credential failures need a
/// human, and interrupted attempts may already have been delivered.
#[derive(Debug, Clone)]
pub struct AutoRetryPolicy {
    backoff: ExponentialBackoff,
}

impl AutoRetryPolicy {
    pub fn new(backoff: ExponentialBackoff) -> Self {
        Self { backoff }
    }

    pub fn disabled() -> Self {
        Self::new(ExponentialBackoff::with_config(0, 0, 0.0, 0))
    }

    /// Backoff before the next attempt of `record`, None when exhausted
    ///
    /// The jitter is seeded from the last attempt, so every pass over the
    /// same record computes the same delay.
    pub fn delay_for(&self, record: &PlatformRecord) -> Option<Duration> {
        let seed = record
            .last_attempt_at
            .map(|at| at.timestamp_millis() as u64)
            .unwrap_or_default()
            ^ u64::from(record.attempts);
        self.backoff
            .next_delay_seeded(record.attempts.saturating_sub(1), seed)
    }

    /// True when `record` should be re-scheduled at `now`
    pub fn eligible(&self, record: &PlatformRecord, now: DateTime<Utc>) -> bool {
        if record.status != PublicationStatus::Failed
            || record.error_kind != Some(FailureKind::Transport)
            || !self.backoff.should_retry(record.attempts.saturating_sub(1))
            || record.attempts == 0
        {
            return false;
        }

        let Some(delay) = self.delay_for(record) else {
            return false;
        };
        let Ok(delay) = chrono::Duration::from_std(delay) else {
            return false;
        };

        match record.last_attempt_at {
            Some(last) => last + delay <= now,
            None => true,
        }
    }
}

impl Default for AutoRetryPolicy {
    fn default() -> Self {
        Self::new(ExponentialBackoff::default())
    }
}
