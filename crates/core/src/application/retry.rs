// Retry logic: exponential backoff between attempts
use crate::domain::Job;

/// Default delay before the first retry
pub const DEFAULT_BASE_DELAY_MS: i64 = 2_000;

/// Default cap for a single backoff delay (1 hour)
pub const DEFAULT_MAX_DELAY_MS: i64 = 60 * 60 * 1000;

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the job after this many ms
    Retry(i64),
    /// Do not retry, the attempt budget is spent
    Failed,
}

/// Exponential backoff without jitter
///
/// `delay = min(base_delay_ms * 2^(attempts_made - 1), max_delay_ms)`
///
/// Side-effect free, so it may run inside a store mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay_ms: i64,
    pub max_delay_ms: i64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_delay_ms: i64, max_delay_ms: i64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// Delay after the `attempts_made`-th failed attempt
    pub fn delay_for(&self, attempts_made: i32) -> i64 {
        let exponent = attempts_made.saturating_sub(1).clamp(0, 62) as u32;
        self.base_delay_ms
            .max(0)
            .saturating_mul(1_i64 << exponent)
            .min(self.max_delay_ms)
    }

    /// Decide what happens to an active job whose attempt just failed
    pub fn decide(&self, job: &Job) -> RetryDecision {
        if job.has_attempts_left() {
            RetryDecision::Retry(self.delay_for(job.attempts_made))
        } else {
            RetryDecision::Failed
        }
    }
}
