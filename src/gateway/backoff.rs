//! Jittered exponential backoff between failover attempts.

use std::time::Duration;

use rand::Rng;

/// Base delay before the second attempt (300ms).
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(300);

/// Delay cap (2 seconds).
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(2);

/// Maximum jitter added to each delay (100ms).
const MAX_JITTER: Duration = Duration::from_millis(100);

/// Backoff schedule applied between consecutive endpoint attempts.
///
/// Delays double from the base up to the cap, with uniform jitter on top to
/// avoid synchronized retries across concurrent calls:
///
/// ```text
/// delay = min(base * 2^(attempt - 1), cap) + jitter
/// ```
///
/// With defaults the sequence is ~300ms, ~600ms, ~1.2s, ~2s, ...
#[derive(Debug, Clone)]
pub struct FailoverBackoff {
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for FailoverBackoff {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl FailoverBackoff {
    /// Creates a backoff schedule with custom base and cap.
    #[must_use]
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// Delay to sleep after `attempt` (1-indexed) has failed, before the
    /// next attempt starts.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * 2.0_f64.powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64) + jitter()
    }
}

/// Uniform jitter in `0..=MAX_JITTER`.
fn jitter() -> Duration {
    let mut rng = rand::thread_rng();
    Duration::from_millis(rng.gen_range(0..=MAX_JITTER.as_millis() as u64))
}
