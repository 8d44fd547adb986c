//! Retry budget and backoff schedule for transient upstream failures.

use std::time::Duration;

use rand::Rng;

/// Total send attempts per dispatch, including the first.
pub(crate) const MAX_ATTEMPTS: u32 = 3;

/// Base backoff before the second attempt, doubling per attempt.
pub(crate) const BACKOFF_BASE_MS: u64 = 500;

/// Wall-clock bound applied when the caller supplies no deadline.
pub(crate) const DEFAULT_DEADLINE: Duration = Duration::from_secs(15);

/// Backoff before the next attempt after `attempt` failed attempts.
///
/// Full jitter: uniform in `[0, base * 2^(attempt-1)]`.
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    let doublings = attempt.saturating_sub(1).min(16);
    let base_ms = BACKOFF_BASE_MS.saturating_mul(2u64.saturating_pow(doublings));
    let jitter_ms = rand::thread_rng().gen_range(0..=base_ms);
    Duration::from_millis(jitter_ms)
}
