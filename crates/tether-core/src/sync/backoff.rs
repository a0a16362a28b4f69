//! Retry backoff
//!
//! Delay grows as `2^n / 10` seconds plus up to 100ms of jitter, capped at
//! a ceiling. The doubling step is always at least the jitter range, so
//! the delay never shrinks from one retry to the next.

use std::time::Duration;

use rand::Rng;

/// Highest retry count fed into the exponent
pub const MAX_BACKOFF_EXPONENT: u32 = 15;

/// Delay before retry `retry_count`, capped at `max_wait_secs`
pub fn backoff(max_wait_secs: u64, retry_count: u32) -> Duration {
    let jitter = rand::thread_rng().gen_range(0.0..0.1);
    backoff_with_jitter(max_wait_secs, retry_count, jitter)
}

/// Deterministic form of [`backoff`]; `jitter` is in seconds, `[0, 0.1)`
pub fn backoff_with_jitter(max_wait_secs: u64, retry_count: u32, jitter: f64) -> Duration {
    let exponent = retry_count.min(MAX_BACKOFF_EXPONENT) as i32;
    let secs = 2f64.powi(exponent) / 10.0 + jitter.clamp(0.0, 0.1);
    let secs = secs.min(max_wait_secs as f64);
    Duration::from_secs_f64(secs.max(0.0))
}
