//! Reconnect backoff schedule.

use std::time::Duration;

/// Delay before reconnect attempt number `attempt`.
///
/// Exponential doubling from `base`, saturating at `cap`. Attempt numbers
/// start at 1; attempt 0 yields no delay. Safe for arbitrarily large attempt
/// counts (the shift saturates instead of overflowing).
pub fn reconnect_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let base_ms = base.as_millis() as u64;
    let cap_ms = cap.as_millis() as u64;
    let multiplier = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(multiplier).min(cap_ms))
}
