//! Backoff calculation.
//!
//! Two schedules are used by the client:
//!
//! - [`reconnect_delay`]: live-connection reconnects, capped exponential
//!   `min(base * 2^(attempt-1), max)` with a 1-based attempt number.
//! - [`command_retry_delay`]: command retries, uncapped
//!   `base * multiplier * 2^retry` with a 0-based retry index. The
//!   multiplier depends on the destination class.
//!
//! Both are pure and deterministic so the schedules can be asserted exactly.

use std::time::Duration;

/// Default reconnect base delay.
pub const DEFAULT_RECONNECT_BASE: Duration = Duration::from_secs(1);
/// Default reconnect delay cap.
pub const DEFAULT_RECONNECT_MAX: Duration = Duration::from_secs(30);
/// Default command retry base delay.
pub const DEFAULT_COMMAND_RETRY_BASE: Duration = Duration::from_secs(1);

/// Delay to wait before reconnect attempt `attempt` (1-based).
///
/// `attempt = 0` is treated like `attempt = 1`.
#[must_use]
pub fn reconnect_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << exponent).min(max)
}

/// Delay to wait before command retry `retry` (0-based).
///
/// A non-finite or negative multiplier is clamped to zero. Products too
/// large for a `Duration` saturate at `Duration::MAX`.
#[must_use]
pub fn command_retry_delay(retry: u32, base: Duration, multiplier: f64) -> Duration {
    let multiplier = if multiplier.is_finite() { multiplier.max(0.0) } else { 0.0 };
    let scaled =
        Duration::try_from_secs_f64(base.as_secs_f64() * multiplier).unwrap_or(Duration::MAX);
    scaled.saturating_mul(1u32 << retry.min(31))
}
