//! Monotonic record of inbound activity.

use std::time::Duration;

use tokio::time::Instant;

/// Time of the last inbound frame of any type.
///
/// Updates never move the clock backwards, so an out-of-order `touch` with an
/// older instant is ignored.
#[derive(Clone, Copy, Debug, Default)]
pub struct ActivityClock {
    last: Option<Instant>,
}

impl ActivityClock {
    /// Empty clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record activity at `now`.
    pub fn touch(&mut self, now: Instant) {
        self.last = Some(self.last.map_or(now, |last| last.max(now)));
    }

    /// Last recorded activity.
    pub fn last_activity_at(&self) -> Option<Instant> {
        self.last
    }

    /// Whether more than `timeout` has passed since the last activity.
    ///
    /// A clock that has never been touched is not stale.
    pub fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        self.last
            .is_some_and(|last| now.saturating_duration_since(last) > timeout)
    }

    /// Instant at which the clock becomes stale.
    pub fn stale_at(&self, timeout: Duration) -> Option<Instant> {
        self.last.map(|last| last + timeout)
    }
}
