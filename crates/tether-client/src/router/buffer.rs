//! Per-session replay buffer.

use std::collections::VecDeque;
use std::time::Duration;

use tether_core::EventEnvelope;
use tokio::time::Instant;

/// Events held for an inactive session, in arrival order.
///
/// Entries are never dropped one at a time. When the buffer would exceed its
/// capacity, or sits idle past its TTL, everything in it is discarded and the
/// buffer is marked truncated until the next [`drain`](Self::drain).
#[derive(Debug, Default)]
pub struct SessionBuffer {
    events: VecDeque<EventEnvelope>,
    last_append: Option<Instant>,
    truncated: bool,
}

impl SessionBuffer {
    /// Empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `envelope`, discarding the existing contents first if a bound
    /// is exceeded. Returns how many envelopes were discarded.
    pub fn push(
        &mut self,
        envelope: EventEnvelope,
        now: Instant,
        capacity: usize,
        ttl: Duration,
    ) -> usize {
        let mut discarded = self.expire(now, ttl);
        if self.events.len() >= capacity {
            discarded += self.discard();
        }
        self.events.push_back(envelope);
        self.last_append = Some(now);
        discarded
    }

    /// Discard the contents if idle past `ttl`. Returns how many were discarded.
    pub fn expire(&mut self, now: Instant, ttl: Duration) -> usize {
        match self.last_append {
            Some(last) if now.saturating_duration_since(last) > ttl && !self.events.is_empty() => {
                self.discard()
            }
            _ => 0,
        }
    }

    /// Take everything in arrival order, plus whether anything was lost
    /// since the last drain. Resets the truncated flag.
    pub fn drain(&mut self) -> (Vec<EventEnvelope>, bool) {
        let events = self.events.drain(..).collect();
        self.last_append = None;
        (events, std::mem::take(&mut self.truncated))
    }

    /// Buffered envelope count.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Whether contents were discarded since the last drain.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    fn discard(&mut self) -> usize {
        let count = self.events.len();
        self.events.clear();
        self.last_append = None;
        self.truncated = true;
        count
    }
}
