//! Diagnostic ring for events addressed to unknown sessions.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tether_core::{EventEnvelope, EventType, RuntimeKind, SessionId};

/// Summary of a quarantined envelope. Payloads are not retained.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuarantineEntry {
    /// Unknown session the event was tagged with.
    pub session_id: SessionId,
    /// Runtime tag.
    pub runtime: RuntimeKind,
    /// Event type.
    pub event_type: EventType,
    /// When it was received.
    pub received_at: DateTime<Utc>,
}

impl From<&EventEnvelope> for QuarantineEntry {
    fn from(envelope: &EventEnvelope) -> Self {
        Self {
            session_id: envelope.session_id().clone(),
            runtime: envelope.runtime(),
            event_type: envelope.event_type(),
            received_at: envelope.received_at(),
        }
    }
}

/// Bounded drop-oldest ring.
#[derive(Debug)]
pub struct Quarantine {
    entries: VecDeque<QuarantineEntry>,
    capacity: usize,
    evicted: u64,
}

impl Quarantine {
    /// Ring holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            evicted: 0,
        }
    }

    /// Record an entry, evicting the oldest when full.
    pub fn push(&mut self, entry: QuarantineEntry) {
        if self.entries.len() == self.capacity {
            let _ = self.entries.pop_front();
            self.evicted += 1;
        }
        self.entries.push_back(entry);
    }

    /// Entries, oldest first.
    pub fn entries(&self) -> Vec<QuarantineEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Number of entries held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries evicted since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(session: &str) -> QuarantineEntry {
        QuarantineEntry {
            session_id: SessionId::from(session),
            runtime: RuntimeKind::Claude,
            event_type: EventType::Output,
            received_at: Utc::now(),
        }
    }

    #[test]
    fn drops_oldest_when_full() {
        let mut ring = Quarantine::new(2);
        ring.push(entry("a"));
        ring.push(entry("b"));
        ring.push(entry("c"));
        let ids: Vec<_> = ring.entries().into_iter().map(|e| e.session_id).collect();
        assert_eq!(ids, vec![SessionId::from("b"), SessionId::from("c")]);
        assert_eq!(ring.evicted(), 1);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut ring = Quarantine::new(0);
        ring.push(entry("a"));
        assert_eq!(ring.len(), 1);
    }
}
