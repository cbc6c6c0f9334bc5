//! Synchronous routing core.

use std::collections::HashMap;

use metrics::counter;
use tether_core::wire::InboundFrame;
use tether_core::{EventEnvelope, RuntimeKind, SessionId};
use tether_settings::RouterSettings;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::buffer::SessionBuffer;
use super::gate::{DropReason, admit};
use super::quarantine::{Quarantine, QuarantineEntry};

/// Whether an event is being seen as it happens or replayed from a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    /// Delivered on arrival to the active session.
    Live,
    /// Delivered from a session buffer on activation.
    Replayed,
}

/// An envelope plus its delivery metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct RoutedEvent {
    /// The event.
    pub envelope: EventEnvelope,
    /// Live or replayed.
    pub liveness: Liveness,
}

/// What happened to one inbound frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Delivered live to the active session.
    Delivered,
    /// Held for an inactive session.
    Buffered,
    /// Recorded for an unknown session.
    Quarantined,
    /// Discarded.
    Dropped(DropReason),
}

/// Result of activating a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivationReport {
    /// The now-active session.
    pub session_id: SessionId,
    /// Buffered events replayed.
    pub replayed: usize,
    /// Events were discarded while inactive; history should be re-fetched.
    pub truncated: bool,
}

/// Routing state: selected runtime, known sessions, and the active one.
#[derive(Debug)]
pub struct EventRouter {
    settings: RouterSettings,
    selected: RuntimeKind,
    active: Option<SessionId>,
    sessions: HashMap<SessionId, SessionBuffer>,
    quarantine: Quarantine,
}

impl EventRouter {
    /// Router with no known sessions.
    pub fn new(settings: RouterSettings) -> Self {
        Self {
            selected: settings.selected_runtime,
            quarantine: Quarantine::new(settings.quarantine_capacity),
            settings,
            active: None,
            sessions: HashMap::new(),
        }
    }

    /// Route one frame.
    pub fn route(&mut self, frame: InboundFrame, now: Instant) -> (RouteOutcome, Option<RoutedEvent>) {
        let envelope = match admit(frame, self.selected) {
            Ok(envelope) => envelope,
            Err(reason) => {
                counter!("router_frames_dropped_total", "reason" => reason.as_str()).increment(1);
                debug!(reason = reason.as_str(), selected = %self.selected, "dropping frame");
                return (RouteOutcome::Dropped(reason), None);
            }
        };

        if self.active.as_ref() == Some(envelope.session_id()) {
            let event = RoutedEvent {
                envelope,
                liveness: Liveness::Live,
            };
            return (RouteOutcome::Delivered, Some(event));
        }

        if let Some(buffer) = self.sessions.get_mut(envelope.session_id()) {
            let session_id = envelope.session_id().clone();
            let discarded = buffer.push(
                envelope,
                now,
                self.settings.session_buffer_capacity,
                self.settings.session_buffer_ttl(),
            );
            if discarded > 0 {
                counter!("router_buffer_truncations_total").increment(1);
                warn!(%session_id, discarded, "session buffer bound exceeded, discarding");
            }
            return (RouteOutcome::Buffered, None);
        }

        counter!("router_frames_quarantined_total").increment(1);
        debug!(
            session_id = %envelope.session_id(),
            event_type = %envelope.event_type(),
            "quarantining event for unknown session"
        );
        self.quarantine.push(QuarantineEntry::from(&envelope));
        (RouteOutcome::Quarantined, None)
    }

    /// Make a session known. Its events are buffered until it is activated.
    pub fn register(&mut self, session_id: SessionId) {
        let _ = self.sessions.entry(session_id).or_default();
    }

    /// Forget a session, discarding its buffer. Returns the discarded count.
    pub fn unregister(&mut self, session_id: &SessionId) -> usize {
        if self.active.as_ref() == Some(session_id) {
            self.active = None;
        }
        self.sessions.remove(session_id).map_or(0, |buffer| buffer.len())
    }

    /// Make `session_id` the active session, registering it if needed, and
    /// return its buffered events for replay.
    pub fn activate(&mut self, session_id: SessionId, now: Instant) -> (ActivationReport, Vec<RoutedEvent>) {
        let ttl = self.settings.session_buffer_ttl();
        let buffer = self.sessions.entry(session_id.clone()).or_default();
        let _ = buffer.expire(now, ttl);
        let (events, truncated) = buffer.drain();

        if self.active.as_ref() != Some(&session_id) {
            info!(%session_id, replayed = events.len(), truncated, "session activated");
        }
        self.active = Some(session_id.clone());

        let report = ActivationReport {
            session_id,
            replayed: events.len(),
            truncated,
        };
        let replay = events
            .into_iter()
            .map(|envelope| RoutedEvent {
                envelope,
                liveness: Liveness::Replayed,
            })
            .collect();
        (report, replay)
    }

    /// Clear the active session. It stays registered, so its events buffer.
    pub fn deactivate(&mut self) {
        self.active = None;
    }

    /// Change the runtime gate.
    pub fn select_runtime(&mut self, runtime: RuntimeKind) {
        if self.selected != runtime {
            info!(from = %self.selected, to = %runtime, "runtime selected");
        }
        self.selected = runtime;
    }

    /// Currently selected runtime.
    pub fn selected_runtime(&self) -> RuntimeKind {
        self.selected
    }

    /// Active session.
    pub fn active(&self) -> Option<&SessionId> {
        self.active.as_ref()
    }

    /// Buffered count for a registered session.
    pub fn buffered(&self, session_id: &SessionId) -> Option<usize> {
        self.sessions.get(session_id).map(SessionBuffer::len)
    }

    /// Quarantine contents, oldest first.
    pub fn quarantined(&self) -> Vec<QuarantineEntry> {
        self.quarantine.entries()
    }
}
