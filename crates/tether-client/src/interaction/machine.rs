//! The per-session interaction state machine.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tether_core::{Decision, EventType, InteractionId, RuntimeKind, Scope, SessionId};
use tether_settings::InteractionSettings;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use super::auto_approve::AutoApproveLedger;
use super::dispatch::{DispatchError, Dispatcher};
use super::pending::{InteractionMode, PendingInteraction};
use crate::router::RoutedEvent;

const EVENT_CAPACITY: usize = 64;

/// Answered or withdrawn ids remembered for dedupe before the oldest is
/// forgotten.
const CLOSED_CLAIM_CAPACITY: usize = 512;

/// A user or automatic answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Response {
    /// Answer to a permission request.
    Permission {
        /// Allow or deny.
        decision: Decision,
        /// Once or for the session.
        scope: Scope,
    },
    /// Zero-based option index for a question.
    Choice {
        /// Option index.
        index: usize,
    },
}

/// Who produced a resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOrigin {
    /// An explicit `respond` call.
    User,
    /// The auto-approve policy.
    AutoApprove,
}

/// A successfully delivered response.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResolutionRecord {
    /// Resolved interaction.
    pub interaction_id: InteractionId,
    /// Owning session.
    pub session_id: SessionId,
    /// The answer that was sent.
    pub response: Response,
    /// User or auto-approve.
    pub origin: ResolutionOrigin,
    /// When delivery completed.
    pub resolved_at: DateTime<Utc>,
}

/// Broadcast notification of interaction changes.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InteractionEvent {
    /// A new interaction occupies the session slot.
    Pending(PendingInteraction),
    /// A newer request displaced an unanswered one.
    Replaced {
        /// Session whose slot changed.
        session_id: SessionId,
        /// Displaced interaction.
        previous: InteractionId,
        /// Its replacement.
        current: InteractionId,
    },
    /// A response was delivered.
    Resolved(ResolutionRecord),
    /// The interaction was answered elsewhere or its session ended.
    Withdrawn {
        /// Owning session.
        session_id: SessionId,
        /// Withdrawn interaction.
        interaction_id: InteractionId,
    },
    /// Delivery failed. The interaction stays pending and may be answered again.
    DispatchFailed {
        /// Owning session.
        session_id: SessionId,
        /// Interaction whose response failed.
        interaction_id: InteractionId,
        /// Rendered error.
        error: String,
    },
}

#[derive(Debug)]
enum Claim {
    InFlight,
    Resolved(ResolutionRecord),
    Withdrawn,
}

#[derive(Debug, Default)]
struct MachineState {
    auto_approve: bool,
    slots: HashMap<SessionId, PendingInteraction>,
    claims: HashMap<InteractionId, (SessionId, Claim)>,
    /// Closed claim ids, oldest first.
    closed: VecDeque<InteractionId>,
    ledger: AutoApproveLedger,
}

impl MachineState {
    fn close(&mut self, session_id: &SessionId, id: &InteractionId, claim: Claim) {
        let _ = self.claims.insert(id.clone(), (session_id.clone(), claim));
        self.closed.push_back(id.clone());
        while self.closed.len() > CLOSED_CLAIM_CAPACITY {
            let Some(oldest) = self.closed.pop_front() else {
                break;
            };
            let evict = self
                .claims
                .get(&oldest)
                .is_some_and(|(_, claim)| !matches!(claim, Claim::InFlight));
            if evict {
                let _ = self.claims.remove(&oldest);
            }
        }
    }

    /// Mark `pending` withdrawn unless it is already claimed.
    fn withdraw(&mut self, pending: &PendingInteraction) {
        if !self.claims.contains_key(&pending.id) {
            self.close(&pending.session_id, &pending.id, Claim::Withdrawn);
        }
    }

    /// Forget closed claims of an ended session. In-flight ones stay.
    fn release_session(&mut self, session_id: &SessionId) {
        self.claims
            .retain(|_, (owner, claim)| owner != session_id || matches!(claim, Claim::InFlight));
        let claims = &self.claims;
        self.closed.retain(|id| claims.contains_key(id));
    }
}

/// Tracks pending interactions and delivers responses.
///
/// State lives behind a mutex that is never held across an await, so
/// events keep flowing while a response is in flight.
#[derive(Debug)]
pub struct InteractionMachine {
    auto_approve_runtime: RuntimeKind,
    dispatcher: Dispatcher,
    state: Mutex<MachineState>,
    events: broadcast::Sender<InteractionEvent>,
}

impl InteractionMachine {
    /// Create a machine using `dispatcher` for delivery.
    pub fn new(settings: &InteractionSettings, dispatcher: Dispatcher) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            auto_approve_runtime: settings.auto_approve_runtime,
            dispatcher,
            state: Mutex::new(MachineState {
                auto_approve: settings.auto_approve,
                ..MachineState::default()
            }),
            events,
        }
    }

    /// Subscribe to interaction events.
    pub fn subscribe(&self) -> broadcast::Receiver<InteractionEvent> {
        self.events.subscribe()
    }

    /// Current interaction for a session.
    pub fn pending(&self, session_id: &SessionId) -> Option<PendingInteraction> {
        self.state.lock().slots.get(session_id).cloned()
    }

    /// The delivered response for an interaction, if any.
    pub fn resolution(&self, interaction_id: &InteractionId) -> Option<ResolutionRecord> {
        match self.state.lock().claims.get(interaction_id) {
            Some((_, Claim::Resolved(record))) => Some(record.clone()),
            _ => None,
        }
    }

    /// Turn auto-approve on or off.
    pub fn set_auto_approve(&self, enabled: bool) {
        self.state.lock().auto_approve = enabled;
        info!(enabled, "auto-approve toggled");
    }

    /// Feed a routed event. Opens, replaces, or withdraws interactions.
    ///
    /// Never waits on delivery. When a permission request qualifies for
    /// auto-approve it is returned, for the caller to pass to
    /// [`Self::auto_approve`] off the event path.
    pub fn observe(&self, event: &RoutedEvent) -> Option<PendingInteraction> {
        match event.envelope.event_type() {
            EventType::PermissionRequest | EventType::Question => {
                let pending = PendingInteraction::from_event(event)?;
                self.open(&pending).then_some(pending)
            }
            EventType::PermissionResolved => {
                self.withdraw_resolved(event);
                None
            }
            EventType::SessionEnded => {
                self.end_session(event.envelope.session_id());
                None
            }
            _ => None,
        }
    }

    /// Allow `pending` once on the user's behalf.
    ///
    /// A failure is logged and leaves the interaction pending for the user.
    pub async fn auto_approve(&self, pending: &PendingInteraction) {
        counter!("interaction_auto_approved_total").increment(1);
        info!(
            session_id = %pending.session_id,
            interaction_id = %pending.id,
            "auto-approving permission request"
        );
        let response = Response::Permission {
            decision: Decision::Allow,
            scope: Scope::Once,
        };
        if let Err(err) = self
            .resolve(pending, response, ResolutionOrigin::AutoApprove)
            .await
        {
            warn!(interaction_id = %pending.id, error = %err, "auto-approve failed");
        }
    }

    /// Answer `snapshot`, the interaction the user was looking at.
    ///
    /// Terminal interactions must still occupy their slot, since navigation
    /// acts on whatever prompt is on screen. Hook-bridge interactions are
    /// keyed by `tool_use_id` and may be answered after being replaced.
    pub async fn respond(
        &self,
        snapshot: &PendingInteraction,
        response: Response,
    ) -> Result<ResolutionRecord, DispatchError> {
        self.resolve(snapshot, response, ResolutionOrigin::User).await
    }

    /// Answer whatever interaction is pending for `session_id` now.
    pub async fn respond_current(
        &self,
        session_id: &SessionId,
        response: Response,
    ) -> Result<ResolutionRecord, DispatchError> {
        let snapshot = self
            .pending(session_id)
            .ok_or_else(|| DispatchError::NoPending(session_id.clone()))?;
        self.respond(&snapshot, response).await
    }

    /// Install `pending` in its slot. Returns whether it should be
    /// auto-approved.
    fn open(&self, pending: &PendingInteraction) -> bool {
        let mut state = self.state.lock();
        if state.claims.contains_key(&pending.id) {
            debug!(interaction_id = %pending.id, "ignoring request already answered");
            return false;
        }
        let previous = state
            .slots
            .insert(pending.session_id.clone(), pending.clone());
        match previous {
            Some(previous) if previous.id != pending.id => {
                counter!("interaction_replaced_total").increment(1);
                debug!(
                    session_id = %pending.session_id,
                    previous = %previous.id,
                    current = %pending.id,
                    "pending interaction replaced"
                );
                self.emit(InteractionEvent::Replaced {
                    session_id: pending.session_id.clone(),
                    previous: previous.id,
                    current: pending.id.clone(),
                });
                self.emit(InteractionEvent::Pending(pending.clone()));
            }
            Some(_) => {}
            None => self.emit(InteractionEvent::Pending(pending.clone())),
        }
        let enabled = state.auto_approve;
        state.ledger.claim(enabled, self.auto_approve_runtime, pending)
    }

    fn end_session(&self, session_id: &SessionId) {
        let mut state = self.state.lock();
        if let Some(pending) = state.slots.remove(session_id) {
            state.withdraw(&pending);
            self.emit(InteractionEvent::Withdrawn {
                session_id: session_id.clone(),
                interaction_id: pending.id,
            });
        }
        state.release_session(session_id);
    }

    fn withdraw_resolved(&self, event: &RoutedEvent) {
        #[derive(Deserialize)]
        struct Resolved {
            #[serde(default)]
            request_id: Option<String>,
        }

        let envelope = &event.envelope;
        let request_id = envelope
            .payload_json::<Option<Resolved>>()
            .ok()
            .flatten()
            .and_then(|r| r.request_id);
        let tool_use_id = envelope.tool_use_id();

        let mut state = self.state.lock();
        let matches = state.slots.get(envelope.session_id()).is_some_and(|p| {
            request_id.as_deref() == Some(p.id.as_str())
                || (tool_use_id.is_some() && p.tool_use_id.as_deref() == tool_use_id)
        });
        if !matches {
            debug!(session_id = %envelope.session_id(), "resolution does not match pending interaction");
            return;
        }
        if let Some(pending) = state.slots.remove(envelope.session_id()) {
            state.withdraw(&pending);
            self.emit(InteractionEvent::Withdrawn {
                session_id: pending.session_id,
                interaction_id: pending.id,
            });
        }
    }

    #[instrument(skip_all, fields(session_id = %snapshot.session_id, interaction_id = %snapshot.id, origin = ?origin))]
    async fn resolve(
        &self,
        snapshot: &PendingInteraction,
        response: Response,
        origin: ResolutionOrigin,
    ) -> Result<ResolutionRecord, DispatchError> {
        {
            let mut state = self.state.lock();
            if state.claims.contains_key(&snapshot.id) {
                return Err(DispatchError::AlreadyResolved(snapshot.id.clone()));
            }
            let on_screen = state
                .slots
                .get(&snapshot.session_id)
                .is_some_and(|p| p.id == snapshot.id);
            if snapshot.mode == InteractionMode::Pty && !on_screen {
                return Err(DispatchError::Superseded(snapshot.id.clone()));
            }
            let _ = state.claims.insert(
                snapshot.id.clone(),
                (snapshot.session_id.clone(), Claim::InFlight),
            );
        }

        let result = self.dispatcher.dispatch(snapshot, &response).await;

        let mut state = self.state.lock();
        match result {
            Ok(()) => {
                let record = ResolutionRecord {
                    interaction_id: snapshot.id.clone(),
                    session_id: snapshot.session_id.clone(),
                    response,
                    origin,
                    resolved_at: Utc::now(),
                };
                state.close(
                    &snapshot.session_id,
                    &snapshot.id,
                    Claim::Resolved(record.clone()),
                );
                // Only clear the slot if a newer request has not taken it.
                if state
                    .slots
                    .get(&snapshot.session_id)
                    .is_some_and(|p| p.id == snapshot.id)
                {
                    let _ = state.slots.remove(&snapshot.session_id);
                }
                info!("interaction resolved");
                self.emit(InteractionEvent::Resolved(record.clone()));
                Ok(record)
            }
            Err(err) => {
                if matches!(state.claims.get(&snapshot.id), Some((_, Claim::InFlight))) {
                    let _ = state.claims.remove(&snapshot.id);
                }
                counter!("interaction_dispatch_failures_total").increment(1);
                warn!(error = %err, "response delivery failed");
                self.emit(InteractionEvent::DispatchFailed {
                    session_id: snapshot.session_id.clone(),
                    interaction_id: snapshot.id.clone(),
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    fn emit(&self, event: InteractionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use tether_core::wire::{InboundFrame, PermissionResponse};
    use tether_core::{EventEnvelope, OutboundFrame};
    use tokio::sync::Notify;

    use crate::command::CommandError;
    use crate::connection::SendError;
    use crate::interaction::{HookBridge, TerminalInput};
    use crate::router::Liveness;

    #[derive(Default)]
    struct MockBridge {
        calls: Mutex<Vec<PermissionResponse>>,
        failures: AtomicUsize,
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    #[async_trait]
    impl HookBridge for MockBridge {
        async fn respond(&self, response: &PermissionResponse) -> Result<(), DispatchError> {
            self.calls.lock().push(response.clone());
            if let Some((entered, release)) = &self.gate {
                entered.notify_one();
                release.notified().await;
            }
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(DispatchError::HookBridge(CommandError::Status {
                    status: 500,
                    body: "boom".into(),
                }));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockTerminal {
        frames: Mutex<Vec<OutboundFrame>>,
        disconnected: bool,
    }

    #[async_trait]
    impl TerminalInput for MockTerminal {
        async fn send_frame(&self, frame: OutboundFrame) -> Result<(), DispatchError> {
            if self.disconnected {
                return Err(DispatchError::Terminal(SendError::NotConnected));
            }
            self.frames.lock().push(frame);
            Ok(())
        }
    }

    fn machine(
        auto_approve: bool,
        bridge: Arc<MockBridge>,
        terminal: Arc<MockTerminal>,
    ) -> InteractionMachine {
        let settings = InteractionSettings {
            auto_approve,
            ..InteractionSettings::default()
        };
        InteractionMachine::new(&settings, Dispatcher::new(bridge, terminal))
    }

    fn event(json: &str, liveness: Liveness) -> RoutedEvent {
        let frame = InboundFrame::decode(json, Utc::now()).unwrap();
        RoutedEvent {
            envelope: EventEnvelope::from_frame(frame).unwrap(),
            liveness,
        }
    }

    fn permission(runtime: &str, tool_use_id: &str) -> String {
        format!(
            r#"{{"type":"permission.request","session_id":"s1","runtime":"{runtime}","tool_use_id":"{tool_use_id}","payload":{{"options":["Yes","No"]}}}}"#
        )
    }

    fn pty_question(request_id: &str) -> String {
        format!(
            r#"{{"type":"question","session_id":"s1","runtime":"claude","payload":{{"request_id":"{request_id}","options":["Red","Green","Blue"]}}}}"#
        )
    }

    fn allow_once() -> Response {
        Response::Permission {
            decision: Decision::Allow,
            scope: Scope::Once,
        }
    }

    fn s1() -> SessionId {
        SessionId::from("s1")
    }

    /// Observe `event` and run any auto-approve inline.
    async fn feed(m: &InteractionMachine, event: &RoutedEvent) {
        if let Some(pending) = m.observe(event) {
            m.auto_approve(&pending).await;
        }
    }

    fn session_ended() -> RoutedEvent {
        event(
            r#"{"type":"session.ended","session_id":"s1","runtime":"claude"}"#,
            Liveness::Live,
        )
    }

    #[tokio::test]
    async fn request_opens_pending_and_emits() {
        let m = machine(false, Arc::default(), Arc::default());
        let mut events = m.subscribe();
        feed(&m, &event(&permission("claude", "X"), Liveness::Live)).await;

        let pending = m.pending(&s1()).unwrap();
        assert_eq!(pending.id.as_str(), "X");
        assert_eq!(pending.mode, InteractionMode::HookBridge);
        assert_matches!(events.try_recv(), Ok(InteractionEvent::Pending(p)) if p.id == pending.id);
    }

    #[tokio::test]
    async fn newer_request_replaces_older() {
        let m = machine(false, Arc::default(), Arc::default());
        let mut events = m.subscribe();
        feed(&m, &event(&permission("claude", "X"), Liveness::Live)).await;
        feed(&m, &event(&permission("claude", "Y"), Liveness::Live)).await;

        assert_eq!(m.pending(&s1()).unwrap().id.as_str(), "Y");
        let _ = events.try_recv();
        assert_matches!(
            events.try_recv(),
            Ok(InteractionEvent::Replaced { previous, current, .. })
                if previous.as_str() == "X" && current.as_str() == "Y"
        );
    }

    #[tokio::test]
    async fn auto_approves_live_claude_permission() {
        let bridge = Arc::new(MockBridge::default());
        let m = machine(true, bridge.clone(), Arc::default());
        feed(&m, &event(&permission("claude", "X"), Liveness::Live)).await;

        let calls = bridge.calls.lock().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_use_id, "X");
        assert_eq!(calls[0].decision, Decision::Allow);
        assert_eq!(calls[0].scope, Scope::Once);
        assert!(m.pending(&s1()).is_none());
        let record = m.resolution(&InteractionId::from("X")).unwrap();
        assert_eq!(record.origin, ResolutionOrigin::AutoApprove);
    }

    #[tokio::test]
    async fn replayed_or_other_runtime_is_not_auto_approved() {
        let bridge = Arc::new(MockBridge::default());
        let m = machine(true, bridge.clone(), Arc::default());
        feed(&m, &event(&permission("claude", "X"), Liveness::Replayed)).await;
        feed(&m, &event(&permission("codex", "Y"), Liveness::Live)).await;
        assert!(bridge.calls.lock().is_empty());
        assert_eq!(m.pending(&s1()).unwrap().id.as_str(), "Y");
    }

    #[tokio::test]
    async fn failed_auto_approve_is_never_repeated() {
        let bridge = Arc::new(MockBridge {
            failures: AtomicUsize::new(1),
            ..MockBridge::default()
        });
        let m = machine(true, bridge.clone(), Arc::default());
        let mut events = m.subscribe();
        let (logs, _guard) = tether_core::logging::capture_logs();

        feed(&m, &event(&permission("claude", "X"), Liveness::Live)).await;
        assert_eq!(bridge.calls.lock().len(), 1);
        assert!(logs.has_event(tracing::Level::WARN, "auto-approve failed"));
        assert_eq!(m.pending(&s1()).unwrap().id.as_str(), "X");
        let _ = events.try_recv();
        assert_matches!(events.try_recv(), Ok(InteractionEvent::DispatchFailed { .. }));

        // Redelivery of the same request does not auto-approve again.
        feed(&m, &event(&permission("claude", "X"), Liveness::Live)).await;
        assert_eq!(bridge.calls.lock().len(), 1);

        // The user can still answer it.
        let record = m.respond_current(&s1(), allow_once()).await.unwrap();
        assert_eq!(record.origin, ResolutionOrigin::User);
        assert_eq!(bridge.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn completion_of_replaced_interaction_keeps_newer_one() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let bridge = Arc::new(MockBridge {
            gate: Some((entered.clone(), release.clone())),
            ..MockBridge::default()
        });
        let m = Arc::new(machine(false, bridge, Arc::default()));
        feed(&m, &event(&permission("claude", "X"), Liveness::Live)).await;
        let x = m.pending(&s1()).unwrap();

        let responder = {
            let m = m.clone();
            tokio::spawn(async move { m.respond(&x, allow_once()).await })
        };
        entered.notified().await;
        feed(&m, &event(&permission("claude", "Y"), Liveness::Live)).await;
        release.notify_one();

        let record = responder.await.unwrap().unwrap();
        assert_eq!(record.interaction_id.as_str(), "X");
        assert_eq!(m.pending(&s1()).unwrap().id.as_str(), "Y");
    }

    #[tokio::test]
    async fn second_response_is_already_resolved() {
        let m = machine(false, Arc::default(), Arc::default());
        feed(&m, &event(&permission("claude", "X"), Liveness::Live)).await;
        let x = m.pending(&s1()).unwrap();
        let _ = m.respond(&x, allow_once()).await.unwrap();
        assert_matches!(
            m.respond(&x, allow_once()).await,
            Err(DispatchError::AlreadyResolved(id)) if id.as_str() == "X"
        );
        assert_matches!(
            m.respond_current(&s1(), allow_once()).await,
            Err(DispatchError::NoPending(_))
        );
    }

    #[tokio::test]
    async fn question_is_answered_through_terminal() {
        let terminal = Arc::new(MockTerminal::default());
        let m = machine(false, Arc::default(), terminal.clone());
        feed(&m, &event(&pty_question("q1"), Liveness::Live)).await;

        let _ = m
            .respond_current(&s1(), Response::Choice { index: 2 })
            .await
            .unwrap();
        let frames = terminal.frames.lock().clone();
        assert_eq!(frames.len(), 3);
        assert_matches!(frames[2], OutboundFrame::Confirm { .. });
        assert!(m.pending(&s1()).is_none());
    }

    #[tokio::test]
    async fn stale_terminal_snapshot_is_superseded() {
        let terminal = Arc::new(MockTerminal::default());
        let m = machine(false, Arc::default(), terminal.clone());
        feed(&m, &event(&pty_question("q1"), Liveness::Live)).await;
        let q1 = m.pending(&s1()).unwrap();
        feed(&m, &event(&pty_question("q2"), Liveness::Live)).await;

        assert_matches!(
            m.respond(&q1, Response::Choice { index: 0 }).await,
            Err(DispatchError::Superseded(_))
        );
        assert!(terminal.frames.lock().is_empty());
    }

    #[tokio::test]
    async fn terminal_failure_releases_claim() {
        let terminal = Arc::new(MockTerminal {
            disconnected: true,
            ..MockTerminal::default()
        });
        let m = machine(false, Arc::default(), terminal);
        feed(&m, &event(&pty_question("q1"), Liveness::Live)).await;
        let err = m
            .respond_current(&s1(), Response::Choice { index: 0 })
            .await
            .unwrap_err();
        assert_matches!(err, DispatchError::Terminal(SendError::NotConnected));
        assert!(m.pending(&s1()).is_some());
        assert!(m.resolution(&InteractionId::from("q1")).is_none());
    }

    #[tokio::test]
    async fn choice_cannot_use_hook_bridge() {
        let m = machine(false, Arc::default(), Arc::default());
        feed(&m, &event(&permission("claude", "X"), Liveness::Live)).await;
        assert_matches!(
            m.respond_current(&s1(), Response::Choice { index: 0 }).await,
            Err(DispatchError::Unsupported(_))
        );
    }

    #[tokio::test]
    async fn remote_resolution_clears_only_matching_interaction() {
        let m = machine(false, Arc::default(), Arc::default());
        feed(&m, &event(&permission("claude", "Y"), Liveness::Live)).await;

        feed(&m, &event(
            r#"{"type":"permission.resolved","session_id":"s1","runtime":"claude","tool_use_id":"X"}"#,
            Liveness::Live,
        ))
        .await;
        assert_eq!(m.pending(&s1()).unwrap().id.as_str(), "Y");

        feed(&m, &event(
            r#"{"type":"permission.resolved","session_id":"s1","runtime":"claude","tool_use_id":"Y"}"#,
            Liveness::Live,
        ))
        .await;
        assert!(m.pending(&s1()).is_none());
        let y = PendingInteraction::from_event(&event(&permission("claude", "Y"), Liveness::Live))
            .unwrap();
        assert_matches!(
            m.respond(&y, allow_once()).await,
            Err(DispatchError::AlreadyResolved(_))
        );
    }

    #[tokio::test]
    async fn session_end_withdraws_pending() {
        let m = machine(false, Arc::default(), Arc::default());
        let mut events = m.subscribe();
        feed(&m, &event(&pty_question("q1"), Liveness::Live)).await;
        feed(&m, &session_ended()).await;
        assert!(m.pending(&s1()).is_none());
        let _ = events.try_recv();
        assert_matches!(events.try_recv(), Ok(InteractionEvent::Withdrawn { .. }));
    }

    #[tokio::test]
    async fn toggling_auto_approve_applies_to_next_request() {
        let bridge = Arc::new(MockBridge::default());
        let m = machine(false, bridge.clone(), Arc::default());
        feed(&m, &event(&permission("claude", "X"), Liveness::Live)).await;
        assert!(bridge.calls.lock().is_empty());
        m.set_auto_approve(true);
        feed(&m, &event(&permission("claude", "Y"), Liveness::Live)).await;
        assert_eq!(bridge.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn observe_installs_without_waiting_for_delivery() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let bridge = Arc::new(MockBridge {
            gate: Some((entered.clone(), release.clone())),
            ..MockBridge::default()
        });
        let m = Arc::new(machine(true, bridge.clone(), Arc::default()));

        let x = m.observe(&event(&permission("claude", "X"), Liveness::Live)).unwrap();
        assert!(bridge.calls.lock().is_empty());
        let approver = {
            let m = m.clone();
            tokio::spawn(async move { m.auto_approve(&x).await })
        };
        entered.notified().await;

        // Delivery of X is stuck; Y still takes the slot.
        let _ = m.observe(&event(&permission("claude", "Y"), Liveness::Live));
        assert_eq!(m.pending(&s1()).unwrap().id.as_str(), "Y");

        release.notify_one();
        approver.await.unwrap();
        assert!(m.resolution(&InteractionId::from("X")).is_some());
        assert_eq!(m.pending(&s1()).unwrap().id.as_str(), "Y");
    }

    #[tokio::test]
    async fn request_without_id_is_never_auto_approved() {
        let terminal = Arc::new(MockTerminal::default());
        let m = machine(true, Arc::default(), terminal.clone());
        let idless = r#"{"type":"permission.request","session_id":"s1","runtime":"claude","payload":{"options":["Yes","No"]}}"#;

        assert!(m.observe(&event(idless, Liveness::Live)).is_none());
        let first = m.pending(&s1()).unwrap();
        assert!(first.minted_id);
        assert!(m.observe(&event(idless, Liveness::Live)).is_none());

        assert!(terminal.frames.lock().is_empty());
        assert_ne!(m.pending(&s1()).unwrap().id, first.id);
    }

    #[tokio::test]
    async fn session_end_releases_closed_claims() {
        let m = machine(false, Arc::default(), Arc::default());
        feed(&m, &event(&permission("claude", "X"), Liveness::Live)).await;
        let _ = m.respond_current(&s1(), allow_once()).await.unwrap();
        feed(&m, &event(&permission("claude", "Y"), Liveness::Live)).await;
        assert_eq!(m.state.lock().claims.len(), 1);

        feed(&m, &session_ended()).await;
        let state = m.state.lock();
        assert!(state.claims.is_empty());
        assert!(state.closed.is_empty());
    }

    #[tokio::test]
    async fn session_end_keeps_in_flight_claim() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let bridge = Arc::new(MockBridge {
            gate: Some((entered.clone(), release.clone())),
            ..MockBridge::default()
        });
        let m = Arc::new(machine(false, bridge, Arc::default()));
        feed(&m, &event(&permission("claude", "X"), Liveness::Live)).await;
        let x = m.pending(&s1()).unwrap();
        let responder = {
            let m = m.clone();
            tokio::spawn(async move { m.respond(&x, allow_once()).await })
        };
        entered.notified().await;

        feed(&m, &session_ended()).await;
        assert_eq!(m.state.lock().claims.len(), 1);
        release.notify_one();
        let record = responder.await.unwrap().unwrap();
        assert_eq!(m.resolution(&record.interaction_id), Some(record));
    }

    #[tokio::test]
    async fn closed_claims_are_bounded() {
        let m = machine(false, Arc::default(), Arc::default());
        let total = CLOSED_CLAIM_CAPACITY + 8;
        for n in 0..total {
            let id = format!("T{n}");
            feed(&m, &event(&permission("claude", &id), Liveness::Live)).await;
            let _ = m.respond_current(&s1(), allow_once()).await.unwrap();
        }

        assert_eq!(m.state.lock().claims.len(), CLOSED_CLAIM_CAPACITY);
        assert_eq!(m.state.lock().closed.len(), CLOSED_CLAIM_CAPACITY);
        assert!(m.resolution(&InteractionId::from("T0")).is_none());
        let last = format!("T{}", total - 1);
        assert!(m.resolution(&InteractionId::from(last.as_str())).is_some());
    }
}
