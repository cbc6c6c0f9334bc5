//! The connection manager task and its handle.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use metrics::counter;
use tether_core::retry::reconnect_delay;
use tether_core::wire::{EventType, FrameDecodeError, InboundFrame, OutboundFrame};
use tether_settings::ConnectionSettings;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, Sleep, sleep, sleep_until};
use tracing::{debug, info, trace, warn};

use super::activity::ActivityClock;
use super::errors::{ConnectError, ManagerGone, SendError};
use super::state::{AppPhase, ConnectionSignal, ConnectionSnapshot, ConnectionState, NetworkPath};
use super::transport::{Connector, Transport, TransportEvent};

/// Slack added past the stale deadline so the check observes `> timeout`.
const STALE_MARGIN: Duration = Duration::from_millis(1);

const SIGNAL_CAPACITY: usize = 16;

type Attempt = BoxFuture<'static, Result<Transport, ConnectError>>;
type Timer = Option<Pin<Box<Sleep>>>;

enum Command {
    Connect,
    Disconnect,
    Network(NetworkPath),
    Lifecycle(AppPhase),
    Send(OutboundFrame, oneshot::Sender<Result<(), SendError>>),
}

/// Cloneable handle to a running [`ConnectionManager`].
#[derive(Clone)]
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<ConnectionSnapshot>,
    signals: broadcast::Sender<ConnectionSignal>,
}

impl ConnectionHandle {
    fn command(&self, command: Command) -> Result<(), ManagerGone> {
        self.commands.send(command).map_err(|_| ManagerGone)
    }

    /// Ask for a connection. From `Disconnected` or `Failed` this starts an
    /// attempt; otherwise it is a no-op.
    pub fn connect(&self) -> Result<(), ManagerGone> {
        self.command(Command::Connect)
    }

    /// Drop the transport, cancel everything in flight, and stay
    /// `Disconnected` until the next `connect()`.
    pub fn disconnect(&self) -> Result<(), ManagerGone> {
        self.command(Command::Disconnect)
    }

    /// Report a network path change.
    pub fn network_changed(&self, path: NetworkPath) -> Result<(), ManagerGone> {
        self.command(Command::Network(path))
    }

    /// Report an app lifecycle change.
    pub fn lifecycle_changed(&self, phase: AppPhase) -> Result<(), ManagerGone> {
        self.command(Command::Lifecycle(phase))
    }

    /// Write a frame to the live transport.
    pub async fn send(&self, frame: OutboundFrame) -> Result<(), SendError> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Send(frame, reply))?;
        rx.await.map_err(|_| ManagerGone)?
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.snapshot.borrow().state.clone()
    }

    /// A receiver that observes every published snapshot.
    pub fn watch(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.snapshot.clone()
    }

    /// Subscribe to out-of-band signals.
    pub fn subscribe_signals(&self) -> broadcast::Receiver<ConnectionSignal> {
        self.signals.subscribe()
    }

    /// Wait until a snapshot satisfies `predicate`.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&ConnectionSnapshot) -> bool,
    ) -> Result<ConnectionSnapshot, ManagerGone> {
        let mut rx = self.snapshot.clone();
        let snapshot = rx.wait_for(|s| predicate(s)).await.map_err(|_| ManagerGone)?;
        Ok(snapshot.clone())
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("state", &self.snapshot.borrow().state.name())
            .finish_non_exhaustive()
    }
}

/// Owner of the live transport.
///
/// Runs until every [`ConnectionHandle`] is dropped.
pub struct ConnectionManager {
    settings: ConnectionSettings,
    connector: Arc<dyn Connector>,
    commands: mpsc::UnboundedReceiver<Command>,
    frames: mpsc::UnboundedSender<InboundFrame>,
    snapshot: watch::Sender<ConnectionSnapshot>,
    signals: broadcast::Sender<ConnectionSignal>,

    state: ConnectionState,
    clock: ActivityClock,
    network: NetworkPath,
    phase: AppPhase,
    wants_connection: bool,

    attempt: Option<Attempt>,
    transport: Option<Transport>,
    backoff: Timer,
    grace: Timer,
    heartbeat: Timer,
}

impl ConnectionManager {
    /// Spawn the manager task.
    ///
    /// Returns the handle and the ordered stream of decoded, non-heartbeat
    /// inbound frames.
    pub fn spawn(
        settings: ConnectionSettings,
        connector: Arc<dyn Connector>,
    ) -> (ConnectionHandle, mpsc::UnboundedReceiver<InboundFrame>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (snap_tx, snap_rx) = watch::channel(ConnectionSnapshot::default());
        let (signal_tx, _) = broadcast::channel(SIGNAL_CAPACITY);

        let manager = Self {
            settings,
            connector,
            commands: cmd_rx,
            frames: frame_tx,
            snapshot: snap_tx,
            signals: signal_tx.clone(),
            state: ConnectionState::Disconnected,
            clock: ActivityClock::new(),
            network: NetworkPath::Satisfied,
            phase: AppPhase::Foreground,
            wants_connection: false,
            attempt: None,
            transport: None,
            backoff: None,
            grace: None,
            heartbeat: None,
        };
        drop(tokio::spawn(manager.run()));

        let handle = ConnectionHandle {
            commands: cmd_tx,
            snapshot: snap_rx,
            signals: signal_tx,
        };
        (handle, frame_rx)
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                result = next_attempt(&mut self.attempt) => {
                    self.attempt = None;
                    self.on_attempt_finished(result);
                }
                event = next_transport_event(&mut self.transport) => {
                    self.on_transport_event(event);
                }
                () = fire(&mut self.backoff) => {
                    self.backoff = None;
                    self.on_backoff_elapsed();
                }
                () = fire(&mut self.grace) => {
                    self.grace = None;
                    self.on_grace_elapsed();
                }
                () = fire(&mut self.heartbeat) => {
                    self.heartbeat = None;
                    self.on_heartbeat_check();
                }
            }
            self.publish();
        }
        debug!("connection manager stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.on_connect(),
            Command::Disconnect => self.on_disconnect(),
            Command::Network(path) => self.on_network(path),
            Command::Lifecycle(phase) => self.on_lifecycle(phase),
            Command::Send(frame, reply) => {
                let _ = reply.send(self.send_frame(&frame));
            }
        }
    }

    // ── Commands ────────────────────────────────────────────────────────

    fn on_connect(&mut self) {
        self.wants_connection = true;
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Failed { .. } => {
                if self.network == NetworkPath::Unsatisfied {
                    debug!("no network path, connecting once one is available");
                    self.set_state(ConnectionState::Disconnected);
                    return;
                }
                self.set_state(ConnectionState::Connecting);
                self.start_attempt();
            }
            _ => debug!(state = self.state.name(), "connect ignored"),
        }
    }

    fn on_disconnect(&mut self) {
        self.wants_connection = false;
        self.teardown();
        self.set_state(ConnectionState::Disconnected);
        info!("disconnected by request");
    }

    fn on_network(&mut self, path: NetworkPath) {
        self.network = path;
        match path {
            NetworkPath::Unsatisfied => {
                if matches!(self.state, ConnectionState::Disconnected) && self.attempt.is_none() {
                    return;
                }
                info!(state = self.state.name(), "network path lost");
                if matches!(self.state, ConnectionState::Failed { .. }) {
                    self.wants_connection = false;
                }
                self.teardown();
                self.set_state(ConnectionState::Disconnected);
            }
            NetworkPath::Satisfied => {
                if !self.wants_connection
                    || self.attempt.is_some()
                    || self.phase == AppPhase::Background
                {
                    return;
                }
                match self.state {
                    ConnectionState::Disconnected => {
                        info!("network path available, connecting");
                        self.set_state(ConnectionState::Connecting);
                        self.start_attempt();
                    }
                    ConnectionState::Reconnecting { attempt, .. } => {
                        info!(attempt, "network path available, retrying without backoff");
                        self.start_attempt();
                    }
                    _ => {}
                }
            }
        }
    }

    fn on_lifecycle(&mut self, phase: AppPhase) {
        if self.phase == phase {
            return;
        }
        self.phase = phase;
        match phase {
            AppPhase::Background => {
                debug!(state = self.state.name(), "backgrounded, pausing timers");
                self.heartbeat = None;
                self.backoff = None;
                self.grace = None;
            }
            AppPhase::Foreground => match self.state {
                ConnectionState::Connected { .. } => {
                    if self.clock.is_stale(Instant::now(), self.settings.heartbeat_timeout()) {
                        self.on_stale();
                    } else {
                        self.schedule_heartbeat();
                    }
                }
                ConnectionState::Failed { .. } => {}
                _ if self.wants_connection && self.attempt.is_none() => {
                    let grace = self.settings.foreground_grace();
                    debug!(grace_ms = grace.as_millis(), "foregrounded, reconnecting after grace");
                    self.grace = Some(Box::pin(sleep(grace)));
                }
                _ => {}
            },
        }
    }

    fn send_frame(&self, frame: &OutboundFrame) -> Result<(), SendError> {
        let transport = self.transport.as_ref().ok_or(SendError::NotConnected)?;
        transport.send_text(frame.to_json()?)
    }

    // ── Attempts ────────────────────────────────────────────────────────

    fn start_attempt(&mut self) {
        self.backoff = None;
        self.grace = None;
        let connector = Arc::clone(&self.connector);
        let timeout = self.settings.connect_timeout();
        self.attempt = Some(Box::pin(async move {
            tokio::time::timeout(timeout, connector.connect())
                .await
                .unwrap_or(Err(ConnectError::Timeout(timeout)))
        }));
    }

    fn on_attempt_finished(&mut self, result: Result<Transport, ConnectError>) {
        match result {
            Ok(transport) => {
                self.transport = Some(transport);
                self.clock.touch(Instant::now());
                self.set_state(ConnectionState::Connected { since: Utc::now() });
                info!("connected");
                self.schedule_heartbeat();
            }
            Err(err) => self.on_attempt_failed(err),
        }
    }

    fn on_attempt_failed(&mut self, err: ConnectError) {
        if !err.is_retryable() {
            warn!(error = %err, category = %err.category(), "connect failed, not retrying");
            if let ConnectError::Authentication(message) = &err {
                let _ = self.signals.send(ConnectionSignal::AuthenticationRequired {
                    message: message.clone(),
                });
            }
            self.fail(err);
            return;
        }

        let next = match self.state {
            ConnectionState::Reconnecting { attempt, .. } => attempt.saturating_add(1),
            _ => 1,
        };
        if next > self.settings.max_reconnect_attempts {
            warn!(
                error = %err,
                attempts = self.settings.max_reconnect_attempts,
                "reconnect attempts exhausted"
            );
            self.fail(err);
            return;
        }
        debug!(error = %err, "connect attempt failed");
        self.enter_reconnecting(next);
    }

    fn enter_reconnecting(&mut self, attempt: u32) {
        let delay = reconnect_delay(
            attempt,
            self.settings.reconnect_base_delay(),
            self.settings.reconnect_max_delay(),
        );
        self.transport = None;
        self.heartbeat = None;
        self.set_state(ConnectionState::Reconnecting {
            attempt,
            next_delay: delay,
        });
        counter!("connection_reconnects_total").increment(1);

        if self.phase == AppPhase::Background {
            debug!(attempt, "backgrounded, reconnect deferred until foreground");
            return;
        }
        info!(attempt, delay_ms = delay.as_millis(), "reconnecting");
        self.backoff = Some(Box::pin(sleep(delay)));
    }

    fn on_backoff_elapsed(&mut self) {
        if matches!(self.state, ConnectionState::Reconnecting { .. }) && self.attempt.is_none() {
            self.start_attempt();
        }
    }

    fn on_grace_elapsed(&mut self) {
        if !self.wants_connection
            || self.attempt.is_some()
            || self.network == NetworkPath::Unsatisfied
        {
            return;
        }
        match self.state {
            ConnectionState::Disconnected => {
                self.set_state(ConnectionState::Connecting);
                self.start_attempt();
            }
            ConnectionState::Reconnecting { .. } => self.start_attempt(),
            _ => {}
        }
    }

    fn fail(&mut self, reason: ConnectError) {
        self.wants_connection = false;
        self.teardown();
        self.set_state(ConnectionState::Failed { reason });
    }

    fn teardown(&mut self) {
        self.attempt = None;
        self.transport = None;
        self.backoff = None;
        self.grace = None;
        self.heartbeat = None;
    }

    // ── Liveness ────────────────────────────────────────────────────────

    /// Checks run every interval, but never later than just past the point
    /// where the connection would go stale.
    fn schedule_heartbeat(&mut self) {
        if self.phase == AppPhase::Background || !self.state.is_connected() {
            self.heartbeat = None;
            return;
        }
        let mut deadline = Instant::now() + self.settings.heartbeat_check_interval();
        if let Some(stale_at) = self.clock.stale_at(self.settings.heartbeat_timeout()) {
            deadline = deadline.min(stale_at + STALE_MARGIN);
        }
        self.heartbeat = Some(Box::pin(sleep_until(deadline)));
    }

    fn on_heartbeat_check(&mut self) {
        if !self.state.is_connected() {
            return;
        }
        if self.clock.is_stale(Instant::now(), self.settings.heartbeat_timeout()) {
            self.on_stale();
        } else {
            self.schedule_heartbeat();
        }
    }

    fn on_stale(&mut self) {
        let silent_ms = self
            .clock
            .last_activity_at()
            .map(|last| last.elapsed().as_millis());
        warn!(?silent_ms, "no inbound activity, forcing reconnect");
        counter!("connection_heartbeat_timeouts_total").increment(1);
        self.enter_reconnecting(1);
    }

    fn on_transport_event(&mut self, event: Option<TransportEvent>) {
        let now = Instant::now();
        match event {
            Some(TransportEvent::Text(text)) => {
                self.clock.touch(now);
                self.ingest(InboundFrame::decode(&text, Utc::now()));
            }
            Some(TransportEvent::Binary(data)) => {
                self.clock.touch(now);
                self.ingest(InboundFrame::decode_binary(&data, Utc::now()));
            }
            Some(TransportEvent::Control) => self.clock.touch(now),
            Some(TransportEvent::Closed { reason }) => {
                info!(?reason, "transport closed by peer");
                self.enter_reconnecting(1);
            }
            Some(TransportEvent::Failed(message)) => {
                warn!(error = %message, "transport failed");
                self.enter_reconnecting(1);
            }
            None => {
                warn!("transport reader ended");
                self.enter_reconnecting(1);
            }
        }
    }

    fn ingest(&mut self, decoded: Result<InboundFrame, FrameDecodeError>) {
        match decoded {
            Ok(frame) if frame.event_type == EventType::Heartbeat => trace!("heartbeat"),
            Ok(frame) => {
                if self.frames.send(frame).is_err() {
                    trace!("frame consumer gone, dropping frame");
                }
            }
            Err(err) => {
                counter!("connection_frames_dropped_total", "reason" => "malformed").increment(1);
                warn!(error = %err, category = %err.category(), "dropping malformed frame");
            }
        }
    }

    // ── Publication ─────────────────────────────────────────────────────

    fn set_state(&mut self, next: ConnectionState) {
        if self.state != next {
            debug!(from = self.state.name(), to = next.name(), "connection state");
        }
        self.state = next;
    }

    fn publish(&self) {
        let next = ConnectionSnapshot {
            state: self.state.clone(),
            last_activity_at: self.clock.last_activity_at(),
            suspended: self.phase == AppPhase::Background,
            network: self.network,
        };
        let _ = self.snapshot.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }
}

async fn next_attempt(attempt: &mut Option<Attempt>) -> Result<Transport, ConnectError> {
    match attempt {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn next_transport_event(transport: &mut Option<Transport>) -> Option<TransportEvent> {
    match transport {
        Some(transport) => transport.recv().await,
        None => std::future::pending().await,
    }
}

async fn fire(timer: &mut Timer) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::{MockConnector, Peer, Script};
    use assert_matches::assert_matches;
    use tether_core::SessionId;
    use tether_core::wire::NavDirection;

    fn settings() -> ConnectionSettings {
        ConnectionSettings::default()
    }

    fn start(
        settings: ConnectionSettings,
        script: Vec<Script>,
    ) -> (
        ConnectionHandle,
        mpsc::UnboundedReceiver<InboundFrame>,
        Arc<MockConnector>,
        mpsc::UnboundedReceiver<Peer>,
    ) {
        let (connector, peers) = MockConnector::new(script);
        let (handle, frames) = ConnectionManager::spawn(settings, connector.clone());
        (handle, frames, connector, peers)
    }

    async fn connected(handle: &ConnectionHandle) -> ConnectionSnapshot {
        handle.wait_for(|s| s.state.is_connected()).await.unwrap()
    }

    fn unreachable() -> Script {
        Script::Fail(ConnectError::Unreachable("connection refused".into()))
    }

    fn gaps(calls: &[Instant]) -> Vec<u64> {
        calls
            .windows(2)
            .map(|w| (w[1] - w[0]).as_millis() as u64)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn connect_reaches_connected() {
        let (handle, _frames, _connector, mut peers) = start(settings(), vec![Script::Open]);
        assert_eq!(handle.state(), ConnectionState::Disconnected);
        handle.connect().unwrap();
        let snapshot = connected(&handle).await;
        assert!(snapshot.last_activity_at.is_some());
        assert!(peers.recv().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_delays_follow_schedule_and_reset_after_connect() {
        let (handle, _frames, connector, mut peers) = start(
            settings(),
            vec![unreachable(), unreachable(), unreachable(), unreachable(), Script::Open],
        );
        handle.connect().unwrap();
        let _ = connected(&handle).await;
        assert_eq!(gaps(&connector.calls()), vec![1_000, 2_000, 4_000, 8_000]);

        connector.push(Script::Hang);
        let peer = peers.recv().await.unwrap();
        peer.inbound
            .send(TransportEvent::Closed { reason: None })
            .await
            .unwrap();
        let snapshot = handle
            .wait_for(|s| matches!(s.state, ConnectionState::Reconnecting { .. }))
            .await
            .unwrap();
        assert_eq!(
            snapshot.state,
            ConnectionState::Reconnecting {
                attempt: 1,
                next_delay: Duration::from_secs(1)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn delay_is_capped_at_max() {
        let settings = ConnectionSettings {
            max_reconnect_attempts: 7,
            ..settings()
        };
        let mut script: Vec<Script> = (0..7).map(|_| unreachable()).collect();
        script.push(Script::Open);
        let (handle, _frames, connector, _peers) = start(settings, script);
        handle.connect().unwrap();
        let _ = connected(&handle).await;
        assert_eq!(
            gaps(&connector.calls()),
            vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_end_in_failed() {
        let settings = ConnectionSettings {
            max_reconnect_attempts: 2,
            ..settings()
        };
        let (handle, _frames, connector, _peers) = start(settings, vec![]);
        handle.connect().unwrap();
        let snapshot = handle
            .wait_for(|s| matches!(s.state, ConnectionState::Failed { .. }))
            .await
            .unwrap();
        assert_eq!(connector.calls().len(), 3);
        assert_matches!(
            snapshot.state,
            ConnectionState::Failed { reason: ConnectError::Unreachable(_) }
        );

        // Failed is terminal until an explicit connect.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(connector.calls().len(), 3);
        handle.network_changed(NetworkPath::Satisfied).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(connector.calls().len(), 3);

        connector.push(Script::Open);
        handle.connect().unwrap();
        let _ = connected(&handle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_counts_as_transient() {
        let settings = ConnectionSettings {
            connect_timeout_ms: 10_000,
            ..settings()
        };
        let (handle, _frames, connector, _peers) = start(settings, vec![Script::Hang, Script::Open]);
        handle.connect().unwrap();
        let snapshot = handle
            .wait_for(|s| matches!(s.state, ConnectionState::Reconnecting { .. }))
            .await
            .unwrap();
        assert_matches!(snapshot.state, ConnectionState::Reconnecting { attempt: 1, .. });
        let _ = connected(&handle).await;
        assert_eq!(gaps(&connector.calls()), vec![11_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn authentication_rejection_fails_without_retry() {
        let (handle, _frames, connector, _peers) = start(
            settings(),
            vec![Script::Fail(ConnectError::Authentication("401".into()))],
        );
        let mut signals = handle.subscribe_signals();
        handle.connect().unwrap();
        let snapshot = handle
            .wait_for(|s| matches!(s.state, ConnectionState::Failed { .. }))
            .await
            .unwrap();
        assert_matches!(
            snapshot.state,
            ConnectionState::Failed { reason: ConnectError::Authentication(_) }
        );
        assert_matches!(
            signals.recv().await.unwrap(),
            ConnectionSignal::AuthenticationRequired { .. }
        );
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn silence_past_timeout_forces_reconnect_while_transport_open() {
        let (handle, _frames, _connector, mut peers) =
            start(settings(), vec![Script::Open, Script::Hang]);
        handle.connect().unwrap();
        let _ = connected(&handle).await;
        let peer = peers.recv().await.unwrap();

        tokio::time::sleep(Duration::from_secs(44)).await;
        assert!(handle.state().is_connected());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_matches!(handle.state(), ConnectionState::Reconnecting { attempt: 1, .. });
        assert!(peer.shutdown.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn any_frame_keeps_connection_alive() {
        let (handle, _frames, _connector, mut peers) = start(settings(), vec![Script::Open]);
        handle.connect().unwrap();
        let _ = connected(&handle).await;
        let peer = peers.recv().await.unwrap();

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_secs(30)).await;
            peer.inbound.send(TransportEvent::Control).await.unwrap();
        }
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(handle.state().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn activity_updates_on_every_frame_and_heartbeats_are_not_forwarded() {
        let (handle, mut frames, _connector, mut peers) = start(settings(), vec![Script::Open]);
        handle.connect().unwrap();
        let mut last = connected(&handle).await.last_activity_at.unwrap();
        let peer = peers.recv().await.unwrap();

        let inputs = [
            TransportEvent::Text(r#"{"type":"heartbeat"}"#.into()),
            TransportEvent::Control,
            TransportEvent::Text(r#"{"type":"output","session_id":"s1","runtime":"claude"}"#.into()),
            TransportEvent::Binary(bytes::Bytes::from_static(br#"{"type":"status","session_id":"s1"}"#)),
        ];
        for event in inputs {
            tokio::time::sleep(Duration::from_secs(1)).await;
            peer.inbound.send(event).await.unwrap();
            let snapshot = handle
                .wait_for(|s| s.last_activity_at.is_some_and(|t| t > last))
                .await
                .unwrap();
            let now = snapshot.last_activity_at.unwrap();
            assert!(now >= last);
            last = now;
        }

        let first = frames.recv().await.unwrap();
        assert_eq!(first.event_type, EventType::Output);
        let second = frames.recv().await.unwrap();
        assert_eq!(second.event_type, EventType::Status);
        assert!(frames.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frames_are_dropped_without_state_change() {
        let (logs, _guard) = tether_core::logging::capture_logs();
        let (handle, mut frames, _connector, mut peers) = start(settings(), vec![Script::Open]);
        handle.connect().unwrap();
        let _ = connected(&handle).await;
        let peer = peers.recv().await.unwrap();

        peer.text("{not json").await;
        peer.text(r#"{"type":"message","session_id":"s1","runtime":"codex"}"#).await;
        let frame = frames.recv().await.unwrap();
        assert_eq!(frame.event_type, EventType::Message);
        assert!(handle.state().is_connected());
        assert!(logs.has_message("dropping malformed frame"));
    }

    #[tokio::test(start_paused = true)]
    async fn network_loss_cancels_in_flight_attempt() {
        let (handle, _frames, connector, _peers) = start(settings(), vec![Script::Hang]);
        handle.connect().unwrap();
        let _ = handle
            .wait_for(|s| s.state == ConnectionState::Connecting)
            .await
            .unwrap();
        tokio::task::yield_now().await;

        handle.network_changed(NetworkPath::Unsatisfied).unwrap();
        let snapshot = handle
            .wait_for(|s| s.network == NetworkPath::Unsatisfied)
            .await
            .unwrap();
        assert_eq!(snapshot.state, ConnectionState::Disconnected);
        connector.hang_dropped.cancelled().await;

        connector.push(Script::Open);
        let before = Instant::now();
        handle.network_changed(NetworkPath::Satisfied).unwrap();
        let _ = connected(&handle).await;
        assert_eq!(connector.calls().last().copied(), Some(before));
    }

    #[tokio::test(start_paused = true)]
    async fn network_loss_while_connected_drops_transport_and_restore_reconnects_at_once() {
        let (handle, _frames, connector, mut peers) =
            start(settings(), vec![Script::Open, Script::Open]);
        handle.connect().unwrap();
        let _ = connected(&handle).await;
        let peer = peers.recv().await.unwrap();

        tokio::time::advance(Duration::from_secs(3)).await;
        handle.network_changed(NetworkPath::Unsatisfied).unwrap();
        let snapshot = handle
            .wait_for(|s| s.network == NetworkPath::Unsatisfied)
            .await
            .unwrap();
        assert_eq!(snapshot.state, ConnectionState::Disconnected);
        peer.shutdown.cancelled().await;
        assert_eq!(connector.calls().len(), 1);

        tokio::time::advance(Duration::from_secs(7)).await;
        let before = Instant::now();
        handle.network_changed(NetworkPath::Satisfied).unwrap();
        let _ = connected(&handle).await;
        assert_eq!(connector.calls().len(), 2);
        assert_eq!(connector.calls().last().copied(), Some(before));
    }

    #[tokio::test(start_paused = true)]
    async fn network_restore_bypasses_backoff() {
        let (handle, _frames, connector, _peers) =
            start(settings(), vec![unreachable(), Script::Open]);
        handle.connect().unwrap();
        let _ = handle
            .wait_for(|s| matches!(s.state, ConnectionState::Reconnecting { .. }))
            .await
            .unwrap();
        handle.network_changed(NetworkPath::Satisfied).unwrap();
        let _ = connected(&handle).await;
        assert_eq!(gaps(&connector.calls()), vec![0]);
    }

    #[tokio::test(start_paused = true)]
    async fn network_restore_without_connect_does_nothing() {
        let (handle, _frames, connector, _peers) = start(settings(), vec![Script::Open]);
        handle.network_changed(NetworkPath::Unsatisfied).unwrap();
        handle.network_changed(NetworkPath::Satisfied).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(connector.calls().is_empty());
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn background_pauses_backoff_and_foreground_resumes_after_grace() {
        let (handle, _frames, connector, _peers) =
            start(settings(), vec![unreachable(), Script::Open]);
        handle.connect().unwrap();
        let _ = handle
            .wait_for(|s| matches!(s.state, ConnectionState::Reconnecting { .. }))
            .await
            .unwrap();

        handle.lifecycle_changed(AppPhase::Background).unwrap();
        let _ = handle.wait_for(|s| s.suspended).await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.calls().len(), 1);
        assert_matches!(handle.state(), ConnectionState::Reconnecting { attempt: 1, .. });

        let foregrounded = Instant::now();
        handle.lifecycle_changed(AppPhase::Foreground).unwrap();
        let _ = connected(&handle).await;
        let calls = connector.calls();
        assert_eq!(calls[1] - foregrounded, Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn foreground_rechecks_staleness_when_connected() {
        let (handle, _frames, _connector, _peers) =
            start(settings(), vec![Script::Open, Script::Hang]);
        handle.connect().unwrap();
        let _ = connected(&handle).await;

        handle.lifecycle_changed(AppPhase::Background).unwrap();
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert!(handle.state().is_connected());

        handle.lifecycle_changed(AppPhase::Foreground).unwrap();
        let snapshot = handle
            .wait_for(|s| !s.suspended)
            .await
            .unwrap();
        assert_matches!(snapshot.state, ConnectionState::Reconnecting { attempt: 1, .. });
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_closes_transport() {
        let (handle, _frames, _connector, mut peers) = start(settings(), vec![Script::Open]);
        handle.connect().unwrap();
        let _ = connected(&handle).await;
        let peer = peers.recv().await.unwrap();

        handle.disconnect().unwrap();
        let _ = handle
            .wait_for(|s| s.state == ConnectionState::Disconnected)
            .await
            .unwrap();
        peer.shutdown.cancelled().await;
    }

    #[tokio::test(start_paused = true)]
    async fn send_requires_open_transport() {
        let (handle, _frames, _connector, mut peers) = start(settings(), vec![Script::Open]);
        let frame = OutboundFrame::Navigate {
            session_id: SessionId::from("s1"),
            direction: NavDirection::Down,
        };
        assert_matches!(handle.send(frame.clone()).await, Err(SendError::NotConnected));

        handle.connect().unwrap();
        let _ = connected(&handle).await;
        let mut peer = peers.recv().await.unwrap();
        handle.send(frame).await.unwrap();
        let written = peer.outbound.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(value["type"], "navigate");
        assert_eq!(value["session_id"], "s1");
    }
}
