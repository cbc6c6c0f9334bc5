//! Router task and handle.

use tether_core::wire::InboundFrame;
use tether_core::{RuntimeKind, SessionId};
use tether_settings::RouterSettings;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::debug;

use super::quarantine::QuarantineEntry;
use super::routing::{ActivationReport, EventRouter, RoutedEvent};

/// The router task is no longer running.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("event router has shut down")]
pub struct RouterGone;

enum RouterCommand {
    Register(SessionId),
    Unregister(SessionId),
    Activate(SessionId, oneshot::Sender<ActivationReport>),
    Deactivate,
    SelectRuntime(RuntimeKind),
    Quarantined(oneshot::Sender<Vec<QuarantineEntry>>),
}

/// Cloneable handle to the router task.
#[derive(Clone, Debug)]
pub struct RouterHandle {
    commands: mpsc::UnboundedSender<RouterCommand>,
}

impl RouterHandle {
    /// Spawn a router consuming `frames`.
    ///
    /// Returns the handle and the stream of routed events. The task runs
    /// until every handle is dropped.
    pub fn spawn(
        settings: RouterSettings,
        frames: mpsc::UnboundedReceiver<InboundFrame>,
    ) -> (Self, mpsc::UnboundedReceiver<RoutedEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        drop(tokio::spawn(run(EventRouter::new(settings), cmd_rx, frames, out_tx)));
        (Self { commands: cmd_tx }, out_rx)
    }

    fn command(&self, command: RouterCommand) -> Result<(), RouterGone> {
        self.commands.send(command).map_err(|_| RouterGone)
    }

    /// Make a session known so its events are buffered.
    pub fn register(&self, session_id: SessionId) -> Result<(), RouterGone> {
        self.command(RouterCommand::Register(session_id))
    }

    /// Forget a session and discard its buffer.
    pub fn unregister(&self, session_id: SessionId) -> Result<(), RouterGone> {
        self.command(RouterCommand::Unregister(session_id))
    }

    /// Activate a session. Its buffered events are emitted as replayed
    /// before this returns and before any later live event.
    pub async fn activate(&self, session_id: SessionId) -> Result<ActivationReport, RouterGone> {
        let (reply, rx) = oneshot::channel();
        self.command(RouterCommand::Activate(session_id, reply))?;
        rx.await.map_err(|_| RouterGone)
    }

    /// Clear the active session.
    pub fn deactivate(&self) -> Result<(), RouterGone> {
        self.command(RouterCommand::Deactivate)
    }

    /// Change the runtime gate.
    pub fn select_runtime(&self, runtime: RuntimeKind) -> Result<(), RouterGone> {
        self.command(RouterCommand::SelectRuntime(runtime))
    }

    /// Snapshot of the quarantine ring.
    pub async fn quarantined(&self) -> Result<Vec<QuarantineEntry>, RouterGone> {
        let (reply, rx) = oneshot::channel();
        self.command(RouterCommand::Quarantined(reply))?;
        rx.await.map_err(|_| RouterGone)
    }
}

async fn run(
    mut router: EventRouter,
    mut commands: mpsc::UnboundedReceiver<RouterCommand>,
    mut frames: mpsc::UnboundedReceiver<InboundFrame>,
    out: mpsc::UnboundedSender<RoutedEvent>,
) {
    let mut frames_open = true;
    loop {
        tokio::select! {
            biased;
            command = commands.recv() => match command {
                Some(command) => handle(&mut router, command, &out),
                None => break,
            },
            frame = frames.recv(), if frames_open => match frame {
                Some(frame) => {
                    let (_, event) = router.route(frame, Instant::now());
                    if let Some(event) = event {
                        let _ = out.send(event);
                    }
                }
                None => {
                    debug!("frame source closed");
                    frames_open = false;
                }
            },
        }
    }
    debug!("event router stopped");
}

fn handle(router: &mut EventRouter, command: RouterCommand, out: &mpsc::UnboundedSender<RoutedEvent>) {
    match command {
        RouterCommand::Register(id) => router.register(id),
        RouterCommand::Unregister(id) => {
            let discarded = router.unregister(&id);
            debug!(session_id = %id, discarded, "session unregistered");
        }
        RouterCommand::Activate(id, reply) => {
            let (report, replay) = router.activate(id, Instant::now());
            for event in replay {
                let _ = out.send(event);
            }
            let _ = reply.send(report);
        }
        RouterCommand::Deactivate => router.deactivate(),
        RouterCommand::SelectRuntime(runtime) => router.select_runtime(runtime),
        RouterCommand::Quarantined(reply) => {
            let _ = reply.send(router.quarantined());
        }
    }
}
