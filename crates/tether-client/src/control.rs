//! Wiring of the four components.
//!
//! ```text
//! Connector ─▶ ConnectionManager ─frames─▶ EventRouter ─routed─▶ pump ─▶ app
//!                    ▲                                             │
//!                    └──── terminal input ◀── InteractionMachine ◀─┘
//!                                                   │
//!                          CommandClient ◀─ hook bridge
//! ```

use std::sync::Arc;

use tether_settings::ClientSettings;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info};

use crate::command::{CommandClient, CommandError};
use crate::connection::{ConnectionHandle, ConnectionManager, Connector, WsConnector};
use crate::interaction::{Dispatcher, InteractionMachine};
use crate::router::{RoutedEvent, RouterHandle};

/// The assembled client control plane.
///
/// Dropping it stops the pump task. The manager and router stop once their
/// handles are dropped.
#[derive(Debug)]
pub struct ControlPlane {
    connection: ConnectionHandle,
    router: RouterHandle,
    commands: CommandClient,
    interactions: Arc<InteractionMachine>,
    _pump: DropGuard,
}

impl ControlPlane {
    /// Assemble from settings, connecting with `connector`.
    ///
    /// Returns the plane and the stream of routed events for the active
    /// session. Nothing connects until [`ConnectionHandle::connect`].
    pub fn new(
        settings: &ClientSettings,
        connector: Arc<dyn Connector>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<RoutedEvent>), CommandError> {
        let commands = CommandClient::new(&settings.endpoint, settings.command.clone())?;
        let (connection, frames) = ConnectionManager::spawn(settings.connection.clone(), connector);
        let (router, routed) = RouterHandle::spawn(settings.router.clone(), frames);
        let dispatcher = Dispatcher::new(Arc::new(commands.clone()), Arc::new(connection.clone()));
        let interactions = Arc::new(InteractionMachine::new(&settings.interaction, dispatcher));

        let (app_tx, app_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        drop(tokio::spawn(pump(
            routed,
            interactions.clone(),
            app_tx,
            cancel.clone(),
        )));
        info!(
            live_url = %settings.endpoint.live_url,
            runtime = %settings.router.selected_runtime,
            destination = commands.destination().as_str(),
            "control plane assembled"
        );

        Ok((
            Self {
                connection,
                router,
                commands,
                interactions,
                _pump: cancel.drop_guard(),
            },
            app_rx,
        ))
    }

    /// Assemble with the WebSocket connector for `settings.endpoint`.
    pub fn from_settings(
        settings: &ClientSettings,
    ) -> Result<(Self, mpsc::UnboundedReceiver<RoutedEvent>), CommandError> {
        Self::new(settings, Arc::new(WsConnector::from_settings(&settings.endpoint)))
    }

    /// Live connection handle.
    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Event router handle.
    pub fn router(&self) -> &RouterHandle {
        &self.router
    }

    /// Command client.
    pub fn commands(&self) -> &CommandClient {
        &self.commands
    }

    /// Interaction state machine.
    pub fn interactions(&self) -> &Arc<InteractionMachine> {
        &self.interactions
    }
}

/// Forward routed events to the app, then let the machine observe them.
///
/// Auto-approvals run on their own tasks so a slow bridge never holds back
/// later events.
async fn pump(
    mut routed: mpsc::UnboundedReceiver<RoutedEvent>,
    interactions: Arc<InteractionMachine>,
    app: mpsc::UnboundedSender<RoutedEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = routed.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        let _ = app.send(event.clone());
        if let Some(pending) = interactions.observe(&event) {
            let interactions = interactions.clone();
            drop(tokio::spawn(async move {
                interactions.auto_approve(&pending).await;
            }));
        }
    }
    debug!("event pump stopped");
}
