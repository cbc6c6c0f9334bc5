//! # tether-client
//!
//! The control plane a mobile client uses to drive a remote agent session.
//!
//! - [`connection`]: owns the live WebSocket, its state machine, heartbeat
//!   monitoring, reconnect backoff, and network/lifecycle reactions.
//! - [`command`]: request/response calls with adaptive timeouts and
//!   transient-error retry.
//! - [`router`]: runtime gate, session-scoped delivery, replay buffers,
//!   and quarantine of unknown sessions.
//! - [`interaction`]: pending permission/question slot, auto-approve, and
//!   race-safe resolution over the hook bridge or terminal navigation.
//! - [`control`]: wires the four together from [`tether_settings::ClientSettings`].
//!
//! Every component is constructed explicitly and owns its own state.

#![deny(unsafe_code)]

pub mod command;
pub mod connection;
pub mod control;
pub mod interaction;
pub mod router;

pub use command::{CommandClient, CommandError, Destination};
pub use connection::{
    ConnectError, ConnectionHandle, ConnectionManager, ConnectionSnapshot, ConnectionState,
    Connector, NetworkPath, WsConnector,
};
pub use control::ControlPlane;
pub use interaction::{DispatchError, InteractionEvent, InteractionMachine, PendingInteraction};
pub use router::{Liveness, RoutedEvent, RouterHandle};
