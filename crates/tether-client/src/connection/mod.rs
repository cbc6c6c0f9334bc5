//! Live connection management.
//!
//! [`ConnectionManager`] runs as a single task and is the only writer of the
//! transport, the [`ConnectionState`], and the [`ActivityClock`]. Callers
//! drive it through a cloneable [`ConnectionHandle`] and observe it through
//! a `watch` channel of [`ConnectionSnapshot`]s. Decoded inbound frames are
//! emitted on one ordered channel for the router.
//!
//! ```text
//!  Disconnected ──connect()──▶ Connecting ──open──▶ Connected
//!        ▲                         │                  │ stale / transport error
//!        │ network lost            ▼ error            ▼
//!        └──────────────── Reconnecting(n) ◀──────────┘
//!                                  │ n == max / auth rejected
//!                                  ▼
//!                                Failed ──connect()──▶ Connecting
//! ```

mod activity;
mod errors;
mod manager;
mod state;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use activity::ActivityClock;
pub use errors::{ConnectError, ManagerGone, SendError};
pub use manager::{ConnectionHandle, ConnectionManager};
pub use state::{AppPhase, ConnectionSignal, ConnectionSnapshot, ConnectionState, NetworkPath};
pub use transport::{Connector, Transport, TransportEvent, WsConnector};
