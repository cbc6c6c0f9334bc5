//! Request/response calls to the remote agent.
//!
//! Timeouts adapt to the destination: loopback and private-LAN hosts get
//! the local timeout, anything else the remote one. Transient failures
//! (reset, timeout, DNS, TLS) are retried with
//! `base * multiplier * 2^n`, where the multiplier also depends on the
//! destination. Nothing else is retried.
//!
//! GET and DELETE are safe to retry. POST callers must make their requests
//! idempotent, because a retried POST may reach the server twice.

mod client;
mod destination;
mod errors;

pub use client::{CommandClient, HealthReport};
pub use destination::Destination;
pub use errors::CommandError;
