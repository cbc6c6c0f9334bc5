//! Error taxonomy shared by every component.
//!
//! Component errors (`ConnectError`, `CommandError`, `DispatchError`) live
//! next to the code that raises them. Each one maps onto an
//! [`ErrorCategory`], and the category alone decides whether it is retried.
//!
//! [`classify_transport_message`] matches low-level transport error text
//! against known patterns. HTTP and WebSocket stacks report DNS, TLS and
//! reset failures as opaque strings nested in their source chains.

use serde::{Deserialize, Serialize};

/// Error category for classification and retry decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Connection reset, DNS failure, timeout, TLS handshake failure.
    TransientNetwork,
    /// Malformed frame or decode failure.
    Protocol,
    /// Expired or invalid credentials (401/403).
    Authentication,
    /// Application-level rejection (4xx/5xx, RPC error).
    Application,
    /// Missing or invalid endpoint configuration.
    FatalConfig,
}

impl ErrorCategory {
    /// Only transient network failures are ever retried automatically.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::TransientNetwork)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TransientNetwork => write!(f, "transient_network"),
            Self::Protocol => write!(f, "protocol"),
            Self::Authentication => write!(f, "authentication"),
            Self::Application => write!(f, "application"),
            Self::FatalConfig => write!(f, "fatal_config"),
        }
    }
}

/// Why a transport failure counts as transient.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransientCause {
    /// Peer reset or refused the connection.
    ConnectionReset,
    /// The request or connect attempt timed out.
    TimedOut,
    /// Host name could not be resolved.
    Dns,
    /// TLS handshake did not complete.
    TlsHandshake,
}

impl std::fmt::Display for TransientCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionReset => write!(f, "connection reset"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Dns => write!(f, "dns failure"),
            Self::TlsHandshake => write!(f, "tls handshake failure"),
        }
    }
}

struct TransientPattern {
    check: fn(&str) -> bool,
    cause: TransientCause,
}

/// Known transient patterns, checked in order against lowercased text.
fn patterns() -> &'static [TransientPattern] {
    static PATTERNS: &[TransientPattern] = &[
        TransientPattern {
            check: |s| s.contains("dns") || s.contains("failed to lookup address"),
            cause: TransientCause::Dns,
        },
        TransientPattern {
            check: |s| s.contains("enotfound") || s.contains("name or service not known"),
            cause: TransientCause::Dns,
        },
        TransientPattern {
            check: |s| s.contains("nodename nor servname"),
            cause: TransientCause::Dns,
        },
        TransientPattern {
            check: |s| s.contains("tls") && (s.contains("handshake") || s.contains("alert")),
            cause: TransientCause::TlsHandshake,
        },
        TransientPattern {
            check: |s| s.contains("certificate") || s.contains("ssl"),
            cause: TransientCause::TlsHandshake,
        },
        TransientPattern {
            check: |s| s.contains("timed out") || s.contains("timeout") || s.contains("etimedout"),
            cause: TransientCause::TimedOut,
        },
        TransientPattern {
            check: |s| s.contains("connection reset") || s.contains("econnreset"),
            cause: TransientCause::ConnectionReset,
        },
        TransientPattern {
            check: |s| s.contains("connection refused") || s.contains("econnrefused"),
            cause: TransientCause::ConnectionReset,
        },
        TransientPattern {
            check: |s| s.contains("broken pipe") || s.contains("connection aborted"),
            cause: TransientCause::ConnectionReset,
        },
        TransientPattern {
            check: |s| s.contains("connection closed before message completed"),
            cause: TransientCause::ConnectionReset,
        },
    ];
    PATTERNS
}

/// Classify a transport error message as transient, if it matches.
///
/// Returns `None` for anything not recognised, which callers treat as
/// non-transient.
#[must_use]
pub fn classify_transport_message(message: &str) -> Option<TransientCause> {
    let lower = message.to_lowercase();
    patterns()
        .iter()
        .find(|p| (p.check)(&lower))
        .map(|p| p.cause)
}

/// Walk an error's source chain and classify the first transient cause found.
#[must_use]
pub fn classify_error_chain(err: &(dyn std::error::Error + 'static)) -> Option<TransientCause> {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(cause) = classify_transport_message(&e.to_string()) {
            return Some(cause);
        }
        current = e.source();
    }
    None
}
