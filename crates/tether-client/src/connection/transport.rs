//! Transport seam between the manager and the wire.
//!
//! A [`Connector`] opens one transport per attempt. The transport is a pair
//! of channels backed by reader/writer tasks; dropping the [`Transport`]
//! cancels both tasks and closes the socket.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tether_settings::EndpointSettings;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode, header};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, instrument};

use super::errors::{ConnectError, SendError};

const INBOUND_BUFFER: usize = 256;
const OUTBOUND_BUFFER: usize = 64;

/// Something read from the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// Text frame.
    Text(String),
    /// Binary frame.
    Binary(Bytes),
    /// Ping/pong or other control traffic. Counts as activity.
    Control,
    /// The peer closed the connection.
    Closed {
        /// Close reason, if one was sent.
        reason: Option<String>,
    },
    /// The transport failed.
    Failed(String),
}

impl TransportEvent {
    /// Whether nothing more will follow this event.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed { .. } | Self::Failed(_))
    }
}

/// An open transport.
pub struct Transport {
    inbound: mpsc::Receiver<TransportEvent>,
    outbound: mpsc::Sender<String>,
    _shutdown: DropGuard,
}

impl Transport {
    /// Wrap channels produced by a connector. `shutdown` is cancelled when
    /// the transport is dropped.
    pub fn new(
        inbound: mpsc::Receiver<TransportEvent>,
        outbound: mpsc::Sender<String>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inbound,
            outbound,
            _shutdown: shutdown.drop_guard(),
        }
    }

    /// Next inbound event. `None` once the reader is gone.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.inbound.recv().await
    }

    /// Queue a text frame for the writer.
    pub fn send_text(&self, text: String) -> Result<(), SendError> {
        self.outbound.try_send(text).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SendError::NotConnected,
        })
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

/// Opens transports.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open one transport. The manager bounds this call with its own timeout.
    async fn connect(&self) -> Result<Transport, ConnectError>;
}

/// WebSocket connector.
#[derive(Clone, Debug)]
pub struct WsConnector {
    url: String,
    auth_token: Option<String>,
}

impl WsConnector {
    /// Connector for `url`, sending `auth_token` as a bearer token.
    pub fn new(url: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            url: url.into(),
            auth_token,
        }
    }

    /// Connector for the configured live endpoint.
    pub fn from_settings(endpoint: &EndpointSettings) -> Self {
        Self::new(endpoint.live_url.clone(), endpoint.auth_token.clone())
    }

    fn request(&self) -> Result<tungstenite::handshake::client::Request, ConnectError> {
        if self.url.is_empty() {
            return Err(ConnectError::Config("live URL is not configured".into()));
        }
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(ConnectError::Config(format!(
                "live URL must use ws:// or wss://: {}",
                self.url
            )));
        }
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ConnectError::Config(e.to_string()))?;
        if let Some(token) = &self.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| ConnectError::Config(format!("invalid auth token: {e}")))?;
            let _ = request.headers_mut().insert(header::AUTHORIZATION, value);
        }
        Ok(request)
    }
}

#[async_trait]
impl Connector for WsConnector {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn connect(&self) -> Result<Transport, ConnectError> {
        let request = self.request()?;
        let (ws, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(map_handshake_error)?;
        debug!("websocket open");

        let (mut sink, mut stream) = ws.split();
        let (in_tx, in_rx) = mpsc::channel(INBOUND_BUFFER);
        let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
        let shutdown = CancellationToken::new();

        let reader_cancel = shutdown.clone();
        drop(tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = reader_cancel.cancelled() => break,
                    msg = stream.next() => match msg {
                        Some(Ok(Message::Text(text))) => TransportEvent::Text(text.as_str().to_owned()),
                        Some(Ok(Message::Binary(data))) => TransportEvent::Binary(data),
                        Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {
                            TransportEvent::Control
                        }
                        Some(Ok(Message::Close(frame))) => TransportEvent::Closed {
                            reason: frame.map(|f| f.reason.as_str().to_owned()),
                        },
                        Some(Err(e)) => TransportEvent::Failed(e.to_string()),
                        None => TransportEvent::Closed { reason: None },
                    },
                };
                let terminal = event.is_terminal();
                if in_tx.send(event).await.is_err() || terminal {
                    break;
                }
            }
        }));

        let writer_cancel = shutdown.clone();
        drop(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = writer_cancel.cancelled() => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    text = out_rx.recv() => {
                        let Some(text) = text else { break };
                        if let Err(e) = sink.send(Message::text(text)).await {
                            debug!(error = %e, "websocket write failed");
                            break;
                        }
                    }
                }
            }
        }));

        Ok(Transport::new(in_rx, out_tx, shutdown))
    }
}

fn map_handshake_error(err: tungstenite::Error) -> ConnectError {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                ConnectError::Authentication(format!("handshake rejected with {status}"))
            } else {
                ConnectError::Protocol(format!("unexpected handshake status {status}"))
            }
        }
        tungstenite::Error::Url(e) => ConnectError::Config(e.to_string()),
        tungstenite::Error::Io(e) => ConnectError::Unreachable(e.to_string()),
        tungstenite::Error::Tls(e) => ConnectError::Unreachable(e.to_string()),
        other => ConnectError::Protocol(other.to_string()),
    }
}
