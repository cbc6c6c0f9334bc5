//! Scripted connector for manager tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::errors::ConnectError;
use super::transport::{Connector, Transport, TransportEvent};

/// Outcome of one scripted attempt.
pub(crate) enum Script {
    Open,
    Fail(ConnectError),
    Hang,
}

/// The far side of a mock transport.
pub(crate) struct Peer {
    pub inbound: mpsc::Sender<TransportEvent>,
    pub outbound: mpsc::Receiver<String>,
    pub shutdown: CancellationToken,
}

impl Peer {
    pub async fn text(&self, text: &str) {
        self.inbound
            .send(TransportEvent::Text(text.to_owned()))
            .await
            .unwrap();
    }
}

pub(crate) struct MockConnector {
    script: Mutex<VecDeque<Script>>,
    calls: Mutex<Vec<Instant>>,
    peers: mpsc::UnboundedSender<Peer>,
    /// Cancelled when a hanging attempt is dropped.
    pub hang_dropped: CancellationToken,
}

impl MockConnector {
    pub fn new(script: Vec<Script>) -> (Arc<Self>, mpsc::UnboundedReceiver<Peer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
            peers,
            hang_dropped: CancellationToken::new(),
        });
        (connector, rx)
    }

    pub fn calls(&self) -> Vec<Instant> {
        self.calls.lock().clone()
    }

    pub fn push(&self, step: Script) {
        self.script.lock().push_back(step);
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Transport, ConnectError> {
        self.calls.lock().push(Instant::now());
        let step = self.script.lock().pop_front();
        match step {
            Some(Script::Open) => {
                let (in_tx, in_rx) = mpsc::channel(64);
                let (out_tx, out_rx) = mpsc::channel(64);
                let shutdown = CancellationToken::new();
                let _ = self.peers.send(Peer {
                    inbound: in_tx,
                    outbound: out_rx,
                    shutdown: shutdown.clone(),
                });
                Ok(Transport::new(in_rx, out_tx, shutdown))
            }
            Some(Script::Fail(err)) => Err(err),
            Some(Script::Hang) => {
                let _guard = self.hang_dropped.clone().drop_guard();
                std::future::pending().await
            }
            None => Err(ConnectError::Unreachable("script exhausted".into())),
        }
    }
}
