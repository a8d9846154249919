//! Shared test fixtures: an in-memory transport whose connections are driven
//! by the test, plus helpers for diagnostics and configuration.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use market_stream::{
    BackoffConfig, Connection, Diagnostic, NormalizedEvent, SessionConfig, SupervisorConfig,
    Transport, TransportError,
};
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Mock Transport
// =============================================================================

/// Transport that hands every accepted connection to the test as a [`MockPeer`].
pub struct MockTransport {
    refusals: AtomicU32,
    attempts: AtomicU32,
    peers: mpsc::UnboundedSender<MockPeer>,
}

impl MockTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            refusals: AtomicU32::new(0),
            attempts: AtomicU32::new(0),
            peers,
        });
        (transport, rx)
    }

    /// Refuse the next `n` connection attempts.
    pub fn refuse_next(&self, n: u32) {
        self.refusals.store(n, Ordering::SeqCst);
    }

    /// Connection attempts so far, refused ones included.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Connect {
                message: "connection refused".to_string(),
            });
        }

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let _ = self.peers.send(MockPeer {
            url: url.to_string(),
            frames: Some(frames_tx),
            sent: sent_rx,
            closed: Arc::clone(&closed),
        });

        Ok(Box::new(MockConnection {
            inbound: frames_rx,
            outbound: sent_tx,
            closed,
        }))
    }
}

struct MockConnection {
    inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.outbound.send(frame).map_err(|_| TransportError::Send {
            message: "peer gone".to_string(),
        })
    }

    async fn receive(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self.inbound.recv().await)
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Exchange side of one mock connection.
pub struct MockPeer {
    pub url: String,
    frames: Option<mpsc::UnboundedSender<Vec<u8>>>,
    sent: mpsc::UnboundedReceiver<Vec<u8>>,
    closed: Arc<AtomicBool>,
}

impl MockPeer {
    /// Send a JSON frame to the client.
    pub fn push(&self, frame: &Value) {
        self.push_raw(frame.to_string().as_bytes());
    }

    /// Send raw bytes to the client.
    pub fn push_raw(&self, bytes: &[u8]) {
        if let Some(frames) = &self.frames {
            let _ = frames.send(bytes.to_vec());
        }
    }

    /// Close the connection from the exchange side.
    pub fn hang_up(&mut self) {
        self.frames = None;
    }

    /// Next frame the client sent, as JSON.
    pub async fn next_sent(&mut self) -> Value {
        let bytes = timeout(WAIT, self.sent.recv()).await.unwrap().unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Whether the client closed this connection.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Wait for the next accepted connection.
pub async fn next_peer(peers: &mut mpsc::UnboundedReceiver<MockPeer>) -> MockPeer {
    timeout(WAIT, peers.recv())
        .await
        .expect("no connection within deadline")
        .expect("transport dropped")
}

// =============================================================================
// Fixtures
// =============================================================================

/// Fast backoff without jitter, no idle timeout.
pub fn config(renewal_interval: Option<Duration>) -> SupervisorConfig {
    SupervisorConfig {
        backoff: BackoffConfig::new(Duration::from_millis(10), Duration::from_millis(40), 2.0, 0.0),
        session: SessionConfig {
            subscribe_timeout: Duration::from_millis(300),
            idle_timeout: None,
            max_decode_failures: 3,
        },
        renewal_interval,
        diagnostics_capacity: 4096,
    }
}

/// Binance-shaped 24h ticker payload.
pub fn tick(symbol: &str, event_time: i64) -> Value {
    json!({
        "e": "24hrTicker",
        "E": event_time,
        "s": symbol,
        "b": "0.05",
        "a": "0.051"
    })
}

/// Handler forwarding every event into a channel.
pub fn collector() -> (
    impl Fn(NormalizedEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    mpsc::UnboundedReceiver<NormalizedEvent>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = move |event: NormalizedEvent| {
        let _ = tx.send(event);
        Ok(())
    };
    (handler, rx)
}

/// Next delivered event.
pub async fn next_event(events: &mut mpsc::UnboundedReceiver<NormalizedEvent>) -> NormalizedEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("no event within deadline")
        .expect("handler dropped")
}

/// Read diagnostics into `seen` until one matches `done`.
pub async fn wait_for_diagnostic(
    rx: &mut broadcast::Receiver<Diagnostic>,
    seen: &mut Vec<Diagnostic>,
    done: impl Fn(&Diagnostic) -> bool,
) {
    timeout(WAIT, async {
        loop {
            let diagnostic = rx.recv().await.expect("diagnostics channel failed");
            let hit = done(&diagnostic);
            seen.push(diagnostic);
            if hit {
                return;
            }
        }
    })
    .await
    .expect("diagnostic not seen within deadline");
}
