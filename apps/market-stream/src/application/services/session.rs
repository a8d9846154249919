//! Stream Session
//!
//! One websocket connection carrying one subscription. A session opens the
//! connection, subscribes, then reads frames and hands each normalized event
//! to the caller's handler until it is told to drain or the connection dies.
//!
//! Sessions never reconnect; that is the supervisor's job.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{Connection, EventHandler, Transport, TransportError};
use crate::application::services::diagnostics::{Diagnostic, DiagnosticsHub};
use crate::domain::exchange::{
    ControlReply, ExchangeProfile, Frame, JsonCodec, StreamAddress, SubscribeMode,
    SubscribeRequest,
};
use crate::domain::market::StreamKind;
use crate::domain::session::{SessionId, SessionState};
use crate::infrastructure::metrics;

// =============================================================================
// Configuration
// =============================================================================

/// Per-session timing and tolerance settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long to wait for a subscribe acknowledgement.
    pub subscribe_timeout: Duration,
    /// Silence after which the connection is presumed dead (`None` = never).
    pub idle_timeout: Option<Duration>,
    /// Consecutive undecodable frames that fail the session (0 = unlimited).
    pub max_decode_failures: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            subscribe_timeout: Duration::from_secs(10),
            idle_timeout: Some(Duration::from_secs(300)),
            max_decode_failures: 50,
        }
    }
}

impl SessionConfig {
    /// Create configuration from [`StreamSettings`](crate::StreamSettings).
    #[must_use]
    pub const fn from_stream_settings(settings: &crate::StreamSettings) -> Self {
        Self {
            subscribe_timeout: settings.subscribe_timeout,
            idle_timeout: settings.idle_timeout,
            max_decode_failures: settings.max_decode_failures,
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Explicit subscription failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscribeError {
    /// The exchange refused the request.
    #[error("subscription rejected: {0}")]
    Rejected(String),
    /// No acknowledgement in time.
    #[error("subscription not acknowledged within {0:?}")]
    Timeout(Duration),
    /// The connection closed before the acknowledgement.
    #[error("connection closed before subscription was acknowledged")]
    ConnectionClosed,
    /// The request could not be sent or the reply read.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The request could not be encoded.
    #[error("could not encode subscribe request: {0}")]
    Encode(String),
}

/// Why a streaming session ended.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionFailure {
    /// The exchange closed the connection.
    #[error("connection closed by remote")]
    ClosedByRemote,
    /// Reading failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Nothing arrived for too long.
    #[error("no frames received for {0:?}")]
    IdleTimeout(Duration),
    /// Too many consecutive undecodable frames.
    #[error("{0} consecutive undecodable frames")]
    DecodeStorm(u32),
}

impl SessionFailure {
    /// Label used in metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::ClosedByRemote => "closed_by_remote",
            Self::Transport(_) => "transport",
            Self::IdleTimeout(_) => "idle_timeout",
            Self::DecodeStorm(_) => "decode_storm",
        }
    }
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The connection could not be opened.
    #[error("connect failed: {0}")]
    Connect(#[source] TransportError),
    /// Explicit subscription failed.
    #[error(transparent)]
    Subscribe(#[from] SubscribeError),
    /// The session ended abnormally while streaming.
    #[error("session failed: {0}")]
    Failed(#[from] SessionFailure),
}

impl SessionError {
    /// Label used in metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Subscribe(_) => "subscribe",
            Self::Failed(failure) => failure.reason(),
        }
    }
}

// =============================================================================
// Shared Context
// =============================================================================

/// Everything a session needs besides its subscription.
#[derive(Clone)]
pub struct SessionContext {
    /// Exchange profile.
    pub profile: Arc<ExchangeProfile>,
    /// Connection factory.
    pub transport: Arc<dyn Transport>,
    /// Session settings.
    pub config: SessionConfig,
    /// Diagnostics sink.
    pub diagnostics: DiagnosticsHub,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("exchange", &self.profile.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// State Tracking
// =============================================================================

struct StateTracker {
    session: SessionId,
    tx: watch::Sender<SessionState>,
    diagnostics: DiagnosticsHub,
}

impl StateTracker {
    fn new(session: SessionId, diagnostics: DiagnosticsHub) -> Self {
        let tracker = Self {
            session,
            tx: watch::Sender::new(SessionState::Connecting),
            diagnostics,
        };
        tracker.announce(SessionState::Connecting);
        tracker
    }

    fn current(&self) -> SessionState {
        *self.tx.borrow()
    }

    /// Diagnostics see a state before watchers of the state channel do.
    fn advance(&self, next: SessionState) {
        match self.current().transition(next) {
            Ok(state) => {
                self.announce(state);
                self.tx.send_replace(state);
            }
            Err(e) => tracing::error!(session = %self.session, error = %e, "Ignoring state change"),
        }
    }

    fn close(&self) {
        if !self.current().is_terminal() {
            self.advance(SessionState::Closed);
        }
    }

    fn announce(&self, state: SessionState) {
        self.diagnostics.emit(Diagnostic::SessionState {
            session: self.session,
            state,
        });
    }
}

/// Raised once a session decodes its first data frame.
///
/// The supervisor resets its reconnect backoff only for sessions that raised
/// it.
#[derive(Debug, Clone, Default)]
pub struct DataSeen(Arc<AtomicBool>);

impl DataSeen {
    /// Whether a data frame has been decoded.
    #[must_use]
    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn mark(&self) {
        self.0.store(true, Ordering::Release);
    }
}

// =============================================================================
// Stream Session
// =============================================================================

/// An open, subscribed connection.
pub struct StreamSession {
    id: SessionId,
    kind: StreamKind,
    profile: Arc<ExchangeProfile>,
    config: SessionConfig,
    diagnostics: DiagnosticsHub,
    connection: Box<dyn Connection>,
    tracker: StateTracker,
    codec: JsonCodec,
    pending: VecDeque<Vec<u8>>,
    data_seen: DataSeen,
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.tracker.current())
            .finish_non_exhaustive()
    }
}

impl StreamSession {
    /// Connect and subscribe.
    ///
    /// On success the session is `Subscribed`. Frames that arrive while
    /// waiting for a subscribe acknowledgement are kept and delivered first
    /// once [`run`](Self::run) starts.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Connect`] if the transport cannot connect
    /// - [`SessionError::Subscribe`] if a handshake is rejected, times out,
    ///   or the connection drops before the acknowledgement
    pub async fn open(
        id: SessionId,
        context: &SessionContext,
        kind: StreamKind,
        address: &StreamAddress,
    ) -> Result<Self, SessionError> {
        let tracker = StateTracker::new(id, context.diagnostics.clone());
        tracing::info!(
            session = %id,
            exchange = context.profile.name(),
            stream = %kind,
            channels = address.channels.len(),
            "Connecting"
        );

        let mut connection = match context.transport.connect(&address.url).await {
            Ok(connection) => connection,
            Err(e) => {
                tracker.close();
                return Err(SessionError::Connect(e));
            }
        };

        let codec = JsonCodec::new();
        let mut pending = VecDeque::new();
        if address.mode == SubscribeMode::Handshake {
            let handshake = subscribe(
                connection.as_mut(),
                codec,
                id.get(),
                &address.channels,
                context.config.subscribe_timeout,
                &mut pending,
            )
            .await;
            if let Err(e) = handshake {
                connection.close().await;
                tracker.close();
                return Err(SessionError::Subscribe(e));
            }
        }

        tracker.advance(SessionState::Subscribed);
        Ok(Self {
            id,
            kind,
            profile: Arc::clone(&context.profile),
            config: context.config.clone(),
            diagnostics: context.diagnostics.clone(),
            connection,
            tracker,
            codec,
            pending,
            data_seen: DataSeen::default(),
        })
    }

    /// Session id.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.tracker.current()
    }

    /// Receiver that observes every later state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.tracker.tx.subscribe()
    }

    /// Flag raised once this session decodes a data frame.
    #[must_use]
    pub fn data_seen(&self) -> DataSeen {
        self.data_seen.clone()
    }

    /// Stream events to `handler` until `drain` is cancelled or the
    /// connection fails.
    ///
    /// Draining finishes the event in hand, then closes the connection and
    /// returns `Ok`. Any other ending closes the session and returns the
    /// failure.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Failed`] when the connection closes, errors,
    /// goes idle, or keeps delivering undecodable frames.
    pub async fn run(
        mut self,
        handler: Arc<dyn EventHandler>,
        drain: CancellationToken,
    ) -> Result<(), SessionError> {
        let exchange = self.profile.name().to_string();
        self.tracker.advance(SessionState::Streaming);
        metrics::adjust_live_sessions(&exchange, 1.0);

        let outcome = self.stream(handler.as_ref(), &drain).await;
        metrics::adjust_live_sessions(&exchange, -1.0);

        match outcome {
            Ok(()) => {
                tracing::info!(session = %self.id, "Draining");
                self.tracker.advance(SessionState::Draining);
                self.connection.close().await;
                self.tracker.advance(SessionState::Closed);
                Ok(())
            }
            Err(SessionFailure::ClosedByRemote) => {
                self.tracker.advance(SessionState::Draining);
                self.connection.close().await;
                self.tracker.advance(SessionState::Closed);
                Err(self.fail(SessionFailure::ClosedByRemote))
            }
            Err(failure) => {
                self.connection.close().await;
                self.tracker.close();
                Err(self.fail(failure))
            }
        }
    }

    fn fail(&self, failure: SessionFailure) -> SessionError {
        metrics::record_session_failure(self.profile.name(), failure.reason());
        self.diagnostics.emit(Diagnostic::SessionFailed {
            session: self.id,
            error: failure.to_string(),
        });
        SessionError::Failed(failure)
    }

    async fn stream(
        &mut self,
        handler: &dyn EventHandler,
        drain: &CancellationToken,
    ) -> Result<(), SessionFailure> {
        let mut decode_failures = 0_u32;

        loop {
            if drain.is_cancelled() {
                return Ok(());
            }

            let frame = if let Some(buffered) = self.pending.pop_front() {
                buffered
            } else {
                tokio::select! {
                    biased;

                    () = drain.cancelled() => return Ok(()),

                    received = self.receive() => match received? {
                        Some(frame) => frame,
                        None => return Err(SessionFailure::ClosedByRemote),
                    },
                }
            };

            self.dispatch(&frame, handler, &mut decode_failures)?;
        }
    }

    async fn receive(&mut self) -> Result<Option<Vec<u8>>, SessionFailure> {
        let read = self.connection.receive();
        match self.config.idle_timeout {
            Some(idle) => tokio::time::timeout(idle, read)
                .await
                .map_err(|_| SessionFailure::IdleTimeout(idle))?
                .map_err(SessionFailure::Transport),
            None => read.await.map_err(SessionFailure::Transport),
        }
    }

    fn dispatch(
        &self,
        bytes: &[u8],
        handler: &dyn EventHandler,
        decode_failures: &mut u32,
    ) -> Result<(), SessionFailure> {
        metrics::record_frame_received(self.profile.name());

        let payload = match self.codec.decode(bytes) {
            Ok(Frame::Data { payload, .. }) => payload,
            Ok(Frame::Control(reply)) => {
                tracing::debug!(session = %self.id, ?reply, "Ignoring control frame");
                *decode_failures = 0;
                return Ok(());
            }
            Err(e) => {
                *decode_failures += 1;
                self.diagnostics.emit(Diagnostic::FrameUndecodable {
                    session: self.id,
                    error: e.to_string(),
                });
                let limit = self.config.max_decode_failures;
                if limit > 0 && *decode_failures >= limit {
                    return Err(SessionFailure::DecodeStorm(*decode_failures));
                }
                return Ok(());
            }
        };
        *decode_failures = 0;
        self.data_seen.mark();

        match payload {
            Value::Array(items) => {
                for item in &items {
                    self.deliver(item, handler);
                }
            }
            single => self.deliver(&single, handler),
        }
        Ok(())
    }

    fn deliver(&self, raw: &Value, handler: &dyn EventHandler) {
        let exchange = self.profile.name();
        let tag = self.kind.tag();

        let started = Instant::now();
        let normalized = self.profile.normalizer().normalize(self.kind, raw);
        metrics::record_normalize_duration(exchange, started.elapsed());

        let event = match normalized {
            Ok(event) => event,
            Err(error) => {
                metrics::record_payload_rejected(exchange, tag);
                self.diagnostics.emit(Diagnostic::PayloadRejected {
                    session: self.id,
                    error,
                });
                return;
            }
        };

        let error = match panic::catch_unwind(AssertUnwindSafe(|| handler.on_event(event))) {
            Ok(Ok(())) => {
                metrics::record_event_delivered(exchange, tag);
                return;
            }
            Ok(Err(e)) => format!("{e:#}"),
            Err(payload) => format!("handler panicked: {}", panic_message(payload.as_ref())),
        };
        metrics::record_handler_failure(exchange);
        self.diagnostics.emit(Diagnostic::HandlerFailed {
            session: self.id,
            error,
        });
    }
}

async fn subscribe(
    connection: &mut dyn Connection,
    codec: JsonCodec,
    request_id: u64,
    channels: &[String],
    timeout: Duration,
    pending: &mut VecDeque<Vec<u8>>,
) -> Result<(), SubscribeError> {
    let request = codec
        .encode(&SubscribeRequest::new(request_id, channels))
        .map_err(|e| SubscribeError::Encode(e.to_string()))?;
    connection.send(request).await?;

    let acknowledged = async {
        loop {
            let frame = match connection.receive().await {
                Ok(Some(frame)) => frame,
                Ok(None) => return Err(SubscribeError::ConnectionClosed),
                Err(e) => return Err(SubscribeError::Transport(e)),
            };
            match codec.decode(&frame) {
                Ok(Frame::Control(ControlReply::Ack { id })) if id.is_none_or(|id| id == request_id) => {
                    return Ok(());
                }
                Ok(Frame::Control(ControlReply::Error { id, message }))
                    if id.is_none_or(|id| id == request_id) =>
                {
                    return Err(SubscribeError::Rejected(message));
                }
                _ => pending.push_back(frame),
            }
        }
    };

    tokio::time::timeout(timeout, acknowledged)
        .await
        .map_err(|_| SubscribeError::Timeout(timeout))?
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
