//! Connection Supervisor
//!
//! Keeps one subscription alive for as long as the caller wants it:
//!
//! - establishes the first session, retrying with backoff
//! - renews the connection before the exchange's lifetime ceiling, bringing
//!   the successor to `Streaming` before the predecessor starts draining
//! - replaces sessions that fail, retrying with backoff; the backoff starts
//!   over only after a session has carried data or a renewal succeeded
//! - stops everything when the [`ListenHandle`] is cancelled
//!
//! ```text
//!           establish ──► streaming ──┬── renewal due ──► successor streaming? ─┬─ yes: drain predecessor
//!               ▲                     │                                         └─ no: keep predecessor, retry later
//!               └── backoff ◄─────────┴── session failed
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, OnceCell, broadcast, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{CatalogError, EventHandler, SymbolSource, Transport};
use crate::application::services::backoff::{BackoffConfig, BackoffPolicy};
use crate::application::services::catalog::SymbolCatalog;
use crate::application::services::diagnostics::{Diagnostic, DiagnosticsHub};
use crate::application::services::session::{
    DataSeen, SessionConfig, SessionContext, SessionError, StreamSession,
};
use crate::domain::exchange::{AddressingError, ExchangeProfile, StreamAddress};
use crate::domain::market::{StreamKind, Symbol};
use crate::domain::session::{SessionId, SessionState};
use crate::infrastructure::metrics::{self, RenewalOutcome};

// =============================================================================
// Configuration
// =============================================================================

/// Supervisor settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    /// Reconnect and renewal-retry backoff.
    pub backoff: BackoffConfig,
    /// Settings passed to every session.
    pub session: SessionConfig,
    /// Renewal interval; `None` means half the profile's connection ceiling.
    pub renewal_interval: Option<Duration>,
    /// Diagnostics channel capacity.
    pub diagnostics_capacity: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffConfig::default(),
            session: SessionConfig::default(),
            renewal_interval: None,
            diagnostics_capacity: super::diagnostics::DEFAULT_CAPACITY,
        }
    }
}

impl SupervisorConfig {
    /// Create configuration from [`StreamSettings`](crate::StreamSettings).
    #[must_use]
    pub const fn from_stream_settings(settings: &crate::StreamSettings) -> Self {
        Self {
            backoff: BackoffConfig::from_stream_settings(settings),
            session: SessionConfig::from_stream_settings(settings),
            renewal_interval: settings.renewal_interval,
            diagnostics_capacity: settings.diagnostics_capacity,
        }
    }
}

// =============================================================================
// Public Types
// =============================================================================

/// Setup failures of [`ConnectionSupervisor::listen`]. Nothing is left
/// running when one is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ListenError {
    /// The symbol catalog was needed and could not be resolved.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    /// The subscription cannot be addressed.
    #[error(transparent)]
    Addressing(#[from] AddressingError),
}

/// What a listening stream is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Opening the first session.
    Connecting,
    /// A session is live.
    Streaming {
        /// The live session.
        session: SessionId,
    },
    /// Waiting to retry after a failure.
    Reconnecting {
        /// Consecutive attempt number.
        attempt: u32,
    },
    /// Cancelled; nothing is running.
    Stopped,
}

// =============================================================================
// Supervisor
// =============================================================================

struct Shared {
    context: SessionContext,
    symbols: Arc<dyn SymbolSource>,
    catalog: OnceCell<SymbolCatalog>,
    backoff: BackoffConfig,
    renewal_interval: Duration,
    next_session: AtomicU64,
}

impl Shared {
    fn exchange(&self) -> &str {
        self.context.profile.name()
    }
}

/// Entry point for listening to an exchange.
///
/// Cheap to clone; clones share the symbol catalog, session numbering and
/// diagnostics channel.
#[derive(Clone)]
pub struct ConnectionSupervisor {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ConnectionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("exchange", &self.exchange())
            .field("renewal_interval", &self.shared.renewal_interval)
            .finish_non_exhaustive()
    }
}

impl ConnectionSupervisor {
    /// Create a supervisor for one exchange.
    #[must_use]
    pub fn new(
        profile: ExchangeProfile,
        transport: Arc<dyn Transport>,
        symbols: Arc<dyn SymbolSource>,
        config: SupervisorConfig,
    ) -> Self {
        let ceiling = profile.connection_ceiling();
        let renewal_interval = config.renewal_interval.unwrap_or(ceiling / 2);
        if renewal_interval >= ceiling {
            tracing::warn!(
                exchange = profile.name(),
                renewal_secs = renewal_interval.as_secs(),
                ceiling_secs = ceiling.as_secs(),
                "Renewal interval is not below the connection ceiling; the exchange may disconnect first"
            );
        }

        Self {
            shared: Arc::new(Shared {
                context: SessionContext {
                    profile: Arc::new(profile),
                    transport,
                    config: config.session,
                    diagnostics: DiagnosticsHub::new(config.diagnostics_capacity),
                },
                symbols,
                catalog: OnceCell::new(),
                backoff: config.backoff,
                renewal_interval,
                next_session: AtomicU64::new(0),
            }),
        }
    }

    /// Exchange name.
    #[must_use]
    pub fn exchange(&self) -> &str {
        self.shared.exchange()
    }

    /// Exchange profile.
    #[must_use]
    pub fn profile(&self) -> &ExchangeProfile {
        &self.shared.context.profile
    }

    /// Effective renewal interval.
    #[must_use]
    pub fn renewal_interval(&self) -> Duration {
        self.shared.renewal_interval
    }

    /// Subscribe to diagnostics of every stream started from this supervisor.
    #[must_use]
    pub fn diagnostics(&self) -> broadcast::Receiver<Diagnostic> {
        self.shared.context.diagnostics.subscribe()
    }

    /// The exchange's symbol catalog, fetched on first use.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] if the fetch fails. Failures are not cached;
    /// the next call fetches again.
    pub async fn catalog(&self) -> Result<&SymbolCatalog, CatalogError> {
        self.shared
            .catalog
            .get_or_try_init(|| SymbolCatalog::resolve(self.shared.symbols.as_ref(), self.exchange()))
            .await
    }

    /// Start listening to `kind` for `symbols` (every tradable symbol when
    /// `None`), delivering each event to `handler`.
    ///
    /// A list covering the whole catalog subscribes to the kind's aggregate
    /// channel when the exchange has one. Checking that needs the catalog;
    /// if it cannot be fetched the list is subscribed symbol by symbol.
    ///
    /// Returns once the subscription is validated; connecting happens in the
    /// background. Dropping the returned handle detaches the stream, so keep
    /// it and call [`ListenHandle::cancel`] to stop.
    ///
    /// # Errors
    ///
    /// - [`ListenError::Catalog`] if `symbols` is `None` and the catalog
    ///   cannot be resolved
    /// - [`ListenError::Addressing`] if the kind is unsupported, the symbol
    ///   list is empty, or it needs more channels than one connection allows
    pub async fn listen<H: EventHandler>(
        &self,
        kind: StreamKind,
        symbols: Option<Vec<Symbol>>,
        handler: H,
    ) -> Result<ListenHandle, ListenError> {
        let (symbols, catalog) = match symbols {
            Some(list) => {
                let catalog = self.aggregate_catalog(kind, &list).await;
                (list, catalog)
            }
            None => {
                let catalog = self.catalog().await?;
                (catalog.iter().cloned().collect::<Vec<_>>(), Some(catalog))
            }
        };

        let address =
            self.profile()
                .address(kind, &symbols, catalog.map(SymbolCatalog::as_set))?;
        tracing::info!(
            exchange = self.exchange(),
            stream = %kind,
            symbols = symbols.len(),
            channels = address.channels.len(),
            "Listening"
        );
        tracing::debug!(url = %address.url, "Stream address");

        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(SupervisorState::Connecting);
        let supervision = Supervision {
            shared: Arc::clone(&self.shared),
            kind,
            address,
            handler: Arc::new(handler),
            cancel: cancel.clone(),
            state: state_tx,
            backoff: BackoffPolicy::new(self.shared.backoff.clone()),
        };

        Ok(ListenHandle {
            kind,
            cancel,
            task: Mutex::new(Some(tokio::spawn(supervision.run()))),
            state: state_rx,
        })
    }

    /// Catalog to compare `list` against, when `kind` has an aggregate channel.
    async fn aggregate_catalog(
        &self,
        kind: StreamKind,
        list: &[Symbol],
    ) -> Option<&SymbolCatalog> {
        let aggregate = self
            .profile()
            .channel(kind.tag())
            .is_some_and(|template| template.aggregate.is_some());
        if !aggregate || list.is_empty() {
            return None;
        }

        match self.catalog().await {
            Ok(catalog) => Some(catalog),
            Err(e) => {
                tracing::warn!(
                    exchange = self.exchange(),
                    error = %e,
                    "Catalog unavailable, subscribing per symbol"
                );
                None
            }
        }
    }
}

// =============================================================================
// Listen Handle
// =============================================================================

/// Control handle for one listening stream.
#[derive(Debug)]
pub struct ListenHandle {
    kind: StreamKind,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
    state: watch::Receiver<SupervisorState>,
}

impl ListenHandle {
    /// Stop the stream: halt renewal and reconnection, drain the live
    /// session, and wait until its connection is closed.
    ///
    /// Idempotent; concurrent and repeated calls all return once the stream
    /// has stopped.
    pub async fn cancel(&self) {
        self.cancel.cancel();
        let mut task = self.task.lock().await;
        if let Some(handle) = task.take()
            && let Err(e) = handle.await
        {
            tracing::error!(error = %e, "Supervisor task failed");
        }
    }

    /// Current supervisor state.
    #[must_use]
    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Receiver that observes every later state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SupervisorState> {
        self.state.clone()
    }

    /// Stream kind being listened to.
    #[must_use]
    pub const fn stream_kind(&self) -> StreamKind {
        self.kind
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

// =============================================================================
// Supervision Loop
// =============================================================================

struct LiveSession {
    id: SessionId,
    state: watch::Receiver<SessionState>,
    data_seen: DataSeen,
    drain: CancellationToken,
    task: JoinHandle<Result<(), SessionError>>,
}

impl LiveSession {
    /// Wait until the session streams (`true`) or closes first (`false`).
    async fn streaming(&mut self) -> bool {
        self.state
            .wait_for(|state| matches!(state, SessionState::Streaming | SessionState::Closed))
            .await
            .is_ok_and(|state| *state == SessionState::Streaming)
    }

    async fn drain(self) {
        self.drain.cancel();
        match self.task.await {
            Ok(Ok(())) => tracing::debug!(session = %self.id, "Session drained"),
            Ok(Err(e)) => tracing::debug!(session = %self.id, error = %e, "Session had already failed"),
            Err(e) => tracing::error!(session = %self.id, error = %e, "Session task failed"),
        }
    }
}

enum Step {
    Cancel,
    Renew,
    Ended(Result<Result<(), SessionError>, JoinError>),
}

enum Renewal {
    Replaced(LiveSession),
    Retained(LiveSession, Duration),
    Cancelled,
}

struct Supervision {
    shared: Arc<Shared>,
    kind: StreamKind,
    address: StreamAddress,
    handler: Arc<dyn EventHandler>,
    cancel: CancellationToken,
    state: watch::Sender<SupervisorState>,
    backoff: BackoffPolicy,
}

impl Supervision {
    async fn run(mut self) {
        if let Some(mut live) = self.establish(false).await {
            let mut renew_at = Instant::now() + self.shared.renewal_interval;

            loop {
                let step = tokio::select! {
                    biased;

                    () = self.cancel.cancelled() => Step::Cancel,

                    outcome = &mut live.task => Step::Ended(outcome),

                    () = tokio::time::sleep_until(renew_at) => Step::Renew,
                };

                match step {
                    Step::Cancel => {
                        live.drain().await;
                        break;
                    }
                    Step::Ended(outcome) => {
                        if live.data_seen.get() {
                            self.backoff.reset();
                        }
                        self.report_ended(live.id, outcome);
                        match self.establish(true).await {
                            Some(next) => {
                                live = next;
                                renew_at = Instant::now() + self.shared.renewal_interval;
                            }
                            None => break,
                        }
                    }
                    Step::Renew => match self.renew(live).await {
                        Renewal::Replaced(next) => {
                            live = next;
                            renew_at = Instant::now() + self.shared.renewal_interval;
                        }
                        Renewal::Retained(current, retry_in) => {
                            live = current;
                            renew_at = Instant::now() + retry_in;
                        }
                        Renewal::Cancelled => break,
                    },
                }
            }
        }

        self.state.send_replace(SupervisorState::Stopped);
        tracing::info!(exchange = self.shared.exchange(), stream = %self.kind, "Stopped listening");
    }

    /// Open and start a session, retrying until one starts or the stream is
    /// cancelled.
    async fn establish(&mut self, after_failure: bool) -> Option<LiveSession> {
        let mut wait = after_failure;

        loop {
            if wait {
                let delay = self.backoff.next_delay();
                let attempt = self.backoff.attempt_count();
                self.state
                    .send_replace(SupervisorState::Reconnecting { attempt });
                metrics::record_reconnect(self.shared.exchange());
                self.shared
                    .context
                    .diagnostics
                    .emit(Diagnostic::Reconnecting { attempt, delay });

                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => return None,
                    () = tokio::time::sleep(delay) => {}
                }
            }
            wait = true;

            let started = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                started = self.start() => started,
            };

            if let Ok(live) = started {
                self.state
                    .send_replace(SupervisorState::Streaming { session: live.id });
                return Some(live);
            }
        }
    }

    /// Open a session and spawn its read loop.
    async fn start(&self) -> Result<LiveSession, SessionError> {
        let id = SessionId::new(self.shared.next_session.fetch_add(1, Ordering::Relaxed) + 1);

        let session =
            match StreamSession::open(id, &self.shared.context, self.kind, &self.address).await {
                Ok(session) => session,
                Err(e) => {
                    metrics::record_session_failure(self.shared.exchange(), e.reason());
                    self.shared.context.diagnostics.emit(Diagnostic::SessionFailed {
                        session: id,
                        error: e.to_string(),
                    });
                    return Err(e);
                }
            };

        let state = session.watch_state();
        let data_seen = session.data_seen();
        let drain = self.cancel.child_token();
        let task = tokio::spawn(session.run(Arc::clone(&self.handler), drain.clone()));
        Ok(LiveSession {
            id,
            state,
            data_seen,
            drain,
            task,
        })
    }

    /// Replace `live` with a fresh session without a delivery gap.
    async fn renew(&mut self, live: LiveSession) -> Renewal {
        tracing::info!(session = %live.id, "Renewing connection");

        let started = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            started = self.start() => Some(started),
        };
        let mut successor = match started {
            Some(Ok(successor)) => successor,
            Some(Err(e)) => return self.abandon(live, e.to_string()),
            None => {
                live.drain().await;
                return Renewal::Cancelled;
            }
        };

        let streaming = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            streaming = successor.streaming() => Some(streaming),
        };
        match streaming {
            Some(true) => {}
            Some(false) => {
                let failed = successor.id;
                successor.drain().await;
                return self.abandon(live, format!("{failed} closed before streaming"));
            }
            None => {
                successor.drain().await;
                live.drain().await;
                return Renewal::Cancelled;
            }
        }

        let predecessor = live.id;
        live.drain().await;
        self.backoff.reset();

        metrics::record_renewal(self.shared.exchange(), RenewalOutcome::Replaced);
        self.shared.context.diagnostics.emit(Diagnostic::Renewed {
            predecessor,
            successor: successor.id,
        });
        self.state.send_replace(SupervisorState::Streaming {
            session: successor.id,
        });
        Renewal::Replaced(successor)
    }

    fn abandon(&mut self, live: LiveSession, error: String) -> Renewal {
        metrics::record_renewal(self.shared.exchange(), RenewalOutcome::Abandoned);
        self.shared
            .context
            .diagnostics
            .emit(Diagnostic::RenewalAbandoned {
                retained: live.id,
                error,
            });
        let retry_in = self.backoff.next_delay();
        Renewal::Retained(live, retry_in)
    }

    fn report_ended(&self, session: SessionId, outcome: Result<Result<(), SessionError>, JoinError>) {
        match outcome {
            Ok(Ok(())) => tracing::debug!(%session, "Session ended"),
            Ok(Err(e)) => tracing::warn!(%session, error = %e, "Session ended, reconnecting"),
            Err(e) => {
                metrics::record_session_failure(self.shared.exchange(), "task");
                self.shared.context.diagnostics.emit(Diagnostic::SessionFailed {
                    session,
                    error: format!("session task failed: {e}"),
                });
            }
        }
    }
}
