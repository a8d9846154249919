//! Diagnostics Hub
//!
//! Broadcast channel of structured lifecycle and data-quality events.
//! Every diagnostic is also logged, so subscribing is optional.
//!
//! Receivers that fall behind lose the oldest entries (`RecvError::Lagged`);
//! emitting never blocks a session.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::domain::exchange::NormalizeError;
use crate::domain::session::{SessionId, SessionState};

/// Default channel capacity.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Observable stream event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A session entered a new state.
    SessionState {
        /// Session.
        session: SessionId,
        /// State entered.
        state: SessionState,
    },
    /// A session ended abnormally or failed to open.
    SessionFailed {
        /// Session.
        session: SessionId,
        /// Failure description.
        error: String,
    },
    /// A payload could not be normalized and was skipped.
    PayloadRejected {
        /// Session.
        session: SessionId,
        /// Normalization failure.
        error: NormalizeError,
    },
    /// A frame could not be decoded and was skipped.
    FrameUndecodable {
        /// Session.
        session: SessionId,
        /// Decode failure.
        error: String,
    },
    /// The event handler returned an error or panicked.
    HandlerFailed {
        /// Session.
        session: SessionId,
        /// Error or panic message.
        error: String,
    },
    /// A reconnection attempt is scheduled.
    Reconnecting {
        /// Consecutive attempt number, starting at 1.
        attempt: u32,
        /// Wait before the attempt.
        delay: Duration,
    },
    /// A renewal completed.
    Renewed {
        /// Session that was drained.
        predecessor: SessionId,
        /// Session now streaming.
        successor: SessionId,
    },
    /// A renewal failed; the current session stays live.
    RenewalAbandoned {
        /// Session kept streaming.
        retained: SessionId,
        /// Failure description.
        error: String,
    },
}

/// Fan-out of [`Diagnostic`]s to any number of subscribers.
#[derive(Debug, Clone)]
pub struct DiagnosticsHub {
    tx: broadcast::Sender<Diagnostic>,
}

impl Default for DiagnosticsHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl DiagnosticsHub {
    /// Create a hub buffering up to `capacity` diagnostics per receiver.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(capacity.max(1)).0,
        }
    }

    /// Get a new receiver. Sees only diagnostics emitted after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Diagnostic> {
        self.tx.subscribe()
    }

    /// Number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Log and publish a diagnostic.
    pub fn emit(&self, diagnostic: Diagnostic) {
        log(&diagnostic);
        // No receivers is fine.
        let _ = self.tx.send(diagnostic);
    }
}

fn log(diagnostic: &Diagnostic) {
    match diagnostic {
        Diagnostic::SessionState { session, state } => {
            tracing::debug!(%session, %state, "Session state changed");
        }
        Diagnostic::SessionFailed { session, error } => {
            tracing::warn!(%session, error = %error, "Session failed");
        }
        Diagnostic::PayloadRejected { session, error } => {
            tracing::warn!(%session, error = %error, "Payload rejected");
        }
        Diagnostic::FrameUndecodable { session, error } => {
            tracing::warn!(%session, error = %error, "Undecodable frame skipped");
        }
        Diagnostic::HandlerFailed { session, error } => {
            tracing::error!(%session, error = %error, "Event handler failed");
        }
        Diagnostic::Reconnecting { attempt, delay } => {
            tracing::info!(attempt, delay_ms = delay.as_millis(), "Reconnecting");
        }
        Diagnostic::Renewed {
            predecessor,
            successor,
        } => {
            tracing::info!(%predecessor, %successor, "Connection renewed");
        }
        Diagnostic::RenewalAbandoned { retained, error } => {
            tracing::warn!(%retained, error = %error, "Renewal abandoned, keeping current session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_in_order() {
        let hub = DiagnosticsHub::new(8);
        let mut rx = hub.subscribe();

        hub.emit(Diagnostic::Reconnecting {
            attempt: 1,
            delay: Duration::from_millis(10),
        });
        hub.emit(Diagnostic::SessionState {
            session: SessionId::new(1),
            state: SessionState::Streaming,
        });

        assert!(matches!(rx.recv().await.unwrap(), Diagnostic::Reconnecting { attempt: 1, .. }));
        assert!(matches!(
            rx.recv().await.unwrap(),
            Diagnostic::SessionState {
                state: SessionState::Streaming,
                ..
            }
        ));
    }

    #[test]
    fn emit_without_receivers_does_not_fail() {
        let hub = DiagnosticsHub::default();
        assert_eq!(hub.receiver_count(), 0);
        hub.emit(Diagnostic::HandlerFailed {
            session: SessionId::new(1),
            error: "boom".to_string(),
        });
    }

    #[tokio::test]
    async fn slow_receiver_lags() {
        let hub = DiagnosticsHub::new(2);
        let mut rx = hub.subscribe();
        for attempt in 1..=3 {
            hub.emit(Diagnostic::Reconnecting {
                attempt,
                delay: Duration::ZERO,
            });
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(1))
        ));
    }
}
