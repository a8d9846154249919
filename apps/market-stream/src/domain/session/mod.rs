//! Session Lifecycle
//!
//! States a single websocket session moves through and the transitions
//! allowed between them.
//!
//! ```text
//! Connecting ──► Subscribed ──► Streaming ──► Draining ──► Closed
//!     │              │              │                        ▲
//!     └──────────────┴──────────────┴────────────────────────┘
//! ```
//!
//! Any non-terminal state may jump straight to `Closed` on failure.
//! `Closed` is terminal.

use std::fmt;

/// Identifier of a session, assigned sequentially by its supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Opening the network connection.
    Connecting,
    /// Connected and subscribed; nothing delivered yet.
    Subscribed,
    /// Delivering events to the handler.
    Streaming,
    /// Stopped reading; closing the connection.
    Draining,
    /// Connection released. Terminal.
    Closed,
}

/// Rejected state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid session transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    /// State the session was in.
    pub from: SessionState,
    /// State that was requested.
    pub to: SessionState,
}

impl SessionState {
    /// Whether the session can no longer change state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Validate a transition to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] when `next` does not follow `self`.
    pub const fn transition(self, next: Self) -> Result<Self, InvalidTransition> {
        let allowed = matches!(
            (self, next),
            (Self::Connecting, Self::Subscribed)
                | (Self::Subscribed, Self::Streaming)
                | (Self::Streaming, Self::Draining)
                | (
                    Self::Connecting | Self::Subscribed | Self::Streaming | Self::Draining,
                    Self::Closed
                )
        );

        if allowed {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Streaming => "streaming",
            Self::Draining => "draining",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
