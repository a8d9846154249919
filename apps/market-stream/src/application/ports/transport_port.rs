//! Transport Port (Driven Port)
//!
//! Message-oriented websocket connection. Frames are opaque bytes; decoding
//! is the session's job.

use async_trait::async_trait;

/// Transport failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Could not open the connection.
    #[error("connect failed: {message}")]
    Connect {
        /// Error details.
        message: String,
    },

    /// Could not send a frame.
    #[error("send failed: {message}")]
    Send {
        /// Error details.
        message: String,
    },

    /// Reading from the connection failed.
    #[error("receive failed: {message}")]
    Receive {
        /// Error details.
        message: String,
    },
}

/// Factory for websocket connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection to `url`.
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError>;
}

/// One open connection.
#[async_trait]
pub trait Connection: Send {
    /// Send one frame.
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Next data frame, or `None` once the peer has closed.
    ///
    /// Protocol-level control frames (ping, pong) are handled by the
    /// transport and never surface here.
    async fn receive(&mut self) -> Result<Option<Vec<u8>>, TransportError>;

    /// Close the connection. Best effort; closing twice is harmless.
    async fn close(&mut self);
}
