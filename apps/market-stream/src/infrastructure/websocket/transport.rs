//! Tungstenite Transport
//!
//! Opens TLS websocket connections and exposes text and binary frames as
//! bytes. Ping replies are queued by tungstenite itself while reading.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::{Connection, Transport, TransportError};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Websocket connection factory.
#[derive(Debug, Clone)]
pub struct TungsteniteTransport {
    connect_timeout: Duration,
}

impl Default for TungsteniteTransport {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl TungsteniteTransport {
    /// Create a transport; connection attempts give up after `connect_timeout`.
    ///
    /// Installs the ring crypto provider as the process default unless one
    /// is already installed.
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        let _ = rustls::crypto::ring::default_provider().install_default();
        Self { connect_timeout }
    }
}

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError> {
        let connect_failed = |message: String| TransportError::Connect { message };

        let (stream, response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(url))
                .await
                .map_err(|_| connect_failed(format!("timed out after {:?}", self.connect_timeout)))?
                .map_err(|e| connect_failed(e.to_string()))?;

        tracing::debug!(status = %response.status(), "Websocket connected");
        Ok(Box::new(TungsteniteConnection { stream }))
    }
}

/// One open websocket.
#[derive(Debug)]
pub struct TungsteniteConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for TungsteniteConnection {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        let message = match String::from_utf8(frame) {
            Ok(text) => Message::text(text),
            Err(e) => Message::binary(e.into_bytes()),
        };
        self.stream
            .send(message)
            .await
            .map_err(|e| TransportError::Send {
                message: e.to_string(),
            })
    }

    async fn receive(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.as_str().as_bytes().to_vec())),
                Some(Ok(Message::Binary(data))) => return Ok(Some(data.to_vec())),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(frame = ?frame, "Close frame received");
                    return Ok(None);
                }
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                    return Ok(None);
                }
                Some(Err(e)) => {
                    return Err(TransportError::Receive {
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::trace!(error = %e, "Close handshake failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refused_connection_is_connect_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = TungsteniteTransport::new(Duration::from_secs(2));
        let err = transport
            .connect(&format!("ws://{addr}/ws"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::Connect { .. }));
    }

    #[tokio::test]
    async fn invalid_url_is_connect_error() {
        let err = TungsteniteTransport::default()
            .connect("not a url")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::Connect { .. }));
    }
}
