//! Websocket Transport
//!
//! [`Transport`](crate::application::ports::Transport) implementation over
//! `tokio-tungstenite` with rustls.

pub mod transport;

pub use transport::{TungsteniteConnection, TungsteniteTransport};
