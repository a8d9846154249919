#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Market Stream - Exchange Websocket Client
//!
//! Listens to an exchange's public market streams and delivers every payload
//! as a [`NormalizedEvent`], keeping the connection alive across the
//! exchange's forced disconnects and transient failures.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Market types and exchange profiles
//!   - `market`: Symbols, stream kinds, canonical fields and events
//!   - `exchange`: Profiles, channel addressing, frame codec, normalization
//!   - `session`: Session identity and lifecycle states
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Websocket transport, symbol source, event handler
//!   - `services`: Symbol catalog, stream session, connection supervisor
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `binance`: Binance profile and REST symbol listing
//!   - `websocket`: tokio-tungstenite transport
//!   - `config`: Environment configuration
//!   - `metrics`, `telemetry`: Prometheus and tracing
//!
//! # Data Flow
//!
//! ```text
//!                    ┌────────────┐   frames   ┌──────────────┐   events
//! Exchange WS ──────►│  Session N │───────────►│  Normalizer  │──────────► EventHandler
//!                    └────────────┘            └──────────────┘
//!                          ▲ renew / reconnect
//!                    ┌─────┴──────┐
//!                    │ Supervisor │──► Diagnostics
//!                    └────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use market_stream::infrastructure::{binance, websocket::TungsteniteTransport};
//! use market_stream::{ConnectionSupervisor, StreamKind, SupervisorConfig};
//!
//! let supervisor = ConnectionSupervisor::new(
//!     binance::profile()?,
//!     Arc::new(TungsteniteTransport::default()),
//!     Arc::new(binance::RestSymbolSource::new()?),
//!     SupervisorConfig::default(),
//! );
//! let handle = supervisor
//!     .listen(StreamKind::Trade, None, |event| {
//!         println!("{event:?}");
//!         Ok(())
//!     })
//!     .await?;
//! // ...
//! handle.cancel().await;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Market types and exchange profiles with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::exchange::{
    AddressingError, ExchangeProfile, ExchangeProfileBuilder, FieldMap, NormalizeError,
    PayloadNormalizer, ProfileError, StreamAddress, SubscribeMode, SymbolCase,
};
pub use domain::market::{
    AggTradeFields, CandleFields, CandleInterval, CanonicalField, EventPayload, InvalidSymbol,
    NormalizedEvent, StreamKind, StreamKindTag, Symbol, TickFields, TradeFields,
    UnknownStreamKind,
};
pub use domain::session::{SessionId, SessionState};

// Ports
pub use application::ports::{
    CatalogError, Connection, EventHandler, StaticSymbolSource, SymbolSource, Transport,
    TransportError,
};

// Services
pub use application::services::{
    BackoffConfig, ConnectionSupervisor, Diagnostic, ListenError, ListenHandle, SessionConfig,
    SessionError, SupervisorConfig, SupervisorState, SymbolCatalog,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, StreamSettings};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
