//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (websocket transport, symbol source, event handler).
pub mod ports;

/// Application services for sessions, supervision and the symbol catalog.
pub mod services;
