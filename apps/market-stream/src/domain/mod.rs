//! Domain Layer - Market types, exchange profiles and session lifecycle.
//!
//! Pure types and logic with no I/O. Exchange specifics are data held by
//! [`exchange::ExchangeProfile`].

/// Symbols, stream kinds and normalized events.
pub mod market;

/// Exchange profiles, channel addressing and payload normalization.
pub mod exchange;

/// Session states and transitions.
pub mod session;
