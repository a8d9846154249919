//! Application Ports (Driver and Driven)
//!
//! Ports define the seams between stream orchestration and the outside world.
//! - **Driven Ports** (Secondary/Outbound): the websocket transport and the
//!   exchange's symbol listing
//! - **Driver Ports** (Primary/Inbound): the caller's event handler

mod event_handler_port;
mod symbol_source_port;
mod transport_port;

pub use event_handler_port::EventHandler;
#[cfg(test)]
pub use symbol_source_port::MockSymbolSource;
pub use symbol_source_port::{CatalogError, StaticSymbolSource, SymbolSource};
pub use transport_port::{Connection, Transport, TransportError};
