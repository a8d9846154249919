//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `SymbolCatalog`: Tradable symbols of one exchange
//! - `StreamSession`: One websocket connection, from connect to close
//! - `ConnectionSupervisor`: Renewal, reconnection and cancellation
//! - `BackoffPolicy`: Retry delays
//! - `DiagnosticsHub`: Broadcast of non-fatal problems and lifecycle events

pub mod backoff;
pub mod catalog;
pub mod diagnostics;
pub mod session;
pub mod supervisor;

pub use backoff::{BackoffConfig, BackoffPolicy};
pub use catalog::SymbolCatalog;
pub use diagnostics::{Diagnostic, DiagnosticsHub};
pub use session::{
    DataSeen, SessionConfig, SessionContext, SessionError, SessionFailure, StreamSession,
    SubscribeError,
};
pub use supervisor::{
    ConnectionSupervisor, ListenError, ListenHandle, SupervisorConfig, SupervisorState,
};
