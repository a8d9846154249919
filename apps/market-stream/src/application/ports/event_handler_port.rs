//! Event Handler Port (Driver Port)
//!
//! Caller-supplied consumer of normalized events.

use crate::domain::market::NormalizedEvent;

/// Receives every event of a listening stream, in arrival order.
///
/// Invoked from the session task; a slow handler delays subsequent events
/// of the same session. Errors and panics are reported as diagnostics and
/// never stop the stream.
pub trait EventHandler: Send + Sync + 'static {
    /// Handle one event.
    ///
    /// # Errors
    ///
    /// Any error is logged and reported; the next event is still delivered.
    fn on_event(&self, event: NormalizedEvent) -> anyhow::Result<()>;
}

impl<F> EventHandler for F
where
    F: Fn(NormalizedEvent) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn on_event(&self, event: NormalizedEvent) -> anyhow::Result<()> {
        self(event)
    }
}
