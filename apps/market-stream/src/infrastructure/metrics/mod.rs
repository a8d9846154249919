//! Prometheus Metrics Module
//!
//! Exposes stream metrics in Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames and events**: frames received, events delivered, payloads rejected
//! - **Sessions**: live sessions, session failures, reconnects, renewals
//! - **Latency**: payload normalization time
//!
//! # Integration
//!
//! Metrics are served at `/metrics` by the exporter's own listener when a
//! metrics port is configured. Without a recorder every call is a no-op.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::domain::market::StreamKindTag;

// =============================================================================
// Exporter Installation
// =============================================================================

static INSTALLED: OnceLock<SocketAddr> = OnceLock::new();

/// Install the Prometheus recorder and start its HTTP listener on `port`.
///
/// Later calls return the address of the first installation.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed or the listener
/// cannot bind. Must be called inside a Tokio runtime.
pub fn init_metrics(port: u16) -> Result<SocketAddr, BuildError> {
    if let Some(addr) = INSTALLED.get() {
        return Ok(*addr);
    }

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    register_metrics();
    Ok(*INSTALLED.get_or_init(|| addr))
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "market_stream_frames_received_total",
        "Total websocket frames received"
    );
    describe_counter!(
        "market_stream_events_delivered_total",
        "Total normalized events handed to the event handler"
    );
    describe_counter!(
        "market_stream_payloads_rejected_total",
        "Total payloads that failed normalization"
    );
    describe_counter!(
        "market_stream_handler_failures_total",
        "Total event handler errors and panics"
    );

    describe_gauge!(
        "market_stream_live_sessions",
        "Number of sessions currently streaming"
    );
    describe_counter!(
        "market_stream_session_failures_total",
        "Total sessions that ended in failure, by reason"
    );
    describe_counter!(
        "market_stream_reconnects_total",
        "Total reconnection attempts"
    );
    describe_counter!(
        "market_stream_renewals_total",
        "Total proactive connection renewals, by outcome"
    );

    describe_histogram!(
        "market_stream_normalize_seconds",
        "Time to normalize one payload"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for renewals.
#[derive(Debug, Clone, Copy)]
pub enum RenewalOutcome {
    /// Successor took over.
    Replaced,
    /// Successor failed; predecessor kept.
    Abandoned,
}

impl RenewalOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Replaced => "replaced",
            Self::Abandoned => "abandoned",
        }
    }
}

/// Record a frame received from the exchange.
pub fn record_frame_received(exchange: &str) {
    counter!(
        "market_stream_frames_received_total",
        "exchange" => exchange.to_string()
    )
    .increment(1);
}

/// Record an event delivered to the handler.
pub fn record_event_delivered(exchange: &str, kind: StreamKindTag) {
    counter!(
        "market_stream_events_delivered_total",
        "exchange" => exchange.to_string(),
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a payload that failed normalization.
pub fn record_payload_rejected(exchange: &str, kind: StreamKindTag) {
    counter!(
        "market_stream_payloads_rejected_total",
        "exchange" => exchange.to_string(),
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Record a handler error or panic.
pub fn record_handler_failure(exchange: &str) {
    counter!(
        "market_stream_handler_failures_total",
        "exchange" => exchange.to_string()
    )
    .increment(1);
}

/// Adjust the live session gauge by `delta`.
pub fn adjust_live_sessions(exchange: &str, delta: f64) {
    gauge!(
        "market_stream_live_sessions",
        "exchange" => exchange.to_string()
    )
    .increment(delta);
}

/// Record a failed session.
pub fn record_session_failure(exchange: &str, reason: &'static str) {
    counter!(
        "market_stream_session_failures_total",
        "exchange" => exchange.to_string(),
        "reason" => reason
    )
    .increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect(exchange: &str) {
    counter!(
        "market_stream_reconnects_total",
        "exchange" => exchange.to_string()
    )
    .increment(1);
}

/// Record a renewal.
pub fn record_renewal(exchange: &str, outcome: RenewalOutcome) {
    counter!(
        "market_stream_renewals_total",
        "exchange" => exchange.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record payload normalization duration.
pub fn record_normalize_duration(exchange: &str, duration: Duration) {
    histogram!(
        "market_stream_normalize_seconds",
        "exchange" => exchange.to_string()
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renewal_outcome_as_str() {
        assert_eq!(RenewalOutcome::Replaced.as_str(), "replaced");
        assert_eq!(RenewalOutcome::Abandoned.as_str(), "abandoned");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_frame_received("binance");
        record_event_delivered("binance", StreamKindTag::Trade);
        adjust_live_sessions("binance", 1.0);
        adjust_live_sessions("binance", -1.0);
        record_normalize_duration("binance", Duration::from_micros(5));
    }
}
