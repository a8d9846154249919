//! Market Stream Binary
//!
//! Listens to one stream kind on one exchange and logs every normalized
//! event until interrupted.
//!
//! # Usage
//!
//! ```bash
//! MARKET_STREAM_KIND=trade MARKET_STREAM_SYMBOLS=BTC/USDT,ETH/USDT cargo run -p market-stream
//! ```
//!
//! # Environment Variables
//!
//! - `MARKET_STREAM_EXCHANGE`: Exchange profile (default: binance)
//! - `MARKET_STREAM_KIND`: tick | trade | agg_trade | candle:<interval> (default: tick)
//! - `MARKET_STREAM_SYMBOLS`: Comma-separated symbols (default: every tradable symbol)
//! - `MARKET_STREAM_METRICS_PORT`: Prometheus port, 0 disables (default: 0)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log level (default: info)
//!
//! See [`StreamSettings`] for the remaining keys.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use market_stream::infrastructure::binance;
use market_stream::infrastructure::websocket::TungsteniteTransport;
use market_stream::{
    ConnectionSupervisor, NormalizedEvent, StreamSettings, SupervisorConfig, Symbol,
    init_metrics, init_telemetry,
};
use tokio::signal;

/// Bound on waiting for the live session to drain.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let _telemetry_guard = init_telemetry().context("failed to initialize telemetry")?;

    tracing::info!("Starting Market Stream");

    let settings = StreamSettings::from_env()?;
    log_settings(&settings);

    if settings.metrics_port != 0 {
        let addr = init_metrics(settings.metrics_port).context("failed to start metrics exporter")?;
        tracing::info!(%addr, "Metrics listening");
    }

    let symbols = settings
        .symbols
        .as_deref()
        .map(|raw| raw.iter().map(|s| Symbol::parse(s)).collect::<Result<Vec<_>, _>>())
        .transpose()?;

    let supervisor = ConnectionSupervisor::new(
        binance::profile()?,
        Arc::new(TungsteniteTransport::default()),
        Arc::new(binance::RestSymbolSource::new()?),
        SupervisorConfig::from_stream_settings(&settings),
    );

    let handle = supervisor
        .listen(settings.stream_kind, symbols, log_event)
        .await?;

    tracing::info!(stream = %handle.stream_kind(), "Market stream ready");

    await_shutdown().await;

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, handle.cancel())
        .await
        .is_err()
    {
        tracing::warn!("Shutdown timed out");
    }

    tracing::info!("Market stream stopped");
    Ok(())
}

#[allow(clippy::unnecessary_wraps)]
fn log_event(event: NormalizedEvent) -> anyhow::Result<()> {
    tracing::info!(
        symbol = %event.symbol(),
        kind = %event.kind(),
        timestamp = event.timestamp(),
        payload = ?event.payload(),
        "Event"
    );
    Ok(())
}

/// Log the parsed configuration.
fn log_settings(settings: &StreamSettings) {
    tracing::info!(
        exchange = %settings.exchange,
        stream = %settings.stream_kind,
        symbols = settings.symbols.as_ref().map_or(0, Vec::len),
        metrics_port = settings.metrics_port,
        "Configuration loaded"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for SIGTERM or SIGINT.
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
