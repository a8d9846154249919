//! Stream Configuration Settings
//!
//! Settings for the stream client, loaded from environment variables.
//! Every key is optional and falls back to a default.

use std::time::Duration;

use crate::domain::market::StreamKind;

/// Exchanges with a built-in profile.
pub const SUPPORTED_EXCHANGES: &[&str] = &["binance"];

/// Complete stream configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    /// Exchange profile to use.
    pub exchange: String,
    /// Stream kind the binary listens to.
    pub stream_kind: StreamKind,
    /// Native symbols to listen to; `None` means every tradable symbol.
    pub symbols: Option<Vec<String>>,
    /// Proactive renewal interval; `None` means half the connection ceiling.
    pub renewal_interval: Option<Duration>,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Reconnection jitter as a fraction of the delay.
    pub reconnect_jitter: f64,
    /// How long to wait for a subscribe acknowledgement.
    pub subscribe_timeout: Duration,
    /// Silence after which a session is considered dead (`None` = never).
    pub idle_timeout: Option<Duration>,
    /// Consecutive undecodable frames that fail a session (0 = unlimited).
    pub max_decode_failures: u32,
    /// Diagnostics channel capacity.
    pub diagnostics_capacity: usize,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            exchange: "binance".to_string(),
            stream_kind: StreamKind::Tick,
            symbols: None,
            renewal_interval: None,
            reconnect_delay_initial: Duration::from_millis(1000),
            reconnect_delay_max: Duration::from_secs(60),
            reconnect_delay_multiplier: 2.0,
            reconnect_jitter: 0.1,
            subscribe_timeout: Duration::from_secs(10),
            idle_timeout: Some(Duration::from_secs(300)),
            max_decode_failures: 50,
            diagnostics_capacity: 1024,
            metrics_port: 0,
        }
    }
}

impl StreamSettings {
    /// Create settings from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange is unsupported, the stream kind does
    /// not parse, or the symbol list is set but empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create settings from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`StreamSettings::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);
        let defaults = Self::default();

        let exchange = env
            .get("MARKET_STREAM_EXCHANGE")
            .map_or(defaults.exchange, |s| s.trim().to_lowercase());
        if !SUPPORTED_EXCHANGES.contains(&exchange.as_str()) {
            return Err(ConfigError::UnsupportedExchange(exchange));
        }

        let stream_kind = match env.get("MARKET_STREAM_KIND") {
            Some(raw) => raw.parse().map_err(|e| ConfigError::InvalidValue {
                key: "MARKET_STREAM_KIND".to_string(),
                reason: format!("{e}"),
            })?,
            None => defaults.stream_kind,
        };

        let symbols = match env.get("MARKET_STREAM_SYMBOLS") {
            Some(raw) => {
                let list: Vec<String> = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                if list.is_empty() {
                    return Err(ConfigError::EmptyValue("MARKET_STREAM_SYMBOLS".to_string()));
                }
                Some(list)
            }
            None => None,
        };

        let renewal_interval = env
            .parse::<u64>("MARKET_STREAM_RENEWAL_INTERVAL_SECS")
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let idle_timeout = match env.parse::<u64>("MARKET_STREAM_IDLE_TIMEOUT_SECS") {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.idle_timeout,
        };

        Ok(Self {
            exchange,
            stream_kind,
            symbols,
            renewal_interval,
            reconnect_delay_initial: env
                .parse("MARKET_STREAM_RECONNECT_DELAY_INITIAL_MS")
                .map_or(defaults.reconnect_delay_initial, Duration::from_millis),
            reconnect_delay_max: env
                .parse("MARKET_STREAM_RECONNECT_DELAY_MAX_SECS")
                .map_or(defaults.reconnect_delay_max, Duration::from_secs),
            reconnect_delay_multiplier: env
                .parse("MARKET_STREAM_RECONNECT_DELAY_MULTIPLIER")
                .unwrap_or(defaults.reconnect_delay_multiplier),
            reconnect_jitter: env
                .parse("MARKET_STREAM_RECONNECT_JITTER")
                .unwrap_or(defaults.reconnect_jitter),
            subscribe_timeout: env
                .parse("MARKET_STREAM_SUBSCRIBE_TIMEOUT_SECS")
                .map_or(defaults.subscribe_timeout, Duration::from_secs),
            idle_timeout,
            max_decode_failures: env
                .parse("MARKET_STREAM_MAX_DECODE_FAILURES")
                .unwrap_or(defaults.max_decode_failures),
            diagnostics_capacity: env
                .parse("MARKET_STREAM_DIAGNOSTICS_CAPACITY")
                .unwrap_or(defaults.diagnostics_capacity),
            metrics_port: env
                .parse("MARKET_STREAM_METRICS_PORT")
                .unwrap_or(defaults.metrics_port),
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No profile exists for the exchange.
    #[error("unsupported exchange: {0}")]
    UnsupportedExchange(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable does not parse.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Parse failure.
        reason: String,
    },
}

struct Env<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    /// Unparseable values fall back to the default, like unset ones.
    fn parse<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.trim().parse().ok())
    }
}
