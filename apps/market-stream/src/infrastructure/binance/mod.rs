//! Binance Spot Profile
//!
//! Endpoint layout, channel names and payload field maps for Binance's
//! public spot market streams.
//!
//! # Stream URLs
//!
//! - Combined: `wss://stream.binance.com:9443/stream?streams=btcusdt@trade/ethusdt@trade`
//! - Raw: `wss://stream.binance.com:9443/ws` followed by a `SUBSCRIBE` request
//!
//! Binance disconnects every connection after 24 hours and caps one
//! connection at 1024 streams.

pub mod catalog;

use std::time::Duration;

use crate::domain::exchange::{ExchangeProfile, FieldMap, ProfileError, SubscribeMode};
use crate::domain::market::{CanonicalField as F, StreamKindTag};

pub use catalog::RestSymbolSource;

/// Exchange name.
pub const EXCHANGE: &str = "binance";

/// Public market stream base.
pub const STREAM_BASE: &str = "wss://stream.binance.com:9443";

/// Spot exchange information endpoint.
pub const EXCHANGE_INFO_URL: &str = "https://api.binance.com/api/v3/exchangeInfo";

/// Forced disconnect interval.
pub const CONNECTION_CEILING: Duration = Duration::from_secs(24 * 60 * 60);

/// Streams allowed on one connection.
pub const MAX_STREAMS: usize = 1024;

/// Profile that lists channels in the connection URL.
///
/// # Errors
///
/// Never fails for the built-in tables; the `Result` comes from profile
/// validation.
pub fn profile() -> Result<ExchangeProfile, ProfileError> {
    profile_with_mode(SubscribeMode::Combined)
}

/// Profile using the given subscribe mode.
///
/// # Errors
///
/// See [`profile`].
pub fn profile_with_mode(mode: SubscribeMode) -> Result<ExchangeProfile, ProfileError> {
    ExchangeProfile::builder(EXCHANGE, STREAM_BASE)
        .combined_path("/stream?streams=", "/")
        .raw_path("/ws")
        .mode(mode)
        .connection_ceiling(CONNECTION_CEILING)
        .max_channels(MAX_STREAMS)
        .channel(StreamKindTag::Tick, "<symbol>@ticker", Some("!ticker@arr"))
        .field_map(
            StreamKindTag::Tick,
            FieldMap::new([
                ("E", F::Timestamp),
                ("s", F::Symbol),
                ("b", F::Bid),
                ("a", F::Ask),
            ]),
        )
        .channel(StreamKindTag::Trade, "<symbol>@trade", None)
        .field_map(
            StreamKindTag::Trade,
            FieldMap::new([
                ("E", F::Timestamp),
                ("s", F::Symbol),
                ("t", F::TradeId),
                ("p", F::Price),
                ("q", F::Quantity),
                ("T", F::TradeTime),
                ("m", F::MarketMaker),
            ]),
        )
        .channel(StreamKindTag::AggTrade, "<symbol>@aggTrade", None)
        .field_map(
            StreamKindTag::AggTrade,
            FieldMap::new([
                ("E", F::Timestamp),
                ("s", F::Symbol),
                ("a", F::AggTradeId),
                ("p", F::Price),
                ("q", F::Quantity),
                ("f", F::FirstTradeId),
                ("l", F::LastTradeId),
                ("T", F::TradeTime),
                ("m", F::MarketMaker),
            ]),
        )
        .channel(StreamKindTag::Candle, "<symbol>@kline_<interval>", None)
        .field_map(
            StreamKindTag::Candle,
            FieldMap::new([
                ("E", F::Timestamp),
                ("s", F::Symbol),
                ("k.t", F::OpenTime),
                ("k.T", F::CloseTime),
                ("k.o", F::Open),
                ("k.h", F::High),
                ("k.l", F::Low),
                ("k.c", F::Close),
                ("k.v", F::Volume),
                ("k.n", F::TradeCount),
                ("k.x", F::Closed),
            ]),
        )
        .build()
}
