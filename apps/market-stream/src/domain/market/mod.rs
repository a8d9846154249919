//! Market Data Types
//!
//! Exchange-neutral identifiers and the canonical event shape delivered to
//! callers. Nothing here knows about wire formats; exchange-specific field
//! names live in the exchange profile's field maps.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Symbol
// =============================================================================

/// Error produced when a native pair notation has no usable characters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid symbol: {0:?}")]
pub struct InvalidSymbol(pub String);

/// Exchange-neutral trading pair identifier.
///
/// Canonical form is the lowercase concatenation of base and quote with any
/// separator removed, so `BTC/ETH`, `btc-eth` and `BTCETH` are the same symbol.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Canonicalise a native pair notation.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidSymbol`] if nothing alphanumeric remains.
    pub fn parse(native: &str) -> Result<Self, InvalidSymbol> {
        let canonical: String = native
            .chars()
            .filter(|c| c.is_alphanumeric())
            .flat_map(char::to_lowercase)
            .collect();

        if canonical.is_empty() {
            return Err(InvalidSymbol(native.to_string()));
        }
        Ok(Self(canonical))
    }

    /// Canonical lowercase form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Symbol {
    type Err = InvalidSymbol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// =============================================================================
// Candle Interval
// =============================================================================

/// Candle (kline) interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandleInterval {
    /// One second.
    #[serde(rename = "1s")]
    OneSecond,
    /// One minute.
    #[serde(rename = "1m")]
    OneMinute,
    /// Three minutes.
    #[serde(rename = "3m")]
    ThreeMinutes,
    /// Five minutes.
    #[serde(rename = "5m")]
    FiveMinutes,
    /// Fifteen minutes.
    #[serde(rename = "15m")]
    FifteenMinutes,
    /// Thirty minutes.
    #[serde(rename = "30m")]
    ThirtyMinutes,
    /// One hour.
    #[serde(rename = "1h")]
    OneHour,
    /// Two hours.
    #[serde(rename = "2h")]
    TwoHours,
    /// Four hours.
    #[serde(rename = "4h")]
    FourHours,
    /// Six hours.
    #[serde(rename = "6h")]
    SixHours,
    /// Eight hours.
    #[serde(rename = "8h")]
    EightHours,
    /// Twelve hours.
    #[serde(rename = "12h")]
    TwelveHours,
    /// One day.
    #[serde(rename = "1d")]
    OneDay,
    /// Three days.
    #[serde(rename = "3d")]
    ThreeDays,
    /// One week.
    #[serde(rename = "1w")]
    OneWeek,
    /// One month.
    #[serde(rename = "1M")]
    OneMonth,
}

impl CandleInterval {
    /// Every supported interval, shortest first.
    pub const ALL: [Self; 16] = [
        Self::OneSecond,
        Self::OneMinute,
        Self::ThreeMinutes,
        Self::FiveMinutes,
        Self::FifteenMinutes,
        Self::ThirtyMinutes,
        Self::OneHour,
        Self::TwoHours,
        Self::FourHours,
        Self::SixHours,
        Self::EightHours,
        Self::TwelveHours,
        Self::OneDay,
        Self::ThreeDays,
        Self::OneWeek,
        Self::OneMonth,
    ];

    /// Interval token as used in channel names (`1m`, `4h`, `1M`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OneSecond => "1s",
            Self::OneMinute => "1m",
            Self::ThreeMinutes => "3m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::TwoHours => "2h",
            Self::FourHours => "4h",
            Self::SixHours => "6h",
            Self::EightHours => "8h",
            Self::TwelveHours => "12h",
            Self::OneDay => "1d",
            Self::ThreeDays => "3d",
            Self::OneWeek => "1w",
            Self::OneMonth => "1M",
        }
    }
}

impl fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CandleInterval {
    type Err = UnknownStreamKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Case matters: `1m` is a minute, `1M` a month.
        Self::ALL
            .into_iter()
            .find(|interval| interval.as_str() == s)
            .ok_or_else(|| UnknownStreamKind(format!("candle interval {s:?}")))
    }
}

// =============================================================================
// Stream Kind
// =============================================================================

/// Error for a stream kind spelling that is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown stream kind: {0}")]
pub struct UnknownStreamKind(pub String);

/// Category of market event being subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Best bid/ask ticks.
    Tick,
    /// Individual trade prints.
    Trade,
    /// Trades aggregated by price and taker side.
    AggTrade,
    /// OHLCV candles of the given interval.
    Candle(CandleInterval),
}

impl StreamKind {
    /// Kind without its parameters, used as a lookup key in exchange profiles.
    #[must_use]
    pub const fn tag(&self) -> StreamKindTag {
        match self {
            Self::Tick => StreamKindTag::Tick,
            Self::Trade => StreamKindTag::Trade,
            Self::AggTrade => StreamKindTag::AggTrade,
            Self::Candle(_) => StreamKindTag::Candle,
        }
    }

    /// Candle interval, if this is a candle stream.
    #[must_use]
    pub const fn interval(&self) -> Option<CandleInterval> {
        match self {
            Self::Candle(interval) => Some(*interval),
            _ => None,
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Candle(interval) => write!(f, "candle:{interval}"),
            other => f.write_str(other.tag().as_str()),
        }
    }
}

impl FromStr for StreamKind {
    type Err = UnknownStreamKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(interval) = trimmed
            .strip_prefix("candle:")
            .or_else(|| trimmed.strip_prefix("kline_"))
        {
            return interval.parse().map(Self::Candle);
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "tick" | "ticker" => Ok(Self::Tick),
            "trade" => Ok(Self::Trade),
            "agg_trade" | "aggtrade" => Ok(Self::AggTrade),
            _ => Err(UnknownStreamKind(trimmed.to_string())),
        }
    }
}

/// Parameter-free stream kind discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StreamKindTag {
    /// Tick stream.
    Tick,
    /// Trade stream.
    Trade,
    /// Aggregate trade stream.
    AggTrade,
    /// Candle stream (any interval).
    Candle,
}

impl StreamKindTag {
    /// All tags.
    pub const ALL: [Self; 4] = [Self::Tick, Self::Trade, Self::AggTrade, Self::Candle];

    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tick => "tick",
            Self::Trade => "trade",
            Self::AggTrade => "agg_trade",
            Self::Candle => "candle",
        }
    }

    /// Canonical fields every event of this kind must carry.
    #[must_use]
    pub const fn required_fields(self) -> &'static [CanonicalField] {
        use CanonicalField as F;
        match self {
            Self::Tick => &[F::Timestamp, F::Symbol, F::Bid, F::Ask],
            Self::Trade => &[
                F::Timestamp,
                F::Symbol,
                F::TradeId,
                F::Price,
                F::Quantity,
                F::TradeTime,
                F::MarketMaker,
            ],
            Self::AggTrade => &[
                F::Timestamp,
                F::Symbol,
                F::AggTradeId,
                F::Price,
                F::Quantity,
                F::FirstTradeId,
                F::LastTradeId,
                F::TradeTime,
                F::MarketMaker,
            ],
            Self::Candle => &[
                F::Timestamp,
                F::Symbol,
                F::OpenTime,
                F::CloseTime,
                F::Open,
                F::High,
                F::Low,
                F::Close,
                F::Volume,
                F::TradeCount,
                F::Closed,
            ],
        }
    }

    /// Epoch field `datetime` is derived from.
    #[must_use]
    pub const fn datetime_anchor(self) -> CanonicalField {
        match self {
            Self::Tick => CanonicalField::Timestamp,
            Self::Trade | Self::AggTrade => CanonicalField::TradeTime,
            Self::Candle => CanonicalField::OpenTime,
        }
    }
}

impl fmt::Display for StreamKindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical field names that wire keys are mapped onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum CanonicalField {
    Timestamp,
    Symbol,
    Bid,
    Ask,
    TradeId,
    Price,
    Quantity,
    TradeTime,
    MarketMaker,
    AggTradeId,
    FirstTradeId,
    LastTradeId,
    OpenTime,
    CloseTime,
    Open,
    High,
    Low,
    Close,
    Volume,
    TradeCount,
    Closed,
}

impl CanonicalField {
    /// Snake-case name of the field on [`NormalizedEvent`].
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timestamp => "timestamp",
            Self::Symbol => "symbol",
            Self::Bid => "bid",
            Self::Ask => "ask",
            Self::TradeId => "trade_id",
            Self::Price => "price",
            Self::Quantity => "quantity",
            Self::TradeTime => "trade_time",
            Self::MarketMaker => "market_maker",
            Self::AggTradeId => "agg_trade_id",
            Self::FirstTradeId => "first_trade_id",
            Self::LastTradeId => "last_trade_id",
            Self::OpenTime => "open_time",
            Self::CloseTime => "close_time",
            Self::Open => "open",
            Self::High => "high",
            Self::Low => "low",
            Self::Close => "close",
            Self::Volume => "volume",
            Self::TradeCount => "trade_count",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Normalized Events
// =============================================================================

/// Best bid/ask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickFields {
    /// Best bid price.
    pub bid: Decimal,
    /// Best ask price.
    pub ask: Decimal,
}

/// A single trade print.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradeFields {
    /// Exchange trade identifier.
    pub trade_id: u64,
    /// Execution price.
    pub price: Decimal,
    /// Executed quantity.
    pub quantity: Decimal,
    /// Execution time, epoch milliseconds.
    pub trade_time: i64,
    /// Whether the buyer was the maker.
    pub market_maker: bool,
}

/// Trades aggregated at one price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggTradeFields {
    /// Aggregate trade identifier.
    pub agg_trade_id: u64,
    /// Execution price.
    pub price: Decimal,
    /// Aggregated quantity.
    pub quantity: Decimal,
    /// First underlying trade id.
    pub first_trade_id: u64,
    /// Last underlying trade id.
    pub last_trade_id: u64,
    /// Time of the last underlying trade, epoch milliseconds.
    pub trade_time: i64,
    /// Whether the buyer was the maker.
    pub market_maker: bool,
}

/// OHLCV candle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandleFields {
    /// Candle interval.
    pub interval: CandleInterval,
    /// Candle open time, epoch milliseconds.
    pub open_time: i64,
    /// Candle close time, epoch milliseconds.
    pub close_time: i64,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
    /// Base asset volume.
    pub volume: Decimal,
    /// Number of trades.
    pub trade_count: u64,
    /// Whether the candle is final.
    pub closed: bool,
}

/// Kind-specific part of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum EventPayload {
    Tick(TickFields),
    Trade(TradeFields),
    AggTrade(AggTradeFields),
    Candle(CandleFields),
}

/// Canonical market event.
///
/// Built only by the payload normalizer, so `datetime` always agrees with the
/// epoch field it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedEvent {
    exchange: String,
    symbol: String,
    timestamp: i64,
    datetime: DateTime<Utc>,
    #[serde(flatten)]
    payload: EventPayload,
    original: serde_json::Value,
}

impl NormalizedEvent {
    pub(crate) const fn assemble(
        exchange: String,
        symbol: String,
        timestamp: i64,
        datetime: DateTime<Utc>,
        payload: EventPayload,
        original: serde_json::Value,
    ) -> Self {
        Self {
            exchange,
            symbol,
            timestamp,
            datetime,
            payload,
            original,
        }
    }

    /// Exchange name.
    #[must_use]
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Symbol exactly as the exchange reported it.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Exchange event time, epoch milliseconds.
    #[must_use]
    pub const fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Wall-clock time derived from the kind's anchor field.
    #[must_use]
    pub const fn datetime(&self) -> DateTime<Utc> {
        self.datetime
    }

    /// Kind-specific fields.
    #[must_use]
    pub const fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Raw payload as received, for audit and debugging.
    #[must_use]
    pub const fn original(&self) -> &serde_json::Value {
        &self.original
    }

    /// Parameter-free kind of this event.
    #[must_use]
    pub const fn kind(&self) -> StreamKindTag {
        match self.payload {
            EventPayload::Tick(_) => StreamKindTag::Tick,
            EventPayload::Trade(_) => StreamKindTag::Trade,
            EventPayload::AggTrade(_) => StreamKindTag::AggTrade,
            EventPayload::Candle(_) => StreamKindTag::Candle,
        }
    }
}
