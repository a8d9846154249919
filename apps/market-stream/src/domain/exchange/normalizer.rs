//! Payload Normalization
//!
//! Maps exchange payloads onto [`NormalizedEvent`] using a declarative
//! per-kind field map of dotted wire paths. Pure: no I/O, no shared state.

use std::collections::BTreeMap;
use std::fmt;

use chrono::DateTime;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::domain::market::{
    AggTradeFields, CandleFields, CanonicalField, EventPayload, NormalizedEvent, StreamKind,
    StreamKindTag, TickFields, TradeFields,
};

// =============================================================================
// Field Map
// =============================================================================

/// Canonical field to wire path mapping for one stream kind.
///
/// Wire paths address nested objects with dots, so `k.o` reads the `o` key of
/// the object under `k`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    entries: Vec<(CanonicalField, String)>,
}

impl FieldMap {
    /// Build a map from `(wire path, canonical field)` pairs.
    pub fn new<'a>(pairs: impl IntoIterator<Item = (&'a str, CanonicalField)>) -> Self {
        Self {
            entries: pairs
                .into_iter()
                .map(|(wire, field)| (field, wire.to_string()))
                .collect(),
        }
    }

    /// Wire path a canonical field is read from.
    #[must_use]
    pub fn wire_path(&self, field: CanonicalField) -> Option<&str> {
        self.entries
            .iter()
            .find(|(canonical, _)| *canonical == field)
            .map(|(_, wire)| wire.as_str())
    }

    /// Required fields this map has no wire path for.
    #[must_use]
    pub fn missing(&self, required: &[CanonicalField]) -> Vec<CanonicalField> {
        required
            .iter()
            .copied()
            .filter(|field| self.wire_path(*field).is_none())
            .collect()
    }

    /// First canonical field mapped more than once, if any.
    #[must_use]
    pub fn duplicate(&self) -> Option<CanonicalField> {
        self.entries.iter().enumerate().find_map(|(i, (field, _))| {
            self.entries[..i]
                .iter()
                .any(|(earlier, _)| earlier == field)
                .then_some(*field)
        })
    }
}

// =============================================================================
// Errors
// =============================================================================

/// What is wrong with a payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldProblem {
    /// Absent or null.
    Missing,
    /// Present with the wrong JSON type or an unparseable value.
    WrongType(&'static str),
    /// Numeric value outside the representable range.
    OutOfRange,
}

impl fmt::Display for FieldProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("is missing"),
            Self::WrongType(expected) => write!(f, "is not {expected}"),
            Self::OutOfRange => f.write_str("is out of range"),
        }
    }
}

/// Normalization failures. Never fatal to a session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    /// No field map is registered for the kind.
    #[error("no field map for {0} payloads")]
    UnknownStreamKind(StreamKindTag),

    /// The payload is not a JSON object.
    #[error("malformed payload: expected an object, got {0}")]
    NotAnObject(&'static str),

    /// A required field is absent or unusable.
    #[error("malformed payload: {field} (wire `{wire}`) {problem}")]
    MalformedPayload {
        /// Canonical field that failed.
        field: CanonicalField,
        /// Wire path it was read from.
        wire: String,
        /// What went wrong.
        problem: FieldProblem,
    },
}

const fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// =============================================================================
// Normalizer
// =============================================================================

/// Converts raw payloads of one exchange into canonical events.
#[derive(Debug, Clone)]
pub struct PayloadNormalizer {
    exchange: String,
    maps: BTreeMap<StreamKindTag, FieldMap>,
}

impl PayloadNormalizer {
    /// Create a normalizer from per-kind field maps.
    ///
    /// Completeness is checked by the profile builder, not here.
    #[must_use]
    pub const fn new(exchange: String, maps: BTreeMap<StreamKindTag, FieldMap>) -> Self {
        Self { exchange, maps }
    }

    /// Exchange name stamped on every event.
    #[must_use]
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Field map for a kind.
    #[must_use]
    pub fn field_map(&self, tag: StreamKindTag) -> Option<&FieldMap> {
        self.maps.get(&tag)
    }

    /// Normalize one raw payload.
    ///
    /// # Errors
    ///
    /// - [`NormalizeError::UnknownStreamKind`] if the kind has no field map
    /// - [`NormalizeError::NotAnObject`] if `raw` is not a JSON object
    /// - [`NormalizeError::MalformedPayload`] if a required field is missing
    ///   or has the wrong type
    pub fn normalize(&self, kind: StreamKind, raw: &Value) -> Result<NormalizedEvent, NormalizeError> {
        let tag = kind.tag();
        let map = self
            .maps
            .get(&tag)
            .ok_or(NormalizeError::UnknownStreamKind(tag))?;
        if !raw.is_object() {
            return Err(NormalizeError::NotAnObject(json_type(raw)));
        }

        let fields = Fields { map, raw };
        let timestamp = fields.epoch_ms(CanonicalField::Timestamp)?;
        let symbol = fields.text(CanonicalField::Symbol)?;
        let payload = fields.payload(kind)?;

        let anchor = tag.datetime_anchor();
        let datetime = DateTime::from_timestamp_millis(fields.epoch_ms(anchor)?)
            .ok_or_else(|| fields.problem(anchor, FieldProblem::OutOfRange))?;

        Ok(NormalizedEvent::assemble(
            self.exchange.clone(),
            symbol,
            timestamp,
            datetime,
            payload,
            raw.clone(),
        ))
    }
}

struct Fields<'a> {
    map: &'a FieldMap,
    raw: &'a Value,
}

impl<'a> Fields<'a> {
    fn problem(&self, field: CanonicalField, problem: FieldProblem) -> NormalizeError {
        NormalizeError::MalformedPayload {
            field,
            wire: self.map.wire_path(field).unwrap_or_default().to_string(),
            problem,
        }
    }

    fn lookup(&self, field: CanonicalField) -> Result<&'a Value, NormalizeError> {
        self.map
            .wire_path(field)
            .and_then(|wire| {
                wire.split('.')
                    .try_fold(self.raw, |node, key| node.get(key))
            })
            .filter(|value| !value.is_null())
            .ok_or_else(|| self.problem(field, FieldProblem::Missing))
    }

    fn epoch_ms(&self, field: CanonicalField) -> Result<i64, NormalizeError> {
        self.lookup(field)?
            .as_i64()
            .ok_or_else(|| self.problem(field, FieldProblem::WrongType("an integer")))
    }

    fn unsigned(&self, field: CanonicalField) -> Result<u64, NormalizeError> {
        self.lookup(field)?
            .as_u64()
            .ok_or_else(|| self.problem(field, FieldProblem::WrongType("a non-negative integer")))
    }

    fn flag(&self, field: CanonicalField) -> Result<bool, NormalizeError> {
        self.lookup(field)?
            .as_bool()
            .ok_or_else(|| self.problem(field, FieldProblem::WrongType("a boolean")))
    }

    fn text(&self, field: CanonicalField) -> Result<String, NormalizeError> {
        self.lookup(field)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.problem(field, FieldProblem::WrongType("a string")))
    }

    /// Prices arrive as decimal strings on most feeds and as JSON numbers on
    /// some; both are accepted.
    fn decimal(&self, field: CanonicalField) -> Result<Decimal, NormalizeError> {
        let parsed = match self.lookup(field)? {
            Value::String(s) => parse_decimal(s),
            Value::Number(n) => parse_decimal(&n.to_string()),
            _ => None,
        };
        parsed.ok_or_else(|| self.problem(field, FieldProblem::WrongType("a decimal")))
    }

    fn payload(&self, kind: StreamKind) -> Result<EventPayload, NormalizeError> {
        use CanonicalField as F;

        Ok(match kind {
            StreamKind::Tick => EventPayload::Tick(TickFields {
                bid: self.decimal(F::Bid)?,
                ask: self.decimal(F::Ask)?,
            }),
            StreamKind::Trade => EventPayload::Trade(TradeFields {
                trade_id: self.unsigned(F::TradeId)?,
                price: self.decimal(F::Price)?,
                quantity: self.decimal(F::Quantity)?,
                trade_time: self.epoch_ms(F::TradeTime)?,
                market_maker: self.flag(F::MarketMaker)?,
            }),
            StreamKind::AggTrade => EventPayload::AggTrade(AggTradeFields {
                agg_trade_id: self.unsigned(F::AggTradeId)?,
                price: self.decimal(F::Price)?,
                quantity: self.decimal(F::Quantity)?,
                first_trade_id: self.unsigned(F::FirstTradeId)?,
                last_trade_id: self.unsigned(F::LastTradeId)?,
                trade_time: self.epoch_ms(F::TradeTime)?,
                market_maker: self.flag(F::MarketMaker)?,
            }),
            StreamKind::Candle(interval) => EventPayload::Candle(CandleFields {
                interval,
                open_time: self.epoch_ms(F::OpenTime)?,
                close_time: self.epoch_ms(F::CloseTime)?,
                open: self.decimal(F::Open)?,
                high: self.decimal(F::High)?,
                low: self.decimal(F::Low)?,
                close: self.decimal(F::Close)?,
                volume: self.decimal(F::Volume)?,
                trade_count: self.unsigned(F::TradeCount)?,
                closed: self.flag(F::Closed)?,
            }),
        })
    }
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    s.parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}
