//! Exchange Profiles
//!
//! Everything exchange-specific is data: endpoint layout, channel name
//! templates, payload field maps and connection limits. Adding an exchange
//! means building a new [`ExchangeProfile`], not writing new code paths.
//!
//! Profiles are validated once, at construction. A profile that builds is
//! guaranteed to have a complete field map for every kind it has a channel
//! template for.

pub mod addressing;
pub mod frame;
pub mod normalizer;

use std::collections::BTreeMap;
use std::time::Duration;

use crate::domain::market::{CanonicalField, StreamKindTag};

pub use addressing::{AddressingError, StreamAddress};
pub use frame::{CodecError, ControlReply, Frame, JsonCodec, SubscribeRequest};
pub use normalizer::{FieldMap, FieldProblem, NormalizeError, PayloadNormalizer};

/// Placeholder replaced by the exchange-cased symbol in channel templates.
pub const SYMBOL_PLACEHOLDER: &str = "<symbol>";

/// Placeholder replaced by the candle interval in channel templates.
pub const INTERVAL_PLACEHOLDER: &str = "<interval>";

// =============================================================================
// Profile Types
// =============================================================================

/// How channels are attached to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscribeMode {
    /// Channels are listed in the connection URL.
    Combined,
    /// Connect to the raw endpoint, then send a subscribe request and wait
    /// for its acknowledgement.
    Handshake,
}

/// Letter case the exchange expects symbols in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolCase {
    /// `btcusdt`
    Lower,
    /// `BTCUSDT`
    Upper,
}

/// Channel names for one stream kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTemplate {
    /// Per-symbol channel, containing [`SYMBOL_PLACEHOLDER`].
    pub per_symbol: String,
    /// Channel carrying every symbol at once, if the exchange has one.
    pub aggregate: Option<String>,
}

/// Profile validation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProfileError {
    /// Stream base is not a websocket URL.
    #[error("stream base must be a ws:// or wss:// URL, got {0:?}")]
    InvalidEndpoint(String),

    /// A channel template is unusable.
    #[error("channel template {template:?} for {kind} {reason}")]
    InvalidTemplate {
        /// Kind the template belongs to.
        kind: StreamKindTag,
        /// Offending template.
        template: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// A kind has a channel but no field map.
    #[error("no field map for {0} although a channel is configured")]
    MissingFieldMap(StreamKindTag),

    /// A field map lacks required canonical fields.
    #[error("field map for {kind} is missing {}", field_list(.missing))]
    IncompleteFieldMap {
        /// Kind whose map is incomplete.
        kind: StreamKindTag,
        /// Required fields without a wire path.
        missing: Vec<CanonicalField>,
    },

    /// A canonical field is mapped twice.
    #[error("field map for {kind} maps {field} more than once")]
    DuplicateField {
        /// Kind whose map has the duplicate.
        kind: StreamKindTag,
        /// Field mapped twice.
        field: CanonicalField,
    },

    /// Profile has no channels at all.
    #[error("profile {0:?} defines no channels")]
    NoChannels(String),

    /// Channel limit of zero.
    #[error("max channels per connection must be positive")]
    ZeroChannelLimit,
}

fn field_list(fields: &[CanonicalField]) -> String {
    fields
        .iter()
        .map(|field| field.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// Exchange Profile
// =============================================================================

/// Declarative description of one exchange's streaming interface.
#[derive(Debug, Clone)]
pub struct ExchangeProfile {
    name: String,
    stream_base: String,
    combined_path: String,
    channel_separator: String,
    raw_path: String,
    mode: SubscribeMode,
    symbol_case: SymbolCase,
    channels: BTreeMap<StreamKindTag, ChannelTemplate>,
    normalizer: PayloadNormalizer,
    connection_ceiling: Duration,
    max_channels: usize,
}

impl ExchangeProfile {
    /// Start building a profile.
    #[must_use]
    pub fn builder(name: impl Into<String>, stream_base: impl Into<String>) -> ExchangeProfileBuilder {
        ExchangeProfileBuilder::new(name.into(), stream_base.into())
    }

    /// Exchange name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscription mode.
    #[must_use]
    pub const fn mode(&self) -> SubscribeMode {
        self.mode
    }

    /// Longest the exchange keeps a single connection open.
    #[must_use]
    pub const fn connection_ceiling(&self) -> Duration {
        self.connection_ceiling
    }

    /// Most channels one connection may carry.
    #[must_use]
    pub const fn max_channels(&self) -> usize {
        self.max_channels
    }

    /// Channel template for a kind.
    #[must_use]
    pub fn channel(&self, tag: StreamKindTag) -> Option<&ChannelTemplate> {
        self.channels.get(&tag)
    }

    /// Normalizer built from this profile's field maps.
    #[must_use]
    pub const fn normalizer(&self) -> &PayloadNormalizer {
        &self.normalizer
    }
}

/// Builder for [`ExchangeProfile`].
#[derive(Debug, Clone)]
pub struct ExchangeProfileBuilder {
    name: String,
    stream_base: String,
    combined_path: String,
    channel_separator: String,
    raw_path: String,
    mode: SubscribeMode,
    symbol_case: SymbolCase,
    channels: BTreeMap<StreamKindTag, ChannelTemplate>,
    field_maps: BTreeMap<StreamKindTag, FieldMap>,
    connection_ceiling: Duration,
    max_channels: usize,
}

impl ExchangeProfileBuilder {
    fn new(name: String, stream_base: String) -> Self {
        Self {
            name,
            stream_base,
            combined_path: "/stream?streams=".to_string(),
            channel_separator: "/".to_string(),
            raw_path: "/ws".to_string(),
            mode: SubscribeMode::Combined,
            symbol_case: SymbolCase::Lower,
            channels: BTreeMap::new(),
            field_maps: BTreeMap::new(),
            connection_ceiling: Duration::from_secs(24 * 60 * 60),
            max_channels: 1024,
        }
    }

    /// Path prefix and separator for channel lists in the URL.
    #[must_use]
    pub fn combined_path(mut self, prefix: impl Into<String>, separator: impl Into<String>) -> Self {
        self.combined_path = prefix.into();
        self.channel_separator = separator.into();
        self
    }

    /// Path of the raw endpoint used in handshake mode.
    #[must_use]
    pub fn raw_path(mut self, path: impl Into<String>) -> Self {
        self.raw_path = path.into();
        self
    }

    /// Subscription mode.
    #[must_use]
    pub const fn mode(mut self, mode: SubscribeMode) -> Self {
        self.mode = mode;
        self
    }

    /// Symbol letter case.
    #[must_use]
    pub const fn symbol_case(mut self, case: SymbolCase) -> Self {
        self.symbol_case = case;
        self
    }

    /// Channel templates for a kind.
    #[must_use]
    pub fn channel(mut self, tag: StreamKindTag, per_symbol: &str, aggregate: Option<&str>) -> Self {
        self.channels.insert(
            tag,
            ChannelTemplate {
                per_symbol: per_symbol.to_string(),
                aggregate: aggregate.map(str::to_string),
            },
        );
        self
    }

    /// Field map for a kind.
    #[must_use]
    pub fn field_map(mut self, tag: StreamKindTag, map: FieldMap) -> Self {
        self.field_maps.insert(tag, map);
        self
    }

    /// Maximum lifetime of one connection.
    #[must_use]
    pub const fn connection_ceiling(mut self, ceiling: Duration) -> Self {
        self.connection_ceiling = ceiling;
        self
    }

    /// Maximum channels per connection.
    #[must_use]
    pub const fn max_channels(mut self, limit: usize) -> Self {
        self.max_channels = limit;
        self
    }

    /// Validate and build.
    ///
    /// # Errors
    ///
    /// Returns [`ProfileError`] if the endpoint, a template, or a field map is
    /// unusable.
    pub fn build(self) -> Result<ExchangeProfile, ProfileError> {
        if !(self.stream_base.starts_with("ws://") || self.stream_base.starts_with("wss://")) {
            return Err(ProfileError::InvalidEndpoint(self.stream_base));
        }
        if self.channels.is_empty() {
            return Err(ProfileError::NoChannels(self.name));
        }
        if self.max_channels == 0 {
            return Err(ProfileError::ZeroChannelLimit);
        }

        for (tag, template) in &self.channels {
            validate_template(*tag, template)?;

            let map = self
                .field_maps
                .get(tag)
                .ok_or(ProfileError::MissingFieldMap(*tag))?;
            let missing = map.missing(tag.required_fields());
            if !missing.is_empty() {
                return Err(ProfileError::IncompleteFieldMap { kind: *tag, missing });
            }
            if let Some(field) = map.duplicate() {
                return Err(ProfileError::DuplicateField { kind: *tag, field });
            }
        }

        Ok(ExchangeProfile {
            normalizer: PayloadNormalizer::new(self.name.clone(), self.field_maps),
            name: self.name,
            stream_base: self.stream_base.trim_end_matches('/').to_string(),
            combined_path: self.combined_path,
            channel_separator: self.channel_separator,
            raw_path: self.raw_path,
            mode: self.mode,
            symbol_case: self.symbol_case,
            channels: self.channels,
            connection_ceiling: self.connection_ceiling,
            max_channels: self.max_channels,
        })
    }
}

fn validate_template(tag: StreamKindTag, template: &ChannelTemplate) -> Result<(), ProfileError> {
    let invalid = |template: &str, reason| ProfileError::InvalidTemplate {
        kind: tag,
        template: template.to_string(),
        reason,
    };
    let wants_interval = tag == StreamKindTag::Candle;

    if !template.per_symbol.contains(SYMBOL_PLACEHOLDER) {
        return Err(invalid(&template.per_symbol, "has no <symbol> placeholder"));
    }
    if template.per_symbol.contains(INTERVAL_PLACEHOLDER) != wants_interval {
        return Err(invalid(
            &template.per_symbol,
            if wants_interval {
                "has no <interval> placeholder"
            } else {
                "has an <interval> placeholder"
            },
        ));
    }
    if let Some(aggregate) = &template.aggregate {
        if aggregate.contains(SYMBOL_PLACEHOLDER) {
            return Err(invalid(aggregate, "is an aggregate with a <symbol> placeholder"));
        }
        if aggregate.contains(INTERVAL_PLACEHOLDER) != wants_interval {
            return Err(invalid(aggregate, "has a mismatched <interval> placeholder"));
        }
    }
    Ok(())
}
