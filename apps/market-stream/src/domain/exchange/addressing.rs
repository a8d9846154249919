//! Channel Addressing
//!
//! Turns a stream kind and symbol set into the connection URL (and, in
//! handshake mode, the channel list to subscribe to).

use std::collections::{BTreeSet, HashSet};

use crate::domain::market::{StreamKind, Symbol};

use super::{ExchangeProfile, INTERVAL_PLACEHOLDER, SYMBOL_PLACEHOLDER, SubscribeMode, SymbolCase};

/// Where and how to subscribe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamAddress {
    /// Connection URL.
    pub url: String,
    /// Channel names, in the order symbols were given.
    pub channels: Vec<String>,
    /// Whether channels ride in the URL or a subscribe request.
    pub mode: SubscribeMode,
}

/// Addressing failures, raised before any connection is attempted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressingError {
    /// The exchange has no channel for the kind.
    #[error("{exchange} does not offer {kind} streams")]
    UnsupportedStreamKind {
        /// Exchange name.
        exchange: String,
        /// Requested kind.
        kind: StreamKind,
    },

    /// No symbols were given.
    #[error("no symbols to subscribe to")]
    EmptySymbolSet,

    /// More channels than one connection may carry.
    #[error("{requested} channels exceed the limit of {limit} per connection")]
    TooManyChannels {
        /// Channels that would be subscribed.
        requested: usize,
        /// Per-connection limit.
        limit: usize,
    },
}

impl ExchangeProfile {
    /// Channel name for one symbol.
    #[must_use]
    pub fn channel_name(&self, kind: StreamKind, symbol: &Symbol) -> Option<String> {
        let template = self.channel(kind.tag())?;
        Some(self.fill(&template.per_symbol, kind, Some(symbol)))
    }

    /// Build the address for `symbols`.
    ///
    /// When `catalog` is given and `symbols` covers it exactly, the kind's
    /// aggregate channel replaces the per-symbol list. Repeated symbols are
    /// subscribed once, at their first position.
    ///
    /// # Errors
    ///
    /// - [`AddressingError::UnsupportedStreamKind`] if the profile has no
    ///   channel for `kind`
    /// - [`AddressingError::EmptySymbolSet`] if `symbols` is empty
    /// - [`AddressingError::TooManyChannels`] if the channel count exceeds
    ///   the per-connection limit
    pub fn address(
        &self,
        kind: StreamKind,
        symbols: &[Symbol],
        catalog: Option<&BTreeSet<Symbol>>,
    ) -> Result<StreamAddress, AddressingError> {
        let template = self
            .channel(kind.tag())
            .ok_or_else(|| AddressingError::UnsupportedStreamKind {
                exchange: self.name.clone(),
                kind,
            })?;
        if symbols.is_empty() {
            return Err(AddressingError::EmptySymbolSet);
        }

        let covers_catalog = catalog.is_some_and(|all| {
            let given: BTreeSet<&Symbol> = symbols.iter().collect();
            given.len() == all.len() && given.iter().all(|symbol| all.contains(*symbol))
        });

        let channels = match &template.aggregate {
            Some(aggregate) if covers_catalog => vec![self.fill(aggregate, kind, None)],
            _ => {
                let mut seen = HashSet::new();
                symbols
                    .iter()
                    .filter(|symbol| seen.insert(*symbol))
                    .map(|symbol| self.fill(&template.per_symbol, kind, Some(symbol)))
                    .collect()
            }
        };

        if channels.len() > self.max_channels {
            return Err(AddressingError::TooManyChannels {
                requested: channels.len(),
                limit: self.max_channels,
            });
        }

        let url = match self.mode {
            SubscribeMode::Combined => format!(
                "{}{}{}",
                self.stream_base,
                self.combined_path,
                channels.join(&self.channel_separator)
            ),
            SubscribeMode::Handshake => format!("{}{}", self.stream_base, self.raw_path),
        };

        Ok(StreamAddress {
            url,
            channels,
            mode: self.mode,
        })
    }

    fn fill(&self, template: &str, kind: StreamKind, symbol: Option<&Symbol>) -> String {
        let mut channel = template.to_string();
        if let Some(symbol) = symbol {
            let cased = match self.symbol_case {
                SymbolCase::Lower => symbol.as_str().to_string(),
                SymbolCase::Upper => symbol.as_str().to_uppercase(),
            };
            channel = channel.replace(SYMBOL_PLACEHOLDER, &cased);
        }
        if let Some(interval) = kind.interval() {
            channel = channel.replace(INTERVAL_PLACEHOLDER, interval.as_str());
        }
        channel
    }
}
