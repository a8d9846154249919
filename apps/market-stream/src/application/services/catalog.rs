//! Symbol Catalog
//!
//! Resolves an exchange's tradable pairs once and holds them in canonical
//! form. Fetch failures are returned, never cached.

use std::collections::BTreeSet;

use crate::application::ports::{CatalogError, SymbolSource};
use crate::domain::market::Symbol;

/// Canonical symbols tradable on one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolCatalog {
    exchange: String,
    symbols: BTreeSet<Symbol>,
}

impl SymbolCatalog {
    /// Fetch and canonicalise the exchange's symbols.
    ///
    /// Entries that do not canonicalise are skipped.
    ///
    /// # Errors
    ///
    /// - [`CatalogError::Unavailable`] if the source fails
    /// - [`CatalogError::Empty`] if no usable symbol remains
    pub async fn resolve(source: &dyn SymbolSource, exchange: &str) -> Result<Self, CatalogError> {
        let native = source.fetch_symbols(exchange).await?;
        let fetched = native.len();
        let catalog = Self::from_native(exchange, native.iter().map(String::as_str));

        if catalog.is_empty() {
            return Err(CatalogError::Empty {
                exchange: exchange.to_string(),
            });
        }

        tracing::info!(
            exchange,
            fetched,
            symbols = catalog.len(),
            "Symbol catalog resolved"
        );
        Ok(catalog)
    }

    /// Build a catalog from native symbols without fetching.
    pub fn from_native<'a>(exchange: &str, native: impl IntoIterator<Item = &'a str>) -> Self {
        let symbols = native
            .into_iter()
            .filter_map(|raw| match Symbol::parse(raw) {
                Ok(symbol) => Some(symbol),
                Err(e) => {
                    tracing::debug!(exchange, error = %e, "Skipping catalog entry");
                    None
                }
            })
            .collect();

        Self {
            exchange: exchange.to_string(),
            symbols,
        }
    }

    /// Exchange the catalog belongs to.
    #[must_use]
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Whether `symbol` is tradable.
    #[must_use]
    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.symbols.contains(symbol)
    }

    /// Number of symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Symbols in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    /// Underlying set.
    #[must_use]
    pub const fn as_set(&self) -> &BTreeSet<Symbol> {
        &self.symbols
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{MockSymbolSource, StaticSymbolSource};

    #[tokio::test]
    async fn canonicalises_and_dedupes() {
        let source = StaticSymbolSource::new(["BTC/ETH", "btceth", "LTC/BTC", "/"]);
        let catalog = SymbolCatalog::resolve(&source, "binance").await.unwrap();

        assert_eq!(catalog.exchange(), "binance");
        assert_eq!(catalog.len(), 2);
        assert!(catalog.contains(&Symbol::parse("btceth").unwrap()));
        let listed: Vec<&str> = catalog.iter().map(Symbol::as_str).collect();
        assert_eq!(listed, vec!["btceth", "ltcbtc"]);
    }

    #[tokio::test]
    async fn propagates_source_failure() {
        let mut source = MockSymbolSource::new();
        source.expect_fetch_symbols().times(1).returning(|exchange| {
            Err(CatalogError::Unavailable {
                exchange: exchange.to_string(),
                message: "connection refused".to_string(),
            })
        });

        let err = SymbolCatalog::resolve(&source, "binance").await.unwrap_err();
        assert!(matches!(err, CatalogError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn empty_listing_is_an_error() {
        let mut source = MockSymbolSource::new();
        source
            .expect_fetch_symbols()
            .returning(|_| Ok(vec!["--".to_string()]));

        let err = SymbolCatalog::resolve(&source, "binance").await.unwrap_err();
        assert_eq!(
            err,
            CatalogError::Empty {
                exchange: "binance".to_string()
            }
        );
    }
}
