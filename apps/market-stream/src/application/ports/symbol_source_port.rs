//! Symbol Source Port (Driven Port)
//!
//! Lists the tradable pairs of an exchange in its native notation.

use async_trait::async_trait;

/// Symbol listing could not be obtained.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    /// Network failure or malformed response.
    #[error("symbol catalog unavailable for {exchange}: {message}")]
    Unavailable {
        /// Exchange name.
        exchange: String,
        /// Error details.
        message: String,
    },

    /// The listing contained no usable symbols.
    #[error("symbol catalog for {exchange} is empty")]
    Empty {
        /// Exchange name.
        exchange: String,
    },
}

/// Port for listing an exchange's tradable symbols.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SymbolSource: Send + Sync {
    /// Native symbols currently trading on `exchange`.
    async fn fetch_symbols(&self, exchange: &str) -> Result<Vec<String>, CatalogError>;
}

/// Fixed symbol list, for tests and offline use.
#[derive(Debug, Clone, Default)]
pub struct StaticSymbolSource {
    symbols: Vec<String>,
}

impl StaticSymbolSource {
    /// Source that always returns `symbols`.
    pub fn new<S: Into<String>>(symbols: impl IntoIterator<Item = S>) -> Self {
        Self {
            symbols: symbols.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl SymbolSource for StaticSymbolSource {
    async fn fetch_symbols(&self, _exchange: &str) -> Result<Vec<String>, CatalogError> {
        Ok(self.symbols.clone())
    }
}
