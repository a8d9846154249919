//! Binance Symbol Listing
//!
//! Fetches `GET /api/v3/exchangeInfo` and keeps the symbols whose status is
//! `TRADING`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::application::ports::{CatalogError, SymbolSource};

use super::EXCHANGE_INFO_URL;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    status: String,
}

/// Symbol source backed by the exchange information REST endpoint.
#[derive(Debug, Clone)]
pub struct RestSymbolSource {
    client: reqwest::Client,
    url: String,
}

impl RestSymbolSource {
    /// Source for the public Binance endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_url(EXCHANGE_INFO_URL, DEFAULT_TIMEOUT)
    }

    /// Source for a custom endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_url(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl SymbolSource for RestSymbolSource {
    async fn fetch_symbols(&self, exchange: &str) -> Result<Vec<String>, CatalogError> {
        let unavailable = |e: reqwest::Error| CatalogError::Unavailable {
            exchange: exchange.to_string(),
            message: e.to_string(),
        };

        tracing::debug!(url = %self.url, "Fetching exchange information");

        let info: ExchangeInfo = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(unavailable)?
            .json()
            .await
            .map_err(unavailable)?;

        let listed = info.symbols.len();
        let trading: Vec<String> = info
            .symbols
            .into_iter()
            .filter(|s| s.status == "TRADING")
            .map(|s| s.symbol)
            .collect();

        tracing::debug!(listed, trading = trading.len(), "Exchange information received");
        Ok(trading)
    }
}
