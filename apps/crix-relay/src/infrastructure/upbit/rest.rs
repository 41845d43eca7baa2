//! Upbit REST Client
//!
//! One-time startup calls: market enumeration and the price snapshot used
//! to prime the price table.
//!
//! # Endpoints
//!
//! - `GET /v1/market/all?isDetails=true`
//! - `GET /v1/ticker?markets=KRW-BTC,KRW-ETH`

use std::time::Duration;

use reqwest::Client;

use super::messages::{UpbitMarket, UpbitTickerEvent};
use crate::application::services::RetryPolicy;

/// Production REST base URL.
pub const DEFAULT_REST_URL: &str = "https://api.upbit.com";

/// Default delay between market enumeration attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(10);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// REST errors.
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    /// The HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Client(String),

    /// The request did not complete.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status {
        /// Status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The body is not the expected JSON.
    #[error("invalid response body: {0}")]
    Parse(String),
}

/// Tracked markets, in listing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarketSet {
    /// Market codes (e.g. `KRW-BTC`).
    pub codes: Vec<String>,
    /// Currency codes (e.g. `BTC`).
    pub currencies: Vec<String>,
}

impl MarketSet {
    /// Keep markets carrying `quote_prefix`.
    #[must_use]
    pub fn from_markets(markets: &[UpbitMarket], quote_prefix: &str) -> Self {
        let mut set = Self::default();
        for market in markets {
            if let Some(currency) =
                crate::domain::ticker::currency_code(&market.market, quote_prefix)
            {
                set.codes.push(market.market.clone());
                set.currencies.push(currency.to_string());
            }
        }
        set
    }

    /// Number of tracked markets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    /// Whether no market is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

/// Client for the Upbit quotation API.
#[derive(Debug, Clone)]
pub struct UpbitRestClient {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl UpbitRestClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// Returns `RestError::Client` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, retry: RetryPolicy) -> Result<Self, RestError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RestError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry,
        })
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value, RestError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| RestError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RestError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(RestError::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| RestError::Parse(e.to_string()))
    }

    /// List every market once.
    ///
    /// # Errors
    ///
    /// Returns `RestError` on transport, status or parse failure.
    pub async fn list_markets(&self) -> Result<Vec<UpbitMarket>, RestError> {
        let url = format!("{}/v1/market/all?isDetails=true", self.base_url);
        let value = self.get_json(&url).await?;
        serde_json::from_value(value).map_err(|e| RestError::Parse(e.to_string()))
    }

    /// List markets carrying `quote_prefix`, retrying until the listing
    /// succeeds.
    pub async fn fetch_markets(&self, quote_prefix: &str) -> MarketSet {
        loop {
            match self.list_markets().await {
                Ok(markets) => {
                    let set = MarketSet::from_markets(&markets, quote_prefix);
                    tracing::info!(
                        listed = markets.len(),
                        tracked = set.len(),
                        quote_prefix,
                        "Markets loaded"
                    );
                    return set;
                }
                Err(e) => {
                    let delay = self.retry.next_delay();
                    tracing::error!(
                        error = %e,
                        delay_ms = delay.as_millis(),
                        "Market listing failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Fetch the current ticker of every market in `codes`.
    ///
    /// Entries that do not parse are skipped.
    ///
    /// # Errors
    ///
    /// Returns `RestError` on transport or status failure, or if the body
    /// is not a JSON array.
    pub async fn fetch_snapshot(&self, codes: &[String]) -> Result<Vec<UpbitTickerEvent>, RestError> {
        if codes.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/v1/ticker?markets={}", self.base_url, codes.join(","));
        let value = self.get_json(&url).await?;

        let serde_json::Value::Array(entries) = value else {
            return Err(RestError::Parse("expected a JSON array".to_string()));
        };

        let mut events = Vec::with_capacity(entries.len());
        for entry in entries {
            match serde_json::from_value::<UpbitTickerEvent>(entry) {
                Ok(event) if !event.code.is_empty() => events.push(event),
                Ok(_) => tracing::warn!("Skipping snapshot entry without market"),
                Err(e) => tracing::warn!(error = %e, "Skipping malformed snapshot entry"),
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market(code: &str) -> UpbitMarket {
        UpbitMarket {
            market: code.to_string(),
            korean_name: String::new(),
            english_name: String::new(),
            market_warning: None,
        }
    }

    #[test]
    fn market_set_keeps_prefixed_in_order() {
        let set = MarketSet::from_markets(
            &[market("KRW-BTC"), market("BTC-ETH"), market("KRW-XRP"), market("USDT-BTC")],
            "KRW-",
        );

        assert_eq!(set.codes, vec!["KRW-BTC", "KRW-XRP"]);
        assert_eq!(set.currencies, vec!["BTC", "XRP"]);
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = UpbitRestClient::new(
            "https://api.upbit.com/",
            RetryPolicy::fixed(DEFAULT_RETRY_INTERVAL),
        )
        .unwrap();
        assert_eq!(client.base_url, DEFAULT_REST_URL);
    }
}
