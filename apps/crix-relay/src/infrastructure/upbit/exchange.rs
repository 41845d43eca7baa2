//! Upbit Exchange
//!
//! Wires the Upbit REST client, ticket signer, WebSocket feed and ticker
//! decoder into the `Exchange` capability set.
//!
//! # Startup
//!
//! 1. List markets (retried until it succeeds) and keep the `KRW-` ones
//! 2. Sign a ticket and build the subscribe frames
//! 3. Prime the price table from the REST snapshot (best effort)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::codec::UpbitDecoder;
use super::messages::SubscribeRequest;
use super::rest::{self, MarketSet, UpbitRestClient};
use super::signature::{self, make_ticket_now};
use crate::application::ports::{Exchange, ExchangeError, FeedConnector};
use crate::application::services::distribution::TickerSender;
use crate::application::services::feed::{
    DEFAULT_FRAME_INTERVAL, DEFAULT_RECONNECT_INTERVAL, DEFAULT_STALE_TIMEOUT, FeedConnection,
    FeedConnectionConfig, FeedState,
};
use crate::application::services::{Normalizer, RetryPolicy};
use crate::domain::price_table::PriceTable;
use crate::domain::subscription::{SubscriptionDescriptor, SubscriptionError};
use crate::domain::ticker::{Ticker, currency_code};
use crate::infrastructure::websocket::TungsteniteConnector;

/// Registry key.
pub const EXCHANGE_NAME: &str = "UPBIT";

/// Local quote-currency prefix.
pub const QUOTE_PREFIX: &str = "KRW-";

/// Production WebSocket URL.
pub const DEFAULT_WS_URL: &str = "wss://api.upbit.com/websocket/v1";

/// Upbit integration settings.
#[derive(Debug, Clone)]
pub struct UpbitConfig {
    /// REST base URL.
    pub rest_url: String,
    /// WebSocket URL.
    pub ws_url: String,
    /// Ticket key material.
    pub ticket_key: String,
    /// Codes per subscribe frame (0 = all in one frame).
    pub codes_per_frame: usize,
    /// Feed dial retry policy.
    pub feed_reconnect: RetryPolicy,
    /// Delay between replayed subscribe frames.
    pub frame_interval: Duration,
    /// Redial a connected feed after this long without frames (zero disables).
    pub stale_timeout: Duration,
    /// Market listing retry policy.
    pub rest_retry: RetryPolicy,
}

impl Default for UpbitConfig {
    fn default() -> Self {
        Self {
            rest_url: rest::DEFAULT_REST_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            ticket_key: signature::DEFAULT_TICKET_KEY.to_string(),
            codes_per_frame: 0,
            feed_reconnect: RetryPolicy::fixed(DEFAULT_RECONNECT_INTERVAL),
            frame_interval: DEFAULT_FRAME_INTERVAL,
            stale_timeout: DEFAULT_STALE_TIMEOUT,
            rest_retry: RetryPolicy::fixed(rest::DEFAULT_RETRY_INTERVAL),
        }
    }
}

/// Upbit exchange integration.
pub struct UpbitExchange<C: FeedConnector + Clone = TungsteniteConnector> {
    config: UpbitConfig,
    rest: UpbitRestClient,
    connector: C,
    markets: MarketSet,
    descriptor: Option<SubscriptionDescriptor>,
    table: PriceTable,
    feed_state: Arc<FeedState>,
    shutdown: CancellationToken,
}

impl UpbitExchange<TungsteniteConnector> {
    /// Create an integration over the WebSocket connector.
    ///
    /// # Errors
    ///
    /// Returns `ExchangeError::Rest` if the HTTP client cannot be built.
    pub fn new(config: UpbitConfig) -> Result<Self, ExchangeError> {
        Self::with_connector(config, TungsteniteConnector::new())
    }
}

impl<C: FeedConnector + Clone> UpbitExchange<C> {
    /// Create an integration over a custom feed connector.
    ///
    /// # Errors
    ///
    /// Returns `ExchangeError::Rest` if the HTTP client cannot be built.
    pub fn with_connector(config: UpbitConfig, connector: C) -> Result<Self, ExchangeError> {
        let rest = UpbitRestClient::new(config.rest_url.clone(), config.rest_retry)
            .map_err(|e| ExchangeError::Rest(e.to_string()))?;

        Ok(Self {
            config,
            rest,
            connector,
            markets: MarketSet::default(),
            descriptor: None,
            table: PriceTable::new(),
            feed_state: Arc::new(FeedState::new()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Tracked markets, empty before `initialize`.
    #[must_use]
    pub const fn markets(&self) -> &MarketSet {
        &self.markets
    }

    /// Price table as primed so far.
    #[must_use]
    pub const fn price_table(&self) -> &PriceTable {
        &self.table
    }

    /// Subscribe frames, once initialized.
    #[must_use]
    pub const fn descriptor(&self) -> Option<&SubscriptionDescriptor> {
        self.descriptor.as_ref()
    }

    fn build_descriptor(&self, codes: &[String]) -> Result<SubscriptionDescriptor, ExchangeError> {
        let ticket = make_ticket_now(&self.config.ticket_key)
            .map_err(|e| ExchangeError::Signing(e.to_string()))?;
        tracing::debug!(ticket = %ticket, "Subscribe ticket signed");

        let frames = SubscribeRequest::ticker(ticket, codes.to_vec())
            .to_frames(self.config.codes_per_frame)
            .map_err(|e| SubscriptionError::MalformedFrame {
                index: 0,
                reason: e.to_string(),
            })?;

        Ok(SubscriptionDescriptor::new(frames)?)
    }
}

#[async_trait]
impl<C: FeedConnector + Clone> Exchange for UpbitExchange<C> {
    fn name(&self) -> &str {
        EXCHANGE_NAME
    }

    fn feed_state(&self) -> Arc<FeedState> {
        Arc::clone(&self.feed_state)
    }

    fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    async fn initialize(&mut self) -> Result<Vec<String>, ExchangeError> {
        tracing::info!(exchange = EXCHANGE_NAME, "Initializing exchange");

        let markets = self.rest.fetch_markets(QUOTE_PREFIX).await;
        if markets.is_empty() {
            return Err(ExchangeError::NoMarkets);
        }

        let descriptor = self.build_descriptor(&markets.codes)?;
        tracing::info!(
            markets = markets.len(),
            frames = descriptor.len(),
            "Subscription descriptor built"
        );

        self.descriptor = Some(descriptor);
        self.markets = markets;

        let codes = self.markets.codes.clone();
        let primed = self.prime_snapshot(&codes).await?;
        tracing::info!(primed, "Price table primed");

        Ok(codes)
    }

    async fn prime_snapshot(&mut self, codes: &[String]) -> Result<usize, ExchangeError> {
        if self.descriptor.is_none() {
            return Err(ExchangeError::NotInitialized);
        }

        let events = match self.rest.fetch_snapshot(codes).await {
            Ok(events) => events,
            Err(e) => {
                tracing::error!(error = %e, "Snapshot request failed, starting with an empty price table");
                return Ok(0);
            }
        };

        let mut primed = 0;
        for event in &events {
            let price = event.to_price_event();
            if let Some(currency) = currency_code(&price.market_code, QUOTE_PREFIX) {
                self.table
                    .prime(Ticker::from_event(EXCHANGE_NAME, currency, &price));
                primed += 1;
            }
        }
        Ok(primed)
    }

    async fn execute(&mut self, sender: TickerSender) -> Result<(), ExchangeError> {
        let descriptor = self
            .descriptor
            .clone()
            .ok_or(ExchangeError::NotInitialized)?;

        let config = FeedConnectionConfig {
            endpoint: self.config.ws_url.clone(),
            reconnect: self.config.feed_reconnect,
            frame_interval: self.config.frame_interval,
        };
        let (connection, handle) = FeedConnection::with_state(
            self.connector.clone(),
            config,
            descriptor,
            Arc::clone(&self.feed_state),
            self.shutdown.clone(),
        );
        let watchdog = (!self.config.stale_timeout.is_zero())
            .then(|| handle.spawn_stale_watchdog(self.config.stale_timeout));

        let mut normalizer = Normalizer::new(
            EXCHANGE_NAME,
            QUOTE_PREFIX,
            UpbitDecoder::new(),
            std::mem::take(&mut self.table),
            sender,
        );

        tracing::info!(exchange = EXCHANGE_NAME, "Streaming tickers");
        let result = connection.run(&mut normalizer).await;
        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }
        result.map_err(|_| ExchangeError::DownstreamClosed)
    }

    async fn release(&mut self) {
        self.shutdown.cancel();
        self.feed_state.mark_disconnected();
        tracing::info!(exchange = EXCHANGE_NAME, "Exchange released");
    }
}
