//! Exchange Port
//!
//! Capability set every exchange integration provides. The relay looks
//! exchanges up by name in a registry and drives them through this trait,
//! so adding an exchange never touches the pipeline.
//!
//! # Lifecycle
//!
//! ```text
//! initialize ──► prime_snapshot ──► execute (runs until downstream closes
//!                                             or shutdown is signalled) ──► release
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::application::services::distribution::TickerSender;
use crate::application::services::feed::FeedState;
use crate::domain::subscription::SubscriptionError;

/// Errors raised by an exchange integration.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// `execute` or `prime_snapshot` was called before `initialize`.
    #[error("exchange not initialized")]
    NotInitialized,

    /// The subscribe frames could not be built.
    #[error("invalid subscription: {0}")]
    Subscription(#[from] SubscriptionError),

    /// The subscribe ticket could not be signed.
    #[error("ticket signing failed: {0}")]
    Signing(String),

    /// A REST request failed.
    #[error("REST request failed: {0}")]
    Rest(String),

    /// No tradable market carries the local quote prefix.
    #[error("no tradable markets found")]
    NoMarkets,

    /// Every sink receiver has gone away.
    #[error("downstream channel closed")]
    DownstreamClosed,
}

/// One exchange integration.
#[async_trait]
pub trait Exchange: Send {
    /// Registry key (e.g. `UPBIT`).
    fn name(&self) -> &str;

    /// Status of the exchange's feed connection.
    fn feed_state(&self) -> Arc<FeedState>;

    /// Token that, once cancelled, makes a running `execute` close its feed
    /// session and return `Ok`.
    fn shutdown_token(&self) -> CancellationToken;

    /// Enumerate tradable markets and build the subscription descriptor.
    ///
    /// Returns the tracked market codes.
    async fn initialize(&mut self) -> Result<Vec<String>, ExchangeError>;

    /// Prime the price table from a one-time snapshot of `codes`.
    ///
    /// Returns the number of primed currencies. A failed snapshot is not an
    /// error; the table simply stays empty.
    async fn prime_snapshot(&mut self, codes: &[String]) -> Result<usize, ExchangeError>;

    /// Stream tickers into `sender` until every receiver is gone, which is
    /// reported as `ExchangeError::DownstreamClosed`, or until the shutdown
    /// token is cancelled.
    async fn execute(&mut self, sender: TickerSender) -> Result<(), ExchangeError>;

    /// Signal shutdown to the feed connection and mark it disconnected.
    async fn release(&mut self);
}
