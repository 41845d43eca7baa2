//! Queue Sink
//!
//! Publishes every received ticker to the message broker, routed by the
//! ticker's exchange key. Delivery is best effort: a failed publish is
//! logged and dropped, then the sink rebuilds its broker session before
//! taking the next ticker.
//!
//! # Reconnect Sequence
//!
//! 1. Lock the session slot
//! 2. Close the stale channel and connection
//! 3. Repeat {dial, declare queues} at the retry interval until both succeed
//! 4. Release the lock

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use super::distribution::TickerReceiver;
use super::retry::RetryPolicy;
use super::sink_state::SinkState;
use crate::application::ports::{BrokerConnector, BrokerSession, QueueError};
use crate::domain::ticker::Ticker;
use crate::infrastructure::metrics::SinkKind;

/// Default delay between broker reconnect attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Queue sink configuration.
#[derive(Debug, Clone)]
pub struct QueueSinkConfig {
    /// Queues declared on every connect, one per exchange key.
    pub queues: Vec<String>,
    /// Reconnect retry policy.
    pub retry: RetryPolicy,
}

impl QueueSinkConfig {
    /// Configuration with the default retry interval.
    #[must_use]
    pub fn new(queues: Vec<String>) -> Self {
        Self {
            queues,
            retry: RetryPolicy::fixed(DEFAULT_RETRY_INTERVAL),
        }
    }
}

/// Broker publisher.
pub struct QueueSink<C: BrokerConnector> {
    connector: C,
    config: QueueSinkConfig,
    session: Mutex<Option<C::Session>>,
    state: Arc<SinkState>,
}

impl<C: BrokerConnector> QueueSink<C> {
    /// Create a sink. Nothing is dialed until `connect`.
    #[must_use]
    pub fn new(connector: C, config: QueueSinkConfig) -> Self {
        Self {
            connector,
            config,
            session: Mutex::new(None),
            state: Arc::new(SinkState::new(SinkKind::Queue)),
        }
    }

    /// Shared sink status.
    #[must_use]
    pub fn state(&self) -> Arc<SinkState> {
        Arc::clone(&self.state)
    }

    /// Dial the broker and declare every queue once.
    ///
    /// # Errors
    ///
    /// Returns `QueueError` if the broker is unreachable or a declare fails.
    /// At startup this is fatal.
    pub async fn connect(&self) -> Result<(), QueueError> {
        let session = self.open().await?;
        *self.session.lock().await = Some(session);
        self.state.set_connected(true);
        tracing::info!(queues = ?self.config.queues, "Queue sink connected");
        Ok(())
    }

    async fn open(&self) -> Result<C::Session, QueueError> {
        let session = self.connector.dial().await?;
        for queue in &self.config.queues {
            if let Err(e) = session.declare_queue(queue).await {
                session.close().await;
                return Err(e);
            }
        }
        Ok(session)
    }

    /// Serialize and publish one ticker.
    ///
    /// # Errors
    ///
    /// Returns `QueueError` if there is no session, serialization fails, or
    /// the broker rejects the publish.
    pub async fn publish(&self, ticker: &Ticker) -> Result<(), QueueError> {
        let payload = ticker
            .to_wire()
            .map_err(|e| QueueError::Serialization(e.to_string()))?;

        let guard = self.session.lock().await;
        let session = guard
            .as_ref()
            .ok_or_else(|| QueueError::Connection("not connected".to_string()))?;
        session.publish(&ticker.exchange, payload.as_bytes()).await
    }

    /// Close the current session and reconnect until dial and declare both
    /// succeed.
    pub async fn reconnect(&self) {
        let mut guard = self.session.lock().await;
        self.state.set_connected(false);

        if let Some(stale) = guard.take() {
            stale.close().await;
        }

        loop {
            match self.open().await {
                Ok(session) => {
                    *guard = Some(session);
                    self.state.set_connected(true);
                    tracing::info!("Queue sink reconnected");
                    return;
                }
                Err(e) => {
                    let delay = self.config.retry.next_delay();
                    tracing::error!(
                        error = %e,
                        delay_ms = delay.as_millis(),
                        "Broker reconnect failed, retrying"
                    );
                    self.state.record_failure("reconnect", e.to_string());
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Publish tickers until the receiver closes.
    pub async fn run(&self, mut receiver: TickerReceiver) {
        tracing::info!("Queue sink started");

        while let Some(ticker) = receiver.recv().await {
            match self.publish(&ticker).await {
                Ok(()) => self.state.record_delivered(),
                Err(QueueError::Serialization(message)) => {
                    tracing::warn!(error = %message, currency = %ticker.currency, "Dropping unserializable ticker");
                    self.state.record_failure("serialize", message);
                }
                Err(e) => {
                    tracing::error!(error = %e, currency = %ticker.currency, "Publish failed, dropping ticker and reconnecting");
                    self.state.record_failure("publish", e.to_string());
                    self.reconnect().await;
                }
            }
        }

        tracing::info!("Queue sink receiver closed");
    }

    /// Close the broker session.
    pub async fn release(&self) {
        if let Some(session) = self.session.lock().await.take() {
            session.close().await;
        }
        self.state.set_connected(false);
        tracing::info!("Queue sink released");
    }
}

// =============================================================================
// Tests
// =============================================================================
