//! RabbitMQ Broker Adapter
//!
//! `BrokerConnector` over `lapin`. Each session owns one AMQP connection
//! and one channel. Tickers go to the default exchange with the routing key
//! naming the destination queue.

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};

use crate::application::ports::{BrokerConnector, BrokerSession, QueueError};

const CONTENT_TYPE: &str = "application/json";
const DEFAULT_EXCHANGE: &str = "";
const REPLY_SUCCESS: u16 = 200;

/// Dials AMQP sessions.
#[derive(Clone)]
pub struct RabbitMqConnector {
    uri: String,
    endpoint: String,
}

impl RabbitMqConnector {
    /// Create a connector for an `amqp://` URI.
    ///
    /// `endpoint` is the credential-free `host:port` used in logs.
    #[must_use]
    pub fn new(uri: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Broker address without credentials.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl std::fmt::Debug for RabbitMqConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RabbitMqConnector")
            .field("uri", &"[REDACTED]")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[async_trait]
impl BrokerConnector for RabbitMqConnector {
    type Session = RabbitMqSession;

    async fn dial(&self) -> Result<RabbitMqSession, QueueError> {
        let connection = Connection::connect(&self.uri, ConnectionProperties::default())
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                if let Err(close_err) = connection.close(REPLY_SUCCESS, "channel failed").await {
                    tracing::debug!(error = %close_err, "Error closing broker connection");
                }
                return Err(QueueError::Connection(e.to_string()));
            }
        };

        tracing::debug!(endpoint = %self.endpoint, "Broker session opened");
        Ok(RabbitMqSession {
            connection,
            channel,
        })
    }
}

/// One AMQP connection and its channel.
pub struct RabbitMqSession {
    connection: Connection,
    channel: Channel,
}

#[async_trait]
impl BrokerSession for RabbitMqSession {
    async fn declare_queue(&self, name: &str) -> Result<(), QueueError> {
        let options = QueueDeclareOptions {
            passive: false,
            durable: false,
            exclusive: false,
            auto_delete: false,
            nowait: false,
        };

        self.channel
            .queue_declare(name, options, FieldTable::default())
            .await
            .map(|_| ())
            .map_err(|e| QueueError::Declare {
                queue: name.to_string(),
                message: e.to_string(),
            })
    }

    async fn publish(&self, routing_key: &str, payload: &[u8]) -> Result<(), QueueError> {
        let confirm = self
            .channel
            .basic_publish(
                DEFAULT_EXCHANGE,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_content_type(CONTENT_TYPE.into()),
            )
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?;

        confirm
            .await
            .map(|_| ())
            .map_err(|e| QueueError::Publish(e.to_string()))
    }

    async fn close(&self) {
        if let Err(e) = self.channel.close(REPLY_SUCCESS, "closing").await {
            tracing::debug!(error = %e, "Error closing broker channel");
        }
        if let Err(e) = self.connection.close(REPLY_SUCCESS, "closing").await {
            tracing::debug!(error = %e, "Error closing broker connection");
        }
    }
}
