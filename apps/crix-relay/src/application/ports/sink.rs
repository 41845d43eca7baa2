//! Sink Ports
//!
//! Contracts for the message broker and the pooled cache store.

use async_trait::async_trait;

// =============================================================================
// Message Broker
// =============================================================================

/// Message broker errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    /// Connecting or opening a channel failed.
    #[error("broker connection error: {0}")]
    Connection(String),

    /// Declaring a queue failed.
    #[error("queue declare failed for {queue}: {message}")]
    Declare {
        /// Queue name.
        queue: String,
        /// Broker error message.
        message: String,
    },

    /// Publishing a message failed.
    #[error("publish failed: {0}")]
    Publish(String),

    /// The ticker could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Dials broker sessions (connection + channel).
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Session type produced by a successful dial.
    type Session: BrokerSession;

    /// Connect and open a channel.
    async fn dial(&self) -> Result<Self::Session, QueueError>;
}

/// One open broker connection with its channel.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerSession: Send + Sync {
    /// Declare a non-durable, non-exclusive queue.
    async fn declare_queue(&self, name: &str) -> Result<(), QueueError>;

    /// Publish a JSON payload on the default exchange.
    async fn publish(&self, routing_key: &str, payload: &[u8]) -> Result<(), QueueError>;

    /// Close the channel and the connection. Errors are ignored.
    async fn close(&self);
}

// =============================================================================
// Cache Store
// =============================================================================

/// Cache store errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// No connection could be obtained from the pool.
    #[error("cache connection unavailable: {0}")]
    Unavailable(String),

    /// A command failed on an obtained connection.
    #[error("cache command {command} failed: {message}")]
    Command {
        /// Command name (`PING`, `SELECT`, `RPUSH`).
        command: &'static str,
        /// Store error message.
        message: String,
    },

    /// The connection dropped while running a command.
    #[error("cache connection lost during {command}: {message}")]
    ConnectionLost {
        /// Command name.
        command: &'static str,
        /// Transport error message.
        message: String,
    },

    /// The pool has been closed.
    #[error("cache pool closed")]
    PoolClosed,
}

impl CacheError {
    /// Whether the connection that produced this error is unusable.
    #[must_use]
    pub const fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionLost { .. })
    }
}

/// Pool of cache connections with bounded idle and active counts.
#[async_trait]
pub trait CachePool: Send + Sync {
    /// Connection type handed out by the pool.
    type Connection: CacheConnection;

    /// Acquire a connection. It returns to the pool when dropped.
    async fn get(&self) -> Result<Self::Connection, CacheError>;

    /// Close the pool and drop idle connections.
    fn close(&self);
}

/// One pooled cache connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheConnection: Send {
    /// `PING` the store.
    async fn ping(&mut self) -> Result<(), CacheError>;

    /// `SELECT` a numbered database.
    async fn select(&mut self, db: i64) -> Result<(), CacheError>;

    /// `RPUSH` a value onto a list, returning the new list length.
    async fn rpush(&mut self, list: &str, value: &str) -> Result<i64, CacheError>;
}
