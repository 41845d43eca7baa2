//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `FeedConnector` / `FeedSession`: streaming connection to the exchange
//! - `BrokerConnector` / `BrokerSession`: message broker publication
//! - `CachePool` / `CacheConnection`: pooled cache list store
//!
//! ## Driver Ports (Inbound)
//!
//! - `FrameHandler`: receives raw frames from the feed connection
//! - `EventDecoder`: turns raw frames into exchange-neutral price events
//! - `Exchange`: capability set every exchange integration provides

mod exchange;
mod feed;
mod sink;

pub use exchange::{Exchange, ExchangeError};
pub use feed::{DecodeError, EventDecoder, FeedConnector, FeedError, FeedSession, FrameHandler};
pub use sink::{
    BrokerConnector, BrokerSession, CacheConnection, CacheError, CachePool, QueueError,
};

#[cfg(test)]
pub use sink::{MockBrokerSession, MockCacheConnection};
