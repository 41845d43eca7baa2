//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `FeedConnection`: owns the exchange session, reconnects and replays
//!   subscriptions
//! - `Normalizer`: decodes frames and emits tickers whose price changed
//! - `distribution`: bounded FIFO hand-off from the normalizer to the sinks
//! - `QueueSink` / `CacheSink`: downstream publishers with their own retry
//! - `RetryPolicy`: fixed-interval retry with optional jitter

pub mod cache_sink;
pub mod distribution;
pub mod feed;
pub mod normalizer;
pub mod queue_sink;
pub mod retry;
pub mod sink_state;

pub use cache_sink::{CacheSink, CacheSinkConfig};
pub use distribution::{ChannelClosed, TickerReceiver, TickerSender, channel};
pub use feed::{
    ConnectionState, FeedCommand, FeedConnection, FeedConnectionConfig, FeedHandle, FeedState,
};
pub use normalizer::Normalizer;
pub use queue_sink::{QueueSink, QueueSinkConfig};
pub use retry::RetryPolicy;
pub use sink_state::SinkState;
