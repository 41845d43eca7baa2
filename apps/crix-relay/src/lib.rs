#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! CRIX Relay - Exchange Ticker Relay
//!
//! Keeps one streaming connection to an exchange ticker feed, suppresses
//! tickers whose price did not change, and hands the rest to a Redis list
//! and a RabbitMQ queue. Each sink retries its own connection without
//! losing buffered tickers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Canonical types with no I/O
//!   - `ticker`: `Ticker`, `PriceEvent`, wire format
//!   - `price_table`: last emitted price per currency
//!   - `subscription`: subscribe frames replayed on connect
//!
//! - **Application**: Pipeline services and port definitions
//!   - `ports`: feed, decoder, broker, cache and exchange contracts
//!   - `services`: feed connection, normalizer, distribution, sinks
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `websocket`: feed sessions over tokio-tungstenite
//!   - `upbit`: Upbit messages, decoder, REST loader, ticket signer
//!   - `registry`: exchange lookup by name
//!   - `rabbitmq` / `redis`: sink adapters
//!   - `config`, `telemetry`, `metrics`, `health`
//!
//! # Data Flow
//!
//! ```text
//!                                                   ┌────────────┐
//!                                              ┌───►│ Cache Sink │──► Redis RPUSH CRIX
//! Exchange WS ──► Feed ──► Normalizer ──► Distribution
//!                 Connection  (price check)    └───►│ Queue Sink │──► RabbitMQ queue UPBIT
//!                                                   └────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Canonical ticker types with no external dependencies.
pub mod domain;

/// Application layer - Pipeline services and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::price_table::PriceTable;
pub use domain::subscription::{SubscriptionDescriptor, SubscriptionError};
pub use domain::ticker::{PriceEvent, Ticker, currency_code};

// Pipeline services
pub use application::services::{
    CacheSink, CacheSinkConfig, ChannelClosed, FeedConnection, FeedConnectionConfig, FeedState,
    Normalizer, QueueSink, QueueSinkConfig, RetryPolicy, SinkState, TickerReceiver, TickerSender,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, Credentials, LoggingSettings, RelayConfig};

// Exchanges
pub use infrastructure::registry::{ExchangeRegistry, RegistryError};
pub use infrastructure::upbit::{UpbitConfig, UpbitExchange};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::{SinkKind, init_metrics};

// Telemetry
pub use infrastructure::telemetry::{TelemetryGuard, init as init_telemetry};
