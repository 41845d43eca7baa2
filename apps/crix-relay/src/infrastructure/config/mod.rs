//! Configuration Module
//!
//! Environment-driven configuration for the relay.

mod settings;

pub use settings::{
    BrokerSettings, CacheSettings, ConfigError, Credentials, LoggingSettings, RelayConfig,
    ServerSettings, SinkSet, SinkTarget,
};
