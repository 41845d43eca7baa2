//! Application Layer - Pipeline services and port definitions.
//!
//! This layer contains the streaming pipeline (feed connection, normalizer,
//! distribution channel, sinks) and the port interfaces that the
//! infrastructure adapters implement.

/// Port interfaces for the feed, the sinks, and exchanges.
pub mod ports;

/// Pipeline services: feed connection, normalizer, distribution, sinks.
pub mod services;
