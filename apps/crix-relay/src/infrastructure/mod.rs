//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// WebSocket feed sessions.
pub mod websocket;

/// Upbit exchange integration.
pub mod upbit;

/// Exchange lookup by name.
pub mod registry;

/// RabbitMQ queue sink adapter.
pub mod rabbitmq;

/// Redis connection pool for the cache sink.
pub mod redis;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing integration.
pub mod telemetry;
