//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, connection status reporting, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (feed connected)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{ConnectionState, FeedState, SinkState};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Relay version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Exchange feed status.
    pub feed: FeedInfo,
    /// Status of each wired sink.
    pub sinks: Vec<SinkInfo>,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Feed and every sink connected.
    Healthy,
    /// Feed connected, some sink retrying.
    Degraded,
    /// Feed not connected.
    Unhealthy,
}

/// Exchange feed status.
#[derive(Debug, Clone, Serialize)]
pub struct FeedInfo {
    /// Exchange name.
    pub exchange: String,
    /// Connection state.
    pub state: &'static str,
    /// Whether the feed is connected.
    pub connected: bool,
    /// Raw frames read.
    pub frames_received: u64,
    /// Completed reconnect sequences.
    pub reconnects: u64,
    /// Failed dial attempts.
    pub dial_failures: u64,
    /// Time of the last successful connect.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Most recent feed error.
    pub last_error: Option<String>,
}

/// Sink status.
#[derive(Debug, Clone, Serialize)]
pub struct SinkInfo {
    /// Sink name.
    pub sink: &'static str,
    /// Whether the sink holds a healthy connection.
    pub connected: bool,
    /// Tickers delivered.
    pub delivered: u64,
    /// Failures of any kind.
    pub failures: u64,
    /// Most recent failure.
    pub last_error: Option<String>,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    exchange: String,
    feed: Arc<FeedState>,
    sinks: Vec<Arc<SinkState>>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        exchange: String,
        feed: Arc<FeedState>,
        sinks: Vec<Arc<SinkState>>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            exchange,
            feed,
            sinks,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Routes served by the health server.
    #[must_use]
    pub fn router(state: Arc<HealthServerState>) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError::ServerFailed` if the HTTP server fails.
    pub async fn serve(self, listener: TcpListener) -> Result<(), HealthServerError> {
        let port = listener.local_addr().map_or(self.port, |addr| addr.port());
        tracing::info!(port, "Health server listening");

        axum::serve(listener, Self::router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.feed.is_connected() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let feed = feed_info(&state.exchange, &state.feed);
    let sinks: Vec<SinkInfo> = state.sinks.iter().map(|s| sink_info(s)).collect();
    let status = determine_health_status(&feed, &sinks);

    HealthResponse {
        status,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feed,
        sinks,
    }
}

fn feed_info(exchange: &str, state: &FeedState) -> FeedInfo {
    let connection_state = state.get_state();

    FeedInfo {
        exchange: exchange.to_string(),
        state: connection_state.as_str(),
        connected: connection_state == ConnectionState::Connected,
        frames_received: state.frames_received(),
        reconnects: state.reconnects(),
        dial_failures: state.dial_failures(),
        last_connected_at: state.last_connected_at(),
        last_error: state.last_error(),
    }
}

fn sink_info(state: &SinkState) -> SinkInfo {
    SinkInfo {
        sink: state.kind().as_str(),
        connected: state.is_connected(),
        delivered: state.delivered(),
        failures: state.failures(),
        last_error: state.last_error(),
    }
}

fn determine_health_status(feed: &FeedInfo, sinks: &[SinkInfo]) -> HealthStatus {
    if !feed.connected {
        HealthStatus::Unhealthy
    } else if sinks.iter().all(|s| s.connected) {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
