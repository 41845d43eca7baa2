//! CRIX Relay Binary
//!
//! Streams exchange tickers into a Redis list and a RabbitMQ queue.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin crix-relay
//! ```
//!
//! # Environment Variables
//!
//! ## Required (when the queue sink is wired)
//! - `RABBITMQ_USER_NAME`: broker user
//! - `RABBITMQ_USER_PASSWORD`: broker password
//!
//! ## Optional
//! - `RELAY_EXCHANGE`: exchange to run (default: UPBIT)
//! - `RELAY_SINKS`: comma list of `cache`, `queue` (default: cache,queue)
//! - `RELAY_CHANNEL_CAPACITY`: per-sink buffer (default: 512)
//! - `RELAY_HEALTH_PORT`: health/metrics HTTP port, 0 disables (default: 8083)
//! - `RABBITMQ_HOST` / `RABBITMQ_PORT`: broker address (default: localhost:5672)
//! - `REDIS_HOST` / `REDIS_PORT` / `REDIS_DB_NUMBER`: cache address (default: localhost:6379, db 0)
//! - `LOG_LEVEL`: default log filter (default: info)
//! - `LOG_PATH`: log directory (default: stdout)
//! - `OTEL_ENABLED`: export spans over OTLP (default: false)
//! - `RUST_LOG`: overrides `LOG_LEVEL`

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use crix_relay::application::ports::ExchangeError;
use crix_relay::application::services::{CacheSink, QueueSink, SinkState, TickerSender};
use crix_relay::infrastructure::config::{LoggingSettings, RelayConfig};
use crix_relay::infrastructure::health::{HealthServer, HealthServerState};
use crix_relay::infrastructure::rabbitmq::RabbitMqConnector;
use crix_relay::infrastructure::redis::RedisPool;
use crix_relay::infrastructure::registry::ExchangeRegistry;
use crix_relay::infrastructure::telemetry;
use crix_relay::init_metrics;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Time allowed for sinks to drain their buffers on shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Time allowed for the feed session to close on shutdown.
const FEED_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init(&LoggingSettings::from_env())?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting CRIX relay");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Metrics disabled");
    }

    let config = RelayConfig::from_env().inspect_err(|e| {
        tracing::error!(error = %e, "Invalid configuration");
    })?;
    log_config(&config);

    let registry = ExchangeRegistry::with_defaults();
    let mut exchange = registry.build(&config.exchange, &config)?;

    let cache_sink = if config.sinks.cache {
        let pool = RedisPool::new(
            &config.cache.url(),
            config.cache.max_idle,
            config.cache.max_active,
        )?;
        let sink = Arc::new(CacheSink::new(Arc::new(pool), config.cache_sink_config()));
        sink.ping()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Cache unreachable at startup"))
            .context("cache startup ping failed")?;
        tracing::info!(host = %config.cache.host, port = config.cache.port, "Cache reachable");
        Some(sink)
    } else {
        None
    };

    let queue_sink = if config.sinks.queue {
        let uri = config
            .broker
            .amqp_uri()
            .context("broker URI cannot be built")?;
        let connector = RabbitMqConnector::new(
            uri,
            format!("{}:{}", config.broker.host, config.broker.port),
        );
        let sink = Arc::new(QueueSink::new(connector, config.queue_sink_config()));
        sink.connect()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "Broker unreachable at startup"))
            .context("broker startup connect failed")?;
        Some(sink)
    } else {
        None
    };

    let mut sender = TickerSender::new(config.channel_capacity);
    let cache_receiver = cache_sink.as_ref().map(|_| sender.subscribe());
    let queue_receiver = queue_sink.as_ref().map(|_| sender.subscribe());

    exchange
        .initialize()
        .await
        .inspect_err(|e| tracing::error!(error = %e, "Exchange initialization failed"))?;

    let mut sink_states: Vec<Arc<SinkState>> = Vec::new();
    let mut sink_tasks: Vec<JoinHandle<()>> = Vec::new();

    if let (Some(sink), Some(receiver)) = (&cache_sink, cache_receiver) {
        sink_states.push(sink.state());
        let sink = Arc::clone(sink);
        sink_tasks.push(tokio::spawn(async move { sink.run(receiver).await }));
    }
    if let (Some(sink), Some(receiver)) = (&queue_sink, queue_receiver) {
        sink_states.push(sink.state());
        let sink = Arc::clone(sink);
        sink_tasks.push(tokio::spawn(async move { sink.run(receiver).await }));
    }
    let probe = cache_sink.as_ref().map(CacheSink::spawn_probe);

    let shutdown_token = CancellationToken::new();
    if config.server.health_port != 0 {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            exchange.name().to_string(),
            exchange.feed_state(),
            sink_states,
        ));
        let health_server = HealthServer::new(
            config.server.health_port,
            health_state,
            shutdown_token.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    tracing::info!(
        exchange = exchange.name(),
        sinks = sink_tasks.len(),
        "Relay ready"
    );

    let feed_shutdown = exchange.shutdown_token();
    {
        let execute = exchange.execute(sender);
        tokio::pin!(execute);

        tokio::select! {
            result = &mut execute => log_exchange_result(result),
            () = await_shutdown() => {
                feed_shutdown.cancel();
                match tokio::time::timeout(FEED_CLOSE_TIMEOUT, &mut execute).await {
                    Ok(result) => log_exchange_result(result),
                    Err(_) => tracing::warn!("Feed session did not close in time"),
                }
            }
        }
    }

    shutdown_token.cancel();
    exchange.release().await;

    if let Some(probe) = probe {
        probe.abort();
    }
    drain_sinks(sink_tasks).await;

    if let Some(sink) = queue_sink {
        sink.release().await;
    }
    if let Some(sink) = cache_sink {
        sink.release();
    }

    tracing::info!("CRIX relay stopped");
    Ok(())
}

fn log_exchange_result(result: Result<(), ExchangeError>) {
    match result {
        Ok(()) => tracing::info!("Exchange stream ended"),
        Err(e) => tracing::error!(error = %e, "Exchange stream failed"),
    }
}

/// Wait for the sinks to empty their buffers once the sender is gone.
async fn drain_sinks(tasks: Vec<JoinHandle<()>>) {
    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Draining sink buffers"
    );

    let drain = futures_util::future::join_all(tasks);
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, drain).await {
        Ok(results) => {
            for result in results {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Sink task failed");
                }
            }
        }
        Err(_) => tracing::warn!("Sink drain timed out, dropping buffered tickers"),
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &RelayConfig) {
    tracing::info!(
        exchange = %config.exchange,
        cache = config.sinks.cache,
        queue = config.sinks.queue,
        channel_capacity = config.channel_capacity,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        rest_url = %config.upbit.rest_url,
        ws_url = %config.upbit.ws_url,
        broker = %format!("{}:{}", config.broker.host, config.broker.port),
        cache = %config.cache.url(),
        "Endpoints"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
