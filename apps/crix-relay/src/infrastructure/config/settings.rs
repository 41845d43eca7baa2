//! Relay Configuration Settings
//!
//! Configuration types for the relay, loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::application::services::cache_sink::{
    DEFAULT_PROBE_INTERVAL, DEFAULT_RETRY_INTERVAL as CACHE_RETRY_INTERVAL,
};
use crate::application::services::distribution::DEFAULT_CAPACITY;
use crate::application::services::feed::{DEFAULT_FRAME_INTERVAL, DEFAULT_RECONNECT_INTERVAL};
use crate::application::services::queue_sink::DEFAULT_RETRY_INTERVAL as QUEUE_RETRY_INTERVAL;
use crate::application::services::{CacheSinkConfig, QueueSinkConfig, RetryPolicy};
use crate::infrastructure::upbit::{self, UpbitConfig};

/// Default OTLP endpoint.
const DEFAULT_OTLP_ENDPOINT: &str = "http://localhost:4318";

/// Default service name for traces.
const DEFAULT_SERVICE_NAME: &str = "crix-relay";

/// Sink that can be wired to the distribution channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkTarget {
    /// Redis list.
    Cache,
    /// RabbitMQ queue.
    Queue,
}

impl SinkTarget {
    /// Parse a sink name.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "cache" | "redis" => Some(Self::Cache),
            "queue" | "rabbitmq" => Some(Self::Queue),
            _ => None,
        }
    }

    /// Get the sink name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Queue => "queue",
        }
    }
}

/// Which sinks are wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkSet {
    /// Cache sink wired.
    pub cache: bool,
    /// Queue sink wired.
    pub queue: bool,
}

impl Default for SinkSet {
    fn default() -> Self {
        Self {
            cache: true,
            queue: true,
        }
    }
}

impl SinkSet {
    /// Parse a comma-separated sink list.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for an unknown name or an empty
    /// list.
    pub fn parse(key: &str, value: &str) -> Result<Self, ConfigError> {
        let mut set = Self {
            cache: false,
            queue: false,
        };

        for name in value.split(',').filter(|s| !s.trim().is_empty()) {
            match SinkTarget::from_str_case_insensitive(name) {
                Some(SinkTarget::Cache) => set.cache = true,
                Some(SinkTarget::Queue) => set.queue = true,
                None => {
                    return Err(ConfigError::InvalidValue {
                        key: key.to_string(),
                        value: value.to_string(),
                    });
                }
            }
        }

        if set.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
            });
        }
        Ok(set)
    }

    /// Whether a sink is wired.
    #[must_use]
    pub const fn contains(&self, target: SinkTarget) -> bool {
        match target {
            SinkTarget::Cache => self.cache,
            SinkTarget::Queue => self.queue,
        }
    }

    /// Whether no sink is wired.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        !self.cache && !self.queue
    }

    /// Number of wired sinks.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.cache as usize + self.queue as usize
    }
}

/// Broker credentials.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(username: String, password: String) -> Self {
        Self { username, password }
    }

    /// Get the user name.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Get the password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &"[REDACTED]")
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// RabbitMQ settings.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Credentials, required when the queue sink is wired.
    pub credentials: Option<Credentials>,
    /// Reconnect interval.
    pub retry_interval: Duration,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5672,
            credentials: None,
            retry_interval: QUEUE_RETRY_INTERVAL,
        }
    }
}

impl BrokerSettings {
    /// AMQP URI on the default virtual host. User name and password are
    /// percent-encoded.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if no credentials are set, or
    /// `ConfigError::InvalidValue` if the host does not form a valid URI.
    pub fn amqp_uri(&self) -> Result<String, ConfigError> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or_else(|| ConfigError::MissingEnvVar("RABBITMQ_USER_NAME".to_string()))?;

        let invalid_host = || ConfigError::InvalidValue {
            key: "RABBITMQ_HOST".to_string(),
            value: self.host.clone(),
        };
        let mut uri = reqwest::Url::parse(&format!("amqp://{}:{}/%2f", self.host, self.port))
            .map_err(|_| invalid_host())?;
        uri.set_username(credentials.username())
            .map_err(|()| invalid_host())?;
        uri.set_password(Some(credentials.password()))
            .map_err(|()| invalid_host())?;

        Ok(uri.into())
    }
}

/// Redis settings.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Redis host.
    pub host: String,
    /// Redis port.
    pub port: u16,
    /// Database index for `SELECT`.
    pub db: i64,
    /// Idle connections kept by the pool.
    pub max_idle: usize,
    /// Connections the pool may hand out at once.
    pub max_active: usize,
    /// Acquisition retry interval.
    pub retry_interval: Duration,
    /// Health probe interval.
    pub probe_interval: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
            max_idle: 80,
            max_active: 12_000,
            retry_interval: CACHE_RETRY_INTERVAL,
            probe_interval: DEFAULT_PROBE_INTERVAL,
        }
    }
}

impl CacheSettings {
    /// Redis connection URL.
    #[must_use]
    pub fn url(&self) -> String {
        format!("redis://{}:{}/", self.host, self.port)
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check and metrics HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Logging and trace export settings.
#[derive(Debug, Clone)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for log files; stdout when unset.
    pub path: Option<PathBuf>,
    /// Whether spans are exported over OTLP.
    pub otel_enabled: bool,
    /// OTLP exporter endpoint.
    pub otlp_endpoint: String,
    /// Service name for traces.
    pub service_name: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            path: None,
            otel_enabled: false,
            otlp_endpoint: DEFAULT_OTLP_ENDPOINT.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

impl LoggingSettings {
    /// Load logging settings alone, before the rest of the configuration.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(&env_lookup)
    }

    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            level: non_empty(lookup, "LOG_LEVEL").unwrap_or(defaults.level),
            path: non_empty(lookup, "LOG_PATH").map(PathBuf::from),
            otel_enabled: non_empty(lookup, "OTEL_ENABLED")
                .is_some_and(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes")),
            otlp_endpoint: non_empty(lookup, "OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or(defaults.otlp_endpoint),
            service_name: non_empty(lookup, "OTEL_SERVICE_NAME").unwrap_or(defaults.service_name),
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Registry key of the exchange to run.
    pub exchange: String,
    /// Wired sinks.
    pub sinks: SinkSet,
    /// Capacity of each sink's distribution buffer.
    pub channel_capacity: usize,
    /// Fraction of jitter applied to every fixed retry interval.
    pub retry_jitter: f64,
    /// Server port settings.
    pub server: ServerSettings,
    /// RabbitMQ settings.
    pub broker: BrokerSettings,
    /// Redis settings.
    pub cache: CacheSettings,
    /// Upbit integration settings.
    pub upbit: UpbitConfig,
    /// Logging settings.
    pub logging: LoggingSettings,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            exchange: upbit::EXCHANGE_NAME.to_string(),
            sinks: SinkSet::default(),
            channel_capacity: DEFAULT_CAPACITY,
            retry_jitter: 0.0,
            server: ServerSettings::default(),
            broker: BrokerSettings::default(),
            cache: CacheSettings::default(),
            upbit: UpbitConfig::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or empty, or a
    /// variable holds an unusable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Same as [`RelayConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = &lookup;
        let defaults = Self::default();

        let sinks = match non_empty(lookup, "RELAY_SINKS") {
            Some(value) => SinkSet::parse("RELAY_SINKS", &value)?,
            None => defaults.sinks,
        };

        let retry_jitter = parse_env(lookup, "RETRY_JITTER_FACTOR", defaults.retry_jitter);
        if !(0.0..=1.0).contains(&retry_jitter) {
            return Err(ConfigError::InvalidValue {
                key: "RETRY_JITTER_FACTOR".to_string(),
                value: retry_jitter.to_string(),
            });
        }

        let credentials = if sinks.queue {
            Some(Credentials::new(
                required(lookup, "RABBITMQ_USER_NAME")?,
                required(lookup, "RABBITMQ_USER_PASSWORD")?,
            ))
        } else {
            None
        };

        let broker = BrokerSettings {
            host: non_empty(lookup, "RABBITMQ_HOST").unwrap_or(defaults.broker.host),
            port: parse_env(lookup, "RABBITMQ_PORT", defaults.broker.port),
            credentials,
            retry_interval: parse_env_duration_secs(
                lookup,
                "QUEUE_RETRY_INTERVAL_SECS",
                defaults.broker.retry_interval,
            ),
        };

        let cache = CacheSettings {
            host: non_empty(lookup, "REDIS_HOST").unwrap_or(defaults.cache.host),
            port: parse_env(lookup, "REDIS_PORT", defaults.cache.port),
            db: parse_env(lookup, "REDIS_DB_NUMBER", defaults.cache.db),
            max_idle: parse_env(lookup, "REDIS_MAX_IDLE", defaults.cache.max_idle),
            max_active: parse_env(lookup, "REDIS_MAX_ACTIVE", defaults.cache.max_active),
            retry_interval: parse_env_duration_secs(
                lookup,
                "CACHE_RETRY_INTERVAL_SECS",
                defaults.cache.retry_interval,
            ),
            probe_interval: parse_env_duration_secs(
                lookup,
                "CACHE_PROBE_INTERVAL_SECS",
                defaults.cache.probe_interval,
            ),
        };

        let upbit = UpbitConfig {
            rest_url: non_empty(lookup, "UPBIT_REST_URL").unwrap_or(defaults.upbit.rest_url),
            ws_url: non_empty(lookup, "UPBIT_WS_URL").unwrap_or(defaults.upbit.ws_url),
            ticket_key: non_empty(lookup, "UPBIT_TICKET_KEY").unwrap_or(defaults.upbit.ticket_key),
            codes_per_frame: parse_env(
                lookup,
                "FEED_CODES_PER_FRAME",
                defaults.upbit.codes_per_frame,
            ),
            feed_reconnect: RetryPolicy::fixed(parse_env_duration_secs(
                lookup,
                "FEED_RECONNECT_INTERVAL_SECS",
                DEFAULT_RECONNECT_INTERVAL,
            ))
            .with_jitter(retry_jitter),
            frame_interval: parse_env_duration_millis(
                lookup,
                "FEED_FRAME_INTERVAL_MS",
                DEFAULT_FRAME_INTERVAL,
            ),
            stale_timeout: parse_env_duration_secs(
                lookup,
                "FEED_STALE_TIMEOUT_SECS",
                defaults.upbit.stale_timeout,
            ),
            rest_retry: defaults.upbit.rest_retry.with_jitter(retry_jitter),
        };

        Ok(Self {
            exchange: non_empty(lookup, "RELAY_EXCHANGE").unwrap_or(defaults.exchange),
            sinks,
            channel_capacity: parse_env(lookup, "RELAY_CHANNEL_CAPACITY", defaults.channel_capacity),
            retry_jitter,
            server: ServerSettings {
                health_port: parse_env(lookup, "RELAY_HEALTH_PORT", defaults.server.health_port),
            },
            broker,
            cache,
            upbit,
            logging: LoggingSettings::from_lookup(lookup),
        })
    }

    /// Queue sink settings. One queue is declared per exchange key.
    #[must_use]
    pub fn queue_sink_config(&self) -> QueueSinkConfig {
        QueueSinkConfig {
            queues: vec![self.exchange.to_ascii_uppercase()],
            retry: RetryPolicy::fixed(self.broker.retry_interval).with_jitter(self.retry_jitter),
        }
    }

    /// Cache sink settings.
    #[must_use]
    pub fn cache_sink_config(&self) -> CacheSinkConfig {
        CacheSinkConfig {
            retry: RetryPolicy::fixed(self.cache.retry_interval).with_jitter(self.retry_jitter),
            probe_interval: self.cache.probe_interval,
            ..CacheSinkConfig::new(self.cache.db)
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable holds an unusable value.
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Rejected value.
        value: String,
    },
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String, ConfigError> {
    let value = lookup(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value)
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|v| !v.trim().is_empty())
}

fn parse_env<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
