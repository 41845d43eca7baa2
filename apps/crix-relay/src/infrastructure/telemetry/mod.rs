//! Logging and OpenTelemetry Integration
//!
//! Installs the global `tracing` subscriber: an `EnvFilter` (from `RUST_LOG`,
//! else `LOG_LEVEL`), one fmt layer writing to stdout or to a log file, and
//! an optional OTLP span exporter.
//!
//! # Environment Variables
//!
//! - `LOG_LEVEL`: default filter directive (default: info)
//! - `LOG_PATH`: log directory; each run writes `<dir>/<RFC3339>.log`
//! - `OTEL_ENABLED`: set to "true" to export spans (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: http://localhost:4318)
//! - `OTEL_SERVICE_NAME`: service name for traces (default: crix-relay)
//!
//! # Usage
//!
//! ```ignore
//! use crix_relay::infrastructure::{config::LoggingSettings, telemetry};
//!
//! // Keep the guard alive for the whole run
//! let _guard = telemetry::init(&LoggingSettings::from_env())?;
//! ```

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::infrastructure::config::LoggingSettings;

/// Telemetry setup errors.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The filter directive does not parse.
    #[error("invalid log filter {directive:?}: {message}")]
    Filter {
        /// Rejected directive.
        directive: String,
        /// Parser message.
        message: String,
    },

    /// The log file could not be created.
    #[error("cannot open log file {path}: {source}")]
    LogFile {
        /// Attempted path.
        path: PathBuf,
        /// I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The OTLP exporter could not be built.
    #[error("failed to create OTLP exporter: {0}")]
    Exporter(String),

    /// A global subscriber is already installed.
    #[error("tracing subscriber already installed: {0}")]
    AlreadyInstalled(String),
}

/// Guard that shuts down OpenTelemetry when dropped.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
    log_file: Option<PathBuf>,
}

impl TelemetryGuard {
    /// Path of the log file, when logging to a file.
    #[must_use]
    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Failed to shutdown OpenTelemetry tracer provider: {e}");
        }
    }
}

/// Log file name for a run started at `started`.
#[must_use]
pub fn log_file_path(dir: &Path, started: DateTime<Utc>) -> PathBuf {
    dir.join(format!(
        "{}.log",
        started.to_rfc3339_opts(SecondsFormat::Secs, true)
    ))
}

/// Create the log directory if needed and open a fresh log file in it.
///
/// # Errors
///
/// Returns `TelemetryError::LogFile` if the directory or file cannot be
/// created.
pub fn open_log_file(dir: &Path) -> Result<(File, PathBuf), TelemetryError> {
    let path = log_file_path(dir, Utc::now());
    std::fs::create_dir_all(dir).map_err(|source| TelemetryError::LogFile {
        path: dir.to_path_buf(),
        source,
    })?;
    let file = File::create(&path).map_err(|source| TelemetryError::LogFile {
        path: path.clone(),
        source,
    })?;
    Ok((file, path))
}

/// Build the filter from `RUST_LOG`, falling back to `level`.
///
/// # Errors
///
/// Returns `TelemetryError::Filter` if neither source yields a valid filter.
#[allow(clippy::expect_used)]
pub fn build_filter(level: &str) -> Result<EnvFilter, TelemetryError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).map_err(|e| TelemetryError::Filter {
            directive: level.to_string(),
            message: e.to_string(),
        })?,
    };

    Ok(filter
        .add_directive(
            "lapin=warn"
                .parse()
                .expect("static directive 'lapin=warn' is valid"),
        )
        .add_directive(
            "hyper=warn"
                .parse()
                .expect("static directive 'hyper=warn' is valid"),
        )
        .add_directive(
            "tungstenite=warn"
                .parse()
                .expect("static directive 'tungstenite=warn' is valid"),
        ))
}

/// Install the global subscriber.
///
/// Returns a guard that must be kept alive for the duration of the program.
///
/// # Errors
///
/// Returns `TelemetryError` if the filter, the log file, or the exporter
/// cannot be set up, or a subscriber is already installed.
pub fn init(settings: &LoggingSettings) -> Result<TelemetryGuard, TelemetryError> {
    let env_filter = build_filter(&settings.level)?;

    let (file, log_file) = match &settings.path {
        Some(dir) => {
            let (file, path) = open_log_file(dir)?;
            (Some(file), Some(path))
        }
        None => (None, None),
    };

    let stdout_layer = file.is_none().then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
    });

    let file_layer = file.map(|file| {
        tracing_subscriber::fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_target(true)
    });

    let tracer_provider = if settings.otel_enabled {
        let otlp_exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&settings.otlp_endpoint)
            .build()
            .map_err(|e| TelemetryError::Exporter(e.to_string()))?;

        Some(
            SdkTracerProvider::builder()
                .with_batch_exporter(otlp_exporter)
                .with_resource(
                    opentelemetry_sdk::Resource::builder()
                        .with_service_name(settings.service_name.clone())
                        .build(),
                )
                .build(),
        )
    } else {
        None
    };

    let otel_layer = tracer_provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(settings.service_name.clone()))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .with(otel_layer)
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInstalled(e.to_string()))?;

    Ok(TelemetryGuard {
        tracer_provider,
        log_file,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn log_file_is_named_after_start_time() {
        let started = Utc.with_ymd_and_hms(2023, 2, 21, 7, 41, 2).unwrap();
        let path = log_file_path(Path::new("/var/log/crix"), started);
        assert_eq!(path, PathBuf::from("/var/log/crix/2023-02-21T07:41:02Z.log"));
    }

    #[test]
    fn open_log_file_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("logs");

        let (_file, path) = open_log_file(&dir).unwrap();

        assert!(dir.is_dir());
        assert!(path.is_file());
        assert_eq!(path.extension().unwrap(), "log");
    }

    #[test]
    fn open_log_file_reports_path_on_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();

        let err = open_log_file(&blocker).unwrap_err();
        assert!(matches!(err, TelemetryError::LogFile { .. }));
    }

    #[test]
    fn default_settings_disable_export() {
        let settings = LoggingSettings::default();
        assert!(!settings.otel_enabled);
        assert_eq!(settings.service_name, "crix-relay");
    }
}
