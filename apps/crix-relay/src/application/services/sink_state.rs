//! Sink status shared with the health server.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::infrastructure::metrics::{self, SinkKind};

/// Lock-light status of one sink. Written only by the owning sink.
#[derive(Debug)]
pub struct SinkState {
    kind: SinkKind,
    connected: AtomicBool,
    delivered: AtomicU64,
    failures: AtomicU64,
    last_error: parking_lot::RwLock<Option<String>>,
}

impl SinkState {
    /// Create a disconnected state.
    #[must_use]
    pub fn new(kind: SinkKind) -> Self {
        Self {
            kind,
            connected: AtomicBool::new(false),
            delivered: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            last_error: parking_lot::RwLock::new(None),
        }
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        metrics::record_sink_delivered(self.kind);
    }

    pub(crate) fn record_failure(&self, kind: &'static str, message: String) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        *self.last_error.write() = Some(message);
        metrics::record_sink_failure(self.kind, kind);
    }

    /// Which sink this is.
    #[must_use]
    pub const fn kind(&self) -> SinkKind {
        self.kind
    }

    /// Whether the sink holds a healthy connection.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Tickers delivered.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Failures of any kind.
    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Most recent failure message.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }
}
