//! Feed Connection
//!
//! Owns the single streaming session to the exchange. The session handle
//! never leaves this actor: the read loop, the subscription replay and
//! externally requested reconnects all run on the actor's own task, and
//! other components talk to it through a `FeedHandle`.
//!
//! # State Machine
//!
//! ```text
//! Disconnected ──► Connecting ──► Connected ──► Reconnecting ──► Connecting …
//! ```
//!
//! Dial failures are retried at a fixed interval forever, and every
//! successful connect is followed by a full, in-order replay of the
//! subscription descriptor. The only way out is the shutdown token, which
//! closes the session and ends `run`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::distribution::ChannelClosed;
use super::retry::RetryPolicy;
use crate::application::ports::{FeedConnector, FeedError, FeedSession, FrameHandler};
use crate::domain::subscription::SubscriptionDescriptor;
use crate::infrastructure::metrics;

/// Default delay between dial attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(10);

/// Default delay between replayed subscribe frames.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(250);

/// Default time without frames after which a connected feed is redialed.
pub const DEFAULT_STALE_TIMEOUT: Duration = Duration::from_secs(60);

// =============================================================================
// Connection State
// =============================================================================

/// Feed connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No session, not dialing.
    #[default]
    Disconnected,
    /// Dialing the endpoint.
    Connecting,
    /// Session open and subscribed.
    Connected,
    /// Tearing down a failed session.
    Reconnecting,
}

impl ConnectionState {
    /// Lowercase label used in health output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

/// Shared, read-mostly view of the feed connection.
///
/// Written only by the owning `FeedConnection`.
#[derive(Debug, Default)]
pub struct FeedState {
    state: parking_lot::RwLock<ConnectionState>,
    last_connected_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
    last_error: parking_lot::RwLock<Option<String>>,
    dial_failures: AtomicU64,
    reconnects: AtomicU64,
    frames_received: AtomicU64,
}

impl FeedState {
    /// Create a state in `Disconnected`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        metrics::set_feed_connected(state == ConnectionState::Connected);
        if state == ConnectionState::Connected {
            *self.last_connected_at.write() = Some(Utc::now());
            *self.last_error.write() = None;
        }
    }

    pub(crate) fn mark_disconnected(&self) {
        self.set_state(ConnectionState::Disconnected);
    }

    fn set_error(&self, message: String) {
        *self.last_error.write() = Some(message);
    }

    /// Current state.
    #[must_use]
    pub fn get_state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether the session is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.get_state() == ConnectionState::Connected
    }

    /// Time of the last successful connect.
    #[must_use]
    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        *self.last_connected_at.read()
    }

    /// Most recent transport error, cleared on connect.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Total failed dial attempts.
    #[must_use]
    pub fn dial_failures(&self) -> u64 {
        self.dial_failures.load(Ordering::Relaxed)
    }

    /// Total reconnect sequences.
    #[must_use]
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Total frames read.
    #[must_use]
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Commands
// =============================================================================

/// Messages accepted by the feed connection actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedCommand {
    /// Drop the current session, reconnect and replay subscriptions.
    Reconnect,
}

/// Cloneable handle to a running feed connection.
#[derive(Debug, Clone)]
pub struct FeedHandle {
    commands: mpsc::Sender<FeedCommand>,
    state: Arc<FeedState>,
}

impl FeedHandle {
    /// Ask the connection to reconnect.
    ///
    /// Returns `false` if the connection is no longer running. Requests that
    /// arrive while one is pending are coalesced.
    pub fn request_reconnect(&self) -> bool {
        match self.commands.try_send(FeedCommand::Reconnect) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Shared connection state.
    #[must_use]
    pub fn state(&self) -> Arc<FeedState> {
        Arc::clone(&self.state)
    }

    /// Spawn a watchdog that requests a reconnect whenever the feed stays
    /// connected for `stale_after` without reading a frame.
    ///
    /// The task ends once the connection stops running.
    pub fn spawn_stale_watchdog(&self, stale_after: Duration) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            let mut last_seen = handle.state.frames_received();
            loop {
                tokio::time::sleep(stale_after).await;

                let frames = handle.state.frames_received();
                if frames == last_seen && handle.state.is_connected() {
                    tracing::warn!(
                        stale_secs = stale_after.as_secs(),
                        "No frames from exchange feed, requesting reconnect"
                    );
                    if !handle.request_reconnect() {
                        break;
                    }
                }
                last_seen = frames;
            }
        })
    }
}

// =============================================================================
// Feed Connection
// =============================================================================

/// Timing configuration for the feed connection.
#[derive(Debug, Clone)]
pub struct FeedConnectionConfig {
    /// Streaming endpoint URL.
    pub endpoint: String,
    /// Dial retry policy.
    pub reconnect: RetryPolicy,
    /// Delay between replayed subscribe frames.
    pub frame_interval: Duration,
}

impl FeedConnectionConfig {
    /// Configuration with default timings.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            reconnect: RetryPolicy::fixed(DEFAULT_RECONNECT_INTERVAL),
            frame_interval: DEFAULT_FRAME_INTERVAL,
        }
    }
}

/// Single owning actor for the exchange session.
pub struct FeedConnection<C: FeedConnector> {
    connector: C,
    config: FeedConnectionConfig,
    descriptor: SubscriptionDescriptor,
    state: Arc<FeedState>,
    commands: mpsc::Receiver<FeedCommand>,
    shutdown: CancellationToken,
}

impl<C: FeedConnector> FeedConnection<C> {
    /// Create a connection actor and its handle.
    #[must_use]
    pub fn new(
        connector: C,
        config: FeedConnectionConfig,
        descriptor: SubscriptionDescriptor,
    ) -> (Self, FeedHandle) {
        Self::with_state(
            connector,
            config,
            descriptor,
            Arc::new(FeedState::new()),
            CancellationToken::new(),
        )
    }

    /// Create a connection actor that reports into an existing state and
    /// stops when `shutdown` is cancelled.
    #[must_use]
    pub fn with_state(
        connector: C,
        config: FeedConnectionConfig,
        descriptor: SubscriptionDescriptor,
        state: Arc<FeedState>,
        shutdown: CancellationToken,
    ) -> (Self, FeedHandle) {
        let (tx, rx) = mpsc::channel(1);

        let connection = Self {
            connector,
            config,
            descriptor,
            state: Arc::clone(&state),
            commands: rx,
            shutdown,
        };
        let handle = FeedHandle {
            commands: tx,
            state,
        };
        (connection, handle)
    }

    /// Shared connection state.
    #[must_use]
    pub fn state(&self) -> Arc<FeedState> {
        Arc::clone(&self.state)
    }

    /// Dial until a session is open. Never fails.
    pub async fn connect(&self) -> C::Session {
        loop {
            self.state.set_state(ConnectionState::Connecting);
            tracing::info!(endpoint = %self.config.endpoint, "Connecting to exchange feed");

            match self.connector.dial(&self.config.endpoint).await {
                Ok(session) => {
                    self.state.set_state(ConnectionState::Connected);
                    tracing::info!(endpoint = %self.config.endpoint, "Exchange feed connected");
                    return session;
                }
                Err(e) => {
                    self.state.dial_failures.fetch_add(1, Ordering::Relaxed);
                    self.state.set_error(e.to_string());
                    let delay = self.config.reconnect.next_delay();
                    tracing::error!(
                        error = %e,
                        delay_ms = delay.as_millis(),
                        "Feed dial failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Send every subscribe frame in order, pausing between frames.
    async fn replay(&self, session: &mut C::Session) -> Result<(), FeedError> {
        let frames = self.descriptor.frames();
        for (index, frame) in frames.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.frame_interval).await;
            }
            session.send_text(frame).await?;
        }
        tracing::debug!(frames = frames.len(), "Subscription replayed");
        Ok(())
    }

    /// Connect and replay, retrying from scratch if the replay fails.
    async fn establish(&self) -> C::Session {
        loop {
            let mut session = self.connect().await;
            match self.replay(&mut session).await {
                Ok(()) => return session,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        delay_ms = self.config.reconnect.interval().as_millis(),
                        "Subscription replay failed, redialing"
                    );
                    self.state.set_error(e.to_string());
                    self.state.set_state(ConnectionState::Reconnecting);
                    session.close().await;
                    self.config.reconnect.wait().await;
                }
            }
        }
    }

    /// Establish a session unless shutdown is requested first.
    async fn establish_until_shutdown(&self) -> Option<C::Session> {
        tokio::select! {
            session = self.establish() => Some(session),
            () = self.shutdown.cancelled() => None,
        }
    }

    /// Close the stale session, connect again and replay.
    async fn reconnect(&self, mut stale: C::Session) -> Option<C::Session> {
        self.state.set_state(ConnectionState::Reconnecting);
        self.state.reconnects.fetch_add(1, Ordering::Relaxed);
        metrics::record_feed_reconnect();

        stale.close().await;
        drop(stale);
        self.establish_until_shutdown().await
    }

    fn stopped(&self) {
        self.state.set_state(ConnectionState::Disconnected);
        tracing::info!(endpoint = %self.config.endpoint, "Feed connection stopped");
    }

    /// Run the read loop, forwarding every frame to `handler`.
    ///
    /// Transport errors and reconnect requests trigger a reconnect and
    /// replay. Returns `Ok` once the shutdown token is cancelled; the open
    /// session is closed first.
    ///
    /// # Errors
    ///
    /// Returns `ChannelClosed` when the handler's downstream is gone.
    pub async fn run<H: FrameHandler>(mut self, handler: &mut H) -> Result<(), ChannelClosed> {
        let Some(mut session) = self.establish_until_shutdown().await else {
            self.stopped();
            return Ok(());
        };
        let mut commands_open = true;

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    session.close().await;
                    self.stopped();
                    return Ok(());
                }
                frame = session.next_frame() => match frame {
                    Ok(bytes) => {
                        self.state.frames_received.fetch_add(1, Ordering::Relaxed);
                        metrics::record_frame_received();

                        if let Err(closed) = handler.handle_frame(&bytes).await {
                            tracing::info!("Downstream closed, stopping feed connection");
                            session.close().await;
                            self.state.set_state(ConnectionState::Disconnected);
                            return Err(closed);
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, endpoint = %self.config.endpoint, "Feed read failed");
                        self.state.set_error(e.to_string());
                        let Some(next) = self.reconnect(session).await else {
                            self.stopped();
                            return Ok(());
                        };
                        session = next;
                    }
                },
                command = self.commands.recv(), if commands_open => match command {
                    Some(FeedCommand::Reconnect) => {
                        tracing::info!("Reconnect requested");
                        let Some(next) = self.reconnect(session).await else {
                            self.stopped();
                            return Ok(());
                        };
                        session = next;
                    }
                    None => commands_open = false,
                },
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
