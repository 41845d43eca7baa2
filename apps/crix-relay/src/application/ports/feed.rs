//! Feed Ports
//!
//! Contracts for the streaming connection to the exchange and for the
//! consumers of its raw frames.

use async_trait::async_trait;

use crate::application::services::distribution::ChannelClosed;
use crate::domain::ticker::PriceEvent;

/// Feed transport errors. Always recoverable by reconnecting.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FeedError {
    /// Dialing the endpoint failed.
    #[error("feed dial failed: {0}")]
    Dial(String),

    /// Reading or writing on an open session failed.
    #[error("feed transport error: {0}")]
    Transport(String),

    /// The peer closed the session.
    #[error("feed connection closed")]
    Closed,
}

/// Dials streaming sessions to an exchange endpoint.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    /// Session type produced by a successful dial.
    type Session: FeedSession;

    /// Open one session to `endpoint`.
    async fn dial(&self, endpoint: &str) -> Result<Self::Session, FeedError>;
}

/// One open streaming session.
#[async_trait]
pub trait FeedSession: Send {
    /// Send a text frame.
    async fn send_text(&mut self, frame: &str) -> Result<(), FeedError>;

    /// Wait for the next data frame and return its bytes.
    ///
    /// Control frames are handled inside the session and never returned.
    async fn next_frame(&mut self) -> Result<Vec<u8>, FeedError>;

    /// Close the session. Errors while closing are ignored.
    async fn close(&mut self);
}

/// Consumer of raw feed frames.
#[async_trait]
pub trait FrameHandler: Send {
    /// Handle one raw frame.
    ///
    /// Malformed frames are the handler's concern and never fail the
    /// connection; only a closed downstream channel is reported.
    async fn handle_frame(&mut self, frame: &[u8]) -> Result<(), ChannelClosed>;
}

/// Frame decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The frame is not valid JSON for the expected event.
    #[error("invalid event frame: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame is valid but carries an event type the relay does not track.
    #[error("unsupported event type: {0}")]
    UnsupportedType(String),

    /// The exchange sent an error message instead of an event.
    #[error("exchange reported an error: {0}")]
    Rejected(String),
}

/// Decodes exchange-specific frames into price events.
pub trait EventDecoder: Send + Sync {
    /// Decode one raw frame.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError` if the frame cannot be parsed as a ticker event.
    fn decode(&self, frame: &[u8]) -> Result<PriceEvent, DecodeError>;
}
