//! WebSocket Feed Adapter
//!
//! `FeedConnector` over `tokio-tungstenite`. Text and binary frames are
//! both surfaced as raw bytes; the exchange decides which it sends.
//! Pings are answered inside the session.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::{FeedConnector, FeedError, FeedSession};

/// Dials WebSocket sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    /// Create a connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FeedConnector for TungsteniteConnector {
    type Session = TungsteniteSession;

    async fn dial(&self, endpoint: &str) -> Result<TungsteniteSession, FeedError> {
        let (stream, _response) = tokio_tungstenite::connect_async(endpoint)
            .await
            .map_err(|e| FeedError::Dial(e.to_string()))?;
        Ok(TungsteniteSession { stream })
    }
}

/// One open WebSocket session.
pub struct TungsteniteSession {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FeedSession for TungsteniteSession {
    async fn send_text(&mut self, frame: &str) -> Result<(), FeedError> {
        self.stream
            .send(Message::Text(frame.to_string().into()))
            .await
            .map_err(|e| FeedError::Transport(e.to_string()))
    }

    async fn next_frame(&mut self) -> Result<Vec<u8>, FeedError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text.as_bytes().to_vec()),
                Some(Ok(Message::Binary(data))) => return Ok(data.to_vec()),
                Some(Ok(Message::Ping(data))) => {
                    self.stream
                        .send(Message::Pong(data))
                        .await
                        .map_err(|e| FeedError::Transport(e.to_string()))?;
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(frame = ?frame, "Server sent close frame");
                    return Err(FeedError::Closed);
                }
                Some(Ok(_)) => {
                    // Pong and raw frames
                }
                Some(Err(e)) => return Err(FeedError::Transport(e.to_string())),
                None => return Err(FeedError::Closed),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "Error while closing feed session");
        }
    }
}
