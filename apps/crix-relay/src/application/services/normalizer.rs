//! Normalizer
//!
//! Turns raw feed frames into canonical tickers. A ticker is emitted only
//! when its price differs from the last emitted price for the currency;
//! the price table is owned here and mutated nowhere else.

use async_trait::async_trait;

use super::distribution::{ChannelClosed, TickerSender};
use crate::application::ports::{DecodeError, EventDecoder, FrameHandler};
use crate::domain::price_table::PriceTable;
use crate::domain::ticker::{Ticker, currency_code};
use crate::infrastructure::metrics;

/// Decodes frames, deduplicates by price and feeds the distribution channel.
pub struct Normalizer<D: EventDecoder> {
    exchange: String,
    quote_prefix: String,
    decoder: D,
    table: PriceTable,
    sender: TickerSender,
}

impl<D: EventDecoder> Normalizer<D> {
    /// Create a normalizer for one exchange.
    ///
    /// `table` may already be primed from a snapshot.
    #[must_use]
    pub fn new(
        exchange: impl Into<String>,
        quote_prefix: impl Into<String>,
        decoder: D,
        table: PriceTable,
        sender: TickerSender,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            quote_prefix: quote_prefix.into(),
            decoder,
            table,
            sender,
        }
    }

    /// Price table as last emitted.
    #[must_use]
    pub const fn table(&self) -> &PriceTable {
        &self.table
    }

    /// Process one frame.
    ///
    /// Malformed frames and untracked markets are logged and discarded.
    ///
    /// # Errors
    ///
    /// Returns `ChannelClosed` when no sink is left to receive tickers.
    pub async fn process(&mut self, frame: &[u8]) -> Result<(), ChannelClosed> {
        let event = match self.decoder.decode(frame) {
            Ok(event) => event,
            Err(DecodeError::UnsupportedType(kind)) => {
                tracing::debug!(kind = %kind, "Ignoring unsupported event");
                metrics::record_frame_rejected("unsupported");
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(error = %e, bytes = frame.len(), "Discarding malformed frame");
                metrics::record_frame_rejected("decode");
                return Ok(());
            }
        };

        let Some(currency) = currency_code(&event.market_code, &self.quote_prefix) else {
            tracing::debug!(market = %event.market_code, "Ignoring untracked market");
            metrics::record_frame_rejected("untracked");
            return Ok(());
        };

        let ticker = Ticker::from_event(&self.exchange, currency, &event);
        if !self.table.record(&ticker) {
            metrics::record_ticker_suppressed();
            return Ok(());
        }

        tracing::trace!(currency = %ticker.currency, price = ticker.price, "Emitting ticker");
        metrics::record_ticker_emitted();
        self.sender.send(ticker).await
    }
}

#[async_trait]
impl<D: EventDecoder> FrameHandler for Normalizer<D> {
    async fn handle_frame(&mut self, frame: &[u8]) -> Result<(), ChannelClosed> {
        self.process(frame).await
    }
}

// =============================================================================
// Tests
// =============================================================================
