//! Distribution Channel
//!
//! Bounded FIFO hand-off from the normalizer (single producer) to the sink
//! consumers. Each wired sink owns its own bounded buffer; a send delivers
//! the ticker to every live buffer in order and waits while any of them is
//! full. Nothing is ever dropped at this layer.
//!
//! ```text
//!                         ┌──► [ buffer (K) ] ──► Cache Sink
//! Normalizer ──► sender ──┤
//!                         └──► [ buffer (K) ] ──► Queue Sink
//! ```

use tokio::sync::mpsc;

use crate::domain::ticker::Ticker;

/// Default per-sink buffer capacity.
pub const DEFAULT_CAPACITY: usize = 512;

/// Every receiver has been dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("distribution channel closed")]
pub struct ChannelClosed;

/// Create a sender with a single receiver.
#[must_use]
pub fn channel(capacity: usize) -> (TickerSender, TickerReceiver) {
    let mut sender = TickerSender::new(capacity);
    let receiver = sender.subscribe();
    (sender, receiver)
}

// =============================================================================
// Sender
// =============================================================================

/// Producer half. Owned by the normalizer.
#[derive(Debug)]
pub struct TickerSender {
    capacity: usize,
    outputs: Vec<mpsc::Sender<Ticker>>,
}

impl TickerSender {
    /// Create a sender with no receivers yet.
    ///
    /// A zero capacity is raised to one.
    #[must_use]
    pub const fn new(capacity: usize) -> Self {
        Self {
            capacity: if capacity == 0 { 1 } else { capacity },
            outputs: Vec::new(),
        }
    }

    /// Attach a new receiver with its own buffer.
    ///
    /// The receiver only sees tickers sent after this call.
    pub fn subscribe(&mut self) -> TickerReceiver {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.outputs.push(tx);
        TickerReceiver { inner: rx }
    }

    /// Deliver a ticker to every live receiver, in subscription order.
    ///
    /// Waits while a receiver's buffer is full. Receivers that have been
    /// dropped are detached.
    ///
    /// # Errors
    ///
    /// Returns `ChannelClosed` once no receiver is left.
    pub async fn send(&mut self, ticker: Ticker) -> Result<(), ChannelClosed> {
        let mut closed = Vec::new();

        if let Some((last, rest)) = self.outputs.split_last() {
            for (index, output) in rest.iter().enumerate() {
                if output.send(ticker.clone()).await.is_err() {
                    closed.push(index);
                }
            }
            if last.send(ticker).await.is_err() {
                closed.push(rest.len());
            }
        }

        for index in closed.into_iter().rev() {
            self.outputs.remove(index);
            tracing::debug!(remaining = self.outputs.len(), "Distribution receiver detached");
        }

        if self.outputs.is_empty() {
            return Err(ChannelClosed);
        }
        Ok(())
    }

    /// Number of attached receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.outputs.len()
    }

    /// Capacity of each receiver's buffer.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

// =============================================================================
// Receiver
// =============================================================================

/// Consumer half. Owned by one sink.
#[derive(Debug)]
pub struct TickerReceiver {
    inner: mpsc::Receiver<Ticker>,
}

impl TickerReceiver {
    /// Wait for the next ticker. Returns `None` once the sender is gone and
    /// the buffer is drained.
    pub async fn recv(&mut self) -> Option<Ticker> {
        self.inner.recv().await
    }

    /// Take the next ticker if one is buffered.
    pub fn try_recv(&mut self) -> Option<Ticker> {
        self.inner.try_recv().ok()
    }

    /// Number of buffered tickers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use tokio_test::{assert_pending, assert_ready_ok, task};

    use super::*;

    fn ticker(currency: &str, price: f64) -> Ticker {
        Ticker {
            exchange: "UPBIT".to_string(),
            currency: currency.to_string(),
            price,
            yesterday_price: price,
            change: 0.0,
            change_rate: 0.0,
            volume: 0,
        }
    }

    #[tokio::test]
    async fn preserves_fifo_order() {
        let (mut tx, mut rx) = channel(8);
        for price in 1..=5 {
            tx.send(ticker("BTC", f64::from(price))).await.unwrap();
        }

        for price in 1..=5 {
            assert_eq!(rx.recv().await.unwrap().price, f64::from(price));
        }
    }

    #[tokio::test]
    async fn full_buffer_blocks_without_dropping() {
        let (mut tx, mut rx) = channel(2);
        tx.send(ticker("BTC", 1.0)).await.unwrap();
        tx.send(ticker("BTC", 2.0)).await.unwrap();

        {
            let mut blocked = task::spawn(tx.send(ticker("BTC", 3.0)));
            assert_pending!(blocked.poll());

            assert_eq!(rx.recv().await.unwrap().price, 1.0);
            assert!(blocked.is_woken());
            assert_ready_ok!(blocked.poll());
        }

        assert_eq!(rx.recv().await.unwrap().price, 2.0);
        assert_eq!(rx.recv().await.unwrap().price, 3.0);
    }

    #[tokio::test]
    async fn fans_out_to_every_receiver() {
        let mut tx = TickerSender::new(4);
        let mut cache = tx.subscribe();
        let mut queue = tx.subscribe();

        tx.send(ticker("BTC", 1.0)).await.unwrap();
        tx.send(ticker("ETH", 2.0)).await.unwrap();

        assert_eq!(cache.recv().await.unwrap().currency, "BTC");
        assert_eq!(cache.recv().await.unwrap().currency, "ETH");
        assert_eq!(queue.recv().await.unwrap().currency, "BTC");
        assert_eq!(queue.recv().await.unwrap().currency, "ETH");
    }

    #[tokio::test]
    async fn dropped_receiver_is_detached() {
        let mut tx = TickerSender::new(4);
        let mut kept = tx.subscribe();
        let dropped = tx.subscribe();
        drop(dropped);

        tx.send(ticker("BTC", 1.0)).await.unwrap();
        assert_eq!(tx.receiver_count(), 1);
        assert_eq!(kept.recv().await.unwrap().price, 1.0);
    }

    #[tokio::test]
    async fn send_fails_once_all_receivers_are_gone() {
        let (mut tx, rx) = channel(4);
        drop(rx);
        assert_eq!(tx.send(ticker("BTC", 1.0)).await, Err(ChannelClosed));

        let mut empty = TickerSender::new(4);
        assert_eq!(empty.send(ticker("BTC", 1.0)).await, Err(ChannelClosed));
    }

    #[tokio::test]
    async fn receiver_drains_after_sender_drop() {
        let (mut tx, mut rx) = channel(4);
        tx.send(ticker("BTC", 1.0)).await.unwrap();
        drop(tx);

        assert_eq!(rx.len(), 1);
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn zero_capacity_is_raised() {
        assert_eq!(TickerSender::new(0).capacity(), 1);
    }
}
