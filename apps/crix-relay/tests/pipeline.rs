//! Pipeline Integration Tests
//!
//! Feed frames through the normalizer and the distribution channel, with
//! scripted feed sessions standing in for the exchange.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crix_relay::application::ports::{Exchange, FeedConnector, FeedError, FeedSession};
use crix_relay::application::services::{
    FeedConnection, FeedConnectionConfig, Normalizer, TickerReceiver, TickerSender,
};
use crix_relay::infrastructure::upbit::{UpbitConfig, UpbitDecoder, UpbitExchange};
use crix_relay::infrastructure::websocket::TungsteniteConnector;
use crix_relay::{PriceTable, RetryPolicy, SubscriptionDescriptor, Ticker};

// =============================================================================
// Scripted Feed
// =============================================================================

#[derive(Clone, Default)]
struct ScriptedFeed {
    sessions: Arc<Mutex<VecDeque<VecDeque<Vec<u8>>>>>,
    sent: Arc<Mutex<Vec<String>>>,
    dials: Arc<Mutex<u32>>,
    closes: Arc<Mutex<u32>>,
}

impl ScriptedFeed {
    fn with_session(frames: Vec<Vec<u8>>) -> Self {
        let feed = Self::default();
        feed.sessions.lock().push_back(frames.into());
        feed
    }
}

struct ScriptedSession {
    frames: VecDeque<Vec<u8>>,
    sent: Arc<Mutex<Vec<String>>>,
    closes: Arc<Mutex<u32>>,
}

#[async_trait]
impl FeedConnector for ScriptedFeed {
    type Session = ScriptedSession;

    async fn dial(&self, _endpoint: &str) -> Result<ScriptedSession, FeedError> {
        *self.dials.lock() += 1;
        let frames = self.sessions.lock().pop_front().unwrap_or_default();
        Ok(ScriptedSession {
            frames,
            sent: Arc::clone(&self.sent),
            closes: Arc::clone(&self.closes),
        })
    }
}

#[async_trait]
impl FeedSession for ScriptedSession {
    async fn send_text(&mut self, frame: &str) -> Result<(), FeedError> {
        self.sent.lock().push(frame.to_string());
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Vec<u8>, FeedError> {
        match self.frames.pop_front() {
            Some(frame) => Ok(frame),
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) {
        *self.closes.lock() += 1;
    }
}

fn ticker_frame(market: &str, price: f64) -> Vec<u8> {
    json!({
        "type": "ticker",
        "code": market,
        "trade_price": price,
        "prev_closing_price": 29_000_000.0,
        "signed_change_price": price - 29_000_000.0,
        "signed_change_rate": 0.01,
        "acc_trade_price_24h": 1_000_000.5,
        "stream_type": "REALTIME"
    })
    .to_string()
    .into_bytes()
}

async fn next_ticker(receiver: &mut TickerReceiver) -> Ticker {
    timeout(Duration::from_secs(5), receiver.recv())
        .await
        .expect("ticker within timeout")
        .expect("channel open")
}

// =============================================================================
// Exchange To Sinks
// =============================================================================

#[tokio::test]
async fn upbit_exchange_relays_changed_prices_to_every_sink() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/market/all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"market": "KRW-BTC"},
            {"market": "KRW-ETH"},
            {"market": "BTC-ETH"}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/ticker"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"market": "KRW-BTC", "trade_price": 30_000_000.0},
            {"market": "KRW-ETH", "trade_price": 2_100_000.0}
        ])))
        .mount(&server)
        .await;

    let feed = ScriptedFeed::with_session(vec![
        ticker_frame("KRW-BTC", 30_000_000.0),
        ticker_frame("KRW-ETH", 2_200_000.0),
        br#"{"status":"UP"}"#.to_vec(),
        ticker_frame("BTC-ETH", 0.07),
        b"not json".to_vec(),
        ticker_frame("KRW-BTC", 31_000_000.0),
        ticker_frame("KRW-BTC", 31_000_000.0),
        ticker_frame("KRW-ETH", 2_100_000.0),
    ]);

    let config = UpbitConfig {
        rest_url: server.uri(),
        ws_url: "ws://feed.test".to_string(),
        rest_retry: RetryPolicy::fixed(Duration::from_millis(10)),
        ..UpbitConfig::default()
    };
    let mut exchange = UpbitExchange::with_connector(config, feed.clone()).unwrap();
    exchange.initialize().await.unwrap();
    let feed_state = exchange.feed_state();

    let mut sender = TickerSender::new(16);
    let mut cache = sender.subscribe();
    let mut queue = sender.subscribe();
    let task = tokio::spawn(async move { exchange.execute(sender).await });

    for receiver in [&mut cache, &mut queue] {
        let first = next_ticker(receiver).await;
        assert_eq!((first.currency.as_str(), first.price), ("ETH", 2_200_000.0));
        assert_eq!(first.exchange, "UPBIT");

        let second = next_ticker(receiver).await;
        assert_eq!((second.currency.as_str(), second.price), ("BTC", 31_000_000.0));
        assert_eq!(second.volume, 1_000_000);

        let third = next_ticker(receiver).await;
        assert_eq!((third.currency.as_str(), third.price), ("ETH", 2_100_000.0));
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(cache.try_recv().is_none());
    assert!(queue.try_recv().is_none());

    assert!(feed_state.is_connected());
    assert_eq!(feed_state.frames_received(), 8);
    assert_eq!(*feed.dials.lock(), 1);

    let sent = feed.sent.lock().clone();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("\"KRW-BTC\"") && sent[0].contains("\"KRW-ETH\""));

    drop(cache);
    drop(queue);
    task.abort();
}

#[tokio::test]
async fn closing_every_sink_stops_the_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/market/all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"market": "KRW-BTC"}])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/ticker"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let feed = ScriptedFeed::with_session(vec![ticker_frame("KRW-BTC", 1.0)]);
    let config = UpbitConfig {
        rest_url: server.uri(),
        ..UpbitConfig::default()
    };
    let mut exchange = UpbitExchange::with_connector(config, feed).unwrap();
    exchange.initialize().await.unwrap();

    let mut sender = TickerSender::new(4);
    drop(sender.subscribe());

    let result = timeout(Duration::from_secs(5), exchange.execute(sender))
        .await
        .unwrap();
    assert!(result.is_err());

    exchange.release().await;
    assert!(!exchange.feed_state().is_connected());
}

#[tokio::test]
async fn non_numeric_stream_price_is_discarded() {
    let mut sender = TickerSender::new(4);
    let mut receiver = sender.subscribe();
    let mut normalizer = Normalizer::new(
        "UPBIT",
        "KRW-",
        UpbitDecoder::new(),
        PriceTable::new(),
        sender,
    );

    let bad = br#"{"type":"ticker","code":"KRW-BTC","trade_price":"oops"}"#;
    normalizer.process(bad).await.unwrap();
    assert!(receiver.try_recv().is_none());
    assert!(normalizer.table().get("BTC").is_none());

    normalizer
        .process(&ticker_frame("KRW-BTC", 30_500_000.0))
        .await
        .unwrap();
    let ticker = receiver.try_recv().unwrap();
    assert_eq!(ticker.price, 30_500_000.0);
    assert_eq!(normalizer.table().last_price("BTC"), Some(30_500_000.0));
}

#[tokio::test]
async fn shutdown_token_ends_execute_and_closes_feed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/market/all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"market": "KRW-BTC"}])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/ticker"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let feed = ScriptedFeed::with_session(vec![ticker_frame("KRW-BTC", 1.0)]);
    let config = UpbitConfig {
        rest_url: server.uri(),
        ..UpbitConfig::default()
    };
    let mut exchange = UpbitExchange::with_connector(config, feed.clone()).unwrap();
    exchange.initialize().await.unwrap();

    let mut sender = TickerSender::new(4);
    let mut receiver = sender.subscribe();
    let shutdown = exchange.shutdown_token();
    let feed_state = exchange.feed_state();

    let task = tokio::spawn(async move {
        let result = exchange.execute(sender).await;
        (exchange, result)
    });
    assert_eq!(next_ticker(&mut receiver).await.price, 1.0);

    shutdown.cancel();
    let (mut exchange, result) = timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(*feed.closes.lock(), 1);
    assert!(!feed_state.is_connected());
    assert!(receiver.recv().await.is_none());

    exchange.release().await;
    assert!(!exchange.feed_state().is_connected());
}

// =============================================================================
// Backpressure
// =============================================================================

#[tokio::test(start_paused = true)]
async fn full_buffer_blocks_the_feed_without_loss() {
    let prices = [1.0, 2.0, 3.0, 4.0, 5.0];
    let feed = ScriptedFeed::with_session(
        prices
            .iter()
            .map(|p| ticker_frame("KRW-BTC", *p))
            .collect(),
    );

    let descriptor = SubscriptionDescriptor::new(vec!["[]".to_string()]).unwrap();
    let (connection, handle) =
        FeedConnection::new(feed, FeedConnectionConfig::new("ws://feed.test"), descriptor);

    let mut sender = TickerSender::new(1);
    let mut receiver = sender.subscribe();
    let mut normalizer = Normalizer::new(
        "UPBIT",
        "KRW-",
        UpbitDecoder::new(),
        PriceTable::new(),
        sender,
    );
    let task = tokio::spawn(async move { connection.run(&mut normalizer).await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(receiver.len(), 1);
    assert_eq!(handle.state().frames_received(), 2);

    let mut received = Vec::new();
    for _ in prices {
        received.push(next_ticker(&mut receiver).await.price);
    }
    assert_eq!(received, prices);

    drop(receiver);
    task.abort();
}

// =============================================================================
// WebSocket Adapter
// =============================================================================

#[tokio::test]
async fn websocket_session_surfaces_text_and_binary_frames() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let subscribe = ws.next().await.unwrap().unwrap();
        ws.send(Message::Ping(b"hb".to_vec().into())).await.unwrap();
        ws.send(Message::Binary(ticker_frame("KRW-BTC", 1.0).into()))
            .await
            .unwrap();
        ws.send(Message::Text("{\"status\":\"UP\"}".into()))
            .await
            .unwrap();

        let pong = ws.next().await.unwrap().unwrap();
        ws.close(None).await.unwrap();
        (subscribe, pong)
    });

    let connector = TungsteniteConnector::new();
    let mut session = connector.dial(&format!("ws://{addr}")).await.unwrap();
    session.send_text("[{\"ticket\":\"t\"}]").await.unwrap();

    let binary = session.next_frame().await.unwrap();
    assert_eq!(binary, ticker_frame("KRW-BTC", 1.0));
    let text = session.next_frame().await.unwrap();
    assert_eq!(text, br#"{"status":"UP"}"#.to_vec());

    let closed = session.next_frame().await.unwrap_err();
    assert!(matches!(closed, FeedError::Closed));

    let (subscribe, pong) = server.await.unwrap();
    assert_eq!(subscribe.into_text().unwrap().as_str(), "[{\"ticket\":\"t\"}]");
    assert!(matches!(pong, Message::Pong(_)));
}

#[tokio::test]
async fn websocket_dial_failure_is_reported() {
    let connector = TungsteniteConnector::new();
    let err = connector.dial("ws://127.0.0.1:1").await.err().unwrap();
    assert!(matches!(err, FeedError::Dial(_)));
}
