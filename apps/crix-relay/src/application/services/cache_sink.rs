//! Cache Sink
//!
//! Appends every received ticker to a list in a numbered database of the
//! pooled cache store.
//!
//! # Consumer Loop
//!
//! The sink first obtains a pooled connection that answers `PING`,
//! retrying at a fixed interval. It then keeps that connection and, for
//! each ticker, issues `SELECT <db>` followed by `RPUSH <list> <json>`.
//! A failed command is logged and the loop moves on to the next ticker.
//! When the connection itself is lost, the failed ticker is dropped and a
//! fresh connection is acquired the same way before the next one.
//!
//! # Probe
//!
//! A separate task pings a fresh pooled connection at a fixed interval.
//! The probe only logs and counts; it never touches the consumer loop's
//! connection.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::distribution::TickerReceiver;
use super::retry::RetryPolicy;
use super::sink_state::SinkState;
use crate::application::ports::{CacheConnection, CacheError, CachePool};
use crate::domain::ticker::Ticker;
use crate::infrastructure::metrics::SinkKind;

/// Default list the tickers are pushed onto.
pub const DEFAULT_LIST: &str = "CRIX";

/// Default delay between connection acquisition attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Default interval of the health probe.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(10);

/// Cache sink configuration.
#[derive(Debug, Clone)]
pub struct CacheSinkConfig {
    /// List name for `RPUSH`.
    pub list: String,
    /// Database index for `SELECT`.
    pub db: i64,
    /// Acquisition retry policy.
    pub retry: RetryPolicy,
    /// Probe interval.
    pub probe_interval: Duration,
}

impl CacheSinkConfig {
    /// Configuration with default list and timings.
    #[must_use]
    pub fn new(db: i64) -> Self {
        Self {
            list: DEFAULT_LIST.to_string(),
            db,
            retry: RetryPolicy::fixed(DEFAULT_RETRY_INTERVAL),
            probe_interval: DEFAULT_PROBE_INTERVAL,
        }
    }
}

/// Cache list publisher.
pub struct CacheSink<P: CachePool> {
    pool: Arc<P>,
    config: CacheSinkConfig,
    state: Arc<SinkState>,
}

impl<P: CachePool> CacheSink<P> {
    /// Create a sink over a shared pool.
    #[must_use]
    pub fn new(pool: Arc<P>, config: CacheSinkConfig) -> Self {
        Self {
            pool,
            config,
            state: Arc::new(SinkState::new(SinkKind::Cache)),
        }
    }

    /// Shared sink status.
    #[must_use]
    pub fn state(&self) -> Arc<SinkState> {
        Arc::clone(&self.state)
    }

    /// Acquire one connection and ping it, without retrying.
    ///
    /// # Errors
    ///
    /// Returns `CacheError` if no connection is available or it does not
    /// answer. At startup this is fatal.
    pub async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.pool.get().await?;
        conn.ping().await
    }

    /// Acquire a connection that answers `PING`, retrying forever.
    async fn acquire(&self, purpose: &'static str) -> P::Connection {
        loop {
            let attempt = match self.pool.get().await {
                Ok(mut conn) => conn.ping().await.map(|()| conn),
                Err(e) => Err(e),
            };

            match attempt {
                Ok(conn) => return conn,
                Err(e) => {
                    let delay = self.config.retry.next_delay();
                    tracing::error!(
                        error = %e,
                        purpose,
                        delay_ms = delay.as_millis(),
                        "Cache ping failed, retrying"
                    );
                    self.state.record_failure("ping", e.to_string());
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Push one ticker over `conn`.
    async fn push(&self, conn: &mut P::Connection, ticker: &Ticker) -> Result<i64, CacheError> {
        let payload = ticker.to_wire().map_err(|e| CacheError::Command {
            command: "RPUSH",
            message: e.to_string(),
        })?;
        conn.select(self.config.db).await?;
        conn.rpush(&self.config.list, &payload).await
    }

    /// Push tickers until the receiver closes.
    pub async fn run(&self, mut receiver: TickerReceiver) {
        tracing::info!(list = %self.config.list, db = self.config.db, "Cache sink started");

        let mut conn = self.acquire("consumer").await;
        self.state.set_connected(true);

        while let Some(ticker) = receiver.recv().await {
            match self.push(&mut conn, &ticker).await {
                Ok(length) => {
                    tracing::trace!(currency = %ticker.currency, length, "Ticker pushed");
                    self.state.record_delivered();
                }
                Err(e) => {
                    tracing::error!(error = %e, currency = %ticker.currency, "Cache push failed");
                    self.state.record_failure("push", e.to_string());

                    if e.is_connection_lost() {
                        self.state.set_connected(false);
                        drop(conn);
                        conn = self.acquire("consumer").await;
                        self.state.set_connected(true);
                        tracing::info!("Cache connection re-established");
                    }
                }
            }
        }

        self.state.set_connected(false);
        tracing::info!("Cache sink receiver closed");
    }

    /// Run one probe: acquire a connection that answers `PING`.
    pub async fn probe(&self) {
        drop(self.acquire("probe").await);
        tracing::debug!("Cache probe ok");
    }

    /// Close the pool.
    pub fn release(&self) {
        self.pool.close();
        self.state.set_connected(false);
        tracing::info!("Cache sink released");
    }
}

impl<P: CachePool + 'static> CacheSink<P> {
    /// Spawn the periodic probe task.
    pub fn spawn_probe(self: &Arc<Self>) -> JoinHandle<()> {
        let sink = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(sink.config.probe_interval).await;
                sink.probe().await;
            }
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::application::ports::MockCacheConnection;
    use crate::application::services::distribution::channel;

    #[derive(Default)]
    struct ScriptedPool {
        connections: Mutex<VecDeque<Result<MockCacheConnection, CacheError>>>,
        gets: AtomicU32,
        closed: Mutex<bool>,
    }

    impl ScriptedPool {
        fn with(connections: Vec<Result<MockCacheConnection, CacheError>>) -> Arc<Self> {
            Arc::new(Self {
                connections: Mutex::new(connections.into()),
                ..Self::default()
            })
        }
    }

    #[async_trait]
    impl CachePool for ScriptedPool {
        type Connection = MockCacheConnection;

        async fn get(&self) -> Result<MockCacheConnection, CacheError> {
            self.gets.fetch_add(1, Ordering::Relaxed);
            self.connections
                .lock()
                .pop_front()
                .unwrap_or(Err(CacheError::PoolClosed))
        }

        fn close(&self) {
            *self.closed.lock() = true;
        }
    }

    fn ticker(currency: &str) -> Ticker {
        Ticker {
            exchange: "UPBIT".to_string(),
            currency: currency.to_string(),
            price: 1.0,
            yesterday_price: 1.0,
            change: 0.0,
            change_rate: 0.0,
            volume: 1,
        }
    }

    fn dead_connection() -> MockCacheConnection {
        let mut conn = MockCacheConnection::new();
        conn.expect_ping().returning(|| {
            Err(CacheError::Command {
                command: "PING",
                message: "connection refused".to_string(),
            })
        });
        conn
    }

    fn recording_connection(pushed: Arc<Mutex<Vec<String>>>) -> MockCacheConnection {
        let mut conn = MockCacheConnection::new();
        conn.expect_ping().returning(|| Ok(()));
        conn.expect_select()
            .with(mockall::predicate::eq(3))
            .returning(|_| Ok(()));
        conn.expect_rpush().returning(move |list, value| {
            assert_eq!(list, "CRIX");
            let mut pushed = pushed.lock();
            pushed.push(value.to_string());
            Ok(i64::try_from(pushed.len()).unwrap())
        });
        conn
    }

    #[tokio::test(start_paused = true)]
    async fn retries_acquisition_without_losing_tickers() {
        let pushed = Arc::new(Mutex::new(Vec::new()));
        let pool = ScriptedPool::with(vec![
            Ok(dead_connection()),
            Err(CacheError::Unavailable("dial failed".to_string())),
            Ok(recording_connection(Arc::clone(&pushed))),
        ]);
        let sink = CacheSink::new(Arc::clone(&pool), CacheSinkConfig::new(3));

        let (mut tx, rx) = channel(8);
        for currency in ["BTC", "ETH", "XRP"] {
            tx.send(ticker(currency)).await.unwrap();
        }
        drop(tx);

        let start = tokio::time::Instant::now();
        sink.run(rx).await;

        assert_eq!(start.elapsed(), DEFAULT_RETRY_INTERVAL * 2);
        assert_eq!(pool.gets.load(Ordering::Relaxed), 3);

        let currencies: Vec<String> = pushed
            .lock()
            .iter()
            .map(|payload| Ticker::from_wire(payload).unwrap().currency)
            .collect();
        assert_eq!(currencies, vec!["BTC", "ETH", "XRP"]);
        assert_eq!(sink.state().delivered(), 3);
        assert_eq!(sink.state().failures(), 2);
    }

    #[tokio::test]
    async fn push_errors_skip_to_next_ticker() {
        let mut conn = MockCacheConnection::new();
        conn.expect_ping().returning(|| Ok(()));
        let mut selects = 0;
        conn.expect_select().returning(move |_| {
            selects += 1;
            if selects == 1 {
                Err(CacheError::Command {
                    command: "SELECT",
                    message: "invalid DB index".to_string(),
                })
            } else {
                Ok(())
            }
        });
        conn.expect_rpush().times(1).returning(|_, _| Ok(1));

        let pool = ScriptedPool::with(vec![Ok(conn)]);
        let sink = CacheSink::new(Arc::clone(&pool), CacheSinkConfig::new(0));

        let (mut tx, rx) = channel(8);
        tx.send(ticker("BTC")).await.unwrap();
        tx.send(ticker("ETH")).await.unwrap();
        drop(tx);
        sink.run(rx).await;

        assert_eq!(pool.gets.load(Ordering::Relaxed), 1);
        assert_eq!(sink.state().delivered(), 1);
        assert_eq!(sink.state().failures(), 1);
        assert!(!sink.state().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn lost_connection_is_replaced_from_pool() {
        let mut lost = MockCacheConnection::new();
        lost.expect_ping().times(1).returning(|| Ok(()));
        lost.expect_select().times(1).returning(|_| {
            Err(CacheError::ConnectionLost {
                command: "SELECT",
                message: "broken pipe".to_string(),
            })
        });
        lost.expect_rpush().never();

        let pushed = Arc::new(Mutex::new(Vec::new()));
        let pool = ScriptedPool::with(vec![
            Ok(lost),
            Ok(dead_connection()),
            Ok(recording_connection(Arc::clone(&pushed))),
        ]);
        let sink = CacheSink::new(Arc::clone(&pool), CacheSinkConfig::new(3));

        let (mut tx, rx) = channel(8);
        for currency in ["BTC", "ETH", "XRP", "ADA", "SOL"] {
            tx.send(ticker(currency)).await.unwrap();
        }
        drop(tx);

        let start = tokio::time::Instant::now();
        sink.run(rx).await;

        assert_eq!(start.elapsed(), DEFAULT_RETRY_INTERVAL);
        assert_eq!(pool.gets.load(Ordering::Relaxed), 3);

        let currencies: Vec<String> = pushed
            .lock()
            .iter()
            .map(|payload| Ticker::from_wire(payload).unwrap().currency)
            .collect();
        assert_eq!(currencies, vec!["ETH", "XRP", "ADA", "SOL"]);
        assert_eq!(sink.state().delivered(), 4);
        assert_eq!(sink.state().failures(), 2);
    }

    #[tokio::test]
    async fn startup_ping_does_not_retry() {
        let pool = ScriptedPool::with(vec![Ok(dead_connection())]);
        let sink = CacheSink::new(Arc::clone(&pool), CacheSinkConfig::new(0));

        assert!(sink.ping().await.is_err());
        assert_eq!(pool.gets.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_runs_on_interval_with_fresh_connections() {
        let healthy = || {
            let mut conn = MockCacheConnection::new();
            conn.expect_ping().times(1).returning(|| Ok(()));
            Ok(conn)
        };
        let pool = ScriptedPool::with(vec![healthy(), healthy()]);
        let sink = Arc::new(CacheSink::new(Arc::clone(&pool), CacheSinkConfig::new(0)));

        let probe = sink.spawn_probe();
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(pool.gets.load(Ordering::Relaxed), 0);

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(pool.gets.load(Ordering::Relaxed), 2);
        assert!(!sink.state().is_connected());

        probe.abort();
    }

    #[test]
    fn release_closes_pool() {
        let pool = ScriptedPool::with(vec![]);
        let sink = CacheSink::new(Arc::clone(&pool), CacheSinkConfig::new(0));
        sink.release();
        assert!(*pool.closed.lock());
    }
}
