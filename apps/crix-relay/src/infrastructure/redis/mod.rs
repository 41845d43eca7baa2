//! Redis Cache Adapter
//!
//! `CachePool` over `redis` async connections. The pool hands out at most
//! `max_active` connections at once and keeps up to `max_idle` of the
//! returned ones for reuse. A connection that saw a command error is
//! discarded instead of returned. Transport failures surface as
//! `CacheError::ConnectionLost` so callers know to check out another one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::AsyncCommands;
use redis::aio::Connection;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::application::ports::{CacheConnection, CacheError, CachePool};

struct PoolShared {
    idle: Mutex<Vec<Connection>>,
    max_idle: usize,
    closed: AtomicBool,
}

impl PoolShared {
    fn checkin(&self, connection: Connection) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(connection);
        }
    }
}

/// Bounded pool of Redis connections.
pub struct RedisPool {
    client: redis::Client,
    shared: Arc<PoolShared>,
    permits: Arc<Semaphore>,
    max_active: usize,
}

impl RedisPool {
    /// Create a pool. No connection is opened until the first `get`.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Unavailable` if the URL is invalid.
    pub fn new(url: &str, max_idle: usize, max_active: usize) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(|e| CacheError::Unavailable(e.to_string()))?;
        let max_active = max_active.max(1);

        Ok(Self {
            client,
            shared: Arc::new(PoolShared {
                idle: Mutex::new(Vec::with_capacity(max_idle.min(max_active))),
                max_idle,
                closed: AtomicBool::new(false),
            }),
            permits: Arc::new(Semaphore::new(max_active)),
            max_active,
        })
    }

    /// Connections currently handed out.
    #[must_use]
    pub fn active(&self) -> usize {
        self.max_active - self.permits.available_permits()
    }

    /// Connections parked for reuse.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.shared.idle.lock().len()
    }
}

impl std::fmt::Debug for RedisPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisPool")
            .field("max_idle", &self.shared.max_idle)
            .field("max_active", &self.max_active)
            .field("active", &self.active())
            .field("idle", &self.idle())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CachePool for RedisPool {
    type Connection = PooledConnection;

    async fn get(&self) -> Result<PooledConnection, CacheError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(CacheError::PoolClosed);
        }

        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| CacheError::PoolClosed)?;

        let reused = self.shared.idle.lock().pop();
        let connection = match reused {
            Some(connection) => connection,
            None => self
                .client
                .get_async_connection()
                .await
                .map_err(|e| CacheError::Unavailable(e.to_string()))?,
        };

        Ok(PooledConnection {
            connection: Some(connection),
            shared: Arc::clone(&self.shared),
            broken: false,
            _permit: permit,
        })
    }

    fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.permits.close();
        self.shared.idle.lock().clear();
    }
}

/// Connection checked out of a [`RedisPool`].
pub struct PooledConnection {
    connection: Option<Connection>,
    shared: Arc<PoolShared>,
    broken: bool,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    fn connection(&mut self) -> Result<&mut Connection, CacheError> {
        self.connection.as_mut().ok_or(CacheError::PoolClosed)
    }

    fn fail(&mut self, command: &'static str, error: &redis::RedisError) -> CacheError {
        self.broken = true;
        classify(command, error)
    }
}

/// Map a command error, separating transport failures from replies.
fn classify(command: &'static str, error: &redis::RedisError) -> CacheError {
    let message = error.to_string();
    if error.is_io_error() || error.is_connection_dropped() || error.is_timeout() {
        CacheError::ConnectionLost { command, message }
    } else {
        CacheError::Command { command, message }
    }
}

#[async_trait]
impl CacheConnection for PooledConnection {
    async fn ping(&mut self) -> Result<(), CacheError> {
        let result = redis::cmd("PING")
            .query_async::<_, String>(self.connection()?)
            .await;
        result.map(|_| ()).map_err(|e| self.fail("PING", &e))
    }

    async fn select(&mut self, db: i64) -> Result<(), CacheError> {
        let result = redis::cmd("SELECT")
            .arg(db)
            .query_async::<_, ()>(self.connection()?)
            .await;
        result.map_err(|e| self.fail("SELECT", &e))
    }

    async fn rpush(&mut self, list: &str, value: &str) -> Result<i64, CacheError> {
        let result = self
            .connection()?
            .rpush::<_, _, i64>(list, value)
            .await;
        result.map_err(|e| self.fail("RPUSH", &e))
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if self.broken {
            return;
        }
        if let Some(connection) = self.connection.take() {
            self.shared.checkin(connection);
        }
    }
}
