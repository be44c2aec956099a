//! Connection pooling
//!
//! The semaphore counts connections that are checked out; idle connections
//! hold no permit. New connections are only opened when the idle list is
//! empty, so idle + checked out never exceeds `max_connections`.
//!
//! A checked-out connection is a [`PooledConnection`] guard. Dropping the
//! guard returns the connection to the idle list, unless it was dropped while
//! an operation was still in flight, in which case its state is unknown and
//! it is closed instead.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::error::{AdapterError, AdapterResult};
use crate::transport::Transport;

/// Shortest period the idle reaper runs at.
const MIN_REAP_INTERVAL: Duration = Duration::from_millis(10);

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of live connections.
    pub max_connections: usize,
    /// Idle connections kept around even when unused.
    pub min_idle: usize,
    /// Idle connections older than this are closed by [`ConnectionPool::reap_idle`].
    pub idle_timeout: Duration,
    /// How long `acquire` waits for a free slot.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_idle: 1,
            idle_timeout: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub idle: usize,
    pub in_use: usize,
    pub max: usize,
}

struct IdleConnection<C> {
    conn: C,
    since: Instant,
}

struct Shared<T: Transport> {
    transport: Arc<T>,
    idle: Mutex<Vec<IdleConnection<T::Connection>>>,
    semaphore: Arc<Semaphore>,
    config: PoolConfig,
}

impl<T: Transport> Shared<T> {
    fn release(&self, conn: T::Connection) {
        if self.semaphore.is_closed() {
            self.transport.close(conn);
            return;
        }
        self.idle.lock().push(IdleConnection {
            conn,
            since: Instant::now(),
        });
    }
}

/// A bounded pool of store connections.
pub struct ConnectionPool<T: Transport> {
    shared: Arc<Shared<T>>,
}

impl<T: Transport> Clone for ConnectionPool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Transport> ConnectionPool<T> {
    pub fn new(transport: Arc<T>, config: PoolConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_connections));
        Self {
            shared: Arc::new(Shared {
                transport,
                idle: Mutex::new(Vec::new()),
                semaphore,
                config,
            }),
        }
    }

    pub fn transport(&self) -> &T {
        &self.shared.transport
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Check out a connection, waiting up to `acquire_timeout` for a free slot.
    pub async fn acquire(&self) -> AdapterResult<PooledConnection<T>> {
        let wait = self.shared.config.acquire_timeout;
        let permit = match tokio::time::timeout(wait, self.shared.semaphore.clone().acquire_owned()).await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(AdapterError::PoolClosed),
            Err(_) => {
                tracing::warn!(
                    target: "rethink_core::pool",
                    "Pool saturated: no connection within {} ms",
                    wait.as_millis()
                );
                return Err(AdapterError::PoolExhausted(wait.as_millis() as u64));
            }
        };

        let reused = self.shared.idle.lock().pop().map(|idle| idle.conn);
        let conn = match reused {
            Some(conn) => conn,
            None => self.connect().await?,
        };

        Ok(PooledConnection {
            conn: Some(conn),
            permit: Some(permit),
            shared: Arc::clone(&self.shared),
            in_flight: false,
        })
    }

    async fn connect(&self) -> AdapterResult<T::Connection> {
        self.shared.transport.connect().await.inspect_err(|e| {
            tracing::error!(target: "rethink_core::pool", "Failed to open connection: {e}");
        })
    }

    /// Open connections until at least `min_idle` are idle, within the ceiling.
    pub async fn fill_idle(&self) -> AdapterResult<()> {
        while self.shared.idle.lock().len() < self.shared.config.min_idle {
            // Hold a slot while connecting so concurrent acquires count it.
            let Ok(permit) = self.shared.semaphore.clone().try_acquire_owned() else {
                return Ok(());
            };
            let status = self.status();
            if status.idle + status.in_use > status.max {
                return Ok(());
            }
            let conn = self.connect().await?;
            self.shared.release(conn);
            drop(permit);
        }
        Ok(())
    }

    /// Close idle connections past `idle_timeout`, keeping the `min_idle` newest.
    pub fn reap_idle(&self) -> usize {
        let timeout = self.shared.config.idle_timeout;
        let min_idle = self.shared.config.min_idle;

        let expired: Vec<T::Connection> = {
            let mut idle = self.shared.idle.lock();
            // Newest last; keep the floor from the tail.
            idle.sort_by_key(|c| c.since);
            let keep_from = idle.len().saturating_sub(min_idle);
            let mut expired = Vec::new();
            let mut kept = Vec::with_capacity(idle.len());
            for (i, entry) in idle.drain(..).enumerate() {
                if i < keep_from && entry.since.elapsed() >= timeout {
                    expired.push(entry.conn);
                } else {
                    kept.push(entry);
                }
            }
            *idle = kept;
            expired
        };

        let reaped = expired.len();
        for conn in expired {
            self.shared.transport.close(conn);
        }
        if reaped > 0 {
            tracing::debug!(target: "rethink_core::pool", "Reaped {reaped} idle connection(s)");
        }
        reaped
    }

    /// Background task that reaps idle connections and restores the idle floor.
    /// Periods shorter than 10 ms are raised to 10 ms.
    pub fn spawn_reaper(&self, every: Duration) -> JoinHandle<()> {
        let pool = self.clone();
        let every = every.max(MIN_REAP_INTERVAL);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            loop {
                tick.tick().await;
                if pool.is_closed() {
                    break;
                }
                pool.reap_idle();
                if let Err(e) = pool.fill_idle().await {
                    tracing::error!(target: "rethink_core::pool", "Failed to refill idle connections: {e}");
                }
            }
        })
    }

    pub fn status(&self) -> PoolStatus {
        let max = self.shared.config.max_connections;
        PoolStatus {
            idle: self.shared.idle.lock().len(),
            in_use: max - self.shared.semaphore.available_permits(),
            max,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.semaphore.is_closed()
    }

    /// Stop handing out connections and close the idle ones. Connections still
    /// checked out are closed as their guards drop.
    pub fn close(&self) {
        self.shared.semaphore.close();
        let idle: Vec<_> = self.shared.idle.lock().drain(..).collect();
        for entry in idle {
            self.shared.transport.close(entry.conn);
        }
        tracing::debug!(target: "rethink_core::pool", "Pool closed");
    }
}

/// A checked-out connection. Released to the pool on drop.
pub struct PooledConnection<T: Transport> {
    conn: Option<T::Connection>,
    permit: Option<OwnedSemaphorePermit>,
    shared: Arc<Shared<T>>,
    in_flight: bool,
}

impl<T: Transport> PooledConnection<T> {
    /// Mark the start or end of an operation on this connection.
    pub(crate) fn set_in_flight(&mut self, in_flight: bool) {
        self.in_flight = in_flight;
    }

    /// Close the connection instead of returning it to the pool.
    pub fn destroy(mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.transport.close(conn);
        }
    }
}

impl<T: Transport> std::fmt::Debug for PooledConnection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Deref for PooledConnection<T> {
    type Target = T::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl<T: Transport> DerefMut for PooledConnection<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl<T: Transport> Drop for PooledConnection<T> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if self.in_flight {
                tracing::warn!(
                    target: "rethink_core::pool",
                    "Connection abandoned mid-operation; closing it"
                );
                self.shared.transport.close(conn);
            } else {
                self.shared.release(conn);
            }
        }
        // Free the slot only after the connection is back in the idle list.
        drop(self.permit.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use pretty_assertions::assert_eq;

    fn pool(max: usize, min_idle: usize) -> (Arc<MemoryTransport>, ConnectionPool<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new());
        let config = PoolConfig {
            max_connections: max,
            min_idle,
            idle_timeout: Duration::ZERO,
            acquire_timeout: Duration::from_millis(50),
        };
        (Arc::clone(&transport), ConnectionPool::new(transport, config))
    }

    #[tokio::test]
    async fn test_released_connection_is_reused() {
        let (transport, pool) = pool(2, 0);
        let first = pool.acquire().await.unwrap();
        let id = first.id();
        drop(first);

        let second = pool.acquire().await.unwrap();
        assert_eq!(second.id(), id);
        assert_eq!(transport.stats().connects, 1);
        assert_eq!(pool.status(), PoolStatus { idle: 0, in_use: 1, max: 2 });
    }

    #[tokio::test]
    async fn test_saturated_pool_times_out() {
        let (transport, pool) = pool(2, 0);
        let _a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();

        let err = pool.acquire().await.unwrap_err();
        assert_eq!(err, AdapterError::PoolExhausted(50));
        assert_eq!(transport.stats().connects, 2);
    }

    #[tokio::test]
    async fn test_waiter_gets_released_slot() {
        let (_, pool) = pool(1, 0);
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|c| c.id()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(held);

        assert_eq!(waiter.await.unwrap().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_in_flight_drop_destroys() {
        let (transport, pool) = pool(2, 0);
        let mut conn = pool.acquire().await.unwrap();
        conn.set_in_flight(true);
        drop(conn);

        assert_eq!(transport.stats().closes, 1);
        assert_eq!(pool.status().idle, 0);
        assert_eq!(pool.status().in_use, 0);
    }

    #[tokio::test]
    async fn test_explicit_destroy() {
        let (transport, pool) = pool(2, 0);
        pool.acquire().await.unwrap().destroy();
        assert_eq!(transport.stats().open_connections(), 0);
        assert_eq!(pool.status().in_use, 0);
    }

    #[tokio::test]
    async fn test_fill_and_reap_respect_idle_floor() {
        let (transport, pool) = pool(4, 1);
        let held: Vec<_> = vec![
            pool.acquire().await.unwrap(),
            pool.acquire().await.unwrap(),
            pool.acquire().await.unwrap(),
        ];
        drop(held);
        assert_eq!(pool.status().idle, 3);

        assert_eq!(pool.reap_idle(), 2);
        assert_eq!(pool.status().idle, 1);
        assert_eq!(transport.stats().open_connections(), 1);

        pool.fill_idle().await.unwrap();
        assert_eq!(pool.status().idle, 1);
    }

    #[tokio::test]
    async fn test_fill_idle_opens_floor() {
        let (transport, pool) = pool(4, 2);
        pool.fill_idle().await.unwrap();
        assert_eq!(pool.status().idle, 2);
        assert_eq!(transport.stats().connects, 2);
    }

    #[tokio::test]
    async fn test_connect_failure_frees_slot() {
        let (transport, pool) = pool(1, 0);
        transport.refuse_connections(Some("connection refused"));
        assert_eq!(pool.acquire().await.unwrap_err().kind(), "transport_error");

        transport.refuse_connections(None);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_reaper_survives_zero_period() {
        let (transport, pool) = pool(4, 1);
        let held = vec![pool.acquire().await.unwrap(), pool.acquire().await.unwrap()];
        drop(held);

        let reaper = pool.spawn_reaper(Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!reaper.is_finished());
        assert_eq!(pool.status().idle, 1);
        assert_eq!(transport.stats().open_connections(), 1);

        pool.close();
        reaper.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_pool() {
        let (transport, pool) = pool(2, 0);
        let held = pool.acquire().await.unwrap();
        drop(pool.acquire().await.unwrap());
        pool.close();

        assert_eq!(pool.acquire().await.unwrap_err(), AdapterError::PoolClosed);
        drop(held);
        assert_eq!(transport.stats().open_connections(), 0);
    }
}
