//! Bounded connection pool.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::conn::Connection;
use crate::error::Error;

/// Connections checked out at once are limited to `pool_size`; at most
/// `max_idle` connections are kept around between commands.
pub(crate) struct Pool {
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<Connection>>,
    max_idle: usize,
    max_idle_time: Duration,
    wait_timeout: Duration,
}

/// A connection on loan from the pool. Holding it holds one pool slot.
pub(crate) struct Checkout {
    pub conn: Connection,
    _permit: OwnedSemaphorePermit,
}

impl Pool {
    pub fn new(
        pool_size: usize,
        max_idle: usize,
        max_idle_time: Duration,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(pool_size.min(Semaphore::MAX_PERMITS))),
            idle: Mutex::new(VecDeque::new()),
            max_idle,
            max_idle_time,
            wait_timeout,
        }
    }

    /// Take an idle connection or open a new one with `connect`.
    pub async fn get<F, Fut>(&self, connect: F) -> Result<Checkout, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Connection, Error>>,
    {
        let permit = tokio::time::timeout(self.wait_timeout, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| Error::PoolTimeout)?
            .map_err(|_| Error::Closed)?;

        if let Some(conn) = self.pop_idle() {
            return Ok(Checkout {
                conn,
                _permit: permit,
            });
        }

        let conn = connect().await?;
        Ok(Checkout {
            conn,
            _permit: permit,
        })
    }

    /// Return a healthy connection. Broken connections are simply dropped,
    /// and so is everything returned after `close`.
    pub fn put(&self, checkout: Checkout) {
        if self.permits.is_closed() {
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push_back(checkout.conn);
        }
    }

    fn pop_idle(&self) -> Option<Connection> {
        let mut idle = self.idle.lock();
        while let Some(conn) = idle.pop_back() {
            if conn.idle_for() < self.max_idle_time {
                return Some(conn);
            }
        }
        None
    }

    /// Stop handing out connections and drop the idle ones.
    pub fn close(&self) {
        self.permits.close();
        self.idle.lock().clear();
    }

    #[cfg(test)]
    pub fn idle_len(&self) -> usize {
        self.idle.lock().len()
    }
}
