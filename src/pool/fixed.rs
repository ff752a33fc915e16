//! Fixed-size pool: a hard cap on open connections with a blocking acquire.

use crate::config::PoolSettings;
use crate::error::{MapResult, MapperError};
use crate::pool::driver::DriverConnection;
use crate::pool::{ConnectionPool, PoolStatus, PooledConnection};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore};

/// Bounded pool with a free list.
///
/// The semaphore carries one permit per slot; an acquire that cannot get a
/// permit within the acquire timeout fails with `PoolExhausted`. Physical
/// connections are opened lazily, so an idle pool holds no sockets until
/// first use.
pub struct FixedPool {
    settings: PoolSettings,
    slots: Semaphore,
    idle: Mutex<Vec<PooledConnection>>,
    // Mirrors idle.len(); status() must not touch the lock.
    idle_count: AtomicUsize,
    in_use: AtomicUsize,
    closed: AtomicBool,
}

impl FixedPool {
    pub fn new(settings: PoolSettings) -> Self {
        let max = settings.max_connections as usize;
        Self {
            settings,
            slots: Semaphore::new(max),
            idle: Mutex::new(Vec::with_capacity(max)),
            idle_count: AtomicUsize::new(0),
            in_use: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    async fn pop_idle(&self) -> Option<PooledConnection> {
        let mut idle = self.idle.lock().await;
        let conn = idle.pop();
        if conn.is_some() {
            self.idle_count.fetch_sub(1, Ordering::SeqCst);
        }
        conn
    }

    async fn checkout_or_connect(&self) -> MapResult<PooledConnection> {
        while let Some(mut conn) = self.pop_idle().await {
            if !self.settings.test_before_acquire {
                return Ok(conn);
            }
            match conn.ping().await {
                Ok(()) => return Ok(conn),
                Err(err) => {
                    tracing::debug!(error = %err, "discarding dead idle connection");
                    conn.discard().await;
                }
            }
        }
        let conn = DriverConnection::connect(&self.settings.url).await?;
        Ok(PooledConnection::direct(conn))
    }
}

#[async_trait]
impl ConnectionPool for FixedPool {
    async fn acquire(&self) -> MapResult<PooledConnection> {
        let started = Instant::now();
        let permit = tokio::time::timeout(self.settings.acquire_timeout, self.slots.acquire())
            .await
            .map_err(|_| MapperError::PoolExhausted {
                waited_ms: started.elapsed().as_millis() as u64,
            })?
            .map_err(|_| MapperError::connection("pool is closed"))?;
        // The slot is now owned by the checkout; it is handed back
        // explicitly in release/invalidate.
        permit.forget();

        match self.checkout_or_connect().await {
            Ok(conn) => {
                self.in_use.fetch_add(1, Ordering::SeqCst);
                Ok(conn)
            }
            Err(err) => {
                self.slots.add_permits(1);
                Err(err)
            }
        }
    }

    async fn release(&self, conn: PooledConnection) {
        self.in_use.fetch_sub(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            conn.discard().await;
        } else {
            let mut idle = self.idle.lock().await;
            idle.push(conn);
            self.idle_count.fetch_add(1, Ordering::SeqCst);
        }
        self.slots.add_permits(1);
    }

    async fn invalidate(&self, conn: PooledConnection) {
        tracing::debug!(conn = ?conn, "invalidating connection");
        self.in_use.fetch_sub(1, Ordering::SeqCst);
        conn.discard().await;
        self.slots.add_permits(1);
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.slots.close();
        let idle = std::mem::take(&mut *self.idle.lock().await);
        self.idle_count.store(0, Ordering::SeqCst);
        for conn in idle {
            conn.discard().await;
        }
    }

    fn status(&self) -> PoolStatus {
        PoolStatus {
            idle: self.idle_count.load(Ordering::SeqCst),
            in_use: self.in_use.load(Ordering::SeqCst),
            max_connections: self.settings.max_connections,
        }
    }
}
