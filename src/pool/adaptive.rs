//! Adaptive pool: grows toward a maximum under load and shrinks back to a
//! warm minimum when connections sit idle.

use crate::config::PoolSettings;
use crate::error::{MapResult, MapperError};
use crate::pool::driver::DriverConnection;
use crate::pool::{ConnectionPool, PoolStatus, PooledConnection};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore};

struct IdleConn {
    conn: PooledConnection,
    since: Instant,
}

/// Pool that keeps `min_connections` warm and opens up to
/// `max_connections` on demand.
///
/// A background task wakes every cleanup interval and closes idle
/// connections older than the idle timeout, never shrinking the pool below
/// the minimum. The task holds only a weak handle, so dropping the pool
/// stops it.
pub struct AdaptivePool {
    settings: PoolSettings,
    slots: Semaphore,
    idle: Mutex<Vec<IdleConn>>,
    // Mirrors idle.len(); status() must not touch the lock.
    idle_count: AtomicUsize,
    in_use: AtomicUsize,
    closed: AtomicBool,
}

impl AdaptivePool {
    /// Open the pool, warming the minimum number of connections.
    pub async fn connect(settings: PoolSettings) -> MapResult<Arc<Self>> {
        let max = settings.max_connections as usize;
        let mut warm = Vec::with_capacity(settings.min_connections as usize);
        for _ in 0..settings.min_connections {
            let conn = DriverConnection::connect(&settings.url).await?;
            warm.push(IdleConn {
                conn: PooledConnection::direct(conn),
                since: Instant::now(),
            });
        }
        tracing::debug!(warmed = warm.len(), "adaptive pool connected");

        let pool = Arc::new(Self {
            settings,
            slots: Semaphore::new(max),
            idle_count: AtomicUsize::new(warm.len()),
            idle: Mutex::new(warm),
            in_use: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        });
        Self::spawn_reaper(Arc::downgrade(&pool), pool.settings.cleanup_interval);
        Ok(pool)
    }

    fn spawn_reaper(pool: Weak<Self>, every: std::time::Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(pool) = pool.upgrade() else {
                    break;
                };
                if pool.closed.load(Ordering::SeqCst) {
                    break;
                }
                pool.reap_idle().await;
            }
        });
    }

    /// Close idle connections past the idle timeout, keeping the total at
    /// or above `min_connections`.
    async fn reap_idle(&self) {
        let min = self.settings.min_connections as usize;
        let expired = {
            let mut idle = self.idle.lock().await;
            let total = idle.len() + self.in_use.load(Ordering::SeqCst);
            let mut droppable = total.saturating_sub(min);
            let mut expired = Vec::new();
            let mut i = 0;
            while i < idle.len() {
                if droppable == 0 {
                    break;
                }
                if idle[i].since.elapsed() >= self.settings.idle_timeout {
                    expired.push(idle.swap_remove(i));
                    self.idle_count.fetch_sub(1, Ordering::SeqCst);
                    droppable -= 1;
                } else {
                    i += 1;
                }
            }
            expired
        };
        if !expired.is_empty() {
            tracing::debug!(closed = expired.len(), "reaped idle connections");
        }
        for entry in expired {
            entry.conn.discard().await;
        }
    }

    async fn pop_idle(&self) -> Option<IdleConn> {
        let mut idle = self.idle.lock().await;
        let entry = idle.pop();
        if entry.is_some() {
            self.idle_count.fetch_sub(1, Ordering::SeqCst);
        }
        entry
    }

    async fn checkout_or_connect(&self) -> MapResult<PooledConnection> {
        while let Some(entry) = self.pop_idle().await {
            let mut conn = entry.conn;
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
impl ConnectionPool for AdaptivePool {
    async fn acquire(&self) -> MapResult<PooledConnection> {
        let started = Instant::now();
        let permit = tokio::time::timeout(self.settings.acquire_timeout, self.slots.acquire())
            .await
            .map_err(|_| MapperError::PoolExhausted {
                waited_ms: started.elapsed().as_millis() as u64,
            })?
            .map_err(|_| MapperError::connection("pool is closed"))?;
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
            idle.push(IdleConn {
                conn,
                since: Instant::now(),
            });
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
        for entry in idle {
            entry.conn.discard().await;
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
