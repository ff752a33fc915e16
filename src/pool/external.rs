//! External pool: delegates lifecycle to the sqlx driver pool.

use crate::config::PoolSettings;
use crate::error::{MapResult, MapperError};
use crate::pool::driver::DriverKind;
use crate::pool::{ConnectionPool, PoolStatus, PooledConnection};
use async_trait::async_trait;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Instant;

enum DriverPool {
    MySql(sqlx::MySqlPool),
    Postgres(sqlx::PgPool),
    Sqlite(sqlx::SqlitePool),
}

/// Adapter over the sqlx pool.
///
/// sqlx owns sizing, health checks, and idle reaping; this type only maps
/// the acquire result onto the common contract. Released connections go
/// back through sqlx's own return path when the handle drops.
pub struct ExternalPool {
    pool: DriverPool,
    max_connections: u32,
}

impl ExternalPool {
    pub async fn connect(settings: PoolSettings) -> MapResult<Self> {
        let pool = match DriverKind::from_url(&settings.url)? {
            DriverKind::MySql => {
                let pool = MySqlPoolOptions::new()
                    .max_connections(settings.max_connections)
                    .min_connections(settings.min_connections)
                    .acquire_timeout(settings.acquire_timeout)
                    .idle_timeout(Some(settings.idle_timeout))
                    .test_before_acquire(settings.test_before_acquire)
                    .connect(&settings.url)
                    .await?;
                DriverPool::MySql(pool)
            }
            DriverKind::Postgres => {
                let pool = PgPoolOptions::new()
                    .max_connections(settings.max_connections)
                    .min_connections(settings.min_connections)
                    .acquire_timeout(settings.acquire_timeout)
                    .idle_timeout(Some(settings.idle_timeout))
                    .test_before_acquire(settings.test_before_acquire)
                    .connect(&settings.url)
                    .await?;
                DriverPool::Postgres(pool)
            }
            DriverKind::Sqlite => {
                let options = SqliteConnectOptions::from_str(&settings.url)
                    .map_err(MapperError::from)?
                    .create_if_missing(true);
                let pool = SqlitePoolOptions::new()
                    .max_connections(settings.max_connections)
                    .min_connections(settings.min_connections)
                    .acquire_timeout(settings.acquire_timeout)
                    .idle_timeout(Some(settings.idle_timeout))
                    .test_before_acquire(settings.test_before_acquire)
                    .connect_with(options)
                    .await?;
                DriverPool::Sqlite(pool)
            }
        };
        Ok(Self {
            pool,
            max_connections: settings.max_connections,
        })
    }
}

fn acquire_error(err: sqlx::Error, started: Instant) -> MapperError {
    match err {
        sqlx::Error::PoolTimedOut => MapperError::PoolExhausted {
            waited_ms: started.elapsed().as_millis() as u64,
        },
        other => MapperError::from(other),
    }
}

#[async_trait]
impl ConnectionPool for ExternalPool {
    async fn acquire(&self) -> MapResult<PooledConnection> {
        let started = Instant::now();
        match &self.pool {
            DriverPool::MySql(pool) => pool
                .acquire()
                .await
                .map(PooledConnection::from_mysql_pooled)
                .map_err(|e| acquire_error(e, started)),
            DriverPool::Postgres(pool) => pool
                .acquire()
                .await
                .map(PooledConnection::from_pg_pooled)
                .map_err(|e| acquire_error(e, started)),
            DriverPool::Sqlite(pool) => pool
                .acquire()
                .await
                .map(PooledConnection::from_sqlite_pooled)
                .map_err(|e| acquire_error(e, started)),
        }
    }

    async fn release(&self, conn: PooledConnection) {
        // Dropping the handle returns it through sqlx's own path.
        drop(conn);
    }

    async fn invalidate(&self, conn: PooledConnection) {
        tracing::debug!(conn = ?conn, "invalidating connection");
        if let Some(conn) = conn.detach_pooled() {
            conn.close().await;
        }
    }

    async fn close(&self) {
        match &self.pool {
            DriverPool::MySql(pool) => pool.close().await,
            DriverPool::Postgres(pool) => pool.close().await,
            DriverPool::Sqlite(pool) => pool.close().await,
        }
    }

    fn status(&self) -> PoolStatus {
        let (size, idle) = match &self.pool {
            DriverPool::MySql(pool) => (pool.size(), pool.num_idle()),
            DriverPool::Postgres(pool) => (pool.size(), pool.num_idle()),
            DriverPool::Sqlite(pool) => (pool.size(), pool.num_idle()),
        };
        PoolStatus {
            idle,
            in_use: (size as usize).saturating_sub(idle),
            max_connections: self.max_connections,
        }
    }
}
