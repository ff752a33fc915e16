//! Connection pool adapter.
//!
//! One contract over three pooling strategies: [`FixedPool`] (bounded
//! free-list with blocking acquire), [`AdaptivePool`] (grows and shrinks
//! between min/max bounds), and [`ExternalPool`] (delegates to the sqlx
//! driver pool). All strategies hand out [`PooledConnection`]s; a checked-out
//! connection is owned exclusively by its caller until released or
//! invalidated.

pub mod adaptive;
pub mod driver;
pub mod external;
pub mod fixed;

pub use adaptive::AdaptivePool;
pub use driver::{DriverConnection, DriverKind, ExecResult};
pub use external::ExternalPool;
pub use fixed::FixedPool;

use crate::config::{PoolConfig, PoolStrategy};
use crate::error::MapResult;
use crate::value::{MappedRow, Value};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Uniform contract over the pooling strategies.
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Check out a connection, blocking up to the configured acquire
    /// timeout. Fails with `PoolExhausted` when the wait budget elapses and
    /// may open a new physical connection (blocking I/O).
    async fn acquire(&self) -> MapResult<PooledConnection>;

    /// Return a connection to the pool.
    async fn release(&self, conn: PooledConnection);

    /// Discard a connection whose transport failed. The slot is freed; a
    /// replacement is opened lazily on a later acquire.
    async fn invalidate(&self, conn: PooledConnection);

    /// Close the pool and all idle connections. Subsequent acquires fail.
    async fn close(&self);

    /// Point-in-time counters, for logs and tests.
    fn status(&self) -> PoolStatus;
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub idle: usize,
    pub in_use: usize,
    pub max_connections: u32,
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

fn next_connection_id() -> u64 {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

enum Conn {
    /// Physical connection owned by a Fixed or Adaptive pool.
    Direct(DriverConnection),
    /// Connection borrowed from a sqlx pool (External strategy).
    MySqlPooled(sqlx::pool::PoolConnection<sqlx::MySql>),
    PgPooled(sqlx::pool::PoolConnection<sqlx::Postgres>),
    SqlitePooled(sqlx::pool::PoolConnection<sqlx::Sqlite>),
}

/// Dispatch a connection to its backend driver module.
///
/// Every arm binds `$c` to a `&mut` over the raw sqlx connection (pooled
/// handles are unwrapped through `DerefMut`) and aliases `$backend` to the
/// matching driver submodule.
macro_rules! with_backend {
    ($conn:expr, $c:ident, $backend:ident => $body:expr) => {
        match $conn {
            Conn::Direct(DriverConnection::MySql($c)) => {
                use $crate::pool::driver::mysql as $backend;
                $body
            }
            Conn::Direct(DriverConnection::Postgres($c)) => {
                use $crate::pool::driver::postgres as $backend;
                $body
            }
            Conn::Direct(DriverConnection::Sqlite($c)) => {
                use $crate::pool::driver::sqlite as $backend;
                $body
            }
            Conn::MySqlPooled($c) => {
                use $crate::pool::driver::mysql as $backend;
                let $c = &mut **$c;
                $body
            }
            Conn::PgPooled($c) => {
                use $crate::pool::driver::postgres as $backend;
                let $c = &mut **$c;
                $body
            }
            Conn::SqlitePooled($c) => {
                use $crate::pool::driver::sqlite as $backend;
                let $c = &mut **$c;
                $body
            }
        }
    };
}

/// A checked-out connection.
///
/// Owned exclusively by one session at a time; the pool owns it while idle.
/// Never shared across threads during a checkout.
pub struct PooledConnection {
    inner: Conn,
    id: u64,
    created_at: Instant,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("age", &self.created_at.elapsed())
            .finish()
    }
}

impl PooledConnection {
    pub(crate) fn direct(conn: DriverConnection) -> Self {
        Self {
            inner: Conn::Direct(conn),
            id: next_connection_id(),
            created_at: Instant::now(),
        }
    }

    pub(crate) fn from_mysql_pooled(conn: sqlx::pool::PoolConnection<sqlx::MySql>) -> Self {
        Self {
            inner: Conn::MySqlPooled(conn),
            id: next_connection_id(),
            created_at: Instant::now(),
        }
    }

    pub(crate) fn from_pg_pooled(conn: sqlx::pool::PoolConnection<sqlx::Postgres>) -> Self {
        Self {
            inner: Conn::PgPooled(conn),
            id: next_connection_id(),
            created_at: Instant::now(),
        }
    }

    pub(crate) fn from_sqlite_pooled(conn: sqlx::pool::PoolConnection<sqlx::Sqlite>) -> Self {
        Self {
            inner: Conn::SqlitePooled(conn),
            id: next_connection_id(),
            created_at: Instant::now(),
        }
    }

    /// Pull a borrowed connection out of its sqlx pool so it can be torn
    /// down instead of returned.
    pub(crate) fn detach_pooled(self) -> Option<DriverConnection> {
        match self.inner {
            Conn::Direct(_) => None,
            Conn::MySqlPooled(c) => Some(DriverConnection::MySql(c.detach())),
            Conn::PgPooled(c) => Some(DriverConnection::Postgres(c.detach())),
            Conn::SqlitePooled(c) => Some(DriverConnection::Sqlite(c.detach())),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> DriverKind {
        match &self.inner {
            Conn::Direct(conn) => conn.kind(),
            Conn::MySqlPooled(_) => DriverKind::MySql,
            Conn::PgPooled(_) => DriverKind::Postgres,
            Conn::SqlitePooled(_) => DriverKind::Sqlite,
        }
    }

    /// Execute a query and collect mapped rows, optionally bounded by a
    /// fetch limit.
    pub async fn fetch_rows(
        &mut self,
        sql: &str,
        params: &[Value],
        limit: Option<u32>,
        timeout: Duration,
    ) -> MapResult<Vec<MappedRow>> {
        with_backend!(&mut self.inner, c, backend => {
            backend::fetch_rows(&mut *c, sql, params, limit, timeout).await
        })
    }

    /// Execute an update and report affected rows plus any generated key.
    pub async fn execute(
        &mut self,
        sql: &str,
        params: &[Value],
        timeout: Duration,
    ) -> MapResult<ExecResult> {
        with_backend!(&mut self.inner, c, backend => {
            backend::execute(&mut *c, sql, params, timeout).await
        })
    }

    /// Execute an unprepared statement (BEGIN/COMMIT/ROLLBACK and friends).
    pub async fn execute_raw(&mut self, sql: &str, timeout: Duration) -> MapResult<()> {
        with_backend!(&mut self.inner, c, backend => {
            backend::execute(&mut *c, sql, &[], timeout).await.map(|_| ())
        })
    }

    /// Liveness probe.
    pub async fn ping(&mut self) -> MapResult<()> {
        use sqlx::Connection as _;
        match &mut self.inner {
            Conn::Direct(conn) => conn.ping().await,
            Conn::MySqlPooled(c) => c.ping().await.map_err(crate::error::MapperError::from),
            Conn::PgPooled(c) => c.ping().await.map_err(crate::error::MapperError::from),
            Conn::SqlitePooled(c) => c.ping().await.map_err(crate::error::MapperError::from),
        }
    }

    /// Tear down the underlying connection.
    pub(crate) async fn discard(self) {
        match self.inner {
            Conn::Direct(conn) => conn.close().await,
            // sqlx reclaims or drops its own connections
            Conn::MySqlPooled(_) | Conn::PgPooled(_) | Conn::SqlitePooled(_) => {}
        }
    }
}

/// Build the pool selected by a validated configuration.
pub async fn build_pool(config: &PoolConfig) -> MapResult<Arc<dyn ConnectionPool>> {
    let settings = config.settings()?;
    tracing::info!(
        strategy = %config.strategy,
        max_connections = settings.max_connections,
        "building connection pool"
    );
    match config.strategy {
        PoolStrategy::Fixed => Ok(Arc::new(FixedPool::new(settings))),
        PoolStrategy::Adaptive => {
            let pool = AdaptivePool::connect(settings).await?;
            Ok(pool as Arc<dyn ConnectionPool>)
        }
        PoolStrategy::External => {
            let pool = ExternalPool::connect(settings).await?;
            Ok(Arc::new(pool))
        }
    }
}
