//! Sessions and the session factory.
//!
//! A [`Session`] owns one pooled connection for its whole lifetime and is
//! the only execution surface. Auto-commit sessions run every statement in
//! its own implicit transaction; manual sessions open a transaction on the
//! connection and expose commit/rollback. A session that hits a
//! connection-class error invalidates its connection and closes itself.

use crate::config::PoolConfig;
use crate::dispatcher::{ExecResult, Executed, Invocation, MapperDispatcher};
use crate::error::{MapResult, MapperError};
use crate::handler::{TypeHandler, TypeHandlerRegistry};
use crate::interceptor::{Interceptor, InterceptorChain};
use crate::pool::{ConnectionPool, PooledConnection, build_pool};
use crate::statement::{RegistryBuilder, StatementDefinition};
use crate::value::{FromMappedRow, FromValue, Value};
use std::sync::Arc;
use std::time::Duration;

const SESSION_CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

/// One unit of mapper work bound to one connection.
pub struct Session {
    pool: Arc<dyn ConnectionPool>,
    dispatcher: Arc<MapperDispatcher>,
    conn: Option<PooledConnection>,
    auto_commit: bool,
    dirty: bool,
}

impl Session {
    async fn open(
        pool: Arc<dyn ConnectionPool>,
        dispatcher: Arc<MapperDispatcher>,
        auto_commit: bool,
    ) -> MapResult<Self> {
        let mut conn = pool.acquire().await?;
        if !auto_commit {
            if let Err(err) = conn.execute_raw("BEGIN", SESSION_CONTROL_TIMEOUT).await {
                pool.invalidate(conn).await;
                return Err(err);
            }
        }
        tracing::debug!(conn = ?conn, auto_commit, "session opened");
        Ok(Self {
            pool,
            dispatcher,
            conn: Some(conn),
            auto_commit,
            dirty: false,
        })
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// Execute one invocation on this session's connection.
    ///
    /// A connection-class failure tears the session down: the connection is
    /// invalidated and every later call fails with `SessionClosed`.
    pub async fn dispatch(&mut self, invocation: &Invocation) -> MapResult<Executed> {
        let conn = self.conn.as_mut().ok_or(MapperError::SessionClosed)?;
        match self
            .dispatcher
            .dispatch_scoped(conn, invocation, !self.auto_commit)
            .await
        {
            Ok(executed) => {
                if !self.auto_commit && matches!(executed, Executed::Affected(_)) {
                    self.dirty = true;
                }
                Ok(executed)
            }
            Err(err) => {
                if err.is_connection_error() {
                    if let Some(conn) = self.conn.take() {
                        self.pool.invalidate(conn).await;
                    }
                }
                Err(err)
            }
        }
    }

    /// Query expecting zero or one row.
    pub async fn select_one<T: FromMappedRow>(
        &mut self,
        invocation: &Invocation,
    ) -> MapResult<Option<T>> {
        let rows = self.select_rows(invocation).await?;
        match rows.len() {
            0 => Ok(None),
            1 => T::from_mapped_row(&rows[0]).map(Some),
            n => Err(MapperError::result_mapping(
                invocation.statement_id(),
                format!("expected at most one row, got {}", n),
            )),
        }
    }

    /// Query mapped row-by-row into domain objects.
    pub async fn select_list<T: FromMappedRow>(
        &mut self,
        invocation: &Invocation,
    ) -> MapResult<Vec<T>> {
        let rows = self.select_rows(invocation).await?;
        rows.iter().map(T::from_mapped_row).collect()
    }

    /// Query expecting a single scalar, e.g. a COUNT.
    pub async fn select_scalar<T: FromValue>(
        &mut self,
        invocation: &Invocation,
    ) -> MapResult<Option<T>> {
        let rows = self.select_rows(invocation).await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let value = row.get("value").or_else(|| row.first()).unwrap_or(&Value::Null);
        if value.is_null() {
            return Ok(None);
        }
        T::from_value(value).map(Some)
    }

    async fn select_rows(
        &mut self,
        invocation: &Invocation,
    ) -> MapResult<Vec<crate::value::MappedRow>> {
        match self.dispatch(invocation).await? {
            Executed::Rows(rows) => Ok(rows),
            Executed::Affected(_) => Err(MapperError::result_mapping(
                invocation.statement_id(),
                "statement did not produce rows",
            )),
        }
    }

    /// Execute an insert, surfacing the generated key when the backend
    /// reports one.
    pub async fn insert(&mut self, invocation: &Invocation) -> MapResult<ExecResult> {
        self.affected(invocation).await
    }

    /// Execute an update, returning the affected-row count.
    pub async fn update(&mut self, invocation: &Invocation) -> MapResult<u64> {
        self.affected(invocation).await.map(|r| r.rows_affected)
    }

    /// Execute a delete, returning the affected-row count.
    pub async fn delete(&mut self, invocation: &Invocation) -> MapResult<u64> {
        self.affected(invocation).await.map(|r| r.rows_affected)
    }

    /// Execute a batch statement in one round-trip where the template
    /// allows it.
    pub async fn execute_batch(&mut self, invocation: &Invocation) -> MapResult<ExecResult> {
        self.affected(invocation).await
    }

    async fn affected(&mut self, invocation: &Invocation) -> MapResult<ExecResult> {
        match self.dispatch(invocation).await? {
            Executed::Affected(result) => Ok(result),
            Executed::Rows(_) => Err(MapperError::result_mapping(
                invocation.statement_id(),
                "statement produced rows where an affected count was expected",
            )),
        }
    }

    /// Commit the open transaction and begin the next one. No-op on
    /// auto-commit sessions.
    pub async fn commit(&mut self) -> MapResult<()> {
        if self.auto_commit {
            return Ok(());
        }
        let conn = self.conn.as_mut().ok_or(MapperError::SessionClosed)?;
        conn.execute_raw("COMMIT", SESSION_CONTROL_TIMEOUT).await?;
        conn.execute_raw("BEGIN", SESSION_CONTROL_TIMEOUT).await?;
        self.dirty = false;
        Ok(())
    }

    /// Discard uncommitted work and begin the next transaction. No-op on
    /// auto-commit sessions.
    pub async fn rollback(&mut self) -> MapResult<()> {
        if self.auto_commit {
            return Ok(());
        }
        let conn = self.conn.as_mut().ok_or(MapperError::SessionClosed)?;
        conn.execute_raw("ROLLBACK", SESSION_CONTROL_TIMEOUT).await?;
        conn.execute_raw("BEGIN", SESSION_CONTROL_TIMEOUT).await?;
        self.dirty = false;
        Ok(())
    }

    /// Release the connection back to the pool. Uncommitted work on a
    /// manual session is rolled back. Idempotent.
    pub async fn close(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        if !self.auto_commit {
            // Roll back whether dirty or not; the open BEGIN must not leak
            // into the next checkout.
            if let Err(err) = conn.execute_raw("ROLLBACK", SESSION_CONTROL_TIMEOUT).await {
                tracing::warn!(error = %err, "rollback on close failed, invalidating");
                self.pool.invalidate(conn).await;
                return;
            }
        }
        self.pool.release(conn).await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Best effort: return the connection without blocking the caller.
        if let Some(mut conn) = self.conn.take() {
            let pool = Arc::clone(&self.pool);
            let auto_commit = self.auto_commit;
            tokio::spawn(async move {
                if auto_commit {
                    pool.release(conn).await;
                } else if conn
                    .execute_raw("ROLLBACK", SESSION_CONTROL_TIMEOUT)
                    .await
                    .is_ok()
                {
                    pool.release(conn).await;
                } else {
                    pool.invalidate(conn).await;
                }
            });
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("open", &self.is_open())
            .field("auto_commit", &self.auto_commit)
            .field("dirty", &self.dirty)
            .finish()
    }
}

/// Shared, immutable session source. Cheap to clone.
#[derive(Clone)]
pub struct SessionFactory {
    pool: Arc<dyn ConnectionPool>,
    dispatcher: Arc<MapperDispatcher>,
}

impl SessionFactory {
    pub fn builder() -> SessionFactoryBuilder {
        SessionFactoryBuilder::new()
    }

    /// Open an auto-commit session.
    pub async fn open_session(&self) -> MapResult<Session> {
        self.open_session_with(true).await
    }

    /// Open a session, manual-transaction when `auto_commit` is false.
    pub async fn open_session_with(&self, auto_commit: bool) -> MapResult<Session> {
        Session::open(
            Arc::clone(&self.pool),
            Arc::clone(&self.dispatcher),
            auto_commit,
        )
        .await
    }

    pub fn pool(&self) -> &Arc<dyn ConnectionPool> {
        &self.pool
    }

    /// Close the underlying pool. Open sessions fail on their next call.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl std::fmt::Debug for SessionFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionFactory")
            .field("pool", &self.pool.status())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

/// Startup-time configuration collected into a [`SessionFactory`].
#[derive(Default)]
pub struct SessionFactoryBuilder {
    pool_config: Option<PoolConfig>,
    registry: RegistryBuilder,
    handlers: TypeHandlerRegistry,
    chain: InterceptorChain,
    default_timeout: Option<Duration>,
    default_fetch_limit: Option<u32>,
    error: Option<MapperError>,
}

impl SessionFactoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pool(mut self, config: PoolConfig) -> Self {
        self.pool_config = Some(config);
        self
    }

    /// Register one statement definition.
    pub fn statement(mut self, def: StatementDefinition) -> Self {
        if self.error.is_none() {
            if let Err(err) = self.registry.register(def) {
                self.error = Some(err);
            }
        }
        self
    }

    /// Register every definition from a JSON array document.
    pub fn statements_json(mut self, json: &str) -> Self {
        if self.error.is_none() {
            if let Err(err) = self.registry.register_json(json) {
                self.error = Some(err);
            }
        }
        self
    }

    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.chain.push(interceptor);
        self
    }

    pub fn type_handler(mut self, name: impl Into<String>, handler: Arc<dyn TypeHandler>) -> Self {
        if self.error.is_none() {
            if let Err(err) = self.handlers.register(name, handler) {
                self.error = Some(err);
            }
        }
        self
    }

    /// Default per-statement execution timeout.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Default row cap applied to queries without their own limit.
    pub fn default_fetch_limit(mut self, limit: u32) -> Self {
        self.default_fetch_limit = Some(limit);
        self
    }

    /// Validate the configuration, connect the pool, and freeze the
    /// registry.
    pub async fn build(self) -> MapResult<SessionFactory> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let pool_config = self
            .pool_config
            .ok_or_else(|| MapperError::config("pool configuration is required"))?;
        let pool = build_pool(&pool_config).await?;

        let mut dispatcher = MapperDispatcher::new(self.registry.build())
            .with_handlers(self.handlers)
            .with_chain(self.chain);
        if let Some(timeout) = self.default_timeout {
            dispatcher = dispatcher.with_default_timeout(timeout);
        }
        if let Some(limit) = self.default_fetch_limit {
            dispatcher = dispatcher.with_default_fetch_limit(limit);
        }
        Ok(SessionFactory {
            pool,
            dispatcher: Arc::new(dispatcher),
        })
    }
}
