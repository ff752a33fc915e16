//! Interceptor chain around statement execution.
//!
//! Interceptors are registered at startup; the chain preserves registration
//! order, runs `before` hooks first-to-last and `after` hooks last-to-first,
//! so the last-registered entry is innermost. `after` always runs, observes
//! the outcome, and the chain propagates errors unchanged.

use crate::dispatcher::Executed;
use crate::error::{MapResult, MapperError};
use std::sync::Arc;

/// The closed set of interceptable operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Update,
    Batch,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Query => write!(f, "query"),
            Self::Update => write!(f, "update"),
            Self::Batch => write!(f, "batch"),
        }
    }
}

/// What an interceptor sees about the execution it wraps.
#[derive(Debug, Clone, Copy)]
pub struct StatementContext<'a> {
    pub kind: OperationKind,
    pub statement_id: &'a str,
    pub sql: &'a str,
    pub param_count: usize,
}

/// A before/after hook around statement execution.
///
/// `matches` selects which operations the entry applies to (all by
/// default); `after` observes success or failure but cannot swallow the
/// error, matching the propagate-by-default policy.
pub trait Interceptor: Send + Sync {
    fn matches(&self, ctx: &StatementContext<'_>) -> bool {
        let _ = ctx;
        true
    }

    fn before(&self, ctx: &StatementContext<'_>) {
        let _ = ctx;
    }

    fn after(&self, ctx: &StatementContext<'_>, outcome: Result<&Executed, &MapperError>) {
        let _ = (ctx, outcome);
    }
}

/// Ordered interceptor entries wrapped around one execution.
#[derive(Default, Clone)]
pub struct InterceptorChain {
    entries: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Chain order is registration order.
    pub fn push(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.entries.push(interceptor);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run `inner` wrapped by every matching entry.
    pub async fn execute<F, Fut>(
        &self,
        ctx: &StatementContext<'_>,
        inner: F,
    ) -> MapResult<Executed>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = MapResult<Executed>>,
    {
        let matched: Vec<&Arc<dyn Interceptor>> =
            self.entries.iter().filter(|e| e.matches(ctx)).collect();

        for entry in &matched {
            entry.before(ctx);
        }
        let result = inner().await;
        for entry in matched.iter().rev() {
            entry.after(ctx, result.as_ref().map_err(|e| e));
        }
        result
    }
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// Logs a line before and after every execution.
pub struct LoggingInterceptor;

impl Interceptor for LoggingInterceptor {
    fn before(&self, ctx: &StatementContext<'_>) {
        tracing::debug!(
            statement_id = %ctx.statement_id,
            kind = %ctx.kind,
            params = ctx.param_count,
            "executing statement"
        );
    }

    fn after(&self, ctx: &StatementContext<'_>, outcome: Result<&Executed, &MapperError>) {
        match outcome {
            Ok(Executed::Rows(rows)) => tracing::debug!(
                statement_id = %ctx.statement_id,
                rows = rows.len(),
                "statement returned rows"
            ),
            Ok(Executed::Affected(result)) => tracing::debug!(
                statement_id = %ctx.statement_id,
                rows_affected = result.rows_affected,
                "statement affected rows"
            ),
            Err(err) => tracing::warn!(
                statement_id = %ctx.statement_id,
                error = %err,
                "statement failed"
            ),
        }
    }
}
