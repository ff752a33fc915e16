//! Mapper dispatcher: turns a mapper-method invocation into a bound,
//! executed statement with a shaped result.
//!
//! Dispatch resolves `Mapper.method` against the statement registry, binds
//! and type-checks arguments, runs the interceptor chain around the driver
//! round-trip, and finally applies the declared result shape. Binding and
//! shaping never touch the connection, so a binding failure costs no
//! round-trip.

use crate::error::{MapResult, MapperError};
use crate::handler::TypeHandlerRegistry;
use crate::interceptor::{InterceptorChain, OperationKind, StatementContext};
use crate::pool::PooledConnection;
use crate::statement::{
    ParameterSpec, ResultShape, StatementDefinition, StatementKind, StatementRegistry,
};
use crate::value::{MappedRow, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub use crate::pool::driver::ExecResult;

/// Arguments carried by an invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Args {
    /// No parameters.
    None,
    /// Bound by declaration order.
    Positional(Vec<Value>),
    /// Bound by parameter name.
    Named(HashMap<String, Value>),
    /// One positional row per batch entry.
    Batch(Vec<Vec<Value>>),
}

impl From<Vec<Value>> for Args {
    fn from(values: Vec<Value>) -> Self {
        if values.is_empty() {
            Args::None
        } else {
            Args::Positional(values)
        }
    }
}

/// A mapper-method call. The statement id is `mapper.method`.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub mapper: String,
    pub method: String,
    pub args: Args,
}

impl Invocation {
    pub fn new(mapper: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            mapper: mapper.into(),
            method: method.into(),
            args: Args::None,
        }
    }

    pub fn positional(
        mapper: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            args: Args::Positional(args),
            ..Self::new(mapper, method)
        }
    }

    pub fn named(
        mapper: impl Into<String>,
        method: impl Into<String>,
        args: HashMap<String, Value>,
    ) -> Self {
        Self {
            args: Args::Named(args),
            ..Self::new(mapper, method)
        }
    }

    pub fn batch(
        mapper: impl Into<String>,
        method: impl Into<String>,
        rows: Vec<Vec<Value>>,
    ) -> Self {
        Self {
            args: Args::Batch(rows),
            ..Self::new(mapper, method)
        }
    }

    pub fn statement_id(&self) -> String {
        format!("{}.{}", self.mapper, self.method)
    }
}

/// Outcome of one dispatched statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Executed {
    Rows(Vec<MappedRow>),
    Affected(ExecResult),
}

/// Stateless execution core shared by every session.
pub struct MapperDispatcher {
    registry: StatementRegistry,
    handlers: TypeHandlerRegistry,
    chain: InterceptorChain,
    default_timeout: Duration,
    default_fetch_limit: Option<u32>,
}

impl MapperDispatcher {
    pub fn new(registry: StatementRegistry) -> Self {
        Self {
            registry,
            handlers: TypeHandlerRegistry::new(),
            chain: InterceptorChain::new(),
            default_timeout: Duration::from_secs(30),
            default_fetch_limit: None,
        }
    }

    pub fn with_handlers(mut self, handlers: TypeHandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn with_chain(mut self, chain: InterceptorChain) -> Self {
        self.chain = chain;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_default_fetch_limit(mut self, limit: u32) -> Self {
        self.default_fetch_limit = Some(limit);
        self
    }

    pub fn registry(&self) -> &StatementRegistry {
        &self.registry
    }

    /// Execute one invocation on the given connection.
    pub async fn dispatch(
        &self,
        conn: &mut PooledConnection,
        invocation: &Invocation,
    ) -> MapResult<Executed> {
        self.dispatch_scoped(conn, invocation, false).await
    }

    /// Execute one invocation on a connection that may already hold an open
    /// transaction. With `in_transaction` set, the row-by-row batch fallback
    /// brackets its rows with a savepoint instead of BEGIN/COMMIT, so the
    /// caller's transaction stays open and untouched.
    pub async fn dispatch_scoped(
        &self,
        conn: &mut PooledConnection,
        invocation: &Invocation,
        in_transaction: bool,
    ) -> MapResult<Executed> {
        let statement_id = invocation.statement_id();
        let stmt = self.registry.resolve(&statement_id)?;

        match stmt.kind {
            StatementKind::Query | StatementKind::Update => {
                let params = self.bind_single(&stmt, &statement_id, &invocation.args)?;
                self.execute_single(conn, &stmt, &statement_id, params).await
            }
            StatementKind::Batch => {
                let rows = self.bind_batch(&stmt, &statement_id, &invocation.args)?;
                self.execute_batch(conn, &stmt, &statement_id, rows, in_transaction)
                    .await
            }
        }
    }

    async fn execute_single(
        &self,
        conn: &mut PooledConnection,
        stmt: &Arc<StatementDefinition>,
        statement_id: &str,
        params: Vec<Value>,
    ) -> MapResult<Executed> {
        let kind = match stmt.kind {
            StatementKind::Query => OperationKind::Query,
            _ => OperationKind::Update,
        };
        let expanded;
        let sql: &str = if stmt.parameters.first().is_some_and(|p| p.expand) {
            expanded = expand_in_list(
                &stmt.sql,
                params.len(),
                conn.kind().uses_dollar_placeholders(),
            )
            .ok_or_else(|| {
                MapperError::config(format!(
                    "statement '{}' declares an expanding parameter but the template \
                     has no single-placeholder group",
                    statement_id
                ))
            })?;
            &expanded
        } else {
            &stmt.sql
        };
        let ctx = StatementContext {
            kind,
            statement_id,
            sql,
            param_count: params.len(),
        };
        let timeout = self.statement_timeout(stmt);
        let limit = stmt.fetch_limit.or(self.default_fetch_limit);

        let executed = self
            .chain
            .execute(&ctx, || async move {
                match kind {
                    OperationKind::Query => {
                        let rows = conn.fetch_rows(sql, &params, limit, timeout).await?;
                        Ok(Executed::Rows(rows))
                    }
                    _ => {
                        let result = conn.execute(sql, &params, timeout).await?;
                        Ok(Executed::Affected(result))
                    }
                }
            })
            .await?;

        match executed {
            Executed::Rows(rows) => {
                let shaped = self.shape_rows(stmt, statement_id, rows)?;
                Ok(Executed::Rows(shaped))
            }
            affected => Ok(affected),
        }
    }

    async fn execute_batch(
        &self,
        conn: &mut PooledConnection,
        stmt: &Arc<StatementDefinition>,
        statement_id: &str,
        rows: Vec<Vec<Value>>,
        in_transaction: bool,
    ) -> MapResult<Executed> {
        let per_row = stmt.parameters.len();
        let ctx = StatementContext {
            kind: OperationKind::Batch,
            statement_id,
            sql: &stmt.sql,
            param_count: rows.len() * per_row,
        };
        let timeout = self.statement_timeout(stmt);
        let dollar_style = conn.kind().uses_dollar_placeholders();

        self.chain
            .execute(&ctx, || async move {
                if rows.is_empty() {
                    return Ok(Executed::Affected(ExecResult {
                        rows_affected: 0,
                        last_insert_id: None,
                    }));
                }
                if let Some(expanded) =
                    expand_batch_sql(&stmt.sql, per_row, rows.len(), dollar_style)
                {
                    let flat: Vec<Value> = rows.into_iter().flatten().collect();
                    let result = conn.execute(&expanded, &flat, timeout).await?;
                    return Ok(Executed::Affected(result));
                }
                // Template is not a single VALUES tuple; run one execute per
                // row, atomically. Inside an already-open transaction a
                // savepoint scopes the rows; a nested BEGIN would fail on
                // SQLite and implicitly commit on MySQL.
                let (open, commit, abort) = if in_transaction {
                    (
                        "SAVEPOINT batch_rows",
                        "RELEASE SAVEPOINT batch_rows",
                        "ROLLBACK TO SAVEPOINT batch_rows",
                    )
                } else {
                    ("BEGIN", "COMMIT", "ROLLBACK")
                };
                conn.execute_raw(open, timeout).await?;
                let mut total = 0u64;
                let mut last_insert_id = None;
                for row in rows {
                    match conn.execute(&stmt.sql, &row, timeout).await {
                        Ok(result) => {
                            total += result.rows_affected;
                            last_insert_id = result.last_insert_id.or(last_insert_id);
                        }
                        Err(err) => {
                            let _ = conn.execute_raw(abort, timeout).await;
                            if in_transaction {
                                // Rolling back to the savepoint keeps it
                                // defined; drop it as well.
                                let _ = conn
                                    .execute_raw("RELEASE SAVEPOINT batch_rows", timeout)
                                    .await;
                            }
                            return Err(err);
                        }
                    }
                }
                conn.execute_raw(commit, timeout).await?;
                Ok(Executed::Affected(ExecResult {
                    rows_affected: total,
                    last_insert_id,
                }))
            })
            .await
    }

    fn statement_timeout(&self, stmt: &StatementDefinition) -> Duration {
        stmt.timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout)
    }

    /// Bind arguments for a query or update.
    fn bind_single(
        &self,
        stmt: &StatementDefinition,
        statement_id: &str,
        args: &Args,
    ) -> MapResult<Vec<Value>> {
        if let [spec] = stmt.parameters.as_slice() {
            if spec.expand {
                return self.bind_expanding(statement_id, spec, args);
            }
        }
        let values = match args {
            Args::None => Vec::new(),
            Args::Positional(values) => values.clone(),
            Args::Named(map) => self.order_named(stmt, statement_id, map)?,
            Args::Batch(_) => {
                return Err(MapperError::parameter_mismatch(
                    statement_id,
                    "batch arguments require a batch statement",
                ));
            }
        };
        self.check_and_encode(stmt, statement_id, values)
    }

    /// Bind a variable-length argument list against a single expanding
    /// parameter; every value is checked against the one spec.
    fn bind_expanding(
        &self,
        statement_id: &str,
        spec: &ParameterSpec,
        args: &Args,
    ) -> MapResult<Vec<Value>> {
        let values = match args {
            Args::Positional(values) if !values.is_empty() => values.clone(),
            Args::Positional(_) | Args::None => {
                return Err(MapperError::parameter_mismatch(
                    statement_id,
                    format!("expanding parameter '{}' requires at least one value", spec.name),
                ));
            }
            Args::Named(_) => {
                return Err(MapperError::parameter_mismatch(
                    statement_id,
                    format!("expanding parameter '{}' takes positional arguments", spec.name),
                ));
            }
            Args::Batch(_) => {
                return Err(MapperError::parameter_mismatch(
                    statement_id,
                    "batch arguments require a batch statement",
                ));
            }
        };
        values
            .into_iter()
            .map(|value| self.encode_param(statement_id, spec, value))
            .collect()
    }

    /// Bind every batch row, each checked against the parameter spec.
    fn bind_batch(
        &self,
        stmt: &StatementDefinition,
        statement_id: &str,
        args: &Args,
    ) -> MapResult<Vec<Vec<Value>>> {
        let rows = match args {
            Args::Batch(rows) => rows,
            _ => {
                return Err(MapperError::parameter_mismatch(
                    statement_id,
                    "batch statement requires batch arguments",
                ));
            }
        };
        rows.iter()
            .map(|row| self.check_and_encode(stmt, statement_id, row.clone()))
            .collect()
    }

    fn order_named(
        &self,
        stmt: &StatementDefinition,
        statement_id: &str,
        map: &HashMap<String, Value>,
    ) -> MapResult<Vec<Value>> {
        for name in map.keys() {
            if !stmt.parameters.iter().any(|p| &p.name == name) {
                return Err(MapperError::parameter_mismatch(
                    statement_id,
                    format!("unknown parameter '{}'", name),
                ));
            }
        }
        stmt.parameters
            .iter()
            .map(|spec| {
                map.get(&spec.name).cloned().ok_or_else(|| {
                    MapperError::parameter_mismatch(
                        statement_id,
                        format!("missing parameter '{}'", spec.name),
                    )
                })
            })
            .collect()
    }

    /// Type-check each value against its spec and run encode-side handlers.
    fn check_and_encode(
        &self,
        stmt: &StatementDefinition,
        statement_id: &str,
        values: Vec<Value>,
    ) -> MapResult<Vec<Value>> {
        if values.len() != stmt.parameters.len() {
            return Err(MapperError::parameter_mismatch(
                statement_id,
                format!(
                    "expected {} arguments, got {}",
                    stmt.parameters.len(),
                    values.len()
                ),
            ));
        }
        values
            .into_iter()
            .zip(&stmt.parameters)
            .map(|(value, spec)| self.encode_param(statement_id, spec, value))
            .collect()
    }

    fn encode_param(
        &self,
        statement_id: &str,
        spec: &ParameterSpec,
        value: Value,
    ) -> MapResult<Value> {
        let value = value.coerce(spec.value_type).map_err(|msg| {
            MapperError::parameter_mismatch(
                statement_id,
                format!("parameter '{}': {}", spec.name, msg),
            )
        })?;
        match &spec.handler {
            Some(name) => self.handlers.resolve(name)?.encode(&value),
            None => Ok(value),
        }
    }

    /// Apply the declared result shape to a query's raw rows.
    fn shape_rows(
        &self,
        stmt: &StatementDefinition,
        statement_id: &str,
        rows: Vec<MappedRow>,
    ) -> MapResult<Vec<MappedRow>> {
        match &stmt.result {
            ResultShape::None => Ok(rows),
            ResultShape::Scalar(value_type) => rows
                .into_iter()
                .map(|row| {
                    let raw = row.first().cloned().unwrap_or(Value::Null);
                    let value = raw.coerce(*value_type).map_err(|msg| {
                        MapperError::result_mapping(statement_id, msg)
                    })?;
                    let mut out = MappedRow::new();
                    out.insert("value", value);
                    Ok(out)
                })
                .collect(),
            ResultShape::Object(bindings) if bindings.is_empty() => Ok(rows),
            ResultShape::Object(bindings) => rows
                .into_iter()
                .map(|row| {
                    let mut out = MappedRow::new();
                    for binding in bindings {
                        let raw = row.get(&binding.column).cloned().unwrap_or(Value::Null);
                        let decoded = match &binding.handler {
                            Some(name) => self.handlers.resolve(name)?.decode(&raw)?,
                            None => raw,
                        };
                        let value = decoded.coerce(binding.value_type).map_err(|msg| {
                            MapperError::result_mapping(
                                statement_id,
                                format!("column '{}': {}", binding.column, msg),
                            )
                        })?;
                        out.insert(binding.field.clone(), value);
                    }
                    Ok(out)
                })
                .collect(),
        }
    }
}

impl std::fmt::Debug for MapperDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapperDispatcher")
            .field("statements", &self.registry.len())
            .field("interceptors", &self.chain.len())
            .finish()
    }
}

/// Rewrite a single-tuple INSERT template into an N-tuple one.
///
/// Succeeds only when the template's sole parenthesized placeholder group
/// holds every placeholder, e.g. `INSERT INTO t (a, b) VALUES (?, ?)`.
/// Returns `None` otherwise so the caller can fall back to per-row
/// execution.
pub(crate) fn expand_batch_sql(
    sql: &str,
    per_row: usize,
    row_count: usize,
    dollar_style: bool,
) -> Option<String> {
    if per_row == 0 || row_count == 0 {
        return None;
    }
    let (start, end) = find_placeholder_tuple(sql, per_row)?;
    let mut tuples = Vec::with_capacity(row_count);
    for row in 0..row_count {
        let tuple: Vec<String> = (0..per_row)
            .map(|i| {
                if dollar_style {
                    format!("${}", row * per_row + i + 1)
                } else {
                    "?".to_string()
                }
            })
            .collect();
        tuples.push(format!("({})", tuple.join(", ")));
    }
    let mut out = String::with_capacity(sql.len() + tuples.len() * per_row * 4);
    out.push_str(&sql[..start]);
    out.push_str(&tuples.join(", "));
    out.push_str(&sql[end..]);
    Some(out)
}

/// Expand a single-placeholder group into an n-ary IN list.
///
/// `WHERE id IN (?)` with three values becomes `WHERE id IN (?, ?, ?)`;
/// dollar-style templates are renumbered `$1..$n`. Returns `None` when the
/// template has no lone-placeholder group to expand.
pub(crate) fn expand_in_list(sql: &str, count: usize, dollar_style: bool) -> Option<String> {
    if count == 0 {
        return None;
    }
    let (start, end) = find_placeholder_tuple(sql, 1)?;
    let marks: Vec<String> = (0..count)
        .map(|i| {
            if dollar_style {
                format!("${}", i + 1)
            } else {
                "?".to_string()
            }
        })
        .collect();
    let mut out = String::with_capacity(sql.len() + count * 4);
    out.push_str(&sql[..start]);
    out.push('(');
    out.push_str(&marks.join(", "));
    out.push(')');
    out.push_str(&sql[end..]);
    Some(out)
}

/// Locate the byte range of the one parenthesized group that contains all
/// `per_row` placeholders and nothing but placeholders, commas, and
/// whitespace.
fn find_placeholder_tuple(sql: &str, per_row: usize) -> Option<(usize, usize)> {
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'(' {
            if let Some(close) = sql[i..].find(')').map(|off| i + off) {
                let inner = &sql[i + 1..close];
                if tuple_placeholder_count(inner) == Some(per_row) {
                    // The rest of the template must not hold more markers.
                    let outside = format!("{}{}", &sql[..i], &sql[close + 1..]);
                    if crate::statement::count_placeholders(&outside) == 0 {
                        return Some((i, close + 1));
                    }
                }
            }
        }
        i += 1;
    }
    None
}

/// Count placeholders in a candidate tuple body; `None` when the body holds
/// anything besides placeholders, commas, and whitespace, when the two
/// placeholder styles are mixed, or when dollar indices are out of order.
/// Expansion renumbers positionally, so `($2, $1)` must not match; it would
/// silently swap the bind order.
fn tuple_placeholder_count(inner: &str) -> Option<usize> {
    let mut count = 0usize;
    let mut questions = false;
    let mut dollars = false;
    for part in inner.split(',') {
        let part = part.trim();
        if part == "?" {
            questions = true;
            count += 1;
        } else if let Some(rest) = part.strip_prefix('$') {
            let n: usize = rest.parse().ok()?;
            if n != count + 1 {
                return None;
            }
            dollars = true;
            count += 1;
        } else {
            return None;
        }
    }
    if questions && dollars {
        return None;
    }
    Some(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statement::RegistryBuilder;
    use crate::value::ValueType;

    fn dispatcher_with(defs: Vec<StatementDefinition>) -> MapperDispatcher {
        let mut builder = RegistryBuilder::new();
        for def in defs {
            builder.register(def).unwrap();
        }
        MapperDispatcher::new(builder.build())
    }

    fn insert_blog() -> StatementDefinition {
        StatementDefinition::update("Blog.insertBlog", "INSERT INTO blog (title) VALUES (?)")
            .with_parameter(crate::statement::ParameterSpec::new(
                "title",
                ValueType::Text,
            ))
    }

    #[test]
    fn test_statement_id_format() {
        let inv = Invocation::positional("Blog", "selectById", vec![Value::Int(1)]);
        assert_eq!(inv.statement_id(), "Blog.selectById");
    }

    #[test]
    fn test_positional_count_mismatch() {
        let d = dispatcher_with(vec![insert_blog()]);
        let stmt = d.registry.resolve("Blog.insertBlog").unwrap();
        let err = d
            .bind_single(&stmt, "Blog.insertBlog", &Args::Positional(vec![]))
            .unwrap_err();
        assert!(matches!(err, MapperError::ParameterMismatch { .. }));
    }

    #[test]
    fn test_positional_type_check_coerces() {
        let d = dispatcher_with(vec![
            StatementDefinition::update("Blog.touch", "UPDATE blog SET views = ? WHERE id = ?")
                .with_parameter(crate::statement::ParameterSpec::new(
                    "views",
                    ValueType::Float,
                ))
                .with_parameter(crate::statement::ParameterSpec::new("id", ValueType::Int)),
        ]);
        let stmt = d.registry.resolve("Blog.touch").unwrap();
        let bound = d
            .bind_single(
                &stmt,
                "Blog.touch",
                &Args::Positional(vec![Value::Int(3), Value::Int(7)]),
            )
            .unwrap();
        assert_eq!(bound, vec![Value::Float(3.0), Value::Int(7)]);
    }

    #[test]
    fn test_named_binding_orders_by_spec() {
        let d = dispatcher_with(vec![
            StatementDefinition::update("Blog.rename", "UPDATE blog SET title = ? WHERE id = ?")
                .with_parameter(crate::statement::ParameterSpec::new(
                    "title",
                    ValueType::Text,
                ))
                .with_parameter(crate::statement::ParameterSpec::new("id", ValueType::Int)),
        ]);
        let stmt = d.registry.resolve("Blog.rename").unwrap();
        let mut map = HashMap::new();
        map.insert("id".to_string(), Value::Int(9));
        map.insert("title".to_string(), Value::from("new"));
        let bound = d
            .bind_single(&stmt, "Blog.rename", &Args::Named(map))
            .unwrap();
        assert_eq!(bound, vec![Value::from("new"), Value::Int(9)]);
    }

    #[test]
    fn test_named_binding_rejects_unknown_and_missing() {
        let d = dispatcher_with(vec![insert_blog()]);
        let stmt = d.registry.resolve("Blog.insertBlog").unwrap();

        let mut extra = HashMap::new();
        extra.insert("title".to_string(), Value::from("t"));
        extra.insert("bogus".to_string(), Value::Int(1));
        assert!(matches!(
            d.bind_single(&stmt, "Blog.insertBlog", &Args::Named(extra)),
            Err(MapperError::ParameterMismatch { .. })
        ));

        let empty = HashMap::new();
        assert!(matches!(
            d.bind_single(&stmt, "Blog.insertBlog", &Args::Named(empty)),
            Err(MapperError::ParameterMismatch { .. })
        ));
    }

    #[test]
    fn test_null_always_binds() {
        let d = dispatcher_with(vec![insert_blog()]);
        let stmt = d.registry.resolve("Blog.insertBlog").unwrap();
        let bound = d
            .bind_single(
                &stmt,
                "Blog.insertBlog",
                &Args::Positional(vec![Value::Null]),
            )
            .unwrap();
        assert_eq!(bound, vec![Value::Null]);
    }

    #[test]
    fn test_batch_args_require_batch_statement() {
        let d = dispatcher_with(vec![insert_blog()]);
        let stmt = d.registry.resolve("Blog.insertBlog").unwrap();
        assert!(matches!(
            d.bind_single(&stmt, "Blog.insertBlog", &Args::Batch(vec![])),
            Err(MapperError::ParameterMismatch { .. })
        ));
    }

    #[test]
    fn test_expand_batch_sql_question_marks() {
        let expanded = expand_batch_sql(
            "INSERT INTO blog (title, author) VALUES (?, ?)",
            2,
            3,
            false,
        )
        .unwrap();
        assert_eq!(
            expanded,
            "INSERT INTO blog (title, author) VALUES (?, ?), (?, ?), (?, ?)"
        );
    }

    #[test]
    fn test_expand_batch_sql_dollar_style_renumbers() {
        let expanded = expand_batch_sql(
            "INSERT INTO blog (title, author) VALUES ($1, $2)",
            2,
            2,
            true,
        )
        .unwrap();
        assert_eq!(
            expanded,
            "INSERT INTO blog (title, author) VALUES ($1, $2), ($3, $4)"
        );
    }

    #[test]
    fn test_expand_batch_sql_rejects_scattered_placeholders() {
        assert!(expand_batch_sql("UPDATE blog SET title = ? WHERE id = ?", 2, 3, false).is_none());
    }

    #[test]
    fn test_expand_batch_sql_skips_column_list() {
        // The column list group holds no placeholders; the VALUES group is
        // the one that expands.
        let expanded =
            expand_batch_sql("INSERT INTO blog (title) VALUES (?)", 1, 2, false).unwrap();
        assert_eq!(expanded, "INSERT INTO blog (title) VALUES (?), (?)");
    }

    #[test]
    fn test_expand_batch_sql_rejects_out_of_order_dollar_tuple() {
        // Renumbering would swap the binds; the template must fall back to
        // per-row execution instead.
        assert!(
            expand_batch_sql("INSERT INTO t (a, b) VALUES ($2, $1)", 2, 3, true).is_none()
        );
    }

    #[test]
    fn test_expand_batch_sql_rejects_mixed_placeholder_styles() {
        assert!(
            expand_batch_sql("INSERT INTO t (a, b) VALUES (?, $2)", 2, 2, false).is_none()
        );
    }

    #[test]
    fn test_expand_in_list_question_marks() {
        let expanded =
            expand_in_list("SELECT * FROM blog WHERE id IN (?) ORDER BY id", 3, false).unwrap();
        assert_eq!(
            expanded,
            "SELECT * FROM blog WHERE id IN (?, ?, ?) ORDER BY id"
        );
    }

    #[test]
    fn test_expand_in_list_dollar_style() {
        let expanded = expand_in_list("DELETE FROM blog WHERE id IN ($1)", 2, true).unwrap();
        assert_eq!(expanded, "DELETE FROM blog WHERE id IN ($1, $2)");
    }

    #[test]
    fn test_expand_in_list_requires_lone_placeholder_group() {
        assert!(expand_in_list("SELECT * FROM blog WHERE id = ?", 2, false).is_none());
        assert!(expand_in_list("SELECT * FROM blog WHERE id IN (?)", 0, false).is_none());
    }

    #[test]
    fn test_expanding_parameter_binds_any_length() {
        let d = dispatcher_with(vec![
            StatementDefinition::query("Blog.selectByIds", "SELECT * FROM blog WHERE id IN (?)")
                .with_parameter(crate::statement::ParameterSpec::list("ids", ValueType::Int)),
        ]);
        let stmt = d.registry.resolve("Blog.selectByIds").unwrap();
        let bound = d
            .bind_single(
                &stmt,
                "Blog.selectByIds",
                &Args::Positional(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
            )
            .unwrap();
        assert_eq!(bound, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);

        // Every element is still type-checked against the one spec.
        assert!(matches!(
            d.bind_single(
                &stmt,
                "Blog.selectByIds",
                &Args::Positional(vec![Value::Int(1), Value::from("two")]),
            ),
            Err(MapperError::ParameterMismatch { .. })
        ));
    }

    #[test]
    fn test_expanding_parameter_rejects_empty_and_named() {
        let d = dispatcher_with(vec![
            StatementDefinition::query("Blog.selectByIds", "SELECT * FROM blog WHERE id IN (?)")
                .with_parameter(crate::statement::ParameterSpec::list("ids", ValueType::Int)),
        ]);
        let stmt = d.registry.resolve("Blog.selectByIds").unwrap();
        assert!(matches!(
            d.bind_single(&stmt, "Blog.selectByIds", &Args::Positional(vec![])),
            Err(MapperError::ParameterMismatch { .. })
        ));
        let mut map = HashMap::new();
        map.insert("ids".to_string(), Value::Int(1));
        assert!(matches!(
            d.bind_single(&stmt, "Blog.selectByIds", &Args::Named(map)),
            Err(MapperError::ParameterMismatch { .. })
        ));
    }

    #[test]
    fn test_scalar_shape_surfaces_value_column() {
        let d = dispatcher_with(vec![
            StatementDefinition::query("Blog.count", "SELECT COUNT(*) FROM blog")
                .with_result(ResultShape::Scalar(ValueType::Int)),
        ]);
        let stmt = d.registry.resolve("Blog.count").unwrap();
        let mut row = MappedRow::new();
        row.insert("COUNT(*)", Value::Int(5));
        let shaped = d.shape_rows(&stmt, "Blog.count", vec![row]).unwrap();
        assert_eq!(shaped[0].get("value"), Some(&Value::Int(5)));
    }

    #[test]
    fn test_object_shape_renames_and_nulls_missing() {
        let d = dispatcher_with(vec![
            StatementDefinition::query("Blog.selectAll", "SELECT * FROM blog").with_result(
                ResultShape::Object(vec![
                    crate::statement::FieldBinding::new("blog_title", "title", ValueType::Text),
                    crate::statement::FieldBinding::new("missing_col", "extra", ValueType::Text),
                ]),
            ),
        ]);
        let stmt = d.registry.resolve("Blog.selectAll").unwrap();
        let mut row = MappedRow::new();
        row.insert("blog_title", Value::from("hello"));
        let shaped = d.shape_rows(&stmt, "Blog.selectAll", vec![row]).unwrap();
        assert_eq!(shaped[0].get("title"), Some(&Value::from("hello")));
        assert_eq!(shaped[0].get("extra"), Some(&Value::Null));
        assert!(shaped[0].get("blog_title").is_none());
    }
}
