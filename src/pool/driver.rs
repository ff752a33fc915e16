//! Physical connection handling on top of the sqlx drivers.
//!
//! The pool strategies own [`DriverConnection`]s directly; the External
//! strategy borrows connections from sqlx's own pools. Both paths execute
//! through the per-backend submodules below, which provide identical
//! functionality adapted to each database's type system. The code structure
//! is intentionally parallel to make differences obvious.

use crate::error::{MapResult, MapperError};
use crate::value::{MappedRow, Value};
use serde::{Deserialize, Serialize};
use sqlx::mysql::{MySqlConnection, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgConnection, PgTypeInfo, PgValueRef};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{Connection, Decode, Type};
use std::str::FromStr;
use std::time::Duration;

/// Database backend behind a connection URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    MySql,
    Postgres,
    Sqlite,
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MySql => write!(f, "mysql"),
            Self::Postgres => write!(f, "postgres"),
            Self::Sqlite => write!(f, "sqlite"),
        }
    }
}

impl DriverKind {
    /// Detect the backend from a connection URL scheme.
    pub fn from_url(url: &str) -> MapResult<Self> {
        if url.starts_with("mysql://") {
            Ok(Self::MySql)
        } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(Self::Postgres)
        } else if url.starts_with("sqlite:") {
            Ok(Self::Sqlite)
        } else {
            Err(MapperError::config(format!(
                "unsupported connection URL scheme: {}",
                url
            )))
        }
    }

    /// Placeholder style used by this backend's SQL templates.
    pub fn uses_dollar_placeholders(&self) -> bool {
        matches!(self, Self::Postgres)
    }
}

/// Result of an update execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// Generated key, when the backend reports one (SQLite rowid, MySQL
    /// LAST_INSERT_ID). PostgreSQL callers use RETURNING instead.
    pub last_insert_id: Option<i64>,
}

/// A live physical connection owned by a Fixed or Adaptive pool.
#[derive(Debug)]
pub enum DriverConnection {
    MySql(MySqlConnection),
    Postgres(PgConnection),
    Sqlite(SqliteConnection),
}

impl DriverConnection {
    /// Open a new physical connection. Blocking I/O; may take a while.
    pub async fn connect(url: &str) -> MapResult<Self> {
        match DriverKind::from_url(url)? {
            DriverKind::MySql => {
                let conn = MySqlConnection::connect(url).await.map_err(connect_error)?;
                Ok(Self::MySql(conn))
            }
            DriverKind::Postgres => {
                let conn = PgConnection::connect(url).await.map_err(connect_error)?;
                Ok(Self::Postgres(conn))
            }
            DriverKind::Sqlite => {
                let options = SqliteConnectOptions::from_str(url)
                    .map_err(|e| {
                        MapperError::config(format!("invalid SQLite connection URL: {}", e))
                    })?
                    .create_if_missing(true);
                let conn = SqliteConnection::connect_with(&options)
                    .await
                    .map_err(connect_error)?;
                Ok(Self::Sqlite(conn))
            }
        }
    }

    pub fn kind(&self) -> DriverKind {
        match self {
            Self::MySql(_) => DriverKind::MySql,
            Self::Postgres(_) => DriverKind::Postgres,
            Self::Sqlite(_) => DriverKind::Sqlite,
        }
    }

    /// Liveness check used by `test_before_acquire`.
    pub async fn ping(&mut self) -> MapResult<()> {
        match self {
            Self::MySql(c) => c.ping().await.map_err(MapperError::from),
            Self::Postgres(c) => c.ping().await.map_err(MapperError::from),
            Self::Sqlite(c) => c.ping().await.map_err(MapperError::from),
        }
    }

    /// Gracefully close the physical connection.
    pub async fn close(self) {
        let result = match self {
            Self::MySql(c) => c.close().await,
            Self::Postgres(c) => c.close().await,
            Self::Sqlite(c) => c.close().await,
        };
        if let Err(e) = result {
            tracing::debug!(error = %e, "error closing connection");
        }
    }
}

fn connect_error(err: sqlx::Error) -> MapperError {
    MapperError::connection(format!("failed to connect: {}", err))
}

pub(crate) fn timeout_error(operation: &str, duration: Duration) -> MapperError {
    MapperError::timeout(operation, duration.as_millis() as u64)
}

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Binary,
    Unknown,
}

/// Classify a database type name into a logical category.
fn categorize_type(type_name: &str, kind: DriverKind) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC affinity is really a float
        if kind == DriverKind::Sqlite && lower == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }
    if lower.contains("int") || lower.contains("serial") || lower.contains("tiny") {
        return TypeCategory::Integer;
    }
    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }
    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }
    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }
    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Raw DECIMAL/NUMERIC value kept as its exact string representation.
#[derive(Debug)]
struct RawDecimal(String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        use sqlx::TypeInfo;
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        use sqlx::TypeInfo;
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================

pub(crate) mod mysql {
    use super::*;
    use futures_util::StreamExt;
    use sqlx::mysql::{MySqlArguments, MySqlRow};
    use sqlx::{Column, Row, TypeInfo};
    use tokio::time::timeout;

    pub async fn fetch_rows<'c, E>(
        ex: E,
        sql: &str,
        params: &[Value],
        limit: Option<u32>,
        duration: Duration,
    ) -> MapResult<Vec<MappedRow>>
    where
        E: sqlx::Executor<'c, Database = sqlx::MySql>,
    {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_param(query, param);
        }
        let rows = match limit {
            Some(n) => {
                let stream = query.fetch(ex);
                let results = match timeout(duration, stream.take(n as usize).collect::<Vec<_>>())
                    .await
                {
                    Ok(results) => results,
                    Err(_) => return Err(timeout_error("query execution", duration)),
                };
                let mut rows = Vec::with_capacity(results.len());
                for result in results {
                    rows.push(result.map_err(MapperError::from)?);
                }
                rows
            }
            None => match timeout(duration, query.fetch_all(ex)).await {
                Ok(result) => result.map_err(MapperError::from)?,
                Err(_) => return Err(timeout_error("query execution", duration)),
            },
        };
        Ok(rows.iter().map(row_to_mapped).collect())
    }

    pub async fn execute<'c, E>(
        ex: E,
        sql: &str,
        params: &[Value],
        duration: Duration,
    ) -> MapResult<ExecResult>
    where
        E: sqlx::Executor<'c, Database = sqlx::MySql>,
    {
        // When params is empty, execute raw SQL directly so statements that
        // cannot be prepared (BEGIN, DDL) still work.
        let result = if params.is_empty() {
            timeout(duration, ex.execute(sql)).await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_param(query, param);
            }
            timeout(duration, query.execute(ex)).await
        };
        match result {
            Ok(Ok(r)) => Ok(ExecResult {
                rows_affected: r.rows_affected(),
                last_insert_id: match r.last_insert_id() {
                    0 => None,
                    id => Some(id as i64),
                },
            }),
            Ok(Err(e)) => Err(MapperError::from(e)),
            Err(_) => Err(timeout_error("update execution", duration)),
        }
    }

    pub(super) fn bind_param<'q>(
        query: sqlx::query::Query<'q, sqlx::MySql, MySqlArguments>,
        param: &'q Value,
    ) -> sqlx::query::Query<'q, sqlx::MySql, MySqlArguments> {
        match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(v) => query.bind(*v),
            Value::Int(v) => query.bind(*v),
            Value::Float(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.as_str()),
            Value::Blob(v) => query.bind(v.as_slice()),
        }
    }

    fn row_to_mapped(row: &MySqlRow) -> MappedRow {
        let mut mapped = MappedRow::new();
        for (idx, col) in row.columns().iter().enumerate() {
            let type_name = col.type_info().name();
            let category = categorize_type(type_name, DriverKind::MySql);
            mapped.insert(col.name(), decode_column(row, idx, category));
        }
        mapped
    }

    fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> Value {
        match category {
            TypeCategory::Decimal => match row.try_get::<Option<RawDecimal>, _>(idx) {
                Ok(Some(v)) => Value::Text(v.0),
                _ => Value::Null,
            },
            TypeCategory::Integer => {
                if let Ok(Some(v)) = row.try_get::<Option<i8>, _>(idx) {
                    return Value::Int(v as i64);
                }
                if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
                    return Value::Int(v as i64);
                }
                if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
                    return Value::Int(v as i64);
                }
                if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
                    return Value::Int(v);
                }
                if let Ok(Some(v)) = row.try_get::<Option<u32>, _>(idx) {
                    return Value::Int(v as i64);
                }
                row.try_get::<Option<u64>, _>(idx)
                    .ok()
                    .flatten()
                    .map(|v| Value::Int(v as i64))
                    .unwrap_or(Value::Null)
            }
            TypeCategory::Boolean => row
                .try_get::<Option<bool>, _>(idx)
                .ok()
                .flatten()
                .map(Value::Bool)
                .unwrap_or(Value::Null),
            TypeCategory::Float => {
                if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
                    return Value::Float(v as f64);
                }
                row.try_get::<Option<f64>, _>(idx)
                    .ok()
                    .flatten()
                    .map(Value::Float)
                    .unwrap_or(Value::Null)
            }
            TypeCategory::Binary => row
                .try_get::<Option<Vec<u8>>, _>(idx)
                .ok()
                .flatten()
                .map(Value::Blob)
                .unwrap_or(Value::Null),
            TypeCategory::Unknown => row
                .try_get::<Option<String>, _>(idx)
                .ok()
                .flatten()
                .map(Value::Text)
                .unwrap_or(Value::Null),
        }
    }
}

pub(crate) mod postgres {
    use super::*;
    use futures_util::StreamExt;
    use sqlx::postgres::{PgArguments, PgRow};
    use sqlx::{Column, Row, TypeInfo};
    use tokio::time::timeout;

    pub async fn fetch_rows<'c, E>(
        ex: E,
        sql: &str,
        params: &[Value],
        limit: Option<u32>,
        duration: Duration,
    ) -> MapResult<Vec<MappedRow>>
    where
        E: sqlx::Executor<'c, Database = sqlx::Postgres>,
    {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_param(query, param);
        }
        let rows = match limit {
            Some(n) => {
                let stream = query.fetch(ex);
                let results = match timeout(duration, stream.take(n as usize).collect::<Vec<_>>())
                    .await
                {
                    Ok(results) => results,
                    Err(_) => return Err(timeout_error("query execution", duration)),
                };
                let mut rows = Vec::with_capacity(results.len());
                for result in results {
                    rows.push(result.map_err(MapperError::from)?);
                }
                rows
            }
            None => match timeout(duration, query.fetch_all(ex)).await {
                Ok(result) => result.map_err(MapperError::from)?,
                Err(_) => return Err(timeout_error("query execution", duration)),
            },
        };
        Ok(rows.iter().map(row_to_mapped).collect())
    }

    pub async fn execute<'c, E>(
        ex: E,
        sql: &str,
        params: &[Value],
        duration: Duration,
    ) -> MapResult<ExecResult>
    where
        E: sqlx::Executor<'c, Database = sqlx::Postgres>,
    {
        let result = if params.is_empty() {
            timeout(duration, ex.execute(sql)).await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_param(query, param);
            }
            timeout(duration, query.execute(ex)).await
        };
        match result {
            Ok(Ok(r)) => Ok(ExecResult {
                rows_affected: r.rows_affected(),
                last_insert_id: None,
            }),
            Ok(Err(e)) => Err(MapperError::from(e)),
            Err(_) => Err(timeout_error("update execution", duration)),
        }
    }

    pub(super) fn bind_param<'q>(
        query: sqlx::query::Query<'q, sqlx::Postgres, PgArguments>,
        param: &'q Value,
    ) -> sqlx::query::Query<'q, sqlx::Postgres, PgArguments> {
        match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(v) => query.bind(*v),
            Value::Int(v) => query.bind(*v),
            Value::Float(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.as_str()),
            Value::Blob(v) => query.bind(v.as_slice()),
        }
    }

    fn row_to_mapped(row: &PgRow) -> MappedRow {
        let mut mapped = MappedRow::new();
        for (idx, col) in row.columns().iter().enumerate() {
            let type_name = col.type_info().name();
            let category = categorize_type(type_name, DriverKind::Postgres);
            mapped.insert(col.name(), decode_column(row, idx, category));
        }
        mapped
    }

    fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> Value {
        match category {
            TypeCategory::Decimal => match row.try_get::<Option<RawDecimal>, _>(idx) {
                Ok(Some(v)) => Value::Text(v.0),
                _ => Value::Null,
            },
            TypeCategory::Integer => {
                if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
                    return Value::Int(v as i64);
                }
                if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
                    return Value::Int(v as i64);
                }
                row.try_get::<Option<i64>, _>(idx)
                    .ok()
                    .flatten()
                    .map(Value::Int)
                    .unwrap_or(Value::Null)
            }
            TypeCategory::Boolean => row
                .try_get::<Option<bool>, _>(idx)
                .ok()
                .flatten()
                .map(Value::Bool)
                .unwrap_or(Value::Null),
            TypeCategory::Float => {
                if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
                    return Value::Float(v as f64);
                }
                row.try_get::<Option<f64>, _>(idx)
                    .ok()
                    .flatten()
                    .map(Value::Float)
                    .unwrap_or(Value::Null)
            }
            TypeCategory::Binary => row
                .try_get::<Option<Vec<u8>>, _>(idx)
                .ok()
                .flatten()
                .map(Value::Blob)
                .unwrap_or(Value::Null),
            TypeCategory::Unknown => row
                .try_get::<Option<String>, _>(idx)
                .ok()
                .flatten()
                .map(Value::Text)
                .unwrap_or(Value::Null),
        }
    }
}

pub(crate) mod sqlite {
    use super::*;
    use futures_util::StreamExt;
    use sqlx::sqlite::{SqliteArguments, SqliteRow};
    use sqlx::{Column, Row, TypeInfo};
    use tokio::time::timeout;

    pub async fn fetch_rows<'c, E>(
        ex: E,
        sql: &str,
        params: &[Value],
        limit: Option<u32>,
        duration: Duration,
    ) -> MapResult<Vec<MappedRow>>
    where
        E: sqlx::Executor<'c, Database = sqlx::Sqlite>,
    {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_param(query, param);
        }
        let rows = match limit {
            Some(n) => {
                let stream = query.fetch(ex);
                let results = match timeout(duration, stream.take(n as usize).collect::<Vec<_>>())
                    .await
                {
                    Ok(results) => results,
                    Err(_) => return Err(timeout_error("query execution", duration)),
                };
                let mut rows = Vec::with_capacity(results.len());
                for result in results {
                    rows.push(result.map_err(MapperError::from)?);
                }
                rows
            }
            None => match timeout(duration, query.fetch_all(ex)).await {
                Ok(result) => result.map_err(MapperError::from)?,
                Err(_) => return Err(timeout_error("query execution", duration)),
            },
        };
        Ok(rows.iter().map(row_to_mapped).collect())
    }

    pub async fn execute<'c, E>(
        ex: E,
        sql: &str,
        params: &[Value],
        duration: Duration,
    ) -> MapResult<ExecResult>
    where
        E: sqlx::Executor<'c, Database = sqlx::Sqlite>,
    {
        let result = if params.is_empty() {
            timeout(duration, ex.execute(sql)).await
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = bind_param(query, param);
            }
            timeout(duration, query.execute(ex)).await
        };
        match result {
            Ok(Ok(r)) => Ok(ExecResult {
                rows_affected: r.rows_affected(),
                last_insert_id: match r.last_insert_rowid() {
                    0 => None,
                    id => Some(id),
                },
            }),
            Ok(Err(e)) => Err(MapperError::from(e)),
            Err(_) => Err(timeout_error("update execution", duration)),
        }
    }

    pub(super) fn bind_param<'q>(
        query: sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>>,
        param: &'q Value,
    ) -> sqlx::query::Query<'q, sqlx::Sqlite, SqliteArguments<'q>> {
        match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(v) => query.bind(*v),
            Value::Int(v) => query.bind(*v),
            Value::Float(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.as_str()),
            Value::Blob(v) => query.bind(v.as_slice()),
        }
    }

    fn row_to_mapped(row: &SqliteRow) -> MappedRow {
        let mut mapped = MappedRow::new();
        for (idx, col) in row.columns().iter().enumerate() {
            let type_name = col.type_info().name();
            let category = categorize_type(type_name, DriverKind::Sqlite);
            mapped.insert(col.name(), decode_column(row, idx, category));
        }
        mapped
    }

    fn decode_column(row: &SqliteRow, idx: usize, category: TypeCategory) -> Value {
        match category {
            TypeCategory::Integer => row
                .try_get::<Option<i64>, _>(idx)
                .ok()
                .flatten()
                .map(Value::Int)
                .unwrap_or(Value::Null),
            TypeCategory::Boolean => row
                .try_get::<Option<bool>, _>(idx)
                .ok()
                .flatten()
                .map(Value::Bool)
                .unwrap_or(Value::Null),
            TypeCategory::Float | TypeCategory::Decimal => row
                .try_get::<Option<f64>, _>(idx)
                .ok()
                .flatten()
                .map(Value::Float)
                .unwrap_or(Value::Null),
            TypeCategory::Binary => row
                .try_get::<Option<Vec<u8>>, _>(idx)
                .ok()
                .flatten()
                .map(Value::Blob)
                .unwrap_or(Value::Null),
            TypeCategory::Unknown => row
                .try_get::<Option<String>, _>(idx)
                .ok()
                .flatten()
                .map(Value::Text)
                .unwrap_or(Value::Null),
        }
    }
}
