//! Error types for the SQL mapping layer.
//!
//! All errors are defined with `thiserror`. Configuration-time errors
//! (`DuplicateStatement`, `Config`) are fatal at startup; per-call errors
//! (`ParameterMismatch`, `ResultMapping`, `Statement`) leave the connection
//! valid; `Connection` errors cause the owning session to invalidate its
//! connection. No error is retried automatically by this crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MapperError {
    #[error("connection pool exhausted after {waited_ms}ms")]
    PoolExhausted { waited_ms: u64 },

    #[error("connection error: {message}")]
    Connection { message: String },

    #[error("unknown statement: {id}")]
    UnknownStatement { id: String },

    #[error("duplicate statement id: {id}")]
    DuplicateStatement { id: String },

    #[error("parameter mismatch for '{statement_id}': {message}")]
    ParameterMismatch {
        statement_id: String,
        message: String,
    },

    #[error("result mapping failed for '{statement_id}': {message}")]
    ResultMapping {
        statement_id: String,
        message: String,
    },

    #[error("statement failed: {message}")]
    Statement {
        message: String,
        /// Database-reported SQLSTATE or error code, when available.
        code: Option<String>,
    },

    #[error("timeout: {operation} exceeded {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("invalid configuration: {message}")]
    Config { message: String },

    #[error("session is closed")]
    SessionClosed,

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl MapperError {
    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create an unknown statement error.
    pub fn unknown_statement(id: impl Into<String>) -> Self {
        Self::UnknownStatement { id: id.into() }
    }

    /// Create a duplicate statement error.
    pub fn duplicate_statement(id: impl Into<String>) -> Self {
        Self::DuplicateStatement { id: id.into() }
    }

    /// Create a parameter mismatch error.
    pub fn parameter_mismatch(
        statement_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ParameterMismatch {
            statement_id: statement_id.into(),
            message: message.into(),
        }
    }

    /// Create a result mapping error.
    pub fn result_mapping(statement_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ResultMapping {
            statement_id: statement_id.into(),
            message: message.into(),
        }
    }

    /// Create a statement execution error.
    pub fn statement(message: impl Into<String>, code: Option<String>) -> Self {
        Self::Statement {
            message: message.into(),
            code,
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_ms,
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the caller may reasonably retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. } | Self::Timeout { .. })
    }

    /// Whether the error indicates a broken transport. Sessions invalidate
    /// their connection instead of returning it to the pool on these.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

/// Normalize sqlx errors into the mapper taxonomy.
impl From<sqlx::Error> for MapperError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => MapperError::config(msg.to_string()),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                MapperError::statement(db_err.message(), code)
            }
            sqlx::Error::PoolTimedOut => MapperError::PoolExhausted { waited_ms: 0 },
            sqlx::Error::PoolClosed => MapperError::connection("connection pool is closed"),
            sqlx::Error::Io(io_err) => MapperError::connection(format!("I/O error: {}", io_err)),
            sqlx::Error::Tls(tls_err) => {
                MapperError::connection(format!("TLS error: {}", tls_err))
            }
            sqlx::Error::Protocol(msg) => {
                MapperError::connection(format!("protocol error: {}", msg))
            }
            sqlx::Error::RowNotFound => MapperError::statement("no rows returned", None),
            sqlx::Error::ColumnNotFound(col) => {
                MapperError::internal(format!("column not found: {}", col))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => MapperError::internal(format!(
                "column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                MapperError::internal(format!("failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => {
                MapperError::internal(format!("decode error: {}", source))
            }
            sqlx::Error::WorkerCrashed => MapperError::connection("database worker crashed"),
            _ => MapperError::internal(format!("unknown database error: {}", err)),
        }
    }
}

/// Result type alias for mapper operations.
pub type MapResult<T> = Result<T, MapperError>;
