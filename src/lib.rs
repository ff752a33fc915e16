//! Declarative SQL statement mapping over sqlx.
//!
//! Statements are registered once at startup under `Interface.method` ids,
//! then invoked through [`Session`]s drawn from a [`SessionFactory`]. The
//! library binds and type-checks parameters, runs interceptors around every
//! execution, maps rows through declared result shapes, and manages
//! connections through a pluggable pool (fixed, adaptive, or the sqlx
//! driver pool). MySQL, PostgreSQL, and SQLite are supported.
//!
//! ```no_run
//! use sqlmapper::{
//!     Invocation, PoolConfig, PoolStrategy, SessionFactory, StatementDefinition,
//! };
//! use sqlmapper::statement::ParameterSpec;
//! use sqlmapper::value::{MappedRow, ValueType};
//! use sqlmapper::params;
//!
//! # async fn run() -> sqlmapper::MapResult<()> {
//! let factory = SessionFactory::builder()
//!     .pool(PoolConfig::new(PoolStrategy::Fixed, "sqlite:blog.db"))
//!     .statement(
//!         StatementDefinition::query("Blog.selectById", "SELECT * FROM blog WHERE id = ?")
//!             .with_parameter(ParameterSpec::new("id", ValueType::Int)),
//!     )
//!     .build()
//!     .await?;
//!
//! let mut session = factory.open_session().await?;
//! let blog: Option<MappedRow> = session
//!     .select_one(&Invocation::positional("Blog", "selectById", params![42i64]))
//!     .await?;
//! session.close().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod interceptor;
pub mod pool;
pub mod session;
pub mod statement;
pub mod value;

pub use config::{PoolConfig, PoolStrategy};
pub use dispatcher::{Args, ExecResult, Executed, Invocation, MapperDispatcher};
pub use error::{MapResult, MapperError};
pub use handler::{TypeHandler, TypeHandlerRegistry};
pub use interceptor::{Interceptor, InterceptorChain, LoggingInterceptor, StatementContext};
pub use pool::{ConnectionPool, PoolStatus, PooledConnection};
pub use session::{Session, SessionFactory, SessionFactoryBuilder};
pub use statement::{ResultShape, StatementDefinition, StatementKind, StatementRegistry};
pub use value::{FromMappedRow, FromValue, MappedRow, Value, ValueType};
