//! Integration tests for dispatch: binding, interceptors, type handlers,
//! batches, and result shaping against temp-file SQLite.

use sqlmapper::statement::{FieldBinding, ParameterSpec};
use sqlmapper::value::ValueType;
use sqlmapper::{
    Executed, Interceptor, Invocation, MapResult, MappedRow, MapperError, PoolConfig,
    PoolStrategy, ResultShape, SessionFactory, StatementContext, StatementDefinition, TypeHandler,
    Value, params,
};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;

/// Create a SQLite database file that outlives the test.
fn temp_db_url() -> String {
    let temp_file = NamedTempFile::new().unwrap();
    // Keep the temp file alive - prevent deletion when function returns
    let db_path = temp_file
        .into_temp_path()
        .keep()
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    format!("sqlite:{}", db_path)
}

fn base_builder() -> sqlmapper::SessionFactoryBuilder {
    SessionFactory::builder()
        .pool(PoolConfig::new(PoolStrategy::Fixed, temp_db_url()))
        .statement(StatementDefinition::update(
            "Blog.createTable",
            "CREATE TABLE blog (id INTEGER PRIMARY KEY AUTOINCREMENT, \
             title TEXT NOT NULL, author TEXT)",
        ))
        .statement(
            StatementDefinition::update(
                "Blog.insertBlog",
                "INSERT INTO blog (title, author) VALUES (?, ?)",
            )
            .with_parameter(ParameterSpec::new("title", ValueType::Text))
            .with_parameter(ParameterSpec::new("author", ValueType::Text)),
        )
        .statement(StatementDefinition::query(
            "Blog.selectAll",
            "SELECT id, title, author FROM blog ORDER BY id",
        ))
        .statement(
            StatementDefinition::query("Blog.count", "SELECT COUNT(*) FROM blog")
                .with_result(ResultShape::Scalar(ValueType::Int)),
        )
}

async fn create_table(factory: &SessionFactory) {
    let mut session = factory.open_session().await.unwrap();
    session
        .update(&Invocation::new("Blog", "createTable"))
        .await
        .unwrap();
    session.close().await;
}

#[tokio::test]
async fn test_unknown_statement() {
    let factory = base_builder().build().await.unwrap();
    let mut session = factory.open_session().await.unwrap();

    let err = session
        .dispatch(&Invocation::new("Blog", "noSuchMethod"))
        .await
        .unwrap_err();
    assert!(
        matches!(&err, MapperError::UnknownStatement { id } if id == "Blog.noSuchMethod"),
        "got {:?}",
        err
    );
    session.close().await;
}

#[tokio::test]
async fn test_parameter_mismatch_is_rejected_before_execution() {
    let factory = base_builder().build().await.unwrap();
    create_table(&factory).await;
    let mut session = factory.open_session().await.unwrap();

    let err = session
        .insert(&Invocation::positional(
            "Blog",
            "insertBlog",
            params!["only one"],
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, MapperError::ParameterMismatch { .. }));

    // A type the parameter declaration cannot accept is also a binding
    // failure.
    let err = session
        .insert(&Invocation::positional(
            "Blog",
            "insertBlog",
            vec![Value::Blob(vec![1, 2]), Value::from("x")],
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, MapperError::ParameterMismatch { .. }));

    session.close().await;
}

struct Recorder {
    label: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl Interceptor for Recorder {
    fn before(&self, ctx: &StatementContext<'_>) {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}.before:{}", self.label, ctx.statement_id));
    }

    fn after(&self, ctx: &StatementContext<'_>, outcome: Result<&Executed, &MapperError>) {
        let state = if outcome.is_ok() { "ok" } else { "err" };
        self.log
            .lock()
            .unwrap()
            .push(format!("{}.after:{}:{}", self.label, ctx.statement_id, state));
    }
}

#[tokio::test]
async fn test_interceptors_nest_around_real_execution() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let factory = base_builder()
        .interceptor(Arc::new(Recorder {
            label: "outer",
            log: Arc::clone(&log),
        }))
        .interceptor(Arc::new(Recorder {
            label: "inner",
            log: Arc::clone(&log),
        }))
        .build()
        .await
        .unwrap();
    create_table(&factory).await;
    log.lock().unwrap().clear();

    let mut session = factory.open_session().await.unwrap();
    session
        .select_scalar::<i64>(&Invocation::new("Blog", "count"))
        .await
        .unwrap();
    session.close().await;

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "outer.before:Blog.count",
            "inner.before:Blog.count",
            "inner.after:Blog.count:ok",
            "outer.after:Blog.count:ok",
        ]
    );
}

#[tokio::test]
async fn test_interceptor_observes_failure() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let factory = base_builder()
        .interceptor(Arc::new(Recorder {
            label: "watch",
            log: Arc::clone(&log),
        }))
        .build()
        .await
        .unwrap();
    create_table(&factory).await;
    let mut session = factory.open_session().await.unwrap();

    // NOT NULL violation surfaces through the chain as a failure.
    let err = session
        .insert(&Invocation::positional(
            "Blog",
            "insertBlog",
            vec![Value::Null, Value::from("x")],
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, MapperError::Statement { .. }));
    session.close().await;

    assert!(
        log.lock()
            .unwrap()
            .contains(&"watch.after:Blog.insertBlog:err".to_string())
    );
}

struct CsvHandler;

impl TypeHandler for CsvHandler {
    fn encode(&self, value: &Value) -> MapResult<Value> {
        match value {
            Value::Text(s) => Ok(Value::Text(s.to_uppercase())),
            other => Ok(other.clone()),
        }
    }

    fn decode(&self, value: &Value) -> MapResult<Value> {
        match value {
            Value::Text(s) => Ok(Value::Text(s.to_lowercase())),
            other => Ok(other.clone()),
        }
    }
}

#[tokio::test]
async fn test_encode_handler_transforms_parameter() {
    let factory = SessionFactory::builder()
        .pool(PoolConfig::new(PoolStrategy::Fixed, temp_db_url()))
        .type_handler("shout", Arc::new(CsvHandler))
        .statement(StatementDefinition::update(
            "Blog.createTable",
            "CREATE TABLE blog (id INTEGER PRIMARY KEY AUTOINCREMENT, title TEXT NOT NULL)",
        ))
        .statement(
            StatementDefinition::update("Blog.insertBlog", "INSERT INTO blog (title) VALUES (?)")
                .with_parameter(
                    ParameterSpec::new("title", ValueType::Text).with_handler("shout"),
                ),
        )
        .statement(StatementDefinition::query(
            "Blog.selectAll",
            "SELECT id, title FROM blog",
        ))
        .build()
        .await
        .unwrap();
    create_table(&factory).await;
    let mut session = factory.open_session().await.unwrap();

    session
        .insert(&Invocation::positional(
            "Blog",
            "insertBlog",
            params!["quiet"],
        ))
        .await
        .unwrap();

    let rows: Vec<MappedRow> = session
        .select_list(&Invocation::new("Blog", "selectAll"))
        .await
        .unwrap();
    assert_eq!(rows[0].get("title"), Some(&Value::from("QUIET")));
    session.close().await;
}

#[tokio::test]
async fn test_decode_handler_and_field_renaming() {
    let factory = SessionFactory::builder()
        .pool(PoolConfig::new(PoolStrategy::Fixed, temp_db_url()))
        .type_handler("quiet", Arc::new(CsvHandler))
        .statement(StatementDefinition::update(
            "Blog.createTable",
            "CREATE TABLE blog (id INTEGER PRIMARY KEY AUTOINCREMENT, title TEXT NOT NULL)",
        ))
        .statement(
            StatementDefinition::update("Blog.insertBlog", "INSERT INTO blog (title) VALUES (?)")
                .with_parameter(ParameterSpec::new("title", ValueType::Text)),
        )
        .statement(
            StatementDefinition::query("Blog.selectAll", "SELECT id, title FROM blog")
                .with_result(ResultShape::Object(vec![
                    FieldBinding::new("id", "blogId", ValueType::Int),
                    FieldBinding::new("title", "heading", ValueType::Text).with_handler("quiet"),
                ])),
        )
        .build()
        .await
        .unwrap();
    create_table(&factory).await;
    let mut session = factory.open_session().await.unwrap();

    session
        .insert(&Invocation::positional(
            "Blog",
            "insertBlog",
            params!["LOUD"],
        ))
        .await
        .unwrap();

    let rows: Vec<MappedRow> = session
        .select_list(&Invocation::new("Blog", "selectAll"))
        .await
        .unwrap();
    assert_eq!(rows[0].get("heading"), Some(&Value::from("loud")));
    assert_eq!(rows[0].get("blogId"), Some(&Value::Int(1)));
    assert!(rows[0].get("title").is_none(), "columns are renamed");
    session.close().await;
}

#[tokio::test]
async fn test_batch_insert_expands_to_one_statement() {
    let factory = base_builder()
        .statement(
            StatementDefinition::batch(
                "Blog.insertBatch",
                "INSERT INTO blog (title, author) VALUES (?, ?)",
            )
            .with_parameter(ParameterSpec::new("title", ValueType::Text))
            .with_parameter(ParameterSpec::new("author", ValueType::Text)),
        )
        .build()
        .await
        .unwrap();
    create_table(&factory).await;
    let mut session = factory.open_session().await.unwrap();

    let result = session
        .execute_batch(&Invocation::batch(
            "Blog",
            "insertBatch",
            vec![
                params!["one", "a"],
                params!["two", "b"],
                params!["three", "c"],
            ],
        ))
        .await
        .unwrap();
    assert_eq!(result.rows_affected, 3);

    assert_eq!(
        session
            .select_scalar::<i64>(&Invocation::new("Blog", "count"))
            .await
            .unwrap(),
        Some(3)
    );
    session.close().await;
}

#[tokio::test]
async fn test_empty_batch_is_a_no_op() {
    let factory = base_builder()
        .statement(
            StatementDefinition::batch(
                "Blog.insertBatch",
                "INSERT INTO blog (title, author) VALUES (?, ?)",
            )
            .with_parameter(ParameterSpec::new("title", ValueType::Text))
            .with_parameter(ParameterSpec::new("author", ValueType::Text)),
        )
        .build()
        .await
        .unwrap();
    create_table(&factory).await;
    let mut session = factory.open_session().await.unwrap();

    let result = session
        .execute_batch(&Invocation::batch("Blog", "insertBatch", vec![]))
        .await
        .unwrap();
    assert_eq!(result.rows_affected, 0);
    session.close().await;
}

#[tokio::test]
async fn test_batch_row_type_mismatch_rejected() {
    let factory = base_builder()
        .statement(
            StatementDefinition::batch(
                "Blog.insertBatch",
                "INSERT INTO blog (title, author) VALUES (?, ?)",
            )
            .with_parameter(ParameterSpec::new("title", ValueType::Text))
            .with_parameter(ParameterSpec::new("author", ValueType::Text)),
        )
        .build()
        .await
        .unwrap();
    create_table(&factory).await;
    let mut session = factory.open_session().await.unwrap();

    let err = session
        .execute_batch(&Invocation::batch(
            "Blog",
            "insertBatch",
            vec![params!["fine", "a"], vec![Value::Blob(vec![0]), Value::Null]],
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, MapperError::ParameterMismatch { .. }));

    // The failed batch bound nothing, so nothing was written.
    assert_eq!(
        session
            .select_scalar::<i64>(&Invocation::new("Blog", "count"))
            .await
            .unwrap(),
        Some(0)
    );
    session.close().await;
}

/// A batch template whose placeholders are scattered, so it cannot expand
/// into a single VALUES statement and must run row-by-row.
fn with_retitle_batch(builder: sqlmapper::SessionFactoryBuilder) -> sqlmapper::SessionFactoryBuilder {
    builder.statement(
        StatementDefinition::batch("Blog.retitle", "UPDATE blog SET title = ? WHERE id = ?")
            .with_parameter(ParameterSpec::new("title", ValueType::Text))
            .with_parameter(ParameterSpec::new("id", ValueType::Int)),
    )
}

#[tokio::test]
async fn test_batch_update_falls_back_to_per_row_execution() {
    let factory = with_retitle_batch(base_builder()).build().await.unwrap();
    create_table(&factory).await;
    let mut session = factory.open_session().await.unwrap();

    for title in ["one", "two"] {
        session
            .insert(&Invocation::positional(
                "Blog",
                "insertBlog",
                params![title, "x"],
            ))
            .await
            .unwrap();
    }

    let result = session
        .execute_batch(&Invocation::batch(
            "Blog",
            "retitle",
            vec![params!["uno", 1_i64], params!["dos", 2_i64]],
        ))
        .await
        .unwrap();
    assert_eq!(result.rows_affected, 2);

    let rows: Vec<MappedRow> = session
        .select_list(&Invocation::new("Blog", "selectAll"))
        .await
        .unwrap();
    assert_eq!(rows[0].get("title"), Some(&Value::from("uno")));
    assert_eq!(rows[1].get("title"), Some(&Value::from("dos")));
    session.close().await;
}

#[tokio::test]
async fn test_batch_update_works_inside_manual_transaction() {
    let factory = with_retitle_batch(base_builder()).build().await.unwrap();
    create_table(&factory).await;

    // The session's own transaction is already open; the per-row fallback
    // must not try to start another one.
    let mut session = factory.open_session_with(false).await.unwrap();
    session
        .insert(&Invocation::positional(
            "Blog",
            "insertBlog",
            params!["draft", "x"],
        ))
        .await
        .unwrap();
    let result = session
        .execute_batch(&Invocation::batch(
            "Blog",
            "retitle",
            vec![params!["final", 1_i64]],
        ))
        .await
        .unwrap();
    assert_eq!(result.rows_affected, 1);
    session.commit().await.unwrap();
    session.close().await;

    let mut check = factory.open_session().await.unwrap();
    let rows: Vec<MappedRow> = check
        .select_list(&Invocation::new("Blog", "selectAll"))
        .await
        .unwrap();
    assert_eq!(rows[0].get("title"), Some(&Value::from("final")));
    check.close().await;
}

#[tokio::test]
async fn test_batch_fallback_rolls_back_completed_rows_on_failure() {
    let factory = with_retitle_batch(base_builder()).build().await.unwrap();
    create_table(&factory).await;
    let mut session = factory.open_session().await.unwrap();

    for title in ["one", "two"] {
        session
            .insert(&Invocation::positional(
                "Blog",
                "insertBlog",
                params![title, "x"],
            ))
            .await
            .unwrap();
    }

    // First row succeeds, second violates NOT NULL; the whole batch must
    // come undone.
    let err = session
        .execute_batch(&Invocation::batch(
            "Blog",
            "retitle",
            vec![params!["uno", 1_i64], vec![Value::Null, Value::Int(2)]],
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, MapperError::Statement { .. }));

    let rows: Vec<MappedRow> = session
        .select_list(&Invocation::new("Blog", "selectAll"))
        .await
        .unwrap();
    assert_eq!(rows[0].get("title"), Some(&Value::from("one")));
    assert_eq!(rows[1].get("title"), Some(&Value::from("two")));
    session.close().await;
}

#[tokio::test]
async fn test_batch_fallback_failure_keeps_outer_transaction_intact() {
    let factory = with_retitle_batch(base_builder()).build().await.unwrap();
    create_table(&factory).await;

    let mut session = factory.open_session_with(false).await.unwrap();
    session
        .insert(&Invocation::positional(
            "Blog",
            "insertBlog",
            params!["keep", "x"],
        ))
        .await
        .unwrap();

    let err = session
        .execute_batch(&Invocation::batch(
            "Blog",
            "retitle",
            vec![params!["lost", 1_i64], vec![Value::Null, Value::Int(1)]],
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, MapperError::Statement { .. }));

    // The savepoint rollback undid the batch's first row but left the
    // session's earlier insert uncommitted and alive.
    session.commit().await.unwrap();
    session.close().await;

    let mut check = factory.open_session().await.unwrap();
    let rows: Vec<MappedRow> = check
        .select_list(&Invocation::new("Blog", "selectAll"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("title"), Some(&Value::from("keep")));
    check.close().await;
}

#[tokio::test]
async fn test_in_list_query_expands_per_value() {
    let factory = base_builder()
        .statement(
            StatementDefinition::query(
                "Blog.selectByIds",
                "SELECT id, title, author FROM blog WHERE id IN (?) ORDER BY id",
            )
            .with_parameter(ParameterSpec::list("ids", ValueType::Int)),
        )
        .build()
        .await
        .unwrap();
    create_table(&factory).await;
    let mut session = factory.open_session().await.unwrap();

    for title in ["one", "two", "three"] {
        session
            .insert(&Invocation::positional(
                "Blog",
                "insertBlog",
                params![title, "x"],
            ))
            .await
            .unwrap();
    }

    let rows: Vec<MappedRow> = session
        .select_list(&Invocation::positional(
            "Blog",
            "selectByIds",
            params![1_i64, 3_i64],
        ))
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("title"), Some(&Value::from("one")));
    assert_eq!(rows[1].get("title"), Some(&Value::from("three")));

    // An empty id list is a binding error, not empty SQL.
    let err = session
        .select_list::<MappedRow>(&Invocation::positional("Blog", "selectByIds", vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, MapperError::ParameterMismatch { .. }));
    session.close().await;
}

#[tokio::test]
async fn test_fetch_limit_caps_result_rows() {
    let factory = base_builder().default_fetch_limit(2).build().await.unwrap();
    create_table(&factory).await;
    let mut session = factory.open_session().await.unwrap();

    for title in ["a", "b", "c", "d"] {
        session
            .insert(&Invocation::positional(
                "Blog",
                "insertBlog",
                params![title, "x"],
            ))
            .await
            .unwrap();
    }

    let rows: Vec<MappedRow> = session
        .select_list(&Invocation::new("Blog", "selectAll"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 2, "default fetch limit should cap the result");
    session.close().await;
}

#[tokio::test]
async fn test_named_arguments_bind_by_parameter_name() {
    let factory = base_builder().build().await.unwrap();
    create_table(&factory).await;
    let mut session = factory.open_session().await.unwrap();

    let mut args = std::collections::HashMap::new();
    args.insert("author".to_string(), Value::from("alice"));
    args.insert("title".to_string(), Value::from("named"));
    session
        .insert(&Invocation::named("Blog", "insertBlog", args))
        .await
        .unwrap();

    let rows: Vec<MappedRow> = session
        .select_list(&Invocation::new("Blog", "selectAll"))
        .await
        .unwrap();
    assert_eq!(rows[0].get("title"), Some(&Value::from("named")));
    assert_eq!(rows[0].get("author"), Some(&Value::from("alice")));
    session.close().await;
}

#[tokio::test]
async fn test_duplicate_statement_fails_factory_build() {
    let result = base_builder()
        .statement(StatementDefinition::query(
            "Blog.selectAll",
            "SELECT 1 FROM blog",
        ))
        .build()
        .await;
    assert!(matches!(result, Err(MapperError::DuplicateStatement { .. })));
}
