//! End-to-End Orchestration Tests
//!
//! This module drives both orchestrators against a real `SQLite` database
//! through the bundled `SqliteEngine`, with a scripted generator standing in
//! for the model. It validates:
//! - The retry controller recovers from policy and engine errors
//! - The tool loop dispatches tools against real schema text and rows
//! - The read-only connection refuses writes even without the policy
//! - A shared gateway serves concurrent requests
//! - Configuration wiring reports missing prerequisites as config errors

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sqlwarden::engine::sqlite::SqliteEngine;
use sqlwarden::{
    AskRequest, ErrorKind, Executor, Gateway, GatewaySettings, Generator, PromptContext,
    RetryController, RetryPolicy, SchemaProvider, ToolLoop, WardenConfig, WardenError,
};

// ============================================================================
// Test Helpers
// ============================================================================

/// Create a test `SQLite` database with sample data
fn create_test_sqlite_db() -> PathBuf {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let temp_file = std::env::temp_dir()
        .join(format!("sqlwarden_integration_{}_{id}.db", std::process::id()));
    let _ = std::fs::remove_file(&temp_file);

    {
        use rusqlite::Connection;
        let conn = Connection::open(&temp_file).expect("Failed to create temp database");

        conn.execute_batch(
            "CREATE TABLE users (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT
            );
            CREATE TABLE orders (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL REFERENCES users(id),
                total REAL
            );
            INSERT INTO users (name, email) VALUES ('Alice', 'alice@example.com');
            INSERT INTO users (name, email) VALUES ('Bob', 'bob@example.com');
            INSERT INTO orders (user_id, total) VALUES (1, 19.5);
            INSERT INTO orders (user_id, total) VALUES (1, 5.0);
            INSERT INTO orders (user_id, total) VALUES (2, 12.25);",
        )
        .expect("Failed to seed database");
    }

    temp_file
}

/// Replays canned responses in order
struct ScriptedGenerator {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<PromptContext>>,
}

impl ScriptedGenerator {
    fn new(responses: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.iter().map(|r| (*r).to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, ctx: &PromptContext) -> sqlwarden::Result<String> {
        self.prompts.lock().unwrap().push(ctx.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| WardenError::generation_failed("script exhausted"))
    }
}

/// Answers by prompt shape, so concurrent requests cannot steal each other's script
struct CountingGenerator;

#[async_trait]
impl Generator for CountingGenerator {
    async fn generate(&self, ctx: &PromptContext) -> sqlwarden::Result<String> {
        if ctx.user.trim_end().ends_with("SQL:") {
            Ok("SELECT COUNT(*) AS n FROM users".to_string())
        } else {
            Ok("There are 2 users.".to_string())
        }
    }
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy { max_attempts, backoff_base: Duration::from_millis(1) }
}

// ============================================================================
// Retry Controller
// ============================================================================

#[tokio::test]
async fn test_retry_recovers_from_unknown_column() {
    let db = create_test_sqlite_db();
    let engine = Arc::new(SqliteEngine::new(&db));
    let generator = ScriptedGenerator::new(&[
        "SELECT nme FROM users",
        "```sql\nSELECT name FROM users ORDER BY id\n```",
        "The users are Alice and Bob.",
    ]);

    let result = RetryController::new(generator.clone(), engine.clone(), engine, fast_retry(4))
        .run_with_retry("What are the user names?")
        .await
        .expect("schema should load");

    assert!(result.succeeded());
    assert_eq!(result.attempt_count, 2);
    assert_eq!(result.generated_query, "SELECT name FROM users ORDER BY id");
    assert_eq!(result.final_answer, "The users are Alice and Bob.");

    let rows = result.rows.expect("rows should be set");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["name"], "Alice");
    assert_eq!(rows[1]["name"], "Bob");

    assert_eq!(result.error_history.len(), 1);
    assert_eq!(result.error_history[0].kind, ErrorKind::ExecutionFailure);
    assert!(result.error_history[0].message.contains("no such column: nme"));
    assert_eq!(
        result.error_history[0].hint.as_deref(),
        Some("Check column names against the schema")
    );

    // The regeneration saw the real schema and the failure
    let prompts = generator.prompts.lock().unwrap();
    assert!(prompts[0].user.contains("Table: users"));
    assert!(prompts[0].user.contains("  -> user_id references users(id)"));
    assert!(prompts[1].user.contains("no such column: nme"));

    let _ = std::fs::remove_file(&db);
}

#[tokio::test]
async fn test_retry_never_executes_rejected_sql() {
    let db = create_test_sqlite_db();
    let engine = Arc::new(SqliteEngine::new(&db));
    let generator = ScriptedGenerator::new(&[
        "DELETE FROM users WHERE id = 2",
        "UPDATE users SET name = 'Mallory' WHERE id = 1",
    ]);

    let result = RetryController::new(generator, engine.clone(), engine.clone(), fast_retry(2))
        .run_with_retry("Remove Bob")
        .await
        .unwrap();

    assert!(!result.succeeded());
    assert_eq!(result.attempt_count, 2);
    assert!(result.error_history.iter().all(|r| r.kind == ErrorKind::PolicyViolation));

    // Data untouched
    let check = engine.execute("SELECT name FROM users ORDER BY id").await.unwrap();
    assert_eq!(check.rows.len(), 2);
    assert_eq!(check.rows[0]["name"], "Alice");

    let _ = std::fs::remove_file(&db);
}

#[tokio::test]
async fn test_executor_is_read_only_without_policy() {
    let db = create_test_sqlite_db();
    let engine = SqliteEngine::new(&db);

    let err = engine.execute("DELETE FROM users").await.unwrap_err();
    assert_eq!(err.error_code(), "EXECUTION_FAILED");

    let check = engine.execute("SELECT COUNT(*) AS n FROM users").await.unwrap();
    assert_eq!(check.rows[0]["n"], 2);

    let _ = std::fs::remove_file(&db);
}

// ============================================================================
// Tool-Use Loop
// ============================================================================

#[tokio::test]
async fn test_tool_loop_against_real_database() {
    let db = create_test_sqlite_db();
    let engine = Arc::new(SqliteEngine::new(&db));
    let generator = ScriptedGenerator::new(&[
        "Thought: find tables\nAction: list_tables\nAction Input: ",
        "Thought: inspect orders\nAction: get_schema\nAction Input: orders",
        "Thought: sum per user\nAction: run_sql\nAction Input: SELECT user_id, SUM(total) AS spent FROM orders GROUP BY user_id ORDER BY user_id",
        "Thought: I know\nFinal Answer: Alice spent 24.5 and Bob spent 12.25.",
    ]);

    let result = ToolLoop::new(generator, engine.clone(), engine, 10)
        .run_tool_loop("How much did each user spend?")
        .await;

    assert_eq!(result.final_answer, "Alice spent 24.5 and Bob spent 12.25.");
    assert_eq!(result.attempt_count, 4);
    assert!(result.is_valid);
    assert!(result.error_history.is_empty());

    let trace = result.reasoning_trace.expect("trace should be set");
    assert_eq!(trace[0].observation.as_deref(), Some("orders, users"));
    assert_eq!(
        trace[1].observation.as_deref(),
        Some(
            "Table: orders\n  - id (INTEGER, PRIMARY KEY)\n  - user_id (INTEGER, NOT NULL)\n  - total (REAL)\n  -> user_id references users(id)"
        )
    );
    assert_eq!(
        trace[2].observation.as_deref(),
        Some(r#"[{"user_id":1,"spent":24.5},{"user_id":2,"spent":12.25}]"#)
    );

    let _ = std::fs::remove_file(&db);
}

#[tokio::test]
async fn test_tool_loop_engine_error_is_observation() {
    let db = create_test_sqlite_db();
    let engine = Arc::new(SqliteEngine::new(&db));
    let generator = ScriptedGenerator::new(&[
        "Thought: query\nAction: run_sql\nAction Input: SELECT * FROM customers",
        "Final Answer: There is no customers table.",
    ]);

    let result = ToolLoop::new(generator, engine.clone(), engine, 5).run_tool_loop("List customers").await;

    let trace = result.reasoning_trace.unwrap();
    assert!(trace[0].observation.as_deref().unwrap().contains("no such table: customers"));
    assert_eq!(result.error_history[0].kind, ErrorKind::ExecutionFailure);
    assert_eq!(result.final_answer, "There is no customers table.");

    let _ = std::fs::remove_file(&db);
}

// ============================================================================
// Gateway
// ============================================================================

#[tokio::test]
async fn test_gateway_serves_concurrent_requests() {
    let db = create_test_sqlite_db();
    let engine = Arc::new(SqliteEngine::new(&db));
    let gateway = Gateway::new(
        Arc::new(CountingGenerator),
        engine.clone(),
        engine,
        GatewaySettings::default(),
    );

    let handles: Vec<_> = (0..5)
        .map(|i| {
            let gateway = gateway.clone();
            tokio::spawn(async move { gateway.ask(AskRequest::new(format!("How many users? #{i}"))).await })
        })
        .collect();

    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert!(result.succeeded());
        assert_eq!(result.attempt_count, 1);
        assert_eq!(result.rows.unwrap()[0]["n"], 2);
        assert_eq!(result.final_answer, "There are 2 users.");
    }

    let _ = std::fs::remove_file(&db);
}

#[tokio::test]
async fn test_gateway_describe_schema() {
    let db = create_test_sqlite_db();
    let engine = Arc::new(SqliteEngine::new(&db));
    let gateway =
        Gateway::new(Arc::new(CountingGenerator), engine.clone(), engine.clone(), GatewaySettings::default());

    let text = gateway.describe_schema().await.unwrap();
    assert_eq!(text, engine.describe().await.unwrap());
    assert!(text.starts_with("Table: orders"));

    let _ = std::fs::remove_file(&db);
}

#[test]
fn test_gateway_from_config_requires_database_and_key() {
    let err = Gateway::from_config(&WardenConfig::default()).err().unwrap();
    assert_eq!(err.error_code(), "CONFIG_ERROR");
    assert!(err.message().contains("No database configured"));

    let db = create_test_sqlite_db();
    let mut config = WardenConfig { database: Some(db.clone()), ..WardenConfig::default() };
    config.llm.api_key_env = "SQLWARDEN_INTEGRATION_MISSING_KEY".to_string();

    let err = Gateway::from_config(&config).err().unwrap();
    assert!(err.message().contains("SQLWARDEN_INTEGRATION_MISSING_KEY"));
    assert_eq!(err.status_code(), 500);

    std::env::set_var("SQLWARDEN_INTEGRATION_KEY", "sk-test");
    config.llm.api_key_env = "SQLWARDEN_INTEGRATION_KEY".to_string();
    config.retry.max_attempts = 2;
    let gateway = Gateway::from_config(&config).unwrap();
    assert_eq!(gateway.settings().retry.max_attempts, 2);
    std::env::remove_var("SQLWARDEN_INTEGRATION_KEY");

    let _ = std::fs::remove_file(&db);
}
