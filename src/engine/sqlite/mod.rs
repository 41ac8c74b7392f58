//! `SQLite` Executor and Schema Provider
//!
//! This module implements [`Executor`] and [`SchemaProvider`] for `SQLite`
//! database files.
//!
//! # Implementation Notes
//! - Uses `rusqlite` (synchronous driver) on `spawn_blocking` threads
//! - Every connection is opened read-only, so the store refuses writes even if
//!   a query slipped past the policy
//! - BLOB data is Base64-encoded for JSON safety
//! - Row limits enforced in application code
//! - Stateless: a connection is opened and closed per call

use async_trait::async_trait;
use rusqlite::{Connection, OpenFlags, Row as SqliteRow};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::WardenConfig;
use crate::engine::{
    ColumnInfo, Executor, ForeignKeyInfo, QueryResult, Row, SchemaInfo, SchemaProvider, TableInfo,
};
use crate::error::{Result, WardenError};

/// `SQLite` engine bound to one database file
#[derive(Debug, Clone)]
pub struct SqliteEngine {
    path: PathBuf,
    max_rows: Option<usize>,
}

impl SqliteEngine {
    /// Create an engine for the database file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), max_rows: None }
    }

    /// Engine for the configured database, with the configured row cap
    pub fn from_config(config: &WardenConfig) -> Result<Self> {
        let path = config.database_path()?;
        if !path.exists() {
            return Err(WardenError::config_error(format!(
                "Database file not found: {}",
                path.display()
            )));
        }

        let engine = Self::new(path);
        Ok(match config.max_rows {
            Some(max_rows) => engine.with_max_rows(max_rows),
            None => engine,
        })
    }

    /// Cap the number of rows returned per query
    #[must_use]
    pub const fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = Some(max_rows);
        self
    }

    /// Database file this engine reads
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Introspect tables, columns and foreign keys (blocking)
    pub fn introspect(&self) -> Result<SchemaInfo> {
        let conn = open_connection(&self.path).map_err(WardenError::schema_unavailable)?;

        let mut stmt = conn
            .prepare(
                "SELECT name FROM sqlite_master
                 WHERE type = 'table'
                 AND name NOT LIKE 'sqlite_%'
                 ORDER BY name",
            )
            .map_err(|e| WardenError::schema_unavailable(format!("Failed to query tables: {e}")))?;

        let table_names: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| {
                WardenError::schema_unavailable(format!("Failed to fetch table names: {e}"))
            })?
            .collect::<std::result::Result<Vec<String>, _>>()
            .map_err(|e| {
                WardenError::schema_unavailable(format!("Failed to collect table names: {e}"))
            })?;

        let mut tables = Vec::with_capacity(table_names.len());
        for table_name in table_names {
            tables.push(introspect_table(&conn, &table_name)?);
        }

        Ok(SchemaInfo { tables })
    }
}

#[async_trait]
impl Executor for SqliteEngine {
    async fn execute(&self, query: &str) -> Result<QueryResult> {
        let path = self.path.clone();
        let max_rows = self.max_rows;
        let query = query.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = open_connection(&path).map_err(WardenError::execution_failed)?;
            execute_query(&conn, &query, max_rows)
        })
        .await
        .map_err(|e| WardenError::execution_failed(format!("Query task failed: {e}")))?
    }
}

#[async_trait]
impl SchemaProvider for SqliteEngine {
    async fn describe(&self) -> Result<String> {
        let engine = self.clone();

        let schema = tokio::task::spawn_blocking(move || engine.introspect())
            .await
            .map_err(|e| WardenError::schema_unavailable(format!("Introspection task failed: {e}")))??;

        Ok(schema.render())
    }
}

/// Open a read-only `SQLite` connection
fn open_connection(path: &Path) -> std::result::Result<Connection, String> {
    Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| format!("Failed to open SQLite database '{}': {e}", path.display()))
}

/// Introspect a single table and return `TableInfo`
fn introspect_table(conn: &Connection, table_name: &str) -> Result<TableInfo> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{table_name}\")")).map_err(|e| {
        WardenError::schema_unavailable(format!(
            "Failed to prepare table_info for {table_name}: {e}"
        ))
    })?;

    let columns: Vec<ColumnInfo> = stmt
        .query_map([], |row| {
            Ok(ColumnInfo {
                name: row.get::<_, String>(1)?,
                data_type: row.get::<_, String>(2)?,
                nullable: row.get::<_, i32>(3)? == 0, // notnull column: 0 = nullable, 1 = not null
                primary_key: row.get::<_, i32>(5)? > 0, // pk column: >0 means part of primary key
            })
        })
        .map_err(|e| {
            WardenError::schema_unavailable(format!(
                "Failed to query columns for {table_name}: {e}"
            ))
        })?
        .collect::<std::result::Result<Vec<ColumnInfo>, _>>()
        .map_err(|e| {
            WardenError::schema_unavailable(format!(
                "Failed to collect columns for {table_name}: {e}"
            ))
        })?;

    let mut fk_stmt =
        conn.prepare(&format!("PRAGMA foreign_key_list(\"{table_name}\")")).map_err(|e| {
            WardenError::schema_unavailable(format!(
                "Failed to prepare foreign_key_list for {table_name}: {e}"
            ))
        })?;

    // Ordered by (constraint id, sequence) so composite keys stay grouped
    let mut fk_rows: BTreeMap<(i32, i32), ForeignKeyInfo> = BTreeMap::new();
    let rows = fk_stmt
        .query_map([], |row| {
            let id: i32 = row.get(0)?;
            let seq: i32 = row.get(1)?;
            let referenced_table: String = row.get(2)?;
            let column: String = row.get(3)?;
            // Implicit primary-key references leave "to" NULL
            let referenced_column: Option<String> = row.get(4)?;
            Ok(((id, seq), column, referenced_table, referenced_column))
        })
        .map_err(|e| {
            WardenError::schema_unavailable(format!(
                "Failed to query foreign keys for {table_name}: {e}"
            ))
        })?;

    for row in rows {
        let (key, column, referenced_table, referenced_column) = row.map_err(|e| {
            WardenError::schema_unavailable(format!(
                "Failed to read foreign key for {table_name}: {e}"
            ))
        })?;
        fk_rows.insert(
            key,
            ForeignKeyInfo {
                column,
                referenced_table,
                referenced_column: referenced_column.unwrap_or_else(|| "rowid".to_string()),
            },
        );
    }

    Ok(TableInfo { name: table_name.to_string(), columns, foreign_keys: fk_rows.into_values().collect() })
}

/// Execute query and return `QueryResult`
fn execute_query(conn: &Connection, query: &str, max_rows: Option<usize>) -> Result<QueryResult> {
    let mut stmt = conn
        .prepare(query)
        .map_err(|e| WardenError::execution_failed(format!("Failed to prepare query: {e}")))?;

    let column_names: Vec<String> = stmt.column_names().iter().map(|s| (*s).to_string()).collect();

    let mut rows = stmt
        .query([])
        .map_err(|e| WardenError::execution_failed(format!("Failed to execute query: {e}")))?;

    let mut rows_data = Vec::new();
    while let Some(row) = rows
        .next()
        .map_err(|e| WardenError::execution_failed(format!("Failed to fetch row: {e}")))?
    {
        if max_rows.is_some_and(|limit| rows_data.len() >= limit) {
            break;
        }

        let row = row_to_json(&column_names, row)
            .map_err(|e| WardenError::execution_failed(format!("Failed to decode row: {e}")))?;
        rows_data.push(row);
    }

    Ok(QueryResult { columns: column_names, rows: rows_data })
}

/// Convert a `SQLite` row to a column-ordered JSON map
fn row_to_json(
    column_names: &[String],
    row: &SqliteRow,
) -> std::result::Result<Row, rusqlite::Error> {
    let mut values = Row::new();

    for (idx, name) in column_names.iter().enumerate() {
        values.insert(name.clone(), sqlite_value_to_json(row, idx)?);
    }

    Ok(values)
}

/// Convert `SQLite` value to JSON value
fn sqlite_value_to_json(
    row: &SqliteRow,
    idx: usize,
) -> std::result::Result<serde_json::Value, rusqlite::Error> {
    use rusqlite::types::ValueRef;

    let value_ref = row.get_ref(idx)?;

    Ok(match value_ref {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::Number(i.into()),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map_or(serde_json::Value::Null, serde_json::Value::Number), // Handle NaN/Infinity as null
        ValueRef::Text(s) => {
            let text = std::str::from_utf8(s).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;
            serde_json::Value::String(text.to_string())
        }
        ValueRef::Blob(b) => {
            use base64::Engine;
            let encoded = base64::engine::general_purpose::STANDARD.encode(b);
            serde_json::Value::String(encoded)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_db(name: &str, statements: &[&str]) -> PathBuf {
        let temp_file = std::env::temp_dir().join(format!("sqlwarden_{name}_{}.db", std::process::id()));
        let _ = std::fs::remove_file(&temp_file);

        let conn = Connection::open(&temp_file).expect("Failed to create temp database");
        for sql in statements {
            conn.execute(sql, []).expect("Failed to run setup statement");
        }

        temp_file
    }

    #[tokio::test]
    async fn test_execute_select_query() {
        let temp_file = create_db(
            "execute_select",
            &[
                "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)",
                "INSERT INTO users (name) VALUES ('Alice')",
            ],
        );

        let engine = SqliteEngine::new(&temp_file);
        let result = engine.execute("SELECT name, id FROM users").await.unwrap();

        assert_eq!(result.columns, vec!["name", "id"]);
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0]["name"], serde_json::json!("Alice"));
        let keys: Vec<&String> = result.rows[0].keys().collect();
        assert_eq!(keys, vec!["name", "id"]);

        let _ = std::fs::remove_file(&temp_file);
    }

    #[tokio::test]
    async fn test_execute_unknown_column_keeps_engine_message() {
        let temp_file =
            create_db("unknown_column", &["CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)"]);

        let engine = SqliteEngine::new(&temp_file);
        let err = engine.execute("SELECT nme FROM users").await.unwrap_err();

        assert_eq!(err.error_code(), "EXECUTION_FAILED");
        assert!(err.message().contains("no such column"));

        let _ = std::fs::remove_file(&temp_file);
    }

    #[tokio::test]
    async fn test_connection_is_read_only() {
        let temp_file =
            create_db("read_only", &["CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)"]);

        let engine = SqliteEngine::new(&temp_file);
        let result = engine.execute("INSERT INTO users (name) VALUES ('Mallory')").await;
        assert!(result.is_err());

        let _ = std::fs::remove_file(&temp_file);
    }

    #[tokio::test]
    async fn test_missing_database_file() {
        let engine = SqliteEngine::new("/nonexistent/sqlwarden/missing.db");
        let err = engine.execute("SELECT 1").await.unwrap_err();
        assert!(err.message().contains("Failed to open SQLite database"));

        let err = engine.describe().await.unwrap_err();
        assert_eq!(err.error_code(), "SCHEMA_UNAVAILABLE");
    }

    #[test]
    fn test_from_config() {
        let temp_file = create_db("from_config", &["CREATE TABLE t (id INTEGER)"]);

        let config = WardenConfig {
            database: Some(temp_file.clone()),
            max_rows: Some(3),
            ..WardenConfig::default()
        };
        let engine = SqliteEngine::from_config(&config).unwrap();
        assert_eq!(engine.path(), temp_file.as_path());
        assert_eq!(engine.max_rows, Some(3));

        let missing = WardenConfig {
            database: Some(PathBuf::from("/nonexistent/sqlwarden.db")),
            ..WardenConfig::default()
        };
        let err = SqliteEngine::from_config(&missing).unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
        assert!(SqliteEngine::from_config(&WardenConfig::default()).is_err());

        let _ = std::fs::remove_file(&temp_file);
    }

    #[tokio::test]
    async fn test_execute_max_rows_limit() {
        let temp_file = create_db("max_rows", &["CREATE TABLE numbers (n INTEGER)"]);
        {
            let conn = Connection::open(&temp_file).unwrap();
            for i in 1..=10 {
                conn.execute("INSERT INTO numbers (n) VALUES (?)", [i]).unwrap();
            }
        }

        let engine = SqliteEngine::new(&temp_file).with_max_rows(5);
        let result = engine.execute("SELECT n FROM numbers ORDER BY n").await.unwrap();
        assert_eq!(result.rows.len(), 5);

        let _ = std::fs::remove_file(&temp_file);
    }

    #[tokio::test]
    async fn test_execute_all_data_types() {
        let temp_file = create_db(
            "data_types",
            &["CREATE TABLE test_types (int_col INTEGER, real_col REAL, text_col TEXT, blob_col BLOB, null_col TEXT)"],
        );
        {
            let conn = Connection::open(&temp_file).unwrap();
            conn.execute(
                "INSERT INTO test_types VALUES (?, ?, ?, ?, ?)",
                rusqlite::params![42, 2.5, "hello", vec![1u8, 2u8, 3u8], Option::<String>::None],
            )
            .unwrap();
        }

        let engine = SqliteEngine::new(&temp_file);
        let result = engine.execute("SELECT * FROM test_types").await.unwrap();
        let row = &result.rows[0];

        assert_eq!(row["int_col"], serde_json::json!(42));
        assert_eq!(row["real_col"], serde_json::json!(2.5));
        assert_eq!(row["text_col"], serde_json::json!("hello"));
        assert_eq!(row["blob_col"], serde_json::json!("AQID"));
        assert_eq!(row["null_col"], serde_json::Value::Null);

        let _ = std::fs::remove_file(&temp_file);
    }

    #[tokio::test]
    async fn test_describe_schema() {
        let temp_file = create_db(
            "describe",
            &[
                "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
                "CREATE TABLE orders (id INTEGER PRIMARY KEY, customer_id INTEGER REFERENCES customers(id), total REAL)",
            ],
        );

        let engine = SqliteEngine::new(&temp_file);
        let text = engine.describe().await.unwrap();

        assert!(text.contains("Table: customers"));
        assert!(text.contains("  - name (TEXT, NOT NULL)"));
        assert!(text.contains("  - id (INTEGER, PRIMARY KEY)"));
        assert!(text.contains("Table: orders"));
        assert!(text.contains("  -> customer_id references customers(id)"));

        let schema = engine.introspect().unwrap();
        assert_eq!(schema.tables.len(), 2);
        assert_eq!(schema.tables[0].name, "customers");

        let _ = std::fs::remove_file(&temp_file);
    }

    #[test]
    fn test_introspect_keeps_every_foreign_key() {
        let temp_file = create_db(
            "foreign_keys",
            &[
                "CREATE TABLE regions (code TEXT, country TEXT, PRIMARY KEY (code, country))",
                "CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT)",
                "CREATE TABLE sites (
                    id INTEGER PRIMARY KEY,
                    owner_id INTEGER REFERENCES customers,
                    region_code TEXT,
                    region_country TEXT,
                    FOREIGN KEY (region_code, region_country) REFERENCES regions(code, country)
                )",
            ],
        );

        let schema = SqliteEngine::new(&temp_file).introspect().unwrap();
        let sites = schema.tables.iter().find(|t| t.name == "sites").unwrap();

        let mut references: Vec<String> = sites
            .foreign_keys
            .iter()
            .map(|fk| format!("{} -> {}({})", fk.column, fk.referenced_table, fk.referenced_column))
            .collect();
        references.sort();

        assert_eq!(
            references,
            vec![
                "owner_id -> customers(rowid)",
                "region_code -> regions(code)",
                "region_country -> regions(country)",
            ]
        );

        let _ = std::fs::remove_file(&temp_file);
    }
}
