//! Execution Collaborators and Schema Types
//!
//! This module defines the seams between the governance logic and the data
//! store. The orchestrators only ever see the [`Executor`] and
//! [`SchemaProvider`] traits; [`sqlite::SqliteEngine`] is the bundled
//! implementation of both.
//!
//! # Schema Text Format
//! Schema providers describe the database as plain text, one section per
//! table:
//!
//! ```text
//! Table: orders
//!   - id (INTEGER, PRIMARY KEY)
//!   - customer_id (INTEGER, NOT NULL)
//!   -> customer_id references customers(id)
//! ```
//!
//! [`table_names`] and [`filter_schema`] work on that format.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod sqlite;

/// One result row: column name to JSON value, in select-list order
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Query execution result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names in result set
    pub columns: Vec<String>,

    /// Result rows (each row maps column name to value)
    pub rows: Vec<Row>,
}

/// Runs an already-validated query against a data store
///
/// Data-engine errors (unknown column, unknown table, syntax) are reported as
/// `WardenError::ExecutionFailed` with the engine's message preserved.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, query: &str) -> Result<QueryResult>;
}

/// Describes the schema of a data store as human-readable text
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    async fn describe(&self) -> Result<String>;
}

/// Schema introspection result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaInfo {
    /// List of tables in the schema
    pub tables: Vec<TableInfo>,
}

/// Table information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    /// Table name
    pub name: String,

    /// Table columns
    pub columns: Vec<ColumnInfo>,

    /// Foreign keys
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<ForeignKeyInfo>,
}

/// Column information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name
    pub name: String,

    /// Declared column type
    pub data_type: String,

    /// Whether column allows NULL values
    pub nullable: bool,

    /// Whether column is part of the primary key
    pub primary_key: bool,
}

/// Foreign key information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyInfo {
    /// Column in this table
    pub column: String,

    /// Referenced table name
    pub referenced_table: String,

    /// Referenced column name
    pub referenced_column: String,
}

impl SchemaInfo {
    /// Render as schema text, one `Table:` section per table
    #[must_use]
    pub fn render(&self) -> String {
        self.tables.iter().map(TableInfo::render).collect::<Vec<_>>().join("\n\n")
    }
}

impl TableInfo {
    fn render(&self) -> String {
        let mut lines = vec![format!("Table: {}", self.name)];

        for column in &self.columns {
            let mut attributes = vec![column.data_type.clone()];
            if column.primary_key {
                attributes.push("PRIMARY KEY".to_string());
            }
            if !column.nullable && !column.primary_key {
                attributes.push("NOT NULL".to_string());
            }
            lines.push(format!("  - {} ({})", column.name, attributes.join(", ")));
        }

        for fk in &self.foreign_keys {
            lines.push(format!(
                "  -> {} references {}({})",
                fk.column, fk.referenced_table, fk.referenced_column
            ));
        }

        lines.join("\n")
    }
}

/// Table identifiers found in schema text, in order of appearance
#[must_use]
pub fn table_names(schema_text: &str) -> Vec<String> {
    schema_text
        .lines()
        .filter_map(|line| line.trim_start().strip_prefix("Table:"))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Keep only the sections of `schema_text` for the requested tables
///
/// Matching is case-insensitive. Sections come back in schema order, joined by
/// a blank line. Returns an empty string when nothing matches.
#[must_use]
pub fn filter_schema(schema_text: &str, requested: &[&str]) -> String {
    let wanted: Vec<String> = requested
        .iter()
        .map(|name| name.trim().to_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    let mut sections: Vec<(String, Vec<&str>)> = Vec::new();
    for line in schema_text.lines() {
        if let Some(name) = line.trim_start().strip_prefix("Table:") {
            sections.push((name.trim().to_lowercase(), vec![line]));
        } else if let Some((_, body)) = sections.last_mut() {
            body.push(line);
        }
    }

    sections
        .into_iter()
        .filter(|(name, _)| wanted.contains(name))
        .map(|(_, body)| body.join("\n").trim_end().to_string())
        .collect::<Vec<_>>()
        .join("\n\n")
}
