//! JSON Output Envelope Types
//!
//! This module defines the structured JSON output format for all sqlwarden operations.
//! All operations return either a `SuccessEnvelope` or an `ErrorEnvelope`.
//!
//! # Output Contract
//! - Success: `{"ok": true, "status": 200, "command": "...", "data": {...}, "meta": {...}}`
//! - Error: `{"ok": false, "status": 4xx/5xx, "command": "...", "error": {"code": "...", "message": "..."}}`
//!
//! Governance outcomes (rejected queries, exhausted attempts, step limits) are
//! data inside a 200 success envelope. Only failures before orchestration
//! starts produce an error envelope.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, WardenError};
use crate::orchestrator::ResultAggregate;

/// Status carried by every success envelope
pub const STATUS_OK: u16 = 200;

/// Success envelope for operation results
///
/// Generic over the data type to support different operation return values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    /// Always true for success envelopes
    pub ok: bool,

    /// Always 200 for success envelopes
    pub status: u16,

    /// Command that was executed (ask, validate, schema)
    pub command: String,

    /// Operation-specific data
    pub data: T,

    /// Execution metadata
    pub meta: Metadata,
}

impl<T> SuccessEnvelope<T> {
    /// Create a new success envelope
    pub fn new(command: impl Into<String>, data: T, meta: Metadata) -> Self {
        Self { ok: true, status: STATUS_OK, command: command.into(), data, meta }
    }
}

/// Error envelope for operation failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Always false for error envelopes
    pub ok: bool,

    /// Boundary status (400 invalid input, 500 configuration or schema load)
    pub status: u16,

    /// Command that was attempted
    pub command: String,

    /// Error information
    pub error: ErrorInfo,
}

impl ErrorEnvelope {
    /// Create a new error envelope
    pub fn new(command: impl Into<String>, status: u16, error: ErrorInfo) -> Self {
        Self { ok: false, status, command: command.into(), error }
    }

    /// Create error envelope from `WardenError`
    pub fn from_error(command: impl Into<String>, err: &WardenError) -> Self {
        Self::new(
            command,
            err.status_code(),
            ErrorInfo { code: err.error_code().to_string(), message: err.message() },
        )
    }
}

/// Error information structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (e.g., "INVALID_INPUT", "CONFIG_ERROR")
    pub code: String,

    /// Human-readable error message (agent-appropriate, no sensitive data)
    pub message: String,
}

impl ErrorInfo {
    /// Create a new error info
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into() }
    }
}

/// Execution metadata included in all success responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Execution time in milliseconds
    pub execution_ms: u64,

    /// Number of rows returned (for query results, None for other operations)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_returned: Option<usize>,
}

impl Metadata {
    /// Create new metadata with just execution time
    #[must_use]
    pub const fn new(execution_ms: u64) -> Self {
        Self { execution_ms, rows_returned: None }
    }

    /// Create new metadata with execution time and row count
    #[must_use]
    pub const fn with_rows(execution_ms: u64, rows_returned: usize) -> Self {
        Self { execution_ms, rows_returned: Some(rows_returned) }
    }
}

/// Either envelope, serialized without a wrapper
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Envelope {
    Success(SuccessEnvelope<serde_json::Value>),
    Error(ErrorEnvelope),
}

impl Envelope {
    /// Wrap an operation result
    pub fn from_result<T: Serialize>(
        command: &str,
        result: Result<T>,
        meta: Metadata,
    ) -> Self {
        match result.and_then(|data| {
            serde_json::to_value(data).map_err(|e| {
                WardenError::config_error(format!("Could not serialize response: {e}"))
            })
        }) {
            Ok(data) => Self::Success(SuccessEnvelope::new(command, data, meta)),
            Err(err) => Self::Error(ErrorEnvelope::from_error(command, &err)),
        }
    }

    #[must_use]
    pub const fn status(&self) -> u16 {
        match self {
            Self::Success(envelope) => envelope.status,
            Self::Error(envelope) => envelope.status,
        }
    }

    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Compact JSON, one line
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"ok":false,"status":500,"command":"","error":{{"code":"CONFIG_ERROR","message":"Could not serialize envelope: {e}"}}}}"#
            )
        })
    }
}

/// Whole milliseconds, saturating
#[must_use]
pub fn elapsed_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Map the outcome of an `ask` request to its envelope
///
/// Every aggregate, including exhausted budgets, becomes a 200 response.
pub fn respond(result: Result<ResultAggregate>, execution_ms: u64) -> Envelope {
    let meta = match &result {
        Ok(aggregate) => match aggregate.row_count() {
            Some(rows) => Metadata::with_rows(execution_ms, rows),
            None => Metadata::new(execution_ms),
        },
        Err(_) => Metadata::new(execution_ms),
    };

    Envelope::from_result("ask", result, meta)
}
