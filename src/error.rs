//! Error Handling Infrastructure
//!
//! This module defines all error types used throughout sqlwarden.
//! All errors are structured and map to specific error codes for JSON output.
//!
//! # Error Categories
//! - `PolicyViolation`: Candidate query rejected by the policy validator
//! - `GenerationFailed`: Generator transport/model failure or unusable response
//! - `ExecutionFailed`: Data-engine error while running an accepted query
//! - `SchemaUnavailable`: Schema provider could not describe the database
//! - `InvalidInput`: Malformed request or missing required parameters
//! - `ConfigError`: Configuration file or environment errors
//! - `Timeout`: A collaborator call exceeded its deadline
//!
//! Policy, generation and execution failures are recoverable inside the
//! orchestrators and never cross the boundary as errors. The remaining
//! variants surface as error envelopes with a non-200 status.

use thiserror::Error;

/// Main error type for sqlwarden operations
#[derive(Error, Debug)]
pub enum WardenError {
    /// Candidate query rejected by the policy validator
    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    /// Generator failed or returned an unusable response
    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    /// Query execution failed
    #[error("Query execution failed: {0}")]
    ExecutionFailed(String),

    /// Schema could not be loaded
    #[error("Schema unavailable: {0}")]
    SchemaUnavailable(String),

    /// Invalid input or missing required parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error (file not found, invalid JSON, missing env var, etc.)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Collaborator call exceeded its deadline
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },
}

impl WardenError {
    /// Convert error to error code string for JSON output
    ///
    /// Error codes are stable and suitable for programmatic handling by agents.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::PolicyViolation(_) => "POLICY_VIOLATION",
            Self::GenerationFailed(_) => "GENERATION_FAILED",
            Self::ExecutionFailed(_) => "EXECUTION_FAILED",
            Self::SchemaUnavailable(_) => "SCHEMA_UNAVAILABLE",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
        }
    }

    /// Boundary status for an error that escapes before orchestration starts
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::InvalidInput(_) | Self::PolicyViolation(_) => 400,
            Self::GenerationFailed(_) | Self::ExecutionFailed(_) => 502,
            Self::Timeout { .. } => 504,
            Self::SchemaUnavailable(_) | Self::ConfigError(_) => 500,
        }
    }

    /// Get human-readable error message (agent-appropriate, no sensitive data)
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Create a policy violation error
    pub fn policy_violation(message: impl Into<String>) -> Self {
        Self::PolicyViolation(message.into())
    }

    /// Create a generation failed error
    pub fn generation_failed(message: impl Into<String>) -> Self {
        Self::GenerationFailed(message.into())
    }

    /// Create an execution failed error
    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::ExecutionFailed(message.into())
    }

    /// Create a schema unavailable error
    pub fn schema_unavailable(message: impl Into<String>) -> Self {
        Self::SchemaUnavailable(message.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout { operation: operation.into(), timeout_ms }
    }
}

/// Result type alias for sqlwarden operations
pub type Result<T> = std::result::Result<T, WardenError>;
