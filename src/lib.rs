//! sqlwarden - Natural-Language SQL Gateway
//!
//! sqlwarden turns a natural-language question into a query, keeps that query
//! behind a read-only policy sandbox, runs it, and answers in plain language.
//! Generation, validation and execution failures are recovered automatically
//! within a bounded budget.
//!
//! # Core Principles
//! - Only read-only SELECT statements ever reach the executor
//! - Governance failures are data, not faults (always a 200 envelope)
//! - Bounded work: attempt and step budgets, optional per-call deadlines
//! - Agent-first, machine-only interface (JSON-only output)
//!
//! # Architecture
//! This library provides the core functionality for both CLI and MCP interfaces.
//! Both interfaces are thin wrappers around [`Gateway`].
//!
//! # Module Organization
//! - [`policy`] - Policy validator (read-only sandbox)
//! - [`orchestrator`] - Retry controller, tool-use loop and result aggregate
//! - [`llm`] - Generator trait and chat-completions client
//! - [`engine`] - Executor and schema provider traits, `SQLite` implementation
//! - [`prompts`] - Prompt construction and SQL extraction
//! - [`config`] - Configuration management
//! - [`output`] - JSON output envelope types
//! - [`error`] - Error types and handling
//! - [`mcp`] - MCP server

pub mod config;
pub mod engine;
pub mod error;
pub mod llm;
pub mod mcp;
pub mod orchestrator;
pub mod output;
pub mod policy;
pub mod prompts;

// Re-export commonly used types for convenience
pub use config::{load_with_precedence, save_config, ConfigLocation, WardenConfig};
pub use engine::{Executor, QueryResult, Row, SchemaInfo, SchemaProvider};
pub use error::{Result, WardenError};
pub use llm::{ChatGenerator, Generator, PromptContext};
pub use orchestrator::agent::ToolLoop;
pub use orchestrator::retry::{RetryController, RetryPolicy};
pub use orchestrator::{
    AgentStep, AskRequest, ErrorKind, ErrorRecord, Gateway, GatewaySettings, ResultAggregate,
};
pub use output::{respond, Envelope, ErrorEnvelope, ErrorInfo, Metadata, SuccessEnvelope};
pub use policy::{validate, Verdict};
