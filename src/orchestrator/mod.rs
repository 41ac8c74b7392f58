//! Query Governance Orchestration
//!
//! Two orchestrators turn a natural-language question into an answer while
//! keeping every query behind the policy validator:
//!
//! - [`retry::RetryController`]: generate, validate, execute, summarize, with a
//!   bounded number of attempts and exponential backoff between them
//! - [`agent::ToolLoop`]: a bounded reasoning loop where the model calls
//!   `list_tables`, `get_schema` and `run_sql` as tools
//!
//! Both populate a [`ResultAggregate`], which they own exclusively until it
//! is returned. Policy, generation and execution failures are recorded in the
//! aggregate's error history and never escape as errors.
//!
//! [`Gateway`] is the transport-facing entry point shared by the CLI and the
//! MCP server.

use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{validate_config, WardenConfig};
use crate::engine::sqlite::SqliteEngine;
use crate::engine::{Executor, Row, SchemaProvider};
use crate::error::{Result, WardenError};
use crate::llm::{ChatGenerator, Generator};

pub mod agent;
pub mod retry;

use agent::ToolLoop;
use retry::{RetryController, RetryPolicy};

/// Class of a recoverable failure recorded in the error history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Candidate rejected by the policy validator
    PolicyViolation,
    /// Generator transport or model failure, or unusable output
    GenerationFailure,
    /// Executor or schema provider failure
    ExecutionFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PolicyViolation => write!(f, "policy_violation"),
            Self::GenerationFailure => write!(f, "generation_failure"),
            Self::ExecutionFailure => write!(f, "execution_failure"),
        }
    }
}

/// One entry of the error history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Attempt (retry controller) or step (tool loop) that failed
    pub attempt: u32,

    pub kind: ErrorKind,

    pub message: String,

    /// Corrective guidance fed to the next generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorRecord {
    pub fn new(attempt: u32, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { attempt, kind, message: message.into(), hint: None }
    }

    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// One tool-loop step: model text plus the system's observation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStep {
    /// Model output for this step, cut at the observation boundary
    pub text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_input: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observation: Option<String>,
}

/// Generated query text and the attempt that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateQuery {
    pub text: String,
    pub attempt: u32,
}

/// Output record shared by both orchestrators
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultAggregate {
    /// The question as asked
    pub original_query: String,

    /// Last candidate SQL (empty if none was produced)
    pub generated_query: String,

    /// Verdict for `generated_query`
    pub is_valid: bool,

    pub validation_message: String,

    /// Rows from the last successful execution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Row>>,

    pub final_answer: String,

    /// Set only when the attempt budget is exhausted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Attempts (retry controller) or steps (tool loop) used
    pub attempt_count: u32,

    pub error_history: Vec<ErrorRecord>,

    pub elapsed_ms: u64,

    /// Tool-loop transcript, absent for the retry controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_trace: Option<Vec<AgentStep>>,
}

impl ResultAggregate {
    /// Fresh aggregate with only the question set
    pub fn new(original_query: impl Into<String>) -> Self {
        Self { original_query: original_query.into(), ..Self::default() }
    }

    /// True unless the attempt budget was exhausted
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.error_message.is_none()
    }

    /// Number of rows in the last successful execution
    #[must_use]
    pub fn row_count(&self) -> Option<usize> {
        self.rows.as_ref().map(Vec::len)
    }
}

/// Per-request state for the tool loop
///
/// The schema text is fetched lazily on first use and dropped with the
/// request. Failed fetches are not cached.
#[derive(Debug, Default)]
pub struct RequestContext {
    schema: Option<String>,
}

impl RequestContext {
    pub async fn schema(
        &mut self,
        provider: &dyn SchemaProvider,
        timeout: Option<Duration>,
    ) -> Result<&str> {
        if self.schema.is_none() {
            let text = with_deadline(timeout, "schema provider", provider.describe()).await?;
            self.schema = Some(text);
        }
        Ok(self.schema.as_deref().unwrap_or_default())
    }
}

static TOP_CLAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bSELECT\s+(DISTINCT\s+)?TOP\b").expect("TOP pattern is valid"));

/// Guidance for the next generation, based on an execution error
///
/// `query` is the statement that failed; some engines report an unsupported
/// `TOP` clause only as a generic syntax error.
#[must_use]
pub fn corrective_hint(message: &str, query: &str) -> Option<&'static str> {
    let lower = message.to_lowercase();

    if lower.contains("no such column")
        || lower.contains("unknown column")
        || (lower.contains("column") && lower.contains("does not exist"))
    {
        return Some("Check column names against the schema");
    }

    if lower.contains("no such table")
        || lower.contains("unknown table")
        || lower.contains("no such object")
        || (lower.contains("table") && lower.contains("does not exist"))
    {
        return Some("Use only tables listed in the schema");
    }

    if lower.contains("\"top\"") || TOP_CLAUSE.is_match(query) {
        return Some("TOP is not supported, use LIMIT instead");
    }

    None
}

/// Await `fut`, bounded by `timeout` when one is set
pub async fn with_deadline<T, F>(timeout: Option<Duration>, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut).await.unwrap_or_else(|_| {
            Err(WardenError::timeout(operation, u64::try_from(limit.as_millis()).unwrap_or(u64::MAX)))
        }),
        None => fut.await,
    }
}

/// Boundary request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AskRequest {
    /// Natural-language question about the database
    pub query: String,

    /// Use the tool-use agent loop instead of the retry controller
    #[serde(default)]
    pub agent_mode: bool,
}

impl AskRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), agent_mode: false }
    }

    #[must_use]
    pub const fn agent(mut self) -> Self {
        self.agent_mode = true;
        self
    }
}

/// Budgets and deadlines for both orchestrators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySettings {
    pub retry: RetryPolicy,
    pub max_steps: u32,
    pub observation_max_chars: usize,
    pub call_timeout: Option<Duration>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self::from_config(&WardenConfig::default())
    }
}

impl GatewaySettings {
    #[must_use]
    pub fn from_config(config: &WardenConfig) -> Self {
        Self {
            retry: RetryPolicy {
                max_attempts: config.retry.max_attempts,
                backoff_base: Duration::from_millis(config.retry.backoff_base_ms),
            },
            max_steps: config.agent.max_steps,
            observation_max_chars: config.agent.observation_max_chars,
            call_timeout: config.call_timeout(),
        }
    }
}

/// Shared collaborators plus settings; one instance serves many requests
#[derive(Clone)]
pub struct Gateway {
    generator: Arc<dyn Generator>,
    executor: Arc<dyn Executor>,
    schema: Arc<dyn SchemaProvider>,
    settings: GatewaySettings,
}

impl Gateway {
    pub fn new(
        generator: Arc<dyn Generator>,
        executor: Arc<dyn Executor>,
        schema: Arc<dyn SchemaProvider>,
        settings: GatewaySettings,
    ) -> Self {
        Self { generator, executor, schema, settings }
    }

    /// Wire the bundled `SQLite` engine and chat generator from configuration
    ///
    /// Fails with `ConfigError` when the database is missing or the API key
    /// variable is unset.
    pub fn from_config(config: &WardenConfig) -> Result<Self> {
        validate_config(config)?;

        let engine = Arc::new(SqliteEngine::from_config(config)?);
        let api_key = config.llm.resolve_api_key()?;
        let generator = Arc::new(ChatGenerator::from_config(&config.llm, api_key));

        Ok(Self::new(generator, engine.clone(), engine, GatewaySettings::from_config(config)))
    }

    /// Schema text from the shared provider, under the call deadline
    pub async fn describe_schema(&self) -> Result<String> {
        with_deadline(self.settings.call_timeout, "schema provider", self.schema.describe()).await
    }

    #[must_use]
    pub const fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn retry_controller(&self) -> RetryController {
        RetryController::new(
            Arc::clone(&self.generator),
            Arc::clone(&self.executor),
            Arc::clone(&self.schema),
            self.settings.retry.clone(),
        )
        .with_call_timeout(self.settings.call_timeout)
    }

    pub fn tool_loop(&self) -> ToolLoop {
        ToolLoop::new(
            Arc::clone(&self.generator),
            Arc::clone(&self.executor),
            Arc::clone(&self.schema),
            self.settings.max_steps,
        )
        .with_observation_max_chars(self.settings.observation_max_chars)
        .with_call_timeout(self.settings.call_timeout)
    }

    /// Answer one request
    ///
    /// Governance failures come back inside the aggregate. Only an empty
    /// question (`InvalidInput`) or a schema that cannot be loaded up front
    /// (`SchemaUnavailable`) are returned as errors.
    pub async fn ask(&self, request: AskRequest) -> Result<ResultAggregate> {
        if request.query.trim().is_empty() {
            return Err(WardenError::invalid_input("Question cannot be empty"));
        }

        tracing::info!(agent_mode = request.agent_mode, "Handling ask request");

        if request.agent_mode {
            Ok(self.tool_loop().run_tool_loop(&request.query).await)
        } else {
            self.retry_controller().run_with_retry(&request.query).await
        }
    }
}
