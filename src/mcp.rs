//! MCP (Model Context Protocol) Server
//!
//! This module implements an MCP server using manual JSON-RPC 2.0 over stdio.
//! No MCP-specific crates are involved.
//!
//! # Architecture
//!
//! - **Transport**: JSON-RPC 2.0 over stdio (line-based)
//! - **Dependencies**: Only `serde_json`, `schemars` and anyhow
//! - **Protocol**: Implements the MCP tool surface manually
//!
//! # MCP Tools
//!
//! - `ask` - Answer a natural-language question (retry controller or agent loop)
//! - `validate_sql` - Run the policy validator on a SQL string
//! - `describe_schema` - Describe the configured database
//!
//! Every tool returns a sqlwarden envelope as its text content.
//!
//! # Usage
//!
//! Start the MCP server with: `sqlwarden mcp`
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "sqlwarden": {
//!       "command": "sqlwarden",
//!       "args": ["mcp"]
//!     }
//!   }
//! }
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{self, BufRead, Write};
use std::time::Instant;

use crate::config::WardenConfig;
use crate::engine::filter_schema;
use crate::orchestrator::{AskRequest, Gateway};
use crate::output::{elapsed_ms, respond, Envelope, Metadata};
use crate::policy;

// ============================================================================
// JSON-RPC 2.0 Structures
// ============================================================================

/// JSON-RPC 2.0 Request
#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    params: Option<Value>,
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    fn result(id: Option<Value>, value: Value) -> Self {
        Self { jsonrpc: "2.0".to_string(), id, result: Some(value), error: None }
    }

    fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError { code, message, data: None }),
        }
    }
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

const PARSE_ERROR: i32 = -32700;
const INTERNAL_ERROR: i32 = -32603;

// ============================================================================
// MCP Tool Result Structures
// ============================================================================

/// Text content block for MCP tool results
#[derive(Debug, Serialize)]
struct TextContent {
    #[serde(rename = "type")]
    content_type: String,
    text: String,
}

impl TextContent {
    /// Create a new text content block
    fn new(text: String) -> Self {
        Self { content_type: "text".to_string(), text }
    }
}

/// MCP tool call result
#[derive(Debug, Serialize)]
struct CallToolResult {
    content: Vec<TextContent>,
    #[serde(rename = "isError")]
    is_error: bool,
}

impl CallToolResult {
    /// Tool result carrying an envelope; non-200 envelopes set `isError`
    fn envelope(envelope: &Envelope) -> Result<Value> {
        let result = Self {
            content: vec![TextContent::new(serde_json::to_string_pretty(envelope)?)],
            is_error: !envelope.is_ok(),
        };

        Ok(serde_json::to_value(result)?)
    }
}

/// `validate_sql` arguments
#[derive(Debug, Deserialize)]
struct ValidateArgs {
    sql: String,
}

/// `describe_schema` arguments
#[derive(Debug, Default, Deserialize)]
struct DescribeArgs {
    #[serde(default)]
    tables: Vec<String>,
}

// ============================================================================
// MCP Server
// ============================================================================

/// Where the server gets its collaborators
enum Backend {
    /// Build fresh collaborators from configuration for every call
    Config(WardenConfig),
    /// Use a prepared gateway
    Gateway(Gateway),
}

/// MCP server state
pub struct McpServer {
    backend: Backend,
}

impl McpServer {
    /// Server that wires collaborators from `config` on each tool call
    #[must_use]
    pub const fn new(config: WardenConfig) -> Self {
        Self { backend: Backend::Config(config) }
    }

    /// Server backed by an existing gateway
    #[must_use]
    pub const fn with_gateway(gateway: Gateway) -> Self {
        Self { backend: Backend::Gateway(gateway) }
    }

    /// Run the main loop: one JSON-RPC request per stdin line, one response
    /// per stdout line
    ///
    /// # Errors
    ///
    /// Returns an error if stdio communication fails.
    #[allow(clippy::future_not_send)]
    pub async fn serve(&self) -> Result<()> {
        let stdin = io::stdin();
        let reader = stdin.lock();
        let mut stdout = io::stdout();

        for line in reader.lines() {
            let line = line?;

            if let Some(response_json) = self.handle_line(&line).await? {
                writeln!(stdout, "{response_json}")?;
                stdout.flush()?;
            }
        }

        Ok(())
    }

    /// Handle one input line; blank lines produce no response
    async fn handle_line(&self, line: &str) -> Result<Option<String>> {
        if line.trim().is_empty() {
            return Ok(None);
        }

        let response = match serde_json::from_str::<JsonRpcRequest>(line) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => JsonRpcResponse::error(None, PARSE_ERROR, format!("Parse error: {e}")),
        };

        Ok(Some(serde_json::to_string(&response)?))
    }

    /// Route a request to its handler
    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        tracing::debug!(method = %request.method, "MCP request");

        let result = match request.method.as_str() {
            "initialize" => handle_initialize(),
            "tools/list" => handle_list_tools(),
            "tools/call" => self.handle_call_tool(request.params).await,
            _ => Err(anyhow!("Unknown method: {}", request.method)),
        };

        match result {
            Ok(value) => JsonRpcResponse::result(request.id, value),
            Err(e) => JsonRpcResponse::error(request.id, INTERNAL_ERROR, e.to_string()),
        }
    }

    /// Handle tools/call request
    async fn handle_call_tool(&self, params: Option<Value>) -> Result<Value> {
        let params = params.ok_or_else(|| anyhow!("Missing params"))?;
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("Missing tool name"))?;
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| serde_json::json!({}));

        let started = Instant::now();
        let envelope = match name {
            "ask" => {
                let request: AskRequest = serde_json::from_value(arguments)
                    .map_err(|e| anyhow!("Invalid arguments for ask: {e}"))?;
                let result = match self.gateway() {
                    Ok(gateway) => gateway.ask(request).await,
                    Err(e) => Err(e),
                };
                respond(result, elapsed_ms(started.elapsed()))
            }
            "validate_sql" => {
                let args: ValidateArgs = serde_json::from_value(arguments)
                    .map_err(|e| anyhow!("Invalid arguments for validate_sql: {e}"))?;
                let verdict = policy::validate(&args.sql);
                Envelope::from_result("validate", Ok(verdict), Metadata::new(elapsed_ms(started.elapsed())))
            }
            "describe_schema" => {
                let args: DescribeArgs = serde_json::from_value(arguments)
                    .map_err(|e| anyhow!("Invalid arguments for describe_schema: {e}"))?;
                let result = self.describe_schema(&args).await;
                Envelope::from_result("schema", result, Metadata::new(elapsed_ms(started.elapsed())))
            }
            _ => return Err(anyhow!("Unknown tool: {name}")),
        };

        CallToolResult::envelope(&envelope)
    }

    fn gateway(&self) -> crate::Result<Gateway> {
        match &self.backend {
            Backend::Config(config) => Gateway::from_config(config),
            Backend::Gateway(gateway) => Ok(gateway.clone()),
        }
    }

    async fn describe_schema(&self, args: &DescribeArgs) -> crate::Result<Value> {
        use crate::engine::SchemaProvider;

        let text = match &self.backend {
            // Schema needs no model credentials
            Backend::Config(config) => crate::engine::sqlite::SqliteEngine::from_config(config)?.describe().await?,
            Backend::Gateway(gateway) => gateway.describe_schema().await?,
        };

        let text = if args.tables.is_empty() {
            text
        } else {
            let requested: Vec<&str> = args.tables.iter().map(String::as_str).collect();
            filter_schema(&text, &requested)
        };

        Ok(serde_json::json!({ "schema": text }))
    }
}

// ============================================================================
// MCP Protocol Handlers
// ============================================================================

/// Handle MCP initialize request
///
/// Returns server capabilities and metadata.
fn handle_initialize() -> Result<Value> {
    Ok(serde_json::json!({
        "protocolVersion": "2024-11-05",
        "capabilities": {
            "tools": {}
        },
        "serverInfo": {
            "name": "sqlwarden",
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

/// Handle tools/list request
///
/// Returns the list of available MCP tools with their schemas.
fn handle_list_tools() -> Result<Value> {
    let ask_schema = serde_json::to_value(schemars::schema_for!(AskRequest))?;

    Ok(serde_json::json!({
        "tools": [
            {
                "name": "ask",
                "description": "Answer a natural-language question about the configured SQLite database. The question is turned into a single read-only SELECT, checked by the policy validator, executed, and summarized. Failed attempts are retried with the accumulated error history. Set agent_mode to let the model explore the schema with tools before answering; the reasoning trace is returned. Rejected queries and exhausted budgets are reported inside the result, not as errors.",
                "inputSchema": ask_schema
            },
            {
                "name": "validate_sql",
                "description": "Check a SQL string against the read-only policy without running it. Returns {valid, message}; the message names the violated rule.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "sql": {
                            "type": "string",
                            "description": "SQL text to validate"
                        }
                    },
                    "required": ["sql"]
                }
            },
            {
                "name": "describe_schema",
                "description": "Describe tables, columns and foreign keys of the configured database as text, one 'Table: <name>' section per table.",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "tables": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "Optional: only describe these tables (case-insensitive)"
                        }
                    }
                }
            }
        ]
    }))
}
