//! sqlwarden CLI Entry Point
//!
//! This is the main binary entry point for the sqlwarden CLI.
//! It provides five subcommands:
//! - `ask` - Answer a natural-language question against the database
//! - `validate` - Run the policy validator on a SQL string
//! - `schema` - Describe the database schema
//! - `init` - Interactive configuration setup
//! - `mcp` - MCP server mode (hidden, for AI agent integration)
//!
//! All output to stdout is JSON-only. Logs go to stderr.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use sqlwarden::config::{self, ConfigLocation, WardenConfig};
use sqlwarden::engine::sqlite::SqliteEngine;
use sqlwarden::engine::{filter_schema, SchemaProvider};
use sqlwarden::mcp::McpServer;
use sqlwarden::output::{elapsed_ms, respond, Envelope, Metadata};
use sqlwarden::{policy, AskRequest, Gateway, Result};

/// sqlwarden - Natural-language SQL gateway with a read-only policy sandbox
#[derive(Parser)]
#[command(name = "sqlwarden")]
#[command(about = "Natural-language SQL gateway with a read-only policy sandbox")]
#[command(version)]
struct Cli {
    /// Log at debug level to stderr (overrides RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a question by generating, validating and running SQL
    Ask {
        /// Natural-language question
        question: String,

        /// Use the tool-use agent loop instead of the retry controller
        #[arg(long)]
        agent: bool,

        /// SQLite database file (overrides config)
        #[arg(long)]
        database: Option<PathBuf>,

        /// Attempt budget for the retry controller (overrides config)
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Step budget for the agent loop (overrides config)
        #[arg(long)]
        max_steps: Option<u32>,
    },

    /// Check a SQL string against the read-only policy
    Validate {
        /// SQL text to validate
        sql: String,
    },

    /// Describe the database schema
    Schema {
        /// SQLite database file (overrides config)
        #[arg(long)]
        database: Option<PathBuf>,

        /// Only describe these tables (comma-separated)
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,
    },

    /// Create or update the configuration file interactively
    Init {
        /// Write the per-user config instead of `.sqlwarden/config.json`
        #[arg(long)]
        global: bool,
    },

    /// Start MCP server (hidden from help, for AI agent integration)
    #[command(hide = true)]
    Mcp {
        /// SQLite database file (overrides config)
        #[arg(long)]
        database: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let envelope = match cli.command {
        Commands::Ask { question, agent, database, max_attempts, max_steps } => {
            let started = Instant::now();
            let result = async {
                let mut config = load_config(database)?;
                if let Some(max_attempts) = max_attempts {
                    config.retry.max_attempts = max_attempts;
                }
                if let Some(max_steps) = max_steps {
                    config.agent.max_steps = max_steps;
                }

                let gateway = Gateway::from_config(&config)?;
                let request = if agent { AskRequest::new(question).agent() } else { AskRequest::new(question) };
                gateway.ask(request).await
            }
            .await;
            respond(result, elapsed_ms(started.elapsed()))
        }

        Commands::Validate { sql } => {
            let started = Instant::now();
            let verdict = policy::validate(&sql);
            Envelope::from_result("validate", Ok(verdict), Metadata::new(elapsed_ms(started.elapsed())))
        }

        Commands::Schema { database, tables } => {
            let started = Instant::now();
            let result = describe_schema(database, &tables).await;
            Envelope::from_result("schema", result, Metadata::new(elapsed_ms(started.elapsed())))
        }

        Commands::Init { global } => {
            let started = Instant::now();
            let location = if global { ConfigLocation::Global } else { ConfigLocation::Local };
            let result = run_init(location);
            Envelope::from_result("init", result, Metadata::new(elapsed_ms(started.elapsed())))
        }

        Commands::Mcp { database } => {
            let config = match load_config(database) {
                Ok(config) => config,
                Err(e) => {
                    tracing::error!(error = %e, "Could not load configuration");
                    return ExitCode::FAILURE;
                }
            };

            return match McpServer::new(config).serve().await {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    tracing::error!(error = %e, "MCP server stopped");
                    ExitCode::FAILURE
                }
            };
        }
    };

    println!("{}", envelope.to_json());

    if envelope.status() == 200 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Logs go to stderr so stdout stays JSON-only
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

/// Config files by precedence, then the `--database` flag on top
fn load_config(database: Option<PathBuf>) -> Result<WardenConfig> {
    let mut config = config::load_with_precedence()?;
    if database.is_some() {
        config.database = database;
    }
    Ok(config)
}

async fn describe_schema(database: Option<PathBuf>, tables: &[String]) -> Result<serde_json::Value> {
    let config = load_config(database)?;
    let text = SqliteEngine::from_config(&config)?.describe().await?;

    let text = if tables.is_empty() {
        text
    } else {
        let requested: Vec<&str> = tables.iter().map(String::as_str).collect();
        filter_schema(&text, &requested)
    };

    Ok(serde_json::json!({ "schema": text }))
}

fn run_init(location: ConfigLocation) -> Result<serde_json::Value> {
    let path = location.path()?;
    let current = config::load_config(&path)?.unwrap_or_default();

    let updated = config::prompt_config(&current)?;
    config::save_config(&path, &updated)?;

    Ok(serde_json::json!({ "path": path.display().to_string(), "config": updated }))
}
