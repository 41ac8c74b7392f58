//! Configuration Management
//!
//! This module handles loading and saving the sqlwarden configuration.
//!
//! # Configuration Locations
//! - Local: `.sqlwarden/config.json` (team-shareable, per-project)
//! - Global: `~/.config/sqlwarden/config.json` (per-user)
//!
//! # Resolution Precedence
//! 1. Explicit CLI flags (highest priority, applied by the caller)
//! 2. Local config file (`.sqlwarden/config.json`)
//! 3. Global config file (`~/.config/sqlwarden/config.json`)
//! 4. Built-in defaults
//!
//! A local file replaces the global file entirely; the two are not merged
//! field by field. Every field has a serde default, so partial files are fine.
//!
//! # Secrets
//! The model API key is never stored. The config names the environment
//! variable that holds it (`llm.api_key_env`), resolved at startup by
//! [`LlmConfig::resolve_api_key`].

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, WardenError};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    /// Path to the `SQLite` database file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,

    /// Model endpoint settings
    pub llm: LlmConfig,

    /// Retry Controller settings
    pub retry: RetryConfig,

    /// Tool-Use Loop settings
    pub agent: AgentConfig,

    /// Optional deadline for every generator, executor and schema call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_timeout_ms: Option<u64>,

    /// Optional row cap applied by the executor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_rows: Option<usize>,
}

/// OpenAI-compatible model endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL, without the `/chat/completions` suffix
    pub base_url: String,

    /// Model identifier
    pub model: String,

    /// Name of the environment variable holding the API key
    pub api_key_env: String,

    /// Sampling temperature
    pub temperature: f32,

    /// Completion token cap
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.0,
            max_tokens: 1024,
        }
    }
}

impl LlmConfig {
    /// Read the API key from the environment variable named by `api_key_env`
    pub fn resolve_api_key(&self) -> Result<String> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            Ok(_) => Err(WardenError::config_error(format!(
                "Environment variable {} is empty",
                self.api_key_env
            ))),
            Err(_) => Err(WardenError::config_error(format!(
                "Environment variable {} not found for API key",
                self.api_key_env
            ))),
        }
    }
}

/// Retry Controller budget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum generation attempts per request
    pub max_attempts: u32,

    /// Base of the exponential backoff, in milliseconds
    pub backoff_base_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 4, backoff_base_ms: 500 }
    }
}

/// Tool-Use Loop budget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Maximum reasoning steps per request
    pub max_steps: u32,

    /// Observation length cap, in characters
    pub observation_max_chars: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self { max_steps: 10, observation_max_chars: 2000 }
    }
}

impl WardenConfig {
    /// Per-call deadline, if configured
    #[must_use]
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    /// Database path or a config error telling the user how to set one
    pub fn database_path(&self) -> Result<&Path> {
        self.database.as_deref().ok_or_else(|| {
            WardenError::config_error(
                "No database configured. Pass --database or run 'sqlwarden init'.",
            )
        })
    }
}

/// Configuration file location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLocation {
    /// Local config: `.sqlwarden/config.json` (team-shareable)
    Local,
    /// Global config: `~/.config/sqlwarden/config.json` (per-user)
    Global,
}

impl ConfigLocation {
    pub fn path(self) -> Result<PathBuf> {
        match self {
            Self::Local => local_config_path(),
            Self::Global => global_config_path(),
        }
    }
}

/// Get path to local config file (`.sqlwarden/config.json`)
pub fn local_config_path() -> Result<PathBuf> {
    let current_dir = std::env::current_dir().map_err(|e| {
        WardenError::config_error(format!("Could not determine current directory: {e}"))
    })?;

    Ok(current_dir.join(".sqlwarden").join("config.json"))
}

/// Get path to global config file (`~/.config/sqlwarden/config.json`)
pub fn global_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| WardenError::config_error("Could not determine user config directory"))?;

    Ok(config_dir.join("sqlwarden").join("config.json"))
}

/// Load a config file, or `None` if it does not exist
pub fn load_config(path: &Path) -> Result<Option<WardenConfig>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = fs::read_to_string(path)
        .map_err(|e| WardenError::config_error(format!("Could not read config file: {e}")))?;

    serde_json::from_str::<WardenConfig>(&contents).map(Some).map_err(|e| {
        WardenError::config_error(format!(
            "Invalid config file format in {}: {e}",
            path.display()
        ))
    })
}

/// Save a config file as pretty JSON, creating parent directories
pub fn save_config(path: &Path, config: &WardenConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            WardenError::config_error(format!("Could not create config directory: {e}"))
        })?;
    }

    let contents = serde_json::to_string_pretty(config)
        .map_err(|e| WardenError::config_error(format!("Could not serialize config: {e}")))?;

    fs::write(path, contents)
        .map_err(|e| WardenError::config_error(format!("Could not write config file: {e}")))?;

    Ok(())
}

/// Load from explicit paths: the first existing file wins, else defaults
pub fn load_from(local_path: &Path, global_path: &Path) -> Result<WardenConfig> {
    if let Some(config) = load_config(local_path)? {
        tracing::debug!(path = %local_path.display(), "Loaded local config");
        return Ok(config);
    }

    if let Some(config) = load_config(global_path)? {
        tracing::debug!(path = %global_path.display(), "Loaded global config");
        return Ok(config);
    }

    tracing::debug!("No config file found, using defaults");
    Ok(WardenConfig::default())
}

/// Load configuration with precedence (local first, then global, then defaults)
pub fn load_with_precedence() -> Result<WardenConfig> {
    load_from(&local_config_path()?, &global_config_path()?)
}

/// Ask the user for each setting, starting from `current`
///
/// Used by `sqlwarden init`. Requires an interactive terminal.
pub fn prompt_config(current: &WardenConfig) -> Result<WardenConfig> {
    use dialoguer::Input;

    let prompt_error = |e: dialoguer::Error| WardenError::config_error(format!("Prompt failed: {e}"));

    let database: String = Input::new()
        .with_prompt("SQLite database file")
        .allow_empty(true)
        .with_initial_text(
            current.database.as_ref().map(|p| p.display().to_string()).unwrap_or_default(),
        )
        .interact_text()
        .map_err(prompt_error)?;

    let base_url: String = Input::new()
        .with_prompt("Model endpoint base URL")
        .default(current.llm.base_url.clone())
        .interact_text()
        .map_err(prompt_error)?;

    let model: String = Input::new()
        .with_prompt("Model name")
        .default(current.llm.model.clone())
        .interact_text()
        .map_err(prompt_error)?;

    let api_key_env: String = Input::new()
        .with_prompt("Environment variable holding the API key")
        .default(current.llm.api_key_env.clone())
        .interact_text()
        .map_err(prompt_error)?;

    let max_attempts: u32 = Input::new()
        .with_prompt("Maximum generation attempts")
        .default(current.retry.max_attempts)
        .interact_text()
        .map_err(prompt_error)?;

    let max_steps: u32 = Input::new()
        .with_prompt("Maximum agent steps")
        .default(current.agent.max_steps)
        .interact_text()
        .map_err(prompt_error)?;

    let mut config = current.clone();
    config.database = Some(PathBuf::from(database.trim())).filter(|p| !p.as_os_str().is_empty());
    config.llm.base_url = base_url.trim().to_string();
    config.llm.model = model.trim().to_string();
    config.llm.api_key_env = api_key_env.trim().to_string();
    config.retry.max_attempts = max_attempts;
    config.agent.max_steps = max_steps;

    validate_config(&config)?;
    Ok(config)
}

/// Reject budgets that would make the orchestrators do nothing
pub fn validate_config(config: &WardenConfig) -> Result<()> {
    if config.retry.max_attempts == 0 {
        return Err(WardenError::config_error("retry.max_attempts must be at least 1"));
    }
    if config.agent.max_steps == 0 {
        return Err(WardenError::config_error("agent.max_steps must be at least 1"));
    }
    if config.agent.observation_max_chars == 0 {
        return Err(WardenError::config_error("agent.observation_max_chars must be at least 1"));
    }
    if config.llm.api_key_env.trim().is_empty() {
        return Err(WardenError::config_error("llm.api_key_env cannot be empty"));
    }
    Ok(())
}
