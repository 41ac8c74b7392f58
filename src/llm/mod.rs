//! Generator Collaborator
//!
//! The [`Generator`] trait turns a prompt into text. The orchestrators use it
//! both for candidate SQL and for reasoning/answer text, and never assume
//! anything about how the text is produced.
//!
//! [`ChatGenerator`] is the bundled implementation, speaking the
//! OpenAI-compatible `/chat/completions` protocol over `reqwest`. It performs
//! exactly one HTTP call per `generate`; all retrying happens in the
//! orchestrators.

use async_trait::async_trait;

use crate::config::LlmConfig;
use crate::error::{Result, WardenError};

pub mod models;

pub use models::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage};

/// Prompt handed to a [`Generator`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptContext {
    /// System instructions
    pub system: String,

    /// User turn (question, schema, transcript)
    pub user: String,

    /// Sequences at which generation must stop
    pub stop: Vec<String>,
}

impl PromptContext {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self { system: system.into(), user: user.into(), stop: Vec::new() }
    }

    #[must_use]
    pub fn with_stop(mut self, stop: impl Into<String>) -> Self {
        self.stop.push(stop.into());
        self
    }
}

/// Produces text from a prompt
///
/// Implementations report transport and model failures as
/// `WardenError::GenerationFailed` and must not retry internally.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, ctx: &PromptContext) -> Result<String>;
}

/// OpenAI-compatible chat-completions generator
#[derive(Clone)]
pub struct ChatGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl std::fmt::Debug for ChatGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // api_key deliberately omitted
        f.debug_struct("ChatGenerator")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

impl ChatGenerator {
    /// Create a generator for `base_url` (e.g. `https://api.openai.com/v1`)
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    /// Create a generator from the `llm` config section and a resolved key
    pub fn from_config(config: &LlmConfig, api_key: impl Into<String>) -> Self {
        Self::new(&config.base_url, &config.model, api_key)
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens)
    }

    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    fn build_request(&self, ctx: &PromptContext) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::system(&ctx.system), ChatMessage::user(&ctx.user)],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stop: if ctx.stop.is_empty() { None } else { Some(ctx.stop.clone()) },
        }
    }
}

#[async_trait]
impl Generator for ChatGenerator {
    async fn generate(&self, ctx: &PromptContext) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = self.build_request(ctx);

        tracing::debug!(model = %self.model, url = %url, "Sending chat completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| WardenError::generation_failed(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WardenError::generation_failed(format!(
                "Model endpoint returned {status}: {body}"
            )));
        }

        let completion: ChatCompletionResponse = response.json().await.map_err(|e| {
            WardenError::generation_failed(format!("Failed to decode chat completion: {e}"))
        })?;

        completion
            .first_content()
            .map(ToString::to_string)
            .ok_or_else(|| WardenError::generation_failed("Chat completion contained no content"))
    }
}
