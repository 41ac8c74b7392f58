//! Tool-Use Loop
//!
//! A bounded ReAct-style loop. Each step the model sees the full transcript
//! and either asks for a tool (`list_tables`, `get_schema`, `run_sql`) or
//! gives a final answer. The system, never the model, writes observations:
//! generation stops at `Observation:` and anything past it is discarded.
//!
//! Tool and generator failures become error observations so one bad step
//! cannot end the loop. Running out of steps is a normal outcome.

use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::{with_deadline, AgentStep, ErrorKind, ErrorRecord, RequestContext, ResultAggregate};
use crate::engine::{filter_schema, table_names, Executor, SchemaProvider};
use crate::llm::Generator;
use crate::output::elapsed_ms;
use crate::policy;
use crate::prompts::{self, FINAL_ANSWER_MARKER, OBSERVATION_MARKER, THOUGHT_MARKER};

/// Appended to observations cut at the length cap
pub const TRUNCATION_MARKER: &str = "... [truncated]";

/// Final answer when the step budget runs out
pub const STEP_LIMIT_MESSAGE: &str =
    "Agent stopped after reaching the step limit without a final answer.";

const FORMAT_CORRECTION: &str = "Invalid format. Reply with 'Thought:' and then either \
'Action:' and 'Action Input:' lines, or 'Final Answer:'.";

static ACTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)Action:[ \t]*([A-Za-z_][A-Za-z0-9_]*)[ \t]*\r?\n[ \t]*Action Input:[ \t]*(.*)")
        .expect("action pattern is valid")
});

/// Bounded reasoning loop with tool dispatch
pub struct ToolLoop {
    generator: Arc<dyn Generator>,
    executor: Arc<dyn Executor>,
    schema: Arc<dyn SchemaProvider>,
    max_steps: u32,
    observation_max_chars: usize,
    call_timeout: Option<Duration>,
}

impl ToolLoop {
    pub fn new(
        generator: Arc<dyn Generator>,
        executor: Arc<dyn Executor>,
        schema: Arc<dyn SchemaProvider>,
        max_steps: u32,
    ) -> Self {
        Self {
            generator,
            executor,
            schema,
            max_steps,
            observation_max_chars: 2000,
            call_timeout: None,
        }
    }

    #[must_use]
    pub const fn with_observation_max_chars(mut self, max_chars: usize) -> Self {
        self.observation_max_chars = max_chars;
        self
    }

    #[must_use]
    pub const fn with_call_timeout(mut self, call_timeout: Option<Duration>) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Run the loop for one question; always returns an aggregate with a trace
    pub async fn run_tool_loop(&self, question: &str) -> ResultAggregate {
        let started = Instant::now();
        let mut aggregate = ResultAggregate::new(question);
        let mut ctx = RequestContext::default();
        let mut trace: Vec<AgentStep> = Vec::new();

        let max_steps = self.max_steps.max(1);
        for step in 1..=max_steps {
            aggregate.attempt_count = step;
            tracing::info!(step, max_steps, "Starting agent step");

            let prompt = prompts::agent_prompt(question, &trace);
            let raw = match with_deadline(self.call_timeout, "generator", self.generator.generate(&prompt)).await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(step, error = %e, "Generator failed during agent step");
                    aggregate.error_history.push(ErrorRecord::new(step, ErrorKind::GenerationFailure, e.message()));
                    trace.push(AgentStep {
                        observation: Some(format!("Error: {}", e.message())),
                        ..AgentStep::default()
                    });
                    continue;
                }
            };

            let text = cut_at_observation(&raw).trim_end().to_string();

            if let Some(answer) = final_answer(&text) {
                tracing::info!(step, "Agent reached a final answer");
                aggregate.final_answer = answer;
                trace.push(AgentStep { text, ..AgentStep::default() });
                aggregate.reasoning_trace = Some(trace);
                aggregate.elapsed_ms = elapsed_ms(started.elapsed());
                return aggregate;
            }

            let agent_step = match parse_action(&text) {
                Some((action, input)) => {
                    tracing::debug!(step, action = %action, "Dispatching tool call");
                    let observation = self.dispatch(step, &action, &input, &mut ctx, &mut aggregate).await;
                    AgentStep {
                        text,
                        action: Some(action),
                        action_input: Some(input),
                        observation: Some(truncate_observation(&observation, self.observation_max_chars)),
                    }
                }
                None if text.contains(THOUGHT_MARKER) => AgentStep { text, ..AgentStep::default() },
                None => {
                    tracing::debug!(step, "Model output had no action or thought, asking for correct format");
                    AgentStep { text, observation: Some(FORMAT_CORRECTION.to_string()), ..AgentStep::default() }
                }
            };
            trace.push(agent_step);
        }

        tracing::warn!(max_steps, "Agent step budget exhausted");
        aggregate.final_answer = STEP_LIMIT_MESSAGE.to_string();
        aggregate.reasoning_trace = Some(trace);
        aggregate.elapsed_ms = elapsed_ms(started.elapsed());
        aggregate
    }

    /// Run one tool call and describe the result as an observation
    async fn dispatch(
        &self,
        step: u32,
        action: &str,
        input: &str,
        ctx: &mut RequestContext,
        aggregate: &mut ResultAggregate,
    ) -> String {
        match action {
            "list_tables" => match ctx.schema(self.schema.as_ref(), self.call_timeout).await {
                Ok(schema) => {
                    let names = table_names(schema);
                    if names.is_empty() {
                        "No tables found".to_string()
                    } else {
                        names.join(", ")
                    }
                }
                Err(e) => tool_failure(step, e.message(), aggregate),
            },
            "get_schema" => match ctx.schema(self.schema.as_ref(), self.call_timeout).await {
                Ok(schema) => {
                    let requested: Vec<&str> = input.split(',').collect();
                    let filtered = filter_schema(schema, &requested);
                    if filtered.is_empty() {
                        format!("Error: No matching tables for '{}'. Use list_tables to see table names.", input.trim())
                    } else {
                        filtered
                    }
                }
                Err(e) => tool_failure(step, e.message(), aggregate),
            },
            "run_sql" => self.run_sql(step, input, aggregate).await,
            other => format!(
                "Error: Unknown action '{other}'. Available actions: list_tables, get_schema, run_sql"
            ),
        }
    }

    /// Validate, then execute; rejected SQL never reaches the executor
    async fn run_sql(&self, step: u32, input: &str, aggregate: &mut ResultAggregate) -> String {
        let sql = prompts::extract_sql(input);
        let verdict = policy::validate(&sql);

        aggregate.generated_query = sql.clone();
        aggregate.is_valid = verdict.valid;
        aggregate.validation_message = verdict.message.clone();

        if !verdict.valid {
            tracing::warn!(step, message = %verdict.message, "Agent SQL rejected by policy");
            aggregate
                .error_history
                .push(ErrorRecord::new(step, ErrorKind::PolicyViolation, &verdict.message));
            return format!("Error: Query rejected by policy: {}", verdict.message);
        }

        match with_deadline(self.call_timeout, "executor", self.executor.execute(&sql)).await {
            Ok(result) => {
                let observation = serde_json::to_string(&result.rows)
                    .unwrap_or_else(|e| format!("Error: Could not serialize rows: {e}"));
                aggregate.rows = Some(result.rows);
                observation
            }
            Err(e) => tool_failure(step, e.message(), aggregate),
        }
    }
}

/// Record an executor or schema failure and turn it into an observation
fn tool_failure(step: u32, message: String, aggregate: &mut ResultAggregate) -> String {
    tracing::warn!(step, message = %message, "Tool call failed");
    let observation = format!("Error: {message}");
    aggregate.error_history.push(ErrorRecord::new(step, ErrorKind::ExecutionFailure, message));
    observation
}

/// Drop anything the model wrote past the observation boundary
fn cut_at_observation(text: &str) -> &str {
    text.find(OBSERVATION_MARKER).map_or(text, |idx| &text[..idx])
}

fn final_answer(text: &str) -> Option<String> {
    text.find(FINAL_ANSWER_MARKER)
        .map(|idx| text[idx + FINAL_ANSWER_MARKER.len()..].trim().to_string())
}

/// `Action: <name>` followed on the next line by `Action Input: <payload>`
fn parse_action(text: &str) -> Option<(String, String)> {
    let caps = ACTION.captures(text)?;
    let action = caps.get(1)?.as_str().to_string();
    let input = caps.get(2).map_or("", |m| m.as_str()).trim();
    let input = input.trim_matches('"').trim();
    Some((action, input.to_string()))
}

/// Cap an observation at `max_chars` characters plus the truncation marker
fn truncate_observation(observation: &str, max_chars: usize) -> String {
    match observation.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &observation[..cut]),
        None => observation.to_string(),
    }
}
