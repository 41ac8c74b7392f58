//! Retry Controller
//!
//! Generate → validate → execute → summarize, repeated until an attempt
//! succeeds or the attempt budget runs out. Every failure, whatever its class,
//! is appended to the error history and the next generation sees the whole
//! history. Attempts are separated by an exponential backoff delay.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::{
    corrective_hint, with_deadline, CandidateQuery, ErrorKind, ErrorRecord, ResultAggregate,
};
use crate::engine::{Executor, Row, SchemaProvider};
use crate::error::{Result, WardenError};
use crate::llm::Generator;
use crate::output::elapsed_ms;
use crate::policy;
use crate::prompts;

/// Answer used when the summarizer fails or returns nothing
#[must_use]
pub fn fallback_summary(row_count: usize) -> String {
    format!("Query executed successfully and returned {row_count} rows.")
}

/// Attempt budget and backoff base
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 4, backoff_base: Duration::from_millis(500) }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.backoff_base.saturating_mul(1u32 << exponent)
    }
}

/// Bounded regenerate-until-valid loop
pub struct RetryController {
    generator: Arc<dyn Generator>,
    executor: Arc<dyn Executor>,
    schema: Arc<dyn SchemaProvider>,
    policy: RetryPolicy,
    call_timeout: Option<Duration>,
}

/// How one attempt ended
enum Outcome {
    Answered { sql: String, rows: Vec<Row> },
    Failed(ErrorRecord),
}

impl RetryController {
    pub fn new(
        generator: Arc<dyn Generator>,
        executor: Arc<dyn Executor>,
        schema: Arc<dyn SchemaProvider>,
        policy: RetryPolicy,
    ) -> Self {
        Self { generator, executor, schema, policy, call_timeout: None }
    }

    #[must_use]
    pub const fn with_call_timeout(mut self, call_timeout: Option<Duration>) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Run the loop for one question
    ///
    /// The schema is loaded once, before the first attempt; failing to load
    /// it is the only error this returns.
    pub async fn run_with_retry(&self, question: &str) -> Result<ResultAggregate> {
        let started = Instant::now();
        let mut aggregate = ResultAggregate::new(question);

        let schema = with_deadline(self.call_timeout, "schema provider", self.schema.describe())
            .await
            .map_err(|e| match e {
                WardenError::SchemaUnavailable(_) => e,
                other => WardenError::schema_unavailable(other.message()),
            })?;

        let max_attempts = self.policy.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            aggregate.attempt_count = attempt;
            tracing::info!(attempt, max_attempts, "Starting generation attempt");

            match self.attempt(attempt, question, &schema, &mut aggregate).await {
                Outcome::Answered { sql, rows } => {
                    aggregate.final_answer = self.summarize(question, &sql, &rows).await;
                    aggregate.rows = Some(rows);
                    aggregate.elapsed_ms = elapsed_ms(started.elapsed());
                    tracing::info!(attempt, "Request answered");
                    return Ok(aggregate);
                }
                Outcome::Failed(record) => {
                    tracing::warn!(attempt, kind = %record.kind, message = %record.message, "Attempt failed");
                    aggregate.error_history.push(record);
                }
            }

            if attempt < max_attempts {
                let delay = self.policy.delay_for(attempt);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Backing off");
                tokio::time::sleep(delay).await;
            }
        }

        let last = aggregate
            .error_history
            .last()
            .map_or_else(|| "unknown error".to_string(), |record| record.message.clone());
        let message = format!("Failed after {max_attempts} attempts. Last error: {last}");

        tracing::warn!(attempts = max_attempts, "Attempt budget exhausted");
        aggregate.final_answer = format!("Unable to answer the question: {message}");
        aggregate.error_message = Some(message);
        aggregate.elapsed_ms = elapsed_ms(started.elapsed());
        Ok(aggregate)
    }

    /// One pass of generate → validate → execute
    async fn attempt(
        &self,
        attempt: u32,
        question: &str,
        schema: &str,
        aggregate: &mut ResultAggregate,
    ) -> Outcome {
        let prompt = prompts::sql_prompt(schema, question, &aggregate.error_history);

        let text = match with_deadline(self.call_timeout, "generator", self.generator.generate(&prompt)).await {
            Ok(text) => text,
            Err(e) => {
                return Outcome::Failed(ErrorRecord::new(attempt, ErrorKind::GenerationFailure, e.message()))
            }
        };

        let sql = prompts::extract_sql(&text);
        if sql.is_empty() {
            return Outcome::Failed(ErrorRecord::new(
                attempt,
                ErrorKind::GenerationFailure,
                "Generator returned no SQL",
            ));
        }

        let candidate = CandidateQuery { text: sql, attempt };
        tracing::debug!(attempt = candidate.attempt, sql = %candidate.text, "Validating candidate");

        let verdict = policy::validate(&candidate.text);
        aggregate.generated_query = candidate.text.clone();
        aggregate.is_valid = verdict.valid;
        aggregate.validation_message = verdict.message.clone();

        if !verdict.valid {
            return Outcome::Failed(ErrorRecord::new(attempt, ErrorKind::PolicyViolation, verdict.message));
        }

        match with_deadline(self.call_timeout, "executor", self.executor.execute(&candidate.text)).await {
            Ok(result) => Outcome::Answered { sql: candidate.text, rows: result.rows },
            Err(e) => {
                let message = e.message();
                let mut record = ErrorRecord::new(attempt, ErrorKind::ExecutionFailure, &message);
                if let Some(hint) = corrective_hint(&message, &candidate.text) {
                    record = record.with_hint(hint);
                }
                Outcome::Failed(record)
            }
        }
    }

    /// Best-effort plain-language answer; never fails
    async fn summarize(&self, question: &str, sql: &str, rows: &[Row]) -> String {
        let prompt = prompts::summary_prompt(question, sql, rows);

        match with_deadline(self.call_timeout, "summarizer", self.generator.generate(&prompt)).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => fallback_summary(rows.len()),
            Err(e) => {
                tracing::warn!(error = %e, "Summarizer failed, using fallback answer");
                fallback_summary(rows.len())
            }
        }
    }
}
