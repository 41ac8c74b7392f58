//! Prompt Construction
//!
//! Builds every [`PromptContext`] the orchestrators send to the generator and
//! pulls SQL back out of free-form model text.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::engine::Row;
use crate::llm::PromptContext;
use crate::orchestrator::{AgentStep, ErrorRecord};

/// Marker the model uses to finish the tool loop
pub const FINAL_ANSWER_MARKER: &str = "Final Answer:";

/// Boundary where the system, not the model, supplies text
pub const OBSERVATION_MARKER: &str = "Observation:";

/// Marker for free reasoning text
pub const THOUGHT_MARKER: &str = "Thought:";

/// Rows included in the summary prompt
pub const SUMMARY_ROW_LIMIT: usize = 20;

const SQL_SYSTEM_PROMPT: &str = "You translate questions into SQLite queries.\n\
Rules:\n\
- Produce exactly one read-only SELECT statement.\n\
- Use only tables and columns listed in the schema.\n\
- Use LIMIT to restrict row counts, never TOP.\n\
- Do not use comments, UNION, or multiple statements.\n\
- Reply with the SQL only, no explanation.";

const SUMMARY_SYSTEM_PROMPT: &str = "You answer questions about database query results.\n\
Reply in one or two plain sentences using only the rows provided.";

const AGENT_SYSTEM_PROMPT: &str = "You answer questions about a SQLite database by calling tools.\n\
\n\
Tools:\n\
- list_tables: list the table names. Action Input is ignored.\n\
- get_schema: describe tables. Action Input is a comma-separated list of table names.\n\
- run_sql: run one read-only SELECT statement. Action Input is the SQL.\n\
\n\
Use this format for every step:\n\
Thought: what you want to do next\n\
Action: one of list_tables, get_schema, run_sql\n\
Action Input: the input for the action\n\
\n\
The system replies with an Observation. Never write an Observation yourself.\n\
When you know the answer, reply with:\n\
Thought: I know the answer\n\
Final Answer: the answer in plain language";

static FENCED_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n(.*?)```").expect("fence pattern is valid")
});

static INLINE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(.*?)```").expect("inline fence pattern is valid"));

static SQL_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*sql\s*:\s*").expect("label pattern is valid"));

/// Prompt for one Retry Controller attempt
///
/// Every prior failure is listed, oldest first, with its corrective hint.
pub fn sql_prompt(schema: &str, question: &str, history: &[ErrorRecord]) -> PromptContext {
    let mut user = format!("Schema:\n{schema}\n\nQuestion: {question}\n");

    if !history.is_empty() {
        user.push_str("\nPrevious attempts failed. Avoid repeating these mistakes:\n");
        for (idx, record) in history.iter().enumerate() {
            user.push_str(&format!(
                "{}. Attempt {} ({}): {}\n",
                idx + 1,
                record.attempt,
                record.kind,
                record.message
            ));
            if let Some(hint) = &record.hint {
                user.push_str(&format!("   Hint: {hint}\n"));
            }
        }
    }

    user.push_str("\nSQL:");
    PromptContext::new(SQL_SYSTEM_PROMPT, user)
}

/// Prompt asking for a plain-language answer from executed rows
pub fn summary_prompt(question: &str, sql: &str, rows: &[Row]) -> PromptContext {
    let shown = &rows[..rows.len().min(SUMMARY_ROW_LIMIT)];
    let rows_json = serde_json::to_string(shown).unwrap_or_else(|_| "[]".to_string());

    let mut user = format!("Question: {question}\nSQL: {sql}\nRows ({} total): {rows_json}", rows.len());
    if rows.len() > shown.len() {
        user.push_str(&format!("\n(only the first {} rows are shown)", shown.len()));
    }
    user.push_str("\n\nAnswer:");

    PromptContext::new(SUMMARY_SYSTEM_PROMPT, user)
}

/// Prompt for the next tool-loop step: instructions, question, full transcript
pub fn agent_prompt(question: &str, trace: &[AgentStep]) -> PromptContext {
    PromptContext::new(AGENT_SYSTEM_PROMPT, agent_transcript(question, trace))
        .with_stop(OBSERVATION_MARKER)
}

/// Serialize the question and every prior step
pub fn agent_transcript(question: &str, trace: &[AgentStep]) -> String {
    let mut transcript = format!("Question: {question}\n");

    for step in trace {
        let text = step.text.trim();
        if !text.is_empty() {
            transcript.push('\n');
            transcript.push_str(text);
        }
        if let Some(observation) = &step.observation {
            transcript.push_str(&format!("\n{OBSERVATION_MARKER} {observation}"));
        }
        transcript.push('\n');
    }

    transcript
}

/// Pull the SQL statement out of model text
///
/// Strips Markdown code fences, a leading `SQL:` label and surrounding
/// whitespace. Returns an empty string when nothing is left.
#[must_use]
pub fn extract_sql(text: &str) -> String {
    let body = FENCED_BLOCK
        .captures(text)
        .or_else(|| INLINE_FENCE.captures(text))
        .and_then(|caps| caps.get(1))
        .map_or(text, |m| m.as_str());

    // Unterminated fence
    let body = body.trim().trim_start_matches("```").trim_end_matches("```");
    let body = body.strip_prefix("sql\n").unwrap_or(body);

    SQL_LABEL.replace(body, "").trim().to_string()
}
