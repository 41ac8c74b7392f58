//! Query Policy Validation
//!
//! This module implements the read-only policy sandbox every candidate query
//! passes through before it may reach an executor.
//!
//! # Validation Strategy
//! - Pattern matching over the query text (no SQL parsing)
//! - Whole-word, case-insensitive keyword matching so identifiers such as
//!   `created_at` never trip the `CREATE` rule
//! - Fixed precedence: the first failing check decides the verdict
//! - Only statements that begin with `SELECT` are permitted
//!
//! # Check Order
//! 1. Empty query
//! 2. Forbidden keywords ([`BLOCKED_KEYWORDS`])
//! 3. `UPDATE` (two diagnostics depending on a following `WHERE`)
//! 4. `DELETE` (same two-branch shape)
//! 5. Injection patterns (chaining, tautologies, `UNION SELECT`, comments)
//! 6. Read-only prefix
//! 7. Multiple statements
//!
//! Every input produces exactly one [`Verdict`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WardenError};

/// Message carried by every accepted verdict
pub const VALID_MESSAGE: &str = "Query is valid";

/// Structural and administrative keywords rejected anywhere in a query
///
/// Checked in this order; the first whole-word match is reported.
pub const BLOCKED_KEYWORDS: &[&str] = &[
    // Schema mutation
    "DROP", "CREATE", "ALTER", "TRUNCATE", "RENAME",
    // Privileges
    "GRANT", "REVOKE",
    // Execution control
    "EXEC", "EXECUTE", "CALL",
    // Bulk operations
    "INSERT", "MERGE", "COPY", "BULK",
    // Session control
    "ATTACH", "DETACH", "PRAGMA", "VACUUM", "REINDEX", "SHUTDOWN", "KILL",
];

const EMPTY_MESSAGE: &str = "Query cannot be empty";
const READ_ONLY_MESSAGE: &str = "Only read-only SELECT queries are allowed";
const MULTIPLE_STATEMENTS_MESSAGE: &str = "Multiple statements are not allowed";

/// Result of validating one candidate query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    /// Whether the query may be executed
    pub valid: bool,

    /// Fixed confirmation when valid, otherwise the violated rule
    pub message: String,
}

impl Verdict {
    /// Accepting verdict with the fixed confirmation message
    #[must_use]
    pub fn accept() -> Self {
        Self { valid: true, message: VALID_MESSAGE.to_string() }
    }

    /// Rejecting verdict naming the violated rule
    pub fn reject(message: impl Into<String>) -> Self {
        Self { valid: false, message: message.into() }
    }

    /// Convert into a `Result`, mapping rejection to [`WardenError::PolicyViolation`]
    pub fn into_result(self) -> Result<()> {
        if self.valid {
            Ok(())
        } else {
            Err(WardenError::policy_violation(self.message))
        }
    }
}

/// Compiled pattern tables, built once per process
struct PolicyPatterns {
    blocked: Vec<(&'static str, Regex)>,
    update: Regex,
    delete: Regex,
    where_clause: Regex,
    injection: Vec<(&'static str, Regex)>,
    read_only: Regex,
    chained: Regex,
}

static PATTERNS: Lazy<PolicyPatterns> = Lazy::new(PolicyPatterns::compile);

impl PolicyPatterns {
    fn compile() -> Self {
        let blocked =
            BLOCKED_KEYWORDS.iter().map(|keyword| (*keyword, whole_word(keyword))).collect();

        let injection = vec![
            (
                "statement chaining before a modifying keyword",
                pattern(
                    r"(?i);\s*(DROP|DELETE|UPDATE|INSERT|ALTER|CREATE|TRUNCATE|EXEC|EXECUTE|MERGE|GRANT|REVOKE|REPLACE|UPSERT|LOAD)\b",
                ),
            ),
            ("OR tautology", pattern(r"(?i)'\s*\bOR\b\s*'")),
            ("AND tautology", pattern(r"(?i)'\s*\bAND\b\s*'")),
            ("UNION SELECT", pattern(r"(?is)\bUNION\b.*\bSELECT\b")),
            ("line comment", pattern(r"--")),
            ("block comment", pattern(r"/\*")),
        ];

        Self {
            blocked,
            update: whole_word("UPDATE"),
            delete: whole_word("DELETE"),
            where_clause: whole_word("WHERE"),
            injection,
            read_only: pattern(r"(?i)^SELECT\b"),
            chained: pattern(r";\s*\S"),
        }
    }
}

fn whole_word(keyword: &str) -> Regex {
    pattern(&format!(r"(?i)\b{keyword}\b"))
}

fn pattern(source: &str) -> Regex {
    Regex::new(source).expect("policy patterns are static and valid")
}

/// Validate a candidate query against the read-only policy
///
/// Total and deterministic: the same text always yields the same verdict.
#[must_use]
pub fn validate(sql: &str) -> Verdict {
    if sql.trim().is_empty() {
        return Verdict::reject(EMPTY_MESSAGE);
    }

    let patterns = &*PATTERNS;

    if let Some((keyword, _)) = patterns.blocked.iter().find(|(_, re)| re.is_match(sql)) {
        return Verdict::reject(format!("Forbidden keyword detected: {keyword}"));
    }

    if let Some(verdict) = check_modification(sql, &patterns.update, &patterns.where_clause, "UPDATE")
    {
        return verdict;
    }

    if let Some(verdict) = check_modification(sql, &patterns.delete, &patterns.where_clause, "DELETE")
    {
        return verdict;
    }

    if let Some((category, _)) = patterns.injection.iter().find(|(_, re)| re.is_match(sql)) {
        return Verdict::reject(format!("Potential SQL injection detected: {category}"));
    }

    if !patterns.read_only.is_match(sql.trim()) {
        return Verdict::reject(READ_ONLY_MESSAGE);
    }

    if patterns.chained.is_match(sql) {
        return Verdict::reject(MULTIPLE_STATEMENTS_MESSAGE);
    }

    Verdict::accept()
}

/// Row modification is always rejected; a `WHERE` after the keyword only
/// changes which diagnostic is reported.
fn check_modification(
    sql: &str,
    keyword_re: &Regex,
    where_re: &Regex,
    keyword: &str,
) -> Option<Verdict> {
    let found = keyword_re.find(sql)?;

    if where_re.is_match(&sql[found.end()..]) {
        Some(Verdict::reject(format!(
            "Data modification is not permitted: {keyword} statements are not allowed"
        )))
    } else {
        Some(Verdict::reject(format!("{keyword} statement requires a WHERE clause")))
    }
}
