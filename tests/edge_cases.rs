//! Policy Validator Edge Case Tests
//!
//! This module exercises the boundaries of the read-only policy:
//! - Keyword matching across case, position and identifier substrings
//! - Precedence between overlapping rules
//! - Whitespace, semicolons and statement shape
//! - Text-level matching inside string literals
//! - Unicode and very large inputs

use pretty_assertions::assert_eq;
use sqlwarden::policy::{validate, BLOCKED_KEYWORDS, VALID_MESSAGE};

fn rejection(sql: &str) -> String {
    let verdict = validate(sql);
    assert!(!verdict.valid, "expected rejection for {sql:?}");
    verdict.message
}

fn assert_valid(sql: &str) {
    let verdict = validate(sql);
    assert!(verdict.valid, "expected {sql:?} to be valid, got: {}", verdict.message);
    assert_eq!(verdict.message, VALID_MESSAGE);
}

// ============================================================================
// Keyword Matching
// ============================================================================

#[test]
fn test_every_blocked_keyword_in_every_case() {
    for keyword in BLOCKED_KEYWORDS {
        let lower = keyword.to_lowercase();
        let mixed = format!("{}{}", &keyword[..1], &lower[1..]);

        for variant in [keyword.to_string(), lower.clone(), mixed] {
            let sql = format!("SELECT a FROM t WHERE b = 1 {variant}");
            assert_eq!(rejection(&sql), format!("Forbidden keyword detected: {keyword}"));
        }
    }
}

#[test]
fn test_keyword_substrings_in_identifiers_are_allowed() {
    assert_valid(
        "SELECT dropped, created_at, altered, truncated_at, renamed, granted, revoked, \
         executor, called_by, inserted_by, merged, copy_count, bulky, attached, detached, \
         pragmatic, vacuumed, reindexed, killed, updated_at, deleted_flag FROM audit_log",
    );
}

#[test]
fn test_keyword_inside_string_literal_is_still_rejected() {
    // Matching is textual; literals get no special treatment
    assert_eq!(
        rejection("SELECT * FROM notes WHERE body = 'please drop by'"),
        "Forbidden keyword detected: DROP"
    );
}

#[test]
fn test_exec_does_not_shadow_execute() {
    assert_eq!(rejection("EXECUTE sp_who"), "Forbidden keyword detected: EXECUTE");
    assert_eq!(rejection("exec sp_who"), "Forbidden keyword detected: EXEC");
}

#[test]
fn test_blocked_keyword_on_a_later_line() {
    assert_eq!(
        rejection("SELECT *\nFROM users;\nDROP TABLE users"),
        "Forbidden keyword detected: DROP"
    );
}

// ============================================================================
// Rule Precedence
// ============================================================================

#[test]
fn test_blocked_keyword_beats_modification() {
    assert_eq!(
        rejection("INSERT INTO t SELECT * FROM u; DELETE FROM u"),
        "Forbidden keyword detected: INSERT"
    );
}

#[test]
fn test_update_beats_delete() {
    assert_eq!(
        rejection("UPDATE t SET a = 1 WHERE id IN (SELECT id FROM u); DELETE FROM u"),
        "Data modification is not permitted: UPDATE statements are not allowed"
    );
}

#[test]
fn test_delete_across_lines() {
    assert_eq!(
        rejection("delete\nfrom sessions\nwhere expired = 1"),
        "Data modification is not permitted: DELETE statements are not allowed"
    );
    assert_eq!(rejection("delete from sessions"), "DELETE statement requires a WHERE clause");
}

#[test]
fn test_modification_beats_injection() {
    assert_eq!(
        rejection("SELECT 1; UPDATE t SET a = 1"),
        "UPDATE statement requires a WHERE clause"
    );
}

#[test]
fn test_injection_beats_read_only_prefix() {
    assert_eq!(
        rejection("WITH x AS (SELECT 1) SELECT * FROM x -- note"),
        "Potential SQL injection detected: line comment"
    );
}

// ============================================================================
// Injection Patterns
// ============================================================================

#[test]
fn test_chaining_into_non_blocklisted_modifiers() {
    for sql in [
        "SELECT 1; replace into t values (1)",
        "SELECT 1; UPSERT t VALUES (1)",
        "SELECT 1;\n  LOAD DATA LOCAL INFILE 'x' INTO TABLE t",
    ] {
        assert_eq!(
            rejection(sql),
            "Potential SQL injection detected: statement chaining before a modifying keyword"
        );
    }
}

#[test]
fn test_replace_function_is_allowed() {
    assert_valid("SELECT replace(name, 'a', 'b') AS cleaned FROM users");
}

#[test]
fn test_tautologies_in_any_case() {
    assert_eq!(
        rejection("SELECT * FROM users WHERE name = '' or '1'='1'"),
        "Potential SQL injection detected: OR tautology"
    );
    assert_eq!(
        rejection("SELECT * FROM users WHERE name = 'x' AND 'y'='y'"),
        "Potential SQL injection detected: AND tautology"
    );
}

#[test]
fn test_tautologies_without_spacing() {
    assert_eq!(
        rejection("SELECT * FROM users WHERE name = 'x'OR'1'='1'"),
        "Potential SQL injection detected: OR tautology"
    );
    assert_eq!(
        rejection("SELECT * FROM users WHERE name = '' OR''=''"),
        "Potential SQL injection detected: OR tautology"
    );
    assert_eq!(
        rejection("SELECT * FROM users WHERE name = 'x'and'y'='y'"),
        "Potential SQL injection detected: AND tautology"
    );
    assert_valid("SELECT * FROM users WHERE name = 'a' OR name = 'b'");
}

#[test]
fn test_union_select_across_lines() {
    assert_eq!(
        rejection("SELECT name FROM users\nUNION\nSELECT password FROM secrets"),
        "Potential SQL injection detected: UNION SELECT"
    );
}

#[test]
fn test_comment_markers_anywhere() {
    assert_eq!(
        rejection("SELECT '--' AS dashes"),
        "Potential SQL injection detected: line comment"
    );
    assert_eq!(
        rejection("SELECT a/*hidden*/ FROM t"),
        "Potential SQL injection detected: block comment"
    );
    assert_valid("SELECT 10 / 2 * 3 AS n");
}

// ============================================================================
// Statement Shape
// ============================================================================

#[test]
fn test_leading_and_trailing_whitespace() {
    assert_valid("  \n\tselect 1");
    assert_valid("SELECT\n*\nFROM users\n");
    assert_valid("SELECT 1 ;   \n");
}

#[test]
fn test_select_prefix_needs_a_word_boundary() {
    assert_valid("SELECT");
    assert_eq!(rejection("SELECTED FROM t"), "Only read-only SELECT queries are allowed");
    assert_eq!(rejection("(SELECT 1)"), "Only read-only SELECT queries are allowed");
}

#[test]
fn test_semicolon_shapes() {
    assert_eq!(rejection("SELECT 1;;"), "Multiple statements are not allowed");
    assert_eq!(rejection("SELECT 1; SELECT 2"), "Multiple statements are not allowed");
    // Semicolons inside literals count too
    assert_eq!(
        rejection("SELECT * FROM t WHERE a = 'x;y'"),
        "Multiple statements are not allowed"
    );
}

#[test]
fn test_unicode_whitespace_only_is_empty() {
    assert_eq!(rejection("\u{3000}\u{a0}\n"), "Query cannot be empty");
}

// ============================================================================
// Unusual Inputs
// ============================================================================

#[test]
fn test_unicode_identifiers_and_literals() {
    assert_valid("SELECT 'héllo wörld' AS grüße, 名前 FROM 顧客");
}

#[test]
fn test_very_long_query() {
    let columns: Vec<String> = (0..10_000).map(|i| format!("c{i}")).collect();
    let sql = format!("SELECT {} FROM wide_table", columns.join(", "));
    assert_valid(&sql);

    let sql = format!("{sql}; DROP TABLE wide_table");
    assert_eq!(rejection(&sql), "Forbidden keyword detected: DROP");
}

#[test]
fn test_verdicts_are_deterministic() {
    for sql in ["SELECT 1", "DELETE FROM t", "SELECT 1 -- x", "", "SHOW TABLES"] {
        let first = validate(sql);
        for _ in 0..3 {
            assert_eq!(validate(sql), first);
        }
    }
}

#[test]
fn test_rejection_converts_to_policy_violation() {
    let err = validate("VACUUM").into_result().unwrap_err();
    assert_eq!(err.error_code(), "POLICY_VIOLATION");
    assert_eq!(err.message(), "Policy violation: Forbidden keyword detected: VACUUM");

    assert!(validate("SELECT 1").into_result().is_ok());
}
