//! Syntactic safety checks for user-supplied SQL fragments.
//!
//! Identifiers cannot be bound as parameters, so every table/column name and
//! every free-form expression is screened before it is spliced into a
//! statement. This is a blocklist: it rejects known-dangerous shapes and does
//! not know which tables or columns actually exist.
//!
//! Field classes:
//!   - identifiers: `[A-Za-z0-9_.]+`
//!   - expressions / literal values: no terminators, no comment markers, no
//!     forbidden keywords
//!   - operators: fixed allow-list, case-insensitive

use crate::error::{PipelineError, Result};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

/// Accept only letters, digits, underscore and dot.
pub fn check_identifier(field: &str, value: &str) -> Result<()> {
    if value.is_empty() || !value.chars().all(is_identifier_char) {
        return Err(PipelineError::validation(
            field,
            format!("invalid identifier `{value}`"),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

/// Statement terminators and comment openers.
const FORBIDDEN_MARKERS: &[&str] = &[";", "--", "/*"];

/// Matched against the uppercased fragment. The DML keywords carry a trailing
/// space so column names such as `created_at` or `updated_by` still pass.
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "SELECT ",
    "INSERT ",
    "UPDATE ",
    "DELETE ",
    "DROP ",
    "ALTER ",
    "CREATE ",
    "TRUNCATE",
    "EXEC",
    "UNION",
    "INTO",
    "MERGE",
    "EXECUTE",
];

/// Reject expressions that could end the statement, open a comment or smuggle
/// in a second statement.
pub fn check_expression(field: &str, value: &str) -> Result<()> {
    for marker in FORBIDDEN_MARKERS {
        if value.contains(marker) {
            return Err(PipelineError::validation(
                field,
                format!("forbidden character sequence `{marker}`"),
            ));
        }
    }

    let upper = value.to_uppercase();
    for keyword in FORBIDDEN_KEYWORDS {
        if upper.contains(keyword) {
            return Err(PipelineError::validation(
                field,
                format!("forbidden keyword `{}`", keyword.trim_end()),
            ));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

const ALLOWED_OPERATORS: &[&str] = &["=", ">", "<", ">=", "<=", "!=", "LIKE", "ILIKE"];

/// Returns the normalised (trimmed, uppercased) operator.
pub fn check_operator(field: &str, op: &str) -> Result<String> {
    let normalised = op.trim().to_uppercase();
    if ALLOWED_OPERATORS.contains(&normalised.as_str()) {
        Ok(normalised)
    } else {
        Err(PipelineError::validation(
            field,
            format!("operator `{op}` is not allowed"),
        ))
    }
}
