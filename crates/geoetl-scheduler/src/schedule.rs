use crate::error::{Result, SchedulerError};

/// Normalise a cron expression to the dispatcher's seconds-first form.
///
/// Standard five-field expressions gain a leading `0` seconds field. Six-field
/// expressions and `@` shorthands (`@hourly`, `@daily`, ...) pass through
/// unchanged apart from whitespace. A year field is not supported by the
/// dispatcher, so seven fields are rejected here.
pub fn normalize_cron(expr: &str) -> Result<String> {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return Err(SchedulerError::InvalidSchedule(
            "empty cron expression".to_string(),
        ));
    }
    if trimmed.starts_with('@') {
        return Ok(trimmed.to_string());
    }

    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    match fields.len() {
        5 => Ok(format!("0 {}", fields.join(" "))),
        6 => Ok(fields.join(" ")),
        n => Err(SchedulerError::InvalidSchedule(format!(
            "expected 5 or 6 cron fields, got {n}: `{trimmed}`"
        ))),
    }
}
