//! Driver-neutral row values and coercion into [`CanonicalRecord`].

use geoetl_core::types::CanonicalRecord;
use serde_json::{Map, Value};

/// Output column aliases a pipeline must produce.
pub const ID_COLUMN: &str = "id";
pub const ADDRESS_COLUMN: &str = "full_address";
pub const LATITUDE_COLUMN: &str = "latitude";
pub const LONGITUDE_COLUMN: &str = "longitude";

/// One column value as decoded from either dialect.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Bool(bool),
}

impl SqlValue {
    /// Numeric coercion. Native numbers convert directly; text and bytes are
    /// parsed leniently and fall back to `0.0`. Everything else is `0.0`.
    pub fn as_f64(&self) -> f64 {
        match self {
            SqlValue::Int(v) => *v as f64,
            SqlValue::Float(v) => *v,
            SqlValue::Text(s) => parse_lenient(s),
            SqlValue::Bytes(b) => parse_lenient(&String::from_utf8_lossy(b)),
            SqlValue::Null | SqlValue::Bool(_) => 0.0,
        }
    }

    /// Text coercion. `NULL` becomes the empty string.
    pub fn as_text(&self) -> String {
        match self {
            SqlValue::Null => String::new(),
            SqlValue::Int(v) => v.to_string(),
            SqlValue::Float(v) => v.to_string(),
            SqlValue::Text(s) => s.clone(),
            SqlValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            SqlValue::Bool(v) => v.to_string(),
        }
    }

    /// JSON form used by previews. Bytes are rendered as text.
    pub fn to_json(&self) -> Value {
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Int(v) => Value::from(*v),
            SqlValue::Float(v) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            SqlValue::Text(s) => Value::String(s.clone()),
            SqlValue::Bytes(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
            SqlValue::Bool(v) => Value::Bool(*v),
        }
    }
}

/// Parse the longest leading float in `s`, ignoring surrounding whitespace.
/// Non-numeric input yields `0.0`.
fn parse_lenient(s: &str) -> f64 {
    let s = s.trim();
    if let Ok(v) = s.parse::<f64>() {
        return if v.is_finite() { v } else { 0.0 };
    }
    let candidate_len = s
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E')))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    (1..=candidate_len)
        .rev()
        .find_map(|end| s[..end].parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// A decoded row, columns kept in statement order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenericRow {
    pub columns: Vec<(String, SqlValue)>,
}

impl GenericRow {
    pub fn new(columns: Vec<(String, SqlValue)>) -> Self {
        Self { columns }
    }

    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }

    /// Read the four fixed aliases. Missing columns coerce like `NULL`.
    pub fn to_canonical(&self) -> CanonicalRecord {
        let text = |name: &str| self.get(name).map(SqlValue::as_text).unwrap_or_default();
        let float = |name: &str| self.get(name).map(SqlValue::as_f64).unwrap_or(0.0);
        CanonicalRecord {
            id: text(ID_COLUMN),
            full_address: text(ADDRESS_COLUMN),
            latitude: float(LATITUDE_COLUMN),
            longitude: float(LONGITUDE_COLUMN),
        }
    }

    pub fn to_json_map(&self) -> Map<String, Value> {
        self.columns
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect()
    }
}
