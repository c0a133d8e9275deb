use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[1-5][0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$")
        .expect("uuid pattern is valid")
});

pub fn is_uuid(value: &str) -> bool {
    UUID_RE.is_match(value)
}

/// Escapes a string into a single-quoted SQL literal.
/// Ported from PostgreSQL source code in src/interfaces/libpq/fe-exec.c:
/// quotes and backslashes are doubled, and a literal that contained a
/// backslash gets the ` E` prefix so the escape syntax is explicit.
pub fn escape_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    let mut backslash = false;

    out.push('\'');
    for c in value.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\\' => {
                out.push_str("\\\\");
                backslash = true;
            }
            _ => out.push(c),
        }
    }
    out.push('\'');

    if backslash {
        format!(" E{out}")
    } else {
        out
    }
}

/// A scalar destined for SQL literal text.
///
/// `from_json` classifies caller JSON: UUID-shaped strings become `Uuid`,
/// objects become `Json`, arrays recurse. `Timestamp`, `Numeric` and
/// `BigInt` have no JSON spelling and are built directly by callers that
/// need the explicit casts.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    BigInt(i128),
    Numeric(Decimal),
    Text(String),
    Uuid(String),
    Timestamp(DateTime<Utc>),
    Json(JsonValue),
    Array(Vec<SqlValue>),
}

impl SqlValue {
    pub fn from_json(value: &JsonValue) -> SqlValue {
        match value {
            JsonValue::Null => SqlValue::Null,
            JsonValue::Bool(b) => SqlValue::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    SqlValue::BigInt(u as i128)
                } else if let Some(f) = n.as_f64() {
                    SqlValue::Float(f)
                } else {
                    SqlValue::Null
                }
            }
            JsonValue::String(s) => {
                if is_uuid(s) {
                    SqlValue::Uuid(s.clone())
                } else {
                    SqlValue::Text(s.clone())
                }
            }
            JsonValue::Array(items) => {
                SqlValue::Array(items.iter().map(SqlValue::from_json).collect())
            }
            JsonValue::Object(_) => SqlValue::Json(value.clone()),
        }
    }

    /// Renders the value as literal SQL text.
    pub fn encode(&self) -> String {
        match self {
            SqlValue::Null => "null".to_string(),
            SqlValue::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            SqlValue::Int(i) => i.to_string(),
            SqlValue::Float(f) => f.to_string(),
            SqlValue::BigInt(i) => i.to_string(),
            SqlValue::Numeric(d) => d.to_string(),
            SqlValue::Text(s) => escape_literal(s),
            SqlValue::Uuid(s) => format!("{}::uuid", escape_literal(s)),
            SqlValue::Timestamp(ts) => {
                format!("'{}'::timestamp", ts.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            SqlValue::Json(v) => format!("{}::jsonb", escape_literal(&v.to_string())),
            SqlValue::Array(items) => {
                let elements: Vec<String> = items.iter().map(SqlValue::encode).collect();
                format!("ARRAY[{}]", elements.join(","))
            }
        }
    }
}
