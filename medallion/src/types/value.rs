use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use medallion_config::shared::FieldType;

/// Canonical cell value of a cleaned record.
///
/// Raw records carry opaque JSON values; the cleaning stage coerces each
/// declared field into one of these variants. The variant set is fixed so that
/// record hashes stay stable across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
}

impl Value {
    /// Coerces a raw JSON value into the requested canonical type.
    ///
    /// Returns a human-readable reason on failure; the caller records it as
    /// the rejection detail. Null input is not handled here: null policy is
    /// applied by the cleaning stage before coercion is attempted.
    pub fn coerce(raw: &serde_json::Value, field_type: FieldType) -> Result<Value, String> {
        match field_type {
            FieldType::Bool => match raw {
                serde_json::Value::Bool(value) => Ok(Value::Bool(*value)),
                serde_json::Value::String(value) => match value.to_lowercase().as_str() {
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    other => Err(format!("`{other}` is not a boolean")),
                },
                other => Err(format!("{other} is not a boolean")),
            },
            FieldType::Integer => match raw {
                serde_json::Value::Number(value) => value
                    .as_i64()
                    .map(Value::Integer)
                    .ok_or_else(|| format!("{value} does not fit in a 64-bit integer")),
                serde_json::Value::String(value) => value
                    .trim()
                    .parse::<i64>()
                    .map(Value::Integer)
                    .map_err(|err| format!("`{value}` is not an integer: {err}")),
                other => Err(format!("{other} is not an integer")),
            },
            FieldType::Float => match raw {
                serde_json::Value::Number(value) => value
                    .as_f64()
                    .map(Value::Float)
                    .ok_or_else(|| format!("{value} is not representable as a float")),
                serde_json::Value::String(value) => value
                    .trim()
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|err| format!("`{value}` is not a float: {err}")),
                other => Err(format!("{other} is not a float")),
            },
            FieldType::Text => match raw {
                serde_json::Value::String(value) => Ok(Value::Text(value.clone())),
                serde_json::Value::Number(value) => Ok(Value::Text(value.to_string())),
                serde_json::Value::Bool(value) => Ok(Value::Text(value.to_string())),
                other => Err(format!("{other} is not text")),
            },
            FieldType::Timestamp => match raw {
                serde_json::Value::String(value) => DateTime::parse_from_rfc3339(value)
                    .map(|parsed| Value::Timestamp(parsed.with_timezone(&Utc)))
                    .map_err(|err| format!("`{value}` is not an RFC 3339 timestamp: {err}")),
                other => Err(format!("{other} is not a timestamp")),
            },
            FieldType::Date => match raw {
                serde_json::Value::String(value) => NaiveDate::parse_from_str(value, "%Y-%m-%d")
                    .map(Value::Date)
                    .map_err(|err| format!("`{value}` is not a `YYYY-MM-DD` date: {err}")),
                other => Err(format!("{other} is not a date")),
            },
        }
    }

    /// Renders the value canonically for business-key construction and
    /// hashing. The rendering is stable across runs.
    pub fn canonical(&self) -> String {
        match self {
            Value::Null => "\u{0}".to_string(),
            Value::Bool(value) => value.to_string(),
            Value::Integer(value) => value.to_string(),
            // Ryu-style shortest representation through serde_json keeps float
            // rendering stable across platforms.
            Value::Float(value) => serde_json::Number::from_f64(*value)
                .map(|number| number.to_string())
                .unwrap_or_else(|| "NaN".to_string()),
            Value::Text(value) => value.clone(),
            Value::Timestamp(value) => value.to_rfc3339(),
            Value::Date(value) => value.to_string(),
        }
    }
}
