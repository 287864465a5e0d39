//! Command and parameter models.
//!
//! This module defines what a caller hands to the executor: a [`Command`] and
//! an ordered list of [`Param`] values, plus the [`WireParam`] form parameters
//! take after pre-encoding.

use chrono::{DateTime, FixedOffset, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::borrow::Cow;
use std::fmt;

/// Wire format of timestamp parameters: microsecond precision plus zone offset.
pub const TIMESTAMP_PARAM_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f %z";

/// Prefix of the server-side names given to prepared templates.
pub const PREPARED_STATEMENT_PREFIX: &str = "que_";

/// A command to execute: either a template name or literal SQL text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    /// Name of a template in the executor's template table.
    Named(Cow<'static, str>),
    /// Literal statement text.
    Raw(String),
}

impl Command {
    /// Refer to a template by name.
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        Self::Named(name.into())
    }

    /// Literal SQL text.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::Raw(sql.into())
    }

    /// Template name, if this is a named command.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Named(name) => Some(name),
            Self::Raw(_) => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, ":{}", name),
            Self::Raw(sql) => write!(f, "{}", sql),
        }
    }
}

/// Server-side name under which a template is prepared.
pub fn prepared_statement_name(command: &str) -> String {
    format!("{}{}", PREPARED_STATEMENT_PREFIX, command)
}

/// A parameter value supplied positionally with a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Param {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// Timestamp with zone offset
    Timestamp(DateTime<FixedOffset>),
    /// String value
    Text(String),
    /// Structured value; arrays and objects travel as JSON text
    Json(JsonValue),
}

impl Param {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null | Self::Json(JsonValue::Null))
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Timestamp(_) => "timestamp",
            Self::Text(_) => "string",
            Self::Json(_) => "json",
        }
    }

    /// Serialize any value into a structured parameter.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(Self::Json)
    }

    /// Pre-encode for transmission.
    pub fn encode(&self) -> WireParam {
        match self {
            Self::Null => WireParam::Null,
            Self::Bool(v) => WireParam::Bool(*v),
            Self::Int(v) => WireParam::Int(*v),
            Self::Float(v) => WireParam::Float(*v),
            Self::Timestamp(ts) => WireParam::Text(ts.format(TIMESTAMP_PARAM_FORMAT).to_string()),
            Self::Text(v) => WireParam::Text(v.clone()),
            Self::Json(v) => encode_json(v),
        }
    }
}

fn encode_json(value: &JsonValue) -> WireParam {
    match value {
        JsonValue::Null => WireParam::Null,
        JsonValue::Bool(v) => WireParam::Bool(*v),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => WireParam::Int(i),
            None => WireParam::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        JsonValue::String(s) => WireParam::Text(s.clone()),
        JsonValue::Array(_) | JsonValue::Object(_) => WireParam::Text(value.to_string()),
    }
}

/// Pre-encode a whole parameter list.
pub fn encode_params(params: &[Param]) -> Vec<WireParam> {
    params.iter().map(Param::encode).collect()
}

impl From<bool> for Param {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i16> for Param {
    fn from(v: i16) -> Self {
        Self::Int(v.into())
    }
}

impl From<i32> for Param {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Param {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Param {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for Param {
    fn from(v: DateTime<Tz>) -> Self {
        Self::Timestamp(v.fixed_offset())
    }
}

impl From<JsonValue> for Param {
    fn from(v: JsonValue) -> Self {
        Self::Json(v)
    }
}

impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// A parameter after pre-encoding, as handed to a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum WireParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl WireParam {
    /// PostgreSQL text input form of this value; `None` for NULL.
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Self::Null => None,
            Self::Bool(true) => Some(Cow::Borrowed("t")),
            Self::Bool(false) => Some(Cow::Borrowed("f")),
            Self::Int(v) => Some(Cow::Owned(v.to_string())),
            Self::Float(v) => Some(Cow::Owned(v.to_string())),
            Self::Text(v) => Some(Cow::Borrowed(v)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_param_types() {
        assert!(Param::Null.is_null());
        assert!(Param::Json(JsonValue::Null).is_null());
        assert!(!Param::Bool(true).is_null());
        assert_eq!(Param::Int(42).type_name(), "int");
        assert_eq!(Param::from("hello").type_name(), "string");
    }

    #[test]
    fn test_timestamp_encoding_at_epoch() {
        let epoch = Utc.timestamp_opt(0, 0).unwrap();
        assert_eq!(
            Param::from(epoch).encode(),
            WireParam::Text("1970-01-01 00:00:00.000000 +0000".to_string())
        );
    }

    #[test]
    fn test_timestamp_encoding_keeps_offset_and_micros() {
        let tz = FixedOffset::west_opt(5 * 3600).unwrap();
        let ts = tz.with_ymd_and_hms(2024, 3, 9, 17, 4, 5).unwrap()
            + chrono::Duration::microseconds(123_456);
        assert_eq!(
            Param::from(ts).encode(),
            WireParam::Text("2024-03-09 17:04:05.123456 -0500".to_string())
        );
    }

    #[test]
    fn test_composite_values_become_json_text() {
        assert_eq!(
            Param::from(json!([1, 2, 3])).encode(),
            WireParam::Text("[1,2,3]".to_string())
        );
        assert_eq!(
            Param::from(json!({"queue": "default"})).encode(),
            WireParam::Text(r#"{"queue":"default"}"#.to_string())
        );
    }

    #[test]
    fn test_scalars_pass_through() {
        assert_eq!(Param::from(7i32).encode(), WireParam::Int(7));
        assert_eq!(Param::from(true).encode(), WireParam::Bool(true));
        assert_eq!(Param::from(None::<i64>).encode(), WireParam::Null);
        assert_eq!(Param::from(json!("x")).encode(), WireParam::Text("x".into()));
        assert_eq!(Param::from(json!(2.5)).encode(), WireParam::Float(2.5));
    }

    #[test]
    fn test_wire_text_form() {
        assert_eq!(WireParam::Null.as_text(), None);
        assert_eq!(WireParam::Bool(false).as_text().as_deref(), Some("f"));
        assert_eq!(WireParam::Int(-3).as_text().as_deref(), Some("-3"));
    }

    #[test]
    fn test_command_display() {
        assert_eq!(Command::named("insert_job").to_string(), ":insert_job");
        assert_eq!(Command::raw("SELECT 1").to_string(), "SELECT 1");
        assert_eq!(prepared_statement_name("lock_job"), "que_lock_job");
        assert_eq!(Command::named("lock_job").name(), Some("lock_job"));
        assert!(Command::raw("SELECT 1").name().is_none());
    }
}
