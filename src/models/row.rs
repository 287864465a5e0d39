//! Typed result values and rows.
//!
//! A [`Row`] stores its keys as plain strings from the moment it is built, so
//! a lookup resolves the same entry whatever string-like key the caller holds.
//! JSON payloads decode into nested [`Value::List`] / [`Value::Map`] values
//! whose maps are rows themselves, which keeps lookups uniform at every depth.

use chrono::{DateTime, FixedOffset};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;
use std::ops::Index;

static NULL: Value = Value::Null;

/// A typed value produced by the result caster.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<FixedOffset>),
    List(Vec<Value>),
    Map(Row),
}

impl Value {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<&DateTime<FixedOffset>> {
        match self {
            Value::Timestamp(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Row> {
        match self {
            Value::Map(v) => Some(v),
            _ => None,
        }
    }

    /// Look up a key when this value is a map.
    pub fn get<K: AsRef<str>>(&self, key: K) -> Option<&Value> {
        self.as_map().and_then(|row| row.get(key))
    }

    /// Convert back to plain JSON. Timestamps become RFC 3339 strings.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(v) => JsonValue::Bool(*v),
            Value::Int(v) => JsonValue::Number((*v).into()),
            Value::Float(v) => serde_json::Number::from_f64(*v)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(v.to_string())),
            Value::Text(v) => JsonValue::String(v.clone()),
            Value::Timestamp(v) => JsonValue::String(v.to_rfc3339()),
            Value::List(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(row) => JsonValue::Object(
                row.iter()
                    .map(|(k, v)| (k.to_string(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<JsonValue> for Value {
    fn from(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(v) => Value::Bool(v),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => Value::Text(s),
            JsonValue::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            JsonValue::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl Index<&str> for Value {
    type Output = Value;

    fn index(&self, key: &str) -> &Value {
        self.get(key).unwrap_or(&NULL)
    }
}

impl Index<usize> for Value {
    type Output = Value;

    fn index(&self, idx: usize) -> &Value {
        self.as_list().and_then(|l| l.get(idx)).unwrap_or(&NULL)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(v) => serializer.serialize_bool(*v),
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::Float(v) => serializer.serialize_f64(*v),
            Value::Text(v) => serializer.serialize_str(v),
            Value::Timestamp(v) => serializer.serialize_str(&v.to_rfc3339()),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(row) => row.serialize(serializer),
        }
    }
}

/// An ordered field → value mapping with string-normalized keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    fields: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Insert or replace a field. Returns the previous value if the key existed.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        let key = key.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.fields.push((key, value));
                None
            }
        }
    }

    pub fn get<K: AsRef<str>>(&self, key: K) -> Option<&Value> {
        let key = key.as_ref();
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut<K: AsRef<str>>(&mut self, key: K) -> Option<&mut Value> {
        let key = key.as_ref();
        self.fields
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn contains_key<K: AsRef<str>>(&self, key: K) -> bool {
        self.get(key).is_some()
    }

    pub fn remove<K: AsRef<str>>(&mut self, key: K) -> Option<Value> {
        let key = key.as_ref();
        let idx = self.fields.iter().position(|(k, _)| k == key)?;
        Some(self.fields.remove(idx).1)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field names in column order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.fields.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (k, v) in iter {
            row.insert(k, v);
        }
        row
    }
}

impl IntoIterator for Row {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl Index<&str> for Row {
    type Output = Value;

    /// Missing fields read as `Value::Null`.
    fn index(&self, key: &str) -> &Value {
        self.get(key).unwrap_or(&NULL)
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_ignores_key_representation() {
        let mut row = Row::new();
        row.insert("job_id", Value::Int(1));
        let owned = String::from("job_id");
        let cow: std::borrow::Cow<'_, str> = "job_id".into();

        assert_eq!(row.get("job_id"), Some(&Value::Int(1)));
        assert_eq!(row.get(&owned), Some(&Value::Int(1)));
        assert_eq!(row.get(cow), Some(&Value::Int(1)));
        assert_eq!(row["job_id"], Value::Int(1));
        assert!(row["missing"].is_null());
    }

    #[test]
    fn test_insert_replaces_existing_key() {
        let mut row = Row::new();
        assert!(row.insert("a", Value::Int(1)).is_none());
        assert_eq!(row.insert(String::from("a"), Value::Int(2)), Some(Value::Int(1)));
        assert_eq!(row.len(), 1);
        assert_eq!(row["a"], Value::Int(2));
    }

    #[test]
    fn test_nested_json_is_indifferent_all_the_way_down() {
        let value = Value::from(json!({
            "user": {"name": "ada", "tags": [{"k": "v"}]},
            "n": 3
        }));

        assert_eq!(value["user"]["name"].as_str(), Some("ada"));
        assert_eq!(value["user"]["tags"][0]["k"].as_str(), Some("v"));
        assert_eq!(value.get(String::from("n")), Some(&Value::Int(3)));
    }

    #[test]
    fn test_json_round_trip() {
        let original = json!([1, {"a": [true, null, 2.5]}, "x"]);
        assert_eq!(Value::from(original.clone()).to_json(), original);
    }

    #[test]
    fn test_row_serializes_in_column_order() {
        let row: Row = vec![("b", Value::Int(1)), ("a", Value::Text("x".into()))]
            .into_iter()
            .collect();
        assert_eq!(serde_json::to_string(&row).unwrap(), r#"{"b":1,"a":"x"}"#);
    }
}
