//! Result casting.
//!
//! This module converts [`RawResult`]s (text-format values plus type OIDs)
//! into typed [`Row`]s.
//!
//! # Architecture
//!
//! Casting uses a two-phase approach:
//! 1. Each column selects a rule once: by field name first, then by type OID
//! 2. Each non-null value of the column is passed through that rule
//!
//! Columns without a rule keep their text. NULL is never cast.

use crate::db::connection::{RawColumn, RawResult};
use crate::error::{DbError, DbResult};
use crate::models::{Row, Value};
use chrono::{DateTime, FixedOffset};
use std::collections::HashMap;

/// PostgreSQL type OIDs the built-in rules and the driver care about.
pub mod oid {
    pub const BOOL: u32 = 16;
    pub const BYTEA: u32 = 17;
    pub const INT8: u32 = 20;
    pub const INT2: u32 = 21;
    pub const INT4: u32 = 23;
    pub const TEXT: u32 = 25;
    pub const JSON: u32 = 114;
    pub const FLOAT4: u32 = 700;
    pub const FLOAT8: u32 = 701;
    pub const VARCHAR: u32 = 1043;
    pub const TIMESTAMP: u32 = 1114;
    pub const TIMESTAMPTZ: u32 = 1184;
    pub const JSONB: u32 = 3802;
}

/// Field whose values always carry a JSON payload.
pub const JSON_FIELD: &str = "args";

/// A conversion from a text-format value to a typed value.
pub type CastFn = fn(&str) -> Result<Value, String>;

/// Mapping from field name or type OID to a cast rule.
#[derive(Clone)]
pub struct CastTable {
    by_field: HashMap<String, CastFn>,
    by_oid: HashMap<u32, CastFn>,
}

impl CastTable {
    /// The built-in rule set.
    pub fn new() -> Self {
        Self::empty()
            .with_oid(oid::INT8, cast_integer)
            .with_oid(oid::INT2, cast_integer)
            .with_oid(oid::INT4, cast_integer)
            .with_oid(oid::TIMESTAMPTZ, cast_timestamptz)
            .with_oid(oid::BOOL, cast_bool)
            .with_field(JSON_FIELD, cast_json)
    }

    /// A table without any rule; every value stays text.
    pub fn empty() -> Self {
        Self {
            by_field: HashMap::new(),
            by_oid: HashMap::new(),
        }
    }

    /// Add or replace the rule for a type OID.
    pub fn with_oid(mut self, type_oid: u32, rule: CastFn) -> Self {
        self.by_oid.insert(type_oid, rule);
        self
    }

    /// Add or replace the rule for a field name. Field rules win over OID rules.
    pub fn with_field(mut self, field: impl Into<String>, rule: CastFn) -> Self {
        self.by_field.insert(field.into(), rule);
        self
    }

    /// Select the rule for a column.
    pub fn rule_for(&self, column: &RawColumn) -> Option<CastFn> {
        self.by_field
            .get(&column.name)
            .or_else(|| self.by_oid.get(&column.type_oid))
            .copied()
    }

    /// Cast a single value of `column`.
    pub fn cast_value(&self, column: &RawColumn, raw: Option<&str>) -> DbResult<Value> {
        apply(self.rule_for(column), column, raw)
    }

    /// Cast every row of a raw result.
    pub fn cast_result(&self, raw: RawResult) -> DbResult<Vec<Row>> {
        let rules: Vec<Option<CastFn>> =
            raw.columns.iter().map(|col| self.rule_for(col)).collect();

        raw.rows
            .into_iter()
            .map(|values| {
                let mut row = Row::with_capacity(raw.columns.len());
                for ((column, rule), value) in raw.columns.iter().zip(&rules).zip(values) {
                    let cast = apply(*rule, column, value.as_deref())?;
                    row.insert(column.name.as_str(), cast);
                }
                Ok(row)
            })
            .collect()
    }
}

impl Default for CastTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CastTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut fields: Vec<&String> = self.by_field.keys().collect();
        fields.sort();
        let mut oids: Vec<&u32> = self.by_oid.keys().collect();
        oids.sort();
        f.debug_struct("CastTable")
            .field("fields", &fields)
            .field("oids", &oids)
            .finish()
    }
}

fn apply(rule: Option<CastFn>, column: &RawColumn, raw: Option<&str>) -> DbResult<Value> {
    match (raw, rule) {
        (None, _) => Ok(Value::Null),
        (Some(text), Some(rule)) => rule(text).map_err(|e| DbError::cast(&column.name, e)),
        (Some(text), None) => Ok(Value::Text(text.to_string())),
    }
}

// =============================================================================
// Built-in Rules
// =============================================================================

pub fn cast_integer(raw: &str) -> Result<Value, String> {
    raw.trim()
        .parse::<i64>()
        .map(Value::Int)
        .map_err(|e| format!("invalid integer '{}': {}", raw, e))
}

pub fn cast_bool(raw: &str) -> Result<Value, String> {
    Ok(Value::Bool(raw == "t"))
}

pub fn cast_json(raw: &str) -> Result<Value, String> {
    serde_json::from_str::<serde_json::Value>(raw)
        .map(Value::from)
        .map_err(|e| format!("invalid JSON: {}", e))
}

pub fn cast_timestamptz(raw: &str) -> Result<Value, String> {
    parse_timestamptz(raw).map(Value::Timestamp)
}

/// Parse PostgreSQL's `timestamptz` output (`2024-01-02 03:04:05.123456+00`).
///
/// Also accepts a `T` separator, a space before the offset, and offsets written
/// as `+HH`, `+HHMM` or `+HH:MM`.
pub fn parse_timestamptz(raw: &str) -> Result<DateTime<FixedOffset>, String> {
    let trimmed = raw.trim();
    let time_part = trimmed
        .get(10..)
        .filter(|_| trimmed.len() >= 19)
        .ok_or_else(|| format!("invalid timestamp '{}'", raw))?;
    // Offset sign can only appear after the date part.
    let sign_pos = time_part
        .rfind(['+', '-'])
        .map(|p| p + 10)
        .ok_or_else(|| format!("timestamp '{}' has no zone offset", raw))?;

    let (datetime, offset) = trimmed.split_at(sign_pos);
    let datetime = datetime.trim_end().replacen('T', " ", 1);
    let (sign, digits) = offset.split_at(1);
    let digits: String = digits.chars().filter(|c| *c != ':').collect();
    let digits = match digits.len() {
        2 => format!("{}00", digits),
        4 => digits,
        _ => return Err(format!("invalid zone offset in '{}'", raw)),
    };

    let normalized = format!("{}{}{}", datetime, sign, digits);
    DateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S%.f%z")
        .map_err(|e| format!("invalid timestamp '{}': {}", raw, e))
}
