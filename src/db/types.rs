//! Conversion of sqlx rows into raw results.
//!
//! Sessions run everything over the simple query protocol, so every value
//! arrives in PostgreSQL text output format and is kept as-is. The caster
//! works on that text.

use crate::db::connection::{RawColumn, RawResult};
use crate::error::{DbError, DbResult};
use sqlx::postgres::{PgRow, PgValueFormat};
use sqlx::{Column, Row, TypeInfo, ValueRef};

/// Column descriptions of a row.
pub fn columns(row: &PgRow) -> Vec<RawColumn> {
    row.columns()
        .iter()
        .map(|col| {
            let type_oid = col.type_info().oid().map(|oid| oid.0).unwrap_or(0);
            RawColumn::new(col.name(), type_oid)
        })
        .collect()
}

/// Convert fetched rows into a raw result.
pub fn raw_result(rows: &[PgRow]) -> DbResult<RawResult> {
    let Some(first) = rows.first() else {
        return Ok(RawResult::default());
    };

    let mut raw = RawResult::new(columns(first));
    for row in rows {
        raw.rows.push(row_to_text(row)?);
    }
    Ok(raw)
}

/// Text form of every value in a row, `None` for NULL.
pub fn row_to_text(row: &PgRow) -> DbResult<Vec<Option<String>>> {
    row.columns()
        .iter()
        .map(|col| -> DbResult<Option<String>> {
            let value = row.try_get_raw(col.ordinal())?;
            if value.is_null() {
                return Ok(None);
            }
            if !matches!(value.format(), PgValueFormat::Text) {
                return Err(DbError::cast(
                    col.name(),
                    format!(
                        "{} value arrived in binary format",
                        value.type_info().name()
                    ),
                ));
            }
            value
                .as_str()
                .map(|s| Some(s.to_string()))
                .map_err(|e| DbError::cast(col.name(), e.to_string()))
        })
        .collect()
}
