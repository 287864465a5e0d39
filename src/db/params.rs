//! Parameter rendering for the simple query protocol.
//!
//! Every parameter becomes an untyped string literal (or `NULL`), so the
//! server infers its type from context exactly as it does for an unspecified
//! parameter of an extended-protocol statement. Raw statements get their
//! `$n` placeholders substituted; prepared templates get their values in the
//! `EXECUTE` argument list.

use crate::db::lexer::{Scanner, Token};
use crate::error::{DbError, DbResult};
use crate::models::WireParam;

/// SQLSTATE for a placeholder without a value.
const UNDEFINED_PARAMETER: &str = "42P02";
/// SQLSTATE for a parameter count that does not match the statement.
const PROTOCOL_VIOLATION: &str = "08P01";
/// SQLSTATE for a NUL byte in text.
const CHARACTER_NOT_IN_REPERTOIRE: &str = "22021";

/// Quote `value` as a string literal.
///
/// Values containing a backslash use the `E''` form so the result means the
/// same under either `standard_conforming_strings` setting.
pub fn quote_literal(value: &str) -> String {
    let escape = value.contains('\\');
    let mut out = String::with_capacity(value.len() + 3);
    if escape {
        out.push('E');
    }
    out.push('\'');
    for ch in value.chars() {
        match ch {
            '\'' => out.push_str("''"),
            '\\' if escape => out.push_str("\\\\"),
            _ => out.push(ch),
        }
    }
    out.push('\'');
    out
}

/// Quote `name` as an identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// SQL text of one parameter.
pub fn render(param: &WireParam) -> DbResult<String> {
    match param.as_text() {
        None => Ok("NULL".to_string()),
        Some(text) if text.contains('\0') => Err(DbError::database(
            "invalid byte sequence for encoding \"UTF8\": 0x00",
            Some(CHARACTER_NOT_IN_REPERTOIRE.to_string()),
            "Text parameters cannot contain NUL characters",
        )),
        Some(text) => Ok(quote_literal(&text)),
    }
}

/// Replace the `$n` placeholders of `sql` with rendered parameters.
pub fn substitute(sql: &str, params: &[WireParam]) -> DbResult<String> {
    let rendered = params.iter().map(render).collect::<DbResult<Vec<_>>>()?;

    let mut out = String::with_capacity(sql.len() + rendered.iter().map(String::len).sum::<usize>());
    let mut last = 0;
    let mut highest = 0;
    for token in Scanner::new(sql) {
        let Token::Placeholder { start, end, index } = token else {
            continue;
        };
        let value = index
            .checked_sub(1)
            .and_then(|pos| rendered.get(pos))
            .ok_or_else(|| {
                DbError::database(
                    format!("there is no parameter ${}", index),
                    Some(UNDEFINED_PARAMETER.to_string()),
                    format!("The statement was given {} parameter(s)", params.len()),
                )
            })?;
        out.push_str(&sql[last..start]);
        out.push_str(value);
        last = end;
        highest = highest.max(index);
    }
    if highest != params.len() {
        return Err(count_mismatch(params.len(), highest));
    }
    out.push_str(&sql[last..]);
    Ok(out)
}

/// `EXECUTE` statement for a prepared template.
pub fn execute_statement(statement: &str, params: &[WireParam]) -> DbResult<String> {
    let name = quote_ident(statement);
    if params.is_empty() {
        return Ok(format!("EXECUTE {}", name));
    }
    let args = params.iter().map(render).collect::<DbResult<Vec<_>>>()?;
    Ok(format!("EXECUTE {}({})", name, args.join(", ")))
}

fn count_mismatch(supplied: usize, required: usize) -> DbError {
    DbError::database(
        format!(
            "bind message supplies {} parameters, but prepared statement requires {}",
            supplied, required
        ),
        Some(PROTOCOL_VIOLATION.to_string()),
        "Pass exactly one value per placeholder",
    )
}
