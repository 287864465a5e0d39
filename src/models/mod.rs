//! Data models for the command adapter.
//!
//! This module re-exports all model types used throughout the crate.

pub mod query;
pub mod row;

// Re-export commonly used types
pub use query::{
    Command, PREPARED_STATEMENT_PREFIX, Param, TIMESTAMP_PARAM_FORMAT, WireParam, encode_params,
    prepared_statement_name,
};
pub use row::{Row, Value};
