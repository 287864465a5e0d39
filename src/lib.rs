//! PostgreSQL command adapter.
//!
//! Executes raw SQL or named job-queue statements through an interchangeable
//! connection backend, caches prepared statements per connection, recovers
//! once when a cached statement vanishes, and casts results into typed rows.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{AdapterConfig, Config};
pub use db::{Adapter, Executor};
pub use error::{DbError, DbResult};
pub use models::{Command, Param, Row, Value};
