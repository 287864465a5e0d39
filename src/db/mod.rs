//! Database abstraction layer.
//!
//! This module provides command execution over PostgreSQL:
//! - The checkout contract and the bundled adapters
//! - Per-connection prepared statement bookkeeping
//! - Named statement templates
//! - Result casting into typed rows
//! - Adapter dispatch macros for reducing code duplication

pub mod adapter;
pub mod cast;
pub mod configured;
pub mod connection;
pub mod dedicated;
pub mod executor;
pub(crate) mod lexer;
#[macro_use]
pub mod macros;
pub mod params;
pub mod pool;
pub mod session;
pub mod statement;
pub mod templates;
pub mod types;

pub use adapter::{Adapter, AdapterId, Lease};
pub use cast::{CastFn, CastTable};
pub use configured::{ConfiguredAdapter, connect};
pub use connection::{Connection, ConnectionId, RawColumn, RawResult, TransactionStatus};
pub use dedicated::PgAdapter;
pub use executor::Executor;
pub use macros::AdapterKind;
pub use pool::PoolAdapter;
pub use session::PgSession;
pub use statement::StatementCache;
pub use templates::SqlTemplates;
