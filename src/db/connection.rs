//! The connection contract adapters hand to the executor.
//!
//! A [`Connection`] is one live backend session. It reports its identity and
//! transaction status, runs raw text with positional parameters, and creates
//! and invokes named prepared statements. Results come back as a [`RawResult`]
//! holding PostgreSQL text-format values plus each column's type OID.

use crate::error::DbResult;
use crate::models::WireParam;
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a backend session, used to key the statement cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Allocate a process-unique id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Transaction status of a session, as PostgreSQL reports it in ReadyForQuery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionStatus {
    /// Idle (not in a transaction block)
    #[default]
    Idle,
    /// In a transaction block
    Active,
    /// In a failed transaction block
    Failed,
}

impl TransactionStatus {
    /// Both an open and a failed block count as "inside a transaction".
    #[inline]
    pub fn in_transaction(self) -> bool {
        !matches!(self, TransactionStatus::Idle)
    }
}

/// Column description of a raw result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawColumn {
    pub name: String,
    /// PostgreSQL type OID (e.g. 23 for int4)
    pub type_oid: u32,
}

impl RawColumn {
    pub fn new(name: impl Into<String>, type_oid: u32) -> Self {
        Self {
            name: name.into(),
            type_oid,
        }
    }
}

/// Uncast result: columns plus rows of text values, `None` for NULL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResult {
    pub columns: Vec<RawColumn>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl RawResult {
    pub fn new(columns: Vec<RawColumn>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row. Values are positional, matching `columns`.
    pub fn push_row<I, S>(&mut self, values: I)
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        self.rows
            .push(values.into_iter().map(|v| v.map(Into::into)).collect());
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One live backend session.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Identity of the backend session behind this handle.
    fn id(&self) -> ConnectionId;

    /// Current transaction status.
    fn transaction_status(&self) -> TransactionStatus;

    /// Execute literal SQL with positional parameters.
    async fn exec_raw(&mut self, sql: &str, params: &[WireParam]) -> DbResult<RawResult>;

    /// Create a prepared statement named `statement` for `sql`.
    ///
    /// `params` are the values of the first invocation; backends that need
    /// parameter types at prepare time derive them from these.
    async fn prepare(&mut self, statement: &str, sql: &str, params: &[WireParam]) -> DbResult<()>;

    /// Invoke a prepared statement. Fails with an error for which
    /// [`DbError::is_unknown_prepared_statement`](crate::DbError::is_unknown_prepared_statement)
    /// holds when the backend does not know `statement`.
    async fn exec_prepared(
        &mut self,
        statement: &str,
        sql: &str,
        params: &[WireParam],
    ) -> DbResult<RawResult>;
}
