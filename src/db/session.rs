//! A PostgreSQL backend session over sqlx.
//!
//! [`PgSession`] implements [`Connection`] for either a dedicated
//! `PgConnection` or a connection borrowed from a `PgPool`.
//!
//! Everything runs over the simple query protocol. Parameters are rendered
//! as untyped literals, templates are created with `PREPARE` under their own
//! names and invoked with `EXECUTE`, and every value comes back in text
//! format.
//!
//! sqlx does not expose the ReadyForQuery transaction status, so the session
//! follows it statement by statement: each completed statement of a query is
//! applied in order, and the one that failed decides what the error did to
//! the block.

use crate::db::connection::{Connection, ConnectionId, RawResult, TransactionStatus};
use crate::db::lexer::{keywords, statements};
use crate::db::params::{execute_statement, quote_ident, substitute};
use crate::db::types::raw_result;
use crate::error::DbResult;
use crate::models::WireParam;
use async_trait::async_trait;
use futures_util::TryStreamExt;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgRow;
use sqlx::{Either, Executor as _, PgConnection, Postgres};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

/// SQLSTATE for a prepared statement name already in use.
const DUPLICATE_PREPARED_STATEMENT: &str = "42P05";

/// The sqlx handle a session runs on.
pub enum SessionConn {
    Owned(PgConnection),
    Pooled(PoolConnection<Postgres>),
}

impl SessionConn {
    fn as_mut(&mut self) -> &mut PgConnection {
        match self {
            SessionConn::Owned(conn) => conn,
            SessionConn::Pooled(conn) => &mut **conn,
        }
    }
}

/// Effect of one statement on the transaction status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransactionControl {
    Begin,
    Commit { chain: bool },
    /// Ends the block without committing it.
    Rollback { chain: bool },
    None,
}

impl TransactionControl {
    /// Classify every statement of a simple query, in order.
    pub(crate) fn all(sql: &str) -> Vec<Self> {
        statements(sql).into_iter().map(Self::of).collect()
    }

    /// Classify one statement by its leading keywords.
    pub(crate) fn of(stmt: &str) -> Self {
        let words = keywords(stmt, 5);
        let words: Vec<&str> = words.iter().map(String::as_str).collect();
        match words.as_slice() {
            ["BEGIN", ..] | ["START", "TRANSACTION", ..] => Self::Begin,
            // Two-phase commit acts on a transaction that is already detached.
            ["COMMIT" | "ROLLBACK", "PREPARED", ..] => Self::None,
            ["PREPARE", "TRANSACTION", ..] => Self::Rollback { chain: false },
            ["COMMIT" | "END", rest @ ..] => Self::Commit {
                chain: chains(rest),
            },
            ["ROLLBACK" | "ABORT", rest @ ..] => match skip_noise(rest) {
                ["TO", ..] => Self::None,
                rest => Self::Rollback {
                    chain: chains(rest),
                },
            },
            _ => Self::None,
        }
    }
}

fn skip_noise<'a, 'b>(words: &'a [&'b str]) -> &'a [&'b str] {
    match words {
        ["WORK" | "TRANSACTION", tail @ ..] => tail,
        _ => words,
    }
}

fn chains(words: &[&str]) -> bool {
    matches!(skip_noise(words), ["AND", "CHAIN", ..])
}

/// What a simple query produced before it finished or failed.
struct Outcome {
    completed: usize,
    rows: Vec<PgRow>,
    error: Option<sqlx::Error>,
}

/// Run `sql` and keep the rows of its last statement.
async fn simple_query(conn: &mut PgConnection, sql: &str) -> Outcome {
    let mut outcome = Outcome {
        completed: 0,
        rows: Vec::new(),
        error: None,
    };
    let mut current = Vec::new();
    let mut stream = conn.fetch_many(sql);
    loop {
        match stream.try_next().await {
            Ok(Some(Either::Left(_))) => {
                outcome.completed += 1;
                outcome.rows = std::mem::take(&mut current);
            }
            Ok(Some(Either::Right(row))) => current.push(row),
            Ok(None) => break,
            Err(err) => {
                outcome.error = Some(err);
                break;
            }
        }
    }
    if !current.is_empty() {
        outcome.rows = current;
    }
    outcome
}

/// One PostgreSQL session.
pub struct PgSession {
    id: ConnectionId,
    conn: SessionConn,
    status: TransactionStatus,
    notify: Option<Arc<Notify>>,
    wake_pending: bool,
}

impl PgSession {
    pub fn new(id: ConnectionId, conn: SessionConn) -> Self {
        Self {
            id,
            conn,
            status: TransactionStatus::Idle,
            notify: None,
            wake_pending: false,
        }
    }

    pub fn with_notify(mut self, notify: Option<Arc<Notify>>) -> Self {
        self.notify = notify;
        self
    }

    /// Swap the underlying handle, keeping this session's identity.
    ///
    /// Everything prepared on the old handle is gone afterwards.
    pub fn replace(&mut self, conn: SessionConn) {
        self.conn = conn;
        self.status = TransactionStatus::Idle;
        self.wake_pending = false;
    }

    /// Request a worker wake-up. Deferred until COMMIT inside a transaction.
    ///
    /// Returns `false` when the session has nothing to notify.
    pub fn request_wake(&mut self) -> bool {
        let Some(notify) = &self.notify else {
            return false;
        };
        if self.status.in_transaction() {
            self.wake_pending = true;
        } else {
            notify.notify_one();
        }
        true
    }

    /// Send `ROLLBACK` if the session is inside a transaction block.
    pub async fn reset(&mut self) -> DbResult<bool> {
        if !self.status.in_transaction() {
            return Ok(false);
        }
        self.run("ROLLBACK").await?;
        Ok(true)
    }

    async fn run(&mut self, sql: &str) -> DbResult<RawResult> {
        let controls = TransactionControl::all(sql);
        let outcome = simple_query(self.conn.as_mut(), sql).await;

        for control in controls.iter().take(outcome.completed) {
            self.apply(*control);
        }
        if let Some(err) = outcome.error {
            let failed = controls
                .get(outcome.completed)
                .copied()
                .unwrap_or(TransactionControl::None);
            self.fail(failed);
            return Err(err.into());
        }
        raw_result(&outcome.rows)
    }

    fn apply(&mut self, control: TransactionControl) {
        match control {
            TransactionControl::Begin => {
                if self.status == TransactionStatus::Idle {
                    self.status = TransactionStatus::Active;
                }
            }
            TransactionControl::Commit { chain } => {
                let committed = self.status == TransactionStatus::Active;
                self.end_block(committed);
                if chain && committed {
                    self.status = TransactionStatus::Active;
                }
            }
            TransactionControl::Rollback { chain } => {
                let open = self.status.in_transaction();
                self.end_block(false);
                if chain && open {
                    self.status = TransactionStatus::Active;
                }
            }
            TransactionControl::None => {}
        }
    }

    fn fail(&mut self, control: TransactionControl) {
        match control {
            // A block whose COMMIT fails is rolled back.
            TransactionControl::Commit { .. } | TransactionControl::Rollback { .. } => {
                self.end_block(false)
            }
            TransactionControl::Begin => {}
            TransactionControl::None => {
                if self.status.in_transaction() {
                    self.status = TransactionStatus::Failed;
                }
            }
        }
    }

    fn end_block(&mut self, committed: bool) {
        self.status = TransactionStatus::Idle;
        if std::mem::take(&mut self.wake_pending) && committed {
            if let Some(notify) = &self.notify {
                notify.notify_one();
            }
        }
    }
}

#[async_trait]
impl Connection for PgSession {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.status
    }

    async fn exec_raw(&mut self, sql: &str, params: &[WireParam]) -> DbResult<RawResult> {
        if params.is_empty() {
            return self.run(sql).await;
        }
        let sql = substitute(sql, params)?;
        self.run(&sql).await
    }

    async fn prepare(&mut self, statement: &str, sql: &str, _params: &[WireParam]) -> DbResult<()> {
        let name = quote_ident(statement);
        let prepare = format!("PREPARE {} AS {}", name, sql.trim_end().trim_end_matches(';'));

        match self.run(&prepare).await {
            Err(err) if err.sql_state() == Some(DUPLICATE_PREPARED_STATEMENT) => {
                debug!(connection = %self.id, statement = %statement, "Replacing prepared statement");
                self.run(&format!("DEALLOCATE {}", name)).await?;
                self.run(&prepare).await?;
            }
            result => {
                result?;
            }
        }

        debug!(connection = %self.id, statement = %statement, "Prepared statement");
        Ok(())
    }

    async fn exec_prepared(
        &mut self,
        statement: &str,
        _sql: &str,
        params: &[WireParam],
    ) -> DbResult<RawResult> {
        let sql = execute_statement(statement, params)?;
        self.run(&sql).await
    }
}

impl std::fmt::Debug for PgSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgSession")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("notify", &self.notify.is_some())
            .finish()
    }
}
