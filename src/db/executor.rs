//! Command execution engine.
//!
//! This module provides the upward API of the crate:
//! - Raw SQL and named template execution
//! - Prepared statement caching per connection
//! - A single bounded retry when a cached statement disappears
//! - Result casting into typed rows
//!
//! # Architecture
//!
//! Every operation runs inside [`Adapter::checkout`], which guarantees exclusive
//! access to one connection and is re-entrant. The executor never holds the
//! connection lock across a nested checkout, so calls issued from inside a
//! [`Executor::transaction`] block share its connection.
//!
//! Named commands bypass the statement cache while the connection is inside a
//! transaction block: a prepare that fails there would abort the whole block.

use crate::db::adapter::Adapter;
use crate::db::cast::CastTable;
use crate::db::connection::{Connection, ConnectionId, RawResult};
use crate::db::statement::StatementCache;
use crate::db::templates::SqlTemplates;
use crate::error::DbResult;
use crate::models::{Command, Param, Row, WireParam, encode_params, prepared_statement_name};
use parking_lot::Mutex;
use std::future::Future;
use tracing::{debug, warn};

/// Attempts per named command: the first run plus one re-prepare.
const MAX_ATTEMPTS: usize = 2;

/// Executes commands through an adapter and casts their results.
pub struct Executor<A: Adapter> {
    adapter: A,
    templates: SqlTemplates,
    casts: CastTable,
    cache: Mutex<StatementCache>,
    prepared_statements: bool,
}

impl<A: Adapter> Executor<A> {
    /// Create an executor with the built-in templates and cast rules.
    pub fn new(adapter: A) -> Self {
        Self {
            adapter,
            templates: SqlTemplates::new(),
            casts: CastTable::new(),
            cache: Mutex::new(StatementCache::new()),
            prepared_statements: true,
        }
    }

    pub fn with_templates(mut self, templates: SqlTemplates) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_casts(mut self, casts: CastTable) -> Self {
        self.casts = casts;
        self
    }

    /// When disabled, named commands always run as raw text.
    pub fn with_prepared_statements(mut self, enabled: bool) -> Self {
        self.prepared_statements = enabled;
        self
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn templates(&self) -> &SqlTemplates {
        &self.templates
    }

    pub fn casts(&self) -> &CastTable {
        &self.casts
    }

    /// Execute a command and return its rows.
    pub async fn execute(&self, command: &Command, params: &[Param]) -> DbResult<Vec<Row>> {
        let params = encode_params(params);

        debug!(command = %command, params = params.len(), "Executing command");

        let raw = match command {
            Command::Raw(sql) => self.execute_raw(sql, &params).await?,
            Command::Named(name) => self.execute_named(name, &params).await?,
        };
        self.casts.cast_result(raw)
    }

    /// Whether the checked-out connection is inside a transaction block.
    pub async fn in_transaction(&self) -> DbResult<bool> {
        self.adapter
            .checkout(|lease| async move {
                Ok(lease.lock().await.transaction_status().in_transaction())
            })
            .await
    }

    /// Ask the adapter to wake a worker after the current transaction commits.
    pub async fn wake_worker_after_commit(&self) -> bool {
        self.adapter.wake_worker_after_commit().await
    }

    /// Run `work` inside `BEGIN` / `COMMIT`, rolling back when it fails.
    ///
    /// Commands executed by `work` share the transaction's connection.
    pub async fn transaction<F, Fut, T>(&self, work: F) -> DbResult<T>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = DbResult<T>> + Send,
        T: Send,
    {
        self.adapter
            .checkout(|lease| async move {
                lease.lock().await.exec_raw("BEGIN", &[]).await?;

                match work().await {
                    Ok(value) => {
                        lease.lock().await.exec_raw("COMMIT", &[]).await?;
                        Ok(value)
                    }
                    Err(err) => {
                        let rollback = lease.lock().await.exec_raw("ROLLBACK", &[]).await;
                        if let Err(rollback_err) = rollback {
                            warn!(error = %rollback_err, "Rollback failed");
                        }
                        Err(err)
                    }
                }
            })
            .await
    }

    /// Drop cached statement state for a connection that went away.
    pub fn forget_connection(&self, conn: ConnectionId) -> usize {
        self.cache.lock().forget(conn)
    }

    /// Commands currently marked prepared on `conn`.
    pub fn prepared_statements(&self, conn: ConnectionId) -> Vec<String> {
        self.cache.lock().prepared(conn)
    }

    async fn execute_raw(&self, sql: &str, params: &[WireParam]) -> DbResult<RawResult> {
        self.adapter
            .checkout(|lease| async move { lease.lock().await.exec_raw(sql, params).await })
            .await
    }

    async fn execute_named(&self, name: &str, params: &[WireParam]) -> DbResult<RawResult> {
        let sql = self.templates.get(name)?;

        self.adapter
            .checkout(|lease| async move {
                let mut conn = lease.lock().await;

                // Checked once; a retry keeps the prepared path.
                if !self.prepared_statements || conn.transaction_status().in_transaction() {
                    return conn.exec_raw(sql, params).await;
                }

                let id = conn.id();
                let statement = prepared_statement_name(name);
                let mut attempt = 0;

                loop {
                    attempt += 1;
                    let fresh = !self.cache.lock().is_prepared(id, name);
                    if fresh {
                        conn.prepare(&statement, sql, params).await?;
                        self.cache.lock().mark_prepared(id, name);
                    }

                    match conn.exec_prepared(&statement, sql, params).await {
                        Ok(raw) => return Ok(raw),
                        Err(err)
                            if err.is_unknown_prepared_statement()
                                && !fresh
                                && attempt < MAX_ATTEMPTS =>
                        {
                            self.cache.lock().mark_uncached(id, name);
                            warn!(
                                event = "reprepare_statement",
                                command = %name,
                                connection = %id,
                                "Prepared statement missing on connection, preparing again"
                            );
                        }
                        Err(err) => return Err(err),
                    }
                }
            })
            .await
    }
}

impl<A: Adapter + std::fmt::Debug> std::fmt::Debug for Executor<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("adapter", &self.adapter)
            .field("templates", &self.templates.names())
            .field("prepared_statements", &self.prepared_statements)
            .finish()
    }
}
