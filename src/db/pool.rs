//! Adapter over a sqlx `PgPool`.
//!
//! Each outermost checkout acquires a pooled connection and identifies it by
//! its backend process id, so the statement cache follows the physical
//! session and not the pool slot. A reused pid on a new backend shows up as
//! an unknown statement and goes through the executor's retry. Nested
//! checkouts in the same task reuse the connection already held.

use crate::config::PoolOptions;
use crate::db::adapter::{Adapter, AdapterId, Lease, held, hold};
use crate::db::connection::{Connection, ConnectionId};
use crate::db::session::{PgSession, SessionConn};
use crate::error::{DbError, DbResult};
use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Checkout over a connection pool.
pub struct PoolAdapter {
    id: AdapterId,
    pool: PgPool,
    notify: Option<Arc<Notify>>,
}

impl PoolAdapter {
    /// Open a pool for `url`.
    pub async fn connect(
        url: &str,
        options: &PoolOptions,
        notify: Option<Arc<Notify>>,
    ) -> DbResult<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(options.min_connections)
            .max_connections(options.max_connections)
            .acquire_timeout(options.acquire_timeout)
            .connect(url)
            .await
            .map_err(|e| {
                DbError::connection(
                    format!("Failed to connect: {}", e),
                    "Check that the server is running and the credentials are correct",
                )
            })?;

        info!(
            max_connections = options.max_connections,
            "Connected PostgreSQL pool"
        );
        Ok(Self::from_pool(pool, notify))
    }

    pub fn from_pool(pool: PgPool, notify: Option<Arc<Notify>>) -> Self {
        Self {
            id: AdapterId::next(),
            pool,
            notify,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn acquire(&self) -> DbResult<PgSession> {
        let mut conn = self.pool.acquire().await?;
        let pid: i32 = sqlx::query_scalar("SELECT pg_backend_pid()")
            .fetch_one(&mut *conn)
            .await?;
        let id = ConnectionId(pid as u64);

        debug!(connection = %id, "Checked out pooled connection");

        Ok(PgSession::new(id, SessionConn::Pooled(conn)).with_notify(self.notify.clone()))
    }

    async fn release(&self, lease: Lease<PgSession>) {
        let mut session = lease.lock().await;
        match session.reset().await {
            Ok(true) => warn!(
                connection = %session.id(),
                "Pooled connection released inside a transaction; rolled back"
            ),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Failed to roll back pooled connection"),
        }
    }
}

#[async_trait]
impl Adapter for PoolAdapter {
    type Conn = PgSession;

    async fn checkout<F, Fut, R>(&self, work: F) -> DbResult<R>
    where
        F: FnOnce(Lease<Self::Conn>) -> Fut + Send,
        Fut: Future<Output = DbResult<R>> + Send,
        R: Send,
    {
        if let Some(lease) = held::<PgSession>(self.id) {
            return work(lease).await;
        }

        let lease = Lease::new(self.acquire().await?);
        let result = hold(self.id, &lease, work(lease.clone())).await;
        self.release(lease).await;
        result
    }

    async fn wake_worker_after_commit(&self) -> bool {
        let Some(notify) = &self.notify else {
            return false;
        };
        match held::<PgSession>(self.id) {
            Some(lease) => {
                let mut session = lease.lock().await;
                session.request_wake()
            }
            // No session in this task, so no transaction to wait for.
            None => {
                notify.notify_one();
                true
            }
        }
    }
}

impl std::fmt::Debug for PoolAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolAdapter")
            .field("id", &self.id)
            .field("size", &self.pool.size())
            .field("idle", &self.pool.num_idle())
            .finish()
    }
}
