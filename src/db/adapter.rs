//! The checkout contract every connection backend implements.
//!
//! An [`Adapter`] hands out exclusive access to one live connection for the
//! duration of a block. Checkout is re-entrant: a task that already holds a
//! lease from an adapter gets that same lease back instead of waiting on
//! itself. Held leases live in a task-local registry keyed by [`AdapterId`],
//! so the registry follows the logical task across `.await` points and is
//! never shared with spawned tasks.

use crate::db::connection::Connection;
use crate::error::DbResult;
use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, MutexGuard};

static NEXT_ADAPTER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of an adapter instance within the reentrancy registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdapterId(u64);

impl AdapterId {
    pub fn next() -> Self {
        Self(NEXT_ADAPTER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for AdapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "adapter#{}", self.0)
    }
}

/// Exclusive access to a checked-out connection.
///
/// Clones share the same connection. Lock it per operation and release the
/// guard before starting a nested checkout.
pub struct Lease<C> {
    conn: Arc<Mutex<C>>,
}

impl<C> Clone for Lease<C> {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
        }
    }
}

impl<C: Connection> Lease<C> {
    pub fn new(conn: C) -> Self {
        Self::from_shared(Arc::new(Mutex::new(conn)))
    }

    pub fn from_shared(conn: Arc<Mutex<C>>) -> Self {
        Self { conn }
    }

    /// Lock the connection for one operation.
    pub async fn lock(&self) -> MutexGuard<'_, C> {
        self.conn.lock().await
    }

    /// Whether two leases refer to the same connection.
    pub fn same_connection(&self, other: &Lease<C>) -> bool {
        Arc::ptr_eq(&self.conn, &other.conn)
    }

    fn erased(&self) -> Arc<dyn Any + Send + Sync> {
        self.conn.clone()
    }
}

impl<C> fmt::Debug for Lease<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("holders", &Arc::strong_count(&self.conn))
            .finish()
    }
}

type HeldLeases = HashMap<AdapterId, Arc<dyn Any + Send + Sync>>;

tokio::task_local! {
    static HELD: HeldLeases;
}

/// The lease the current task holds from `adapter`, if any.
pub fn held<C: Connection>(adapter: AdapterId) -> Option<Lease<C>> {
    HELD.try_with(|held| held.get(&adapter).cloned())
        .ok()
        .flatten()
        .and_then(|conn| conn.downcast::<Mutex<C>>().ok())
        .map(Lease::from_shared)
}

/// Run `fut` with `lease` registered as held from `adapter`.
///
/// Leases already held by the task stay visible inside `fut`.
pub async fn hold<C, Fut>(adapter: AdapterId, lease: &Lease<C>, fut: Fut) -> Fut::Output
where
    C: Connection,
    Fut: Future,
{
    let mut leases = HELD.try_with(|held| held.clone()).unwrap_or_default();
    leases.insert(adapter, lease.erased());
    HELD.scope(leases, fut).await
}

/// A source of connections.
///
/// `checkout` is the one capability every backend must supply.
/// `wake_worker_after_commit` is optional and reports `false` when the
/// backend cannot signal workers.
#[async_trait]
pub trait Adapter: Send + Sync {
    type Conn: Connection;

    /// Run `work` with exclusive access to one connection.
    ///
    /// Must be re-entrant: when the current task already holds a lease from
    /// this adapter, `work` receives that lease and nothing is acquired.
    async fn checkout<F, Fut, R>(&self, work: F) -> DbResult<R>
    where
        F: FnOnce(Lease<Self::Conn>) -> Fut + Send,
        Fut: Future<Output = DbResult<R>> + Send,
        R: Send;

    /// Ask the backend to wake a worker once the current transaction commits.
    async fn wake_worker_after_commit(&self) -> bool {
        false
    }
}
