//! Backend selection at configuration time.

use crate::config::AdapterConfig;
use crate::db::adapter::{Adapter, Lease};
use crate::db::dedicated::PgAdapter;
use crate::db::executor::Executor;
use crate::db::macros::AdapterKind;
use crate::db::pool::PoolAdapter;
use crate::db::session::PgSession;
use crate::error::DbResult;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;

/// One of the bundled adapters, chosen by [`AdapterConfig::kind`].
#[derive(Debug)]
pub enum ConfiguredAdapter {
    Connection(PgAdapter),
    Pool(PoolAdapter),
}

impl ConfiguredAdapter {
    /// Connect the adapter described by `config`.
    pub async fn connect(config: &AdapterConfig, notify: Option<Arc<Notify>>) -> DbResult<Self> {
        info!(adapter = %config.kind, "Connecting adapter");
        match config.kind {
            AdapterKind::Connection => {
                PgAdapter::connect(&config.connection_string, notify)
                    .await
                    .map(Self::Connection)
            }
            AdapterKind::Pool => {
                PoolAdapter::connect(&config.connection_string, &config.pool_options, notify)
                    .await
                    .map(Self::Pool)
            }
        }
    }

    pub fn kind(&self) -> AdapterKind {
        match self {
            Self::Connection(_) => AdapterKind::Connection,
            Self::Pool(_) => AdapterKind::Pool,
        }
    }
}

#[async_trait]
impl Adapter for ConfiguredAdapter {
    type Conn = PgSession;

    async fn checkout<F, Fut, R>(&self, work: F) -> DbResult<R>
    where
        F: FnOnce(Lease<Self::Conn>) -> Fut + Send,
        Fut: Future<Output = DbResult<R>> + Send,
        R: Send,
    {
        crate::impl_adapter_dispatch!(self, a => a.checkout(work).await)
    }

    async fn wake_worker_after_commit(&self) -> bool {
        crate::impl_adapter_dispatch!(self, a => a.wake_worker_after_commit().await)
    }
}

/// Connect the configured adapter and wrap it in an executor.
pub async fn connect(
    config: &AdapterConfig,
    notify: Option<Arc<Notify>>,
) -> DbResult<Executor<ConfiguredAdapter>> {
    let adapter = ConfiguredAdapter::connect(config, notify).await?;
    Ok(Executor::new(adapter).with_prepared_statements(config.statement_cache))
}
