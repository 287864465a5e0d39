//! In-memory adapter used by the integration tests.
//!
//! `MockConnection` behaves like a backend session that remembers which
//! statement names were prepared on it. Tests keep a [`MockHandle`] to inspect
//! what reached the "server" and to inject failures while the adapter owns
//! the connection. [`capture_logs`] records tracing events for assertions.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use pg_command_adapter::db::adapter::{Adapter, AdapterId, Lease, held, hold};
use pg_command_adapter::db::connection::{
    Connection, ConnectionId, RawColumn, RawResult, TransactionStatus,
};
use pg_command_adapter::error::{DbError, DbResult};
use pg_command_adapter::models::WireParam;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

/// A statement as it reached the mock backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub sql: String,
    pub params: Vec<WireParam>,
}

#[derive(Debug, Default)]
pub struct MockState {
    pub status: TransactionStatus,
    /// Statement names the backend session knows.
    pub server_statements: HashSet<String>,
    /// Names passed to `prepare`, in order.
    pub prepares: Vec<String>,
    /// Every `exec_prepared` attempt, failed ones included.
    pub prepared_execs: Vec<Call>,
    pub raw_execs: Vec<Call>,
    /// Fail this many upcoming `exec_prepared` calls as "unknown statement".
    pub fail_prepared: usize,
    /// Status the session switches to when an injected failure fires.
    pub status_on_failure: Option<TransactionStatus>,
    /// SQLSTATE of a generic error for the next `exec_prepared`.
    pub next_error: Option<String>,
    /// Result returned for every query.
    pub result: RawResult,
    /// Return the first parameter as a JSON column named `args`.
    pub echo_args: bool,
}

pub type MockHandle = Arc<Mutex<MockState>>;

pub struct MockConnection {
    id: ConnectionId,
    state: MockHandle,
}

impl MockConnection {
    pub fn new(id: ConnectionId) -> (Self, MockHandle) {
        let state = MockHandle::default();
        (
            Self {
                id,
                state: state.clone(),
            },
            state,
        )
    }

    fn respond(state: &MockState, params: &[WireParam]) -> RawResult {
        if state.echo_args {
            let mut raw = RawResult::new(vec![RawColumn::new("args", 114)]);
            raw.push_row([params.first().and_then(|p| p.as_text()).map(|t| t.into_owned())]);
            return raw;
        }
        state.result.clone()
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.state.lock().status
    }

    async fn exec_raw(&mut self, sql: &str, params: &[WireParam]) -> DbResult<RawResult> {
        let mut state = self.state.lock();
        state.raw_execs.push(Call {
            sql: sql.to_string(),
            params: params.to_vec(),
        });

        match sql.trim().to_ascii_uppercase().as_str() {
            "BEGIN" => {
                state.status = TransactionStatus::Active;
                Ok(RawResult::default())
            }
            "COMMIT" | "ROLLBACK" => {
                state.status = TransactionStatus::Idle;
                Ok(RawResult::default())
            }
            _ => Ok(Self::respond(&state, params)),
        }
    }

    async fn prepare(&mut self, statement: &str, _sql: &str, _params: &[WireParam]) -> DbResult<()> {
        let mut state = self.state.lock();
        state.prepares.push(statement.to_string());
        state.server_statements.insert(statement.to_string());
        Ok(())
    }

    async fn exec_prepared(
        &mut self,
        statement: &str,
        sql: &str,
        params: &[WireParam],
    ) -> DbResult<RawResult> {
        let mut state = self.state.lock();
        state.prepared_execs.push(Call {
            sql: sql.to_string(),
            params: params.to_vec(),
        });

        if let Some(code) = state.next_error.take() {
            return Err(DbError::database("injected failure", Some(code), "none"));
        }
        if state.fail_prepared > 0 {
            state.fail_prepared -= 1;
            if let Some(status) = state.status_on_failure {
                state.status = status;
            }
            return Err(DbError::unknown_prepared_statement(statement));
        }
        if !state.server_statements.contains(statement) {
            return Err(DbError::unknown_prepared_statement(statement));
        }
        Ok(Self::respond(&state, params))
    }
}

/// Re-entrant adapter over one [`MockConnection`].
pub struct MockAdapter {
    id: AdapterId,
    lease: Lease<MockConnection>,
    gate: tokio::sync::Mutex<()>,
    supports_wake: bool,
    pub checkouts: AtomicUsize,
    pub wakes: AtomicUsize,
}

impl MockAdapter {
    pub fn new() -> (Self, MockHandle) {
        Self::build(false)
    }

    /// An adapter whose backend can signal workers.
    pub fn with_wake() -> (Self, MockHandle) {
        Self::build(true)
    }

    fn build(supports_wake: bool) -> (Self, MockHandle) {
        let (conn, state) = MockConnection::new(ConnectionId::next());
        (
            Self {
                id: AdapterId::next(),
                lease: Lease::new(conn),
                gate: tokio::sync::Mutex::new(()),
                supports_wake,
                checkouts: AtomicUsize::new(0),
                wakes: AtomicUsize::new(0),
            },
            state,
        )
    }

    /// Outermost checkouts performed so far.
    pub fn checkout_count(&self) -> usize {
        self.checkouts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    type Conn = MockConnection;

    async fn checkout<F, Fut, R>(&self, work: F) -> DbResult<R>
    where
        F: FnOnce(Lease<Self::Conn>) -> Fut + Send,
        Fut: Future<Output = DbResult<R>> + Send,
        R: Send,
    {
        if let Some(lease) = held::<MockConnection>(self.id) {
            return work(lease).await;
        }

        let _gate = self.gate.lock().await;
        self.checkouts.fetch_add(1, Ordering::SeqCst);
        let lease = self.lease.clone();
        hold(self.id, &lease, work(lease.clone())).await
    }

    async fn wake_worker_after_commit(&self) -> bool {
        if !self.supports_wake {
            return false;
        }
        self.wakes.fetch_add(1, Ordering::SeqCst);
        true
    }
}

/// Adapter that keeps the default wake behavior.
pub struct PlainAdapter {
    inner: MockAdapter,
}

impl PlainAdapter {
    pub fn new() -> (Self, MockHandle) {
        let (inner, state) = MockAdapter::new();
        (Self { inner }, state)
    }
}

#[async_trait]
impl Adapter for PlainAdapter {
    type Conn = MockConnection;

    async fn checkout<F, Fut, R>(&self, work: F) -> DbResult<R>
    where
        F: FnOnce(Lease<Self::Conn>) -> Fut + Send,
        Fut: Future<Output = DbResult<R>> + Send,
        R: Send,
    {
        self.inner.checkout(work).await
    }
}

/// A result with one column per built-in cast rule.
pub fn typed_result() -> RawResult {
    let mut raw = RawResult::new(vec![
        RawColumn::new("job_id", 20),
        RawColumn::new("priority", 21),
        RawColumn::new("error_count", 23),
        RawColumn::new("run_at", 1184),
        RawColumn::new("locked", 16),
        RawColumn::new("args", 114),
        RawColumn::new("queue", 25),
        RawColumn::new("last_error", 25),
    ]);
    raw.push_row([
        Some("42"),
        Some("100"),
        Some("0"),
        Some("2024-06-01 12:30:00.250000+00"),
        Some("t"),
        Some(r#"[1,{"to":"ada@example.com"}]"#),
        Some("mailers"),
        None,
    ]);
    raw
}

/// A tracing event as recorded by [`CapturedLogs`].
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub fields: HashMap<String, String>,
}

impl CapturedEvent {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Layer keeping every event emitted while installed.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<CapturedEvent>>>);

impl CapturedLogs {
    pub fn at_level(&self, level: Level) -> Vec<CapturedEvent> {
        self.0
            .lock()
            .iter()
            .filter(|e| e.level == level)
            .cloned()
            .collect()
    }
}

#[derive(Default)]
struct FieldRecorder(HashMap<String, String>);

impl Visit for FieldRecorder {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{:?}", value));
    }
}

impl<S: Subscriber> Layer<S> for CapturedLogs {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut recorder = FieldRecorder::default();
        event.record(&mut recorder);
        self.0.lock().push(CapturedEvent {
            level: *event.metadata().level(),
            fields: recorder.0,
        });
    }
}

/// Record tracing events on the current thread until the guard drops.
pub fn capture_logs() -> (CapturedLogs, DefaultGuard) {
    let logs = CapturedLogs::default();
    let guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(logs.clone()));
    (logs, guard)
}
