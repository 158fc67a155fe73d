//! Session domain object
//!
//! A `Session` owns one backend connection per successfully initialized
//! backend for its whole lifetime and never shares them with another session.
//! Call paths snapshot what they need under a read lock and release it before
//! any network I/O; the write lock is held only for map mutation during
//! backend re-initialization and teardown.
//!
//! Close semantics: the atomic `closed` flag rejects new calls immediately,
//! in-flight calls drain to zero, then every connection is torn down. The
//! in-flight counter is incremented before the closed check, which closes the
//! race between a call starting and `close()` deciding nothing is running.

use crate::auth::Identity;
use crate::backend::{BackendConnection, BackendConnector, CircuitBreaker};
use crate::capability::{AggregatedCapabilities, RouteEntry, RoutingTable};
use crate::config::{BackendConfig, RecoveryConfig};
use crate::error::{BackendError, BackendResult, Result, SessionError, SessionResult};
use crate::metrics::GatewayMetrics;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use rmcp::model::{CallToolResult, GetPromptResult, Prompt, ReadResourceResult, Resource, Tool};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::timeout;

/// Per-backend recovery state: a coalescing lock so concurrent callers share
/// one recreation, and a breaker guarding the credential path.
struct BackendRecovery {
    coalesce: Mutex<()>,
    breaker: CircuitBreaker,
    backoff: Duration,
}

/// One client's aggregation session.
pub struct Session {
    id: String,
    identity: Identity,
    created_at: DateTime<Utc>,
    connections: RwLock<HashMap<String, Arc<dyn BackendConnection>>>,
    /// Backend-issued session tokens, tracked apart from the connections for
    /// observability and re-initialization bookkeeping.
    backend_session_ids: RwLock<HashMap<String, String>>,
    routing: RwLock<RoutingTable>,
    capabilities: RwLock<AggregatedCapabilities>,
    closed: AtomicBool,
    in_flight: AtomicUsize,
    drained: Notify,
    call_timeout: Duration,
    recovery: HashMap<String, BackendRecovery>,
    backends: HashMap<String, BackendConfig>,
    connector: Arc<dyn BackendConnector>,
    metrics: Arc<GatewayMetrics>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: String,
        identity: Identity,
        connections: HashMap<String, Arc<dyn BackendConnection>>,
        capabilities: AggregatedCapabilities,
        routing: RoutingTable,
        backends: HashMap<String, BackendConfig>,
        connector: Arc<dyn BackendConnector>,
        call_timeout: Duration,
        recovery: &RecoveryConfig,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        let backend_session_ids = connections
            .iter()
            .map(|(id, c)| (id.clone(), c.session_token().to_string()))
            .collect();
        let recovery_map = backends
            .keys()
            .map(|backend| {
                (
                    backend.clone(),
                    BackendRecovery {
                        coalesce: Mutex::new(()),
                        breaker: CircuitBreaker::new(
                            backend.clone(),
                            recovery.circuit_failure_threshold,
                            Duration::from_secs(recovery.circuit_cooldown_secs),
                        ),
                        backoff: Duration::from_millis(recovery.backoff_ms),
                    },
                )
            })
            .collect();

        Self {
            id,
            identity,
            created_at: Utc::now(),
            connections: RwLock::new(connections),
            backend_session_ids: RwLock::new(backend_session_ids),
            routing: RwLock::new(routing),
            capabilities: RwLock::new(capabilities),
            closed: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
            call_timeout,
            recovery: recovery_map,
            backends,
            connector,
            metrics,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn backend_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.connections.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Backend-issued session tokens by backend id. Tokens rotate whenever a
    /// backend is re-initialized.
    pub async fn backend_session_ids(&self) -> HashMap<String, String> {
        self.backend_session_ids.read().await.clone()
    }

    pub async fn tools(&self) -> Vec<Tool> {
        self.capabilities.read().await.tools.clone()
    }

    pub async fn resources(&self) -> Vec<Resource> {
        self.capabilities.read().await.resources.clone()
    }

    pub async fn prompts(&self) -> Vec<Prompt> {
        self.capabilities.read().await.prompts.clone()
    }

    pub async fn routes(&self) -> RoutingTable {
        self.routing.read().await.clone()
    }

    pub(crate) async fn connections_snapshot(&self) -> Vec<(String, Arc<dyn BackendConnection>)> {
        self.connections
            .read()
            .await
            .iter()
            .map(|(id, c)| (id.clone(), c.clone()))
            .collect()
    }

    /// Call a tool by its exposed name, dispatching the original un-rewritten
    /// name to the owning backend.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<CallToolResult> {
        let _guard = self.begin_operation()?;
        let route = self.resolve(RouteKind::Tool, name).await?;

        let original = route.original;
        self.dispatch(&route.backend, move |conn| {
            let name = original.clone();
            let arguments = arguments.clone();
            async move { conn.call_tool(&name, arguments).await }.boxed()
        })
        .await
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        let _guard = self.begin_operation()?;
        let route = self.resolve(RouteKind::Resource, uri).await?;

        let original = route.original;
        self.dispatch(&route.backend, move |conn| {
            let uri = original.clone();
            async move { conn.read_resource(&uri).await }.boxed()
        })
        .await
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Result<GetPromptResult> {
        let _guard = self.begin_operation()?;
        let route = self.resolve(RouteKind::Prompt, name).await?;

        let original = route.original;
        self.dispatch(&route.backend, move |conn| {
            let name = original.clone();
            let arguments = arguments.clone();
            async move { conn.get_prompt(&name, arguments).await }.boxed()
        })
        .await
    }

    /// Reject new calls, drain in-flight ones, then close every connection.
    /// Idempotent; a second call returns Ok without re-closing anything.
    pub async fn close(&self) -> SessionResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::debug!(
            session_id = %self.id,
            uptime_secs = (Utc::now() - self.created_at).num_seconds(),
            "Closing session"
        );

        // Register interest before checking the counter so a decrement
        // between check and await cannot be missed.
        loop {
            let drained = self.drained.notified();
            if self.in_flight.load(Ordering::Acquire) == 0 {
                break;
            }
            drained.await;
        }

        let connections: Vec<(String, Arc<dyn BackendConnection>)> = {
            let mut map = self.connections.write().await;
            map.drain().collect()
        };
        self.backend_session_ids.write().await.clear();
        *self.routing.write().await = RoutingTable::new();
        *self.capabilities.write().await = AggregatedCapabilities::default();

        let results = futures::future::join_all(connections.into_iter().map(
            |(backend, connection)| async move {
                let result = connection.close().await;
                (backend, result)
            },
        ))
        .await;

        let mut failed = 0usize;
        let mut details: Vec<String> = Vec::new();
        for (backend, result) in results {
            match result {
                Ok(()) => {
                    tracing::debug!(session_id = %self.id, backend = %backend, "Backend connection closed")
                }
                Err(e) => {
                    tracing::warn!(session_id = %self.id, backend = %backend, error = %e, "Backend close failed");
                    failed += 1;
                    details.push(format!("{}: {}", backend, e));
                }
            }
        }

        if failed == 0 {
            Ok(())
        } else {
            Err(SessionError::CloseFailed {
                id: self.id.clone(),
                failed,
                details: details.join("; "),
            })
        }
    }

    fn begin_operation(&self) -> SessionResult<InFlightGuard<'_>> {
        // Increment before the closed check; see the module docs.
        let guard = InFlightGuard::acquire(self);
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::Closed {
                id: self.id.clone(),
            });
        }
        Ok(guard)
    }

    async fn resolve(&self, kind: RouteKind, exposed: &str) -> Result<RouteEntry> {
        let routing = self.routing.read().await;
        let route = match kind {
            RouteKind::Tool => routing.route_tool(exposed),
            RouteKind::Resource => routing.route_resource(exposed),
            RouteKind::Prompt => routing.route_prompt(exposed),
        };
        if let Some(route) = route {
            return Ok(route.clone());
        }
        drop(routing);

        if self.connections.read().await.is_empty() {
            Err(SessionError::NoBackendsAvailable.into())
        } else {
            Err(SessionError::OperationNotFound {
                operation: exposed.to_string(),
            }
            .into())
        }
    }

    async fn connection(&self, backend: &str) -> BackendResult<Arc<dyn BackendConnection>> {
        self.connections
            .read()
            .await
            .get(backend)
            .cloned()
            .ok_or_else(|| BackendError::Unavailable {
                backend: backend.to_string(),
                reason: "no live connection".to_string(),
            })
    }

    /// Run one backend operation with the per-call timeout. A recoverable
    /// failure (expired backend session, rejected credentials) triggers one
    /// re-initialization and one retry; the retry's error is surfaced as-is.
    async fn dispatch<T, F>(&self, backend: &str, op: F) -> Result<T>
    where
        T: Send,
        F: Fn(Arc<dyn BackendConnection>) -> BoxFuture<'static, BackendResult<T>>,
    {
        let started = std::time::Instant::now();
        let connection = match self.connection(backend).await {
            Ok(c) => c,
            Err(e) => {
                self.metrics.record_call(false, 0);
                return Err(e.into());
            }
        };

        match self.attempt(backend, op(connection.clone())).await {
            Ok(value) => {
                self.metrics
                    .record_call(true, started.elapsed().as_millis() as u64);
                Ok(value)
            }
            Err(cause) if cause.is_recoverable() => {
                let fresh = match self.reinitialize_backend(backend, &connection, &cause).await {
                    Ok(fresh) => fresh,
                    Err(e) => {
                        self.metrics.record_call(false, 0);
                        return Err(e);
                    }
                };
                match self.attempt(backend, op(fresh)).await {
                    Ok(value) => {
                        self.metrics
                            .record_call(true, started.elapsed().as_millis() as u64);
                        Ok(value)
                    }
                    Err(e) => {
                        self.metrics.record_call(false, 0);
                        Err(e.into())
                    }
                }
            }
            Err(e) => {
                self.metrics.record_call(false, 0);
                Err(e.into())
            }
        }
    }

    async fn attempt<T>(
        &self,
        backend: &str,
        fut: BoxFuture<'_, BackendResult<T>>,
    ) -> BackendResult<T> {
        match timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout {
                backend: backend.to_string(),
                timeout_secs: self.call_timeout.as_secs(),
            }),
        }
    }

    /// Recreate one backend connection after it reported an expired session
    /// or rejected credentials. Concurrent callers for the same backend are
    /// coalesced behind one recreation; late arrivals find the fresh
    /// connection already swapped in and reuse it.
    async fn reinitialize_backend(
        &self,
        backend: &str,
        stale: &Arc<dyn BackendConnection>,
        cause: &BackendError,
    ) -> Result<Arc<dyn BackendConnection>> {
        let (Some(recovery), Some(config)) =
            (self.recovery.get(backend), self.backends.get(backend))
        else {
            return Err(BackendError::Unavailable {
                backend: backend.to_string(),
                reason: format!("not recoverable: {}", cause),
            }
            .into());
        };

        let credential_failure = matches!(cause, BackendError::Unauthorized { .. });
        if credential_failure {
            recovery.breaker.check()?;
            tokio::time::sleep(recovery.backoff).await;
        }

        let _coalesce = recovery.coalesce.lock().await;

        // Another caller may have finished recreating while we waited.
        if let Some(current) = self.connections.read().await.get(backend) {
            if !Arc::ptr_eq(current, stale) {
                return Ok(current.clone());
            }
        }

        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::Closed {
                id: self.id.clone(),
            }
            .into());
        }

        let old_token = stale.session_token().to_string();
        if let Err(e) = stale.close().await {
            tracing::debug!(session_id = %self.id, backend = %backend, error = %e, "Stale connection close failed");
        }

        match self.connector.connect(config, &self.identity).await {
            Ok(fresh) => {
                self.connections
                    .write()
                    .await
                    .insert(backend.to_string(), fresh.clone());
                self.backend_session_ids
                    .write()
                    .await
                    .insert(backend.to_string(), fresh.session_token().to_string());
                if credential_failure {
                    recovery.breaker.record_success();
                }
                self.metrics.record_backend_reinit(true);
                tracing::info!(
                    session_id = %self.id,
                    backend = %backend,
                    old_backend_session = %old_token,
                    new_backend_session = %fresh.session_token(),
                    cause = %cause,
                    "Backend reinitialized"
                );
                Ok(fresh)
            }
            Err(e) => {
                if credential_failure {
                    recovery.breaker.record_failure();
                }
                self.metrics.record_backend_reinit(false);
                tracing::warn!(
                    session_id = %self.id,
                    backend = %backend,
                    error = %e,
                    "Backend reinitialization failed"
                );
                Err(e.into())
            }
        }
    }
}

enum RouteKind {
    Tool,
    Resource,
    Prompt,
}

/// RAII in-flight marker. Dropping the last one wakes `close()`.
struct InFlightGuard<'a> {
    session: &'a Session,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(session: &'a Session) -> Self {
        session.in_flight.fetch_add(1, Ordering::AcqRel);
        Self { session }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.session.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.session.drained.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendTransport;
    use rmcp::model::Content;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    fn ok_result() -> CallToolResult {
        CallToolResult::success(vec![Content::text("ok")])
    }

    /// Connection whose tool calls fail according to a script, then succeed.
    struct ScriptedConnection {
        id: String,
        token: String,
        failures: StdMutex<VecDeque<BackendError>>,
        calls: AtomicUsize,
        closes: AtomicUsize,
        seen_names: StdMutex<Vec<String>>,
        close_error: bool,
    }

    impl ScriptedConnection {
        fn new(id: &str, token: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                token: token.to_string(),
                failures: StdMutex::new(VecDeque::new()),
                calls: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                seen_names: StdMutex::new(Vec::new()),
                close_error: false,
            })
        }

        fn failing_close(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                token: "t".to_string(),
                failures: StdMutex::new(VecDeque::new()),
                calls: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                seen_names: StdMutex::new(Vec::new()),
                close_error: true,
            })
        }

        fn script_failure(&self, error: BackendError) {
            self.failures.lock().unwrap().push_back(error);
        }
    }

    #[async_trait::async_trait]
    impl BackendConnection for ScriptedConnection {
        fn backend_id(&self) -> &str {
            &self.id
        }

        fn endpoint(&self) -> &str {
            "mock"
        }

        fn session_token(&self) -> &str {
            &self.token
        }

        async fn list_tools(&self) -> BackendResult<Vec<Tool>> {
            Ok(Vec::new())
        }

        async fn list_resources(&self) -> BackendResult<Vec<Resource>> {
            Ok(Vec::new())
        }

        async fn list_prompts(&self) -> BackendResult<Vec<Prompt>> {
            Ok(Vec::new())
        }

        async fn call_tool(
            &self,
            name: &str,
            _arguments: Option<serde_json::Map<String, serde_json::Value>>,
        ) -> BackendResult<CallToolResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_names.lock().unwrap().push(name.to_string());
            if let Some(error) = self.failures.lock().unwrap().pop_front() {
                return Err(error);
            }
            Ok(ok_result())
        }

        async fn read_resource(&self, _uri: &str) -> BackendResult<ReadResourceResult> {
            Err(BackendError::Unavailable {
                backend: self.id.clone(),
                reason: "not scripted".to_string(),
            })
        }

        async fn get_prompt(
            &self,
            _name: &str,
            _arguments: Option<serde_json::Map<String, serde_json::Value>>,
        ) -> BackendResult<GetPromptResult> {
            Err(BackendError::Unavailable {
                backend: self.id.clone(),
                reason: "not scripted".to_string(),
            })
        }

        async fn ping(&self) -> BackendResult<()> {
            Ok(())
        }

        async fn close(&self) -> BackendResult<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.close_error {
                Err(BackendError::Protocol {
                    backend: self.id.clone(),
                    reason: "close refused".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    /// Connector handing out fresh scripted connections with rotating tokens.
    struct ScriptedConnector {
        connects: AtomicUsize,
        fail: bool,
    }

    impl ScriptedConnector {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                connects: AtomicUsize::new(0),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                connects: AtomicUsize::new(0),
                fail: true,
            })
        }
    }

    #[async_trait::async_trait]
    impl BackendConnector for ScriptedConnector {
        async fn connect(
            &self,
            backend: &BackendConfig,
            _identity: &Identity,
        ) -> BackendResult<Arc<dyn BackendConnection>> {
            let n = self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(BackendError::ConnectFailed {
                    backend: backend.id.clone(),
                    reason: "refused".to_string(),
                });
            }
            Ok(ScriptedConnection::new(&backend.id, &format!("epoch-{}", n + 1)))
        }
    }

    fn backend_config(id: &str) -> BackendConfig {
        BackendConfig {
            id: id.to_string(),
            transport: BackendTransport::stdio("true"),
            auth: None,
            enabled: true,
        }
    }

    fn routed_session(
        connections: Vec<Arc<ScriptedConnection>>,
        connector: Arc<dyn BackendConnector>,
    ) -> Session {
        let mut routing = RoutingTable::new();
        let mut map: HashMap<String, Arc<dyn BackendConnection>> = HashMap::new();
        let mut backends = HashMap::new();
        for conn in connections {
            let backend = conn.backend_id().to_string();
            routing.insert_tool(RouteEntry::new(
                format!("{}_op", backend),
                &backend,
                "do_op",
            ));
            backends.insert(backend.clone(), backend_config(&backend));
            map.insert(backend, conn as Arc<dyn BackendConnection>);
        }
        Session::new(
            "s-test".to_string(),
            Identity::anonymous(),
            map,
            AggregatedCapabilities::default(),
            routing,
            backends,
            connector,
            Duration::from_secs(5),
            &RecoveryConfig {
                backoff_ms: 1,
                circuit_failure_threshold: 3,
                circuit_cooldown_secs: 30,
            },
            Arc::new(GatewayMetrics::new()),
        )
    }

    #[tokio::test]
    async fn test_dispatch_uses_original_name() {
        let conn = ScriptedConnection::new("fs", "t1");
        let session = routed_session(vec![conn.clone()], ScriptedConnector::new());

        session.call_tool("fs_op", None).await.unwrap();

        assert_eq!(conn.seen_names.lock().unwrap().as_slice(), ["do_op"]);
    }

    #[tokio::test]
    async fn test_unknown_operation_vs_no_backends() {
        let conn = ScriptedConnection::new("fs", "t1");
        let session = routed_session(vec![conn], ScriptedConnector::new());
        let err = session.call_tool("nope", None).await.unwrap_err();
        assert!(err
            .to_string()
            .contains("No such operation: 'nope'"));

        let empty = routed_session(vec![], ScriptedConnector::new());
        let err = empty.call_tool("anything", None).await.unwrap_err();
        assert!(err.to_string().contains("No backends available"));
    }

    #[tokio::test]
    async fn test_closed_session_rejects_calls() {
        let conn = ScriptedConnection::new("fs", "t1");
        let session = routed_session(vec![conn.clone()], ScriptedConnector::new());

        session.close().await.unwrap();
        assert_eq!(conn.closes.load(Ordering::SeqCst), 1);

        let err = session.call_tool("fs_op", None).await.unwrap_err();
        assert!(err.to_string().contains("closed"));
        assert_eq!(conn.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let conn = ScriptedConnection::new("fs", "t1");
        let session = routed_session(vec![conn.clone()], ScriptedConnector::new());

        session.close().await.unwrap();
        session.close().await.unwrap();
        assert_eq!(conn.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_collects_backend_errors() {
        let good = ScriptedConnection::new("fs", "t1");
        let bad = ScriptedConnection::failing_close("db");
        let session = routed_session(vec![good, bad], ScriptedConnector::new());

        let err = session.close().await.unwrap_err();
        match err {
            SessionError::CloseFailed { failed, details, .. } => {
                assert_eq!(failed, 1);
                assert!(details.contains("db"));
            }
            other => panic!("expected CloseFailed, got {other:?}"),
        }
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_expired_backend_gets_one_reinit_and_one_retry() {
        let conn = ScriptedConnection::new("fs", "t1");
        conn.script_failure(BackendError::SessionExpired {
            backend: "fs".to_string(),
        });
        let connector = ScriptedConnector::new();
        let session = routed_session(vec![conn.clone()], connector.clone());

        let result = session.call_tool("fs_op", None).await;
        assert!(result.is_ok());

        // Original connection: one failed call, then closed by the re-init.
        assert_eq!(conn.calls.load(Ordering::SeqCst), 1);
        assert_eq!(conn.closes.load(Ordering::SeqCst), 1);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);

        // Token bookkeeping rotated to the fresh connection's epoch.
        let tokens = session.backend_session_ids().await;
        assert_eq!(tokens.get("fs").map(String::as_str), Some("epoch-1"));
    }

    #[tokio::test]
    async fn test_failed_reinit_surfaces_connect_error() {
        let conn = ScriptedConnection::new("fs", "t1");
        conn.script_failure(BackendError::SessionExpired {
            backend: "fs".to_string(),
        });
        let session = routed_session(vec![conn.clone()], ScriptedConnector::failing());

        let err = session.call_tool("fs_op", None).await.unwrap_err();
        assert!(err.to_string().contains("Connection failed"));
        assert_eq!(conn.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_accessors_return_copies() {
        let conn = ScriptedConnection::new("fs", "t1");
        let session = routed_session(vec![conn], ScriptedConnector::new());

        let mut routes = session.routes().await;
        routes.insert_tool(RouteEntry::new("rogue", "x", "rogue"));

        // Mutating the copy must not affect the session.
        let err = session.call_tool("rogue", None).await.unwrap_err();
        assert!(err.to_string().contains("No such operation"));
    }
}
