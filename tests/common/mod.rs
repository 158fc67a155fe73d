//! Shared mock backend machinery for integration tests.
//!
//! `MockConnector` plays the part of real backend MCP servers: each backend
//! id maps to a declarative `BackendSpec`, every connect mints a fresh
//! connection with a rotating epoch token, and tests can reach the live
//! connections afterwards to script call failures or inspect what the
//! gateway actually sent.

#![allow(dead_code)]

use async_trait::async_trait;
use manifold::auth::Identity;
use manifold::backend::{BackendConnection, BackendConnector};
use manifold::capability::PrefixingAggregator;
use manifold::config::{BackendConfig, BackendTransport, GatewayConfig};
use manifold::error::{BackendError, BackendResult};
use manifold::metrics::GatewayMetrics;
use manifold::session::{MemorySessionStore, Session, SessionFactory, SessionManager};
use rmcp::model::{
    AnnotateAble, CallToolResult, Content, GetPromptResult, Prompt, RawResource,
    ReadResourceResult, Resource, Tool,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Declarative behavior for one mock backend.
#[derive(Clone, Default)]
pub struct BackendSpec {
    /// Tool names the backend advertises.
    pub tools: Vec<String>,
    /// Resource URIs the backend advertises.
    pub resources: Vec<String>,
    /// Prompt names the backend advertises.
    pub prompts: Vec<String>,
    /// Refuse every connect attempt.
    pub refuse_connects: bool,
    /// Answer every tool call with a session-expired error.
    pub expire_all_calls: bool,
    /// Simulated latency of every tool call.
    pub call_delay: Option<Duration>,
}

impl BackendSpec {
    pub fn with_tools(names: &[&str]) -> Self {
        Self {
            tools: names.iter().map(|s| s.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn refusing() -> Self {
        Self {
            refuse_connects: true,
            ..Self::default()
        }
    }
}

fn tool(name: &str) -> Tool {
    serde_json::from_value(serde_json::json!({
        "name": name,
        "inputSchema": { "type": "object" }
    }))
    .expect("tool json")
}

fn prompt(name: &str) -> Prompt {
    serde_json::from_value(serde_json::json!({ "name": name })).expect("prompt json")
}

/// One live mock connection. Records every original name the gateway
/// dispatches to it, and flags a close that raced an in-flight call.
pub struct MockConnection {
    backend: String,
    token: String,
    spec: BackendSpec,
    pub seen_calls: Mutex<Vec<String>>,
    pub seen_resource_uris: Mutex<Vec<String>>,
    pub seen_prompts: Mutex<Vec<String>>,
    failures: Mutex<VecDeque<BackendError>>,
    pub closed: AtomicBool,
    calls_in_progress: AtomicUsize,
    pub closed_while_busy: AtomicBool,
}

impl MockConnection {
    fn new(backend: &str, epoch: usize, spec: BackendSpec) -> Self {
        Self {
            backend: backend.to_string(),
            token: format!("{}-epoch-{}", backend, epoch),
            spec,
            seen_calls: Mutex::new(Vec::new()),
            seen_resource_uris: Mutex::new(Vec::new()),
            seen_prompts: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            calls_in_progress: AtomicUsize::new(0),
            closed_while_busy: AtomicBool::new(false),
        }
    }

    /// Queue an error for the next tool call; later calls succeed again.
    pub fn script_failure(&self, error: BackendError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn call_count(&self) -> usize {
        self.seen_calls.lock().unwrap().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendConnection for MockConnection {
    fn backend_id(&self) -> &str {
        &self.backend
    }

    fn endpoint(&self) -> &str {
        "mock"
    }

    fn session_token(&self) -> &str {
        &self.token
    }

    async fn list_tools(&self) -> BackendResult<Vec<Tool>> {
        Ok(self.spec.tools.iter().map(|n| tool(n)).collect())
    }

    async fn list_resources(&self) -> BackendResult<Vec<Resource>> {
        Ok(self
            .spec
            .resources
            .iter()
            .map(|uri| RawResource::new(uri.as_str(), uri.to_string()).no_annotation())
            .collect())
    }

    async fn list_prompts(&self) -> BackendResult<Vec<Prompt>> {
        Ok(self.spec.prompts.iter().map(|n| prompt(n)).collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        _arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> BackendResult<CallToolResult> {
        self.calls_in_progress.fetch_add(1, Ordering::SeqCst);
        self.seen_calls.lock().unwrap().push(name.to_string());
        if let Some(delay) = self.spec.call_delay {
            tokio::time::sleep(delay).await;
        }
        self.calls_in_progress.fetch_sub(1, Ordering::SeqCst);

        if let Some(error) = self.failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        if self.spec.expire_all_calls {
            return Err(BackendError::SessionExpired {
                backend: self.backend.clone(),
            });
        }
        Ok(CallToolResult::success(vec![Content::text(format!(
            "{}:{}",
            self.backend, name
        ))]))
    }

    async fn read_resource(&self, uri: &str) -> BackendResult<ReadResourceResult> {
        self.seen_resource_uris.lock().unwrap().push(uri.to_string());
        Ok(ReadResourceResult { contents: vec![] })
    }

    async fn get_prompt(
        &self,
        name: &str,
        _arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> BackendResult<GetPromptResult> {
        self.seen_prompts.lock().unwrap().push(name.to_string());
        Ok(GetPromptResult {
            description: None,
            messages: vec![],
        })
    }

    async fn ping(&self) -> BackendResult<()> {
        Ok(())
    }

    async fn close(&self) -> BackendResult<()> {
        if self.calls_in_progress.load(Ordering::SeqCst) > 0 {
            self.closed_while_busy.store(true, Ordering::SeqCst);
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Connector minting mock connections per backend spec.
pub struct MockConnector {
    specs: HashMap<String, BackendSpec>,
    epochs: Mutex<HashMap<String, usize>>,
    connections: Mutex<Vec<Arc<MockConnection>>>,
    refuse_reconnects: AtomicBool,
}

impl MockConnector {
    pub fn new(specs: HashMap<String, BackendSpec>) -> Arc<Self> {
        Arc::new(Self {
            specs,
            epochs: Mutex::new(HashMap::new()),
            connections: Mutex::new(Vec::new()),
            refuse_reconnects: AtomicBool::new(false),
        })
    }

    /// Refuse every connect from now on; existing connections stay up.
    pub fn refuse_further_connects(&self) {
        self.refuse_reconnects.store(true, Ordering::SeqCst);
    }

    /// How many connections were successfully made to `backend`.
    pub fn connections_made(&self, backend: &str) -> usize {
        self.epochs.lock().unwrap().get(backend).copied().unwrap_or(0)
    }

    /// Most recently minted connection to `backend`.
    pub fn latest(&self, backend: &str) -> Arc<MockConnection> {
        self.connections
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|c| c.backend == backend)
            .cloned()
            .unwrap_or_else(|| panic!("no connection made to '{backend}'"))
    }

    /// Every connection ever minted to `backend`, oldest first.
    pub fn all(&self, backend: &str) -> Vec<Arc<MockConnection>> {
        self.connections
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.backend == backend)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl BackendConnector for MockConnector {
    async fn connect(
        &self,
        backend: &BackendConfig,
        _identity: &Identity,
    ) -> BackendResult<Arc<dyn BackendConnection>> {
        let spec = self.specs.get(&backend.id).cloned().unwrap_or_default();
        if spec.refuse_connects || self.refuse_reconnects.load(Ordering::SeqCst) {
            return Err(BackendError::ConnectFailed {
                backend: backend.id.clone(),
                reason: "refused".to_string(),
            });
        }
        let epoch = {
            let mut epochs = self.epochs.lock().unwrap();
            let epoch = epochs.entry(backend.id.clone()).or_insert(0);
            *epoch += 1;
            *epoch
        };
        let connection = Arc::new(MockConnection::new(&backend.id, epoch, spec));
        self.connections.lock().unwrap().push(connection.clone());
        Ok(connection)
    }
}

pub fn backend(id: &str) -> BackendConfig {
    BackendConfig {
        id: id.to_string(),
        transport: BackendTransport::stdio("true"),
        auth: None,
        enabled: true,
    }
}

/// A wired gateway core over mock backends.
pub struct Harness {
    pub manager: Arc<SessionManager>,
    pub connector: Arc<MockConnector>,
    pub config: GatewayConfig,
}

pub fn harness(mut config: GatewayConfig, specs: Vec<(&str, BackendSpec)>) -> Harness {
    config.backends = specs.iter().map(|(id, _)| backend(id)).collect();
    let connector = MockConnector::new(
        specs
            .into_iter()
            .map(|(id, spec)| (id.to_string(), spec))
            .collect(),
    );
    let metrics = Arc::new(GatewayMetrics::new());
    let factory = SessionFactory::new(
        connector.clone(),
        Arc::new(PrefixingAggregator::new()),
        &config,
        Arc::clone(&metrics),
    );
    let store = Arc::new(MemorySessionStore::new(Duration::from_secs(
        config.session.ttl_secs,
    )));
    let manager = Arc::new(SessionManager::new(
        store,
        factory,
        config.session.clone(),
        metrics,
    ));
    Harness {
        manager,
        connector,
        config,
    }
}

impl Harness {
    /// Full two-phase session creation against the configured backends.
    pub async fn open_session(&self) -> (String, Arc<Session>) {
        let id = self.manager.generate().await.expect("session id");
        let session = self
            .manager
            .populate(&id, Identity::from_client("it-client", "1.0"), &self.config.backends)
            .await
            .expect("populate");
        (id, session)
    }
}
