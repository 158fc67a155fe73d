//! Session factory
//!
//! Builds a fully-formed `Session`: connects to every enabled backend in
//! parallel under a concurrency bound, with a per-backend timeout and an
//! overall deadline, then hands the survivors to the capability aggregator.
//!
//! Backend failure is never session failure. A backend that cannot connect
//! is logged and omitted; if every backend fails the factory still returns a
//! session with empty capabilities, whose calls fail with a distinct
//! "no backends available" error.

use crate::auth::Identity;
use crate::backend::{BackendConnection, BackendConnector};
use crate::capability::CapabilityAggregator;
use crate::config::{BackendConfig, FactoryConfig, GatewayConfig, RecoveryConfig};
use crate::error::BackendError;
use crate::metrics::GatewayMetrics;
use crate::session::Session;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

pub struct SessionFactory {
    connector: Arc<dyn BackendConnector>,
    aggregator: Arc<dyn CapabilityAggregator>,
    factory_config: FactoryConfig,
    recovery_config: RecoveryConfig,
    call_timeout: Duration,
    metrics: Arc<GatewayMetrics>,
}

impl SessionFactory {
    pub fn new(
        connector: Arc<dyn BackendConnector>,
        aggregator: Arc<dyn CapabilityAggregator>,
        config: &GatewayConfig,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            connector,
            aggregator,
            factory_config: config.factory.clone(),
            recovery_config: config.recovery.clone(),
            call_timeout: Duration::from_secs(config.session.call_timeout_secs),
            metrics,
        }
    }

    /// Connect, aggregate, assemble. Infallible by design: backend failures
    /// degrade the session instead of failing it.
    pub async fn make_session(
        &self,
        id: String,
        identity: Identity,
        backends: &[BackendConfig],
    ) -> Session {
        let enabled: Vec<BackendConfig> =
            backends.iter().filter(|b| b.enabled).cloned().collect();
        let connect_timeout = Duration::from_secs(self.factory_config.connect_timeout_secs);
        let overall_deadline = Duration::from_secs(self.factory_config.overall_deadline_secs);

        let mut pending: HashSet<String> = enabled.iter().map(|b| b.id.clone()).collect();
        let mut connections: HashMap<String, Arc<dyn BackendConnection>> = HashMap::new();

        let attempt_futures: Vec<_> = enabled
            .iter()
            .map(|backend| {
                let connector = self.connector.clone();
                let identity = identity.clone();
                let backend = backend.clone();
                async move {
                    let started = std::time::Instant::now();
                    let outcome = match timeout(
                        connect_timeout,
                        connector.connect(&backend, &identity),
                    )
                    .await
                    {
                        Ok(Ok(connection)) => Ok(connection),
                        Ok(Err(e)) => Err(e),
                        Err(_) => Err(BackendError::Timeout {
                            backend: backend.id.clone(),
                            timeout_secs: connect_timeout.as_secs(),
                        }),
                    };
                    (backend.id.clone(), outcome, started.elapsed())
                }
            })
            .collect();
        let attempts = stream::iter(attempt_futures)
            .buffer_unordered(self.factory_config.connect_concurrency.max(1));
        tokio::pin!(attempts);

        let deadline = tokio::time::sleep(overall_deadline);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                item = attempts.next() => {
                    let Some((backend, outcome, elapsed)) = item else {
                        break;
                    };
                    pending.remove(&backend);
                    match outcome {
                        Ok(connection) => {
                            self.metrics
                                .record_backend_init(true, elapsed.as_millis() as u64);
                            tracing::info!(
                                session_id = %id,
                                backend = %backend,
                                backend_session = %connection.session_token(),
                                elapsed_ms = elapsed.as_millis() as u64,
                                "Backend initialized"
                            );
                            connections.insert(backend, connection);
                        }
                        Err(e) => {
                            self.metrics.record_backend_init(false, 0);
                            tracing::warn!(
                                session_id = %id,
                                backend = %backend,
                                error = %e,
                                "Backend initialization failed"
                            );
                        }
                    }
                }
                _ = &mut deadline => {
                    for backend in &pending {
                        self.metrics.record_backend_init(false, 0);
                        tracing::warn!(
                            session_id = %id,
                            backend = %backend,
                            deadline_secs = overall_deadline.as_secs(),
                            "Backend initialization abandoned at session deadline"
                        );
                    }
                    break;
                }
            }
        }

        let failed = enabled.len() - connections.len();
        if connections.is_empty() && !enabled.is_empty() {
            tracing::warn!(
                session_id = %id,
                backends = enabled.len(),
                "All backends failed to initialize; session starts empty"
            );
        } else if failed > 0 {
            tracing::info!(
                session_id = %id,
                connected = connections.len(),
                failed,
                "Session initialized with partial backend set"
            );
        }

        // Aggregate in configuration order so collision resolution is
        // deterministic regardless of connection completion order.
        let ordered: Vec<Arc<dyn BackendConnection>> = enabled
            .iter()
            .filter_map(|b| connections.get(&b.id).cloned())
            .collect();
        let outcome = self.aggregator.aggregate(&ordered).await;

        let backend_configs: HashMap<String, BackendConfig> = enabled
            .into_iter()
            .map(|b| (b.id.clone(), b))
            .collect();

        Session::new(
            id,
            identity,
            connections,
            outcome.capabilities,
            outcome.routing,
            backend_configs,
            self.connector.clone(),
            self.call_timeout,
            &self.recovery_config,
            self.metrics.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::PrefixingAggregator;
    use crate::config::BackendTransport;
    use crate::error::BackendResult;
    use async_trait::async_trait;
    use rmcp::model::{
        CallToolResult, GetPromptResult, Prompt, ReadResourceResult, Resource, Tool,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tool(name: &str) -> Tool {
        serde_json::from_value(serde_json::json!({
            "name": name,
            "inputSchema": { "type": "object" }
        }))
        .expect("tool json")
    }

    struct OneToolConnection {
        id: String,
    }

    #[async_trait]
    impl BackendConnection for OneToolConnection {
        fn backend_id(&self) -> &str {
            &self.id
        }

        fn endpoint(&self) -> &str {
            "mock"
        }

        fn session_token(&self) -> &str {
            "token"
        }

        async fn list_tools(&self) -> BackendResult<Vec<Tool>> {
            Ok(vec![tool(&format!("t_{}", self.id))])
        }

        async fn list_resources(&self) -> BackendResult<Vec<Resource>> {
            Ok(Vec::new())
        }

        async fn list_prompts(&self) -> BackendResult<Vec<Prompt>> {
            Ok(Vec::new())
        }

        async fn call_tool(
            &self,
            _name: &str,
            _arguments: Option<serde_json::Map<String, serde_json::Value>>,
        ) -> BackendResult<CallToolResult> {
            Err(BackendError::Unavailable {
                backend: self.id.clone(),
                reason: "not scripted".to_string(),
            })
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
            Ok(())
        }
    }

    /// Connector scripted per backend id: fail, hang forever, or connect
    /// after a fixed delay. Tracks peak concurrency.
    struct ProbeConnector {
        fail_ids: Vec<String>,
        hang_ids: Vec<String>,
        delay: Duration,
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ProbeConnector {
        fn new(fail_ids: &[&str], hang_ids: &[&str], delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                fail_ids: fail_ids.iter().map(|s| s.to_string()).collect(),
                hang_ids: hang_ids.iter().map(|s| s.to_string()).collect(),
                delay,
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl BackendConnector for ProbeConnector {
        async fn connect(
            &self,
            backend: &BackendConfig,
            _identity: &Identity,
        ) -> BackendResult<Arc<dyn BackendConnection>> {
            if self.fail_ids.contains(&backend.id) {
                return Err(BackendError::ConnectFailed {
                    backend: backend.id.clone(),
                    reason: "refused".to_string(),
                });
            }
            if self.hang_ids.contains(&backend.id) {
                std::future::pending::<()>().await;
            }

            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.current.fetch_sub(1, Ordering::SeqCst);

            Ok(Arc::new(OneToolConnection {
                id: backend.id.clone(),
            }))
        }
    }

    fn backend(id: &str) -> BackendConfig {
        BackendConfig {
            id: id.to_string(),
            transport: BackendTransport::stdio("true"),
            auth: None,
            enabled: true,
        }
    }

    fn factory(connector: Arc<dyn BackendConnector>, config: &GatewayConfig) -> SessionFactory {
        SessionFactory::new(
            connector,
            Arc::new(PrefixingAggregator::new()),
            config,
            Arc::new(GatewayMetrics::new()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_keeps_survivors() {
        let connector = ProbeConnector::new(&["b", "d"], &[], Duration::from_millis(10));
        let config = GatewayConfig::default();
        let backends: Vec<BackendConfig> =
            ["a", "b", "c", "d", "e"].iter().map(|id| backend(id)).collect();

        let session = factory(connector, &config)
            .make_session("s1".to_string(), Identity::anonymous(), &backends)
            .await;

        assert_eq!(session.connection_count().await, 3);
        assert_eq!(session.backend_ids().await, vec!["a", "c", "e"]);

        let tools: Vec<String> = session
            .tools()
            .await
            .iter()
            .map(|t| t.name.to_string())
            .collect();
        assert_eq!(tools.len(), 3);
        assert!(tools.contains(&"t_a".to_string()));
        assert!(!tools.contains(&"t_b".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_failure_yields_empty_session() {
        let connector = ProbeConnector::new(&["a", "b"], &[], Duration::from_millis(10));
        let config = GatewayConfig::default();
        let backends = vec![backend("a"), backend("b")];

        let session = factory(connector, &config)
            .make_session("s1".to_string(), Identity::anonymous(), &backends)
            .await;

        assert_eq!(session.connection_count().await, 0);
        assert!(session.tools().await.is_empty());
        assert!(session.routes().await.is_empty());

        let err = session.call_tool("anything", None).await.unwrap_err();
        assert!(err.to_string().contains("No backends available"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_backend_hits_per_backend_timeout() {
        let connector = ProbeConnector::new(&[], &["slow"], Duration::from_millis(10));
        let config = GatewayConfig::default();
        let backends = vec![backend("slow"), backend("fast")];

        let session = factory(connector, &config)
            .make_session("s1".to_string(), Identity::anonymous(), &backends)
            .await;

        assert_eq!(session.backend_ids().await, vec!["fast"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_concurrency_is_bounded() {
        let connector = ProbeConnector::new(&[], &[], Duration::from_millis(50));
        let mut config = GatewayConfig::default();
        config.factory.connect_concurrency = 2;
        let backends: Vec<BackendConfig> =
            ["a", "b", "c", "d", "e", "f"].iter().map(|id| backend(id)).collect();

        let session = factory(connector.clone(), &config)
            .make_session("s1".to_string(), Identity::anonymous(), &backends)
            .await;

        assert_eq!(session.connection_count().await, 6);
        assert!(connector.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overall_deadline_abandons_stragglers() {
        let connector = ProbeConnector::new(&[], &["slow"], Duration::from_millis(10));
        let mut config = GatewayConfig::default();
        // Per-backend timeout far beyond the session deadline.
        config.factory.connect_timeout_secs = 120;
        config.factory.overall_deadline_secs = 1;
        let backends = vec![backend("slow"), backend("fast")];

        let session = factory(connector, &config)
            .make_session("s1".to_string(), Identity::anonymous(), &backends)
            .await;

        assert_eq!(session.backend_ids().await, vec!["fast"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_backends_are_skipped() {
        let connector = ProbeConnector::new(&[], &[], Duration::from_millis(10));
        let config = GatewayConfig::default();
        let mut off = backend("off");
        off.enabled = false;
        let backends = vec![backend("on"), off];

        let session = factory(connector, &config)
            .make_session("s1".to_string(), Identity::anonymous(), &backends)
            .await;

        assert_eq!(session.backend_ids().await, vec!["on"]);
    }
}
