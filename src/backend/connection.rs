//! Backend connections
//!
//! A `BackendConnection` is one live, stateful link from one session to one
//! backend MCP server, carrying that backend's own session token. A connection
//! is owned exclusively by the session that created it for its entire life;
//! connections are never pooled or shared across sessions.

use crate::auth::{Credential, CredentialResolver, Identity};
use crate::config::{BackendConfig, BackendTransport};
use crate::error::{BackendError, BackendResult};
use async_trait::async_trait;
use rmcp::{
    model::{
        CallToolRequestParam, CallToolResult, ClientInfo, GetPromptRequestParam, GetPromptResult,
        PaginatedRequestParam, Prompt, ReadResourceRequestParam, ReadResourceResult, Resource,
        Tool,
    },
    service::{Peer, RunningService},
    transport::{StreamableHttpClientTransport, TokioChildProcess},
    RoleClient, ServiceExt,
};
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Mutex;
use uuid::Uuid;

/// One initialized, stateful connection to one backend.
///
/// All transports hide behind this trait; the factory and the session never
/// branch on the concrete transport.
#[async_trait]
pub trait BackendConnection: Send + Sync {
    /// Backend identifier this connection belongs to.
    fn backend_id(&self) -> &str;

    /// Human-readable endpoint description for logs.
    fn endpoint(&self) -> &str;

    /// The backend-side session token for this connection. Rotates on every
    /// re-initialization.
    fn session_token(&self) -> &str;

    async fn list_tools(&self) -> BackendResult<Vec<Tool>>;
    async fn list_resources(&self) -> BackendResult<Vec<Resource>>;
    async fn list_prompts(&self) -> BackendResult<Vec<Prompt>>;

    /// Call a tool by its original (backend-side) name.
    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> BackendResult<CallToolResult>;

    async fn read_resource(&self, uri: &str) -> BackendResult<ReadResourceResult>;

    async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> BackendResult<GetPromptResult>;

    /// Cheap liveness probe for the optional keepalive task.
    async fn ping(&self) -> BackendResult<()>;

    /// Tear the connection down. Idempotent.
    async fn close(&self) -> BackendResult<()>;
}

/// Creates connections; the seam where transports, credentials and mocks meet.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    /// Establish and initialize a connection to `backend` on behalf of
    /// `identity`. Resolves credentials freshly on every call.
    async fn connect(
        &self,
        backend: &BackendConfig,
        identity: &Identity,
    ) -> BackendResult<Arc<dyn BackendConnection>>;
}

/// Classify a rendered rmcp error into the gateway's backend taxonomy.
///
/// Backends signal session expiry (JSON-RPC -32001, HTTP 404 on a known
/// session) and authorization failure (HTTP 401) in their error payloads; the
/// rendered message is the common denominator across transports.
fn classify_error(backend: &str, rendered: String) -> BackendError {
    let lower = rendered.to_lowercase();

    let session_expired = lower.contains("-32001")
        || (lower.contains("session")
            && (lower.contains("expired")
                || lower.contains("not found")
                || lower.contains("terminated")
                || lower.contains("invalid")));
    if session_expired {
        return BackendError::SessionExpired {
            backend: backend.to_string(),
        };
    }

    let unauthorized = lower.contains("401")
        || lower.contains("unauthorized")
        || lower.contains("authentication")
        || lower.contains("invalid token");
    if unauthorized {
        return BackendError::Unauthorized {
            backend: backend.to_string(),
        };
    }

    BackendError::Unavailable {
        backend: backend.to_string(),
        reason: rendered,
    }
}

/// rmcp-backed connection over stdio or streamable HTTP.
pub struct McpBackendConnection {
    backend_id: String,
    endpoint: String,
    session_token: String,
    peer: Peer<RoleClient>,
    service: Mutex<Option<RunningService<RoleClient, ClientInfo>>>,
}

impl McpBackendConnection {
    fn new(
        backend_id: String,
        endpoint: String,
        service: RunningService<RoleClient, ClientInfo>,
    ) -> Self {
        let peer = service.peer().clone();
        Self {
            backend_id,
            endpoint,
            // The wire-level backend session id is not exposed by the client
            // transport, so each established connection mints an epoch token.
            session_token: Uuid::new_v4().to_string(),
            peer,
            service: Mutex::new(Some(service)),
        }
    }

    fn classify(&self, rendered: String) -> BackendError {
        classify_error(&self.backend_id, rendered)
    }
}

#[async_trait]
impl BackendConnection for McpBackendConnection {
    fn backend_id(&self) -> &str {
        &self.backend_id
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn session_token(&self) -> &str {
        &self.session_token
    }

    async fn list_tools(&self) -> BackendResult<Vec<Tool>> {
        self.peer
            .list_all_tools()
            .await
            .map_err(|e| self.classify(e.to_string()))
    }

    async fn list_resources(&self) -> BackendResult<Vec<Resource>> {
        self.peer
            .list_all_resources()
            .await
            .map_err(|e| self.classify(e.to_string()))
    }

    async fn list_prompts(&self) -> BackendResult<Vec<Prompt>> {
        self.peer
            .list_all_prompts()
            .await
            .map_err(|e| self.classify(e.to_string()))
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> BackendResult<CallToolResult> {
        let params = CallToolRequestParam {
            name: name.to_string().into(),
            arguments,
            task: None,
        };

        self.peer
            .call_tool(params)
            .await
            .map_err(|e| self.classify(e.to_string()))
    }

    async fn read_resource(&self, uri: &str) -> BackendResult<ReadResourceResult> {
        self.peer
            .read_resource(ReadResourceRequestParam {
                uri: uri.to_string(),
            })
            .await
            .map_err(|e| self.classify(e.to_string()))
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> BackendResult<GetPromptResult> {
        self.peer
            .get_prompt(GetPromptRequestParam {
                name: name.to_string(),
                arguments,
            })
            .await
            .map_err(|e| self.classify(e.to_string()))
    }

    async fn ping(&self) -> BackendResult<()> {
        // Not every backend implements a dedicated ping; a single-page tools
        // listing is the cheapest universally supported probe.
        self.peer
            .list_tools(Some(PaginatedRequestParam { cursor: None }))
            .await
            .map_err(|e| self.classify(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) -> BackendResult<()> {
        if let Some(service) = self.service.lock().await.take() {
            service.cancel().await.map_err(|e| BackendError::Protocol {
                backend: self.backend_id.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

/// Default connector: resolves credentials, builds the transport, performs the
/// MCP initialize handshake.
pub struct McpConnector {
    resolver: Arc<dyn CredentialResolver>,
}

impl McpConnector {
    pub fn new(resolver: Arc<dyn CredentialResolver>) -> Self {
        Self { resolver }
    }

    async fn connect_stdio(
        &self,
        backend: &BackendConfig,
        command: &str,
        args: &[String],
        env: &std::collections::HashMap<String, String>,
        credential: &Credential,
    ) -> BackendResult<RunningService<RoleClient, ClientInfo>> {
        let mut cmd = Command::new(command);
        cmd.args(args);
        for (key, value) in env {
            cmd.env(key, value);
        }
        for (key, value) in &credential.env {
            cmd.env(key, value);
        }

        let transport = TokioChildProcess::new(cmd).map_err(|e| BackendError::ConnectFailed {
            backend: backend.id.clone(),
            reason: e.to_string(),
        })?;

        ClientInfo::default()
            .serve(transport)
            .await
            .map_err(|e| BackendError::ConnectFailed {
                backend: backend.id.clone(),
                reason: e.to_string(),
            })
    }

    async fn connect_http(
        &self,
        backend: &BackendConfig,
        url: &str,
        headers: &std::collections::HashMap<String, String>,
        credential: &Credential,
    ) -> BackendResult<RunningService<RoleClient, ClientInfo>> {
        let mut header_map = reqwest::header::HeaderMap::new();
        for (key, value) in headers.iter().chain(credential.headers.iter()) {
            let name = reqwest::header::HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                BackendError::ConnectFailed {
                    backend: backend.id.clone(),
                    reason: format!("invalid header name '{}': {}", key, e),
                }
            })?;
            let value = reqwest::header::HeaderValue::from_str(value).map_err(|e| {
                BackendError::ConnectFailed {
                    backend: backend.id.clone(),
                    reason: format!("invalid header value for '{}': {}", key, e),
                }
            })?;
            header_map.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(header_map)
            .build()
            .map_err(|e| BackendError::ConnectFailed {
                backend: backend.id.clone(),
                reason: e.to_string(),
            })?;

        let transport = StreamableHttpClientTransport::with_client(
            client,
            rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig::with_uri(
                url.to_string(),
            ),
        );

        ClientInfo::default()
            .serve(transport)
            .await
            .map_err(|e| BackendError::ConnectFailed {
                backend: backend.id.clone(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl BackendConnector for McpConnector {
    async fn connect(
        &self,
        backend: &BackendConfig,
        identity: &Identity,
    ) -> BackendResult<Arc<dyn BackendConnection>> {
        let credential = self
            .resolver
            .resolve(identity, backend)
            .await
            .map_err(|e| BackendError::ConnectFailed {
                backend: backend.id.clone(),
                reason: e.to_string(),
            })?;

        let endpoint = backend.transport.description();
        let service = match &backend.transport {
            BackendTransport::Stdio { command, args, env } => {
                self.connect_stdio(backend, command, args, env, &credential)
                    .await?
            }
            BackendTransport::Http { url, headers } => {
                self.connect_http(backend, url, headers, &credential).await?
            }
        };

        let connection = McpBackendConnection::new(backend.id.clone(), endpoint, service);
        tracing::debug!(
            backend = %connection.backend_id,
            endpoint = %connection.endpoint,
            backend_session = %connection.session_token,
            "Backend connection established"
        );
        Ok(Arc::new(connection))
    }
}
