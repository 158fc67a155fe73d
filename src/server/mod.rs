//! Inbound MCP endpoint
//!
//! Adapts the session layer to rmcp's [`ServerHandler`]. One [`GatewayServer`]
//! instance serves one client connection: initialize creates and populates a
//! gateway session, every subsequent request resolves that session by
//! identifier, and dropping the handler (client disconnect) terminates it.

pub mod http;

pub use http::serve_http;

use crate::auth::Identity;
use crate::config::GatewayConfig;
use crate::error::{GatewayError, SessionError};
use crate::session::{Session, SessionManager};
use rmcp::model::{
    CallToolRequestParam, CallToolResult, GetPromptRequestParam, GetPromptResult,
    InitializeRequestParam, InitializeResult, ListPromptsResult, ListResourcesResult,
    ListToolsResult, PaginatedRequestParam, ReadResourceRequestParam, ReadResourceResult,
    ServerCapabilities, ServerInfo,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{ErrorData as McpError, ServerHandler};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Map a gateway error onto a JSON-RPC error response.
///
/// Backend tool failures that the backend itself reported as a tool result
/// never reach this point; they pass through inside `CallToolResult`. This
/// mapping covers gateway-level failures only.
fn to_rpc_error(err: GatewayError) -> McpError {
    match &err {
        GatewayError::Session(session_err) => match session_err {
            SessionError::NotFound { .. }
            | SessionError::Closed { .. }
            | SessionError::AlreadyPopulated { .. } => {
                McpError::invalid_request(err.to_string(), None)
            }
            SessionError::OperationNotFound { .. } => {
                McpError::invalid_params(err.to_string(), None)
            }
            SessionError::LimitExceeded { .. }
            | SessionError::NoBackendsAvailable
            | SessionError::CloseFailed { .. } => McpError::internal_error(err.to_string(), None),
        },
        _ => McpError::internal_error(err.to_string(), None),
    }
}

/// Instructions advertised when the config does not set its own text.
fn default_instructions(config: &GatewayConfig) -> String {
    let backends: Vec<&str> = config
        .backends
        .iter()
        .filter(|b| b.enabled)
        .map(|b| b.id.as_str())
        .collect();
    format!(
        "MCP aggregation gateway exposing the tools, resources and prompts of \
         {count} backend server(s) ({list}) under one endpoint. Tool names that \
         collide across backends carry a '<backend>.' prefix; all other names \
         are unchanged.",
        count = backends.len(),
        list = backends.join(", "),
    )
}

/// Gateway session bound to one client connection.
///
/// Terminates the session when the connection goes away and the handler is
/// dropped. At process shutdown the runtime may already be gone; the
/// manager's `close_all` covers that path.
struct SessionBinding {
    manager: Arc<SessionManager>,
    id: RwLock<Option<String>>,
}

impl Drop for SessionBinding {
    fn drop(&mut self) {
        let Some(id) = self.id.get_mut().take() else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let manager = Arc::clone(&self.manager);
            handle.spawn(async move {
                match manager.terminate(&id).await {
                    Ok(()) | Err(GatewayError::Session(SessionError::NotFound { .. })) => {}
                    Err(e) => {
                        tracing::warn!(session_id = %id, error = %e, "Disconnect cleanup failed");
                    }
                }
            });
        }
    }
}

/// The unified MCP endpoint.
///
/// Every capability request is answered from the bound session's aggregated
/// snapshot; every call is routed through that session to the owning backend.
#[derive(Clone)]
pub struct GatewayServer {
    manager: Arc<SessionManager>,
    config: Arc<GatewayConfig>,
    binding: Arc<SessionBinding>,
}

impl GatewayServer {
    pub fn new(manager: Arc<SessionManager>, config: Arc<GatewayConfig>) -> Self {
        Self {
            binding: Arc::new(SessionBinding {
                manager: Arc::clone(&manager),
                id: RwLock::new(None),
            }),
            manager,
            config,
        }
    }

    /// Resolve the session bound at initialize time.
    async fn session(&self) -> Result<Arc<Session>, McpError> {
        let id = self.binding.id.read().await.clone().ok_or_else(|| {
            McpError::invalid_request("No session; send an initialize request first", None)
        })?;
        self.manager.lookup(&id).await.map_err(to_rpc_error)
    }
}

impl ServerHandler for GatewayServer {
    fn get_info(&self) -> ServerInfo {
        let instructions = self
            .config
            .server
            .instructions
            .clone()
            .unwrap_or_else(|| default_instructions(&self.config));
        let mut info = ServerInfo {
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .enable_prompts()
                .build(),
            instructions: Some(instructions),
            ..Default::default()
        };
        info.server_info.name = self.config.server.name.clone().into();
        info.server_info.version = env!("CARGO_PKG_VERSION").to_string().into();
        info
    }

    async fn initialize(
        &self,
        request: InitializeRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<InitializeResult, McpError> {
        let identity = Identity::from_client(
            request.client_info.name.clone(),
            request.client_info.version.clone(),
        );

        // A repeated initialize on the same connection replaces the binding.
        if let Some(old) = self.binding.id.write().await.take() {
            tracing::warn!(session_id = %old, "Re-initialize on live connection");
            if let Err(e) = self.manager.terminate(&old).await {
                tracing::debug!(session_id = %old, error = %e, "Previous session cleanup failed");
            }
        }

        let session_id = self.manager.generate().await.map_err(to_rpc_error)?;
        self.manager
            .populate(&session_id, identity, &self.config.backends)
            .await
            .map_err(to_rpc_error)?;
        *self.binding.id.write().await = Some(session_id);

        if context.peer.peer_info().is_none() {
            context.peer.set_peer_info(request);
        }
        Ok(self.get_info())
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        let session = self.session().await?;
        Ok(ListToolsResult {
            tools: session.tools().await,
            next_cursor: None,
            meta: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let session = self.session().await?;
        session
            .call_tool(&request.name, request.arguments)
            .await
            .map_err(to_rpc_error)
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        let session = self.session().await?;
        Ok(ListResourcesResult {
            resources: session.resources().await,
            next_cursor: None,
            meta: None,
        })
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        let session = self.session().await?;
        session.read_resource(&request.uri).await.map_err(|e| {
            if matches!(
                &e,
                GatewayError::Session(SessionError::OperationNotFound { .. })
            ) {
                McpError::resource_not_found(e.to_string(), None)
            } else {
                to_rpc_error(e)
            }
        })
    }

    async fn list_prompts(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListPromptsResult, McpError> {
        let session = self.session().await?;
        Ok(ListPromptsResult {
            prompts: session.prompts().await,
            next_cursor: None,
            meta: None,
        })
    }

    async fn get_prompt(
        &self,
        request: GetPromptRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<GetPromptResult, McpError> {
        let session = self.session().await?;
        session
            .get_prompt(&request.name, request.arguments)
            .await
            .map_err(to_rpc_error)
    }
}
