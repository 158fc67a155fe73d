//! Streamable HTTP endpoint
//!
//! Stateful serving through rmcp's `StreamableHttpService` and
//! `LocalSessionManager`: each wire session gets its own handler instance,
//! and with it one gateway session. A small tower layer in front rejects new
//! wire sessions with 503 while the gateway is at its session cap, before
//! any handshake work is done; the definitive check still happens when
//! initialize reaches the session registry.

use crate::config::GatewayConfig;
use crate::error::{ConfigError, Result};
use crate::server::GatewayServer;
use crate::session::SessionManager;
use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::http::{header::RETRY_AFTER, Method, Request, Response, StatusCode};
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_service::Service;

/// Header carrying the wire-session identifier in stateful mode.
const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Tower layer that pre-gates wire-session creation on the session cap.
///
/// Only a POST without a session header opens a new session in stateful mode;
/// everything else passes straight through to the inner service.
#[derive(Clone)]
pub struct CapacityGate<S> {
    inner: S,
    gauge: Arc<AtomicUsize>,
    max_active: usize,
    retry_after_secs: u64,
}

impl<S> CapacityGate<S> {
    pub fn new(inner: S, gauge: Arc<AtomicUsize>, max_active: usize, retry_after_secs: u64) -> Self {
        Self {
            inner,
            gauge,
            max_active,
            retry_after_secs,
        }
    }

    fn opens_session<B>(req: &Request<B>) -> bool {
        req.method() == Method::POST && !req.headers().contains_key(SESSION_ID_HEADER)
    }
}

impl<B, S> Service<Request<B>> for CapacityGate<S>
where
    B: http_body::Body + Send + 'static,
    B::Error: std::fmt::Display,
    S: Service<
            Request<B>,
            Response = Response<BoxBody<Bytes, std::convert::Infallible>>,
            Error = std::convert::Infallible,
        > + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = Response<BoxBody<Bytes, std::convert::Infallible>>;
    type Error = std::convert::Infallible;
    type Future = std::pin::Pin<
        Box<
            dyn std::future::Future<Output = std::result::Result<Self::Response, Self::Error>>
                + Send,
        >,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        if Self::opens_session(&req) {
            let live = self.gauge.load(Ordering::Relaxed);
            if live >= self.max_active {
                let retry_after = self.retry_after_secs;
                tracing::warn!(
                    live,
                    max_active = self.max_active,
                    "Rejecting new wire session at capacity"
                );
                return Box::pin(async move {
                    let resp = Response::builder()
                        .status(StatusCode::SERVICE_UNAVAILABLE)
                        .header(RETRY_AFTER, retry_after.to_string())
                        .body(Full::new(Bytes::from("Session limit reached")).boxed())
                        .expect("valid response");
                    Ok(resp)
                });
            }
        }
        let mut inner = self.inner.clone();
        Box::pin(async move { inner.call(req).await })
    }
}

/// Serve the gateway over streamable HTTP until the token is cancelled.
pub async fn serve_http(
    manager: Arc<SessionManager>,
    config: Arc<GatewayConfig>,
    shutdown: CancellationToken,
) -> Result<()> {
    let bind_addr: SocketAddr = config.server.bind.parse().map_err(|e| {
        ConfigError::Invalid(format!(
            "invalid bind address '{}': {}",
            config.server.bind, e
        ))
    })?;

    let session_manager = Arc::new(LocalSessionManager::default());
    let http_config = StreamableHttpServerConfig {
        sse_keep_alive: if config.server.sse_keepalive_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(config.server.sse_keepalive_secs))
        },
        stateful_mode: true,
        ..Default::default()
    };

    let factory_manager = Arc::clone(&manager);
    let factory_config = Arc::clone(&config);
    let service = StreamableHttpService::new(
        move || {
            Ok(GatewayServer::new(
                Arc::clone(&factory_manager),
                Arc::clone(&factory_config),
            ))
        },
        session_manager,
        http_config,
    );
    let service = CapacityGate::new(
        service,
        manager.live_gauge(),
        manager.max_active(),
        manager.retry_after_secs(),
    );

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!(bind = %bind_addr, "Gateway HTTP endpoint listening");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("HTTP endpoint shutting down");
                break;
            }
            accepted = listener.accept() => {
                let (stream, remote) = accepted?;
                tracing::debug!(remote = %remote, "Connection accepted");
                let svc = service.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let conn = http1::Builder::new()
                        .serve_connection(io, TowerToHyperService::new(svc));
                    if let Err(e) = conn.await {
                        tracing::debug!(error = %e, "HTTP connection error");
                    }
                });
            }
        }
    }
    Ok(())
}
