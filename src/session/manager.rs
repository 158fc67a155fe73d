//! Session registry
//!
//! Owns the map of live sessions and drives their lifecycle: two-phase
//! creation (a generated identifier, then population through the factory),
//! lookup on every routed request, explicit termination, and a background
//! sweep that closes sessions whose metadata TTL has lapsed.

use crate::auth::Identity;
use crate::config::{BackendConfig, SessionConfig};
use crate::error::{GatewayError, Result, SessionError, StoreError};
use crate::metrics::GatewayMetrics;
use crate::session::factory::SessionFactory;
use crate::session::keepalive::spawn_keepalive;
use crate::session::session::Session;
use crate::session::store::{SessionMetadata, SessionStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

/// Lifecycle stage of one entry in the registry.
enum SessionSlot {
    /// Identifier issued; population has not started.
    Reserved,
    /// A factory run is building this session.
    Populating,
    /// Fully built and routable.
    Active {
        session: Arc<Session>,
        keepalive: Option<JoinHandle<()>>,
    },
}

/// Registry of live sessions plus the metadata store that decides validity.
///
/// The registry map is the capacity authority: `generate` counts every slot,
/// including reserved ones, against `max_active`. The store is the validity
/// authority: a session whose metadata record has expired is treated as gone
/// even while its slot still holds live connections.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, SessionSlot>>,
    // Mirrors sessions.len(); readable without the async lock.
    gauge: Arc<AtomicUsize>,
    store: Arc<dyn SessionStore>,
    factory: SessionFactory,
    config: SessionConfig,
    metrics: Arc<GatewayMetrics>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        factory: SessionFactory,
        config: SessionConfig,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            gauge: Arc::new(AtomicUsize::new(0)),
            store,
            factory,
            config,
            metrics,
        }
    }

    /// Shared count of registry slots, including reserved ones. The HTTP
    /// capacity gate polls this on the request path.
    pub fn live_gauge(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.gauge)
    }

    pub fn max_active(&self) -> usize {
        self.config.max_active
    }

    pub fn retry_after_secs(&self) -> u64 {
        self.config.retry_after_secs
    }

    /// Mint a new session identifier, or reject when the registry is at
    /// capacity. The caller must follow up with [`populate`].
    ///
    /// [`populate`]: SessionManager::populate
    pub async fn generate(&self) -> Result<String> {
        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.config.max_active {
            self.metrics.record_session_rejected();
            tracing::warn!(
                max_active = self.config.max_active,
                "Session limit reached; rejecting new session"
            );
            return Err(SessionError::LimitExceeded {
                max: self.config.max_active,
                retry_after_secs: self.config.retry_after_secs,
            }
            .into());
        }

        let id = Uuid::new_v4().to_string();
        self.store.add(SessionMetadata::new(&id)).await?;
        sessions.insert(id.clone(), SessionSlot::Reserved);
        self.gauge.store(sessions.len(), Ordering::Relaxed);
        tracing::debug!(session_id = %id, "Session identifier issued");
        Ok(id)
    }

    /// Build the session behind a previously generated identifier.
    ///
    /// Backend connections are established by the factory without holding the
    /// registry lock, so concurrent initializations do not serialize. If the
    /// identifier was terminated or expired while the factory ran, the fresh
    /// session is closed again and `NotFound` is returned.
    pub async fn populate(
        &self,
        id: &str,
        identity: Identity,
        backends: &[BackendConfig],
    ) -> Result<Arc<Session>> {
        {
            let mut sessions = self.sessions.write().await;
            match sessions.get_mut(id) {
                None => {
                    return Err(SessionError::NotFound { id: id.to_string() }.into());
                }
                Some(slot @ SessionSlot::Reserved) => *slot = SessionSlot::Populating,
                Some(_) => {
                    return Err(SessionError::AlreadyPopulated { id: id.to_string() }.into());
                }
            }
        }

        let session = Arc::new(
            self.factory
                .make_session(id.to_string(), identity.clone(), backends)
                .await,
        );

        let mut keepalive = self
            .config
            .keepalive_interval_secs
            .map(|secs| spawn_keepalive(session.clone(), Duration::from_secs(secs)));

        let installed = {
            let mut sessions = self.sessions.write().await;
            match sessions.get_mut(id) {
                Some(slot @ SessionSlot::Populating) => {
                    *slot = SessionSlot::Active {
                        session: session.clone(),
                        keepalive: keepalive.take(),
                    };
                    true
                }
                _ => false,
            }
        };

        if !installed {
            // Terminated while the factory ran; tear the fresh session down.
            if let Some(handle) = keepalive {
                handle.abort();
            }
            if let Err(e) = session.close().await {
                tracing::warn!(session_id = %id, error = %e, "Closing orphaned session failed");
            }
            return Err(SessionError::NotFound { id: id.to_string() }.into());
        }

        match self.store.get(id).await {
            Ok(metadata) => {
                let metadata = metadata.with_identity(identity.to_string());
                if let Err(e) = self.store.add(metadata).await {
                    let _ = self.terminate(id).await;
                    return Err(e.into());
                }
            }
            Err(StoreError::NotFound { .. }) => {
                // Metadata lapsed between generate and populate; undo.
                self.expire(id).await;
                return Err(SessionError::NotFound { id: id.to_string() }.into());
            }
            Err(e) => return Err(e.into()),
        }

        self.metrics.record_session_created();
        let backends = session.connection_count().await;
        let tools = session.tools().await.len();
        tracing::info!(
            session_id = %id,
            identity = %identity,
            backends,
            tools,
            "Session created"
        );
        Ok(session)
    }

    /// Check that an identifier refers to a valid session and extend its TTL.
    pub async fn validate(&self, id: &str) -> Result<()> {
        match self.store.get(id).await {
            Ok(_) => Ok(()),
            Err(StoreError::NotFound { .. }) => {
                Err(SessionError::NotFound { id: id.to_string() }.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve an identifier to its live session, extending the TTL.
    ///
    /// A slot whose metadata record has expired is torn down on the spot and
    /// reported as `NotFound`, so a client holding a stale identifier gets a
    /// clean signal to re-initialize.
    pub async fn lookup(&self, id: &str) -> Result<Arc<Session>> {
        let session = {
            let sessions = self.sessions.read().await;
            match sessions.get(id) {
                Some(SessionSlot::Active { session, .. }) => Some(session.clone()),
                _ => None,
            }
        };
        let Some(session) = session else {
            return Err(SessionError::NotFound { id: id.to_string() }.into());
        };

        match self.store.get(id).await {
            Ok(_) => Ok(session),
            Err(StoreError::NotFound { .. }) => {
                self.expire(id).await;
                Err(SessionError::NotFound { id: id.to_string() }.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Explicitly close a session and delete its metadata.
    ///
    /// In-flight operations finish before backend connections are closed.
    /// The metadata record is deleted even when some backends fail to close;
    /// the failure is still surfaced to the caller.
    pub async fn terminate(&self, id: &str) -> Result<()> {
        let removed = {
            let mut sessions = self.sessions.write().await;
            let removed = sessions.remove(id);
            self.gauge.store(sessions.len(), Ordering::Relaxed);
            removed
        };
        let Some(slot) = removed else {
            return Err(SessionError::NotFound { id: id.to_string() }.into());
        };

        let close_result = match slot {
            SessionSlot::Active { session, keepalive } => {
                if let Some(handle) = keepalive {
                    handle.abort();
                }
                session.close().await
            }
            _ => Ok(()),
        };

        self.store.delete(id).await?;
        self.metrics.record_session_closed();

        match close_result {
            Ok(()) => {
                tracing::info!(session_id = %id, "Session closed");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(session_id = %id, error = %e, "Session closed with backend errors");
                Err(e.into())
            }
        }
    }

    /// Close every live session. Used on shutdown.
    pub async fn close_all(&self) {
        let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        if ids.is_empty() {
            return;
        }
        tracing::info!(count = ids.len(), "Closing all sessions");
        for id in ids {
            match self.terminate(&id).await {
                Ok(()) => {}
                Err(GatewayError::Session(SessionError::NotFound { .. })) => {}
                Err(e) => {
                    tracing::warn!(session_id = %id, error = %e, "Shutdown close failed");
                }
            }
        }
    }

    /// Number of registry slots, including reserved ones.
    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// One pass of the expiry sweep: purge lapsed metadata records and close
    /// the matching live sessions.
    pub async fn sweep(&self) {
        let purged = match self.store.purge_expired().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(error = %e, "Session store sweep failed");
                return;
            }
        };
        if purged.is_empty() {
            return;
        }
        tracing::debug!(count = purged.len(), "Purging expired sessions");
        for id in &purged {
            self.expire(id).await;
        }
    }

    /// Run [`sweep`] on the configured interval until aborted.
    ///
    /// [`sweep`]: SessionManager::sweep
    pub fn spawn_sweep_task(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let interval = Duration::from_secs(manager.config.sweep_interval_secs.max(1));
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; nothing can have expired
            // yet, so skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.sweep().await;
            }
        })
    }

    /// Drop a slot whose metadata has expired and close it in the background,
    /// off the caller's latency path. No-op when the id has no slot.
    async fn expire(&self, id: &str) {
        let removed = {
            let mut sessions = self.sessions.write().await;
            let removed = sessions.remove(id);
            self.gauge.store(sessions.len(), Ordering::Relaxed);
            removed
        };
        match removed {
            Some(SessionSlot::Active { session, keepalive }) => {
                if let Some(handle) = keepalive {
                    handle.abort();
                }
                self.metrics.record_session_expired();
                tracing::info!(session_id = %id, "Session expired");
                let sid = id.to_string();
                tokio::spawn(async move {
                    if let Err(e) = session.close().await {
                        tracing::warn!(
                            session_id = %sid,
                            error = %e,
                            "Closing expired session failed"
                        );
                    }
                });
            }
            Some(_) => {
                self.metrics.record_session_expired();
                tracing::debug!(session_id = %id, "Expired before population completed");
            }
            None => {}
        }
    }
}
