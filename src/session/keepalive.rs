//! Best-effort backend keepalive
//!
//! Optional background task pinging each backend of a session on a fixed
//! interval so idle backend sessions are less likely to expire server-side.
//! Strictly best-effort: a failed ping is logged at debug and never triggers
//! re-initialization on its own.

use crate::session::Session;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub fn spawn_keepalive(session: Arc<Session>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so pings start one
        // full interval after session creation.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if session.is_closed() {
                break;
            }
            for (backend, connection) in session.connections_snapshot().await {
                if let Err(e) = connection.ping().await {
                    tracing::debug!(
                        session_id = %session.id(),
                        backend = %backend,
                        error = %e,
                        "Keepalive ping failed"
                    );
                }
            }
        }
        tracing::debug!(session_id = %session.id(), "Keepalive task stopped");
    })
}
