//! Session metadata persistence
//!
//! Stores only serializable metadata. Live connections and routing tables
//! wrap network state and never enter the store; a replicated store can slot
//! in behind the same trait without touching the session manager.

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Serializable per-session record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionMetadata {
    /// Opaque session identifier handed to the client.
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_touched_at: DateTime<Utc>,
    /// Reference to the authenticated caller, None while the session is a
    /// placeholder awaiting population.
    pub identity_ref: Option<String>,
}

impl SessionMetadata {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            last_touched_at: now,
            identity_ref: None,
        }
    }

    pub fn with_identity(mut self, identity_ref: impl Into<String>) -> Self {
        self.identity_ref = Some(identity_ref.into());
        self
    }

    pub fn touch(&mut self) {
        self.last_touched_at = Utc::now();
    }
}

/// TTL-based metadata persistence.
///
/// `get` extends the record's TTL as a side effect, so any client activity
/// keeps its session alive.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn add(&self, metadata: SessionMetadata) -> StoreResult<()>;

    /// Fetch a record and extend its TTL. Expired records count as absent.
    async fn get(&self, id: &str) -> StoreResult<SessionMetadata>;

    /// Remove a record. Removing an absent record is not an error.
    async fn delete(&self, id: &str) -> StoreResult<()>;

    /// Drop every expired record, returning the purged session ids so the
    /// caller can tear down the matching live sessions.
    async fn purge_expired(&self) -> StoreResult<Vec<String>>;
}

struct StoredEntry {
    metadata: SessionMetadata,
    expires_at: Instant,
}

/// Default in-process store.
pub struct MemorySessionStore {
    ttl: Duration,
    entries: RwLock<HashMap<String, StoredEntry>>,
}

impl MemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn add(&self, metadata: SessionMetadata) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert(
            metadata.id.clone(),
            StoredEntry {
                metadata,
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<SessionMetadata> {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(id) else {
            return Err(StoreError::NotFound { id: id.to_string() });
        };
        if entry.expires_at <= Instant::now() {
            entries.remove(id);
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        entry.metadata.touch();
        entry.expires_at = Instant::now() + self.ttl;
        Ok(entry.metadata.clone())
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        self.entries.write().await.remove(id);
        Ok(())
    }

    async fn purge_expired(&self) -> StoreResult<Vec<String>> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            entries.remove(id);
        }
        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "Purged expired session records");
        }
        Ok(expired)
    }
}
