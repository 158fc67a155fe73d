//! Merged capability snapshots and the routing table
//!
//! The aggregator produces one namespace out of many backends; the routing
//! table remembers, for every exposed name, which backend owns it and what the
//! operation was called before any collision rename. Backends always receive
//! the original name.

pub mod aggregator;

pub use aggregator::{AggregateOutcome, CapabilityAggregator, PrefixingAggregator};

use rmcp::model::{Prompt, Resource, Tool};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One routing table entry: `(exposed, backend, original)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    /// Name exposed to the client, possibly rewritten to resolve a collision
    pub exposed: String,
    /// Owning backend id
    pub backend: String,
    /// Un-rewritten name the backend knows the operation by
    pub original: String,
}

impl RouteEntry {
    pub fn new(
        exposed: impl Into<String>,
        backend: impl Into<String>,
        original: impl Into<String>,
    ) -> Self {
        Self {
            exposed: exposed.into(),
            backend: backend.into(),
            original: original.into(),
        }
    }
}

/// Exposed-name routing for one session. Tools and prompts route by name,
/// resources by URI.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    tools: HashMap<String, RouteEntry>,
    prompts: HashMap<String, RouteEntry>,
    resources: HashMap<String, RouteEntry>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_tool(&mut self, entry: RouteEntry) {
        self.tools.insert(entry.exposed.clone(), entry);
    }

    pub fn insert_prompt(&mut self, entry: RouteEntry) {
        self.prompts.insert(entry.exposed.clone(), entry);
    }

    pub fn insert_resource(&mut self, entry: RouteEntry) {
        self.resources.insert(entry.exposed.clone(), entry);
    }

    pub fn route_tool(&self, exposed: &str) -> Option<&RouteEntry> {
        self.tools.get(exposed)
    }

    pub fn route_prompt(&self, exposed: &str) -> Option<&RouteEntry> {
        self.prompts.get(exposed)
    }

    pub fn route_resource(&self, uri: &str) -> Option<&RouteEntry> {
        self.resources.get(uri)
    }

    /// Total number of routed operations across all kinds.
    pub fn len(&self) -> usize {
        self.tools.len() + self.prompts.len() + self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty() && self.prompts.is_empty() && self.resources.is_empty()
    }
}

/// Merged descriptors exposed to the client.
#[derive(Debug, Clone, Default)]
pub struct AggregatedCapabilities {
    pub tools: Vec<Tool>,
    pub resources: Vec<Resource>,
    pub prompts: Vec<Prompt>,
}

impl AggregatedCapabilities {
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty() && self.resources.is_empty() && self.prompts.is_empty()
    }

    /// Count of all exposed descriptors.
    pub fn len(&self) -> usize {
        self.tools.len() + self.resources.len() + self.prompts.len()
    }
}
