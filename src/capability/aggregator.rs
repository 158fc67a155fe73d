//! Capability aggregation
//!
//! Merges the tool, resource and prompt listings of many backends into one
//! unified surface and the routing table that maps it back. Listing failures
//! degrade the surface instead of failing it: a backend that cannot be listed
//! contributes nothing and is reported in the outcome.

use crate::backend::BackendConnection;
use crate::capability::{AggregatedCapabilities, RouteEntry, RoutingTable};
use crate::error::BackendError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Result of one aggregation pass over a set of live connections.
#[derive(Default)]
pub struct AggregateOutcome {
    pub capabilities: AggregatedCapabilities,
    pub routing: RoutingTable,
    /// Backends whose listings failed, keyed by backend id.
    pub failures: HashMap<String, BackendError>,
}

/// Merge policy for per-backend capability listings.
///
/// Implementations decide how name collisions resolve and which backends win;
/// the session only ever consumes the resulting routing table.
#[async_trait]
pub trait CapabilityAggregator: Send + Sync {
    async fn aggregate(&self, connections: &[Arc<dyn BackendConnection>]) -> AggregateOutcome;
}

/// Default policy: first backend in configuration order keeps the bare name,
/// later collisions are exposed as `{backend}.{name}`. Resource URIs are never
/// rewritten; duplicate URIs keep the first backend's entry.
#[derive(Default)]
pub struct PrefixingAggregator;

impl PrefixingAggregator {
    pub fn new() -> Self {
        Self
    }

    /// Pick the exposed name for `original` from `backend`, or `None` when
    /// even the prefixed form is taken.
    fn resolve_name(
        taken: impl Fn(&str) -> bool,
        backend: &str,
        original: &str,
        kind: &str,
    ) -> Option<String> {
        if !taken(original) {
            return Some(original.to_string());
        }
        let prefixed = format!("{}.{}", backend, original);
        if taken(&prefixed) {
            tracing::warn!(
                backend = %backend,
                name = %original,
                kind = %kind,
                "Capability name collision could not be resolved, skipping"
            );
            return None;
        }
        tracing::debug!(
            backend = %backend,
            name = %original,
            exposed = %prefixed,
            kind = %kind,
            "Renamed colliding capability"
        );
        Some(prefixed)
    }
}

#[async_trait]
impl CapabilityAggregator for PrefixingAggregator {
    async fn aggregate(&self, connections: &[Arc<dyn BackendConnection>]) -> AggregateOutcome {
        let mut outcome = AggregateOutcome::default();

        for connection in connections {
            let backend = connection.backend_id().to_string();

            match connection.list_tools().await {
                Ok(tools) => {
                    for mut tool in tools {
                        let original = tool.name.to_string();
                        let Some(exposed) = Self::resolve_name(
                            |name| outcome.routing.route_tool(name).is_some(),
                            &backend,
                            &original,
                            "tool",
                        ) else {
                            continue;
                        };
                        if exposed != original {
                            tool.name = exposed.clone().into();
                        }
                        outcome
                            .routing
                            .insert_tool(RouteEntry::new(exposed, &backend, original));
                        outcome.capabilities.tools.push(tool);
                    }
                }
                Err(e) => {
                    tracing::warn!(backend = %backend, error = %e, "Tool listing failed");
                    outcome.failures.entry(backend.clone()).or_insert(e);
                }
            }

            match connection.list_prompts().await {
                Ok(prompts) => {
                    for mut prompt in prompts {
                        let original = prompt.name.clone();
                        let Some(exposed) = Self::resolve_name(
                            |name| outcome.routing.route_prompt(name).is_some(),
                            &backend,
                            &original,
                            "prompt",
                        ) else {
                            continue;
                        };
                        if exposed != original {
                            prompt.name = exposed.clone();
                        }
                        outcome
                            .routing
                            .insert_prompt(RouteEntry::new(exposed, &backend, original));
                        outcome.capabilities.prompts.push(prompt);
                    }
                }
                Err(e) => {
                    tracing::warn!(backend = %backend, error = %e, "Prompt listing failed");
                    outcome.failures.entry(backend.clone()).or_insert(e);
                }
            }

            match connection.list_resources().await {
                Ok(resources) => {
                    for resource in resources {
                        let uri = resource.uri.clone();
                        if outcome.routing.route_resource(&uri).is_some() {
                            tracing::debug!(
                                backend = %backend,
                                uri = %uri,
                                "Duplicate resource URI, keeping first backend"
                            );
                            continue;
                        }
                        outcome
                            .routing
                            .insert_resource(RouteEntry::new(uri.clone(), &backend, uri));
                        outcome.capabilities.resources.push(resource);
                    }
                }
                Err(e) => {
                    tracing::warn!(backend = %backend, error = %e, "Resource listing failed");
                    outcome.failures.entry(backend.clone()).or_insert(e);
                }
            }
        }

        outcome
    }
}
