//! Manifold MCP Gateway Library
//!
//! This library aggregates many MCP servers behind one endpoint:
//! - Per-session backend connections and capability aggregation
//! - Name routing with prefix-based collision handling
//! - Session lifecycle (two-phase creation, expiry, graceful close)
//! - Stdio and streamable HTTP serving

pub mod auth;
pub mod backend;
pub mod capability;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod session;
