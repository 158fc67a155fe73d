//! Backend connectivity: transport-agnostic connections and failure guards.

pub mod circuit;
pub mod connection;

pub use circuit::{CircuitBreaker, CircuitState};
pub use connection::{BackendConnection, BackendConnector, McpBackendConnection, McpConnector};
