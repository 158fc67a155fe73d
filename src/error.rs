//! Manifold error types
//!
//! Centralized error handling using thiserror for type-safe errors.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Session lifecycle and dispatch errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session '{id}' not found; re-initialize to obtain a new session")]
    NotFound { id: String },

    #[error("Session limit reached (max: {max}); retry after {retry_after_secs}s")]
    LimitExceeded { max: usize, retry_after_secs: u64 },

    #[error("Session '{id}' is closed")]
    Closed { id: String },

    #[error("No such operation: '{operation}'")]
    OperationNotFound { operation: String },

    #[error("No backends available in this session")]
    NoBackendsAvailable,

    #[error("Session '{id}' is already populated")]
    AlreadyPopulated { id: String },

    #[error("Closing session '{id}' failed for {failed} backend(s): {details}")]
    CloseFailed {
        id: String,
        failed: usize,
        details: String,
    },
}

/// Backend connection and call errors
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Connection failed to backend '{backend}': {reason}")]
    ConnectFailed { backend: String, reason: String },

    #[error("Backend '{backend}' not responding (timeout: {timeout_secs}s)")]
    Timeout { backend: String, timeout_secs: u64 },

    #[error("Backend '{backend}' unavailable: {reason}")]
    Unavailable { backend: String, reason: String },

    #[error("Backend '{backend}' reports its session expired")]
    SessionExpired { backend: String },

    #[error("Authorization failed for backend '{backend}'")]
    Unauthorized { backend: String },

    #[error("Circuit open for backend '{backend}' (cooldown: {cooldown_secs}s)")]
    CircuitOpen { backend: String, cooldown_secs: u64 },

    #[error("Protocol error from backend '{backend}': {reason}")]
    Protocol { backend: String, reason: String },
}

impl BackendError {
    /// Backend id this error refers to.
    pub fn backend(&self) -> &str {
        match self {
            Self::ConnectFailed { backend, .. }
            | Self::Timeout { backend, .. }
            | Self::Unavailable { backend, .. }
            | Self::SessionExpired { backend }
            | Self::Unauthorized { backend }
            | Self::CircuitOpen { backend, .. }
            | Self::Protocol { backend, .. } => backend,
        }
    }

    /// True for the two conditions that trigger connection re-initialization.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::SessionExpired { .. } | Self::Unauthorized { .. })
    }
}

/// Session metadata store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No metadata record for session '{id}'")]
    NotFound { id: String },

    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Outgoing credential resolution errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Credential resolution failed for backend '{backend}': {reason}")]
    ResolutionFailed { backend: String, reason: String },

    #[error("Environment variable '{var}' not set")]
    EnvVarNotSet { var: String },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Duplicate backend id '{id}'")]
    DuplicateBackend { id: String },
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Result type alias for session operations
pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Result type alias for backend operations
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for auth operations
pub type AuthResult<T> = std::result::Result<T, AuthError>;

/// Result type alias for config operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
