//! Caller identity and outgoing credential resolution
//!
//! The gateway authenticates *toward* backends on behalf of a caller. The
//! resolver is consulted at connection-creation time and again when a backend
//! call fails with an authorization error, so rotated credentials are picked
//! up without restarting the gateway.

use crate::config::{BackendAuth, BackendConfig};
use crate::error::{AuthError, AuthResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Reference to the authenticated caller. Opaque to the session core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable reference persisted in session metadata
    pub subject: String,
    /// Client implementation name from the initialize handshake, if any
    #[serde(default)]
    pub client_name: Option<String>,
    /// Client implementation version from the initialize handshake, if any
    #[serde(default)]
    pub client_version: Option<String>,
}

impl Identity {
    /// Identity for callers that present no credentials of their own.
    pub fn anonymous() -> Self {
        Self {
            subject: "anonymous".to_string(),
            client_name: None,
            client_version: None,
        }
    }

    /// Identity derived from the client info in an initialize request.
    pub fn from_client(name: impl Into<String>, version: impl Into<String>) -> Self {
        let name = name.into();
        let version = version.into();
        Self {
            subject: format!("{}@{}", name, version),
            client_name: Some(name),
            client_version: Some(version),
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.subject)
    }
}

/// Resolved material for authenticating one connection to one backend.
///
/// HTTP transports consume `headers`; stdio transports consume `env`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credential {
    pub headers: HashMap<String, String>,
    pub env: HashMap<String, String>,
}

impl Credential {
    /// No credential material.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Bearer token credential, applied as an Authorization header.
    pub fn bearer(token: impl Into<String>) -> Self {
        let mut headers = HashMap::new();
        headers.insert(
            "Authorization".to_string(),
            format!("Bearer {}", token.into()),
        );
        Self {
            headers,
            env: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty() && self.env.is_empty()
    }
}

/// Resolver for outgoing backend credentials.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Resolve the credential for `identity` toward `backend`.
    ///
    /// Called on every connection creation, including re-initialization after
    /// an authorization failure, so implementations must return fresh material
    /// rather than a connect-time snapshot.
    async fn resolve(&self, identity: &Identity, backend: &BackendConfig)
        -> AuthResult<Credential>;
}

/// Config-driven resolver: credentials come from the backend's `[backends.auth]`
/// section. Environment variables are read at resolve time.
#[derive(Debug, Default)]
pub struct StaticResolver;

impl StaticResolver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CredentialResolver for StaticResolver {
    async fn resolve(
        &self,
        _identity: &Identity,
        backend: &BackendConfig,
    ) -> AuthResult<Credential> {
        match &backend.auth {
            None => Ok(Credential::empty()),
            Some(BackendAuth::Bearer { token }) => Ok(Credential::bearer(token)),
            Some(BackendAuth::BearerEnv { var }) => {
                let token = std::env::var(var).map_err(|_| AuthError::EnvVarNotSet {
                    var: var.clone(),
                })?;
                Ok(Credential::bearer(token))
            }
            Some(BackendAuth::Headers { headers }) => Ok(Credential {
                headers: headers.clone(),
                env: HashMap::new(),
            }),
        }
    }
}
