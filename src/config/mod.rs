//! Configuration for the manifold gateway
//!
//! Loading order:
//! 1. Embedded default_config.toml (compile-time defaults)
//! 2. User config at ~/.config/manifold/config.toml (or platform-specific location)
//! 3. An explicit `--config` path, which replaces the chain entirely

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Default configuration embedded in the binary
const DEFAULT_CONFIG: &str = include_str!("../../default_config.toml");

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub factory: FactoryConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

/// Inbound endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Name advertised to clients in the initialize result
    #[serde(default = "default_server_name")]
    pub name: String,
    /// Bind address for the streamable HTTP endpoint
    #[serde(default = "default_bind")]
    pub bind: String,
    /// SSE keep-alive interval for HTTP clients
    #[serde(default = "default_sse_keepalive_secs")]
    pub sse_keepalive_secs: u64,
    /// Instructions text returned to clients; a default is generated when absent
    #[serde(default)]
    pub instructions: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            bind: default_bind(),
            sse_keepalive_secs: default_sse_keepalive_secs(),
            instructions: None,
        }
    }
}

/// Session lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Process-wide cap on concurrently active sessions
    #[serde(default = "default_max_active")]
    pub max_active: usize,
    /// Idle TTL for session metadata; touched on every validated request
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Interval of the background sweep that closes expired sessions
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Per-operation call timeout against a backend
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Retry hint returned when the session cap rejects a request
    #[serde(default = "default_retry_after_secs")]
    pub retry_after_secs: u64,
    /// Optional best-effort backend keepalive; disabled when absent
    #[serde(default)]
    pub keepalive_interval_secs: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_active: default_max_active(),
            ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            call_timeout_secs: default_call_timeout_secs(),
            retry_after_secs: default_retry_after_secs(),
            keepalive_interval_secs: None,
        }
    }
}

/// Session factory settings (backend initialization)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactoryConfig {
    /// How many backend connections are established concurrently
    #[serde(default = "default_connect_concurrency")]
    pub connect_concurrency: usize,
    /// Per-backend handshake timeout
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Deadline for populating a whole session
    #[serde(default = "default_overall_deadline_secs")]
    pub overall_deadline_secs: u64,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            connect_concurrency: default_connect_concurrency(),
            connect_timeout_secs: default_connect_timeout_secs(),
            overall_deadline_secs: default_overall_deadline_secs(),
        }
    }
}

/// Backend recovery settings (re-initialization discipline)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Delay before retrying after an authorization-failure recreation
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Consecutive failures before a backend circuit opens
    #[serde(default = "default_circuit_threshold")]
    pub circuit_failure_threshold: u32,
    /// How long an open circuit rejects calls before a probe is allowed
    #[serde(default = "default_circuit_cooldown_secs")]
    pub circuit_cooldown_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            backoff_ms: default_backoff_ms(),
            circuit_failure_threshold: default_circuit_threshold(),
            circuit_cooldown_secs: default_circuit_cooldown_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_true")]
    pub file_output: bool,
    /// Log directory; defaults to ~/.local/share/manifold/logs
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file_output: true,
            dir: None,
        }
    }
}

/// One aggregated backend MCP server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Stable identifier; used as the collision-rename prefix
    pub id: String,
    pub transport: BackendTransport,
    #[serde(default)]
    pub auth: Option<BackendAuth>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Transport for a backend connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendTransport {
    /// Standard input/output transport (spawns a child process)
    Stdio {
        /// Command to execute
        command: String,
        /// Command arguments
        #[serde(default)]
        args: Vec<String>,
        /// Environment variables
        #[serde(default)]
        env: HashMap<String, String>,
    },

    /// Streamable HTTP transport
    Http {
        /// Base URL for the MCP endpoint
        url: String,
        /// Optional HTTP headers
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

impl BackendTransport {
    /// Create a new stdio transport
    pub fn stdio(command: impl Into<String>) -> Self {
        Self::Stdio {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    /// Create a new stdio transport with arguments
    pub fn stdio_with_args(command: impl Into<String>, args: Vec<String>) -> Self {
        Self::Stdio {
            command: command.into(),
            args,
            env: HashMap::new(),
        }
    }

    /// Create a new HTTP transport
    pub fn http(url: impl Into<String>) -> Self {
        Self::Http {
            url: url.into(),
            headers: HashMap::new(),
        }
    }

    /// Get a human-readable description of the transport
    pub fn description(&self) -> String {
        match self {
            Self::Stdio { command, args, .. } => {
                if args.is_empty() {
                    format!("stdio: {}", command)
                } else {
                    format!("stdio: {} {}", command, args.join(" "))
                }
            }
            Self::Http { url, .. } => format!("http: {}", url),
        }
    }
}

/// Per-backend outgoing authentication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum BackendAuth {
    /// Literal bearer token
    Bearer { token: String },
    /// Bearer token read from an environment variable at connect time
    BearerEnv { var: String },
    /// Arbitrary header map (HTTP transports only)
    Headers { headers: HashMap<String, String> },
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_server_name() -> String {
    "manifold".to_string()
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_sse_keepalive_secs() -> u64 {
    15
}

fn default_max_active() -> usize {
    100
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_call_timeout_secs() -> u64 {
    60
}

fn default_retry_after_secs() -> u64 {
    30
}

fn default_connect_concurrency() -> usize {
    10
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_overall_deadline_secs() -> u64 {
    30
}

fn default_backoff_ms() -> u64 {
    250
}

fn default_circuit_threshold() -> u32 {
    5
}

fn default_circuit_cooldown_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Configuration loading
// ============================================================================

impl GatewayConfig {
    /// Load configuration: embedded defaults, overlaid by the user config if present.
    pub fn load() -> ConfigResult<Self> {
        let mut config: GatewayConfig = toml::from_str(DEFAULT_CONFIG).map_err(|e| {
            ConfigError::ParseError(format!("failed to parse embedded default config: {}", e))
        })?;

        if let Some(user_path) = Self::user_config_path() {
            if user_path.exists() {
                config = Self::load_from_file(&user_path)?;
                tracing::info!("Loaded user config from {:?}", user_path);
            }
        }

        config.validate_and_expand()?;
        Ok(config)
    }

    /// Load configuration from an explicit file path.
    pub fn load_from_path(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let mut config = Self::load_from_file(path)?;
        config.validate_and_expand()?;
        Ok(config)
    }

    fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))
    }

    /// User config path (~/.config/manifold/config.toml)
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("manifold").join("config.toml"))
    }

    /// Default log directory (~/.local/share/manifold/logs)
    pub fn default_log_dir() -> Option<PathBuf> {
        dirs::data_local_dir().map(|dir| dir.join("manifold").join("logs"))
    }

    /// Enabled backends only, in configuration order.
    pub fn enabled_backends(&self) -> Vec<BackendConfig> {
        self.backends.iter().filter(|b| b.enabled).cloned().collect()
    }

    /// Check id uniqueness and expand `~` and `$VAR` references in backend
    /// commands, arguments, URLs, env values and header values.
    pub fn validate_and_expand(&mut self) -> ConfigResult<()> {
        let mut seen = HashSet::new();
        for backend in &self.backends {
            if backend.id.is_empty() {
                return Err(ConfigError::Invalid("backend id must not be empty".into()));
            }
            if !seen.insert(backend.id.clone()) {
                return Err(ConfigError::DuplicateBackend {
                    id: backend.id.clone(),
                });
            }
        }

        for backend in &mut self.backends {
            match &mut backend.transport {
                BackendTransport::Stdio { command, args, env } => {
                    *command = expand(command)?;
                    for arg in args.iter_mut() {
                        *arg = expand(arg)?;
                    }
                    for value in env.values_mut() {
                        *value = expand(value)?;
                    }
                }
                BackendTransport::Http { url, headers } => {
                    *url = expand(url)?;
                    for value in headers.values_mut() {
                        *value = expand(value)?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        toml::from_str(DEFAULT_CONFIG).unwrap_or_else(|_| Self {
            server: ServerConfig::default(),
            session: SessionConfig::default(),
            factory: FactoryConfig::default(),
            recovery: RecoveryConfig::default(),
            logging: LoggingConfig::default(),
            backends: Vec::new(),
        })
    }
}

fn expand(value: &str) -> ConfigResult<String> {
    shellexpand::full(value)
        .map(|cow| cow.into_owned())
        .map_err(|e| ConfigError::Invalid(format!("cannot expand '{}': {}", value, e)))
}

// ============================================================================
// Tests
// ============================================================================
