//! Configuration management for Toolwire
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.
//! It also turns the loaded values into the runtime pieces the library
//! needs: page limits, a cursor codec, a policy engine, a session manager,
//! and per-server [`ConnectOptions`].

use crate::error::{Result, ToolwireError};
use crate::mcp::connection::{ConnectOptions, DEFAULT_HANDSHAKE_TIMEOUT};
use crate::mcp::client::DEFAULT_REQUEST_TIMEOUT;
use crate::mcp::cursor::{CursorCodec, DEFAULT_CURSOR_VALIDITY};
use crate::mcp::registry::{PageLimits, DEFAULT_MAX_PAGE_SIZE, DEFAULT_PAGE_SIZE};
use crate::mcp::transport::TransportConfig;
use crate::mcp::types::Implementation;
use crate::security::{PolicyConfig, SecurityPolicyEngine, DEFAULT_EXEMPT_METHODS};
use crate::session::{SessionManager, DEFAULT_SESSION_TTL};
use crate::storage::{SqliteSessionStore, SESSION_DB_ENV};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Main configuration structure for Toolwire
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// How this process introduces itself and its default deadlines
    #[serde(default)]
    pub client: ClientConfig,
    /// Servers this client can connect to
    #[serde(default)]
    pub servers: Vec<ServerEntry>,
    /// Catalog pagination settings
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Session lifetime and persistence
    #[serde(default)]
    pub session: SessionConfig,
    /// Policy applied to outgoing calls
    #[serde(default)]
    pub security: SecurityConfig,
}

/// Client identity and deadlines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Name sent in `clientInfo`
    #[serde(default = "default_client_name")]
    pub name: String,

    /// Version sent in `clientInfo`
    #[serde(default = "default_client_version")]
    pub version: String,

    /// Per-request deadline in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Deadline for transport setup plus `initialize`, in milliseconds
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

fn default_client_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

fn default_client_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_millis() as u64
}

fn default_handshake_timeout_ms() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT.as_millis() as u64
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: default_client_name(),
            version: default_client_version(),
            request_timeout_ms: default_request_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
        }
    }
}

/// One configured server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEntry {
    /// Unique name used on the command line
    pub name: String,

    /// How to reach the server
    pub transport: TransportConfig,

    /// Credential forwarded as `_meta.apiKey`
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Pagination settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Page size used when the caller does not ask for one
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    /// Upper bound on any page
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,

    /// Seconds a cursor stays valid after issue
    #[serde(default = "default_cursor_validity_secs")]
    pub cursor_validity_secs: u64,

    /// HMAC key for cursors; a random per-process key when unset
    #[serde(default)]
    pub cursor_secret: Option<String>,
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_max_page_size() -> usize {
    DEFAULT_MAX_PAGE_SIZE
}

fn default_cursor_validity_secs() -> u64 {
    DEFAULT_CURSOR_VALIDITY.as_secs()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            cursor_validity_secs: default_cursor_validity_secs(),
            cursor_secret: None,
        }
    }
}

/// Session lifetime and persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle seconds before an active session is suspended
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,

    /// SQLite database for persisted sessions; memory only when unset
    #[serde(default)]
    pub store_path: Option<PathBuf>,
}

fn default_session_ttl_secs() -> u64 {
    DEFAULT_SESSION_TTL.as_secs()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl_secs(),
            store_path: None,
        }
    }
}

/// Local security policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Policy to apply; every call is allowed when unset
    #[serde(default)]
    pub policy: Option<PolicyConfig>,

    /// Methods that bypass the policy
    #[serde(default = "default_exempt_methods")]
    pub exempt_methods: Vec<String>,
}

fn default_exempt_methods() -> Vec<String> {
    DEFAULT_EXEMPT_METHODS.iter().map(|m| m.to_string()).collect()
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            policy: None,
            exempt_methods: default_exempt_methods(),
        }
    }
}

impl Config {
    /// Load configuration from file, environment, and CLI
    ///
    /// A missing file is not an error: defaults are used and a warning is
    /// logged.
    ///
    /// # Errors
    ///
    /// Returns [`ToolwireError::Config`] if the file exists but cannot be
    /// read or parsed.
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ToolwireError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| ToolwireError::Config(format!("Failed to parse config: {}", e)))
    }

    fn apply_env_vars(&mut self) {
        if let Ok(v) = std::env::var("TOOLWIRE_REQUEST_TIMEOUT_MS") {
            if let Ok(value) = v.parse() {
                self.client.request_timeout_ms = value;
            } else {
                tracing::warn!("Invalid TOOLWIRE_REQUEST_TIMEOUT_MS: {}", v);
            }
        }

        if let Ok(v) = std::env::var("TOOLWIRE_HANDSHAKE_TIMEOUT_MS") {
            if let Ok(value) = v.parse() {
                self.client.handshake_timeout_ms = value;
            } else {
                tracing::warn!("Invalid TOOLWIRE_HANDSHAKE_TIMEOUT_MS: {}", v);
            }
        }

        if let Ok(v) = std::env::var("TOOLWIRE_MAX_PAGE_SIZE") {
            if let Ok(value) = v.parse() {
                self.registry.max_page_size = value;
            } else {
                tracing::warn!("Invalid TOOLWIRE_MAX_PAGE_SIZE: {}", v);
            }
        }

        if let Ok(v) = std::env::var("TOOLWIRE_SESSION_TTL_SECS") {
            if let Ok(value) = v.parse() {
                self.session.ttl_secs = value;
            } else {
                tracing::warn!("Invalid TOOLWIRE_SESSION_TTL_SECS: {}", v);
            }
        }

        if let Ok(secret) = std::env::var("TOOLWIRE_CURSOR_SECRET") {
            self.registry.cursor_secret = Some(secret);
        }

        if let Ok(path) = std::env::var(SESSION_DB_ENV) {
            self.session.store_path = Some(PathBuf::from(path));
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }
        if let Some(ms) = cli.request_timeout_ms {
            self.client.request_timeout_ms = ms;
        }
        if let Some(ms) = cli.handshake_timeout_ms {
            self.client.handshake_timeout_ms = ms;
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`ToolwireError::Config`] naming the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.client.name.is_empty() {
            return Err(ToolwireError::Config(
                "client.name cannot be empty".to_string(),
            ));
        }

        if self.client.request_timeout_ms == 0 {
            return Err(ToolwireError::Config(
                "client.request_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.client.handshake_timeout_ms == 0 {
            return Err(ToolwireError::Config(
                "client.handshake_timeout_ms must be greater than 0".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for server in &self.servers {
            if server.name.is_empty() {
                return Err(ToolwireError::Config(
                    "server name cannot be empty".to_string(),
                ));
            }
            if !seen.insert(server.name.as_str()) {
                return Err(ToolwireError::Config(format!(
                    "Duplicate server name: {}",
                    server.name
                )));
            }
        }

        if self.registry.default_page_size == 0 || self.registry.max_page_size == 0 {
            return Err(ToolwireError::Config(
                "registry page sizes must be greater than 0".to_string(),
            ));
        }

        if self.registry.default_page_size > self.registry.max_page_size {
            return Err(ToolwireError::Config(format!(
                "registry.default_page_size ({}) exceeds registry.max_page_size ({})",
                self.registry.default_page_size, self.registry.max_page_size
            )));
        }

        if self.registry.cursor_validity_secs == 0 {
            return Err(ToolwireError::Config(
                "registry.cursor_validity_secs must be greater than 0".to_string(),
            ));
        }

        if matches!(self.registry.cursor_secret.as_deref(), Some("")) {
            return Err(ToolwireError::Config(
                "registry.cursor_secret cannot be empty".to_string(),
            ));
        }

        if self.session.ttl_secs == 0 {
            return Err(ToolwireError::Config(
                "session.ttl_secs must be greater than 0".to_string(),
            ));
        }

        if let Some(policy) = &self.security.policy {
            policy.build()?;
        }

        Ok(())
    }

    /// Look up a configured server; the first one when `name` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ToolwireError::Config`] if no server matches.
    pub fn server(&self, name: Option<&str>) -> Result<&ServerEntry> {
        match name {
            Some(name) => self
                .servers
                .iter()
                .find(|s| s.name == name)
                .ok_or_else(|| ToolwireError::Config(format!("Unknown server: {}", name))),
            None => self
                .servers
                .first()
                .ok_or_else(|| ToolwireError::Config("No servers configured".to_string())),
        }
    }

    /// Page size bounds from `registry`.
    pub fn page_limits(&self) -> PageLimits {
        PageLimits {
            default_page_size: self.registry.default_page_size,
            max_page_size: self.registry.max_page_size,
        }
    }

    /// Cursor codec keyed by `registry.cursor_secret`, or a random key.
    pub fn cursor_codec(&self) -> Result<CursorCodec> {
        let validity = Duration::from_secs(self.registry.cursor_validity_secs);
        match &self.registry.cursor_secret {
            Some(secret) => CursorCodec::new(secret.as_bytes().to_vec(), validity),
            None => CursorCodec::random(validity),
        }
    }

    /// Policy engine for `security`.
    pub fn security_engine(&self) -> Result<SecurityPolicyEngine> {
        let engine = match &self.security.policy {
            Some(policy) => SecurityPolicyEngine::new(policy.build()?),
            None => SecurityPolicyEngine::allow_all(),
        };
        Ok(engine.with_exempt_methods(self.security.exempt_methods.iter()))
    }

    /// Session manager, persisting to `session.store_path` when set.
    pub fn session_manager(&self) -> Result<SessionManager> {
        let ttl = Duration::from_secs(self.session.ttl_secs);
        match &self.session.store_path {
            Some(path) => {
                let store = SqliteSessionStore::new_with_path(path.clone())?;
                Ok(SessionManager::with_store(ttl, Arc::new(store)))
            }
            None => Ok(SessionManager::new(ttl)),
        }
    }

    /// Options for connecting to `server`.
    ///
    /// The local policy is only attached when one is configured.
    pub fn connect_options(
        &self,
        server: &ServerEntry,
        sessions: Option<SessionManager>,
    ) -> Result<ConnectOptions> {
        let security = match self.security.policy {
            Some(_) => Some(self.security_engine()?),
            None => None,
        };
        Ok(ConnectOptions {
            client_info: Implementation {
                name: self.client.name.clone(),
                version: self.client.version.clone(),
                description: None,
            },
            request_timeout: Duration::from_millis(self.client.request_timeout_ms),
            handshake_timeout: Duration::from_millis(self.client.handshake_timeout_ms),
            credential: server.api_key.clone(),
            security,
            sessions,
            cursor_codec: Some(self.cursor_codec()?),
            page_limits: self.page_limits(),
            ..ConnectOptions::default()
        })
    }
}
