//! Configuration management for mcprelay
//!
//! Default config location: ./relay.toml (created with defaults on first run)

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Path of the SSE endpoint (GET)
    #[serde(default = "default_sse_path")]
    pub sse_path: String,
    /// Path clients POST messages to; announced in the handshake
    #[serde(default = "default_message_path")]
    pub message_path: String,
    /// Header the client's API credential is captured from
    #[serde(default = "default_credential_header")]
    pub credential_header: String,
    #[serde(default)]
    pub cors: CorsConfig,
    /// Maximum request body size in bytes (default: 4MB)
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

fn default_bind_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_sse_path() -> String {
    "/sse".to_string()
}

fn default_message_path() -> String {
    "/messages".to_string()
}

fn default_credential_header() -> String {
    "x-api-key".to_string()
}

fn default_max_body_size() -> usize {
    4 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            sse_path: default_sse_path(),
            message_path: default_message_path(),
            credential_header: default_credential_header(),
            cors: CorsConfig::default(),
            max_body_size: default_max_body_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Allowed origins. Use "*" for any origin, or list specific origins.
    #[serde(default = "default_cors_origins")]
    pub origins: Vec<String>,
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            origins: default_cors_origins(),
        }
    }
}

/// How concurrent SSE connections are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionPolicy {
    /// One session at a time; a new SSE connection supersedes the current one
    #[default]
    Single,
    /// Sessions coexist, keyed by id, up to `max_sessions`
    Multi,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub policy: SessionPolicy,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Outbound frames buffered per session before `send` waits
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Upper bound on a single handler invocation
    #[serde(default = "default_handler_timeout_ms")]
    pub handler_timeout_ms: u64,
}

fn default_max_sessions() -> usize {
    100
}

fn default_channel_capacity() -> usize {
    256
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_handler_timeout_ms() -> u64 {
    30_000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            policy: SessionPolicy::default(),
            max_sessions: default_max_sessions(),
            channel_capacity: default_channel_capacity(),
            keep_alive_secs: default_keep_alive_secs(),
            handler_timeout_ms: default_handler_timeout_ms(),
        }
    }
}

impl SessionConfig {
    pub fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

/// External REST API reached by the `upstream_get` tool
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Base URL; the tool is only registered when this is set
    #[serde(default)]
    pub base_url: Option<String>,
    /// Header the session credential is forwarded in
    #[serde(default = "default_auth_header")]
    pub auth_header: String,
    #[serde(default = "default_upstream_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_auth_header() -> String {
    "X-API-Key".to_string()
}

fn default_upstream_timeout_ms() -> u64 {
    10_000
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            auth_header: default_auth_header(),
            timeout_ms: default_upstream_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log output format: "pretty" or "json"
    /// Override with LOG_FORMAT env var
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter string
    /// Override with RUST_LOG env var
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable Prometheus metrics at GET /metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_log_level() -> String {
    "info,relay=debug".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: default_log_format(),
            log_level: default_log_level(),
            metrics_enabled: true,
        }
    }
}

impl Config {
    /// Parse config from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from file path, or create default
    pub fn load_or_create(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = fs::read_to_string(config_path)?;
            Self::from_toml(&content)
        } else {
            let config = Config::default();
            // Try to save default config
            if let Some(parent) = config_path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            let _ = config.save(config_path);
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the transport cannot run with
    pub fn validate(&self) -> Result<()> {
        for (key, path) in [
            ("server.sse_path", &self.server.sse_path),
            ("server.message_path", &self.server.message_path),
        ] {
            if !path.starts_with('/') {
                return Err(anyhow!("{} must start with '/': {}", key, path));
            }
        }
        if self.server.sse_path == self.server.message_path {
            return Err(anyhow!("server.sse_path and server.message_path must differ"));
        }
        if self.session.channel_capacity == 0 {
            return Err(anyhow!("session.channel_capacity must be at least 1"));
        }
        if self.session.max_sessions == 0 {
            return Err(anyhow!("session.max_sessions must be at least 1"));
        }
        if self.session.handler_timeout_ms == 0 {
            return Err(anyhow!("session.handler_timeout_ms must be positive"));
        }
        Ok(())
    }
}
