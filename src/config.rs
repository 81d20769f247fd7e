//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - config.toml (default configuration)
//! - config.local.toml (git-ignored local overrides)
//! - Environment variables (GRAPHGATE_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # config.toml
//! [http]
//! host = "0.0.0.0"
//! port = 4000
//! path = "/graphql"
//!
//! [csrf]
//! enabled = true
//! header_name = "x-csrf-token"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! GRAPHGATE_HTTP__PORT=4001
//! GRAPHGATE_CSRF__ENABLED=false
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub csrf: CsrfConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP listener and gateway route configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// HTTP server bind address
    #[serde(default = "default_http_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_http_port")]
    pub port: u16,

    /// The single route serving both transports
    #[serde(default = "default_path")]
    pub path: String,

    /// Allowed CORS origins (empty = same-origin only, unless cors_allow_all is true)
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Explicitly allow all CORS origins (dev mode opt-in)
    #[serde(default)]
    pub cors_allow_all: bool,

    /// Maximum accepted request body in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Media types accepted on simple (non-upgraded) requests.
    /// Browser form types must never appear here: they skip the CORS preflight.
    #[serde(default = "default_allowed_content_types")]
    pub allowed_content_types: Vec<String>,
}

/// CSRF protection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsrfConfig {
    /// Validate CSRF tokens on simple requests and WebSocket handshakes
    #[serde(default)]
    pub enabled: bool,

    /// Request header carrying the token on HTTP requests and WebSocket upgrades
    #[serde(default = "default_csrf_header")]
    pub header_name: String,

    /// Cookie identifying the caller's session in the session store
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,

    /// `connection_init` payload field carrying the token
    #[serde(default = "default_init_payload_key")]
    pub init_payload_key: String,
}

/// WebSocket session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Time allowed between upgrade and `connection_init`. 0 = wait forever.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Close the connection after this long without an inbound frame. 0 = disabled.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Interval for legacy `ka` frames on graphql-ws sessions. 0 = disabled.
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,

    /// Maximum inbound message size in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Capacity of the per-session outbound frame queue
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_http_host() -> String {
    "127.0.0.1".to_string()
}
fn default_http_port() -> u16 {
    4000
}
fn default_path() -> String {
    "/graphql".to_string()
}
fn default_max_body_bytes() -> usize {
    1_048_576 // 1 MB
}
fn default_allowed_content_types() -> Vec<String> {
    vec!["application/json".to_string()]
}
fn default_csrf_header() -> String {
    "x-csrf-token".to_string()
}
fn default_session_cookie() -> String {
    "session_id".to_string()
}
fn default_init_payload_key() -> String {
    "csrfToken".to_string()
}
fn default_handshake_timeout_ms() -> u64 {
    3_000
}
fn default_idle_timeout_ms() -> u64 {
    300_000 // 5 minutes
}
fn default_keepalive_interval_ms() -> u64 {
    12_000
}
fn default_max_message_size() -> usize {
    16 * 1024 * 1024
}
fn default_outbound_buffer() -> usize {
    256
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. config.toml (base configuration)
    /// 2. config.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (GRAPHGATE_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("config.toml"))
            .merge(Toml::file("config.local.toml"))
            .merge(Env::prefixed("GRAPHGATE_").split("__"))
            .extract()
    }

    /// Load configuration from specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("GRAPHGATE_").split("__"))
            .extract()
    }

    /// Check invariants serde defaults cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if !self.http.path.starts_with('/') {
            return Err(format!(
                "http.path must start with '/', got '{}'",
                self.http.path
            ));
        }
        if self.http.allowed_content_types.is_empty() {
            return Err("http.allowed_content_types must not be empty".to_string());
        }
        if let Some(form) = self
            .http
            .allowed_content_types
            .iter()
            .find(|t| is_preflight_exempt(t))
        {
            return Err(format!(
                "http.allowed_content_types must not contain '{form}': browsers send it cross-site without a preflight"
            ));
        }
        if self.websocket.outbound_buffer == 0 {
            return Err("websocket.outbound_buffer must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Media types a browser may send cross-origin without a CORS preflight.
pub const PREFLIGHT_EXEMPT_CONTENT_TYPES: [&str; 3] = [
    "application/x-www-form-urlencoded",
    "multipart/form-data",
    "text/plain",
];

fn is_preflight_exempt(media_type: &str) -> bool {
    PREFLIGHT_EXEMPT_CONTENT_TYPES
        .iter()
        .any(|t| t.eq_ignore_ascii_case(media_type.trim()))
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            host: default_http_host(),
            port: default_http_port(),
            path: default_path(),
            cors_origins: Vec::new(),
            cors_allow_all: false,
            max_body_bytes: default_max_body_bytes(),
            allowed_content_types: default_allowed_content_types(),
        }
    }
}

impl Default for CsrfConfig {
    fn default() -> Self {
        CsrfConfig {
            enabled: false,
            header_name: default_csrf_header(),
            session_cookie: default_session_cookie(),
            init_payload_key: default_init_payload_key(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig {
            handshake_timeout_ms: default_handshake_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
            max_message_size: default_max_message_size(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}
