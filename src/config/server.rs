//! Server and credential settings

use serde::{Deserialize, Serialize};

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (empty = all)
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Enable request logging
    #[serde(default = "default_true")]
    pub request_logging: bool,

    /// Maximum request body size in bytes
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

fn default_port() -> u16 {
    8000
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_body_size() -> usize {
    1024 * 1024 // 1 MB
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            request_logging: true,
            max_body_size: default_max_body_size(),
        }
    }
}

impl ServerConfig {
    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub(crate) const DEFAULT_API_KEY: &str = "changeme";
pub(crate) const DEFAULT_ADMIN_TOKEN: &str = "adminchangeme";

/// Bearer credentials
///
/// The standard key grants chat and read access; the admin token grants
/// everything, including model lifecycle and maintenance calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_api_key")]
    pub api_key: String,

    #[serde(default = "default_admin_token")]
    pub admin_token: String,

    /// Hugging Face token forwarded to the repository client
    #[serde(default)]
    pub hf_token: Option<String>,
}

fn default_api_key() -> String {
    DEFAULT_API_KEY.to_string()
}

fn default_admin_token() -> String {
    DEFAULT_ADMIN_TOKEN.to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key: default_api_key(),
            admin_token: default_admin_token(),
            hf_token: None,
        }
    }
}

impl AuthConfig {
    /// True when either credential is still the shipped placeholder
    pub fn uses_placeholder_secrets(&self) -> bool {
        self.api_key == DEFAULT_API_KEY || self.admin_token == DEFAULT_ADMIN_TOKEN
    }
}
