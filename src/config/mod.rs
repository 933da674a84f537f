//! Configuration system for vigil
//!
//! `VigilConfig` is read once at startup and never mutated afterwards; every
//! component receives the slice it needs by value.

mod limits;
mod server;
mod storage;

pub use limits::{ClientKeyPolicy, DeadlineConfig, RateLimitConfig};
pub use server::{AuthConfig, ServerConfig};
pub use storage::StorageConfig;

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Inference backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineBackend {
    /// Built-in development engine that echoes the prompt
    #[default]
    Echo,
}

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub backend: EngineBackend,

    /// Model id to load at startup, if any
    #[serde(default)]
    pub preload: Option<String>,
}

/// Resource levels at which the health snapshot degrades
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthThresholds {
    /// Memory or disk usage (percent) reported as `degraded`
    #[serde(default = "default_degraded_percent")]
    pub degraded_percent: f64,

    /// Memory or disk usage (percent) reported as `critical`
    #[serde(default = "default_critical_percent")]
    pub critical_percent: f64,
}

fn default_degraded_percent() -> f64 {
    90.0
}

fn default_critical_percent() -> f64 {
    97.0
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            degraded_percent: default_degraded_percent(),
            critical_percent: default_critical_percent(),
        }
    }
}

/// Vigil configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VigilConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub deadline: DeadlineConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub health: HealthThresholds,

    #[serde(default)]
    pub engine: EngineConfig,
}

impl VigilConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration, picking the parser from the file extension
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(path),
            Some("json") => Self::from_json(path),
            other => Err(anyhow!(
                "unsupported config extension {:?} for {}",
                other,
                path.display()
            )),
        }
    }

    /// Apply secret and directory overrides from the process environment
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("VIGIL_API_KEY") {
            self.auth.api_key = key;
        }
        if let Some(token) = lookup("VIGIL_ADMIN_TOKEN") {
            self.auth.admin_token = token;
        }
        if let Some(token) = lookup("HF_TOKEN").filter(|t| !t.is_empty()) {
            self.auth.hf_token = Some(token);
        }
        if let Some(dir) = lookup("VIGIL_MODEL_DIR") {
            self.storage.model_dir = PathBuf::from(dir);
        }
        self
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<()> {
        let limits = &self.rate_limit;
        if limits.short_cap == 0 || limits.long_cap == 0 {
            return Err(anyhow!("rate limit caps must be positive"));
        }
        if limits.short_window_secs == 0 || limits.short_window_secs > limits.long_window_secs {
            return Err(anyhow!(
                "short rate window ({}s) must be positive and no longer than the long window ({}s)",
                limits.short_window_secs,
                limits.long_window_secs
            ));
        }
        if self.deadline.request_timeout_secs == 0 {
            return Err(anyhow!("request timeout must be positive"));
        }
        if self.health.degraded_percent > self.health.critical_percent {
            return Err(anyhow!("degraded threshold exceeds critical threshold"));
        }
        if self.auth.api_key == self.auth.admin_token {
            return Err(anyhow!("api key and admin token must differ"));
        }
        Ok(())
    }
}
