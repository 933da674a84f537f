//! Admission control settings: rate windows, client identity and deadlines

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a caller is identified for rate limiting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ClientKeyPolicy {
    /// Key on the bearer credential only; anonymous callers share one bucket
    Credential,
    /// Key on the peer network address only
    Address,
    /// Prefer the credential, fall back to the address
    #[default]
    CredentialThenAddress,
}

/// Dual sliding-window rate limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per short window
    #[serde(default = "default_short_cap")]
    pub short_cap: u32,

    /// Short window length in seconds
    #[serde(default = "default_short_window")]
    pub short_window_secs: u64,

    /// Requests allowed per long window
    #[serde(default = "default_long_cap")]
    pub long_cap: u32,

    /// Long window length in seconds
    #[serde(default = "default_long_window")]
    pub long_window_secs: u64,

    /// How often idle client counters are swept
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    #[serde(default)]
    pub client_key: ClientKeyPolicy,
}

fn default_short_cap() -> u32 {
    60
}

fn default_short_window() -> u64 {
    60
}

fn default_long_cap() -> u32 {
    1000
}

fn default_long_window() -> u64 {
    3600
}

fn default_sweep_interval() -> u64 {
    300
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            short_cap: default_short_cap(),
            short_window_secs: default_short_window(),
            long_cap: default_long_cap(),
            long_window_secs: default_long_window(),
            sweep_interval_secs: default_sweep_interval(),
            client_key: ClientKeyPolicy::default(),
        }
    }
}

impl RateLimitConfig {
    pub fn short_window(&self) -> Duration {
        Duration::from_secs(self.short_window_secs)
    }

    pub fn long_window(&self) -> Duration {
        Duration::from_secs(self.long_window_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Deadline enforcement settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlineConfig {
    /// Timeout for inference calls, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Timeout for model loads, in seconds
    #[serde(default = "default_load_timeout")]
    pub load_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    60
}

fn default_load_timeout() -> u64 {
    600 // 10 minutes
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            load_timeout_secs: default_load_timeout(),
        }
    }
}

impl DeadlineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }
}
