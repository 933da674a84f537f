//! Per-request context and client identity

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use super::DeadlineGuard;
use crate::config::ClientKeyPolicy;

/// Everything the pipeline needs to know about one inbound call
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub client_key: String,
    /// Monotonic arrival time
    pub arrived_at: Instant,
    /// Wall-clock arrival time, for logs and responses
    pub received_at: DateTime<Utc>,
    pub deadline: Instant,
    /// Free-form origin tag supplied by the caller (e.g. "web", "slack")
    pub channel: Option<String>,
}

impl RequestContext {
    /// Context for a call arriving now, with its deadline derived from `guard`
    pub fn new(client_key: impl Into<String>, guard: &DeadlineGuard) -> Self {
        let arrived_at = Instant::now();
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            client_key: client_key.into(),
            arrived_at,
            received_at: Utc::now(),
            deadline: guard.deadline_from(arrived_at),
            channel: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_channel(mut self, channel: Option<String>) -> Self {
        self.channel = channel;
        self
    }

    /// Replace the deadline, e.g. for work with a longer budget than inference
    pub fn with_timeout(mut self, guard: &DeadlineGuard) -> Self {
        self.deadline = guard.deadline_from(self.arrived_at);
        self
    }
}

/// Derive the rate-limit key for a caller
///
/// Credentials are fingerprinted so raw secrets never become map keys.
pub fn client_key(
    policy: ClientKeyPolicy,
    credential: Option<&str>,
    addr: Option<IpAddr>,
) -> String {
    let by_credential = || credential.filter(|c| !c.is_empty()).map(fingerprint);
    let by_addr = || addr.map(|a| format!("ip:{a}"));

    match policy {
        ClientKeyPolicy::Credential => by_credential().unwrap_or_else(|| "anonymous".to_string()),
        ClientKeyPolicy::Address => by_addr().unwrap_or_else(|| "ip:unknown".to_string()),
        ClientKeyPolicy::CredentialThenAddress => by_credential()
            .or_else(by_addr)
            .unwrap_or_else(|| "anonymous".to_string()),
    }
}

fn fingerprint(credential: &str) -> String {
    let mut hasher = DefaultHasher::new();
    credential.hash(&mut hasher);
    format!("key:{:016x}", hasher.finish())
}
