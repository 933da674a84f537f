//! Per-client sliding-window rate limiter
//!
//! Each client keeps an exact log of request timestamps for a short and a long
//! window. A request is admitted only if neither log has reached its cap after
//! expired entries are trimmed, so there is no bucket edge at which twice the
//! cap can slip through.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::RateLimitConfig;
use crate::error::{Error, Result};

/// One rate window's timestamp log
#[derive(Debug)]
struct Window {
    label: &'static str,
    length: Duration,
    cap: u32,
    hits: VecDeque<Instant>,
}

impl Window {
    fn new(label: &'static str, length: Duration, cap: u32) -> Self {
        Self {
            label,
            length,
            cap,
            hits: VecDeque::new(),
        }
    }

    /// Drop timestamps that have fallen out of the window
    fn trim(&mut self, now: Instant) {
        while let Some(&oldest) = self.hits.front() {
            if now.saturating_duration_since(oldest) > self.length {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    fn is_full(&self) -> bool {
        self.hits.len() >= self.cap as usize
    }

    fn remaining(&self) -> u32 {
        self.cap.saturating_sub(self.hits.len() as u32)
    }

    /// Time until the oldest retained hit expires
    fn reset_after(&self, now: Instant) -> Duration {
        self.hits
            .front()
            .map(|&oldest| {
                (self.length + Duration::from_millis(1))
                    .saturating_sub(now.saturating_duration_since(oldest))
            })
            .unwrap_or(Duration::ZERO)
    }
}

/// Timestamp logs for one client
#[derive(Debug)]
pub struct ClientWindowCounter {
    short: Window,
    long: Window,
    last_seen: Instant,
    /// Set by the sweeper when the counter leaves the map
    evicted: bool,
}

impl ClientWindowCounter {
    fn new(config: &RateLimitConfig, now: Instant) -> Self {
        Self {
            short: Window::new("short", config.short_window(), config.short_cap),
            long: Window::new("long", config.long_window(), config.long_cap),
            last_seen: now,
            evicted: false,
        }
    }

    /// Check against a counter that is still in the map; `None` once evicted
    fn check_live(&mut self, now: Instant) -> Option<Result<Quota>> {
        (!self.evicted).then(|| self.check(now))
    }

    fn check(&mut self, now: Instant) -> Result<Quota> {
        self.last_seen = now;
        self.short.trim(now);
        self.long.trim(now);

        for window in [&self.short, &self.long] {
            if window.is_full() {
                return Err(Error::RateLimited {
                    window: window.label,
                    limit: window.cap,
                    retry_after: window.reset_after(now),
                });
            }
        }

        self.short.hits.push_back(now);
        self.long.hits.push_back(now);
        Ok(Quota {
            limit: self.short.cap,
            remaining: self.short.remaining(),
            reset_after: self.short.reset_after(now),
        })
    }

    fn is_idle(&self, now: Instant, idle_after: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > idle_after
    }
}

/// Admission granted, with the caller's remaining short-window budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quota {
    pub limit: u32,
    pub remaining: u32,
    #[serde(with = "secs")]
    pub reset_after: Duration,
}

mod secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}

/// Dual-window rate limiter keyed by client
pub struct RateLimiter {
    config: RateLimitConfig,
    clients: DashMap<String, Arc<Mutex<ClientWindowCounter>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            clients: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Admit or reject a request from `client_key` arriving now
    pub fn admit(&self, client_key: &str) -> Result<Quota> {
        self.admit_at(client_key, Instant::now())
    }

    /// Admit or reject a request from `client_key` arriving at `now`
    pub fn admit_at(&self, client_key: &str, now: Instant) -> Result<Quota> {
        // A handle swept between lookup and lock is stale; look it up again.
        let decision = loop {
            if let Some(decision) = self.counter(client_key, now).lock().check_live(now) {
                break decision;
            }
        };
        if let Err(Error::RateLimited { window, .. }) = &decision {
            tracing::warn!("rate limit exceeded for {} ({} window)", client_key, window);
        }
        decision
    }

    /// Per-client handle, cloned out so the map shard is not held while the
    /// client's own lock is taken
    fn counter(&self, client_key: &str, now: Instant) -> Arc<Mutex<ClientWindowCounter>> {
        self.clients
            .entry(client_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ClientWindowCounter::new(&self.config, now))))
            .value()
            .clone()
    }

    /// Number of clients currently tracked
    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }

    /// Evict clients idle for longer than the long window
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Evict clients idle for longer than the long window, as of `now`
    pub fn sweep_at(&self, now: Instant) -> usize {
        let idle_after = self.config.long_window();
        let before = self.clients.len();
        self.clients.retain(|_, counter| {
            let mut counter = counter.lock();
            counter.evicted = counter.is_idle(now, idle_after);
            !counter.evicted
        });
        let evicted = before.saturating_sub(self.clients.len());
        if evicted > 0 {
            tracing::debug!("swept {} idle rate-limit counters", evicted);
        }
        evicted
    }

    /// Run [`RateLimiter::sweep`] periodically until `shutdown` fires
    pub fn spawn_sweeper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        let every = limiter.config.sweep_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        limiter.sweep();
                    }
                    _ = shutdown.cancelled() => {
                        tracing::debug!("rate-limit sweeper shutting down");
                        break;
                    }
                }
            }
        })
    }
}
