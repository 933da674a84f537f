//! Operational telemetry
//!
//! Counters are plain atomics, so recording never waits on a snapshot and a
//! snapshot never waits on recording. Derived rates are computed when a
//! snapshot is taken and host gauges are read at that moment.

mod host;

pub use host::{CpuGauge, DiskGauge, HostReading, MemoryGauge, ResourceProbe, StaticProbe, SysinfoProbe};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::HealthThresholds;
use crate::error::ErrorCategory;

/// Overall health verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

/// Model section of the health payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct ModelHealth {
    pub loaded: bool,
    pub name: Option<String>,
}

/// Request counters and derived rates
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiStats {
    pub uptime_seconds: f64,
    pub total_requests: u64,
    pub error_count: u64,
    pub error_rate_percent: f64,
    pub avg_response_time_seconds: f64,
    pub requests_per_second: f64,
    pub errors_by_category: BTreeMap<&'static str, u64>,
}

/// Health payload, regenerated on every request
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub model: ModelHealth,
    pub system: Option<HostReading>,
    pub api: ApiStats,
}

/// Aggregates request outcomes and host readings
pub struct TelemetryHub {
    started: Instant,
    total: AtomicU64,
    errors: [AtomicU64; ErrorCategory::ALL.len()],
    latency_micros: AtomicU64,
    probe: Box<dyn ResourceProbe>,
    thresholds: HealthThresholds,
}

impl TelemetryHub {
    pub fn new(probe: Box<dyn ResourceProbe>, thresholds: HealthThresholds) -> Self {
        Self {
            started: Instant::now(),
            total: AtomicU64::new(0),
            errors: std::array::from_fn(|_| AtomicU64::new(0)),
            latency_micros: AtomicU64::new(0),
            probe,
            thresholds,
        }
    }

    /// Hub reading real host gauges
    pub fn with_sysinfo(thresholds: HealthThresholds) -> Self {
        Self::new(Box::new(SysinfoProbe::new()), thresholds)
    }

    /// Record one completed request
    pub fn record(&self, outcome: Result<(), ErrorCategory>, latency: Duration) {
        if let Err(category) = outcome {
            self.errors[category.index()].fetch_add(1, Ordering::Relaxed);
        }
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.latency_micros.fetch_add(micros, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Release);
    }

    /// Errors recorded for one category
    pub fn errors_in(&self, category: ErrorCategory) -> u64 {
        self.errors[category.index()].load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Counters and rates as of now
    pub fn stats(&self) -> ApiStats {
        self.stats_over(self.uptime())
    }

    /// Counters and rates for a given uptime
    pub fn stats_over(&self, uptime: Duration) -> ApiStats {
        let total = self.total.load(Ordering::Acquire);
        let latency = Duration::from_micros(self.latency_micros.load(Ordering::Relaxed));

        let mut errors_by_category = BTreeMap::new();
        let mut error_count = 0u64;
        for category in ErrorCategory::ALL {
            let n = self.errors_in(category);
            if n > 0 {
                errors_by_category.insert(category.as_str(), n);
                error_count += n;
            }
        }
        // An error may land between the loads above; never report more errors than requests.
        let error_count = error_count.min(total);

        let uptime_seconds = uptime.as_secs_f64();
        ApiStats {
            uptime_seconds,
            total_requests: total,
            error_count,
            error_rate_percent: if total > 0 {
                error_count as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            avg_response_time_seconds: if total > 0 {
                latency.as_secs_f64() / total as f64
            } else {
                0.0
            },
            requests_per_second: if uptime_seconds > 0.0 {
                total as f64 / uptime_seconds
            } else {
                0.0
            },
            errors_by_category,
        }
    }

    /// Build a health snapshot for the given model status
    pub fn snapshot(&self, model: ModelHealth) -> HealthSnapshot {
        let system = self.probe.read();
        let status = self.classify(&model, system.as_ref());
        if status == HealthStatus::Critical {
            tracing::warn!("host resources critical: {:?}", system);
        }
        HealthSnapshot {
            status,
            timestamp: Utc::now(),
            model,
            system,
            api: self.stats(),
        }
    }

    fn classify(&self, model: &ModelHealth, system: Option<&HostReading>) -> HealthStatus {
        let peak = system.map(HostReading::peak_usage_percent).unwrap_or(0.0);
        if peak >= self.thresholds.critical_percent {
            HealthStatus::Critical
        } else if peak >= self.thresholds.degraded_percent || !model.loaded || system.is_none() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn hub(memory: f64, disk: f64) -> TelemetryHub {
        TelemetryHub::new(
            Box::new(StaticProbe::with_usage(memory, disk)),
            HealthThresholds::default(),
        )
    }

    fn loaded() -> ModelHealth {
        ModelHealth {
            loaded: true,
            name: Some("m".to_string()),
        }
    }

    #[test]
    fn test_accounting_over_mixed_outcomes() {
        let hub = hub(10.0, 10.0);
        for _ in 0..7 {
            hub.record(Ok(()), Duration::from_millis(100));
        }
        hub.record(Err(ErrorCategory::Timeout), Duration::from_millis(100));
        hub.record(Err(ErrorCategory::RateLimited), Duration::from_millis(100));
        hub.record(Err(ErrorCategory::Timeout), Duration::from_millis(100));

        let stats = hub.stats_over(Duration::from_secs(5));
        assert_eq!(stats.total_requests, 10);
        assert_eq!(stats.error_count, 3);
        assert_eq!(
            stats.error_rate_percent,
            stats.error_count as f64 / stats.total_requests as f64 * 100.0
        );
        assert!((stats.avg_response_time_seconds - 0.1).abs() < 1e-9);
        assert!((stats.requests_per_second - 2.0).abs() < 1e-9);
        assert_eq!(stats.errors_by_category.get("timeout"), Some(&2));
        assert_eq!(stats.errors_by_category.get("rate_limited"), Some(&1));
    }

    #[test]
    fn test_empty_hub_reports_zero_rates() {
        let stats = hub(10.0, 10.0).stats_over(Duration::ZERO);
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.error_rate_percent, 0.0);
        assert_eq!(stats.requests_per_second, 0.0);
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(hub(50.0, 50.0).snapshot(loaded()).status, HealthStatus::Healthy);
        assert_eq!(
            hub(50.0, 50.0).snapshot(ModelHealth::default()).status,
            HealthStatus::Degraded
        );
        assert_eq!(hub(92.0, 50.0).snapshot(loaded()).status, HealthStatus::Degraded);
        assert_eq!(hub(50.0, 99.0).snapshot(loaded()).status, HealthStatus::Critical);
    }

    #[test]
    fn test_missing_host_reading_degrades() {
        let hub = TelemetryHub::new(Box::new(StaticProbe(None)), HealthThresholds::default());
        let snapshot = hub.snapshot(loaded());
        assert_eq!(snapshot.status, HealthStatus::Degraded);
        assert!(snapshot.system.is_none());
    }

    #[test]
    fn test_snapshot_payload_shape() {
        let hub = hub(20.0, 30.0);
        hub.record(Ok(()), Duration::from_millis(5));
        let value = serde_json::to_value(hub.snapshot(loaded())).unwrap();

        assert_eq!(value["status"], "healthy");
        assert!(value["timestamp"].is_string());
        assert_eq!(value["model"]["loaded"], true);
        assert_eq!(value["model"]["name"], "m");
        assert!(value["system"]["memory"]["percentUsed"].is_number());
        assert!(value["system"]["disk"]["freeGb"].is_number());
        assert!(value["system"]["cpu"]["percent"].is_number());
        for key in [
            "uptimeSeconds",
            "totalRequests",
            "errorCount",
            "errorRatePercent",
            "avgResponseTimeSeconds",
            "requestsPerSecond",
        ] {
            assert!(value["api"].get(key).is_some(), "missing api.{key}");
        }
    }

    #[test]
    fn test_concurrent_recording_is_lossless() {
        let hub = Arc::new(hub(10.0, 10.0));
        let threads: Vec<_> = (0..8)
            .map(|i| {
                let hub = Arc::clone(&hub);
                std::thread::spawn(move || {
                    for j in 0..1000 {
                        let outcome = if (i + j) % 4 == 0 {
                            Err(ErrorCategory::EngineFailure)
                        } else {
                            Ok(())
                        };
                        hub.record(outcome, Duration::from_micros(10));
                        if j % 100 == 0 {
                            let _ = hub.stats();
                        }
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let stats = hub.stats();
        assert_eq!(stats.total_requests, 8000);
        assert_eq!(stats.error_count, 2000);
        assert_eq!(stats.error_rate_percent, 25.0);
    }
}
