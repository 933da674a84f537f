//! Host resource readings

use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{Disks, System};

const GB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryGauge {
    pub total_gb: f64,
    pub used_gb: f64,
    pub available_gb: f64,
    pub percent_used: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskGauge {
    pub total_gb: f64,
    pub used_gb: f64,
    pub free_gb: f64,
    pub percent_used: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuGauge {
    pub percent: f64,
}

/// Point-in-time host resource reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HostReading {
    pub memory: MemoryGauge,
    pub disk: DiskGauge,
    pub cpu: CpuGauge,
}

impl HostReading {
    /// Highest of memory and disk usage, in percent
    pub fn peak_usage_percent(&self) -> f64 {
        self.memory.percent_used.max(self.disk.percent_used)
    }
}

/// Source of host resource readings
pub trait ResourceProbe: Send + Sync {
    fn read(&self) -> Option<HostReading>;
}

/// [`ResourceProbe`] backed by `sysinfo`
///
/// The `System` handle is kept between reads so CPU usage is measured over
/// the interval since the previous snapshot.
pub struct SysinfoProbe {
    system: Mutex<System>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        system.refresh_cpu_usage();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SysinfoProbe {
    fn read(&self) -> Option<HostReading> {
        let (memory, cpu) = {
            let mut system = self.system.lock();
            system.refresh_memory();
            system.refresh_cpu_usage();

            let total = system.total_memory() as f64;
            if total == 0.0 {
                return None;
            }
            let used = system.used_memory() as f64;
            let available = system.available_memory() as f64;
            let memory = MemoryGauge {
                total_gb: total / GB,
                used_gb: used / GB,
                available_gb: available / GB,
                percent_used: used / total * 100.0,
            };

            let cpus = system.cpus();
            let cpu = if cpus.is_empty() {
                0.0
            } else {
                cpus.iter().map(|c| c.cpu_usage() as f64).sum::<f64>() / cpus.len() as f64
            };
            (memory, CpuGauge { percent: cpu })
        };

        let disks = Disks::new_with_refreshed_list();
        let total: u64 = disks.iter().map(|d| d.total_space()).sum();
        let free: u64 = disks.iter().map(|d| d.available_space()).sum();
        let used = total.saturating_sub(free);
        let disk = DiskGauge {
            total_gb: total as f64 / GB,
            used_gb: used as f64 / GB,
            free_gb: free as f64 / GB,
            percent_used: if total == 0 {
                0.0
            } else {
                used as f64 / total as f64 * 100.0
            },
        };

        Some(HostReading { memory, disk, cpu })
    }
}

/// Probe that returns a fixed reading
#[derive(Debug, Clone)]
pub struct StaticProbe(pub Option<HostReading>);

impl StaticProbe {
    /// Reading with the given memory and disk usage percentages
    pub fn with_usage(memory_percent: f64, disk_percent: f64) -> Self {
        Self(Some(HostReading {
            memory: MemoryGauge {
                total_gb: 64.0,
                used_gb: 64.0 * memory_percent / 100.0,
                available_gb: 64.0 * (100.0 - memory_percent) / 100.0,
                percent_used: memory_percent,
            },
            disk: DiskGauge {
                total_gb: 512.0,
                used_gb: 512.0 * disk_percent / 100.0,
                free_gb: 512.0 * (100.0 - disk_percent) / 100.0,
                percent_used: disk_percent,
            },
            cpu: CpuGauge { percent: 12.5 },
        }))
    }
}

impl ResourceProbe for StaticProbe {
    fn read(&self) -> Option<HostReading> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sysinfo_probe_reports_sane_values() {
        let probe = SysinfoProbe::new();
        if let Some(reading) = probe.read() {
            assert!(reading.memory.total_gb > 0.0);
            assert!((0.0..=100.0).contains(&reading.memory.percent_used));
            assert!((0.0..=100.0).contains(&reading.disk.percent_used));
        }
    }

    #[test]
    fn test_peak_usage() {
        let reading = StaticProbe::with_usage(40.0, 95.0).read().unwrap();
        assert_eq!(reading.peak_usage_percent(), 95.0);
    }
}
