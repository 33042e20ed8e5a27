//! Metric snapshots and the sampler seam.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One field of a [`MetricSnapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Cpu,
    Memory,
    Disk,
    NetworkSent,
    NetworkRecv,
    Processes,
    Uptime,
}

impl Metric {
    /// All metrics in display order.
    pub const ALL: [Metric; 7] = [
        Metric::Cpu,
        Metric::Memory,
        Metric::Disk,
        Metric::NetworkSent,
        Metric::NetworkRecv,
        Metric::Processes,
        Metric::Uptime,
    ];

    /// Human-readable label (e.g., "CPU Usage").
    pub fn label(&self) -> &'static str {
        match self {
            Metric::Cpu => "CPU Usage",
            Metric::Memory => "Memory Usage",
            Metric::Disk => "Disk Usage",
            Metric::NetworkSent => "Network Sent",
            Metric::NetworkRecv => "Network Received",
            Metric::Processes => "Running Processes",
            Metric::Uptime => "Panel Uptime",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Metric::Cpu => "cpu",
            Metric::Memory => "memory",
            Metric::Disk => "disk",
            Metric::NetworkSent => "network_sent",
            Metric::NetworkRecv => "network_recv",
            Metric::Processes => "processes",
            Metric::Uptime => "uptime",
        };
        f.write_str(name)
    }
}

/// Host metrics for a single tick. Never mutated once built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    /// CPU usage percentage (0-100)
    pub cpu_percent: f64,
    /// RAM usage percentage (0-100)
    pub memory_percent: f64,
    /// Disk usage percentage of the monitored mount (0-100)
    pub disk_percent: f64,
    /// Bytes sent since boot
    pub network_sent_bytes: u64,
    /// Bytes received since boot
    pub network_recv_bytes: u64,
    /// Number of live processes
    pub process_count: u32,
    /// Seconds since the daemon started
    pub uptime_seconds: f64,
}

/// Raw output of one [`Sampler::sample`] call. Each field fails independently.
#[derive(Debug, Clone)]
pub struct MetricReadings {
    pub cpu_percent: Result<f64>,
    pub memory_percent: Result<f64>,
    pub disk_percent: Result<f64>,
    pub network_sent_bytes: Result<u64>,
    pub network_recv_bytes: Result<u64>,
    pub process_count: Result<u32>,
    pub uptime_seconds: Result<f64>,
}

impl From<MetricSnapshot> for MetricReadings {
    fn from(snapshot: MetricSnapshot) -> Self {
        Self {
            cpu_percent: Ok(snapshot.cpu_percent),
            memory_percent: Ok(snapshot.memory_percent),
            disk_percent: Ok(snapshot.disk_percent),
            network_sent_bytes: Ok(snapshot.network_sent_bytes),
            network_recv_bytes: Ok(snapshot.network_recv_bytes),
            process_count: Ok(snapshot.process_count),
            uptime_seconds: Ok(snapshot.uptime_seconds),
        }
    }
}

/// Source of host metrics, queried once per tick.
pub trait Sampler: Send {
    /// Reads every metric from the host.
    fn sample(&mut self) -> MetricReadings;
}

impl MetricSnapshot {
    /// Builds a snapshot from fresh readings, carrying over `previous` values
    /// for every field that failed. Returns the errors for the failed fields.
    pub fn merge(previous: Option<&MetricSnapshot>, readings: MetricReadings) -> (Self, Vec<Error>) {
        let fallback = previous.cloned().unwrap_or_default();
        let mut failures = Vec::new();

        let mut keep = |reading: Result<f64>, stale: f64| -> f64 {
            reading.unwrap_or_else(|e| {
                failures.push(e);
                stale
            })
        };
        let cpu_percent = keep(readings.cpu_percent, fallback.cpu_percent);
        let memory_percent = keep(readings.memory_percent, fallback.memory_percent);
        let disk_percent = keep(readings.disk_percent, fallback.disk_percent);
        let uptime_seconds = keep(readings.uptime_seconds, fallback.uptime_seconds);

        let mut keep_count = |reading: Result<u64>, stale: u64| -> u64 {
            reading.unwrap_or_else(|e| {
                failures.push(e);
                stale
            })
        };
        let network_sent_bytes = keep_count(readings.network_sent_bytes, fallback.network_sent_bytes);
        let network_recv_bytes = keep_count(readings.network_recv_bytes, fallback.network_recv_bytes);

        let process_count = readings.process_count.unwrap_or_else(|e| {
            failures.push(e);
            fallback.process_count
        });

        let snapshot = Self {
            cpu_percent: clamp_percent(cpu_percent),
            memory_percent: clamp_percent(memory_percent),
            disk_percent: clamp_percent(disk_percent),
            network_sent_bytes,
            network_recv_bytes,
            process_count,
            uptime_seconds: uptime_seconds.max(0.0),
        };
        (snapshot, failures)
    }

    /// Formats a byte counter in megabytes (e.g., "12.34 MB").
    pub fn format_megabytes(bytes: u64) -> String {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    }

    /// Formats one field for display (e.g., "42.0%", "12.34 MB", "3h 5m").
    pub fn display_value(&self, metric: Metric) -> String {
        match metric {
            Metric::Cpu => format!("{:.1}%", self.cpu_percent),
            Metric::Memory => format!("{:.1}%", self.memory_percent),
            Metric::Disk => format!("{:.1}%", self.disk_percent),
            Metric::NetworkSent => Self::format_megabytes(self.network_sent_bytes),
            Metric::NetworkRecv => Self::format_megabytes(self.network_recv_bytes),
            Metric::Processes => self.process_count.to_string(),
            Metric::Uptime => self.format_uptime(),
        }
    }

    /// Formats the uptime as "Xd Yh Zm".
    pub fn format_uptime(&self) -> String {
        let uptime_secs = self.uptime_seconds as u64;

        let days = uptime_secs / 86400;
        let hours = (uptime_secs % 86400) / 3600;
        let minutes = (uptime_secs % 3600) / 60;

        if days > 0 {
            format!("{}d {}h {}m", days, hours, minutes)
        } else if hours > 0 {
            format!("{}h {}m", hours, minutes)
        } else {
            format!("{}m", minutes)
        }
    }
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(cpu: f64, disk: f64) -> MetricSnapshot {
        MetricSnapshot {
            cpu_percent: cpu,
            memory_percent: 40.0,
            disk_percent: disk,
            network_sent_bytes: 1_000,
            network_recv_bytes: 2_000,
            process_count: 120,
            uptime_seconds: 3_600.0,
        }
    }

    #[test]
    fn test_merge_keeps_stale_field_only() {
        let previous = snapshot(10.0, 55.0);
        let mut readings = MetricReadings::from(snapshot(20.0, 99.0));
        readings.disk_percent = Err(Error::unavailable(Metric::Disk, "gone"));

        let (merged, failures) = MetricSnapshot::merge(Some(&previous), readings);
        assert_eq!(merged.disk_percent, 55.0);
        assert_eq!(merged.cpu_percent, 20.0);
        assert_eq!(failures.len(), 1);
        assert!(matches!(
            failures[0],
            Error::MetricUnavailable {
                metric: Metric::Disk,
                ..
            }
        ));
    }

    #[test]
    fn test_merge_without_previous_uses_zero() {
        let mut readings = MetricReadings::from(snapshot(20.0, 30.0));
        readings.process_count = Err(Error::unavailable(Metric::Processes, "no /proc"));
        readings.network_recv_bytes = Err(Error::unavailable(Metric::NetworkRecv, "no /sys"));

        let (merged, failures) = MetricSnapshot::merge(None, readings);
        assert_eq!(merged.process_count, 0);
        assert_eq!(merged.network_recv_bytes, 0);
        assert_eq!(merged.network_sent_bytes, 1_000);
        assert_eq!(failures.len(), 2);
    }

    #[test]
    fn test_merge_clamps_percentages() {
        let readings = MetricReadings::from(snapshot(104.2, f64::NAN));
        let (merged, failures) = MetricSnapshot::merge(None, readings);
        assert!(failures.is_empty());
        assert_eq!(merged.cpu_percent, 100.0);
        assert_eq!(merged.disk_percent, 0.0);
    }

    #[test]
    fn test_format_uptime() {
        let mut s = snapshot(0.0, 0.0);
        s.uptime_seconds = 59.0;
        assert_eq!(s.format_uptime(), "0m");
        s.uptime_seconds = 2.0 * 3600.0 + 5.0 * 60.0;
        assert_eq!(s.format_uptime(), "2h 5m");
        s.uptime_seconds = 86400.0 + 3600.0 + 60.0;
        assert_eq!(s.format_uptime(), "1d 1h 1m");
    }

    #[test]
    fn test_format_megabytes() {
        assert_eq!(MetricSnapshot::format_megabytes(0), "0.00 MB");
        assert_eq!(MetricSnapshot::format_megabytes(3 * 1024 * 1024 / 2), "1.50 MB");
    }

    #[test]
    fn test_display_value() {
        let s = snapshot(12.345, 50.0);
        assert_eq!(s.display_value(Metric::Cpu), "12.3%");
        assert_eq!(s.display_value(Metric::Processes), "120");
        assert_eq!(s.display_value(Metric::NetworkRecv), "0.00 MB");
        assert_eq!(s.display_value(Metric::Uptime), "1h 0m");
        assert_eq!(Metric::NetworkRecv.label(), "Network Received");
    }

    #[test]
    fn test_metric_names_match_json() {
        for metric in Metric::ALL {
            let json = serde_json::to_value(metric).unwrap();
            assert_eq!(json, metric.to_string());
        }
        assert_eq!(Metric::Uptime.label(), "Panel Uptime");
    }
}
