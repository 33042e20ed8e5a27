//! CPU usage sensor.

use super::Sensor;
use pulse_panel_core::{Error, Metric, Result};
use std::fs;

/// CPU usage sensor based on `/proc/stat` deltas between samples.
pub struct CpuSensor {
    last_idle: u64,
    last_total: u64,
    last_sample: f64,
}

impl CpuSensor {
    /// Creates a new CPU sensor, priming it so the first sample has a baseline.
    pub fn new() -> Self {
        let mut sensor = Self {
            last_idle: 0,
            last_total: 0,
            last_sample: 0.0,
        };
        if let Ok((idle, total)) = Self::read_cpu_stats() {
            sensor.last_idle = idle;
            sensor.last_total = total;
        }
        sensor
    }

    fn read_cpu_stats() -> Result<(u64, u64)> {
        let content = fs::read_to_string("/proc/stat").map_err(|e| Error::unavailable(Metric::Cpu, e))?;
        content
            .lines()
            .next()
            .and_then(parse_cpu_line)
            .ok_or_else(|| Error::unavailable(Metric::Cpu, "malformed /proc/stat"))
    }

    /// Folds a new (idle, total) pair into the running percentage.
    fn update(&mut self, idle: u64, total: u64) -> f64 {
        if self.last_total > 0 {
            let idle_delta = idle.saturating_sub(self.last_idle);
            let total_delta = total.saturating_sub(self.last_total);

            if total_delta > 0 {
                self.last_sample = 100.0 * (1.0 - (idle_delta as f64 / total_delta as f64));
            }
        }

        self.last_idle = idle;
        self.last_total = total;
        self.last_sample
    }
}

/// Parses the aggregate `cpu` line into (idle + iowait, total) jiffies.
fn parse_cpu_line(line: &str) -> Option<(u64, u64)> {
    let mut fields = line.split_whitespace();
    if fields.next()? != "cpu" {
        return None;
    }
    let parts: Vec<u64> = fields.filter_map(|s| s.parse().ok()).collect();

    if parts.len() >= 4 {
        let idle = parts[3] + parts.get(4).copied().unwrap_or(0);
        // guest and guest_nice are already counted in user and nice
        let total: u64 = parts.iter().take(8).sum();
        Some((idle, total))
    } else {
        None
    }
}

impl Default for CpuSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl Sensor for CpuSensor {
    fn metric(&self) -> Metric {
        Metric::Cpu
    }

    fn sample(&mut self) -> Result<f64> {
        let (idle, total) = Self::read_cpu_stats()?;
        Ok(self.update(idle, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_line() {
        let line = "cpu  4705 150 1120 16250 520 20 10 0 0 0";
        let (idle, total) = parse_cpu_line(line).unwrap();
        assert_eq!(idle, 16250 + 520);
        assert_eq!(total, 4705 + 150 + 1120 + 16250 + 520 + 20 + 10);
    }

    #[test]
    fn test_parse_rejects_per_core_and_garbage() {
        assert!(parse_cpu_line("cpu0 1 2 3 4").is_none());
        assert!(parse_cpu_line("cpu 1 2").is_none());
        assert!(parse_cpu_line("").is_none());
    }

    #[test]
    fn test_update_computes_busy_share() {
        let mut sensor = CpuSensor {
            last_idle: 0,
            last_total: 0,
            last_sample: 0.0,
        };
        // First reading only sets the baseline.
        assert_eq!(sensor.update(100, 200), 0.0);
        // 50 of 200 new jiffies were idle.
        assert_eq!(sensor.update(150, 400), 75.0);
        // No time passed: keep the previous value.
        assert_eq!(sensor.update(150, 400), 75.0);
    }
}
