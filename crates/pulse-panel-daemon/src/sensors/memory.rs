//! Memory usage sensor.

use super::Sensor;
use pulse_panel_core::{Error, Metric, Result};
use std::fs;

/// Memory usage sensor.
pub struct MemorySensor;

impl MemorySensor {
    /// Creates a new memory sensor.
    pub fn new() -> Self {
        Self
    }
}

/// Computes used memory percentage from `/proc/meminfo` text.
fn usage_from_meminfo(content: &str) -> Option<f64> {
    let field = |name: &str| -> Option<u64> {
        content
            .lines()
            .find(|line| line.starts_with(name))
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|value| value.parse().ok())
    };

    let total = field("MemTotal:")?;
    let available = field("MemAvailable:")?;
    if total == 0 {
        return None;
    }
    let used = total.saturating_sub(available);
    Some(100.0 * (used as f64 / total as f64))
}

impl Default for MemorySensor {
    fn default() -> Self {
        Self::new()
    }
}

impl Sensor for MemorySensor {
    fn metric(&self) -> Metric {
        Metric::Memory
    }

    fn sample(&mut self) -> Result<f64> {
        let content =
            fs::read_to_string("/proc/meminfo").map_err(|e| Error::unavailable(Metric::Memory, e))?;
        usage_from_meminfo(&content)
            .ok_or_else(|| Error::unavailable(Metric::Memory, "malformed /proc/meminfo"))
    }
}
