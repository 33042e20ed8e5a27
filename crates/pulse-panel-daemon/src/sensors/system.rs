//! System information: daemon uptime, process count, hostname and platform.

use pulse_panel_core::{Error, Metric, Result};
use std::fs;
use std::time::Instant;

/// System information provider.
pub struct SystemInfo {
    started: Instant,
}

impl SystemInfo {
    /// Creates a provider whose uptime counts from now.
    pub fn new() -> Self {
        Self::started_at(Instant::now())
    }

    /// Creates a provider whose uptime counts from `started`.
    pub fn started_at(started: Instant) -> Self {
        Self { started }
    }

    /// Returns the hostname of the system.
    pub fn hostname(&self) -> String {
        fs::read_to_string("/etc/hostname")
            .map(|s| s.trim().to_string())
            .or_else(|_| {
                fs::read_to_string("/proc/sys/kernel/hostname").map(|s| s.trim().to_string())
            })
            .unwrap_or_else(|_| "unknown".to_string())
    }

    /// Returns "OS release machine", e.g. "Linux 6.8.0 x86_64".
    pub fn platform(&self) -> String {
        let read = |path: &str| fs::read_to_string(path).map(|s| s.trim().to_string()).ok();
        let os = read("/proc/sys/kernel/ostype").unwrap_or_else(|| std::env::consts::OS.to_string());
        match read("/proc/sys/kernel/osrelease") {
            Some(release) => format!("{} {} {}", os, release, std::env::consts::ARCH),
            None => format!("{} {}", os, std::env::consts::ARCH),
        }
    }

    /// Returns how long the daemon has been up, in seconds.
    pub fn uptime_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Returns the number of live processes.
    pub fn process_count(&self) -> Result<u32> {
        let entries = fs::read_dir("/proc").map_err(|e| Error::unavailable(Metric::Processes, e))?;
        let count = entries
            .flatten()
            .filter(|entry| is_pid(&entry.file_name().to_string_lossy()))
            .count();
        Ok(count as u32)
    }
}

fn is_pid(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self::new()
    }
}
