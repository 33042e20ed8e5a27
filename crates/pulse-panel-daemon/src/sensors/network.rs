//! Network traffic counters.

use pulse_panel_core::{Error, Metric, Result};
use std::fs;
use std::path::Path;
use tracing::info;

const SYS_CLASS_NET: &str = "/sys/class/net";

/// Reads cumulative sent/received byte counters.
pub struct NetworkSensor {
    /// Single interface to read, or None to sum every physical interface
    interface: Option<String>,
}

impl NetworkSensor {
    /// Creates a network sensor for one interface, or all interfaces when `None`.
    pub fn new(interface: Option<&str>) -> Self {
        match interface {
            Some(iface) => info!("Network sensor using interface: {}", iface),
            None => info!("Network sensor summing all interfaces"),
        }
        Self {
            interface: interface.map(str::to_string),
        }
    }

    /// Lists network interfaces with statistics (excludes loopback and virtual interfaces).
    pub fn list_interfaces(root: &Path) -> Vec<String> {
        let mut interfaces = Vec::new();
        if let Ok(entries) = fs::read_dir(root) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                // Skip loopback and virtual interfaces
                if name == "lo" || name.starts_with("veth") || name.starts_with("docker") {
                    continue;
                }
                // Check if interface has stats (indicates a real interface)
                if root.join(&name).join("statistics/rx_bytes").exists() {
                    interfaces.push(name);
                }
            }
        }
        interfaces.sort();
        interfaces
    }

    fn read_counter(root: &Path, interface: &str, counter: &str) -> Result<u64> {
        let path = root.join(interface).join("statistics").join(counter);
        let content = fs::read_to_string(&path)
            .map_err(|e| Error::unavailable(Metric::NetworkSent, format!("{}: {}", path.display(), e)))?;
        content.trim().parse().map_err(|_| {
            Error::unavailable(
                Metric::NetworkSent,
                format!("{}: not a counter", path.display()),
            )
        })
    }

    /// Returns (sent, received) bytes read below `root`.
    fn counters_at(&self, root: &Path) -> Result<(u64, u64)> {
        let interfaces = match &self.interface {
            Some(iface) => vec![iface.clone()],
            None => Self::list_interfaces(root),
        };
        if interfaces.is_empty() {
            return Err(Error::unavailable(
                Metric::NetworkSent,
                "no network interfaces with statistics",
            ));
        }

        let mut sent = 0u64;
        let mut recv = 0u64;
        for iface in &interfaces {
            sent = sent.saturating_add(Self::read_counter(root, iface, "tx_bytes")?);
            recv = recv.saturating_add(Self::read_counter(root, iface, "rx_bytes")?);
        }
        Ok((sent, recv))
    }

    /// Returns cumulative (sent, received) bytes.
    pub fn counters(&self) -> Result<(u64, u64)> {
        self.counters_at(Path::new(SYS_CLASS_NET))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fake_sysfs(name: &str, interfaces: &[(&str, u64, u64)]) -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "pulse-panel-net-{}-{}",
            name,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&root);
        for (iface, tx, rx) in interfaces {
            let stats = root.join(iface).join("statistics");
            fs::create_dir_all(&stats).unwrap();
            fs::write(stats.join("tx_bytes"), format!("{}\n", tx)).unwrap();
            fs::write(stats.join("rx_bytes"), format!("{}\n", rx)).unwrap();
        }
        root
    }

    #[test]
    fn test_sums_physical_interfaces() {
        let root = fake_sysfs(
            "sum",
            &[("eth0", 100, 1000), ("wlan0", 50, 500), ("lo", 9999, 9999), ("veth1a", 7, 7)],
        );
        let sensor = NetworkSensor::new(None);
        assert_eq!(sensor.counters_at(&root).unwrap(), (150, 1500));
        assert_eq!(NetworkSensor::list_interfaces(&root), vec!["eth0", "wlan0"]);
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_single_interface() {
        let root = fake_sysfs("single", &[("eth0", 100, 1000), ("wlan0", 50, 500)]);
        let sensor = NetworkSensor::new(Some("wlan0"));
        assert_eq!(sensor.counters_at(&root).unwrap(), (50, 500));
        let _ = fs::remove_dir_all(&root);
    }

    #[test]
    fn test_vanished_interface_is_unavailable() {
        let root = fake_sysfs("gone", &[("eth0", 1, 1)]);
        let sensor = NetworkSensor::new(Some("usb0"));
        assert!(matches!(
            sensor.counters_at(&root),
            Err(Error::MetricUnavailable { .. })
        ));
        let _ = fs::remove_dir_all(&root);
    }
}
