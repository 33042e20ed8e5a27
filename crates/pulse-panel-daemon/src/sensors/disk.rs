//! Disk usage sensor.

use super::Sensor;
use pulse_panel_core::{Error, Metric, Result};
use std::ffi::CString;

/// Disk usage sensor for one mount point, backed by `statvfs`.
pub struct DiskSensor {
    mount: String,
}

impl DiskSensor {
    /// Creates a new disk sensor for a mount point (e.g., "/", "/home").
    pub fn new(mount: &str) -> Self {
        Self {
            mount: mount.to_string(),
        }
    }

    fn read_usage(&self) -> Result<f64> {
        let path = CString::new(self.mount.as_str())
            .map_err(|_| Error::unavailable(Metric::Disk, "mount path contains NUL"))?;

        // SAFETY: statvfs only writes into the zeroed struct we own, and `path`
        // is a valid NUL-terminated string for the duration of the call.
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::statvfs(path.as_ptr(), &mut stat) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            return Err(Error::unavailable(
                Metric::Disk,
                format!("{}: {}", self.mount, err),
            ));
        }

        let block = stat.f_frsize as u64;
        let total = stat.f_blocks as u64 * block;
        let free = stat.f_bfree as u64 * block;
        let available = stat.f_bavail as u64 * block;

        percent_used(total, free, available)
            .ok_or_else(|| Error::unavailable(Metric::Disk, format!("{} reports zero size", self.mount)))
    }
}

/// Used share of the space visible to unprivileged users.
///
/// Blocks reserved for root are excluded from the denominator, so a full
/// disk reads 100% even when root could still write.
fn percent_used(total: u64, free: u64, available: u64) -> Option<f64> {
    let used = total.saturating_sub(free);
    let visible = used + available;
    if visible == 0 {
        None
    } else {
        Some(100.0 * used as f64 / visible as f64)
    }
}

impl Sensor for DiskSensor {
    fn metric(&self) -> Metric {
        Metric::Disk
    }

    fn sample(&mut self) -> Result<f64> {
        self.read_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_used_excludes_reserved_blocks() {
        // 100 blocks, 30 free of which 10 are reserved for root.
        let percent = percent_used(100, 30, 20).unwrap();
        assert!((percent - 77.777).abs() < 0.01);
    }

    #[test]
    fn test_percent_used_empty_fs() {
        assert_eq!(percent_used(0, 0, 0), None);
        assert_eq!(percent_used(100, 100, 100), Some(0.0));
    }

    #[test]
    fn test_root_mount_is_readable() {
        let mut sensor = DiskSensor::new("/");
        let usage = sensor.sample().unwrap();
        assert!((0.0..=100.0).contains(&usage));
        assert_eq!(sensor.metric(), Metric::Disk);
    }

    #[test]
    fn test_nul_in_path() {
        let mut sensor = DiskSensor::new("/bad\0path");
        assert!(sensor.sample().is_err());
    }
}
