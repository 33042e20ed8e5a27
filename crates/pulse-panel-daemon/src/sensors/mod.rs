//! Host sensors module.
//!
//! Reads CPU, memory, disk, network and process metrics from `/proc`, `/sys`
//! and `statvfs`, adds the daemon's own uptime, and bundles them into the coordinator's [`Sampler`].

mod cpu;
mod disk;
mod memory;
mod network;
mod system;

pub use cpu::CpuSensor;
pub use disk::DiskSensor;
pub use memory::MemorySensor;
pub use network::NetworkSensor;
pub use system::SystemInfo;

use pulse_panel_core::{Metric, MetricReadings, Result, Sampler};
use tracing::debug;

use crate::config::SensorsConfig;

/// Trait for percentage gauges.
pub trait Sensor: Send {
    /// Returns the metric this sensor feeds.
    fn metric(&self) -> Metric;

    /// Samples the current value (0-100).
    fn sample(&mut self) -> Result<f64>;
}

/// Sampler backed by the local host.
pub struct HostSampler {
    cpu: CpuSensor,
    memory: MemorySensor,
    disk: DiskSensor,
    network: NetworkSensor,
    system: SystemInfo,
}

impl HostSampler {
    /// Creates a sampler from the sensor configuration. Uptime counts from here.
    pub fn new(config: &SensorsConfig) -> Self {
        Self {
            cpu: CpuSensor::new(),
            memory: MemorySensor::new(),
            disk: DiskSensor::new(&config.disk_mount),
            network: NetworkSensor::new(config.network_interface.as_deref()),
            system: SystemInfo::new(),
        }
    }
}

/// Samples a gauge, noting failures at debug level. The coordinator warns.
fn gauge(sensor: &mut dyn Sensor) -> Result<f64> {
    sensor.sample().inspect_err(|e| {
        debug!("{} sensor read failed: {}", sensor.metric(), e);
    })
}

impl Sampler for HostSampler {
    fn sample(&mut self) -> MetricReadings {
        let (network_sent_bytes, network_recv_bytes) = match self.network.counters() {
            Ok((sent, recv)) => (Ok(sent), Ok(recv)),
            Err(e) => {
                let reason = match e {
                    pulse_panel_core::Error::MetricUnavailable { reason, .. } => reason,
                    other => other.to_string(),
                };
                (
                    Err(pulse_panel_core::Error::unavailable(Metric::NetworkSent, &reason)),
                    Err(pulse_panel_core::Error::unavailable(Metric::NetworkRecv, &reason)),
                )
            }
        };

        MetricReadings {
            cpu_percent: gauge(&mut self.cpu),
            memory_percent: gauge(&mut self.memory),
            disk_percent: gauge(&mut self.disk),
            network_sent_bytes,
            network_recv_bytes,
            process_count: self.system.process_count(),
            uptime_seconds: Ok(self.system.uptime_seconds()),
        }
    }
}
