//! Pulse Panel Core
//!
//! Sampling and scheduling core for the Pulse Panel: the metric snapshot model,
//! the speed-test probe mailbox, and the coordinator that ticks the sampler at
//! a fixed cadence while a blocking probe runs on a worker thread.

pub mod coordinator;
pub mod error;
pub mod probe;
pub mod snapshot;

pub use coordinator::{Coordinator, CoordinatorHandle, PanelEvent, PanelView, Publisher};
pub use error::{Error, Result};
pub use probe::{Probe, ProbeMailbox, ProbeState, SpeedTestResult};
pub use snapshot::{Metric, MetricReadings, MetricSnapshot, Sampler};

use std::time::Duration;

/// Default interval between ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);
