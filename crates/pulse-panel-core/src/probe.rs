//! Speed test probe seam and the single-slot mailbox shared with its worker.
//!
//! The mailbox is the only state touched by two threads: the coordinator
//! reads it on every tick and the worker writes it once when the probe
//! returns. Both sides go through the same mutex.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Outcome of one successful bandwidth measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedTestResult {
    /// Download throughput in megabits per second
    pub download_mbps: f64,
    /// Upload throughput in megabits per second
    pub upload_mbps: f64,
    /// When the measurement finished
    pub measured_at: DateTime<Utc>,
}

impl SpeedTestResult {
    /// Creates a result stamped with the current time. Negative or NaN rates become 0.
    pub fn new(download_mbps: f64, upload_mbps: f64) -> Self {
        Self {
            download_mbps: non_negative(download_mbps),
            upload_mbps: non_negative(upload_mbps),
            measured_at: Utc::now(),
        }
    }

    /// Formats the result the way the panel shows its last-test line.
    pub fn describe(&self) -> String {
        format!(
            "Last Speed Test ({}): {:.2} Mbps down / {:.2} Mbps up",
            self.measured_at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S"),
            self.download_mbps,
            self.upload_mbps
        )
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.max(0.0)
    }
}

/// Lifecycle of the speed test.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum ProbeState {
    #[default]
    Idle,
    Running,
    Completed(SpeedTestResult),
    Failed { reason: String },
}

impl ProbeState {
    /// Returns true while a probe is in flight.
    pub fn is_running(&self) -> bool {
        matches!(self, ProbeState::Running)
    }

    /// Short machine-friendly name of the state.
    pub fn name(&self) -> &'static str {
        match self {
            ProbeState::Idle => "idle",
            ProbeState::Running => "running",
            ProbeState::Completed(_) => "completed",
            ProbeState::Failed { .. } => "failed",
        }
    }
}

impl std::fmt::Display for ProbeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeState::Idle => write!(f, "No speed test yet"),
            ProbeState::Running => write!(f, "Speed test running..."),
            ProbeState::Completed(result) => write!(
                f,
                "{:.2} Mbps down / {:.2} Mbps up",
                result.download_mbps, result.upload_mbps
            ),
            ProbeState::Failed { reason } => write!(f, "Speed test failed: {}", reason),
        }
    }
}

/// A blocking bandwidth measurement.
pub trait Probe: Send + Sync + 'static {
    /// Runs one measurement. May block for tens of seconds.
    fn measure(&self) -> Result<SpeedTestResult>;
}

#[derive(Debug, Default)]
struct ProbeSlot {
    state: ProbeState,
    last_result: Option<SpeedTestResult>,
}

/// Single-slot handoff between the probe worker and the tick path.
///
/// Outside this crate the mailbox is read-only. Only the coordinator starts
/// a run and only its worker records the outcome.
///
/// ```
/// use pulse_panel_core::{ProbeMailbox, ProbeState};
///
/// let mailbox = ProbeMailbox::new();
/// assert_eq!(mailbox.state(), ProbeState::Idle);
/// assert!(mailbox.read().1.is_none());
/// ```
///
/// ```compile_fail
/// use pulse_panel_core::{ProbeMailbox, SpeedTestResult};
///
/// let mailbox = ProbeMailbox::new();
/// mailbox.complete(Ok(SpeedTestResult::new(999.0, 999.0)));
/// ```
///
/// ```compile_fail
/// use pulse_panel_core::ProbeMailbox;
///
/// ProbeMailbox::new().try_begin().unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct ProbeMailbox {
    slot: Arc<Mutex<ProbeSlot>>,
}

impl ProbeMailbox {
    /// Creates an idle mailbox.
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, ProbeSlot> {
        // The slot is always left consistent, so a poisoned lock is still usable.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves to `Running` unless a probe is already in flight.
    pub(crate) fn try_begin(&self) -> Result<()> {
        let mut slot = self.slot();
        if slot.state.is_running() {
            return Err(Error::ProbeAlreadyRunning);
        }
        slot.state = ProbeState::Running;
        Ok(())
    }

    /// Records the outcome of a probe run.
    pub(crate) fn complete(&self, outcome: Result<SpeedTestResult>) {
        let mut slot = self.slot();
        match outcome {
            Ok(result) => {
                slot.last_result = Some(result.clone());
                slot.state = ProbeState::Completed(result);
            }
            Err(Error::ProbeFailed(reason)) => {
                slot.state = ProbeState::Failed { reason };
            }
            Err(e) => {
                slot.state = ProbeState::Failed {
                    reason: e.to_string(),
                };
            }
        }
    }

    /// Returns the current state and the last successful result in one read.
    pub fn read(&self) -> (ProbeState, Option<SpeedTestResult>) {
        let slot = self.slot();
        (slot.state.clone(), slot.last_result.clone())
    }

    /// Returns the current state.
    pub fn state(&self) -> ProbeState {
        self.slot().state.clone()
    }

    /// Returns true while a probe is in flight.
    pub fn is_running(&self) -> bool {
        self.slot().state.is_running()
    }

    /// Claims the slot and runs `probe` on a dedicated worker thread.
    ///
    /// The thread is detached: nothing joins it, and the only trace it leaves
    /// is the completion write into this mailbox.
    pub(crate) fn launch(&self, probe: Arc<dyn Probe>) -> Result<()> {
        self.try_begin()?;

        let mailbox = self.clone();
        let spawned = thread::Builder::new()
            .name("speed-test".to_string())
            .spawn(move || {
                debug!("Speed test worker started");
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| probe.measure()))
                    .unwrap_or_else(|_| Err(Error::ProbeFailed("probe panicked".to_string())));
                match &outcome {
                    Ok(result) => info!(
                        "Speed test finished: {:.2} Mbps down, {:.2} Mbps up",
                        result.download_mbps, result.upload_mbps
                    ),
                    Err(e) => warn!("Speed test failed: {}", e),
                }
                mailbox.complete(outcome);
            });

        if let Err(e) = spawned {
            let reason = format!("could not start worker: {}", e);
            self.complete(Err(Error::ProbeFailed(reason.clone())));
            return Err(Error::ProbeFailed(reason));
        }
        Ok(())
    }
}
