//! Tick scheduling and speed test coordination.
//!
//! A [`Coordinator`] is owned by exactly one task. Regular ticks, forced
//! refreshes and probe requests are all handled on that task, so two ticks
//! never overlap. The probe itself runs on a worker thread and reports back
//! through the [`ProbeMailbox`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::probe::{Probe, ProbeMailbox, ProbeState, SpeedTestResult};
use crate::snapshot::{Metric, MetricSnapshot, Sampler};
use crate::{Error, Result};

/// Degraded-sample warnings are repeated at most this often.
const FAILURE_LOG_PERIOD: Duration = Duration::from_secs(60);

/// Capacity of the event channel between handles and the loop.
const EVENT_QUEUE: usize = 16;

/// Everything a display needs for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelView {
    /// Publish counter, starting at 1
    pub sequence: u64,
    /// Metrics for this tick
    pub snapshot: MetricSnapshot,
    /// Speed test state as of this tick
    pub probe: ProbeState,
    /// Most recent successful speed test, if any
    pub last_result: Option<SpeedTestResult>,
    /// Metrics carried over from the previous tick because the host read failed
    pub degraded: Vec<Metric>,
    /// When this view was published
    pub published_at: DateTime<Utc>,
}

impl PanelView {
    /// Returns the line shown under the speed test button.
    pub fn speed_test_line(&self) -> String {
        match (&self.probe, &self.last_result) {
            (ProbeState::Completed(result), _) => result.describe(),
            (ProbeState::Idle, Some(last)) => last.describe(),
            (state, _) => state.to_string(),
        }
    }
}

/// Receives every published view.
pub trait Publisher: Send + Sync {
    fn publish(&self, view: &PanelView);
}

impl Publisher for watch::Sender<Option<PanelView>> {
    fn publish(&self, view: &PanelView) {
        self.send_replace(Some(view.clone()));
    }
}

/// Requests accepted by the coordinator loop.
#[derive(Debug)]
pub enum PanelEvent {
    /// Start a speed test unless one is running.
    StartProbe(oneshot::Sender<Result<()>>),
    /// Tick immediately and return the published view.
    Refresh(oneshot::Sender<PanelView>),
    /// Stop ticking.
    Quit,
}

/// Tracks repeated sampler failures so they are logged, not spammed.
struct FailureLog {
    streak: u32,
    suppressed: u32,
    last_log: Instant,
}

impl FailureLog {
    fn new() -> Self {
        Self {
            streak: 0,
            suppressed: 0,
            last_log: Instant::now(),
        }
    }

    fn record(&mut self, failures: &[Error]) {
        if failures.is_empty() {
            self.streak = 0;
            self.suppressed = 0;
            return;
        }

        self.streak += 1;
        let elapsed = self.last_log.elapsed();
        if self.streak == 1 || elapsed >= FAILURE_LOG_PERIOD {
            let detail = failures
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            if self.suppressed > 0 {
                warn!(
                    "Degraded sample (repeated {} times in {:?}): {}",
                    self.suppressed + 1,
                    elapsed,
                    detail
                );
            } else {
                warn!("Degraded sample: {}", detail);
            }
            self.last_log = Instant::now();
            self.suppressed = 0;
        } else {
            self.suppressed += 1;
        }
    }
}

/// Owns the sampler, the probe mailbox and the last snapshot.
pub struct Coordinator {
    sampler: Box<dyn Sampler>,
    probe: Arc<dyn Probe>,
    mailbox: ProbeMailbox,
    publisher: Arc<dyn Publisher>,
    last_snapshot: Option<MetricSnapshot>,
    sequence: u64,
    failures: FailureLog,
}

impl Coordinator {
    /// Creates a coordinator with an idle probe.
    pub fn new(
        sampler: impl Sampler + 'static,
        probe: Arc<dyn Probe>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            sampler: Box::new(sampler),
            probe,
            mailbox: ProbeMailbox::new(),
            publisher,
            last_snapshot: None,
            sequence: 0,
            failures: FailureLog::new(),
        }
    }

    /// Gets the current speed test state.
    pub fn probe_state(&self) -> ProbeState {
        self.mailbox.state()
    }

    /// Samples the host, merges the probe state and publishes the result.
    pub fn tick(&mut self) -> PanelView {
        let readings = self.sampler.sample();
        let (snapshot, failures) = MetricSnapshot::merge(self.last_snapshot.as_ref(), readings);
        self.failures.record(&failures);

        let degraded = failures
            .iter()
            .filter_map(|e| match e {
                Error::MetricUnavailable { metric, .. } => Some(*metric),
                _ => None,
            })
            .collect();

        let (probe, last_result) = self.mailbox.read();
        self.sequence += 1;
        let view = PanelView {
            sequence: self.sequence,
            snapshot: snapshot.clone(),
            probe,
            last_result,
            degraded,
            published_at: Utc::now(),
        };

        self.last_snapshot = Some(snapshot);
        self.publisher.publish(&view);
        view
    }

    /// Ticks outside the regular interval. Leaves the probe untouched.
    pub fn refresh(&mut self) -> PanelView {
        debug!("Manual refresh");
        self.tick()
    }

    /// Starts a speed test on the worker thread.
    pub fn start_probe(&self) -> Result<()> {
        match self.mailbox.launch(self.probe.clone()) {
            Ok(()) => {
                info!("Speed test started");
                Ok(())
            }
            Err(Error::ProbeAlreadyRunning) => {
                debug!("Speed test request ignored: already running");
                Err(Error::ProbeAlreadyRunning)
            }
            Err(e) => Err(e),
        }
    }

    /// Runs the tick loop until [`PanelEvent::Quit`] arrives or every handle is dropped.
    ///
    /// The first tick fires one `interval` after the call. A tick that
    /// overruns delays the next one instead of bunching them up.
    pub async fn run(mut self, interval: Duration, mut events: mpsc::Receiver<PanelEvent>) {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Coordinator running with {:?} tick interval", interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick();
                }
                event = events.recv() => match event {
                    Some(PanelEvent::StartProbe(reply)) => {
                        let _ = reply.send(self.start_probe());
                    }
                    Some(PanelEvent::Refresh(reply)) => {
                        let view = self.refresh();
                        let _ = reply.send(view);
                    }
                    Some(PanelEvent::Quit) => {
                        info!("Coordinator stopping");
                        break;
                    }
                    None => {
                        info!("All coordinator handles dropped, stopping");
                        break;
                    }
                },
            }
        }

        if self.mailbox.is_running() {
            debug!("Abandoning in-flight speed test");
        }
    }

    /// Spawns the tick loop on the current runtime.
    pub fn spawn(self, interval: Duration) -> (CoordinatorHandle, JoinHandle<()>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let handle = CoordinatorHandle {
            events: events_tx,
            mailbox: self.mailbox.clone(),
        };
        let task = tokio::spawn(self.run(interval, events_rx));
        (handle, task)
    }
}

/// Cloneable front door to a running coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    events: mpsc::Sender<PanelEvent>,
    mailbox: ProbeMailbox,
}

impl CoordinatorHandle {
    async fn send(&self, event: PanelEvent) -> Result<()> {
        self.events.send(event).await.map_err(|_| Error::Shutdown)
    }

    /// Requests a speed test. Fails with `ProbeAlreadyRunning` if one is in flight.
    pub async fn start_probe(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(PanelEvent::StartProbe(tx)).await?;
        rx.await.map_err(|_| Error::Shutdown)?
    }

    /// Forces an immediate tick and returns its view.
    pub async fn refresh(&self) -> Result<PanelView> {
        let (tx, rx) = oneshot::channel();
        self.send(PanelEvent::Refresh(tx)).await?;
        rx.await.map_err(|_| Error::Shutdown)
    }

    /// Stops the tick loop.
    pub async fn quit(&self) -> Result<()> {
        self.send(PanelEvent::Quit).await
    }

    /// Gets the current speed test state without going through the loop.
    pub fn probe_state(&self) -> ProbeState {
        self.mailbox.state()
    }

    /// Returns true once the loop has stopped.
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}
