//! System tray implementation using StatusNotifierItem (SNI).

use ksni::{menu::*, Tray, TrayService};
use pulse_panel_core::{Metric, PanelView};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Web UI address opened from the menu.
const WEB_UI_URL: &str = "http://127.0.0.1:8787";

/// Commands that can be sent from tray callbacks to the async worker.
#[derive(Debug, Clone, PartialEq)]
pub enum TrayCommand {
    RunSpeedTest,
    Refresh,
    QuitDaemon,
}

/// Shared state for the tray applet.
#[derive(Debug, Default)]
pub struct TrayState {
    pub connected: bool,
    pub web_enabled: bool,
    pub view: Option<PanelView>,
    /// One-off message shown under the speed test line
    pub notice: Option<String>,
}

impl TrayState {
    /// Informational lines shown at the top of the menu.
    pub fn lines(&self) -> Vec<String> {
        let view = match (&self.view, self.connected) {
            (Some(view), true) => view,
            (_, false) => return vec!["Daemon not running".to_string()],
            (None, true) => return vec!["Waiting for first sample...".to_string()],
        };

        let mut lines: Vec<String> = Metric::ALL
            .iter()
            .map(|metric| {
                let stale = if view.degraded.contains(metric) {
                    " (stale)"
                } else {
                    ""
                };
                format!(
                    "{}: {}{}",
                    metric.label(),
                    view.snapshot.display_value(*metric),
                    stale
                )
            })
            .collect();
        lines.push(view.speed_test_line());
        if let Some(notice) = &self.notice {
            lines.push(notice.clone());
        }
        lines
    }

    /// Whether "Run Speed Test" can be clicked.
    pub fn can_start_probe(&self) -> bool {
        self.connected
            && !self
                .view
                .as_ref()
                .is_some_and(|view| view.probe.is_running())
    }
}

/// Locks the shared state, recovering it if a holder panicked.
pub fn lock(state: &Mutex<TrayState>) -> MutexGuard<'_, TrayState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The Pulse Panel tray icon.
pub struct PulsePanelTray {
    state: Arc<Mutex<TrayState>>,
    command_tx: mpsc::UnboundedSender<TrayCommand>,
}

impl PulsePanelTray {
    /// Creates a new tray icon instance.
    pub fn new(
        state: Arc<Mutex<TrayState>>,
        command_tx: mpsc::UnboundedSender<TrayCommand>,
    ) -> Self {
        Self { state, command_tx }
    }

    fn send(&self, command: TrayCommand) {
        if let Err(e) = self.command_tx.send(command) {
            debug!("Failed to send tray command: {}", e);
        }
    }

    fn open_web_ui(&self) {
        if let Err(e) = open::that(WEB_UI_URL) {
            warn!("Failed to open web UI: {}", e);
        }
    }
}

impl Tray for PulsePanelTray {
    fn id(&self) -> String {
        "pulse-panel-applet".to_string()
    }

    fn title(&self) -> String {
        "Pulse Panel".to_string()
    }

    fn icon_name(&self) -> String {
        if lock(&self.state).connected {
            "utilities-system-monitor".to_string()
        } else {
            "network-offline".to_string()
        }
    }

    fn tool_tip(&self) -> ksni::ToolTip {
        let state = lock(&self.state);
        let description = match (&state.view, state.connected) {
            (Some(view), true) => format!(
                "CPU {} | Memory {}",
                view.snapshot.display_value(Metric::Cpu),
                view.snapshot.display_value(Metric::Memory)
            ),
            _ => "Daemon not running".to_string(),
        };
        ksni::ToolTip {
            title: "Pulse Panel".to_string(),
            description,
            ..Default::default()
        }
    }

    fn menu(&self) -> Vec<MenuItem<Self>> {
        let state = lock(&self.state);
        let lines = state.lines();
        let connected = state.connected;
        let can_start = state.can_start_probe();
        let web_enabled = state.web_enabled;
        drop(state);

        let mut items: Vec<MenuItem<Self>> = lines
            .into_iter()
            .map(|line| {
                StandardItem {
                    label: line,
                    enabled: false,
                    ..Default::default()
                }
                .into()
            })
            .collect();

        items.push(MenuItem::Separator);
        items.push(
            StandardItem {
                label: "Run Speed Test".to_string(),
                enabled: can_start,
                activate: Box::new(|tray: &mut Self| tray.send(TrayCommand::RunSpeedTest)),
                ..Default::default()
            }
            .into(),
        );
        items.push(
            StandardItem {
                label: "Refresh".to_string(),
                enabled: connected,
                activate: Box::new(|tray: &mut Self| tray.send(TrayCommand::Refresh)),
                ..Default::default()
            }
            .into(),
        );
        if web_enabled {
            items.push(
                StandardItem {
                    label: "Open Web UI".to_string(),
                    activate: Box::new(|tray: &mut Self| tray.open_web_ui()),
                    ..Default::default()
                }
                .into(),
            );
        }
        items.push(MenuItem::Separator);
        items.push(
            StandardItem {
                label: "Quit Daemon".to_string(),
                enabled: connected,
                activate: Box::new(|tray: &mut Self| tray.send(TrayCommand::QuitDaemon)),
                ..Default::default()
            }
            .into(),
        );
        items
    }
}

/// Creates the tray service and command receiver.
pub fn create_tray(
    state: Arc<Mutex<TrayState>>,
) -> (
    TrayService<PulsePanelTray>,
    mpsc::UnboundedReceiver<TrayCommand>,
) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let tray = PulsePanelTray::new(state, command_tx);
    (TrayService::new(tray), command_rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pulse_panel_core::{MetricSnapshot, ProbeState, SpeedTestResult};

    fn view(probe: ProbeState) -> PanelView {
        PanelView {
            sequence: 1,
            snapshot: MetricSnapshot {
                cpu_percent: 50.0,
                process_count: 77,
                ..Default::default()
            },
            probe,
            last_result: None,
            degraded: vec![Metric::Memory],
            published_at: Utc::now(),
        }
    }

    #[test]
    fn test_disconnected_shows_daemon_not_running() {
        let state = TrayState {
            view: Some(view(ProbeState::Idle)),
            ..Default::default()
        };
        assert_eq!(state.lines(), vec!["Daemon not running"]);
        assert!(!state.can_start_probe());
    }

    #[test]
    fn test_lines_list_metrics_and_probe() {
        let state = TrayState {
            connected: true,
            view: Some(view(ProbeState::Completed(SpeedTestResult::new(55.2, 12.1)))),
            notice: Some("A speed test is already running".to_string()),
            ..Default::default()
        };
        let lines = state.lines();
        assert_eq!(lines[0], "CPU Usage: 50.0%");
        assert_eq!(lines[1], "Memory Usage: 0.0% (stale)");
        assert_eq!(lines[5], "Running Processes: 77");
        assert!(lines[7].contains("55.20 Mbps down"));
        assert_eq!(lines[8], "A speed test is already running");
    }

    #[test]
    fn test_running_probe_disables_start() {
        let state = TrayState {
            connected: true,
            view: Some(view(ProbeState::Running)),
            ..Default::default()
        };
        assert!(!state.can_start_probe());

        let idle = TrayState {
            connected: true,
            view: Some(view(ProbeState::Idle)),
            ..Default::default()
        };
        assert!(idle.can_start_probe());
    }
}
