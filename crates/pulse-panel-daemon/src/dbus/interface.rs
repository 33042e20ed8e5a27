//! D-Bus interface implementation using zbus.
//!
//! Provides the `org.pulsepanel.Daemon1` interface.

use pulse_panel_core::{CoordinatorHandle, Error, PanelView};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use zbus::{interface, Connection};

use crate::config::DbusBusType;

/// D-Bus interface implementation for the Pulse Panel daemon.
pub struct Daemon1Interface {
    handle: CoordinatorHandle,
    views: watch::Receiver<Option<PanelView>>,
    web_enabled: bool,
    tick_ms: u64,
    shutdown_tx: mpsc::Sender<()>,
}

impl Daemon1Interface {
    /// Creates a new D-Bus interface.
    pub fn new(
        handle: CoordinatorHandle,
        views: watch::Receiver<Option<PanelView>>,
        web_enabled: bool,
        tick_ms: u64,
        shutdown_tx: mpsc::Sender<()>,
    ) -> Self {
        Self {
            handle,
            views,
            web_enabled,
            tick_ms,
            shutdown_tx,
        }
    }
}

fn to_fdo(e: Error) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

fn view_json(view: &PanelView) -> zbus::fdo::Result<String> {
    serde_json::to_string(view).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

#[interface(name = "org.pulsepanel.Daemon1")]
impl Daemon1Interface {
    /// Starts a speed test. Returns false if one is already running.
    async fn start_speed_test(&self) -> zbus::fdo::Result<bool> {
        match self.handle.start_probe().await {
            Ok(()) => {
                debug!("D-Bus: StartSpeedTest");
                Ok(true)
            }
            Err(Error::ProbeAlreadyRunning) => Ok(false),
            Err(e) => Err(to_fdo(e)),
        }
    }

    /// Forces an immediate tick and returns the new view as JSON.
    async fn refresh(&self) -> zbus::fdo::Result<String> {
        let view = self.handle.refresh().await.map_err(to_fdo)?;
        debug!("D-Bus: Refresh (sequence {})", view.sequence);
        view_json(&view)
    }

    /// Returns the most recently published view as JSON.
    ///
    /// Before the first tick this forces one so callers never see an empty panel.
    async fn get_view(&self) -> zbus::fdo::Result<String> {
        let latest = self.views.borrow().clone();
        match latest {
            Some(view) => view_json(&view),
            None => {
                let view = self.handle.refresh().await.map_err(to_fdo)?;
                view_json(&view)
            }
        }
    }

    /// Shuts down the daemon.
    async fn quit(&self) -> zbus::fdo::Result<()> {
        info!("D-Bus: Quit requested");
        self.shutdown_tx
            .send(())
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        Ok(())
    }

    // Properties

    /// Current speed test state ("idle", "running", "completed", "failed").
    #[zbus(property(emits_changed_signal = "false"))]
    fn probe_state(&self) -> String {
        self.handle.probe_state().name().to_string()
    }

    /// Whether the web UI is being served.
    #[zbus(property)]
    fn web_enabled(&self) -> bool {
        self.web_enabled
    }

    /// Tick interval in milliseconds.
    #[zbus(property)]
    fn tick_interval(&self) -> u64 {
        self.tick_ms
    }
}

/// Connects to the appropriate D-Bus bus based on configuration.
async fn connect_to_bus(bus_type: DbusBusType) -> anyhow::Result<(Connection, &'static str)> {
    match bus_type {
        DbusBusType::Session => {
            let conn = Connection::session()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to connect to session bus: {}", e))?;
            Ok((conn, "session"))
        }
        DbusBusType::System => {
            let conn = Connection::system()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to connect to system bus: {}", e))?;
            Ok((conn, "system"))
        }
        DbusBusType::Auto => match Connection::session().await {
            Ok(conn) => Ok((conn, "session")),
            Err(session_err) => {
                warn!(
                    "Session bus unavailable ({}), trying system bus",
                    session_err
                );
                let conn = Connection::system().await.map_err(|system_err| {
                    anyhow::anyhow!(
                        "Failed to connect to any D-Bus: session={}, system={}",
                        session_err,
                        system_err
                    )
                })?;
                Ok((conn, "system"))
            }
        },
    }
}

/// Registers the daemon object and claims the well-known name.
pub async fn run_dbus_server(
    interface: Daemon1Interface,
    bus_type: DbusBusType,
) -> anyhow::Result<Connection> {
    let (connection, bus_name) = connect_to_bus(bus_type).await?;

    connection
        .object_server()
        .at("/org/pulsepanel/Daemon", interface)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to register object: {}", e))?;

    connection
        .request_name("org.pulsepanel.Daemon")
        .await
        .map_err(|e| anyhow::anyhow!("Failed to request bus name: {}", e))?;

    info!(
        "D-Bus service registered at org.pulsepanel.Daemon on {} bus",
        bus_name
    );
    Ok(connection)
}
