//! D-Bus client library for communicating with the Pulse Panel daemon.
//!
//! This crate provides a unified client for both CLI and applet use cases.

use anyhow::{Context, Result};
use pulse_panel_core::PanelView;
use tracing::debug;
use zbus::names::BusName;
use zbus::{proxy, Connection};

/// Well-known bus name claimed by the daemon.
pub const SERVICE_NAME: &str = "org.pulsepanel.Daemon";

/// D-Bus bus type selection.
#[derive(Debug, Clone, Copy, Default)]
pub enum BusType {
    /// Session bus (user session).
    Session,
    /// System bus (system-wide).
    System,
    /// Try session first, fall back to system.
    #[default]
    Auto,
}

/// D-Bus proxy for the Pulse Panel daemon.
#[proxy(
    interface = "org.pulsepanel.Daemon1",
    default_service = "org.pulsepanel.Daemon",
    default_path = "/org/pulsepanel/Daemon"
)]
trait Daemon1 {
    /// Starts a speed test. Returns false if one is already running.
    fn start_speed_test(&self) -> zbus::Result<bool>;

    /// Forces an immediate tick and returns the view as JSON.
    fn refresh(&self) -> zbus::Result<String>;

    /// Returns the latest view as JSON.
    fn get_view(&self) -> zbus::Result<String>;

    /// Shuts down the daemon.
    fn quit(&self) -> zbus::Result<()>;

    /// Current speed test state name. Read from the daemon on every call.
    #[zbus(property(emits_changed_signal = "false"))]
    fn probe_state(&self) -> zbus::Result<String>;

    /// Whether the web UI is enabled.
    #[zbus(property)]
    fn web_enabled(&self) -> zbus::Result<bool>;

    /// Tick interval in milliseconds.
    #[zbus(property)]
    fn tick_interval(&self) -> zbus::Result<u64>;
}

/// Decodes a view returned by `Refresh` or `GetView`.
pub fn parse_view(json: &str) -> Result<PanelView> {
    serde_json::from_str(json).context("Daemon returned a malformed view")
}

/// D-Bus client wrapper for the daemon.
pub struct DaemonClient {
    proxy: Daemon1Proxy<'static>,
}

impl DaemonClient {
    /// Attempts to connect to the daemon via D-Bus with auto bus detection.
    ///
    /// Tries session bus first, falls back to system bus.
    pub async fn connect() -> Result<Self> {
        Self::connect_with_bus(BusType::Auto).await
    }

    /// Attempts to connect to the daemon via D-Bus with specified bus type.
    pub async fn connect_with_bus(bus_type: BusType) -> Result<Self> {
        let connection = match bus_type {
            BusType::Session => {
                debug!("Connecting to session bus");
                Connection::session()
                    .await
                    .context("Failed to connect to session bus")?
            }
            BusType::System => {
                debug!("Connecting to system bus");
                Connection::system()
                    .await
                    .context("Failed to connect to system bus")?
            }
            BusType::Auto => match Connection::session().await {
                Ok(conn) if Self::service_exists(&conn).await => {
                    debug!("Found daemon on session bus");
                    conn
                }
                Ok(_) => {
                    debug!("Daemon not on session bus, trying system bus");
                    let sys_conn = Connection::system()
                        .await
                        .context("Failed to connect to system bus")?;
                    if !Self::service_exists(&sys_conn).await {
                        anyhow::bail!(
                            "Daemon service not found on session or system bus. Is pulsepaneld running?"
                        );
                    }
                    debug!("Found daemon on system bus");
                    sys_conn
                }
                Err(_) => {
                    debug!("Session bus unavailable, trying system bus");
                    Connection::system()
                        .await
                        .context("Failed to connect to any D-Bus")?
                }
            },
        };

        let proxy = Daemon1Proxy::new(&connection)
            .await
            .context("Failed to create D-Bus proxy")?;

        Ok(Self { proxy })
    }

    /// Checks if the daemon service exists on the given connection.
    async fn service_exists(conn: &Connection) -> bool {
        use zbus::fdo::DBusProxy;
        let Ok(name) = BusName::try_from(SERVICE_NAME) else {
            return false;
        };
        match DBusProxy::new(conn).await {
            Ok(dbus_proxy) => dbus_proxy.name_has_owner(name).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Starts a speed test. Returns false if one was already running.
    pub async fn start_speed_test(&self) -> Result<bool> {
        self.proxy
            .start_speed_test()
            .await
            .context("Failed to start speed test via D-Bus")
    }

    /// Forces an immediate tick and returns the new view.
    pub async fn refresh(&self) -> Result<PanelView> {
        let json = self
            .proxy
            .refresh()
            .await
            .context("Failed to refresh via D-Bus")?;
        parse_view(&json)
    }

    /// Gets the latest published view.
    pub async fn get_view(&self) -> Result<PanelView> {
        let json = self
            .proxy
            .get_view()
            .await
            .context("Failed to get view via D-Bus")?;
        parse_view(&json)
    }

    /// Shuts down the daemon.
    pub async fn quit(&self) -> Result<()> {
        self.proxy
            .quit()
            .await
            .context("Failed to quit daemon via D-Bus")
    }

    /// Gets the speed test state name.
    pub async fn probe_state(&self) -> Result<String> {
        self.proxy
            .probe_state()
            .await
            .context("Failed to get speed test state via D-Bus")
    }

    /// Checks if the web UI is enabled.
    pub async fn is_web_enabled(&self) -> Result<bool> {
        self.proxy
            .web_enabled()
            .await
            .context("Failed to get web enabled status via D-Bus")
    }

    /// Gets the tick interval in milliseconds.
    pub async fn tick_interval(&self) -> Result<u64> {
        self.proxy
            .tick_interval()
            .await
            .context("Failed to get tick interval via D-Bus")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_view_rejects_garbage() {
        assert!(parse_view("not json").is_err());
    }

    #[test]
    fn test_service_name_is_valid() {
        assert!(BusName::try_from(SERVICE_NAME).is_ok());
    }
}
