//! Pulse Panel System Tray Applet
//!
//! Shows live host metrics and the speed test result in the system tray.
//! Works with both GNOME (via AppIndicator extension) and KDE (native SNI).

mod tray;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use pulse_panel_client::DaemonClient;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use tray::{create_tray, lock, TrayCommand, TrayState};

/// How often the applet pulls a fresh view from the daemon.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Reconnection attempts happen at most this often while the daemon is away.
const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("pulse_panel_applet=info".parse()?),
        )
        .init();

    info!("Pulse Panel Applet starting...");

    // Shared state
    let state = Arc::new(Mutex::new(TrayState::default()));

    // Create tray service and command channel
    let (service, mut command_rx) = create_tray(state.clone());
    let tray_handle = service.handle();

    let worker_state = state.clone();
    tokio::spawn(async move {
        let mut client: Option<DaemonClient> = None;
        let mut last_attempt: Option<tokio::time::Instant> = None;
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            // Try to connect if not connected
            let due = last_attempt.map_or(true, |t| t.elapsed() >= RECONNECT_INTERVAL);
            if client.is_none() && due {
                last_attempt = Some(tokio::time::Instant::now());
                match DaemonClient::connect().await {
                    Ok(c) => {
                        info!("Connected to daemon via D-Bus");
                        let web_enabled = c.is_web_enabled().await.unwrap_or(false);
                        let mut s = lock(&worker_state);
                        s.connected = true;
                        s.web_enabled = web_enabled;
                        drop(s);
                        client = Some(c);
                    }
                    Err(e) => {
                        debug!("Failed to connect to daemon: {}. Retrying...", e);
                    }
                }
            }

            tokio::select! {
                cmd = command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        // Channel closed, exit
                        break;
                    };
                    if let Some(ref c) = client {
                        if let Err(e) = run_command(c, cmd, &worker_state).await {
                            error!("Daemon command failed: {}", e);
                            client = None;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if let Some(ref c) = client {
                        match c.get_view().await {
                            Ok(view) => {
                                let mut s = lock(&worker_state);
                                if !view.probe.is_running() && s.view.as_ref().is_some_and(|v| v.probe.is_running()) {
                                    s.notice = None;
                                }
                                s.view = Some(view);
                            }
                            Err(e) => {
                                warn!("Lost connection to daemon: {}", e);
                                client = None;
                            }
                        }
                    }
                }
            }

            if client.is_none() {
                let mut s = lock(&worker_state);
                s.connected = false;
                s.notice = None;
            }
            tray_handle.update(|_| {});
        }
    });

    // Run tray in a separate thread since ksni uses its own event loop
    let tray_thread = std::thread::spawn(move || -> Result<()> {
        service.run().context("Tray service failed")?;
        Ok(())
    });

    // Wait for tray thread to finish (it shouldn't unless there's an error)
    match tray_thread.join() {
        Ok(Ok(())) => info!("Tray service stopped"),
        Ok(Err(e)) => error!("Tray service error: {}", e),
        Err(e) => error!("Tray thread panicked: {:?}", e),
    }

    Ok(())
}

/// Forwards one menu action to the daemon.
async fn run_command(
    client: &DaemonClient,
    command: TrayCommand,
    state: &Mutex<TrayState>,
) -> Result<()> {
    match command {
        TrayCommand::RunSpeedTest => {
            let started = client.start_speed_test().await?;
            let mut s = lock(state);
            s.notice = if started {
                debug!("Speed test started");
                None
            } else {
                Some("A speed test is already running".to_string())
            };
        }
        TrayCommand::Refresh => {
            let view = client.refresh().await?;
            lock(state).view = Some(view);
        }
        TrayCommand::QuitDaemon => {
            client.quit().await?;
            info!("Daemon quit request sent");
        }
    }
    Ok(())
}
