//! Pulse Panel Daemon
//!
//! Samples host metrics on a fixed tick, runs speed tests on demand, and
//! serves the results over D-Bus and an HTMX web UI.

mod config;
mod dbus;
mod sensors;
mod speedtest;
mod web;

use anyhow::{Context, Result};
use pulse_panel_core::{Coordinator, PanelView, Publisher};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use sensors::{HostSampler, SystemInfo};
use speedtest::HttpProbe;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config = load_config()?;

    // Build the coordinator and start ticking
    let sampler = HostSampler::new(&config.sensors);
    let probe = Arc::new(HttpProbe::new(&config.speedtest).context("Invalid speed test settings")?);
    let (views_tx, views_rx) = watch::channel::<Option<PanelView>>(None);
    let publisher: Arc<dyn Publisher> = Arc::new(views_tx);
    let coordinator = Coordinator::new(sampler, probe, publisher);
    let (handle, mut coordinator_task) = coordinator.spawn(config.tick_interval());

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    // Keep a clone of shutdown_tx to prevent the channel from closing if D-Bus fails
    let _shutdown_tx_keepalive = shutdown_tx.clone();

    // Start D-Bus service
    let interface = dbus::Daemon1Interface::new(
        handle.clone(),
        views_rx.clone(),
        config.web.enable,
        config.tick,
        shutdown_tx,
    );
    let _dbus_connection = match dbus::run_dbus_server(interface, config.dbus.bus).await {
        Ok(conn) => {
            info!("D-Bus service started");
            Some(conn)
        }
        Err(e) => {
            warn!(
                "Failed to start D-Bus service: {}. Continuing without D-Bus.",
                e
            );
            None
        }
    };

    // Optionally start web server
    if config.web.enable {
        let system = SystemInfo::new();
        let state = web::WebState::new(
            handle.clone(),
            views_rx,
            system.hostname(),
            system.platform(),
        );
        let app = web::create_router(Arc::new(state));
        let addr: SocketAddr = config
            .web
            .listen
            .parse()
            .context("Invalid listen address")?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        info!("Web server listening on http://{}", addr);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Web server stopped: {}", e);
            }
        });
    } else {
        info!("Web server disabled");
    }

    // Setup Unix signal handlers
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())?;

    let coordinator_alive = tokio::select! {
        _ = shutdown_rx.recv() => {
            info!("Shutdown requested via D-Bus");
            true
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down");
            true
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down");
            true
        }
        result = &mut coordinator_task => {
            match result {
                Ok(()) => error!("Coordinator stopped without a quit request"),
                Err(e) => error!("Coordinator task failed: {}", e),
            }
            false
        }
    };

    if coordinator_alive {
        if handle.quit().await.is_err() {
            warn!("Coordinator already stopped");
        }
        if let Err(e) = coordinator_task.await {
            error!("Coordinator task failed: {}", e);
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Loads the configuration named on the command line.
///
/// An explicit path must exist. The default path may be absent, in which
/// case built-in defaults apply.
fn load_config() -> Result<Config> {
    match std::env::args().nth(1) {
        Some(path) => {
            let config = Config::load(&path)
                .with_context(|| format!("Failed to load configuration from {}", path))?;
            info!("Loaded configuration from: {}", path);
            Ok(config)
        }
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            let config =
                Config::load(DEFAULT_CONFIG_PATH).context("Failed to load configuration")?;
            info!("Loaded configuration from: {}", DEFAULT_CONFIG_PATH);
            Ok(config)
        }
        None => {
            info!("No configuration file found, using defaults");
            Ok(Config::default())
        }
    }
}
