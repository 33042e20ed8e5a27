//! Pulse Panel Control Tool
//!
//! CLI for reading and driving the Pulse Panel daemon via D-Bus.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pulse_panel_client::{BusType, DaemonClient};
use pulse_panel_core::{Metric, PanelView, ProbeState};
use std::time::{Duration, Instant};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum CliBusType {
    /// Try session bus first, fall back to system bus
    #[default]
    Auto,
    /// Use session bus (for user services)
    Session,
    /// Use system bus (for system services)
    System,
}

impl From<CliBusType> for BusType {
    fn from(bus: CliBusType) -> Self {
        match bus {
            CliBusType::Auto => BusType::Auto,
            CliBusType::Session => BusType::Session,
            CliBusType::System => BusType::System,
        }
    }
}

#[derive(Parser)]
#[command(name = "pulsepanelctl")]
#[command(about = "Control tool for the Pulse Panel daemon")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// D-Bus bus type to use
    #[arg(long, default_value = "auto", value_enum)]
    bus: CliBusType,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the latest metrics and speed test result
    Status {
        /// Print the raw view as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start a speed test
    Speedtest {
        /// Wait for the test to finish and print the result
        #[arg(long)]
        wait: bool,

        /// Give up waiting after this many seconds
        #[arg(long, default_value = "120")]
        timeout: u64,
    },
    /// Sample the host immediately and show the result
    Refresh,
    /// Request daemon shutdown
    Quit,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Connect to daemon
    let client = DaemonClient::connect_with_bus(cli.bus.into())
        .await
        .context("Failed to connect to daemon. Is pulsepaneld running?")?;

    match cli.command {
        Commands::Status { json } => {
            let view = client.get_view().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                print!("{}", format_view(&view));
            }
        }
        Commands::Speedtest { wait, timeout } => {
            handle_speedtest(&client, wait, Duration::from_secs(timeout)).await?
        }
        Commands::Refresh => {
            let view = client.refresh().await?;
            print!("{}", format_view(&view));
        }
        Commands::Quit => {
            client.quit().await?;
            println!("Shutdown request sent to daemon");
        }
    }

    Ok(())
}

async fn handle_speedtest(client: &DaemonClient, wait: bool, timeout: Duration) -> Result<()> {
    if client.start_speed_test().await? {
        println!("Speed test started");
    } else {
        println!("A speed test is already running");
    }
    if !wait {
        return Ok(());
    }

    let poll = Duration::from_millis(client.tick_interval().await.unwrap_or(1000).max(100));
    let started = Instant::now();
    loop {
        tokio::time::sleep(poll).await;
        // The view lags the mailbox by up to one tick, so ask for the state first.
        let state = client.probe_state().await?;
        if state != ProbeState::Running.name() {
            let view = client.get_view().await?;
            if let Some(line) = finished_line(&state, &view) {
                println!("{}", line);
                return Ok(());
            }
        }
        debug!("Speed test still running after {:?}", started.elapsed());
        if started.elapsed() >= timeout {
            anyhow::bail!("Speed test did not finish within {}s", timeout.as_secs());
        }
    }
}

/// Returns the line to print once both the daemon state and the published view
/// show the test has finished.
fn finished_line(state: &str, view: &PanelView) -> Option<String> {
    if state == ProbeState::Running.name() || view.probe.is_running() {
        return None;
    }
    Some(view.speed_test_line())
}

/// Renders a view as aligned "label: value" lines.
fn format_view(view: &PanelView) -> String {
    let width = Metric::ALL
        .iter()
        .map(|m| m.label().len())
        .max()
        .unwrap_or(0);
    let mut out = String::new();
    for metric in Metric::ALL {
        let marker = if view.degraded.contains(&metric) {
            " (stale)"
        } else {
            ""
        };
        out.push_str(&format!(
            "{:<width$}  {}{}\n",
            format!("{}:", metric.label()),
            view.snapshot.display_value(metric),
            marker,
            width = width + 1
        ));
    }
    out.push_str(&view.speed_test_line());
    out.push('\n');
    out
}
