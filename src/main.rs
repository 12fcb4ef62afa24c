//! Stadia GW - Rust implementation
//!
//! Exposes a Google Stadia controller as a virtual Xbox 360 controller.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stadia_gw::commands::CommandRunner;
use stadia_gw::emulation::{ConsoleSink, EmulationSink};
use stadia_gw::hid::{HidBackend, HidapiBackend};
use stadia_gw::supervisor::{SessionCell, Supervisor};
use stadia_gw::{sniffer, Args, Bridge, VibrationCommand};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level)?;
    args.validate()?;

    info!("Starting Stadia GW v{}...", env!("CARGO_PKG_VERSION"));

    let backend: Arc<dyn HidBackend> =
        Arc::new(HidapiBackend::new().context("Failed to initialize hidapi")?);

    // Handle list devices
    if args.list_devices {
        sniffer::list_devices_formatted(backend.as_ref(), args.matcher())?;
        return Ok(());
    }

    // Handle sniffer mode
    if args.sniff {
        sniffer::run_sniffer(backend, args.supervisor_options(), args.json, shutdown_signal()).await?;
        return Ok(());
    }

    if args.custom_identity() {
        info!(
            "Looking for controller {:04X}:{:04X}",
            args.vendor_id, args.product_id
        );
    }

    run_app(args, backend, shutdown_signal()).await?;

    info!("Stadia GW shutdown complete");
    Ok(())
}

async fn run_app(
    args: Args,
    backend: Arc<dyn HidBackend>,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<()> {
    let (vibration_tx, vibration_rx) = mpsc::unbounded_channel::<VibrationCommand>();
    let sink = create_sink(args.dry_run, vibration_tx)?;

    let commands = args.button_commands();
    if !commands.is_empty() {
        info!("Assistant/Capture commands enabled");
    }
    let runner = CommandRunner::new(args.shell.clone(), commands);

    let cell = SessionCell::new();
    let supervisor = Supervisor::new(backend, cell.clone(), args.supervisor_options()).spawn();

    let result = Bridge::new(cell.clone(), sink, runner, vibration_rx)
        .run(shutdown)
        .await;

    // Cleanup
    info!("Shutting down...");
    supervisor.abort();
    if let Some(session) = cell.current() {
        cell.clear_session(&session);
    }

    result
}

fn create_sink(
    dry_run: bool,
    vibration_tx: mpsc::UnboundedSender<VibrationCommand>,
) -> Result<Box<dyn EmulationSink>> {
    #[cfg(windows)]
    {
        if !dry_run {
            let sink = stadia_gw::emulation::VigemSink::connect(vibration_tx)
                .context("Failed to create virtual Xbox 360 controller (is ViGEmBus installed?)")?;
            return Ok(Box::new(sink));
        }
    }

    #[cfg(not(windows))]
    {
        if !dry_run {
            tracing::warn!("ViGEmBus is only available on Windows, logging controller states instead");
        }
    }

    // The console sink never asks for rumble
    drop(vibration_tx);
    Ok(Box::new(ConsoleSink::new("console")))
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    info!("Shutdown signal received");
}
