//! Modbus gateway daemon.
//!
//! Exit status: `0` after a signal, `1` on startup failure, `2` when the
//! device stayed unreachable for the whole reconnect budget.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use modgate::{DEFAULT_DEVICE_URL, Gateway, GatewayConfig};
use modgate_common::LoggingConfig;
use modgate_controller::{ModbusTransport, PollExit};
use tracing::{error, info};

/// Modbus gateway with HTTP, Prometheus and Telegram front-ends.
#[derive(Parser, Debug)]
#[command(name = "modgate")]
#[command(about = "Polls a Modbus device and serves its registers over HTTP and Telegram")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long, default_value = "modgate.json5")]
    config: PathBuf,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Device URL used when the config file sets none.
    #[arg(long, default_value = DEFAULT_DEVICE_URL)]
    device_url: String,

    /// Reconnect attempts before giving up (overrides config).
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    match run(args) {
        Ok(PollExit::Shutdown) => ExitCode::SUCCESS,
        Ok(PollExit::AttemptsExhausted { .. }) => ExitCode::from(2),
        Ok(PollExit::AlreadyRunning) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<PollExit> {
    let mut config = GatewayConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    if let Some(listen) = args.listen {
        config.http.listen = listen;
    }
    if let Some(max_attempts) = args.max_attempts {
        config.device.max_attempts = max_attempts;
    }
    config.validate()?;

    let log_config = LoggingConfig {
        level: args
            .log_level
            .clone()
            .unwrap_or_else(|| config.logging.level.clone()),
        format: config.logging.format,
    };
    modgate_common::init_tracing(&log_config)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!("Starting modgate");
    info!("Loaded configuration from {:?}", args.config);

    let settings = config.modbus_settings(&args.device_url)?;
    info!(endpoint = ?settings.endpoint, unit_id = settings.unit_id, "Connecting to device");

    let transport = ModbusTransport::new(settings)?;
    let gateway = Gateway::new(config, transport)?;
    let controller = gateway.controller().clone();

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let poller = gateway.spawn_poller()?;

    let served = runtime.block_on(gateway.serve(shutdown_signal()));
    drop(runtime);

    // The engine is already stopping if serving failed.
    controller.close();
    let exit = poller
        .join()
        .map_err(|_| anyhow::anyhow!("Poll thread panicked"))?;
    served?;

    info!(
        requests = controller.requests(),
        errors = controller.errors(),
        "modgate stopped"
    );
    Ok(exit)
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
