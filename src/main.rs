pub mod bridge;
pub mod config;
pub mod gpio;
pub mod mqtt;
#[cfg(test)]
mod testing;

use crate::bridge::{
    shutdown::wait_for_signal, Bridge, BridgeSettings, ConnectionManager, RetryPolicy,
    ShutdownReason,
};
use crate::config::{LogSettings, Settings};
use crate::gpio::{GpioDriver, PinMap, RppalGpio};
use crate::mqtt::MqttHandler;
use clap::Parser;
use color_eyre::{eyre::WrapErr, Result};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{error, info, Level};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::FmtSubscriber;

/// Switches Raspberry Pi GPIO lines from MQTT commands and reports their state
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// TOML configuration file
    config_file: Option<PathBuf>,

    /// Log at debug level and forward transport logs
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config_path = Settings::resolve_path(args.config_file)?;
    let mut settings = Settings::load(&config_path)
        .wrap_err_with(|| format!("Loading {}", config_path.display()))?;
    settings.log.verbose |= args.verbose;

    setup(&settings.log)?;
    info!("Starting {} with {}", config::APP_NAME, config_path.display());

    let pins = Arc::new(PinMap::new(settings.gpios.clone()));
    let gpio: Arc<dyn GpioDriver> = Arc::new(RppalGpio::new()?);
    let handler = MqttHandler::from_settings(&settings.mqtt, pins.len());
    let connection = ConnectionManager::new(
        Box::new(handler),
        settings.mqtt.status_topic.clone(),
        pins.clone(),
        RetryPolicy::default(),
    );

    let bridge = Bridge::create(connection, gpio, pins, BridgeSettings::from(&settings))
        .configure_pins()?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(reason) => {
                let _ = shutdown_tx.send(reason);
            }
            Err(e) => {
                error!("Failed to install signal handlers: {}", e);
                let _ = shutdown_tx.send(ShutdownReason::Fatal(e.to_string()));
            }
        }
    });

    let stopped = bridge.run_until_shutdown(shutdown_rx).await;
    info!(
        "Stopped with connection {:?}, exit code {}",
        stopped.connection_state(),
        stopped.exit_code()
    );
    std::process::exit(stopped.exit_code())
}

fn setup(log: &LogSettings) -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    setup_logging(log)
}

fn setup_logging(log: &LogSettings) -> Result<()> {
    let level = if log.verbose { Level::DEBUG } else { Level::INFO };
    let (writer, ansi) = match &log.logfile {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .wrap_err_with(|| format!("Opening log file {}", path.display()))?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stdout), true),
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(ansi)
        .with_writer(writer)
        .init();
    Ok(())
}
