//! Orderly shutdown
//!
//! Every exit path, a signal as well as a refused connection, ends here so the
//! offline announcement is always attempted. Each step runs even when the one
//! before it failed.

use super::connection::ConnectionManager;
use crate::gpio::GpioDriver;
use crate::mqtt::ConnectCode;
use std::fmt;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal { name: &'static str, number: i32 },
    Rejected(ConnectCode),
    Fatal(String),
}

impl ShutdownReason {
    pub const SIGINT: ShutdownReason = ShutdownReason::Signal {
        name: "SIGINT",
        number: 2,
    };
    pub const SIGTERM: ShutdownReason = ShutdownReason::Signal {
        name: "SIGTERM",
        number: 15,
    };

    /// Process exit code; a signal exits with its own number
    pub fn exit_code(&self) -> i32 {
        match self {
            ShutdownReason::Signal { number, .. } => *number,
            ShutdownReason::Rejected(_) | ShutdownReason::Fatal(_) => 1,
        }
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ShutdownReason::Signal { name, number } => write!(f, "signal {} ({})", name, number),
            ShutdownReason::Rejected(code) => write!(f, "connection {}", code),
            ShutdownReason::Fatal(reason) => write!(f, "fatal error: {}", reason),
        }
    }
}

/// Outcome of each shutdown step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub reason: ShutdownReason,
    pub announced: bool,
    pub disconnected: bool,
    pub released: bool,
}

impl ShutdownReport {
    pub fn exit_code(&self) -> i32 {
        self.reason.exit_code()
    }

    pub fn is_clean(&self) -> bool {
        self.announced && self.disconnected && self.released
    }
}

pub async fn run_shutdown(
    connection: &mut ConnectionManager,
    gpio: &dyn GpioDriver,
    reason: ShutdownReason,
) -> ShutdownReport {
    info!("Disconnecting from broker");
    let announced = match connection.announce_offline().await {
        Ok(()) => true,
        Err(e) => {
            error!("Failed to announce offline status: {}", e);
            false
        }
    };

    let disconnected = connection.release().await.is_ok();

    let released = match gpio.release_all() {
        Ok(()) => true,
        Err(e) => {
            error!("Failed to release GPIO pins: {}", e);
            false
        }
    };

    info!("Exiting on {}", reason);
    ShutdownReport {
        reason,
        announced,
        disconnected,
        released,
    }
}

/// Resolves on the first SIGTERM or SIGINT
pub async fn wait_for_signal() -> std::io::Result<ShutdownReason> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let reason = tokio::select! {
        _ = sigterm.recv() => ShutdownReason::SIGTERM,
        _ = sigint.recv() => ShutdownReason::SIGINT,
    };
    Ok(reason)
}
