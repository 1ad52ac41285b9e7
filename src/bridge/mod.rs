//! Bridge between the message bus and the GPIO lines
//!
//! # State Machine
//!
//! ```text
//! Initializing ──configure_pins──► Running ──run_until_shutdown──► Stopped
//! ```
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────── owning task ─────────────┐
//! Bus events ────►│ ConnectionManager ─► CommandRouter ──┼──► GPIO write
//!                 │        ▲                             │
//! PollLoop task ──┼─ StatusUpdate (mpsc) ─► publish      │
//!                 └──────────────────────────────────────┘
//! ```
//!
//! The owning task is the only one touching the bus handle, so connects,
//! publishes and subscribes can never interleave. The poll loop only reads
//! pins and waits on the connection state watch.

pub mod connection;
pub mod poll;
pub mod router;
pub mod shutdown;

pub use connection::{ConnectionError, ConnectionManager, ConnectionState, RetryPolicy};
pub use poll::PollLoop;
pub use router::CommandRouter;
pub use shutdown::{ShutdownReason, ShutdownReport};

use crate::config::Settings;
use crate::gpio::{GpioDriver, GpioError, PinId, PinLevel, PinMap};
use crate::mqtt::{BusEvent, StatusUpdate};
use statum::{machine, state};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Level};

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Failed to configure pin {pin} for {topic}: {source}")]
    PinSetup {
        topic: String,
        pin: PinId,
        #[source]
        source: GpioError,
    },
}

#[derive(Clone, Debug)]
pub struct BridgeSettings {
    pub poll_interval: Duration,
    /// Forward transport log events
    pub verbose: bool,
    pub update_capacity: usize,
}

impl From<&Settings> for BridgeSettings {
    fn from(settings: &Settings) -> Self {
        Self {
            poll_interval: settings.mqtt.poll_interval(),
            verbose: settings.log.verbose,
            update_capacity: settings.gpios.len().max(1) * 2,
        }
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum BridgeState {
    Initializing,
    Running,
    Stopped,
}

#[machine]
pub struct Bridge<S: BridgeState> {
    connection: ConnectionManager,
    gpio: Arc<dyn GpioDriver>,
    pins: Arc<PinMap>,
    settings: BridgeSettings,
    report: Option<ShutdownReport>,
}

impl<S: BridgeState> Bridge<S> {
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }
}

impl Bridge<Initializing> {
    pub fn create(
        connection: ConnectionManager,
        gpio: Arc<dyn GpioDriver>,
        pins: Arc<PinMap>,
        settings: BridgeSettings,
    ) -> Self {
        debug!("GPIOs        : {}", pins.len());
        Self::new(connection, gpio, pins, settings, None)
    }

    /// Puts every mapped pin into output mode at the idle level
    pub fn configure_pins(self) -> Result<Bridge<Running>, BridgeError> {
        for mapping in self.pins.iter() {
            debug!("  {} : {}", mapping.topic, mapping.pin);
            self.gpio
                .configure(mapping.pin, PinLevel::Idle)
                .map_err(|source| BridgeError::PinSetup {
                    topic: mapping.topic.clone(),
                    pin: mapping.pin,
                    source,
                })?;
        }
        info!("Configured {} pins", self.pins.len());
        Ok(self.transition())
    }
}

fn received(reason: Result<ShutdownReason, oneshot::error::RecvError>) -> ShutdownReason {
    reason.unwrap_or_else(|_| ShutdownReason::Fatal("shutdown channel closed".into()))
}

/// Level a transport log line is forwarded at. Only verbose mode forwards,
/// and then every line, with TRACE raised to DEBUG so verbose output shows it.
fn transport_log_level(verbose: bool, level: Level) -> Option<Level> {
    if !verbose {
        return None;
    }
    Some(if level == Level::TRACE { Level::DEBUG } else { level })
}

fn connection_failed(e: ConnectionError) -> ShutdownReason {
    match e {
        ConnectionError::Rejected(code) => ShutdownReason::Rejected(code),
        ConnectionError::Bus(e) => ShutdownReason::Fatal(e.to_string()),
    }
}

impl Bridge<Running> {
    /// Connects and serves commands and polls until a shutdown is requested
    /// or the connection fails for good, then runs the shutdown sequence.
    pub async fn run_until_shutdown(
        mut self,
        mut shutdown_rx: oneshot::Receiver<ShutdownReason>,
    ) -> Bridge<Stopped> {
        let reason = self.serve(&mut shutdown_rx).await;
        info!("Shutting down: {}", reason);

        let report =
            shutdown::run_shutdown(&mut self.connection, self.gpio.as_ref(), reason).await;
        if !report.is_clean() {
            warn!("Shutdown incomplete: {:?}", report);
        }
        self.report = Some(report);
        self.transition()
    }

    async fn serve(
        &mut self,
        shutdown_rx: &mut oneshot::Receiver<ShutdownReason>,
    ) -> ShutdownReason {
        tokio::select! {
            biased;
            reason = &mut *shutdown_rx => return received(reason),
            result = self.connection.establish() => {
                if let Err(e) = result {
                    return connection_failed(e);
                }
            }
        }

        let router = CommandRouter::new(self.pins.clone(), self.gpio.clone());
        let (updates_tx, mut updates_rx) = mpsc::channel(self.settings.update_capacity);
        let cancel = CancellationToken::new();
        let poll_loop = PollLoop::new(
            self.pins.clone(),
            self.gpio.clone(),
            self.settings.poll_interval,
        );
        tokio::spawn(poll_loop.run(
            updates_tx,
            self.connection.subscribe_state(),
            cancel.clone(),
        ));
        let _stop_polling = cancel.drop_guard();

        loop {
            tokio::select! {
                biased;
                reason = &mut *shutdown_rx => return received(reason),
                update = updates_rx.recv() => match update {
                    Some(update) => self.publish_status(&update).await,
                    None => return ShutdownReason::Fatal("poll loop stopped".into()),
                },
                event = self.connection.next_event() => {
                    if let Some(reason) = self.handle_event(event, &router, shutdown_rx).await {
                        return reason;
                    }
                }
            }
        }
    }

    async fn handle_event(
        &mut self,
        event: BusEvent,
        router: &CommandRouter,
        shutdown_rx: &mut oneshot::Receiver<ShutdownReason>,
    ) -> Option<ShutdownReason> {
        match event {
            BusEvent::Message(cmd) => {
                if let Some(ack) = router.dispatch(&cmd) {
                    self.publish_status(&ack).await;
                }
            }
            BusEvent::Disconnected(disconnect) => {
                tokio::select! {
                    biased;
                    reason = &mut *shutdown_rx => return Some(received(reason)),
                    result = self.connection.on_disconnect(disconnect) => {
                        if let Err(e) = result {
                            return Some(connection_failed(e));
                        }
                    }
                }
            }
            BusEvent::Connected(code) => debug!("on_connect return_code: {}", code),
            BusEvent::Published(id) => debug!("MID {} published.", id),
            BusEvent::Log { level, text } => {
                match transport_log_level(self.settings.verbose, level) {
                    Some(level) if level == Level::ERROR => error!("{}", text),
                    Some(level) if level == Level::WARN => warn!("{}", text),
                    Some(level) if level == Level::INFO => info!("{}", text),
                    Some(_) => debug!("{}", text),
                    None => {}
                }
            }
        }
        None
    }

    async fn publish_status(&mut self, update: &StatusUpdate) {
        if self.connection.state() != ConnectionState::Connected {
            debug!("Not connected, dropping {} status", update.topic);
            return;
        }
        if let Err(e) = self.connection.publish_status(update).await {
            error!("Failed to publish {}: {}", update.status_topic(), e);
        }
    }
}

impl Bridge<Stopped> {
    pub fn report(&self) -> Option<&ShutdownReport> {
        self.report.as_ref()
    }

    pub fn exit_code(&self) -> i32 {
        self.report.as_ref().map_or(1, ShutdownReport::exit_code)
    }
}
