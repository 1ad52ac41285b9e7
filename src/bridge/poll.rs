//! Periodic state publication
//!
//! Every configured pin is read in turn and its state handed to the owning
//! task as a [`StatusUpdate`]. Between two pins the loop sleeps
//! `poll_interval / pin_count`, so one sweep takes about `poll_interval`
//! no matter how many pins there are. A pin that fails to read still uses up
//! its slot, which keeps the pacing intact.

use super::connection::ConnectionState;
use crate::gpio::{GpioDriver, PinLevel, PinMap, PinMapping};
use crate::mqtt::StatusUpdate;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct PollLoop {
    pins: Arc<PinMap>,
    gpio: Arc<dyn GpioDriver>,
    pace: Duration,
}

/// Sleep between two successive pin reads
pub fn pace_for(interval: Duration, pin_count: usize) -> Duration {
    match u32::try_from(pin_count) {
        Ok(0) => interval,
        Ok(count) => interval / count,
        Err(_) => interval / u32::MAX,
    }
}

impl PollLoop {
    pub fn new(pins: Arc<PinMap>, gpio: Arc<dyn GpioDriver>, interval: Duration) -> Self {
        let pace = pace_for(interval, pins.len());
        Self { pins, gpio, pace }
    }

    /// Reads one pin. Read failures are logged and yield nothing.
    pub fn read_status(&self, mapping: &PinMapping) -> Option<StatusUpdate> {
        debug!("Querying {} : {}", mapping.topic, mapping.pin);
        match self.gpio.read(mapping.pin) {
            Ok(level) => {
                debug!("GPIO {} : {:?}", mapping.pin, level);
                Some(StatusUpdate::new(
                    mapping.topic.clone(),
                    PinLevel::from_electrical(level),
                ))
            }
            Err(e) => {
                info!(
                    "Could not read pin {} for {}: {}. Continuing",
                    mapping.pin, mapping.topic, e
                );
                None
            }
        }
    }

    /// Sweeps forever. Pauses while the connection is down and returns when
    /// cancelled or when the receiving side is gone.
    pub async fn run(
        self,
        updates: mpsc::Sender<StatusUpdate>,
        mut state_rx: watch::Receiver<ConnectionState>,
        cancel: CancellationToken,
    ) {
        info!(
            "Polling {} pins, one every {} ms",
            self.pins.len(),
            self.pace.as_millis()
        );

        loop {
            for mapping in self.pins.iter() {
                let connected = async {
                    state_rx
                        .wait_for(|state| *state == ConnectionState::Connected)
                        .await
                        .is_ok()
                };
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    ok = connected => if !ok { return },
                }

                if let Some(update) = self.read_status(&mapping) {
                    if updates.send(update).await.is_err() {
                        debug!("Status receiver closed, stopping poll loop");
                        return;
                    }
                }

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    _ = sleep(self.pace) => {}
                }
            }
        }
    }
}
