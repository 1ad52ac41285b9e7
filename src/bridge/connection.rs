//! Broker connection lifecycle
//!
//! ```text
//!                 ┌──────────── rc 3 / transport error ───────────┐
//!                 ▼                                               │
//! Disconnected ──► Connecting ──► Connected ──unexpected──► Retrying
//!      ▲               │              │                      (5s, then
//!      └──clean────────┼──────────────┘                     Connecting)
//!                      └── rc 1,2,4,5 ──► Failed
//! ```
//!
//! Retries never back off further and never give up; the process lifetime is
//! the only bound. The state is mirrored on a watch channel so the poll loop
//! can wait for `Connected` without touching the connection itself.

use crate::gpio::PinMap;
use crate::mqtt::{
    Bus, BusError, BusEvent, ConnectCode, Disconnect, StatusUpdate, Will, STATUS_CONNECTED,
    STATUS_DISCONNECT, STATUS_LASTWILL,
};
use rumqttc::QoS;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Retrying,
    Failed,
}

/// Fixed delays of the retry policy
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Wait after the broker was unavailable before connecting again
    pub connect_retry: Duration,
    /// Wait after an unexpected disconnect before reconnecting
    pub reconnect_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            connect_retry: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection {0}")]
    Rejected(ConnectCode),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}

/// Sole owner of the bus handle
pub struct ConnectionManager {
    bus: Box<dyn Bus>,
    status_topic: String,
    pins: Arc<PinMap>,
    policy: RetryPolicy,
    state_tx: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
    pub fn new(
        bus: Box<dyn Bus>,
        status_topic: impl Into<String>,
        pins: Arc<PinMap>,
        policy: RetryPolicy,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::default());
        Self {
            bus,
            status_topic: status_topic.into(),
            pins,
            policy,
            state_tx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!("Connection state {:?} -> {:?}", previous, state);
        }
    }

    /// Connects, retrying for as long as the broker is merely unavailable.
    ///
    /// Returns once connected with the status announced and every pin topic
    /// subscribed, or with the refusal that ends the process.
    pub async fn establish(&mut self) -> Result<(), ConnectionError> {
        loop {
            self.set_state(ConnectionState::Connecting);
            self.bus.set_last_will(Will {
                topic: self.status_topic.clone(),
                payload: STATUS_LASTWILL.to_string(),
                qos: QoS::AtMostOnce,
                retain: true,
            });

            match self.bus.connect().await {
                Ok(ConnectCode::Accepted) => return self.on_connected().await,
                Ok(code) if code.is_transient() => info!("Connection {}", code),
                Ok(code) => {
                    error!("Connection {}", code);
                    self.set_state(ConnectionState::Failed);
                    return Err(ConnectionError::Rejected(code));
                }
                Err(e) => info!("Connection failed: {}", e),
            }

            self.set_state(ConnectionState::Retrying);
            info!("Retrying in {} seconds", self.policy.connect_retry.as_secs());
            sleep(self.policy.connect_retry).await;
        }
    }

    async fn on_connected(&mut self) -> Result<(), ConnectionError> {
        let announced = self
            .bus
            .publish(&self.status_topic, STATUS_CONNECTED, QoS::AtMostOnce, true)
            .await;
        if let Err(e) = announced {
            self.set_state(ConnectionState::Failed);
            return Err(e.into());
        }

        for topic in self.pins.topics() {
            if let Err(e) = self.bus.subscribe(topic, QoS::AtMostOnce).await {
                error!("Failed to subscribe to {}: {}", topic, e);
                self.set_state(ConnectionState::Failed);
                return Err(e.into());
            }
            debug!("Subscribed to {}", topic);
        }

        self.set_state(ConnectionState::Connected);
        Ok(())
    }

    /// Reacts to a lost connection. A clean disconnect is final, anything
    /// else reconnects after the fixed delay.
    pub async fn on_disconnect(&mut self, reason: Disconnect) -> Result<(), ConnectionError> {
        match reason {
            Disconnect::Clean => {
                info!("Clean disconnection");
                self.set_state(ConnectionState::Disconnected);
                Ok(())
            }
            Disconnect::Unexpected(cause) => {
                info!(
                    "Unexpected disconnection. Reconnecting in {} seconds",
                    self.policy.reconnect_delay.as_secs()
                );
                debug!("Disconnect cause: {}", cause);
                self.set_state(ConnectionState::Retrying);
                sleep(self.policy.reconnect_delay).await;
                self.establish().await
            }
        }
    }

    pub async fn next_event(&mut self) -> BusEvent {
        self.bus.next_event().await
    }

    pub async fn publish_status(&mut self, update: &StatusUpdate) -> Result<(), BusError> {
        self.bus
            .publish(
                &update.status_topic(),
                update.payload(),
                QoS::AtMostOnce,
                false,
            )
            .await
    }

    /// Retained offline announcement for an orderly shutdown
    pub async fn announce_offline(&mut self) -> Result<(), BusError> {
        self.bus
            .publish(&self.status_topic, STATUS_DISCONNECT, QoS::AtMostOnce, true)
            .await
    }

    /// Closes the connection for good
    pub async fn release(&mut self) -> Result<(), BusError> {
        let result = self.bus.disconnect().await;
        if let Err(e) = &result {
            warn!("Disconnect did not complete cleanly: {}", e);
        }
        self.set_state(ConnectionState::Failed);
        result
    }
}
