//! Capability interface between the bridge and its message bus transport
//!
//! The bridge never talks to a broker library directly. It drives a [`Bus`]
//! and consumes a single ordered stream of [`BusEvent`]s from it, which keeps
//! all connection handling inside one owning task.

use super::message_manager::InboundCommand;
use async_trait::async_trait;
use rumqttc::QoS;
use std::fmt;

/// CONNACK return codes of MQTT 3.1.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectCode {
    Accepted,
    RefusedProtocolVersion,
    BadClientId,
    ServiceUnavailable,
    BadUserNamePassword,
    NotAuthorized,
    Other(u8),
}

impl ConnectCode {
    pub fn code(&self) -> u8 {
        match self {
            ConnectCode::Accepted => 0,
            ConnectCode::RefusedProtocolVersion => 1,
            ConnectCode::BadClientId => 2,
            ConnectCode::ServiceUnavailable => 3,
            ConnectCode::BadUserNamePassword => 4,
            ConnectCode::NotAuthorized => 5,
            ConnectCode::Other(code) => *code,
        }
    }

    /// Only an unavailable server is worth retrying; every other refusal is final.
    pub fn is_transient(&self) -> bool {
        matches!(self, ConnectCode::ServiceUnavailable)
    }
}

impl fmt::Display for ConnectCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            ConnectCode::Accepted => "connection accepted",
            ConnectCode::RefusedProtocolVersion => "refused - unacceptable protocol version",
            ConnectCode::BadClientId => "refused - identifier rejected",
            ConnectCode::ServiceUnavailable => "refused - server unavailable",
            ConnectCode::BadUserNamePassword => "refused - bad user name or password",
            ConnectCode::NotAuthorized => "refused - not authorised",
            ConnectCode::Other(_) => "refused - unknown reason",
        };
        write!(f, "{} (rc {})", text, self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disconnect {
    /// We asked for it
    Clean,
    Unexpected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    Message(InboundCommand),
    Connected(ConnectCode),
    Disconnected(Disconnect),
    Published(u16),
    Log { level: tracing::Level, text: String },
}

/// Message the broker publishes for us when the connection dies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Not connected to broker")]
    NotConnected,

    #[error("Client request failed: {0}")]
    Client(#[from] rumqttc::ClientError),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timed out waiting for broker")]
    Timeout,
}

#[async_trait]
pub trait Bus: Send {
    /// Must be called before [`Bus::connect`] to take effect for that connection
    fn set_last_will(&mut self, will: Will);

    /// Opens a connection and waits, bounded, for the broker's answer.
    ///
    /// `Err` means the transport itself failed (no route, timeout) and is
    /// always worth retrying. A refusal by the broker comes back as `Ok` with
    /// the refusing [`ConnectCode`].
    async fn connect(&mut self) -> Result<ConnectCode, BusError>;

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), BusError>;

    async fn publish(
        &mut self,
        topic: &str,
        payload: &str,
        qos: QoS,
        retain: bool,
    ) -> Result<(), BusError>;

    async fn disconnect(&mut self) -> Result<(), BusError>;

    /// Next inbound event. Never resolves while there is no connection.
    async fn next_event(&mut self) -> BusEvent;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_server_unavailable_is_transient() {
        let codes = [
            ConnectCode::Accepted,
            ConnectCode::RefusedProtocolVersion,
            ConnectCode::BadClientId,
            ConnectCode::ServiceUnavailable,
            ConnectCode::BadUserNamePassword,
            ConnectCode::NotAuthorized,
            ConnectCode::Other(6),
        ];
        for (rc, connect_code) in codes.into_iter().enumerate() {
            assert_eq!(usize::from(connect_code.code()), rc);
            assert_eq!(connect_code.is_transient(), rc == 3);
        }
    }

    #[test]
    fn display_names_the_refusal() {
        assert_eq!(
            ConnectCode::BadUserNamePassword.to_string(),
            "refused - bad user name or password (rc 4)"
        );
    }
}
