use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, LastWill, MqttOptions,
    Outgoing, Packet, QoS,
};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn, Level};

use super::bus::{Bus, BusError, BusEvent, ConnectCode, Disconnect, Will};
use super::message_manager::InboundCommand;
use crate::config::MqttSettings;

/// Upper bound for a connect or disconnect handshake
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

impl From<ConnectReturnCode> for ConnectCode {
    fn from(code: ConnectReturnCode) -> Self {
        match code {
            ConnectReturnCode::Success => ConnectCode::Accepted,
            ConnectReturnCode::RefusedProtocolVersion => ConnectCode::RefusedProtocolVersion,
            ConnectReturnCode::BadClientId => ConnectCode::BadClientId,
            ConnectReturnCode::ServiceUnavailable => ConnectCode::ServiceUnavailable,
            ConnectReturnCode::BadUserNamePassword => ConnectCode::BadUserNamePassword,
            ConnectReturnCode::NotAuthorized => ConnectCode::NotAuthorized,
        }
    }
}

struct Session {
    client: AsyncClient,
    eventloop: EventLoop,
}

/// [`Bus`] on top of rumqttc
///
/// Every connect attempt builds a fresh client/event loop pair from the stored
/// options, so a last will set in between always applies. The event loop is
/// only ever polled from [`Bus::next_event`] and the handshakes, by the task
/// owning the handler, and all requests go through the non-blocking `try_*`
/// calls so that task can never wait on its own event loop.
pub struct MqttHandler {
    options: MqttOptions,
    capacity: usize,
    handshake_timeout: Duration,
    session: Option<Session>,
}

impl MqttHandler {
    pub fn new(options: MqttOptions, capacity: usize) -> Self {
        MqttHandler {
            options,
            capacity,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            session: None,
        }
    }

    /// Builds the handler from settings, sizing the request queue so that
    /// subscribing to every pin topic after a connect fits in one go.
    pub fn from_settings(settings: &MqttSettings, topic_count: usize) -> Self {
        let mut mqtt_options =
            MqttOptions::new(settings.client_id(), settings.host.clone(), settings.port);
        mqtt_options.set_keep_alive(settings.keep_alive());
        if let Some((user, password)) = settings.credentials() {
            mqtt_options.set_credentials(user, password);
        }
        debug!(
            "MQTT options: {}:{} keep_alive={}s",
            settings.host, settings.port, settings.keep_alive
        );
        Self::new(mqtt_options, topic_count + 16)
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<ConnectCode, BusError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => return Ok(ack.code.into()),
            Ok(event) => trace!("Event before CONNACK: {:?}", event),
            Err(ConnectionError::ConnectionRefused(code)) => return Ok(code.into()),
            Err(e) => return Err(BusError::Connection(e.to_string())),
        }
    }
}

pub(crate) fn translate(event: Event) -> BusEvent {
    match event {
        Event::Incoming(Packet::Publish(publish)) => BusEvent::Message(InboundCommand::from_topic(
            publish.topic,
            String::from_utf8_lossy(&publish.payload).into_owned(),
        )),
        Event::Incoming(Packet::ConnAck(ack)) => BusEvent::Connected(ack.code.into()),
        Event::Incoming(Packet::Disconnect) => {
            BusEvent::Disconnected(Disconnect::Unexpected("broker sent DISCONNECT".into()))
        }
        Event::Outgoing(Outgoing::Publish(pkid)) => BusEvent::Published(pkid),
        Event::Outgoing(Outgoing::Disconnect) => BusEvent::Disconnected(Disconnect::Clean),
        Event::Incoming(packet) => BusEvent::Log {
            level: Level::DEBUG,
            text: format!("Received {:?}", packet),
        },
        Event::Outgoing(outgoing) => BusEvent::Log {
            level: Level::TRACE,
            text: format!("Sent {:?}", outgoing),
        },
    }
}

#[async_trait]
impl Bus for MqttHandler {
    fn set_last_will(&mut self, will: Will) {
        self.options.set_last_will(LastWill::new(
            will.topic,
            will.payload.into_bytes(),
            will.qos,
            will.retain,
        ));
    }

    async fn connect(&mut self) -> Result<ConnectCode, BusError> {
        self.session = None;
        let (client, mut eventloop) = AsyncClient::new(self.options.clone(), self.capacity);
        let (host, port) = self.options.broker_address();
        debug!("Connecting to {}:{}", host, port);

        let code = timeout(self.handshake_timeout, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| BusError::Timeout)??;

        if code == ConnectCode::Accepted {
            info!("Connected to {}:{}", host, port);
            self.session = Some(Session { client, eventloop });
        }
        Ok(code)
    }

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), BusError> {
        let session = self.session.as_ref().ok_or(BusError::NotConnected)?;
        session.client.try_subscribe(topic, qos)?;
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &str,
        qos: QoS,
        retain: bool,
    ) -> Result<(), BusError> {
        let session = self.session.as_ref().ok_or(BusError::NotConnected)?;
        session
            .client
            .try_publish(topic, qos, retain, payload.as_bytes().to_vec())?;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), BusError> {
        let Some(mut session) = self.session.take() else {
            return Err(BusError::NotConnected);
        };
        session.client.try_disconnect()?;

        // Drive the loop until queued publishes and the DISCONNECT are written
        let flush = async {
            loop {
                match session.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => return Ok(()),
                    Ok(event) => trace!("Flushing before disconnect: {:?}", event),
                    Err(e) => return Err(BusError::Connection(e.to_string())),
                }
            }
        };
        timeout(self.handshake_timeout, flush)
            .await
            .map_err(|_| BusError::Timeout)?
    }

    async fn next_event(&mut self) -> BusEvent {
        let Some(session) = self.session.as_mut() else {
            return std::future::pending().await;
        };

        match session.eventloop.poll().await {
            Ok(event) => {
                let event = translate(event);
                if matches!(event, BusEvent::Disconnected(_)) {
                    self.session = None;
                }
                event
            }
            Err(e) => {
                warn!("MQTT connection error: {}", e);
                self.session = None;
                BusEvent::Disconnected(Disconnect::Unexpected(e.to_string()))
            }
        }
    }
}
