use crate::gpio::pin_map::status_topic_for;
use crate::gpio::PinLevel;
use chrono::NaiveDateTime;
use std::fmt;

/// Message received on one of the subscribed command topics
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundCommand {
    pub topic: String,
    pub payload: String,
    pub received_at: NaiveDateTime,
}

impl fmt::Display for InboundCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} : {} ({})",
            self.topic,
            self.payload,
            self.received_at.format("%H:%M:%S%.3f")
        )
    }
}

impl InboundCommand {
    pub fn from_topic(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        InboundCommand {
            topic: topic.into(),
            payload: payload.into(),
            received_at: chrono::Local::now().naive_local(),
        }
    }
}

/// Per-pin state to publish on `<topic>/status`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusUpdate {
    pub topic: String,
    pub level: PinLevel,
}

impl StatusUpdate {
    pub fn new(topic: impl Into<String>, level: PinLevel) -> Self {
        StatusUpdate {
            topic: topic.into(),
            level,
        }
    }

    pub fn status_topic(&self) -> String {
        status_topic_for(&self.topic)
    }

    pub fn payload(&self) -> &'static str {
        self.level.as_payload()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_update_targets_status_subtopic() {
        let update = StatusUpdate::new("home/pump", PinLevel::Energized);
        assert_eq!(update.status_topic(), "home/pump/status");
        assert_eq!(update.payload(), "ON");
    }

    #[test]
    fn command_display_shows_topic_and_payload() {
        let cmd = InboundCommand::from_topic("home/pump", "OFF");
        assert!(cmd.to_string().starts_with("home/pump : OFF ("));
    }
}
