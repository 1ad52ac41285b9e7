use crate::gpio::{GpioDriver, PinLevel, PinMap};
use crate::mqtt::{InboundCommand, StatusUpdate};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Turns inbound commands into pin writes
///
/// Unmapped topics and payloads other than `ON`/`OFF` are dropped without a
/// trace above TRACE level. A failed write is logged and not retried.
pub struct CommandRouter {
    pins: Arc<PinMap>,
    gpio: Arc<dyn GpioDriver>,
}

impl CommandRouter {
    pub fn new(pins: Arc<PinMap>, gpio: Arc<dyn GpioDriver>) -> Self {
        Self { pins, gpio }
    }

    /// Actuates the pin behind `cmd.topic` and returns the acknowledgement to
    /// publish, if any.
    pub fn dispatch(&self, cmd: &InboundCommand) -> Option<StatusUpdate> {
        debug!("GPIO {}", cmd);
        let Some(pin) = self.pins.pin_for(&cmd.topic) else {
            trace!("No pin mapped to {}", cmd.topic);
            return None;
        };
        let Some(level) = PinLevel::from_payload(&cmd.payload) else {
            trace!("Ignoring payload {:?} on {}", cmd.payload, cmd.topic);
            return None;
        };

        match self.gpio.write(pin, level.electrical()) {
            Ok(()) => Some(StatusUpdate::new(cmd.topic.clone(), level)),
            Err(e) => {
                info!(
                    "Could not set pin {} for {}: {}. Continuing",
                    pin, cmd.topic, e
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::Level;
    use crate::testing::FakeGpio;

    fn router() -> (CommandRouter, Arc<FakeGpio>) {
        let gpio = Arc::new(FakeGpio::with_pins(&[17, 27]));
        let pins: PinMap = [("home/a".to_string(), 17), ("home/b".to_string(), 27)]
            .into_iter()
            .collect();
        (CommandRouter::new(Arc::new(pins), gpio.clone()), gpio)
    }

    #[test]
    fn on_drives_line_low_and_acknowledges() {
        let (router, gpio) = router();
        let ack = router.dispatch(&InboundCommand::from_topic("home/a", "ON"));
        assert_eq!(ack, Some(StatusUpdate::new("home/a", PinLevel::Energized)));
        assert_eq!(gpio.level(17), Some(Level::Low));
        assert_eq!(gpio.level(27), Some(Level::High));
    }

    #[test]
    fn off_drives_line_high_and_acknowledges() {
        let (router, gpio) = router();
        router.dispatch(&InboundCommand::from_topic("home/b", "ON"));
        let ack = router.dispatch(&InboundCommand::from_topic("home/b", "OFF"));
        assert_eq!(ack, Some(StatusUpdate::new("home/b", PinLevel::Idle)));
        assert_eq!(gpio.level(27), Some(Level::High));
    }

    #[test]
    fn repeated_on_is_idempotent() {
        let (router, gpio) = router();
        let first = router.dispatch(&InboundCommand::from_topic("home/a", "ON"));
        let second = router.dispatch(&InboundCommand::from_topic("home/a", "ON"));
        assert_eq!(first, second);
        assert!(first.is_some());
        assert_eq!(gpio.level(17), Some(Level::Low));
        assert_eq!(gpio.writes(), vec![(17, Level::Low), (17, Level::Low)]);
    }

    #[test]
    fn unmapped_topic_is_ignored() {
        let (router, gpio) = router();
        assert_eq!(
            router.dispatch(&InboundCommand::from_topic("home/unknown", "ON")),
            None
        );
        assert_eq!(
            router.dispatch(&InboundCommand::from_topic("home/a/status", "ON")),
            None
        );
        assert!(gpio.writes().is_empty());
    }

    #[test]
    fn unknown_payload_is_ignored() {
        let (router, gpio) = router();
        for payload in ["on", "1", "TOGGLE", ""] {
            assert_eq!(
                router.dispatch(&InboundCommand::from_topic("home/a", payload)),
                None
            );
        }
        assert!(gpio.writes().is_empty());
        assert_eq!(gpio.level(17), Some(Level::High));
    }

    #[test]
    fn write_failure_yields_no_ack() {
        let (router, gpio) = router();
        gpio.fail_pin(17);
        assert_eq!(
            router.dispatch(&InboundCommand::from_topic("home/a", "ON")),
            None
        );
        // other pins keep working
        assert!(router
            .dispatch(&InboundCommand::from_topic("home/b", "ON"))
            .is_some());
    }
}
