//! [`GpioDriver`] backed by the Raspberry Pi GPIO peripheral via `rppal`.
//!
//! Pins are opened with `into_output_high`/`into_output_low`, which write the
//! output latch before switching the line to output, so a relay never sees a
//! glitch to the other level during startup. The poll loop reads the real line
//! level back through the output pin.
//!
//! Releasing parks every pin at the idle level and leaves it driven as an
//! output. Resetting to input would let active-low boards with pull-downs
//! float into the energized state.

use super::{GpioDriver, GpioError, Level, PinId, PinLevel};
use rppal::gpio::{Gpio, OutputPin, Pin};
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

pub struct RppalGpio {
    gpio: Gpio,
    pins: RwLock<HashMap<PinId, Mutex<OutputPin>>>,
}

impl RppalGpio {
    pub fn new() -> Result<Self, GpioError> {
        info!("Initializing GPIO peripheral");
        let gpio = Gpio::new().map_err(|e| GpioError::InitializationError(e.to_string()))?;
        Ok(Self {
            gpio,
            pins: RwLock::new(HashMap::new()),
        })
    }

    fn with_pin<T>(
        &self,
        pin: PinId,
        f: impl FnOnce(&mut OutputPin) -> T,
    ) -> Result<T, GpioError> {
        let pins = self.pins.read().map_err(|_| poisoned(pin))?;
        let output = pins.get(&pin).ok_or(GpioError::UnknownPin(pin))?;
        let mut output = output.lock().map_err(|_| poisoned(pin))?;
        Ok(f(&mut output))
    }
}

fn poisoned(pin: PinId) -> GpioError {
    GpioError::AccessError {
        pin,
        reason: "pin lock poisoned".to_string(),
    }
}

fn to_rppal(level: Level) -> rppal::gpio::Level {
    match level {
        Level::Low => rppal::gpio::Level::Low,
        Level::High => rppal::gpio::Level::High,
    }
}

/// Latches the initial level, then switches the pin to output
fn open_output(pin: Pin, initial: PinLevel) -> OutputPin {
    match to_rppal(initial.electrical()) {
        rppal::gpio::Level::Low => pin.into_output_low(),
        rppal::gpio::Level::High => pin.into_output_high(),
    }
}

/// Level every pin is left at once released
fn parking_level() -> rppal::gpio::Level {
    to_rppal(PinLevel::Idle.electrical())
}

impl GpioDriver for RppalGpio {
    fn configure(&self, pin: PinId, initial: PinLevel) -> Result<(), GpioError> {
        let raw = self.gpio.get(pin).map_err(|e| GpioError::AccessError {
            pin,
            reason: e.to_string(),
        })?;
        let output = open_output(raw, initial);
        debug!("Configured pin {} as output, initial {}", pin, initial);

        let mut pins = self.pins.write().map_err(|_| poisoned(pin))?;
        if pins.insert(pin, Mutex::new(output)).is_some() {
            warn!("Pin {} was configured twice", pin);
        }
        Ok(())
    }

    fn write(&self, pin: PinId, level: Level) -> Result<(), GpioError> {
        self.with_pin(pin, |output| output.write(to_rppal(level)))
    }

    fn read(&self, pin: PinId) -> Result<Level, GpioError> {
        self.with_pin(pin, |output| {
            if output.is_set_low() {
                Level::Low
            } else {
                Level::High
            }
        })
    }

    fn release_all(&self) -> Result<(), GpioError> {
        let mut pins = self
            .pins
            .write()
            .map_err(|_| GpioError::InitializationError("pin table lock poisoned".into()))?;
        info!("Releasing {} GPIO pins", pins.len());
        for (pin, output) in pins.drain() {
            match output.into_inner() {
                Ok(mut output) => {
                    output.write(parking_level());
                    output.set_reset_on_drop(false);
                }
                Err(_) => warn!("Pin {} lock poisoned, dropping it as is", pin),
            }
        }
        Ok(())
    }
}
