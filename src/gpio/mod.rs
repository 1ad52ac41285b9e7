//! Hardware side of the bridge
//!
//! Pins are driven through the [`GpioDriver`] capability. The wire protocol talks
//! in [`PinLevel`] (`"ON"` / `"OFF"`), the driver talks in electrical [`Level`].
//! The attached relay boards are active-low, so the two are related by a fixed
//! inversion:
//!
//! ```text
//! "ON"  ── PinLevel::Energized ── Level::Low
//! "OFF" ── PinLevel::Idle      ── Level::High
//! ```

pub mod pin_map;
pub mod rppal_driver;

pub use pin_map::{PinId, PinMap, PinMapping};
pub use rppal_driver::RppalGpio;

use std::fmt;

/// Electrical signal on a line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Low,
    High,
}

/// Logical state of a line as seen on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinLevel {
    Energized,
    Idle,
}

impl PinLevel {
    pub const ON: &'static str = "ON";
    pub const OFF: &'static str = "OFF";

    /// Parses a command payload. Only the exact strings `ON` and `OFF` are accepted.
    pub fn from_payload(payload: &str) -> Option<Self> {
        match payload {
            Self::ON => Some(PinLevel::Energized),
            Self::OFF => Some(PinLevel::Idle),
            _ => None,
        }
    }

    pub fn as_payload(&self) -> &'static str {
        match self {
            PinLevel::Energized => Self::ON,
            PinLevel::Idle => Self::OFF,
        }
    }

    pub fn electrical(&self) -> Level {
        match self {
            PinLevel::Energized => Level::Low,
            PinLevel::Idle => Level::High,
        }
    }

    pub fn from_electrical(level: Level) -> Self {
        match level {
            Level::Low => PinLevel::Energized,
            Level::High => PinLevel::Idle,
        }
    }
}

impl fmt::Display for PinLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_payload())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GpioError {
    #[error("Failed to initialize GPIO: {0}")]
    InitializationError(String),

    #[error("Pin {0} is not configured")]
    UnknownPin(PinId),

    #[error("Access to pin {pin} failed: {reason}")]
    AccessError { pin: PinId, reason: String },
}

/// Capability the bridge needs from the hardware
///
/// Implementations lock per pin, so calls on distinct pins may run concurrently
/// from the command path and the poll loop.
pub trait GpioDriver: Send + Sync {
    /// Sets the pin up as an output holding `initial`
    fn configure(&self, pin: PinId, initial: PinLevel) -> Result<(), GpioError>;

    fn write(&self, pin: PinId, level: Level) -> Result<(), GpioError>;

    fn read(&self, pin: PinId) -> Result<Level, GpioError>;

    /// Parks every configured pin at the idle level and lets go of it
    fn release_all(&self) -> Result<(), GpioError>;
}
