//! # MQTT Integration Module
//!
//! Message bus side of the bridge. The bridge core only sees the [`bus::Bus`]
//! capability and its ordered [`bus::BusEvent`] stream; the rumqttc specifics
//! live in [`mqtt_handler`].
//!
//! ```text
//! mqtt/
//! ├── bus.rs              - Bus capability, connect codes, event stream types
//! ├── message_manager.rs  - Inbound commands and outbound pin status updates
//! └── mqtt_handler.rs     - rumqttc backed implementation of the capability
//! ```
//!
//! ## Wire contract
//!
//! - `<status_topic>` carries retained `1 - connected`, `0 - DISCONNECT` or the
//!   last will `0 - LASTWILL`.
//! - `<topic>` accepts `ON` / `OFF` commands for a mapped pin.
//! - `<topic>/status` carries the non-retained `ON` / `OFF` state of that pin.
//!
//! Everything is published and subscribed at QoS 0. Lost messages are
//! repaired by the next poll sweep.

pub mod bus;
pub mod message_manager;
pub mod mqtt_handler;

pub use bus::{Bus, BusError, BusEvent, ConnectCode, Disconnect, Will};
pub use message_manager::{InboundCommand, StatusUpdate};
pub use mqtt_handler::MqttHandler;

/// Retained on the status topic after every successful connect
pub const STATUS_CONNECTED: &str = "1 - connected";
/// Retained on the status topic during an orderly shutdown
pub const STATUS_DISCONNECT: &str = "0 - DISCONNECT";
/// Registered as last will on the status topic
pub const STATUS_LASTWILL: &str = "0 - LASTWILL";
