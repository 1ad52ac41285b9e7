//! Configuration file handling
//!
//! The bridge is configured from a single TOML file with three sections:
//!
//! ```toml
//! [mqtt]
//! host = "broker.local"
//! port = 1883
//! status_topic = "home/gpio/status"
//! poll_interval = 10
//!
//! [log]
//! verbose = false
//! logfile = "/var/log/mqtt-gpio-trigger.log"
//!
//! [gpios]
//! "home/garden/pump" = 17
//! "home/garden/light" = 27
//! ```
//!
//! Settings are validated once at startup and are read-only afterwards.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const APP_NAME: &str = "mqtt-gpio-trigger";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("No config file given and no default config found")]
    NotFound,
}

/// Broker connection settings from the `[mqtt]` section
#[derive(Deserialize, Clone, Debug)]
pub struct MqttSettings {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub status_topic: String,
    /// Seconds for one full sweep over all pins
    pub poll_interval: u64,
    #[serde(default = "default_keep_alive")]
    pub keep_alive: u64,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_client_name")]
    pub client_name: String,
}

impl MqttSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive)
    }

    /// Client identifier in the `name[_pid]` form
    pub fn client_id(&self) -> String {
        format!("{}[_{}]", self.client_name, std::process::id())
    }

    pub fn credentials(&self) -> Option<(String, String)> {
        self.username
            .clone()
            .map(|user| (user, self.password.clone().unwrap_or_default()))
    }
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct LogSettings {
    #[serde(default)]
    pub verbose: bool,
    pub logfile: Option<PathBuf>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct Settings {
    pub mqtt: MqttSettings,
    #[serde(default)]
    pub log: LogSettings,
    /// Topic to BCM pin number
    pub gpios: BTreeMap<String, u8>,
}

fn default_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    60
}

fn default_client_name() -> String {
    APP_NAME.to_string()
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Reading configuration from {}", path.display());
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Location used when no config file is passed on the command line
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_NAME).join("config.toml"))
    }

    /// Picks the explicit path if given, otherwise the default one if it exists
    pub fn resolve_path(explicit: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
        Self::resolve_path_with(explicit, Self::default_path())
    }

    fn resolve_path_with(
        explicit: Option<PathBuf>,
        default: Option<PathBuf>,
    ) -> Result<PathBuf, ConfigError> {
        match explicit {
            Some(path) => Ok(path),
            None => default
                .filter(|path| path.exists())
                .ok_or(ConfigError::NotFound),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.host.trim().is_empty() {
            return Err(ConfigError::Invalid("mqtt.host must not be empty".into()));
        }
        if self.mqtt.status_topic.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "mqtt.status_topic must not be empty".into(),
            ));
        }
        if self.mqtt.poll_interval == 0 {
            return Err(ConfigError::Invalid(
                "mqtt.poll_interval must be greater than zero".into(),
            ));
        }
        if self.mqtt.keep_alive < 5 {
            return Err(ConfigError::Invalid(
                "mqtt.keep_alive must be at least 5 seconds".into(),
            ));
        }
        if self.gpios.is_empty() {
            return Err(ConfigError::Invalid(
                "[gpios] must map at least one topic to a pin".into(),
            ));
        }
        for topic in self.gpios.keys() {
            if topic.is_empty() {
                return Err(ConfigError::Invalid("gpio topic must not be empty".into()));
            }
            if topic.contains(['+', '#']) {
                return Err(ConfigError::Invalid(format!(
                    "gpio topic {} must not contain wildcards",
                    topic
                )));
            }
        }
        Ok(())
    }
}
