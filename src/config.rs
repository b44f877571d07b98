//! Configuration for the telemetry forwarder
//!
//! Loaded from a TOML file. Each section maps to one concern: device
//! identity, broker session, topic composition, publish cycle and sensor.

use crate::protocol::{compose_topic, validate_filter, validate_segment, TopicError, MAX_PRECISION};
use crate::transport::mqtt::parse_endpoint;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Paths searched, in order, when no config file is given on the command line
pub const DEFAULT_CONFIG_PATHS: &[&str] = &["forwarder.toml", "config/forwarder.toml"];

/// Main forwarder configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForwarderConfig {
    pub device: DeviceSection,
    pub mqtt: MqttSection,
    #[serde(default)]
    pub topic: TopicSection,
    #[serde(default)]
    pub publish: PublishSection,
    #[serde(default)]
    pub sensor: SensorSection,
}

/// Device identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Client identity for the session and last topic segment
    pub sensor_name: String,
    /// Payload location and topic segment
    pub location: String,
    pub site_name: String,
}

/// Broker session settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker URL, `mqtt://` or `mqtts://` (mutual TLS)
    pub endpoint: String,
    /// Client certificate (PEM)
    pub cert: Option<PathBuf>,
    /// Client private key (PEM)
    pub key: Option<PathBuf>,
    /// CA bundle used to verify the broker (PEM)
    pub root_ca: Option<PathBuf>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Ask the broker to drop session state on connect
    #[serde(default)]
    pub clean_session: bool,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// How long a publish waits for the broker acknowledgment
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_secs: u64,
    /// Topics subscribed at QoS 1 after connect and restored after resume
    #[serde(default)]
    pub subscriptions: Vec<String>,
}

fn default_keep_alive() -> u64 {
    6
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_publish_timeout() -> u64 {
    10
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            endpoint: "mqtt://localhost:1883".to_string(),
            cert: None,
            key: None,
            root_ca: None,
            keep_alive_secs: default_keep_alive(),
            clean_session: false,
            connect_timeout_secs: default_connect_timeout(),
            publish_timeout_secs: default_publish_timeout(),
            subscriptions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicSection {
    #[serde(default = "default_topic_root")]
    pub root: String,
}

fn default_topic_root() -> String {
    "telemetry".to_string()
}

impl Default for TopicSection {
    fn default() -> Self {
        Self {
            root: default_topic_root(),
        }
    }
}

/// Publish cycle settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishSection {
    #[serde(default = "default_cycle_period")]
    pub cycle_period_secs: u64,
    /// Decimal places for humidity and temperature
    #[serde(default = "default_precision")]
    pub precision: usize,
}

fn default_cycle_period() -> u64 {
    5
}

fn default_precision() -> usize {
    crate::protocol::DEFAULT_PRECISION
}

impl Default for PublishSection {
    fn default() -> Self {
        Self {
            cycle_period_secs: default_cycle_period(),
            precision: default_precision(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorSection {
    /// I2C device node the AM2315 is attached to
    #[serde(default = "default_i2c_bus")]
    pub i2c_bus: PathBuf,
}

fn default_i2c_bus() -> PathBuf {
    PathBuf::from("/dev/i2c-1")
}

impl Default for SensorSection {
    fn default() -> Self {
        Self {
            i2c_bus: default_i2c_bus(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("No config file found (searched: {0})")]
    NotFound(String),
    #[error("Invalid topic configuration: {0}")]
    InvalidTopic(#[from] TopicError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ForwarderConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ForwarderConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the explicit path, or from the first default path that exists
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from_file(path);
        }
        DEFAULT_CONFIG_PATHS
            .iter()
            .map(Path::new)
            .find(|path| path.is_file())
            .map(Self::load_from_file)
            .unwrap_or_else(|| Err(ConfigError::NotFound(DEFAULT_CONFIG_PATHS.join(", "))))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_segment("device.sensor_name", &self.device.sensor_name)?;
        validate_segment("device.location", &self.device.location)?;
        validate_segment("device.site_name", &self.device.site_name)?;
        validate_segment("topic.root", &self.topic.root)?;
        for filter in &self.mqtt.subscriptions {
            validate_filter(filter)?;
        }

        self.validate_mqtt()?;

        if self.publish.cycle_period_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "publish.cycle_period_secs must be a positive number of seconds".to_string(),
            ));
        }
        if self.publish.precision > MAX_PRECISION {
            return Err(ConfigError::InvalidConfig(format!(
                "publish.precision must be at most {MAX_PRECISION}, got {}",
                self.publish.precision
            )));
        }

        Ok(())
    }

    fn validate_mqtt(&self) -> Result<(), ConfigError> {
        let (_, _, tls) = parse_endpoint(&self.mqtt.endpoint)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;

        if tls {
            let missing: Vec<&str> = [
                ("mqtt.cert", self.mqtt.cert.is_none()),
                ("mqtt.key", self.mqtt.key.is_none()),
                ("mqtt.root_ca", self.mqtt.root_ca.is_none()),
            ]
            .into_iter()
            .filter_map(|(name, absent)| absent.then_some(name))
            .collect();
            if !missing.is_empty() {
                return Err(ConfigError::InvalidConfig(format!(
                    "mqtts endpoint requires {}",
                    missing.join(", ")
                )));
            }
        }

        if self.mqtt.keep_alive_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.keep_alive_secs must be positive".to_string(),
            ));
        }
        if self.mqtt.connect_timeout_secs == 0 || self.mqtt.publish_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt timeouts must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Topic every reading is published to
    pub fn telemetry_topic(&self) -> String {
        compose_topic(
            &self.topic.root,
            &self.device.site_name,
            &self.device.location,
            &self.device.sensor_name,
        )
    }

    pub fn cycle_period(&self) -> Duration {
        Duration::from_secs(self.publish.cycle_period_secs)
    }

    /// Client identity used for the broker session
    pub fn client_id(&self) -> &str {
        &self.device.sensor_name
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[device]
sensor_name = "sensor1"
location = "greenhouse-1"
site_name = "site-a"

[mqtt]
endpoint = "mqtt://localhost:1883"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}
