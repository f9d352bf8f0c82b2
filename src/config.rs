//! Node configuration loaded from TOML
//!
//! Only `[device]`, `[mqtt]` and `[tls]` are required. Every other section
//! defaults to the values the deployed firmware uses, so a minimal
//! file names the device, the broker and the credential files.

use crate::alert::ThresholdConfig;
use crate::transport::mqtt::{HealthMonitor, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

/// Default MQTT port for `mqtts://` broker URLs
pub const DEFAULT_SECURE_PORT: u16 = 8883;

/// Main node configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    pub device: DeviceSection,
    pub mqtt: MqttSection,
    pub tls: TlsSection,
    #[serde(default)]
    pub connection: ConnectionSection,
    #[serde(default)]
    pub sensor: SensorSection,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    #[serde(default)]
    pub indicators: IndicatorSection,
}

/// Which sensor pipeline this node runs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// Temperature/humidity sensor with tri-color alert LEDs
    Environmental,
    /// Gas-concentration proxy sensor with a warm-up gate
    AirQuality,
}

impl Variant {
    /// Outbound telemetry topic used when `[mqtt] publish_topic` is not set
    pub fn default_publish_topic(self) -> &'static str {
        match self {
            Variant::Environmental => "esp32/pub",
            Variant::AirQuality => "esp32/airquality",
        }
    }
}

/// Device identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Device identifier, also used as the MQTT client id (must match [a-zA-Z0-9._-]+)
    pub id: String,
    pub variant: Variant,
}

/// Broker endpoint and topics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker URL, `mqtts://host[:port]`
    pub broker_url: String,
    /// Outbound telemetry topic (defaults per variant)
    pub publish_topic: Option<String>,
    /// Inbound control topic
    #[serde(default = "default_subscribe_topic")]
    pub subscribe_topic: String,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// How long a single CONNECT attempt may wait for ConnAck
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Upper bound on the time one `service()` call spends pumping the transport
    #[serde(default = "default_service_window")]
    pub service_window_ms: u64,
    /// Serialized telemetry must fit in this many bytes
    #[serde(default = "default_payload_capacity")]
    pub payload_capacity: usize,
}

fn default_subscribe_topic() -> String {
    "esp32/sub".to_string()
}

fn default_keep_alive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    5000
}

fn default_service_window() -> u64 {
    50
}

fn default_payload_capacity() -> usize {
    512
}

/// Paths to the PEM-encoded credentials provisioned for this device
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TlsSection {
    pub ca_path: PathBuf,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// What the node does when `connect()` gives up at startup
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectFailurePolicy {
    /// Keep sampling and driving indicators without publishing
    #[default]
    Continue,
    /// Exit the process with a failure status
    Exit,
}

/// Retry bounds for each stage of the connect procedure
///
/// Each stage waits through its `*_backoff_ms` list first, then repeats its
/// `*_retry_delay_ms`. An empty list gives a fixed delay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConnectionSection {
    #[serde(default = "default_network_retry_delay")]
    pub network_retry_delay_ms: u64,
    #[serde(default)]
    pub network_backoff_ms: Vec<u64>,
    /// 0 retries forever
    #[serde(default = "default_network_max_attempts")]
    pub network_max_attempts: u32,
    #[serde(default = "default_broker_retry_delay")]
    pub broker_retry_delay_ms: u64,
    #[serde(default)]
    pub broker_backoff_ms: Vec<u64>,
    /// 0 retries forever
    #[serde(default = "default_broker_max_attempts")]
    pub broker_max_attempts: u32,
    /// Re-run the connect procedure after the session drops in steady state
    #[serde(default)]
    pub reconnect_on_loss: bool,
    #[serde(default)]
    pub on_connect_failure: ConnectFailurePolicy,
}

fn default_network_retry_delay() -> u64 {
    500
}

fn default_network_max_attempts() -> u32 {
    120
}

fn default_broker_retry_delay() -> u64 {
    100
}

fn default_broker_max_attempts() -> u32 {
    50
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            network_retry_delay_ms: default_network_retry_delay(),
            network_backoff_ms: Vec::new(),
            network_max_attempts: default_network_max_attempts(),
            broker_retry_delay_ms: default_broker_retry_delay(),
            broker_backoff_ms: Vec::new(),
            broker_max_attempts: default_broker_max_attempts(),
            reconnect_on_loss: false,
            on_connect_failure: ConnectFailurePolicy::default(),
        }
    }
}

/// Sampling cadence and host driver locations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorSection {
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_ms: u64,
    /// Gas sensor settling time after boot
    #[serde(default = "default_warmup")]
    pub warmup_ms: u32,
    /// IIO device directory exposing the sensor channels
    #[serde(default = "default_iio_device")]
    pub iio_device: PathBuf,
    /// ADC channel index for the gas sensor (`in_voltage{N}_raw`)
    #[serde(default)]
    pub adc_channel: u8,
}

fn default_cycle_interval() -> u64 {
    2000
}

fn default_warmup() -> u32 {
    20_000
}

fn default_iio_device() -> PathBuf {
    PathBuf::from("/sys/bus/iio/devices/iio:device0")
}

impl Default for SensorSection {
    fn default() -> Self {
        Self {
            cycle_interval_ms: default_cycle_interval(),
            warmup_ms: default_warmup(),
            iio_device: default_iio_device(),
            adc_channel: 0,
        }
    }
}

/// LED brightness files; when all three are absent indicator changes are only logged
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndicatorSection {
    pub normal_path: Option<PathBuf>,
    pub temperature_path: Option<PathBuf>,
    pub humidity_path: Option<PathBuf>,
    /// Blink each LED once after startup
    #[serde(default = "default_self_test")]
    pub self_test: bool,
    #[serde(default = "default_self_test_dwell")]
    pub self_test_dwell_ms: u64,
}

fn default_self_test() -> bool {
    true
}

fn default_self_test_dwell() -> u64 {
    500
}

impl Default for IndicatorSection {
    fn default() -> Self {
        Self {
            normal_path: None,
            temperature_path: None,
            humidity_path: None,
            self_test: default_self_test(),
            self_test_dwell_ms: default_self_test_dwell(),
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
    #[error("Invalid device ID format: {0}")]
    InvalidDeviceId(String),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl NodeConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_device_id(&self.device.id)?;
        self.mqtt.broker_endpoint()?;

        if self.mqtt.subscribe_topic.is_empty() || self.publish_topic().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "MQTT topics must not be empty".to_string(),
            ));
        }
        if self.mqtt.keep_alive_secs < 5 {
            return Err(ConfigError::InvalidConfig(
                "keep_alive_secs must be at least 5".to_string(),
            ));
        }
        if self.mqtt.payload_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "payload_capacity must be greater than 0".to_string(),
            ));
        }
        if self.sensor.cycle_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "cycle_interval_ms must be greater than 0".to_string(),
            ));
        }
        for (stage, policy) in [
            ("network", RetryPolicy::network(&self.connection)),
            ("broker", RetryPolicy::broker(&self.connection)),
        ] {
            HealthMonitor::validate_retry_policy(&policy)
                .map_err(|e| ConfigError::InvalidConfig(format!("{stage} retry: {e}")))?;
        }

        self.thresholds
            .validate()
            .map_err(ConfigError::InvalidConfig)?;

        Ok(())
    }

    /// Outbound telemetry topic, falling back to the variant default
    pub fn publish_topic(&self) -> &str {
        self.mqtt
            .publish_topic
            .as_deref()
            .unwrap_or_else(|| self.device.variant.default_publish_topic())
    }

    /// Create a test configuration for unit testing
    pub fn test_config() -> Self {
        let toml_content = r#"
[device]
id = "test-node"
variant = "environmental"

[mqtt]
broker_url = "mqtts://broker.example.com"

[tls]
ca_path = "certs/AmazonRootCA1.pem"
cert_path = "certs/device.pem.crt"
key_path = "certs/private.pem.key"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

impl MqttSection {
    /// Resolve the broker URL to host and port, requiring a secure scheme
    pub fn broker_endpoint(&self) -> Result<(String, u16), ConfigError> {
        let url = Url::parse(&self.broker_url)
            .map_err(|_| ConfigError::InvalidBrokerUrl(self.broker_url.clone()))?;

        if url.scheme() != "mqtts" {
            return Err(ConfigError::InvalidBrokerUrl(format!(
                "{} (scheme must be mqtts)",
                self.broker_url
            )));
        }

        let host = url
            .host_str()
            .ok_or_else(|| ConfigError::InvalidBrokerUrl(self.broker_url.clone()))?;
        let port = url.port().unwrap_or(DEFAULT_SECURE_PORT);

        Ok((host.to_string(), port))
    }
}

/// Validate device ID format; the broker uses it as the client identifier
pub fn validate_device_id(device_id: &str) -> Result<(), ConfigError> {
    let valid_chars = device_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if device_id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidDeviceId(format!(
            "Device ID '{device_id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_applies_firmware_defaults() {
        let config = NodeConfig::test_config();

        assert_eq!(config.device.id, "test-node");
        assert_eq!(config.device.variant, Variant::Environmental);
        assert_eq!(config.mqtt.subscribe_topic, "esp32/sub");
        assert_eq!(config.mqtt.payload_capacity, 512);
        assert_eq!(config.sensor.cycle_interval_ms, 2000);
        assert_eq!(config.sensor.warmup_ms, 20_000);
        assert_eq!(config.thresholds.temperature_max, 30.0);
        assert_eq!(config.thresholds.humidity_max, 70.0);
        assert!(!config.connection.reconnect_on_loss);
        assert_eq!(
            config.connection.on_connect_failure,
            ConnectFailurePolicy::Continue
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_publish_topic_defaults_per_variant() {
        let mut config = NodeConfig::test_config();
        assert_eq!(config.publish_topic(), "esp32/pub");

        config.device.variant = Variant::AirQuality;
        assert_eq!(config.publish_topic(), "esp32/airquality");

        config.mqtt.publish_topic = Some("site/a/telemetry".to_string());
        assert_eq!(config.publish_topic(), "site/a/telemetry");
    }

    #[test]
    fn test_broker_endpoint_uses_secure_default_port() {
        let config = NodeConfig::test_config();
        let (host, port) = config.mqtt.broker_endpoint().unwrap();
        assert_eq!(host, "broker.example.com");
        assert_eq!(port, 8883);
    }

    #[test]
    fn test_broker_endpoint_explicit_port() {
        let mut config = NodeConfig::test_config();
        config.mqtt.broker_url = "mqtts://10.0.0.5:18883".to_string();
        let (host, port) = config.mqtt.broker_endpoint().unwrap();
        assert_eq!(host, "10.0.0.5");
        assert_eq!(port, 18883);
    }

    #[test]
    fn test_plaintext_broker_rejected() {
        let mut config = NodeConfig::test_config();
        config.mqtt.broker_url = "mqtt://localhost:1883".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBrokerUrl(_))
        ));
    }

    #[test]
    fn test_invalid_device_id() {
        assert!(validate_device_id("invalid@node").is_err());
        assert!(validate_device_id("").is_err());
        assert!(validate_device_id("esp32-dht22_01.lab").is_ok());
    }

    #[test]
    fn test_zero_cycle_interval_rejected() {
        let mut config = NodeConfig::test_config();
        config.sensor.cycle_interval_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_zero_backoff_step_rejected() {
        let mut config = NodeConfig::test_config();
        config.connection.broker_backoff_ms = vec![25, 0];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("broker retry"), "{err}");
    }

    #[test]
    fn test_zero_retry_delay_rejected() {
        let mut config = NodeConfig::test_config();
        config.connection.network_retry_delay_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_variant_parses_snake_case() {
        let toml_content = r#"
[device]
id = "mq135-node"
variant = "air_quality"

[mqtt]
broker_url = "mqtts://broker.example.com:8883"

[tls]
ca_path = "ca.pem"
cert_path = "cert.pem"
key_path = "key.pem"

[connection]
broker_max_attempts = 0
reconnect_on_loss = true
on_connect_failure = "exit"
"#;
        let config = NodeConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.device.variant, Variant::AirQuality);
        assert_eq!(config.connection.broker_max_attempts, 0);
        assert!(config.connection.reconnect_on_loss);
        assert_eq!(
            config.connection.on_connect_failure,
            ConnectFailurePolicy::Exit
        );
    }
}
