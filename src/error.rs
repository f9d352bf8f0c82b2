//! Top-level error type for the sensor node
//!
//! Each layer owns its own `thiserror` enum; [`NodeError`] gathers them for
//! the binary and for callers that drive the node as a whole.

use crate::config::ConfigError;
use crate::credentials::CredentialError;
use crate::indicator::IndicatorError;
use crate::network::NetworkError;
use crate::telemetry::PublishError;
use crate::transport::{ConnectionError, MqttError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Credential error: {0}")]
    Credentials(#[from] CredentialError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("MQTT error: {0}")]
    Mqtt(#[from] MqttError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Indicator error: {0}")]
    Indicator(#[from] IndicatorError),
}

/// Result type for node operations
pub type NodeResult<T> = Result<T, NodeError>;
