//! Pure session state, retry policy and option building for the MQTT link
//!
//! Nothing in this module performs I/O; the client and the connection manager
//! call into it to decide what to do next.

use crate::config::{ConnectionSection, MqttSection};
use crate::credentials::Credentials;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Largest packet the node accepts from the broker
pub const MAX_INCOMING_PACKET: u32 = 16 * 1024;

/// Lifecycle of the secure broker session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Not connected, either initially or after a steady-state loss
    Disconnected,
    /// Waiting for the network link
    Associating,
    /// Loading credentials and configuring TLS
    SecureHandshake,
    /// Waiting for the broker to acknowledge the connection
    BrokerConnecting,
    /// Connected and subscribed to the control topic; publishing allowed
    SubscriptionActive,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Associating => "associating",
            SessionState::SecureHandshake => "secure-handshake",
            SessionState::BrokerConnecting => "broker-connecting",
            SessionState::SubscriptionActive => "subscription-active",
        };
        f.write_str(name)
    }
}

/// Retry behavior for one connect stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Delays in milliseconds for the first retries; empty means a fixed delay
    pub backoff_pattern: Vec<u64>,
    /// Delay once the pattern is exhausted
    pub sustained_delay: u64,
}

impl RetryPolicy {
    /// Fixed delay between attempts; `max_attempts == 0` retries forever
    pub fn fixed(delay_ms: u64, max_attempts: u32) -> Self {
        Self {
            max_attempts: (max_attempts > 0).then_some(max_attempts),
            backoff_pattern: Vec::new(),
            sustained_delay: delay_ms,
        }
    }

    /// Walk `pattern` first, then hold at `sustained_ms`
    pub fn patterned(pattern: Vec<u64>, sustained_ms: u64, max_attempts: u32) -> Self {
        Self {
            backoff_pattern: pattern,
            ..Self::fixed(sustained_ms, max_attempts)
        }
    }

    /// Network association policy from `[connection]`
    pub fn network(config: &ConnectionSection) -> Self {
        Self::patterned(
            config.network_backoff_ms.clone(),
            config.network_retry_delay_ms,
            config.network_max_attempts,
        )
    }

    /// Broker connect policy from `[connection]`
    pub fn broker(config: &ConnectionSection) -> Self {
        Self::patterned(
            config.broker_backoff_ms.clone(),
            config.broker_retry_delay_ms,
            config.broker_max_attempts,
        )
    }

    /// Delay after the given (1-based) failed attempt
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }

    /// Total time spent sleeping before giving up; None when unbounded
    pub fn calculate_max_total_time(&self) -> Option<u64> {
        self.max_attempts.map(|max_attempts| {
            // no sleep after the final attempt
            (1..max_attempts)
                .map(|attempt| self.calculate_backoff_delay(attempt))
                .sum()
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(100, 0)
    }
}

/// MQTT link errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Connection failed: {0}")]
    ConnectionFailedStr(String),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription to {topic} rejected by broker")]
    SubscriptionRejected { topic: String },
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Secure transport not configured")]
    TlsNotConfigured,
    #[error("Broker link not connected")]
    NotConnected,
}

/// Build session options from config; the client id is the device id
pub fn configure_mqtt_options(
    device_id: &str,
    config: &MqttSection,
) -> Result<MqttOptions, MqttError> {
    let (host, port) = config
        .broker_endpoint()
        .map_err(|_| MqttError::InvalidBrokerUrl(config.broker_url.clone()))?;

    let mut mqtt_options = MqttOptions::new(device_id, host, port);
    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    mqtt_options.set_clean_start(true);
    mqtt_options.set_max_packet_size(Some(MAX_INCOMING_PACKET));

    Ok(mqtt_options)
}

/// Mutual TLS from the root CA, device certificate and private key
pub fn apply_tls(options: &mut MqttOptions, credentials: &Credentials) {
    let transport = RumqttcTransport::tls(
        credentials.ca.clone(),
        Some((
            credentials.client_cert.clone(),
            credentials.client_key.clone(),
        )),
        None,
    );
    options.set_transport(transport);
}
