//! Broker transport
//!
//! [`BrokerLink`] abstracts the secure MQTT session so the connection manager
//! and the main loop can run against [`mqtt::MqttLink`] or a scripted broker
//! in tests. Each method is one attempt; retry policy lives in
//! [`manager::ConnectionManager`].

use crate::credentials::Credentials;
use tokio::sync::mpsc;

pub mod manager;
pub mod mqtt;

pub use manager::{
    ConnectStage, ConnectionError, ConnectionManager, ControlHandler, LoggingControlHandler,
};
pub use mqtt::{InboundMessage, MqttError, MqttLink, SessionState};

/// One secure session to the broker
#[async_trait::async_trait]
pub trait BrokerLink: Send {
    /// Install device credentials for mutual TLS
    fn configure_tls(&mut self, credentials: &Credentials) -> Result<(), MqttError>;

    /// Open the session and wait for the broker's acknowledgment
    async fn connect_once(&mut self) -> Result<(), MqttError>;

    /// Subscribe and wait for the broker to accept the filter
    async fn subscribe(&mut self, topic: &str) -> Result<(), MqttError>;

    /// Queue a QoS 0 publish; it is flushed by the next [`BrokerLink::poll`]
    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), MqttError>;

    /// Pump the session for a bounded window: deliver inbound messages,
    /// answer keep-alives, flush outbound. Returns the number of events handled.
    async fn poll(&mut self) -> Result<usize, MqttError>;

    fn is_connected(&self) -> bool;

    /// Queue that inbound messages are forwarded to
    fn set_inbound_sender(&mut self, sender: mpsc::Sender<InboundMessage>);
}
