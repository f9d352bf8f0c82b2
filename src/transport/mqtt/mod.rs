//! MQTT session over mutual TLS
//!
//! Pure decisions are kept apart from I/O:
//!
//! - [`connection`] - session states, retry policy, option building
//! - [`message_handler`] - event routing and control-message parsing
//! - [`health_monitor`] - retry decisions and state transitions
//! - [`client`] - the rumqttc-backed [`MqttLink`]
//!
//! # Usage
//!
//! ```rust,no_run
//! use sensor_node::config::NodeConfig;
//! use sensor_node::credentials::{CredentialProvider, FileCredentials};
//! use sensor_node::transport::{BrokerLink, MqttLink};
//!
//! # tokio_test::block_on(async {
//! let config = NodeConfig::load_from_file("node.toml".as_ref())?;
//! let credentials = FileCredentials::new(&config.tls).load()?;
//!
//! let mut link = MqttLink::new(&config.device.id, config.mqtt.clone())?;
//! link.configure_tls(&credentials)?;
//! link.connect_once().await?;
//! link.subscribe(&config.mqtt.subscribe_topic).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

pub use client::MqttLink;
pub use connection::{configure_mqtt_options, MqttError, RetryPolicy, SessionState};
pub use health_monitor::{HealthMonitor, RetryDecision, SessionEvent};
pub use message_handler::{ControlMessage, EventRoute, InboundMessage, MessageHandler};
