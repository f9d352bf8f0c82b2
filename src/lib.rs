//! Sensor Node
//!
//! Firmware-style control loop for a networked sensor: sample a sensor,
//! validate and classify the reading, drive alert indicators, and publish
//! JSON telemetry to an MQTT broker over mutually authenticated TLS.
//!
//! # Overview
//!
//! - [`sensor`] - acquisition for the two device variants, with plausibility
//!   bounds and the gas-sensor warm-up gate
//! - [`alert`] - threshold and band classification, indicator patterns
//! - [`indicator`] - the three alert lines (sysfs LEDs or log-only)
//! - [`transport`] - staged connect with bounded retry, session service,
//!   inbound control messages
//! - [`telemetry`] - fixed-schema payloads serialized into a bounded buffer
//! - [`node`] - the cycle that ties them together
//!
//! # Quick Start
//!
//! ```rust
//! use sensor_node::alert::{evaluate, AlertState, Status, ThresholdConfig};
//! use sensor_node::sensor::Reading;
//! use sensor_node::telemetry::{encode, DEFAULT_PAYLOAD_CAPACITY};
//!
//! let reading = Reading::environmental(32.5, 65.0, 0);
//! let state = evaluate(&reading, &ThresholdConfig::default());
//! assert_eq!(
//!     state,
//!     AlertState::Environmental {
//!         temperature: Status::Alert,
//!         humidity: Status::Normal,
//!     }
//! );
//!
//! let payload = encode(&reading, &state, DEFAULT_PAYLOAD_CAPACITY).unwrap();
//! assert!(payload.starts_with(br#"{"humidity":65.0"#));
//! ```

pub mod alert;
pub mod config;
pub mod credentials;
pub mod error;
pub mod indicator;
pub mod network;
pub mod node;
pub mod observability;
pub mod sensor;
pub mod telemetry;
pub mod testing;
pub mod transport;

pub use alert::{evaluate, AirQuality, AlertState, IndicatorPattern, Status, ThresholdConfig};
pub use config::{NodeConfig, Variant};
pub use error::{NodeError, NodeResult};
pub use node::{CycleOutcome, SensorNode, SkipReason};
pub use sensor::{ReadOutcome, Reading, SensorReader};
pub use telemetry::{PublishError, Publisher};
