//! Testing utilities and mock implementations
//!
//! Scripted stand-ins for the sensor drivers, the clock, the indicator lines,
//! the network and the broker, so the node can be exercised without hardware
//! or a live MQTT endpoint.

pub mod mocks;

pub use mocks::*;
