//! Sensor acquisition
//!
//! A [`SensorReader`] produces one [`ReadOutcome`] per cycle. Two readers
//! exist, one per device variant:
//!
//! - [`EnvironmentalSensor`] - humidity/temperature with plausibility bounds
//! - [`AirQualitySensor`] - gas-concentration proxy behind a [`WarmupTimer`]
//!
//! Drivers for the physical parts sit behind small traits so the readers can
//! run against the Linux IIO implementations in [`iio`] or scripted test
//! doubles.

pub mod air_quality;
pub mod environmental;
pub mod iio;
pub mod warmup;

use crate::config::Variant;
use std::time::Duration;
use thiserror::Error;

pub use air_quality::{raw_to_ppm, raw_to_voltage, AirQualitySensor, ADC_MAX};
pub use environmental::{is_plausible, EnvironmentalSensor};
pub use iio::{IioAnalogInput, IioClimateSensor};
pub use warmup::{Clock, SystemClock, WarmupStatus, WarmupTimer};

/// Metric values captured in one sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Metrics {
    /// Degrees Celsius and percent relative humidity; NaN marks a driver fault
    Environmental { temperature: f32, humidity: f32 },
    /// Uncalibrated ppm proxy and the ADC count it was derived from
    AirQuality { ppm: f32, raw: u16 },
}

/// One sample, created fresh each cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub metrics: Metrics,
    /// False when the sample is a sensor fault; such readings are never evaluated
    pub valid: bool,
    /// Monotonic millisecond tick at which the sample was taken
    pub sampled_at_ms: u32,
}

impl Reading {
    /// Build an environmental reading, applying the plausibility bounds
    pub fn environmental(temperature: f32, humidity: f32, sampled_at_ms: u32) -> Self {
        Self {
            metrics: Metrics::Environmental {
                temperature,
                humidity,
            },
            valid: is_plausible(temperature, humidity),
            sampled_at_ms,
        }
    }

    /// Build a gas reading from a raw ADC count
    pub fn air_quality(raw: u16, sampled_at_ms: u32) -> Self {
        Self {
            metrics: Metrics::AirQuality {
                ppm: raw_to_ppm(raw),
                raw,
            },
            valid: true,
            sampled_at_ms,
        }
    }
}

/// Result of asking a sensor for a sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReadOutcome {
    /// A sample was taken; check [`Reading::valid`] before using it
    Sample(Reading),
    /// The sensor is still settling
    NotReady { remaining: Duration },
}

/// Acquire one reading per cycle
pub trait SensorReader: Send {
    fn variant(&self) -> Variant;

    /// Called once the node is online; readers with a warm-up start it here
    fn start_warmup(&mut self) {}

    fn read(&mut self) -> ReadOutcome;
}

/// Failure reported by a sensor driver
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Failed to read {channel}: {source}")]
    Io {
        channel: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Unparseable value on {channel}: {value:?}")]
    Parse { channel: String, value: String },
}

/// Humidity/temperature driver; a failed read returns NaN like the sensor library does
pub trait ClimateDriver: Send {
    fn read_humidity(&mut self) -> f32;

    fn read_temperature(&mut self) -> f32;
}

/// Single-channel ADC
pub trait AnalogInput: Send {
    fn read_raw(&mut self) -> Result<u16, DriverError>;
}
