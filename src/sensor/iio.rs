//! Linux Industrial I/O (sysfs) drivers
//!
//! The kernel `dht11` driver (which also handles DHT22 parts) exposes
//! `in_temp_input` in milli-degrees Celsius and `in_humidityrelative_input` in
//! milli-percent. ADC drivers expose `in_voltage{N}_raw` as an integer count.

use super::{AnalogInput, ClimateDriver, DriverError};
use std::path::{Path, PathBuf};
use tracing::debug;

fn read_channel(path: &Path) -> Result<i64, DriverError> {
    let channel = path.display().to_string();
    let text = std::fs::read_to_string(path).map_err(|source| DriverError::Io {
        channel: channel.clone(),
        source,
    })?;
    let trimmed = text.trim();
    trimmed.parse::<i64>().map_err(|_| DriverError::Parse {
        channel,
        value: trimmed.to_string(),
    })
}

/// Temperature and humidity from an IIO device directory
#[derive(Debug, Clone)]
pub struct IioClimateSensor {
    temperature_path: PathBuf,
    humidity_path: PathBuf,
}

impl IioClimateSensor {
    pub fn new(device_dir: impl AsRef<Path>) -> Self {
        let dir = device_dir.as_ref();
        Self {
            temperature_path: dir.join("in_temp_input"),
            humidity_path: dir.join("in_humidityrelative_input"),
        }
    }

    fn read_milli(path: &Path) -> f32 {
        match read_channel(path) {
            Ok(milli) => milli as f32 / 1000.0,
            Err(e) => {
                // the dht11 driver returns EIO on checksum or timing failures
                debug!(error = %e, "Climate channel read failed");
                f32::NAN
            }
        }
    }
}

impl ClimateDriver for IioClimateSensor {
    fn read_humidity(&mut self) -> f32 {
        Self::read_milli(&self.humidity_path)
    }

    fn read_temperature(&mut self) -> f32 {
        Self::read_milli(&self.temperature_path)
    }
}

/// One ADC channel of an IIO device
#[derive(Debug, Clone)]
pub struct IioAnalogInput {
    raw_path: PathBuf,
}

impl IioAnalogInput {
    pub fn new(device_dir: impl AsRef<Path>, channel: u8) -> Self {
        Self {
            raw_path: device_dir
                .as_ref()
                .join(format!("in_voltage{channel}_raw")),
        }
    }
}

impl AnalogInput for IioAnalogInput {
    fn read_raw(&mut self) -> Result<u16, DriverError> {
        let value = read_channel(&self.raw_path)?;
        // negative counts do not occur on unipolar ADCs; clamp rather than fail
        Ok(value.clamp(0, i64::from(u16::MAX)) as u16)
    }
}
