//! Alert classification of readings
//!
//! Everything here is pure: the same reading and thresholds always produce the
//! same [`AlertState`] and [`IndicatorPattern`].

use crate::sensor::{Metrics, Reading};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-metric limits, fixed for the lifetime of the process
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ThresholdConfig {
    /// Temperature above this (°C) raises an alert
    #[serde(default = "default_temperature_max")]
    pub temperature_max: f32,
    /// Relative humidity above this (%) raises an alert
    #[serde(default = "default_humidity_max")]
    pub humidity_max: f32,
    /// Lower edges of the air-quality bands
    #[serde(default)]
    pub air_quality: AirQualityBands,
}

fn default_temperature_max() -> f32 {
    30.0
}

fn default_humidity_max() -> f32 {
    70.0
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            temperature_max: default_temperature_max(),
            humidity_max: default_humidity_max(),
            air_quality: AirQualityBands::default(),
        }
    }
}

impl ThresholdConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.temperature_max.is_finite() || !self.humidity_max.is_finite() {
            return Err("thresholds must be finite numbers".to_string());
        }
        self.air_quality.validate()
    }
}

/// Ascending ppm edges; below `moderate_from` is Good
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AirQualityBands {
    pub moderate_from: f32,
    pub poor_from: f32,
    pub unhealthy_from: f32,
}

impl Default for AirQualityBands {
    fn default() -> Self {
        Self {
            moderate_from: 700.0,
            poor_from: 1000.0,
            unhealthy_from: 1500.0,
        }
    }
}

impl AirQualityBands {
    pub fn validate(&self) -> Result<(), String> {
        if self.moderate_from < self.poor_from && self.poor_from < self.unhealthy_from {
            Ok(())
        } else {
            Err(format!(
                "air quality bands must be strictly ascending, got {} / {} / {}",
                self.moderate_from, self.poor_from, self.unhealthy_from
            ))
        }
    }

    /// First band whose upper edge is above `ppm`
    pub fn classify(&self, ppm: f32) -> AirQuality {
        if ppm < self.moderate_from {
            AirQuality::Good
        } else if ppm < self.poor_from {
            AirQuality::Moderate
        } else if ppm < self.unhealthy_from {
            AirQuality::Poor
        } else {
            AirQuality::Unhealthy
        }
    }
}

/// Two-level status of a single metric
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Status {
    Normal,
    Alert,
}

impl Status {
    pub fn from_exceeded(exceeded: bool) -> Self {
        if exceeded {
            Status::Alert
        } else {
            Status::Normal
        }
    }

    pub fn is_alert(self) -> bool {
        matches!(self, Status::Alert)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Normal => "Normal",
            Status::Alert => "Alert",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Qualitative bucket for the gas-concentration proxy
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum AirQuality {
    Good,
    Moderate,
    Poor,
    Unhealthy,
}

impl AirQuality {
    pub fn as_str(self) -> &'static str {
        match self {
            AirQuality::Good => "Good",
            AirQuality::Moderate => "Moderate",
            AirQuality::Poor => "Poor",
            AirQuality::Unhealthy => "Unhealthy",
        }
    }
}

impl fmt::Display for AirQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert classification of one valid reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertState {
    Environmental { temperature: Status, humidity: Status },
    AirQuality(AirQuality),
}

/// Desired state of the three indicator lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndicatorPattern {
    /// Green: everything within limits
    pub normal: bool,
    /// Red: temperature above limit
    pub temperature_high: bool,
    /// Blue: humidity above limit
    pub humidity_high: bool,
}

impl IndicatorPattern {
    pub const ALL_OFF: IndicatorPattern = IndicatorPattern {
        normal: false,
        temperature_high: false,
        humidity_high: false,
    };

    /// Indicator lines for an alert state; the gas variant drives none
    pub fn for_state(state: &AlertState) -> Option<Self> {
        match *state {
            AlertState::Environmental {
                temperature,
                humidity,
            } => {
                let temp_alert = temperature.is_alert();
                let humidity_alert = humidity.is_alert();
                Some(Self {
                    normal: !temp_alert && !humidity_alert,
                    temperature_high: temp_alert,
                    humidity_high: humidity_alert,
                })
            }
            AlertState::AirQuality(_) => None,
        }
    }
}

/// Classify a valid reading against the configured thresholds
pub fn evaluate(reading: &Reading, thresholds: &ThresholdConfig) -> AlertState {
    match reading.metrics {
        Metrics::Environmental {
            temperature,
            humidity,
        } => AlertState::Environmental {
            temperature: Status::from_exceeded(temperature > thresholds.temperature_max),
            humidity: Status::from_exceeded(humidity > thresholds.humidity_max),
        },
        Metrics::AirQuality { ppm, .. } => {
            AlertState::AirQuality(thresholds.air_quality.classify(ppm))
        }
    }
}
