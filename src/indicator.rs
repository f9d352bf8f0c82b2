//! Visual indicator outputs
//!
//! Three binary lines: normal (green), temperature-high (red) and
//! humidity-high (blue). On Linux hosts they map to LED class devices under
//! `/sys/class/leds/*/brightness`; without configured paths the node logs the
//! pattern instead.

use crate::alert::IndicatorPattern;
use crate::config::IndicatorSection;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// One indicator line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndicatorLine {
    Normal,
    TemperatureHigh,
    HumidityHigh,
}

impl IndicatorLine {
    /// Order of the startup self-test
    pub const SELF_TEST_ORDER: [IndicatorLine; 3] = [
        IndicatorLine::Normal,
        IndicatorLine::TemperatureHigh,
        IndicatorLine::HumidityHigh,
    ];

    pub fn color(self) -> &'static str {
        match self {
            IndicatorLine::Normal => "green",
            IndicatorLine::TemperatureHigh => "red",
            IndicatorLine::HumidityHigh => "blue",
        }
    }
}

impl fmt::Display for IndicatorLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.color())
    }
}

#[derive(Debug, Error)]
pub enum IndicatorError {
    #[error("Failed to drive {line} indicator at {path}: {source}")]
    Write {
        line: IndicatorLine,
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Binary output lines driven by the node
pub trait IndicatorOutput: Send {
    fn set(&mut self, line: IndicatorLine, on: bool) -> Result<(), IndicatorError>;
}

/// Drive all three lines to match `pattern`
pub fn apply_pattern(
    output: &mut dyn IndicatorOutput,
    pattern: IndicatorPattern,
) -> Result<(), IndicatorError> {
    output.set(IndicatorLine::Normal, pattern.normal)?;
    output.set(IndicatorLine::TemperatureHigh, pattern.temperature_high)?;
    output.set(IndicatorLine::HumidityHigh, pattern.humidity_high)?;
    Ok(())
}

/// Light each line alone for `dwell`, then switch everything off
pub async fn self_test(
    output: &mut dyn IndicatorOutput,
    dwell: Duration,
) -> Result<(), IndicatorError> {
    info!("Running indicator self-test");
    for line in IndicatorLine::SELF_TEST_ORDER {
        output.set(line, true)?;
        tokio::time::sleep(dwell).await;
        output.set(line, false)?;
    }
    apply_pattern(output, IndicatorPattern::ALL_OFF)
}

/// LED class devices written through sysfs
#[derive(Debug, Clone)]
pub struct SysfsLeds {
    normal: PathBuf,
    temperature_high: PathBuf,
    humidity_high: PathBuf,
}

impl SysfsLeds {
    pub fn new(normal: PathBuf, temperature_high: PathBuf, humidity_high: PathBuf) -> Self {
        Self {
            normal,
            temperature_high,
            humidity_high,
        }
    }

    fn path(&self, line: IndicatorLine) -> &PathBuf {
        match line {
            IndicatorLine::Normal => &self.normal,
            IndicatorLine::TemperatureHigh => &self.temperature_high,
            IndicatorLine::HumidityHigh => &self.humidity_high,
        }
    }
}

impl IndicatorOutput for SysfsLeds {
    fn set(&mut self, line: IndicatorLine, on: bool) -> Result<(), IndicatorError> {
        let path = self.path(line);
        std::fs::write(path, if on { "1" } else { "0" }).map_err(|source| {
            IndicatorError::Write {
                line,
                path: path.display().to_string(),
                source,
            }
        })
    }
}

/// Fallback output that only logs changes
#[derive(Debug, Default)]
pub struct LoggingIndicators {
    state: IndicatorPattern,
}

impl LoggingIndicators {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IndicatorOutput for LoggingIndicators {
    fn set(&mut self, line: IndicatorLine, on: bool) -> Result<(), IndicatorError> {
        let slot = match line {
            IndicatorLine::Normal => &mut self.state.normal,
            IndicatorLine::TemperatureHigh => &mut self.state.temperature_high,
            IndicatorLine::HumidityHigh => &mut self.state.humidity_high,
        };
        if *slot != on {
            debug!(indicator = %line, on, "Indicator changed");
        }
        *slot = on;
        Ok(())
    }
}

/// Build the configured output; all three paths or none
pub fn from_config(config: &IndicatorSection) -> Box<dyn IndicatorOutput> {
    match (
        &config.normal_path,
        &config.temperature_path,
        &config.humidity_path,
    ) {
        (Some(normal), Some(temperature), Some(humidity)) => Box::new(SysfsLeds::new(
            normal.clone(),
            temperature.clone(),
            humidity.clone(),
        )),
        (None, None, None) => {
            info!("No indicator paths configured, logging indicator changes");
            Box::new(LoggingIndicators::new())
        }
        _ => {
            warn!("Incomplete indicator configuration, logging indicator changes");
            Box::new(LoggingIndicators::new())
        }
    }
}
