//! Temperature/humidity reader

use super::{ClimateDriver, ReadOutcome, Reading, SensorReader};
use crate::config::Variant;
use crate::sensor::warmup::Clock;
use std::ops::RangeInclusive;
use tracing::warn;

/// Physically plausible relative humidity, percent
pub const HUMIDITY_RANGE: RangeInclusive<f32> = 0.0..=100.0;

/// Operating range of the sensor, degrees Celsius
pub const TEMPERATURE_RANGE: RangeInclusive<f32> = -40.0..=80.0;

/// True when neither value is the fault sentinel and both are in range
pub fn is_plausible(temperature: f32, humidity: f32) -> bool {
    !temperature.is_nan()
        && !humidity.is_nan()
        && HUMIDITY_RANGE.contains(&humidity)
        && TEMPERATURE_RANGE.contains(&temperature)
}

pub struct EnvironmentalSensor<D, C> {
    driver: D,
    clock: C,
}

impl<D: ClimateDriver, C: Clock> EnvironmentalSensor<D, C> {
    pub fn new(driver: D, clock: C) -> Self {
        Self { driver, clock }
    }
}

impl<D: ClimateDriver, C: Clock> SensorReader for EnvironmentalSensor<D, C> {
    fn variant(&self) -> Variant {
        Variant::Environmental
    }

    fn read(&mut self) -> ReadOutcome {
        let humidity = self.driver.read_humidity();
        let temperature = self.driver.read_temperature();
        let reading = Reading::environmental(temperature, humidity, self.clock.now_ms());

        if !reading.valid {
            warn!(
                temperature = %temperature,
                humidity = %humidity,
                "Failed to read from climate sensor"
            );
        }

        ReadOutcome::Sample(reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::Metrics;
    use crate::testing::{ManualClock, ScriptedClimateDriver};
    use proptest::prelude::*;

    #[test]
    fn test_plausible_bounds_are_inclusive() {
        assert!(is_plausible(-40.0, 0.0));
        assert!(is_plausible(80.0, 100.0));
        assert!(!is_plausible(-40.1, 50.0));
        assert!(!is_plausible(80.1, 50.0));
        assert!(!is_plausible(20.0, 100.1));
        assert!(!is_plausible(20.0, -0.1));
    }

    #[test]
    fn test_nan_is_a_fault() {
        assert!(!is_plausible(f32::NAN, 50.0));
        assert!(!is_plausible(20.0, f32::NAN));
    }

    #[test]
    fn test_read_returns_sample_with_values() {
        let driver = ScriptedClimateDriver::new(vec![(32.5, 65.0)]);
        let clock = ManualClock::new(1234);
        let mut sensor = EnvironmentalSensor::new(driver, clock);

        match sensor.read() {
            ReadOutcome::Sample(reading) => {
                assert!(reading.valid);
                assert_eq!(reading.sampled_at_ms, 1234);
                assert_eq!(
                    reading.metrics,
                    Metrics::Environmental {
                        temperature: 32.5,
                        humidity: 65.0
                    }
                );
            }
            other => panic!("expected sample, got {other:?}"),
        }
    }

    #[test]
    fn test_out_of_range_reading_marked_invalid() {
        let driver = ScriptedClimateDriver::new(vec![(95.0, 40.0)]);
        let mut sensor = EnvironmentalSensor::new(driver, ManualClock::new(0));

        let ReadOutcome::Sample(reading) = sensor.read() else {
            panic!("environmental sensor never reports NotReady");
        };
        assert!(!reading.valid);
    }

    proptest! {
        #[test]
        fn out_of_bounds_humidity_is_invalid(t in -40.0f32..=80.0, h in prop_oneof![-1000.0f32..-0.001, 100.001f32..1000.0]) {
            prop_assert!(!Reading::environmental(t, h, 0).valid);
        }

        #[test]
        fn out_of_bounds_temperature_is_invalid(t in prop_oneof![-1000.0f32..-40.001, 80.001f32..1000.0], h in 0.0f32..=100.0) {
            prop_assert!(!Reading::environmental(t, h, 0).valid);
        }

        #[test]
        fn in_bounds_reading_is_valid(t in -40.0f32..=80.0, h in 0.0f32..=100.0) {
            prop_assert!(Reading::environmental(t, h, 0).valid);
        }
    }
}
