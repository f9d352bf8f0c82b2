//! Gas-concentration proxy reader
//!
//! The ppm figure is an uncalibrated linear approximation of the sensor
//! voltage. It is kept bit-for-bit compatible with the deployed firmware so
//! dashboards keep lining up; do not read it as a calibrated quantity.

use super::warmup::{Clock, WarmupStatus, WarmupTimer};
use super::{AnalogInput, ReadOutcome, Reading, SensorReader};
use crate::config::Variant;
use std::time::Duration;
use tracing::{info, warn};

/// Full-scale count of the 12-bit ADC
pub const ADC_MAX: u16 = 4095;

/// ADC reference voltage
pub const ADC_REFERENCE_VOLTS: f64 = 3.3;

/// Sensor voltage for a raw ADC count
pub fn raw_to_voltage(raw: u16) -> f32 {
    // computed in double precision, stored single
    (f64::from(raw) * (ADC_REFERENCE_VOLTS / f64::from(ADC_MAX))) as f32
}

/// ppm proxy for a raw ADC count
pub fn raw_to_ppm(raw: u16) -> f32 {
    let voltage = raw_to_voltage(raw);
    (10.0 * (f64::from(voltage) * 100.0)) as f32
}

pub struct AirQualitySensor<A, C> {
    adc: A,
    clock: C,
    warmup: WarmupTimer,
}

impl<A: AnalogInput, C: Clock> AirQualitySensor<A, C> {
    /// The warm-up counts from the clock's current tick until
    /// [`SensorReader::start_warmup`] restarts it
    pub fn new(adc: A, clock: C, warmup_ms: u32) -> Self {
        let warmup = WarmupTimer::new(clock.now_ms(), warmup_ms);
        Self { adc, clock, warmup }
    }

    pub fn is_ready(&self) -> bool {
        self.warmup.is_ready()
    }

    fn sample(&mut self, now: u32) -> Reading {
        match self.adc.read_raw() {
            Ok(raw) => Reading::air_quality(raw.min(ADC_MAX), now),
            Err(e) => {
                warn!(error = %e, "Failed to read from gas sensor");
                Reading {
                    valid: false,
                    ..Reading::air_quality(0, now)
                }
            }
        }
    }
}

impl<A: AnalogInput, C: Clock> SensorReader for AirQualitySensor<A, C> {
    fn variant(&self) -> Variant {
        Variant::AirQuality
    }

    fn start_warmup(&mut self) {
        self.warmup.restart(self.clock.now_ms());
        info!(
            warmup_ms = self.warmup.duration_ms(),
            "Air quality sensor warming up"
        );
    }

    fn read(&mut self) -> ReadOutcome {
        let now = self.clock.now_ms();
        match self.warmup.poll(now) {
            WarmupStatus::Warming { remaining_ms } => {
                info!(
                    remaining_secs = remaining_ms / 1000,
                    "Warming up: {} seconds remaining",
                    remaining_ms / 1000
                );
                ReadOutcome::NotReady {
                    remaining: Duration::from_millis(u64::from(remaining_ms)),
                }
            }
            WarmupStatus::BecameReady => {
                info!("Air quality sensor ready");
                ReadOutcome::Sample(self.sample(now))
            }
            WarmupStatus::Ready => ReadOutcome::Sample(self.sample(now)),
        }
    }
}
