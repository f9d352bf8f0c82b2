//! The sensor node main loop
//!
//! [`SensorNode`] owns every piece of mutable state: the sensor reader, the
//! indicator outputs, the connection manager and the publisher. One cycle is
//! read, validate, evaluate, actuate, publish, service; [`SensorNode::run`]
//! repeats it at a fixed cadence forever.

use crate::alert::{evaluate, AlertState, IndicatorPattern, ThresholdConfig};
use crate::config::{NodeConfig, Variant};
use crate::credentials::FileCredentials;
use crate::cycle_span;
use crate::error::NodeResult;
use crate::indicator::{self, apply_pattern, IndicatorOutput};
use crate::network::{NetworkLink, ResolverNetwork};
use crate::sensor::{
    AirQualitySensor, EnvironmentalSensor, IioAnalogInput, IioClimateSensor, Metrics,
    ReadOutcome, Reading, SensorReader, SystemClock,
};
use crate::telemetry::{PublishError, Publisher};
use crate::transport::{BrokerLink, ConnectionError, ConnectionManager, MqttLink};
use std::time::Duration;
use tracing::{debug, info, warn, Instrument};

/// Why a cycle did not publish
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SkipReason {
    /// Sensor fault; indicators were forced off
    InvalidReading,
    /// Sensor still warming up
    Warming { remaining: Duration },
    /// Session not `SubscriptionActive`
    NotConnected,
    /// Encoding or transport failure; details are logged
    PublishFailed,
}

/// Result of one cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    Published { bytes: usize, state: AlertState },
    Skipped(SkipReason),
}

pub struct SensorNode<N, B> {
    sensor: Box<dyn SensorReader>,
    indicators: Box<dyn IndicatorOutput>,
    connection: ConnectionManager<N, B>,
    publisher: Publisher,
    thresholds: ThresholdConfig,
    cycle_interval: Duration,
    self_test_dwell: Option<Duration>,
    cycles: u64,
}

impl<N: NetworkLink, B: BrokerLink> SensorNode<N, B> {
    pub fn new(
        sensor: Box<dyn SensorReader>,
        indicators: Box<dyn IndicatorOutput>,
        connection: ConnectionManager<N, B>,
        publisher: Publisher,
        thresholds: ThresholdConfig,
        cycle_interval: Duration,
    ) -> Self {
        Self {
            sensor,
            indicators,
            connection,
            publisher,
            thresholds,
            cycle_interval,
            self_test_dwell: None,
            cycles: 0,
        }
    }

    /// Light each indicator for `dwell` after connecting
    pub fn with_self_test(mut self, dwell: Duration) -> Self {
        self.self_test_dwell = Some(dwell);
        self
    }

    pub fn connection(&self) -> &ConnectionManager<N, B> {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut ConnectionManager<N, B> {
        &mut self.connection
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Boot sequence: indicators off, connect, indicator self-test, then
    /// sensor warm-up.
    ///
    /// The connect error is returned after the self-test so the caller can
    /// apply its failure policy; check the session state as well.
    pub async fn start(&mut self) -> Result<(), ConnectionError> {
        self.actuate(IndicatorPattern::ALL_OFF);
        info!(variant = ?self.sensor.variant(), "Starting sensor node");

        let connected = self.connection.connect().await;
        if let Err(e) = &connected {
            warn!(error = %e, "Connect procedure failed");
        }

        if let Some(dwell) = self.self_test_dwell.filter(|_| self.drives_indicators()) {
            if let Err(e) = indicator::self_test(self.indicators.as_mut(), dwell).await {
                warn!(error = %e, "Indicator self-test failed");
            }
        }

        self.sensor.start_warmup();
        connected
    }

    /// One read-evaluate-publish cycle followed by connection service
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.cycles += 1;
        let span = cycle_span!(cycle = self.cycles);

        async {
            let outcome = self.process_reading().await;
            let dispatched = self.connection.service().await;
            if dispatched > 0 {
                debug!(dispatched, "Control messages handled");
            }
            outcome
        }
        .instrument(span)
        .await
    }

    /// Cycle forever at the configured cadence
    pub async fn run(&mut self) {
        loop {
            self.run_cycle().await;
            tokio::time::sleep(self.cycle_interval).await;
        }
    }

    async fn process_reading(&mut self) -> CycleOutcome {
        let reading = match self.sensor.read() {
            ReadOutcome::NotReady { remaining } => {
                return CycleOutcome::Skipped(SkipReason::Warming { remaining });
            }
            ReadOutcome::Sample(reading) if !reading.valid => {
                self.actuate(IndicatorPattern::ALL_OFF);
                return CycleOutcome::Skipped(SkipReason::InvalidReading);
            }
            ReadOutcome::Sample(reading) => reading,
        };

        log_reading(&reading);
        let state = evaluate(&reading, &self.thresholds);
        if let Some(pattern) = IndicatorPattern::for_state(&state) {
            self.actuate(pattern);
        }

        match self
            .publisher
            .publish(&mut self.connection, &reading, &state)
            .await
        {
            Ok(bytes) => CycleOutcome::Published { bytes, state },
            Err(PublishError::NotConnected { state: session }) => {
                debug!(session = %session, "Skipping publish, not connected");
                CycleOutcome::Skipped(SkipReason::NotConnected)
            }
            Err(e) => {
                warn!(error = %e, topic = %self.publisher.topic(), "Failed to publish telemetry");
                CycleOutcome::Skipped(SkipReason::PublishFailed)
            }
        }
    }

    /// Only the environmental variant has indicator outputs
    fn drives_indicators(&self) -> bool {
        self.sensor.variant() == Variant::Environmental
    }

    fn actuate(&mut self, pattern: IndicatorPattern) {
        if !self.drives_indicators() {
            return;
        }
        if let Err(e) = apply_pattern(self.indicators.as_mut(), pattern) {
            warn!(error = %e, "Failed to drive indicators");
        }
    }
}

impl SensorNode<ResolverNetwork, MqttLink> {
    /// Assemble a node with the Linux host drivers named in `config`
    pub fn from_config(config: &NodeConfig) -> NodeResult<Self> {
        let (host, port) = config.mqtt.broker_endpoint()?;
        let broker = MqttLink::new(&config.device.id, config.mqtt.clone())?;
        let connection = ConnectionManager::new(
            ResolverNetwork::new(host, port),
            broker,
            Box::new(FileCredentials::new(&config.tls)),
            &config.connection,
            config.mqtt.subscribe_topic.clone(),
        );

        let node = SensorNode::new(
            build_sensor(config),
            indicator::from_config(&config.indicators),
            connection,
            Publisher::new(config.publish_topic(), config.mqtt.payload_capacity),
            config.thresholds,
            Duration::from_millis(config.sensor.cycle_interval_ms),
        );

        Ok(if config.indicators.self_test {
            node.with_self_test(Duration::from_millis(config.indicators.self_test_dwell_ms))
        } else {
            node
        })
    }
}

/// Reader for the configured variant, backed by IIO sysfs drivers
pub fn build_sensor(config: &NodeConfig) -> Box<dyn SensorReader> {
    let device = &config.sensor.iio_device;
    match config.device.variant {
        Variant::Environmental => Box::new(EnvironmentalSensor::new(
            IioClimateSensor::new(device),
            SystemClock::new(),
        )),
        Variant::AirQuality => Box::new(AirQualitySensor::new(
            IioAnalogInput::new(device, config.sensor.adc_channel),
            SystemClock::new(),
            config.sensor.warmup_ms,
        )),
    }
}

fn log_reading(reading: &Reading) {
    match reading.metrics {
        Metrics::Environmental {
            temperature,
            humidity,
        } => info!(
            temperature,
            humidity,
            "Humidity: {:.1}%  Temperature: {:.1}°C",
            humidity,
            temperature
        ),
        Metrics::AirQuality { ppm, raw } => {
            info!(ppm, raw, "Air Quality: {:.1} PPM", ppm)
        }
    }
}
