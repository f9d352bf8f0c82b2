//! Telemetry payloads and the bounded publisher
//!
//! Payload schemas are fixed; field names and order are what downstream
//! consumers already parse:
//!
//! ```json
//! {"humidity":65.0,"temperature":32.5,"temperatureStatus":"Alert","humidityStatus":"Normal"}
//! {"airQualityPPM":412.3,"airQualityStatus":"Good"}
//! ```

use crate::alert::{AirQuality, AlertState, Status};
use crate::network::NetworkLink;
use crate::sensor::{Metrics, Reading};
use crate::transport::{BrokerLink, ConnectionManager, MqttError, SessionState};
use serde::Serialize;
use std::io;
use thiserror::Error;
use tracing::debug;

/// Default payload buffer capacity in bytes
pub const DEFAULT_PAYLOAD_CAPACITY: usize = 512;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Not connected - current state: {state}")]
    NotConnected { state: SessionState },
    #[error("Payload needs {required} bytes but capacity is {capacity}")]
    PayloadOverflow { required: usize, capacity: usize },
    #[error("Serialization error: {0}")]
    Serialization(#[source] serde_json::Error),
    #[error("Reading and alert state belong to different device variants")]
    VariantMismatch,
    #[error("Transport error: {0}")]
    Transport(#[source] MqttError),
}

#[derive(Debug, Serialize)]
pub struct EnvironmentalPayload {
    pub humidity: f32,
    pub temperature: f32,
    #[serde(rename = "temperatureStatus")]
    pub temperature_status: Status,
    #[serde(rename = "humidityStatus")]
    pub humidity_status: Status,
}

#[derive(Debug, Serialize)]
pub struct AirQualityPayload {
    #[serde(rename = "airQualityPPM")]
    pub air_quality_ppm: f32,
    #[serde(rename = "airQualityStatus")]
    pub air_quality_status: AirQuality,
}

/// `io::Write` sink that refuses to grow past its capacity
#[derive(Debug)]
pub struct BoundedWriter {
    buf: Vec<u8>,
    capacity: usize,
    /// Bytes the serializer tried to write in total
    attempted: usize,
}

impl BoundedWriter {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
            attempted: 0,
        }
    }

    pub fn overflowed(&self) -> bool {
        self.attempted > self.capacity
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

impl io::Write for BoundedWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.attempted += data.len();
        if self.attempted > self.capacity {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "payload buffer capacity exceeded",
            ));
        }
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn write_bounded<T: Serialize>(value: &T, capacity: usize) -> Result<Vec<u8>, PublishError> {
    let mut writer = BoundedWriter::new(capacity);
    match serde_json::to_writer(&mut writer, value) {
        Ok(()) => Ok(writer.into_inner()),
        Err(e) if writer.overflowed() => {
            // report the size the payload would have needed
            let required = serde_json::to_vec(value)
                .map(|full| full.len())
                .map_err(PublishError::Serialization)?;
            debug!(required, capacity, error = %e, "Payload overflow");
            Err(PublishError::PayloadOverflow { required, capacity })
        }
        Err(e) => Err(PublishError::Serialization(e)),
    }
}

/// Serialize the payload for a reading and its alert state into at most `capacity` bytes
pub fn encode(
    reading: &Reading,
    state: &AlertState,
    capacity: usize,
) -> Result<Vec<u8>, PublishError> {
    match (reading.metrics, *state) {
        (
            Metrics::Environmental {
                temperature,
                humidity,
            },
            AlertState::Environmental {
                temperature: temperature_status,
                humidity: humidity_status,
            },
        ) => write_bounded(
            &EnvironmentalPayload {
                humidity,
                temperature,
                temperature_status,
                humidity_status,
            },
            capacity,
        ),
        (Metrics::AirQuality { ppm, .. }, AlertState::AirQuality(band)) => write_bounded(
            &AirQualityPayload {
                air_quality_ppm: ppm,
                air_quality_status: band,
            },
            capacity,
        ),
        _ => Err(PublishError::VariantMismatch),
    }
}

/// Emits telemetry on the outbound topic
#[derive(Debug, Clone)]
pub struct Publisher {
    topic: String,
    capacity: usize,
}

impl Publisher {
    pub fn new(topic: impl Into<String>, capacity: usize) -> Self {
        Self {
            topic: topic.into(),
            capacity,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish at QoS 0; returns the payload size. Nothing is sent on any error.
    pub async fn publish<N: NetworkLink, B: BrokerLink>(
        &self,
        connection: &mut ConnectionManager<N, B>,
        reading: &Reading,
        state: &AlertState,
    ) -> Result<usize, PublishError> {
        if !connection.can_publish() {
            return Err(PublishError::NotConnected {
                state: connection.state().clone(),
            });
        }

        let payload = encode(reading, state, self.capacity)?;
        let size = payload.len();
        connection.publish(&self.topic, payload).await?;
        debug!(topic = %self.topic, bytes = size, "Telemetry published");
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{evaluate, ThresholdConfig};
    use serde_json::Value;

    #[test]
    fn test_environmental_payload_field_order() {
        let reading = Reading::environmental(32.5, 65.0, 0);
        let state = evaluate(&reading, &ThresholdConfig::default());

        let payload = encode(&reading, &state, DEFAULT_PAYLOAD_CAPACITY).unwrap();
        let text = String::from_utf8(payload).unwrap();

        assert_eq!(
            text,
            r#"{"humidity":65.0,"temperature":32.5,"temperatureStatus":"Alert","humidityStatus":"Normal"}"#
        );
    }

    #[test]
    fn test_air_quality_payload() {
        // 1200 counts is roughly 967 ppm
        let reading = Reading::air_quality(1200, 0);
        let state = evaluate(&reading, &ThresholdConfig::default());

        let payload = encode(&reading, &state, DEFAULT_PAYLOAD_CAPACITY).unwrap();
        let json: Value = serde_json::from_slice(&payload).unwrap();

        assert_eq!(json["airQualityStatus"], "Moderate");
        let ppm = json["airQualityPPM"].as_f64().unwrap();
        assert!((ppm - 967.03).abs() < 0.1, "ppm {ppm}");
        let keys: Vec<&String> = json.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_overflow_reports_required_size() {
        let reading = Reading::environmental(21.0, 40.0, 0);
        let state = evaluate(&reading, &ThresholdConfig::default());
        let full = encode(&reading, &state, DEFAULT_PAYLOAD_CAPACITY).unwrap();

        let err = encode(&reading, &state, 16).unwrap_err();
        match err {
            PublishError::PayloadOverflow { required, capacity } => {
                assert_eq!(required, full.len());
                assert_eq!(capacity, 16);
            }
            other => panic!("expected overflow, got {other:?}"),
        }
    }

    #[test]
    fn test_exact_capacity_fits() {
        let reading = Reading::environmental(21.0, 40.0, 0);
        let state = evaluate(&reading, &ThresholdConfig::default());
        let full = encode(&reading, &state, DEFAULT_PAYLOAD_CAPACITY).unwrap();

        assert_eq!(encode(&reading, &state, full.len()).unwrap(), full);
    }

    #[test]
    fn test_variant_mismatch_rejected() {
        let reading = Reading::environmental(21.0, 40.0, 0);
        let state = AlertState::AirQuality(AirQuality::Good);
        assert!(matches!(
            encode(&reading, &state, DEFAULT_PAYLOAD_CAPACITY),
            Err(PublishError::VariantMismatch)
        ));
    }

    #[test]
    fn test_bounded_writer_counts_attempted_bytes() {
        use std::io::Write;
        let mut writer = BoundedWriter::new(4);
        assert!(writer.write_all(b"abc").is_ok());
        assert!(writer.write_all(b"de").is_err());
        assert!(writer.overflowed());
        assert_eq!(writer.into_inner(), b"abc");
    }
}
