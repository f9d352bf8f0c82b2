//! Telemetry encoding tests
//!
//! Payload shape is a contract with downstream consumers, so these assert on
//! exact key names and order rather than on a parsed value alone.

use sensor_node::alert::{evaluate, AlertState, ThresholdConfig};
use sensor_node::sensor::{raw_to_ppm, Reading, ADC_MAX};
use sensor_node::telemetry::{encode, PublishError, DEFAULT_PAYLOAD_CAPACITY};
use serde_json::Value;

fn encode_default(reading: &Reading) -> Result<Vec<u8>, PublishError> {
    let state = evaluate(reading, &ThresholdConfig::default());
    encode(reading, &state, DEFAULT_PAYLOAD_CAPACITY)
}

#[test]
fn test_environmental_keys_in_order() {
    let payload = encode_default(&Reading::environmental(24.3, 41.7, 0)).unwrap();
    let text = String::from_utf8(payload).unwrap();

    let positions: Vec<usize> = [
        "\"humidity\"",
        "\"temperature\"",
        "\"temperatureStatus\"",
        "\"humidityStatus\"",
    ]
    .iter()
    .map(|key| text.find(key).unwrap())
    .collect();
    assert!(positions.windows(2).all(|pair| pair[0] < pair[1]), "{text}");
    assert!(text.contains("\"temperatureStatus\":\"Normal\""));
}

#[test]
fn test_air_quality_full_scale_is_unhealthy() {
    let reading = Reading::air_quality(ADC_MAX, 0);
    let payload = encode_default(&reading).unwrap();
    let json: Value = serde_json::from_slice(&payload).unwrap();

    assert_eq!(json["airQualityStatus"], "Unhealthy");
    let ppm = json["airQualityPPM"].as_f64().unwrap();
    assert!((ppm - 3300.0).abs() < 0.01, "ppm {ppm}");
}

#[test]
fn test_ppm_conversion_is_monotonic() {
    let samples: Vec<f32> = (0..=ADC_MAX).step_by(256).map(raw_to_ppm).collect();
    assert_eq!(samples[0], 0.0);
    assert!(samples.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn test_payload_that_does_not_fit_is_not_truncated() {
    let reading = Reading::environmental(24.3, 41.7, 0);
    let state = evaluate(&reading, &ThresholdConfig::default());

    for capacity in [0, 1, 32, 64] {
        let err = encode(&reading, &state, capacity).unwrap_err();
        assert!(
            matches!(err, PublishError::PayloadOverflow { capacity: c, .. } if c == capacity),
            "capacity {capacity}: {err:?}"
        );
    }
}

#[test]
fn test_mismatched_state_is_rejected() {
    let reading = Reading::air_quality(900, 0);
    let state = AlertState::Environmental {
        temperature: sensor_node::alert::Status::Normal,
        humidity: sensor_node::alert::Status::Normal,
    };

    assert!(matches!(
        encode(&reading, &state, DEFAULT_PAYLOAD_CAPACITY),
        Err(PublishError::VariantMismatch)
    ));
}
