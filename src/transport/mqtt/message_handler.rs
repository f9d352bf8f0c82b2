//! Pure message routing and control-message parsing

use rumqttc::v5::mqttbytes::v5::{Packet, SubscribeReasonCode};
use rumqttc::v5::{mqttbytes::QoS, Event};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Telemetry is fire-and-forget
pub const TELEMETRY_QOS: QoS = QoS::AtMostOnce;

/// Control topic subscription level
pub const CONTROL_QOS: QoS = QoS::AtMostOnce;

/// Raw message delivered on a subscribed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Parsed control message; the text is absent when the payload is malformed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    pub topic: String,
    pub message: Option<String>,
}

#[derive(Deserialize)]
struct ControlPayload {
    message: Option<serde_json::Value>,
}

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Extract the `message` string; anything else degrades to `None`
    pub fn parse_control_message(inbound: &InboundMessage) -> ControlMessage {
        let message = serde_json::from_slice::<ControlPayload>(&inbound.payload)
            .ok()
            .and_then(|payload| match payload.message {
                Some(serde_json::Value::String(text)) => Some(text),
                _ => None,
            });

        if message.is_none() {
            debug!(topic = %inbound.topic, "Control payload has no message field");
        }

        ControlMessage {
            topic: inbound.topic.clone(),
            message,
        }
    }

    /// Retained messages are processed like live ones; the control topic carries no state
    pub fn should_process_message(topic: &str, expected_topic: &str) -> bool {
        if topic != expected_topic {
            debug!("Topic mismatch: expected {}, got {}", expected_topic, topic);
            return false;
        }
        true
    }

    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.to_vec(),
                    retain: publish.retain,
                },
                Packet::Disconnect(_) => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    success: Self::validate_subscription_success(&suback.return_codes).is_ok(),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    pub fn validate_subscription_success(codes: &[SubscribeReasonCode]) -> Result<(), String> {
        if codes.is_empty() {
            return Err("SubAck carried no reason codes".to_string());
        }
        if codes
            .iter()
            .all(|code| matches!(code, SubscribeReasonCode::Success(_)))
        {
            Ok(())
        } else {
            Err(format!("Subscription failed with reason codes: {codes:?}"))
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    ConnectionAcknowledged,
    MessageReceived {
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    },
    Disconnected,
    SubscriptionConfirmed { packet_id: u16, success: bool },
    /// PingResp and other housekeeping
    InfrastructureEvent(String),
    OutgoingEvent,
}

/// Hands inbound messages to the connection manager's queue
#[derive(Debug, Default)]
pub struct MessageForwarder {
    sender: Option<mpsc::Sender<InboundMessage>>,
}

impl MessageForwarder {
    pub fn new() -> Self {
        Self { sender: None }
    }

    pub fn set_sender(&mut self, sender: mpsc::Sender<InboundMessage>) {
        self.sender = Some(sender);
    }

    /// Queue without waiting; a full queue drops the message
    pub fn forward(&self, message: InboundMessage) -> Result<(), String> {
        let Some(sender) = &self.sender else {
            warn!(topic = %message.topic, "Received MQTT message but no inbound queue configured - message dropped");
            return Err("No inbound queue configured".to_string());
        };

        match sender.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(message)) => {
                warn!(topic = %message.topic, "Inbound queue full - message dropped");
                Err("Inbound queue full".to_string())
            }
            Err(TrySendError::Closed(_)) => Err("Inbound queue closed".to_string()),
        }
    }
}
