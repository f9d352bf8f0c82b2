//! rumqttc-backed broker link
//!
//! The event loop is never spawned. It is polled inline by
//! [`BrokerLink::connect_once`], [`BrokerLink::subscribe`] and
//! [`BrokerLink::poll`], which keeps the whole node on one cooperative task.

use super::connection::{apply_tls, configure_mqtt_options, MqttError};
use super::message_handler::{
    EventRoute, InboundMessage, MessageForwarder, MessageHandler, CONTROL_QOS, TELEMETRY_QOS,
};
use crate::config::MqttSection;
use crate::credentials::Credentials;
use crate::transport::BrokerLink;
use async_trait::async_trait;
use rumqttc::v5::{AsyncClient, EventLoop, MqttOptions};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Requests buffered between the client handle and the event loop
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Upper bound on events handled by one `poll`
const MAX_EVENTS_PER_POLL: usize = 64;

pub struct MqttLink {
    device_id: String,
    config: MqttSection,
    options: MqttOptions,
    tls_configured: bool,
    client: Option<AsyncClient>,
    event_loop: Option<EventLoop>,
    connected: bool,
    forwarder: MessageForwarder,
}

impl MqttLink {
    pub fn new(device_id: &str, config: MqttSection) -> Result<Self, MqttError> {
        let options = configure_mqtt_options(device_id, &config)?;

        Ok(Self {
            device_id: device_id.to_string(),
            config,
            options,
            tls_configured: false,
            client: None,
            event_loop: None,
            connected: false,
            forwarder: MessageForwarder::new(),
        })
    }

    /// Poll the event loop once, giving up at `deadline`
    async fn next_event(&mut self, deadline: Instant) -> Result<Option<EventRoute>, MqttError> {
        let polled = {
            let event_loop = self.event_loop.as_mut().ok_or(MqttError::NotConnected)?;
            tokio::time::timeout_at(deadline, event_loop.poll()).await
        };

        match polled {
            Err(_) => Ok(None),
            Ok(Ok(event)) => Ok(Some(MessageHandler::route_mqtt_event(&event))),
            Ok(Err(e)) => {
                self.connected = false;
                Err(MqttError::ConnectionFailed(Box::new(e)))
            }
        }
    }

    /// Handle a route that is not the one the caller is waiting for
    fn dispatch(&mut self, route: EventRoute) -> Result<(), MqttError> {
        match route {
            EventRoute::MessageReceived { topic, payload, .. } => {
                debug!(topic = %topic, bytes = payload.len(), "Inbound message");
                // dropped messages are logged by the forwarder
                let _ = self.forwarder.forward(InboundMessage { topic, payload });
                Ok(())
            }
            EventRoute::Disconnected => {
                self.connected = false;
                Err(MqttError::ConnectionFailedStr(
                    "Broker sent DISCONNECT".to_string(),
                ))
            }
            EventRoute::ConnectionAcknowledged => {
                self.connected = true;
                Ok(())
            }
            EventRoute::SubscriptionConfirmed { packet_id, success } => {
                debug!(packet_id, success, "Unsolicited SubAck");
                Ok(())
            }
            EventRoute::InfrastructureEvent(packet) => {
                debug!(packet = %packet, "MQTT housekeeping");
                Ok(())
            }
            EventRoute::OutgoingEvent => Ok(()),
        }
    }

    fn response_deadline(&self) -> Instant {
        Instant::now() + Duration::from_millis(self.config.connect_timeout_ms)
    }
}

#[async_trait]
impl BrokerLink for MqttLink {
    fn configure_tls(&mut self, credentials: &Credentials) -> Result<(), MqttError> {
        apply_tls(&mut self.options, credentials);
        self.tls_configured = true;
        Ok(())
    }

    async fn connect_once(&mut self) -> Result<(), MqttError> {
        if !self.tls_configured {
            return Err(MqttError::TlsNotConfigured);
        }

        // fresh session per attempt
        let (client, event_loop) = AsyncClient::new(self.options.clone(), REQUEST_CHANNEL_CAPACITY);
        self.client = Some(client);
        self.event_loop = Some(event_loop);
        self.connected = false;

        let deadline = self.response_deadline();
        loop {
            match self.next_event(deadline).await? {
                None => {
                    return Err(MqttError::ConnectionFailedStr(
                        "ConnAck timeout - no connection confirmation received".to_string(),
                    ));
                }
                Some(EventRoute::ConnectionAcknowledged) => {
                    self.connected = true;
                    info!(client_id = %self.device_id, "Broker acknowledged connection");
                    return Ok(());
                }
                Some(route) => self.dispatch(route)?,
            }
        }
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), MqttError> {
        let client = self
            .client
            .as_ref()
            .filter(|_| self.connected)
            .ok_or(MqttError::NotConnected)?;

        client
            .try_subscribe(topic, CONTROL_QOS)
            .map_err(|e| MqttError::SubscriptionFailed(Box::new(e)))?;

        let deadline = self.response_deadline();
        loop {
            match self.next_event(deadline).await? {
                None => {
                    return Err(MqttError::SubscriptionFailed(
                        format!("SubAck timeout for {topic}").into(),
                    ));
                }
                Some(EventRoute::SubscriptionConfirmed { success: true, .. }) => {
                    info!(topic = %topic, "Subscribed");
                    return Ok(());
                }
                Some(EventRoute::SubscriptionConfirmed { success: false, .. }) => {
                    return Err(MqttError::SubscriptionRejected {
                        topic: topic.to_string(),
                    });
                }
                Some(route) => self.dispatch(route)?,
            }
        }
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), MqttError> {
        let client = self
            .client
            .as_ref()
            .filter(|_| self.connected)
            .ok_or(MqttError::NotConnected)?;

        // never await here: the event loop is only drained by poll()
        client
            .try_publish(topic, TELEMETRY_QOS, false, payload)
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))
    }

    async fn poll(&mut self) -> Result<usize, MqttError> {
        if self.event_loop.is_none() {
            return Err(MqttError::NotConnected);
        }

        let deadline = Instant::now() + Duration::from_millis(self.config.service_window_ms);
        let mut handled = 0;
        while handled < MAX_EVENTS_PER_POLL {
            match self.next_event(deadline).await {
                Ok(None) => break,
                Ok(Some(route)) => {
                    self.dispatch(route)?;
                    handled += 1;
                }
                Err(e) => {
                    warn!(error = %e, "MQTT event loop error");
                    return Err(e);
                }
            }
        }
        Ok(handled)
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn set_inbound_sender(&mut self, sender: mpsc::Sender<InboundMessage>) {
        self.forwarder.set_sender(sender);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;

    fn bogus_credentials() -> Credentials {
        Credentials {
            ca: b"not a certificate".to_vec(),
            client_cert: b"not a certificate".to_vec(),
            client_key: b"not a key".to_vec(),
        }
    }

    #[test]
    fn test_new_link_is_disconnected() {
        let config = NodeConfig::test_config();
        let link = MqttLink::new("test-node", config.mqtt).unwrap();
        assert!(!link.is_connected());
    }

    #[tokio::test]
    async fn test_connect_requires_tls() {
        let config = NodeConfig::test_config();
        let mut link = MqttLink::new("test-node", config.mqtt).unwrap();

        let result = link.connect_once().await;
        assert!(matches!(result, Err(MqttError::TlsNotConfigured)));
    }

    #[tokio::test]
    async fn test_operations_fail_without_connection() {
        let config = NodeConfig::test_config();
        let mut link = MqttLink::new("test-node", config.mqtt).unwrap();

        assert!(matches!(
            link.publish("esp32/pub", b"{}".to_vec()).await,
            Err(MqttError::NotConnected)
        ));
        assert!(matches!(
            link.subscribe("esp32/sub").await,
            Err(MqttError::NotConnected)
        ));
        assert!(matches!(link.poll().await, Err(MqttError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_broker_fails() {
        let mut config = NodeConfig::test_config();
        config.mqtt.broker_url = "mqtts://127.0.0.1:1".to_string();
        config.mqtt.connect_timeout_ms = 2000;
        let mut link = MqttLink::new("test-node", config.mqtt).unwrap();
        link.configure_tls(&bogus_credentials()).unwrap();

        assert!(link.connect_once().await.is_err());
        assert!(!link.is_connected());
    }
}
