//! Connection lifecycle: staged connect with bounded retry, per-tick service
//! and inbound control-message dispatch.

use super::mqtt::message_handler::ControlMessage;
use super::mqtt::{
    HealthMonitor, InboundMessage, MessageHandler, MqttError, RetryDecision, RetryPolicy,
    SessionEvent, SessionState,
};
use super::BrokerLink;
use crate::config::ConnectionSection;
use crate::credentials::{CredentialError, CredentialProvider};
use crate::mqtt_span;
use crate::network::NetworkLink;
use crate::telemetry::PublishError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Instrument};

/// Inbound messages buffered between transport polls
pub const INBOUND_QUEUE_CAPACITY: usize = 16;

/// Step of the connect procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStage {
    NetworkAssociation,
    SecureTransport,
    BrokerConnect,
    Subscription,
}

impl fmt::Display for ConnectStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectStage::NetworkAssociation => "network association",
            ConnectStage::SecureTransport => "secure transport",
            ConnectStage::BrokerConnect => "broker connect",
            ConnectStage::Subscription => "subscription",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Connection timeout: {stage} failed after {attempts} attempts")]
    ConnectionTimeout { stage: ConnectStage, attempts: u32 },
    #[error("Failed to load device credentials: {0}")]
    Credentials(#[from] CredentialError),
    #[error("Secure transport configuration failed: {0}")]
    SecureTransport(#[source] MqttError),
    #[error("Subscription to {topic} failed: {source}")]
    Subscription {
        topic: String,
        #[source]
        source: MqttError,
    },
}

impl ConnectionError {
    pub fn stage(&self) -> ConnectStage {
        match self {
            ConnectionError::ConnectionTimeout { stage, .. } => *stage,
            ConnectionError::Credentials(_) | ConnectionError::SecureTransport(_) => {
                ConnectStage::SecureTransport
            }
            ConnectionError::Subscription { .. } => ConnectStage::Subscription,
        }
    }
}

/// Receives parsed control messages
pub trait ControlHandler: Send {
    fn handle(&mut self, message: &ControlMessage);
}

/// Default handler: log topic and text
#[derive(Debug, Default)]
pub struct LoggingControlHandler;

impl ControlHandler for LoggingControlHandler {
    fn handle(&mut self, message: &ControlMessage) {
        match &message.message {
            Some(text) => {
                info!(topic = %message.topic, message = %text, "Control message received")
            }
            None => info!(topic = %message.topic, "Control message received without text"),
        }
    }
}

pub struct ConnectionManager<N, B> {
    network: N,
    broker: B,
    credentials: Box<dyn CredentialProvider>,
    network_policy: RetryPolicy,
    broker_policy: RetryPolicy,
    reconnect_on_loss: bool,
    subscribe_topic: String,
    state: SessionState,
    inbound_rx: mpsc::Receiver<InboundMessage>,
    control_handler: Box<dyn ControlHandler>,
}

impl<N: NetworkLink, B: BrokerLink> ConnectionManager<N, B> {
    pub fn new(
        network: N,
        mut broker: B,
        credentials: Box<dyn CredentialProvider>,
        connection: &ConnectionSection,
        subscribe_topic: impl Into<String>,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
        broker.set_inbound_sender(inbound_tx);

        Self {
            network,
            broker,
            credentials,
            network_policy: RetryPolicy::network(connection),
            broker_policy: RetryPolicy::broker(connection),
            reconnect_on_loss: connection.reconnect_on_loss,
            subscribe_topic: subscribe_topic.into(),
            state: SessionState::Disconnected,
            inbound_rx,
            control_handler: Box::new(LoggingControlHandler),
        }
    }

    pub fn set_control_handler(&mut self, handler: Box<dyn ControlHandler>) {
        self.control_handler = handler;
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn can_publish(&self) -> bool {
        HealthMonitor::can_publish(&self.state)
    }

    /// Run the full connect procedure. On error the session is left
    /// `Disconnected`; on success it is `SubscriptionActive`.
    pub async fn connect(&mut self) -> Result<(), ConnectionError> {
        let span = mqtt_span!(operation = "connect", topic = %self.subscribe_topic);
        self.transition(SessionEvent::ConnectStarted);

        let result = self.run_connect().instrument(span).await;
        if let Err(e) = &result {
            self.transition(SessionEvent::ConnectAbandoned(e.to_string()));
        }
        result
    }

    async fn run_connect(&mut self) -> Result<(), ConnectionError> {
        if self.network.is_associated() {
            debug!("Network still associated");
        } else {
            info!(
                max_wait_ms = ?self.network_policy.calculate_max_total_time(),
                "Associating with network"
            );
            let mut attempts = 0;
            loop {
                attempts += 1;
                match self.network.associate().await {
                    Ok(()) => break,
                    Err(e) => {
                        let stage = ConnectStage::NetworkAssociation;
                        Self::back_off(stage, attempts, &self.network_policy, &e).await?
                    }
                }
            }
            info!(attempts, "Network associated");
        }
        self.transition(SessionEvent::NetworkAssociated);

        let credentials = self.credentials.load()?;
        self.broker
            .configure_tls(&credentials)
            .map_err(ConnectionError::SecureTransport)?;
        self.transition(SessionEvent::TlsConfigured);

        info!(
            max_wait_ms = ?self.broker_policy.calculate_max_total_time(),
            "Connecting to broker"
        );
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.broker.connect_once().await {
                Ok(()) => break,
                Err(e) => {
                    let stage = ConnectStage::BrokerConnect;
                    Self::back_off(stage, attempts, &self.broker_policy, &e).await?
                }
            }
        }
        info!(attempts, "Broker connected");
        self.transition(SessionEvent::ConnAckReceived);

        self.broker
            .subscribe(&self.subscribe_topic)
            .await
            .map_err(|source| ConnectionError::Subscription {
                topic: self.subscribe_topic.clone(),
                source,
            })?;
        self.transition(SessionEvent::SubscriptionConfirmed);

        Ok(())
    }

    /// Sleep before the next attempt, or give up with `ConnectionTimeout`
    async fn back_off(
        stage: ConnectStage,
        attempts: u32,
        policy: &RetryPolicy,
        error: &(dyn std::error::Error + Send + Sync),
    ) -> Result<(), ConnectionError> {
        match HealthMonitor::should_retry(attempts, policy) {
            RetryDecision::Proceed { attempt, delay_ms } => {
                debug!(%stage, attempt, delay_ms, error = %error, "Retrying");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(())
            }
            RetryDecision::AbortMaxAttemptsExceeded => {
                warn!(%stage, attempts, error = %error, "Giving up");
                Err(ConnectionError::ConnectionTimeout { stage, attempts })
            }
        }
    }

    /// Once per tick: pump the transport, then dispatch queued control messages.
    /// Returns the number of control messages dispatched.
    pub async fn service(&mut self) -> usize {
        if self.state == SessionState::Disconnected {
            if self.reconnect_on_loss {
                if let Err(e) = self.connect().await {
                    warn!(error = %e, "Reconnect failed");
                }
            }
        } else if self.broker.is_connected() {
            if let Err(e) = self.broker.poll().await {
                self.transition(SessionEvent::ConnectionLost(e.to_string()));
            }
        } else {
            self.transition(SessionEvent::ConnectionLost(
                "transport reports disconnected".to_string(),
            ));
        }

        self.dispatch_inbound()
    }

    fn dispatch_inbound(&mut self) -> usize {
        let mut dispatched = 0;
        while let Ok(inbound) = self.inbound_rx.try_recv() {
            if !MessageHandler::should_process_message(&inbound.topic, &self.subscribe_topic) {
                continue;
            }
            let control = MessageHandler::parse_control_message(&inbound);
            self.control_handler.handle(&control);
            dispatched += 1;
        }
        dispatched
    }

    /// Queue a telemetry payload; refused unless the session is active
    pub async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        if !self.can_publish() {
            return Err(PublishError::NotConnected {
                state: self.state.clone(),
            });
        }
        self.broker
            .publish(topic, payload)
            .await
            .map_err(PublishError::Transport)
    }

    fn transition(&mut self, event: SessionEvent) {
        let next = HealthMonitor::determine_next_state(&self.state, event.clone());
        HealthMonitor::log_state_transition(&self.state, &next, &event);
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::testing::{MockBroker, MockNetwork, RecordingControlHandler, StaticCredentials};

    fn manager(
        network: MockNetwork,
        broker: MockBroker,
    ) -> ConnectionManager<MockNetwork, MockBroker> {
        let mut config = NodeConfig::test_config();
        config.connection.network_max_attempts = 3;
        config.connection.broker_max_attempts = 4;
        ConnectionManager::new(
            network,
            broker,
            Box::new(StaticCredentials::valid()),
            &config.connection,
            "esp32/sub",
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_reaches_subscription_active() {
        let broker = MockBroker::new();
        let mut manager = manager(MockNetwork::new(), broker.clone());

        manager.connect().await.unwrap();

        assert_eq!(manager.state(), &SessionState::SubscriptionActive);
        assert!(broker.tls_configured());
        assert_eq!(broker.subscriptions(), vec!["esp32/sub".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_never_associates_times_out() {
        let network = MockNetwork::never_associates();
        let broker = MockBroker::new();
        let mut manager = manager(network.clone(), broker.clone());

        let err = manager.connect().await.unwrap_err();

        assert!(matches!(
            err,
            ConnectionError::ConnectionTimeout {
                stage: ConnectStage::NetworkAssociation,
                attempts: 3
            }
        ));
        assert_eq!(network.attempts(), 3);
        assert_eq!(broker.connect_attempts(), 0);
        assert_eq!(manager.state(), &SessionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_broker_retries_then_connects() {
        let broker = MockBroker::new().fail_connects(2);
        let mut manager = manager(MockNetwork::new(), broker.clone());

        manager.connect().await.unwrap();

        assert_eq!(broker.connect_attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_broker_refusal_times_out_at_broker_stage() {
        let broker = MockBroker::new().refuse_connections();
        let mut manager = manager(MockNetwork::new(), broker.clone());

        let err = manager.connect().await.unwrap_err();

        assert_eq!(err.stage(), ConnectStage::BrokerConnect);
        assert_eq!(broker.connect_attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_credentials_fail_secure_stage() {
        let mut config = NodeConfig::test_config();
        config.connection.network_max_attempts = 1;
        let mut manager = ConnectionManager::new(
            MockNetwork::new(),
            MockBroker::new(),
            Box::new(StaticCredentials::missing()),
            &config.connection,
            "esp32/sub",
        );

        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, ConnectionError::Credentials(_)));
        assert_eq!(err.stage(), ConnectStage::SecureTransport);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_subscription_is_an_error() {
        let broker = MockBroker::new().reject_subscription();
        let mut manager = manager(MockNetwork::new(), broker);

        let err = manager.connect().await.unwrap_err();
        assert!(matches!(err, ConnectionError::Subscription { .. }));
        assert!(!manager.can_publish());
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_refused_until_active() {
        let broker = MockBroker::new();
        let mut manager = manager(MockNetwork::new(), broker.clone());

        let refused = manager.publish("esp32/pub", b"{}".to_vec()).await;
        assert!(matches!(
            refused,
            Err(PublishError::NotConnected {
                state: SessionState::Disconnected
            })
        ));

        manager.connect().await.unwrap();
        manager.publish("esp32/pub", b"{}".to_vec()).await.unwrap();
        assert_eq!(broker.published().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_dispatches_control_messages() {
        let broker = MockBroker::new();
        let handler = RecordingControlHandler::new();
        let mut manager = manager(MockNetwork::new(), broker.clone());
        manager.set_control_handler(Box::new(handler.clone()));
        manager.connect().await.unwrap();

        broker.inject("esp32/sub", br#"{"message":"hello"}"#);
        broker.inject("esp32/sub", b"garbage");
        broker.inject("esp32/other", br#"{"message":"ignored"}"#);

        assert_eq!(manager.service().await, 2);
        let received = handler.messages();
        assert_eq!(received[0].message.as_deref(), Some("hello"));
        assert_eq!(received[1].message, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_moves_to_disconnected() {
        let broker = MockBroker::new();
        let mut manager = manager(MockNetwork::new(), broker.clone());
        manager.connect().await.unwrap();

        broker.drop_connection();
        manager.service().await;

        assert_eq!(manager.state(), &SessionState::Disconnected);
        // default policy does not reconnect
        manager.service().await;
        assert_eq!(manager.state(), &SessionState::Disconnected);
        assert_eq!(broker.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_on_loss_when_enabled() {
        let mut config = NodeConfig::test_config();
        config.connection.reconnect_on_loss = true;
        let broker = MockBroker::new();
        let mut manager = ConnectionManager::new(
            MockNetwork::new(),
            broker.clone(),
            Box::new(StaticCredentials::valid()),
            &config.connection,
            "esp32/sub",
        );
        manager.connect().await.unwrap();

        broker.drop_connection();
        manager.service().await;
        assert_eq!(manager.state(), &SessionState::Disconnected);

        manager.service().await;
        assert_eq!(manager.state(), &SessionState::SubscriptionActive);
        assert_eq!(broker.connect_attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_after_failed_initial_connect() {
        let mut config = NodeConfig::test_config();
        config.connection.reconnect_on_loss = true;
        config.connection.broker_max_attempts = 2;
        let broker = MockBroker::new().fail_connects(2);
        let mut manager = ConnectionManager::new(
            MockNetwork::new(),
            broker.clone(),
            Box::new(StaticCredentials::valid()),
            &config.connection,
            "esp32/sub",
        );

        let err = manager.connect().await.unwrap_err();
        assert_eq!(err.stage(), ConnectStage::BrokerConnect);
        assert_eq!(manager.state(), &SessionState::Disconnected);

        manager.service().await;

        assert_eq!(manager.state(), &SessionState::SubscriptionActive);
        assert_eq!(broker.connect_attempts(), 3);
        assert_eq!(broker.subscriptions(), vec!["esp32/sub".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_skips_association_while_network_is_up() {
        let mut config = NodeConfig::test_config();
        config.connection.reconnect_on_loss = true;
        let network = MockNetwork::new();
        let broker = MockBroker::new();
        let mut manager = ConnectionManager::new(
            network.clone(),
            broker.clone(),
            Box::new(StaticCredentials::valid()),
            &config.connection,
            "esp32/sub",
        );
        manager.connect().await.unwrap();

        broker.drop_connection();
        manager.service().await;
        manager.service().await;

        assert_eq!(manager.state(), &SessionState::SubscriptionActive);
        assert_eq!(network.attempts(), 1);
        assert_eq!(broker.connect_attempts(), 2);
    }
}
