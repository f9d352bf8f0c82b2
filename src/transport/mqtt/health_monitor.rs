//! Pure retry decisions and session state transitions

use super::connection::{RetryPolicy, SessionState};
use tracing::{error, info, warn};

/// Pure retry and session-state decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Decide whether to try again after `attempts_made` failed attempts
    pub fn should_retry(attempts_made: u32, policy: &RetryPolicy) -> RetryDecision {
        if let Some(max_attempts) = policy.max_attempts {
            if attempts_made >= max_attempts {
                return RetryDecision::AbortMaxAttemptsExceeded;
            }
        }

        RetryDecision::Proceed {
            attempt: attempts_made + 1,
            delay_ms: policy.calculate_backoff_delay(attempts_made),
        }
    }

    /// Next session state after an event
    pub fn determine_next_state(current: &SessionState, event: SessionEvent) -> SessionState {
        match event {
            SessionEvent::ConnectStarted => SessionState::Associating,
            SessionEvent::NetworkAssociated => SessionState::SecureHandshake,
            SessionEvent::TlsConfigured => SessionState::BrokerConnecting,
            SessionEvent::ConnAckReceived => SessionState::BrokerConnecting,
            SessionEvent::SubscriptionConfirmed => {
                if matches!(current, SessionState::BrokerConnecting) {
                    SessionState::SubscriptionActive
                } else {
                    // a late SubAck cannot activate a session that was lost meanwhile
                    current.clone()
                }
            }
            SessionEvent::ConnectionLost(_) | SessionEvent::ConnectAbandoned(_) => {
                SessionState::Disconnected
            }
        }
    }

    /// Telemetry may only flow on a fully established session
    pub fn can_publish(state: &SessionState) -> bool {
        matches!(state, SessionState::SubscriptionActive)
    }

    pub fn log_state_transition(from: &SessionState, to: &SessionState, event: &SessionEvent) {
        if from == to {
            return;
        }
        match (from, to, event) {
            (_, SessionState::SubscriptionActive, _) => {
                info!("MQTT session established and subscribed");
            }
            (
                SessionState::SubscriptionActive,
                SessionState::Disconnected,
                SessionEvent::ConnectionLost(reason),
            ) => {
                warn!(reason = %reason, "MQTT connection lost");
            }
            (_, SessionState::Disconnected, SessionEvent::ConnectAbandoned(reason)) => {
                error!(reason = %reason, "MQTT connect abandoned");
            }
            _ => {
                info!(from = %from, to = %to, "MQTT session state changed");
            }
        }
    }

    /// Reject policies that can never succeed
    pub fn validate_retry_policy(policy: &RetryPolicy) -> Result<(), String> {
        if policy.sustained_delay == 0 {
            return Err("retry delay must be greater than 0".to_string());
        }
        if policy.backoff_pattern.contains(&0) {
            return Err("backoff delays must be greater than 0".to_string());
        }
        if policy.max_attempts == Some(0) {
            return Err("max_attempts must be greater than 0 or None for unlimited".to_string());
        }
        Ok(())
    }
}

/// Result of asking whether a failed stage should be retried
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep `delay_ms` then make attempt number `attempt`
    Proceed { attempt: u32, delay_ms: u64 },
    /// The policy's attempt budget is spent
    AbortMaxAttemptsExceeded,
}

/// Events that move the session between states
#[derive(Debug, Clone)]
pub enum SessionEvent {
    ConnectStarted,
    NetworkAssociated,
    TlsConfigured,
    ConnAckReceived,
    SubscriptionConfirmed,
    /// Transport error or broker disconnect during steady state
    ConnectionLost(String),
    /// A connect stage gave up
    ConnectAbandoned(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_should_retry_until_budget_spent() {
        let policy = RetryPolicy::fixed(500, 3);

        assert_eq!(
            HealthMonitor::should_retry(1, &policy),
            RetryDecision::Proceed {
                attempt: 2,
                delay_ms: 500
            }
        );
        assert_eq!(
            HealthMonitor::should_retry(2, &policy),
            RetryDecision::Proceed {
                attempt: 3,
                delay_ms: 500
            }
        );
        assert_eq!(
            HealthMonitor::should_retry(3, &policy),
            RetryDecision::AbortMaxAttemptsExceeded
        );
    }

    #[test]
    fn test_unbounded_policy_never_aborts() {
        let policy = RetryPolicy::fixed(100, 0);
        assert!(matches!(
            HealthMonitor::should_retry(u32::MAX - 1, &policy),
            RetryDecision::Proceed { .. }
        ));
    }

    #[test]
    fn test_connect_sequence_reaches_subscription_active() {
        let mut state = SessionState::Disconnected;
        for event in [
            SessionEvent::ConnectStarted,
            SessionEvent::NetworkAssociated,
            SessionEvent::TlsConfigured,
            SessionEvent::ConnAckReceived,
            SessionEvent::SubscriptionConfirmed,
        ] {
            state = HealthMonitor::determine_next_state(&state, event);
        }
        assert_eq!(state, SessionState::SubscriptionActive);
    }

    #[test]
    fn test_loss_moves_to_disconnected() {
        let state = HealthMonitor::determine_next_state(
            &SessionState::SubscriptionActive,
            SessionEvent::ConnectionLost("reset by peer".to_string()),
        );
        assert_eq!(state, SessionState::Disconnected);
    }

    #[test]
    fn test_late_suback_does_not_activate() {
        let state = HealthMonitor::determine_next_state(
            &SessionState::Disconnected,
            SessionEvent::SubscriptionConfirmed,
        );
        assert_eq!(state, SessionState::Disconnected);
    }

    #[test]
    fn test_only_active_session_can_publish() {
        assert!(HealthMonitor::can_publish(&SessionState::SubscriptionActive));
        for state in [
            SessionState::Disconnected,
            SessionState::Associating,
            SessionState::SecureHandshake,
            SessionState::BrokerConnecting,
        ] {
            assert!(!HealthMonitor::can_publish(&state), "{state}");
        }
    }

    #[test]
    fn test_validate_retry_policy() {
        assert!(HealthMonitor::validate_retry_policy(&RetryPolicy::fixed(500, 0)).is_ok());
        assert!(HealthMonitor::validate_retry_policy(&RetryPolicy::fixed(0, 3)).is_err());
        let zero_attempts = RetryPolicy {
            max_attempts: Some(0),
            backoff_pattern: Vec::new(),
            sustained_delay: 100,
        };
        assert!(HealthMonitor::validate_retry_policy(&zero_attempts).is_err());
        let zero_step = RetryPolicy::patterned(vec![25, 0, 100], 250, 10);
        assert!(HealthMonitor::validate_retry_policy(&zero_step).is_err());
        let patterned = RetryPolicy::patterned(vec![25, 50, 100], 250, 0);
        assert!(HealthMonitor::validate_retry_policy(&patterned).is_ok());
    }

    proptest! {
        #[test]
        fn bounded_policy_aborts_exactly_at_max(max in 1u32..1000, delay in 1u64..10_000) {
            let policy = RetryPolicy::fixed(delay, max);
            for made in 1..max {
                let decision = HealthMonitor::should_retry(made, &policy);
                prop_assert_eq!(decision, RetryDecision::Proceed { attempt: made + 1, delay_ms: delay });
            }
            prop_assert_eq!(HealthMonitor::should_retry(max, &policy), RetryDecision::AbortMaxAttemptsExceeded);
        }
    }
}
