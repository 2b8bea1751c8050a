use thiserror::Error;

/// Errors reported by a [`TimerGateway`](crate::TimerGateway).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The named timer has never been created.
    #[error("timer '{0}' does not exist")]
    NotExists(String),

    /// The named timer exists but has already run out.
    #[error("timer '{0}' has expired")]
    Expired(String),

    /// The gateway itself failed (transport, bad status, malformed reply).
    #[error("timer gateway failure: {0}")]
    Internal(String),
}

impl GatewayError {
    /// True when the timer is absent for the purpose of starting it,
    /// i.e. it was never created or has already expired.
    pub fn is_absent(&self) -> bool {
        matches!(self, GatewayError::NotExists(_) | GatewayError::Expired(_))
    }
}

/// Errors returned synchronously from
/// [`TimerBroadcast::subscribe`](crate::TimerBroadcast::subscribe).
#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("cadence must be at least one second")]
    InvalidCadence,

    /// The broadcast's shutdown token has fired; no new timers are started.
    #[error("timer broadcast is shut down")]
    ShutDown,

    /// The gateway could not tell whether the timer is running.
    #[error("failed to check timer '{name}'")]
    Check {
        name: String,
        #[source]
        source: GatewayError,
    },

    /// The timer was absent and the gateway refused to create it.
    #[error("failed to create timer '{name}'")]
    Create {
        name: String,
        #[source]
        source: GatewayError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn absent_covers_missing_and_expired() {
        assert!(GatewayError::NotExists("a".into()).is_absent());
        assert!(GatewayError::Expired("a".into()).is_absent());
        assert!(!GatewayError::Internal("boom".into()).is_absent());
    }

    #[test]
    fn subscribe_error_keeps_gateway_source() {
        let err = SubscribeError::Create {
            name: "t1".into(),
            source: GatewayError::Internal("status 500".into()),
        };
        assert_eq!(err.to_string(), "failed to create timer 't1'");
        let source = err.source().map(|s| s.to_string());
        assert_eq!(
            source.as_deref(),
            Some("timer gateway failure: status 500")
        );
    }
}
