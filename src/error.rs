//! Top-level error type for the forwarder
//!
//! Only fatal conditions reach this type. Cycle-local failures (sensor reads,
//! payload building, publishing) are logged by the publish loop and never
//! escalate.

use crate::config::ConfigError;
use crate::transport::mqtt::SessionError;
use thiserror::Error;

/// Main error type for forwarder operations
#[derive(Debug, Error)]
pub enum ForwarderError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Publish loop terminated unexpectedly: {message}")]
    SchedulerFailed { message: String },
}

impl ForwarderError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        1
    }

    /// Topic named by the error, if the failure concerns one
    pub fn topic(&self) -> Option<&str> {
        match self {
            ForwarderError::Session(
                SessionError::SubscribeRejected { topic }
                | SessionError::ResubscribeRejected { topic }
                | SessionError::SubscribeRequestFailed { topic, .. },
            ) => Some(topic),
            _ => None,
        }
    }

    pub fn scheduler_failed<S: Into<String>>(message: S) -> Self {
        Self::SchedulerFailed {
            message: message.into(),
        }
    }
}

/// Result type for forwarder operations
pub type ForwarderResult<T> = Result<T, ForwarderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resubscribe_rejection_names_topic() {
        let error: ForwarderError = SessionError::ResubscribeRejected {
            topic: "site/a/loc/sensor1".to_string(),
        }
        .into();

        assert_eq!(error.topic(), Some("site/a/loc/sensor1"));
        assert_eq!(
            error.to_string(),
            "Session error: Server rejected resubscribe to topic: site/a/loc/sensor1"
        );
        assert_eq!(error.exit_code(), 1);
    }

    #[test]
    fn test_connect_failure_has_no_topic() {
        let error: ForwarderError = SessionError::ConnectTimeout {
            endpoint: "mqtt://localhost:1883".to_string(),
            timeout_secs: 30,
        }
        .into();
        assert_eq!(error.topic(), None);
        assert!(error.to_string().contains("mqtt://localhost:1883"));
    }

    #[test]
    fn test_config_error_conversion() {
        let error: ForwarderError =
            ConfigError::InvalidConfig("publish.precision too large".to_string()).into();
        assert!(matches!(error, ForwarderError::Config(_)));
        assert!(error.to_string().contains("publish.precision"));
    }

    #[test]
    fn test_scheduler_failed_constructor() {
        let error = ForwarderError::scheduler_failed("task panicked");
        assert_eq!(
            error.to_string(),
            "Publish loop terminated unexpectedly: task panicked"
        );
    }
}
