//! Pure session state, error types and connection configuration
//!
//! This module contains the session state enum, the fatal and cycle-local
//! error types, reconnection backoff settings and MQTT option construction.

use crate::config::MqttSection;
use rumqttc::{MqttOptions, Transport};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Lifecycle state of the broker session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Initial state, and terminal state after shutdown or a fatal error
    Disconnected,
    /// Waiting for the first broker acknowledgment
    Connecting,
    /// Session established; publishes are accepted
    Connected,
    /// Transport lost the connection (reason attached)
    Interrupted(String),
    /// Reconnected, restoring subscriptions the broker did not keep
    Resuming,
}

impl SessionState {
    pub fn can_publish(&self) -> bool {
        matches!(self, SessionState::Connected)
    }
}

/// Reconnection backoff configuration
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of consecutive reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Backoff pattern in milliseconds
    pub backoff_pattern: Vec<u64>,
    /// Delay once the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_pattern: vec![25, 50, 100, 250],
            sustained_delay: 250,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay for the given attempt (1-based)
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = (attempt.saturating_sub(1)) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }

    /// Decide whether another reconnection attempt may be made
    pub fn next_attempt(&self, completed_attempts: u32) -> Option<(u32, Duration)> {
        if let Some(max_attempts) = self.max_attempts {
            if completed_attempts >= max_attempts {
                return None;
            }
        }
        let attempt = completed_attempts + 1;
        Some((
            attempt,
            Duration::from_millis(self.calculate_backoff_delay(attempt)),
        ))
    }
}

/// Fatal session errors
///
/// Any of these terminates the process.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Invalid broker endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Failed to load TLS material from {path}: {reason}")]
    TlsMaterial { path: String, reason: String },
    #[error("Connection to {endpoint} as '{client_id}' failed: {reason}")]
    ConnectFailed {
        endpoint: String,
        client_id: String,
        reason: String,
    },
    #[error("No connection acknowledgment from {endpoint} within {timeout_secs}s")]
    ConnectTimeout { endpoint: String, timeout_secs: u64 },
    #[error("Broker rejected subscription to topic: {topic}")]
    SubscribeRejected { topic: String },
    #[error("Server rejected resubscribe to topic: {topic}")]
    ResubscribeRejected { topic: String },
    #[error("Subscription request for topic {topic} failed: {reason}")]
    SubscribeRequestFailed { topic: String, reason: String },
    #[error("Reconnection abandoned after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
    #[error("Session driver is not running")]
    DriverStopped,
}

/// Cycle-local publish failures
///
/// The publish loop logs these and moves on to the next cycle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: SessionState },
    #[error("Connection interrupted before the broker acknowledged the publish")]
    Interrupted,
    #[error("No broker acknowledgment within {timeout:?}")]
    AckTimeout { timeout: Duration },
    #[error("Publish request failed: {0}")]
    RequestFailed(String),
    #[error("Session driver is not running")]
    DriverStopped,
}

/// Split an endpoint URL into host, port and whether TLS is required
pub fn parse_endpoint(endpoint: &str) -> Result<(String, u16, bool), SessionError> {
    let url = Url::parse(endpoint).map_err(|_| SessionError::InvalidEndpoint(endpoint.to_string()))?;

    let tls = match url.scheme() {
        "mqtts" => true,
        "mqtt" => false,
        _ => return Err(SessionError::InvalidEndpoint(endpoint.to_string())),
    };
    let host = url
        .host_str()
        .ok_or_else(|| SessionError::InvalidEndpoint(endpoint.to_string()))?;
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok((host.to_string(), port, tls))
}

fn read_tls_file(path: Option<&Path>, what: &str) -> Result<Vec<u8>, SessionError> {
    let path = path.ok_or_else(|| SessionError::TlsMaterial {
        path: format!("<{what} not configured>"),
        reason: format!("{what} is required for mqtts endpoints"),
    })?;
    std::fs::read(path).map_err(|e| SessionError::TlsMaterial {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Build MQTT options for the session
///
/// `mqtts://` endpoints use mutual TLS with the configured CA, client
/// certificate and private key.
pub fn configure_mqtt_options(
    client_id: &str,
    config: &MqttSection,
) -> Result<MqttOptions, SessionError> {
    let (host, port, tls) = parse_endpoint(&config.endpoint)?;

    let mut mqtt_options = MqttOptions::new(client_id, host, port);
    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    mqtt_options.set_clean_session(config.clean_session);

    if tls {
        let ca = read_tls_file(config.root_ca.as_deref(), "root_ca")?;
        let cert = read_tls_file(config.cert.as_deref(), "cert")?;
        let key = read_tls_file(config.key.as_deref(), "key")?;
        mqtt_options.set_transport(Transport::tls(ca, Some((cert, key)), None));
    }

    Ok(mqtt_options)
}
