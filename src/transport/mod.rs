//! Transport layer for telemetry publishing
//!
//! This module provides the publisher abstraction the publish loop depends
//! on, and the MQTT session that implements it.

use bytes::Bytes;

pub mod mqtt;

pub use mqtt::{PublishError, SessionState};

/// Publishing seam between the publish loop and the broker session
///
/// This trait keeps the scheduler independent of the MQTT client so that
/// tests can substitute a scripted publisher.
#[async_trait::async_trait]
pub trait Publisher: Send + Sync {
    /// Publish at QoS 1 and wait for the broker's acknowledgment
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PublishError>;

    /// Current session state
    fn session_state(&self) -> SessionState;

    /// Client identity used for the session
    fn client_id(&self) -> &str;
}
