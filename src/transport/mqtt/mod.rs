//! Resilient MQTT session
//!
//! This module separates pure session logic from I/O so that the
//! reconnection and resubscription rules can be tested without a broker.
//!
//! # Architecture
//!
//! - [`connection`] - Session state, error types and MQTT option construction
//! - [`session_machine`] - Pure state machine for connect, interrupt and resume
//! - [`event_router`] - Pure routing of rumqttc events
//! - [`publish_tracker`] - Correlation of QoS 1 publishes with acknowledgments
//! - [`client`] - Impure driver task and the [`SessionManager`] handle
//!
//! # Usage
//!
//! ```rust,no_run
//! use telemetry_forwarder::config::MqttSection;
//! use telemetry_forwarder::transport::mqtt::SessionManager;
//! use telemetry_forwarder::transport::Publisher;
//!
//! # tokio_test::block_on(async {
//! let config = MqttSection {
//!     endpoint: "mqtt://localhost:1883".to_string(),
//!     ..MqttSection::default()
//! };
//!
//! let mut session = SessionManager::new("sensor1", &config)?;
//! let _fatal_errors = session.connect().await?;
//! session.publish("telemetry/site/loc/sensor1", "{}".into()).await?;
//! session.shutdown().await;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod event_router;
pub mod publish_tracker;
pub mod session_machine;

pub use client::SessionManager;
pub use connection::{
    configure_mqtt_options, parse_endpoint, PublishError, ReconnectConfig, SessionError,
    SessionState,
};
pub use event_router::{EventRoute, EventRouter};
pub use publish_tracker::PublishTracker;
pub use session_machine::{SessionAction, SessionEvent, SessionMachine, SubscriptionRecord};
