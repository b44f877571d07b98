//! Telemetry Forwarder
//!
//! Samples a humidity/temperature sensor on a fixed period and publishes each
//! reading to an MQTT broker with at-least-once delivery, keeping one
//! persistent session alive across network interruptions.
//!
//! # Overview
//!
//! - Payload building with fixed decimal precision and capture timestamps
//! - A resilient MQTT session that restores subscriptions after resume and
//!   treats a refused subscription as fatal
//! - A publish loop that never buffers a failed payload across cycles
//! - Lifecycle wiring with orderly shutdown on signals or fatal errors
//!
//! # Quick Start
//!
//! ```rust
//! use telemetry_forwarder::protocol::{PayloadBuilder, Reading};
//! use chrono::{TimeZone, Utc};
//!
//! let builder = PayloadBuilder::new(1, "greenhouse-1");
//! let captured_at = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
//! let payload = builder.build(&Reading::new(55.3, 21.7), captured_at).unwrap();
//!
//! assert_eq!(
//!     payload.to_bytes().unwrap(),
//!     r#"{"humidity":"55.3","temperature":"21.7","timestamp":"1700000000000","location":"greenhouse-1"}"#
//! );
//! ```

pub mod config;
pub mod error;
pub mod forwarder;
pub mod observability;
pub mod protocol;
pub mod sensor;
pub mod testing;
pub mod transport;

pub use config::*;
pub use error::{ForwarderError, ForwarderResult};
pub use forwarder::{Forwarder, PublishScheduler};
pub use protocol::*;
