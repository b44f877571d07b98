//! Wire-level types for the telemetry forwarder
//!
//! This module defines what goes onto the broker: the JSON payload built from
//! each sensor reading and the topic path it is published under.

pub mod payload;
pub mod topics;

pub use payload::*;
pub use topics::*;
