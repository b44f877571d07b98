//! Testing utilities and mock implementations
//!
//! This module provides mock implementations for testing the publish loop
//! without requiring an MQTT broker or sensor hardware.

pub mod mocks;

pub use mocks::*;
