//! Sensor sources
//!
//! The forwarder only needs one blocking operation from a sensor: read one
//! humidity/temperature sample. Everything about the bus protocol stays
//! behind [`SensorSource`].

pub mod am2315;
pub mod simulated;

use crate::protocol::Reading;
use thiserror::Error;

pub use am2315::Am2315;
pub use simulated::SimulatedSensor;

/// A source of humidity/temperature readings
///
/// `read` may block on bus I/O. Callers running on an async runtime must
/// invoke it from a blocking-capable thread.
pub trait SensorSource: Send + 'static {
    /// Human-readable name used in logs
    fn name(&self) -> &str;

    /// Take one measurement
    fn read(&mut self) -> Result<Reading, SensorError>;
}

impl<S: SensorSource + ?Sized> SensorSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn read(&mut self) -> Result<Reading, SensorError> {
        (**self).read()
    }
}

/// Sensor read failures
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("Sensor unavailable: {0}")]
    Unavailable(String),
    #[error("Sensor bus I/O error")]
    Io(#[from] std::io::Error),
    #[error("Sensor returned a corrupt frame: {0}")]
    CorruptFrame(String),
    #[error("Sensor not supported on this platform")]
    Unsupported,
}
