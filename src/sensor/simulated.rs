//! Simulated sensor for running without hardware

use super::{SensorError, SensorSource};
use crate::protocol::Reading;

/// Produces slowly drifting readings around a base point
///
/// The sequence is deterministic so runs with `--simulate` are reproducible.
#[derive(Debug, Clone)]
pub struct SimulatedSensor {
    base_humidity: f64,
    base_temperature: f64,
    step: u64,
}

impl SimulatedSensor {
    pub fn new(base_humidity: f64, base_temperature: f64) -> Self {
        Self {
            base_humidity,
            base_temperature,
            step: 0,
        }
    }
}

impl Default for SimulatedSensor {
    fn default() -> Self {
        Self::new(55.0, 21.0)
    }
}

impl SensorSource for SimulatedSensor {
    fn name(&self) -> &str {
        "simulated"
    }

    fn read(&mut self) -> Result<Reading, SensorError> {
        let phase = self.step as f64 / 12.0;
        self.step = self.step.wrapping_add(1);

        let humidity = (self.base_humidity + 5.0 * phase.sin()).clamp(0.0, 100.0);
        let temperature = self.base_temperature + 2.0 * phase.cos();
        Ok(Reading::new(humidity, temperature))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_readings_stay_in_range() {
        let mut sensor = SimulatedSensor::default();
        for _ in 0..500 {
            let reading = sensor.read().unwrap();
            assert!((0.0..=100.0).contains(&reading.humidity));
            assert!((18.9..=23.1).contains(&reading.temperature));
        }
    }

    #[test]
    fn test_simulated_sequence_is_deterministic() {
        let mut a = SimulatedSensor::new(40.0, 10.0);
        let mut b = SimulatedSensor::new(40.0, 10.0);
        for _ in 0..10 {
            assert_eq!(a.read().unwrap(), b.read().unwrap());
        }
    }

    #[test]
    fn test_first_reading_is_base_humidity() {
        let mut sensor = SimulatedSensor::new(40.0, 10.0);
        let reading = sensor.read().unwrap();
        assert_eq!(reading.humidity, 40.0);
        assert_eq!(reading.temperature, 12.0);
    }
}
