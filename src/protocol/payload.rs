//! Telemetry payload construction
//!
//! A [`Reading`] is turned into a [`Payload`] once per cycle and discarded
//! after the publish attempt. All numeric fields are rendered as decimal text
//! so downstream consumers never see binary float artifacts.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of decimal places for humidity and temperature
pub const DEFAULT_PRECISION: usize = 1;

/// Upper bound accepted for the configured precision
pub const MAX_PRECISION: usize = 6;

/// One raw sample from the sensor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Relative humidity in %RH
    pub humidity: f64,
    /// Temperature in degrees Celsius
    pub temperature: f64,
}

impl Reading {
    pub fn new(humidity: f64, temperature: f64) -> Self {
        Self {
            humidity,
            temperature,
        }
    }
}

/// Serialized telemetry message
///
/// Field order matches the published JSON document:
/// `{"humidity":"55.3","temperature":"21.7","timestamp":"1700000000000","location":"greenhouse-1"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub humidity: String,
    pub temperature: String,
    /// Capture time in milliseconds since the Unix epoch
    pub timestamp: String,
    pub location: String,
}

impl Payload {
    /// Encode as UTF-8 JSON ready for publishing
    pub fn to_bytes(&self) -> Result<Bytes, PayloadError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(PayloadError::Serialization)
    }
}

/// Payload construction errors
///
/// These only arise when the caller hands over a reading that violates the
/// sensor contract (NaN or infinite values) or an empty location.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Non-finite {field} value: {value}")]
    NonFinite { field: &'static str, value: f64 },
    #[error("Payload location must not be empty")]
    EmptyLocation,
    #[error("Payload serialization failed")]
    Serialization(#[source] serde_json::Error),
}

/// Builds payloads with a fixed precision and location
#[derive(Debug, Clone)]
pub struct PayloadBuilder {
    precision: usize,
    location: String,
}

impl PayloadBuilder {
    pub fn new(precision: usize, location: impl Into<String>) -> Self {
        Self {
            precision: precision.min(MAX_PRECISION),
            location: location.into(),
        }
    }

    pub fn precision(&self) -> usize {
        self.precision
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Build the payload for a reading captured at `captured_at`
    pub fn build(
        &self,
        reading: &Reading,
        captured_at: DateTime<Utc>,
    ) -> Result<Payload, PayloadError> {
        if self.location.is_empty() {
            return Err(PayloadError::EmptyLocation);
        }

        Ok(Payload {
            humidity: format_fixed("humidity", reading.humidity, self.precision)?,
            temperature: format_fixed("temperature", reading.temperature, self.precision)?,
            timestamp: captured_at.timestamp_millis().to_string(),
            location: self.location.clone(),
        })
    }
}

fn format_fixed(field: &'static str, value: f64, precision: usize) -> Result<String, PayloadError> {
    if !value.is_finite() {
        return Err(PayloadError::NonFinite { field, value });
    }
    let text = format!("{value:.precision$}");
    // Rounding a small negative value can produce "-0.0"
    if text.starts_with('-') && text[1..].chars().all(|c| c == '0' || c == '.') {
        Ok(text[1..].to_string())
    } else {
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at_millis(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn test_build_greenhouse_reading() {
        let builder = PayloadBuilder::new(1, "greenhouse-1");
        let payload = builder
            .build(&Reading::new(55.3, 21.7), at_millis(1_700_000_000_000))
            .unwrap();

        assert_eq!(payload.humidity, "55.3");
        assert_eq!(payload.temperature, "21.7");
        assert_eq!(payload.timestamp, "1700000000000");
        assert_eq!(payload.location, "greenhouse-1");

        let json = String::from_utf8(payload.to_bytes().unwrap().to_vec()).unwrap();
        assert_eq!(
            json,
            r#"{"humidity":"55.3","temperature":"21.7","timestamp":"1700000000000","location":"greenhouse-1"}"#
        );
    }

    #[test]
    fn test_precision_is_applied() {
        let builder = PayloadBuilder::new(3, "lab");
        let payload = builder
            .build(&Reading::new(40.12345, -3.5), at_millis(0))
            .unwrap();
        assert_eq!(payload.humidity, "40.123");
        assert_eq!(payload.temperature, "-3.500");
        assert_eq!(payload.timestamp, "0");
    }

    #[test]
    fn test_zero_precision() {
        let builder = PayloadBuilder::new(0, "lab");
        let payload = builder
            .build(&Reading::new(55.6, 21.2), at_millis(1))
            .unwrap();
        assert_eq!(payload.humidity, "56");
        assert_eq!(payload.temperature, "21");
    }

    #[test]
    fn test_negative_zero_is_normalized() {
        let builder = PayloadBuilder::new(1, "freezer");
        let payload = builder
            .build(&Reading::new(50.0, -0.04), at_millis(1))
            .unwrap();
        assert_eq!(payload.temperature, "0.0");
    }

    #[test]
    fn test_precision_is_capped() {
        let builder = PayloadBuilder::new(42, "lab");
        assert_eq!(builder.precision(), MAX_PRECISION);
    }

    #[test]
    fn test_non_finite_values_rejected() {
        let builder = PayloadBuilder::new(1, "lab");
        let err = builder
            .build(&Reading::new(f64::NAN, 20.0), at_millis(1))
            .unwrap_err();
        assert!(matches!(err, PayloadError::NonFinite { field: "humidity", .. }));

        let err = builder
            .build(&Reading::new(50.0, f64::INFINITY), at_millis(1))
            .unwrap_err();
        assert!(matches!(err, PayloadError::NonFinite { field: "temperature", .. }));
    }

    #[test]
    fn test_empty_location_rejected() {
        let builder = PayloadBuilder::new(1, "");
        let err = builder
            .build(&Reading::new(50.0, 20.0), at_millis(1))
            .unwrap_err();
        assert!(matches!(err, PayloadError::EmptyLocation));
    }

    proptest! {
        #[test]
        fn formatted_values_round_trip_within_precision(
            humidity in 0.0f64..100.0,
            temperature in -40.0f64..125.0,
            precision in 0usize..=MAX_PRECISION,
        ) {
            let builder = PayloadBuilder::new(precision, "site");
            let payload = builder
                .build(&Reading::new(humidity, temperature), at_millis(1_700_000_000_000))
                .unwrap();

            let tolerance = 0.5 * 10f64.powi(-(precision as i32)) + 1e-9;
            let h: f64 = payload.humidity.parse().unwrap();
            let t: f64 = payload.temperature.parse().unwrap();
            prop_assert!((h - humidity).abs() <= tolerance, "{} vs {}", h, humidity);
            prop_assert!((t - temperature).abs() <= tolerance, "{} vs {}", t, temperature);
        }

        #[test]
        fn timestamps_follow_capture_order(
            first in 0i64..4_000_000_000_000,
            delta in 0i64..1_000_000,
        ) {
            let builder = PayloadBuilder::new(1, "site");
            let reading = Reading::new(50.0, 20.0);
            let a = builder.build(&reading, at_millis(first)).unwrap();
            let b = builder.build(&reading, at_millis(first + delta)).unwrap();

            let a_ms: i64 = a.timestamp.parse().unwrap();
            let b_ms: i64 = b.timestamp.parse().unwrap();
            prop_assert_eq!(a_ms, first);
            prop_assert!(a_ms <= b_ms);
        }

        #[test]
        fn every_field_is_non_empty(
            humidity in 0.0f64..100.0,
            temperature in -40.0f64..125.0,
        ) {
            let builder = PayloadBuilder::new(DEFAULT_PRECISION, "site");
            let payload = builder
                .build(&Reading::new(humidity, temperature), at_millis(5))
                .unwrap();
            prop_assert!(!payload.humidity.is_empty());
            prop_assert!(!payload.temperature.is_empty());
            prop_assert!(!payload.timestamp.is_empty());
            prop_assert!(!payload.location.is_empty());
        }
    }
}
