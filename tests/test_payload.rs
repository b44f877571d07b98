//! Payload building through the public API

use chrono::{TimeZone, Utc};
use telemetry_forwarder::protocol::{Payload, PayloadBuilder, Reading};

#[test]
fn test_greenhouse_reading_wire_format() {
    let builder = PayloadBuilder::new(1, "greenhouse-1");
    let captured_at = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();

    let bytes = builder
        .build(&Reading::new(55.3, 21.7), captured_at)
        .unwrap()
        .to_bytes()
        .unwrap();

    assert_eq!(
        std::str::from_utf8(&bytes).unwrap(),
        r#"{"humidity":"55.3","temperature":"21.7","timestamp":"1700000000000","location":"greenhouse-1"}"#
    );
}

#[test]
fn test_wire_payload_key_order_is_not_significant() {
    let reordered = r#"{"location":"greenhouse-1","timestamp":"1700000000000","temperature":"21.7","humidity":"55.3"}"#;
    let payload: Payload = serde_json::from_str(reordered).unwrap();

    let builder = PayloadBuilder::new(1, "greenhouse-1");
    let built = builder
        .build(
            &Reading::new(55.3, 21.7),
            Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
        )
        .unwrap();
    assert_eq!(payload, built);
}

#[test]
fn test_timestamp_is_capture_time() {
    let builder = PayloadBuilder::new(1, "greenhouse-1");
    let reading = Reading::new(50.0, 20.0);

    let early = builder
        .build(&reading, Utc.timestamp_millis_opt(1_000).unwrap())
        .unwrap();
    let late = builder
        .build(&reading, Utc.timestamp_millis_opt(2_500).unwrap())
        .unwrap();

    assert_eq!(early.timestamp, "1000");
    assert_eq!(late.timestamp, "2500");
}
