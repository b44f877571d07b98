//! Publish loop behavior: cycle isolation and no cross-cycle buffering

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use telemetry_forwarder::forwarder::{CycleOutcome, PublishScheduler};
use telemetry_forwarder::protocol::{PayloadBuilder, Reading};
use telemetry_forwarder::testing::{MockPublisher, ScriptedSensor};
use telemetry_forwarder::transport::PublishError;
use tokio::sync::watch;

const TOPIC: &str = "telemetry/site-a/greenhouse-1/sensor1";

fn scheduler(
    sensor: ScriptedSensor,
    publisher: Arc<MockPublisher>,
    period: Duration,
) -> PublishScheduler<ScriptedSensor, MockPublisher> {
    PublishScheduler::new(
        sensor,
        publisher,
        PayloadBuilder::new(1, "greenhouse-1"),
        TOPIC,
        period,
    )
}

#[tokio::test]
async fn test_two_sensor_failures_then_one_publish() {
    let publisher = Arc::new(MockPublisher::new());
    let sensor = ScriptedSensor::new(vec![
        Err("no response on bus".to_string()),
        Err("no response on bus".to_string()),
        Ok(Reading::new(55.3, 21.7)),
    ]);
    let mut scheduler = scheduler(sensor, publisher.clone(), Duration::from_secs(5));

    let outcomes = vec![
        scheduler.run_cycle().await,
        scheduler.run_cycle().await,
        scheduler.run_cycle().await,
    ];

    assert!(matches!(outcomes[0], CycleOutcome::SensorFailed(_)));
    assert!(matches!(outcomes[1], CycleOutcome::SensorFailed(_)));
    assert_eq!(outcomes[2], CycleOutcome::Published);

    let published = publisher.published().await;
    assert_eq!(published.len(), 1);
    let json: serde_json::Value = serde_json::from_slice(&published[0].1).unwrap();
    assert_eq!(json["humidity"], "55.3");
    assert_eq!(json["temperature"], "21.7");

    let stats = scheduler.stats().snapshot();
    assert_eq!(stats.cycles, 3);
    assert_eq!(stats.sensor_failures, 2);
    assert_eq!(stats.published, 1);
}

#[tokio::test]
async fn test_sensor_failure_does_not_affect_next_cycle() {
    let publisher = Arc::new(MockPublisher::new());
    let sensor = ScriptedSensor::new(vec![
        Err("crc mismatch".to_string()),
        Ok(Reading::new(40.0, 18.0)),
    ]);
    let calls = sensor.call_counter();
    let mut scheduler = scheduler(sensor, publisher.clone(), Duration::from_secs(5));

    assert!(matches!(
        scheduler.run_cycle().await,
        CycleOutcome::SensorFailed(_)
    ));
    assert_eq!(publisher.attempts(), 0);

    assert_eq!(scheduler.run_cycle().await, CycleOutcome::Published);
    assert_eq!(publisher.attempts(), 1);
    // One read per cycle, never retried within a cycle
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failed_publish_is_dropped_not_retried() {
    let publisher = Arc::new(MockPublisher::with_outcomes(vec![Err(
        PublishError::AckTimeout {
            timeout: Duration::from_secs(10),
        },
    )]));
    let sensor = ScriptedSensor::new(vec![
        Ok(Reading::new(50.0, 20.0)),
        Ok(Reading::new(51.0, 21.0)),
    ]);
    let mut scheduler = scheduler(sensor, publisher.clone(), Duration::from_secs(5));

    assert!(matches!(
        scheduler.run_cycle().await,
        CycleOutcome::PublishFailed(PublishError::AckTimeout { .. })
    ));
    assert_eq!(publisher.attempts(), 1);

    assert_eq!(scheduler.run_cycle().await, CycleOutcome::Published);
    assert_eq!(publisher.attempts(), 2);

    // Only the second cycle's reading went out
    let published = publisher.published().await;
    assert_eq!(published.len(), 1);
    let json: serde_json::Value = serde_json::from_slice(&published[0].1).unwrap();
    assert_eq!(json["humidity"], "51.0");
}

#[tokio::test]
async fn test_loop_keeps_running_through_failures() {
    let publisher = Arc::new(MockPublisher::with_outcomes(vec![
        Err(PublishError::Interrupted),
        Err(PublishError::Interrupted),
    ]));
    let sensor = ScriptedSensor::new(
        std::iter::once(Err("warming up".to_string()))
            .chain(std::iter::repeat(Ok(Reading::new(50.0, 20.0))).take(50))
            .collect(),
    );
    let scheduler = scheduler(sensor, publisher.clone(), Duration::from_millis(5));
    let stats = scheduler.stats();
    let (stop_tx, stop_rx) = watch::channel(false);

    let handle = tokio::spawn(scheduler.run(stop_rx));
    tokio::time::timeout(Duration::from_secs(5), async {
        while stats.snapshot().published < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("loop should keep publishing after failures");

    stop_tx.send(true).unwrap();
    let snapshot = handle.await.unwrap();

    assert_eq!(snapshot.sensor_failures, 1);
    assert_eq!(snapshot.publish_failures, 2);
    assert!(snapshot.published >= 2);
    assert_eq!(
        snapshot.cycles,
        snapshot.published + snapshot.sensor_failures + snapshot.publish_failures
    );
}

#[tokio::test]
async fn test_first_sample_waits_one_period() {
    let publisher = Arc::new(MockPublisher::new());
    let sensor = ScriptedSensor::repeating(Reading::new(50.0, 20.0));
    let calls = sensor.call_counter();
    let scheduler = scheduler(sensor, publisher, Duration::from_secs(60));
    let (stop_tx, stop_rx) = watch::channel(false);

    let handle = tokio::spawn(scheduler.run(stop_rx));
    tokio::time::sleep(Duration::from_millis(50)).await;
    stop_tx.send(true).unwrap();

    let snapshot = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("stop signal interrupts the sleep")
        .unwrap();
    assert_eq!(snapshot.cycles, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
