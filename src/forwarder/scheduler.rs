//! Fixed-period sample and publish loop
//!
//! Each cycle sleeps for the configured period, reads the sensor, builds a
//! payload and publishes it once. Failures are logged and the payload is
//! dropped; nothing is carried over to the next cycle.

use crate::protocol::{PayloadBuilder, Reading};
use crate::sensor::{SensorError, SensorSource};
use crate::transport::{PublishError, Publisher};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};

/// Result of one cycle
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The broker acknowledged the payload
    Published,
    /// No reading this cycle; nothing was published
    SensorFailed(String),
    /// The reading could not be turned into a payload
    BuildFailed(String),
    /// The payload was dropped after one publish attempt
    PublishFailed(PublishError),
}

/// Shared cycle counters
#[derive(Debug, Default)]
pub struct CycleStats {
    cycles: AtomicU64,
    published: AtomicU64,
    sensor_failures: AtomicU64,
    build_failures: AtomicU64,
    publish_failures: AtomicU64,
}

impl CycleStats {
    pub fn record(&self, outcome: &CycleOutcome) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            CycleOutcome::Published => &self.published,
            CycleOutcome::SensorFailed(_) => &self.sensor_failures,
            CycleOutcome::BuildFailed(_) => &self.build_failures,
            CycleOutcome::PublishFailed(_) => &self.publish_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CycleStatsSnapshot {
        CycleStatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            sensor_failures: self.sensor_failures.load(Ordering::Relaxed),
            build_failures: self.build_failures.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleStatsSnapshot {
    pub cycles: u64,
    pub published: u64,
    pub sensor_failures: u64,
    pub build_failures: u64,
    pub publish_failures: u64,
}

/// Drives the sample/build/publish cycle against one fixed topic
pub struct PublishScheduler<S, P: ?Sized> {
    /// Moved onto a blocking thread for each read
    sensor: Option<S>,
    sensor_name: String,
    publisher: Arc<P>,
    builder: PayloadBuilder,
    topic: String,
    period: Duration,
    cycle: u64,
    stats: Arc<CycleStats>,
}

impl<S, P> PublishScheduler<S, P>
where
    S: SensorSource,
    P: Publisher + ?Sized + 'static,
{
    pub fn new(
        sensor: S,
        publisher: Arc<P>,
        builder: PayloadBuilder,
        topic: impl Into<String>,
        period: Duration,
    ) -> Self {
        Self {
            sensor_name: sensor.name().to_string(),
            sensor: Some(sensor),
            publisher,
            builder,
            topic: topic.into(),
            period,
            cycle: 0,
            stats: Arc::new(CycleStats::default()),
        }
    }

    /// Handle to the counters, usable after the scheduler is moved into a task
    pub fn stats(&self) -> Arc<CycleStats> {
        self.stats.clone()
    }

    /// Run cycles until `stop` turns true or its sender is dropped
    ///
    /// The stop signal is honored while sleeping and between cycles. A cycle
    /// that has started runs to completion.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> CycleStatsSnapshot {
        info!(
            topic = %self.topic,
            period_secs = self.period.as_secs(),
            sensor = %self.sensor_name,
            "Publish loop started"
        );

        loop {
            if *stop.borrow() {
                break;
            }

            let stopped = tokio::select! {
                _ = tokio::time::sleep(self.period) => false,
                changed = stop.changed() => changed.is_err() || *stop.borrow(),
            };
            if stopped {
                break;
            }

            self.run_cycle().await;
        }

        let snapshot = self.stats.snapshot();
        info!(
            cycles = snapshot.cycles,
            published = snapshot.published,
            sensor_failures = snapshot.sensor_failures,
            build_failures = snapshot.build_failures,
            publish_failures = snapshot.publish_failures,
            "Publish loop stopped"
        );
        snapshot
    }

    /// Execute one read/build/publish cycle without sleeping
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.cycle += 1;
        let span = crate::cycle_span!(cycle = self.cycle, topic = %self.topic);
        let outcome = self.execute_cycle().instrument(span).await;
        self.stats.record(&outcome);
        outcome
    }

    async fn execute_cycle(&mut self) -> CycleOutcome {
        let (reading, captured_at) = match self.read_sensor().await {
            Ok(sample) => sample,
            Err(e) => {
                warn!(
                    sensor = %self.sensor_name,
                    error = %e,
                    "Sensor read failed, skipping cycle"
                );
                return CycleOutcome::SensorFailed(e.to_string());
            }
        };

        let payload = match self
            .builder
            .build(&reading, captured_at)
            .and_then(|payload| payload.to_bytes())
        {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    humidity = reading.humidity,
                    temperature = reading.temperature,
                    error = %e,
                    "Failed to build payload, skipping cycle"
                );
                return CycleOutcome::BuildFailed(e.to_string());
            }
        };

        match self.publisher.publish(&self.topic, payload).await {
            Ok(()) => {
                debug!(
                    humidity = reading.humidity,
                    temperature = reading.temperature,
                    "Published reading"
                );
                CycleOutcome::Published
            }
            Err(e) => {
                warn!(
                    topic = %self.topic,
                    client_id = %self.publisher.client_id(),
                    error = %e,
                    "Publish failed, dropping payload"
                );
                CycleOutcome::PublishFailed(e)
            }
        }
    }

    /// Read on a blocking thread and stamp the capture time there
    async fn read_sensor(&mut self) -> Result<(Reading, DateTime<Utc>), SensorError> {
        let mut sensor = self.sensor.take().ok_or_else(|| {
            SensorError::Unavailable("sensor was lost in an earlier cycle".to_string())
        })?;

        let joined = tokio::task::spawn_blocking(move || {
            let result = sensor.read().map(|reading| (reading, Utc::now()));
            (sensor, result)
        })
        .await;

        match joined {
            Ok((sensor, result)) => {
                self.sensor = Some(sensor);
                result
            }
            Err(e) => Err(SensorError::Unavailable(format!("sensor task failed: {e}"))),
        }
    }
}
