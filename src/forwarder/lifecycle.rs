//! Forwarder lifecycle management
//!
//! Wires the broker session, the sensor and the publish loop together, and
//! turns fatal session errors into an orderly shutdown with an error result.

use super::scheduler::{CycleStatsSnapshot, PublishScheduler};
use crate::config::ForwarderConfig;
use crate::error::{ForwarderError, ForwarderResult};
use crate::protocol::PayloadBuilder;
use crate::sensor::{Am2315, SensorSource, SimulatedSensor};
use crate::transport::mqtt::{ReconnectConfig, SessionError, SessionManager};
use crate::transport::Publisher;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// Pick the sensor implementation for this run
pub fn build_sensor(config: &ForwarderConfig, simulate: bool) -> Box<dyn SensorSource> {
    if simulate {
        info!("Using simulated sensor");
        Box::new(SimulatedSensor::default())
    } else {
        info!(bus = %config.sensor.i2c_bus.display(), "Using AM2315 sensor");
        Box::new(Am2315::new(&config.sensor.i2c_bus))
    }
}

/// Owns process lifetime: connect once, publish until shutdown or a fatal error
pub struct Forwarder {
    config: ForwarderConfig,
    reconnect_config: ReconnectConfig,
}

impl Forwarder {
    pub fn new(config: ForwarderConfig) -> Self {
        Self {
            config,
            reconnect_config: ReconnectConfig::default(),
        }
    }

    pub fn with_reconnect_config(mut self, reconnect_config: ReconnectConfig) -> Self {
        self.reconnect_config = reconnect_config;
        self
    }

    /// Connect, subscribe, then run the publish loop until `shutdown` resolves
    ///
    /// Returns the cycle counters on a clean shutdown, or the fatal error
    /// that stopped the forwarder.
    pub async fn run<S, F>(self, sensor: S, shutdown: F) -> ForwarderResult<CycleStatsSnapshot>
    where
        S: SensorSource,
        F: Future<Output = ()>,
    {
        let topic = self.config.telemetry_topic();
        let client_id = self.config.client_id().to_string();
        info!(
            client_id = %client_id,
            endpoint = %self.config.mqtt.endpoint,
            topic = %topic,
            "Starting telemetry forwarder"
        );

        let mut session = SessionManager::new(&client_id, &self.config.mqtt)?
            .with_reconnect_config(self.reconnect_config.clone());

        let fatal_errors = match establish(&mut session, &self.config.mqtt.subscriptions).await {
            Ok(fatal_errors) => fatal_errors,
            Err(e) => {
                error!(
                    client_id = %client_id,
                    endpoint = %self.config.mqtt.endpoint,
                    error = %e,
                    "Failed to establish session"
                );
                session.shutdown().await;
                return Err(e.into());
            }
        };

        let session = Arc::new(session);
        let builder = PayloadBuilder::new(
            self.config.publish.precision,
            self.config.device.location.clone(),
        );
        let scheduler = PublishScheduler::new(
            sensor,
            session.clone(),
            builder,
            topic,
            self.config.cycle_period(),
        );

        let result = supervise(scheduler, fatal_errors, shutdown).await;
        session.shutdown().await;
        result
    }
}

async fn establish(
    session: &mut SessionManager,
    subscriptions: &[String],
) -> Result<mpsc::Receiver<SessionError>, SessionError> {
    let fatal_errors = session.connect().await?;
    for topic in subscriptions {
        let qos = session.subscribe(topic).await?;
        info!(topic = %topic, qos = ?qos, "Subscribed");
    }
    Ok(fatal_errors)
}

/// Run the publish loop until shutdown, a fatal session error, or loop exit
///
/// On shutdown the loop is signalled and allowed to finish its current
/// cycle. A fatal error is returned after the loop has stopped.
pub async fn supervise<S, P, F>(
    scheduler: PublishScheduler<S, P>,
    mut fatal_errors: mpsc::Receiver<SessionError>,
    shutdown: F,
) -> ForwarderResult<CycleStatsSnapshot>
where
    S: SensorSource,
    P: Publisher + ?Sized + 'static,
    F: Future<Output = ()>,
{
    let stats = scheduler.stats();
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut handle = tokio::spawn(scheduler.run(stop_rx));
    tokio::pin!(shutdown);

    let outcome = tokio::select! {
        _ = &mut shutdown => {
            info!("Shutdown requested, stopping publish loop");
            Ok(())
        }
        fatal = fatal_errors.recv() => {
            let error = fatal.unwrap_or(SessionError::DriverStopped);
            error!(error = %error, "Fatal session error, stopping publish loop");
            Err(ForwarderError::Session(error))
        }
        joined = &mut handle => {
            return match joined {
                Ok(snapshot) => Err(ForwarderError::scheduler_failed(format!(
                    "publish loop exited after {} cycles",
                    snapshot.cycles
                ))),
                Err(e) => Err(ForwarderError::scheduler_failed(e.to_string())),
            };
        }
    };

    let _ = stop_tx.send(true);
    if let Err(e) = handle.await {
        warn!("Publish loop ended with error: {}", e);
    }

    outcome.map(|()| stats.snapshot())
}
