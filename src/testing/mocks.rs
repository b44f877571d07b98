//! Mock implementations for testing
//!
//! Provides a scripted publisher and a scripted sensor so the publish loop
//! and orchestrator can be tested without a broker or sensor hardware.

use crate::protocol::Reading;
use crate::sensor::{SensorError, SensorSource};
use crate::transport::{PublishError, Publisher, SessionState};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

pub type PublishedMessage = (String, Bytes);

/// Mock publisher for testing
///
/// Publish attempts consume scripted outcomes in order; once the script is
/// exhausted every attempt succeeds. Attempts made while the state is not
/// Connected fail with `NotConnected` without consuming the script.
#[derive(Debug)]
pub struct MockPublisher {
    client_id: String,
    outcomes: Mutex<VecDeque<Result<(), PublishError>>>,
    published: Mutex<Vec<PublishedMessage>>,
    attempts: AtomicUsize,
    state: RwLock<SessionState>,
}

impl Default for MockPublisher {
    fn default() -> Self {
        Self::with_outcomes(Vec::new())
    }
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcomes(outcomes: Vec<Result<(), PublishError>>) -> Self {
        Self {
            client_id: "mock-sensor".to_string(),
            outcomes: Mutex::new(outcomes.into()),
            published: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            state: RwLock::new(SessionState::Connected),
        }
    }

    pub fn set_state(&self, state: SessionState) {
        if let Ok(mut current) = self.state.write() {
            *current = state;
        }
    }

    /// Messages the mock accepted, in order
    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().await.clone()
    }

    /// Every publish call, including rejected ones
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PublishError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let state = self.session_state();
        if !state.can_publish() {
            return Err(PublishError::NotConnected { state });
        }

        let outcome = self.outcomes.lock().await.pop_front().unwrap_or(Ok(()));
        if outcome.is_ok() {
            self.published
                .lock()
                .await
                .push((topic.to_string(), payload));
        }
        outcome
    }

    fn session_state(&self) -> SessionState {
        self.state
            .read()
            .map(|state| state.clone())
            .unwrap_or(SessionState::Disconnected)
    }

    fn client_id(&self) -> &str {
        &self.client_id
    }
}

/// Sensor that replays a scripted sequence of results
///
/// `Err` entries become `SensorError::Unavailable` with the given reason.
/// When the script runs out, `repeat` is returned if set, otherwise the
/// read fails.
#[derive(Debug)]
pub struct ScriptedSensor {
    script: VecDeque<Result<Reading, String>>,
    repeat: Option<Reading>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedSensor {
    pub fn new(script: Vec<Result<Reading, String>>) -> Self {
        Self {
            script: script.into(),
            repeat: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn repeating(reading: Reading) -> Self {
        Self {
            script: VecDeque::new(),
            repeat: Some(reading),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared read counter that stays valid after the sensor is moved
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl SensorSource for ScriptedSensor {
    fn name(&self) -> &str {
        "scripted"
    }

    fn read(&mut self) -> Result<Reading, SensorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.pop_front() {
            Some(result) => result.map_err(SensorError::Unavailable),
            None => self
                .repeat
                .ok_or_else(|| SensorError::Unavailable("script exhausted".to_string())),
        }
    }
}
