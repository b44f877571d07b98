//! Impure session I/O
//!
//! [`SessionManager`] is the handle the rest of the application uses. The
//! rumqttc client and event loop live in a driver task that owns the
//! [`SessionMachine`]; the handle talks to it only through channels. The
//! driver never awaits the client request queue, so nothing the application
//! does can stall the transport's I/O.

use super::connection::{
    configure_mqtt_options, PublishError, ReconnectConfig, SessionError, SessionState,
};
use super::event_router::{EventRoute, EventRouter};
use super::publish_tracker::PublishTracker;
use super::session_machine::{SessionAction, SessionEvent, SessionMachine};
use crate::config::MqttSection;
use crate::transport::Publisher;
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, Event, EventLoop, Outgoing, QoS};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn, Instrument};

const REQUEST_CHANNEL_CAPACITY: usize = 10;
const COMMAND_CHANNEL_CAPACITY: usize = 16;
const FATAL_CHANNEL_CAPACITY: usize = 4;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
const DISCONNECT_FLUSH: Duration = Duration::from_millis(500);

type PublishResponder = oneshot::Sender<Result<(), PublishError>>;
type SubscribeResponder = oneshot::Sender<Result<QoS, SessionError>>;

enum SessionCommand {
    Publish {
        topic: String,
        payload: Bytes,
        respond_to: PublishResponder,
    },
    Subscribe {
        topic: String,
        respond_to: SubscribeResponder,
    },
}

/// Driver inputs held until `connect` spawns the driver
///
/// The event loop's network stream is `Send` but not `Sync`, so it sits
/// behind a std mutex to keep the handle shareable across tasks.
struct PendingDriver {
    client: AsyncClient,
    event_loop: EventLoop,
    commands_rx: mpsc::Receiver<SessionCommand>,
    fatal_rx: mpsc::Receiver<SessionError>,
}

/// Handle to the single broker session of this process
pub struct SessionManager {
    client_id: String,
    endpoint: String,
    pending: std::sync::Mutex<Option<PendingDriver>>,
    reconnect_config: ReconnectConfig,
    connect_timeout: Duration,
    publish_timeout: Duration,
    commands_tx: mpsc::Sender<SessionCommand>,
    state_tx: Arc<watch::Sender<SessionState>>,
    state_rx: watch::Receiver<SessionState>,
    shutdown_tx: watch::Sender<bool>,
    fatal_tx: mpsc::Sender<SessionError>,
    driver_handle: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    /// Build the session; loads TLS material but does not touch the network
    pub fn new(client_id: &str, config: &MqttSection) -> Result<Self, SessionError> {
        let mqtt_options = configure_mqtt_options(client_id, config)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);
        let (fatal_tx, fatal_rx) = mpsc::channel(FATAL_CHANNEL_CAPACITY);

        Ok(Self {
            client_id: client_id.to_string(),
            endpoint: config.endpoint.clone(),
            pending: std::sync::Mutex::new(Some(PendingDriver {
                client,
                event_loop,
                commands_rx,
                fatal_rx,
            })),
            reconnect_config: ReconnectConfig::default(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            publish_timeout: Duration::from_secs(config.publish_timeout_secs),
            commands_tx,
            state_tx: Arc::new(state_tx),
            state_rx,
            shutdown_tx,
            fatal_tx,
            driver_handle: Mutex::new(None),
        })
    }

    pub fn with_reconnect_config(mut self, reconnect_config: ReconnectConfig) -> Self {
        self.reconnect_config = reconnect_config;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    /// Watch channel following every state transition
    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Start the driver and wait for the broker to acknowledge the session
    ///
    /// Returns the receiver on which later fatal session errors are
    /// reported. A session can be connected once.
    pub async fn connect(&mut self) -> Result<mpsc::Receiver<SessionError>, SessionError> {
        let PendingDriver {
            client,
            event_loop,
            commands_rx,
            mut fatal_rx,
        } = self
            .pending
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| SessionError::ConnectFailed {
                endpoint: self.endpoint.clone(),
                client_id: self.client_id.clone(),
                reason: "session already started".to_string(),
            })?;

        let mut machine = SessionMachine::new(&self.client_id, &self.endpoint);
        machine.begin_connect();
        self.state_tx.send_replace(machine.state().clone());

        info!(
            client_id = %self.client_id,
            endpoint = %self.endpoint,
            "Connecting to broker"
        );

        let driver = SessionDriver {
            client,
            machine,
            publishes: PublishTracker::new(),
            subscribers: HashMap::new(),
            state_tx: self.state_tx.clone(),
            fatal_tx: self.fatal_tx.clone(),
            reconnect_config: self.reconnect_config.clone(),
            reconnect_attempts: 0,
            stopped: false,
        };
        let span = crate::session_span!(client_id = %self.client_id);
        let handle = tokio::spawn(
            driver
                .run(event_loop, commands_rx, self.shutdown_tx.subscribe())
                .instrument(span),
        );
        *self.driver_handle.lock().await = Some(handle);

        self.wait_for_connection(&mut fatal_rx).await?;
        Ok(fatal_rx)
    }

    async fn wait_for_connection(
        &self,
        fatal_rx: &mut mpsc::Receiver<SessionError>,
    ) -> Result<(), SessionError> {
        let mut state_rx = self.state_rx.clone();

        let outcome = tokio::time::timeout(self.connect_timeout, async {
            tokio::select! {
                fatal = fatal_rx.recv() => Err(fatal.unwrap_or(SessionError::DriverStopped)),
                connected = state_rx.wait_for(SessionState::can_publish) => {
                    connected.map(|_| ()).map_err(|_| SessionError::DriverStopped)
                }
            }
        })
        .await;

        match outcome {
            Ok(Ok(())) => {
                info!(client_id = %self.client_id, "Connected!");
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                let _ = self.shutdown_tx.send(true);
                Err(SessionError::ConnectTimeout {
                    endpoint: self.endpoint.clone(),
                    timeout_secs: self.connect_timeout.as_secs(),
                })
            }
        }
    }

    /// Subscribe at QoS 1 and wait for the broker's grant
    ///
    /// Granted topics are restored automatically when a resumed session
    /// comes back without them.
    pub async fn subscribe(&self, topic: &str) -> Result<QoS, SessionError> {
        let (respond_to, response) = oneshot::channel();
        self.commands_tx
            .send(SessionCommand::Subscribe {
                topic: topic.to_string(),
                respond_to,
            })
            .await
            .map_err(|_| SessionError::DriverStopped)?;

        match tokio::time::timeout(self.connect_timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SessionError::DriverStopped),
            Err(_) => Err(SessionError::SubscribeRequestFailed {
                topic: topic.to_string(),
                reason: format!("no acknowledgment within {:?}", self.connect_timeout),
            }),
        }
    }

    async fn request_publish(&self, topic: &str, payload: Bytes) -> Result<(), PublishError> {
        let state = self.state();
        if !state.can_publish() {
            return Err(PublishError::NotConnected { state });
        }

        let (respond_to, response) = oneshot::channel();
        self.commands_tx
            .send(SessionCommand::Publish {
                topic: topic.to_string(),
                payload,
                respond_to,
            })
            .await
            .map_err(|_| PublishError::DriverStopped)?;

        response.await.map_err(|_| PublishError::DriverStopped)?
    }

    /// Stop the driver, sending a clean disconnect if connected
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);

        let handle = self.driver_handle.lock().await.take();
        if let Some(mut handle) = handle {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
                Ok(Ok(())) => debug!("Session driver shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!("Session driver ended with error: {}", e);
                }
                Err(_) => {
                    warn!("Session driver didn't shut down gracefully, aborting");
                    handle.abort();
                }
                _ => {}
            }
        }

        self.state_tx.send_replace(SessionState::Disconnected);
        info!(client_id = %self.client_id, "MQTT session closed");
    }
}

#[async_trait]
impl Publisher for SessionManager {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PublishError> {
        match tokio::time::timeout(self.publish_timeout, self.request_publish(topic, payload))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(PublishError::AckTimeout {
                timeout: self.publish_timeout,
            }),
        }
    }

    fn session_state(&self) -> SessionState {
        self.state()
    }

    fn client_id(&self) -> &str {
        &self.client_id
    }
}

/// Owns the transport; runs on its own task
struct SessionDriver {
    client: AsyncClient,
    machine: SessionMachine,
    publishes: PublishTracker<PublishResponder>,
    subscribers: HashMap<String, SubscribeResponder>,
    state_tx: Arc<watch::Sender<SessionState>>,
    fatal_tx: mpsc::Sender<SessionError>,
    reconnect_config: ReconnectConfig,
    reconnect_attempts: u32,
    stopped: bool,
}

impl SessionDriver {
    async fn run(
        mut self,
        mut event_loop: EventLoop,
        mut commands: mpsc::Receiver<SessionCommand>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!("Starting MQTT session driver");

        while !self.stopped {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, closing session");
                        self.close(&mut event_loop).await;
                        break;
                    }
                }
                Some(command) = commands.recv() => self.handle_command(command),
                event = event_loop.poll() => match event {
                    Ok(event) => self.handle_event(event),
                    Err(e) => {
                        self.apply(EventRouter::route_error(&e));
                        if !self.stopped && !self.backoff(&mut shutdown_rx).await {
                            self.close(&mut event_loop).await;
                            break;
                        }
                    }
                }
            }
        }

        for responder in self.publishes.clear() {
            let _ = responder.send(Err(PublishError::DriverStopped));
        }
        info!("MQTT session driver stopped");
    }

    fn handle_command(&mut self, command: SessionCommand) {
        let state = self.machine.state().clone();
        match command {
            SessionCommand::Publish {
                topic,
                payload,
                respond_to,
            } => {
                if !state.can_publish() {
                    let _ = respond_to.send(Err(PublishError::NotConnected { state }));
                    return;
                }
                match self
                    .client
                    .try_publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
                {
                    Ok(()) => self.publishes.enqueue(respond_to),
                    Err(e) => {
                        let _ = respond_to.send(Err(PublishError::RequestFailed(e.to_string())));
                    }
                }
            }
            SessionCommand::Subscribe { topic, respond_to } => {
                if !state.can_publish() {
                    let _ = respond_to.send(Err(SessionError::SubscribeRequestFailed {
                        topic,
                        reason: format!("session is {state:?}"),
                    }));
                    return;
                }
                match self.client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                    Ok(()) => {
                        self.machine.request_subscription(topic.as_str());
                        self.subscribers.insert(topic, respond_to);
                    }
                    Err(e) => {
                        let _ = respond_to.send(Err(SessionError::SubscribeRequestFailed {
                            topic,
                            reason: e.to_string(),
                        }));
                    }
                }
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match EventRouter::route(&event) {
            EventRoute::Session(session_event) => self.apply(session_event),
            EventRoute::PublishSent { pkid } => {
                if !self.publishes.on_sent(pkid) {
                    debug!(pkid, "Publish sent without a waiting request");
                }
            }
            EventRoute::PublishAcknowledged { pkid } => {
                if let Some(responder) = self.publishes.on_acked(pkid) {
                    trace!(pkid, "Publish acknowledged");
                    let _ = responder.send(Ok(()));
                }
            }
            EventRoute::MessageReceived { topic, payload } => {
                debug!(
                    topic = %topic,
                    payload = %String::from_utf8_lossy(&payload),
                    "Received message"
                );
            }
            EventRoute::InfrastructureEvent(description) => {
                trace!(target: "mqtt_transport", "MQTT event: {}", description);
            }
            EventRoute::OutgoingEvent => {}
        }
    }

    fn apply(&mut self, event: SessionEvent) {
        let interrupted = matches!(event, SessionEvent::Interrupted(_));
        if matches!(event, SessionEvent::ConnAck { accepted: true, .. }) {
            self.reconnect_attempts = 0;
        }

        let actions = self.machine.handle(event);
        // Publish the new state before waking callers of the failed publishes
        self.sync_state();
        if interrupted {
            for responder in self.publishes.interrupt() {
                let _ = responder.send(Err(PublishError::Interrupted));
            }
        }

        for action in actions {
            self.execute(action);
        }
    }

    fn execute(&mut self, action: SessionAction) {
        match action {
            SessionAction::Resubscribe(topics) => {
                for topic in topics {
                    if let Err(e) = self.client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                        self.fail(SessionError::SubscribeRequestFailed {
                            topic,
                            reason: e.to_string(),
                        });
                        return;
                    }
                    debug!(topic = %topic, "Resubscribe requested");
                }
            }
            SessionAction::SubscriptionGranted { topic, qos } => {
                if let Some(responder) = self.subscribers.remove(&topic) {
                    let _ = responder.send(Ok(qos));
                }
            }
            SessionAction::SubscriptionRefused { topic } => {
                if let Some(responder) = self.subscribers.remove(&topic) {
                    let _ = responder.send(Err(SessionError::SubscribeRejected { topic }));
                }
            }
            SessionAction::SubscriptionAbandoned { topic, reason } => {
                if let Some(responder) = self.subscribers.remove(&topic) {
                    let _ = responder.send(Err(SessionError::SubscribeRequestFailed {
                        topic,
                        reason,
                    }));
                }
            }
            SessionAction::Fatal(e) => self.fail(e),
        }
    }

    fn fail(&mut self, error: SessionError) {
        error!(
            client_id = %self.machine.client_id(),
            error = %error,
            "Fatal session error"
        );
        if self.fatal_tx.try_send(error).is_err() {
            warn!("Fatal error channel closed or full");
        }
        self.stopped = true;
    }

    fn sync_state(&self) {
        let state = self.machine.state().clone();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    /// Wait before the next reconnection poll
    ///
    /// Returns false when the session should stop instead.
    async fn backoff(&mut self, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
        let Some((attempt, delay)) = self.reconnect_config.next_attempt(self.reconnect_attempts)
        else {
            self.fail(SessionError::ReconnectExhausted {
                attempts: self.reconnect_attempts,
            });
            return false;
        };
        self.reconnect_attempts = attempt;

        debug!(
            attempt,
            max_attempts = ?self.reconnect_config.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Attempting reconnection"
        );

        tokio::select! {
            changed = shutdown_rx.changed() => changed.is_ok() && !*shutdown_rx.borrow(),
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn close(&mut self, event_loop: &mut EventLoop) {
        let was_online = matches!(
            self.machine.state(),
            SessionState::Connected | SessionState::Resuming
        );
        self.apply(SessionEvent::ShutdownRequested);
        if !was_online {
            return;
        }

        if let Err(e) = self.client.try_disconnect() {
            warn!("Failed to request disconnect: {}", e);
            return;
        }
        let flushed = tokio::time::timeout(DISCONNECT_FLUSH, async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
        if flushed.is_err() {
            warn!("Timed out sending disconnect to broker");
        }
    }
}
