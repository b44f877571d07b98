//! Pure session state machine
//!
//! [`SessionMachine`] owns the session state and the bookkeeping needed to
//! restore subscriptions after a resume. It performs no I/O: the session
//! driver feeds it [`SessionEvent`]s translated from the transport and
//! executes the [`SessionAction`]s it returns. Subscription grants arrive as
//! later events on the same driver, so nothing here ever waits on the
//! transport.

use super::connection::{SessionError, SessionState};
use rumqttc::QoS;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, error, info, warn};

/// Connection-level events the machine reacts to
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Broker acknowledged a (re)connect
    ConnAck {
        session_present: bool,
        accepted: bool,
        code: String,
    },
    /// A subscribe request left the client with this packet id
    SubscribeSent { pkid: u16 },
    /// Broker answered a subscribe request; `None` means refused
    SubAck {
        pkid: u16,
        grants: Vec<Option<QoS>>,
    },
    /// Transport detected a lost connection
    Interrupted(String),
    /// Orderly shutdown requested by the application
    ShutdownRequested,
}

/// Side effects requested by the machine
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    /// Re-issue these subscriptions, in order
    Resubscribe(Vec<String>),
    /// An application-requested subscription was granted
    SubscriptionGranted { topic: String, qos: QoS },
    /// An application-requested subscription was refused by the broker
    SubscriptionRefused { topic: String },
    /// An application-requested subscription will never be acknowledged
    SubscriptionAbandoned { topic: String, reason: String },
    /// The session cannot continue
    Fatal(SessionError),
}

/// Per-topic resubscription result
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRecord {
    pub topic: String,
    pub granted_qos: Option<QoS>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SubscriptionKind {
    /// Requested by the application while connected
    Initial,
    /// Re-issued while resuming
    Restore,
}

#[derive(Debug, Clone)]
struct PendingSubscription {
    topic: String,
    kind: SubscriptionKind,
}

/// Check collected resubscription grants
///
/// Returns the first topic the broker refused.
pub fn evaluate_resubscribe(results: &[SubscriptionRecord]) -> Result<(), SessionError> {
    match results.iter().find(|r| r.granted_qos.is_none()) {
        Some(rejected) => Err(SessionError::ResubscribeRejected {
            topic: rejected.topic.clone(),
        }),
        None => Ok(()),
    }
}

/// Session state machine
#[derive(Debug)]
pub struct SessionMachine {
    client_id: String,
    endpoint: String,
    state: SessionState,
    subscriptions: Vec<String>,
    requested: VecDeque<PendingSubscription>,
    awaiting_ack: HashMap<u16, PendingSubscription>,
    resubscribe_results: Vec<SubscriptionRecord>,
    last_resubscribe_result: Option<Vec<SubscriptionRecord>>,
}

impl SessionMachine {
    pub fn new(client_id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            endpoint: endpoint.into(),
            state: SessionState::Disconnected,
            subscriptions: Vec::new(),
            requested: VecDeque::new(),
            awaiting_ack: HashMap::new(),
            resubscribe_results: Vec::new(),
            last_resubscribe_result: None,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Topics restored after a session-not-present resume
    pub fn subscriptions(&self) -> &[String] {
        &self.subscriptions
    }

    pub fn last_resubscribe_result(&self) -> Option<&[SubscriptionRecord]> {
        self.last_resubscribe_result.as_deref()
    }

    /// Disconnected -> Connecting
    pub fn begin_connect(&mut self) {
        if self.state == SessionState::Disconnected {
            self.transition(SessionState::Connecting);
        }
    }

    /// Record an application subscribe request that was handed to the client
    pub fn request_subscription(&mut self, topic: impl Into<String>) {
        self.requested.push_back(PendingSubscription {
            topic: topic.into(),
            kind: SubscriptionKind::Initial,
        });
    }

    /// Apply one event and return the actions it requires
    pub fn handle(&mut self, event: SessionEvent) -> Vec<SessionAction> {
        match event {
            SessionEvent::ConnAck {
                session_present,
                accepted,
                code,
            } => self.on_connack(session_present, accepted, code),
            SessionEvent::SubscribeSent { pkid } => {
                if let Some(pending) = self.requested.pop_front() {
                    self.awaiting_ack.insert(pkid, pending);
                } else {
                    debug!(pkid, "Subscribe sent with no tracked request");
                }
                Vec::new()
            }
            SessionEvent::SubAck { pkid, grants } => self.on_suback(pkid, grants),
            SessionEvent::Interrupted(reason) => self.on_interrupted(reason),
            SessionEvent::ShutdownRequested => self.on_shutdown(),
        }
    }

    fn on_connack(
        &mut self,
        session_present: bool,
        accepted: bool,
        code: String,
    ) -> Vec<SessionAction> {
        match self.state.clone() {
            SessionState::Connecting => {
                if accepted {
                    self.transition(SessionState::Connected);
                    Vec::new()
                } else {
                    self.transition(SessionState::Disconnected);
                    vec![SessionAction::Fatal(SessionError::ConnectFailed {
                        endpoint: self.endpoint.clone(),
                        client_id: self.client_id.clone(),
                        reason: format!("broker refused connection: {code}"),
                    })]
                }
            }
            SessionState::Interrupted(_) => {
                if !accepted {
                    warn!(
                        client_id = %self.client_id,
                        code = %code,
                        "Broker refused resumed connection, will retry"
                    );
                    return Vec::new();
                }

                info!(
                    client_id = %self.client_id,
                    session_present,
                    "Connection resumed"
                );
                if session_present || self.subscriptions.is_empty() {
                    self.transition(SessionState::Connected);
                    return Vec::new();
                }

                info!(
                    client_id = %self.client_id,
                    topics = self.subscriptions.len(),
                    "Session did not persist, resubscribing to existing topics"
                );
                self.transition(SessionState::Resuming);
                self.resubscribe_results.clear();
                let topics = self.subscriptions.clone();
                for topic in &topics {
                    self.requested.push_back(PendingSubscription {
                        topic: topic.clone(),
                        kind: SubscriptionKind::Restore,
                    });
                }
                vec![SessionAction::Resubscribe(topics)]
            }
            other => {
                debug!(state = ?other, "Ignoring connection acknowledgment");
                Vec::new()
            }
        }
    }

    fn on_suback(&mut self, pkid: u16, grants: Vec<Option<QoS>>) -> Vec<SessionAction> {
        let Some(pending) = self.awaiting_ack.remove(&pkid) else {
            debug!(pkid, "Subscription acknowledgment for unknown request");
            return Vec::new();
        };
        let granted_qos = grants.first().copied().flatten();

        match pending.kind {
            SubscriptionKind::Initial => match granted_qos {
                Some(qos) => {
                    if !self.subscriptions.contains(&pending.topic) {
                        self.subscriptions.push(pending.topic.clone());
                    }
                    info!(topic = %pending.topic, ?qos, "Subscription granted");
                    vec![SessionAction::SubscriptionGranted {
                        topic: pending.topic,
                        qos,
                    }]
                }
                None => {
                    error!(topic = %pending.topic, "Broker rejected subscription");
                    vec![SessionAction::SubscriptionRefused {
                        topic: pending.topic,
                    }]
                }
            },
            SubscriptionKind::Restore => {
                self.resubscribe_results.push(SubscriptionRecord {
                    topic: pending.topic,
                    granted_qos,
                });
                if self.restore_outstanding() {
                    return Vec::new();
                }
                self.finish_resubscribe()
            }
        }
    }

    fn restore_outstanding(&self) -> bool {
        self.requested
            .iter()
            .chain(self.awaiting_ack.values())
            .any(|p| p.kind == SubscriptionKind::Restore)
    }

    fn finish_resubscribe(&mut self) -> Vec<SessionAction> {
        let results = std::mem::take(&mut self.resubscribe_results);
        info!(client_id = %self.client_id, ?results, "Resubscribe results");
        let outcome = evaluate_resubscribe(&results);
        self.last_resubscribe_result = Some(results);

        match outcome {
            Ok(()) => {
                self.transition(SessionState::Connected);
                Vec::new()
            }
            Err(e) => {
                error!(client_id = %self.client_id, error = %e, "Resubscription refused");
                self.transition(SessionState::Disconnected);
                vec![SessionAction::Fatal(e)]
            }
        }
    }

    fn on_interrupted(&mut self, reason: String) -> Vec<SessionAction> {
        match self.state.clone() {
            SessionState::Connecting => {
                self.transition(SessionState::Disconnected);
                vec![SessionAction::Fatal(SessionError::ConnectFailed {
                    endpoint: self.endpoint.clone(),
                    client_id: self.client_id.clone(),
                    reason,
                })]
            }
            SessionState::Connected | SessionState::Resuming => {
                let actions = self.abandon_pending(&reason);
                self.transition(SessionState::Interrupted(reason));
                actions
            }
            SessionState::Interrupted(_) => {
                debug!(reason = %reason, "Still interrupted");
                self.state = SessionState::Interrupted(reason);
                Vec::new()
            }
            SessionState::Disconnected => Vec::new(),
        }
    }

    fn on_shutdown(&mut self) -> Vec<SessionAction> {
        let actions = self.abandon_pending("session shut down");
        self.transition(SessionState::Disconnected);
        actions
    }

    /// Drop all in-flight subscription bookkeeping
    ///
    /// Restores are re-issued on the next resume; application requests are
    /// reported back as abandoned.
    fn abandon_pending(&mut self, reason: &str) -> Vec<SessionAction> {
        self.resubscribe_results.clear();
        self.requested
            .drain(..)
            .chain(self.awaiting_ack.drain().map(|(_, p)| p))
            .filter(|p| p.kind == SubscriptionKind::Initial)
            .map(|p| SessionAction::SubscriptionAbandoned {
                topic: p.topic,
                reason: reason.to_string(),
            })
            .collect()
    }

    fn transition(&mut self, next: SessionState) {
        log_state_transition(&self.client_id, &self.state, &next);
        self.state = next;
    }
}

/// Log a session state transition
pub fn log_state_transition(client_id: &str, from: &SessionState, to: &SessionState) {
    match (from, to) {
        (SessionState::Connecting, SessionState::Connected) => {
            info!(client_id, "MQTT session established");
        }
        (_, SessionState::Interrupted(reason)) => {
            warn!(client_id, reason = %reason, "Connection interrupted");
        }
        (SessionState::Resuming, SessionState::Connected) => {
            info!(client_id, "Subscriptions restored, session connected");
        }
        (SessionState::Interrupted(_), SessionState::Connected) => {
            info!(client_id, "Session resumed");
        }
        _ => {
            debug!(client_id, "Session state: {:?} -> {:?}", from, to);
        }
    }
}
