//! Pure routing of transport events
//!
//! Translates raw rumqttc events into session events, publish
//! acknowledgments and inbound messages.

use super::session_machine::SessionEvent;
use bytes::Bytes;
use rumqttc::{ConnectReturnCode, Event, Outgoing, Packet, SubscribeReasonCode};

/// Routing decision for one transport event
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Feed into the session state machine
    Session(SessionEvent),
    /// A QoS 1 publish left the client
    PublishSent { pkid: u16 },
    /// The broker acknowledged a QoS 1 publish
    PublishAcknowledged { pkid: u16 },
    /// Message received on a subscribed topic
    MessageReceived { topic: String, payload: Bytes },
    /// Keep-alive and other protocol traffic
    InfrastructureEvent(String),
    /// Outgoing event with no follow-up
    OutgoingEvent,
}

/// Pure routing decisions for transport events
pub struct EventRouter;

impl EventRouter {
    pub fn route(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(packet) => Self::route_incoming(packet),
            Event::Outgoing(Outgoing::Publish(pkid)) => EventRoute::PublishSent { pkid: *pkid },
            Event::Outgoing(Outgoing::Subscribe(pkid)) => {
                EventRoute::Session(SessionEvent::SubscribeSent { pkid: *pkid })
            }
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    fn route_incoming(packet: &Packet) -> EventRoute {
        match packet {
            Packet::ConnAck(connack) => EventRoute::Session(SessionEvent::ConnAck {
                session_present: connack.session_present,
                accepted: connack.code == ConnectReturnCode::Success,
                code: format!("{:?}", connack.code),
            }),
            Packet::SubAck(suback) => EventRoute::Session(SessionEvent::SubAck {
                pkid: suback.pkid,
                grants: suback
                    .return_codes
                    .iter()
                    .map(|code| match code {
                        SubscribeReasonCode::Success(qos) => Some(*qos),
                        SubscribeReasonCode::Failure => None,
                    })
                    .collect(),
            }),
            Packet::PubAck(puback) => EventRoute::PublishAcknowledged { pkid: puback.pkid },
            Packet::Publish(publish) => EventRoute::MessageReceived {
                topic: publish.topic.clone(),
                payload: publish.payload.clone(),
            },
            Packet::Disconnect => EventRoute::Session(SessionEvent::Interrupted(
                "broker closed the connection".to_string(),
            )),
            other => EventRoute::InfrastructureEvent(format!("{other:?}")),
        }
    }

    /// Translate an event-loop error into an interruption
    pub fn route_error(error: &rumqttc::ConnectionError) -> SessionEvent {
        SessionEvent::Interrupted(error.to_string())
    }
}
