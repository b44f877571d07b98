//! Test helpers and utilities for integration tests

use rumqttc::{ConnAck, ConnectReturnCode, Event, Outgoing, Packet, QoS, SubAck, SubscribeReasonCode};
use telemetry_forwarder::config::{
    DeviceSection, ForwarderConfig, MqttSection, PublishSection, SensorSection, TopicSection,
};
use telemetry_forwarder::transport::mqtt::{
    EventRoute, EventRouter, SessionAction, SessionMachine, SessionState,
};

/// Create a test configuration for integration tests
#[allow(dead_code)]
pub fn test_config() -> ForwarderConfig {
    ForwarderConfig {
        device: DeviceSection {
            sensor_name: "sensor1".to_string(),
            location: "greenhouse-1".to_string(),
            site_name: "site-a".to_string(),
        },
        mqtt: MqttSection {
            endpoint: "mqtt://localhost:1883".to_string(),
            ..MqttSection::default()
        },
        topic: TopicSection::default(),
        publish: PublishSection::default(),
        sensor: SensorSection::default(),
    }
}

#[allow(dead_code)]
pub fn connack(session_present: bool) -> Event {
    Event::Incoming(Packet::ConnAck(ConnAck {
        session_present,
        code: ConnectReturnCode::Success,
    }))
}

#[allow(dead_code)]
pub fn suback(pkid: u16, granted: Option<QoS>) -> Event {
    let code = match granted {
        Some(qos) => SubscribeReasonCode::Success(qos),
        None => SubscribeReasonCode::Failure,
    };
    Event::Incoming(Packet::SubAck(SubAck {
        pkid,
        return_codes: vec![code],
    }))
}

#[allow(dead_code)]
pub fn subscribe_sent(pkid: u16) -> Event {
    Event::Outgoing(Outgoing::Subscribe(pkid))
}

/// Feed a transport event through the router into the machine
#[allow(dead_code)]
pub fn feed(machine: &mut SessionMachine, event: &Event) -> Vec<SessionAction> {
    match EventRouter::route(event) {
        EventRoute::Session(session_event) => machine.handle(session_event),
        _ => Vec::new(),
    }
}

/// Machine that connected and holds a granted subscription to each topic
#[allow(dead_code)]
pub fn connected_machine(topics: &[&str]) -> SessionMachine {
    let mut machine = SessionMachine::new("sensor1", "mqtt://localhost:1883");
    machine.begin_connect();
    feed(&mut machine, &connack(false));

    for (i, topic) in topics.iter().enumerate() {
        let pkid = 1 + i as u16;
        machine.request_subscription(*topic);
        feed(&mut machine, &subscribe_sent(pkid));
        feed(&mut machine, &suback(pkid, Some(QoS::AtLeastOnce)));
    }

    assert_eq!(machine.state(), &SessionState::Connected);
    machine
}
