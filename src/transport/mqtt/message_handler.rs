//! Pure routing decisions for MQTT events

use super::connection::QueueTopics;
use crate::transport::QueueChannel;
use rumqttc::v5::mqttbytes::v5::{Packet, Publish};
use rumqttc::v5::Event;

pub struct MessageHandler;

impl MessageHandler {
    /// Route an MQTT event to the handling the event loop should perform
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived(publish.clone()),
                Packet::Disconnect(_) => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Decide what to do with a publish received on a subscription
    pub fn classify_publish(publish: &Publish, topics: &QueueTopics) -> PublishDecision {
        let topic = String::from_utf8_lossy(&publish.topic);
        if publish.retain {
            return PublishDecision::Discard(format!("retained message on {topic}"));
        }
        match topics.channel_for_topic(&topic) {
            Some(channel) => PublishDecision::Deliver(channel),
            None => PublishDecision::Discard(format!("no channel for topic {topic}")),
        }
    }
}

#[derive(Debug, Clone)]
pub enum EventRoute {
    ConnectionAcknowledged,
    MessageReceived(Publish),
    Disconnected,
    SubscriptionConfirmed { packet_id: u16 },
    /// PingResp, PubAck and friends
    InfrastructureEvent(String),
    OutgoingEvent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishDecision {
    Deliver(QueueChannel),
    /// Acknowledge and drop; the reason is logged
    Discard(String),
}
