//! Pure event routing and message forwarding for MQTT events
//!
//! This module contains pure functions for classifying MQTT events into
//! routing decisions, plus the forwarder that hands inbound messages to
//! the consumer channel.

use std::sync::{Arc, Mutex};

use rumqttc::v5::Event;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::transport::InboundMessage;

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Broker refused the session with a reason code
    ConnectionRejected(String),
    /// Message received on a subscribed topic
    MessageReceived {
        topic: String,
        payload: Vec<u8>,
        metadata: Vec<(String, String)>,
        retain: bool,
    },
    /// Subscription acknowledged, possibly with a rejection reason
    SubscriptionAcknowledged {
        packet_id: u16,
        rejected: Option<String>,
    },
    /// MQTT broker closed the session
    Disconnected(String),
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent(String),
}

/// Classify an MQTT event into a routing decision (pure function)
pub fn route_mqtt_event(event: &Event) -> EventRoute {
    use rumqttc::v5::mqttbytes::v5::Packet;

    match event {
        Event::Incoming(packet) => match packet {
            Packet::ConnAck(connack) => match connack.code {
                rumqttc::v5::mqttbytes::v5::ConnectReturnCode::Success => {
                    EventRoute::ConnectionAcknowledged
                }
                code => EventRoute::ConnectionRejected(format!("{code:?}")),
            },
            Packet::Publish(publish) => {
                let metadata = publish
                    .properties
                    .as_ref()
                    .map(|properties| properties.user_properties.clone())
                    .unwrap_or_default();

                EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.to_vec(),
                    metadata,
                    retain: publish.retain,
                }
            }
            Packet::SubAck(suback) => EventRoute::SubscriptionAcknowledged {
                packet_id: suback.pkid,
                rejected: rejected_reason(&suback.return_codes),
            },
            Packet::Disconnect(frame) => {
                EventRoute::Disconnected(format!("{:?}", frame.reason_code))
            }
            other => EventRoute::InfrastructureEvent(format!("{other:?}")),
        },
        Event::Outgoing(outgoing) => EventRoute::OutgoingEvent(format!("{outgoing:?}")),
    }
}

/// Find the first rejecting grant code, if any (pure function)
///
/// Grant codes render as `QoS*` / `Success(..)`; anything else is a
/// rejection.
fn rejected_reason<C: std::fmt::Debug>(codes: &[C]) -> Option<String> {
    codes
        .iter()
        .map(|code| format!("{code:?}"))
        .find(|label| !(label.starts_with("QoS") || label.starts_with("Success")))
}

/// Message forwarding into the consumer channel (impure I/O)
///
/// The sender slot is shared between the session task and the client, so
/// the channel can be installed after the session is already running.
#[derive(Clone, Default)]
pub struct MessageForwarder {
    sender: Arc<Mutex<Option<mpsc::Sender<InboundMessage>>>>,
}

impl MessageForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the consumer channel
    pub fn set_sender(&self, sender: mpsc::Sender<InboundMessage>) {
        if let Ok(mut guard) = self.sender.lock() {
            *guard = Some(sender);
        }
    }

    /// Drop the consumer channel so the receiving side observes a close
    pub fn clear_sender(&self) {
        if let Ok(mut guard) = self.sender.lock() {
            *guard = None;
        }
    }

    /// Hand a message to the consumer, waiting while the channel is full
    pub async fn forward(&self, message: InboundMessage) {
        let sender = match self.sender.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => None,
        };

        match sender {
            Some(sender) => {
                if sender.send(message).await.is_err() {
                    warn!("Inbound message dropped: consumer channel closed");
                }
            }
            None => {
                debug!("Inbound message dropped: no consumer installed");
            }
        }
    }
}
