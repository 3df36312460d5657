//! Transport layer for broker communication
//!
//! This module provides the transport abstraction and the MQTT
//! implementation used to exchange report and command messages with a
//! device over a broker.

use std::time::Duration;

use tokio::sync::mpsc;

pub mod mqtt;

pub use mqtt::{ConnectionState, MqttError};

/// Default transport implementation backed by MQTT v5.
pub type MqttTransport = mqtt::MqttConnection;

/// Capacity of the inbound message channel between the session task and the
/// client's consumer. Senders wait when the consumer falls behind, so bursts
/// are absorbed without unbounded growth.
pub const INBOUND_CHANNEL_CAPACITY: usize = 100;

/// A message delivered by the broker on a subscribed topic.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    /// User properties carried with the message, including trace headers.
    pub metadata: Vec<(String, String)>,
}

/// Create the bounded channel inbound messages flow through.
pub fn inbound_channel() -> (mpsc::Sender<InboundMessage>, mpsc::Receiver<InboundMessage>) {
    mpsc::channel(INBOUND_CHANNEL_CAPACITY)
}

/// Transport trait for broker communication
///
/// This trait provides an abstraction over the MQTT session to enable
/// dependency injection and testing.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Connect to the broker and wait until the session is acknowledged
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Disconnect from the broker, allowing in-flight traffic `grace` to drain
    async fn disconnect(&mut self, grace: Duration) -> Result<(), Self::Error>;

    /// Subscribe to a topic and wait for the broker's acknowledgement
    async fn subscribe(&self, topic: &str) -> Result<(), Self::Error>;

    /// Publish a payload with attached metadata pairs
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        metadata: Vec<(String, String)>,
    ) -> Result<(), Self::Error>;

    /// Check if transport is currently connected
    fn is_connected(&self) -> bool;

    /// Get current connection state if available
    fn connection_state(&self) -> Option<ConnectionState>;

    /// Install the channel inbound messages are forwarded into
    fn set_message_sender(&self, sender: mpsc::Sender<InboundMessage>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inbound_channel_is_bounded() {
        let (sender, _receiver) = inbound_channel();
        assert_eq!(sender.capacity(), INBOUND_CHANNEL_CAPACITY);
        assert_eq!(sender.max_capacity(), INBOUND_CHANNEL_CAPACITY);
    }

    #[tokio::test]
    async fn test_inbound_channel_delivers_in_order() {
        let (sender, mut receiver) = inbound_channel();

        for n in 0..3u8 {
            let message = InboundMessage {
                topic: "device/01/report".to_string(),
                payload: vec![n],
                metadata: Vec::new(),
            };
            sender.send(message).await.expect("send");
        }

        for n in 0..3u8 {
            let received = receiver.recv().await.expect("recv");
            assert_eq!(received.payload, vec![n]);
        }
    }
}
