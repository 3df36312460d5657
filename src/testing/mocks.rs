//! Mock implementations for testing
//!
//! Provides a mock [`Transport`] that records traffic and simulates
//! failures so the client can be exercised without a running broker.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::transport::{ConnectionState, InboundMessage, MqttError, Transport};

/// One publish captured by the mock
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedPublish {
    pub topic: String,
    pub payload: Vec<u8>,
    pub metadata: Vec<(String, String)>,
}

struct MockInner {
    state: ConnectionState,
    published: Vec<RecordedPublish>,
    subscriptions: Vec<String>,
    disconnect_grace: Option<Duration>,
    sender: Option<mpsc::Sender<InboundMessage>>,
}

impl Default for MockInner {
    fn default() -> Self {
        Self {
            state: ConnectionState::Connecting,
            published: Vec::new(),
            subscriptions: Vec::new(),
            disconnect_grace: None,
            sender: None,
        }
    }
}

/// Mock transport for testing
///
/// Clones share state, so a test can keep one handle for assertions while
/// the client owns another.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockInner>>,
    fail_connect: bool,
    fail_subscribe: bool,
    fail_publish: bool,
    fail_disconnect: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock that fails every operation
    pub fn with_failure() -> Self {
        Self {
            fail_connect: true,
            fail_subscribe: true,
            fail_publish: true,
            fail_disconnect: true,
            ..Default::default()
        }
    }

    pub fn with_subscribe_failure() -> Self {
        Self {
            fail_subscribe: true,
            ..Default::default()
        }
    }

    pub fn with_publish_failure() -> Self {
        Self {
            fail_publish: true,
            ..Default::default()
        }
    }

    pub fn with_disconnect_failure() -> Self {
        Self {
            fail_disconnect: true,
            ..Default::default()
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn published(&self) -> Vec<RecordedPublish> {
        self.lock().published.clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.lock().subscriptions.clone()
    }

    pub fn disconnect_grace(&self) -> Option<Duration> {
        self.lock().disconnect_grace
    }

    /// Deliver a message as if the broker pushed it
    ///
    /// Returns false when no consumer is installed or the channel has
    /// closed.
    pub async fn inject_message(&self, message: InboundMessage) -> bool {
        let sender = self.lock().sender.clone();
        match sender {
            Some(sender) => sender.send(message).await.is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        if self.fail_connect {
            let reason = "Mock connection failure".to_string();
            self.lock().state = ConnectionState::Disconnected(reason.clone());
            return Err(MqttError::ConnectionRefused(reason));
        }

        self.lock().state = ConnectionState::Connected;
        Ok(())
    }

    async fn disconnect(&mut self, grace: Duration) -> Result<(), Self::Error> {
        // Dropping the sender closes the consumer channel, matching the
        // real transport's shutdown behavior.
        let sender = {
            let mut inner = self.lock();
            inner.disconnect_grace = Some(grace);
            inner.state = ConnectionState::Disconnected("disconnect requested".to_string());
            inner.sender.take()
        };
        drop(sender);

        if self.fail_disconnect {
            return Err(MqttError::DisconnectFailed(
                "Mock disconnect failure".to_string(),
            ));
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), Self::Error> {
        {
            let inner = self.lock();
            if inner.state != ConnectionState::Connected {
                return Err(MqttError::NotConnected {
                    state: inner.state.clone(),
                });
            }
        }

        if self.fail_subscribe {
            return Err(MqttError::SubscriptionFailed(
                "Mock subscription failure".to_string(),
            ));
        }

        self.lock().subscriptions.push(topic.to_string());
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        metadata: Vec<(String, String)>,
    ) -> Result<(), Self::Error> {
        {
            let inner = self.lock();
            if inner.state != ConnectionState::Connected {
                return Err(MqttError::NotConnected {
                    state: inner.state.clone(),
                });
            }
        }

        if self.fail_publish {
            return Err(MqttError::PublishFailed("Mock publish failure".to_string()));
        }

        self.lock().published.push(RecordedPublish {
            topic: topic.to_string(),
            payload,
            metadata,
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().state == ConnectionState::Connected
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        Some(self.lock().state.clone())
    }

    fn set_message_sender(&self, sender: mpsc::Sender<InboundMessage>) {
        self.lock().sender = Some(sender);
    }
}
