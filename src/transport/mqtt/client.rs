//! Impure I/O operations for the MQTT session
//!
//! This module handles all impure I/O including network communication,
//! async coordination, and integration with the rumqttc client.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::v5::mqttbytes::v5::PublishProperties;
use rumqttc::v5::{AsyncClient, EventLoop};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::connection::{
    configure_mqtt_options, ConnectionState, MqttError, SubscribeAck, DELIVERY_QOS, PUBLISH_RETAIN,
};
use super::message_handler::{route_mqtt_event, EventRoute, MessageForwarder};
use crate::device::{Credentials, DeviceInfo};
use crate::observability::metrics::metrics;
use crate::transport::{InboundMessage, Transport};

const EVENT_LOOP_CAPACITY: usize = 10;

/// MQTT v5 session for device pub/sub
///
/// The session is started once by [`connect`](MqttConnection::connect) and
/// never reconnects. Any event loop failure ends it, and callers observe
/// the terminal state through [`connection_state`](Transport::connection_state).
pub struct MqttConnection {
    client: AsyncClient,
    // Wrapped in a Mutex only to restore Sync: EventLoop is Send but not
    // Sync, and it is only ever accessed through &mut self.
    event_loop: Mutex<Option<EventLoop>>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    ack_rx: watch::Receiver<SubscribeAck>,
    ack_tx: watch::Sender<SubscribeAck>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    forwarder: MessageForwarder,
    session: Option<JoinHandle<()>>,
}

impl MqttConnection {
    pub fn new(device: &DeviceInfo, credentials: &Credentials) -> Result<Self, MqttError> {
        let mqtt_options = configure_mqtt_options(device, credentials)?;

        // Create client and event loop
        let (client, event_loop) = AsyncClient::new(mqtt_options, EVENT_LOOP_CAPACITY);

        let ((state_tx, state_rx), (ack_tx, ack_rx), (shutdown_tx, shutdown_rx)) =
            setup_session_channels();

        Ok(Self {
            client,
            event_loop: Mutex::new(Some(event_loop)),
            state_tx,
            state_rx,
            ack_rx,
            ack_tx,
            shutdown_tx,
            shutdown_rx,
            forwarder: MessageForwarder::new(),
            session: None,
        })
    }

    /// Start the session task and wait for the broker to acknowledge the
    /// connection. Blocks until a CONNACK arrives; a refused session is
    /// fatal.
    pub async fn connect(&mut self) -> Result<(), MqttError> {
        let event_loop = self
            .event_loop
            .get_mut()
            .expect("event loop mutex")
            .take()
            .ok_or(MqttError::AlreadyStarted)?;

        metrics().connection_attempt();
        info!("Starting MQTT session");

        let handle = spawn_session(
            event_loop,
            self.state_tx.clone(),
            self.ack_tx.clone(),
            self.shutdown_rx.clone(),
            self.forwarder.clone(),
        );
        self.session = Some(handle);

        let mut state_rx = self.state_rx.clone();
        match wait_for_connection_confirmation(&mut state_rx).await {
            Ok(()) => {
                metrics().connection_established();
                metrics().set_connected(true);
                info!("Connected to broker");
                Ok(())
            }
            Err(e) => {
                metrics().connection_failure();
                Err(e)
            }
        }
    }

    /// Subscribe to a topic and wait for the broker's acknowledgement
    pub async fn subscribe(&self, topic: &str) -> Result<(), MqttError> {
        self.ensure_connected()?;

        let seen = self.ack_rx.borrow().count;
        self.client
            .subscribe(topic, DELIVERY_QOS)
            .await
            .map_err(|e| MqttError::SubscriptionFailed(e.to_string()))?;

        let mut ack_rx = self.ack_rx.clone();
        let mut state_rx = self.state_rx.clone();
        wait_for_subscribe_ack(&mut ack_rx, &mut state_rx, seen).await?;

        debug!(%topic, "Subscription acknowledged");
        Ok(())
    }

    /// Publish a payload with metadata attached as MQTT v5 user properties
    pub async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        metadata: Vec<(String, String)>,
    ) -> Result<(), MqttError> {
        self.ensure_connected()?;

        let properties = PublishProperties {
            user_properties: metadata,
            ..Default::default()
        };

        self.client
            .publish_with_properties(topic, DELIVERY_QOS, PUBLISH_RETAIN, payload, properties)
            .await
            .map_err(|e| MqttError::PublishFailed(e.to_string()))?;

        Ok(())
    }

    /// Disconnect from the broker, giving the session `grace` to drain
    pub async fn disconnect(&mut self, grace: Duration) -> Result<(), MqttError> {
        // Signal the session task to stop
        let _ = self.shutdown_tx.send(true);

        let disconnect_result = self.client.disconnect().await;

        if let Some(mut handle) = self.session.take() {
            match tokio::time::timeout(grace, &mut handle).await {
                Ok(Ok(())) => {
                    debug!("Session task shut down gracefully");
                }
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!(error = %e, "Session task ended with error");
                }
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!("Session task did not stop within grace period, aborting");
                    handle.abort();
                }
            }
        }

        self.forwarder.clear_sender();
        metrics().set_connected(false);
        let _ = self.state_tx.send(ConnectionState::Disconnected(
            "disconnect requested".to_string(),
        ));

        info!("Disconnected from broker");
        disconnect_result.map_err(|e| MqttError::DisconnectFailed(e.to_string()))
    }

    fn ensure_connected(&self) -> Result<(), MqttError> {
        let current_state = self.state_rx.borrow().clone();
        if current_state != ConnectionState::Connected {
            return Err(MqttError::NotConnected {
                state: current_state,
            });
        }
        Ok(())
    }
}

/// Implementation of Transport trait for MqttConnection
#[async_trait]
impl Transport for MqttConnection {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        MqttConnection::connect(self).await
    }

    async fn disconnect(&mut self, grace: Duration) -> Result<(), Self::Error> {
        MqttConnection::disconnect(self, grace).await
    }

    async fn subscribe(&self, topic: &str) -> Result<(), Self::Error> {
        MqttConnection::subscribe(self, topic).await
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        metadata: Vec<(String, String)>,
    ) -> Result<(), Self::Error> {
        MqttConnection::publish(self, topic, payload, metadata).await
    }

    fn is_connected(&self) -> bool {
        *self.state_rx.borrow() == ConnectionState::Connected
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        Some(self.state_rx.borrow().clone())
    }

    fn set_message_sender(&self, sender: mpsc::Sender<InboundMessage>) {
        self.forwarder.set_sender(sender);
    }
}

impl Drop for MqttConnection {
    fn drop(&mut self) {
        // Signal shutdown to the session task if it is still running
        let _ = self.shutdown_tx.send(true);

        if let Some(handle) = self.session.take() {
            handle.abort();
        }

        // Async operations are not possible here; callers use disconnect()
        // for a graceful shutdown.
    }
}

/// Create session state, acknowledgement, and shutdown channels
/// (pure function for channel setup)
#[allow(clippy::type_complexity)]
fn setup_session_channels() -> (
    (
        watch::Sender<ConnectionState>,
        watch::Receiver<ConnectionState>,
    ),
    (watch::Sender<SubscribeAck>, watch::Receiver<SubscribeAck>),
    (watch::Sender<bool>, watch::Receiver<bool>),
) {
    (
        watch::channel(ConnectionState::Connecting),
        watch::channel(SubscribeAck::default()),
        watch::channel(false),
    )
}

/// Wait until the session task reports the broker's CONNACK
///
/// Blocks indefinitely while the broker stays silent.
async fn wait_for_connection_confirmation(
    state_rx: &mut watch::Receiver<ConnectionState>,
) -> Result<(), MqttError> {
    loop {
        let current_state = state_rx.borrow_and_update().clone();
        match current_state {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Disconnected(reason) => {
                return Err(MqttError::ConnectionRefused(reason))
            }
            ConnectionState::Connecting => {}
        }

        if state_rx.changed().await.is_err() {
            return Err(MqttError::ConnectionRefused(
                "connection state channel closed".to_string(),
            ));
        }
    }
}

/// Wait for a subscription acknowledgement newer than `seen`
///
/// Fails when the acknowledgement carries a rejection or the connection is
/// lost while waiting.
async fn wait_for_subscribe_ack(
    ack_rx: &mut watch::Receiver<SubscribeAck>,
    state_rx: &mut watch::Receiver<ConnectionState>,
    seen: u64,
) -> Result<(), MqttError> {
    loop {
        let ack = ack_rx.borrow_and_update().clone();
        if ack.count > seen {
            return match ack.rejected {
                None => Ok(()),
                Some(reason) => Err(MqttError::SubscriptionFailed(reason)),
            };
        }

        if let ConnectionState::Disconnected(reason) = state_rx.borrow_and_update().clone() {
            return Err(MqttError::SubscriptionFailed(format!(
                "connection lost: {reason}"
            )));
        }

        tokio::select! {
            changed = ack_rx.changed() => {
                if changed.is_err() {
                    return Err(MqttError::SubscriptionFailed(
                        "acknowledgement channel closed".to_string(),
                    ));
                }
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    return Err(MqttError::SubscriptionFailed(
                        "connection state channel closed".to_string(),
                    ));
                }
            }
        }
    }
}

fn spawn_session(
    mut event_loop: EventLoop,
    state_tx: watch::Sender<ConnectionState>,
    ack_tx: watch::Sender<SubscribeAck>,
    mut shutdown_rx: watch::Receiver<bool>,
    forwarder: MessageForwarder,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                // Check for shutdown signal first
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!("Shutdown signal received, stopping session task");
                        let _ = state_tx.send(ConnectionState::Disconnected(
                            "shutdown requested".to_string(),
                        ));
                        break;
                    }
                }

                event_result = event_loop.poll() => {
                    match event_result {
                        Ok(event) => {
                            handle_event(&event, &state_tx, &ack_tx, &forwarder).await;
                        }
                        Err(e) => {
                            // The session never reconnects: any event loop
                            // error ends it.
                            warn!(error = %e, "MQTT event loop error, session ended");
                            metrics().set_connected(false);
                            let _ = state_tx.send(ConnectionState::Disconnected(e.to_string()));
                            break;
                        }
                    }
                }
            }
        }
        debug!("MQTT session task stopped");
    })
}

async fn handle_event(
    event: &rumqttc::v5::Event,
    state_tx: &watch::Sender<ConnectionState>,
    ack_tx: &watch::Sender<SubscribeAck>,
    forwarder: &MessageForwarder,
) {
    match route_mqtt_event(event) {
        EventRoute::ConnectionAcknowledged => {
            info!("Connection acknowledged by broker");
            let _ = state_tx.send(ConnectionState::Connected);
        }
        EventRoute::ConnectionRejected(reason) => {
            warn!(%reason, "Broker rejected the connection");
            let _ = state_tx.send(ConnectionState::Disconnected(reason));
        }
        EventRoute::MessageReceived {
            topic,
            payload,
            metadata,
            retain,
        } => {
            debug!(%topic, bytes = payload.len(), retain, "Message received");
            forwarder
                .forward(InboundMessage {
                    topic,
                    payload,
                    metadata,
                })
                .await;
        }
        EventRoute::SubscriptionAcknowledged { packet_id, rejected } => {
            debug!(packet_id, rejected = ?rejected, "Subscription acknowledged");
            ack_tx.send_modify(|ack| {
                ack.count += 1;
                ack.rejected = rejected;
            });
        }
        EventRoute::Disconnected(reason) => {
            warn!(%reason, "Broker closed the session");
            metrics().set_connected(false);
            let _ = state_tx.send(ConnectionState::Disconnected(reason));
        }
        EventRoute::InfrastructureEvent(event_str) => {
            debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
        }
        EventRoute::OutgoingEvent(event_str) => {
            debug!(target: "mqtt_transport", "Outgoing: {}", event_str);
        }
    }
}
