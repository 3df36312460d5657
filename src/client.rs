//! Device-facing pub/sub client
//!
//! Wraps a [`Transport`] with the operation surface the rest of the process
//! uses: connect, subscribe, publish, disconnect. Subscribe, publish, and
//! message receipt each record a span; connect does not. Inbound messages
//! are drained by a consumer task spawned at connect time.

use std::sync::Arc;
use std::time::Duration;

use opentelemetry::trace::{Span, SpanKind, Status, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::device::DeviceInfo;
use crate::error::{ClientError, ClientResult};
use crate::observability::metrics::metrics;
use crate::telemetry::Telemetry;
use crate::transport::{self, InboundMessage, Transport};

/// Grace period granted to in-flight traffic when disconnecting
pub const DISCONNECT_GRACE: Duration = Duration::from_millis(250);

/// MQTT pub/sub client bound to a single device
pub struct BambuClient<T: Transport> {
    device: DeviceInfo,
    telemetry: Arc<Telemetry>,
    transport: T,
    consumer: Option<JoinHandle<()>>,
}

impl<T: Transport> BambuClient<T> {
    pub fn new(device: DeviceInfo, telemetry: Arc<Telemetry>, transport: T) -> Self {
        Self {
            device,
            telemetry,
            transport,
            consumer: None,
        }
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Connect to the broker and start the inbound consumer.
    ///
    /// Blocks until the broker acknowledges the session. A refused
    /// connection is fatal; there is no retry.
    pub async fn connect(&mut self) -> ClientResult<()> {
        let (sender, mut receiver) = transport::inbound_channel();
        self.transport.set_message_sender(sender);

        let telemetry = Arc::clone(&self.telemetry);
        self.consumer = Some(tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                on_message(&telemetry, message);
            }
            debug!("Inbound message channel closed");
        }));

        self.transport
            .connect()
            .await
            .map_err(ClientError::connect)?;

        info!(device_id = %self.device.id, "Device client connected");
        Ok(())
    }

    /// Subscribe to a topic, blocking until the broker acknowledges it.
    /// A failed subscription is fatal.
    pub async fn subscribe(&self, topic: &str) -> ClientResult<()> {
        let tracer = self.telemetry.tracer();
        let mut span = tracer
            .span_builder("Subscribe")
            .with_kind(SpanKind::Client)
            .with_attributes([KeyValue::new("topic", topic.to_string())])
            .start(tracer);

        if !self.transport.is_connected() {
            span.set_status(Status::error("not connected"));
            span.end();
            return Err(ClientError::NotConnected);
        }

        let result = self.transport.subscribe(topic).await;
        match &result {
            Ok(()) => {
                info!(%topic, "Subscribed");
            }
            Err(e) => {
                span.set_status(Status::error(e.to_string()));
            }
        }
        span.end();

        result.map_err(|e| ClientError::subscribe(topic, e))
    }

    /// Publish a JSON payload to a topic.
    ///
    /// Serialization happens before the span opens and a failure there is
    /// fatal. Send failures are recorded on the span and logged, then
    /// swallowed: delivery is fire-and-forget.
    pub async fn publish<P: Serialize>(&self, topic: &str, payload: &P) -> ClientResult<()> {
        let encoded = serde_json::to_vec(payload)?;
        let rendered = String::from_utf8_lossy(&encoded).into_owned();

        let tracer = self.telemetry.tracer();
        let mut span = tracer
            .span_builder("Publish")
            .with_kind(SpanKind::Producer)
            .with_attributes([KeyValue::new("payload", rendered)])
            .start(tracer);

        if !self.transport.is_connected() {
            span.set_status(Status::error("not connected"));
            span.end();
            return Err(ClientError::NotConnected);
        }

        // Carry this span's context on the message so a consumer can join
        // the trace.
        let cx = Context::new().with_remote_span_context(span.span_context().clone());
        let metadata = self.telemetry.inject(&cx);

        match self.transport.publish(topic, encoded, metadata).await {
            Ok(()) => {
                metrics().message_published();
                debug!(%topic, "Published message");
            }
            Err(e) => {
                metrics().publish_failure();
                warn!(%topic, error = %e, "Publish failed, message dropped");
                span.set_status(Status::error(e.to_string()));
            }
        }
        span.end();

        Ok(())
    }

    /// Disconnect from the broker and stop the inbound consumer.
    ///
    /// Transport errors during disconnect are recorded on the span and
    /// logged, never propagated. The caller flushes telemetry afterwards.
    pub async fn disconnect(&mut self) -> ClientResult<()> {
        let tracer = self.telemetry.tracer();
        let mut span = tracer
            .span_builder("Disconnect")
            .with_kind(SpanKind::Client)
            .start(tracer);

        if let Err(e) = self.transport.disconnect(DISCONNECT_GRACE).await {
            warn!(error = %e, "Disconnect reported an error");
            span.set_status(Status::error(e.to_string()));
        }

        if let Some(mut consumer) = self.consumer.take() {
            match tokio::time::timeout(DISCONNECT_GRACE, &mut consumer).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!(error = %e, "Consumer task ended with error");
                }
                Ok(Err(_)) => {}
                Err(_) => {
                    consumer.abort();
                }
            }
        }

        info!(device_id = %self.device.id, "Device client disconnected");
        span.end();
        Ok(())
    }
}

/// Handle one inbound message: record its span under the publisher's
/// context and log the payload.
///
/// Runs on the consumer task but is safe to call from anywhere; concurrent
/// calls each get their own span.
pub fn on_message(telemetry: &Telemetry, message: InboundMessage) {
    let payload = String::from_utf8_lossy(&message.payload).into_owned();
    let parent_cx = telemetry.extract(&message.metadata);

    let tracer = telemetry.tracer();
    let mut span = tracer
        .span_builder("onMessage")
        .with_kind(SpanKind::Consumer)
        .with_attributes([KeyValue::new("message", payload.clone())])
        .start_with_context(tracer, &parent_cx);

    metrics().message_received();
    info!(topic = %message.topic, payload = %payload, "Received message");

    span.end();
}
