//! End-to-end client scenarios against the mock transport
//!
//! Covers the full report pipeline, command publishing with trace
//! propagation, broker-down startup, and clean shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::trace::{SpanKind, Status};
use opentelemetry_sdk::trace::{InMemorySpanExporter, SpanData};
use proptest::prelude::*;
use serde_json::json;

use bambulink::testing::MockTransport;
use bambulink::{
    on_message, BambuClient, ClientError, DeviceInfo, InboundMessage, Telemetry, DISCONNECT_GRACE,
};

fn test_device() -> DeviceInfo {
    DeviceInfo::new("X1C", "01S09A2C0500103")
}

fn test_client(transport: MockTransport) -> (BambuClient<MockTransport>, InMemorySpanExporter) {
    let exporter = InMemorySpanExporter::default();
    let telemetry = Arc::new(Telemetry::with_span_exporter(exporter.clone()));
    (BambuClient::new(test_device(), telemetry, transport), exporter)
}

fn finished_spans(exporter: &InMemorySpanExporter) -> Vec<SpanData> {
    exporter.get_finished_spans().expect("finished spans")
}

fn find_span(exporter: &InMemorySpanExporter, name: &str) -> Option<SpanData> {
    finished_spans(exporter)
        .into_iter()
        .find(|span| span.name == name)
}

/// The consumer task handles reports asynchronously, so span assertions
/// poll until the span shows up.
async fn wait_for_span(exporter: &InMemorySpanExporter, name: &str) -> SpanData {
    for _ in 0..100 {
        if let Some(span) = find_span(exporter, name) {
            return span;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("span '{name}' never appeared");
}

fn trace_id_hex(span: &SpanData) -> String {
    format!(
        "{:032x}",
        u128::from_be_bytes(span.span_context.trace_id().to_bytes())
    )
}

#[tokio::test]
async fn test_report_pipeline_end_to_end() {
    let transport = MockTransport::new();
    let (mut client, exporter) = test_client(transport.clone());

    client.connect().await.expect("connect");
    let report_topic = client.device().report_topic();
    client.subscribe(&report_topic).await.expect("subscribe");
    assert_eq!(transport.subscriptions(), vec![report_topic.clone()]);

    let delivered = transport
        .inject_message(InboundMessage {
            topic: report_topic.clone(),
            payload: b"{\"temp\":\"60\"}".to_vec(),
            metadata: Vec::new(),
        })
        .await;
    assert!(delivered, "report should reach the consumer channel");

    let report = wait_for_span(&exporter, "onMessage").await;
    assert_eq!(report.span_kind, SpanKind::Consumer);
    assert!(report.attributes.iter().any(
        |kv| kv.key.as_str() == "message" && kv.value.as_str() == "{\"temp\":\"60\"}"
    ));

    let subscribe = find_span(&exporter, "Subscribe").expect("Subscribe span");
    assert_eq!(subscribe.span_kind, SpanKind::Client);
    assert!(matches!(subscribe.status, Status::Unset));
    assert!(subscribe
        .attributes
        .iter()
        .any(|kv| kv.key.as_str() == "topic" && kv.value.as_str() == report_topic));
}

#[tokio::test]
async fn test_publish_carries_trace_context() {
    let transport = MockTransport::new();
    let (mut client, exporter) = test_client(transport.clone());
    client.connect().await.expect("connect");

    let command = json!({"message": "Hello mqtt"});
    let request_topic = client.device().request_topic();
    client.publish(&request_topic, &command).await.expect("publish");

    let published = transport.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, request_topic);
    assert_eq!(
        published[0].payload,
        serde_json::to_vec(&command).expect("payload bytes")
    );

    let traceparent = published[0]
        .metadata
        .iter()
        .find(|(key, _)| key == "traceparent")
        .map(|(_, value)| value.clone())
        .expect("traceparent user property");

    let publish = find_span(&exporter, "Publish").expect("Publish span");
    assert_eq!(publish.span_kind, SpanKind::Producer);

    // traceparent is 00-{trace_id}-{span_id}-{flags}
    let propagated_trace_id = traceparent.split('-').nth(1).expect("trace id field");
    assert_eq!(propagated_trace_id, trace_id_hex(&publish));
}

#[tokio::test]
async fn test_report_span_continues_publish_trace() {
    let transport = MockTransport::new();
    let (mut client, exporter) = test_client(transport.clone());
    client.connect().await.expect("connect");

    client
        .publish(
            "device/01S09A2C0500103/request",
            &json!({"print": {"command": "pause"}}),
        )
        .await
        .expect("publish");

    // Echo the command's user properties back, as the device firmware does.
    let metadata = transport.published()[0].metadata.clone();
    let delivered = transport
        .inject_message(InboundMessage {
            topic: "device/01S09A2C0500103/report".to_string(),
            payload: b"{\"print\":{\"command\":\"pause\",\"result\":\"success\"}}".to_vec(),
            metadata,
        })
        .await;
    assert!(delivered);

    let report = wait_for_span(&exporter, "onMessage").await;
    let publish = find_span(&exporter, "Publish").expect("Publish span");

    assert_eq!(
        report.span_context.trace_id(),
        publish.span_context.trace_id()
    );
    assert_eq!(report.parent_span_id, publish.span_context.span_id());
}

#[tokio::test]
async fn test_broker_down_at_startup() {
    let transport = MockTransport::with_failure();
    let (mut client, exporter) = test_client(transport.clone());

    let result = client.connect().await;
    assert!(matches!(result, Err(ClientError::Connect(_))));
    assert!(!client.is_connected());

    // Connect is not traced, and nothing was sent.
    assert!(finished_spans(&exporter).is_empty());
    assert!(transport.published().is_empty());
    assert!(transport.subscriptions().is_empty());
}

#[tokio::test]
async fn test_clean_shutdown() {
    let transport = MockTransport::new();
    let (mut client, exporter) = test_client(transport.clone());

    client.connect().await.expect("connect");
    let report_topic = client.device().report_topic();
    client.subscribe(&report_topic).await.expect("subscribe");
    client.disconnect().await.expect("disconnect");

    assert_eq!(transport.disconnect_grace(), Some(DISCONNECT_GRACE));
    assert!(!client.is_connected());

    let disconnect = find_span(&exporter, "Disconnect").expect("Disconnect span");
    assert_eq!(disconnect.span_kind, SpanKind::Client);
    assert!(matches!(disconnect.status, Status::Unset));

    // Publishing after shutdown is refused but still traced.
    let result = client
        .publish("device/01S09A2C0500103/request", &json!({"gcode": "stop"}))
        .await;
    assert!(matches!(result, Err(ClientError::NotConnected)));
    let publish = find_span(&exporter, "Publish").expect("Publish span");
    assert!(matches!(publish.status, Status::Error { .. }));
}

#[tokio::test]
async fn test_each_operation_records_exactly_one_span() {
    let transport = MockTransport::new();
    let (mut client, exporter) = test_client(transport);

    client.connect().await.expect("connect");
    client
        .subscribe("device/01S09A2C0500103/report")
        .await
        .expect("subscribe");
    client
        .publish(
            "device/01S09A2C0500103/request",
            &json!({"message": "Hello mqtt"}),
        )
        .await
        .expect("publish");
    client.disconnect().await.expect("disconnect");

    let spans = finished_spans(&exporter);
    let names: Vec<&str> = spans.iter().map(|span| span.name.as_ref()).collect();
    assert_eq!(names.iter().filter(|name| **name == "Subscribe").count(), 1);
    assert_eq!(names.iter().filter(|name| **name == "Publish").count(), 1);
    assert_eq!(names.iter().filter(|name| **name == "Disconnect").count(), 1);
    assert!(!names.contains(&"Connect"));
    assert_eq!(spans.len(), 3);
}

#[tokio::test]
async fn test_publish_failure_is_swallowed_after_tracing() {
    let transport = MockTransport::with_publish_failure();
    let (mut client, exporter) = test_client(transport.clone());
    client.connect().await.expect("connect");

    let result = client
        .publish(
            "device/01S09A2C0500103/request",
            &json!({"message": "Hello mqtt"}),
        )
        .await;
    assert!(result.is_ok(), "send failures should not surface to callers");
    assert!(transport.published().is_empty());

    let publish = find_span(&exporter, "Publish").expect("Publish span");
    assert!(matches!(publish.status, Status::Error { .. }));
}

#[tokio::test]
async fn test_subscribe_failure_surfaces_error() {
    let transport = MockTransport::with_subscribe_failure();
    let (mut client, exporter) = test_client(transport);
    client.connect().await.expect("connect");

    let result = client.subscribe("device/01S09A2C0500103/report").await;
    assert!(matches!(result, Err(ClientError::Subscribe { .. })));

    let spans = finished_spans(&exporter);
    assert_eq!(spans.len(), 1);
    assert!(matches!(spans[0].status, Status::Error { .. }));
}

#[tokio::test]
async fn test_concurrent_message_handling() {
    let exporter = InMemorySpanExporter::default();
    let telemetry = Arc::new(Telemetry::with_span_exporter(exporter.clone()));

    let mut handles = Vec::new();
    for i in 0..8 {
        let telemetry = telemetry.clone();
        handles.push(tokio::spawn(async move {
            on_message(
                &telemetry,
                InboundMessage {
                    topic: format!("device/printer-{i}/report"),
                    payload: format!("{{\"seq\":{i}}}").into_bytes(),
                    metadata: Vec::new(),
                },
            );
        }));
    }
    for result in futures::future::join_all(handles).await {
        result.expect("handler task");
    }

    let spans = finished_spans(&exporter);
    assert_eq!(spans.len(), 8);
    assert!(spans.iter().all(|span| span.name == "onMessage"));
}

proptest! {
    // Commands are flat string maps on the wire; whatever publish encodes
    // must parse back to the same map.
    #[test]
    fn test_publish_payload_encoding_round_trips(
        payload in proptest::collection::hash_map("[a-z_]{1,12}", "\\PC{0,32}", 0..8)
    ) {
        let encoded = serde_json::to_vec(&payload).expect("encode");
        let decoded: HashMap<String, String> =
            serde_json::from_slice(&encoded).expect("decode");
        prop_assert_eq!(decoded, payload);
    }
}
