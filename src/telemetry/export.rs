//! OTLP/HTTP span exporter
//!
//! Encodes finished spans into the OTLP JSON protocol and posts them to a
//! collector's `/v1/traces` endpoint with `reqwest`. Batch export runs off
//! the tracer provider's worker thread, so the HTTP request itself is
//! spawned onto the tokio runtime captured at construction time.

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use opentelemetry::trace::{SpanId, SpanKind, Status};
use opentelemetry::{Array, Value};
use opentelemetry_sdk::error::{OTelSdkError, OTelSdkResult};
use opentelemetry_sdk::trace::{SpanData, SpanExporter};
use opentelemetry_sdk::Resource;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, warn};

use crate::observability::metrics::metrics;
use crate::telemetry::{TelemetryError, SERVICE_NAME};

const EXPORT_TIMEOUT: Duration = Duration::from_secs(10);

/// Exports spans to an OTLP collector over HTTP/JSON.
#[derive(Debug)]
pub struct OtlpHttpExporter {
    client: reqwest::Client,
    endpoint: String,
    resource: Resource,
    runtime: tokio::runtime::Handle,
}

impl OtlpHttpExporter {
    /// Build an exporter targeting `<base_endpoint>/v1/traces`.
    ///
    /// Must be called from within a tokio runtime; the handle is kept so
    /// export requests can run even when driven from a non-async thread.
    pub fn new(base_endpoint: &str) -> Result<Self, TelemetryError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TelemetryError::ExporterInit(Box::new(e)))?;
        let client = reqwest::Client::builder()
            .timeout(EXPORT_TIMEOUT)
            .build()
            .map_err(|e| TelemetryError::ExporterInit(Box::new(e)))?;

        Ok(Self {
            client,
            endpoint: traces_url(base_endpoint),
            resource: Resource::builder().build(),
            runtime,
        })
    }

    fn encode_batch(&self, batch: &[SpanData]) -> JsonValue {
        let scope_name = batch
            .first()
            .map(|span| span.instrumentation_scope.name().to_string())
            .unwrap_or_else(|| SERVICE_NAME.to_string());
        let resource_attributes: Vec<JsonValue> = self
            .resource
            .iter()
            .map(|(key, value)| attribute(key.as_str(), value))
            .collect();
        let spans: Vec<JsonValue> = batch.iter().map(encode_span).collect();

        json!({
            "resourceSpans": [{
                "resource": { "attributes": resource_attributes },
                "scopeSpans": [{
                    "scope": { "name": scope_name },
                    "spans": spans,
                }],
            }],
        })
    }
}

impl SpanExporter for OtlpHttpExporter {
    fn export(&self, batch: Vec<SpanData>) -> impl Future<Output = OTelSdkResult> + Send {
        let span_count = batch.len();
        let payload = self.encode_batch(&batch);
        let request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&payload);
        let runtime = self.runtime.clone();
        let endpoint = self.endpoint.clone();

        // The batch processor drives this future from its own thread without
        // a reactor, so the request itself must run on the runtime.
        async move {
            match runtime.spawn(async move { request.send().await }).await {
                Ok(Ok(response)) if response.status().is_success() => {
                    debug!(spans = span_count, "Exported trace batch");
                    Ok(())
                }
                Ok(Ok(response)) => {
                    metrics().trace_export_failure();
                    let status = response.status();
                    warn!(%endpoint, %status, "Trace collector rejected batch");
                    Err(OTelSdkError::InternalFailure(format!(
                        "collector returned {status}"
                    )))
                }
                Ok(Err(e)) => {
                    metrics().trace_export_failure();
                    warn!(%endpoint, error = %e, "Trace export request failed");
                    Err(OTelSdkError::InternalFailure(e.to_string()))
                }
                Err(e) => {
                    metrics().trace_export_failure();
                    Err(OTelSdkError::InternalFailure(format!(
                        "export task failed: {e}"
                    )))
                }
            }
        }
    }

    fn set_resource(&mut self, resource: &Resource) {
        self.resource = resource.clone();
    }
}

fn traces_url(base: &str) -> String {
    format!("{}/v1/traces", base.trim_end_matches('/'))
}

fn encode_span(span: &SpanData) -> JsonValue {
    let trace_id = format!(
        "{:032x}",
        u128::from_be_bytes(span.span_context.trace_id().to_bytes())
    );
    let span_id = format!(
        "{:016x}",
        u64::from_be_bytes(span.span_context.span_id().to_bytes())
    );
    let parent_span_id = if span.parent_span_id == SpanId::INVALID {
        String::new()
    } else {
        format!("{:016x}", u64::from_be_bytes(span.parent_span_id.to_bytes()))
    };
    let attributes: Vec<JsonValue> = span
        .attributes
        .iter()
        .map(|kv| attribute(kv.key.as_str(), &kv.value))
        .collect();
    let events: Vec<JsonValue> = span
        .events
        .events
        .iter()
        .map(|event| {
            let event_attributes: Vec<JsonValue> = event
                .attributes
                .iter()
                .map(|kv| attribute(kv.key.as_str(), &kv.value))
                .collect();
            json!({
                "name": event.name.as_ref(),
                "timeUnixNano": unix_nanos(event.timestamp).to_string(),
                "attributes": event_attributes,
            })
        })
        .collect();

    json!({
        "traceId": trace_id,
        "spanId": span_id,
        "parentSpanId": parent_span_id,
        "name": span.name.as_ref(),
        "kind": span_kind_code(&span.span_kind),
        "startTimeUnixNano": unix_nanos(span.start_time).to_string(),
        "endTimeUnixNano": unix_nanos(span.end_time).to_string(),
        "attributes": attributes,
        "events": events,
        "status": status_value(&span.status),
    })
}

fn attribute(key: &str, value: &Value) -> JsonValue {
    json!({ "key": key, "value": any_value(value) })
}

fn any_value(value: &Value) -> JsonValue {
    match value {
        Value::Bool(b) => json!({ "boolValue": b }),
        Value::I64(i) => json!({ "intValue": i.to_string() }),
        Value::F64(f) => json!({ "doubleValue": f }),
        Value::String(s) => json!({ "stringValue": s.as_str() }),
        Value::Array(array) => json!({ "arrayValue": { "values": array_values(array) } }),
        other => json!({ "stringValue": other.to_string() }),
    }
}

fn array_values(array: &Array) -> Vec<JsonValue> {
    match array {
        Array::Bool(items) => items.iter().map(|b| json!({ "boolValue": b })).collect(),
        Array::I64(items) => items
            .iter()
            .map(|i| json!({ "intValue": i.to_string() }))
            .collect(),
        Array::F64(items) => items.iter().map(|f| json!({ "doubleValue": f })).collect(),
        Array::String(items) => items
            .iter()
            .map(|s| json!({ "stringValue": s.as_str() }))
            .collect(),
        _ => Vec::new(),
    }
}

fn status_value(status: &Status) -> JsonValue {
    match status {
        Status::Ok => json!({ "code": 1 }),
        Status::Error { description } => json!({ "code": 2, "message": description.as_ref() }),
        _ => json!({}),
    }
}

fn span_kind_code(kind: &SpanKind) -> i32 {
    match kind {
        SpanKind::Internal => 1,
        SpanKind::Server => 2,
        SpanKind::Client => 3,
        SpanKind::Producer => 4,
        SpanKind::Consumer => 5,
    }
}

fn unix_nanos(time: SystemTime) -> u128 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos()
}
