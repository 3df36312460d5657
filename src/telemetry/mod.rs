//! Distributed tracing pipeline
//!
//! Owns the tracer provider, the tracer that client operations record spans
//! with, and the propagator used to carry span context across the broker in
//! message user properties. Spans flow through a batch processor into the
//! OTLP/HTTP exporter in [`export`].

use std::collections::HashMap;

use opentelemetry::global::BoxedTracer;
use opentelemetry::propagation::{TextMapCompositePropagator, TextMapPropagator};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::Context;
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use opentelemetry_sdk::trace::{SdkTracerProvider, SpanExporter};
use opentelemetry_sdk::Resource;
use thiserror::Error;

use crate::config::TelemetrySection;

pub mod export;

pub use export::OtlpHttpExporter;

/// Service name reported to the collector and used as the tracer scope.
pub const SERVICE_NAME: &str = "bambulink";

/// Errors from building or draining the trace pipeline.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Trace exporter initialization failed")]
    ExporterInit(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Trace pipeline flush failed: {0}")]
    Flush(String),
}

/// Handle to the tracing pipeline shared by all client operations.
pub struct Telemetry {
    provider: SdkTracerProvider,
    tracer: BoxedTracer,
    propagator: TextMapCompositePropagator,
}

impl Telemetry {
    /// Build the full pipeline: OTLP exporter, batch processor, tracer.
    pub fn init(config: &TelemetrySection) -> Result<Self, TelemetryError> {
        let exporter = OtlpHttpExporter::new(&config.endpoint)?;
        let provider = SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(service_resource())
            .build();

        Ok(Self::from_provider(provider))
    }

    /// Build a pipeline over an arbitrary exporter with a simple processor.
    ///
    /// Spans are handed to the exporter as soon as they end, which keeps
    /// tests deterministic.
    pub fn with_span_exporter<E>(exporter: E) -> Self
    where
        E: SpanExporter + 'static,
    {
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter)
            .with_resource(service_resource())
            .build();

        Self::from_provider(provider)
    }

    fn from_provider(provider: SdkTracerProvider) -> Self {
        let tracer = BoxedTracer::new(Box::new(provider.tracer(SERVICE_NAME)));
        let propagator = TextMapCompositePropagator::new(vec![
            Box::new(TraceContextPropagator::new()),
            Box::new(BaggagePropagator::new()),
        ]);

        Self {
            provider,
            tracer,
            propagator,
        }
    }

    /// Tracer for recording operation spans.
    pub fn tracer(&self) -> &BoxedTracer {
        &self.tracer
    }

    /// Serialize `cx` into metadata pairs suitable for message user
    /// properties. Keys are sorted so the wire layout is stable.
    pub fn inject(&self, cx: &Context) -> Vec<(String, String)> {
        let mut carrier = HashMap::new();
        self.propagator.inject_context(cx, &mut carrier);

        let mut metadata: Vec<(String, String)> = carrier.into_iter().collect();
        metadata.sort();
        metadata
    }

    /// Rebuild a context from incoming metadata pairs. Messages without
    /// trace headers yield a root context.
    pub fn extract(&self, metadata: &[(String, String)]) -> Context {
        let carrier: HashMap<String, String> = metadata.iter().cloned().collect();
        self.propagator
            .extract_with_context(&Context::new(), &carrier)
    }

    /// Push any buffered spans through the exporter.
    pub fn force_flush(&self) -> Result<(), TelemetryError> {
        self.provider
            .force_flush()
            .map_err(|e| TelemetryError::Flush(e.to_string()))
    }

    /// Flush remaining spans and tear the pipeline down.
    pub fn shutdown(&self) -> Result<(), TelemetryError> {
        self.provider
            .shutdown()
            .map_err(|e| TelemetryError::Flush(e.to_string()))
    }
}

fn service_resource() -> Resource {
    Resource::builder().with_service_name(SERVICE_NAME).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{Span, SpanKind, TraceContextExt, Tracer};
    use opentelemetry_sdk::trace::InMemorySpanExporter;

    fn test_telemetry() -> (Telemetry, InMemorySpanExporter) {
        let exporter = InMemorySpanExporter::default();
        let telemetry = Telemetry::with_span_exporter(exporter.clone());
        (telemetry, exporter)
    }

    #[test]
    fn test_pipeline_captures_spans() {
        let (telemetry, exporter) = test_telemetry();

        let mut span = telemetry
            .tracer()
            .span_builder("Subscribe")
            .with_kind(SpanKind::Client)
            .start(telemetry.tracer());
        span.end();

        let finished = exporter.get_finished_spans().expect("finished spans");
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].name, "Subscribe");
    }

    #[test]
    fn test_inject_produces_traceparent() {
        let (telemetry, _exporter) = test_telemetry();

        let span = telemetry
            .tracer()
            .span_builder("Publish")
            .start(telemetry.tracer());
        let cx = Context::new().with_remote_span_context(span.span_context().clone());

        let metadata = telemetry.inject(&cx);
        assert!(metadata.iter().any(|(key, _)| key == "traceparent"));
    }

    #[test]
    fn test_inject_extract_round_trip() {
        let (telemetry, _exporter) = test_telemetry();

        let span = telemetry
            .tracer()
            .span_builder("Publish")
            .start(telemetry.tracer());
        let trace_id = span.span_context().trace_id();
        let cx = Context::new().with_remote_span_context(span.span_context().clone());

        let metadata = telemetry.inject(&cx);
        let extracted = telemetry.extract(&metadata);

        assert_eq!(extracted.span().span_context().trace_id(), trace_id);
    }

    #[test]
    fn test_extract_without_headers_is_root() {
        let (telemetry, _exporter) = test_telemetry();

        let extracted = telemetry.extract(&[]);
        assert!(!extracted.span().span_context().is_valid());
    }

    #[test]
    fn test_shutdown_flushes_pending_spans() {
        let (telemetry, exporter) = test_telemetry();

        let mut span = telemetry
            .tracer()
            .span_builder("Disconnect")
            .start(telemetry.tracer());
        span.end();

        telemetry.shutdown().expect("shutdown");
        assert_eq!(exporter.get_finished_spans().expect("spans").len(), 1);
    }
}
