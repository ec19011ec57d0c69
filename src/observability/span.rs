//! Server span recording on top of the OpenTelemetry SDK.

use std::borrow::Cow;

use opentelemetry::trace::{Span as _, SpanContext, SpanKind, Status, Tracer as _, TracerProvider as _};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider, Span};

use crate::observability::propagation::TraceContext;

/// Instrumentation scope name of spans produced by this crate.
pub const INSTRUMENTATION_SCOPE: &str = "api-template";

pub const ATTR_HTTP_METHOD: &str = "http.method";
pub const ATTR_HTTP_URL: &str = "http.url";
pub const ATTR_REQUEST_ID: &str = "http.request_id";
pub const ATTR_CLIENT_IP: &str = "http.client_ip";
pub const ATTR_STATUS_CODE: &str = "http.status_code";
pub const ATTR_DURATION_MS: &str = "http.duration_ms";

/// Opens spans with the tracer of an explicitly constructed provider.
#[derive(Clone, Debug)]
pub struct SpanRecorder {
    tracer: SdkTracer,
}

impl SpanRecorder {
    pub fn new(provider: &SdkTracerProvider) -> Self {
        Self {
            tracer: provider.tracer(INSTRUMENTATION_SCOPE),
        }
    }

    /// Start a span. With a parent the span joins the parent's trace,
    /// otherwise it starts a new one.
    pub fn start_span(
        &self,
        name: impl Into<Cow<'static, str>>,
        kind: SpanKind,
        parent: Option<&TraceContext>,
    ) -> RequestSpan {
        let parent_cx = parent.map(TraceContext::to_parent).unwrap_or_else(Context::new);
        let span = self
            .tracer
            .span_builder(name)
            .with_kind(kind)
            .start_with_context(&self.tracer, &parent_cx);
        RequestSpan { inner: Some(span) }
    }
}

/// One unit of traced work, closed exactly once.
///
/// A `RequestSpan` without an inner span stands in when tracing is
/// disabled; every operation on it is a no-op.
#[derive(Debug)]
pub struct RequestSpan {
    inner: Option<Span>,
}

impl RequestSpan {
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn set_attribute(&mut self, attribute: KeyValue) {
        if let Some(span) = self.inner.as_mut() {
            span.set_attribute(attribute);
        }
    }

    /// Attach error detail and mark the span as failed.
    pub fn record_exception(&mut self, kind: &str, message: &str) {
        if let Some(span) = self.inner.as_mut() {
            span.add_event(
                "exception",
                vec![
                    KeyValue::new("exception.type", kind.to_string()),
                    KeyValue::new("exception.message", message.to_string()),
                ],
            );
            span.set_status(Status::error(message.to_string()));
        }
    }

    /// End the span. Later calls do nothing.
    pub fn close(&mut self) {
        if let Some(mut span) = self.inner.take() {
            span.end();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Identity of the span while it is open.
    pub fn span_context(&self) -> Option<SpanContext> {
        self.inner.as_ref().map(|span| span.span_context().clone())
    }
}

impl Drop for RequestSpan {
    fn drop(&mut self) {
        self.close();
    }
}
