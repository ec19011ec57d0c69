//! W3C trace context propagation.
//!
//! # Responsibilities
//! - Extract trace context from incoming request headers
//! - Inject trace context into outgoing request headers
//!
//! # Design Decisions
//! - Malformed input is indistinguishable from absent input
//! - Extraction starts from an empty context, never the ambient one
//! - Injection only touches `traceparent` / `tracestate`

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::{SpanContext, TraceContextExt};
use opentelemetry::Context;
use opentelemetry_sdk::propagation::TraceContextPropagator;

pub const TRACEPARENT: &str = "traceparent";
pub const TRACESTATE: &str = "tracestate";

/// A valid remote trace identity.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceContext {
    span_context: SpanContext,
}

impl TraceContext {
    /// Wrap a span context. Returns `None` unless it is valid.
    pub fn from_span_context(span_context: SpanContext) -> Option<Self> {
        span_context.is_valid().then_some(Self { span_context })
    }

    /// 32 lowercase hex characters.
    pub fn trace_id(&self) -> String {
        self.span_context.trace_id().to_string()
    }

    /// 16 lowercase hex characters.
    pub fn span_id(&self) -> String {
        self.span_context.span_id().to_string()
    }

    pub fn span_context(&self) -> &SpanContext {
        &self.span_context
    }

    /// An OpenTelemetry context with this identity as its (remote) parent span.
    pub fn to_parent(&self) -> Context {
        Context::new().with_remote_span_context(self.span_context.clone())
    }
}

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k| k.as_str()).collect()
    }
}

struct HeaderInjector<'a>(&'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        let name = HeaderName::from_bytes(key.as_bytes());
        let value = HeaderValue::from_str(&value);
        if let (Ok(name), Ok(value)) = (name, value) {
            self.0.insert(name, value);
        }
    }
}

/// Text-map propagator for the W3C `traceparent` format.
#[derive(Debug, Clone, Default)]
pub struct Propagator {
    inner: TraceContextPropagator,
}

impl Propagator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the inbound trace identity, if there is a valid one.
    pub fn extract(&self, headers: &HeaderMap) -> Option<TraceContext> {
        let cx = self
            .inner
            .extract_with_context(&Context::new(), &HeaderExtractor(headers));
        let span_context = cx.span().span_context().clone();
        TraceContext::from_span_context(span_context)
    }

    /// Write `trace` into outbound headers.
    pub fn inject(&self, trace: &TraceContext, headers: &mut HeaderMap) {
        self.inner
            .inject_context(&trace.to_parent(), &mut HeaderInjector(headers));
    }
}
