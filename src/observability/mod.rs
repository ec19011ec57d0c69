//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Every inbound request (http::middleware::request_logger):
//!     → correlation.rs (request id)
//!     → propagation.rs (inbound traceparent)
//!     → span.rs (server span, exported over OTLP)
//!     → timer.rs (latency)
//!     → logging.rs (JSON events enriched with trace ids)
//!
//! Consumers:
//!     → Console (human-readable or JSON)
//!     → Rotating log files (JSON)
//!     → OTLP collector (spans)
//! ```
//!
//! # Design Decisions
//! - No ambient globals for the tracer: an `ObservabilityContext` is built
//!   once at startup and handed to the middleware
//! - Request ID flows through logs, span attributes and the response
//! - Tracing is optional; without it requests still get ids and logs

pub mod correlation;
pub mod logging;
pub mod propagation;
pub mod span;
pub mod telemetry;
pub mod timer;

use opentelemetry_sdk::trace::SdkTracerProvider;

pub use correlation::RequestId;
pub use propagation::{Propagator, TraceContext};
pub use span::{RequestSpan, SpanRecorder};
pub use telemetry::{Telemetry, TelemetryError};
pub use timer::RequestTimer;

/// Everything the request pipeline needs to observe a request.
///
/// Cheap to clone and immutable; shared by every request.
#[derive(Clone, Debug, Default)]
pub struct ObservabilityContext {
    propagator: Propagator,
    spans: Option<SpanRecorder>,
}

impl ObservabilityContext {
    /// Full pipeline: ids, logs and spans from `provider`.
    pub fn new(provider: &SdkTracerProvider) -> Self {
        Self {
            propagator: Propagator::new(),
            spans: Some(SpanRecorder::new(provider)),
        }
    }

    /// Ids and logs only; no spans are recorded.
    pub fn without_tracing() -> Self {
        Self::default()
    }

    pub fn propagator(&self) -> &Propagator {
        &self.propagator
    }

    pub fn spans(&self) -> Option<&SpanRecorder> {
        self.spans.as_ref()
    }

    pub fn tracing_enabled(&self) -> bool {
        self.spans.is_some()
    }
}
