//! Request observability middleware.
//!
//! Wraps every request in a correlation id, a server span and a
//! started / completed-or-failed pair of log events.
//!
//! ```text
//! ENTERED → SPAN_OPEN → TIMER_RUNNING → DELEGATED → COMPLETED
//!                                                 ↘ FAILED
//! ```
//!
//! The layer is transparent to the wrapped service: responses come back
//! unchanged apart from `X-Request-ID`, errors are returned as-is and
//! panics are resumed with their original payload. Dropping the response
//! future mid-flight takes the failure path.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::task::{Context, Poll};

use axum::http::{HeaderValue, Request, Response, StatusCode};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use opentelemetry::trace::SpanKind;
use opentelemetry::KeyValue;
use tower::{Layer, Service};
use tracing::field::Empty;
use tracing::{Instrument, Level};

use crate::http::request::{RequestContext, RequestFacts, X_REQUEST_ID};
use crate::observability::correlation;
use crate::observability::logging::{FIELD_SPAN_ID, FIELD_TRACE_ID};
use crate::observability::span::{
    ATTR_CLIENT_IP, ATTR_DURATION_MS, ATTR_HTTP_METHOD, ATTR_HTTP_URL, ATTR_REQUEST_ID,
    ATTR_STATUS_CODE,
};
use crate::observability::{ObservabilityContext, RequestSpan, RequestTimer, TraceContext};

/// Error message logged when the request future is dropped before finishing.
pub const CANCELLED: &str = "request cancelled";

/// Layer installing [`RequestLogger`].
#[derive(Clone, Debug)]
pub struct RequestLoggerLayer {
    observability: ObservabilityContext,
}

impl RequestLoggerLayer {
    pub fn new(observability: ObservabilityContext) -> Self {
        Self { observability }
    }
}

impl<S> Layer<S> for RequestLoggerLayer {
    type Service = RequestLogger<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLogger {
            inner,
            observability: self.observability.clone(),
        }
    }
}

/// Observability middleware service.
#[derive(Clone, Debug)]
pub struct RequestLogger<S> {
    inner: S,
    observability: ObservabilityContext,
}

/// How delegation to the inner service ended.
pub enum Outcome<R, E> {
    Success(R),
    Failure(Failure<E>),
}

/// A failed delegation: an error value or a caught panic.
pub enum Failure<E> {
    Error(E),
    Panic(Box<dyn Any + Send>),
}

impl<E: fmt::Display> Failure<E> {
    /// Short type label recorded on the span.
    pub fn kind(&self) -> &'static str {
        match self {
            Failure::Error(_) => std::any::type_name::<E>(),
            Failure::Panic(_) => "panic",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Failure::Error(e) => e.to_string(),
            Failure::Panic(payload) => panic_message(payload.as_ref()),
        }
    }

    /// Hand the failure back to the caller unchanged.
    pub fn reraise(self) -> E {
        match self {
            Failure::Error(e) => e,
            Failure::Panic(payload) => panic::resume_unwind(payload),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

/// Run the downstream future, turning errors and panics into an [`Outcome`].
pub async fn delegate<F, R, E>(future: F) -> Outcome<R, E>
where
    F: Future<Output = Result<R, E>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(response)) => Outcome::Success(response),
        Ok(Err(error)) => Outcome::Failure(Failure::Error(error)),
        Err(payload) => Outcome::Failure(Failure::Panic(payload)),
    }
}

/// Bookkeeping for one request between entry and exit.
///
/// Exactly one of `complete` / `fail` takes effect; if neither ran, `Drop`
/// takes the failure path as a cancellation.
struct InFlight {
    context: RequestContext,
    span: RequestSpan,
    log_span: tracing::Span,
    finished: bool,
}

impl InFlight {
    fn begin<B>(observability: &ObservabilityContext, req: &mut Request<B>) -> Self {
        let request_id = correlation::new_id();
        let trace = observability.propagator().extract(req.headers());
        let facts = RequestFacts::from_request(req);

        let mut span = match observability.spans() {
            Some(recorder) => recorder.start_span(facts.span_name(), SpanKind::Server, trace.as_ref()),
            None => RequestSpan::disabled(),
        };
        span.set_attribute(KeyValue::new(ATTR_HTTP_METHOD, facts.method.to_string()));
        span.set_attribute(KeyValue::new(ATTR_HTTP_URL, facts.url.clone()));
        span.set_attribute(KeyValue::new(ATTR_REQUEST_ID, request_id.to_string()));
        span.set_attribute(KeyValue::new(ATTR_CLIENT_IP, facts.client_ip.clone()));

        // Handlers propagate from the server span; without one, from the inbound parent.
        let current = span
            .span_context()
            .and_then(TraceContext::from_span_context)
            .or_else(|| trace.clone());

        let timer = RequestTimer::start();
        let context = RequestContext::new(request_id, trace, facts, timer);
        req.extensions_mut().insert(context.request_id().clone());
        if let Some(current) = current {
            req.extensions_mut().insert(current);
        }

        // Highest level: sinks filtered above INFO still see the ids.
        let log_span = tracing::span!(Level::ERROR, "request", trace_id = Empty, span_id = Empty);
        if let Some(trace) = context.trace() {
            log_span.record(FIELD_TRACE_ID, trace.trace_id().as_str());
            log_span.record(FIELD_SPAN_ID, trace.span_id().as_str());
        }

        log_span.in_scope(|| {
            tracing::info!(
                request_id = %context.request_id(),
                method = %context.method,
                path = %context.path,
                query_params = %context.query_params,
                client_ip = %context.client_ip,
                "request started"
            );
        });

        Self {
            context,
            span,
            log_span,
            finished: false,
        }
    }

    fn stamp<B>(&self, response: &mut Response<B>) {
        if let Ok(value) = HeaderValue::from_str(self.context.request_id().as_str()) {
            response.headers_mut().insert(X_REQUEST_ID, value);
        }
    }

    fn complete(mut self, status: StatusCode) {
        self.finished = true;
        let duration_ms = self.context.timer.elapsed_ms();
        self.span
            .set_attribute(KeyValue::new(ATTR_STATUS_CODE, i64::from(status.as_u16())));
        self.span.set_attribute(KeyValue::new(ATTR_DURATION_MS, duration_ms));

        let context = &self.context;
        self.log_span.in_scope(|| {
            tracing::info!(
                request_id = %context.request_id(),
                method = %context.method,
                path = %context.path,
                status = status.as_u16(),
                duration_ms,
                "request completed"
            );
        });
        self.span.close();
    }

    fn fail(&mut self, kind: &str, message: &str) {
        if self.finished {
            return;
        }
        self.finished = true;
        let duration_ms = self.context.timer.elapsed_ms();
        self.span.set_attribute(KeyValue::new(ATTR_DURATION_MS, duration_ms));
        self.span.record_exception(kind, message);

        let context = &self.context;
        self.log_span.in_scope(|| {
            tracing::error!(
                request_id = %context.request_id(),
                method = %context.method,
                path = %context.path,
                error = %message,
                duration_ms,
                "request failed"
            );
        });
        self.span.close();
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.fail("cancelled", CANCELLED);
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RequestLogger<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: fmt::Display + Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        // The clone may not be ready; keep the one poll_ready was called on.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let mut in_flight = InFlight::begin(&self.observability, &mut req);
        let log_span = in_flight.log_span.clone();

        Box::pin(
            async move {
                match delegate(inner.call(req)).await {
                    Outcome::Success(mut response) => {
                        in_flight.stamp(&mut response);
                        in_flight.complete(response.status());
                        Ok(response)
                    }
                    Outcome::Failure(failure) => {
                        in_flight.fail(failure.kind(), &failure.message());
                        Err(failure.reraise())
                    }
                }
            }
            .instrument(log_span),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Boom;

    impl fmt::Display for Boom {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("boom")
        }
    }

    #[tokio::test]
    async fn test_delegate_success() {
        let outcome = delegate(async { Ok::<_, Boom>(7) }).await;
        assert!(matches!(outcome, Outcome::Success(7)));
    }

    #[tokio::test]
    async fn test_delegate_error_is_kept() {
        let outcome = delegate(async { Err::<(), _>(Boom) }).await;
        let Outcome::Failure(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.message(), "boom");
        assert!(failure.kind().ends_with("Boom"));
        assert!(matches!(failure.reraise(), Boom));
    }

    #[tokio::test]
    async fn test_delegate_catches_panics() {
        let outcome = delegate(async {
            if true {
                panic!("handler exploded");
            }
            Ok::<(), Boom>(())
        })
        .await;
        let Outcome::Failure(failure) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.kind(), "panic");
        assert_eq!(failure.message(), "handler exploded");

        let resumed = std::panic::catch_unwind(AssertUnwindSafe(|| failure.reraise()));
        let payload = resumed.unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "handler exploded");
    }

    #[test]
    fn test_panic_message_formats() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(owned.as_ref()), "owned");
        let opaque: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(opaque.as_ref()), "panic");
    }
}
