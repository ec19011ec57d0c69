//! Request-scoped context.
//!
//! # Responsibilities
//! - Capture the facts logged about a request (method, path, client, query)
//! - Carry the request's correlation id and inbound trace identity
//! - Expose the correlation id to handlers via request extensions
//!
//! # Design Decisions
//! - One `RequestContext` per request, owned by the in-flight future
//! - Client IP comes from the connection, never from forwarded headers

use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::{Method, Request};

use crate::observability::{RequestId, RequestTimer, TraceContext};

/// Response header carrying the correlation id.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Client IP used when the connection address is unknown.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Per-request observability state.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: RequestId,
    trace: Option<TraceContext>,
    pub method: Method,
    pub path: String,
    pub client_ip: String,
    pub query_params: String,
    pub timer: RequestTimer,
}

impl RequestContext {
    pub fn new(
        request_id: RequestId,
        trace: Option<TraceContext>,
        facts: RequestFacts,
        timer: RequestTimer,
    ) -> Self {
        Self {
            request_id,
            trace,
            method: facts.method,
            path: facts.path,
            client_ip: facts.client_ip,
            query_params: facts.query_params,
            timer,
        }
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Inbound trace identity, present only for a valid `traceparent`.
    pub fn trace(&self) -> Option<&TraceContext> {
        self.trace.as_ref()
    }
}

/// What the pipeline reads off a request before delegating it.
#[derive(Debug, Clone)]
pub struct RequestFacts {
    pub method: Method,
    pub path: String,
    pub url: String,
    pub client_ip: String,
    pub query_params: String,
}

impl RequestFacts {
    /// Span name: `"{METHOD} {PATH}"`.
    pub fn span_name(&self) -> String {
        format!("{} {}", self.method, self.path)
    }

    pub fn from_request<B>(req: &Request<B>) -> Self {
        let client_ip = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());

        Self {
            method: req.method().clone(),
            path: req.uri().path().to_string(),
            url: req.uri().to_string(),
            client_ip,
            query_params: req.uri().query().unwrap_or_default().to_string(),
        }
    }
}

/// Access to the request's observability identity from handlers.
pub trait RequestExt {
    fn request_id(&self) -> Option<&RequestId>;

    /// Trace identity to propagate downstream: the server span when
    /// tracing is enabled, otherwise the inbound parent.
    fn trace_context(&self) -> Option<&TraceContext>;
}

impl<B> RequestExt for Request<B> {
    fn request_id(&self) -> Option<&RequestId> {
        self.extensions().get::<RequestId>()
    }

    fn trace_context(&self) -> Option<&TraceContext> {
        self.extensions().get::<TraceContext>()
    }
}
