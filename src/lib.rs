//! HTTP service template with a request-scoped observability pipeline.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http::server (axum Router)
//!                       → http::middleware::request_logger
//!                           request id · inbound traceparent · server span
//!                           "request started" / "completed" / "failed" logs
//!                       → security (headers, CORS, rate limit)
//!                       → timeout / body limit
//!                       → handlers (health)
//!
//!     Cross-cutting:
//!       config         TOML + env overrides + validation
//!       observability  JSON logs, OTLP spans, propagation
//!       lifecycle      signals and graceful shutdown
//! ```

pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::AppConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use observability::{ObservabilityContext, Telemetry};
