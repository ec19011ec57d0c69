//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (axum setup, layer stack)
//!     → middleware/request_logger.rs (request id, span, logs, timing)
//!     → security layers (headers, CORS, rate limit)
//!     → timeout and body limit
//!     → handler
//! ```

pub mod middleware;
pub mod request;
pub mod server;

pub use middleware::RequestLoggerLayer;
pub use request::{RequestContext, RequestExt, X_REQUEST_ID};
pub use server::HttpServer;
