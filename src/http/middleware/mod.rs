//! Tower middleware applied to every request.

pub mod request_logger;

pub use request_logger::{RequestLogger, RequestLoggerLayer};
