//! Correlation id generation.
//!
//! Every inbound request gets one id, independent of distributed tracing.
//! It is logged with every request event and echoed to the client in
//! `X-Request-ID`.

use std::fmt;

use uuid::Uuid;

/// Opaque per-request correlation id (UUID v4, hyphenated).
///
/// There is no way to change the id once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(String);

impl RequestId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generate a fresh correlation id.
pub fn new_id() -> RequestId {
    RequestId(Uuid::new_v4().to_string())
}
