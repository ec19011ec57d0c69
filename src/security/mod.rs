//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → headers.rs (hardening headers on the way out)
//!     → cors.rs (preflight answers, allowed origins)
//!     → rate_limit.rs (per-IP token bucket)
//!     → Pass to handlers
//! ```
//!
//! # Design Decisions
//! - Each concern is a separate layer, installed by `http::server`
//! - Policies are static, read once from configuration

pub mod cors;
pub mod headers;
pub mod rate_limit;

pub use cors::cors_layer;
pub use headers::with_security_headers;
pub use rate_limit::{rate_limit_middleware, RateLimiterState};
