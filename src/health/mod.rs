//! Liveness endpoint.
//!
//! `GET /healthz` answers `{"status":"healthy"}` whenever the process can
//! serve requests. No dependencies are probed.

use axum::Json;
use serde::Serialize;

/// Body returned by [`healthz`].
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
}

pub async fn healthz() -> Json<HealthStatus> {
    tracing::info!("Health check endpoint called");
    Json(HealthStatus { status: "healthy" })
}
