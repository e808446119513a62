//! Health Check API Handler
//!
//! Liveness of the daemon itself, not of the fleet.

use axum::{http::StatusCode, response::IntoResponse};

/// GET /health
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
