//! API Module
//!
//! Operator status API of the runner daemon.
//! Each submodule handles endpoints for a specific domain.

pub mod agent;
pub mod error;
pub mod fleet;
pub mod health;
pub mod host;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::fleet::FleetHandle;

/// Create the status API router with all endpoints
pub fn create_router(fleet: FleetHandle) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Fleet endpoints
        .route("/api/fleet/status", get(fleet::fleet_status))
        // Agent endpoints
        .route("/api/agents", get(agent::list_agents))
        .route("/api/agents/{id}", get(agent::get_agent))
        .route("/api/agents/{id}/stop", post(agent::stop_agent))
        .route("/api/agents/{id}/clear", post(agent::clear_agent))
        // Host endpoints
        .route("/api/hosts/{id}/clear", post(host::clear_host))
        // Add state and middleware
        .with_state(fleet)
        .layer(TraceLayer::new_for_http())
}
