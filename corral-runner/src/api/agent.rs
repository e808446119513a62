//! Agent API Handlers
//!
//! Inspection of individual agents and operator intervention.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use corral_core::domain::agent::AgentSnapshot;
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::fleet::FleetHandle;

fn parse_id(id: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(id).map_err(|_| ApiError::BadRequest(format!("Invalid agent id '{}'", id)))
}

// =============================================================================
// Agent Query Endpoints
// =============================================================================

/// GET /api/agents
/// List every agent known to the controller, offline ones included
pub async fn list_agents(State(fleet): State<FleetHandle>) -> ApiResult<Json<Vec<AgentSnapshot>>> {
    tracing::debug!("Listing agents");

    let agents = fleet.agents().await?;
    Ok(Json(agents))
}

/// GET /api/agents/{id}
pub async fn get_agent(
    State(fleet): State<FleetHandle>,
    Path(id): Path<String>,
) -> ApiResult<Json<AgentSnapshot>> {
    let runner_id = parse_id(&id)?;

    let agent = fleet.agent(runner_id).await?;
    Ok(Json(agent))
}

// =============================================================================
// Operator Intervention
// =============================================================================

/// POST /api/agents/{id}/stop
/// Terminate an agent gracefully; its slot stays empty until cleared
pub async fn stop_agent(
    State(fleet): State<FleetHandle>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let runner_id = parse_id(&id)?;
    tracing::info!("Stop requested for agent {}", runner_id);

    fleet.stop_agent(runner_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/agents/{id}/clear
/// Clear an agent's failure so it registers or starts again
pub async fn clear_agent(
    State(fleet): State<FleetHandle>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let runner_id = parse_id(&id)?;
    tracing::info!("Clear requested for agent {}", runner_id);

    fleet.clear_agent(runner_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
