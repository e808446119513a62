//! Fleet API Handlers

use axum::{Json, extract::State};
use corral_core::dto::fleet::FleetStatus;

use crate::api::error::ApiResult;
use crate::fleet::FleetHandle;

/// GET /api/fleet/status
/// Aggregated health, hosts and agents
pub async fn fleet_status(State(fleet): State<FleetHandle>) -> ApiResult<Json<FleetStatus>> {
    tracing::debug!("Fleet status requested");

    let status = fleet.status().await?;
    Ok(Json(status))
}
