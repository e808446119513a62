//! Host API Handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
};

use crate::api::error::ApiResult;
use crate::fleet::FleetHandle;

/// POST /api/hosts/{id}/clear
/// Bring a host taken offline by the restart policy back into reconciliation
pub async fn clear_host(
    State(fleet): State<FleetHandle>,
    Path(host_id): Path<String>,
) -> ApiResult<StatusCode> {
    tracing::info!("Clear requested for host {}", host_id);

    fleet.clear_host(&host_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
