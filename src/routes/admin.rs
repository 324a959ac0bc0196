//! Fleet-level administrative RPCs.

use axum::{Extension, Json, extract::State};
use serde::{Deserialize, Serialize};

use super::{ApiError, RpcJson};
use crate::{
    AppState,
    auth::{Principal, Role},
    services::SweepReport,
};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DistinctTenantsRequest {
    /// `YYYYMMDD` or `YYYY-MM-DD`
    pub day_from: String,
    pub day_to: String,
}

#[derive(Debug, Serialize)]
pub struct DistinctTenantsResponse {
    pub tenant_ids: Vec<i64>,
}

/// Every tenant with traffic in the range, across all partitions.
#[tracing::instrument(name = "rpc.admin.distinct_tenants", skip_all)]
pub async fn distinct_tenants(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    RpcJson(body): RpcJson<DistinctTenantsRequest>,
) -> Result<Json<DistinctTenantsResponse>, ApiError> {
    principal.require_any(&[Role::Admin])?;

    let tenant_ids = state
        .services
        .bandwidth
        .distinct_tenants(&body.day_from, &body.day_to)
        .await?;

    Ok(Json(DistinctTenantsResponse { tenant_ids }))
}

/// Run a retention sweep now, with the configured horizon and safety settings.
#[tracing::instrument(name = "rpc.admin.sweep", skip_all)]
pub async fn sweep(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<SweepReport>, ApiError> {
    principal.require_any(&[Role::Admin])?;

    tracing::info!(
        node_id = principal.node_id.as_deref().unwrap_or("-"),
        "Retention sweep requested over RPC"
    );
    let report = state.sweeper.sweep().await?;
    Ok(Json(report))
}
