//! Bandwidth metering RPCs.
//!
//! Every handler runs behind the RPC auth middleware, which stores the caller's
//! [`Principal`] in request extensions.

use axum::{Extension, Json, extract::State, http::StatusCode};
use serde::Deserialize;

use super::{ApiError, RpcJson};
use crate::{
    AppState,
    auth::{Principal, Role},
    models::RangeReportEntry,
};

const WRITERS: &[Role] = &[Role::Node, Role::Admin];
const READERS: &[Role] = &[Role::User, Role::Node, Role::Admin];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordRequest {
    pub tenant_id: i64,
    #[serde(default)]
    pub region_id: i64,
    pub day: String,
    pub time_at: String,
    pub bytes: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeakRequest {
    pub tenant_id: i64,
    pub day: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeakMonthRequest {
    pub tenant_id: i64,
    pub month: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PercentileBody {
    pub tenant_id: i64,
    /// `> 0` one region, `< 0` unattributed traffic, `0` every region
    #[serde(default)]
    pub region_id: i64,
    pub day_from: String,
    pub day_to: String,
    /// `<= 0` means 95
    #[serde(default)]
    pub percentile: i32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeRequest {
    pub tenant_id: i64,
    #[serde(default)]
    pub region_id: i64,
    pub day_from: String,
    pub day_to: String,
}

/// Merge one traffic sample into its bucket.
///
/// Returns 204 on success, including for samples dropped because they carry
/// no tenant.
#[tracing::instrument(name = "rpc.bandwidth.record", skip_all)]
pub async fn record(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    RpcJson(body): RpcJson<RecordRequest>,
) -> Result<StatusCode, ApiError> {
    principal.require_any(WRITERS)?;

    state
        .services
        .bandwidth
        .record(
            body.tenant_id,
            body.region_id,
            &body.day,
            &body.time_at,
            body.bytes,
        )
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Highest 5-minute bucket of one day. `null` when nothing was recorded.
#[tracing::instrument(name = "rpc.bandwidth.peak", skip_all)]
pub async fn peak(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    RpcJson(body): RpcJson<PeakRequest>,
) -> Result<Json<Option<RangeReportEntry>>, ApiError> {
    principal.require_any(READERS)?;

    let peak = state
        .services
        .bandwidth
        .peak_in_day(body.tenant_id, &body.day)
        .await?;

    Ok(Json(peak.map(RangeReportEntry::from)))
}

/// Highest 5-minute bucket of one calendar month.
#[tracing::instrument(name = "rpc.bandwidth.peak_month", skip_all)]
pub async fn peak_month(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    RpcJson(body): RpcJson<PeakMonthRequest>,
) -> Result<Json<Option<RangeReportEntry>>, ApiError> {
    principal.require_any(READERS)?;

    let peak = state
        .services
        .bandwidth
        .peak_in_month(body.tenant_id, &body.month)
        .await?;

    Ok(Json(peak.map(RangeReportEntry::from)))
}

/// Bucket at a percentile rank over a day range.
#[tracing::instrument(name = "rpc.bandwidth.percentile", skip_all)]
pub async fn percentile(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    RpcJson(body): RpcJson<PercentileBody>,
) -> Result<Json<Option<RangeReportEntry>>, ApiError> {
    principal.require_any(READERS)?;

    let bucket = state
        .services
        .bandwidth
        .percentile_between(
            body.tenant_id,
            body.region_id,
            &body.day_from,
            &body.day_to,
            body.percentile,
        )
        .await?;

    Ok(Json(bucket.map(RangeReportEntry::from)))
}

/// Gap-filled series of 5-minute buckets, ending at the current time.
#[tracing::instrument(name = "rpc.bandwidth.range", skip_all)]
pub async fn range(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    RpcJson(body): RpcJson<RangeRequest>,
) -> Result<Json<Vec<RangeReportEntry>>, ApiError> {
    principal.require_any(READERS)?;

    let entries = state
        .services
        .bandwidth
        .range_report(body.tenant_id, body.region_id, &body.day_from, &body.day_to)
        .await?;

    Ok(Json(entries))
}
