//! Metrics endpoints: Prometheus exposition and a JSON summary.

use axum::{extract::State, routing::get, Json, Router};
use keel_core::db::{
    create_asset_repository, create_document_repository, create_person_repository,
    create_security_repository, create_workflow_repository, AssetFilter, InstanceFilter,
    PersonFilter,
};
use keel_core::models::{AssetStatus, RiskStatus, RolloutStatus};
use keel_core::workflow::InstanceStatus;
use keel_observability::MetricsSnapshot;

use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Routes serving the Prometheus exposition format (unauthenticated,
/// meant for the scraper network).
pub fn prometheus_routes() -> Router<AppState> {
    Router::new().route("/metrics", get(prometheus_metrics))
}

/// Routes serving the JSON metrics summary under /api.
pub fn json_routes() -> Router<AppState> {
    Router::new().route("/", get(json_metrics))
}

/// Prometheus metrics exposition.
#[utoipa::path(
    get,
    path = "/metrics",
    responses((status = 200, description = "Prometheus metrics", content_type = "text/plain")),
    tag = "Metrics"
)]
async fn prometheus_metrics(State(state): State<AppState>) -> Result<String, ApiError> {
    match &state.prometheus_handle {
        Some(handle) => Ok(handle.render()),
        None => Err(ApiError::ServiceUnavailable(
            "Prometheus exporter not installed".to_string(),
        )),
    }
}

/// JSON metrics summary for the caller's organization.
#[utoipa::path(
    get,
    path = "/api/metrics",
    responses((status = 200, description = "Metrics summary")),
    tag = "Metrics"
)]
async fn json_metrics(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<MetricsSnapshot>, ApiError> {
    let org_id = user.organization_id;

    let people = create_person_repository(&state.db)
        .count(&PersonFilter {
            organization_id: Some(org_id),
            ..Default::default()
        })
        .await?;

    let asset_repo = create_asset_repository(&state.db);
    let assets = asset_repo
        .count(&AssetFilter {
            organization_id: Some(org_id),
            ..Default::default()
        })
        .await?;
    let assets_assigned = asset_repo
        .count(&AssetFilter {
            organization_id: Some(org_id),
            status: Some(AssetStatus::Assigned),
            ..Default::default()
        })
        .await?;

    let workflows_in_progress = create_workflow_repository(&state.db)
        .count_instances(&InstanceFilter {
            organization_id: Some(org_id),
            status: Some(InstanceStatus::InProgress),
            ..Default::default()
        })
        .await?;

    let rollouts_active = create_document_repository(&state.db)
        .list_rollouts(org_id)
        .await?
        .iter()
        .filter(|r| r.status == RolloutStatus::Active)
        .count() as u64;

    let risks_open = create_security_repository(&state.db)
        .list_risks(org_id, Some(RiskStatus::Open))
        .await?
        .len() as u64;

    Ok(Json(MetricsSnapshot {
        people,
        assets,
        assets_assigned,
        workflows_in_progress,
        rollouts_active,
        risks_open,
    }))
}
