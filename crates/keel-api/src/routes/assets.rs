//! Asset management endpoints: CRUD, assignment, lifecycle events,
//! and device sync.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use keel_core::db::{
    create_asset_repository, create_audit_repository, create_organization_repository,
    create_person_repository, AssetFilter, AuditEntry, Pagination,
};
use keel_core::models::{
    Asset, AssetAssignment, AssetCategory, AssetStatus, LifecycleEvent, LifecycleEventKind,
};
use keel_core::sync::{run_device_sync, SyncOptions, SyncReport};
use keel_core::validation::validate_asset_tag;
use keel_core::AuthorizationContext;

use crate::auth::{RequireAssetsRead, RequireAssetsWrite};
use crate::error::ApiError;
use crate::state::AppState;

/// Creates asset routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_assets).post(create_asset))
        .route(
            "/:id",
            get(get_asset).put(update_asset).delete(delete_asset),
        )
        .route("/:id/assign", post(assign_asset))
        .route("/:id/return", post(return_asset))
        .route("/:id/events", get(list_events))
        .route("/:id/assignments", get(list_assignments))
        .route("/sync", post(sync_devices))
}

// ============================================================================
// DTOs
// ============================================================================

/// Query parameters for listing assets.
#[derive(Debug, Deserialize, Validate)]
pub struct ListAssetsQuery {
    /// Filter by status.
    pub status: Option<String>,
    /// Filter by category.
    pub category: Option<String>,
    /// Substring search on tag, name, or serial.
    pub search: Option<String>,
    /// Include soft-deleted assets.
    #[serde(default)]
    pub include_deleted: bool,
    /// Page number (1-indexed).
    #[validate(range(min = 1))]
    pub page: Option<u32>,
    /// Items per page.
    #[validate(range(min = 1, max = 200))]
    pub per_page: Option<u32>,
}

/// Request body for creating an asset.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateAssetRequest {
    /// Asset tag, unique per organization.
    #[validate(length(min = 1, max = 64))]
    pub asset_tag: String,
    /// Display name.
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    /// Category.
    pub category: String,
    /// Serial number.
    pub serial_number: Option<String>,
    /// Manufacturer.
    pub manufacturer: Option<String>,
    /// Model.
    pub model: Option<String>,
}

/// Request body for updating an asset.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateAssetRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    pub category: Option<String>,
    pub status: Option<String>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
}

/// Request body for assigning an asset.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignAssetRequest {
    /// The person receiving the asset.
    pub person_id: Uuid,
}

/// Asset response DTO.
#[derive(Debug, Serialize, ToSchema)]
pub struct AssetResponse {
    pub id: Uuid,
    pub asset_tag: String,
    pub name: String,
    pub category: String,
    pub status: String,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub mdm_device_id: Option<String>,
    pub compliance_state: Option<String>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub assigned_to: Option<Uuid>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Assignment response DTO.
#[derive(Debug, Serialize, ToSchema)]
pub struct AssignmentResponse {
    pub id: Uuid,
    pub person_id: Uuid,
    pub assigned_by: String,
    pub assigned_at: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
}

/// Lifecycle event response DTO.
#[derive(Debug, Serialize, ToSchema)]
pub struct EventResponse {
    pub id: Uuid,
    pub kind: String,
    pub actor: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Paginated response wrapper.
#[derive(Debug, Serialize, ToSchema)]
pub struct PaginatedAssetResponse {
    pub data: Vec<AssetResponse>,
    pub page: u32,
    pub per_page: u32,
    pub total_items: u64,
    pub total_pages: u32,
}

// ============================================================================
// Handlers
// ============================================================================

/// List assets with pagination and filters.
async fn list_assets(
    State(state): State<AppState>,
    RequireAssetsRead(user): RequireAssetsRead,
    Query(query): Query<ListAssetsQuery>,
) -> Result<Json<PaginatedAssetResponse>, ApiError> {
    query.validate()?;

    let filter = AssetFilter {
        organization_id: Some(user.organization_id),
        status: query.status.as_deref().map(parse_status).transpose()?,
        category: query
            .category
            .as_deref()
            .map(|c| AssetCategory::parse(c).as_db_str()),
        search: query.search,
        include_deleted: query.include_deleted,
    };
    let pagination = Pagination::from_query(query.page, query.per_page);

    let repo = create_asset_repository(&state.db);
    let total = repo.count(&filter).await?;
    let assets = repo.list(&filter, &pagination).await?;

    let mut responses = Vec::with_capacity(assets.len());
    for asset in &assets {
        let assigned_to = if asset.status == AssetStatus::Assigned {
            repo.active_assignment(asset.id).await?.map(|a| a.person_id)
        } else {
            None
        };
        responses.push(asset_to_response(asset, assigned_to));
    }

    Ok(Json(PaginatedAssetResponse {
        data: responses,
        page: pagination.page,
        per_page: pagination.per_page,
        total_items: total,
        total_pages: pagination.total_pages(total),
    }))
}

/// Create an asset.
async fn create_asset(
    State(state): State<AppState>,
    RequireAssetsWrite(user): RequireAssetsWrite,
    Json(request): Json<CreateAssetRequest>,
) -> Result<(StatusCode, Json<AssetResponse>), ApiError> {
    request.validate()?;
    validate_asset_tag(&request.asset_tag)
        .map_err(|e| ApiError::validation_field("asset_tag", "invalid_format", &e.to_string()))?;

    let repo = create_asset_repository(&state.db);

    // Tag uniqueness is per organization
    if let Some(existing) = repo
        .get_by_tag(user.organization_id, &request.asset_tag)
        .await?
    {
        return Err(ApiError::Conflict(format!(
            "Asset tag '{}' is already used by '{}'",
            request.asset_tag, existing.name
        )));
    }

    let mut asset = Asset::new(
        user.organization_id,
        request.asset_tag,
        request.name,
        AssetCategory::parse(&request.category),
    );
    asset.serial_number = request.serial_number;
    asset.manufacturer = request.manufacturer;
    asset.model = request.model;

    let created = repo.create(&asset).await?;
    let auth = AuthorizationContext::from_user(&user);
    repo.record_event(&LifecycleEvent::new(
        created.id,
        LifecycleEventKind::Registered,
        auth.audit_identity(),
    ))
    .await?;

    create_audit_repository(&state.db)
        .record(&AuditEntry::new(
            user.organization_id,
            auth.audit_identity(),
            "asset.create",
            "asset",
            Some(created.id),
        ))
        .await?;

    Ok((StatusCode::CREATED, Json(asset_to_response(&created, None))))
}

/// Get an asset by id.
async fn get_asset(
    State(state): State<AppState>,
    RequireAssetsRead(user): RequireAssetsRead,
    Path(id): Path<Uuid>,
) -> Result<Json<AssetResponse>, ApiError> {
    let repo = create_asset_repository(&state.db);
    let asset = repo
        .get(user.organization_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Asset {} not found", id)))?;

    let assigned_to = repo.active_assignment(asset.id).await?.map(|a| a.person_id);
    Ok(Json(asset_to_response(&asset, assigned_to)))
}

/// Update an asset.
async fn update_asset(
    State(state): State<AppState>,
    RequireAssetsWrite(user): RequireAssetsWrite,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateAssetRequest>,
) -> Result<Json<AssetResponse>, ApiError> {
    request.validate()?;

    let repo = create_asset_repository(&state.db);
    let mut asset = repo
        .get(user.organization_id, id)
        .await?
        .filter(Asset::is_live)
        .ok_or_else(|| ApiError::NotFound(format!("Asset {} not found", id)))?;

    if let Some(name) = request.name {
        asset.name = name;
    }
    if let Some(category) = request.category.as_deref() {
        asset.category = AssetCategory::parse(category);
    }
    if let Some(status) = request.status.as_deref() {
        let new_status = parse_status(status)?;
        // Assigned status is driven by assign/return, not direct edits
        if new_status == AssetStatus::Assigned || asset.status == AssetStatus::Assigned {
            return Err(ApiError::Conflict(
                "Use the assign/return endpoints to change assignment state".to_string(),
            ));
        }
        if new_status == AssetStatus::InRepair && asset.status != AssetStatus::InRepair {
            let auth = AuthorizationContext::from_user(&user);
            repo.record_event(&LifecycleEvent::new(
                asset.id,
                LifecycleEventKind::Repair,
                auth.audit_identity(),
            ))
            .await?;
        }
        if new_status == AssetStatus::Retired && asset.status != AssetStatus::Retired {
            let auth = AuthorizationContext::from_user(&user);
            repo.record_event(&LifecycleEvent::new(
                asset.id,
                LifecycleEventKind::Retired,
                auth.audit_identity(),
            ))
            .await?;
        }
        asset.status = new_status;
    }
    if let Some(serial_number) = request.serial_number {
        asset.serial_number = Some(serial_number);
    }
    if let Some(manufacturer) = request.manufacturer {
        asset.manufacturer = Some(manufacturer);
    }
    if let Some(model) = request.model {
        asset.model = Some(model);
    }

    let saved = repo.save(&asset).await?;
    let assigned_to = repo.active_assignment(saved.id).await?.map(|a| a.person_id);
    Ok(Json(asset_to_response(&saved, assigned_to)))
}

/// Soft-delete an asset.
async fn delete_asset(
    State(state): State<AppState>,
    RequireAssetsWrite(user): RequireAssetsWrite,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let repo = create_asset_repository(&state.db);

    // An assigned asset must be returned first
    if repo.active_assignment(id).await?.is_some() {
        return Err(ApiError::Conflict(
            "Asset is currently assigned; return it before deleting".to_string(),
        ));
    }

    let deleted = repo.soft_delete(user.organization_id, id).await?;
    if !deleted {
        return Err(ApiError::NotFound(format!("Asset {} not found", id)));
    }

    let auth = AuthorizationContext::from_user(&user);
    create_audit_repository(&state.db)
        .record(&AuditEntry::new(
            user.organization_id,
            auth.audit_identity(),
            "asset.delete",
            "asset",
            Some(id),
        ))
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Assign an asset to a person.
///
/// At most one assignment may be open per asset; assigning an already
/// assigned asset is a conflict.
async fn assign_asset(
    State(state): State<AppState>,
    RequireAssetsWrite(user): RequireAssetsWrite,
    Path(id): Path<Uuid>,
    Json(request): Json<AssignAssetRequest>,
) -> Result<Json<AssetResponse>, ApiError> {
    let repo = create_asset_repository(&state.db);
    let mut asset = repo
        .get(user.organization_id, id)
        .await?
        .filter(Asset::is_live)
        .ok_or_else(|| ApiError::NotFound(format!("Asset {} not found", id)))?;

    if let Some(open) = repo.active_assignment(asset.id).await? {
        return Err(ApiError::Conflict(format!(
            "Asset is already assigned to person {}",
            open.person_id
        )));
    }
    if !asset.is_assignable() {
        return Err(ApiError::Conflict(format!(
            "Asset is not assignable (status: {})",
            asset.status
        )));
    }

    // The person must exist in the same organization
    create_person_repository(&state.db)
        .get(user.organization_id, request.person_id)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("Person {} not found", request.person_id))
        })?;

    let auth = AuthorizationContext::from_user(&user);
    let assignment = AssetAssignment::new(asset.id, request.person_id, auth.audit_identity());
    repo.create_assignment(&assignment).await?;

    asset.status = AssetStatus::Assigned;
    repo.save(&asset).await?;
    repo.record_event(&LifecycleEvent::new(
        asset.id,
        LifecycleEventKind::Assigned,
        auth.audit_identity(),
    ))
    .await?;

    create_audit_repository(&state.db)
        .record(
            &AuditEntry::new(
                user.organization_id,
                auth.audit_identity(),
                "asset.assign",
                "asset",
                Some(asset.id),
            )
            .with_details(serde_json::json!({ "person_id": request.person_id })),
        )
        .await?;

    Ok(Json(asset_to_response(&asset, Some(request.person_id))))
}

/// Return an assigned asset to stock.
async fn return_asset(
    State(state): State<AppState>,
    RequireAssetsWrite(user): RequireAssetsWrite,
    Path(id): Path<Uuid>,
) -> Result<Json<AssetResponse>, ApiError> {
    let repo = create_asset_repository(&state.db);
    let mut asset = repo
        .get(user.organization_id, id)
        .await?
        .filter(Asset::is_live)
        .ok_or_else(|| ApiError::NotFound(format!("Asset {} not found", id)))?;

    let open = repo
        .active_assignment(asset.id)
        .await?
        .ok_or_else(|| ApiError::Conflict("Asset is not currently assigned".to_string()))?;

    repo.close_assignment(open.id).await?;
    asset.status = AssetStatus::InStock;
    repo.save(&asset).await?;

    let auth = AuthorizationContext::from_user(&user);
    repo.record_event(&LifecycleEvent::new(
        asset.id,
        LifecycleEventKind::Returned,
        auth.audit_identity(),
    ))
    .await?;

    create_audit_repository(&state.db)
        .record(&AuditEntry::new(
            user.organization_id,
            auth.audit_identity(),
            "asset.return",
            "asset",
            Some(asset.id),
        ))
        .await?;

    Ok(Json(asset_to_response(&asset, None)))
}

/// List an asset's lifecycle events.
async fn list_events(
    State(state): State<AppState>,
    RequireAssetsRead(user): RequireAssetsRead,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<EventResponse>>, ApiError> {
    let repo = create_asset_repository(&state.db);
    repo.get(user.organization_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Asset {} not found", id)))?;

    let events = repo.list_events(id).await?;
    Ok(Json(
        events
            .iter()
            .map(|e| EventResponse {
                id: e.id,
                kind: e.kind.to_string(),
                actor: e.actor.clone(),
                note: e.note.clone(),
                created_at: e.created_at,
            })
            .collect(),
    ))
}

/// List an asset's assignment history.
async fn list_assignments(
    State(state): State<AppState>,
    RequireAssetsRead(user): RequireAssetsRead,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<AssignmentResponse>>, ApiError> {
    let repo = create_asset_repository(&state.db);
    repo.get(user.organization_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Asset {} not found", id)))?;

    let assignments = repo.list_assignments(id).await?;
    Ok(Json(
        assignments
            .iter()
            .map(|a| AssignmentResponse {
                id: a.id,
                person_id: a.person_id,
                assigned_by: a.assigned_by.clone(),
                assigned_at: a.assigned_at,
                returned_at: a.returned_at,
            })
            .collect(),
    ))
}

/// Run device sync against the configured MDM.
async fn sync_devices(
    State(state): State<AppState>,
    RequireAssetsWrite(user): RequireAssetsWrite,
) -> Result<Json<SyncReport>, ApiError> {
    let mdm = state
        .mdm
        .as_ref()
        .ok_or_else(|| ApiError::ServiceUnavailable("No MDM connector configured".to_string()))?;

    let org = create_organization_repository(&state.db)
        .get(user.organization_id)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("Organization {} not found", user.organization_id))
        })?;

    let options = SyncOptions {
        tag_prefix: org.settings.asset_tag_prefix.clone(),
        retire_orphans: org.settings.sync_retires_orphans,
    };

    let auth = AuthorizationContext::from_user(&user);
    let asset_repo = create_asset_repository(&state.db);
    let person_repo = create_person_repository(&state.db);

    let report = run_device_sync(
        mdm.as_ref(),
        asset_repo.as_ref(),
        person_repo.as_ref(),
        user.organization_id,
        &options,
        &auth.audit_identity(),
    )
    .await?;

    keel_observability::record_sync_report(
        report.created,
        report.updated,
        report.reassigned,
        report.errors,
    );

    create_audit_repository(&state.db)
        .record(
            &AuditEntry::new(
                user.organization_id,
                auth.audit_identity(),
                "asset.sync",
                "asset",
                None,
            )
            .with_details(serde_json::to_value(&report)?),
        )
        .await?;

    Ok(Json(report))
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_status(s: &str) -> Result<AssetStatus, ApiError> {
    s.parse::<AssetStatus>().map_err(|_| {
        ApiError::BadRequest(format!(
            "Invalid asset status: {}. Must be one of: in_stock, assigned, in_repair, retired",
            s
        ))
    })
}

fn asset_to_response(asset: &Asset, assigned_to: Option<Uuid>) -> AssetResponse {
    AssetResponse {
        id: asset.id,
        asset_tag: asset.asset_tag.clone(),
        name: asset.name.clone(),
        category: asset.category.as_db_str(),
        status: asset.status.to_string(),
        serial_number: asset.serial_number.clone(),
        manufacturer: asset.manufacturer.clone(),
        model: asset.model.clone(),
        mdm_device_id: asset.mdm_device_id.clone(),
        compliance_state: asset.compliance_state.clone(),
        last_synced_at: asset.last_synced_at,
        assigned_to,
        deleted_at: asset.deleted_at,
        created_at: asset.created_at,
        updated_at: asset.updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status("in_stock").unwrap(), AssetStatus::InStock);
        assert_eq!(parse_status("retired").unwrap(), AssetStatus::Retired);
        assert!(parse_status("lost").is_err());
    }

    #[test]
    fn test_asset_to_response_includes_assignment() {
        let asset = Asset::new(
            Uuid::new_v4(),
            "AST-0001",
            "MacBook",
            AssetCategory::Laptop,
        );
        let person_id = Uuid::new_v4();
        let response = asset_to_response(&asset, Some(person_id));
        assert_eq!(response.asset_tag, "AST-0001");
        assert_eq!(response.assigned_to, Some(person_id));
        assert_eq!(response.category, "laptop");
    }
}
