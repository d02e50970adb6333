//! Document and policy-rollout endpoints.

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
    create_audit_repository, create_document_repository, create_person_repository, AckOutcome,
    AuditEntry, Pagination,
};
use keel_core::models::{
    Acknowledgment, Document, DocumentStatus, DocumentType, DocumentVersion, Rollout,
    RolloutStatus, RolloutTarget,
};
use keel_core::{AuthorizationContext, User};

use crate::auth::{RequireDocsAcknowledge, RequireDocsRead, RequireDocsWrite};
use crate::error::ApiError;
use crate::state::AppState;

/// Creates document routes.
pub fn document_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_documents).post(create_document))
        .route(
            "/:id",
            get(get_document).put(update_document).delete(delete_document),
        )
        .route("/:id/versions", get(list_versions).post(create_version))
        .route("/:id/publish", post(publish_document))
}

/// Creates rollout routes.
pub fn rollout_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_rollouts).post(create_rollout))
        .route("/:id", get(get_rollout))
        .route("/:id/acknowledge", post(acknowledge_rollout))
        .route("/:id/complete", post(complete_rollout))
        .route("/:id/cancel", post(cancel_rollout))
}

// ============================================================================
// DTOs
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct ListDocumentsQuery {
    pub status: Option<String>,
    #[validate(range(min = 1))]
    pub page: Option<u32>,
    #[validate(range(min = 1, max = 200))]
    pub per_page: Option<u32>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateDocumentRequest {
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    /// Document type: policy, procedure, guideline, or a custom label.
    pub doc_type: String,
    pub owner_id: Option<Uuid>,
    /// Optional initial version body.
    pub body: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateDocumentRequest {
    #[validate(length(min = 1, max = 255))]
    pub title: Option<String>,
    pub doc_type: Option<String>,
    pub owner_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateVersionRequest {
    /// Version body (markdown).
    #[validate(length(min = 1))]
    pub body: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PublishRequest {
    /// Version to publish; defaults to the latest.
    pub version: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub title: String,
    pub doc_type: String,
    pub status: String,
    pub owner_id: Option<Uuid>,
    pub current_version: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VersionResponse {
    pub id: Uuid,
    pub version: i64,
    pub body: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaginatedDocumentResponse {
    pub data: Vec<DocumentResponse>,
    pub page: u32,
    pub per_page: u32,
    pub total_items: u64,
    pub total_pages: u32,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateRolloutRequest {
    pub document_id: Uuid,
    /// Rollout name; defaults to the document title.
    pub name: Option<String>,
    /// Version to roll out; defaults to the published version.
    pub version: Option<i64>,
    /// Audience: the whole organization or one team.
    pub target: RolloutTargetDto,
    pub due_date: Option<DateTime<Utc>>,
}

/// Rollout target DTO.
#[derive(Debug, Deserialize, Serialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RolloutTargetDto {
    Organization,
    Team { team_id: Uuid },
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RolloutResponse {
    pub id: Uuid,
    pub document_id: Uuid,
    pub version: i64,
    pub name: String,
    pub status: String,
    pub due_date: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    /// People targeted.
    pub total: u64,
    /// People who have acknowledged.
    pub acknowledged: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AcknowledgmentResponse {
    pub person_id: Uuid,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RolloutDetailResponse {
    #[serde(flatten)]
    pub rollout: RolloutResponse,
    pub acknowledgments: Vec<AcknowledgmentResponse>,
}

// ============================================================================
// Document handlers
// ============================================================================

async fn list_documents(
    State(state): State<AppState>,
    RequireDocsRead(user): RequireDocsRead,
    Query(query): Query<ListDocumentsQuery>,
) -> Result<Json<PaginatedDocumentResponse>, ApiError> {
    query.validate()?;

    let status = query.status.as_deref().map(parse_doc_status).transpose()?;
    let pagination = Pagination::from_query(query.page, query.per_page);

    let repo = create_document_repository(&state.db);
    let total = repo.count_documents(user.organization_id, status).await?;
    let documents = repo
        .list_documents(user.organization_id, status, &pagination)
        .await?;

    Ok(Json(PaginatedDocumentResponse {
        data: documents.iter().map(document_to_response).collect(),
        page: pagination.page,
        per_page: pagination.per_page,
        total_items: total,
        total_pages: pagination.total_pages(total),
    }))
}

async fn create_document(
    State(state): State<AppState>,
    RequireDocsWrite(user): RequireDocsWrite,
    Json(request): Json<CreateDocumentRequest>,
) -> Result<(StatusCode, Json<DocumentResponse>), ApiError> {
    request.validate()?;

    let mut document = Document::new(
        user.organization_id,
        request.title,
        DocumentType::parse(&request.doc_type),
    );
    document.owner_id = request.owner_id;

    let repo = create_document_repository(&state.db);
    let created = repo.create_document(&document).await?;

    // Optional initial version
    if let Some(body) = request.body {
        let auth = AuthorizationContext::from_user(&user);
        repo.create_version(&DocumentVersion::new(
            created.id,
            1,
            body,
            auth.audit_identity(),
        ))
        .await?;
    }

    Ok((StatusCode::CREATED, Json(document_to_response(&created))))
}

async fn get_document(
    State(state): State<AppState>,
    RequireDocsRead(user): RequireDocsRead,
    Path(id): Path<Uuid>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let document = create_document_repository(&state.db)
        .get_document(user.organization_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Document {} not found", id)))?;
    Ok(Json(document_to_response(&document)))
}

async fn update_document(
    State(state): State<AppState>,
    RequireDocsWrite(user): RequireDocsWrite,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateDocumentRequest>,
) -> Result<Json<DocumentResponse>, ApiError> {
    request.validate()?;

    let repo = create_document_repository(&state.db);
    let mut document = repo
        .get_document(user.organization_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Document {} not found", id)))?;

    if let Some(title) = request.title {
        document.title = title;
    }
    if let Some(doc_type) = request.doc_type.as_deref() {
        document.doc_type = DocumentType::parse(doc_type);
    }
    if let Some(owner_id) = request.owner_id {
        document.owner_id = Some(owner_id);
    }

    let saved = repo.save_document(&document).await?;
    Ok(Json(document_to_response(&saved)))
}

async fn delete_document(
    State(state): State<AppState>,
    RequireDocsWrite(user): RequireDocsWrite,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let deleted = create_document_repository(&state.db)
        .delete_document(user.organization_id, id)
        .await?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Document {} not found", id)))
    }
}

async fn list_versions(
    State(state): State<AppState>,
    RequireDocsRead(user): RequireDocsRead,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<VersionResponse>>, ApiError> {
    let repo = create_document_repository(&state.db);
    repo.get_document(user.organization_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Document {} not found", id)))?;

    let versions = repo.list_versions(id).await?;
    Ok(Json(
        versions
            .iter()
            .map(|v| VersionResponse {
                id: v.id,
                version: v.version,
                body: v.body.clone(),
                created_by: v.created_by.clone(),
                created_at: v.created_at,
            })
            .collect(),
    ))
}

/// Creates the next version of a document.
async fn create_version(
    State(state): State<AppState>,
    RequireDocsWrite(user): RequireDocsWrite,
    Path(id): Path<Uuid>,
    Json(request): Json<CreateVersionRequest>,
) -> Result<(StatusCode, Json<VersionResponse>), ApiError> {
    request.validate()?;

    let repo = create_document_repository(&state.db);
    repo.get_document(user.organization_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Document {} not found", id)))?;

    let next = repo.latest_version_number(id).await?.unwrap_or(0) + 1;
    let auth = AuthorizationContext::from_user(&user);
    let version = repo
        .create_version(&DocumentVersion::new(
            id,
            next,
            request.body,
            auth.audit_identity(),
        ))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(VersionResponse {
            id: version.id,
            version: version.version,
            body: version.body,
            created_by: version.created_by,
            created_at: version.created_at,
        }),
    ))
}

/// Publishes a document, pinning a version.
async fn publish_document(
    State(state): State<AppState>,
    RequireDocsWrite(user): RequireDocsWrite,
    Path(id): Path<Uuid>,
    Json(request): Json<PublishRequest>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let repo = create_document_repository(&state.db);
    let mut document = repo
        .get_document(user.organization_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Document {} not found", id)))?;

    let version = match request.version {
        Some(version) => {
            repo.get_version(id, version)
                .await?
                .ok_or_else(|| {
                    ApiError::NotFound(format!("Version {} of document {} not found", version, id))
                })?
                .version
        }
        None => repo
            .latest_version_number(id)
            .await?
            .ok_or_else(|| ApiError::Conflict("Document has no versions to publish".to_string()))?,
    };

    document.status = DocumentStatus::Published;
    document.current_version = Some(version);
    let saved = repo.save_document(&document).await?;

    let auth = AuthorizationContext::from_user(&user);
    create_audit_repository(&state.db)
        .record(
            &AuditEntry::new(
                user.organization_id,
                auth.audit_identity(),
                "document.publish",
                "document",
                Some(id),
            )
            .with_details(serde_json::json!({ "version": version })),
        )
        .await?;

    Ok(Json(document_to_response(&saved)))
}

// ============================================================================
// Rollout handlers
// ============================================================================

/// Creates a rollout and fans out one acknowledgment per targeted
/// person.
async fn create_rollout(
    State(state): State<AppState>,
    RequireDocsWrite(user): RequireDocsWrite,
    Json(request): Json<CreateRolloutRequest>,
) -> Result<(StatusCode, Json<RolloutResponse>), ApiError> {
    request.validate()?;

    let repo = create_document_repository(&state.db);
    let document = repo
        .get_document(user.organization_id, request.document_id)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("Document {} not found", request.document_id))
        })?;

    if document.status != DocumentStatus::Published {
        return Err(ApiError::Conflict(
            "Only published documents can be rolled out".to_string(),
        ));
    }

    let version = request
        .version
        .or(document.current_version)
        .ok_or_else(|| ApiError::Conflict("Document has no published version".to_string()))?;
    repo.get_version(document.id, version).await?.ok_or_else(|| {
        ApiError::NotFound(format!(
            "Version {} of document {} not found",
            version, document.id
        ))
    })?;

    let target = match &request.target {
        RolloutTargetDto::Organization => RolloutTarget::Organization,
        RolloutTargetDto::Team { team_id } => RolloutTarget::Team { team_id: *team_id },
    };

    let auth = AuthorizationContext::from_user(&user);
    let mut rollout = Rollout::new(
        user.organization_id,
        document.id,
        version,
        request.name.unwrap_or_else(|| document.title.clone()),
        target.clone(),
        auth.audit_identity(),
    );
    rollout.due_date = request.due_date;

    let created = repo.create_rollout(&rollout).await?;

    // Fan out acknowledgments to the audience's current people
    let people = create_person_repository(&state.db)
        .list_all(user.organization_id)
        .await?;
    let targeted: Vec<Acknowledgment> = people
        .iter()
        .filter(|p| p.is_current())
        .filter(|p| match &target {
            RolloutTarget::Organization => true,
            RolloutTarget::Team { team_id } => p.team_id == Some(*team_id),
        })
        .map(|p| Acknowledgment::new(created.id, p.id))
        .collect();
    repo.create_acknowledgments(&targeted).await?;

    let progress = repo.ack_progress(created.id).await?;

    create_audit_repository(&state.db)
        .record(
            &AuditEntry::new(
                user.organization_id,
                auth.audit_identity(),
                "rollout.create",
                "rollout",
                Some(created.id),
            )
            .with_details(serde_json::json!({ "targeted": progress.total })),
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(rollout_to_response(&created, progress.total, progress.acknowledged)),
    ))
}

async fn list_rollouts(
    State(state): State<AppState>,
    RequireDocsRead(user): RequireDocsRead,
) -> Result<Json<Vec<RolloutResponse>>, ApiError> {
    let repo = create_document_repository(&state.db);
    let rollouts = repo.list_rollouts(user.organization_id).await?;

    let mut responses = Vec::with_capacity(rollouts.len());
    for rollout in &rollouts {
        let progress = repo.ack_progress(rollout.id).await?;
        responses.push(rollout_to_response(
            rollout,
            progress.total,
            progress.acknowledged,
        ));
    }

    Ok(Json(responses))
}

async fn get_rollout(
    State(state): State<AppState>,
    RequireDocsRead(user): RequireDocsRead,
    Path(id): Path<Uuid>,
) -> Result<Json<RolloutDetailResponse>, ApiError> {
    let repo = create_document_repository(&state.db);
    let rollout = repo
        .get_rollout(user.organization_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Rollout {} not found", id)))?;

    let progress = repo.ack_progress(id).await?;
    let acks = repo.list_acknowledgments(id).await?;

    Ok(Json(RolloutDetailResponse {
        rollout: rollout_to_response(&rollout, progress.total, progress.acknowledged),
        acknowledgments: acks
            .iter()
            .map(|a| AcknowledgmentResponse {
                person_id: a.person_id,
                acknowledged_at: a.acknowledged_at,
            })
            .collect(),
    }))
}

/// Records the caller's acknowledgment.
async fn acknowledge_rollout(
    State(state): State<AppState>,
    RequireDocsAcknowledge(user): RequireDocsAcknowledge,
    Path(id): Path<Uuid>,
) -> Result<Json<AcknowledgmentResponse>, ApiError> {
    let repo = create_document_repository(&state.db);
    let rollout = repo
        .get_rollout(user.organization_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Rollout {} not found", id)))?;

    if rollout.status != RolloutStatus::Active {
        return Err(ApiError::Conflict(format!(
            "Rollout is {}",
            rollout.status
        )));
    }

    let person = person_for_user(&state, &user).await?;

    match repo.acknowledge(id, person.id).await? {
        AckOutcome::Recorded => {}
        AckOutcome::AlreadyAcknowledged => {
            return Err(ApiError::Conflict(
                "Rollout already acknowledged".to_string(),
            ));
        }
        AckOutcome::NotTargeted => {
            return Err(ApiError::NotFound(
                "You are not part of this rollout".to_string(),
            ));
        }
    }

    let auth = AuthorizationContext::from_user(&user);
    create_audit_repository(&state.db)
        .record(&AuditEntry::new(
            user.organization_id,
            auth.audit_identity(),
            "rollout.acknowledge",
            "rollout",
            Some(id),
        ))
        .await?;

    Ok(Json(AcknowledgmentResponse {
        person_id: person.id,
        acknowledged_at: Some(Utc::now()),
    }))
}

/// Marks a rollout completed; every acknowledgment must be in.
async fn complete_rollout(
    State(state): State<AppState>,
    RequireDocsWrite(user): RequireDocsWrite,
    Path(id): Path<Uuid>,
) -> Result<Json<RolloutResponse>, ApiError> {
    let repo = create_document_repository(&state.db);
    let mut rollout = repo
        .get_rollout(user.organization_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Rollout {} not found", id)))?;

    if rollout.status != RolloutStatus::Active {
        return Err(ApiError::Conflict(format!("Rollout is {}", rollout.status)));
    }

    let progress = repo.ack_progress(id).await?;
    if !progress.is_complete() {
        return Err(ApiError::Conflict(format!(
            "{} of {} acknowledgments outstanding",
            progress.total - progress.acknowledged,
            progress.total
        )));
    }

    rollout.status = RolloutStatus::Completed;
    let saved = repo.save_rollout(&rollout).await?;

    Ok(Json(rollout_to_response(
        &saved,
        progress.total,
        progress.acknowledged,
    )))
}

/// Cancels an active rollout.
async fn cancel_rollout(
    State(state): State<AppState>,
    RequireDocsWrite(user): RequireDocsWrite,
    Path(id): Path<Uuid>,
) -> Result<Json<RolloutResponse>, ApiError> {
    let repo = create_document_repository(&state.db);
    let mut rollout = repo
        .get_rollout(user.organization_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Rollout {} not found", id)))?;

    if rollout.status != RolloutStatus::Active {
        return Err(ApiError::Conflict(format!("Rollout is {}", rollout.status)));
    }

    rollout.status = RolloutStatus::Cancelled;
    let saved = repo.save_rollout(&rollout).await?;
    let progress = repo.ack_progress(id).await?;

    Ok(Json(rollout_to_response(
        &saved,
        progress.total,
        progress.acknowledged,
    )))
}

// ============================================================================
// Helpers
// ============================================================================

/// Resolves the person record behind a user account (shared email).
async fn person_for_user(
    state: &AppState,
    user: &User,
) -> Result<keel_core::models::Person, ApiError> {
    create_person_repository(&state.db)
        .get_by_email(user.organization_id, &user.email)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(
                "No person record is linked to this account".to_string(),
            )
        })
}

fn parse_doc_status(s: &str) -> Result<DocumentStatus, ApiError> {
    s.parse::<DocumentStatus>().map_err(|_| {
        ApiError::BadRequest(format!(
            "Invalid document status: {}. Must be one of: draft, published, archived",
            s
        ))
    })
}

fn document_to_response(document: &Document) -> DocumentResponse {
    DocumentResponse {
        id: document.id,
        title: document.title.clone(),
        doc_type: document.doc_type.as_db_str(),
        status: document.status.to_string(),
        owner_id: document.owner_id,
        current_version: document.current_version,
        created_at: document.created_at,
        updated_at: document.updated_at,
    }
}

fn rollout_to_response(rollout: &Rollout, total: u64, acknowledged: u64) -> RolloutResponse {
    RolloutResponse {
        id: rollout.id,
        document_id: rollout.document_id,
        version: rollout.version,
        name: rollout.name.clone(),
        status: rollout.status.to_string(),
        due_date: rollout.due_date,
        created_by: rollout.created_by.clone(),
        created_at: rollout.created_at,
        total,
        acknowledged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_doc_status() {
        assert_eq!(parse_doc_status("draft").unwrap(), DocumentStatus::Draft);
        assert_eq!(
            parse_doc_status("published").unwrap(),
            DocumentStatus::Published
        );
        assert!(parse_doc_status("final").is_err());
    }

    #[test]
    fn test_rollout_target_dto_serde() {
        let dto: RolloutTargetDto =
            serde_json::from_str(r#"{"kind":"organization"}"#).unwrap();
        assert!(matches!(dto, RolloutTargetDto::Organization));

        let dto: RolloutTargetDto = serde_json::from_str(
            r#"{"kind":"team","team_id":"00000000-0000-0000-0000-000000000000"}"#,
        )
        .unwrap();
        assert!(matches!(dto, RolloutTargetDto::Team { .. }));
    }
}
