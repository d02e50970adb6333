//! Security & compliance endpoints: frameworks, controls, the
//! Statement of Applicability, risks, and evidence.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use keel_core::db::create_security_repository;
use keel_core::models::{
    Control, ControlStatus, Evidence, Framework, FrameworkKind, Risk, RiskStatus, SoaItem,
};

use crate::auth::{RequireSecurityRead, RequireSecurityWrite};
use crate::error::ApiError;
use crate::state::AppState;

/// Creates security routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/frameworks", get(list_frameworks).post(create_framework))
        .route(
            "/frameworks/:id",
            get(get_framework)
                .put(update_framework)
                .delete(delete_framework),
        )
        .route(
            "/frameworks/:id/controls",
            get(list_controls).post(create_control),
        )
        .route(
            "/frameworks/:id/soa",
            get(list_soa).put(upsert_soa),
        )
        .route(
            "/controls/:id",
            put(update_control).delete(delete_control),
        )
        .route(
            "/controls/:id/evidence",
            get(list_evidence).post(create_evidence),
        )
        .route("/evidence/:id", axum::routing::delete(delete_evidence))
        .route("/risks", get(list_risks).post(create_risk))
        .route(
            "/risks/:id",
            get(get_risk).put(update_risk).delete(delete_risk),
        )
}

// ============================================================================
// DTOs
// ============================================================================

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateFrameworkRequest {
    /// Framework kind: soc2, iso27001, or a custom label.
    pub kind: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub version: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateFrameworkRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FrameworkResponse {
    pub id: Uuid,
    pub kind: String,
    pub name: String,
    pub version: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateControlRequest {
    /// Control code (e.g., "CC6.1").
    #[validate(length(min = 1, max = 32))]
    pub code: String,
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    pub description: Option<String>,
    pub owner_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateControlRequest {
    #[validate(length(min = 1, max = 255))]
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub owner_id: Option<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ControlResponse {
    pub id: Uuid,
    pub framework_id: Uuid,
    pub code: String,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub owner_id: Option<Uuid>,
}

/// One SoA upsert: a decision for one control.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpsertSoaRequest {
    pub control_id: Uuid,
    pub applicable: bool,
    /// Required when the control is marked not applicable.
    pub justification: Option<String>,
}

/// One row of the Statement of Applicability: the control joined with
/// its applicability decision, if assessed.
#[derive(Debug, Serialize, ToSchema)]
pub struct SoaRowResponse {
    pub control_id: Uuid,
    pub code: String,
    pub title: String,
    pub implementation_status: String,
    /// None until the control has been assessed.
    pub applicable: Option<bool>,
    pub justification: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateRiskRequest {
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    pub description: Option<String>,
    #[validate(range(min = 1, max = 5))]
    pub likelihood: u8,
    #[validate(range(min = 1, max = 5))]
    pub impact: u8,
    pub owner_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateRiskRequest {
    #[validate(length(min = 1, max = 255))]
    pub title: Option<String>,
    pub description: Option<String>,
    #[validate(range(min = 1, max = 5))]
    pub likelihood: Option<u8>,
    #[validate(range(min = 1, max = 5))]
    pub impact: Option<u8>,
    pub status: Option<String>,
    pub owner_id: Option<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RiskResponse {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub likelihood: u8,
    pub impact: u8,
    pub score: u8,
    pub status: String,
    pub owner_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateEvidenceRequest {
    #[validate(length(min = 1, max = 255))]
    pub title: String,
    pub location: Option<String>,
    pub valid_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EvidenceResponse {
    pub id: Uuid,
    pub control_id: Uuid,
    pub title: String,
    pub location: Option<String>,
    pub collected_at: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    pub expired: bool,
}

/// Query parameters for listing risks.
#[derive(Debug, Deserialize)]
pub struct ListRisksQuery {
    pub status: Option<String>,
}

// ============================================================================
// Framework handlers
// ============================================================================

async fn list_frameworks(
    State(state): State<AppState>,
    RequireSecurityRead(user): RequireSecurityRead,
) -> Result<Json<Vec<FrameworkResponse>>, ApiError> {
    let frameworks = create_security_repository(&state.db)
        .list_frameworks(user.organization_id)
        .await?;
    Ok(Json(frameworks.iter().map(framework_to_response).collect()))
}

async fn create_framework(
    State(state): State<AppState>,
    RequireSecurityWrite(user): RequireSecurityWrite,
    Json(request): Json<CreateFrameworkRequest>,
) -> Result<(StatusCode, Json<FrameworkResponse>), ApiError> {
    request.validate()?;

    let mut framework = Framework::new(
        user.organization_id,
        FrameworkKind::parse(&request.kind),
        request.name,
    );
    framework.version = request.version;
    framework.description = request.description;

    let created = create_security_repository(&state.db)
        .create_framework(&framework)
        .await?;
    Ok((StatusCode::CREATED, Json(framework_to_response(&created))))
}

async fn get_framework(
    State(state): State<AppState>,
    RequireSecurityRead(user): RequireSecurityRead,
    Path(id): Path<Uuid>,
) -> Result<Json<FrameworkResponse>, ApiError> {
    let framework = create_security_repository(&state.db)
        .get_framework(user.organization_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Framework {} not found", id)))?;
    Ok(Json(framework_to_response(&framework)))
}

async fn update_framework(
    State(state): State<AppState>,
    RequireSecurityWrite(user): RequireSecurityWrite,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateFrameworkRequest>,
) -> Result<Json<FrameworkResponse>, ApiError> {
    request.validate()?;

    let repo = create_security_repository(&state.db);
    let mut framework = repo
        .get_framework(user.organization_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Framework {} not found", id)))?;

    if let Some(name) = request.name {
        framework.name = name;
    }
    if let Some(version) = request.version {
        framework.version = Some(version);
    }
    if let Some(description) = request.description {
        framework.description = Some(description);
    }

    let saved = repo.save_framework(&framework).await?;
    Ok(Json(framework_to_response(&saved)))
}

async fn delete_framework(
    State(state): State<AppState>,
    RequireSecurityWrite(user): RequireSecurityWrite,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let deleted = create_security_repository(&state.db)
        .delete_framework(user.organization_id, id)
        .await?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Framework {} not found", id)))
    }
}

// ============================================================================
// Control handlers
// ============================================================================

async fn list_controls(
    State(state): State<AppState>,
    RequireSecurityRead(user): RequireSecurityRead,
    Path(framework_id): Path<Uuid>,
) -> Result<Json<Vec<ControlResponse>>, ApiError> {
    let repo = create_security_repository(&state.db);
    repo.get_framework(user.organization_id, framework_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Framework {} not found", framework_id)))?;

    let controls = repo.list_controls(framework_id).await?;
    Ok(Json(controls.iter().map(control_to_response).collect()))
}

async fn create_control(
    State(state): State<AppState>,
    RequireSecurityWrite(user): RequireSecurityWrite,
    Path(framework_id): Path<Uuid>,
    Json(request): Json<CreateControlRequest>,
) -> Result<(StatusCode, Json<ControlResponse>), ApiError> {
    request.validate()?;

    let repo = create_security_repository(&state.db);
    repo.get_framework(user.organization_id, framework_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Framework {} not found", framework_id)))?;

    let mut control = Control::new(
        user.organization_id,
        framework_id,
        request.code,
        request.title,
    );
    control.description = request.description;
    control.owner_id = request.owner_id;

    let created = repo.create_control(&control).await?;
    Ok((StatusCode::CREATED, Json(control_to_response(&created))))
}

async fn update_control(
    State(state): State<AppState>,
    RequireSecurityWrite(user): RequireSecurityWrite,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateControlRequest>,
) -> Result<Json<ControlResponse>, ApiError> {
    request.validate()?;

    let repo = create_security_repository(&state.db);
    let mut control = repo
        .get_control(user.organization_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Control {} not found", id)))?;

    if let Some(title) = request.title {
        control.title = title;
    }
    if let Some(description) = request.description {
        control.description = Some(description);
    }
    if let Some(status) = request.status.as_deref() {
        control.status = parse_control_status(status)?;
    }
    if let Some(owner_id) = request.owner_id {
        control.owner_id = Some(owner_id);
    }

    let saved = repo.save_control(&control).await?;
    Ok(Json(control_to_response(&saved)))
}

async fn delete_control(
    State(state): State<AppState>,
    RequireSecurityWrite(user): RequireSecurityWrite,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let deleted = create_security_repository(&state.db)
        .delete_control(user.organization_id, id)
        .await?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Control {} not found", id)))
    }
}

// ============================================================================
// Statement of Applicability handlers
// ============================================================================

/// The SoA view: every control of the framework joined with its
/// applicability decision.
async fn list_soa(
    State(state): State<AppState>,
    RequireSecurityRead(user): RequireSecurityRead,
    Path(framework_id): Path<Uuid>,
) -> Result<Json<Vec<SoaRowResponse>>, ApiError> {
    let repo = create_security_repository(&state.db);
    repo.get_framework(user.organization_id, framework_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Framework {} not found", framework_id)))?;

    let controls = repo.list_controls(framework_id).await?;
    let items = repo.list_soa_items(framework_id).await?;
    let by_control: std::collections::HashMap<Uuid, &SoaItem> =
        items.iter().map(|i| (i.control_id, i)).collect();

    let rows = controls
        .iter()
        .map(|control| {
            let item = by_control.get(&control.id);
            SoaRowResponse {
                control_id: control.id,
                code: control.code.clone(),
                title: control.title.clone(),
                implementation_status: control.status.to_string(),
                applicable: item.map(|i| i.applicable),
                justification: item.and_then(|i| i.justification.clone()),
            }
        })
        .collect();

    Ok(Json(rows))
}

/// Upserts one SoA decision.
async fn upsert_soa(
    State(state): State<AppState>,
    RequireSecurityWrite(user): RequireSecurityWrite,
    Path(framework_id): Path<Uuid>,
    Json(request): Json<UpsertSoaRequest>,
) -> Result<Json<Vec<SoaRowResponse>>, ApiError> {
    request.validate()?;

    if !request.applicable
        && request
            .justification
            .as_deref()
            .map(str::trim)
            .unwrap_or("")
            .is_empty()
    {
        return Err(ApiError::validation_field(
            "justification",
            "required",
            "A justification is required when a control is not applicable",
        ));
    }

    let repo = create_security_repository(&state.db);
    repo.get_framework(user.organization_id, framework_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Framework {} not found", framework_id)))?;
    let control = repo
        .get_control(user.organization_id, request.control_id)
        .await?
        .filter(|c| c.framework_id == framework_id)
        .ok_or_else(|| {
            ApiError::NotFound(format!(
                "Control {} not found in framework {}",
                request.control_id, framework_id
            ))
        })?;

    let mut item = SoaItem::new(
        user.organization_id,
        framework_id,
        control.id,
        request.applicable,
    );
    item.justification = request.justification;
    repo.upsert_soa_item(&item).await?;

    // Return the refreshed SoA view
    list_soa(
        State(state),
        RequireSecurityRead(user),
        Path(framework_id),
    )
    .await
}

// ============================================================================
// Risk handlers
// ============================================================================

async fn list_risks(
    State(state): State<AppState>,
    RequireSecurityRead(user): RequireSecurityRead,
    Query(query): Query<ListRisksQuery>,
) -> Result<Json<Vec<RiskResponse>>, ApiError> {
    let status = query.status.as_deref().map(parse_risk_status).transpose()?;
    let risks = create_security_repository(&state.db)
        .list_risks(user.organization_id, status)
        .await?;
    Ok(Json(risks.iter().map(risk_to_response).collect()))
}

async fn create_risk(
    State(state): State<AppState>,
    RequireSecurityWrite(user): RequireSecurityWrite,
    Json(request): Json<CreateRiskRequest>,
) -> Result<(StatusCode, Json<RiskResponse>), ApiError> {
    request.validate()?;

    let mut risk = Risk::new(
        user.organization_id,
        request.title,
        request.likelihood,
        request.impact,
    );
    risk.description = request.description;
    risk.owner_id = request.owner_id;

    let created = create_security_repository(&state.db)
        .create_risk(&risk)
        .await?;
    Ok((StatusCode::CREATED, Json(risk_to_response(&created))))
}

async fn get_risk(
    State(state): State<AppState>,
    RequireSecurityRead(user): RequireSecurityRead,
    Path(id): Path<Uuid>,
) -> Result<Json<RiskResponse>, ApiError> {
    let risk = create_security_repository(&state.db)
        .get_risk(user.organization_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Risk {} not found", id)))?;
    Ok(Json(risk_to_response(&risk)))
}

async fn update_risk(
    State(state): State<AppState>,
    RequireSecurityWrite(user): RequireSecurityWrite,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateRiskRequest>,
) -> Result<Json<RiskResponse>, ApiError> {
    request.validate()?;

    let repo = create_security_repository(&state.db);
    let mut risk = repo
        .get_risk(user.organization_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Risk {} not found", id)))?;

    if let Some(title) = request.title {
        risk.title = title;
    }
    if let Some(description) = request.description {
        risk.description = Some(description);
    }
    if let Some(likelihood) = request.likelihood {
        risk.likelihood = likelihood.clamp(1, 5);
    }
    if let Some(impact) = request.impact {
        risk.impact = impact.clamp(1, 5);
    }
    if let Some(status) = request.status.as_deref() {
        risk.status = parse_risk_status(status)?;
    }
    if let Some(owner_id) = request.owner_id {
        risk.owner_id = Some(owner_id);
    }

    let saved = repo.save_risk(&risk).await?;
    Ok(Json(risk_to_response(&saved)))
}

async fn delete_risk(
    State(state): State<AppState>,
    RequireSecurityWrite(user): RequireSecurityWrite,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let deleted = create_security_repository(&state.db)
        .delete_risk(user.organization_id, id)
        .await?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Risk {} not found", id)))
    }
}

// ============================================================================
// Evidence handlers
// ============================================================================

async fn list_evidence(
    State(state): State<AppState>,
    RequireSecurityRead(user): RequireSecurityRead,
    Path(control_id): Path<Uuid>,
) -> Result<Json<Vec<EvidenceResponse>>, ApiError> {
    let repo = create_security_repository(&state.db);
    repo.get_control(user.organization_id, control_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Control {} not found", control_id)))?;

    let evidence = repo.list_evidence(control_id).await?;
    Ok(Json(evidence.iter().map(evidence_to_response).collect()))
}

async fn create_evidence(
    State(state): State<AppState>,
    RequireSecurityWrite(user): RequireSecurityWrite,
    Path(control_id): Path<Uuid>,
    Json(request): Json<CreateEvidenceRequest>,
) -> Result<(StatusCode, Json<EvidenceResponse>), ApiError> {
    request.validate()?;

    let repo = create_security_repository(&state.db);
    repo.get_control(user.organization_id, control_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Control {} not found", control_id)))?;

    let mut evidence = Evidence::new(user.organization_id, control_id, request.title);
    evidence.location = request.location;
    evidence.valid_until = request.valid_until;

    let created = repo.create_evidence(&evidence).await?;
    Ok((StatusCode::CREATED, Json(evidence_to_response(&created))))
}

async fn delete_evidence(
    State(state): State<AppState>,
    RequireSecurityWrite(user): RequireSecurityWrite,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let deleted = create_security_repository(&state.db)
        .delete_evidence(user.organization_id, id)
        .await?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Evidence {} not found", id)))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_control_status(s: &str) -> Result<ControlStatus, ApiError> {
    s.parse::<ControlStatus>().map_err(|_| {
        ApiError::BadRequest(format!(
            "Invalid control status: {}. Must be one of: not_implemented, in_progress, implemented",
            s
        ))
    })
}

fn parse_risk_status(s: &str) -> Result<RiskStatus, ApiError> {
    s.parse::<RiskStatus>().map_err(|_| {
        ApiError::BadRequest(format!(
            "Invalid risk status: {}. Must be one of: open, mitigating, accepted, closed",
            s
        ))
    })
}

fn framework_to_response(framework: &Framework) -> FrameworkResponse {
    FrameworkResponse {
        id: framework.id,
        kind: framework.kind.as_db_str(),
        name: framework.name.clone(),
        version: framework.version.clone(),
        description: framework.description.clone(),
        created_at: framework.created_at,
    }
}

fn control_to_response(control: &Control) -> ControlResponse {
    ControlResponse {
        id: control.id,
        framework_id: control.framework_id,
        code: control.code.clone(),
        title: control.title.clone(),
        description: control.description.clone(),
        status: control.status.to_string(),
        owner_id: control.owner_id,
    }
}

fn risk_to_response(risk: &Risk) -> RiskResponse {
    RiskResponse {
        id: risk.id,
        title: risk.title.clone(),
        description: risk.description.clone(),
        likelihood: risk.likelihood,
        impact: risk.impact,
        score: risk.score(),
        status: risk.status.to_string(),
        owner_id: risk.owner_id,
    }
}

fn evidence_to_response(evidence: &Evidence) -> EvidenceResponse {
    EvidenceResponse {
        id: evidence.id,
        control_id: evidence.control_id,
        title: evidence.title.clone(),
        location: evidence.location.clone(),
        collected_at: evidence.collected_at,
        valid_until: evidence.valid_until,
        expired: evidence.is_expired(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_control_status() {
        assert_eq!(
            parse_control_status("implemented").unwrap(),
            ControlStatus::Implemented
        );
        assert!(parse_control_status("done").is_err());
    }

    #[test]
    fn test_parse_risk_status() {
        assert_eq!(parse_risk_status("accepted").unwrap(), RiskStatus::Accepted);
        assert!(parse_risk_status("ignored").is_err());
    }

    #[test]
    fn test_risk_to_response_score() {
        let risk = Risk::new(Uuid::new_v4(), "Theft", 3, 4);
        let response = risk_to_response(&risk);
        assert_eq!(response.score, 12);
        assert_eq!(response.status, "open");
    }
}
