//! Workflow endpoints: templates, instances, step/instance
//! transitions, and the list/kanban/graph views.

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
    create_audit_repository, create_workflow_repository, AuditEntry, InstanceFilter, Pagination,
};
use keel_core::workflow::{
    build_board, build_graph, BoardColumn, InstanceStatus, StepStatus, TemplateStep,
    WorkflowEngine, WorkflowGraph, WorkflowInstance, WorkflowKind, WorkflowStep, WorkflowTemplate,
};
use keel_core::AuthorizationContext;
use keel_observability::metrics::record_workflow_transition;

use crate::auth::{RequireWorkflowsRead, RequireWorkflowsWrite};
use crate::error::ApiError;
use crate::state::AppState;

/// Creates workflow routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/templates", get(list_templates).post(create_template))
        .route(
            "/templates/:id",
            get(get_template).put(update_template).delete(delete_template),
        )
        .route("/templates/:id/instantiate", post(instantiate_template))
        .route("/instances", get(list_instances))
        .route("/instances/:id", get(get_instance))
        .route("/instances/:id/transition", post(transition_instance))
        .route(
            "/instances/:id/steps/:step_id/transition",
            post(transition_step),
        )
        .route(
            "/instances/:id/steps/:step_id",
            axum::routing::put(update_step),
        )
        .route("/instances/:id/board", get(instance_board))
        .route("/instances/:id/graph", get(instance_graph))
}

// ============================================================================
// DTOs
// ============================================================================

/// One template step definition.
#[derive(Debug, Deserialize, Serialize, Validate, ToSchema)]
pub struct TemplateStepDto {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub description: Option<String>,
    /// Days after instance start when the step is due.
    pub due_in_days: Option<i64>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateTemplateRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub description: Option<String>,
    /// Workflow kind: onboarding, offboarding, or a custom label.
    pub kind: String,
    #[validate(length(min = 1), nested)]
    pub steps: Vec<TemplateStepDto>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateTemplateRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub kind: Option<String>,
    #[validate(nested)]
    pub steps: Option<Vec<TemplateStepDto>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct InstantiateRequest {
    /// Instance name; defaults to the template name.
    pub name: Option<String>,
    /// The person the workflow is about.
    pub subject_person_id: Option<Uuid>,
    /// Start used for due-date computation; defaults to now.
    pub start: Option<DateTime<Utc>>,
    /// Start the instance immediately.
    #[serde(default)]
    pub auto_start: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ListInstancesQuery {
    pub status: Option<String>,
    pub subject_person_id: Option<Uuid>,
    #[validate(range(min = 1))]
    pub page: Option<u32>,
    #[validate(range(min = 1, max = 200))]
    pub per_page: Option<u32>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TransitionInstanceRequest {
    /// Target status.
    pub status: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TransitionStepRequest {
    /// Target status.
    pub status: String,
    /// Required when blocking.
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateStepRequest {
    pub assignee_id: Option<Uuid>,
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TemplateResponse {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub kind: String,
    pub steps: Vec<TemplateStepDto>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StepResponse {
    pub id: Uuid,
    pub position: i64,
    pub name: String,
    pub description: Option<String>,
    pub status: String,
    pub assignee_id: Option<Uuid>,
    pub due_date: Option<DateTime<Utc>>,
    pub blocked_reason: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub overdue: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InstanceResponse {
    pub id: Uuid,
    pub template_id: Uuid,
    pub name: String,
    pub status: String,
    pub owner_id: Uuid,
    pub subject_person_id: Option<Uuid>,
    pub due_date: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InstanceDetailResponse {
    #[serde(flatten)]
    pub instance: InstanceResponse,
    pub steps: Vec<StepResponse>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaginatedInstanceResponse {
    pub data: Vec<InstanceResponse>,
    pub page: u32,
    pub per_page: u32,
    pub total_items: u64,
    pub total_pages: u32,
}

/// One kanban column in the board view.
#[derive(Debug, Serialize)]
pub struct BoardColumnResponse {
    pub status: String,
    pub steps: Vec<StepResponse>,
}

// ============================================================================
// Template handlers
// ============================================================================

async fn list_templates(
    State(state): State<AppState>,
    RequireWorkflowsRead(user): RequireWorkflowsRead,
) -> Result<Json<Vec<TemplateResponse>>, ApiError> {
    let templates = create_workflow_repository(&state.db)
        .list_templates(user.organization_id)
        .await?;
    Ok(Json(templates.iter().map(template_to_response).collect()))
}

async fn create_template(
    State(state): State<AppState>,
    RequireWorkflowsWrite(user): RequireWorkflowsWrite,
    Json(request): Json<CreateTemplateRequest>,
) -> Result<(StatusCode, Json<TemplateResponse>), ApiError> {
    request.validate()?;

    let mut template = WorkflowTemplate::new(
        user.organization_id,
        request.name,
        WorkflowKind::parse(&request.kind),
        request.steps.iter().map(dto_to_template_step).collect(),
    );
    template.description = request.description;

    let created = create_workflow_repository(&state.db)
        .create_template(&template)
        .await?;
    Ok((StatusCode::CREATED, Json(template_to_response(&created))))
}

async fn get_template(
    State(state): State<AppState>,
    RequireWorkflowsRead(user): RequireWorkflowsRead,
    Path(id): Path<Uuid>,
) -> Result<Json<TemplateResponse>, ApiError> {
    let template = create_workflow_repository(&state.db)
        .get_template(user.organization_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Template {} not found", id)))?;
    Ok(Json(template_to_response(&template)))
}

async fn update_template(
    State(state): State<AppState>,
    RequireWorkflowsWrite(user): RequireWorkflowsWrite,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateTemplateRequest>,
) -> Result<Json<TemplateResponse>, ApiError> {
    request.validate()?;

    let repo = create_workflow_repository(&state.db);
    let mut template = repo
        .get_template(user.organization_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Template {} not found", id)))?;

    if let Some(name) = request.name {
        template.name = name;
    }
    if let Some(description) = request.description {
        template.description = Some(description);
    }
    if let Some(kind) = request.kind.as_deref() {
        template.kind = WorkflowKind::parse(kind);
    }
    if let Some(steps) = &request.steps {
        if steps.is_empty() {
            return Err(ApiError::BadRequest(
                "A template must have at least one step".to_string(),
            ));
        }
        template.steps = steps.iter().map(dto_to_template_step).collect();
    }

    let saved = repo.save_template(&template).await?;
    Ok(Json(template_to_response(&saved)))
}

async fn delete_template(
    State(state): State<AppState>,
    RequireWorkflowsWrite(user): RequireWorkflowsWrite,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let deleted = create_workflow_repository(&state.db)
        .delete_template(user.organization_id, id)
        .await?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Template {} not found", id)))
    }
}

/// Creates a workflow instance from a template.
async fn instantiate_template(
    State(state): State<AppState>,
    RequireWorkflowsWrite(user): RequireWorkflowsWrite,
    Path(id): Path<Uuid>,
    Json(request): Json<InstantiateRequest>,
) -> Result<(StatusCode, Json<InstanceDetailResponse>), ApiError> {
    let repo = create_workflow_repository(&state.db);
    let template = repo
        .get_template(user.organization_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Template {} not found", id)))?;

    let engine = WorkflowEngine::new();
    let auth = AuthorizationContext::from_user(&user);
    let start = request.start.unwrap_or_else(Utc::now);

    let (mut instance, steps) = engine.instantiate(
        &template,
        request.name,
        user.id,
        request.subject_person_id,
        start,
    )?;

    if request.auto_start {
        engine.transition_instance(&mut instance, &steps, InstanceStatus::InProgress, &auth)?;
    }

    repo.create_instance(&instance, &steps).await?;

    create_audit_repository(&state.db)
        .record(
            &AuditEntry::new(
                user.organization_id,
                auth.audit_identity(),
                "workflow.instantiate",
                "workflow_instance",
                Some(instance.id),
            )
            .with_details(serde_json::json!({ "template_id": template.id })),
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(instance_detail_response(&instance, &steps)),
    ))
}

// ============================================================================
// Instance handlers
// ============================================================================

async fn list_instances(
    State(state): State<AppState>,
    RequireWorkflowsRead(user): RequireWorkflowsRead,
    Query(query): Query<ListInstancesQuery>,
) -> Result<Json<PaginatedInstanceResponse>, ApiError> {
    query.validate()?;

    let filter = InstanceFilter {
        organization_id: Some(user.organization_id),
        status: query
            .status
            .as_deref()
            .map(parse_instance_status)
            .transpose()?,
        subject_person_id: query.subject_person_id,
    };
    let pagination = Pagination::from_query(query.page, query.per_page);

    let repo = create_workflow_repository(&state.db);
    let total = repo.count_instances(&filter).await?;
    let instances = repo.list_instances(&filter, &pagination).await?;

    Ok(Json(PaginatedInstanceResponse {
        data: instances.iter().map(instance_to_response).collect(),
        page: pagination.page,
        per_page: pagination.per_page,
        total_items: total,
        total_pages: pagination.total_pages(total),
    }))
}

async fn get_instance(
    State(state): State<AppState>,
    RequireWorkflowsRead(user): RequireWorkflowsRead,
    Path(id): Path<Uuid>,
) -> Result<Json<InstanceDetailResponse>, ApiError> {
    let repo = create_workflow_repository(&state.db);
    let instance = repo
        .get_instance(user.organization_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Instance {} not found", id)))?;
    let steps = repo.list_steps(id).await?;

    Ok(Json(instance_detail_response(&instance, &steps)))
}

/// Transitions a workflow instance.
async fn transition_instance(
    State(state): State<AppState>,
    RequireWorkflowsWrite(user): RequireWorkflowsWrite,
    Path(id): Path<Uuid>,
    Json(request): Json<TransitionInstanceRequest>,
) -> Result<Json<InstanceDetailResponse>, ApiError> {
    let to = parse_instance_status(&request.status)?;

    let repo = create_workflow_repository(&state.db);
    let mut instance = repo
        .get_instance(user.organization_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Instance {} not found", id)))?;
    let steps = repo.list_steps(id).await?;

    let engine = WorkflowEngine::new();
    let auth = AuthorizationContext::from_user(&user);
    let outcome = engine.transition_instance(&mut instance, &steps, to, &auth)?;

    repo.save_instance(&instance).await?;
    record_workflow_transition("instance", to.as_str());

    create_audit_repository(&state.db)
        .record(
            &AuditEntry::new(
                user.organization_id,
                auth.audit_identity(),
                "workflow.instance.transition",
                "workflow_instance",
                Some(instance.id),
            )
            .with_details(serde_json::json!({ "message": outcome.audit_message })),
        )
        .await?;

    Ok(Json(instance_detail_response(&instance, &steps)))
}

/// Transitions one step; completing the last open step completes the
/// instance.
async fn transition_step(
    State(state): State<AppState>,
    RequireWorkflowsWrite(user): RequireWorkflowsWrite,
    Path((id, step_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<TransitionStepRequest>,
) -> Result<Json<InstanceDetailResponse>, ApiError> {
    let to = parse_step_status(&request.status)?;

    let repo = create_workflow_repository(&state.db);
    let mut instance = repo
        .get_instance(user.organization_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Instance {} not found", id)))?;
    let mut steps = repo.list_steps(id).await?;

    let engine = WorkflowEngine::new();
    let auth = AuthorizationContext::from_user(&user);
    let outcome =
        engine.transition_step(&mut instance, &mut steps, step_id, to, request.reason, &auth)?;

    let changed = steps
        .iter()
        .find(|s| s.id == step_id)
        .ok_or_else(|| ApiError::NotFound(format!("Step {} not found", step_id)))?;
    repo.save_step(changed).await?;
    if outcome.instance_completed {
        repo.save_instance(&instance).await?;
    }

    record_workflow_transition("step", to.as_str());

    create_audit_repository(&state.db)
        .record(
            &AuditEntry::new(
                user.organization_id,
                auth.audit_identity(),
                "workflow.step.transition",
                "workflow_instance",
                Some(instance.id),
            )
            .with_details(serde_json::json!({ "message": outcome.audit_message })),
        )
        .await?;

    Ok(Json(instance_detail_response(&instance, &steps)))
}

/// Updates a step's assignee or due date.
async fn update_step(
    State(state): State<AppState>,
    RequireWorkflowsWrite(user): RequireWorkflowsWrite,
    Path((id, step_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<UpdateStepRequest>,
) -> Result<Json<StepResponse>, ApiError> {
    let repo = create_workflow_repository(&state.db);
    repo.get_instance(user.organization_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Instance {} not found", id)))?;

    let steps = repo.list_steps(id).await?;
    let mut step = steps
        .into_iter()
        .find(|s| s.id == step_id)
        .ok_or_else(|| ApiError::NotFound(format!("Step {} not found", step_id)))?;

    if let Some(assignee_id) = request.assignee_id {
        step.assignee_id = Some(assignee_id);
    }
    if let Some(due_date) = request.due_date {
        step.due_date = Some(due_date);
    }

    let saved = repo.save_step(&step).await?;
    Ok(Json(step_to_response(&saved)))
}

/// Kanban board view: steps grouped by status.
async fn instance_board(
    State(state): State<AppState>,
    RequireWorkflowsRead(user): RequireWorkflowsRead,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<BoardColumnResponse>>, ApiError> {
    let repo = create_workflow_repository(&state.db);
    repo.get_instance(user.organization_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Instance {} not found", id)))?;
    let steps = repo.list_steps(id).await?;

    let board = build_board(&steps);
    Ok(Json(board.iter().map(board_column_to_response).collect()))
}

/// Graph view: nodes plus sequential edges.
async fn instance_graph(
    State(state): State<AppState>,
    RequireWorkflowsRead(user): RequireWorkflowsRead,
    Path(id): Path<Uuid>,
) -> Result<Json<WorkflowGraph>, ApiError> {
    let repo = create_workflow_repository(&state.db);
    repo.get_instance(user.organization_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Instance {} not found", id)))?;
    let steps = repo.list_steps(id).await?;

    Ok(Json(build_graph(&steps)))
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_instance_status(s: &str) -> Result<InstanceStatus, ApiError> {
    s.parse::<InstanceStatus>().map_err(|_| {
        ApiError::BadRequest(format!(
            "Invalid instance status: {}. Must be one of: pending, in_progress, on_hold, completed, cancelled",
            s
        ))
    })
}

fn parse_step_status(s: &str) -> Result<StepStatus, ApiError> {
    s.parse::<StepStatus>().map_err(|_| {
        ApiError::BadRequest(format!(
            "Invalid step status: {}. Must be one of: pending, in_progress, completed, skipped, blocked",
            s
        ))
    })
}

fn dto_to_template_step(dto: &TemplateStepDto) -> TemplateStep {
    TemplateStep {
        name: dto.name.clone(),
        description: dto.description.clone(),
        due_in_days: dto.due_in_days,
    }
}

fn template_to_response(template: &WorkflowTemplate) -> TemplateResponse {
    TemplateResponse {
        id: template.id,
        name: template.name.clone(),
        description: template.description.clone(),
        kind: template.kind.as_db_str(),
        steps: template
            .steps
            .iter()
            .map(|s| TemplateStepDto {
                name: s.name.clone(),
                description: s.description.clone(),
                due_in_days: s.due_in_days,
            })
            .collect(),
        created_at: template.created_at,
    }
}

fn instance_to_response(instance: &WorkflowInstance) -> InstanceResponse {
    InstanceResponse {
        id: instance.id,
        template_id: instance.template_id,
        name: instance.name.clone(),
        status: instance.status.to_string(),
        owner_id: instance.owner_id,
        subject_person_id: instance.subject_person_id,
        due_date: instance.due_date,
        started_at: instance.started_at,
        completed_at: instance.completed_at,
        created_at: instance.created_at,
    }
}

fn step_to_response(step: &WorkflowStep) -> StepResponse {
    StepResponse {
        id: step.id,
        position: step.position,
        name: step.name.clone(),
        description: step.description.clone(),
        status: step.status.to_string(),
        assignee_id: step.assignee_id,
        due_date: step.due_date,
        blocked_reason: step.blocked_reason.clone(),
        completed_at: step.completed_at,
        overdue: step.is_overdue(Utc::now()),
    }
}

fn instance_detail_response(
    instance: &WorkflowInstance,
    steps: &[WorkflowStep],
) -> InstanceDetailResponse {
    let mut ordered: Vec<&WorkflowStep> = steps.iter().collect();
    ordered.sort_by_key(|s| s.position);

    InstanceDetailResponse {
        instance: instance_to_response(instance),
        steps: ordered.into_iter().map(step_to_response).collect(),
    }
}

fn board_column_to_response(column: &BoardColumn) -> BoardColumnResponse {
    BoardColumnResponse {
        status: column.status.to_string(),
        steps: column.steps.iter().map(step_to_response).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_statuses() {
        assert_eq!(
            parse_instance_status("on_hold").unwrap(),
            InstanceStatus::OnHold
        );
        assert!(parse_instance_status("paused").is_err());

        assert_eq!(parse_step_status("blocked").unwrap(), StepStatus::Blocked);
        assert!(parse_step_status("stuck").is_err());
    }

    #[test]
    fn test_template_round_trip_through_dto() {
        let template = WorkflowTemplate::new(
            Uuid::new_v4(),
            "Onboarding",
            WorkflowKind::Onboarding,
            vec![TemplateStep {
                name: "Accounts".to_string(),
                description: None,
                due_in_days: Some(1),
            }],
        );
        let response = template_to_response(&template);
        assert_eq!(response.kind, "onboarding");
        assert_eq!(response.steps.len(), 1);
        assert_eq!(response.steps[0].due_in_days, Some(1));
    }
}
