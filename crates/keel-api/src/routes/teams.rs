//! Team endpoints, including the org chart views.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use keel_core::db::{create_person_repository, create_team_repository};
use keel_core::models::Team;
use keel_core::orgchart::{build_forest, layout_forest, would_create_cycle, ChartPlacement, OrgChartNode};

use crate::auth::{RequirePeopleRead, RequirePeopleWrite};
use crate::error::ApiError;
use crate::state::AppState;

/// Creates team routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_teams).post(create_team))
        .route(
            "/:id",
            get(get_team).put(update_team).delete(delete_team),
        )
        .route("/chart", get(org_chart))
        .route("/chart/move", post(move_chart_node))
}

// ============================================================================
// DTOs
// ============================================================================

/// Request body for creating a team.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateTeamRequest {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    pub description: Option<String>,
    pub lead_id: Option<Uuid>,
    pub parent_team_id: Option<Uuid>,
}

/// Request body for updating a team.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateTeamRequest {
    #[validate(length(min = 1, max = 128))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub lead_id: Option<Uuid>,
    pub parent_team_id: Option<Uuid>,
}

/// Team response DTO.
#[derive(Debug, Serialize, ToSchema)]
pub struct TeamResponse {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub lead_id: Option<Uuid>,
    pub parent_team_id: Option<Uuid>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Org chart response: the forest plus a computed layout.
#[derive(Debug, Serialize)]
pub struct OrgChartResponse {
    /// Root nodes of the reporting forest.
    pub roots: Vec<OrgChartNode>,
    /// Row/column placement per person for rendering.
    pub layout: Vec<ChartPlacement>,
}

/// Request body for a drag-and-drop chart move.
#[derive(Debug, Deserialize, ToSchema)]
pub struct MoveChartNodeRequest {
    /// The person being moved.
    pub person_id: Uuid,
    /// The new manager; omit to make the person a root.
    pub new_manager_id: Option<Uuid>,
}

// ============================================================================
// Handlers
// ============================================================================

/// List teams.
async fn list_teams(
    State(state): State<AppState>,
    RequirePeopleRead(user): RequirePeopleRead,
) -> Result<Json<Vec<TeamResponse>>, ApiError> {
    let teams = create_team_repository(&state.db)
        .list(user.organization_id)
        .await?;
    Ok(Json(teams.iter().map(team_to_response).collect()))
}

/// Create a team.
async fn create_team(
    State(state): State<AppState>,
    RequirePeopleWrite(user): RequirePeopleWrite,
    Json(request): Json<CreateTeamRequest>,
) -> Result<(StatusCode, Json<TeamResponse>), ApiError> {
    request.validate()?;

    let mut team = Team::new(user.organization_id, request.name);
    team.description = request.description;
    team.lead_id = request.lead_id;
    team.parent_team_id = request.parent_team_id;

    let created = create_team_repository(&state.db).create(&team).await?;
    Ok((StatusCode::CREATED, Json(team_to_response(&created))))
}

/// Get a team.
async fn get_team(
    State(state): State<AppState>,
    RequirePeopleRead(user): RequirePeopleRead,
    Path(id): Path<Uuid>,
) -> Result<Json<TeamResponse>, ApiError> {
    let team = create_team_repository(&state.db)
        .get(user.organization_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Team {} not found", id)))?;
    Ok(Json(team_to_response(&team)))
}

/// Update a team.
async fn update_team(
    State(state): State<AppState>,
    RequirePeopleWrite(user): RequirePeopleWrite,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateTeamRequest>,
) -> Result<Json<TeamResponse>, ApiError> {
    request.validate()?;

    let repo = create_team_repository(&state.db);
    let mut team = repo
        .get(user.organization_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Team {} not found", id)))?;

    if let Some(name) = request.name {
        team.name = name;
    }
    if let Some(description) = request.description {
        team.description = Some(description);
    }
    if let Some(lead_id) = request.lead_id {
        team.lead_id = Some(lead_id);
    }
    if let Some(parent_team_id) = request.parent_team_id {
        if parent_team_id == team.id {
            return Err(ApiError::Conflict(
                "A team cannot be its own parent".to_string(),
            ));
        }
        team.parent_team_id = Some(parent_team_id);
    }

    let saved = repo.save(&team).await?;
    Ok(Json(team_to_response(&saved)))
}

/// Delete a team.
async fn delete_team(
    State(state): State<AppState>,
    RequirePeopleWrite(user): RequirePeopleWrite,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let deleted = create_team_repository(&state.db)
        .delete(user.organization_id, id)
        .await?;

    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Team {} not found", id)))
    }
}

/// The org chart: reporting forest + deterministic layout.
async fn org_chart(
    State(state): State<AppState>,
    RequirePeopleRead(user): RequirePeopleRead,
) -> Result<Json<OrgChartResponse>, ApiError> {
    let people = create_person_repository(&state.db)
        .list_all(user.organization_id)
        .await?;

    let current: Vec<_> = people.into_iter().filter(|p| p.is_current()).collect();
    let roots = build_forest(&current)?;
    let layout = layout_forest(&roots);

    Ok(Json(OrgChartResponse { roots, layout }))
}

/// Re-parent a person in the org chart (drag-and-drop move).
async fn move_chart_node(
    State(state): State<AppState>,
    RequirePeopleWrite(user): RequirePeopleWrite,
    Json(request): Json<MoveChartNodeRequest>,
) -> Result<Json<OrgChartResponse>, ApiError> {
    let person_repo = create_person_repository(&state.db);
    let mut person = person_repo
        .get(user.organization_id, request.person_id)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("Person {} not found", request.person_id))
        })?;

    if let Some(new_manager_id) = request.new_manager_id {
        let all = person_repo.list_all(user.organization_id).await?;
        if would_create_cycle(&all, person.id, new_manager_id)? {
            return Err(ApiError::Conflict(
                "Move would create a reporting cycle".to_string(),
            ));
        }
        person.manager_id = Some(new_manager_id);
    } else {
        person.manager_id = None;
    }

    person_repo.save(&person).await?;

    // Return the refreshed chart so the client can re-render
    let people = person_repo.list_all(user.organization_id).await?;
    let current: Vec<_> = people.into_iter().filter(|p| p.is_current()).collect();
    let roots = build_forest(&current)?;
    let layout = layout_forest(&roots);

    Ok(Json(OrgChartResponse { roots, layout }))
}

fn team_to_response(team: &Team) -> TeamResponse {
    TeamResponse {
        id: team.id,
        name: team.name.clone(),
        description: team.description.clone(),
        lead_id: team.lead_id,
        parent_team_id: team.parent_team_id,
        created_at: team.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_team_to_response() {
        let mut team = Team::new(Uuid::new_v4(), "Platform");
        team.description = Some("Infra".to_string());
        let response = team_to_response(&team);
        assert_eq!(response.name, "Platform");
        assert_eq!(response.description.as_deref(), Some("Infra"));
    }
}
