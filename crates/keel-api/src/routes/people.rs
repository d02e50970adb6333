//! People (HR record) endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use keel_core::db::{
    create_audit_repository, create_person_repository, AuditEntry, Pagination, PersonFilter,
};
use keel_core::models::{EmploymentStatus, Person};
use keel_core::validation::validate_email;
use keel_core::AuthorizationContext;

use crate::auth::{RequirePeopleRead, RequirePeopleWrite};
use crate::error::ApiError;
use crate::state::AppState;

/// Creates people routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_people).post(create_person))
        .route(
            "/:id",
            get(get_person).put(update_person).delete(delete_person),
        )
}

// ============================================================================
// DTOs
// ============================================================================

/// Query parameters for listing people.
#[derive(Debug, Deserialize, Validate)]
pub struct ListPeopleQuery {
    /// Filter by employment status.
    pub status: Option<String>,
    /// Filter by team.
    pub team_id: Option<Uuid>,
    /// Filter by manager.
    pub manager_id: Option<Uuid>,
    /// Substring search on name or email.
    pub search: Option<String>,
    /// Page number (1-indexed).
    #[validate(range(min = 1))]
    pub page: Option<u32>,
    /// Items per page.
    #[validate(range(min = 1, max = 200))]
    pub per_page: Option<u32>,
}

/// Request body for creating a person.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreatePersonRequest {
    #[validate(length(min = 1, max = 128))]
    pub first_name: String,
    #[validate(length(min = 1, max = 128))]
    pub last_name: String,
    #[validate(length(min = 3, max = 254))]
    pub email: String,
    pub job_title: Option<String>,
    pub department: Option<String>,
    pub status: Option<String>,
    pub manager_id: Option<Uuid>,
    pub team_id: Option<Uuid>,
    pub start_date: Option<NaiveDate>,
}

/// Request body for updating a person.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdatePersonRequest {
    #[validate(length(min = 1, max = 128))]
    pub first_name: Option<String>,
    #[validate(length(min = 1, max = 128))]
    pub last_name: Option<String>,
    #[validate(length(min = 3, max = 254))]
    pub email: Option<String>,
    pub job_title: Option<String>,
    pub department: Option<String>,
    pub status: Option<String>,
    pub manager_id: Option<Uuid>,
    pub team_id: Option<Uuid>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// Person response DTO.
#[derive(Debug, Serialize, ToSchema)]
pub struct PersonResponse {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub email: String,
    pub job_title: Option<String>,
    pub department: Option<String>,
    pub status: String,
    pub manager_id: Option<Uuid>,
    pub team_id: Option<Uuid>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Paginated response wrapper.
#[derive(Debug, Serialize, ToSchema)]
pub struct PaginatedPersonResponse {
    pub data: Vec<PersonResponse>,
    pub page: u32,
    pub per_page: u32,
    pub total_items: u64,
    pub total_pages: u32,
}

// ============================================================================
// Handlers
// ============================================================================

/// List people with pagination and filters.
async fn list_people(
    State(state): State<AppState>,
    RequirePeopleRead(user): RequirePeopleRead,
    Query(query): Query<ListPeopleQuery>,
) -> Result<Json<PaginatedPersonResponse>, ApiError> {
    query.validate()?;

    let filter = PersonFilter {
        organization_id: Some(user.organization_id),
        status: query.status.as_deref().map(parse_status).transpose()?,
        team_id: query.team_id,
        manager_id: query.manager_id,
        search: query.search,
    };
    let pagination = Pagination::from_query(query.page, query.per_page);

    let repo = create_person_repository(&state.db);
    let total = repo.count(&filter).await?;
    let people = repo.list(&filter, &pagination).await?;

    Ok(Json(PaginatedPersonResponse {
        data: people.iter().map(person_to_response).collect(),
        page: pagination.page,
        per_page: pagination.per_page,
        total_items: total,
        total_pages: pagination.total_pages(total),
    }))
}

/// Create a person.
async fn create_person(
    State(state): State<AppState>,
    RequirePeopleWrite(user): RequirePeopleWrite,
    Json(request): Json<CreatePersonRequest>,
) -> Result<(StatusCode, Json<PersonResponse>), ApiError> {
    request.validate()?;
    validate_email(&request.email)
        .map_err(|e| ApiError::validation_field("email", "invalid_format", &e.to_string()))?;

    let mut person = Person::new(
        user.organization_id,
        request.first_name,
        request.last_name,
        request.email,
    );
    person.job_title = request.job_title;
    person.department = request.department;
    if let Some(status) = request.status.as_deref() {
        person.status = parse_status(status)?;
    }
    person.manager_id = request.manager_id;
    person.team_id = request.team_id;
    person.start_date = request.start_date;

    let created = create_person_repository(&state.db).create(&person).await?;

    let auth = AuthorizationContext::from_user(&user);
    create_audit_repository(&state.db)
        .record(&AuditEntry::new(
            user.organization_id,
            auth.audit_identity(),
            "person.create",
            "person",
            Some(created.id),
        ))
        .await?;

    Ok((StatusCode::CREATED, Json(person_to_response(&created))))
}

/// Get a person by id.
async fn get_person(
    State(state): State<AppState>,
    RequirePeopleRead(user): RequirePeopleRead,
    Path(id): Path<Uuid>,
) -> Result<Json<PersonResponse>, ApiError> {
    let person = create_person_repository(&state.db)
        .get(user.organization_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Person {} not found", id)))?;

    Ok(Json(person_to_response(&person)))
}

/// Update a person.
async fn update_person(
    State(state): State<AppState>,
    RequirePeopleWrite(user): RequirePeopleWrite,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdatePersonRequest>,
) -> Result<Json<PersonResponse>, ApiError> {
    request.validate()?;

    let repo = create_person_repository(&state.db);
    let mut person = repo
        .get(user.organization_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Person {} not found", id)))?;

    if let Some(first_name) = request.first_name {
        person.first_name = first_name;
    }
    if let Some(last_name) = request.last_name {
        person.last_name = last_name;
    }
    if let Some(email) = request.email {
        validate_email(&email)
            .map_err(|e| ApiError::validation_field("email", "invalid_format", &e.to_string()))?;
        person.email = email.to_lowercase();
    }
    if let Some(job_title) = request.job_title {
        person.job_title = Some(job_title);
    }
    if let Some(department) = request.department {
        person.department = Some(department);
    }
    if let Some(status) = request.status.as_deref() {
        person.status = parse_status(status)?;
    }
    if let Some(manager_id) = request.manager_id {
        // Re-parenting goes through the org chart cycle check
        let all = repo.list_all(user.organization_id).await?;
        if keel_core::would_create_cycle(&all, person.id, manager_id)? {
            return Err(ApiError::Conflict(
                "Manager change would create a reporting cycle".to_string(),
            ));
        }
        person.manager_id = Some(manager_id);
    }
    if let Some(team_id) = request.team_id {
        person.team_id = Some(team_id);
    }
    if let Some(start_date) = request.start_date {
        person.start_date = Some(start_date);
    }
    if let Some(end_date) = request.end_date {
        person.end_date = Some(end_date);
    }

    let saved = repo.save(&person).await?;

    let auth = AuthorizationContext::from_user(&user);
    create_audit_repository(&state.db)
        .record(&AuditEntry::new(
            user.organization_id,
            auth.audit_identity(),
            "person.update",
            "person",
            Some(saved.id),
        ))
        .await?;

    Ok(Json(person_to_response(&saved)))
}

/// Delete a person.
async fn delete_person(
    State(state): State<AppState>,
    RequirePeopleWrite(user): RequirePeopleWrite,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let deleted = create_person_repository(&state.db)
        .delete(user.organization_id, id)
        .await?;

    if !deleted {
        return Err(ApiError::NotFound(format!("Person {} not found", id)));
    }

    let auth = AuthorizationContext::from_user(&user);
    create_audit_repository(&state.db)
        .record(&AuditEntry::new(
            user.organization_id,
            auth.audit_identity(),
            "person.delete",
            "person",
            Some(id),
        ))
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_status(s: &str) -> Result<EmploymentStatus, ApiError> {
    s.parse::<EmploymentStatus>().map_err(|_| {
        ApiError::BadRequest(format!(
            "Invalid employment status: {}. Must be one of: onboarding, active, on_leave, offboarding, departed",
            s
        ))
    })
}

fn person_to_response(person: &Person) -> PersonResponse {
    PersonResponse {
        id: person.id,
        first_name: person.first_name.clone(),
        last_name: person.last_name.clone(),
        full_name: person.full_name(),
        email: person.email.clone(),
        job_title: person.job_title.clone(),
        department: person.department.clone(),
        status: person.status.to_string(),
        manager_id: person.manager_id,
        team_id: person.team_id,
        start_date: person.start_date,
        end_date: person.end_date,
        created_at: person.created_at,
        updated_at: person.updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status("active").unwrap(), EmploymentStatus::Active);
        assert_eq!(
            parse_status("on_leave").unwrap(),
            EmploymentStatus::OnLeave
        );
        assert!(parse_status("fired").is_err());
    }

    #[test]
    fn test_person_to_response() {
        let person = Person::new(Uuid::new_v4(), "Ada", "Lovelace", "ada@example.com");
        let response = person_to_response(&person);
        assert_eq!(response.full_name, "Ada Lovelace");
        assert_eq!(response.status, "onboarding");
    }
}
