//! User administration endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use keel_core::auth::password::{hash_password, validate_password_strength};
use keel_core::db::create_user_repository;
use keel_core::validation::validate_email;
use keel_core::{Role, User, UserFilter, UserUpdate};

use crate::auth::RequireAdmin;
use crate::error::ApiError;
use crate::state::AppState;

/// Creates user administration routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route(
            "/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
}

// ============================================================================
// DTOs
// ============================================================================

/// Query parameters for listing users.
#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    /// Filter by role.
    pub role: Option<String>,
    /// Filter by enabled state.
    pub enabled: Option<bool>,
    /// Substring search.
    pub search: Option<String>,
}

/// Request body for creating a user.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateUserRequest {
    /// Email address.
    #[validate(length(min = 3, max = 254))]
    pub email: String,
    /// Login name.
    #[validate(length(min = 1, max = 64))]
    pub username: String,
    /// Initial password.
    pub password: String,
    /// Role name.
    pub role: String,
    /// Display name.
    pub display_name: Option<String>,
}

/// Request body for updating a user.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateUserRequest {
    #[validate(length(min = 3, max = 254))]
    pub email: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub username: Option<String>,
    pub role: Option<String>,
    pub display_name: Option<String>,
    pub enabled: Option<bool>,
}

/// User response DTO.
#[derive(Debug, Serialize, ToSchema)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub role: String,
    pub display_name: Option<String>,
    pub enabled: bool,
    pub external_subject: Option<String>,
    pub last_login_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

// ============================================================================
// Handlers
// ============================================================================

/// List users in the admin's organization.
async fn list_users(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Query(query): Query<ListUsersQuery>,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    let role = query.role.as_deref().map(parse_role).transpose()?;

    let users = create_user_repository(&state.db)
        .list(&UserFilter {
            organization_id: Some(admin.organization_id),
            role,
            enabled: query.enabled,
            search: query.search,
        })
        .await?;

    Ok(Json(users.iter().map(user_to_response).collect()))
}

/// Create a user.
async fn create_user(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Json(request): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    request.validate()?;

    validate_email(&request.email)
        .map_err(|e| ApiError::validation_field("email", "invalid_format", &e.to_string()))?;

    let strength_errors = validate_password_strength(&request.password);
    if !strength_errors.is_empty() {
        return Err(ApiError::validation_field(
            "password",
            "weak_password",
            &strength_errors.join("; "),
        ));
    }

    let role = parse_role(&request.role)?;
    let password_hash =
        hash_password(&request.password).map_err(|e| ApiError::Internal(e.to_string()))?;

    let mut user = User::new(
        admin.organization_id,
        request.email.to_lowercase(),
        request.username,
        password_hash,
        role,
    );
    user.display_name = request.display_name;

    let created = create_user_repository(&state.db).create(&user).await?;

    Ok((StatusCode::CREATED, Json(user_to_response(&created))))
}

/// Get a user by id.
async fn get_user(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<Uuid>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = load_org_user(&state, admin.organization_id, id).await?;
    Ok(Json(user_to_response(&user)))
}

/// Update a user.
async fn update_user(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateUserRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    request.validate()?;

    let existing = load_org_user(&state, admin.organization_id, id).await?;

    // An admin cannot demote or disable themselves; avoids locking the
    // organization out
    if existing.id == admin.id {
        let demoting = request
            .role
            .as_deref()
            .map(parse_role)
            .transpose()?
            .map(|r| r != Role::Admin)
            .unwrap_or(false);
        if demoting || request.enabled == Some(false) {
            return Err(ApiError::Conflict(
                "Admins cannot demote or disable their own account".to_string(),
            ));
        }
    }

    if let Some(email) = &request.email {
        validate_email(email)
            .map_err(|e| ApiError::validation_field("email", "invalid_format", &e.to_string()))?;
    }

    let update = UserUpdate {
        email: request.email.map(|e| e.to_lowercase()),
        username: request.username,
        role: request.role.as_deref().map(parse_role).transpose()?,
        display_name: request.display_name.map(Some),
        enabled: request.enabled,
    };

    let updated = create_user_repository(&state.db).update(id, &update).await?;
    Ok(Json(user_to_response(&updated)))
}

/// Delete a user.
async fn delete_user(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if id == admin.id {
        return Err(ApiError::Conflict(
            "Admins cannot delete their own account".to_string(),
        ));
    }

    // Scope check before delete
    load_org_user(&state, admin.organization_id, id).await?;

    let deleted = create_user_repository(&state.db).delete(id).await?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("User {} not found", id)))
    }
}

// ============================================================================
// Helpers
// ============================================================================

async fn load_org_user(
    state: &AppState,
    organization_id: Uuid,
    id: Uuid,
) -> Result<User, ApiError> {
    let user = create_user_repository(&state.db)
        .get(id)
        .await?
        .filter(|u| u.organization_id == organization_id)
        .ok_or_else(|| ApiError::NotFound(format!("User {} not found", id)))?;
    Ok(user)
}

fn parse_role(s: &str) -> Result<Role, ApiError> {
    s.parse::<Role>().map_err(|_| {
        ApiError::BadRequest(format!(
            "Invalid role: {}. Must be one of: admin, manager, member",
            s
        ))
    })
}

fn user_to_response(user: &User) -> UserResponse {
    UserResponse {
        id: user.id,
        email: user.email.clone(),
        username: user.username.clone(),
        role: user.role.to_string(),
        display_name: user.display_name.clone(),
        enabled: user.enabled,
        external_subject: user.external_subject.clone(),
        last_login_at: user.last_login_at,
        created_at: user.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_role() {
        assert_eq!(parse_role("admin").unwrap(), Role::Admin);
        assert_eq!(parse_role("Manager").unwrap(), Role::Manager);
        assert_eq!(parse_role("member").unwrap(), Role::Member);
        assert!(parse_role("root").is_err());
    }

    #[test]
    fn test_user_to_response_hides_hash() {
        let user = User::new(Uuid::new_v4(), "a@b.c", "alice", "secret-hash", Role::Member);
        let response = user_to_response(&user);
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("secret-hash"));
    }
}
