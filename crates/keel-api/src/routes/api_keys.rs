//! API key management endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use keel_core::db::create_api_key_repository;
use keel_core::{ApiKey, Capability};

use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Creates API key routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_keys).post(create_key))
        .route("/:id", axum::routing::delete(revoke_key))
}

// ============================================================================
// DTOs
// ============================================================================

/// Request body for creating an API key.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateApiKeyRequest {
    /// Key name (e.g., "ci-pipeline").
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    /// Capability strings the key is limited to; `*` for all of the
    /// owner's capabilities.
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    /// Optional expiry.
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_scopes() -> Vec<String> {
    vec!["*".to_string()]
}

/// API key response DTO (no hash, no secret).
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiKeyResponse {
    pub id: Uuid,
    pub name: String,
    pub key_prefix: String,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Response for key creation: includes the full key, shown exactly
/// once.
#[derive(Debug, Serialize, ToSchema)]
pub struct CreatedApiKeyResponse {
    #[serde(flatten)]
    pub key: ApiKeyResponse,
    /// The full API key. Store it now; it cannot be retrieved again.
    pub secret: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// List the caller's API keys.
async fn list_keys(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<Vec<ApiKeyResponse>>, ApiError> {
    let keys = create_api_key_repository(&state.db)
        .list_for_user(user.id)
        .await?;
    Ok(Json(keys.iter().map(key_to_response).collect()))
}

/// Create an API key for the caller.
async fn create_key(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(request): Json<CreateApiKeyRequest>,
) -> Result<(StatusCode, Json<CreatedApiKeyResponse>), ApiError> {
    request.validate()?;

    for scope in &request.scopes {
        if scope == "*" {
            continue;
        }
        let capability = scope
            .parse::<Capability>()
            .map_err(|_| ApiError::BadRequest(format!("Unknown capability scope: {}", scope)))?;
        // A key cannot grant more than its owner's role allows
        if !user.has_capability(capability) {
            return Err(ApiError::Forbidden(format!(
                "Cannot create a key with capability the account lacks: {}",
                scope
            )));
        }
    }

    if let Some(expires_at) = request.expires_at {
        if expires_at <= Utc::now() {
            return Err(ApiError::BadRequest(
                "expires_at must be in the future".to_string(),
            ));
        }
    }

    let (key, secret) = ApiKey::generate(
        user.id,
        user.organization_id,
        request.name,
        request.scopes,
        request.expires_at,
    );
    create_api_key_repository(&state.db).create(&key).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedApiKeyResponse {
            key: key_to_response(&key),
            secret,
        }),
    ))
}

/// Revoke one of the caller's API keys.
async fn revoke_key(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let repo = create_api_key_repository(&state.db);
    let owned = repo
        .list_for_user(user.id)
        .await?
        .into_iter()
        .any(|k| k.id == id);

    if !owned {
        return Err(ApiError::NotFound(format!("API key {} not found", id)));
    }

    repo.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn key_to_response(key: &ApiKey) -> ApiKeyResponse {
    ApiKeyResponse {
        id: key.id,
        name: key.name.clone(),
        key_prefix: key.key_prefix.clone(),
        scopes: key.scopes.clone(),
        expires_at: key.expires_at,
        last_used_at: key.last_used_at,
        created_at: key.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_response_hides_hash() {
        let (key, _secret) = ApiKey::generate(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "ci",
            vec!["*".to_string()],
            None,
        );
        let response = key_to_response(&key);
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains(&key.key_hash));
        assert!(json.contains(&key.key_prefix));
    }

    #[test]
    fn test_default_scopes() {
        assert_eq!(default_scopes(), vec!["*".to_string()]);
    }
}
