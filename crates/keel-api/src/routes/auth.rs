//! Authentication endpoints: password login, logout, session
//! introspection, and Azure AD single sign-on.

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use keel_core::auth::password::verify_password;
use keel_core::db::{create_organization_repository, create_user_repository};
use keel_core::{Role, SessionData, User};
use keel_observability::{record_login, AuditEventType, AuditResult};

use crate::auth::{
    clear_session, get_session_data, set_session_data, AuthenticatedUser, SESSION_SSO_STATE_KEY,
};
use crate::error::ApiError;
use crate::middleware::OptionalOrg;
use crate::state::AppState;

/// Creates auth routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/me", get(me))
        .route("/sso/authorize", get(sso_authorize))
        .route("/sso/callback", get(sso_callback))
}

// ============================================================================
// DTOs
// ============================================================================

/// Login request body.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    /// Username.
    #[validate(length(min = 1, max = 255))]
    pub username: String,
    /// Password.
    #[validate(length(min = 1, max = 1024))]
    pub password: String,
    /// Organization slug; defaults to `default` when omitted and no
    /// `X-Org-Id` header is present.
    pub organization: Option<String>,
}

/// Authenticated user response.
#[derive(Debug, Serialize, ToSchema)]
pub struct UserResponse {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub email: String,
    pub username: String,
    pub role: String,
    pub display_name: Option<String>,
    pub capabilities: Vec<String>,
}

/// SSO authorize response.
#[derive(Debug, Serialize, ToSchema)]
pub struct SsoAuthorizeResponse {
    /// URL the browser should be redirected to.
    pub authorize_url: String,
}

/// SSO callback query parameters.
#[derive(Debug, Deserialize)]
pub struct SsoCallbackQuery {
    pub code: String,
    pub state: String,
}

/// Payload stored in the session between authorize and callback.
#[derive(Debug, Serialize, Deserialize)]
struct SsoState {
    state: String,
    organization_id: Uuid,
}

// ============================================================================
// Handlers
// ============================================================================

/// Password login.
async fn login(
    State(state): State<AppState>,
    OptionalOrg(org_ctx): OptionalOrg,
    session: Session,
    Json(request): Json<LoginRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    request.validate()?;

    let org_id = resolve_login_org(&state, org_ctx.map(|c| c.organization_id), request.organization.as_deref()).await?;

    let user_repo = create_user_repository(&state.db);
    let user = user_repo
        .get_by_username(org_id, &request.username)
        .await?
        .ok_or(ApiError::InvalidCredentials)?;

    if user.password_hash.is_empty()
        || !verify_password(&request.password, &user.password_hash)
            .map_err(|e| ApiError::Internal(e.to_string()))?
    {
        record_login(false, "password");
        state
            .audit
            .log_event(
                AuditEventType::UserLogin,
                &request.username,
                Some(org_id),
                "Password login failed",
                serde_json::json!({}),
                AuditResult::Denied("invalid credentials".to_string()),
            )
            .await;
        return Err(ApiError::InvalidCredentials);
    }

    if !user.enabled {
        record_login(false, "password");
        return Err(ApiError::AccountDisabled);
    }

    set_session_data(&session, SessionData::for_user(&user))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    user_repo.update_last_login(user.id).await?;

    record_login(true, "password");
    state
        .audit
        .log_event(
            AuditEventType::UserLogin,
            &user.username,
            Some(user.organization_id),
            "User logged in",
            serde_json::json!({}),
            AuditResult::Success,
        )
        .await;
    info!(user_id = %user.id, username = %user.username, "Login successful");

    Ok(Json(user_to_response(&user)))
}

/// Logout: clears the session.
async fn logout(
    State(state): State<AppState>,
    session: Session,
) -> Result<axum::http::StatusCode, ApiError> {
    if let Some(data) = get_session_data(&session).await {
        state
            .audit
            .log_event(
                AuditEventType::UserLogout,
                &data.username,
                Some(data.organization_id),
                "User logged out",
                serde_json::json!({}),
                AuditResult::Success,
            )
            .await;
    }

    clear_session(&session)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

/// Returns the authenticated user.
async fn me(AuthenticatedUser(user): AuthenticatedUser) -> Json<UserResponse> {
    Json(user_to_response(&user))
}

/// Starts the SSO flow: returns the provider authorize URL and stores
/// the state parameter in the session.
async fn sso_authorize(
    State(state): State<AppState>,
    OptionalOrg(org_ctx): OptionalOrg,
    session: Session,
) -> Result<Json<SsoAuthorizeResponse>, ApiError> {
    let identity = state
        .identity
        .as_ref()
        .ok_or_else(|| ApiError::ServiceUnavailable("SSO is not configured".to_string()))?;

    let org_id = resolve_login_org(&state, org_ctx.map(|c| c.organization_id), None).await?;

    let sso_state = random_state();
    session
        .insert(
            SESSION_SSO_STATE_KEY,
            SsoState {
                state: sso_state.clone(),
                organization_id: org_id,
            },
        )
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let authorize_url = identity.authorize_url(&sso_state, &callback_url())?;

    Ok(Json(SsoAuthorizeResponse { authorize_url }))
}

/// Completes the SSO flow: validates state, exchanges the code,
/// resolves or provisions the user, and establishes a session.
async fn sso_callback(
    State(state): State<AppState>,
    session: Session,
    Query(query): Query<SsoCallbackQuery>,
) -> Result<Json<UserResponse>, ApiError> {
    let identity = state
        .identity
        .as_ref()
        .ok_or_else(|| ApiError::ServiceUnavailable("SSO is not configured".to_string()))?;

    let stored: SsoState = session
        .remove(SESSION_SSO_STATE_KEY)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::BadRequest("No SSO flow in progress".to_string()))?;

    if stored.state != query.state {
        warn!("SSO state mismatch");
        return Err(ApiError::Unauthorized("SSO state mismatch".to_string()));
    }

    let tokens = identity.exchange_code(&query.code, &callback_url()).await?;
    let profile = identity.fetch_profile(&tokens.access_token).await?;

    let user_repo = create_user_repository(&state.db);

    // Match by identity-provider subject, then by email, else provision
    let user = match user_repo.get_by_external_subject(&profile.subject).await? {
        Some(user) => user,
        None => match user_repo
            .get_by_email(stored.organization_id, &profile.email)
            .await?
        {
            Some(mut existing) => {
                // Link the subject so future logins match directly
                user_repo
                    .set_external_subject(existing.id, &profile.subject)
                    .await?;
                existing.external_subject = Some(profile.subject.clone());
                existing
            }
            None => {
                let username = profile
                    .email
                    .split('@')
                    .next()
                    .unwrap_or(&profile.email)
                    .to_string();
                let mut user = User::new(
                    stored.organization_id,
                    profile.email.clone(),
                    username,
                    String::new(),
                    Role::Member,
                );
                user.display_name = profile.display_name.clone();
                user.external_subject = Some(profile.subject.clone());
                user_repo.create(&user).await?
            }
        },
    };

    if !user.enabled {
        record_login(false, "sso");
        return Err(ApiError::AccountDisabled);
    }

    set_session_data(&session, SessionData::for_user(&user))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    user_repo.update_last_login(user.id).await?;

    record_login(true, "sso");
    state
        .audit
        .log_event(
            AuditEventType::SsoLogin,
            &user.username,
            Some(user.organization_id),
            "SSO login completed",
            serde_json::json!({ "subject": profile.subject }),
            AuditResult::Success,
        )
        .await;

    Ok(Json(user_to_response(&user)))
}

// ============================================================================
// Helpers
// ============================================================================

async fn resolve_login_org(
    state: &AppState,
    header_org: Option<Uuid>,
    slug: Option<&str>,
) -> Result<Uuid, ApiError> {
    if let Some(org_id) = header_org {
        return Ok(org_id);
    }

    let org_repo = create_organization_repository(&state.db);
    let slug = slug.unwrap_or("default");
    let org = org_repo
        .get_by_slug(slug)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Organization '{}' not found", slug)))?;

    if !org.is_operational() {
        return Err(ApiError::Forbidden(format!("Organization is {}", org.status)));
    }

    Ok(org.id)
}

fn user_to_response(user: &User) -> UserResponse {
    let mut capabilities: Vec<String> = user
        .role
        .capabilities()
        .iter()
        .map(|c| c.as_str().to_string())
        .collect();
    capabilities.sort();

    UserResponse {
        id: user.id,
        organization_id: user.organization_id,
        email: user.email.clone(),
        username: user.username.clone(),
        role: user.role.to_string(),
        display_name: user.display_name.clone(),
        capabilities,
    }
}

fn callback_url() -> String {
    std::env::var("KEEL_SSO_REDIRECT_URI")
        .unwrap_or_else(|_| "http://localhost:8080/api/auth/sso/callback".to_string())
}

fn random_state() -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    (0..32)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_state_is_unique_and_long() {
        let a = random_state();
        let b = random_state();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn test_user_to_response_capabilities() {
        let user = User::new(Uuid::new_v4(), "a@b.c", "alice", "h", Role::Member);
        let response = user_to_response(&user);
        assert_eq!(response.role, "member");
        assert!(response
            .capabilities
            .contains(&"docs:acknowledge".to_string()));
        assert!(!response.capabilities.contains(&"org:admin".to_string()));
    }
}
