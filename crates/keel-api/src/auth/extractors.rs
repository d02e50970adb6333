//! Axum extractors for authentication and authorization.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use tower_sessions::Session;
use tracing::{debug, warn};

use keel_core::db::{create_api_key_repository, create_user_repository, DbPool};
use keel_core::tenant::OrgContext;
use keel_core::{ApiKey, Capability, Role, User};

use crate::error::ApiError;
use crate::state::AppState;

use super::get_session_data;

/// Extractor for authenticated users.
///
/// Resolution order:
/// 1. A valid session with user data
/// 2. A `Bearer kl_…` API key in the Authorization header
///
/// Rejects with 401 when neither is present, 403 when the resolved
/// user does not belong to the requested organization.
pub struct AuthenticatedUser(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        // In tests, an injected user short-circuits authentication
        #[cfg(test)]
        {
            if let Some(test_user) = parts.extensions.get::<crate::test_helpers::TestUser>() {
                return Ok(AuthenticatedUser(test_user.0.clone()));
            }
        }

        let app_state = AppState::from_ref(state);
        let requested_org_id = parts
            .extensions
            .get::<OrgContext>()
            .map(|ctx| ctx.organization_id);

        // Session auth first
        if let Ok(session) = Session::from_request_parts(parts, state).await {
            if let Some(session_data) = get_session_data(&session).await {
                let user_repo = create_user_repository(&app_state.db);
                if let Ok(Some(user)) = user_repo.get(session_data.user_id).await {
                    if !user.enabled {
                        return Err(ApiError::AccountDisabled);
                    }
                    enforce_org_membership(requested_org_id, &user)?;
                    return Ok(AuthenticatedUser(user));
                }
            }
        }

        // API key auth
        if let Some(auth_header) = parts.headers.get(AUTHORIZATION) {
            if let Ok(auth_str) = auth_header.to_str() {
                if let Some(token) = auth_str.strip_prefix("Bearer ") {
                    if let Some(validated) = validate_api_key(&app_state.db, token).await? {
                        if !validated.user.enabled {
                            return Err(ApiError::AccountDisabled);
                        }
                        enforce_org_membership(requested_org_id, &validated.user)?;
                        // Keep the key around for capability-scope checks
                        parts.extensions.insert(validated.api_key.clone());
                        return Ok(AuthenticatedUser(validated.user));
                    }
                }
            }
        }

        Err(ApiError::Unauthorized(
            "Authentication required".to_string(),
        ))
    }
}

/// Extractor for optional authentication; never fails.
pub struct OptionalUser(pub Option<User>);

#[async_trait]
impl<S> FromRequestParts<S> for OptionalUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match AuthenticatedUser::from_request_parts(parts, state).await {
            Ok(AuthenticatedUser(user)) => Ok(OptionalUser(Some(user))),
            Err(_) => Ok(OptionalUser(None)),
        }
    }
}

fn enforce_org_membership(
    requested_org_id: Option<uuid::Uuid>,
    user: &User,
) -> Result<(), ApiError> {
    if let Some(org_id) = requested_org_id {
        if user.organization_id != org_id {
            warn!(
                user_id = %user.id,
                user_org_id = %user.organization_id,
                requested_org_id = %org_id,
                "Authenticated user does not belong to requested organization"
            );
            return Err(ApiError::Forbidden(
                "Organization access denied".to_string(),
            ));
        }
    }

    Ok(())
}

/// Extractor that requires admin role.
pub struct RequireAdmin(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for RequireAdmin
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthenticatedUser(user) = AuthenticatedUser::from_request_parts(parts, state).await?;

        if !user.has_role(Role::Admin) {
            return Err(ApiError::Forbidden("Admin access required".to_string()));
        }

        Ok(RequireAdmin(user))
    }
}

/// Extractor that requires at least manager role.
pub struct RequireManager(pub User);

#[async_trait]
impl<S> FromRequestParts<S> for RequireManager
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthenticatedUser(user) = AuthenticatedUser::from_request_parts(parts, state).await?;

        if !user.has_role(Role::Manager) {
            return Err(ApiError::Forbidden("Manager access required".to_string()));
        }

        Ok(RequireManager(user))
    }
}

/// Result of API key validation: the key and its owning user.
pub struct ValidatedApiKey {
    pub api_key: ApiKey,
    pub user: User,
}

/// Validates an API key and loads the owning user.
///
/// Keys have the format `kl_<prefix>_<secret>`; lookup is by prefix,
/// verification by SHA-256 hash of the full key.
async fn validate_api_key(db: &DbPool, token: &str) -> Result<Option<ValidatedApiKey>, ApiError> {
    if !token.starts_with("kl_") {
        debug!("API key rejected: doesn't start with 'kl_'");
        return Ok(None);
    }

    let parts: Vec<&str> = token.splitn(3, '_').collect();
    if parts.len() != 3 {
        debug!("API key rejected: invalid format (expected kl_<prefix>_<secret>)");
        return Ok(None);
    }

    let key_prefix = format!("kl_{}", parts[1]);

    let api_key_repo = create_api_key_repository(db);
    let api_key = match api_key_repo.get_by_prefix(&key_prefix).await {
        Ok(Some(key)) => key,
        Ok(None) => {
            debug!(prefix = %key_prefix, "API key not found");
            return Ok(None);
        }
        Err(e) => {
            warn!(error = %e, "Database error looking up API key");
            return Err(ApiError::Internal("Database error".to_string()));
        }
    };

    if !api_key.verify(token) {
        warn!(prefix = %key_prefix, "API key hash verification failed");
        return Ok(None);
    }

    if api_key.is_expired() {
        debug!(prefix = %key_prefix, "API key has expired");
        return Err(ApiError::Unauthorized("API key has expired".to_string()));
    }

    let user_repo = create_user_repository(db);
    let user = match user_repo.get(api_key.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            warn!(user_id = %api_key.user_id, "API key owner not found");
            return Err(ApiError::Unauthorized(
                "API key owner not found".to_string(),
            ));
        }
        Err(e) => {
            warn!(error = %e, "Database error loading API key owner");
            return Err(ApiError::Internal("Database error".to_string()));
        }
    };

    // Stamp last_used_at without blocking the request
    let api_key_id = api_key.id;
    let db_clone = db.clone();
    tokio::spawn(async move {
        let repo = create_api_key_repository(&db_clone);
        if let Err(e) = repo.update_last_used(api_key_id).await {
            warn!(error = %e, "Failed to update API key last_used_at");
        }
    });

    Ok(Some(ValidatedApiKey { api_key, user }))
}

/// Checks whether the current auth context grants a capability.
///
/// For API-key auth the key's scopes gate the capability; for sessions
/// the role's capability set applies.
fn check_capability(parts: &Parts, user: &User, capability: Capability) -> Result<(), ApiError> {
    if let Some(api_key) = parts.extensions.get::<ApiKey>() {
        if !api_key.has_scope(capability.as_str()) {
            warn!(
                capability = %capability,
                key_prefix = %api_key.key_prefix,
                "API key missing required capability"
            );
            return Err(ApiError::Forbidden(format!(
                "API key does not grant capability: {}",
                capability
            )));
        }
        // The key cannot exceed its owner's role
    }

    if !user.has_capability(capability) {
        warn!(
            capability = %capability,
            role = %user.role,
            "User role does not grant required capability"
        );
        return Err(ApiError::Forbidden(format!(
            "Missing capability: {}",
            capability
        )));
    }

    Ok(())
}

/// Generates capability-specific extractors.
macro_rules! define_capability_extractor {
    ($name:ident, $capability:expr, $doc:literal) => {
        #[doc = $doc]
        pub struct $name(pub User);

        #[async_trait]
        impl<S> FromRequestParts<S> for $name
        where
            AppState: FromRef<S>,
            S: Send + Sync,
        {
            type Rejection = ApiError;

            async fn from_request_parts(
                parts: &mut Parts,
                state: &S,
            ) -> Result<Self, Self::Rejection> {
                let AuthenticatedUser(user) =
                    AuthenticatedUser::from_request_parts(parts, state).await?;
                check_capability(parts, &user, $capability)?;
                Ok($name(user))
            }
        }
    };
}

define_capability_extractor!(
    RequirePeopleRead,
    Capability::PeopleRead,
    "Extractor requiring the `people:read` capability."
);
define_capability_extractor!(
    RequirePeopleWrite,
    Capability::PeopleWrite,
    "Extractor requiring the `people:write` capability."
);
define_capability_extractor!(
    RequireAssetsRead,
    Capability::AssetsRead,
    "Extractor requiring the `assets:read` capability."
);
define_capability_extractor!(
    RequireAssetsWrite,
    Capability::AssetsWrite,
    "Extractor requiring the `assets:write` capability."
);
define_capability_extractor!(
    RequireSecurityRead,
    Capability::SecurityRead,
    "Extractor requiring the `security:read` capability."
);
define_capability_extractor!(
    RequireSecurityWrite,
    Capability::SecurityWrite,
    "Extractor requiring the `security:write` capability."
);
define_capability_extractor!(
    RequireDocsRead,
    Capability::DocsRead,
    "Extractor requiring the `docs:read` capability."
);
define_capability_extractor!(
    RequireDocsWrite,
    Capability::DocsWrite,
    "Extractor requiring the `docs:write` capability."
);
define_capability_extractor!(
    RequireDocsAcknowledge,
    Capability::DocsAcknowledge,
    "Extractor requiring the `docs:acknowledge` capability."
);
define_capability_extractor!(
    RequireWorkflowsRead,
    Capability::WorkflowsRead,
    "Extractor requiring the `workflows:read` capability."
);
define_capability_extractor!(
    RequireWorkflowsWrite,
    Capability::WorkflowsWrite,
    "Extractor requiring the `workflows:write` capability."
);
