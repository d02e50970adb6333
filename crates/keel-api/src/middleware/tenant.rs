//! Organization resolution middleware.
//!
//! Requests may carry an `X-Org-Id` header; when present, the
//! organization is loaded, checked for operational status, and an
//! [`OrgContext`] is inserted into request extensions. Authentication
//! extractors then enforce that the caller belongs to that
//! organization.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use keel_core::db::create_organization_repository;
use keel_core::tenant::OrgContext;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the organization id.
pub const ORG_ID_HEADER: &str = "X-Org-Id";

/// Middleware resolving the organization from the `X-Org-Id` header.
///
/// A missing header is fine (the caller's own organization applies); a
/// present but invalid header is a hard error.
pub async fn resolve_organization(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(ORG_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    if let Some(raw) = header {
        let org_id = Uuid::parse_str(&raw).map_err(|_| {
            ApiError::BadRequest(format!("Invalid {} header: {}", ORG_ID_HEADER, raw))
        })?;

        let org_repo = create_organization_repository(&state.db);
        let org = org_repo
            .get(org_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Organization {} not found", org_id)))?;

        if !org.is_operational() {
            warn!(
                organization_id = %org.id,
                status = %org.status,
                "Request for non-operational organization rejected"
            );
            return Err(ApiError::Forbidden(format!(
                "Organization is {}",
                org.status
            )));
        }

        debug!(organization_id = %org.id, slug = %org.slug, "Organization resolved");
        request
            .extensions_mut()
            .insert(OrgContext::from_organization(&org));
    }

    Ok(next.run(request).await)
}

/// Extractor for the resolved organization context, if any.
pub struct OptionalOrg(pub Option<OrgContext>);

#[async_trait]
impl<S> FromRequestParts<S> for OptionalOrg
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalOrg(parts.extensions.get::<OrgContext>().cloned()))
    }
}

/// Extractor that requires a resolved organization context.
pub struct RequireOrg(pub OrgContext);

#[async_trait]
impl<S> FromRequestParts<S> for RequireOrg
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<OrgContext>()
            .cloned()
            .map(RequireOrg)
            .ok_or_else(|| {
                ApiError::BadRequest(format!("Missing {} header", ORG_ID_HEADER))
            })
    }
}
