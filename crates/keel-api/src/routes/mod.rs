//! API routes.

pub mod api_keys;
pub mod assets;
pub mod auth;
pub mod documents;
pub mod health;
pub mod metrics;
pub mod people;
pub mod security;
pub mod teams;
pub mod users;
pub mod workflows;

use crate::middleware::resolve_organization;
use crate::state::AppState;
use axum::{middleware, Router};

/// Creates the main API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Versioned API endpoint
        .nest("/api/v1", api_routes(state.clone()))
        // Unversioned alias
        .nest("/api", api_routes(state.clone()))
        .merge(health::routes())
        .merge(metrics::prometheus_routes())
        .with_state(state)
}

/// API routes under the /api prefix.
fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .nest("/auth", auth::routes())
        .nest("/admin/users", users::routes())
        .nest("/api-keys", api_keys::routes())
        .nest("/people", people::routes())
        .nest("/teams", teams::routes())
        .nest("/assets", assets::routes())
        .nest("/security", security::routes())
        .nest("/documents", documents::document_routes())
        .nest("/rollouts", documents::rollout_routes())
        .nest("/workflows", workflows::routes())
        .nest("/metrics", metrics::json_routes())
        .layer(middleware::from_fn_with_state(state, resolve_organization))
}
