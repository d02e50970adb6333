//! Helpers for route tests: an in-memory app with an injected user.

use axum::Router;
use keel_core::db::{create_organization_repository, create_pool, run_migrations, DbPool};
use keel_core::tenant::Organization;
use keel_core::{Role, User};
use tower::ServiceExt;

use crate::state::AppState;

/// Test-only authenticated user injected into request extensions.
#[derive(Clone)]
pub struct TestUser(pub User);

/// An app wired to an in-memory SQLite database.
pub struct TestApp {
    pub state: AppState,
    pub org: Organization,
}

impl TestApp {
    /// Creates a migrated in-memory app with one organization.
    pub async fn new() -> Self {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();

        let org = Organization::new("test-org", "Test Org").unwrap();
        create_organization_repository(&pool)
            .create(&org)
            .await
            .unwrap();

        Self {
            state: AppState::new(pool),
            org,
        }
    }

    /// The underlying pool.
    pub fn db(&self) -> &DbPool {
        &self.state.db
    }

    /// Creates a user of the given role in the test org. The user is
    /// not persisted; authentication is injected. Handlers that
    /// re-load the user need `persist_user`.
    pub fn user(&self, role: Role) -> User {
        User::new(
            self.org.id,
            format!("{}@test.example", role.as_str()),
            role.as_str(),
            "hash",
            role,
        )
    }

    /// Persists a user.
    pub async fn persist_user(&self, user: &User) {
        keel_core::db::create_user_repository(self.db())
            .create(user)
            .await
            .unwrap();
    }

    /// Builds the router and sends a request with the given user
    /// injected.
    pub async fn request_as(
        &self,
        user: &User,
        mut request: axum::http::Request<axum::body::Body>,
    ) -> axum::http::Response<axum::body::Body> {
        request.extensions_mut().insert(TestUser(user.clone()));
        self.router().oneshot(request).await.unwrap()
    }

    fn router(&self) -> Router {
        crate::routes::create_router(self.state.clone())
    }
}
