//! Authentication and authorization for the API.
//!
//! - Session-based authentication for browsers (tower-sessions)
//! - `Bearer kl_…` API keys for programmatic access
//! - Capability extractors gating each route

pub mod extractors;

pub use extractors::{
    AuthenticatedUser, OptionalUser, RequireAdmin, RequireAssetsRead, RequireAssetsWrite,
    RequireDocsAcknowledge, RequireDocsRead, RequireDocsWrite, RequireManager, RequirePeopleRead,
    RequirePeopleWrite, RequireSecurityRead, RequireSecurityWrite, RequireWorkflowsRead,
    RequireWorkflowsWrite,
};

use keel_core::SessionData;
use tower_sessions::Session;

/// Session key for storing user data.
pub const SESSION_USER_KEY: &str = "user";

/// Session key for the in-flight SSO state parameter.
pub const SESSION_SSO_STATE_KEY: &str = "sso_state";

/// Gets the session data from the session.
pub async fn get_session_data(session: &Session) -> Option<SessionData> {
    session
        .get::<SessionData>(SESSION_USER_KEY)
        .await
        .ok()
        .flatten()
}

/// Stores session data in the session.
pub async fn set_session_data(
    session: &Session,
    data: SessionData,
) -> Result<(), tower_sessions::session::Error> {
    session.insert(SESSION_USER_KEY, data).await
}

/// Clears the session (logout).
pub async fn clear_session(session: &Session) -> Result<(), tower_sessions::session::Error> {
    session.flush().await
}
