//! In-memory identity provider for tests.

use crate::secure_string::SecureString;
use crate::traits::{
    Connector, ConnectorError, ConnectorHealth, ConnectorResult, DirectoryUser, IdentityProvider,
    TokenSet,
};
use async_trait::async_trait;

/// Mock identity provider that accepts a single known code.
pub struct MockIdentityProvider {
    /// The authorization code this mock accepts.
    pub valid_code: String,
    /// The user returned for a successful exchange.
    pub user: DirectoryUser,
}

impl MockIdentityProvider {
    /// Creates a mock accepting `valid_code` and resolving to `user`.
    pub fn new(valid_code: impl Into<String>, user: DirectoryUser) -> Self {
        Self {
            valid_code: valid_code.into(),
            user,
        }
    }

    /// Convenience mock for a default test user.
    pub fn with_test_user() -> Self {
        Self::new(
            "good-code",
            DirectoryUser {
                subject: "sub-0001".to_string(),
                email: "sso.user@example.com".to_string(),
                display_name: Some("SSO User".to_string()),
            },
        )
    }
}

#[async_trait]
impl Connector for MockIdentityProvider {
    fn name(&self) -> &str {
        "mock-identity"
    }

    fn connector_type(&self) -> &str {
        "identity"
    }

    async fn health_check(&self) -> ConnectorResult<ConnectorHealth> {
        Ok(ConnectorHealth::Healthy)
    }

    async fn test_connection(&self) -> ConnectorResult<bool> {
        Ok(true)
    }
}

#[async_trait]
impl IdentityProvider for MockIdentityProvider {
    fn authorize_url(&self, state: &str, redirect_uri: &str) -> ConnectorResult<String> {
        Ok(format!(
            "https://mock.identity.example/authorize?state={}&redirect_uri={}",
            state, redirect_uri
        ))
    }

    async fn exchange_code(&self, code: &str, _redirect_uri: &str) -> ConnectorResult<TokenSet> {
        if code != self.valid_code {
            return Err(ConnectorError::AuthenticationFailed(
                "invalid authorization code".to_string(),
            ));
        }
        Ok(TokenSet {
            access_token: SecureString::from("mock-access-token"),
            expires_in: 3600,
        })
    }

    async fn fetch_profile(&self, access_token: &SecureString) -> ConnectorResult<DirectoryUser> {
        if access_token.expose_secret() != "mock-access-token" {
            return Err(ConnectorError::AuthenticationFailed(
                "invalid access token".to_string(),
            ));
        }
        Ok(self.user.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exchange_accepts_valid_code() {
        let mock = MockIdentityProvider::with_test_user();
        let tokens = mock.exchange_code("good-code", "http://cb").await.unwrap();
        let profile = mock.fetch_profile(&tokens.access_token).await.unwrap();
        assert_eq!(profile.email, "sso.user@example.com");
    }

    #[tokio::test]
    async fn test_exchange_rejects_bad_code() {
        let mock = MockIdentityProvider::with_test_user();
        assert!(mock.exchange_code("bad-code", "http://cb").await.is_err());
    }
}
