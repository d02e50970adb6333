//! Azure AD identity provider (OAuth2 authorization-code flow).
//!
//! Drives browser single sign-on: builds the tenant authorize URL,
//! exchanges the returned code for tokens, and resolves the signed-in
//! user's profile from Microsoft Graph `/me`.

use crate::http::HttpClient;
use crate::secure_string::SecureString;
use crate::traits::{
    AuthConfig, Connector, ConnectorConfig, ConnectorError, ConnectorHealth, ConnectorResult,
    DirectoryUser, IdentityProvider, TokenSet,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use url::Url;

/// Scopes requested during interactive sign-in.
const SIGN_IN_SCOPES: &str = "openid profile email User.Read";

/// Azure AD provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureAdConfig {
    /// Azure AD tenant id (GUID or domain).
    pub tenant_id: String,
    /// App registration client id.
    pub client_id: String,
    /// App registration client secret.
    pub client_secret: SecureString,
    /// Login authority base, overridable for tests.
    #[serde(default = "default_authority")]
    pub authority: String,
    /// Graph base URL for profile lookup, overridable for tests.
    #[serde(default = "default_graph_url")]
    pub graph_url: String,
}

fn default_authority() -> String {
    "https://login.microsoftonline.com".to_string()
}

fn default_graph_url() -> String {
    "https://graph.microsoft.com/v1.0".to_string()
}

/// Azure AD single-sign-on provider.
pub struct AzureAdProvider {
    config: AzureAdConfig,
    client: HttpClient,
}

impl AzureAdProvider {
    /// Creates a provider for the given tenant and app registration.
    pub fn new(config: AzureAdConfig) -> ConnectorResult<Self> {
        let connector_config = ConnectorConfig::new(
            "azure-ad",
            config.graph_url.clone(),
            // Graph calls carry the user's token explicitly; the shared
            // client itself is unauthenticated.
            AuthConfig::None,
        );
        let client = HttpClient::new(connector_config)?;
        info!(tenant_id = %config.tenant_id, "Azure AD provider initialized");
        Ok(Self { config, client })
    }

    fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.config.authority.trim_end_matches('/'),
            self.config.tenant_id
        )
    }
}

#[async_trait]
impl Connector for AzureAdProvider {
    fn name(&self) -> &str {
        "azure-ad"
    }

    fn connector_type(&self) -> &str {
        "identity"
    }

    async fn health_check(&self) -> ConnectorResult<ConnectorHealth> {
        // The discovery document is unauthenticated and cheap
        let url = format!(
            "{}/{}/v2.0/.well-known/openid-configuration",
            self.config.authority.trim_end_matches('/'),
            self.config.tenant_id
        );
        match self.client.get(&url).await {
            Ok(r) if r.status().is_success() => Ok(ConnectorHealth::Healthy),
            Ok(r) => Ok(ConnectorHealth::Degraded(format!(
                "Unexpected response: {}",
                r.status()
            ))),
            Err(ConnectorError::ConnectionFailed(e)) => Ok(ConnectorHealth::Unhealthy(format!(
                "Connection failed: {}",
                e
            ))),
            Err(e) => Ok(ConnectorHealth::Unhealthy(e.to_string())),
        }
    }

    async fn test_connection(&self) -> ConnectorResult<bool> {
        Ok(matches!(
            self.health_check().await?,
            ConnectorHealth::Healthy
        ))
    }
}

#[async_trait]
impl IdentityProvider for AzureAdProvider {
    fn authorize_url(&self, state: &str, redirect_uri: &str) -> ConnectorResult<String> {
        let base = format!(
            "{}/{}/oauth2/v2.0/authorize",
            self.config.authority.trim_end_matches('/'),
            self.config.tenant_id
        );
        let mut url =
            Url::parse(&base).map_err(|e| ConnectorError::ConfigError(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_mode", "query")
            .append_pair("scope", SIGN_IN_SCOPES)
            .append_pair("state", state);
        Ok(url.to_string())
    }

    #[instrument(skip(self, code))]
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> ConnectorResult<TokenSet> {
        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", &self.config.client_id),
            ("client_secret", self.config.client_secret.expose_secret()),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("scope", SIGN_IN_SCOPES),
        ];

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: u64,
        }

        let response: TokenResponse = self
            .client
            .post_form_unauthenticated(&self.token_url(), &params)
            .await?;

        Ok(TokenSet {
            access_token: SecureString::new(response.access_token),
            expires_in: response.expires_in,
        })
    }

    async fn fetch_profile(&self, access_token: &SecureString) -> ConnectorResult<DirectoryUser> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct GraphMe {
            id: String,
            display_name: Option<String>,
            mail: Option<String>,
            user_principal_name: Option<String>,
        }

        // The user's bearer token is per-request; it cannot go through
        // the shared client's static auth config.
        let url = format!("{}/me", self.config.graph_url.trim_end_matches('/'));
        let raw = reqwest::Client::new()
            .get(&url)
            .bearer_auth(access_token.expose_secret())
            .send()
            .await
            .map_err(|e| ConnectorError::RequestFailed(e.to_string()))?;
        if !raw.status().is_success() {
            return Err(ConnectorError::AuthenticationFailed(format!(
                "profile fetch failed: {}",
                raw.status()
            )));
        }
        let profile: GraphMe = raw
            .json()
            .await
            .map_err(|e| ConnectorError::InvalidResponse(e.to_string()))?;

        let email = profile
            .mail
            .or(profile.user_principal_name)
            .map(|s| s.to_lowercase())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ConnectorError::InvalidResponse("directory profile has no email".to_string())
            })?;

        Ok(DirectoryUser {
            subject: profile.id,
            email,
            display_name: profile.display_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> AzureAdProvider {
        AzureAdProvider::new(AzureAdConfig {
            tenant_id: "contoso.example".to_string(),
            client_id: "client-123".to_string(),
            client_secret: SecureString::from("secret"),
            authority: default_authority(),
            graph_url: default_graph_url(),
        })
        .unwrap()
    }

    #[test]
    fn test_authorize_url_contains_required_params() {
        let url = provider()
            .authorize_url("state-abc", "https://keel.example/api/auth/sso/callback")
            .unwrap();
        let parsed = Url::parse(&url).unwrap();

        assert!(url.starts_with(
            "https://login.microsoftonline.com/contoso.example/oauth2/v2.0/authorize"
        ));
        let pairs: std::collections::HashMap<_, _> = parsed.query_pairs().collect();
        assert_eq!(pairs["client_id"], "client-123");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["state"], "state-abc");
        assert_eq!(
            pairs["redirect_uri"],
            "https://keel.example/api/auth/sso/callback"
        );
    }

    #[test]
    fn test_token_url_uses_tenant() {
        assert_eq!(
            provider().token_url(),
            "https://login.microsoftonline.com/contoso.example/oauth2/v2.0/token"
        );
    }
}
