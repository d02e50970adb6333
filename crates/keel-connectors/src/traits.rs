//! Connector trait definitions for Keel.
//!
//! External systems are reached through a small set of traits so that
//! the rest of the workspace can be tested against mocks: MDM device
//! inventories (Intune via Microsoft Graph) and identity providers
//! (Azure AD for single sign-on).

use crate::secure_string::SecureString;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur in connectors.
#[derive(Error, Debug, Clone)]
pub enum ConnectorError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Rate limited: retry after {0} seconds")]
    RateLimited(u64),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Health status of a connector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorHealth {
    /// Connector is healthy and operational.
    Healthy,
    /// Connector is degraded but still functional.
    Degraded(String),
    /// Connector is unhealthy and not operational.
    Unhealthy(String),
    /// Health status is unknown.
    Unknown,
}

/// Configuration for a connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Connector name/identifier.
    pub name: String,
    /// Base URL for the API.
    pub base_url: String,
    /// Authentication configuration.
    pub auth: AuthConfig,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Maximum retries for transient failures.
    pub max_retries: u32,
    /// Whether to verify TLS certificates.
    pub verify_tls: bool,
    /// Additional headers to include.
    pub headers: HashMap<String, String>,
}

impl ConnectorConfig {
    /// Creates a configuration with sensible defaults for the given
    /// name and base URL.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, auth: AuthConfig) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            auth,
            timeout_secs: 30,
            max_retries: 3,
            verify_tls: true,
            headers: HashMap::new(),
        }
    }
}

/// Authentication configuration.
///
/// Credential fields use [`SecureString`] so secrets are zeroized when
/// no longer needed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    /// No authentication.
    None,
    /// API key sent in a header.
    ApiKey {
        key: SecureString,
        header_name: String,
    },
    /// Static bearer token.
    BearerToken { token: SecureString },
    /// HTTP basic authentication.
    Basic {
        username: String,
        password: SecureString,
    },
    /// OAuth2 client credentials grant.
    OAuth2 {
        client_id: String,
        client_secret: SecureString,
        token_url: String,
        scopes: Vec<String>,
    },
}

/// Base trait for all connectors.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Returns the connector name.
    fn name(&self) -> &str;

    /// Returns the connector type (e.g., "mdm", "identity").
    fn connector_type(&self) -> &str;

    /// Checks the health of the connector.
    async fn health_check(&self) -> ConnectorResult<ConnectorHealth>;

    /// Tests the connection to the external system.
    async fn test_connection(&self) -> ConnectorResult<bool>;
}

// ============================================================================
// MDM (managed device inventory)
// ============================================================================

/// Compliance state reported by the MDM for a managed device.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceState {
    Compliant,
    Noncompliant,
    InGracePeriod,
    Unknown,
}

impl ComplianceState {
    /// Parses the Graph API `complianceState` string.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "compliant" => ComplianceState::Compliant,
            "noncompliant" => ComplianceState::Noncompliant,
            "ingraceperiod" | "in_grace_period" => ComplianceState::InGracePeriod,
            _ => ComplianceState::Unknown,
        }
    }

    /// Returns the state as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplianceState::Compliant => "compliant",
            ComplianceState::Noncompliant => "noncompliant",
            ComplianceState::InGracePeriod => "in_grace_period",
            ComplianceState::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ComplianceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A device record as reported by the MDM, normalized from the remote
/// API's representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedDevice {
    /// The MDM's identifier for the device.
    pub device_id: String,
    /// Device display name.
    pub name: String,
    /// Hardware serial number, when reported.
    pub serial_number: Option<String>,
    /// Hardware manufacturer.
    pub manufacturer: Option<String>,
    /// Hardware model.
    pub model: Option<String>,
    /// Operating system name (e.g., "Windows", "macOS", "iOS").
    pub operating_system: Option<String>,
    /// Compliance state reported by the MDM.
    pub compliance_state: ComplianceState,
    /// Email of the device's primary user, when known.
    pub primary_user_email: Option<String>,
    /// When the device last checked in with the MDM.
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// Connector for mobile device management inventories.
#[async_trait]
pub trait MdmConnector: Connector {
    /// Fetches the full managed-device list, following pagination until
    /// exhausted.
    async fn list_devices(&self) -> ConnectorResult<Vec<ManagedDevice>>;

    /// Fetches a single device by its MDM identifier.
    async fn get_device(&self, device_id: &str) -> ConnectorResult<ManagedDevice>;
}

// ============================================================================
// Identity provider (SSO)
// ============================================================================

/// Tokens returned by an authorization-code exchange.
#[derive(Debug, Clone)]
pub struct TokenSet {
    /// OAuth2 access token (zeroized on drop).
    pub access_token: SecureString,
    /// Seconds until the access token expires.
    pub expires_in: u64,
}

/// A user profile resolved from the identity provider's directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryUser {
    /// Stable subject identifier (Azure AD object id).
    pub subject: String,
    /// Primary email address.
    pub email: String,
    /// Display name.
    pub display_name: Option<String>,
}

/// Connector for OAuth2 authorization-code single sign-on.
#[async_trait]
pub trait IdentityProvider: Connector {
    /// Builds the provider's authorization URL for the given state and
    /// redirect URI.
    fn authorize_url(&self, state: &str, redirect_uri: &str) -> ConnectorResult<String>;

    /// Exchanges an authorization code for tokens.
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> ConnectorResult<TokenSet>;

    /// Fetches the signed-in user's directory profile.
    async fn fetch_profile(&self, access_token: &SecureString) -> ConnectorResult<DirectoryUser>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compliance_state_parse() {
        assert_eq!(ComplianceState::parse("compliant"), ComplianceState::Compliant);
        assert_eq!(ComplianceState::parse("Compliant"), ComplianceState::Compliant);
        assert_eq!(
            ComplianceState::parse("noncompliant"),
            ComplianceState::Noncompliant
        );
        assert_eq!(
            ComplianceState::parse("inGracePeriod"),
            ComplianceState::InGracePeriod
        );
        assert_eq!(ComplianceState::parse("configManager"), ComplianceState::Unknown);
    }

    #[test]
    fn test_compliance_state_serialization() {
        let json = serde_json::to_string(&ComplianceState::InGracePeriod).unwrap();
        assert_eq!(json, "\"in_grace_period\"");
    }

    #[test]
    fn test_connector_config_defaults() {
        let config = ConnectorConfig::new("intune", "https://graph.microsoft.com", AuthConfig::None);
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.max_retries, 3);
        assert!(config.verify_tls);
        assert!(config.headers.is_empty());
    }

    #[test]
    fn test_auth_config_serde_tag() {
        let auth = AuthConfig::ApiKey {
            key: SecureString::from("k"),
            header_name: "X-Api-Key".to_string(),
        };
        let json = serde_json::to_value(&auth).unwrap();
        assert_eq!(json["type"], "api_key");
    }
}
