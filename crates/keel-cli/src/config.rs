//! CLI configuration from environment variables.

use keel_connectors::SecureString;
use std::net::SocketAddr;

/// Configuration for the `keel` binary.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Database URL (`sqlite:` or `postgres://`).
    pub database_url: String,
    /// Server bind address.
    pub bind_address: SocketAddr,
    /// Enable Swagger UI.
    pub enable_swagger: bool,
    /// Intune connector configuration, when set.
    pub intune: Option<IntuneEnv>,
    /// Azure AD SSO configuration, when set.
    pub azure_ad: Option<AzureAdEnv>,
}

/// Intune credentials from the environment.
#[derive(Debug, Clone)]
pub struct IntuneEnv {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: SecureString,
}

/// Azure AD SSO credentials from the environment.
#[derive(Debug, Clone)]
pub struct AzureAdEnv {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: SecureString,
}

impl CliConfig {
    /// Loads configuration from the environment.
    ///
    /// - `DATABASE_URL` (default `sqlite:keel.db?mode=rwc`)
    /// - `KEEL_BIND_ADDR` (default `0.0.0.0:8080`)
    /// - `KEEL_ENABLE_SWAGGER` (default true)
    /// - `KEEL_INTUNE_TENANT_ID` / `KEEL_INTUNE_CLIENT_ID` /
    ///   `KEEL_INTUNE_CLIENT_SECRET` enable device sync
    /// - `KEEL_AAD_TENANT_ID` / `KEEL_AAD_CLIENT_ID` /
    ///   `KEEL_AAD_CLIENT_SECRET` enable SSO
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:keel.db?mode=rwc".to_string());

        let bind_address: SocketAddr = std::env::var("KEEL_BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid KEEL_BIND_ADDR: {}", e))?;

        let enable_swagger = std::env::var("KEEL_ENABLE_SWAGGER")
            .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
            .unwrap_or(true);

        let intune = match (
            std::env::var("KEEL_INTUNE_TENANT_ID"),
            std::env::var("KEEL_INTUNE_CLIENT_ID"),
            std::env::var("KEEL_INTUNE_CLIENT_SECRET"),
        ) {
            (Ok(tenant_id), Ok(client_id), Ok(secret)) => Some(IntuneEnv {
                tenant_id,
                client_id,
                client_secret: SecureString::new(secret),
            }),
            _ => None,
        };

        let azure_ad = match (
            std::env::var("KEEL_AAD_TENANT_ID"),
            std::env::var("KEEL_AAD_CLIENT_ID"),
            std::env::var("KEEL_AAD_CLIENT_SECRET"),
        ) {
            (Ok(tenant_id), Ok(client_id), Ok(secret)) => Some(AzureAdEnv {
                tenant_id,
                client_id,
                client_secret: SecureString::new(secret),
            }),
            _ => None,
        };

        Ok(Self {
            database_url,
            bind_address,
            enable_swagger,
            intune,
            azure_ad,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        std::env::remove_var("DATABASE_URL");
        std::env::remove_var("KEEL_BIND_ADDR");
        std::env::remove_var("KEEL_ENABLE_SWAGGER");

        let config = CliConfig::from_env().unwrap();
        assert!(config.database_url.starts_with("sqlite:"));
        assert_eq!(config.bind_address.port(), 8080);
        assert!(config.enable_swagger);
    }

    #[test]
    fn test_invalid_bind_addr() {
        std::env::set_var("KEEL_BIND_ADDR", "not-an-addr");
        assert!(CliConfig::from_env().is_err());
        std::env::remove_var("KEEL_BIND_ADDR");
    }
}
