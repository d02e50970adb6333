//! Microsoft Intune connector (Microsoft Graph).
//!
//! Authenticates with an OAuth2 client-credentials grant against the
//! Azure AD tenant and pages through
//! `/deviceManagement/managedDevices`, following `@odata.nextLink`
//! until the list is exhausted.

use crate::http::HttpClient;
use crate::secure_string::SecureString;
use crate::traits::{
    AuthConfig, ComplianceState, Connector, ConnectorConfig, ConnectorError, ConnectorHealth,
    ConnectorResult, ManagedDevice, MdmConnector,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

/// Default Microsoft Graph base URL.
pub const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Scope requested for app-only Graph access.
const GRAPH_DEFAULT_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Intune connector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntuneConfig {
    /// Azure AD tenant id (GUID or domain).
    pub tenant_id: String,
    /// App registration client id.
    pub client_id: String,
    /// App registration client secret.
    pub client_secret: SecureString,
    /// Graph base URL, overridable for tests.
    #[serde(default = "default_graph_base_url")]
    pub base_url: String,
    /// Page size for device listing.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_graph_base_url() -> String {
    GRAPH_BASE_URL.to_string()
}

fn default_page_size() -> u32 {
    100
}

/// Microsoft Intune managed-device connector.
pub struct IntuneConnector {
    config: IntuneConfig,
    client: HttpClient,
}

impl IntuneConnector {
    /// Creates a connector for the given tenant and app registration.
    pub fn new(config: IntuneConfig) -> ConnectorResult<Self> {
        let token_url = format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            config.tenant_id
        );
        let connector_config = ConnectorConfig::new(
            "intune",
            config.base_url.clone(),
            AuthConfig::OAuth2 {
                client_id: config.client_id.clone(),
                client_secret: config.client_secret.clone(),
                token_url,
                scopes: vec![GRAPH_DEFAULT_SCOPE.to_string()],
            },
        );
        let client = HttpClient::new(connector_config)?;
        info!(tenant_id = %config.tenant_id, "Intune connector initialized");
        Ok(Self { config, client })
    }

    fn parse_device(raw: &GraphManagedDevice) -> ManagedDevice {
        ManagedDevice {
            device_id: raw.id.clone(),
            name: raw
                .device_name
                .clone()
                .unwrap_or_else(|| "unnamed-device".to_string()),
            serial_number: raw
                .serial_number
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from),
            manufacturer: raw.manufacturer.clone(),
            model: raw.model.clone(),
            operating_system: raw.operating_system.clone(),
            compliance_state: raw
                .compliance_state
                .as_deref()
                .map(ComplianceState::parse)
                .unwrap_or(ComplianceState::Unknown),
            primary_user_email: raw
                .user_principal_name
                .as_deref()
                .filter(|s| !s.is_empty())
                .map(str::to_lowercase),
            last_sync_at: raw
                .last_sync_date_time
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

#[async_trait]
impl Connector for IntuneConnector {
    fn name(&self) -> &str {
        "intune"
    }

    fn connector_type(&self) -> &str {
        "mdm"
    }

    async fn health_check(&self) -> ConnectorResult<ConnectorHealth> {
        match self.client.get("/deviceManagement/managedDevices?$top=1").await {
            Ok(r) if r.status().is_success() => Ok(ConnectorHealth::Healthy),
            Ok(r) => Ok(ConnectorHealth::Degraded(format!(
                "Unexpected response: {}",
                r.status()
            ))),
            Err(ConnectorError::AuthenticationFailed(e)) => {
                Ok(ConnectorHealth::Unhealthy(format!("Auth failed: {}", e)))
            }
            Err(ConnectorError::ConnectionFailed(e)) => Ok(ConnectorHealth::Unhealthy(format!(
                "Connection failed: {}",
                e
            ))),
            Err(e) => Ok(ConnectorHealth::Unhealthy(e.to_string())),
        }
    }

    async fn test_connection(&self) -> ConnectorResult<bool> {
        let r = self
            .client
            .get("/deviceManagement/managedDevices?$top=1")
            .await?;
        Ok(r.status().is_success())
    }
}

#[async_trait]
impl MdmConnector for IntuneConnector {
    #[instrument(skip(self))]
    async fn list_devices(&self) -> ConnectorResult<Vec<ManagedDevice>> {
        let mut devices = Vec::new();
        let mut next: Option<String> = Some(format!(
            "/deviceManagement/managedDevices?$top={}",
            self.config.page_size
        ));
        let mut pages = 0u32;

        while let Some(path) = next.take() {
            let page: GraphDeviceListPage = self.client.get_json(&path).await?;
            pages += 1;
            debug!(
                page = pages,
                count = page.value.len(),
                "Fetched managed-device page"
            );
            devices.extend(page.value.iter().map(Self::parse_device));
            next = page.next_link;
        }

        info!(
            total = devices.len(),
            pages, "Managed-device listing complete"
        );
        Ok(devices)
    }

    async fn get_device(&self, device_id: &str) -> ConnectorResult<ManagedDevice> {
        let path = format!("/deviceManagement/managedDevices/{}", device_id);
        let raw: GraphManagedDevice = self.client.get_json(&path).await?;
        Ok(Self::parse_device(&raw))
    }
}

/// One page of the Graph managed-device listing.
#[derive(Debug, Deserialize)]
struct GraphDeviceListPage {
    value: Vec<GraphManagedDevice>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

/// Raw Graph representation of a managed device.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphManagedDevice {
    id: String,
    device_name: Option<String>,
    serial_number: Option<String>,
    manufacturer: Option<String>,
    model: Option<String>,
    operating_system: Option<String>,
    compliance_state: Option<String>,
    user_principal_name: Option<String>,
    last_sync_date_time: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_device() -> GraphManagedDevice {
        GraphManagedDevice {
            id: "dev-123".to_string(),
            device_name: Some("LAPTOP-42".to_string()),
            serial_number: Some("  C02XK1ZZJGH5 ".to_string()),
            manufacturer: Some("Apple".to_string()),
            model: Some("MacBook Pro".to_string()),
            operating_system: Some("macOS".to_string()),
            compliance_state: Some("compliant".to_string()),
            user_principal_name: Some("Alice@Corp.example".to_string()),
            last_sync_date_time: Some("2024-03-01T12:00:00Z".to_string()),
        }
    }

    #[test]
    fn test_parse_device_normalizes_fields() {
        let device = IntuneConnector::parse_device(&raw_device());
        assert_eq!(device.device_id, "dev-123");
        assert_eq!(device.serial_number.as_deref(), Some("C02XK1ZZJGH5"));
        assert_eq!(device.compliance_state, ComplianceState::Compliant);
        // UPNs come back in directory casing; asset matching is by
        // lowercase email
        assert_eq!(
            device.primary_user_email.as_deref(),
            Some("alice@corp.example")
        );
        assert!(device.last_sync_at.is_some());
    }

    #[test]
    fn test_parse_device_empty_fields() {
        let mut raw = raw_device();
        raw.device_name = None;
        raw.serial_number = Some("   ".to_string());
        raw.user_principal_name = Some(String::new());
        raw.compliance_state = None;

        let device = IntuneConnector::parse_device(&raw);
        assert_eq!(device.name, "unnamed-device");
        assert!(device.serial_number.is_none());
        assert!(device.primary_user_email.is_none());
        assert_eq!(device.compliance_state, ComplianceState::Unknown);
    }

    #[test]
    fn test_page_deserialization_follows_odata_shape() {
        let json = r#"{
            "value": [{"id": "a"}, {"id": "b"}],
            "@odata.nextLink": "https://graph.microsoft.com/v1.0/deviceManagement/managedDevices?$skiptoken=x"
        }"#;
        let page: GraphDeviceListPage = serde_json::from_str(json).unwrap();
        assert_eq!(page.value.len(), 2);
        assert!(page.next_link.is_some());

        let last = r#"{"value": []}"#;
        let page: GraphDeviceListPage = serde_json::from_str(last).unwrap();
        assert!(page.next_link.is_none());
    }
}
