//! In-memory MDM connector for tests.

use crate::traits::{
    Connector, ConnectorHealth, ConnectorResult, ConnectorError, ManagedDevice, MdmConnector,
};
use async_trait::async_trait;
use std::sync::Mutex;

/// Mock MDM connector backed by a fixed device list.
pub struct MockMdmConnector {
    devices: Mutex<Vec<ManagedDevice>>,
    /// When set, every call fails with this message.
    fail_with: Option<String>,
}

impl MockMdmConnector {
    /// Creates a mock serving the given devices.
    pub fn new(devices: Vec<ManagedDevice>) -> Self {
        Self {
            devices: Mutex::new(devices),
            fail_with: None,
        }
    }

    /// Creates a mock that fails every call.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            devices: Mutex::new(Vec::new()),
            fail_with: Some(message.into()),
        }
    }

    /// Replaces the served device list.
    pub fn set_devices(&self, devices: Vec<ManagedDevice>) {
        *self.devices.lock().unwrap() = devices;
    }
}

#[async_trait]
impl Connector for MockMdmConnector {
    fn name(&self) -> &str {
        "mock-mdm"
    }

    fn connector_type(&self) -> &str {
        "mdm"
    }

    async fn health_check(&self) -> ConnectorResult<ConnectorHealth> {
        match &self.fail_with {
            Some(msg) => Ok(ConnectorHealth::Unhealthy(msg.clone())),
            None => Ok(ConnectorHealth::Healthy),
        }
    }

    async fn test_connection(&self) -> ConnectorResult<bool> {
        Ok(self.fail_with.is_none())
    }
}

#[async_trait]
impl MdmConnector for MockMdmConnector {
    async fn list_devices(&self) -> ConnectorResult<Vec<ManagedDevice>> {
        if let Some(msg) = &self.fail_with {
            return Err(ConnectorError::RequestFailed(msg.clone()));
        }
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn get_device(&self, device_id: &str) -> ConnectorResult<ManagedDevice> {
        if let Some(msg) = &self.fail_with {
            return Err(ConnectorError::RequestFailed(msg.clone()));
        }
        self.devices
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.device_id == device_id)
            .cloned()
            .ok_or_else(|| ConnectorError::NotFound(format!("Device not found: {}", device_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ComplianceState;

    fn device(id: &str) -> ManagedDevice {
        ManagedDevice {
            device_id: id.to_string(),
            name: format!("device-{}", id),
            serial_number: None,
            manufacturer: None,
            model: None,
            operating_system: None,
            compliance_state: ComplianceState::Unknown,
            primary_user_email: None,
            last_sync_at: None,
        }
    }

    #[tokio::test]
    async fn test_mock_lists_devices() {
        let mock = MockMdmConnector::new(vec![device("a"), device("b")]);
        let devices = mock.list_devices().await.unwrap();
        assert_eq!(devices.len(), 2);
    }

    #[tokio::test]
    async fn test_mock_get_device() {
        let mock = MockMdmConnector::new(vec![device("a")]);
        assert!(mock.get_device("a").await.is_ok());
        assert!(mock.get_device("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_failing_mock() {
        let mock = MockMdmConnector::failing("boom");
        assert!(mock.list_devices().await.is_err());
        assert!(!mock.test_connection().await.unwrap());
    }
}
