//! Application state shared across handlers.

use keel_connectors::{IdentityProvider, MdmConnector};
use keel_core::db::DbPool;
use keel_observability::AuditLog;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub db: Arc<DbPool>,
    /// MDM connector for device sync (None when not configured).
    pub mdm: Option<Arc<dyn MdmConnector>>,
    /// Identity provider for SSO (None when not configured).
    pub identity: Option<Arc<dyn IdentityProvider>>,
    /// In-memory audit trail.
    pub audit: Arc<AuditLog>,
    /// Prometheus metrics handle for rendering /metrics.
    pub prometheus_handle: Option<Arc<PrometheusHandle>>,
}

impl AppState {
    /// Creates application state with no connectors configured.
    pub fn new(db: DbPool) -> Self {
        Self {
            db: Arc::new(db),
            mdm: None,
            identity: None,
            audit: Arc::new(AuditLog::new(1000)),
            prometheus_handle: None,
        }
    }

    /// Attaches an MDM connector.
    pub fn with_mdm(mut self, mdm: Arc<dyn MdmConnector>) -> Self {
        self.mdm = Some(mdm);
        self
    }

    /// Attaches an identity provider.
    pub fn with_identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Attaches the Prometheus handle.
    pub fn with_prometheus_handle(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus_handle = Some(Arc::new(handle));
        self
    }
}
