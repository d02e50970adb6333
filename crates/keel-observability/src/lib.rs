//! # keel-observability
//!
//! Logging, metrics, and audit infrastructure for Keel: structured
//! logging with tracing, a metrics facade over the `metrics` crate,
//! and an in-memory audit trail with sensitive-field masking.

pub mod audit;
pub mod logging;
pub mod metrics;

pub use audit::{mask_sensitive_fields, AuditEventType, AuditLog, AuditLogEntry, AuditResult};
pub use logging::{init_logging, init_logging_with_config, LoggingConfig};
pub use self::metrics::{
    record_db_pool, record_http_request, record_login, record_sync_report,
    record_workflow_transition, MetricsSnapshot,
};
