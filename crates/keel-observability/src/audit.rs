//! In-memory audit trail.
//!
//! Complements the persisted audit_log table with a bounded in-memory
//! trail that is cheap to query from health/ops endpoints, plus
//! masking for sensitive detail fields before anything is logged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// Detail keys that are masked before logging.
const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "password_hash",
    "client_secret",
    "access_token",
    "api_key",
    "key_hash",
    "authorization",
];

/// Types of auditable events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// System startup/shutdown.
    SystemLifecycle,
    /// User login.
    UserLogin,
    /// User logout.
    UserLogout,
    /// SSO callback completed.
    SsoLogin,
    /// A record was created.
    RecordCreated,
    /// A record was updated.
    RecordUpdated,
    /// A record was deleted.
    RecordDeleted,
    /// An asset was assigned or returned.
    AssetAssignment,
    /// Device sync ran.
    DeviceSync,
    /// A workflow transition was applied.
    WorkflowTransition,
    /// A rollout acknowledgment was recorded.
    RolloutAcknowledged,
    /// Custom event.
    Custom(String),
}

/// Result of an audited operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Success,
    Failure(String),
    Denied(String),
}

/// An entry in the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Unique entry ID.
    pub id: Uuid,
    /// Timestamp.
    pub timestamp: DateTime<Utc>,
    /// Event type.
    pub event_type: AuditEventType,
    /// Actor (user or system component).
    pub actor: String,
    /// Organization the event belongs to.
    pub organization_id: Option<Uuid>,
    /// Description of the event.
    pub description: String,
    /// Additional details, masked before storage.
    pub details: serde_json::Value,
    /// Result/outcome.
    pub result: AuditResult,
}

/// Replaces the values of sensitive keys with `"[MASKED]"`,
/// recursively.
pub fn mask_sensitive_fields(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let masked = map
                .iter()
                .map(|(k, v)| {
                    if SENSITIVE_KEYS.contains(&k.to_lowercase().as_str()) {
                        (k.clone(), serde_json::Value::String("[MASKED]".to_string()))
                    } else {
                        (k.clone(), mask_sensitive_fields(v))
                    }
                })
                .collect();
            serde_json::Value::Object(masked)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(mask_sensitive_fields).collect())
        }
        other => other.clone(),
    }
}

/// Bounded in-memory audit trail.
pub struct AuditLog {
    entries: Arc<RwLock<VecDeque<AuditLogEntry>>>,
    max_entries: usize,
    log_to_tracing: bool,
}

impl AuditLog {
    /// Creates a new audit log keeping at most `max_entries`.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(VecDeque::with_capacity(max_entries))),
            max_entries,
            log_to_tracing: true,
        }
    }

    /// Creates an audit log without tracing output (tests).
    pub fn without_tracing(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(VecDeque::with_capacity(max_entries))),
            max_entries,
            log_to_tracing: false,
        }
    }

    /// Records an event.
    pub async fn log_event(
        &self,
        event_type: AuditEventType,
        actor: &str,
        organization_id: Option<Uuid>,
        description: &str,
        details: serde_json::Value,
        result: AuditResult,
    ) {
        let entry = AuditLogEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type,
            actor: actor.to_string(),
            organization_id,
            description: description.to_string(),
            details: mask_sensitive_fields(&details),
            result,
        };

        if self.log_to_tracing {
            info!(
                event_type = ?entry.event_type,
                actor = %entry.actor,
                organization_id = ?entry.organization_id,
                result = ?entry.result,
                "Audit: {}",
                entry.description
            );
        }

        let mut entries = self.entries.write().await;
        if entries.len() >= self.max_entries {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Returns the most recent entries, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<AuditLogEntry> {
        let entries = self.entries.read().await;
        entries.iter().rev().take(limit).cloned().collect()
    }

    /// Number of retained entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// True when no entries are retained.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_log_and_recent() {
        let log = AuditLog::without_tracing(10);
        log.log_event(
            AuditEventType::UserLogin,
            "alice",
            None,
            "User logged in",
            json!({}),
            AuditResult::Success,
        )
        .await;
        log.log_event(
            AuditEventType::RecordCreated,
            "alice",
            None,
            "Created asset",
            json!({"asset_tag": "AST-1"}),
            AuditResult::Success,
        )
        .await;

        let recent = log.recent(10).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].event_type, AuditEventType::RecordCreated);
    }

    #[tokio::test]
    async fn test_bounded_retention() {
        let log = AuditLog::without_tracing(2);
        for i in 0..5 {
            log.log_event(
                AuditEventType::Custom("tick".to_string()),
                "system",
                None,
                &format!("event {}", i),
                json!({}),
                AuditResult::Success,
            )
            .await;
        }
        assert_eq!(log.len().await, 2);
        let recent = log.recent(10).await;
        assert_eq!(recent[0].description, "event 4");
    }

    #[test]
    fn test_masking() {
        let details = json!({
            "username": "alice",
            "password": "hunter2",
            "nested": {"client_secret": "s3cret", "ok": 1},
            "list": [{"api_key": "kl_x_y"}]
        });

        let masked = mask_sensitive_fields(&details);
        assert_eq!(masked["username"], "alice");
        assert_eq!(masked["password"], "[MASKED]");
        assert_eq!(masked["nested"]["client_secret"], "[MASKED]");
        assert_eq!(masked["nested"]["ok"], 1);
        assert_eq!(masked["list"][0]["api_key"], "[MASKED]");
    }

    #[tokio::test]
    async fn test_details_masked_on_log() {
        let log = AuditLog::without_tracing(4);
        log.log_event(
            AuditEventType::UserLogin,
            "alice",
            None,
            "login",
            json!({"password": "hunter2"}),
            AuditResult::Success,
        )
        .await;
        let recent = log.recent(1).await;
        assert_eq!(recent[0].details["password"], "[MASKED]");
    }
}
