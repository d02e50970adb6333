//! Metrics recording helpers.
//!
//! Thin wrappers over the `metrics` facade so call sites stay
//! one-liners and metric names are defined in one place. The exporter
//! (Prometheus) is installed by the API server.

use ::metrics::{counter, gauge, histogram};
use serde::Serialize;

/// Records one handled HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_ms: f64) {
    counter!(
        "keel_http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string(),
    )
    .increment(1);
    histogram!(
        "keel_http_request_duration_ms",
        "method" => method.to_string(),
        "path" => path.to_string(),
    )
    .record(duration_ms);
}

/// Records the outcome of a device sync run.
pub fn record_sync_report(created: u64, updated: u64, reassigned: u64, errors: u64) {
    counter!("keel_device_sync_runs_total").increment(1);
    counter!("keel_device_sync_assets_created_total").increment(created);
    counter!("keel_device_sync_assets_updated_total").increment(updated);
    counter!("keel_device_sync_reassignments_total").increment(reassigned);
    counter!("keel_device_sync_errors_total").increment(errors);
}

/// Records a workflow transition.
pub fn record_workflow_transition(kind: &str, to: &str) {
    counter!(
        "keel_workflow_transitions_total",
        "kind" => kind.to_string(),
        "to" => to.to_string(),
    )
    .increment(1);
}

/// Records a login attempt.
pub fn record_login(success: bool, method: &str) {
    counter!(
        "keel_logins_total",
        "success" => success.to_string(),
        "method" => method.to_string(),
    )
    .increment(1);
}

/// Updates the current database pool gauges.
pub fn record_db_pool(size: u32, idle: usize) {
    gauge!("keel_db_pool_size").set(size as f64);
    gauge!("keel_db_pool_idle").set(idle as f64);
}

/// A JSON-serializable summary for the `/api/metrics` endpoint.
#[derive(Debug, Clone, Serialize, Default)]
pub struct MetricsSnapshot {
    /// Total people records.
    pub people: u64,
    /// Total live assets.
    pub assets: u64,
    /// Assets currently assigned.
    pub assets_assigned: u64,
    /// Open workflow instances.
    pub workflows_in_progress: u64,
    /// Active rollouts.
    pub rollouts_active: u64,
    /// Open risks.
    pub risks_open: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_does_not_panic_without_exporter() {
        // The metrics facade no-ops when no recorder is installed
        record_http_request("GET", "/api/assets", 200, 12.5);
        record_sync_report(1, 2, 3, 0);
        record_workflow_transition("step", "completed");
        record_login(true, "password");
        record_db_pool(10, 4);
    }

    #[test]
    fn test_snapshot_serializes() {
        let snapshot = MetricsSnapshot {
            people: 10,
            assets: 25,
            ..Default::default()
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["people"], 10);
        assert_eq!(json["assets"], 25);
    }
}
