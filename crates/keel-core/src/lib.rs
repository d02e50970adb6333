//! # keel-core
//!
//! Core domain models and logic for Keel: organizations and tenancy,
//! users and capability-based RBAC, people and teams, hardware assets,
//! compliance records, documents and rollouts, the workflow state
//! machine, org-chart layout, MDM reconciliation, and the database
//! layer.

pub mod auth;
pub mod models;
pub mod orgchart;
pub mod sync;
pub mod tenant;
pub mod validation;
pub mod workflow;

#[cfg(feature = "database")]
pub mod db;

pub use models::{
    Acknowledgment, Asset, AssetAssignment, AssetCategory, AssetStatus, Control, ControlStatus,
    Document, DocumentStatus, DocumentType, DocumentVersion, EmploymentStatus, Evidence, Framework,
    FrameworkKind, LifecycleEvent, LifecycleEventKind, Person, Risk, RiskStatus, Rollout,
    RolloutStatus, RolloutTarget, SoaItem, Team,
};
pub use orgchart::{build_forest, layout_forest, would_create_cycle, OrgChartError, OrgChartNode};
pub use sync::{plan_sync, SyncOptions, SyncPlan, SyncReport};
pub use tenant::{OrgContext, Organization, OrganizationSettings, OrganizationStatus};
pub use workflow::{
    build_board, build_graph, InstanceStatus, StepStatus, TemplateStep, WorkflowEngine,
    WorkflowError, WorkflowInstance, WorkflowKind, WorkflowStep, WorkflowTemplate,
};

// Auth exports
pub use auth::password::{hash_password, validate_password_strength, verify_password, PasswordError};
pub use auth::{
    ApiKey, AuthorizationContext, Capability, Role, SessionData, User, UserFilter, UserUpdate,
};

/// Returns true when running in a production environment
/// (`KEEL_ENV=production`).
pub fn is_production_environment() -> bool {
    std::env::var("KEEL_ENV")
        .map(|v| v.eq_ignore_ascii_case("production"))
        .unwrap_or(false)
}
