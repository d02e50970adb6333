//! Workflow state machine for Keel.
//!
//! Workflow templates describe ordered steps (onboarding checklists,
//! offboarding runbooks). Instantiating a template produces a workflow
//! instance with concrete steps, owners, and due dates; from there the
//! engine validates every status change.
//!
//! ## Authorization
//!
//! - All transitions require the `workflows:write` capability
//! - Cancelling an instance additionally requires manager-or-admin role
//! - All transitions carry the actor identity for audit logging
//!
//! ## State machines
//!
//! Steps: pending -> in_progress -> completed | skipped | blocked;
//! blocked steps may return to pending or in_progress; completed and
//! skipped are terminal.
//!
//! Instances: pending -> in_progress -> on_hold | completed |
//! cancelled; on_hold resumes to in_progress; completed and cancelled
//! are terminal. An instance completes only when every step is
//! terminal, and completing the last open step completes the instance.

use crate::auth::{AuthorizationContext, Capability, Role};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Status of an individual workflow step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not started.
    Pending,
    /// Being worked on.
    InProgress,
    /// Done.
    Completed,
    /// Intentionally not done.
    Skipped,
    /// Cannot proceed; carries a reason.
    Blocked,
}

impl StepStatus {
    /// All step statuses, in kanban column order.
    pub const ALL: [StepStatus; 5] = [
        StepStatus::Pending,
        StepStatus::InProgress,
        StepStatus::Blocked,
        StepStatus::Completed,
        StepStatus::Skipped,
    ];

    /// Returns the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::InProgress => "in_progress",
            StepStatus::Completed => "completed",
            StepStatus::Skipped => "skipped",
            StepStatus::Blocked => "blocked",
        }
    }

    /// True for statuses a step can never leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Skipped)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for StepStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StepStatus::Pending),
            "in_progress" => Ok(StepStatus::InProgress),
            "completed" => Ok(StepStatus::Completed),
            "skipped" => Ok(StepStatus::Skipped),
            "blocked" => Ok(StepStatus::Blocked),
            _ => Err(()),
        }
    }
}

/// Status of a workflow instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Created, not yet started.
    Pending,
    /// Running.
    InProgress,
    /// Paused.
    OnHold,
    /// Every step reached a terminal status.
    Completed,
    /// Abandoned.
    Cancelled,
}

impl InstanceStatus {
    /// Returns the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Pending => "pending",
            InstanceStatus::InProgress => "in_progress",
            InstanceStatus::OnHold => "on_hold",
            InstanceStatus::Completed => "completed",
            InstanceStatus::Cancelled => "cancelled",
        }
    }

    /// True for statuses an instance can never leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceStatus::Completed | InstanceStatus::Cancelled)
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for InstanceStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InstanceStatus::Pending),
            "in_progress" => Ok(InstanceStatus::InProgress),
            "on_hold" => Ok(InstanceStatus::OnHold),
            "completed" => Ok(InstanceStatus::Completed),
            "cancelled" => Ok(InstanceStatus::Cancelled),
            _ => Err(()),
        }
    }
}

/// Kind of workflow a template describes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Onboarding,
    Offboarding,
    Custom(String),
}

impl WorkflowKind {
    /// Parses a kind string; unknown values become `Custom`.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "onboarding" => WorkflowKind::Onboarding,
            "offboarding" => WorkflowKind::Offboarding,
            other => WorkflowKind::Custom(other.to_string()),
        }
    }

    /// Returns the kind as a lowercase string for storage.
    pub fn as_db_str(&self) -> String {
        match self {
            WorkflowKind::Onboarding => "onboarding".to_string(),
            WorkflowKind::Offboarding => "offboarding".to_string(),
            WorkflowKind::Custom(s) => s.clone(),
        }
    }
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowKind::Onboarding => write!(f, "Onboarding"),
            WorkflowKind::Offboarding => write!(f, "Offboarding"),
            WorkflowKind::Custom(name) => write!(f, "Custom: {}", name),
        }
    }
}

/// One step definition within a template.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TemplateStep {
    /// Step name.
    pub name: String,
    /// Description of the work.
    pub description: Option<String>,
    /// Days after instance start when the step is due.
    pub due_in_days: Option<i64>,
}

/// A reusable workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    /// Unique identifier.
    pub id: Uuid,
    /// Organization scope.
    pub organization_id: Uuid,
    /// Template name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Kind of workflow.
    pub kind: WorkflowKind,
    /// Ordered step definitions.
    pub steps: Vec<TemplateStep>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl WorkflowTemplate {
    /// Creates a new template.
    pub fn new(
        organization_id: Uuid,
        name: impl Into<String>,
        kind: WorkflowKind,
        steps: Vec<TemplateStep>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            name: name.into(),
            description: None,
            kind,
            steps,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A running copy of a workflow template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    /// Unique identifier.
    pub id: Uuid,
    /// Organization scope.
    pub organization_id: Uuid,
    /// Template this instance was created from.
    pub template_id: Uuid,
    /// Instance name (defaults to the template name).
    pub name: String,
    /// Instance status.
    pub status: InstanceStatus,
    /// User responsible for driving the workflow.
    pub owner_id: Uuid,
    /// Person the workflow is about (the onboarding hire, etc.).
    pub subject_person_id: Option<Uuid>,
    /// Overall due date (latest step due date at instantiation).
    pub due_date: Option<DateTime<Utc>>,
    /// When the instance moved to in_progress.
    pub started_at: Option<DateTime<Utc>>,
    /// When the instance reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// A concrete step within a workflow instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Unique identifier.
    pub id: Uuid,
    /// Owning instance.
    pub instance_id: Uuid,
    /// Zero-based position in the instance.
    pub position: i64,
    /// Step name.
    pub name: String,
    /// Description of the work.
    pub description: Option<String>,
    /// Step status.
    pub status: StepStatus,
    /// Person assigned to do the work.
    pub assignee_id: Option<Uuid>,
    /// When the step is due.
    pub due_date: Option<DateTime<Utc>>,
    /// Why the step is blocked, while blocked.
    pub blocked_reason: Option<String>,
    /// When the step reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl WorkflowStep {
    /// True if the step is overdue relative to `now`.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.due_date.map(|d| now > d).unwrap_or(false)
    }
}

/// Errors from workflow operations.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Invalid step transition from {from} to {to}")]
    InvalidStepTransition { from: StepStatus, to: StepStatus },

    #[error("Invalid instance transition from {from} to {to}")]
    InvalidInstanceTransition {
        from: InstanceStatus,
        to: InstanceStatus,
    },

    #[error("Unauthorized: {action} requires {requirement} (actor: {actor})")]
    Unauthorized {
        action: String,
        requirement: String,
        actor: String,
    },

    #[error("Instance is not active (status: {0})")]
    InstanceNotActive(InstanceStatus),

    #[error("Cannot complete instance: {0} step(s) not yet terminal")]
    StepsRemaining(usize),

    #[error("Blocking a step requires a reason")]
    MissingBlockReason,

    #[error("Template has no steps")]
    EmptyTemplate,

    #[error("Step not found: {0}")]
    StepNotFound(Uuid),
}

/// Result of a successful transition.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    /// Human-readable audit message.
    pub audit_message: String,
    /// True when a step transition auto-completed the whole instance.
    pub instance_completed: bool,
}

/// The workflow engine validates and applies status transitions.
pub struct WorkflowEngine {
    step_transitions: Vec<(StepStatus, StepStatus)>,
    instance_transitions: Vec<(InstanceStatus, InstanceStatus)>,
}

impl WorkflowEngine {
    /// Creates an engine with the default transition tables.
    pub fn new() -> Self {
        Self {
            step_transitions: vec![
                (StepStatus::Pending, StepStatus::InProgress),
                (StepStatus::Pending, StepStatus::Skipped),
                (StepStatus::Pending, StepStatus::Blocked),
                (StepStatus::InProgress, StepStatus::Completed),
                (StepStatus::InProgress, StepStatus::Skipped),
                (StepStatus::InProgress, StepStatus::Blocked),
                (StepStatus::Blocked, StepStatus::Pending),
                (StepStatus::Blocked, StepStatus::InProgress),
            ],
            instance_transitions: vec![
                (InstanceStatus::Pending, InstanceStatus::InProgress),
                (InstanceStatus::Pending, InstanceStatus::Cancelled),
                (InstanceStatus::InProgress, InstanceStatus::OnHold),
                (InstanceStatus::InProgress, InstanceStatus::Completed),
                (InstanceStatus::InProgress, InstanceStatus::Cancelled),
                (InstanceStatus::OnHold, InstanceStatus::InProgress),
                (InstanceStatus::OnHold, InstanceStatus::Cancelled),
            ],
        }
    }

    /// Checks whether a step transition is allowed.
    pub fn can_transition_step(&self, from: StepStatus, to: StepStatus) -> bool {
        self.step_transitions.contains(&(from, to))
    }

    /// Checks whether an instance transition is allowed.
    pub fn can_transition_instance(&self, from: InstanceStatus, to: InstanceStatus) -> bool {
        self.instance_transitions.contains(&(from, to))
    }

    /// Lists the step statuses reachable from `from`.
    pub fn possible_step_transitions(&self, from: StepStatus) -> Vec<StepStatus> {
        self.step_transitions
            .iter()
            .filter(|(f, _)| *f == from)
            .map(|(_, t)| *t)
            .collect()
    }

    /// Lists the instance statuses reachable from `from`.
    pub fn possible_instance_transitions(&self, from: InstanceStatus) -> Vec<InstanceStatus> {
        self.instance_transitions
            .iter()
            .filter(|(f, _)| *f == from)
            .map(|(_, t)| *t)
            .collect()
    }

    /// Instantiates a template: copies its steps in order and computes
    /// due dates from `start`.
    ///
    /// The instance starts `Pending`; its due date is the latest step
    /// due date.
    pub fn instantiate(
        &self,
        template: &WorkflowTemplate,
        name: Option<String>,
        owner_id: Uuid,
        subject_person_id: Option<Uuid>,
        start: DateTime<Utc>,
    ) -> Result<(WorkflowInstance, Vec<WorkflowStep>), WorkflowError> {
        if template.steps.is_empty() {
            return Err(WorkflowError::EmptyTemplate);
        }

        let now = Utc::now();
        let instance_id = Uuid::new_v4();

        let steps: Vec<WorkflowStep> = template
            .steps
            .iter()
            .enumerate()
            .map(|(i, def)| WorkflowStep {
                id: Uuid::new_v4(),
                instance_id,
                position: i as i64,
                name: def.name.clone(),
                description: def.description.clone(),
                status: StepStatus::Pending,
                assignee_id: None,
                due_date: def.due_in_days.map(|d| start + Duration::days(d)),
                blocked_reason: None,
                completed_at: None,
                created_at: now,
                updated_at: now,
            })
            .collect();

        let due_date = steps.iter().filter_map(|s| s.due_date).max();

        let instance = WorkflowInstance {
            id: instance_id,
            organization_id: template.organization_id,
            template_id: template.id,
            name: name.unwrap_or_else(|| template.name.clone()),
            status: InstanceStatus::Pending,
            owner_id,
            subject_person_id,
            due_date,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        };

        info!(
            template = %template.name,
            instance_id = %instance.id,
            steps = steps.len(),
            "Instantiated workflow"
        );

        Ok((instance, steps))
    }

    /// Transitions one step of an instance.
    ///
    /// Steps only move while the instance is `InProgress`. Blocking
    /// requires a reason. Completing or skipping the last open step
    /// auto-completes the instance.
    #[instrument(skip(self, instance, steps, auth), fields(actor = %auth.actor_name))]
    pub fn transition_step(
        &self,
        instance: &mut WorkflowInstance,
        steps: &mut [WorkflowStep],
        step_id: Uuid,
        to: StepStatus,
        reason: Option<String>,
        auth: &AuthorizationContext,
    ) -> Result<TransitionOutcome, WorkflowError> {
        self.require_capability(auth, "step transition")?;

        if instance.status != InstanceStatus::InProgress {
            return Err(WorkflowError::InstanceNotActive(instance.status));
        }

        let step = steps
            .iter_mut()
            .find(|s| s.id == step_id)
            .ok_or(WorkflowError::StepNotFound(step_id))?;

        let from = step.status;
        if !self.can_transition_step(from, to) {
            return Err(WorkflowError::InvalidStepTransition { from, to });
        }

        if to == StepStatus::Blocked && reason.as_deref().map(str::trim).unwrap_or("").is_empty() {
            return Err(WorkflowError::MissingBlockReason);
        }

        let now = Utc::now();
        step.status = to;
        step.updated_at = now;
        step.blocked_reason = if to == StepStatus::Blocked {
            reason
        } else {
            None
        };
        step.completed_at = if to.is_terminal() { Some(now) } else { None };

        let step_name = step.name.clone();

        // Completing the last open step completes the instance
        let mut instance_completed = false;
        if steps.iter().all(|s| s.status.is_terminal()) {
            instance.status = InstanceStatus::Completed;
            instance.completed_at = Some(now);
            instance.updated_at = now;
            instance_completed = true;
            info!(instance_id = %instance.id, "All steps terminal, instance completed");
        }

        info!(
            instance_id = %instance.id,
            step = %step_name,
            from = %from,
            to = %to,
            "Step transitioned"
        );

        Ok(TransitionOutcome {
            audit_message: format!(
                "step '{}' {} -> {} by {}",
                step_name,
                from,
                to,
                auth.audit_identity()
            ),
            instance_completed,
        })
    }

    /// Transitions a workflow instance.
    ///
    /// Completing requires every step to be terminal; cancelling
    /// requires manager-or-admin role. Starting stamps `started_at`.
    #[instrument(skip(self, instance, steps, auth), fields(actor = %auth.actor_name))]
    pub fn transition_instance(
        &self,
        instance: &mut WorkflowInstance,
        steps: &[WorkflowStep],
        to: InstanceStatus,
        auth: &AuthorizationContext,
    ) -> Result<TransitionOutcome, WorkflowError> {
        self.require_capability(auth, "instance transition")?;

        if to == InstanceStatus::Cancelled && !auth.role.at_least(Role::Manager) {
            warn!(
                actor = %auth.actor_name,
                role = %auth.role,
                "Cancellation denied: requires manager role"
            );
            return Err(WorkflowError::Unauthorized {
                action: "cancel instance".to_string(),
                requirement: "manager role".to_string(),
                actor: auth.audit_identity(),
            });
        }

        let from = instance.status;
        if !self.can_transition_instance(from, to) {
            return Err(WorkflowError::InvalidInstanceTransition { from, to });
        }

        if to == InstanceStatus::Completed {
            let remaining = steps.iter().filter(|s| !s.status.is_terminal()).count();
            if remaining > 0 {
                return Err(WorkflowError::StepsRemaining(remaining));
            }
        }

        let now = Utc::now();
        instance.status = to;
        instance.updated_at = now;
        if to == InstanceStatus::InProgress && instance.started_at.is_none() {
            instance.started_at = Some(now);
        }
        if to.is_terminal() {
            instance.completed_at = Some(now);
        }

        info!(
            instance_id = %instance.id,
            from = %from,
            to = %to,
            "Instance transitioned"
        );

        Ok(TransitionOutcome {
            audit_message: format!(
                "instance '{}' {} -> {} by {}",
                instance.name,
                from,
                to,
                auth.audit_identity()
            ),
            instance_completed: to == InstanceStatus::Completed,
        })
    }

    fn require_capability(
        &self,
        auth: &AuthorizationContext,
        action: &str,
    ) -> Result<(), WorkflowError> {
        if !auth.has_capability(Capability::WorkflowsWrite) {
            warn!(
                actor = %auth.actor_name,
                role = %auth.role,
                action,
                "Workflow transition denied"
            );
            return Err(WorkflowError::Unauthorized {
                action: action.to_string(),
                requirement: Capability::WorkflowsWrite.to_string(),
                actor: auth.audit_identity(),
            });
        }
        Ok(())
    }
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Visualization (data for list/kanban/graph views)
// ============================================================================

/// One kanban column: a status and the steps in it.
#[derive(Debug, Clone, Serialize)]
pub struct BoardColumn {
    /// Column status.
    pub status: StepStatus,
    /// Steps currently in this status, ordered by position.
    pub steps: Vec<WorkflowStep>,
}

/// Groups steps into kanban columns, one per step status.
pub fn build_board(steps: &[WorkflowStep]) -> Vec<BoardColumn> {
    StepStatus::ALL
        .iter()
        .map(|status| {
            let mut column: Vec<WorkflowStep> = steps
                .iter()
                .filter(|s| s.status == *status)
                .cloned()
                .collect();
            column.sort_by_key(|s| s.position);
            BoardColumn {
                status: *status,
                steps: column,
            }
        })
        .collect()
}

/// A node in the workflow graph view.
#[derive(Debug, Clone, Serialize)]
pub struct GraphNode {
    pub step_id: Uuid,
    pub name: String,
    pub status: StepStatus,
    pub position: i64,
}

/// A directed edge between consecutive steps.
#[derive(Debug, Clone, Serialize)]
pub struct GraphEdge {
    pub from: Uuid,
    pub to: Uuid,
}

/// The graph view of an instance: nodes plus sequential edges.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// Builds the graph view: steps ordered by position, connected in
/// sequence.
pub fn build_graph(steps: &[WorkflowStep]) -> WorkflowGraph {
    let mut ordered: Vec<&WorkflowStep> = steps.iter().collect();
    ordered.sort_by_key(|s| s.position);

    let nodes: Vec<GraphNode> = ordered
        .iter()
        .map(|s| GraphNode {
            step_id: s.id,
            name: s.name.clone(),
            status: s.status,
            position: s.position,
        })
        .collect();

    let edges = ordered
        .windows(2)
        .map(|pair| GraphEdge {
            from: pair[0].id,
            to: pair[1].id,
        })
        .collect();

    WorkflowGraph { nodes, edges }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Role, User};

    fn auth(role: Role) -> AuthorizationContext {
        let user = User::new(Uuid::new_v4(), "t@example.com", "tester", "h", role);
        AuthorizationContext::from_user(&user)
    }

    fn template() -> WorkflowTemplate {
        WorkflowTemplate::new(
            Uuid::new_v4(),
            "Engineering onboarding",
            WorkflowKind::Onboarding,
            vec![
                TemplateStep {
                    name: "Create accounts".to_string(),
                    description: None,
                    due_in_days: Some(1),
                },
                TemplateStep {
                    name: "Ship laptop".to_string(),
                    description: Some("Ship the provisioned laptop".to_string()),
                    due_in_days: Some(3),
                },
                TemplateStep {
                    name: "Security training".to_string(),
                    description: None,
                    due_in_days: Some(14),
                },
            ],
        )
    }

    fn running_instance() -> (WorkflowEngine, WorkflowInstance, Vec<WorkflowStep>) {
        let engine = WorkflowEngine::new();
        let template = template();
        let (mut instance, steps) = engine
            .instantiate(&template, None, Uuid::new_v4(), None, Utc::now())
            .unwrap();
        engine
            .transition_instance(&mut instance, &steps, InstanceStatus::InProgress, &auth(Role::Manager))
            .unwrap();
        (engine, instance, steps)
    }

    #[test]
    fn test_instantiate_copies_steps_in_order() {
        let engine = WorkflowEngine::new();
        let start = Utc::now();
        let (instance, steps) = engine
            .instantiate(&template(), None, Uuid::new_v4(), None, start)
            .unwrap();

        assert_eq!(instance.status, InstanceStatus::Pending);
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].position, 0);
        assert_eq!(steps[2].name, "Security training");
        assert!(steps.iter().all(|s| s.status == StepStatus::Pending));
        // Instance due date is the latest step due date
        assert_eq!(instance.due_date, steps[2].due_date);
    }

    #[test]
    fn test_instantiate_rejects_empty_template() {
        let engine = WorkflowEngine::new();
        let empty = WorkflowTemplate::new(
            Uuid::new_v4(),
            "Empty",
            WorkflowKind::Custom("misc".to_string()),
            vec![],
        );
        assert!(matches!(
            engine.instantiate(&empty, None, Uuid::new_v4(), None, Utc::now()),
            Err(WorkflowError::EmptyTemplate)
        ));
    }

    #[test]
    fn test_step_transition_table() {
        let engine = WorkflowEngine::new();

        assert!(engine.can_transition_step(StepStatus::Pending, StepStatus::InProgress));
        assert!(engine.can_transition_step(StepStatus::Pending, StepStatus::Skipped));
        assert!(engine.can_transition_step(StepStatus::InProgress, StepStatus::Completed));
        assert!(engine.can_transition_step(StepStatus::Blocked, StepStatus::InProgress));

        // Terminal statuses never move; pending cannot jump to completed
        assert!(!engine.can_transition_step(StepStatus::Pending, StepStatus::Completed));
        assert!(!engine.can_transition_step(StepStatus::Completed, StepStatus::InProgress));
        assert!(!engine.can_transition_step(StepStatus::Skipped, StepStatus::Pending));
    }

    #[test]
    fn test_step_transition_happy_path() {
        let (engine, mut instance, mut steps) = running_instance();
        let actor = auth(Role::Member);
        let step_id = steps[0].id;

        engine
            .transition_step(&mut instance, &mut steps, step_id, StepStatus::InProgress, None, &actor)
            .unwrap();
        assert_eq!(steps[0].status, StepStatus::InProgress);

        let outcome = engine
            .transition_step(&mut instance, &mut steps, step_id, StepStatus::Completed, None, &actor)
            .unwrap();
        assert_eq!(steps[0].status, StepStatus::Completed);
        assert!(steps[0].completed_at.is_some());
        assert!(!outcome.instance_completed);
    }

    #[test]
    fn test_invalid_step_transition_rejected() {
        let (engine, mut instance, mut steps) = running_instance();
        let step_id = steps[0].id;
        let result = engine.transition_step(
            &mut instance,
            &mut steps,
            step_id,
            StepStatus::Completed,
            None,
            &auth(Role::Member),
        );
        assert!(matches!(
            result,
            Err(WorkflowError::InvalidStepTransition {
                from: StepStatus::Pending,
                to: StepStatus::Completed
            })
        ));
    }

    #[test]
    fn test_blocking_requires_reason() {
        let (engine, mut instance, mut steps) = running_instance();
        let step_id = steps[0].id;

        let missing = engine.transition_step(
            &mut instance,
            &mut steps,
            step_id,
            StepStatus::Blocked,
            None,
            &auth(Role::Member),
        );
        assert!(matches!(missing, Err(WorkflowError::MissingBlockReason)));

        engine
            .transition_step(
                &mut instance,
                &mut steps,
                step_id,
                StepStatus::Blocked,
                Some("waiting on hardware order".to_string()),
                &auth(Role::Member),
            )
            .unwrap();
        assert_eq!(steps[0].status, StepStatus::Blocked);
        assert_eq!(
            steps[0].blocked_reason.as_deref(),
            Some("waiting on hardware order")
        );

        // Unblocking clears the reason
        engine
            .transition_step(
                &mut instance,
                &mut steps,
                step_id,
                StepStatus::Pending,
                None,
                &auth(Role::Member),
            )
            .unwrap();
        assert!(steps[0].blocked_reason.is_none());
    }

    #[test]
    fn test_last_step_completion_completes_instance() {
        let (engine, mut instance, mut steps) = running_instance();
        let actor = auth(Role::Member);

        let ids: Vec<Uuid> = steps.iter().map(|s| s.id).collect();
        for id in &ids[..2] {
            engine
                .transition_step(&mut instance, &mut steps, *id, StepStatus::InProgress, None, &actor)
                .unwrap();
            engine
                .transition_step(&mut instance, &mut steps, *id, StepStatus::Completed, None, &actor)
                .unwrap();
        }

        // Skip the last step; instance must auto-complete
        let outcome = engine
            .transition_step(&mut instance, &mut steps, ids[2], StepStatus::Skipped, None, &actor)
            .unwrap();
        assert!(outcome.instance_completed);
        assert_eq!(instance.status, InstanceStatus::Completed);
        assert!(instance.completed_at.is_some());
    }

    #[test]
    fn test_steps_frozen_unless_instance_running() {
        let engine = WorkflowEngine::new();
        let (mut instance, mut steps) = engine
            .instantiate(&template(), None, Uuid::new_v4(), None, Utc::now())
            .unwrap();
        let step_id = steps[0].id;

        // Instance still pending
        let result = engine.transition_step(
            &mut instance,
            &mut steps,
            step_id,
            StepStatus::InProgress,
            None,
            &auth(Role::Member),
        );
        assert!(matches!(
            result,
            Err(WorkflowError::InstanceNotActive(InstanceStatus::Pending))
        ));
    }

    #[test]
    fn test_instance_transition_table() {
        let engine = WorkflowEngine::new();
        assert!(engine.can_transition_instance(InstanceStatus::Pending, InstanceStatus::InProgress));
        assert!(engine.can_transition_instance(InstanceStatus::InProgress, InstanceStatus::OnHold));
        assert!(engine.can_transition_instance(InstanceStatus::OnHold, InstanceStatus::InProgress));
        assert!(!engine.can_transition_instance(InstanceStatus::Pending, InstanceStatus::OnHold));
        assert!(!engine.can_transition_instance(InstanceStatus::Completed, InstanceStatus::InProgress));
        assert!(!engine.can_transition_instance(InstanceStatus::Cancelled, InstanceStatus::InProgress));
    }

    #[test]
    fn test_instance_completion_requires_terminal_steps() {
        let (engine, mut instance, steps) = running_instance();
        let result = engine.transition_instance(
            &mut instance,
            &steps,
            InstanceStatus::Completed,
            &auth(Role::Manager),
        );
        assert!(matches!(result, Err(WorkflowError::StepsRemaining(3))));
    }

    #[test]
    fn test_hold_and_resume() {
        let (engine, mut instance, steps) = running_instance();
        let actor = auth(Role::Member);

        engine
            .transition_instance(&mut instance, &steps, InstanceStatus::OnHold, &actor)
            .unwrap();
        assert_eq!(instance.status, InstanceStatus::OnHold);

        engine
            .transition_instance(&mut instance, &steps, InstanceStatus::InProgress, &actor)
            .unwrap();
        assert_eq!(instance.status, InstanceStatus::InProgress);
        // started_at is stamped once
        assert!(instance.started_at.is_some());
    }

    #[test]
    fn test_cancel_requires_manager() {
        let (engine, mut instance, steps) = running_instance();

        let denied = engine.transition_instance(
            &mut instance,
            &steps,
            InstanceStatus::Cancelled,
            &auth(Role::Member),
        );
        assert!(matches!(denied, Err(WorkflowError::Unauthorized { .. })));

        engine
            .transition_instance(
                &mut instance,
                &steps,
                InstanceStatus::Cancelled,
                &auth(Role::Manager),
            )
            .unwrap();
        assert_eq!(instance.status, InstanceStatus::Cancelled);
        assert!(instance.completed_at.is_some());
    }

    #[test]
    fn test_capability_required_for_transitions() {
        let (engine, mut instance, mut steps) = running_instance();
        // A context stripped of workflows:write
        let mut ctx = auth(Role::Member);
        ctx.capabilities.remove(&Capability::WorkflowsWrite);

        let step_id = steps[0].id;
        let result = engine.transition_step(
            &mut instance,
            &mut steps,
            step_id,
            StepStatus::InProgress,
            None,
            &ctx,
        );
        assert!(matches!(result, Err(WorkflowError::Unauthorized { .. })));
    }

    #[test]
    fn test_board_groups_by_status() {
        let (engine, mut instance, mut steps) = running_instance();
        let actor = auth(Role::Member);
        let step_id = steps[0].id;
        engine
            .transition_step(&mut instance, &mut steps, step_id, StepStatus::InProgress, None, &actor)
            .unwrap();

        let board = build_board(&steps);
        assert_eq!(board.len(), StepStatus::ALL.len());
        let pending = board.iter().find(|c| c.status == StepStatus::Pending).unwrap();
        let in_progress = board
            .iter()
            .find(|c| c.status == StepStatus::InProgress)
            .unwrap();
        assert_eq!(pending.steps.len(), 2);
        assert_eq!(in_progress.steps.len(), 1);
    }

    #[test]
    fn test_graph_connects_steps_in_sequence() {
        let (_, _, steps) = running_instance();
        let graph = build_graph(&steps);
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.edges.len(), 2);
        assert_eq!(graph.edges[0].from, graph.nodes[0].step_id);
        assert_eq!(graph.edges[0].to, graph.nodes[1].step_id);
    }

    #[test]
    fn test_step_overdue() {
        let (_, _, mut steps) = running_instance();
        steps[0].due_date = Some(Utc::now() - Duration::days(1));
        assert!(steps[0].is_overdue(Utc::now()));

        steps[0].status = StepStatus::Completed;
        assert!(!steps[0].is_overdue(Utc::now()));
    }
}
