//! Workflow repository: templates, instances, and steps.

use super::convert::{parse_opt_ts, parse_opt_uuid, parse_ts, parse_uuid};
use super::{DbError, DbPool, Pagination};
use crate::workflow::{
    InstanceStatus, StepStatus, WorkflowInstance, WorkflowKind, WorkflowStep, WorkflowTemplate,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Filter criteria for listing workflow instances.
#[derive(Debug, Clone, Default)]
pub struct InstanceFilter {
    /// Organization scope (required in practice).
    pub organization_id: Option<Uuid>,
    /// Filter by status.
    pub status: Option<InstanceStatus>,
    /// Filter by subject person.
    pub subject_person_id: Option<Uuid>,
}

/// Repository trait for workflow persistence.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    // Templates
    async fn create_template(&self, template: &WorkflowTemplate)
        -> Result<WorkflowTemplate, DbError>;
    async fn get_template(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<Option<WorkflowTemplate>, DbError>;
    async fn list_templates(&self, organization_id: Uuid)
        -> Result<Vec<WorkflowTemplate>, DbError>;
    async fn save_template(&self, template: &WorkflowTemplate)
        -> Result<WorkflowTemplate, DbError>;
    async fn delete_template(&self, organization_id: Uuid, id: Uuid) -> Result<bool, DbError>;

    // Instances
    /// Inserts an instance together with its steps.
    async fn create_instance(
        &self,
        instance: &WorkflowInstance,
        steps: &[WorkflowStep],
    ) -> Result<WorkflowInstance, DbError>;
    async fn get_instance(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<Option<WorkflowInstance>, DbError>;
    async fn list_instances(
        &self,
        filter: &InstanceFilter,
        pagination: &Pagination,
    ) -> Result<Vec<WorkflowInstance>, DbError>;
    async fn count_instances(&self, filter: &InstanceFilter) -> Result<u64, DbError>;
    async fn save_instance(&self, instance: &WorkflowInstance)
        -> Result<WorkflowInstance, DbError>;

    // Steps
    async fn list_steps(&self, instance_id: Uuid) -> Result<Vec<WorkflowStep>, DbError>;
    async fn save_step(&self, step: &WorkflowStep) -> Result<WorkflowStep, DbError>;
}

const TEMPLATE_COLUMNS: &str =
    "id, organization_id, name, description, kind, steps, created_at, updated_at";
const INSTANCE_COLUMNS: &str = "id, organization_id, template_id, name, status, owner_id, subject_person_id, due_date, started_at, completed_at, created_at, updated_at";
const STEP_COLUMNS: &str = "id, instance_id, position, name, description, status, assignee_id, due_date, blocked_reason, completed_at, created_at, updated_at";

/// SQLite implementation of WorkflowRepository.
pub struct SqliteWorkflowRepository {
    pool: sqlx::SqlitePool,
}

impl SqliteWorkflowRepository {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    async fn insert_step(&self, step: &WorkflowStep) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO workflow_steps (id, instance_id, position, name, description, status, assignee_id, due_date, blocked_reason, completed_at, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(step.id.to_string())
        .bind(step.instance_id.to_string())
        .bind(step.position)
        .bind(&step.name)
        .bind(&step.description)
        .bind(step.status.as_str())
        .bind(step.assignee_id.map(|u| u.to_string()))
        .bind(step.due_date.map(|t| t.to_rfc3339()))
        .bind(&step.blocked_reason)
        .bind(step.completed_at.map(|t| t.to_rfc3339()))
        .bind(step.created_at.to_rfc3339())
        .bind(step.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl WorkflowRepository for SqliteWorkflowRepository {
    async fn create_template(
        &self,
        template: &WorkflowTemplate,
    ) -> Result<WorkflowTemplate, DbError> {
        sqlx::query(
            "INSERT INTO workflow_templates (id, organization_id, name, description, kind, steps, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(template.id.to_string())
        .bind(template.organization_id.to_string())
        .bind(&template.name)
        .bind(&template.description)
        .bind(template.kind.as_db_str())
        .bind(serde_json::to_string(&template.steps)?)
        .bind(template.created_at.to_rfc3339())
        .bind(template.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(template.clone())
    }

    async fn get_template(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<Option<WorkflowTemplate>, DbError> {
        let row: Option<SqliteTemplateRow> = sqlx::query_as(&format!(
            "SELECT {} FROM workflow_templates WHERE id = ? AND organization_id = ?",
            TEMPLATE_COLUMNS
        ))
        .bind(id.to_string())
        .bind(organization_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_templates(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<WorkflowTemplate>, DbError> {
        let rows: Vec<SqliteTemplateRow> = sqlx::query_as(&format!(
            "SELECT {} FROM workflow_templates WHERE organization_id = ? ORDER BY name ASC",
            TEMPLATE_COLUMNS
        ))
        .bind(organization_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_template(
        &self,
        template: &WorkflowTemplate,
    ) -> Result<WorkflowTemplate, DbError> {
        let result = sqlx::query(
            "UPDATE workflow_templates SET name = ?, description = ?, kind = ?, steps = ?, updated_at = ? WHERE id = ? AND organization_id = ?",
        )
        .bind(&template.name)
        .bind(&template.description)
        .bind(template.kind.as_db_str())
        .bind(serde_json::to_string(&template.steps)?)
        .bind(Utc::now().to_rfc3339())
        .bind(template.id.to_string())
        .bind(template.organization_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("WorkflowTemplate", template.id));
        }

        Ok(template.clone())
    }

    async fn delete_template(&self, organization_id: Uuid, id: Uuid) -> Result<bool, DbError> {
        let result =
            sqlx::query("DELETE FROM workflow_templates WHERE id = ? AND organization_id = ?")
                .bind(id.to_string())
                .bind(organization_id.to_string())
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_instance(
        &self,
        instance: &WorkflowInstance,
        steps: &[WorkflowStep],
    ) -> Result<WorkflowInstance, DbError> {
        sqlx::query(
            "INSERT INTO workflow_instances (id, organization_id, template_id, name, status, owner_id, subject_person_id, due_date, started_at, completed_at, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(instance.id.to_string())
        .bind(instance.organization_id.to_string())
        .bind(instance.template_id.to_string())
        .bind(&instance.name)
        .bind(instance.status.as_str())
        .bind(instance.owner_id.to_string())
        .bind(instance.subject_person_id.map(|u| u.to_string()))
        .bind(instance.due_date.map(|t| t.to_rfc3339()))
        .bind(instance.started_at.map(|t| t.to_rfc3339()))
        .bind(instance.completed_at.map(|t| t.to_rfc3339()))
        .bind(instance.created_at.to_rfc3339())
        .bind(instance.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        for step in steps {
            self.insert_step(step).await?;
        }

        Ok(instance.clone())
    }

    async fn get_instance(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<Option<WorkflowInstance>, DbError> {
        let row: Option<SqliteInstanceRow> = sqlx::query_as(&format!(
            "SELECT {} FROM workflow_instances WHERE id = ? AND organization_id = ?",
            INSTANCE_COLUMNS
        ))
        .bind(id.to_string())
        .bind(organization_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_instances(
        &self,
        filter: &InstanceFilter,
        pagination: &Pagination,
    ) -> Result<Vec<WorkflowInstance>, DbError> {
        let (where_clause, params) = build_sqlite_filter(filter);
        let query = format!(
            "SELECT {} FROM workflow_instances WHERE {} ORDER BY created_at DESC LIMIT ? OFFSET ?",
            INSTANCE_COLUMNS, where_clause
        );

        let mut sqlx_query = sqlx::query_as::<_, SqliteInstanceRow>(&query);
        for param in params {
            sqlx_query = sqlx_query.bind(param);
        }
        sqlx_query = sqlx_query
            .bind(pagination.limit() as i64)
            .bind(pagination.offset() as i64);

        let rows: Vec<SqliteInstanceRow> = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn count_instances(&self, filter: &InstanceFilter) -> Result<u64, DbError> {
        let (where_clause, params) = build_sqlite_filter(filter);
        let query = format!(
            "SELECT COUNT(*) FROM workflow_instances WHERE {}",
            where_clause
        );

        let mut sqlx_query = sqlx::query_scalar::<_, i64>(&query);
        for param in params {
            sqlx_query = sqlx_query.bind(param);
        }

        let count: i64 = sqlx_query.fetch_one(&self.pool).await?;
        Ok(count as u64)
    }

    async fn save_instance(
        &self,
        instance: &WorkflowInstance,
    ) -> Result<WorkflowInstance, DbError> {
        let result = sqlx::query(
            "UPDATE workflow_instances SET name = ?, status = ?, owner_id = ?, subject_person_id = ?, due_date = ?, started_at = ?, completed_at = ?, updated_at = ? WHERE id = ? AND organization_id = ?",
        )
        .bind(&instance.name)
        .bind(instance.status.as_str())
        .bind(instance.owner_id.to_string())
        .bind(instance.subject_person_id.map(|u| u.to_string()))
        .bind(instance.due_date.map(|t| t.to_rfc3339()))
        .bind(instance.started_at.map(|t| t.to_rfc3339()))
        .bind(instance.completed_at.map(|t| t.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .bind(instance.id.to_string())
        .bind(instance.organization_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("WorkflowInstance", instance.id));
        }

        Ok(instance.clone())
    }

    async fn list_steps(&self, instance_id: Uuid) -> Result<Vec<WorkflowStep>, DbError> {
        let rows: Vec<SqliteStepRow> = sqlx::query_as(&format!(
            "SELECT {} FROM workflow_steps WHERE instance_id = ? ORDER BY position ASC",
            STEP_COLUMNS
        ))
        .bind(instance_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_step(&self, step: &WorkflowStep) -> Result<WorkflowStep, DbError> {
        let result = sqlx::query(
            "UPDATE workflow_steps SET name = ?, description = ?, status = ?, assignee_id = ?, due_date = ?, blocked_reason = ?, completed_at = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&step.name)
        .bind(&step.description)
        .bind(step.status.as_str())
        .bind(step.assignee_id.map(|u| u.to_string()))
        .bind(step.due_date.map(|t| t.to_rfc3339()))
        .bind(&step.blocked_reason)
        .bind(step.completed_at.map(|t| t.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .bind(step.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("WorkflowStep", step.id));
        }

        Ok(step.clone())
    }
}

fn build_sqlite_filter(filter: &InstanceFilter) -> (String, Vec<String>) {
    let mut clause = String::from("1=1");
    let mut params: Vec<String> = Vec::new();

    if let Some(org_id) = filter.organization_id {
        clause.push_str(" AND organization_id = ?");
        params.push(org_id.to_string());
    }
    if let Some(status) = &filter.status {
        clause.push_str(" AND status = ?");
        params.push(status.as_str().to_string());
    }
    if let Some(subject) = filter.subject_person_id {
        clause.push_str(" AND subject_person_id = ?");
        params.push(subject.to_string());
    }

    (clause, params)
}

/// PostgreSQL implementation of WorkflowRepository.
pub struct PgWorkflowRepository {
    pool: sqlx::PgPool,
}

impl PgWorkflowRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    async fn insert_step(&self, step: &WorkflowStep) -> Result<(), DbError> {
        sqlx::query(
            "INSERT INTO workflow_steps (id, instance_id, position, name, description, status, assignee_id, due_date, blocked_reason, completed_at, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(step.id)
        .bind(step.instance_id)
        .bind(step.position)
        .bind(&step.name)
        .bind(&step.description)
        .bind(step.status.as_str())
        .bind(step.assignee_id)
        .bind(step.due_date)
        .bind(&step.blocked_reason)
        .bind(step.completed_at)
        .bind(step.created_at)
        .bind(step.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl WorkflowRepository for PgWorkflowRepository {
    async fn create_template(
        &self,
        template: &WorkflowTemplate,
    ) -> Result<WorkflowTemplate, DbError> {
        sqlx::query(
            "INSERT INTO workflow_templates (id, organization_id, name, description, kind, steps, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(template.id)
        .bind(template.organization_id)
        .bind(&template.name)
        .bind(&template.description)
        .bind(template.kind.as_db_str())
        .bind(serde_json::to_value(&template.steps)?)
        .bind(template.created_at)
        .bind(template.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(template.clone())
    }

    async fn get_template(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<Option<WorkflowTemplate>, DbError> {
        let row: Option<PgTemplateRow> = sqlx::query_as(&format!(
            "SELECT {} FROM workflow_templates WHERE id = $1 AND organization_id = $2",
            TEMPLATE_COLUMNS
        ))
        .bind(id)
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_templates(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<WorkflowTemplate>, DbError> {
        let rows: Vec<PgTemplateRow> = sqlx::query_as(&format!(
            "SELECT {} FROM workflow_templates WHERE organization_id = $1 ORDER BY name ASC",
            TEMPLATE_COLUMNS
        ))
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_template(
        &self,
        template: &WorkflowTemplate,
    ) -> Result<WorkflowTemplate, DbError> {
        let result = sqlx::query(
            "UPDATE workflow_templates SET name = $1, description = $2, kind = $3, steps = $4, updated_at = NOW() WHERE id = $5 AND organization_id = $6",
        )
        .bind(&template.name)
        .bind(&template.description)
        .bind(template.kind.as_db_str())
        .bind(serde_json::to_value(&template.steps)?)
        .bind(template.id)
        .bind(template.organization_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("WorkflowTemplate", template.id));
        }

        Ok(template.clone())
    }

    async fn delete_template(&self, organization_id: Uuid, id: Uuid) -> Result<bool, DbError> {
        let result =
            sqlx::query("DELETE FROM workflow_templates WHERE id = $1 AND organization_id = $2")
                .bind(id)
                .bind(organization_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_instance(
        &self,
        instance: &WorkflowInstance,
        steps: &[WorkflowStep],
    ) -> Result<WorkflowInstance, DbError> {
        sqlx::query(
            "INSERT INTO workflow_instances (id, organization_id, template_id, name, status, owner_id, subject_person_id, due_date, started_at, completed_at, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(instance.id)
        .bind(instance.organization_id)
        .bind(instance.template_id)
        .bind(&instance.name)
        .bind(instance.status.as_str())
        .bind(instance.owner_id)
        .bind(instance.subject_person_id)
        .bind(instance.due_date)
        .bind(instance.started_at)
        .bind(instance.completed_at)
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .execute(&self.pool)
        .await?;

        for step in steps {
            self.insert_step(step).await?;
        }

        Ok(instance.clone())
    }

    async fn get_instance(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<Option<WorkflowInstance>, DbError> {
        let row: Option<PgInstanceRow> = sqlx::query_as(&format!(
            "SELECT {} FROM workflow_instances WHERE id = $1 AND organization_id = $2",
            INSTANCE_COLUMNS
        ))
        .bind(id)
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_instances(
        &self,
        filter: &InstanceFilter,
        pagination: &Pagination,
    ) -> Result<Vec<WorkflowInstance>, DbError> {
        let rows: Vec<PgInstanceRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM workflow_instances
            WHERE ($1::uuid IS NULL OR organization_id = $1)
              AND ($2::text IS NULL OR status = $2)
              AND ($3::uuid IS NULL OR subject_person_id = $3)
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#,
            INSTANCE_COLUMNS
        ))
        .bind(filter.organization_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.subject_person_id)
        .bind(pagination.limit() as i64)
        .bind(pagination.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn count_instances(&self, filter: &InstanceFilter) -> Result<u64, DbError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM workflow_instances
            WHERE ($1::uuid IS NULL OR organization_id = $1)
              AND ($2::text IS NULL OR status = $2)
              AND ($3::uuid IS NULL OR subject_person_id = $3)
            "#,
        )
        .bind(filter.organization_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.subject_person_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count as u64)
    }

    async fn save_instance(
        &self,
        instance: &WorkflowInstance,
    ) -> Result<WorkflowInstance, DbError> {
        let result = sqlx::query(
            "UPDATE workflow_instances SET name = $1, status = $2, owner_id = $3, subject_person_id = $4, due_date = $5, started_at = $6, completed_at = $7, updated_at = NOW() WHERE id = $8 AND organization_id = $9",
        )
        .bind(&instance.name)
        .bind(instance.status.as_str())
        .bind(instance.owner_id)
        .bind(instance.subject_person_id)
        .bind(instance.due_date)
        .bind(instance.started_at)
        .bind(instance.completed_at)
        .bind(instance.id)
        .bind(instance.organization_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("WorkflowInstance", instance.id));
        }

        Ok(instance.clone())
    }

    async fn list_steps(&self, instance_id: Uuid) -> Result<Vec<WorkflowStep>, DbError> {
        let rows: Vec<PgStepRow> = sqlx::query_as(&format!(
            "SELECT {} FROM workflow_steps WHERE instance_id = $1 ORDER BY position ASC",
            STEP_COLUMNS
        ))
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_step(&self, step: &WorkflowStep) -> Result<WorkflowStep, DbError> {
        let result = sqlx::query(
            "UPDATE workflow_steps SET name = $1, description = $2, status = $3, assignee_id = $4, due_date = $5, blocked_reason = $6, completed_at = $7, updated_at = NOW() WHERE id = $8",
        )
        .bind(&step.name)
        .bind(&step.description)
        .bind(step.status.as_str())
        .bind(step.assignee_id)
        .bind(step.due_date)
        .bind(&step.blocked_reason)
        .bind(step.completed_at)
        .bind(step.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("WorkflowStep", step.id));
        }

        Ok(step.clone())
    }
}

/// Factory selecting the implementation for the pool's backend.
pub fn create_workflow_repository(pool: &DbPool) -> Box<dyn WorkflowRepository> {
    match pool {
        DbPool::Sqlite(pool) => Box::new(SqliteWorkflowRepository::new(pool.clone())),
        DbPool::Postgres(pool) => Box::new(PgWorkflowRepository::new(pool.clone())),
    }
}

// Row types

#[derive(sqlx::FromRow)]
struct SqliteTemplateRow {
    id: String,
    organization_id: String,
    name: String,
    description: Option<String>,
    kind: String,
    steps: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SqliteTemplateRow> for WorkflowTemplate {
    type Error = DbError;

    fn try_from(row: SqliteTemplateRow) -> Result<Self, Self::Error> {
        Ok(WorkflowTemplate {
            id: parse_uuid(&row.id)?,
            organization_id: parse_uuid(&row.organization_id)?,
            name: row.name,
            description: row.description,
            kind: WorkflowKind::parse(&row.kind),
            steps: serde_json::from_str(&row.steps)?,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgTemplateRow {
    id: Uuid,
    organization_id: Uuid,
    name: String,
    description: Option<String>,
    kind: String,
    steps: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PgTemplateRow> for WorkflowTemplate {
    type Error = DbError;

    fn try_from(row: PgTemplateRow) -> Result<Self, Self::Error> {
        Ok(WorkflowTemplate {
            id: row.id,
            organization_id: row.organization_id,
            name: row.name,
            description: row.description,
            kind: WorkflowKind::parse(&row.kind),
            steps: serde_json::from_value(row.steps)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SqliteInstanceRow {
    id: String,
    organization_id: String,
    template_id: String,
    name: String,
    status: String,
    owner_id: String,
    subject_person_id: Option<String>,
    due_date: Option<String>,
    started_at: Option<String>,
    completed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SqliteInstanceRow> for WorkflowInstance {
    type Error = DbError;

    fn try_from(row: SqliteInstanceRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<InstanceStatus>().map_err(|_| {
            DbError::Serialization(format!("Invalid instance status: {}", row.status))
        })?;

        Ok(WorkflowInstance {
            id: parse_uuid(&row.id)?,
            organization_id: parse_uuid(&row.organization_id)?,
            template_id: parse_uuid(&row.template_id)?,
            name: row.name,
            status,
            owner_id: parse_uuid(&row.owner_id)?,
            subject_person_id: parse_opt_uuid(row.subject_person_id.as_deref())?,
            due_date: parse_opt_ts(row.due_date.as_deref())?,
            started_at: parse_opt_ts(row.started_at.as_deref())?,
            completed_at: parse_opt_ts(row.completed_at.as_deref())?,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgInstanceRow {
    id: Uuid,
    organization_id: Uuid,
    template_id: Uuid,
    name: String,
    status: String,
    owner_id: Uuid,
    subject_person_id: Option<Uuid>,
    due_date: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PgInstanceRow> for WorkflowInstance {
    type Error = DbError;

    fn try_from(row: PgInstanceRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<InstanceStatus>().map_err(|_| {
            DbError::Serialization(format!("Invalid instance status: {}", row.status))
        })?;

        Ok(WorkflowInstance {
            id: row.id,
            organization_id: row.organization_id,
            template_id: row.template_id,
            name: row.name,
            status,
            owner_id: row.owner_id,
            subject_person_id: row.subject_person_id,
            due_date: row.due_date,
            started_at: row.started_at,
            completed_at: row.completed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SqliteStepRow {
    id: String,
    instance_id: String,
    position: i64,
    name: String,
    description: Option<String>,
    status: String,
    assignee_id: Option<String>,
    due_date: Option<String>,
    blocked_reason: Option<String>,
    completed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SqliteStepRow> for WorkflowStep {
    type Error = DbError;

    fn try_from(row: SqliteStepRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<StepStatus>()
            .map_err(|_| DbError::Serialization(format!("Invalid step status: {}", row.status)))?;

        Ok(WorkflowStep {
            id: parse_uuid(&row.id)?,
            instance_id: parse_uuid(&row.instance_id)?,
            position: row.position,
            name: row.name,
            description: row.description,
            status,
            assignee_id: parse_opt_uuid(row.assignee_id.as_deref())?,
            due_date: parse_opt_ts(row.due_date.as_deref())?,
            blocked_reason: row.blocked_reason,
            completed_at: parse_opt_ts(row.completed_at.as_deref())?,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgStepRow {
    id: Uuid,
    instance_id: Uuid,
    position: i64,
    name: String,
    description: Option<String>,
    status: String,
    assignee_id: Option<Uuid>,
    due_date: Option<DateTime<Utc>>,
    blocked_reason: Option<String>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PgStepRow> for WorkflowStep {
    type Error = DbError;

    fn try_from(row: PgStepRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<StepStatus>()
            .map_err(|_| DbError::Serialization(format!("Invalid step status: {}", row.status)))?;

        Ok(WorkflowStep {
            id: row.id,
            instance_id: row.instance_id,
            position: row.position,
            name: row.name,
            description: row.description,
            status,
            assignee_id: row.assignee_id,
            due_date: row.due_date,
            blocked_reason: row.blocked_reason,
            completed_at: row.completed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthorizationContext, Role, User};
    use crate::db::{create_organization_repository, create_pool, run_migrations, DbPool};
    use crate::tenant::Organization;
    use crate::workflow::{TemplateStep, WorkflowEngine};

    async fn setup() -> (DbPool, Uuid) {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let org = Organization::new("test-org", "Test").unwrap();
        create_organization_repository(&pool)
            .create(&org)
            .await
            .unwrap();
        (pool, org.id)
    }

    fn template(org_id: Uuid) -> WorkflowTemplate {
        WorkflowTemplate::new(
            org_id,
            "Onboarding",
            WorkflowKind::Onboarding,
            vec![
                TemplateStep {
                    name: "Accounts".to_string(),
                    description: None,
                    due_in_days: Some(1),
                },
                TemplateStep {
                    name: "Laptop".to_string(),
                    description: None,
                    due_in_days: Some(3),
                },
            ],
        )
    }

    #[tokio::test]
    async fn test_template_round_trip() {
        let (pool, org_id) = setup().await;
        let repo = create_workflow_repository(&pool);

        let template = template(org_id);
        repo.create_template(&template).await.unwrap();

        let fetched = repo
            .get_template(org_id, template.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.steps.len(), 2);
        assert_eq!(fetched.kind, WorkflowKind::Onboarding);
        assert_eq!(fetched.steps[1].name, "Laptop");
    }

    #[tokio::test]
    async fn test_instance_with_steps_round_trip() {
        let (pool, org_id) = setup().await;
        let repo = create_workflow_repository(&pool);
        let engine = WorkflowEngine::new();

        let template = template(org_id);
        repo.create_template(&template).await.unwrap();

        let (instance, steps) = engine
            .instantiate(&template, None, Uuid::new_v4(), None, Utc::now())
            .unwrap();
        repo.create_instance(&instance, &steps).await.unwrap();

        let fetched_steps = repo.list_steps(instance.id).await.unwrap();
        assert_eq!(fetched_steps.len(), 2);
        assert_eq!(fetched_steps[0].position, 0);
        assert_eq!(fetched_steps[0].status, StepStatus::Pending);

        let filter = InstanceFilter {
            organization_id: Some(org_id),
            status: Some(InstanceStatus::Pending),
            ..Default::default()
        };
        assert_eq!(repo.count_instances(&filter).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_transition_persists() {
        let (pool, org_id) = setup().await;
        let repo = create_workflow_repository(&pool);
        let engine = WorkflowEngine::new();

        let template = template(org_id);
        repo.create_template(&template).await.unwrap();
        let (mut instance, mut steps) = engine
            .instantiate(&template, None, Uuid::new_v4(), None, Utc::now())
            .unwrap();
        repo.create_instance(&instance, &steps).await.unwrap();

        let user = User::new(org_id, "m@example.com", "mgr", "h", Role::Manager);
        let auth = AuthorizationContext::from_user(&user);

        engine
            .transition_instance(&mut instance, &steps, InstanceStatus::InProgress, &auth)
            .unwrap();
        repo.save_instance(&instance).await.unwrap();

        let step_id = steps[0].id;
        engine
            .transition_step(&mut instance, &mut steps, step_id, StepStatus::InProgress, None, &auth)
            .unwrap();
        repo.save_step(&steps[0]).await.unwrap();

        let fetched = repo.list_steps(instance.id).await.unwrap();
        assert_eq!(fetched[0].status, StepStatus::InProgress);

        let fetched_instance = repo.get_instance(org_id, instance.id).await.unwrap().unwrap();
        assert_eq!(fetched_instance.status, InstanceStatus::InProgress);
        assert!(fetched_instance.started_at.is_some());
    }
}
