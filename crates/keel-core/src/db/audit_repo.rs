//! Audit log repository.

use super::convert::{parse_opt_uuid, parse_ts, parse_uuid};
use super::{DbError, DbPool, Pagination};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted audit entry describing one mutating operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique identifier.
    pub id: Uuid,
    /// Organization scope.
    pub organization_id: Uuid,
    /// Actor identity (`<id>:<name>`).
    pub actor: String,
    /// Action name (e.g., "asset.assign", "workflow.step.transition").
    pub action: String,
    /// Kind of entity acted on.
    pub entity_type: String,
    /// Entity id, when applicable.
    pub entity_id: Option<Uuid>,
    /// Structured detail payload.
    pub details: Option<serde_json::Value>,
    /// When the action happened.
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Creates an audit entry.
    pub fn new(
        organization_id: Uuid,
        actor: impl Into<String>,
        action: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            organization_id,
            actor: actor.into(),
            action: action.into(),
            entity_type: entity_type.into(),
            entity_id,
            details: None,
            created_at: Utc::now(),
        }
    }

    /// Attaches a detail payload.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Filter criteria for audit queries.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    /// Organization scope (required in practice).
    pub organization_id: Option<Uuid>,
    /// Filter by entity type.
    pub entity_type: Option<String>,
    /// Filter by entity id.
    pub entity_id: Option<Uuid>,
    /// Filter by minimum created_at timestamp.
    pub since: Option<DateTime<Utc>>,
}

/// Repository trait for audit persistence.
#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Appends an entry.
    async fn record(&self, entry: &AuditEntry) -> Result<AuditEntry, DbError>;

    /// Lists entries matching the filter, newest first.
    async fn list(
        &self,
        filter: &AuditFilter,
        pagination: &Pagination,
    ) -> Result<Vec<AuditEntry>, DbError>;
}

const COLUMNS: &str =
    "id, organization_id, actor, action, entity_type, entity_id, details, created_at";

/// SQLite implementation of AuditRepository.
pub struct SqliteAuditRepository {
    pool: sqlx::SqlitePool,
}

impl SqliteAuditRepository {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditRepository for SqliteAuditRepository {
    async fn record(&self, entry: &AuditEntry) -> Result<AuditEntry, DbError> {
        sqlx::query(
            "INSERT INTO audit_log (id, organization_id, actor, action, entity_type, entity_id, details, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.id.to_string())
        .bind(entry.organization_id.to_string())
        .bind(&entry.actor)
        .bind(&entry.action)
        .bind(&entry.entity_type)
        .bind(entry.entity_id.map(|u| u.to_string()))
        .bind(
            entry
                .details
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(entry.clone())
    }

    async fn list(
        &self,
        filter: &AuditFilter,
        pagination: &Pagination,
    ) -> Result<Vec<AuditEntry>, DbError> {
        let mut query = format!("SELECT {} FROM audit_log WHERE 1=1", COLUMNS);
        let mut params: Vec<String> = Vec::new();

        if let Some(org_id) = filter.organization_id {
            query.push_str(" AND organization_id = ?");
            params.push(org_id.to_string());
        }
        if let Some(entity_type) = &filter.entity_type {
            query.push_str(" AND entity_type = ?");
            params.push(entity_type.clone());
        }
        if let Some(entity_id) = filter.entity_id {
            query.push_str(" AND entity_id = ?");
            params.push(entity_id.to_string());
        }
        if let Some(since) = &filter.since {
            query.push_str(" AND created_at >= ?");
            params.push(since.to_rfc3339());
        }

        query.push_str(" ORDER BY created_at DESC LIMIT ? OFFSET ?");

        let mut sqlx_query = sqlx::query_as::<_, SqliteAuditRow>(&query);
        for param in params {
            sqlx_query = sqlx_query.bind(param);
        }
        sqlx_query = sqlx_query
            .bind(pagination.limit() as i64)
            .bind(pagination.offset() as i64);

        let rows: Vec<SqliteAuditRow> = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

/// PostgreSQL implementation of AuditRepository.
pub struct PgAuditRepository {
    pool: sqlx::PgPool,
}

impl PgAuditRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditRepository for PgAuditRepository {
    async fn record(&self, entry: &AuditEntry) -> Result<AuditEntry, DbError> {
        sqlx::query(
            "INSERT INTO audit_log (id, organization_id, actor, action, entity_type, entity_id, details, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(entry.id)
        .bind(entry.organization_id)
        .bind(&entry.actor)
        .bind(&entry.action)
        .bind(&entry.entity_type)
        .bind(entry.entity_id)
        .bind(&entry.details)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(entry.clone())
    }

    async fn list(
        &self,
        filter: &AuditFilter,
        pagination: &Pagination,
    ) -> Result<Vec<AuditEntry>, DbError> {
        let rows: Vec<PgAuditRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM audit_log
            WHERE ($1::uuid IS NULL OR organization_id = $1)
              AND ($2::text IS NULL OR entity_type = $2)
              AND ($3::uuid IS NULL OR entity_id = $3)
              AND ($4::timestamptz IS NULL OR created_at >= $4)
            ORDER BY created_at DESC
            LIMIT $5 OFFSET $6
            "#,
            COLUMNS
        ))
        .bind(filter.organization_id)
        .bind(&filter.entity_type)
        .bind(filter.entity_id)
        .bind(filter.since)
        .bind(pagination.limit() as i64)
        .bind(pagination.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

/// Factory selecting the implementation for the pool's backend.
pub fn create_audit_repository(pool: &DbPool) -> Box<dyn AuditRepository> {
    match pool {
        DbPool::Sqlite(pool) => Box::new(SqliteAuditRepository::new(pool.clone())),
        DbPool::Postgres(pool) => Box::new(PgAuditRepository::new(pool.clone())),
    }
}

#[derive(sqlx::FromRow)]
struct SqliteAuditRow {
    id: String,
    organization_id: String,
    actor: String,
    action: String,
    entity_type: String,
    entity_id: Option<String>,
    details: Option<String>,
    created_at: String,
}

impl TryFrom<SqliteAuditRow> for AuditEntry {
    type Error = DbError;

    fn try_from(row: SqliteAuditRow) -> Result<Self, Self::Error> {
        Ok(AuditEntry {
            id: parse_uuid(&row.id)?,
            organization_id: parse_uuid(&row.organization_id)?,
            actor: row.actor,
            action: row.action,
            entity_type: row.entity_type,
            entity_id: parse_opt_uuid(row.entity_id.as_deref())?,
            details: row
                .details
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgAuditRow {
    id: Uuid,
    organization_id: Uuid,
    actor: String,
    action: String,
    entity_type: String,
    entity_id: Option<Uuid>,
    details: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl TryFrom<PgAuditRow> for AuditEntry {
    type Error = DbError;

    fn try_from(row: PgAuditRow) -> Result<Self, Self::Error> {
        Ok(AuditEntry {
            id: row.id,
            organization_id: row.organization_id,
            actor: row.actor,
            action: row.action,
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            details: row.details,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_organization_repository, create_pool, run_migrations};
    use crate::tenant::Organization;

    #[tokio::test]
    async fn test_record_and_filter() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let org = Organization::new("test-org", "Test").unwrap();
        create_organization_repository(&pool)
            .create(&org)
            .await
            .unwrap();

        let repo = create_audit_repository(&pool);
        let asset_id = Uuid::new_v4();

        repo.record(
            &AuditEntry::new(org.id, "admin:it", "asset.assign", "asset", Some(asset_id))
                .with_details(serde_json::json!({"person": "ada"})),
        )
        .await
        .unwrap();
        repo.record(&AuditEntry::new(
            org.id,
            "admin:hr",
            "person.create",
            "person",
            None,
        ))
        .await
        .unwrap();

        let all = repo
            .list(
                &AuditFilter {
                    organization_id: Some(org.id),
                    ..Default::default()
                },
                &Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let assets_only = repo
            .list(
                &AuditFilter {
                    organization_id: Some(org.id),
                    entity_type: Some("asset".to_string()),
                    ..Default::default()
                },
                &Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(assets_only.len(), 1);
        assert_eq!(assets_only[0].action, "asset.assign");
        assert_eq!(assets_only[0].entity_id, Some(asset_id));
        assert!(assets_only[0].details.is_some());
    }
}
