//! Document repository: documents, versions, rollouts, and
//! acknowledgments.

use super::convert::{parse_opt_ts, parse_opt_uuid, parse_ts, parse_uuid};
use super::{DbError, DbPool, Pagination};
use crate::models::{
    Acknowledgment, Document, DocumentStatus, DocumentType, DocumentVersion, Rollout,
    RolloutStatus, RolloutTarget,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Acknowledgment progress for a rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckProgress {
    /// People targeted by the rollout.
    pub total: u64,
    /// People who have acknowledged.
    pub acknowledged: u64,
}

impl AckProgress {
    /// True once everyone has acknowledged.
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.acknowledged == self.total
    }
}

/// Outcome of an acknowledge call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The acknowledgment was recorded.
    Recorded,
    /// The person had already acknowledged.
    AlreadyAcknowledged,
    /// The person is not part of this rollout.
    NotTargeted,
}

/// Repository trait for document persistence.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    // Documents
    async fn create_document(&self, document: &Document) -> Result<Document, DbError>;
    async fn get_document(&self, organization_id: Uuid, id: Uuid)
        -> Result<Option<Document>, DbError>;
    async fn list_documents(
        &self,
        organization_id: Uuid,
        status: Option<DocumentStatus>,
        pagination: &Pagination,
    ) -> Result<Vec<Document>, DbError>;
    async fn count_documents(
        &self,
        organization_id: Uuid,
        status: Option<DocumentStatus>,
    ) -> Result<u64, DbError>;
    async fn save_document(&self, document: &Document) -> Result<Document, DbError>;
    async fn delete_document(&self, organization_id: Uuid, id: Uuid) -> Result<bool, DbError>;

    // Versions
    async fn create_version(&self, version: &DocumentVersion)
        -> Result<DocumentVersion, DbError>;
    async fn list_versions(&self, document_id: Uuid) -> Result<Vec<DocumentVersion>, DbError>;
    async fn get_version(
        &self,
        document_id: Uuid,
        version: i64,
    ) -> Result<Option<DocumentVersion>, DbError>;
    async fn latest_version_number(&self, document_id: Uuid) -> Result<Option<i64>, DbError>;

    // Rollouts
    async fn create_rollout(&self, rollout: &Rollout) -> Result<Rollout, DbError>;
    async fn get_rollout(&self, organization_id: Uuid, id: Uuid)
        -> Result<Option<Rollout>, DbError>;
    async fn list_rollouts(&self, organization_id: Uuid) -> Result<Vec<Rollout>, DbError>;
    async fn save_rollout(&self, rollout: &Rollout) -> Result<Rollout, DbError>;

    // Acknowledgments
    async fn create_acknowledgments(&self, acks: &[Acknowledgment]) -> Result<u64, DbError>;
    async fn list_acknowledgments(&self, rollout_id: Uuid)
        -> Result<Vec<Acknowledgment>, DbError>;
    async fn acknowledge(&self, rollout_id: Uuid, person_id: Uuid)
        -> Result<AckOutcome, DbError>;
    async fn ack_progress(&self, rollout_id: Uuid) -> Result<AckProgress, DbError>;
}

const DOCUMENT_COLUMNS: &str = "id, organization_id, title, doc_type, status, owner_id, current_version, created_at, updated_at";
const VERSION_COLUMNS: &str = "id, document_id, version, body, created_by, created_at";
const ROLLOUT_COLUMNS: &str = "id, organization_id, document_id, version, name, target, due_date, status, created_by, created_at, updated_at";
const ACK_COLUMNS: &str = "id, rollout_id, person_id, acknowledged_at, created_at";

/// SQLite implementation of DocumentRepository.
pub struct SqliteDocumentRepository {
    pool: sqlx::SqlitePool,
}

impl SqliteDocumentRepository {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentRepository for SqliteDocumentRepository {
    async fn create_document(&self, document: &Document) -> Result<Document, DbError> {
        sqlx::query(
            "INSERT INTO documents (id, organization_id, title, doc_type, status, owner_id, current_version, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(document.id.to_string())
        .bind(document.organization_id.to_string())
        .bind(&document.title)
        .bind(document.doc_type.as_db_str())
        .bind(document.status.as_str())
        .bind(document.owner_id.map(|u| u.to_string()))
        .bind(document.current_version)
        .bind(document.created_at.to_rfc3339())
        .bind(document.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(document.clone())
    }

    async fn get_document(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Document>, DbError> {
        let row: Option<SqliteDocumentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM documents WHERE id = ? AND organization_id = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(id.to_string())
        .bind(organization_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_documents(
        &self,
        organization_id: Uuid,
        status: Option<DocumentStatus>,
        pagination: &Pagination,
    ) -> Result<Vec<Document>, DbError> {
        let mut query = format!(
            "SELECT {} FROM documents WHERE organization_id = ?",
            DOCUMENT_COLUMNS
        );
        if status.is_some() {
            query.push_str(" AND status = ?");
        }
        query.push_str(" ORDER BY title ASC LIMIT ? OFFSET ?");

        let mut sqlx_query =
            sqlx::query_as::<_, SqliteDocumentRow>(&query).bind(organization_id.to_string());
        if let Some(status) = status {
            sqlx_query = sqlx_query.bind(status.as_str());
        }
        sqlx_query = sqlx_query
            .bind(pagination.limit() as i64)
            .bind(pagination.offset() as i64);

        let rows: Vec<SqliteDocumentRow> = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn count_documents(
        &self,
        organization_id: Uuid,
        status: Option<DocumentStatus>,
    ) -> Result<u64, DbError> {
        let mut query = String::from("SELECT COUNT(*) FROM documents WHERE organization_id = ?");
        if status.is_some() {
            query.push_str(" AND status = ?");
        }

        let mut sqlx_query = sqlx::query_scalar::<_, i64>(&query).bind(organization_id.to_string());
        if let Some(status) = status {
            sqlx_query = sqlx_query.bind(status.as_str());
        }

        let count: i64 = sqlx_query.fetch_one(&self.pool).await?;
        Ok(count as u64)
    }

    async fn save_document(&self, document: &Document) -> Result<Document, DbError> {
        let result = sqlx::query(
            "UPDATE documents SET title = ?, doc_type = ?, status = ?, owner_id = ?, current_version = ?, updated_at = ? WHERE id = ? AND organization_id = ?",
        )
        .bind(&document.title)
        .bind(document.doc_type.as_db_str())
        .bind(document.status.as_str())
        .bind(document.owner_id.map(|u| u.to_string()))
        .bind(document.current_version)
        .bind(Utc::now().to_rfc3339())
        .bind(document.id.to_string())
        .bind(document.organization_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Document", document.id));
        }

        Ok(document.clone())
    }

    async fn delete_document(&self, organization_id: Uuid, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ? AND organization_id = ?")
            .bind(id.to_string())
            .bind(organization_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_version(
        &self,
        version: &DocumentVersion,
    ) -> Result<DocumentVersion, DbError> {
        sqlx::query(
            "INSERT INTO document_versions (id, document_id, version, body, created_by, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(version.id.to_string())
        .bind(version.document_id.to_string())
        .bind(version.version)
        .bind(&version.body)
        .bind(&version.created_by)
        .bind(version.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(version.clone())
    }

    async fn list_versions(&self, document_id: Uuid) -> Result<Vec<DocumentVersion>, DbError> {
        let rows: Vec<SqliteVersionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM document_versions WHERE document_id = ? ORDER BY version DESC",
            VERSION_COLUMNS
        ))
        .bind(document_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn get_version(
        &self,
        document_id: Uuid,
        version: i64,
    ) -> Result<Option<DocumentVersion>, DbError> {
        let row: Option<SqliteVersionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM document_versions WHERE document_id = ? AND version = ?",
            VERSION_COLUMNS
        ))
        .bind(document_id.to_string())
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn latest_version_number(&self, document_id: Uuid) -> Result<Option<i64>, DbError> {
        let max: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM document_versions WHERE document_id = ?")
                .bind(document_id.to_string())
                .fetch_one(&self.pool)
                .await?;
        Ok(max)
    }

    async fn create_rollout(&self, rollout: &Rollout) -> Result<Rollout, DbError> {
        sqlx::query(
            "INSERT INTO rollouts (id, organization_id, document_id, version, name, target, due_date, status, created_by, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(rollout.id.to_string())
        .bind(rollout.organization_id.to_string())
        .bind(rollout.document_id.to_string())
        .bind(rollout.version)
        .bind(&rollout.name)
        .bind(serde_json::to_string(&rollout.target)?)
        .bind(rollout.due_date.map(|t| t.to_rfc3339()))
        .bind(rollout.status.as_str())
        .bind(&rollout.created_by)
        .bind(rollout.created_at.to_rfc3339())
        .bind(rollout.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(rollout.clone())
    }

    async fn get_rollout(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Rollout>, DbError> {
        let row: Option<SqliteRolloutRow> = sqlx::query_as(&format!(
            "SELECT {} FROM rollouts WHERE id = ? AND organization_id = ?",
            ROLLOUT_COLUMNS
        ))
        .bind(id.to_string())
        .bind(organization_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_rollouts(&self, organization_id: Uuid) -> Result<Vec<Rollout>, DbError> {
        let rows: Vec<SqliteRolloutRow> = sqlx::query_as(&format!(
            "SELECT {} FROM rollouts WHERE organization_id = ? ORDER BY created_at DESC",
            ROLLOUT_COLUMNS
        ))
        .bind(organization_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_rollout(&self, rollout: &Rollout) -> Result<Rollout, DbError> {
        let result = sqlx::query(
            "UPDATE rollouts SET name = ?, due_date = ?, status = ?, updated_at = ? WHERE id = ? AND organization_id = ?",
        )
        .bind(&rollout.name)
        .bind(rollout.due_date.map(|t| t.to_rfc3339()))
        .bind(rollout.status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(rollout.id.to_string())
        .bind(rollout.organization_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Rollout", rollout.id));
        }

        Ok(rollout.clone())
    }

    async fn create_acknowledgments(&self, acks: &[Acknowledgment]) -> Result<u64, DbError> {
        let mut created = 0u64;
        for ack in acks {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO acknowledgments (id, rollout_id, person_id, acknowledged_at, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(ack.id.to_string())
            .bind(ack.rollout_id.to_string())
            .bind(ack.person_id.to_string())
            .bind(ack.acknowledged_at.map(|t| t.to_rfc3339()))
            .bind(ack.created_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
            created += result.rows_affected();
        }
        Ok(created)
    }

    async fn list_acknowledgments(
        &self,
        rollout_id: Uuid,
    ) -> Result<Vec<Acknowledgment>, DbError> {
        let rows: Vec<SqliteAckRow> = sqlx::query_as(&format!(
            "SELECT {} FROM acknowledgments WHERE rollout_id = ? ORDER BY created_at ASC",
            ACK_COLUMNS
        ))
        .bind(rollout_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn acknowledge(
        &self,
        rollout_id: Uuid,
        person_id: Uuid,
    ) -> Result<AckOutcome, DbError> {
        let result = sqlx::query(
            "UPDATE acknowledgments SET acknowledged_at = ? WHERE rollout_id = ? AND person_id = ? AND acknowledged_at IS NULL",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(rollout_id.to_string())
        .bind(person_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(AckOutcome::Recorded);
        }

        let exists: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM acknowledgments WHERE rollout_id = ? AND person_id = ?",
        )
        .bind(rollout_id.to_string())
        .bind(person_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        if exists > 0 {
            Ok(AckOutcome::AlreadyAcknowledged)
        } else {
            Ok(AckOutcome::NotTargeted)
        }
    }

    async fn ack_progress(&self, rollout_id: Uuid) -> Result<AckProgress, DbError> {
        let (total, acknowledged): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(acknowledged_at) FROM acknowledgments WHERE rollout_id = ?",
        )
        .bind(rollout_id.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(AckProgress {
            total: total as u64,
            acknowledged: acknowledged as u64,
        })
    }
}

/// PostgreSQL implementation of DocumentRepository.
pub struct PgDocumentRepository {
    pool: sqlx::PgPool,
}

impl PgDocumentRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DocumentRepository for PgDocumentRepository {
    async fn create_document(&self, document: &Document) -> Result<Document, DbError> {
        sqlx::query(
            "INSERT INTO documents (id, organization_id, title, doc_type, status, owner_id, current_version, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(document.id)
        .bind(document.organization_id)
        .bind(&document.title)
        .bind(document.doc_type.as_db_str())
        .bind(document.status.as_str())
        .bind(document.owner_id)
        .bind(document.current_version)
        .bind(document.created_at)
        .bind(document.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(document.clone())
    }

    async fn get_document(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Document>, DbError> {
        let row: Option<PgDocumentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM documents WHERE id = $1 AND organization_id = $2",
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_documents(
        &self,
        organization_id: Uuid,
        status: Option<DocumentStatus>,
        pagination: &Pagination,
    ) -> Result<Vec<Document>, DbError> {
        let rows: Vec<PgDocumentRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM documents
            WHERE organization_id = $1 AND ($2::text IS NULL OR status = $2)
            ORDER BY title ASC
            LIMIT $3 OFFSET $4
            "#,
            DOCUMENT_COLUMNS
        ))
        .bind(organization_id)
        .bind(status.map(|s| s.as_str()))
        .bind(pagination.limit() as i64)
        .bind(pagination.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn count_documents(
        &self,
        organization_id: Uuid,
        status: Option<DocumentStatus>,
    ) -> Result<u64, DbError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM documents WHERE organization_id = $1 AND ($2::text IS NULL OR status = $2)",
        )
        .bind(organization_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_one(&self.pool)
        .await?;

        Ok(count as u64)
    }

    async fn save_document(&self, document: &Document) -> Result<Document, DbError> {
        let result = sqlx::query(
            "UPDATE documents SET title = $1, doc_type = $2, status = $3, owner_id = $4, current_version = $5, updated_at = NOW() WHERE id = $6 AND organization_id = $7",
        )
        .bind(&document.title)
        .bind(document.doc_type.as_db_str())
        .bind(document.status.as_str())
        .bind(document.owner_id)
        .bind(document.current_version)
        .bind(document.id)
        .bind(document.organization_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Document", document.id));
        }

        Ok(document.clone())
    }

    async fn delete_document(&self, organization_id: Uuid, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM documents WHERE id = $1 AND organization_id = $2")
            .bind(id)
            .bind(organization_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_version(
        &self,
        version: &DocumentVersion,
    ) -> Result<DocumentVersion, DbError> {
        sqlx::query(
            "INSERT INTO document_versions (id, document_id, version, body, created_by, created_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(version.id)
        .bind(version.document_id)
        .bind(version.version)
        .bind(&version.body)
        .bind(&version.created_by)
        .bind(version.created_at)
        .execute(&self.pool)
        .await?;

        Ok(version.clone())
    }

    async fn list_versions(&self, document_id: Uuid) -> Result<Vec<DocumentVersion>, DbError> {
        let rows: Vec<PgVersionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM document_versions WHERE document_id = $1 ORDER BY version DESC",
            VERSION_COLUMNS
        ))
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn get_version(
        &self,
        document_id: Uuid,
        version: i64,
    ) -> Result<Option<DocumentVersion>, DbError> {
        let row: Option<PgVersionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM document_versions WHERE document_id = $1 AND version = $2",
            VERSION_COLUMNS
        ))
        .bind(document_id)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn latest_version_number(&self, document_id: Uuid) -> Result<Option<i64>, DbError> {
        let max: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(version) FROM document_versions WHERE document_id = $1",
        )
        .bind(document_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(max)
    }

    async fn create_rollout(&self, rollout: &Rollout) -> Result<Rollout, DbError> {
        sqlx::query(
            "INSERT INTO rollouts (id, organization_id, document_id, version, name, target, due_date, status, created_by, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(rollout.id)
        .bind(rollout.organization_id)
        .bind(rollout.document_id)
        .bind(rollout.version)
        .bind(&rollout.name)
        .bind(serde_json::to_value(&rollout.target)?)
        .bind(rollout.due_date)
        .bind(rollout.status.as_str())
        .bind(&rollout.created_by)
        .bind(rollout.created_at)
        .bind(rollout.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(rollout.clone())
    }

    async fn get_rollout(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Rollout>, DbError> {
        let row: Option<PgRolloutRow> = sqlx::query_as(&format!(
            "SELECT {} FROM rollouts WHERE id = $1 AND organization_id = $2",
            ROLLOUT_COLUMNS
        ))
        .bind(id)
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_rollouts(&self, organization_id: Uuid) -> Result<Vec<Rollout>, DbError> {
        let rows: Vec<PgRolloutRow> = sqlx::query_as(&format!(
            "SELECT {} FROM rollouts WHERE organization_id = $1 ORDER BY created_at DESC",
            ROLLOUT_COLUMNS
        ))
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_rollout(&self, rollout: &Rollout) -> Result<Rollout, DbError> {
        let result = sqlx::query(
            "UPDATE rollouts SET name = $1, due_date = $2, status = $3, updated_at = NOW() WHERE id = $4 AND organization_id = $5",
        )
        .bind(&rollout.name)
        .bind(rollout.due_date)
        .bind(rollout.status.as_str())
        .bind(rollout.id)
        .bind(rollout.organization_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Rollout", rollout.id));
        }

        Ok(rollout.clone())
    }

    async fn create_acknowledgments(&self, acks: &[Acknowledgment]) -> Result<u64, DbError> {
        let mut created = 0u64;
        for ack in acks {
            let result = sqlx::query(
                "INSERT INTO acknowledgments (id, rollout_id, person_id, acknowledged_at, created_at) VALUES ($1, $2, $3, $4, $5) ON CONFLICT (rollout_id, person_id) DO NOTHING",
            )
            .bind(ack.id)
            .bind(ack.rollout_id)
            .bind(ack.person_id)
            .bind(ack.acknowledged_at)
            .bind(ack.created_at)
            .execute(&self.pool)
            .await?;
            created += result.rows_affected();
        }
        Ok(created)
    }

    async fn list_acknowledgments(
        &self,
        rollout_id: Uuid,
    ) -> Result<Vec<Acknowledgment>, DbError> {
        let rows: Vec<PgAckRow> = sqlx::query_as(&format!(
            "SELECT {} FROM acknowledgments WHERE rollout_id = $1 ORDER BY created_at ASC",
            ACK_COLUMNS
        ))
        .bind(rollout_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn acknowledge(
        &self,
        rollout_id: Uuid,
        person_id: Uuid,
    ) -> Result<AckOutcome, DbError> {
        let result = sqlx::query(
            "UPDATE acknowledgments SET acknowledged_at = NOW() WHERE rollout_id = $1 AND person_id = $2 AND acknowledged_at IS NULL",
        )
        .bind(rollout_id)
        .bind(person_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(AckOutcome::Recorded);
        }

        let exists: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM acknowledgments WHERE rollout_id = $1 AND person_id = $2",
        )
        .bind(rollout_id)
        .bind(person_id)
        .fetch_one(&self.pool)
        .await?;

        if exists > 0 {
            Ok(AckOutcome::AlreadyAcknowledged)
        } else {
            Ok(AckOutcome::NotTargeted)
        }
    }

    async fn ack_progress(&self, rollout_id: Uuid) -> Result<AckProgress, DbError> {
        let (total, acknowledged): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(acknowledged_at) FROM acknowledgments WHERE rollout_id = $1",
        )
        .bind(rollout_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(AckProgress {
            total: total as u64,
            acknowledged: acknowledged as u64,
        })
    }
}

/// Factory selecting the implementation for the pool's backend.
pub fn create_document_repository(pool: &DbPool) -> Box<dyn DocumentRepository> {
    match pool {
        DbPool::Sqlite(pool) => Box::new(SqliteDocumentRepository::new(pool.clone())),
        DbPool::Postgres(pool) => Box::new(PgDocumentRepository::new(pool.clone())),
    }
}

// Row types

#[derive(sqlx::FromRow)]
struct SqliteDocumentRow {
    id: String,
    organization_id: String,
    title: String,
    doc_type: String,
    status: String,
    owner_id: Option<String>,
    current_version: Option<i64>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SqliteDocumentRow> for Document {
    type Error = DbError;

    fn try_from(row: SqliteDocumentRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<DocumentStatus>().map_err(|_| {
            DbError::Serialization(format!("Invalid document status: {}", row.status))
        })?;

        Ok(Document {
            id: parse_uuid(&row.id)?,
            organization_id: parse_uuid(&row.organization_id)?,
            title: row.title,
            doc_type: DocumentType::parse(&row.doc_type),
            status,
            owner_id: parse_opt_uuid(row.owner_id.as_deref())?,
            current_version: row.current_version,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgDocumentRow {
    id: Uuid,
    organization_id: Uuid,
    title: String,
    doc_type: String,
    status: String,
    owner_id: Option<Uuid>,
    current_version: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PgDocumentRow> for Document {
    type Error = DbError;

    fn try_from(row: PgDocumentRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<DocumentStatus>().map_err(|_| {
            DbError::Serialization(format!("Invalid document status: {}", row.status))
        })?;

        Ok(Document {
            id: row.id,
            organization_id: row.organization_id,
            title: row.title,
            doc_type: DocumentType::parse(&row.doc_type),
            status,
            owner_id: row.owner_id,
            current_version: row.current_version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SqliteVersionRow {
    id: String,
    document_id: String,
    version: i64,
    body: String,
    created_by: String,
    created_at: String,
}

impl TryFrom<SqliteVersionRow> for DocumentVersion {
    type Error = DbError;

    fn try_from(row: SqliteVersionRow) -> Result<Self, Self::Error> {
        Ok(DocumentVersion {
            id: parse_uuid(&row.id)?,
            document_id: parse_uuid(&row.document_id)?,
            version: row.version,
            body: row.body,
            created_by: row.created_by,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgVersionRow {
    id: Uuid,
    document_id: Uuid,
    version: i64,
    body: String,
    created_by: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<PgVersionRow> for DocumentVersion {
    type Error = DbError;

    fn try_from(row: PgVersionRow) -> Result<Self, Self::Error> {
        Ok(DocumentVersion {
            id: row.id,
            document_id: row.document_id,
            version: row.version,
            body: row.body,
            created_by: row.created_by,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SqliteRolloutRow {
    id: String,
    organization_id: String,
    document_id: String,
    version: i64,
    name: String,
    target: String,
    due_date: Option<String>,
    status: String,
    created_by: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SqliteRolloutRow> for Rollout {
    type Error = DbError;

    fn try_from(row: SqliteRolloutRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<RolloutStatus>().map_err(|_| {
            DbError::Serialization(format!("Invalid rollout status: {}", row.status))
        })?;
        let target: RolloutTarget = serde_json::from_str(&row.target)?;

        Ok(Rollout {
            id: parse_uuid(&row.id)?,
            organization_id: parse_uuid(&row.organization_id)?,
            document_id: parse_uuid(&row.document_id)?,
            version: row.version,
            name: row.name,
            target,
            due_date: parse_opt_ts(row.due_date.as_deref())?,
            status,
            created_by: row.created_by,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgRolloutRow {
    id: Uuid,
    organization_id: Uuid,
    document_id: Uuid,
    version: i64,
    name: String,
    target: serde_json::Value,
    due_date: Option<DateTime<Utc>>,
    status: String,
    created_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PgRolloutRow> for Rollout {
    type Error = DbError;

    fn try_from(row: PgRolloutRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<RolloutStatus>().map_err(|_| {
            DbError::Serialization(format!("Invalid rollout status: {}", row.status))
        })?;
        let target: RolloutTarget = serde_json::from_value(row.target)?;

        Ok(Rollout {
            id: row.id,
            organization_id: row.organization_id,
            document_id: row.document_id,
            version: row.version,
            name: row.name,
            target,
            due_date: row.due_date,
            status,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SqliteAckRow {
    id: String,
    rollout_id: String,
    person_id: String,
    acknowledged_at: Option<String>,
    created_at: String,
}

impl TryFrom<SqliteAckRow> for Acknowledgment {
    type Error = DbError;

    fn try_from(row: SqliteAckRow) -> Result<Self, Self::Error> {
        Ok(Acknowledgment {
            id: parse_uuid(&row.id)?,
            rollout_id: parse_uuid(&row.rollout_id)?,
            person_id: parse_uuid(&row.person_id)?,
            acknowledged_at: parse_opt_ts(row.acknowledged_at.as_deref())?,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgAckRow {
    id: Uuid,
    rollout_id: Uuid,
    person_id: Uuid,
    acknowledged_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<PgAckRow> for Acknowledgment {
    type Error = DbError;

    fn try_from(row: PgAckRow) -> Result<Self, Self::Error> {
        Ok(Acknowledgment {
            id: row.id,
            rollout_id: row.rollout_id,
            person_id: row.person_id,
            acknowledged_at: row.acknowledged_at,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_organization_repository, create_pool, run_migrations, DbPool};
    use crate::tenant::Organization;

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

    #[tokio::test]
    async fn test_document_versioning() {
        let (pool, org_id) = setup().await;
        let repo = create_document_repository(&pool);

        let mut doc = Document::new(org_id, "Security Policy", DocumentType::Policy);
        repo.create_document(&doc).await.unwrap();

        assert_eq!(repo.latest_version_number(doc.id).await.unwrap(), None);

        repo.create_version(&DocumentVersion::new(doc.id, 1, "v1 body", "admin:hr"))
            .await
            .unwrap();
        repo.create_version(&DocumentVersion::new(doc.id, 2, "v2 body", "admin:hr"))
            .await
            .unwrap();

        assert_eq!(repo.latest_version_number(doc.id).await.unwrap(), Some(2));

        // Duplicate version numbers rejected
        let dup = repo
            .create_version(&DocumentVersion::new(doc.id, 2, "again", "admin:hr"))
            .await;
        assert!(matches!(dup, Err(DbError::Constraint(_))));

        // Publish pins the version
        doc.status = DocumentStatus::Published;
        doc.current_version = Some(2);
        repo.save_document(&doc).await.unwrap();
        let fetched = repo.get_document(org_id, doc.id).await.unwrap().unwrap();
        assert_eq!(fetched.current_version, Some(2));
        assert_eq!(fetched.status, DocumentStatus::Published);
    }

    #[tokio::test]
    async fn test_rollout_and_acknowledgments() {
        let (pool, org_id) = setup().await;
        let repo = create_document_repository(&pool);

        let doc = Document::new(org_id, "Policy", DocumentType::Policy);
        repo.create_document(&doc).await.unwrap();

        let rollout = Rollout::new(
            org_id,
            doc.id,
            1,
            "2024 refresh",
            RolloutTarget::Organization,
            "admin:hr",
        );
        repo.create_rollout(&rollout).await.unwrap();

        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let created = repo
            .create_acknowledgments(&[
                Acknowledgment::new(rollout.id, alice),
                Acknowledgment::new(rollout.id, bob),
            ])
            .await
            .unwrap();
        assert_eq!(created, 2);

        // Re-fan-out is a no-op
        let again = repo
            .create_acknowledgments(&[Acknowledgment::new(rollout.id, alice)])
            .await
            .unwrap();
        assert_eq!(again, 0);

        assert_eq!(
            repo.acknowledge(rollout.id, alice).await.unwrap(),
            AckOutcome::Recorded
        );
        assert_eq!(
            repo.acknowledge(rollout.id, alice).await.unwrap(),
            AckOutcome::AlreadyAcknowledged
        );
        assert_eq!(
            repo.acknowledge(rollout.id, Uuid::new_v4()).await.unwrap(),
            AckOutcome::NotTargeted
        );

        let progress = repo.ack_progress(rollout.id).await.unwrap();
        assert_eq!(progress.total, 2);
        assert_eq!(progress.acknowledged, 1);
        assert!(!progress.is_complete());

        repo.acknowledge(rollout.id, bob).await.unwrap();
        assert!(repo.ack_progress(rollout.id).await.unwrap().is_complete());
    }
}
