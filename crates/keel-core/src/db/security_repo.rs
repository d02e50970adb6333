//! Security & compliance repository: frameworks, controls, SoA items,
//! risks, and evidence.

use super::convert::{parse_opt_ts, parse_opt_uuid, parse_ts, parse_uuid};
use super::{DbError, DbPool};
use crate::models::{
    Control, ControlStatus, Evidence, Framework, FrameworkKind, Risk, RiskStatus, SoaItem,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Repository trait for compliance persistence.
#[async_trait]
pub trait SecurityRepository: Send + Sync {
    // Frameworks
    async fn create_framework(&self, framework: &Framework) -> Result<Framework, DbError>;
    async fn get_framework(&self, organization_id: Uuid, id: Uuid)
        -> Result<Option<Framework>, DbError>;
    async fn list_frameworks(&self, organization_id: Uuid) -> Result<Vec<Framework>, DbError>;
    async fn save_framework(&self, framework: &Framework) -> Result<Framework, DbError>;
    async fn delete_framework(&self, organization_id: Uuid, id: Uuid) -> Result<bool, DbError>;

    // Controls
    async fn create_control(&self, control: &Control) -> Result<Control, DbError>;
    async fn get_control(&self, organization_id: Uuid, id: Uuid)
        -> Result<Option<Control>, DbError>;
    async fn list_controls(&self, framework_id: Uuid) -> Result<Vec<Control>, DbError>;
    async fn save_control(&self, control: &Control) -> Result<Control, DbError>;
    async fn delete_control(&self, organization_id: Uuid, id: Uuid) -> Result<bool, DbError>;

    // Statement of Applicability
    /// Inserts or updates the SoA entry for (framework, control).
    async fn upsert_soa_item(&self, item: &SoaItem) -> Result<SoaItem, DbError>;
    async fn list_soa_items(&self, framework_id: Uuid) -> Result<Vec<SoaItem>, DbError>;

    // Risks
    async fn create_risk(&self, risk: &Risk) -> Result<Risk, DbError>;
    async fn get_risk(&self, organization_id: Uuid, id: Uuid) -> Result<Option<Risk>, DbError>;
    async fn list_risks(
        &self,
        organization_id: Uuid,
        status: Option<RiskStatus>,
    ) -> Result<Vec<Risk>, DbError>;
    async fn save_risk(&self, risk: &Risk) -> Result<Risk, DbError>;
    async fn delete_risk(&self, organization_id: Uuid, id: Uuid) -> Result<bool, DbError>;

    // Evidence
    async fn create_evidence(&self, evidence: &Evidence) -> Result<Evidence, DbError>;
    async fn list_evidence(&self, control_id: Uuid) -> Result<Vec<Evidence>, DbError>;
    async fn delete_evidence(&self, organization_id: Uuid, id: Uuid) -> Result<bool, DbError>;
}

const FRAMEWORK_COLUMNS: &str =
    "id, organization_id, kind, name, version, description, created_at, updated_at";
const CONTROL_COLUMNS: &str = "id, organization_id, framework_id, code, title, description, status, owner_id, created_at, updated_at";
const SOA_COLUMNS: &str =
    "id, organization_id, framework_id, control_id, applicable, justification, created_at, updated_at";
const RISK_COLUMNS: &str = "id, organization_id, title, description, likelihood, impact, status, owner_id, created_at, updated_at";
const EVIDENCE_COLUMNS: &str =
    "id, organization_id, control_id, title, location, collected_at, valid_until, created_at";

/// SQLite implementation of SecurityRepository.
pub struct SqliteSecurityRepository {
    pool: sqlx::SqlitePool,
}

impl SqliteSecurityRepository {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SecurityRepository for SqliteSecurityRepository {
    async fn create_framework(&self, framework: &Framework) -> Result<Framework, DbError> {
        sqlx::query(
            "INSERT INTO frameworks (id, organization_id, kind, name, version, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(framework.id.to_string())
        .bind(framework.organization_id.to_string())
        .bind(framework.kind.as_db_str())
        .bind(&framework.name)
        .bind(&framework.version)
        .bind(&framework.description)
        .bind(framework.created_at.to_rfc3339())
        .bind(framework.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(framework.clone())
    }

    async fn get_framework(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Framework>, DbError> {
        let row: Option<SqliteFrameworkRow> = sqlx::query_as(&format!(
            "SELECT {} FROM frameworks WHERE id = ? AND organization_id = ?",
            FRAMEWORK_COLUMNS
        ))
        .bind(id.to_string())
        .bind(organization_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_frameworks(&self, organization_id: Uuid) -> Result<Vec<Framework>, DbError> {
        let rows: Vec<SqliteFrameworkRow> = sqlx::query_as(&format!(
            "SELECT {} FROM frameworks WHERE organization_id = ? ORDER BY name ASC",
            FRAMEWORK_COLUMNS
        ))
        .bind(organization_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_framework(&self, framework: &Framework) -> Result<Framework, DbError> {
        let result = sqlx::query(
            "UPDATE frameworks SET kind = ?, name = ?, version = ?, description = ?, updated_at = ? WHERE id = ? AND organization_id = ?",
        )
        .bind(framework.kind.as_db_str())
        .bind(&framework.name)
        .bind(&framework.version)
        .bind(&framework.description)
        .bind(Utc::now().to_rfc3339())
        .bind(framework.id.to_string())
        .bind(framework.organization_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Framework", framework.id));
        }

        Ok(framework.clone())
    }

    async fn delete_framework(&self, organization_id: Uuid, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM frameworks WHERE id = ? AND organization_id = ?")
            .bind(id.to_string())
            .bind(organization_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_control(&self, control: &Control) -> Result<Control, DbError> {
        sqlx::query(
            "INSERT INTO controls (id, organization_id, framework_id, code, title, description, status, owner_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(control.id.to_string())
        .bind(control.organization_id.to_string())
        .bind(control.framework_id.to_string())
        .bind(&control.code)
        .bind(&control.title)
        .bind(&control.description)
        .bind(control.status.as_str())
        .bind(control.owner_id.map(|u| u.to_string()))
        .bind(control.created_at.to_rfc3339())
        .bind(control.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(control.clone())
    }

    async fn get_control(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Control>, DbError> {
        let row: Option<SqliteControlRow> = sqlx::query_as(&format!(
            "SELECT {} FROM controls WHERE id = ? AND organization_id = ?",
            CONTROL_COLUMNS
        ))
        .bind(id.to_string())
        .bind(organization_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_controls(&self, framework_id: Uuid) -> Result<Vec<Control>, DbError> {
        let rows: Vec<SqliteControlRow> = sqlx::query_as(&format!(
            "SELECT {} FROM controls WHERE framework_id = ? ORDER BY code ASC",
            CONTROL_COLUMNS
        ))
        .bind(framework_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_control(&self, control: &Control) -> Result<Control, DbError> {
        let result = sqlx::query(
            "UPDATE controls SET code = ?, title = ?, description = ?, status = ?, owner_id = ?, updated_at = ? WHERE id = ? AND organization_id = ?",
        )
        .bind(&control.code)
        .bind(&control.title)
        .bind(&control.description)
        .bind(control.status.as_str())
        .bind(control.owner_id.map(|u| u.to_string()))
        .bind(Utc::now().to_rfc3339())
        .bind(control.id.to_string())
        .bind(control.organization_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Control", control.id));
        }

        Ok(control.clone())
    }

    async fn delete_control(&self, organization_id: Uuid, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM controls WHERE id = ? AND organization_id = ?")
            .bind(id.to_string())
            .bind(organization_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn upsert_soa_item(&self, item: &SoaItem) -> Result<SoaItem, DbError> {
        sqlx::query(
            r#"
            INSERT INTO soa_items (id, organization_id, framework_id, control_id, applicable, justification, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (framework_id, control_id)
            DO UPDATE SET applicable = excluded.applicable, justification = excluded.justification, updated_at = excluded.updated_at
            "#,
        )
        .bind(item.id.to_string())
        .bind(item.organization_id.to_string())
        .bind(item.framework_id.to_string())
        .bind(item.control_id.to_string())
        .bind(item.applicable)
        .bind(&item.justification)
        .bind(item.created_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(item.clone())
    }

    async fn list_soa_items(&self, framework_id: Uuid) -> Result<Vec<SoaItem>, DbError> {
        let rows: Vec<SqliteSoaRow> = sqlx::query_as(&format!(
            "SELECT {} FROM soa_items WHERE framework_id = ?",
            SOA_COLUMNS
        ))
        .bind(framework_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn create_risk(&self, risk: &Risk) -> Result<Risk, DbError> {
        sqlx::query(
            "INSERT INTO risks (id, organization_id, title, description, likelihood, impact, status, owner_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(risk.id.to_string())
        .bind(risk.organization_id.to_string())
        .bind(&risk.title)
        .bind(&risk.description)
        .bind(risk.likelihood as i64)
        .bind(risk.impact as i64)
        .bind(risk.status.as_str())
        .bind(risk.owner_id.map(|u| u.to_string()))
        .bind(risk.created_at.to_rfc3339())
        .bind(risk.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(risk.clone())
    }

    async fn get_risk(&self, organization_id: Uuid, id: Uuid) -> Result<Option<Risk>, DbError> {
        let row: Option<SqliteRiskRow> = sqlx::query_as(&format!(
            "SELECT {} FROM risks WHERE id = ? AND organization_id = ?",
            RISK_COLUMNS
        ))
        .bind(id.to_string())
        .bind(organization_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_risks(
        &self,
        organization_id: Uuid,
        status: Option<RiskStatus>,
    ) -> Result<Vec<Risk>, DbError> {
        let mut query = format!(
            "SELECT {} FROM risks WHERE organization_id = ?",
            RISK_COLUMNS
        );
        if status.is_some() {
            query.push_str(" AND status = ?");
        }
        // Highest exposure first
        query.push_str(" ORDER BY likelihood * impact DESC, created_at DESC");

        let mut sqlx_query =
            sqlx::query_as::<_, SqliteRiskRow>(&query).bind(organization_id.to_string());
        if let Some(status) = status {
            sqlx_query = sqlx_query.bind(status.as_str());
        }

        let rows: Vec<SqliteRiskRow> = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_risk(&self, risk: &Risk) -> Result<Risk, DbError> {
        let result = sqlx::query(
            "UPDATE risks SET title = ?, description = ?, likelihood = ?, impact = ?, status = ?, owner_id = ?, updated_at = ? WHERE id = ? AND organization_id = ?",
        )
        .bind(&risk.title)
        .bind(&risk.description)
        .bind(risk.likelihood as i64)
        .bind(risk.impact as i64)
        .bind(risk.status.as_str())
        .bind(risk.owner_id.map(|u| u.to_string()))
        .bind(Utc::now().to_rfc3339())
        .bind(risk.id.to_string())
        .bind(risk.organization_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Risk", risk.id));
        }

        Ok(risk.clone())
    }

    async fn delete_risk(&self, organization_id: Uuid, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM risks WHERE id = ? AND organization_id = ?")
            .bind(id.to_string())
            .bind(organization_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_evidence(&self, evidence: &Evidence) -> Result<Evidence, DbError> {
        sqlx::query(
            "INSERT INTO evidence (id, organization_id, control_id, title, location, collected_at, valid_until, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(evidence.id.to_string())
        .bind(evidence.organization_id.to_string())
        .bind(evidence.control_id.to_string())
        .bind(&evidence.title)
        .bind(&evidence.location)
        .bind(evidence.collected_at.to_rfc3339())
        .bind(evidence.valid_until.map(|t| t.to_rfc3339()))
        .bind(evidence.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(evidence.clone())
    }

    async fn list_evidence(&self, control_id: Uuid) -> Result<Vec<Evidence>, DbError> {
        let rows: Vec<SqliteEvidenceRow> = sqlx::query_as(&format!(
            "SELECT {} FROM evidence WHERE control_id = ? ORDER BY collected_at DESC",
            EVIDENCE_COLUMNS
        ))
        .bind(control_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn delete_evidence(&self, organization_id: Uuid, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM evidence WHERE id = ? AND organization_id = ?")
            .bind(id.to_string())
            .bind(organization_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// PostgreSQL implementation of SecurityRepository.
pub struct PgSecurityRepository {
    pool: sqlx::PgPool,
}

impl PgSecurityRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SecurityRepository for PgSecurityRepository {
    async fn create_framework(&self, framework: &Framework) -> Result<Framework, DbError> {
        sqlx::query(
            "INSERT INTO frameworks (id, organization_id, kind, name, version, description, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(framework.id)
        .bind(framework.organization_id)
        .bind(framework.kind.as_db_str())
        .bind(&framework.name)
        .bind(&framework.version)
        .bind(&framework.description)
        .bind(framework.created_at)
        .bind(framework.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(framework.clone())
    }

    async fn get_framework(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Framework>, DbError> {
        let row: Option<PgFrameworkRow> = sqlx::query_as(&format!(
            "SELECT {} FROM frameworks WHERE id = $1 AND organization_id = $2",
            FRAMEWORK_COLUMNS
        ))
        .bind(id)
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_frameworks(&self, organization_id: Uuid) -> Result<Vec<Framework>, DbError> {
        let rows: Vec<PgFrameworkRow> = sqlx::query_as(&format!(
            "SELECT {} FROM frameworks WHERE organization_id = $1 ORDER BY name ASC",
            FRAMEWORK_COLUMNS
        ))
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_framework(&self, framework: &Framework) -> Result<Framework, DbError> {
        let result = sqlx::query(
            "UPDATE frameworks SET kind = $1, name = $2, version = $3, description = $4, updated_at = NOW() WHERE id = $5 AND organization_id = $6",
        )
        .bind(framework.kind.as_db_str())
        .bind(&framework.name)
        .bind(&framework.version)
        .bind(&framework.description)
        .bind(framework.id)
        .bind(framework.organization_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Framework", framework.id));
        }

        Ok(framework.clone())
    }

    async fn delete_framework(&self, organization_id: Uuid, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM frameworks WHERE id = $1 AND organization_id = $2")
            .bind(id)
            .bind(organization_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_control(&self, control: &Control) -> Result<Control, DbError> {
        sqlx::query(
            "INSERT INTO controls (id, organization_id, framework_id, code, title, description, status, owner_id, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(control.id)
        .bind(control.organization_id)
        .bind(control.framework_id)
        .bind(&control.code)
        .bind(&control.title)
        .bind(&control.description)
        .bind(control.status.as_str())
        .bind(control.owner_id)
        .bind(control.created_at)
        .bind(control.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(control.clone())
    }

    async fn get_control(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Control>, DbError> {
        let row: Option<PgControlRow> = sqlx::query_as(&format!(
            "SELECT {} FROM controls WHERE id = $1 AND organization_id = $2",
            CONTROL_COLUMNS
        ))
        .bind(id)
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_controls(&self, framework_id: Uuid) -> Result<Vec<Control>, DbError> {
        let rows: Vec<PgControlRow> = sqlx::query_as(&format!(
            "SELECT {} FROM controls WHERE framework_id = $1 ORDER BY code ASC",
            CONTROL_COLUMNS
        ))
        .bind(framework_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_control(&self, control: &Control) -> Result<Control, DbError> {
        let result = sqlx::query(
            "UPDATE controls SET code = $1, title = $2, description = $3, status = $4, owner_id = $5, updated_at = NOW() WHERE id = $6 AND organization_id = $7",
        )
        .bind(&control.code)
        .bind(&control.title)
        .bind(&control.description)
        .bind(control.status.as_str())
        .bind(control.owner_id)
        .bind(control.id)
        .bind(control.organization_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Control", control.id));
        }

        Ok(control.clone())
    }

    async fn delete_control(&self, organization_id: Uuid, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM controls WHERE id = $1 AND organization_id = $2")
            .bind(id)
            .bind(organization_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn upsert_soa_item(&self, item: &SoaItem) -> Result<SoaItem, DbError> {
        sqlx::query(
            r#"
            INSERT INTO soa_items (id, organization_id, framework_id, control_id, applicable, justification, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (framework_id, control_id)
            DO UPDATE SET applicable = EXCLUDED.applicable, justification = EXCLUDED.justification, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(item.id)
        .bind(item.organization_id)
        .bind(item.framework_id)
        .bind(item.control_id)
        .bind(item.applicable)
        .bind(&item.justification)
        .bind(item.created_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(item.clone())
    }

    async fn list_soa_items(&self, framework_id: Uuid) -> Result<Vec<SoaItem>, DbError> {
        let rows: Vec<PgSoaRow> = sqlx::query_as(&format!(
            "SELECT {} FROM soa_items WHERE framework_id = $1",
            SOA_COLUMNS
        ))
        .bind(framework_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn create_risk(&self, risk: &Risk) -> Result<Risk, DbError> {
        sqlx::query(
            "INSERT INTO risks (id, organization_id, title, description, likelihood, impact, status, owner_id, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(risk.id)
        .bind(risk.organization_id)
        .bind(&risk.title)
        .bind(&risk.description)
        .bind(risk.likelihood as i16)
        .bind(risk.impact as i16)
        .bind(risk.status.as_str())
        .bind(risk.owner_id)
        .bind(risk.created_at)
        .bind(risk.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(risk.clone())
    }

    async fn get_risk(&self, organization_id: Uuid, id: Uuid) -> Result<Option<Risk>, DbError> {
        let row: Option<PgRiskRow> = sqlx::query_as(&format!(
            "SELECT {} FROM risks WHERE id = $1 AND organization_id = $2",
            RISK_COLUMNS
        ))
        .bind(id)
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_risks(
        &self,
        organization_id: Uuid,
        status: Option<RiskStatus>,
    ) -> Result<Vec<Risk>, DbError> {
        let rows: Vec<PgRiskRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM risks
            WHERE organization_id = $1 AND ($2::text IS NULL OR status = $2)
            ORDER BY likelihood * impact DESC, created_at DESC
            "#,
            RISK_COLUMNS
        ))
        .bind(organization_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_risk(&self, risk: &Risk) -> Result<Risk, DbError> {
        let result = sqlx::query(
            "UPDATE risks SET title = $1, description = $2, likelihood = $3, impact = $4, status = $5, owner_id = $6, updated_at = NOW() WHERE id = $7 AND organization_id = $8",
        )
        .bind(&risk.title)
        .bind(&risk.description)
        .bind(risk.likelihood as i16)
        .bind(risk.impact as i16)
        .bind(risk.status.as_str())
        .bind(risk.owner_id)
        .bind(risk.id)
        .bind(risk.organization_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Risk", risk.id));
        }

        Ok(risk.clone())
    }

    async fn delete_risk(&self, organization_id: Uuid, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM risks WHERE id = $1 AND organization_id = $2")
            .bind(id)
            .bind(organization_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_evidence(&self, evidence: &Evidence) -> Result<Evidence, DbError> {
        sqlx::query(
            "INSERT INTO evidence (id, organization_id, control_id, title, location, collected_at, valid_until, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(evidence.id)
        .bind(evidence.organization_id)
        .bind(evidence.control_id)
        .bind(&evidence.title)
        .bind(&evidence.location)
        .bind(evidence.collected_at)
        .bind(evidence.valid_until)
        .bind(evidence.created_at)
        .execute(&self.pool)
        .await?;

        Ok(evidence.clone())
    }

    async fn list_evidence(&self, control_id: Uuid) -> Result<Vec<Evidence>, DbError> {
        let rows: Vec<PgEvidenceRow> = sqlx::query_as(&format!(
            "SELECT {} FROM evidence WHERE control_id = $1 ORDER BY collected_at DESC",
            EVIDENCE_COLUMNS
        ))
        .bind(control_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn delete_evidence(&self, organization_id: Uuid, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM evidence WHERE id = $1 AND organization_id = $2")
            .bind(id)
            .bind(organization_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Factory selecting the implementation for the pool's backend.
pub fn create_security_repository(pool: &DbPool) -> Box<dyn SecurityRepository> {
    match pool {
        DbPool::Sqlite(pool) => Box::new(SqliteSecurityRepository::new(pool.clone())),
        DbPool::Postgres(pool) => Box::new(PgSecurityRepository::new(pool.clone())),
    }
}

// Row types

#[derive(sqlx::FromRow)]
struct SqliteFrameworkRow {
    id: String,
    organization_id: String,
    kind: String,
    name: String,
    version: Option<String>,
    description: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SqliteFrameworkRow> for Framework {
    type Error = DbError;

    fn try_from(row: SqliteFrameworkRow) -> Result<Self, Self::Error> {
        Ok(Framework {
            id: parse_uuid(&row.id)?,
            organization_id: parse_uuid(&row.organization_id)?,
            kind: FrameworkKind::parse(&row.kind),
            name: row.name,
            version: row.version,
            description: row.description,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgFrameworkRow {
    id: Uuid,
    organization_id: Uuid,
    kind: String,
    name: String,
    version: Option<String>,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PgFrameworkRow> for Framework {
    type Error = DbError;

    fn try_from(row: PgFrameworkRow) -> Result<Self, Self::Error> {
        Ok(Framework {
            id: row.id,
            organization_id: row.organization_id,
            kind: FrameworkKind::parse(&row.kind),
            name: row.name,
            version: row.version,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SqliteControlRow {
    id: String,
    organization_id: String,
    framework_id: String,
    code: String,
    title: String,
    description: Option<String>,
    status: String,
    owner_id: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SqliteControlRow> for Control {
    type Error = DbError;

    fn try_from(row: SqliteControlRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<ControlStatus>().map_err(|_| {
            DbError::Serialization(format!("Invalid control status: {}", row.status))
        })?;

        Ok(Control {
            id: parse_uuid(&row.id)?,
            organization_id: parse_uuid(&row.organization_id)?,
            framework_id: parse_uuid(&row.framework_id)?,
            code: row.code,
            title: row.title,
            description: row.description,
            status,
            owner_id: parse_opt_uuid(row.owner_id.as_deref())?,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgControlRow {
    id: Uuid,
    organization_id: Uuid,
    framework_id: Uuid,
    code: String,
    title: String,
    description: Option<String>,
    status: String,
    owner_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PgControlRow> for Control {
    type Error = DbError;

    fn try_from(row: PgControlRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<ControlStatus>().map_err(|_| {
            DbError::Serialization(format!("Invalid control status: {}", row.status))
        })?;

        Ok(Control {
            id: row.id,
            organization_id: row.organization_id,
            framework_id: row.framework_id,
            code: row.code,
            title: row.title,
            description: row.description,
            status,
            owner_id: row.owner_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SqliteSoaRow {
    id: String,
    organization_id: String,
    framework_id: String,
    control_id: String,
    applicable: bool,
    justification: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SqliteSoaRow> for SoaItem {
    type Error = DbError;

    fn try_from(row: SqliteSoaRow) -> Result<Self, Self::Error> {
        Ok(SoaItem {
            id: parse_uuid(&row.id)?,
            organization_id: parse_uuid(&row.organization_id)?,
            framework_id: parse_uuid(&row.framework_id)?,
            control_id: parse_uuid(&row.control_id)?,
            applicable: row.applicable,
            justification: row.justification,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgSoaRow {
    id: Uuid,
    organization_id: Uuid,
    framework_id: Uuid,
    control_id: Uuid,
    applicable: bool,
    justification: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PgSoaRow> for SoaItem {
    type Error = DbError;

    fn try_from(row: PgSoaRow) -> Result<Self, Self::Error> {
        Ok(SoaItem {
            id: row.id,
            organization_id: row.organization_id,
            framework_id: row.framework_id,
            control_id: row.control_id,
            applicable: row.applicable,
            justification: row.justification,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SqliteRiskRow {
    id: String,
    organization_id: String,
    title: String,
    description: Option<String>,
    likelihood: i64,
    impact: i64,
    status: String,
    owner_id: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SqliteRiskRow> for Risk {
    type Error = DbError;

    fn try_from(row: SqliteRiskRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<RiskStatus>()
            .map_err(|_| DbError::Serialization(format!("Invalid risk status: {}", row.status)))?;

        Ok(Risk {
            id: parse_uuid(&row.id)?,
            organization_id: parse_uuid(&row.organization_id)?,
            title: row.title,
            description: row.description,
            likelihood: row.likelihood.clamp(1, 5) as u8,
            impact: row.impact.clamp(1, 5) as u8,
            status,
            owner_id: parse_opt_uuid(row.owner_id.as_deref())?,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgRiskRow {
    id: Uuid,
    organization_id: Uuid,
    title: String,
    description: Option<String>,
    likelihood: i16,
    impact: i16,
    status: String,
    owner_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PgRiskRow> for Risk {
    type Error = DbError;

    fn try_from(row: PgRiskRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<RiskStatus>()
            .map_err(|_| DbError::Serialization(format!("Invalid risk status: {}", row.status)))?;

        Ok(Risk {
            id: row.id,
            organization_id: row.organization_id,
            title: row.title,
            description: row.description,
            likelihood: row.likelihood.clamp(1, 5) as u8,
            impact: row.impact.clamp(1, 5) as u8,
            status,
            owner_id: row.owner_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SqliteEvidenceRow {
    id: String,
    organization_id: String,
    control_id: String,
    title: String,
    location: Option<String>,
    collected_at: String,
    valid_until: Option<String>,
    created_at: String,
}

impl TryFrom<SqliteEvidenceRow> for Evidence {
    type Error = DbError;

    fn try_from(row: SqliteEvidenceRow) -> Result<Self, Self::Error> {
        Ok(Evidence {
            id: parse_uuid(&row.id)?,
            organization_id: parse_uuid(&row.organization_id)?,
            control_id: parse_uuid(&row.control_id)?,
            title: row.title,
            location: row.location,
            collected_at: parse_ts(&row.collected_at)?,
            valid_until: parse_opt_ts(row.valid_until.as_deref())?,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgEvidenceRow {
    id: Uuid,
    organization_id: Uuid,
    control_id: Uuid,
    title: String,
    location: Option<String>,
    collected_at: DateTime<Utc>,
    valid_until: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<PgEvidenceRow> for Evidence {
    type Error = DbError;

    fn try_from(row: PgEvidenceRow) -> Result<Self, Self::Error> {
        Ok(Evidence {
            id: row.id,
            organization_id: row.organization_id,
            control_id: row.control_id,
            title: row.title,
            location: row.location,
            collected_at: row.collected_at,
            valid_until: row.valid_until,
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
    async fn test_framework_and_controls() {
        let (pool, org_id) = setup().await;
        let repo = create_security_repository(&pool);

        let framework = Framework::new(org_id, FrameworkKind::Soc2, "SOC 2 Type II");
        repo.create_framework(&framework).await.unwrap();

        let mut control = Control::new(org_id, framework.id, "CC6.1", "Logical access controls");
        repo.create_control(&control).await.unwrap();

        // Duplicate code within a framework is rejected
        let dup = repo
            .create_control(&Control::new(org_id, framework.id, "CC6.1", "Copy"))
            .await;
        assert!(matches!(dup, Err(DbError::Constraint(_))));

        control.status = ControlStatus::Implemented;
        repo.save_control(&control).await.unwrap();

        let listed = repo.list_controls(framework.id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, ControlStatus::Implemented);
    }

    #[tokio::test]
    async fn test_soa_upsert() {
        let (pool, org_id) = setup().await;
        let repo = create_security_repository(&pool);

        let framework = Framework::new(org_id, FrameworkKind::Iso27001, "ISO 27001:2022");
        repo.create_framework(&framework).await.unwrap();
        let control = Control::new(org_id, framework.id, "A.5.15", "Access control");
        repo.create_control(&control).await.unwrap();

        let item = SoaItem::new(org_id, framework.id, control.id, true);
        repo.upsert_soa_item(&item).await.unwrap();

        // Upserting the same control replaces the entry instead of
        // growing the list
        let mut revised = SoaItem::new(org_id, framework.id, control.id, false);
        revised.justification = Some("Outsourced to IdP".to_string());
        repo.upsert_soa_item(&revised).await.unwrap();

        let items = repo.list_soa_items(framework.id).await.unwrap();
        assert_eq!(items.len(), 1);
        assert!(!items[0].applicable);
        assert_eq!(items[0].justification.as_deref(), Some("Outsourced to IdP"));
    }

    #[tokio::test]
    async fn test_risks_ordered_by_exposure() {
        let (pool, org_id) = setup().await;
        let repo = create_security_repository(&pool);

        repo.create_risk(&Risk::new(org_id, "Minor", 1, 2)).await.unwrap();
        repo.create_risk(&Risk::new(org_id, "Severe", 5, 5)).await.unwrap();
        repo.create_risk(&Risk::new(org_id, "Medium", 3, 3)).await.unwrap();

        let risks = repo.list_risks(org_id, None).await.unwrap();
        assert_eq!(risks[0].title, "Severe");
        assert_eq!(risks[2].title, "Minor");

        let open = repo.list_risks(org_id, Some(RiskStatus::Open)).await.unwrap();
        assert_eq!(open.len(), 3);
        assert!(repo
            .list_risks(org_id, Some(RiskStatus::Closed))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_evidence() {
        let (pool, org_id) = setup().await;
        let repo = create_security_repository(&pool);

        let framework = Framework::new(org_id, FrameworkKind::Soc2, "SOC 2");
        repo.create_framework(&framework).await.unwrap();
        let control = Control::new(org_id, framework.id, "CC1.1", "Tone at the top");
        repo.create_control(&control).await.unwrap();

        let evidence = Evidence::new(org_id, control.id, "Q1 access review");
        repo.create_evidence(&evidence).await.unwrap();

        let listed = repo.list_evidence(control.id).await.unwrap();
        assert_eq!(listed.len(), 1);

        assert!(repo.delete_evidence(org_id, evidence.id).await.unwrap());
        assert!(repo.list_evidence(control.id).await.unwrap().is_empty());
    }
}
