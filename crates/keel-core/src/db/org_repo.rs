//! Organization repository.

use super::convert::{parse_ts, parse_uuid};
use super::{DbError, DbPool};
use crate::tenant::{Organization, OrganizationSettings, OrganizationStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Repository trait for organization persistence.
#[async_trait]
pub trait OrganizationRepository: Send + Sync {
    /// Creates a new organization.
    async fn create(&self, org: &Organization) -> Result<Organization, DbError>;

    /// Gets an organization by ID.
    async fn get(&self, id: Uuid) -> Result<Option<Organization>, DbError>;

    /// Gets an organization by slug.
    async fn get_by_slug(&self, slug: &str) -> Result<Option<Organization>, DbError>;

    /// Lists all organizations.
    async fn list(&self) -> Result<Vec<Organization>, DbError>;

    /// Saves the full organization (name, status, settings).
    async fn save(&self, org: &Organization) -> Result<Organization, DbError>;

    /// Deletes an organization and all its data (cascading).
    async fn delete(&self, id: Uuid) -> Result<bool, DbError>;
}

const COLUMNS: &str = "id, name, slug, status, settings, created_at, updated_at";

/// SQLite implementation of OrganizationRepository.
pub struct SqliteOrganizationRepository {
    pool: sqlx::SqlitePool,
}

impl SqliteOrganizationRepository {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrganizationRepository for SqliteOrganizationRepository {
    async fn create(&self, org: &Organization) -> Result<Organization, DbError> {
        sqlx::query(
            "INSERT INTO organizations (id, name, slug, status, settings, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(org.id.to_string())
        .bind(&org.name)
        .bind(&org.slug)
        .bind(org.status.as_str())
        .bind(serde_json::to_string(&org.settings)?)
        .bind(org.created_at.to_rfc3339())
        .bind(org.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(org.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Organization>, DbError> {
        let row: Option<SqliteOrgRow> = sqlx::query_as(&format!(
            "SELECT {} FROM organizations WHERE id = ?",
            COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Organization>, DbError> {
        let row: Option<SqliteOrgRow> = sqlx::query_as(&format!(
            "SELECT {} FROM organizations WHERE slug = ?",
            COLUMNS
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list(&self) -> Result<Vec<Organization>, DbError> {
        let rows: Vec<SqliteOrgRow> = sqlx::query_as(&format!(
            "SELECT {} FROM organizations ORDER BY name ASC",
            COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save(&self, org: &Organization) -> Result<Organization, DbError> {
        let result = sqlx::query(
            "UPDATE organizations SET name = ?, status = ?, settings = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&org.name)
        .bind(org.status.as_str())
        .bind(serde_json::to_string(&org.settings)?)
        .bind(Utc::now().to_rfc3339())
        .bind(org.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Organization", org.id));
        }

        Ok(org.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM organizations WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// PostgreSQL implementation of OrganizationRepository.
pub struct PgOrganizationRepository {
    pool: sqlx::PgPool,
}

impl PgOrganizationRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrganizationRepository for PgOrganizationRepository {
    async fn create(&self, org: &Organization) -> Result<Organization, DbError> {
        sqlx::query(
            "INSERT INTO organizations (id, name, slug, status, settings, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(org.id)
        .bind(&org.name)
        .bind(&org.slug)
        .bind(org.status.as_str())
        .bind(serde_json::to_value(&org.settings)?)
        .bind(org.created_at)
        .bind(org.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(org.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Organization>, DbError> {
        let row: Option<PgOrgRow> = sqlx::query_as(&format!(
            "SELECT {} FROM organizations WHERE id = $1",
            COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Organization>, DbError> {
        let row: Option<PgOrgRow> = sqlx::query_as(&format!(
            "SELECT {} FROM organizations WHERE slug = $1",
            COLUMNS
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list(&self) -> Result<Vec<Organization>, DbError> {
        let rows: Vec<PgOrgRow> = sqlx::query_as(&format!(
            "SELECT {} FROM organizations ORDER BY name ASC",
            COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save(&self, org: &Organization) -> Result<Organization, DbError> {
        let result = sqlx::query(
            "UPDATE organizations SET name = $1, status = $2, settings = $3, updated_at = NOW() WHERE id = $4",
        )
        .bind(&org.name)
        .bind(org.status.as_str())
        .bind(serde_json::to_value(&org.settings)?)
        .bind(org.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Organization", org.id));
        }

        Ok(org.clone())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM organizations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Factory selecting the implementation for the pool's backend.
pub fn create_organization_repository(pool: &DbPool) -> Box<dyn OrganizationRepository> {
    match pool {
        DbPool::Sqlite(pool) => Box::new(SqliteOrganizationRepository::new(pool.clone())),
        DbPool::Postgres(pool) => Box::new(PgOrganizationRepository::new(pool.clone())),
    }
}

#[derive(sqlx::FromRow)]
struct SqliteOrgRow {
    id: String,
    name: String,
    slug: String,
    status: String,
    settings: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SqliteOrgRow> for Organization {
    type Error = DbError;

    fn try_from(row: SqliteOrgRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<OrganizationStatus>()
            .map_err(|_| DbError::Serialization(format!("Invalid org status: {}", row.status)))?;

        Ok(Organization {
            id: parse_uuid(&row.id)?,
            name: row.name,
            slug: row.slug,
            status,
            settings: serde_json::from_str(&row.settings)?,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgOrgRow {
    id: Uuid,
    name: String,
    slug: String,
    status: String,
    settings: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PgOrgRow> for Organization {
    type Error = DbError;

    fn try_from(row: PgOrgRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<OrganizationStatus>()
            .map_err(|_| DbError::Serialization(format!("Invalid org status: {}", row.status)))?;

        let settings: OrganizationSettings = serde_json::from_value(row.settings)?;

        Ok(Organization {
            id: row.id,
            name: row.name,
            slug: row.slug,
            status,
            settings,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_pool, run_migrations};

    async fn repo() -> Box<dyn OrganizationRepository> {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        create_organization_repository(&pool)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let repo = repo().await;
        let org = Organization::new("acme-corp", "Acme Corporation").unwrap();
        repo.create(&org).await.unwrap();

        let fetched = repo.get(org.id).await.unwrap().unwrap();
        assert_eq!(fetched.slug, "acme-corp");
        assert_eq!(fetched.status, OrganizationStatus::Active);
        assert_eq!(fetched.settings, org.settings);

        let by_slug = repo.get_by_slug("acme-corp").await.unwrap().unwrap();
        assert_eq!(by_slug.id, org.id);
    }

    #[tokio::test]
    async fn test_slug_unique() {
        let repo = repo().await;
        repo.create(&Organization::new("acme-corp", "One").unwrap())
            .await
            .unwrap();
        let dup = repo
            .create(&Organization::new("acme-corp", "Two").unwrap())
            .await;
        assert!(matches!(dup, Err(DbError::Constraint(_))));
    }

    #[tokio::test]
    async fn test_save_updates_settings() {
        let repo = repo().await;
        let mut org = Organization::new("acme-corp", "Acme").unwrap();
        repo.create(&org).await.unwrap();

        org.settings.asset_tag_prefix = "ACME".to_string();
        org.update_status(OrganizationStatus::Suspended);
        repo.save(&org).await.unwrap();

        let fetched = repo.get(org.id).await.unwrap().unwrap();
        assert_eq!(fetched.settings.asset_tag_prefix, "ACME");
        assert_eq!(fetched.status, OrganizationStatus::Suspended);
    }

    #[tokio::test]
    async fn test_delete() {
        let repo = repo().await;
        let org = Organization::new("acme-corp", "Acme").unwrap();
        repo.create(&org).await.unwrap();
        assert!(repo.delete(org.id).await.unwrap());
        assert!(repo.get(org.id).await.unwrap().is_none());
        assert!(!repo.delete(org.id).await.unwrap());
    }
}
