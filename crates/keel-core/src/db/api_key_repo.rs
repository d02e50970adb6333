//! API key repository.

use super::convert::{parse_opt_ts, parse_ts, parse_uuid};
use super::{DbError, DbPool};
use crate::auth::ApiKey;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Repository trait for API key persistence.
#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    /// Stores a new API key record.
    async fn create(&self, key: &ApiKey) -> Result<ApiKey, DbError>;

    /// Looks up a key by its prefix (`kl_xxxxxx`).
    async fn get_by_prefix(&self, key_prefix: &str) -> Result<Option<ApiKey>, DbError>;

    /// Lists keys belonging to a user.
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>, DbError>;

    /// Stamps the last-used timestamp.
    async fn update_last_used(&self, id: Uuid) -> Result<(), DbError>;

    /// Revokes (deletes) a key.
    async fn delete(&self, id: Uuid) -> Result<bool, DbError>;
}

const COLUMNS: &str =
    "id, user_id, organization_id, name, key_prefix, key_hash, scopes, expires_at, last_used_at, created_at";

/// SQLite implementation of ApiKeyRepository.
pub struct SqliteApiKeyRepository {
    pool: sqlx::SqlitePool,
}

impl SqliteApiKeyRepository {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApiKeyRepository for SqliteApiKeyRepository {
    async fn create(&self, key: &ApiKey) -> Result<ApiKey, DbError> {
        sqlx::query(
            "INSERT INTO api_keys (id, user_id, organization_id, name, key_prefix, key_hash, scopes, expires_at, last_used_at, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(key.id.to_string())
        .bind(key.user_id.to_string())
        .bind(key.organization_id.to_string())
        .bind(&key.name)
        .bind(&key.key_prefix)
        .bind(&key.key_hash)
        .bind(serde_json::to_string(&key.scopes)?)
        .bind(key.expires_at.map(|t| t.to_rfc3339()))
        .bind(key.last_used_at.map(|t| t.to_rfc3339()))
        .bind(key.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(key.clone())
    }

    async fn get_by_prefix(&self, key_prefix: &str) -> Result<Option<ApiKey>, DbError> {
        let row: Option<SqliteApiKeyRow> = sqlx::query_as(&format!(
            "SELECT {} FROM api_keys WHERE key_prefix = ?",
            COLUMNS
        ))
        .bind(key_prefix)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>, DbError> {
        let rows: Vec<SqliteApiKeyRow> = sqlx::query_as(&format!(
            "SELECT {} FROM api_keys WHERE user_id = ? ORDER BY created_at DESC",
            COLUMNS
        ))
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn update_last_used(&self, id: Uuid) -> Result<(), DbError> {
        sqlx::query("UPDATE api_keys SET last_used_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// PostgreSQL implementation of ApiKeyRepository.
pub struct PgApiKeyRepository {
    pool: sqlx::PgPool,
}

impl PgApiKeyRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApiKeyRepository for PgApiKeyRepository {
    async fn create(&self, key: &ApiKey) -> Result<ApiKey, DbError> {
        sqlx::query(
            "INSERT INTO api_keys (id, user_id, organization_id, name, key_prefix, key_hash, scopes, expires_at, last_used_at, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(key.id)
        .bind(key.user_id)
        .bind(key.organization_id)
        .bind(&key.name)
        .bind(&key.key_prefix)
        .bind(&key.key_hash)
        .bind(serde_json::to_value(&key.scopes)?)
        .bind(key.expires_at)
        .bind(key.last_used_at)
        .bind(key.created_at)
        .execute(&self.pool)
        .await?;

        Ok(key.clone())
    }

    async fn get_by_prefix(&self, key_prefix: &str) -> Result<Option<ApiKey>, DbError> {
        let row: Option<PgApiKeyRow> = sqlx::query_as(&format!(
            "SELECT {} FROM api_keys WHERE key_prefix = $1",
            COLUMNS
        ))
        .bind(key_prefix)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<ApiKey>, DbError> {
        let rows: Vec<PgApiKeyRow> = sqlx::query_as(&format!(
            "SELECT {} FROM api_keys WHERE user_id = $1 ORDER BY created_at DESC",
            COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn update_last_used(&self, id: Uuid) -> Result<(), DbError> {
        sqlx::query("UPDATE api_keys SET last_used_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Factory selecting the implementation for the pool's backend.
pub fn create_api_key_repository(pool: &DbPool) -> Box<dyn ApiKeyRepository> {
    match pool {
        DbPool::Sqlite(pool) => Box::new(SqliteApiKeyRepository::new(pool.clone())),
        DbPool::Postgres(pool) => Box::new(PgApiKeyRepository::new(pool.clone())),
    }
}

#[derive(sqlx::FromRow)]
struct SqliteApiKeyRow {
    id: String,
    user_id: String,
    organization_id: String,
    name: String,
    key_prefix: String,
    key_hash: String,
    scopes: String,
    expires_at: Option<String>,
    last_used_at: Option<String>,
    created_at: String,
}

impl TryFrom<SqliteApiKeyRow> for ApiKey {
    type Error = DbError;

    fn try_from(row: SqliteApiKeyRow) -> Result<Self, Self::Error> {
        Ok(ApiKey {
            id: parse_uuid(&row.id)?,
            user_id: parse_uuid(&row.user_id)?,
            organization_id: parse_uuid(&row.organization_id)?,
            name: row.name,
            key_prefix: row.key_prefix,
            key_hash: row.key_hash,
            scopes: serde_json::from_str(&row.scopes)?,
            expires_at: parse_opt_ts(row.expires_at.as_deref())?,
            last_used_at: parse_opt_ts(row.last_used_at.as_deref())?,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgApiKeyRow {
    id: Uuid,
    user_id: Uuid,
    organization_id: Uuid,
    name: String,
    key_prefix: String,
    key_hash: String,
    scopes: serde_json::Value,
    expires_at: Option<DateTime<Utc>>,
    last_used_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<PgApiKeyRow> for ApiKey {
    type Error = DbError;

    fn try_from(row: PgApiKeyRow) -> Result<Self, Self::Error> {
        Ok(ApiKey {
            id: row.id,
            user_id: row.user_id,
            organization_id: row.organization_id,
            name: row.name,
            key_prefix: row.key_prefix,
            key_hash: row.key_hash,
            scopes: serde_json::from_value(row.scopes)?,
            expires_at: row.expires_at,
            last_used_at: row.last_used_at,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Role, User};
    use crate::db::{
        create_organization_repository, create_pool, create_user_repository, run_migrations,
    };
    use crate::tenant::Organization;

    #[tokio::test]
    async fn test_create_lookup_revoke() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();

        let org = Organization::new("test-org", "Test").unwrap();
        create_organization_repository(&pool)
            .create(&org)
            .await
            .unwrap();
        let user = User::new(org.id, "a@b.c", "a", "h", Role::Admin);
        create_user_repository(&pool).create(&user).await.unwrap();

        let repo = create_api_key_repository(&pool);
        let (key, full) = ApiKey::generate(user.id, org.id, "ci", vec!["*".to_string()], None);
        repo.create(&key).await.unwrap();

        let fetched = repo.get_by_prefix(&key.key_prefix).await.unwrap().unwrap();
        assert!(fetched.verify(&full));
        assert_eq!(fetched.scopes, vec!["*".to_string()]);

        let listed = repo.list_for_user(user.id).await.unwrap();
        assert_eq!(listed.len(), 1);

        repo.update_last_used(key.id).await.unwrap();
        let touched = repo.get_by_prefix(&key.key_prefix).await.unwrap().unwrap();
        assert!(touched.last_used_at.is_some());

        assert!(repo.delete(key.id).await.unwrap());
        assert!(repo.get_by_prefix(&key.key_prefix).await.unwrap().is_none());
    }
}
