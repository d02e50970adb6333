//! User repository.

use super::convert::{parse_opt_ts, parse_ts, parse_uuid};
use super::{make_like_pattern, DbError, DbPool};
use crate::auth::{Role, User, UserFilter, UserUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Repository trait for user persistence.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Creates a new user.
    async fn create(&self, user: &User) -> Result<User, DbError>;

    /// Gets a user by ID.
    async fn get(&self, id: Uuid) -> Result<Option<User>, DbError>;

    /// Gets a user by email within an organization.
    async fn get_by_email(&self, organization_id: Uuid, email: &str)
        -> Result<Option<User>, DbError>;

    /// Gets a user by username within an organization.
    async fn get_by_username(
        &self,
        organization_id: Uuid,
        username: &str,
    ) -> Result<Option<User>, DbError>;

    /// Gets a user by identity-provider subject.
    async fn get_by_external_subject(&self, subject: &str) -> Result<Option<User>, DbError>;

    /// Lists users with optional filtering.
    async fn list(&self, filter: &UserFilter) -> Result<Vec<User>, DbError>;

    /// Applies a partial update.
    async fn update(&self, id: Uuid, update: &UserUpdate) -> Result<User, DbError>;

    /// Updates a user's password hash.
    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), DbError>;

    /// Links an identity-provider subject to a user.
    async fn set_external_subject(&self, id: Uuid, subject: &str) -> Result<(), DbError>;

    /// Stamps the last-login timestamp.
    async fn update_last_login(&self, id: Uuid) -> Result<(), DbError>;

    /// Deletes a user.
    async fn delete(&self, id: Uuid) -> Result<bool, DbError>;

    /// Checks if any users exist (for initial seeding).
    async fn any_exist(&self) -> Result<bool, DbError>;
}

const COLUMNS: &str = "id, organization_id, email, username, password_hash, role, display_name, enabled, external_subject, last_login_at, created_at, updated_at";

/// SQLite implementation of UserRepository.
pub struct SqliteUserRepository {
    pool: sqlx::SqlitePool,
}

impl SqliteUserRepository {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn create(&self, user: &User) -> Result<User, DbError> {
        sqlx::query(
            "INSERT INTO users (id, organization_id, email, username, password_hash, role, display_name, enabled, external_subject, last_login_at, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(user.id.to_string())
        .bind(user.organization_id.to_string())
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(&user.display_name)
        .bind(user.enabled)
        .bind(&user.external_subject)
        .bind(user.last_login_at.map(|t| t.to_rfc3339()))
        .bind(user.created_at.to_rfc3339())
        .bind(user.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(user.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<User>, DbError> {
        let row: Option<SqliteUserRow> =
            sqlx::query_as(&format!("SELECT {} FROM users WHERE id = ?", COLUMNS))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn get_by_email(
        &self,
        organization_id: Uuid,
        email: &str,
    ) -> Result<Option<User>, DbError> {
        let row: Option<SqliteUserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE organization_id = ? AND email = ?",
            COLUMNS
        ))
        .bind(organization_id.to_string())
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn get_by_username(
        &self,
        organization_id: Uuid,
        username: &str,
    ) -> Result<Option<User>, DbError> {
        let row: Option<SqliteUserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE organization_id = ? AND username = ?",
            COLUMNS
        ))
        .bind(organization_id.to_string())
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn get_by_external_subject(&self, subject: &str) -> Result<Option<User>, DbError> {
        let row: Option<SqliteUserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE external_subject = ?",
            COLUMNS
        ))
        .bind(subject)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list(&self, filter: &UserFilter) -> Result<Vec<User>, DbError> {
        let mut query = format!("SELECT {} FROM users WHERE 1=1", COLUMNS);
        let mut params: Vec<String> = Vec::new();

        if let Some(org_id) = filter.organization_id {
            query.push_str(" AND organization_id = ?");
            params.push(org_id.to_string());
        }

        if let Some(role) = &filter.role {
            query.push_str(" AND role = ?");
            params.push(role.as_str().to_string());
        }

        if let Some(enabled) = filter.enabled {
            query.push_str(" AND enabled = ?");
            params.push(if enabled { "1" } else { "0" }.to_string());
        }

        if let Some(search) = &filter.search {
            query.push_str(
                " AND (username LIKE ? ESCAPE '\\' OR email LIKE ? ESCAPE '\\' OR display_name LIKE ? ESCAPE '\\')",
            );
            let pattern = make_like_pattern(search);
            params.push(pattern.clone());
            params.push(pattern.clone());
            params.push(pattern);
        }

        query.push_str(" ORDER BY username ASC");

        let mut sqlx_query = sqlx::query_as::<_, SqliteUserRow>(&query);
        for param in params {
            sqlx_query = sqlx_query.bind(param);
        }

        let rows: Vec<SqliteUserRow> = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn update(&self, id: Uuid, update: &UserUpdate) -> Result<User, DbError> {
        let existing = self
            .get(id)
            .await?
            .ok_or_else(|| DbError::not_found("User", id))?;

        let email = update.email.as_ref().unwrap_or(&existing.email);
        let username = update.username.as_ref().unwrap_or(&existing.username);
        let role = update.role.unwrap_or(existing.role);
        let display_name = match &update.display_name {
            Some(dn) => dn.clone(),
            None => existing.display_name.clone(),
        };
        let enabled = update.enabled.unwrap_or(existing.enabled);

        sqlx::query(
            "UPDATE users SET email = ?, username = ?, role = ?, display_name = ?, enabled = ?, updated_at = ? WHERE id = ?",
        )
        .bind(email)
        .bind(username)
        .bind(role.as_str())
        .bind(&display_name)
        .bind(enabled)
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        self.get(id)
            .await?
            .ok_or_else(|| DbError::not_found("User", id))
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), DbError> {
        let result =
            sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
                .bind(password_hash)
                .bind(Utc::now().to_rfc3339())
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("User", id));
        }

        Ok(())
    }

    async fn set_external_subject(&self, id: Uuid, subject: &str) -> Result<(), DbError> {
        let result =
            sqlx::query("UPDATE users SET external_subject = ?, updated_at = ? WHERE id = ?")
                .bind(subject)
                .bind(Utc::now().to_rfc3339())
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("User", id));
        }

        Ok(())
    }

    async fn update_last_login(&self, id: Uuid) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE users SET last_login_at = ?, updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(&now)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn any_exist(&self) -> Result<bool, DbError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }
}

/// PostgreSQL implementation of UserRepository.
pub struct PgUserRepository {
    pool: sqlx::PgPool,
}

impl PgUserRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, user: &User) -> Result<User, DbError> {
        sqlx::query(
            "INSERT INTO users (id, organization_id, email, username, password_hash, role, display_name, enabled, external_subject, last_login_at, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(user.id)
        .bind(user.organization_id)
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(&user.display_name)
        .bind(user.enabled)
        .bind(&user.external_subject)
        .bind(user.last_login_at)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(user.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<User>, DbError> {
        let row: Option<PgUserRow> =
            sqlx::query_as(&format!("SELECT {} FROM users WHERE id = $1", COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn get_by_email(
        &self,
        organization_id: Uuid,
        email: &str,
    ) -> Result<Option<User>, DbError> {
        let row: Option<PgUserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE organization_id = $1 AND email = $2",
            COLUMNS
        ))
        .bind(organization_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn get_by_username(
        &self,
        organization_id: Uuid,
        username: &str,
    ) -> Result<Option<User>, DbError> {
        let row: Option<PgUserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE organization_id = $1 AND username = $2",
            COLUMNS
        ))
        .bind(organization_id)
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn get_by_external_subject(&self, subject: &str) -> Result<Option<User>, DbError> {
        let row: Option<PgUserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE external_subject = $1",
            COLUMNS
        ))
        .bind(subject)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list(&self, filter: &UserFilter) -> Result<Vec<User>, DbError> {
        let search_pattern = filter.search.as_ref().map(|s| make_like_pattern(s));

        let rows: Vec<PgUserRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM users
            WHERE ($1::uuid IS NULL OR organization_id = $1)
              AND ($2::text IS NULL OR role = $2)
              AND ($3::boolean IS NULL OR enabled = $3)
              AND ($4::text IS NULL OR username ILIKE $4 OR email ILIKE $4 OR display_name ILIKE $4)
            ORDER BY username ASC
            "#,
            COLUMNS
        ))
        .bind(filter.organization_id)
        .bind(filter.role.map(|r| r.as_str()))
        .bind(filter.enabled)
        .bind(&search_pattern)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn update(&self, id: Uuid, update: &UserUpdate) -> Result<User, DbError> {
        let existing = self
            .get(id)
            .await?
            .ok_or_else(|| DbError::not_found("User", id))?;

        let email = update.email.as_ref().unwrap_or(&existing.email);
        let username = update.username.as_ref().unwrap_or(&existing.username);
        let role = update.role.unwrap_or(existing.role);
        let display_name = match &update.display_name {
            Some(dn) => dn.clone(),
            None => existing.display_name.clone(),
        };
        let enabled = update.enabled.unwrap_or(existing.enabled);

        sqlx::query(
            "UPDATE users SET email = $1, username = $2, role = $3, display_name = $4, enabled = $5, updated_at = NOW() WHERE id = $6",
        )
        .bind(email)
        .bind(username)
        .bind(role.as_str())
        .bind(&display_name)
        .bind(enabled)
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get(id)
            .await?
            .ok_or_else(|| DbError::not_found("User", id))
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), DbError> {
        let result =
            sqlx::query("UPDATE users SET password_hash = $1, updated_at = NOW() WHERE id = $2")
                .bind(password_hash)
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("User", id));
        }

        Ok(())
    }

    async fn set_external_subject(&self, id: Uuid, subject: &str) -> Result<(), DbError> {
        let result = sqlx::query(
            "UPDATE users SET external_subject = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(subject)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("User", id));
        }

        Ok(())
    }

    async fn update_last_login(&self, id: Uuid) -> Result<(), DbError> {
        sqlx::query("UPDATE users SET last_login_at = NOW(), updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn any_exist(&self) -> Result<bool, DbError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }
}

/// Factory selecting the implementation for the pool's backend.
pub fn create_user_repository(pool: &DbPool) -> Box<dyn UserRepository> {
    match pool {
        DbPool::Sqlite(pool) => Box::new(SqliteUserRepository::new(pool.clone())),
        DbPool::Postgres(pool) => Box::new(PgUserRepository::new(pool.clone())),
    }
}

#[derive(sqlx::FromRow)]
struct SqliteUserRow {
    id: String,
    organization_id: String,
    email: String,
    username: String,
    password_hash: String,
    role: String,
    display_name: Option<String>,
    enabled: bool,
    external_subject: Option<String>,
    last_login_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SqliteUserRow> for User {
    type Error = DbError;

    fn try_from(row: SqliteUserRow) -> Result<Self, Self::Error> {
        let role = row
            .role
            .parse::<Role>()
            .map_err(|_| DbError::Serialization(format!("Invalid role: {}", row.role)))?;

        Ok(User {
            id: parse_uuid(&row.id)?,
            organization_id: parse_uuid(&row.organization_id)?,
            email: row.email,
            username: row.username,
            password_hash: row.password_hash,
            role,
            display_name: row.display_name,
            enabled: row.enabled,
            external_subject: row.external_subject,
            last_login_at: parse_opt_ts(row.last_login_at.as_deref())?,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgUserRow {
    id: Uuid,
    organization_id: Uuid,
    email: String,
    username: String,
    password_hash: String,
    role: String,
    display_name: Option<String>,
    enabled: bool,
    external_subject: Option<String>,
    last_login_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PgUserRow> for User {
    type Error = DbError;

    fn try_from(row: PgUserRow) -> Result<Self, Self::Error> {
        let role = row
            .role
            .parse::<Role>()
            .map_err(|_| DbError::Serialization(format!("Invalid role: {}", row.role)))?;

        Ok(User {
            id: row.id,
            organization_id: row.organization_id,
            email: row.email,
            username: row.username,
            password_hash: row.password_hash,
            role,
            display_name: row.display_name,
            enabled: row.enabled,
            external_subject: row.external_subject,
            last_login_at: row.last_login_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
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
        let org = Organization::new("test-org", "Test Org").unwrap();
        create_organization_repository(&pool)
            .create(&org)
            .await
            .unwrap();
        (pool, org.id)
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let (pool, org_id) = setup().await;
        let repo = create_user_repository(&pool);

        let user = User::new(org_id, "ada@example.com", "ada", "hash", Role::Admin);
        repo.create(&user).await.unwrap();

        let by_id = repo.get(user.id).await.unwrap().unwrap();
        assert_eq!(by_id.username, "ada");
        assert_eq!(by_id.role, Role::Admin);

        let by_email = repo
            .get_by_email(org_id, "ada@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_email.id, user.id);

        assert!(repo
            .get_by_username(org_id, "missing")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_email_unique_per_org() {
        let (pool, org_id) = setup().await;
        let repo = create_user_repository(&pool);

        repo.create(&User::new(org_id, "a@b.c", "first", "h", Role::Member))
            .await
            .unwrap();
        let dup = repo
            .create(&User::new(org_id, "a@b.c", "second", "h", Role::Member))
            .await;
        assert!(matches!(dup, Err(DbError::Constraint(_))));
    }

    #[tokio::test]
    async fn test_update_and_filter() {
        let (pool, org_id) = setup().await;
        let repo = create_user_repository(&pool);

        let user = User::new(org_id, "ada@example.com", "ada", "h", Role::Member);
        repo.create(&user).await.unwrap();

        let updated = repo
            .update(
                user.id,
                &UserUpdate {
                    role: Some(Role::Manager),
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.role, Role::Manager);
        assert!(!updated.enabled);

        let disabled = repo
            .list(&UserFilter {
                organization_id: Some(org_id),
                enabled: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(disabled.len(), 1);

        let searched = repo
            .list(&UserFilter {
                search: Some("ada".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(searched.len(), 1);
    }

    #[tokio::test]
    async fn test_external_subject_lookup() {
        let (pool, org_id) = setup().await;
        let repo = create_user_repository(&pool);

        let mut user = User::new(org_id, "sso@example.com", "sso", "", Role::Member);
        user.external_subject = Some("aad-sub-123".to_string());
        repo.create(&user).await.unwrap();

        let found = repo
            .get_by_external_subject("aad-sub-123")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, user.id);
    }

    #[tokio::test]
    async fn test_any_exist() {
        let (pool, org_id) = setup().await;
        let repo = create_user_repository(&pool);
        assert!(!repo.any_exist().await.unwrap());
        repo.create(&User::new(org_id, "a@b.c", "a", "h", Role::Admin))
            .await
            .unwrap();
        assert!(repo.any_exist().await.unwrap());
    }
}
