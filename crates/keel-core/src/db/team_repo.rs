//! Team repository.

use super::convert::{parse_opt_uuid, parse_ts, parse_uuid};
use super::{DbError, DbPool};
use crate::models::Team;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Repository trait for team persistence.
#[async_trait]
pub trait TeamRepository: Send + Sync {
    /// Creates a new team.
    async fn create(&self, team: &Team) -> Result<Team, DbError>;

    /// Gets a team by ID, scoped to an organization.
    async fn get(&self, organization_id: Uuid, id: Uuid) -> Result<Option<Team>, DbError>;

    /// Lists an organization's teams.
    async fn list(&self, organization_id: Uuid) -> Result<Vec<Team>, DbError>;

    /// Saves the full team record.
    async fn save(&self, team: &Team) -> Result<Team, DbError>;

    /// Deletes a team.
    async fn delete(&self, organization_id: Uuid, id: Uuid) -> Result<bool, DbError>;
}

const COLUMNS: &str =
    "id, organization_id, name, description, lead_id, parent_team_id, created_at, updated_at";

/// SQLite implementation of TeamRepository.
pub struct SqliteTeamRepository {
    pool: sqlx::SqlitePool,
}

impl SqliteTeamRepository {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TeamRepository for SqliteTeamRepository {
    async fn create(&self, team: &Team) -> Result<Team, DbError> {
        sqlx::query(
            "INSERT INTO teams (id, organization_id, name, description, lead_id, parent_team_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(team.id.to_string())
        .bind(team.organization_id.to_string())
        .bind(&team.name)
        .bind(&team.description)
        .bind(team.lead_id.map(|u| u.to_string()))
        .bind(team.parent_team_id.map(|u| u.to_string()))
        .bind(team.created_at.to_rfc3339())
        .bind(team.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(team.clone())
    }

    async fn get(&self, organization_id: Uuid, id: Uuid) -> Result<Option<Team>, DbError> {
        let row: Option<SqliteTeamRow> = sqlx::query_as(&format!(
            "SELECT {} FROM teams WHERE id = ? AND organization_id = ?",
            COLUMNS
        ))
        .bind(id.to_string())
        .bind(organization_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list(&self, organization_id: Uuid) -> Result<Vec<Team>, DbError> {
        let rows: Vec<SqliteTeamRow> = sqlx::query_as(&format!(
            "SELECT {} FROM teams WHERE organization_id = ? ORDER BY name ASC",
            COLUMNS
        ))
        .bind(organization_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save(&self, team: &Team) -> Result<Team, DbError> {
        let result = sqlx::query(
            "UPDATE teams SET name = ?, description = ?, lead_id = ?, parent_team_id = ?, updated_at = ? WHERE id = ? AND organization_id = ?",
        )
        .bind(&team.name)
        .bind(&team.description)
        .bind(team.lead_id.map(|u| u.to_string()))
        .bind(team.parent_team_id.map(|u| u.to_string()))
        .bind(Utc::now().to_rfc3339())
        .bind(team.id.to_string())
        .bind(team.organization_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Team", team.id));
        }

        Ok(team.clone())
    }

    async fn delete(&self, organization_id: Uuid, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM teams WHERE id = ? AND organization_id = ?")
            .bind(id.to_string())
            .bind(organization_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// PostgreSQL implementation of TeamRepository.
pub struct PgTeamRepository {
    pool: sqlx::PgPool,
}

impl PgTeamRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TeamRepository for PgTeamRepository {
    async fn create(&self, team: &Team) -> Result<Team, DbError> {
        sqlx::query(
            "INSERT INTO teams (id, organization_id, name, description, lead_id, parent_team_id, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(team.id)
        .bind(team.organization_id)
        .bind(&team.name)
        .bind(&team.description)
        .bind(team.lead_id)
        .bind(team.parent_team_id)
        .bind(team.created_at)
        .bind(team.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(team.clone())
    }

    async fn get(&self, organization_id: Uuid, id: Uuid) -> Result<Option<Team>, DbError> {
        let row: Option<PgTeamRow> = sqlx::query_as(&format!(
            "SELECT {} FROM teams WHERE id = $1 AND organization_id = $2",
            COLUMNS
        ))
        .bind(id)
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list(&self, organization_id: Uuid) -> Result<Vec<Team>, DbError> {
        let rows: Vec<PgTeamRow> = sqlx::query_as(&format!(
            "SELECT {} FROM teams WHERE organization_id = $1 ORDER BY name ASC",
            COLUMNS
        ))
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save(&self, team: &Team) -> Result<Team, DbError> {
        let result = sqlx::query(
            "UPDATE teams SET name = $1, description = $2, lead_id = $3, parent_team_id = $4, updated_at = NOW() WHERE id = $5 AND organization_id = $6",
        )
        .bind(&team.name)
        .bind(&team.description)
        .bind(team.lead_id)
        .bind(team.parent_team_id)
        .bind(team.id)
        .bind(team.organization_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Team", team.id));
        }

        Ok(team.clone())
    }

    async fn delete(&self, organization_id: Uuid, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM teams WHERE id = $1 AND organization_id = $2")
            .bind(id)
            .bind(organization_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Factory selecting the implementation for the pool's backend.
pub fn create_team_repository(pool: &DbPool) -> Box<dyn TeamRepository> {
    match pool {
        DbPool::Sqlite(pool) => Box::new(SqliteTeamRepository::new(pool.clone())),
        DbPool::Postgres(pool) => Box::new(PgTeamRepository::new(pool.clone())),
    }
}

#[derive(sqlx::FromRow)]
struct SqliteTeamRow {
    id: String,
    organization_id: String,
    name: String,
    description: Option<String>,
    lead_id: Option<String>,
    parent_team_id: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SqliteTeamRow> for Team {
    type Error = DbError;

    fn try_from(row: SqliteTeamRow) -> Result<Self, Self::Error> {
        Ok(Team {
            id: parse_uuid(&row.id)?,
            organization_id: parse_uuid(&row.organization_id)?,
            name: row.name,
            description: row.description,
            lead_id: parse_opt_uuid(row.lead_id.as_deref())?,
            parent_team_id: parse_opt_uuid(row.parent_team_id.as_deref())?,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgTeamRow {
    id: Uuid,
    organization_id: Uuid,
    name: String,
    description: Option<String>,
    lead_id: Option<Uuid>,
    parent_team_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PgTeamRow> for Team {
    type Error = DbError;

    fn try_from(row: PgTeamRow) -> Result<Self, Self::Error> {
        Ok(Team {
            id: row.id,
            organization_id: row.organization_id,
            name: row.name,
            description: row.description,
            lead_id: row.lead_id,
            parent_team_id: row.parent_team_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_organization_repository, create_pool, run_migrations};
    use crate::tenant::Organization;

    #[tokio::test]
    async fn test_team_crud() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        let org = Organization::new("test-org", "Test").unwrap();
        create_organization_repository(&pool)
            .create(&org)
            .await
            .unwrap();

        let repo = create_team_repository(&pool);
        let mut team = Team::new(org.id, "Platform");
        repo.create(&team).await.unwrap();

        team.description = Some("Infra and tooling".to_string());
        repo.save(&team).await.unwrap();

        let fetched = repo.get(org.id, team.id).await.unwrap().unwrap();
        assert_eq!(fetched.description.as_deref(), Some("Infra and tooling"));

        assert_eq!(repo.list(org.id).await.unwrap().len(), 1);

        // Duplicate name in the same org is rejected
        let dup = repo.create(&Team::new(org.id, "Platform")).await;
        assert!(matches!(dup, Err(DbError::Constraint(_))));

        assert!(repo.delete(org.id, team.id).await.unwrap());
    }
}
