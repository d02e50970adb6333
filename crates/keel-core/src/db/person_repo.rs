//! Person repository (HR records).

use super::convert::{parse_opt_date, parse_opt_uuid, parse_ts, parse_uuid};
use super::{make_like_pattern, DbError, DbPool, Pagination};
use crate::models::{EmploymentStatus, Person};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

/// Filter criteria for listing people.
#[derive(Debug, Clone, Default)]
pub struct PersonFilter {
    /// Organization scope (required in practice).
    pub organization_id: Option<Uuid>,
    /// Filter by employment status.
    pub status: Option<EmploymentStatus>,
    /// Filter by team.
    pub team_id: Option<Uuid>,
    /// Filter by manager.
    pub manager_id: Option<Uuid>,
    /// Substring match on name or email.
    pub search: Option<String>,
}

/// Repository trait for person persistence.
#[async_trait]
pub trait PersonRepository: Send + Sync {
    /// Creates a new person.
    async fn create(&self, person: &Person) -> Result<Person, DbError>;

    /// Gets a person by ID, scoped to an organization.
    async fn get(&self, organization_id: Uuid, id: Uuid) -> Result<Option<Person>, DbError>;

    /// Gets a person by email, scoped to an organization.
    async fn get_by_email(
        &self,
        organization_id: Uuid,
        email: &str,
    ) -> Result<Option<Person>, DbError>;

    /// Lists people with filtering and pagination.
    async fn list(
        &self,
        filter: &PersonFilter,
        pagination: &Pagination,
    ) -> Result<Vec<Person>, DbError>;

    /// Lists every person in an organization (org chart, rollout
    /// fan-out).
    async fn list_all(&self, organization_id: Uuid) -> Result<Vec<Person>, DbError>;

    /// Counts people matching the filter.
    async fn count(&self, filter: &PersonFilter) -> Result<u64, DbError>;

    /// Saves the full person record.
    async fn save(&self, person: &Person) -> Result<Person, DbError>;

    /// Deletes a person.
    async fn delete(&self, organization_id: Uuid, id: Uuid) -> Result<bool, DbError>;
}

const COLUMNS: &str = "id, organization_id, user_id, first_name, last_name, email, job_title, department, status, manager_id, team_id, start_date, end_date, created_at, updated_at";

/// SQLite implementation of PersonRepository.
pub struct SqlitePersonRepository {
    pool: sqlx::SqlitePool,
}

impl SqlitePersonRepository {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PersonRepository for SqlitePersonRepository {
    async fn create(&self, person: &Person) -> Result<Person, DbError> {
        sqlx::query(
            "INSERT INTO people (id, organization_id, user_id, first_name, last_name, email, job_title, department, status, manager_id, team_id, start_date, end_date, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(person.id.to_string())
        .bind(person.organization_id.to_string())
        .bind(person.user_id.map(|u| u.to_string()))
        .bind(&person.first_name)
        .bind(&person.last_name)
        .bind(&person.email)
        .bind(&person.job_title)
        .bind(&person.department)
        .bind(person.status.as_str())
        .bind(person.manager_id.map(|u| u.to_string()))
        .bind(person.team_id.map(|u| u.to_string()))
        .bind(person.start_date.map(|d| d.to_string()))
        .bind(person.end_date.map(|d| d.to_string()))
        .bind(person.created_at.to_rfc3339())
        .bind(person.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(person.clone())
    }

    async fn get(&self, organization_id: Uuid, id: Uuid) -> Result<Option<Person>, DbError> {
        let row: Option<SqlitePersonRow> = sqlx::query_as(&format!(
            "SELECT {} FROM people WHERE id = ? AND organization_id = ?",
            COLUMNS
        ))
        .bind(id.to_string())
        .bind(organization_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn get_by_email(
        &self,
        organization_id: Uuid,
        email: &str,
    ) -> Result<Option<Person>, DbError> {
        let row: Option<SqlitePersonRow> = sqlx::query_as(&format!(
            "SELECT {} FROM people WHERE organization_id = ? AND email = ?",
            COLUMNS
        ))
        .bind(organization_id.to_string())
        .bind(email.to_lowercase())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list(
        &self,
        filter: &PersonFilter,
        pagination: &Pagination,
    ) -> Result<Vec<Person>, DbError> {
        let (where_clause, params) = build_sqlite_filter(filter);
        let query = format!(
            "SELECT {} FROM people WHERE {} ORDER BY last_name ASC, first_name ASC LIMIT ? OFFSET ?",
            COLUMNS, where_clause
        );

        let mut sqlx_query = sqlx::query_as::<_, SqlitePersonRow>(&query);
        for param in params {
            sqlx_query = sqlx_query.bind(param);
        }
        sqlx_query = sqlx_query
            .bind(pagination.limit() as i64)
            .bind(pagination.offset() as i64);

        let rows: Vec<SqlitePersonRow> = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_all(&self, organization_id: Uuid) -> Result<Vec<Person>, DbError> {
        let rows: Vec<SqlitePersonRow> = sqlx::query_as(&format!(
            "SELECT {} FROM people WHERE organization_id = ? ORDER BY last_name ASC, first_name ASC",
            COLUMNS
        ))
        .bind(organization_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn count(&self, filter: &PersonFilter) -> Result<u64, DbError> {
        let (where_clause, params) = build_sqlite_filter(filter);
        let query = format!("SELECT COUNT(*) FROM people WHERE {}", where_clause);

        let mut sqlx_query = sqlx::query_scalar::<_, i64>(&query);
        for param in params {
            sqlx_query = sqlx_query.bind(param);
        }

        let count: i64 = sqlx_query.fetch_one(&self.pool).await?;
        Ok(count as u64)
    }

    async fn save(&self, person: &Person) -> Result<Person, DbError> {
        let result = sqlx::query(
            "UPDATE people SET user_id = ?, first_name = ?, last_name = ?, email = ?, job_title = ?, department = ?, status = ?, manager_id = ?, team_id = ?, start_date = ?, end_date = ?, updated_at = ? WHERE id = ? AND organization_id = ?",
        )
        .bind(person.user_id.map(|u| u.to_string()))
        .bind(&person.first_name)
        .bind(&person.last_name)
        .bind(&person.email)
        .bind(&person.job_title)
        .bind(&person.department)
        .bind(person.status.as_str())
        .bind(person.manager_id.map(|u| u.to_string()))
        .bind(person.team_id.map(|u| u.to_string()))
        .bind(person.start_date.map(|d| d.to_string()))
        .bind(person.end_date.map(|d| d.to_string()))
        .bind(Utc::now().to_rfc3339())
        .bind(person.id.to_string())
        .bind(person.organization_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Person", person.id));
        }

        Ok(person.clone())
    }

    async fn delete(&self, organization_id: Uuid, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM people WHERE id = ? AND organization_id = ?")
            .bind(id.to_string())
            .bind(organization_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn build_sqlite_filter(filter: &PersonFilter) -> (String, Vec<String>) {
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
    if let Some(team_id) = filter.team_id {
        clause.push_str(" AND team_id = ?");
        params.push(team_id.to_string());
    }
    if let Some(manager_id) = filter.manager_id {
        clause.push_str(" AND manager_id = ?");
        params.push(manager_id.to_string());
    }
    if let Some(search) = &filter.search {
        clause.push_str(
            " AND (first_name LIKE ? ESCAPE '\\' OR last_name LIKE ? ESCAPE '\\' OR email LIKE ? ESCAPE '\\')",
        );
        let pattern = make_like_pattern(search);
        params.push(pattern.clone());
        params.push(pattern.clone());
        params.push(pattern);
    }

    (clause, params)
}

/// PostgreSQL implementation of PersonRepository.
pub struct PgPersonRepository {
    pool: sqlx::PgPool,
}

impl PgPersonRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PersonRepository for PgPersonRepository {
    async fn create(&self, person: &Person) -> Result<Person, DbError> {
        sqlx::query(
            "INSERT INTO people (id, organization_id, user_id, first_name, last_name, email, job_title, department, status, manager_id, team_id, start_date, end_date, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(person.id)
        .bind(person.organization_id)
        .bind(person.user_id)
        .bind(&person.first_name)
        .bind(&person.last_name)
        .bind(&person.email)
        .bind(&person.job_title)
        .bind(&person.department)
        .bind(person.status.as_str())
        .bind(person.manager_id)
        .bind(person.team_id)
        .bind(person.start_date)
        .bind(person.end_date)
        .bind(person.created_at)
        .bind(person.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(person.clone())
    }

    async fn get(&self, organization_id: Uuid, id: Uuid) -> Result<Option<Person>, DbError> {
        let row: Option<PgPersonRow> = sqlx::query_as(&format!(
            "SELECT {} FROM people WHERE id = $1 AND organization_id = $2",
            COLUMNS
        ))
        .bind(id)
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn get_by_email(
        &self,
        organization_id: Uuid,
        email: &str,
    ) -> Result<Option<Person>, DbError> {
        let row: Option<PgPersonRow> = sqlx::query_as(&format!(
            "SELECT {} FROM people WHERE organization_id = $1 AND email = $2",
            COLUMNS
        ))
        .bind(organization_id)
        .bind(email.to_lowercase())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list(
        &self,
        filter: &PersonFilter,
        pagination: &Pagination,
    ) -> Result<Vec<Person>, DbError> {
        let search_pattern = filter.search.as_ref().map(|s| make_like_pattern(s));

        let rows: Vec<PgPersonRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM people
            WHERE ($1::uuid IS NULL OR organization_id = $1)
              AND ($2::text IS NULL OR status = $2)
              AND ($3::uuid IS NULL OR team_id = $3)
              AND ($4::uuid IS NULL OR manager_id = $4)
              AND ($5::text IS NULL OR first_name ILIKE $5 OR last_name ILIKE $5 OR email ILIKE $5)
            ORDER BY last_name ASC, first_name ASC
            LIMIT $6 OFFSET $7
            "#,
            COLUMNS
        ))
        .bind(filter.organization_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.team_id)
        .bind(filter.manager_id)
        .bind(&search_pattern)
        .bind(pagination.limit() as i64)
        .bind(pagination.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_all(&self, organization_id: Uuid) -> Result<Vec<Person>, DbError> {
        let rows: Vec<PgPersonRow> = sqlx::query_as(&format!(
            "SELECT {} FROM people WHERE organization_id = $1 ORDER BY last_name ASC, first_name ASC",
            COLUMNS
        ))
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn count(&self, filter: &PersonFilter) -> Result<u64, DbError> {
        let search_pattern = filter.search.as_ref().map(|s| make_like_pattern(s));

        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM people
            WHERE ($1::uuid IS NULL OR organization_id = $1)
              AND ($2::text IS NULL OR status = $2)
              AND ($3::uuid IS NULL OR team_id = $3)
              AND ($4::uuid IS NULL OR manager_id = $4)
              AND ($5::text IS NULL OR first_name ILIKE $5 OR last_name ILIKE $5 OR email ILIKE $5)
            "#,
        )
        .bind(filter.organization_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.team_id)
        .bind(filter.manager_id)
        .bind(&search_pattern)
        .fetch_one(&self.pool)
        .await?;

        Ok(count as u64)
    }

    async fn save(&self, person: &Person) -> Result<Person, DbError> {
        let result = sqlx::query(
            "UPDATE people SET user_id = $1, first_name = $2, last_name = $3, email = $4, job_title = $5, department = $6, status = $7, manager_id = $8, team_id = $9, start_date = $10, end_date = $11, updated_at = NOW() WHERE id = $12 AND organization_id = $13",
        )
        .bind(person.user_id)
        .bind(&person.first_name)
        .bind(&person.last_name)
        .bind(&person.email)
        .bind(&person.job_title)
        .bind(&person.department)
        .bind(person.status.as_str())
        .bind(person.manager_id)
        .bind(person.team_id)
        .bind(person.start_date)
        .bind(person.end_date)
        .bind(person.id)
        .bind(person.organization_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Person", person.id));
        }

        Ok(person.clone())
    }

    async fn delete(&self, organization_id: Uuid, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM people WHERE id = $1 AND organization_id = $2")
            .bind(id)
            .bind(organization_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Factory selecting the implementation for the pool's backend.
pub fn create_person_repository(pool: &DbPool) -> Box<dyn PersonRepository> {
    match pool {
        DbPool::Sqlite(pool) => Box::new(SqlitePersonRepository::new(pool.clone())),
        DbPool::Postgres(pool) => Box::new(PgPersonRepository::new(pool.clone())),
    }
}

#[derive(sqlx::FromRow)]
struct SqlitePersonRow {
    id: String,
    organization_id: String,
    user_id: Option<String>,
    first_name: String,
    last_name: String,
    email: String,
    job_title: Option<String>,
    department: Option<String>,
    status: String,
    manager_id: Option<String>,
    team_id: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SqlitePersonRow> for Person {
    type Error = DbError;

    fn try_from(row: SqlitePersonRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<EmploymentStatus>()
            .map_err(|_| DbError::Serialization(format!("Invalid status: {}", row.status)))?;

        Ok(Person {
            id: parse_uuid(&row.id)?,
            organization_id: parse_uuid(&row.organization_id)?,
            user_id: parse_opt_uuid(row.user_id.as_deref())?,
            first_name: row.first_name,
            last_name: row.last_name,
            email: row.email,
            job_title: row.job_title,
            department: row.department,
            status,
            manager_id: parse_opt_uuid(row.manager_id.as_deref())?,
            team_id: parse_opt_uuid(row.team_id.as_deref())?,
            start_date: parse_opt_date(row.start_date.as_deref())?,
            end_date: parse_opt_date(row.end_date.as_deref())?,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgPersonRow {
    id: Uuid,
    organization_id: Uuid,
    user_id: Option<Uuid>,
    first_name: String,
    last_name: String,
    email: String,
    job_title: Option<String>,
    department: Option<String>,
    status: String,
    manager_id: Option<Uuid>,
    team_id: Option<Uuid>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PgPersonRow> for Person {
    type Error = DbError;

    fn try_from(row: PgPersonRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<EmploymentStatus>()
            .map_err(|_| DbError::Serialization(format!("Invalid status: {}", row.status)))?;

        Ok(Person {
            id: row.id,
            organization_id: row.organization_id,
            user_id: row.user_id,
            first_name: row.first_name,
            last_name: row.last_name,
            email: row.email,
            job_title: row.job_title,
            department: row.department,
            status,
            manager_id: row.manager_id,
            team_id: row.team_id,
            start_date: row.start_date,
            end_date: row.end_date,
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
        let org = Organization::new("test-org", "Test").unwrap();
        create_organization_repository(&pool)
            .create(&org)
            .await
            .unwrap();
        (pool, org.id)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (pool, org_id) = setup().await;
        let repo = create_person_repository(&pool);

        let mut person = Person::new(org_id, "Ada", "Lovelace", "ada@example.com");
        person.job_title = Some("Engineer".to_string());
        person.start_date = NaiveDate::from_ymd_opt(2024, 3, 1);
        repo.create(&person).await.unwrap();

        let fetched = repo.get(org_id, person.id).await.unwrap().unwrap();
        assert_eq!(fetched.full_name(), "Ada Lovelace");
        assert_eq!(fetched.start_date, NaiveDate::from_ymd_opt(2024, 3, 1));

        // Wrong org sees nothing
        assert!(repo
            .get(Uuid::new_v4(), person.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_email_unique_per_org() {
        let (pool, org_id) = setup().await;
        let repo = create_person_repository(&pool);

        repo.create(&Person::new(org_id, "A", "One", "same@example.com"))
            .await
            .unwrap();
        let dup = repo
            .create(&Person::new(org_id, "B", "Two", "same@example.com"))
            .await;
        assert!(matches!(dup, Err(DbError::Constraint(_))));
    }

    #[tokio::test]
    async fn test_list_filters_and_pagination() {
        let (pool, org_id) = setup().await;
        let repo = create_person_repository(&pool);

        for i in 0..5 {
            let mut p = Person::new(
                org_id,
                "Person",
                format!("Num{}", i),
                format!("p{}@example.com", i),
            );
            p.status = if i % 2 == 0 {
                EmploymentStatus::Active
            } else {
                EmploymentStatus::Onboarding
            };
            repo.create(&p).await.unwrap();
        }

        let filter = PersonFilter {
            organization_id: Some(org_id),
            status: Some(EmploymentStatus::Active),
            ..Default::default()
        };
        assert_eq!(repo.count(&filter).await.unwrap(), 3);

        let page = repo.list(&filter, &Pagination::new(1, 2)).await.unwrap();
        assert_eq!(page.len(), 2);

        let searched = repo
            .list(
                &PersonFilter {
                    organization_id: Some(org_id),
                    search: Some("num3".to_string()),
                    ..Default::default()
                },
                &Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(searched.len(), 1);
    }

    #[tokio::test]
    async fn test_save_reparents() {
        let (pool, org_id) = setup().await;
        let repo = create_person_repository(&pool);

        let manager = Person::new(org_id, "Mgr", "One", "mgr@example.com");
        let mut report = Person::new(org_id, "Rep", "Two", "rep@example.com");
        repo.create(&manager).await.unwrap();
        repo.create(&report).await.unwrap();

        report.manager_id = Some(manager.id);
        repo.save(&report).await.unwrap();

        let fetched = repo.get(org_id, report.id).await.unwrap().unwrap();
        assert_eq!(fetched.manager_id, Some(manager.id));
    }
}
