//! Asset repository: assets, assignments, and lifecycle events.

use super::convert::{parse_opt_ts, parse_ts, parse_uuid};
use super::{make_like_pattern, DbError, DbPool, Pagination};
use crate::models::{
    Asset, AssetAssignment, AssetCategory, AssetStatus, LifecycleEvent, LifecycleEventKind,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Filter criteria for listing assets.
#[derive(Debug, Clone, Default)]
pub struct AssetFilter {
    /// Organization scope (required in practice).
    pub organization_id: Option<Uuid>,
    /// Filter by status.
    pub status: Option<AssetStatus>,
    /// Filter by category (storage string).
    pub category: Option<String>,
    /// Substring match on tag, name, or serial number.
    pub search: Option<String>,
    /// Include soft-deleted assets.
    pub include_deleted: bool,
}

/// Repository trait for asset persistence.
#[async_trait]
pub trait AssetRepository: Send + Sync {
    /// Creates a new asset.
    async fn create(&self, asset: &Asset) -> Result<Asset, DbError>;

    /// Gets an asset by ID, scoped to an organization.
    async fn get(&self, organization_id: Uuid, id: Uuid) -> Result<Option<Asset>, DbError>;

    /// Gets an asset by tag, scoped to an organization.
    async fn get_by_tag(&self, organization_id: Uuid, tag: &str)
        -> Result<Option<Asset>, DbError>;

    /// Lists assets with filtering and pagination.
    async fn list(
        &self,
        filter: &AssetFilter,
        pagination: &Pagination,
    ) -> Result<Vec<Asset>, DbError>;

    /// Counts assets matching the filter.
    async fn count(&self, filter: &AssetFilter) -> Result<u64, DbError>;

    /// Lists every live (non-deleted) asset in an organization, for
    /// device sync.
    async fn list_all_live(&self, organization_id: Uuid) -> Result<Vec<Asset>, DbError>;

    /// Saves the full asset record.
    async fn save(&self, asset: &Asset) -> Result<Asset, DbError>;

    /// Soft-deletes an asset.
    async fn soft_delete(&self, organization_id: Uuid, id: Uuid) -> Result<bool, DbError>;

    /// Gets the open assignment for an asset, if any.
    async fn active_assignment(&self, asset_id: Uuid)
        -> Result<Option<AssetAssignment>, DbError>;

    /// Lists open assignments across an organization (asset id ->
    /// person id), for device sync.
    async fn active_assignments(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<AssetAssignment>, DbError>;

    /// Opens a new assignment.
    async fn create_assignment(
        &self,
        assignment: &AssetAssignment,
    ) -> Result<AssetAssignment, DbError>;

    /// Closes an assignment (sets `returned_at`).
    async fn close_assignment(&self, assignment_id: Uuid) -> Result<(), DbError>;

    /// Lists the full assignment history of an asset.
    async fn list_assignments(&self, asset_id: Uuid) -> Result<Vec<AssetAssignment>, DbError>;

    /// Appends a lifecycle event.
    async fn record_event(&self, event: &LifecycleEvent) -> Result<LifecycleEvent, DbError>;

    /// Lists an asset's lifecycle events, newest first.
    async fn list_events(&self, asset_id: Uuid) -> Result<Vec<LifecycleEvent>, DbError>;
}

const ASSET_COLUMNS: &str = "id, organization_id, asset_tag, name, category, status, serial_number, manufacturer, model, mdm_device_id, compliance_state, last_synced_at, deleted_at, created_at, updated_at";
const ASSIGNMENT_COLUMNS: &str = "id, asset_id, person_id, assigned_by, assigned_at, returned_at";
const EVENT_COLUMNS: &str = "id, asset_id, kind, actor, note, created_at";

/// SQLite implementation of AssetRepository.
pub struct SqliteAssetRepository {
    pool: sqlx::SqlitePool,
}

impl SqliteAssetRepository {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

fn build_sqlite_filter(filter: &AssetFilter) -> (String, Vec<String>) {
    let mut clause = String::from("1=1");
    let mut params: Vec<String> = Vec::new();

    if !filter.include_deleted {
        clause.push_str(" AND deleted_at IS NULL");
    }
    if let Some(org_id) = filter.organization_id {
        clause.push_str(" AND organization_id = ?");
        params.push(org_id.to_string());
    }
    if let Some(status) = &filter.status {
        clause.push_str(" AND status = ?");
        params.push(status.as_str().to_string());
    }
    if let Some(category) = &filter.category {
        clause.push_str(" AND category = ?");
        params.push(category.clone());
    }
    if let Some(search) = &filter.search {
        clause.push_str(
            " AND (asset_tag LIKE ? ESCAPE '\\' OR name LIKE ? ESCAPE '\\' OR serial_number LIKE ? ESCAPE '\\')",
        );
        let pattern = make_like_pattern(search);
        params.push(pattern.clone());
        params.push(pattern.clone());
        params.push(pattern);
    }

    (clause, params)
}

#[async_trait]
impl AssetRepository for SqliteAssetRepository {
    async fn create(&self, asset: &Asset) -> Result<Asset, DbError> {
        sqlx::query(
            "INSERT INTO assets (id, organization_id, asset_tag, name, category, status, serial_number, manufacturer, model, mdm_device_id, compliance_state, last_synced_at, deleted_at, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(asset.id.to_string())
        .bind(asset.organization_id.to_string())
        .bind(&asset.asset_tag)
        .bind(&asset.name)
        .bind(asset.category.as_db_str())
        .bind(asset.status.as_str())
        .bind(&asset.serial_number)
        .bind(&asset.manufacturer)
        .bind(&asset.model)
        .bind(&asset.mdm_device_id)
        .bind(&asset.compliance_state)
        .bind(asset.last_synced_at.map(|t| t.to_rfc3339()))
        .bind(asset.deleted_at.map(|t| t.to_rfc3339()))
        .bind(asset.created_at.to_rfc3339())
        .bind(asset.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(asset.clone())
    }

    async fn get(&self, organization_id: Uuid, id: Uuid) -> Result<Option<Asset>, DbError> {
        let row: Option<SqliteAssetRow> = sqlx::query_as(&format!(
            "SELECT {} FROM assets WHERE id = ? AND organization_id = ?",
            ASSET_COLUMNS
        ))
        .bind(id.to_string())
        .bind(organization_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn get_by_tag(
        &self,
        organization_id: Uuid,
        tag: &str,
    ) -> Result<Option<Asset>, DbError> {
        let row: Option<SqliteAssetRow> = sqlx::query_as(&format!(
            "SELECT {} FROM assets WHERE organization_id = ? AND asset_tag = ?",
            ASSET_COLUMNS
        ))
        .bind(organization_id.to_string())
        .bind(tag)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list(
        &self,
        filter: &AssetFilter,
        pagination: &Pagination,
    ) -> Result<Vec<Asset>, DbError> {
        let (where_clause, params) = build_sqlite_filter(filter);
        let query = format!(
            "SELECT {} FROM assets WHERE {} ORDER BY asset_tag ASC LIMIT ? OFFSET ?",
            ASSET_COLUMNS, where_clause
        );

        let mut sqlx_query = sqlx::query_as::<_, SqliteAssetRow>(&query);
        for param in params {
            sqlx_query = sqlx_query.bind(param);
        }
        sqlx_query = sqlx_query
            .bind(pagination.limit() as i64)
            .bind(pagination.offset() as i64);

        let rows: Vec<SqliteAssetRow> = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn count(&self, filter: &AssetFilter) -> Result<u64, DbError> {
        let (where_clause, params) = build_sqlite_filter(filter);
        let query = format!("SELECT COUNT(*) FROM assets WHERE {}", where_clause);

        let mut sqlx_query = sqlx::query_scalar::<_, i64>(&query);
        for param in params {
            sqlx_query = sqlx_query.bind(param);
        }

        let count: i64 = sqlx_query.fetch_one(&self.pool).await?;
        Ok(count as u64)
    }

    async fn list_all_live(&self, organization_id: Uuid) -> Result<Vec<Asset>, DbError> {
        let rows: Vec<SqliteAssetRow> = sqlx::query_as(&format!(
            "SELECT {} FROM assets WHERE organization_id = ? AND deleted_at IS NULL ORDER BY asset_tag ASC",
            ASSET_COLUMNS
        ))
        .bind(organization_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save(&self, asset: &Asset) -> Result<Asset, DbError> {
        let result = sqlx::query(
            "UPDATE assets SET asset_tag = ?, name = ?, category = ?, status = ?, serial_number = ?, manufacturer = ?, model = ?, mdm_device_id = ?, compliance_state = ?, last_synced_at = ?, deleted_at = ?, updated_at = ? WHERE id = ? AND organization_id = ?",
        )
        .bind(&asset.asset_tag)
        .bind(&asset.name)
        .bind(asset.category.as_db_str())
        .bind(asset.status.as_str())
        .bind(&asset.serial_number)
        .bind(&asset.manufacturer)
        .bind(&asset.model)
        .bind(&asset.mdm_device_id)
        .bind(&asset.compliance_state)
        .bind(asset.last_synced_at.map(|t| t.to_rfc3339()))
        .bind(asset.deleted_at.map(|t| t.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .bind(asset.id.to_string())
        .bind(asset.organization_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Asset", asset.id));
        }

        Ok(asset.clone())
    }

    async fn soft_delete(&self, organization_id: Uuid, id: Uuid) -> Result<bool, DbError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE assets SET deleted_at = ?, updated_at = ? WHERE id = ? AND organization_id = ? AND deleted_at IS NULL",
        )
        .bind(&now)
        .bind(&now)
        .bind(id.to_string())
        .bind(organization_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn active_assignment(
        &self,
        asset_id: Uuid,
    ) -> Result<Option<AssetAssignment>, DbError> {
        let row: Option<SqliteAssignmentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM asset_assignments WHERE asset_id = ? AND returned_at IS NULL",
            ASSIGNMENT_COLUMNS
        ))
        .bind(asset_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn active_assignments(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<AssetAssignment>, DbError> {
        let rows: Vec<SqliteAssignmentRow> = sqlx::query_as(
            "SELECT a.id, a.asset_id, a.person_id, a.assigned_by, a.assigned_at, a.returned_at \
             FROM asset_assignments a JOIN assets s ON s.id = a.asset_id \
             WHERE s.organization_id = ? AND a.returned_at IS NULL",
        )
        .bind(organization_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn create_assignment(
        &self,
        assignment: &AssetAssignment,
    ) -> Result<AssetAssignment, DbError> {
        sqlx::query(
            "INSERT INTO asset_assignments (id, asset_id, person_id, assigned_by, assigned_at, returned_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(assignment.id.to_string())
        .bind(assignment.asset_id.to_string())
        .bind(assignment.person_id.to_string())
        .bind(&assignment.assigned_by)
        .bind(assignment.assigned_at.to_rfc3339())
        .bind(assignment.returned_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(assignment.clone())
    }

    async fn close_assignment(&self, assignment_id: Uuid) -> Result<(), DbError> {
        let result = sqlx::query(
            "UPDATE asset_assignments SET returned_at = ? WHERE id = ? AND returned_at IS NULL",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(assignment_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("AssetAssignment", assignment_id));
        }

        Ok(())
    }

    async fn list_assignments(&self, asset_id: Uuid) -> Result<Vec<AssetAssignment>, DbError> {
        let rows: Vec<SqliteAssignmentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM asset_assignments WHERE asset_id = ? ORDER BY assigned_at DESC",
            ASSIGNMENT_COLUMNS
        ))
        .bind(asset_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn record_event(&self, event: &LifecycleEvent) -> Result<LifecycleEvent, DbError> {
        sqlx::query(
            "INSERT INTO asset_events (id, asset_id, kind, actor, note, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(event.id.to_string())
        .bind(event.asset_id.to_string())
        .bind(event.kind.as_str())
        .bind(&event.actor)
        .bind(&event.note)
        .bind(event.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(event.clone())
    }

    async fn list_events(&self, asset_id: Uuid) -> Result<Vec<LifecycleEvent>, DbError> {
        let rows: Vec<SqliteEventRow> = sqlx::query_as(&format!(
            "SELECT {} FROM asset_events WHERE asset_id = ? ORDER BY created_at DESC",
            EVENT_COLUMNS
        ))
        .bind(asset_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

/// PostgreSQL implementation of AssetRepository.
pub struct PgAssetRepository {
    pool: sqlx::PgPool,
}

impl PgAssetRepository {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AssetRepository for PgAssetRepository {
    async fn create(&self, asset: &Asset) -> Result<Asset, DbError> {
        sqlx::query(
            "INSERT INTO assets (id, organization_id, asset_tag, name, category, status, serial_number, manufacturer, model, mdm_device_id, compliance_state, last_synced_at, deleted_at, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(asset.id)
        .bind(asset.organization_id)
        .bind(&asset.asset_tag)
        .bind(&asset.name)
        .bind(asset.category.as_db_str())
        .bind(asset.status.as_str())
        .bind(&asset.serial_number)
        .bind(&asset.manufacturer)
        .bind(&asset.model)
        .bind(&asset.mdm_device_id)
        .bind(&asset.compliance_state)
        .bind(asset.last_synced_at)
        .bind(asset.deleted_at)
        .bind(asset.created_at)
        .bind(asset.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(asset.clone())
    }

    async fn get(&self, organization_id: Uuid, id: Uuid) -> Result<Option<Asset>, DbError> {
        let row: Option<PgAssetRow> = sqlx::query_as(&format!(
            "SELECT {} FROM assets WHERE id = $1 AND organization_id = $2",
            ASSET_COLUMNS
        ))
        .bind(id)
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn get_by_tag(
        &self,
        organization_id: Uuid,
        tag: &str,
    ) -> Result<Option<Asset>, DbError> {
        let row: Option<PgAssetRow> = sqlx::query_as(&format!(
            "SELECT {} FROM assets WHERE organization_id = $1 AND asset_tag = $2",
            ASSET_COLUMNS
        ))
        .bind(organization_id)
        .bind(tag)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list(
        &self,
        filter: &AssetFilter,
        pagination: &Pagination,
    ) -> Result<Vec<Asset>, DbError> {
        let search_pattern = filter.search.as_ref().map(|s| make_like_pattern(s));

        let rows: Vec<PgAssetRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM assets
            WHERE ($1::boolean OR deleted_at IS NULL)
              AND ($2::uuid IS NULL OR organization_id = $2)
              AND ($3::text IS NULL OR status = $3)
              AND ($4::text IS NULL OR category = $4)
              AND ($5::text IS NULL OR asset_tag ILIKE $5 OR name ILIKE $5 OR serial_number ILIKE $5)
            ORDER BY asset_tag ASC
            LIMIT $6 OFFSET $7
            "#,
            ASSET_COLUMNS
        ))
        .bind(filter.include_deleted)
        .bind(filter.organization_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(&filter.category)
        .bind(&search_pattern)
        .bind(pagination.limit() as i64)
        .bind(pagination.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn count(&self, filter: &AssetFilter) -> Result<u64, DbError> {
        let search_pattern = filter.search.as_ref().map(|s| make_like_pattern(s));

        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM assets
            WHERE ($1::boolean OR deleted_at IS NULL)
              AND ($2::uuid IS NULL OR organization_id = $2)
              AND ($3::text IS NULL OR status = $3)
              AND ($4::text IS NULL OR category = $4)
              AND ($5::text IS NULL OR asset_tag ILIKE $5 OR name ILIKE $5 OR serial_number ILIKE $5)
            "#,
        )
        .bind(filter.include_deleted)
        .bind(filter.organization_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(&filter.category)
        .bind(&search_pattern)
        .fetch_one(&self.pool)
        .await?;

        Ok(count as u64)
    }

    async fn list_all_live(&self, organization_id: Uuid) -> Result<Vec<Asset>, DbError> {
        let rows: Vec<PgAssetRow> = sqlx::query_as(&format!(
            "SELECT {} FROM assets WHERE organization_id = $1 AND deleted_at IS NULL ORDER BY asset_tag ASC",
            ASSET_COLUMNS
        ))
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save(&self, asset: &Asset) -> Result<Asset, DbError> {
        let result = sqlx::query(
            "UPDATE assets SET asset_tag = $1, name = $2, category = $3, status = $4, serial_number = $5, manufacturer = $6, model = $7, mdm_device_id = $8, compliance_state = $9, last_synced_at = $10, deleted_at = $11, updated_at = NOW() WHERE id = $12 AND organization_id = $13",
        )
        .bind(&asset.asset_tag)
        .bind(&asset.name)
        .bind(asset.category.as_db_str())
        .bind(asset.status.as_str())
        .bind(&asset.serial_number)
        .bind(&asset.manufacturer)
        .bind(&asset.model)
        .bind(&asset.mdm_device_id)
        .bind(&asset.compliance_state)
        .bind(asset.last_synced_at)
        .bind(asset.deleted_at)
        .bind(asset.id)
        .bind(asset.organization_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Asset", asset.id));
        }

        Ok(asset.clone())
    }

    async fn soft_delete(&self, organization_id: Uuid, id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query(
            "UPDATE assets SET deleted_at = NOW(), updated_at = NOW() WHERE id = $1 AND organization_id = $2 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(organization_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn active_assignment(
        &self,
        asset_id: Uuid,
    ) -> Result<Option<AssetAssignment>, DbError> {
        let row: Option<PgAssignmentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM asset_assignments WHERE asset_id = $1 AND returned_at IS NULL",
            ASSIGNMENT_COLUMNS
        ))
        .bind(asset_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn active_assignments(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<AssetAssignment>, DbError> {
        let rows: Vec<PgAssignmentRow> = sqlx::query_as(
            "SELECT a.id, a.asset_id, a.person_id, a.assigned_by, a.assigned_at, a.returned_at \
             FROM asset_assignments a JOIN assets s ON s.id = a.asset_id \
             WHERE s.organization_id = $1 AND a.returned_at IS NULL",
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn create_assignment(
        &self,
        assignment: &AssetAssignment,
    ) -> Result<AssetAssignment, DbError> {
        sqlx::query(
            "INSERT INTO asset_assignments (id, asset_id, person_id, assigned_by, assigned_at, returned_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(assignment.id)
        .bind(assignment.asset_id)
        .bind(assignment.person_id)
        .bind(&assignment.assigned_by)
        .bind(assignment.assigned_at)
        .bind(assignment.returned_at)
        .execute(&self.pool)
        .await?;

        Ok(assignment.clone())
    }

    async fn close_assignment(&self, assignment_id: Uuid) -> Result<(), DbError> {
        let result = sqlx::query(
            "UPDATE asset_assignments SET returned_at = NOW() WHERE id = $1 AND returned_at IS NULL",
        )
        .bind(assignment_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("AssetAssignment", assignment_id));
        }

        Ok(())
    }

    async fn list_assignments(&self, asset_id: Uuid) -> Result<Vec<AssetAssignment>, DbError> {
        let rows: Vec<PgAssignmentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM asset_assignments WHERE asset_id = $1 ORDER BY assigned_at DESC",
            ASSIGNMENT_COLUMNS
        ))
        .bind(asset_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn record_event(&self, event: &LifecycleEvent) -> Result<LifecycleEvent, DbError> {
        sqlx::query(
            "INSERT INTO asset_events (id, asset_id, kind, actor, note, created_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(event.id)
        .bind(event.asset_id)
        .bind(event.kind.as_str())
        .bind(&event.actor)
        .bind(&event.note)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;

        Ok(event.clone())
    }

    async fn list_events(&self, asset_id: Uuid) -> Result<Vec<LifecycleEvent>, DbError> {
        let rows: Vec<PgEventRow> = sqlx::query_as(&format!(
            "SELECT {} FROM asset_events WHERE asset_id = $1 ORDER BY created_at DESC",
            EVENT_COLUMNS
        ))
        .bind(asset_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

/// Factory selecting the implementation for the pool's backend.
pub fn create_asset_repository(pool: &DbPool) -> Box<dyn AssetRepository> {
    match pool {
        DbPool::Sqlite(pool) => Box::new(SqliteAssetRepository::new(pool.clone())),
        DbPool::Postgres(pool) => Box::new(PgAssetRepository::new(pool.clone())),
    }
}

#[derive(sqlx::FromRow)]
struct SqliteAssetRow {
    id: String,
    organization_id: String,
    asset_tag: String,
    name: String,
    category: String,
    status: String,
    serial_number: Option<String>,
    manufacturer: Option<String>,
    model: Option<String>,
    mdm_device_id: Option<String>,
    compliance_state: Option<String>,
    last_synced_at: Option<String>,
    deleted_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SqliteAssetRow> for Asset {
    type Error = DbError;

    fn try_from(row: SqliteAssetRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<AssetStatus>()
            .map_err(|_| DbError::Serialization(format!("Invalid asset status: {}", row.status)))?;

        Ok(Asset {
            id: parse_uuid(&row.id)?,
            organization_id: parse_uuid(&row.organization_id)?,
            asset_tag: row.asset_tag,
            name: row.name,
            category: AssetCategory::parse(&row.category),
            status,
            serial_number: row.serial_number,
            manufacturer: row.manufacturer,
            model: row.model,
            mdm_device_id: row.mdm_device_id,
            compliance_state: row.compliance_state,
            last_synced_at: parse_opt_ts(row.last_synced_at.as_deref())?,
            deleted_at: parse_opt_ts(row.deleted_at.as_deref())?,
            created_at: parse_ts(&row.created_at)?,
            updated_at: parse_ts(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgAssetRow {
    id: Uuid,
    organization_id: Uuid,
    asset_tag: String,
    name: String,
    category: String,
    status: String,
    serial_number: Option<String>,
    manufacturer: Option<String>,
    model: Option<String>,
    mdm_device_id: Option<String>,
    compliance_state: Option<String>,
    last_synced_at: Option<DateTime<Utc>>,
    deleted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PgAssetRow> for Asset {
    type Error = DbError;

    fn try_from(row: PgAssetRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<AssetStatus>()
            .map_err(|_| DbError::Serialization(format!("Invalid asset status: {}", row.status)))?;

        Ok(Asset {
            id: row.id,
            organization_id: row.organization_id,
            asset_tag: row.asset_tag,
            name: row.name,
            category: AssetCategory::parse(&row.category),
            status,
            serial_number: row.serial_number,
            manufacturer: row.manufacturer,
            model: row.model,
            mdm_device_id: row.mdm_device_id,
            compliance_state: row.compliance_state,
            last_synced_at: row.last_synced_at,
            deleted_at: row.deleted_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SqliteAssignmentRow {
    id: String,
    asset_id: String,
    person_id: String,
    assigned_by: String,
    assigned_at: String,
    returned_at: Option<String>,
}

impl TryFrom<SqliteAssignmentRow> for AssetAssignment {
    type Error = DbError;

    fn try_from(row: SqliteAssignmentRow) -> Result<Self, Self::Error> {
        Ok(AssetAssignment {
            id: parse_uuid(&row.id)?,
            asset_id: parse_uuid(&row.asset_id)?,
            person_id: parse_uuid(&row.person_id)?,
            assigned_by: row.assigned_by,
            assigned_at: parse_ts(&row.assigned_at)?,
            returned_at: parse_opt_ts(row.returned_at.as_deref())?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgAssignmentRow {
    id: Uuid,
    asset_id: Uuid,
    person_id: Uuid,
    assigned_by: String,
    assigned_at: DateTime<Utc>,
    returned_at: Option<DateTime<Utc>>,
}

impl TryFrom<PgAssignmentRow> for AssetAssignment {
    type Error = DbError;

    fn try_from(row: PgAssignmentRow) -> Result<Self, Self::Error> {
        Ok(AssetAssignment {
            id: row.id,
            asset_id: row.asset_id,
            person_id: row.person_id,
            assigned_by: row.assigned_by,
            assigned_at: row.assigned_at,
            returned_at: row.returned_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SqliteEventRow {
    id: String,
    asset_id: String,
    kind: String,
    actor: String,
    note: Option<String>,
    created_at: String,
}

impl TryFrom<SqliteEventRow> for LifecycleEvent {
    type Error = DbError;

    fn try_from(row: SqliteEventRow) -> Result<Self, Self::Error> {
        let kind = row
            .kind
            .parse::<LifecycleEventKind>()
            .map_err(|_| DbError::Serialization(format!("Invalid event kind: {}", row.kind)))?;

        Ok(LifecycleEvent {
            id: parse_uuid(&row.id)?,
            asset_id: parse_uuid(&row.asset_id)?,
            kind,
            actor: row.actor,
            note: row.note,
            created_at: parse_ts(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgEventRow {
    id: Uuid,
    asset_id: Uuid,
    kind: String,
    actor: String,
    note: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<PgEventRow> for LifecycleEvent {
    type Error = DbError;

    fn try_from(row: PgEventRow) -> Result<Self, Self::Error> {
        let kind = row
            .kind
            .parse::<LifecycleEventKind>()
            .map_err(|_| DbError::Serialization(format!("Invalid event kind: {}", row.kind)))?;

        Ok(LifecycleEvent {
            id: row.id,
            asset_id: row.asset_id,
            kind,
            actor: row.actor,
            note: row.note,
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
    async fn test_asset_crud_and_tag_uniqueness() {
        let (pool, org_id) = setup().await;
        let repo = create_asset_repository(&pool);

        let asset = Asset::new(org_id, "AST-0001", "MacBook", AssetCategory::Laptop);
        repo.create(&asset).await.unwrap();

        let fetched = repo.get(org_id, asset.id).await.unwrap().unwrap();
        assert_eq!(fetched.asset_tag, "AST-0001");
        assert_eq!(fetched.category, AssetCategory::Laptop);

        let by_tag = repo.get_by_tag(org_id, "AST-0001").await.unwrap().unwrap();
        assert_eq!(by_tag.id, asset.id);

        // Same tag in the same org violates the unique constraint
        let dup = repo
            .create(&Asset::new(org_id, "AST-0001", "Other", AssetCategory::Monitor))
            .await;
        assert!(matches!(dup, Err(DbError::Constraint(_))));
    }

    #[tokio::test]
    async fn test_soft_delete_excluded_from_listings() {
        let (pool, org_id) = setup().await;
        let repo = create_asset_repository(&pool);

        let asset = Asset::new(org_id, "AST-0001", "MacBook", AssetCategory::Laptop);
        repo.create(&asset).await.unwrap();
        assert!(repo.soft_delete(org_id, asset.id).await.unwrap());
        // Second soft delete is a no-op
        assert!(!repo.soft_delete(org_id, asset.id).await.unwrap());

        let filter = AssetFilter {
            organization_id: Some(org_id),
            ..Default::default()
        };
        assert_eq!(repo.count(&filter).await.unwrap(), 0);

        let with_deleted = AssetFilter {
            organization_id: Some(org_id),
            include_deleted: true,
            ..Default::default()
        };
        assert_eq!(repo.count(&with_deleted).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_assignment_lifecycle() {
        let (pool, org_id) = setup().await;
        let repo = create_asset_repository(&pool);

        let asset = Asset::new(org_id, "AST-0001", "MacBook", AssetCategory::Laptop);
        repo.create(&asset).await.unwrap();
        let person_id = Uuid::new_v4();

        assert!(repo.active_assignment(asset.id).await.unwrap().is_none());

        let assignment = AssetAssignment::new(asset.id, person_id, "admin:it");
        repo.create_assignment(&assignment).await.unwrap();

        let active = repo.active_assignment(asset.id).await.unwrap().unwrap();
        assert_eq!(active.person_id, person_id);

        let org_active = repo.active_assignments(org_id).await.unwrap();
        assert_eq!(org_active.len(), 1);

        repo.close_assignment(assignment.id).await.unwrap();
        assert!(repo.active_assignment(asset.id).await.unwrap().is_none());

        let history = repo.list_assignments(asset.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].returned_at.is_some());

        // Closing twice fails
        assert!(repo.close_assignment(assignment.id).await.is_err());
    }

    #[tokio::test]
    async fn test_events_ordering() {
        let (pool, org_id) = setup().await;
        let repo = create_asset_repository(&pool);

        let asset = Asset::new(org_id, "AST-0001", "MacBook", AssetCategory::Laptop);
        repo.create(&asset).await.unwrap();

        let mut first = LifecycleEvent::new(asset.id, LifecycleEventKind::Registered, "system");
        first.created_at = Utc::now() - chrono::Duration::minutes(5);
        repo.record_event(&first).await.unwrap();
        repo.record_event(&LifecycleEvent::new(
            asset.id,
            LifecycleEventKind::Assigned,
            "admin:it",
        ))
        .await
        .unwrap();

        let events = repo.list_events(asset.id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, LifecycleEventKind::Assigned);
        assert_eq!(events[1].kind, LifecycleEventKind::Registered);
    }
}
