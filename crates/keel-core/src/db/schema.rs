//! Database schema and migrations.

use super::{DbError, DbPool};
use tracing::info;

/// Runs the embedded migrations for the pool's backend.
pub async fn run_migrations(pool: &DbPool) -> Result<(), DbError> {
    match pool {
        DbPool::Sqlite(pool) => {
            info!("Running SQLite migrations");
            sqlx::migrate!("src/db/migrations/sqlite").run(pool).await?;
        }
        DbPool::Postgres(pool) => {
            info!("Running PostgreSQL migrations");
            sqlx::migrate!("src/db/migrations/postgres")
                .run(pool)
                .await?;
        }
    }

    info!("Migrations completed successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_pool;

    #[tokio::test]
    async fn test_migrations_run_on_sqlite() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        // Running them again is a no-op
        run_migrations(&pool).await.unwrap();
    }
}
