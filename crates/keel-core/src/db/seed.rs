//! Database seeding.
//!
//! First-run setup: a default organization and an admin user.

use super::{
    create_organization_repository, create_user_repository, DbError, DbPool,
};
use crate::auth::{password::hash_password, Role, User};
use crate::tenant::Organization;
use rand::Rng;
use thiserror::Error;
use tracing::{info, warn};

/// Errors from seeding.
#[derive(Error, Debug)]
pub enum SeedError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error("Failed to hash admin password: {0}")]
    Password(#[from] crate::auth::password::PasswordError),

    #[error("Invalid default organization slug: {0}")]
    Org(#[from] crate::tenant::OrgError),
}

/// Result of a first-run seed.
#[derive(Debug)]
pub struct SeededAdmin {
    /// The created organization's id.
    pub organization_id: uuid::Uuid,
    /// The generated admin password (shown once).
    pub password: String,
}

/// Ensures a default organization and admin user exist.
///
/// On an empty database, creates:
/// - organization: slug `default`, name "Default Organization"
/// - user: `admin` with the password from `KEEL_ADMIN_PASSWORD`, or a
///   generated one
///
/// Returns `Ok(Some(..))` when an admin was created, `Ok(None)` when
/// users already exist.
pub async fn ensure_admin_user(pool: &DbPool) -> Result<Option<SeededAdmin>, SeedError> {
    let user_repo = create_user_repository(pool);

    if user_repo.any_exist().await? {
        info!("Users already exist, skipping admin seed");
        return Ok(None);
    }

    let org_repo = create_organization_repository(pool);
    let org = match org_repo.get_by_slug("default").await? {
        Some(org) => org,
        None => {
            let org = Organization::new("default", "Default Organization")?;
            org_repo.create(&org).await?
        }
    };

    let password = std::env::var("KEEL_ADMIN_PASSWORD").ok().unwrap_or_else(|| {
        let generated = generate_password();
        warn!("No KEEL_ADMIN_PASSWORD set, generated a random password");
        generated
    });

    let password_hash = hash_password(&password)?;
    let admin = User::new(org.id, "admin@localhost", "admin", password_hash, Role::Admin);
    user_repo.create(&admin).await?;

    info!("Created default admin user: admin");

    Ok(Some(SeededAdmin {
        organization_id: org.id,
        password,
    }))
}

/// Generates a 16-character password with mixed character classes.
fn generate_password() -> String {
    const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
    const DIGITS: &[u8] = b"0123456789";
    const SPECIAL: &[u8] = b"!@#$%^&*";

    let mut rng = rand::thread_rng();
    let mut password = Vec::with_capacity(16);

    password.push(UPPER[rng.gen_range(0..UPPER.len())]);
    password.push(LOWER[rng.gen_range(0..LOWER.len())]);
    password.push(DIGITS[rng.gen_range(0..DIGITS.len())]);
    password.push(SPECIAL[rng.gen_range(0..SPECIAL.len())]);

    let all: Vec<u8> = [UPPER, LOWER, DIGITS, SPECIAL].concat();
    for _ in 0..12 {
        password.push(all[rng.gen_range(0..all.len())]);
    }

    for i in (1..password.len()).rev() {
        let j = rng.gen_range(0..=i);
        password.swap(i, j);
    }

    String::from_utf8(password).expect("password bytes are ASCII")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::{validate_password_strength, verify_password};
    use crate::db::{create_pool, run_migrations};

    #[test]
    fn test_generated_password_meets_policy() {
        let password = generate_password();
        assert_eq!(password.len(), 16);
        assert!(validate_password_strength(&password).is_empty());
    }

    #[tokio::test]
    async fn test_seed_creates_admin_once() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        std::env::remove_var("KEEL_ADMIN_PASSWORD");

        let seeded = ensure_admin_user(&pool).await.unwrap().unwrap();

        let user_repo = create_user_repository(&pool);
        let admin = user_repo
            .get_by_username(seeded.organization_id, "admin")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(admin.role, Role::Admin);
        assert!(verify_password(&seeded.password, &admin.password_hash).unwrap());

        // Second run is a no-op
        assert!(ensure_admin_user(&pool).await.unwrap().is_none());
    }
}
