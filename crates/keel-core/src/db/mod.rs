//! Database layer for Keel.
//!
//! Persistence via SQLx: SQLite for development and tests, PostgreSQL
//! for production. Every repository is a trait with one implementation
//! per backend and a `create_*_repository` factory dispatching on the
//! pool type.

mod convert;
mod error;
mod pagination;
mod pool;
pub mod retry;
mod schema;

pub mod api_key_repo;
pub mod asset_repo;
pub mod audit_repo;
pub mod document_repo;
pub mod org_repo;
pub mod person_repo;
pub mod security_repo;
pub mod seed;
pub mod team_repo;
pub mod user_repo;
pub mod workflow_repo;

pub use error::DbError;
pub use pagination::{PaginatedResult, Pagination, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use pool::{
    create_pool, create_pool_with_options, escape_like_pattern, make_like_pattern, DbPool,
    PoolOptions,
};
pub use retry::{is_transient_error, with_retry, RetryConfig};
pub use schema::run_migrations;

// Repository traits and types
pub use api_key_repo::ApiKeyRepository;
pub use asset_repo::{AssetFilter, AssetRepository};
pub use audit_repo::{AuditEntry, AuditFilter, AuditRepository};
pub use document_repo::{AckOutcome, AckProgress, DocumentRepository};
pub use org_repo::OrganizationRepository;
pub use person_repo::{PersonFilter, PersonRepository};
pub use security_repo::SecurityRepository;
pub use team_repo::TeamRepository;
pub use user_repo::UserRepository;
pub use workflow_repo::{InstanceFilter, WorkflowRepository};

// Factory functions
pub use api_key_repo::create_api_key_repository;
pub use asset_repo::create_asset_repository;
pub use audit_repo::create_audit_repository;
pub use document_repo::create_document_repository;
pub use org_repo::create_organization_repository;
pub use person_repo::create_person_repository;
pub use security_repo::create_security_repository;
pub use team_repo::create_team_repository;
pub use user_repo::create_user_repository;
pub use workflow_repo::create_workflow_repository;

pub use seed::ensure_admin_user;
