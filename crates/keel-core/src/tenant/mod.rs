//! Multi-tenant support for Keel.
//!
//! Every domain record belongs to exactly one organization, and every
//! repository query is scoped by organization id. This module provides:
//! - `Organization`: the tenant entity with settings and lifecycle
//! - `OrgContext`: cheap request-scoped organization context
//! - `OrganizationSettings` / `OrganizationStatus`

mod types;

pub use types::{OrganizationSettings, OrganizationStatus};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during organization operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrgError {
    /// Slug validation failed.
    #[error("Invalid organization slug: {0}")]
    InvalidSlug(String),

    /// Organization not found.
    #[error("Organization not found: {0}")]
    NotFound(Uuid),

    /// Organization is not in an operational state.
    #[error("Organization is not operational (status: {0})")]
    NotOperational(OrganizationStatus),
}

/// Validates an organization slug:
/// - lowercase alphanumeric characters and hyphens only
/// - 3-63 characters
/// - starts with a letter
/// - no trailing hyphen, no consecutive hyphens
pub fn validate_slug(slug: &str) -> Result<(), OrgError> {
    if slug.len() < 3 || slug.len() > 63 {
        return Err(OrgError::InvalidSlug(format!(
            "Slug must be between 3 and 63 characters, got {}",
            slug.len()
        )));
    }

    let first_char = slug.chars().next().unwrap();
    if !first_char.is_ascii_lowercase() {
        return Err(OrgError::InvalidSlug(
            "Slug must start with a lowercase letter".to_string(),
        ));
    }

    if slug.ends_with('-') {
        return Err(OrgError::InvalidSlug(
            "Slug cannot end with a hyphen".to_string(),
        ));
    }

    let mut prev_hyphen = false;
    for ch in slug.chars() {
        if ch == '-' {
            if prev_hyphen {
                return Err(OrgError::InvalidSlug(
                    "Slug cannot contain consecutive hyphens".to_string(),
                ));
            }
            prev_hyphen = true;
        } else if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            prev_hyphen = false;
        } else {
            return Err(OrgError::InvalidSlug(format!(
                "Slug contains invalid character '{}'. Only lowercase letters, digits, and hyphens are allowed",
                ch
            )));
        }
    }

    Ok(())
}

/// An organization: the unit of tenancy.
///
/// Owns its users, people, assets, compliance records, documents, and
/// workflows; nothing crosses organization boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    /// Unique identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// URL-safe identifier used for routing.
    pub slug: String,
    /// Lifecycle status.
    pub status: OrganizationStatus,
    /// Organization-specific settings.
    pub settings: OrganizationSettings,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    /// Creates a new active organization after validating the slug.
    ///
    /// # Errors
    ///
    /// Returns `OrgError::InvalidSlug` when the slug is malformed.
    pub fn new(slug: &str, name: &str) -> Result<Self, OrgError> {
        validate_slug(slug)?;

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            slug: slug.to_string(),
            status: OrganizationStatus::Active,
            settings: OrganizationSettings::default(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Creates an organization with a fixed id (deserialization/tests).
    pub fn with_id(id: Uuid, slug: &str, name: &str) -> Result<Self, OrgError> {
        let mut org = Self::new(slug, name)?;
        org.id = id;
        Ok(org)
    }

    /// Returns true if the organization is operational.
    pub fn is_operational(&self) -> bool {
        self.status.is_operational()
    }

    /// Replaces the settings and bumps `updated_at`.
    pub fn update_settings(&mut self, settings: OrganizationSettings) {
        self.settings = settings;
        self.updated_at = Utc::now();
    }

    /// Changes the status and bumps `updated_at`.
    pub fn update_status(&mut self, status: OrganizationStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Request-scoped organization context.
///
/// Cloning is cheap: the settings are shared behind an `Arc`.
#[derive(Debug, Clone)]
pub struct OrgContext {
    /// The organization's id.
    pub organization_id: Uuid,
    /// The organization's slug.
    pub slug: String,
    /// Shared settings.
    pub settings: Arc<OrganizationSettings>,
}

impl OrgContext {
    /// Builds a context from an organization entity.
    pub fn from_organization(org: &Organization) -> Self {
        Self {
            organization_id: org.id,
            slug: org.slug.clone(),
            settings: Arc::new(org.settings.clone()),
        }
    }

    /// Builds a context from explicit values.
    pub fn new(organization_id: Uuid, slug: String, settings: Arc<OrganizationSettings>) -> Self {
        Self {
            organization_id,
            slug,
            settings,
        }
    }

    /// Checks a feature override for this organization.
    pub fn feature_override(&self, feature: &str) -> Option<bool> {
        self.settings.feature_overrides.get(feature).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_organization_creation() {
        let org = Organization::new("acme-corp", "Acme Corporation").unwrap();
        assert_eq!(org.slug, "acme-corp");
        assert_eq!(org.name, "Acme Corporation");
        assert_eq!(org.status, OrganizationStatus::Active);
        assert!(org.is_operational());
    }

    #[test]
    fn test_slug_validation_valid() {
        assert!(validate_slug("abc").is_ok());
        assert!(validate_slug("acme-corp").is_ok());
        assert!(validate_slug("org42").is_ok());
        assert!(validate_slug("a-b-c").is_ok());
        assert!(validate_slug("a".repeat(63).as_str()).is_ok());
    }

    #[test]
    fn test_slug_validation_length() {
        assert!(validate_slug("ab").is_err());
        assert!(validate_slug(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_slug_validation_shape() {
        assert!(validate_slug("1acme").is_err());
        assert!(validate_slug("-acme").is_err());
        assert!(validate_slug("acme-").is_err());
        assert!(validate_slug("ac--me").is_err());
        assert!(validate_slug("Acme").is_err());
        assert!(validate_slug("ac_me").is_err());
        assert!(validate_slug("ac.me").is_err());
    }

    #[test]
    fn test_update_status() {
        let mut org = Organization::new("test-org", "Test Org").unwrap();
        org.update_status(OrganizationStatus::Suspended);
        assert_eq!(org.status, OrganizationStatus::Suspended);
        assert!(!org.is_operational());
    }

    #[test]
    fn test_context_shares_settings() {
        let org = Organization::new("test-org", "Test Org").unwrap();
        let ctx1 = OrgContext::from_organization(&org);
        let ctx2 = ctx1.clone();
        assert!(Arc::ptr_eq(&ctx1.settings, &ctx2.settings));
        assert_eq!(ctx1.organization_id, org.id);
    }

    #[test]
    fn test_feature_override() {
        let mut org = Organization::new("test-org", "Test Org").unwrap();
        org.settings
            .feature_overrides
            .insert("sso".to_string(), true);
        let ctx = OrgContext::from_organization(&org);
        assert_eq!(ctx.feature_override("sso"), Some(true));
        assert_eq!(ctx.feature_override("unknown"), None);
    }

    #[test]
    fn test_organization_serialization() {
        let org = Organization::new("test-org", "Test Org").unwrap();
        let json = serde_json::to_string(&org).unwrap();
        let parsed: Organization = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, org.id);
        assert_eq!(parsed.slug, org.slug);
        assert_eq!(parsed.status, org.status);
    }
}
