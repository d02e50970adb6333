//! Organization status and settings types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle status of an organization.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrganizationStatus {
    /// Fully operational.
    Active,
    /// Access suspended (billing, abuse); data retained.
    Suspended,
    /// Marked for deletion; read-only until purged.
    PendingDeletion,
}

impl OrganizationStatus {
    /// Returns true if members of the organization may read and write.
    pub fn is_operational(&self) -> bool {
        matches!(self, OrganizationStatus::Active)
    }

    /// Returns the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrganizationStatus::Active => "active",
            OrganizationStatus::Suspended => "suspended",
            OrganizationStatus::PendingDeletion => "pending_deletion",
        }
    }
}

impl std::fmt::Display for OrganizationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrganizationStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(OrganizationStatus::Active),
            "suspended" => Ok(OrganizationStatus::Suspended),
            "pending_deletion" => Ok(OrganizationStatus::PendingDeletion),
            _ => Err(()),
        }
    }
}

/// Per-organization configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrganizationSettings {
    /// Prefix used when generating asset tags (e.g., "KL" -> "KL-0042").
    pub asset_tag_prefix: String,
    /// Whether device sync may retire assets that disappeared from the
    /// MDM.
    pub sync_retires_orphans: bool,
    /// Default due window, in days, for document rollouts.
    pub rollout_due_days: i64,
    /// Feature overrides keyed by feature name.
    pub feature_overrides: HashMap<String, bool>,
}

impl Default for OrganizationSettings {
    fn default() -> Self {
        Self {
            asset_tag_prefix: "AST".to_string(),
            sync_retires_orphans: false,
            rollout_due_days: 14,
            feature_overrides: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_operational() {
        assert!(OrganizationStatus::Active.is_operational());
        assert!(!OrganizationStatus::Suspended.is_operational());
        assert!(!OrganizationStatus::PendingDeletion.is_operational());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            OrganizationStatus::Active,
            OrganizationStatus::Suspended,
            OrganizationStatus::PendingDeletion,
        ] {
            let parsed: OrganizationStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("bogus".parse::<OrganizationStatus>().is_err());
    }

    #[test]
    fn test_settings_default() {
        let settings = OrganizationSettings::default();
        assert_eq!(settings.asset_tag_prefix, "AST");
        assert!(!settings.sync_retires_orphans);
        assert_eq!(settings.rollout_due_days, 14);
    }
}
