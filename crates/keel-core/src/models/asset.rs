//! Hardware asset data model.
//!
//! Assets are tracked pieces of hardware (laptops, monitors, phones).
//! Each carries an organization-unique asset tag; assignment history
//! and lifecycle events are separate records so the full chain of
//! custody is preserved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Category of a hardware asset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AssetCategory {
    Laptop,
    Desktop,
    MobileDevice,
    Monitor,
    Peripheral,
    Server,
    /// Anything the fixed categories don't cover.
    Other(String),
}

impl AssetCategory {
    /// Parses a category string; unknown values become `Other`.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "laptop" => AssetCategory::Laptop,
            "desktop" => AssetCategory::Desktop,
            "mobile_device" => AssetCategory::MobileDevice,
            "monitor" => AssetCategory::Monitor,
            "peripheral" => AssetCategory::Peripheral,
            "server" => AssetCategory::Server,
            other => AssetCategory::Other(other.to_string()),
        }
    }

    /// Returns the category as a lowercase string for storage.
    pub fn as_db_str(&self) -> String {
        match self {
            AssetCategory::Laptop => "laptop".to_string(),
            AssetCategory::Desktop => "desktop".to_string(),
            AssetCategory::MobileDevice => "mobile_device".to_string(),
            AssetCategory::Monitor => "monitor".to_string(),
            AssetCategory::Peripheral => "peripheral".to_string(),
            AssetCategory::Server => "server".to_string(),
            AssetCategory::Other(s) => s.clone(),
        }
    }

    /// Infers a category from an operating system name reported by an
    /// MDM, defaulting to laptop for desktop OSes.
    pub fn from_operating_system(os: &str) -> Self {
        match os.to_lowercase().as_str() {
            "ios" | "android" => AssetCategory::MobileDevice,
            "windows" | "macos" | "linux" => AssetCategory::Laptop,
            other => AssetCategory::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for AssetCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetCategory::Laptop => write!(f, "Laptop"),
            AssetCategory::Desktop => write!(f, "Desktop"),
            AssetCategory::MobileDevice => write!(f, "Mobile Device"),
            AssetCategory::Monitor => write!(f, "Monitor"),
            AssetCategory::Peripheral => write!(f, "Peripheral"),
            AssetCategory::Server => write!(f, "Server"),
            AssetCategory::Other(name) => write!(f, "Other: {}", name),
        }
    }
}

/// Lifecycle status of an asset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssetStatus {
    /// Available for assignment.
    InStock,
    /// Checked out to a person.
    Assigned,
    /// At a repair vendor or IT bench.
    InRepair,
    /// Removed from service.
    Retired,
}

impl AssetStatus {
    /// Returns the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::InStock => "in_stock",
            AssetStatus::Assigned => "assigned",
            AssetStatus::InRepair => "in_repair",
            AssetStatus::Retired => "retired",
        }
    }
}

impl std::fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AssetStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_stock" => Ok(AssetStatus::InStock),
            "assigned" => Ok(AssetStatus::Assigned),
            "in_repair" => Ok(AssetStatus::InRepair),
            "retired" => Ok(AssetStatus::Retired),
            _ => Err(()),
        }
    }
}

/// A tracked hardware asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    /// Unique identifier.
    pub id: Uuid,
    /// Organization the asset belongs to.
    pub organization_id: Uuid,
    /// Asset tag, unique per organization (e.g., "AST-0042").
    pub asset_tag: String,
    /// Display name.
    pub name: String,
    /// Hardware category.
    pub category: AssetCategory,
    /// Lifecycle status.
    pub status: AssetStatus,
    /// Hardware serial number.
    pub serial_number: Option<String>,
    /// Manufacturer.
    pub manufacturer: Option<String>,
    /// Model.
    pub model: Option<String>,
    /// MDM device id when the asset is managed (Intune).
    pub mdm_device_id: Option<String>,
    /// Compliance state last reported by the MDM.
    pub compliance_state: Option<String>,
    /// When the asset was last reconciled against the MDM.
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Soft-delete marker.
    pub deleted_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Asset {
    /// Creates a new in-stock asset.
    pub fn new(
        organization_id: Uuid,
        asset_tag: impl Into<String>,
        name: impl Into<String>,
        category: AssetCategory,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            asset_tag: asset_tag.into(),
            name: name.into(),
            category,
            status: AssetStatus::InStock,
            serial_number: None,
            manufacturer: None,
            model: None,
            mdm_device_id: None,
            compliance_state: None,
            last_synced_at: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// True unless soft-deleted.
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// True if the asset may be assigned right now.
    pub fn is_assignable(&self) -> bool {
        self.is_live() && self.status == AssetStatus::InStock
    }
}

/// A check-out of an asset to a person.
///
/// At most one assignment per asset may be open (`returned_at` unset);
/// the rule is enforced by the assignment operations, not the schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetAssignment {
    /// Unique identifier.
    pub id: Uuid,
    /// The assigned asset.
    pub asset_id: Uuid,
    /// The person holding the asset.
    pub person_id: Uuid,
    /// Audit identity of whoever made the assignment.
    pub assigned_by: String,
    /// When the assignment started.
    pub assigned_at: DateTime<Utc>,
    /// When the asset was returned; open while unset.
    pub returned_at: Option<DateTime<Utc>>,
}

impl AssetAssignment {
    /// Opens a new assignment.
    pub fn new(asset_id: Uuid, person_id: Uuid, assigned_by: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            asset_id,
            person_id,
            assigned_by: assigned_by.into(),
            assigned_at: Utc::now(),
            returned_at: None,
        }
    }

    /// True while the assignment is open.
    pub fn is_active(&self) -> bool {
        self.returned_at.is_none()
    }
}

/// Kind of a lifecycle event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventKind {
    /// Asset entered the inventory.
    Registered,
    /// Checked out to a person.
    Assigned,
    /// Returned to stock.
    Returned,
    /// Sent to repair.
    Repair,
    /// Removed from service.
    Retired,
    /// Updated by device sync.
    Synced,
}

impl LifecycleEventKind {
    /// Returns the kind as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEventKind::Registered => "registered",
            LifecycleEventKind::Assigned => "assigned",
            LifecycleEventKind::Returned => "returned",
            LifecycleEventKind::Repair => "repair",
            LifecycleEventKind::Retired => "retired",
            LifecycleEventKind::Synced => "synced",
        }
    }
}

impl std::fmt::Display for LifecycleEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LifecycleEventKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "registered" => Ok(LifecycleEventKind::Registered),
            "assigned" => Ok(LifecycleEventKind::Assigned),
            "returned" => Ok(LifecycleEventKind::Returned),
            "repair" => Ok(LifecycleEventKind::Repair),
            "retired" => Ok(LifecycleEventKind::Retired),
            "synced" => Ok(LifecycleEventKind::Synced),
            _ => Err(()),
        }
    }
}

/// An append-only lifecycle event for an asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Unique identifier.
    pub id: Uuid,
    /// The asset this event belongs to.
    pub asset_id: Uuid,
    /// Event kind.
    pub kind: LifecycleEventKind,
    /// Audit identity of the actor.
    pub actor: String,
    /// Free-form note.
    pub note: Option<String>,
    /// When the event occurred.
    pub created_at: DateTime<Utc>,
}

impl LifecycleEvent {
    /// Records a new event.
    pub fn new(asset_id: Uuid, kind: LifecycleEventKind, actor: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            asset_id,
            kind,
            actor: actor.into(),
            note: None,
            created_at: Utc::now(),
        }
    }

    /// Attaches a note.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_creation() {
        let org_id = Uuid::new_v4();
        let asset = Asset::new(org_id, "AST-0001", "MacBook Pro 14", AssetCategory::Laptop);
        assert_eq!(asset.organization_id, org_id);
        assert_eq!(asset.status, AssetStatus::InStock);
        assert!(asset.is_live());
        assert!(asset.is_assignable());
    }

    #[test]
    fn test_assigned_asset_not_assignable() {
        let mut asset = Asset::new(Uuid::new_v4(), "AST-1", "x", AssetCategory::Laptop);
        asset.status = AssetStatus::Assigned;
        assert!(!asset.is_assignable());
    }

    #[test]
    fn test_deleted_asset_not_assignable() {
        let mut asset = Asset::new(Uuid::new_v4(), "AST-1", "x", AssetCategory::Laptop);
        asset.deleted_at = Some(Utc::now());
        assert!(!asset.is_live());
        assert!(!asset.is_assignable());
    }

    #[test]
    fn test_category_parse() {
        assert_eq!(AssetCategory::parse("laptop"), AssetCategory::Laptop);
        assert_eq!(AssetCategory::parse("Monitor"), AssetCategory::Monitor);
        assert_eq!(
            AssetCategory::parse("projector"),
            AssetCategory::Other("projector".to_string())
        );
    }

    #[test]
    fn test_category_from_operating_system() {
        assert_eq!(
            AssetCategory::from_operating_system("iOS"),
            AssetCategory::MobileDevice
        );
        assert_eq!(
            AssetCategory::from_operating_system("Windows"),
            AssetCategory::Laptop
        );
        assert_eq!(
            AssetCategory::from_operating_system("ChromeOS"),
            AssetCategory::Other("chromeos".to_string())
        );
    }

    #[test]
    fn test_assignment_lifecycle() {
        let assignment = AssetAssignment::new(Uuid::new_v4(), Uuid::new_v4(), "admin:ops");
        assert!(assignment.is_active());

        let mut returned = assignment.clone();
        returned.returned_at = Some(Utc::now());
        assert!(!returned.is_active());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            AssetStatus::InStock,
            AssetStatus::Assigned,
            AssetStatus::InRepair,
            AssetStatus::Retired,
        ] {
            let parsed: AssetStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_lifecycle_event_with_note() {
        let event = LifecycleEvent::new(
            Uuid::new_v4(),
            LifecycleEventKind::Repair,
            "manager:it-desk",
        )
        .with_note("cracked screen");
        assert_eq!(event.kind, LifecycleEventKind::Repair);
        assert_eq!(event.note.as_deref(), Some("cracked screen"));
    }
}
