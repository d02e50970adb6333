//! Document and policy-rollout data models.
//!
//! Documents are versioned; publishing pins a version. A rollout fans a
//! published version out to people, each of whom owes exactly one
//! acknowledgment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Policy,
    Procedure,
    Guideline,
    Other(String),
}

impl DocumentType {
    /// Parses a type string; unknown values become `Other`.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "policy" => DocumentType::Policy,
            "procedure" => DocumentType::Procedure,
            "guideline" => DocumentType::Guideline,
            other => DocumentType::Other(other.to_string()),
        }
    }

    /// Returns the type as a lowercase string for storage.
    pub fn as_db_str(&self) -> String {
        match self {
            DocumentType::Policy => "policy".to_string(),
            DocumentType::Procedure => "procedure".to_string(),
            DocumentType::Guideline => "guideline".to_string(),
            DocumentType::Other(s) => s.clone(),
        }
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentType::Policy => write!(f, "Policy"),
            DocumentType::Procedure => write!(f, "Procedure"),
            DocumentType::Guideline => write!(f, "Guideline"),
            DocumentType::Other(name) => write!(f, "Other: {}", name),
        }
    }
}

/// Publication status of a document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    Published,
    Archived,
}

impl DocumentStatus {
    /// Returns the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Published => "published",
            DocumentStatus::Archived => "archived",
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(DocumentStatus::Draft),
            "published" => Ok(DocumentStatus::Published),
            "archived" => Ok(DocumentStatus::Archived),
            _ => Err(()),
        }
    }
}

/// A versioned document (policy, procedure, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier.
    pub id: Uuid,
    /// Organization scope.
    pub organization_id: Uuid,
    /// Title (unique per organization).
    pub title: String,
    /// Document kind.
    pub doc_type: DocumentType,
    /// Publication status.
    pub status: DocumentStatus,
    /// Accountable owner (person id).
    pub owner_id: Option<Uuid>,
    /// Currently published version number, if any.
    pub current_version: Option<i64>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Creates a new draft document.
    pub fn new(organization_id: Uuid, title: impl Into<String>, doc_type: DocumentType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            title: title.into(),
            doc_type,
            status: DocumentStatus::Draft,
            owner_id: None,
            current_version: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// An immutable version of a document's content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentVersion {
    /// Unique identifier.
    pub id: Uuid,
    /// Owning document.
    pub document_id: Uuid,
    /// Monotonically increasing version number, starting at 1.
    pub version: i64,
    /// Document body (markdown).
    pub body: String,
    /// Audit identity of the author.
    pub created_by: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl DocumentVersion {
    /// Creates a new version.
    pub fn new(
        document_id: Uuid,
        version: i64,
        body: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            version,
            body: body.into(),
            created_by: created_by.into(),
            created_at: Utc::now(),
        }
    }
}

/// Who a rollout targets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RolloutTarget {
    /// Every current person in the organization.
    Organization,
    /// Members of one team.
    Team { team_id: Uuid },
}

/// Status of a rollout.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStatus {
    Active,
    Completed,
    Cancelled,
}

impl RolloutStatus {
    /// Returns the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            RolloutStatus::Active => "active",
            RolloutStatus::Completed => "completed",
            RolloutStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RolloutStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RolloutStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(RolloutStatus::Active),
            "completed" => Ok(RolloutStatus::Completed),
            "cancelled" => Ok(RolloutStatus::Cancelled),
            _ => Err(()),
        }
    }
}

/// A distribution of one document version for acknowledgment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rollout {
    /// Unique identifier.
    pub id: Uuid,
    /// Organization scope.
    pub organization_id: Uuid,
    /// The document being rolled out.
    pub document_id: Uuid,
    /// The pinned version number.
    pub version: i64,
    /// Display name (e.g., "2024 Security Policy refresh").
    pub name: String,
    /// Audience.
    pub target: RolloutTarget,
    /// Acknowledgment deadline.
    pub due_date: Option<DateTime<Utc>>,
    /// Rollout status.
    pub status: RolloutStatus,
    /// Audit identity of the creator.
    pub created_by: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Rollout {
    /// Creates a new active rollout.
    pub fn new(
        organization_id: Uuid,
        document_id: Uuid,
        version: i64,
        name: impl Into<String>,
        target: RolloutTarget,
        created_by: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            document_id,
            version,
            name: name.into(),
            target,
            due_date: None,
            status: RolloutStatus::Active,
            created_by: created_by.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// One person's acknowledgment obligation within a rollout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Acknowledgment {
    /// Unique identifier.
    pub id: Uuid,
    /// Owning rollout.
    pub rollout_id: Uuid,
    /// The person who must acknowledge.
    pub person_id: Uuid,
    /// Set once acknowledged; pending while unset.
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Acknowledgment {
    /// Creates a pending acknowledgment.
    pub fn new(rollout_id: Uuid, person_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            rollout_id,
            person_id,
            acknowledged_at: None,
            created_at: Utc::now(),
        }
    }

    /// True once the person has acknowledged.
    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_starts_as_draft() {
        let doc = Document::new(Uuid::new_v4(), "Security Policy", DocumentType::Policy);
        assert_eq!(doc.status, DocumentStatus::Draft);
        assert!(doc.current_version.is_none());
    }

    #[test]
    fn test_document_type_parse() {
        assert_eq!(DocumentType::parse("policy"), DocumentType::Policy);
        assert_eq!(DocumentType::parse("Procedure"), DocumentType::Procedure);
        assert_eq!(
            DocumentType::parse("runbook"),
            DocumentType::Other("runbook".to_string())
        );
    }

    #[test]
    fn test_rollout_target_serde() {
        let target = RolloutTarget::Team {
            team_id: Uuid::nil(),
        };
        let json = serde_json::to_value(&target).unwrap();
        assert_eq!(json["kind"], "team");

        let org: RolloutTarget = serde_json::from_str(r#"{"kind":"organization"}"#).unwrap();
        assert_eq!(org, RolloutTarget::Organization);
    }

    #[test]
    fn test_acknowledgment_lifecycle() {
        let mut ack = Acknowledgment::new(Uuid::new_v4(), Uuid::new_v4());
        assert!(!ack.is_acknowledged());
        ack.acknowledged_at = Some(Utc::now());
        assert!(ack.is_acknowledged());
    }

    #[test]
    fn test_rollout_starts_active() {
        let rollout = Rollout::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            1,
            "Policy refresh",
            RolloutTarget::Organization,
            "admin:hr",
        );
        assert_eq!(rollout.status, RolloutStatus::Active);
        assert_eq!(rollout.version, 1);
    }
}
