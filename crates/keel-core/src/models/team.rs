//! Team data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A team within an organization. Teams may nest via `parent_team_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    /// Unique identifier.
    pub id: Uuid,
    /// Organization the team belongs to.
    pub organization_id: Uuid,
    /// Team name (unique per organization).
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Team lead (person id).
    pub lead_id: Option<Uuid>,
    /// Parent team for nested structures.
    pub parent_team_id: Option<Uuid>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Team {
    /// Creates a new team.
    pub fn new(organization_id: Uuid, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            name: name.into(),
            description: None,
            lead_id: None,
            parent_team_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_team_creation() {
        let org_id = Uuid::new_v4();
        let team = Team::new(org_id, "Platform");
        assert_eq!(team.organization_id, org_id);
        assert_eq!(team.name, "Platform");
        assert!(team.lead_id.is_none());
        assert!(team.parent_team_id.is_none());
    }
}
