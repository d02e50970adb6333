//! Person data model (HR records).
//!
//! A person is an employee record; it may be linked to a user account
//! but exists independently (contractors, pre-boarding hires).

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Employment lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmploymentStatus {
    /// Hired, onboarding workflow in progress.
    Onboarding,
    /// Actively employed.
    Active,
    /// Temporarily away (parental leave, sabbatical).
    OnLeave,
    /// Offboarding workflow in progress.
    Offboarding,
    /// No longer with the company.
    Departed,
}

impl EmploymentStatus {
    /// Returns the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            EmploymentStatus::Onboarding => "onboarding",
            EmploymentStatus::Active => "active",
            EmploymentStatus::OnLeave => "on_leave",
            EmploymentStatus::Offboarding => "offboarding",
            EmploymentStatus::Departed => "departed",
        }
    }

    /// True while the person is employed (any status except departed).
    pub fn is_current(&self) -> bool {
        !matches!(self, EmploymentStatus::Departed)
    }
}

impl std::fmt::Display for EmploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EmploymentStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "onboarding" => Ok(EmploymentStatus::Onboarding),
            "active" => Ok(EmploymentStatus::Active),
            "on_leave" => Ok(EmploymentStatus::OnLeave),
            "offboarding" => Ok(EmploymentStatus::Offboarding),
            "departed" => Ok(EmploymentStatus::Departed),
            _ => Err(()),
        }
    }
}

/// An employee record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    /// Unique identifier.
    pub id: Uuid,
    /// Organization the person belongs to.
    pub organization_id: Uuid,
    /// Linked user account, if any.
    pub user_id: Option<Uuid>,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Work email (unique per organization, stored lowercase).
    pub email: String,
    /// Job title.
    pub job_title: Option<String>,
    /// Department label.
    pub department: Option<String>,
    /// Employment status.
    pub status: EmploymentStatus,
    /// Direct manager (self-referencing).
    pub manager_id: Option<Uuid>,
    /// Team membership.
    pub team_id: Option<Uuid>,
    /// Employment start date.
    pub start_date: Option<NaiveDate>,
    /// Employment end date (offboarded/departed).
    pub end_date: Option<NaiveDate>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Person {
    /// Creates a new onboarding person record.
    pub fn new(
        organization_id: Uuid,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            user_id: None,
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: email.into().to_lowercase(),
            job_title: None,
            department: None,
            status: EmploymentStatus::Onboarding,
            manager_id: None,
            team_id: None,
            start_date: None,
            end_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Full display name.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    /// True while the person is employed.
    pub fn is_current(&self) -> bool {
        self.status.is_current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_person_creation() {
        let org_id = Uuid::new_v4();
        let person = Person::new(org_id, "Ada", "Lovelace", "Ada@Example.com");
        assert_eq!(person.organization_id, org_id);
        assert_eq!(person.email, "ada@example.com");
        assert_eq!(person.status, EmploymentStatus::Onboarding);
        assert_eq!(person.full_name(), "Ada Lovelace");
        assert!(person.is_current());
    }

    #[test]
    fn test_employment_status_round_trip() {
        for status in [
            EmploymentStatus::Onboarding,
            EmploymentStatus::Active,
            EmploymentStatus::OnLeave,
            EmploymentStatus::Offboarding,
            EmploymentStatus::Departed,
        ] {
            let parsed: EmploymentStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_departed_is_not_current() {
        let mut person = Person::new(Uuid::new_v4(), "A", "B", "a@b.c");
        person.status = EmploymentStatus::Departed;
        assert!(!person.is_current());
    }
}
