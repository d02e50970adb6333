//! Security & compliance data models.
//!
//! Frameworks (SOC 2, ISO 27001) hold controls; the Statement of
//! Applicability records per-control applicability decisions; risks and
//! evidence complete the audit surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of compliance framework.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FrameworkKind {
    Soc2,
    Iso27001,
    Custom(String),
}

impl FrameworkKind {
    /// Parses a kind string; unknown values become `Custom`.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "soc2" => FrameworkKind::Soc2,
            "iso27001" => FrameworkKind::Iso27001,
            other => FrameworkKind::Custom(other.to_string()),
        }
    }

    /// Returns the kind as a lowercase string for storage.
    pub fn as_db_str(&self) -> String {
        match self {
            FrameworkKind::Soc2 => "soc2".to_string(),
            FrameworkKind::Iso27001 => "iso27001".to_string(),
            FrameworkKind::Custom(s) => s.clone(),
        }
    }
}

impl std::fmt::Display for FrameworkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameworkKind::Soc2 => write!(f, "SOC 2"),
            FrameworkKind::Iso27001 => write!(f, "ISO 27001"),
            FrameworkKind::Custom(name) => write!(f, "Custom: {}", name),
        }
    }
}

/// A compliance framework adopted by an organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Framework {
    /// Unique identifier.
    pub id: Uuid,
    /// Organization scope.
    pub organization_id: Uuid,
    /// Framework kind.
    pub kind: FrameworkKind,
    /// Display name (e.g., "SOC 2 Type II 2024").
    pub name: String,
    /// Framework version label.
    pub version: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Framework {
    /// Creates a new framework.
    pub fn new(organization_id: Uuid, kind: FrameworkKind, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            kind,
            name: name.into(),
            version: None,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Implementation status of a control.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControlStatus {
    NotImplemented,
    InProgress,
    Implemented,
}

impl ControlStatus {
    /// Returns the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlStatus::NotImplemented => "not_implemented",
            ControlStatus::InProgress => "in_progress",
            ControlStatus::Implemented => "implemented",
        }
    }
}

impl std::fmt::Display for ControlStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ControlStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_implemented" => Ok(ControlStatus::NotImplemented),
            "in_progress" => Ok(ControlStatus::InProgress),
            "implemented" => Ok(ControlStatus::Implemented),
            _ => Err(()),
        }
    }
}

/// A single control within a framework.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Control {
    /// Unique identifier.
    pub id: Uuid,
    /// Organization scope.
    pub organization_id: Uuid,
    /// Owning framework.
    pub framework_id: Uuid,
    /// Control code, unique per framework (e.g., "CC6.1", "A.5.15").
    pub code: String,
    /// Short title.
    pub title: String,
    /// Full description.
    pub description: Option<String>,
    /// Implementation status.
    pub status: ControlStatus,
    /// Accountable owner (person id).
    pub owner_id: Option<Uuid>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Control {
    /// Creates a new not-implemented control.
    pub fn new(
        organization_id: Uuid,
        framework_id: Uuid,
        code: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            framework_id,
            code: code.into(),
            title: title.into(),
            description: None,
            status: ControlStatus::NotImplemented,
            owner_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A Statement-of-Applicability entry for a control.
///
/// Absence of a row means "not yet assessed"; `applicable: false`
/// requires a justification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoaItem {
    /// Unique identifier.
    pub id: Uuid,
    /// Organization scope.
    pub organization_id: Uuid,
    /// Owning framework.
    pub framework_id: Uuid,
    /// The control this entry assesses.
    pub control_id: Uuid,
    /// Whether the control applies to this organization.
    pub applicable: bool,
    /// Rationale, mandatory when not applicable.
    pub justification: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl SoaItem {
    /// Creates a new SoA entry.
    pub fn new(organization_id: Uuid, framework_id: Uuid, control_id: Uuid, applicable: bool) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            framework_id,
            control_id,
            applicable,
            justification: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Status of a tracked risk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RiskStatus {
    Open,
    Mitigating,
    Accepted,
    Closed,
}

impl RiskStatus {
    /// Returns the status as a lowercase string.
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskStatus::Open => "open",
            RiskStatus::Mitigating => "mitigating",
            RiskStatus::Accepted => "accepted",
            RiskStatus::Closed => "closed",
        }
    }
}

impl std::fmt::Display for RiskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RiskStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(RiskStatus::Open),
            "mitigating" => Ok(RiskStatus::Mitigating),
            "accepted" => Ok(RiskStatus::Accepted),
            "closed" => Ok(RiskStatus::Closed),
            _ => Err(()),
        }
    }
}

/// A tracked risk with a 5x5 likelihood/impact scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Risk {
    /// Unique identifier.
    pub id: Uuid,
    /// Organization scope.
    pub organization_id: Uuid,
    /// Short title.
    pub title: String,
    /// Full description.
    pub description: Option<String>,
    /// Likelihood, 1 (rare) to 5 (almost certain).
    pub likelihood: u8,
    /// Impact, 1 (negligible) to 5 (severe).
    pub impact: u8,
    /// Treatment status.
    pub status: RiskStatus,
    /// Accountable owner (person id).
    pub owner_id: Option<Uuid>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Risk {
    /// Creates a new open risk with clamped scores.
    pub fn new(
        organization_id: Uuid,
        title: impl Into<String>,
        likelihood: u8,
        impact: u8,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            title: title.into(),
            description: None,
            likelihood: likelihood.clamp(1, 5),
            impact: impact.clamp(1, 5),
            status: RiskStatus::Open,
            owner_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Risk score: likelihood x impact (1..=25).
    pub fn score(&self) -> u8 {
        self.likelihood * self.impact
    }
}

/// Evidence supporting a control's implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    /// Unique identifier.
    pub id: Uuid,
    /// Organization scope.
    pub organization_id: Uuid,
    /// The control this evidence supports.
    pub control_id: Uuid,
    /// Short title.
    pub title: String,
    /// Where the artifact lives (URL or storage reference).
    pub location: Option<String>,
    /// When the evidence was collected.
    pub collected_at: DateTime<Utc>,
    /// When the evidence stops being acceptable to auditors.
    pub valid_until: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Evidence {
    /// Creates newly collected evidence.
    pub fn new(organization_id: Uuid, control_id: Uuid, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            control_id,
            title: title.into(),
            location: None,
            collected_at: now,
            valid_until: None,
            created_at: now,
        }
    }

    /// True once `valid_until` has passed.
    pub fn is_expired(&self) -> bool {
        self.valid_until.map(|t| Utc::now() > t).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framework_kind_parse() {
        assert_eq!(FrameworkKind::parse("soc2"), FrameworkKind::Soc2);
        assert_eq!(FrameworkKind::parse("ISO27001"), FrameworkKind::Iso27001);
        assert_eq!(
            FrameworkKind::parse("hipaa"),
            FrameworkKind::Custom("hipaa".to_string())
        );
    }

    #[test]
    fn test_framework_kind_display() {
        assert_eq!(format!("{}", FrameworkKind::Soc2), "SOC 2");
        assert_eq!(format!("{}", FrameworkKind::Iso27001), "ISO 27001");
    }

    #[test]
    fn test_control_defaults() {
        let control = Control::new(Uuid::new_v4(), Uuid::new_v4(), "CC6.1", "Logical access");
        assert_eq!(control.status, ControlStatus::NotImplemented);
        assert!(control.owner_id.is_none());
    }

    #[test]
    fn test_risk_score_and_clamping() {
        let risk = Risk::new(Uuid::new_v4(), "Laptop theft", 3, 4);
        assert_eq!(risk.score(), 12);

        let clamped = Risk::new(Uuid::new_v4(), "Overflow", 9, 0);
        assert_eq!(clamped.likelihood, 5);
        assert_eq!(clamped.impact, 1);
        assert_eq!(clamped.score(), 5);
    }

    #[test]
    fn test_evidence_expiry() {
        let mut evidence = Evidence::new(Uuid::new_v4(), Uuid::new_v4(), "Access review Q1");
        assert!(!evidence.is_expired());
        evidence.valid_until = Some(Utc::now() - chrono::Duration::days(1));
        assert!(evidence.is_expired());
    }

    #[test]
    fn test_risk_status_round_trip() {
        for status in [
            RiskStatus::Open,
            RiskStatus::Mitigating,
            RiskStatus::Accepted,
            RiskStatus::Closed,
        ] {
            let parsed: RiskStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }
}
