//! Domain data models.

pub mod asset;
pub mod document;
pub mod person;
pub mod security;
pub mod team;

pub use asset::{
    Asset, AssetAssignment, AssetCategory, AssetStatus, LifecycleEvent, LifecycleEventKind,
};
pub use document::{
    Acknowledgment, Document, DocumentStatus, DocumentType, DocumentVersion, Rollout,
    RolloutStatus, RolloutTarget,
};
pub use person::{EmploymentStatus, Person};
pub use security::{
    Control, ControlStatus, Evidence, Framework, FrameworkKind, Risk, RiskStatus, SoaItem,
};
pub use team::Team;
