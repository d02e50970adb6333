//! Device sync reconciliation.
//!
//! Diffs the MDM's managed-device list against local assets and
//! produces a plan: create assets for unknown devices, update drifted
//! fields, reassign when the primary user changed, and flag (or
//! retire) assets that disappeared from the MDM.
//!
//! Planning is pure; applying the plan goes through the asset
//! repository. Running the same plan against an unchanged remote list
//! produces no changes, so sync is idempotent.

use crate::models::{Asset, AssetCategory};
use chrono::{DateTime, Utc};
use keel_connectors::ManagedDevice;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;
use uuid::Uuid;

/// Options controlling reconciliation behavior.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Prefix for generated asset tags (per-organization setting).
    pub tag_prefix: String,
    /// Retire assets whose device vanished from the MDM instead of
    /// only flagging them.
    pub retire_orphans: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            tag_prefix: "AST".to_string(),
            retire_orphans: false,
        }
    }
}

/// A device with no matching asset: create one.
#[derive(Debug, Clone)]
pub struct PlannedCreate {
    /// The remote device to register.
    pub device: ManagedDevice,
    /// Generated asset tag.
    pub asset_tag: String,
    /// Category inferred from the device OS.
    pub category: AssetCategory,
    /// Person to assign the new asset to, resolved from the device's
    /// primary user email.
    pub assignee: Option<Uuid>,
}

/// An asset whose MDM-sourced fields drifted: update them.
#[derive(Debug, Clone)]
pub struct PlannedUpdate {
    /// The asset to update.
    pub asset_id: Uuid,
    /// The remote device carrying the new field values.
    pub device: ManagedDevice,
}

/// An asset whose primary user changed: move the assignment.
#[derive(Debug, Clone)]
pub struct PlannedReassign {
    /// The asset to reassign.
    pub asset_id: Uuid,
    /// The person who should hold it.
    pub person_id: Uuid,
}

/// An asset whose device vanished from the MDM.
#[derive(Debug, Clone)]
pub struct PlannedOrphan {
    /// The orphaned asset.
    pub asset_id: Uuid,
    /// Whether to retire it (otherwise it is only reported).
    pub retire: bool,
}

/// The full reconciliation plan.
#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    pub creates: Vec<PlannedCreate>,
    pub updates: Vec<PlannedUpdate>,
    pub reassignments: Vec<PlannedReassign>,
    pub orphans: Vec<PlannedOrphan>,
}

impl SyncPlan {
    /// True when the plan contains no work.
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty()
            && self.updates.is_empty()
            && self.reassignments.is_empty()
            && self.orphans.is_empty()
    }
}

/// Counters describing an applied (or planned) sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    /// Assets created.
    pub created: u64,
    /// Assets whose fields were updated.
    pub updated: u64,
    /// Assignments moved to a different person.
    pub reassigned: u64,
    /// Assets flagged as missing from the MDM.
    pub orphaned: u64,
    /// Orphans that were retired.
    pub retired: u64,
    /// Errors encountered while applying the plan.
    pub errors: u64,
    /// Total duration in milliseconds.
    pub duration_ms: u64,
    /// When the sync completed.
    pub completed_at: DateTime<Utc>,
}

impl SyncReport {
    /// Creates an empty report.
    pub fn new() -> Self {
        Self {
            created: 0,
            updated: 0,
            reassigned: 0,
            orphaned: 0,
            retired: 0,
            errors: 0,
            duration_ms: 0,
            completed_at: Utc::now(),
        }
    }

    /// Total number of changes made.
    pub fn total_changes(&self) -> u64 {
        self.created + self.updated + self.reassigned + self.retired
    }

    /// True when the sync completed without errors.
    pub fn is_clean(&self) -> bool {
        self.errors == 0
    }
}

impl Default for SyncReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes the reconciliation plan.
///
/// - `assets`: the organization's live assets
/// - `active_assignments`: asset id -> person id for open assignments
/// - `persons_by_email`: lowercase email -> person id
pub fn plan_sync(
    devices: &[ManagedDevice],
    assets: &[Asset],
    active_assignments: &HashMap<Uuid, Uuid>,
    persons_by_email: &HashMap<String, Uuid>,
    options: &SyncOptions,
) -> SyncPlan {
    let mut plan = SyncPlan::default();

    let by_device_id: HashMap<&str, &Asset> = assets
        .iter()
        .filter_map(|a| a.mdm_device_id.as_deref().map(|id| (id, a)))
        .collect();
    let by_serial: HashMap<String, &Asset> = assets
        .iter()
        .filter_map(|a| {
            a.serial_number
                .as_deref()
                .map(|s| (s.to_lowercase(), a))
        })
        .collect();

    let mut seen_device_ids: HashSet<&str> = HashSet::new();

    for device in devices {
        seen_device_ids.insert(device.device_id.as_str());

        let matched = by_device_id.get(device.device_id.as_str()).copied().or_else(|| {
            device
                .serial_number
                .as_deref()
                .and_then(|s| by_serial.get(&s.to_lowercase()))
                .copied()
        });

        match matched {
            Some(asset) => {
                if device_drifted(asset, device) {
                    plan.updates.push(PlannedUpdate {
                        asset_id: asset.id,
                        device: device.clone(),
                    });
                }

                if let Some(person_id) = device
                    .primary_user_email
                    .as_deref()
                    .and_then(|email| persons_by_email.get(email))
                {
                    let current = active_assignments.get(&asset.id);
                    if current != Some(person_id) {
                        plan.reassignments.push(PlannedReassign {
                            asset_id: asset.id,
                            person_id: *person_id,
                        });
                    }
                }
            }
            None => {
                let assignee = device
                    .primary_user_email
                    .as_deref()
                    .and_then(|email| persons_by_email.get(email))
                    .copied();
                plan.creates.push(PlannedCreate {
                    asset_tag: generate_tag(&options.tag_prefix, device),
                    category: device
                        .operating_system
                        .as_deref()
                        .map(AssetCategory::from_operating_system)
                        .unwrap_or(AssetCategory::Other("unknown".to_string())),
                    device: device.clone(),
                    assignee,
                });
            }
        }
    }

    // Assets with an MDM device id that the remote list no longer has
    for asset in assets {
        if let Some(device_id) = asset.mdm_device_id.as_deref() {
            if asset.is_live() && !seen_device_ids.contains(device_id) {
                plan.orphans.push(PlannedOrphan {
                    asset_id: asset.id,
                    retire: options.retire_orphans,
                });
            }
        }
    }

    debug!(
        creates = plan.creates.len(),
        updates = plan.updates.len(),
        reassignments = plan.reassignments.len(),
        orphans = plan.orphans.len(),
        "Sync plan computed"
    );

    plan
}

/// True when the asset's MDM-sourced fields differ from the device.
///
/// `last_synced_at` is deliberately excluded so an unchanged remote
/// list plans zero updates.
fn device_drifted(asset: &Asset, device: &ManagedDevice) -> bool {
    if asset.mdm_device_id.as_deref() != Some(device.device_id.as_str()) {
        return true;
    }
    if asset.name != device.name {
        return true;
    }
    if asset.model != device.model {
        return true;
    }
    if asset.manufacturer != device.manufacturer {
        return true;
    }
    asset.compliance_state.as_deref() != Some(device.compliance_state.as_str())
}

/// Generates an asset tag from the org prefix and the device's serial
/// (falling back to the device id).
fn generate_tag(prefix: &str, device: &ManagedDevice) -> String {
    let suffix = device
        .serial_number
        .as_deref()
        .unwrap_or(device.device_id.as_str());
    format!("{}-{}", prefix, suffix.to_uppercase())
}

/// Applies a device's fields to an asset (used when executing
/// `PlannedUpdate` and `PlannedCreate`).
pub fn apply_device_fields(asset: &mut Asset, device: &ManagedDevice, now: DateTime<Utc>) {
    asset.name = device.name.clone();
    asset.model = device.model.clone();
    asset.manufacturer = device.manufacturer.clone();
    asset.mdm_device_id = Some(device.device_id.clone());
    asset.compliance_state = Some(device.compliance_state.as_str().to_string());
    if asset.serial_number.is_none() {
        asset.serial_number = device.serial_number.clone();
    }
    asset.last_synced_at = Some(now);
    asset.updated_at = now;
}

/// Runs a full device sync against the repositories: fetches the
/// remote device list, plans, and applies the plan.
///
/// Per-item failures are counted in `errors` and do not abort the run.
#[cfg(feature = "database")]
pub async fn run_device_sync(
    mdm: &dyn keel_connectors::MdmConnector,
    asset_repo: &dyn crate::db::AssetRepository,
    person_repo: &dyn crate::db::PersonRepository,
    organization_id: Uuid,
    options: &SyncOptions,
    actor: &str,
) -> Result<SyncReport, keel_connectors::ConnectorError> {
    use crate::models::{Asset, AssetAssignment, AssetStatus, LifecycleEvent, LifecycleEventKind};

    let started = std::time::Instant::now();
    let devices = mdm.list_devices().await?;

    let mut report = SyncReport::new();

    // Snapshot local state; per-item repo errors count, they don't abort
    let assets = match asset_repo.list_all_live(organization_id).await {
        Ok(assets) => assets,
        Err(e) => {
            tracing::error!(error = %e, "Device sync aborted: cannot load assets");
            report.errors += 1;
            return Ok(report);
        }
    };
    let active: HashMap<Uuid, Uuid> = match asset_repo.active_assignments(organization_id).await {
        Ok(assignments) => assignments
            .into_iter()
            .map(|a| (a.asset_id, a.person_id))
            .collect(),
        Err(e) => {
            tracing::error!(error = %e, "Device sync aborted: cannot load assignments");
            report.errors += 1;
            return Ok(report);
        }
    };
    let persons_by_email: HashMap<String, Uuid> =
        match person_repo.list_all(organization_id).await {
            Ok(persons) => persons
                .into_iter()
                .map(|p| (p.email.clone(), p.id))
                .collect(),
            Err(e) => {
                tracing::error!(error = %e, "Device sync aborted: cannot load people");
                report.errors += 1;
                return Ok(report);
            }
        };

    let plan = plan_sync(&devices, &assets, &active, &persons_by_email, options);
    let assets_by_id: HashMap<Uuid, &Asset> = assets.iter().map(|a| (a.id, a)).collect();
    let now = Utc::now();

    for create in &plan.creates {
        let mut asset = Asset::new(
            organization_id,
            create.asset_tag.clone(),
            create.device.name.clone(),
            create.category.clone(),
        );
        apply_device_fields(&mut asset, &create.device, now);

        match asset_repo.create(&asset).await {
            Ok(_) => {
                report.created += 1;
                let _ = asset_repo
                    .record_event(
                        &LifecycleEvent::new(asset.id, LifecycleEventKind::Registered, actor)
                            .with_note("registered from device sync"),
                    )
                    .await;

                if let Some(person_id) = create.assignee {
                    let assignment = AssetAssignment::new(asset.id, person_id, actor);
                    if asset_repo.create_assignment(&assignment).await.is_ok() {
                        let mut assigned = asset.clone();
                        assigned.status = AssetStatus::Assigned;
                        let _ = asset_repo.save(&assigned).await;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(tag = %create.asset_tag, error = %e, "Sync create failed");
                report.errors += 1;
            }
        }
    }

    for update in &plan.updates {
        let Some(existing) = assets_by_id.get(&update.asset_id) else {
            report.errors += 1;
            continue;
        };
        let mut asset = (*existing).clone();
        apply_device_fields(&mut asset, &update.device, now);
        match asset_repo.save(&asset).await {
            Ok(_) => {
                report.updated += 1;
                let _ = asset_repo
                    .record_event(&LifecycleEvent::new(
                        asset.id,
                        LifecycleEventKind::Synced,
                        actor,
                    ))
                    .await;
            }
            Err(e) => {
                tracing::warn!(asset_id = %update.asset_id, error = %e, "Sync update failed");
                report.errors += 1;
            }
        }
    }

    for reassign in &plan.reassignments {
        // Close the open assignment, if any, then open the new one
        match asset_repo.active_assignment(reassign.asset_id).await {
            Ok(Some(open)) => {
                if let Err(e) = asset_repo.close_assignment(open.id).await {
                    tracing::warn!(asset_id = %reassign.asset_id, error = %e, "Sync reassign failed to close");
                    report.errors += 1;
                    continue;
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(asset_id = %reassign.asset_id, error = %e, "Sync reassign lookup failed");
                report.errors += 1;
                continue;
            }
        }

        let assignment = AssetAssignment::new(reassign.asset_id, reassign.person_id, actor);
        match asset_repo.create_assignment(&assignment).await {
            Ok(_) => {
                if let Some(existing) = assets_by_id.get(&reassign.asset_id) {
                    let mut asset = (*existing).clone();
                    asset.status = AssetStatus::Assigned;
                    let _ = asset_repo.save(&asset).await;
                }
                let _ = asset_repo
                    .record_event(
                        &LifecycleEvent::new(
                            reassign.asset_id,
                            LifecycleEventKind::Assigned,
                            actor,
                        )
                        .with_note("reassigned from device sync"),
                    )
                    .await;
                report.reassigned += 1;
            }
            Err(e) => {
                tracing::warn!(asset_id = %reassign.asset_id, error = %e, "Sync reassign failed");
                report.errors += 1;
            }
        }
    }

    for orphan in &plan.orphans {
        report.orphaned += 1;
        if orphan.retire {
            if let Some(existing) = assets_by_id.get(&orphan.asset_id) {
                let mut asset = (*existing).clone();
                asset.status = AssetStatus::Retired;
                match asset_repo.save(&asset).await {
                    Ok(_) => {
                        let _ = asset_repo
                            .record_event(
                                &LifecycleEvent::new(
                                    orphan.asset_id,
                                    LifecycleEventKind::Retired,
                                    actor,
                                )
                                .with_note("device no longer reported by MDM"),
                            )
                            .await;
                        report.retired += 1;
                    }
                    Err(e) => {
                        tracing::warn!(asset_id = %orphan.asset_id, error = %e, "Sync retire failed");
                        report.errors += 1;
                    }
                }
            }
        } else {
            tracing::info!(asset_id = %orphan.asset_id, "Asset missing from MDM (flagged)");
        }
    }

    report.duration_ms = started.elapsed().as_millis() as u64;
    report.completed_at = Utc::now();

    tracing::info!(
        created = report.created,
        updated = report.updated,
        reassigned = report.reassigned,
        orphaned = report.orphaned,
        retired = report.retired,
        errors = report.errors,
        duration_ms = report.duration_ms,
        "Device sync finished"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_connectors::ComplianceState;

    fn device(id: &str, serial: Option<&str>, user: Option<&str>) -> ManagedDevice {
        ManagedDevice {
            device_id: id.to_string(),
            name: format!("device-{}", id),
            serial_number: serial.map(String::from),
            manufacturer: Some("Apple".to_string()),
            model: Some("MacBook Pro".to_string()),
            operating_system: Some("macOS".to_string()),
            compliance_state: ComplianceState::Compliant,
            primary_user_email: user.map(String::from),
            last_sync_at: None,
        }
    }

    fn synced_asset(org: Uuid, device: &ManagedDevice) -> Asset {
        let mut asset = Asset::new(
            org,
            generate_tag("AST", device),
            device.name.clone(),
            AssetCategory::Laptop,
        );
        apply_device_fields(&mut asset, device, Utc::now());
        asset
    }

    #[test]
    fn test_unknown_device_planned_as_create() {
        let org = Uuid::new_v4();
        let person_id = Uuid::new_v4();
        let devices = vec![device("d1", Some("SER1"), Some("ada@example.com"))];
        let persons: HashMap<String, Uuid> =
            HashMap::from([("ada@example.com".to_string(), person_id)]);

        let plan = plan_sync(
            &devices,
            &[],
            &HashMap::new(),
            &persons,
            &SyncOptions::default(),
        );

        assert_eq!(plan.creates.len(), 1);
        assert_eq!(plan.creates[0].asset_tag, "AST-SER1");
        assert_eq!(plan.creates[0].category, AssetCategory::Laptop);
        assert_eq!(plan.creates[0].assignee, Some(person_id));
        assert!(plan.updates.is_empty());

        let _ = org;
    }

    #[test]
    fn test_unchanged_remote_list_plans_nothing() {
        let org = Uuid::new_v4();
        let person_id = Uuid::new_v4();
        let d = device("d1", Some("SER1"), Some("ada@example.com"));
        let asset = synced_asset(org, &d);
        let assignments = HashMap::from([(asset.id, person_id)]);
        let persons = HashMap::from([("ada@example.com".to_string(), person_id)]);

        let plan = plan_sync(
            &[d],
            std::slice::from_ref(&asset),
            &assignments,
            &persons,
            &SyncOptions::default(),
        );

        assert!(plan.is_empty(), "second sync must be a no-op: {:?}", plan);
    }

    #[test]
    fn test_drifted_device_planned_as_update() {
        let org = Uuid::new_v4();
        let d = device("d1", Some("SER1"), None);
        let asset = synced_asset(org, &d);

        let mut changed = d.clone();
        changed.compliance_state = ComplianceState::Noncompliant;

        let plan = plan_sync(
            &[changed],
            std::slice::from_ref(&asset),
            &HashMap::new(),
            &HashMap::new(),
            &SyncOptions::default(),
        );

        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].asset_id, asset.id);
        assert!(plan.creates.is_empty());
    }

    #[test]
    fn test_serial_fallback_match() {
        let org = Uuid::new_v4();
        let d = device("d1", Some("SER1"), None);
        // Asset known by serial but never synced (no device id)
        let mut asset = Asset::new(org, "AST-SER1", "Imported laptop", AssetCategory::Laptop);
        asset.serial_number = Some("ser1".to_string());

        let plan = plan_sync(
            &[d],
            std::slice::from_ref(&asset),
            &HashMap::new(),
            &HashMap::new(),
            &SyncOptions::default(),
        );

        // Matched via serial; the device id attach counts as drift
        assert!(plan.creates.is_empty());
        assert_eq!(plan.updates.len(), 1);
    }

    #[test]
    fn test_primary_user_change_planned_as_reassign() {
        let org = Uuid::new_v4();
        let old_holder = Uuid::new_v4();
        let new_holder = Uuid::new_v4();
        let d = device("d1", Some("SER1"), Some("new@example.com"));
        let asset = synced_asset(org, &d);

        let assignments = HashMap::from([(asset.id, old_holder)]);
        let persons = HashMap::from([("new@example.com".to_string(), new_holder)]);

        let plan = plan_sync(
            &[d],
            std::slice::from_ref(&asset),
            &assignments,
            &persons,
            &SyncOptions::default(),
        );

        assert_eq!(plan.reassignments.len(), 1);
        assert_eq!(plan.reassignments[0].person_id, new_holder);
    }

    #[test]
    fn test_unknown_primary_user_is_ignored() {
        let org = Uuid::new_v4();
        let d = device("d1", Some("SER1"), Some("ghost@example.com"));
        let asset = synced_asset(org, &d);

        let plan = plan_sync(
            &[d],
            std::slice::from_ref(&asset),
            &HashMap::new(),
            &HashMap::new(),
            &SyncOptions::default(),
        );

        assert!(plan.reassignments.is_empty());
    }

    #[test]
    fn test_vanished_device_planned_as_orphan() {
        let org = Uuid::new_v4();
        let d = device("d1", Some("SER1"), None);
        let asset = synced_asset(org, &d);

        let plan = plan_sync(
            &[],
            std::slice::from_ref(&asset),
            &HashMap::new(),
            &HashMap::new(),
            &SyncOptions::default(),
        );

        assert_eq!(plan.orphans.len(), 1);
        assert!(!plan.orphans[0].retire);

        let retiring = plan_sync(
            &[],
            std::slice::from_ref(&asset),
            &HashMap::new(),
            &HashMap::new(),
            &SyncOptions {
                retire_orphans: true,
                ..SyncOptions::default()
            },
        );
        assert!(retiring.orphans[0].retire);
    }

    #[test]
    fn test_never_synced_assets_are_not_orphans() {
        let org = Uuid::new_v4();
        let asset = Asset::new(org, "AST-1", "Manual entry", AssetCategory::Monitor);

        let plan = plan_sync(
            &[],
            std::slice::from_ref(&asset),
            &HashMap::new(),
            &HashMap::new(),
            &SyncOptions::default(),
        );

        assert!(plan.orphans.is_empty());
    }

    #[test]
    fn test_report_counters() {
        let mut report = SyncReport::new();
        report.created = 2;
        report.updated = 3;
        report.reassigned = 1;
        report.retired = 1;
        assert_eq!(report.total_changes(), 7);
        assert!(report.is_clean());
        report.errors = 1;
        assert!(!report.is_clean());
    }
}
