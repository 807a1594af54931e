//! Per-region reconciliation: what must happen for a region to match master.
//!
//! The result is a [`SyncPlan`]: one [`PlanEntry`] per wanted master image,
//! ordered by ascending size. Small images (kernels, ramdisks) come first, so
//! executing the plan in order uploads dependencies before their dependents.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use glancesync_core::image::AMI_PROPERTIES;
use glancesync_core::{Image, RegionId, Target};

use crate::ami::{check_ami, AmiStatus};
use crate::master::MasterCatalog;
use crate::policy::is_synchronisable;

// ---------------------------------------------------------------------------
// States and diff codes
// ---------------------------------------------------------------------------

/// Final classification of one master image in one region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Ok,
    OkStalledChecksum,
    PendingMetadata,
    PendingUpload,
    PendingReplace,
    PendingRename,
    PendingAmi,
    ErrorChecksum,
    ErrorAmi,
}

impl SyncState {
    pub const ALL: [SyncState; 9] = [
        SyncState::Ok,
        SyncState::OkStalledChecksum,
        SyncState::PendingMetadata,
        SyncState::PendingUpload,
        SyncState::PendingReplace,
        SyncState::PendingRename,
        SyncState::PendingAmi,
        SyncState::ErrorChecksum,
        SyncState::ErrorAmi,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SyncState::Ok => "ok",
            SyncState::OkStalledChecksum => "ok_stalled_checksum",
            SyncState::PendingMetadata => "pending_metadata",
            SyncState::PendingUpload => "pending_upload",
            SyncState::PendingReplace => "pending_replace",
            SyncState::PendingRename => "pending_rename",
            SyncState::PendingAmi => "pending_ami",
            SyncState::ErrorChecksum => "error_checksum",
            SyncState::ErrorAmi => "error_ami",
        }
    }

    /// True if executing this entry calls the repository.
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            SyncState::PendingMetadata
                | SyncState::PendingUpload
                | SyncState::PendingReplace
                | SyncState::PendingRename
                | SyncState::PendingAmi
        )
    }

    /// True if the entry uploads image content.
    pub fn uploads(self) -> bool {
        matches!(
            self,
            SyncState::PendingUpload | SyncState::PendingReplace | SyncState::PendingRename
        )
    }

    pub fn is_error(self) -> bool {
        matches!(self, SyncState::ErrorChecksum | SyncState::ErrorAmi)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a regional image differs from its master counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffCode {
    /// `''`
    Equal,
    /// `'!'`
    Checksum,
    /// `'-'`: private in master, public in the region.
    MasterPrivate,
    /// `'_'`: public in master, private in the region.
    RegionPrivate,
    /// `'#'`
    Metadata,
}

impl DiffCode {
    pub fn as_str(self) -> &'static str {
        match self {
            DiffCode::Equal => "",
            DiffCode::Checksum => "!",
            DiffCode::MasterPrivate => "-",
            DiffCode::RegionPrivate => "_",
            DiffCode::Metadata => "#",
        }
    }
}

/// Compare a regional image with its master counterpart.
pub fn compare(regional: &Image, master: &Image, metadata_set: &BTreeSet<String>) -> DiffCode {
    if regional.checksum != master.checksum {
        return DiffCode::Checksum;
    }
    if regional.is_public != master.is_public {
        return if master.is_public {
            DiffCode::RegionPrivate
        } else {
            DiffCode::MasterPrivate
        };
    }
    let props_differ = metadata_set
        .iter()
        .filter(|key| !AMI_PROPERTIES.contains(&key.as_str()))
        .any(|key| regional.property(key) != master.property(key));
    let ami_presence_differs = AMI_PROPERTIES
        .iter()
        .any(|prop| regional.property(prop).is_some() != master.property(prop).is_some());
    if props_differ || ami_presence_differs {
        return DiffCode::Metadata;
    }
    DiffCode::Equal
}

/// Map a diff code and AMI status to a final state.
///
/// Checksum conflicts consult the target policy in the order
/// `dontupdate`, `replace`, `rename`.
pub fn resolve_state(diff: DiffCode, ami: AmiStatus, checksum: &str, target: &Target) -> SyncState {
    match diff {
        DiffCode::Checksum => {
            if target.dontupdate.contains(checksum) {
                SyncState::OkStalledChecksum
            } else if target.replaces(checksum) {
                SyncState::PendingReplace
            } else if target.renames(checksum) {
                SyncState::PendingRename
            } else {
                SyncState::ErrorChecksum
            }
        }
        DiffCode::Equal => match ami {
            AmiStatus::Ready => SyncState::Ok,
            AmiStatus::Update => SyncState::PendingMetadata,
            AmiStatus::Pending => SyncState::PendingAmi,
            AmiStatus::Missing => SyncState::ErrorAmi,
        },
        DiffCode::MasterPrivate | DiffCode::RegionPrivate | DiffCode::Metadata => match ami {
            AmiStatus::Ready | AmiStatus::Update => SyncState::PendingMetadata,
            AmiStatus::Pending => SyncState::PendingAmi,
            AmiStatus::Missing => SyncState::ErrorAmi,
        },
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// One wanted master image and what to do about it.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanEntry {
    pub state: SyncState,
    pub master: Image,
    /// The matching regional image, if the region has one.
    pub regional: Option<Image>,
}

impl PlanEntry {
    pub fn name(&self) -> &str {
        &self.master.name
    }
}

/// Everything the executor needs for one region.
#[derive(Debug, Clone)]
pub struct SyncPlan {
    pub region: RegionId,
    pub tenant_id: String,
    /// Entries in execution order (ascending size).
    pub entries: Vec<PlanEntry>,
    /// Filtered regional images by name; seeds the executor's working catalog.
    pub regional: BTreeMap<String, Image>,
}

impl SyncPlan {
    pub fn count(&self, state: SyncState) -> usize {
        self.entries.iter().filter(|e| e.state == state).count()
    }

    pub fn is_converged(&self) -> bool {
        self.entries.iter().all(|e| !e.state.is_mutating())
    }

    /// Bytes the plan would upload.
    pub fn pending_bytes(&self) -> u64 {
        self.entries
            .iter()
            .filter(|e| e.state.uploads())
            .map(|e| e.master.size)
            .sum()
    }
}

/// Compute the sync plan of one region.
///
/// `skip_ids` lists regional images already handled this pass (see
/// [`crate::obsolete`]); they are ignored.
pub fn reconcile(
    region: &RegionId,
    master: &MasterCatalog,
    region_images: &[Image],
    target: &Target,
    tenant_id: &str,
    skip_ids: &BTreeSet<String>,
) -> SyncPlan {
    let wanted: BTreeMap<&str, &Image> = master
        .iter()
        .filter(|(_, image)| is_synchronisable(image, target))
        .map(|(name, image)| (name.as_str(), image))
        .collect();

    let regional = filter_region_images(region, &wanted, region_images, target, tenant_id, skip_ids);

    let mut ordered: Vec<&Image> = wanted.values().copied().collect();
    ordered.sort_by(|a, b| a.size.cmp(&b.size).then_with(|| a.name.cmp(&b.name)));

    let mut working = regional.clone();
    let mut pending_upload = BTreeSet::new();
    let mut entries = Vec::with_capacity(ordered.len());

    for master_image in ordered {
        let Some(local) = working.get(&master_image.name).cloned() else {
            pending_upload.insert(master_image.name.clone());
            entries.push(PlanEntry {
                state: SyncState::PendingUpload,
                master: master_image.clone(),
                regional: None,
            });
            continue;
        };

        let diff = compare(&local, master_image, &target.metadata_set);
        let state = if diff == DiffCode::Checksum {
            resolve_state(diff, AmiStatus::Ready, &local.checksum, target)
        } else {
            let ami = check_ami(&local, master_image, &working, &pending_upload);
            resolve_state(diff, ami, &local.checksum, target)
        };

        if matches!(state, SyncState::PendingReplace | SyncState::PendingRename) {
            working.remove(&master_image.name);
            pending_upload.insert(master_image.name.clone());
        }

        tracing::debug!(
            region = %region,
            image = %master_image.name,
            diff = diff.as_str(),
            state = %state,
            "image classified",
        );
        entries.push(PlanEntry {
            state,
            master: master_image.clone(),
            regional: Some(local),
        });
    }

    SyncPlan {
        region: region.clone(),
        tenant_id: tenant_id.to_string(),
        entries,
        regional,
    }
}

fn filter_region_images(
    region: &RegionId,
    wanted: &BTreeMap<&str, &Image>,
    region_images: &[Image],
    target: &Target,
    tenant_id: &str,
    skip_ids: &BTreeSet<String>,
) -> BTreeMap<String, Image> {
    let mut filtered: BTreeMap<String, Image> = BTreeMap::new();

    for image in region_images {
        if skip_ids.contains(&image.id) {
            continue;
        }
        let Some(master_image) = wanted.get(image.name.as_str()) else {
            continue;
        };
        if !image.owned_by(tenant_id) {
            if !target.only_tenant_images {
                tracing::warn!(
                    region = %region,
                    image = %image,
                    owner = %image.owner,
                    "image with a master name belongs to another tenant; ignored",
                );
            }
            continue;
        }
        if !image.is_active() {
            tracing::warn!(
                region = %region,
                image = %image,
                status = %image.status,
                "image is not active; ignored",
            );
            continue;
        }

        match filtered.get(&image.name) {
            None => {
                filtered.insert(image.name.clone(), image.clone());
            }
            Some(existing) => {
                let prefer_newcomer = image.checksum == master_image.checksum
                    && existing.checksum != master_image.checksum;
                let kept = if prefer_newcomer { &image.id } else { &existing.id };
                tracing::warn!(
                    region = %region,
                    image = %image.name,
                    kept = %kept,
                    "duplicated image name in region",
                );
                if prefer_newcomer {
                    filtered.insert(image.name.clone(), image.clone());
                }
            }
        }
    }

    filtered
}
