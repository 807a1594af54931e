//! Plan execution.
//!
//! Three passes over the size-ordered plan, all against one
//! [`WorkingCatalog`] owned by the executor:
//!
//! 1. metadata updates (`pending_metadata`)
//! 2. uploads, replacements and renames, smallest first
//! 3. AMI fix-ups (`pending_ami`), now that dependencies exist
//!
//! A repository failure aborts the rest of the plan. Mutations already made
//! stay in place.

use std::collections::BTreeMap;

use serde::Serialize;

use glancesync_core::image::{bytes_to_mb, AMI_PROPERTIES, STATUS_ACTIVE};
use glancesync_core::{Image, RegionId, Target};

use crate::ami::update_kernelramdisk_id;
use crate::error::RepositoryError;
use crate::reconcile::{PlanEntry, SyncPlan, SyncState};
use crate::repository::ImageRepository;

/// Suffix given to the old image of a `pending_rename` entry.
pub const RENAMED_SUFFIX: &str = ".old";

/// The region's images by name, as the executor sees them mid-run.
#[derive(Debug, Clone, Default)]
pub struct WorkingCatalog {
    images: BTreeMap<String, Image>,
}

impl WorkingCatalog {
    pub fn new(images: BTreeMap<String, Image>) -> Self {
        Self { images }
    }

    pub fn get(&self, name: &str) -> Option<&Image> {
        self.images.get(name)
    }

    pub fn insert(&mut self, image: Image) {
        self.images.insert(image.name.clone(), image);
    }

    pub fn by_name(&self) -> &BTreeMap<String, Image> {
        &self.images
    }
}

/// What one execution did (or, in dry-run mode, would do).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionReport {
    pub region: String,
    pub dry_run: bool,
    pub metadata_updates: usize,
    pub uploads: usize,
    pub deletes: usize,
    pub renames: usize,
    pub uploaded_bytes: u64,
    /// Bytes the plan asked to upload.
    pub pending_bytes: u64,
}

impl ExecutionReport {
    pub fn uploaded_mb(&self) -> f64 {
        bytes_to_mb(self.uploaded_bytes)
    }

    pub fn pending_mb(&self) -> f64 {
        bytes_to_mb(self.pending_bytes)
    }
}

/// Copy the synchronised metadata of `master` onto `image`.
///
/// AMI references are resolved against `working`. Properties of the
/// `metadata_set` missing from master are removed.
fn refresh_metadata(image: &mut Image, master: &Image, target: &Target, working: &WorkingCatalog) {
    update_kernelramdisk_id(image, master, working.by_name());
    for key in &target.metadata_set {
        if AMI_PROPERTIES.contains(&key.as_str()) {
            continue;
        }
        match master.user_properties.get(key) {
            Some(value) => {
                image.user_properties.insert(key.clone(), value.clone());
            }
            None => {
                image.user_properties.remove(key);
            }
        }
    }
    image.is_public = master.is_public;
}

/// Build the image to upload from its master counterpart.
fn upload_candidate(master: &Image, target: &Target, working: &WorkingCatalog) -> Image {
    let mut image = master.clone();
    update_kernelramdisk_id(&mut image, master, working.by_name());
    if !target.metadata_set.is_empty() {
        image.user_properties.retain(|key, _| {
            target.metadata_set.contains(key) || AMI_PROPERTIES.contains(&key.as_str())
        });
    }
    image
}

/// Execute `plan` against `repo`.
pub async fn execute(
    plan: &SyncPlan,
    target: &Target,
    repo: &dyn ImageRepository,
    dry_run: bool,
) -> Result<ExecutionReport, RepositoryError> {
    let mut report = ExecutionReport {
        region: plan.region.to_string(),
        dry_run,
        pending_bytes: plan.pending_bytes(),
        ..ExecutionReport::default()
    };

    if dry_run {
        for entry in plan.entries.iter().filter(|e| e.state.is_mutating()) {
            tracing::info!(
                region = %plan.region,
                image = %entry.master.name,
                state = %entry.state,
                size_mb = entry.master.size_mb(),
                "would synchronise",
            );
        }
        tracing::info!(
            region = %plan.region,
            pending_mb = report.pending_mb(),
            "dry run complete",
        );
        return Ok(report);
    }

    let mut executor = Executor {
        region: &plan.region,
        tenant_id: &plan.tenant_id,
        target,
        repo,
        working: WorkingCatalog::new(plan.regional.clone()),
        report,
    };

    // ----- 1. Metadata -----
    for entry in plan.entries.iter().filter(|e| e.state == SyncState::PendingMetadata) {
        executor.update_entry(entry).await?;
    }

    // ----- 2. Materialization -----
    for entry in &plan.entries {
        match entry.state {
            SyncState::PendingUpload => {
                executor.upload(&entry.master).await?;
            }
            SyncState::PendingReplace => executor.replace(entry).await?,
            SyncState::PendingRename => executor.rename(entry).await?,
            _ => {}
        }
    }

    // ----- 3. AMI fix-up -----
    for entry in plan.entries.iter().filter(|e| e.state == SyncState::PendingAmi) {
        executor.update_entry(entry).await?;
    }

    let report = executor.report;
    tracing::info!(
        region = %plan.region,
        uploads = report.uploads,
        metadata_updates = report.metadata_updates,
        uploaded_mb = report.uploaded_mb(),
        "region synchronised",
    );
    Ok(report)
}

struct Executor<'a> {
    region: &'a RegionId,
    tenant_id: &'a str,
    target: &'a Target,
    repo: &'a dyn ImageRepository,
    working: WorkingCatalog,
    report: ExecutionReport,
}

impl Executor<'_> {
    async fn update_entry(&mut self, entry: &PlanEntry) -> Result<(), RepositoryError> {
        let Some(regional) = &entry.regional else {
            tracing::warn!(region = %self.region, image = %entry.name(), "no regional image to update");
            return Ok(());
        };
        let mut image = regional.clone();
        refresh_metadata(&mut image, &entry.master, self.target, &self.working);
        tracing::info!(region = %self.region, image = %image, state = %entry.state, "updating metadata");
        self.repo.update_metadata(&self.region.region, &image).await?;
        self.report.metadata_updates += 1;
        self.working.insert(image);
        Ok(())
    }

    async fn upload(&mut self, master: &Image) -> Result<String, RepositoryError> {
        let mut image = upload_candidate(master, self.target, &self.working);
        tracing::info!(
            region = %self.region,
            image = %image.name,
            size_mb = image.size_mb(),
            "uploading image",
        );
        let id = self.repo.upload_image(&self.region.region, &image).await?;
        image.id = id.clone();
        image.region = self.region.region.clone();
        image.owner = self.tenant_id.to_string();
        image.status = STATUS_ACTIVE.to_string();
        self.report.uploads += 1;
        self.report.uploaded_bytes += image.size;
        self.working.insert(image);
        Ok(id)
    }

    async fn replace(&mut self, entry: &PlanEntry) -> Result<(), RepositoryError> {
        self.upload(&entry.master).await?;
        if let Some(old) = &entry.regional {
            tracing::info!(region = %self.region, image = %old, "deleting replaced image");
            if self.repo.delete_image(&self.region.region, &old.id, false).await? {
                self.report.deletes += 1;
            }
        }
        Ok(())
    }

    async fn rename(&mut self, entry: &PlanEntry) -> Result<(), RepositoryError> {
        self.upload(&entry.master).await?;
        if let Some(old) = &entry.regional {
            let mut renamed = old.clone();
            renamed.name = format!("{}{RENAMED_SUFFIX}", old.name);
            renamed.is_public = false;
            tracing::info!(region = %self.region, image = %old, to = %renamed.name, "renaming old image");
            self.repo.update_metadata(&self.region.region, &renamed).await?;
            self.report.renames += 1;
        }
        Ok(())
    }
}
