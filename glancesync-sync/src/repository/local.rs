//! Local catalog repository.
//!
//! Mirrors each region's Glance catalog as a JSON file:
//!
//! ```text
//! <catalog_dir>/
//!   <target>/
//!     <region>.json     (array of images)
//! ```
//!
//! Writes use the same atomic `.tmp` + rename pattern as backups. Uploads only
//! record metadata; image content stays with whatever produced the files.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use glancesync_core::image::STATUS_ACTIVE;
use glancesync_core::{Image, Target};

use super::{ImageRepository, RepositoryProvider};
use crate::atomic::write_atomic;
use crate::error::{repo_io_err, RepositoryError};

/// Session over one target's directory.
pub struct LocalCatalogRepository {
    dir: PathBuf,
    tenant_id: String,
    // Serializes read-modify-write cycles within the session.
    write_lock: Mutex<()>,
}

impl LocalCatalogRepository {
    pub fn new(dir: impl Into<PathBuf>, tenant_id: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            tenant_id: tenant_id.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// `<dir>/<region>.json`. Pure, no I/O.
    pub fn region_path(&self, region: &str) -> PathBuf {
        self.dir.join(format!("{region}.json"))
    }

    async fn load(&self, region: &str) -> Result<Vec<Image>, RepositoryError> {
        let path = self.region_path(region);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RepositoryError::UnknownRegion {
                    region: region.to_string(),
                })
            }
            Err(e) => return Err(repo_io_err(&path, e)),
        };
        let mut images: Vec<Image> = serde_json::from_str(&contents)
            .map_err(|source| RepositoryError::Json { path: path.clone(), source })?;
        for image in &mut images {
            image.region = region.to_string();
        }
        Ok(images)
    }

    async fn save(&self, region: &str, images: &[Image]) -> Result<(), RepositoryError> {
        let path = self.region_path(region);
        let json = serde_json::to_vec_pretty(images)
            .map_err(|source| RepositoryError::Json { path: path.clone(), source })?;
        write_atomic(&path, &json)
            .await
            .map_err(|e| repo_io_err(&path, e))
    }
}

#[async_trait]
impl ImageRepository for LocalCatalogRepository {
    async fn get_regions(&self) -> Result<Vec<String>, RepositoryError> {
        list_region_files(&self.dir).await
    }

    async fn get_imagelist(&self, region: &str) -> Result<Vec<Image>, RepositoryError> {
        self.load(region).await
    }

    async fn update_metadata(&self, region: &str, image: &Image) -> Result<(), RepositoryError> {
        let _guard = self.write_lock.lock().await;
        let mut images = self.load(region).await?;
        let slot = images
            .iter_mut()
            .find(|i| i.id == image.id)
            .ok_or_else(|| RepositoryError::ImageNotFound {
                region: region.to_string(),
                id: image.id.clone(),
            })?;
        slot.name = image.name.clone();
        slot.is_public = image.is_public;
        slot.user_properties = image.user_properties.clone();
        self.save(region, &images).await?;
        tracing::debug!(region, image = %image, "metadata updated");
        Ok(())
    }

    async fn upload_image(&self, region: &str, image: &Image) -> Result<String, RepositoryError> {
        let _guard = self.write_lock.lock().await;
        let mut images = self.load(region).await?;
        let id = uuid::Uuid::new_v4().simple().to_string();
        let mut stored = image.clone();
        stored.id = id.clone();
        stored.region = region.to_string();
        stored.owner = self.tenant_id.clone();
        stored.status = STATUS_ACTIVE.to_string();
        images.push(stored);
        self.save(region, &images).await?;
        tracing::debug!(region, name = %image.name, id = %id, "image uploaded");
        Ok(id)
    }

    async fn delete_image(
        &self,
        region: &str,
        id: &str,
        confirm: bool,
    ) -> Result<bool, RepositoryError> {
        if confirm {
            tracing::debug!(region, id, "local catalog deletes without confirmation");
        }
        let _guard = self.write_lock.lock().await;
        let mut images = self.load(region).await?;
        let before = images.len();
        images.retain(|image| image.id != id);
        if images.len() == before {
            return Ok(false);
        }
        self.save(region, &images).await?;
        Ok(true)
    }

    async fn get_tenant_id(&self) -> Result<String, RepositoryError> {
        Ok(self.tenant_id.clone())
    }
}

async fn list_region_files(dir: &Path) -> Result<Vec<String>, RepositoryError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(repo_io_err(dir, e)),
    };
    let mut regions = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| repo_io_err(dir, e))? {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
            regions.push(stem.to_string());
        }
    }
    regions.sort();
    Ok(regions)
}

/// Opens [`LocalCatalogRepository`] sessions under `<root>/<target>/`.
#[derive(Debug, Clone)]
pub struct LocalCatalogProvider {
    root: PathBuf,
}

impl LocalCatalogProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn target_dir(&self, target: &str) -> PathBuf {
        self.root.join(target)
    }
}

impl RepositoryProvider for LocalCatalogProvider {
    fn session(&self, target: &Target) -> Result<Arc<dyn ImageRepository>, RepositoryError> {
        Ok(Arc::new(LocalCatalogRepository::new(
            self.target_dir(&target.name),
            target.tenant.clone(),
        )))
    }
}
