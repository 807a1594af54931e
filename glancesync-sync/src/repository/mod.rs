//! The image repository capability consumed by the engine.
//!
//! A repository is a session against the Glance endpoints of one target. The
//! engine never talks HTTP itself; it only calls these operations.

pub mod local;
pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use glancesync_core::{Image, Target};

use crate::error::RepositoryError;

/// Operations against the regions of one target.
#[async_trait]
pub trait ImageRepository: Send + Sync {
    /// Names of every region reachable with this session's credential.
    async fn get_regions(&self) -> Result<Vec<String>, RepositoryError>;

    /// Full image listing of `region`. May block; callers wrap it in
    /// [`list_images`] to enforce the target's timeout.
    async fn get_imagelist(&self, region: &str) -> Result<Vec<Image>, RepositoryError>;

    /// Push `image`'s name, visibility and properties to the image with the same id.
    async fn update_metadata(&self, region: &str, image: &Image) -> Result<(), RepositoryError>;

    /// Upload the content of `image` from the master region; returns the new id.
    async fn upload_image(&self, region: &str, image: &Image) -> Result<String, RepositoryError>;

    /// Delete an image. Returns whether something was deleted.
    async fn delete_image(
        &self,
        region: &str,
        id: &str,
        confirm: bool,
    ) -> Result<bool, RepositoryError>;

    /// Tenant id of the session's credential.
    async fn get_tenant_id(&self) -> Result<String, RepositoryError>;
}

/// Opens repository sessions. Every region task asks for its own session.
pub trait RepositoryProvider: Send + Sync {
    fn session(&self, target: &Target) -> Result<Arc<dyn ImageRepository>, RepositoryError>;
}

/// List `region` on an isolated task, bounded by `timeout`.
///
/// A timeout, panic or cancellation of the worker surfaces as a
/// [`RepositoryError`] for this region only.
pub async fn list_images(
    repo: Arc<dyn ImageRepository>,
    region: &str,
    timeout: Duration,
) -> Result<Vec<Image>, RepositoryError> {
    let worker_region = region.to_string();
    let mut worker = tokio::spawn(async move { repo.get_imagelist(&worker_region).await });

    match tokio::time::timeout(timeout, &mut worker).await {
        Ok(Ok(listing)) => listing,
        Ok(Err(join_err)) => Err(RepositoryError::Worker {
            region: region.to_string(),
            message: join_err.to_string(),
        }),
        Err(_) => {
            worker.abort();
            tracing::warn!(region, timeout = ?timeout, "image listing timed out");
            Err(RepositoryError::Timeout {
                region: region.to_string(),
                after: timeout,
            })
        }
    }
}
