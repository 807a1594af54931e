//! In-memory repository. Backs tests and dry runs against canned catalogs.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use glancesync_core::{Image, Target};

use super::{ImageRepository, RepositoryProvider};
use crate::error::RepositoryError;

/// A mutation recorded by [`MemoryRepository`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Update { region: String, id: String, name: String },
    Upload { region: String, id: String, name: String },
    Delete { region: String, id: String },
}

#[derive(Default)]
struct State {
    regions: BTreeMap<String, Vec<Image>>,
    mutations: Vec<Mutation>,
    failing_listings: BTreeSet<String>,
    failing_uploads: BTreeSet<String>,
    next_id: usize,
}

/// Region catalogs held in memory, with a log of every mutation.
pub struct MemoryRepository {
    tenant_id: String,
    state: Mutex<State>,
    list_delay: Option<Duration>,
    upload_delay: Option<Duration>,
    uploads_in_flight: AtomicUsize,
    max_uploads_in_flight: AtomicUsize,
}

impl MemoryRepository {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            state: Mutex::new(State::default()),
            list_delay: None,
            upload_delay: None,
            uploads_in_flight: AtomicUsize::new(0),
            max_uploads_in_flight: AtomicUsize::new(0),
        }
    }

    /// Delay every listing, to exercise timeouts.
    pub fn with_list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = Some(delay);
        self
    }

    /// Delay every upload, to observe overlapping materializations.
    pub fn with_upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = Some(delay);
        self
    }

    pub async fn add_region(&self, region: &str) {
        self.state
            .lock()
            .await
            .regions
            .entry(region.to_string())
            .or_default();
    }

    /// Add an image to `region`, creating the region if needed.
    pub async fn insert_image(&self, region: &str, mut image: Image) {
        image.region = region.to_string();
        self.state
            .lock()
            .await
            .regions
            .entry(region.to_string())
            .or_default()
            .push(image);
    }

    pub async fn fail_listing(&self, region: &str) {
        self.state
            .lock()
            .await
            .failing_listings
            .insert(region.to_string());
    }

    pub async fn fail_uploads(&self, region: &str) {
        self.state
            .lock()
            .await
            .failing_uploads
            .insert(region.to_string());
    }

    pub async fn images(&self, region: &str) -> Vec<Image> {
        self.state
            .lock()
            .await
            .regions
            .get(region)
            .cloned()
            .unwrap_or_default()
    }

    /// Images of `region` named `name`.
    pub async fn find(&self, region: &str, name: &str) -> Vec<Image> {
        self.images(region)
            .await
            .into_iter()
            .filter(|image| image.name == name)
            .collect()
    }

    pub async fn mutations(&self) -> Vec<Mutation> {
        self.state.lock().await.mutations.clone()
    }

    /// Highest number of uploads observed running at the same time.
    pub fn max_uploads_in_flight(&self) -> usize {
        self.max_uploads_in_flight.load(Ordering::SeqCst)
    }

    async fn track_upload(&self) {
        let now = self.uploads_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_uploads_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.upload_delay {
            tokio::time::sleep(delay).await;
        }
        self.uploads_in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ImageRepository for MemoryRepository {
    async fn get_regions(&self) -> Result<Vec<String>, RepositoryError> {
        Ok(self.state.lock().await.regions.keys().cloned().collect())
    }

    async fn get_imagelist(&self, region: &str) -> Result<Vec<Image>, RepositoryError> {
        if let Some(delay) = self.list_delay {
            tokio::time::sleep(delay).await;
        }
        let state = self.state.lock().await;
        if state.failing_listings.contains(region) {
            return Err(RepositoryError::Api {
                region: region.to_string(),
                message: "listing refused".to_string(),
            });
        }
        state
            .regions
            .get(region)
            .cloned()
            .ok_or_else(|| RepositoryError::UnknownRegion {
                region: region.to_string(),
            })
    }

    async fn update_metadata(&self, region: &str, image: &Image) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().await;
        let slot = state
            .regions
            .get_mut(region)
            .and_then(|images| images.iter_mut().find(|i| i.id == image.id))
            .ok_or_else(|| RepositoryError::ImageNotFound {
                region: region.to_string(),
                id: image.id.clone(),
            })?;
        slot.name = image.name.clone();
        slot.is_public = image.is_public;
        slot.user_properties = image.user_properties.clone();
        state.mutations.push(Mutation::Update {
            region: region.to_string(),
            id: image.id.clone(),
            name: image.name.clone(),
        });
        Ok(())
    }

    async fn upload_image(&self, region: &str, image: &Image) -> Result<String, RepositoryError> {
        if self.state.lock().await.failing_uploads.contains(region) {
            return Err(RepositoryError::Api {
                region: region.to_string(),
                message: format!("upload of {} refused", image.name),
            });
        }
        self.track_upload().await;

        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = format!("{region}-{:04}", state.next_id);
        let mut stored = image.clone();
        stored.id = id.clone();
        stored.region = region.to_string();
        stored.owner = self.tenant_id.clone();
        stored.status = glancesync_core::image::STATUS_ACTIVE.to_string();
        state
            .regions
            .entry(region.to_string())
            .or_default()
            .push(stored);
        state.mutations.push(Mutation::Upload {
            region: region.to_string(),
            id: id.clone(),
            name: image.name.clone(),
        });
        Ok(id)
    }

    async fn delete_image(
        &self,
        region: &str,
        id: &str,
        _confirm: bool,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().await;
        let Some(images) = state.regions.get_mut(region) else {
            return Ok(false);
        };
        let before = images.len();
        images.retain(|image| image.id != id);
        let deleted = images.len() != before;
        if deleted {
            state.mutations.push(Mutation::Delete {
                region: region.to_string(),
                id: id.to_string(),
            });
        }
        Ok(deleted)
    }

    async fn get_tenant_id(&self) -> Result<String, RepositoryError> {
        Ok(self.tenant_id.clone())
    }
}

/// Hands out [`MemoryRepository`] sessions by target name.
#[derive(Default, Clone)]
pub struct MemoryProvider {
    repositories: HashMap<String, Arc<MemoryRepository>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target(mut self, target: &str, repo: Arc<MemoryRepository>) -> Self {
        self.repositories.insert(target.to_string(), repo);
        self
    }
}

impl RepositoryProvider for MemoryProvider {
    fn session(&self, target: &Target) -> Result<Arc<dyn ImageRepository>, RepositoryError> {
        self.repositories
            .get(&target.name)
            .map(|repo| repo.clone() as Arc<dyn ImageRepository>)
            .ok_or_else(|| RepositoryError::Api {
                region: target.name.clone(),
                message: "no repository for target".to_string(),
            })
    }
}
