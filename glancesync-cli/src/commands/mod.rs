//! Subcommand implementations and the plumbing they share.

pub mod backup;
pub mod daemon;
pub mod regions;
pub mod status;
pub mod sync;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use glancesync_core::{config, Config, RegionId};
use glancesync_sync::{pipeline, LocalCatalogProvider, RepositoryProvider};

/// Region selection and parallelism shared by the region commands.
#[derive(Args, Debug, Clone, Default)]
pub struct RegionArgs {
    /// Region ids (`region` or `target:region`). Default: every region.
    pub regions: Vec<String>,

    /// Regions processed at the same time (overrides `max_children`).
    #[arg(long, value_name = "N")]
    pub parallel: Option<usize>,
}

/// Loaded configuration plus the repository it points at.
pub struct Session {
    pub home: PathBuf,
    pub config: Arc<Config>,
    pub provider: Arc<dyn RepositoryProvider>,
}

impl Session {
    pub fn open(config_path: Option<&Path>, parallel: Option<usize>) -> Result<Self> {
        let home = config::home().context("could not determine home directory")?;
        let path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| config::config_path_at(&home));
        let mut config = config::load_at(&path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?;
        if let Some(n) = parallel {
            config.max_children = n.max(1);
        }
        let provider = Arc::new(LocalCatalogProvider::new(config.catalog_root(&home)));
        Ok(Self {
            home,
            config: Arc::new(config),
            provider,
        })
    }

    pub async fn regions(&self, ids: &[String]) -> Result<Vec<RegionId>> {
        pipeline::select_regions(&self.config, self.provider.as_ref(), ids)
            .await
            .context("failed to select regions")
    }
}

/// Multi-threaded runtime for one command.
pub fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}
