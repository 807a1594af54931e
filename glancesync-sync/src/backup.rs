//! Region catalog backups.
//!
//! ```text
//! <backup_dir>/
//!   backup_<YYYYMMDD_HHMMSS>/
//!     <region id>.json
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};

use glancesync_core::{Config, RegionId};

use crate::atomic::write_atomic;
use crate::error::{io_err, SyncError};
use crate::pipeline::{run_bounded, RegionOutcome};
use crate::repository::{list_images, RepositoryProvider};

/// `backup_<YYYYMMDD_HHMMSS>`
pub fn backup_dir_name(at: DateTime<Local>) -> String {
    format!("backup_{}", at.format("%Y%m%d_%H%M%S"))
}

/// `<dir>/<region id>.json`. Pure, no I/O.
pub fn region_backup_path(dir: &Path, region: &RegionId) -> PathBuf {
    dir.join(format!("{region}.json"))
}

/// Write the full image list of one region into `dir`.
pub async fn backup_region(
    config: &Config,
    provider: &dyn RepositoryProvider,
    region: &RegionId,
    dir: &Path,
) -> Result<PathBuf, SyncError> {
    let target = config.target(&region.target)?;
    let repo = provider.session(target)?;
    let images = list_images(repo, &region.region, target.list_images_timeout).await?;
    let path = region_backup_path(dir, region);
    let json = serde_json::to_vec_pretty(&images)?;
    write_atomic(&path, &json).await.map_err(|e| io_err(&path, e))?;
    tracing::info!(region = %region, images = images.len(), path = %path.display(), "region backed up");
    Ok(path)
}

/// Back up `regions` into a fresh timestamped directory under `root`.
///
/// Returns the directory and one outcome per region.
pub async fn make_backup(
    config: Arc<Config>,
    provider: Arc<dyn RepositoryProvider>,
    regions: Vec<RegionId>,
    root: &Path,
) -> Result<(PathBuf, Vec<RegionOutcome<PathBuf>>), SyncError> {
    let dir = root.join(backup_dir_name(Local::now()));
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| io_err(&dir, e))?;

    let max_children = config.max_children;
    let job_dir = dir.clone();
    let outcomes = run_bounded(regions, max_children, move |region| {
        let config = Arc::clone(&config);
        let provider = Arc::clone(&provider);
        let dir = job_dir.clone();
        async move { backup_region(&config, provider.as_ref(), &region, &dir).await }
    })
    .await;
    Ok((dir, outcomes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn directory_name_is_sortable_timestamp() {
        let at = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 1).unwrap();
        assert_eq!(backup_dir_name(at), "backup_20240307_090501");
    }

    #[test]
    fn region_file_uses_region_id() {
        let dir = Path::new("/b");
        assert_eq!(
            region_backup_path(dir, &RegionId::new("master", "Trento")),
            PathBuf::from("/b/Trento.json")
        );
        assert_eq!(
            region_backup_path(dir, &RegionId::new("experimental", "Lannion")),
            PathBuf::from("/b/experimental:Lannion.json")
        );
    }
}
