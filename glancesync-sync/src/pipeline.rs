//! Shared sync pipeline used by the CLI and the daemon.
//!
//! The master catalog is built once per run and shared read-only. Every region
//! then runs on its own task with its own repository session, at most
//! `max_children` at a time. A failing region is logged and recorded in its
//! [`RegionOutcome`]; the others carry on.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;

use glancesync_core::{Config, RegionId};

use crate::error::SyncError;
use crate::executor::{execute, ExecutionReport};
use crate::master::{build_master_catalog, MasterCatalog};
use crate::obsolete::{apply_obsolete, plan_obsolete};
use crate::reconcile::{reconcile, SyncPlan, SyncState};
use crate::repository::{list_images, RepositoryProvider};

/// Result of one region task.
#[derive(Debug)]
pub struct RegionOutcome<T> {
    pub region: RegionId,
    pub result: Result<T, SyncError>,
}

/// Summary of one region's sync.
#[derive(Debug, Clone, Serialize)]
pub struct RegionReport {
    pub region: String,
    pub states: BTreeMap<SyncState, usize>,
    pub obsolete_updates: usize,
    pub execution: ExecutionReport,
}

// ---------------------------------------------------------------------------
// 1. Region selection
// ---------------------------------------------------------------------------

/// Every region of every target, minus `ignore_regions` and the master region.
pub async fn list_regions(
    config: &Config,
    provider: &dyn RepositoryProvider,
) -> Result<Vec<RegionId>, SyncError> {
    let master = config.master_region_id();
    let mut regions = Vec::new();
    for target in config.targets.values() {
        let repo = provider.session(target)?;
        for region in repo.get_regions().await? {
            let id = target.region_id(&region);
            if target.ignore_regions.contains(&region) || id == master {
                continue;
            }
            regions.push(id);
        }
    }
    Ok(regions)
}

/// Resolve user-supplied region ids; no ids means every region.
pub async fn select_regions(
    config: &Config,
    provider: &dyn RepositoryProvider,
    ids: &[String],
) -> Result<Vec<RegionId>, SyncError> {
    if ids.is_empty() {
        return list_regions(config, provider).await;
    }
    let master = config.master_region_id();
    let mut regions = Vec::with_capacity(ids.len());
    for id in ids {
        let region = config.resolve_region(id)?;
        if region == master {
            tracing::warn!(region = %region, "the master region is never synchronised; skipped");
            continue;
        }
        regions.push(region);
    }
    Ok(regions)
}

// ---------------------------------------------------------------------------
// 2. Per-region work
// ---------------------------------------------------------------------------

/// Build the master catalog from the master region.
pub async fn load_master(
    config: &Config,
    provider: &dyn RepositoryProvider,
) -> Result<MasterCatalog, SyncError> {
    let target = config.master_target();
    let repo = provider.session(target)?;
    let tenant_id = repo.get_tenant_id().await?;
    let images = list_images(repo, &config.master_region, target.list_images_timeout).await?;
    let catalog = build_master_catalog(images, &tenant_id);
    tracing::info!(
        region = %config.master_region,
        images = catalog.len(),
        "master catalog loaded",
    );
    Ok(catalog)
}

/// Compute a region's plan without touching it.
pub async fn reconcile_region(
    config: &Config,
    provider: &dyn RepositoryProvider,
    master: &MasterCatalog,
    region: &RegionId,
) -> Result<SyncPlan, SyncError> {
    let target = config.target(&region.target)?;
    let repo = provider.session(target)?;
    let tenant_id = repo.get_tenant_id().await?;
    let images = list_images(repo, &region.region, target.list_images_timeout).await?;

    let skip = if target.support_obsolete_images {
        plan_obsolete(master, &images, target, &tenant_id)
            .into_iter()
            .map(|update| update.image.id)
            .collect()
    } else {
        Default::default()
    };
    Ok(reconcile(region, master, &images, target, &tenant_id, &skip))
}

/// Synchronise one region with master.
pub async fn sync_region(
    config: &Config,
    provider: &dyn RepositoryProvider,
    master: &MasterCatalog,
    region: &RegionId,
    dry_run: bool,
) -> Result<RegionReport, SyncError> {
    let target = config.target(&region.target)?;
    let repo = provider.session(target)?;
    let tenant_id = repo.get_tenant_id().await?;
    let images = list_images(repo.clone(), &region.region, target.list_images_timeout).await?;

    let mut obsolete_updates = 0;
    let skip = if target.support_obsolete_images {
        let updates = plan_obsolete(master, &images, target, &tenant_id);
        obsolete_updates = updates.len();
        apply_obsolete(repo.as_ref(), region, &updates, dry_run).await?
    } else {
        Default::default()
    };

    let plan = reconcile(region, master, &images, target, &tenant_id, &skip);
    let mut states = BTreeMap::new();
    for entry in &plan.entries {
        *states.entry(entry.state).or_insert(0) += 1;
    }
    for entry in plan.entries.iter().filter(|e| e.state.is_error()) {
        tracing::warn!(
            region = %region,
            image = %entry.master.name,
            state = %entry.state,
            "image needs manual attention",
        );
    }

    let execution = execute(&plan, target, repo.as_ref(), dry_run).await?;
    Ok(RegionReport {
        region: region.to_string(),
        states,
        obsolete_updates,
        execution,
    })
}

// ---------------------------------------------------------------------------
// 3. Fan-out
// ---------------------------------------------------------------------------

/// Run `job` for every region, at most `max_children` at a time.
///
/// Each job runs on its own task inside a `region` span. A panic is reported
/// as that region's failure. Outcomes come back in input order.
pub async fn run_bounded<T, F, Fut>(
    regions: Vec<RegionId>,
    max_children: usize,
    job: F,
) -> Vec<RegionOutcome<T>>
where
    T: Send + 'static,
    F: Fn(RegionId) -> Fut,
    Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
{
    let permits = Arc::new(Semaphore::new(max_children.max(1)));
    let mut set = JoinSet::new();

    for (index, region) in regions.into_iter().enumerate() {
        let permits = Arc::clone(&permits);
        let span = tracing::info_span!("region", region = %region);
        let work = job(region.clone()).instrument(span);
        set.spawn(async move {
            let _permit = permits.acquire_owned().await;
            let result = match tokio::spawn(work).await {
                Ok(result) => result,
                Err(join_err) => Err(SyncError::Task {
                    region: region.to_string(),
                    message: join_err.to_string(),
                }),
            };
            if let Err(e) = &result {
                tracing::error!(region = %region, error = %e, "region failed");
            }
            (index, RegionOutcome { region, result })
        });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => tracing::error!(error = %e, "region supervisor failed"),
        }
    }
    outcomes.sort_by_key(|(index, _)| *index);
    outcomes.into_iter().map(|(_, outcome)| outcome).collect()
}

/// Synchronise `regions`, honouring `config.max_children`.
///
/// Fails only if the master catalog cannot be built.
pub async fn sync_regions(
    config: Arc<Config>,
    provider: Arc<dyn RepositoryProvider>,
    regions: Vec<RegionId>,
    dry_run: bool,
) -> Result<Vec<RegionOutcome<RegionReport>>, SyncError> {
    let master = Arc::new(load_master(&config, provider.as_ref()).await?);
    let max_children = config.max_children;
    Ok(run_bounded(regions, max_children, move |region| {
        let config = Arc::clone(&config);
        let provider = Arc::clone(&provider);
        let master = Arc::clone(&master);
        async move { sync_region(&config, provider.as_ref(), &master, &region, dry_run).await }
    })
    .await)
}

/// Reconcile `regions` without executing anything.
pub async fn status_regions(
    config: Arc<Config>,
    provider: Arc<dyn RepositoryProvider>,
    regions: Vec<RegionId>,
) -> Result<Vec<RegionOutcome<SyncPlan>>, SyncError> {
    let master = Arc::new(load_master(&config, provider.as_ref()).await?);
    let max_children = config.max_children;
    Ok(run_bounded(regions, max_children, move |region| {
        let config = Arc::clone(&config);
        let provider = Arc::clone(&provider);
        let master = Arc::clone(&master);
        async move { reconcile_region(&config, provider.as_ref(), &master, &region).await }
    })
    .await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::{MemoryProvider, MemoryRepository};
    use glancesync_core::{ConfigFile, Image, TargetConfig};

    fn config() -> Config {
        let mut file = ConfigFile {
            master_region: "Spain2".into(),
            max_children: 1,
            catalog_dir: None,
            backup_dir: None,
            targets: Default::default(),
        };
        file.targets.insert(
            "master".into(),
            TargetConfig {
                credential: "admin,secret,admin".into(),
                ignore_regions: ["Lannion".to_string()].into(),
                ..TargetConfig::default()
            },
        );
        Config::from_file(file).expect("valid config")
    }

    async fn provider() -> MemoryProvider {
        let repo = Arc::new(MemoryRepository::new("tenant"));
        for region in ["Spain2", "Trento", "Lannion"] {
            repo.add_region(region).await;
        }
        MemoryProvider::new().with_target("master", repo)
    }

    #[tokio::test]
    async fn listing_skips_master_and_ignored_regions() {
        let regions = list_regions(&config(), &provider().await).await.unwrap();
        assert_eq!(regions, vec![RegionId::new("master", "Trento")]);
    }

    #[tokio::test]
    async fn explicit_master_region_is_skipped() {
        let ids = vec!["Spain2".to_string(), "Lannion".to_string()];
        let regions = select_regions(&config(), &provider().await, &ids).await.unwrap();
        assert_eq!(regions, vec![RegionId::new("master", "Lannion")]);
    }

    #[tokio::test]
    async fn unknown_target_is_a_config_error() {
        let ids = vec!["nowhere:Trento".to_string()];
        let err = select_regions(&config(), &provider().await, &ids).await.unwrap_err();
        assert!(matches!(err, SyncError::Config(_)), "got: {err}");
    }

    #[tokio::test]
    async fn outcomes_keep_input_order() {
        let regions = vec![
            RegionId::new("master", "a"),
            RegionId::new("master", "b"),
            RegionId::new("master", "c"),
        ];
        let outcomes = run_bounded(regions, 3, |region| async move {
            if region.region == "b" {
                panic!("boom");
            }
            Ok::<_, SyncError>(region.region.clone())
        })
        .await;
        let names: Vec<&str> = outcomes.iter().map(|o| o.region.region.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(matches!(outcomes[1].result, Err(SyncError::Task { .. })));
        assert_eq!(outcomes[2].result.as_ref().unwrap(), "c");
    }

    #[tokio::test]
    async fn master_catalog_comes_from_master_region() {
        let repo = Arc::new(MemoryRepository::new("tenant"));
        repo.add_region("Spain2").await;
        repo.add_region("Trento").await;
        let mut base = Image::new("m-1", "base");
        base.is_public = true;
        repo.insert_image("Spain2", base.clone()).await;
        base.id = "t-1".into();
        base.name = "trento-only".into();
        repo.insert_image("Trento", base).await;

        let provider = MemoryProvider::new().with_target("master", repo);
        let master = load_master(&config(), &provider).await.unwrap();
        assert_eq!(master.keys().collect::<Vec<_>>(), vec!["base"]);
    }
}
