//! `glancesync make-backup`: snapshot region catalogs to JSON files.

use std::path::Path;

use anyhow::{bail, Context, Result};
use colored::Colorize;

use glancesync_sync::backup::make_backup;

use super::{runtime, RegionArgs, Session};

pub fn run(args: RegionArgs, config_path: Option<&Path>) -> Result<()> {
    let session = Session::open(config_path, args.parallel)?;
    let root = session.config.backup_root(&session.home);

    let (dir, outcomes) = runtime()?.block_on(async {
        let mut regions = session.regions(&args.regions).await?;
        if args.regions.is_empty() {
            regions.insert(0, session.config.master_region_id());
        }
        make_backup(session.config.clone(), session.provider.clone(), regions, &root)
            .await
            .with_context(|| format!("failed to create backup under {}", root.display()))
    })?;

    println!("backup directory: {}", dir.display());
    let mut failed = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(path) => println!("{} {} -> {}", "✓".green(), outcome.region, path.display()),
            Err(err) => {
                failed += 1;
                println!("{} {}: {err}", "✗".red(), outcome.region);
            }
        }
    }
    if failed > 0 {
        bail!("{failed} region(s) could not be backed up");
    }
    Ok(())
}
