//! `glancesync sync` / `glancesync dry-run`: bring regions in line with master.

use std::path::Path;

use anyhow::{bail, Context, Result};
use colored::Colorize;

use glancesync_sync::{sync_regions, RegionOutcome, RegionReport, SyncState};

use super::{runtime, RegionArgs, Session};

pub fn run(args: RegionArgs, config_path: Option<&Path>, dry_run: bool) -> Result<()> {
    let session = Session::open(config_path, args.parallel)?;
    let outcomes = runtime()?.block_on(async {
        let regions = session.regions(&args.regions).await?;
        sync_regions(
            session.config.clone(),
            session.provider.clone(),
            regions,
            dry_run,
        )
        .await
        .context("failed to build the master catalog")
    })?;

    if outcomes.is_empty() {
        println!("No regions to synchronise.");
        return Ok(());
    }

    let failed = print_outcomes(&outcomes, dry_run);
    if failed > 0 {
        bail!("{failed} region(s) failed");
    }
    Ok(())
}

fn print_outcomes(outcomes: &[RegionOutcome<RegionReport>], dry_run: bool) -> usize {
    let prefix = if dry_run { "[dry-run] " } else { "" };
    let mut failed = 0;

    for outcome in outcomes {
        match &outcome.result {
            Ok(report) => {
                let errors: usize = report
                    .states
                    .iter()
                    .filter(|(state, _)| state.is_error())
                    .map(|(_, count)| count)
                    .sum();
                let execution = &report.execution;
                let mark = if errors > 0 { "!".yellow() } else { "✓".green() };
                if dry_run {
                    println!(
                        "{prefix}{mark} {}: {} to upload ({:.2} MB), {} to update",
                        outcome.region,
                        pending(report, |s| s.uploads()),
                        execution.pending_mb(),
                        pending(report, |s| {
                            matches!(s, SyncState::PendingMetadata | SyncState::PendingAmi)
                        }),
                    );
                } else {
                    println!(
                        "{mark} {}: {} uploaded ({:.2} MB), {} updated, {} deleted, {} renamed",
                        outcome.region,
                        execution.uploads,
                        execution.uploaded_mb(),
                        execution.metadata_updates,
                        execution.deletes,
                        execution.renames,
                    );
                }
                if report.obsolete_updates > 0 {
                    println!("  {} obsolete image(s) updated", report.obsolete_updates);
                }
                if errors > 0 {
                    println!("  {errors} image(s) need manual attention (see show-status)");
                }
            }
            Err(err) => {
                failed += 1;
                println!("{prefix}{} {}: {err}", "✗".red(), outcome.region);
            }
        }
    }
    failed
}

fn pending(report: &RegionReport, wanted: impl Fn(SyncState) -> bool) -> usize {
    report
        .states
        .iter()
        .filter(|(state, _)| wanted(**state))
        .map(|(_, count)| count)
        .sum()
}
