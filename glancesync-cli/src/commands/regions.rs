//! `glancesync show-regions`: every region that would be synchronised.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use glancesync_sync::pipeline::list_regions;

use super::{runtime, Session};

#[derive(Args, Debug)]
pub struct RegionsArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn run(args: RegionsArgs, config_path: Option<&Path>) -> Result<()> {
    let session = Session::open(config_path, None)?;
    let regions = runtime()?
        .block_on(list_regions(&session.config, session.provider.as_ref()))
        .context("failed to list regions")?;

    if args.json {
        let ids: Vec<String> = regions.iter().map(ToString::to_string).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&ids).context("failed to serialize regions JSON")?
        );
        return Ok(());
    }

    if regions.is_empty() {
        println!("No regions found under {}.", session.config.catalog_root(&session.home).display());
    }
    for region in regions {
        println!("{region}");
    }
    Ok(())
}
