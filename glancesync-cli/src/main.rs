//! glancesync: keep Glance image catalogs of many regions in line with a master region.
//!
//! # Usage
//!
//! ```text
//! glancesync [--config <path>] dry-run [<region>...] [--parallel <N>]
//! glancesync [--config <path>] sync [<region>...] [--parallel <N>]
//! glancesync [--config <path>] show-status [<region>...] [--parallel <N>] [--json]
//! glancesync [--config <path>] show-regions [--json]
//! glancesync [--config <path>] make-backup [<region>...] [--parallel <N>]
//! glancesync daemon start|stop|status|sync <region>|task <id>|forget <id>
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand, regions::RegionsArgs, status::StatusArgs, RegionArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "glancesync",
    version,
    about = "Synchronise Glance images from a master region to other regions",
    long_about = None,
)]
struct Cli {
    /// Configuration file (default: ~/.glancesync/config.yaml).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show what a sync would do, without changing anything.
    DryRun(RegionArgs),

    /// Synchronise regions with the master region.
    Sync(RegionArgs),

    /// Show the per-image state of each region.
    ShowStatus(StatusArgs),

    /// List the regions that would be synchronised.
    ShowRegions(RegionsArgs),

    /// Save the image list of each region to a timestamped backup directory.
    MakeBackup(RegionArgs),

    /// Manage the glancesync daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    glancesync_daemon::init_tracing();

    let config = cli.config.as_deref();
    match cli.command {
        Commands::DryRun(args) => commands::sync::run(args, config, true),
        Commands::Sync(args) => commands::sync::run(args, config, false),
        Commands::ShowStatus(args) => commands::status::run(args, config),
        Commands::ShowRegions(args) => commands::regions::run(args, config),
        Commands::MakeBackup(args) => commands::backup::run(args, config),
        Commands::Daemon { command } => commands::daemon::run(command, config),
    }
}
