//! `glancesync daemon`: lifecycle and API-triggered syncs.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Subcommand;
use serde_json::Value;

use glancesync_core::config;
use glancesync_daemon::paths::socket_path;
use glancesync_daemon::{
    request_forget, request_status, request_stop, request_sync, request_task, start_blocking,
    DaemonError,
};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (socket server + sync processor).
    Start,
    /// Request graceful daemon shutdown over the Unix socket.
    Stop,
    /// Query daemon runtime status over the Unix socket.
    Status,
    /// Ask the daemon to synchronise one region; prints the task.
    Sync {
        /// Region id (`region` or `target:region`).
        region: String,
    },
    /// Show one sync task.
    Task {
        task_id: String,
    },
    /// Forget a finished sync task.
    Forget {
        task_id: String,
    },
}

pub fn run(command: DaemonCommand, config_path: Option<&Path>) -> Result<()> {
    let home = config::home().context("could not determine home directory")?;
    let socket = socket_path(&home);

    match command {
        DaemonCommand::Start => {
            start_blocking(&home, config_path.map(Path::to_path_buf))
                .context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request_stop(&socket) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => match request_status(&socket) {
            Ok(status) => print_json(&status)?,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                print_json(&serde_json::json!({
                    "running": false,
                    "socket": socket.display().to_string(),
                }))?;
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        },
        DaemonCommand::Sync { region } => {
            let task = request_sync(&socket, &region)
                .with_context(|| format!("failed to request sync of {region}"))?;
            print_json(&task)?;
        }
        DaemonCommand::Task { task_id } => {
            let task = request_task(&socket, &task_id)
                .with_context(|| format!("failed to query task {task_id}"))?;
            print_json(&task)?;
        }
        DaemonCommand::Forget { task_id } => {
            let result = request_forget(&socket, &task_id)
                .with_context(|| format!("failed to forget task {task_id}"))?;
            print_json(&result)?;
        }
    }

    Ok(())
}

fn print_json(value: &Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render daemon response JSON")?
    );
    Ok(())
}
