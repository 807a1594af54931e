//! `glancesync show-status`: per-region plan, nothing executed.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use colored::{ColoredString, Colorize};
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use glancesync_sync::pipeline::status_regions;
use glancesync_sync::{RegionOutcome, SyncPlan, SyncState};

use super::{runtime, RegionArgs, Session};

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub regions: RegionArgs,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct RegionStatusJson {
    region: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    images: Vec<ImageStatusJson>,
}

#[derive(Serialize)]
struct ImageStatusJson {
    name: String,
    state: SyncState,
    size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    regional_id: Option<String>,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "image")]
    image: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "size (MB)")]
    size_mb: String,
    #[tabled(rename = "regional id")]
    regional_id: String,
}

pub fn run(args: StatusArgs, config_path: Option<&Path>) -> Result<()> {
    let session = Session::open(config_path, args.regions.parallel)?;
    let outcomes = runtime()?.block_on(async {
        let regions = session.regions(&args.regions.regions).await?;
        status_regions(session.config.clone(), session.provider.clone(), regions)
            .await
            .context("failed to build the master catalog")
    })?;

    if args.json {
        let payload: Vec<RegionStatusJson> = outcomes.iter().map(to_json).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&payload).context("failed to serialize status JSON")?
        );
        return Ok(());
    }

    print_tables(&outcomes);
    Ok(())
}

fn to_json(outcome: &RegionOutcome<SyncPlan>) -> RegionStatusJson {
    match &outcome.result {
        Ok(plan) => RegionStatusJson {
            region: outcome.region.to_string(),
            ok: true,
            error: None,
            images: plan
                .entries
                .iter()
                .map(|entry| ImageStatusJson {
                    name: entry.master.name.clone(),
                    state: entry.state,
                    size: entry.master.size,
                    regional_id: entry.regional.as_ref().map(|image| image.id.clone()),
                })
                .collect(),
        },
        Err(err) => RegionStatusJson {
            region: outcome.region.to_string(),
            ok: false,
            error: Some(err.to_string()),
            images: vec![],
        },
    }
}

fn print_tables(outcomes: &[RegionOutcome<SyncPlan>]) {
    if outcomes.is_empty() {
        println!("No regions selected.");
        return;
    }

    for outcome in outcomes {
        let plan = match &outcome.result {
            Ok(plan) => plan,
            Err(err) => {
                println!("{} {}: {err}\n", "✗".red(), outcome.region.to_string().bold());
                continue;
            }
        };

        let summary: Vec<String> = SyncState::ALL
            .iter()
            .filter_map(|state| match plan.count(*state) {
                0 => None,
                n => Some(format!("{n} {}", state_label(*state))),
            })
            .collect();
        println!(
            "{} | {} images | {}",
            outcome.region.to_string().bold(),
            plan.entries.len(),
            if summary.is_empty() { "nothing to synchronise".to_string() } else { summary.join(", ") },
        );

        if plan.entries.is_empty() {
            println!();
            continue;
        }

        let rows: Vec<StatusTableRow> = plan
            .entries
            .iter()
            .map(|entry| StatusTableRow {
                image: entry.master.name.clone(),
                state: state_label(entry.state).to_string(),
                size_mb: format!("{:.2}", entry.master.size_mb()),
                regional_id: entry
                    .regional
                    .as_ref()
                    .map(|image| image.id.clone())
                    .unwrap_or_else(|| "-".to_string()),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}\n");
    }
}

fn state_label(state: SyncState) -> ColoredString {
    let label = state.as_str();
    match state {
        SyncState::Ok | SyncState::OkStalledChecksum => label.green(),
        SyncState::ErrorChecksum | SyncState::ErrorAmi => label.red().bold(),
        _ => label.yellow(),
    }
}
