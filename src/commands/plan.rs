use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;

use crate::config::{find_config, Config};
use crate::plan::readiness::{classify_plan, Board, Readiness};
use crate::plan::waves::plan_waves;
use crate::plan::{short_id, PlanSnapshot};
use crate::tracker::cli::BeadsCli;
use crate::tracker::load_graph;

#[derive(Debug, Args)]
pub struct PlanArgs {
    /// Project root directory (defaults to the current directory)
    #[arg(long)]
    pub project_root: Option<PathBuf>,
    /// Read the tracker snapshot from a JSON file instead of the live tracker
    #[arg(long)]
    pub input: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Pick the format: text for a human at a terminal, JSON for pipes.
pub fn default_format(format: Option<OutputFormat>) -> OutputFormat {
    format.unwrap_or_else(|| {
        if std::io::stdout().is_terminal() {
            OutputFormat::Text
        } else {
            OutputFormat::Json
        }
    })
}

pub fn resolve_root(project_root: Option<&Path>) -> anyhow::Result<PathBuf> {
    match project_root {
        Some(root) => Ok(root.to_path_buf()),
        None => std::env::current_dir().context("resolving current directory"),
    }
}

/// Load the planning snapshot, either from a JSON file or from the live
/// tracker in `root`.
pub fn load_snapshot(root: &Path, input: Option<&Path>) -> anyhow::Result<PlanSnapshot> {
    if let Some(path) = input {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let snapshot: PlanSnapshot = serde_json::from_str(&content)
            .with_context(|| format!("parsing snapshot {}", path.display()))?;
        return Ok(snapshot);
    }

    let program = match find_config(root) {
        Some(path) => Config::load(&path)?.project.tracker,
        None => "bd".to_string(),
    };
    let tracker = BeadsCli::new(&program);
    let (items, edges) = load_graph(&tracker, root)?;
    Ok(PlanSnapshot { items, edges })
}

impl PlanArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let root = resolve_root(self.project_root.as_deref())?;
        let snapshot = load_snapshot(&root, self.input.as_deref())?;
        let board = classify_plan(plan_waves(&snapshot.items, &snapshot.edges));

        match default_format(self.format) {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&board)?);
            }
            OutputFormat::Text => print_board(&board),
        }
        Ok(())
    }
}

fn print_board(board: &Board) {
    for wave in &board.plan.waves {
        let line: Vec<String> = wave
            .items
            .iter()
            .map(|i| format!("{} (p{})", short_id(&i.id), i.priority))
            .collect();
        println!("Wave {}: {}", wave.level, line.join(", "));
        if let Some(ref gate) = wave.gate {
            println!("        gate: {} {}", short_id(&gate.id), gate.title);
        }
    }
    if !board.plan.unschedulable.is_empty() {
        let cycle: Vec<&str> = board
            .plan
            .unschedulable
            .iter()
            .map(|i| short_id(&i.id))
            .collect();
        println!("Unschedulable (dependency cycle): {}", cycle.join(", "));
    }

    println!();
    for c in &board.items {
        if c.classification.readiness == Readiness::Runnable {
            continue;
        }
        println!(
            "  {:<13} {} ({})",
            c.classification.readiness.as_str(),
            short_id(&c.item.id),
            c.classification.reason
        );
    }

    match board.recommendation {
        Some(ref item) => println!("Recommendation: {} {}", item.id, item.title),
        None => println!("Recommendation: none (no runnable beats)"),
    }
    let s = &board.summary;
    println!(
        "Summary: {} runnable, {} in progress, {} blocked, {} in verification, {} gates, {} unschedulable",
        s.runnable, s.in_progress, s.blocked, s.verification, s.gates, s.unschedulable
    );
}
