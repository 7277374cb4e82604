use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use crate::plan::readiness::{classify_plan, Summary};
use crate::plan::waves::plan_waves;
use crate::plan::WorkItem;

use super::plan::{default_format, load_snapshot, resolve_root, OutputFormat};

#[derive(Debug, Args)]
pub struct StatusArgs {
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

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub summary: Summary,
    pub waves: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<WorkItem>,
}

impl StatusArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let root = resolve_root(self.project_root.as_deref())?;
        let snapshot = load_snapshot(&root, self.input.as_deref())?;
        let board = classify_plan(plan_waves(&snapshot.items, &snapshot.edges));

        let report = StatusReport {
            summary: board.summary,
            waves: board.plan.waves.len(),
            recommendation: board.recommendation,
        };

        match default_format(self.format) {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            OutputFormat::Text => {
                let s = &report.summary;
                println!("waves:          {}", report.waves);
                println!("runnable:       {}", s.runnable);
                println!("in progress:    {}", s.in_progress);
                println!("blocked:        {}", s.blocked);
                println!("verification:   {}", s.verification);
                println!("gates:          {}", s.gates);
                println!("unschedulable:  {}", s.unschedulable);
                match report.recommendation {
                    Some(ref item) => println!("recommendation: {} {}", item.id, item.title),
                    None => println!("recommendation: none"),
                }
            }
        }
        Ok(())
    }
}
