use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;

use crate::config::{FileSettings, SettingsSource};
use crate::session::DetachedSessions;
use crate::tracker::cli::BeadsCli;
use crate::verify::orchestrator::{ActionKind, AgentVerifier, VerifyOrchestrator};

use super::plan::resolve_root;

#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Beat ids the completed agent action covered
    #[arg(required = true)]
    pub items: Vec<String>,
    /// The kind of agent action that just completed
    #[arg(long, value_enum, default_value = "take")]
    pub action: ActionKind,
    /// Exit code the implementation agent finished with
    #[arg(long, default_value_t = 0)]
    pub exit_code: i32,
    /// Project root directory (defaults to the current directory)
    #[arg(long)]
    pub project_root: Option<PathBuf>,
}

impl VerifyArgs {
    pub fn execute(&self) -> anyhow::Result<()> {
        let root = resolve_root(self.project_root.as_deref())?;

        // A failed agent run means there is nothing to verify. Bail before
        // touching config or the tracker.
        if self.exit_code != 0 {
            println!(
                "agent exited {}; verification skipped for {}",
                self.exit_code,
                self.items.join(", ")
            );
            return Ok(());
        }

        let settings = FileSettings::new(&root);
        let cfg = settings.load()?;
        let tracker = BeadsCli::new(&cfg.project.tracker);
        let sessions = DetachedSessions::new(cfg.verification.session_launcher.clone());

        let orchestrator = VerifyOrchestrator::new(
            Arc::new(tracker),
            Arc::new(settings),
            Arc::new(sessions),
            Arc::new(AgentVerifier),
        );

        // Workflows settle before exit; an interrupt would strand beats in
        // active verification, so surface it loudly and bail.
        let _ = ctrlc::set_handler(|| {
            eprintln!("interrupted; in-flight verifications may need manual label cleanup");
            std::process::exit(130);
        });

        orchestrator.on_agent_complete(&self.items, self.action, &root, self.exit_code)?;

        for event in orchestrator.events() {
            println!(
                "[{}] {:<14} {} {}",
                event.timestamp.format("%H:%M:%S"),
                event.kind,
                event.beat_id,
                event.detail
            );
        }
        Ok(())
    }
}
