//! Stateful verification orchestrator.
//!
//! Triggered when an implementation agent finishes. For each completed
//! beat it enters verification, launches a verifier agent against the
//! recorded commit, and settles the outcome: close on pass, park in the
//! retry stage (and optionally relaunch an implementation session) on
//! fail. Workflows run one thread per beat and are settled all together
//! before the trigger call returns. Failures inside a workflow never
//! escape: the top-level catch forces the item into the retry stage so
//! it cannot wedge in active verification.

use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::agent::{build_prompt_mode_args, normalize_line, resolve_dialect, AgentEvent, AgentSpec, LineBuffer};
use crate::config::{Config, SettingsSource};
use crate::error::ExitError;
use crate::session::{best_effort, InteractionLog, SessionManager};
use crate::tracker::{TrackerPort, UpdateFields};
use crate::verify::labels::{
    attempt_number, compute_entry_labels, compute_pass_labels, compute_retry_labels,
    extract_commit_label,
};
use crate::verify::locks::{EventLog, VerificationEvent, VerificationLocks};
use crate::verify::prompt::{
    build_verifier_prompt, parse_rejection_summary, parse_verifier_result,
};

/// How long to wait before re-checking for a missing commit label. The
/// implementing agent records the label right after its final commit, so
/// one short recheck covers the usual race.
const COMMIT_RECHECK_DELAY: Duration = Duration::from_secs(3);

/// Cap on the verifier-output excerpt appended to an item's notes.
const NOTE_EXCERPT_CAP: usize = 2000;

/// What kind of agent action just completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ActionKind {
    /// Single-beat implementation.
    Take,
    /// Batch implementation over several beats.
    Scene,
    /// Planning session; produces no commits to verify.
    Plan,
    /// Decomposition session; produces no commits to verify.
    Decompose,
}

impl ActionKind {
    /// Only implementation actions produce verifiable commits.
    pub fn triggers_verification(self) -> bool {
        matches!(self, ActionKind::Take | ActionKind::Scene)
    }
}

/// Outcome of one verifier subprocess run.
#[derive(Debug, Clone)]
pub struct VerifierRun {
    pub exit_code: i32,
    /// Normalized assistant-visible output, scanned for the result marker.
    pub transcript: String,
}

/// Runs the verifier agent. Seam for tests; production uses
/// [`AgentVerifier`].
pub trait VerifierRunner: Send + Sync {
    fn run(
        &self,
        agent: &AgentSpec,
        timeout: Duration,
        prompt: &str,
        beat_id: &str,
        repo: &Path,
    ) -> anyhow::Result<VerifierRun>;
}

/// Production verifier runner: spawns the agent CLI in prompt mode,
/// streams its NDJSON output through the dialect adapter, and records the
/// whole interaction to the cache log.
#[derive(Debug, Default)]
pub struct AgentVerifier;

impl VerifierRunner for AgentVerifier {
    fn run(
        &self,
        agent: &AgentSpec,
        timeout: Duration,
        prompt: &str,
        beat_id: &str,
        repo: &Path,
    ) -> anyhow::Result<VerifierRun> {
        let dialect = resolve_dialect(&agent.command);
        let (program, args) = build_prompt_mode_args(agent, prompt);
        let mut log = InteractionLog::start(beat_id);
        log.log_prompt(prompt);

        let mut child = Command::new(&program)
            .args(&args)
            .current_dir(repo)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    anyhow::Error::from(ExitError::ToolNotFound {
                        tool: program.clone(),
                    })
                } else {
                    anyhow::Error::new(e).context(format!("spawning {program}"))
                }
            })?;

        let stdout = child.stdout.take().context("verifier stdout unavailable")?;
        let stderr = child.stderr.take().context("verifier stderr unavailable")?;

        // Stream stdout as it arrives: raw lines to the interaction log,
        // normalized text into the transcript the result scan runs over.
        // `resolved` flips once a terminal event reports a verdict.
        let resolved = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let resolved_writer = resolved.clone();
        let out_thread = std::thread::spawn(move || -> (InteractionLog, String) {
            let mut reader = std::io::BufReader::new(stdout);
            let mut buf = LineBuffer::new();
            let mut transcript = String::new();
            let mut chunk = [0u8; 8192];
            loop {
                let n = match std::io::Read::read(&mut reader, &mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                let text = String::from_utf8_lossy(&chunk[..n]);
                for line in buf.push(&text) {
                    log.log_response(&line);
                    if append_transcript_line(dialect, &line, &mut transcript) {
                        resolved_writer.store(true, std::sync::atomic::Ordering::Release);
                    }
                }
            }
            if let Some(line) = buf.finish() {
                log.log_response(&line);
                append_transcript_line(dialect, &line, &mut transcript);
            }
            (log, transcript)
        });
        let err_thread = std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = std::io::Read::read_to_string(&mut std::io::BufReader::new(stderr), &mut buf);
            buf
        });

        let start = std::time::Instant::now();
        let mut timed_out = false;
        let exit_code = loop {
            // A reported verdict decides the run; don't wait out an agent
            // that lingers after its terminal event.
            if resolved.load(std::sync::atomic::Ordering::Acquire) {
                let _ = child.kill();
                let _ = child.wait();
                break 0;
            }
            match child.try_wait() {
                Ok(Some(status)) => break status.code().unwrap_or(-1),
                Ok(None) => {
                    if start.elapsed() >= timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        timed_out = true;
                        break -1;
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(e) => {
                    let _ = child.kill();
                    return Err(anyhow::Error::new(e).context(format!("waiting for {program}")));
                }
            }
        };

        let (mut log, transcript) = match out_thread.join() {
            Ok(pair) => pair,
            Err(_) => (InteractionLog::noop(), String::new()),
        };
        let stderr_text = err_thread.join().unwrap_or_default();

        if timed_out {
            log.log_end("timeout");
            return Err(ExitError::Timeout {
                tool: program,
                timeout_secs: timeout.as_secs(),
            }
            .into());
        }
        log.log_end(&format!("exit {exit_code}"));
        tracing::debug!(beat_id, exit_code, stderr = %stderr_text.trim(), "verifier finished");
        Ok(VerifierRun {
            exit_code,
            transcript,
        })
    }
}

/// Append one stream line to the transcript. Returns true when the line
/// was a terminal event carrying a parseable result marker, meaning the
/// run is decided even if the process lingers.
fn append_transcript_line(
    dialect: crate::agent::Dialect,
    line: &str,
    transcript: &mut String,
) -> bool {
    let (text, terminal) = match serde_json::from_str::<serde_json::Value>(line) {
        Ok(value) => match normalize_line(dialect, &value) {
            Some(AgentEvent::Result(t)) => (Some(t), true),
            Some(AgentEvent::Text(t)) => (Some(t), false),
            Some(AgentEvent::ToolUse(_)) | None => (None, false),
        },
        // plain-text agents emit no JSON; keep the raw line
        Err(_) => (Some(line.to_string()), false),
    };
    let Some(text) = text else {
        return false;
    };
    let decided = terminal && parse_verifier_result(&text).is_some();
    if !text.is_empty() {
        transcript.push_str(&text);
        transcript.push('\n');
    }
    decided
}

/// Drives verification workflows after an implementation agent completes.
pub struct VerifyOrchestrator {
    tracker: Arc<dyn TrackerPort>,
    settings: Arc<dyn SettingsSource>,
    sessions: Arc<dyn SessionManager>,
    runner: Arc<dyn VerifierRunner>,
    locks: VerificationLocks,
    events: EventLog,
    recheck_delay: Duration,
}

impl VerifyOrchestrator {
    pub fn new(
        tracker: Arc<dyn TrackerPort>,
        settings: Arc<dyn SettingsSource>,
        sessions: Arc<dyn SessionManager>,
        runner: Arc<dyn VerifierRunner>,
    ) -> Self {
        Self {
            tracker,
            settings,
            sessions,
            runner,
            locks: VerificationLocks::default(),
            events: EventLog::default(),
            recheck_delay: COMMIT_RECHECK_DELAY,
        }
    }

    /// Shrink the commit-label recheck delay (tests).
    pub fn with_recheck_delay(mut self, delay: Duration) -> Self {
        self.recheck_delay = delay;
        self
    }

    /// Diagnostic events recorded so far, oldest first.
    pub fn events(&self) -> Vec<VerificationEvent> {
        self.events.snapshot()
    }

    /// Entry point: an agent action over `item_ids` just finished with
    /// `agent_exit_code`. Spawns one workflow per item and settles them
    /// all before returning. A non-zero agent exit means the work never
    /// completed, so nothing is touched, not even the tracker.
    pub fn on_agent_complete(
        &self,
        item_ids: &[String],
        action: ActionKind,
        repo: &Path,
        agent_exit_code: i32,
    ) -> anyhow::Result<()> {
        if agent_exit_code != 0 {
            for id in item_ids {
                self.events.record(
                    "skipped",
                    id,
                    format!("agent exited {agent_exit_code}, verification not started"),
                );
            }
            return Ok(());
        }
        if !action.triggers_verification() {
            return Ok(());
        }

        // Settings are re-read on every trigger; the dashboard can flip
        // them between runs.
        let cfg = self.settings.load()?;
        if !cfg.verification.enabled {
            for id in item_ids {
                self.events
                    .record("disabled", id, "auto-verification is disabled");
            }
            return Ok(());
        }

        let cfg = &cfg;
        std::thread::scope(|s| {
            for id in item_ids {
                s.spawn(move || self.run_workflow(id, item_ids, action, repo, cfg));
            }
        });
        Ok(())
    }

    fn run_workflow(
        &self,
        id: &str,
        batch: &[String],
        action: ActionKind,
        repo: &Path,
        cfg: &Config,
    ) {
        if !self.locks.acquire(id) {
            self.events
                .record("duplicate", id, "verification already in progress");
            return;
        }
        if let Err(e) = self.verify_one(id, batch, action, repo, cfg) {
            self.events.record("error", id, format!("{e:#}"));
            // An unexpected failure must not leave the item stuck in
            // active verification; park it in the retry stage.
            best_effort("forcing retry labels after workflow error", || {
                let item = self.tracker.get(id, repo)?;
                let delta = compute_retry_labels(&item.labels);
                self.tracker.update(
                    id,
                    &UpdateFields {
                        add_labels: delta.add,
                        remove_labels: delta.remove,
                        ..Default::default()
                    },
                    repo,
                )?;
                Ok(())
            });
        }
        self.locks.release(id);
    }

    fn verify_one(
        &self,
        id: &str,
        batch: &[String],
        action: ActionKind,
        repo: &Path,
        cfg: &Config,
    ) -> anyhow::Result<()> {
        let item = self.tracker.get(id, repo)?;
        let entry = compute_entry_labels(&item.labels);
        self.tracker.update(
            id,
            &UpdateFields {
                add_labels: entry.add.clone(),
                remove_labels: entry.remove.clone(),
                status: Some("in_progress".to_string()),
                notes: None,
            },
            repo,
        )?;
        self.events.record("enter", id, "entered verification");

        let labels = entry.apply(&item.labels);
        let commit = match extract_commit_label(&labels) {
            Some(sha) => sha,
            None => {
                // The implementing agent records commit:<sha> right after
                // committing; give it one short grace window.
                std::thread::sleep(self.recheck_delay);
                let fresh = self.tracker.get(id, repo)?;
                match extract_commit_label(&fresh.labels) {
                    Some(sha) => sha,
                    None => {
                        self.events.record(
                            "no-commit",
                            id,
                            "no commit label after recheck, cannot verify",
                        );
                        let delta = compute_retry_labels(&fresh.labels);
                        self.tracker.update(
                            id,
                            &UpdateFields {
                                add_labels: delta.add,
                                remove_labels: delta.remove,
                                ..Default::default()
                            },
                            repo,
                        )?;
                        return Ok(());
                    }
                }
            }
        };

        let fresh = self.tracker.get(id, repo)?;
        let prompt = build_verifier_prompt(
            &fresh,
            &commit,
            &self.tracker.pass_label_command(id),
            &self.tracker.retry_label_command(id),
        );
        let agent = cfg.verifier_agent();
        let timeout = Duration::from_secs(cfg.verification.timeout);
        let run = self.runner.run(&agent, timeout, &prompt, id, repo)?;

        match parse_verifier_result(&run.transcript) {
            Some(verdict) if verdict.is_pass() => self.settle_pass(id, repo),
            Some(verdict) => {
                let summary = parse_rejection_summary(&run.transcript);
                self.settle_failure(
                    id,
                    batch,
                    action,
                    repo,
                    cfg,
                    verdict.as_str(),
                    summary,
                    &run.transcript,
                )
            }
            None if run.exit_code == 0 => {
                // Clean exit with no marker: the verifier ran the pass
                // command itself and skipped the report line.
                self.events
                    .record("implicit-pass", id, "clean exit without a result marker");
                self.settle_pass(id, repo)
            }
            None => anyhow::bail!(
                "verifier exited {} without reporting a result",
                run.exit_code
            ),
        }
    }

    fn settle_pass(&self, id: &str, repo: &Path) -> anyhow::Result<()> {
        let item = self.tracker.get(id, repo)?;
        let delta = compute_pass_labels(&item.labels);
        if !delta.is_noop() {
            self.tracker.update(
                id,
                &UpdateFields {
                    add_labels: delta.add,
                    remove_labels: delta.remove,
                    ..Default::default()
                },
                repo,
            )?;
        }
        self.tracker.close(id, "auto-verification passed", repo)?;
        self.events.record("closed", id, "verification passed");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn settle_failure(
        &self,
        id: &str,
        batch: &[String],
        action: ActionKind,
        repo: &Path,
        cfg: &Config,
        verdict: &str,
        summary: Option<String>,
        transcript: &str,
    ) -> anyhow::Result<()> {
        let item = self.tracker.get(id, repo)?;
        let attempt = attempt_number(&item.labels) + 1;

        // Notes are diagnostics; an append failure must not derail the
        // retry transition.
        best_effort("appending verification notes", || {
            // Keep the raw output even when the verifier skipped the
            // REJECTION_SUMMARY line; it is the only trail left behind.
            let mut excerpt = transcript.trim().to_string();
            if excerpt.is_empty() {
                excerpt = "(no output)".to_string();
            } else if excerpt.chars().count() > NOTE_EXCERPT_CAP {
                excerpt = excerpt.chars().take(NOTE_EXCERPT_CAP).collect();
                excerpt.push_str("...(truncated)");
            }
            let mut note = String::new();
            if let Some(ref summary) = summary {
                note.push_str(summary);
                note.push_str("\n\n");
            }
            note.push_str("Verifier output:\n");
            note.push_str(&excerpt);
            let stamp = chrono::Utc::now().to_rfc3339();
            let appended = format!(
                "{}\n\n---\n**Verification attempt {attempt} failed ({verdict}) at {stamp}**\n\n{note}",
                item.notes.trim_end()
            );
            self.tracker.update(
                id,
                &UpdateFields {
                    notes: Some(appended),
                    ..Default::default()
                },
                repo,
            )?;
            Ok(())
        });

        let delta = compute_retry_labels(&item.labels);
        self.tracker.update(
            id,
            &UpdateFields {
                add_labels: delta.add,
                remove_labels: delta.remove,
                ..Default::default()
            },
            repo,
        )?;
        self.events.record(
            "retry",
            id,
            format!("attempt {attempt} failed ({verdict})"),
        );

        let budget = cfg.verification.max_retries;
        if budget > 0 && attempt <= budget as u32 {
            best_effort("relaunching implementation session", || {
                if action == ActionKind::Scene && batch.len() > 1 {
                    self.sessions.create_scene_session(batch, repo)
                } else {
                    self.sessions.create_session(id, repo)
                }
            });
            self.events
                .record("relaunch", id, format!("attempt {attempt} relaunched"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::config::{ProjectConfig, VerificationConfig};
    use crate::plan::{ItemKind, ItemStatus, WorkItem};
    use crate::tracker::{DependencyRecord, TrackerError, TrackerErrorKind, TrackerResult};

    fn item(id: &str, labels: &[&str]) -> WorkItem {
        WorkItem {
            id: id.to_string(),
            title: format!("title for {id}"),
            kind: ItemKind::Task,
            status: ItemStatus::Open,
            priority: 2,
            labels: labels.iter().map(|s| (*s).to_string()).collect(),
            parent: None,
            blocked_by: Vec::new(),
            description: "desc".to_string(),
            acceptance_criteria: "works".to_string(),
            notes: String::new(),
        }
    }

    #[derive(Default)]
    struct MockTracker {
        items: Mutex<HashMap<String, WorkItem>>,
        calls: Mutex<Vec<String>>,
    }

    impl MockTracker {
        fn with_items(items: Vec<WorkItem>) -> Self {
            let map = items.into_iter().map(|i| (i.id.clone(), i)).collect();
            Self {
                items: Mutex::new(map),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn labels_of(&self, id: &str) -> Vec<String> {
            self.items.lock().unwrap()[id].labels.clone()
        }

        fn status_of(&self, id: &str) -> ItemStatus {
            self.items.lock().unwrap()[id].status
        }

        fn notes_of(&self, id: &str) -> String {
            self.items.lock().unwrap()[id].notes.clone()
        }
    }

    impl TrackerPort for MockTracker {
        fn get(&self, id: &str, _repo: &Path) -> TrackerResult<WorkItem> {
            self.record(format!("get {id}"));
            self.items
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or_else(|| TrackerError::new(TrackerErrorKind::NotFound, id))
        }

        fn update(&self, id: &str, fields: &UpdateFields, _repo: &Path) -> TrackerResult<()> {
            self.record(format!("update {id}"));
            let mut items = self.items.lock().unwrap();
            let item = items
                .get_mut(id)
                .ok_or_else(|| TrackerError::new(TrackerErrorKind::NotFound, id))?;
            item.labels.retain(|l| !fields.remove_labels.contains(l));
            for label in &fields.add_labels {
                if !item.labels.contains(label) {
                    item.labels.push(label.clone());
                }
            }
            if let Some(ref status) = fields.status {
                item.status = ItemStatus::from_tracker(status);
            }
            if let Some(ref notes) = fields.notes {
                item.notes = notes.clone();
            }
            Ok(())
        }

        fn close(&self, id: &str, _reason: &str, _repo: &Path) -> TrackerResult<()> {
            self.record(format!("close {id}"));
            let mut items = self.items.lock().unwrap();
            let item = items
                .get_mut(id)
                .ok_or_else(|| TrackerError::new(TrackerErrorKind::NotFound, id))?;
            item.status = ItemStatus::Closed;
            Ok(())
        }

        fn list(&self, _repo: &Path) -> TrackerResult<Vec<WorkItem>> {
            Ok(self.items.lock().unwrap().values().cloned().collect())
        }

        fn list_dependencies(
            &self,
            _id: &str,
            _repo: &Path,
        ) -> TrackerResult<Vec<DependencyRecord>> {
            Ok(Vec::new())
        }

        fn pass_label_command(&self, id: &str) -> String {
            format!("mock pass {id}")
        }

        fn retry_label_command(&self, id: &str) -> String {
            format!("mock retry {id}")
        }
    }

    struct FixedSettings(Config);

    impl SettingsSource for FixedSettings {
        fn load(&self) -> anyhow::Result<Config> {
            Ok(self.0.clone())
        }
    }

    fn config(enabled: bool, max_retries: i32) -> Config {
        Config {
            version: "1".to_string(),
            project: ProjectConfig {
                name: "test".to_string(),
                tracker: "bd".to_string(),
            },
            verification: VerificationConfig {
                enabled,
                max_retries,
                timeout: 60,
                ..Default::default()
            },
            models: Default::default(),
        }
    }

    #[derive(Default)]
    struct ScriptedRunner {
        runs: Mutex<Vec<VerifierRun>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        fn with_transcript(exit_code: i32, transcript: &str) -> Self {
            Self {
                runs: Mutex::new(vec![VerifierRun {
                    exit_code,
                    transcript: transcript.to_string(),
                }]),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn run_count(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    impl VerifierRunner for ScriptedRunner {
        fn run(
            &self,
            _agent: &AgentSpec,
            _timeout: Duration,
            prompt: &str,
            _beat_id: &str,
            _repo: &Path,
        ) -> anyhow::Result<VerifierRun> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let mut runs = self.runs.lock().unwrap();
            if runs.is_empty() {
                anyhow::bail!("no scripted run left");
            }
            Ok(runs.remove(0))
        }
    }

    #[derive(Default)]
    struct RecordingSessions {
        launched: Mutex<Vec<String>>,
    }

    impl SessionManager for RecordingSessions {
        fn create_session(&self, item_id: &str, _repo: &Path) -> anyhow::Result<()> {
            self.launched.lock().unwrap().push(format!("beat {item_id}"));
            Ok(())
        }

        fn create_scene_session(&self, item_ids: &[String], _repo: &Path) -> anyhow::Result<()> {
            self.launched
                .lock()
                .unwrap()
                .push(format!("scene {}", item_ids.join(",")));
            Ok(())
        }
    }

    struct Fixture {
        tracker: Arc<MockTracker>,
        runner: Arc<ScriptedRunner>,
        sessions: Arc<RecordingSessions>,
        orch: VerifyOrchestrator,
    }

    fn fixture(items: Vec<WorkItem>, cfg: Config, runner: ScriptedRunner) -> Fixture {
        let tracker = Arc::new(MockTracker::with_items(items));
        let runner = Arc::new(runner);
        let sessions = Arc::new(RecordingSessions::default());
        let orch = VerifyOrchestrator::new(
            tracker.clone(),
            Arc::new(FixedSettings(cfg)),
            sessions.clone(),
            runner.clone(),
        )
        .with_recheck_delay(Duration::from_millis(1));
        Fixture {
            tracker,
            runner,
            sessions,
            orch,
        }
    }

    fn ids(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn nonzero_agent_exit_touches_nothing() {
        let f = fixture(
            vec![item("bd-a", &["commit:abc"])],
            config(true, 2),
            ScriptedRunner::default(),
        );
        f.orch
            .on_agent_complete(&ids(&["bd-a"]), ActionKind::Take, Path::new("/r"), 1)
            .unwrap();
        assert_eq!(f.tracker.call_count(), 0);
        assert_eq!(f.runner.run_count(), 0);
        assert_eq!(f.orch.events()[0].kind, "skipped");
    }

    #[test]
    fn non_implementation_actions_are_ignored() {
        let f = fixture(
            vec![item("bd-a", &["commit:abc"])],
            config(true, 2),
            ScriptedRunner::default(),
        );
        f.orch
            .on_agent_complete(&ids(&["bd-a"]), ActionKind::Plan, Path::new("/r"), 0)
            .unwrap();
        assert_eq!(f.tracker.call_count(), 0);
    }

    #[test]
    fn disabled_verification_skips_tracker() {
        let f = fixture(
            vec![item("bd-a", &["commit:abc"])],
            config(false, 2),
            ScriptedRunner::default(),
        );
        f.orch
            .on_agent_complete(&ids(&["bd-a"]), ActionKind::Take, Path::new("/r"), 0)
            .unwrap();
        assert_eq!(f.tracker.call_count(), 0);
        assert_eq!(f.orch.events()[0].kind, "disabled");
    }

    #[test]
    fn pass_closes_and_clears_labels() {
        let f = fixture(
            vec![item("bd-a", &["commit:abc"])],
            config(true, 2),
            ScriptedRunner::with_transcript(0, "looks good\nVERIFICATION_RESULT:pass\n"),
        );
        f.orch
            .on_agent_complete(&ids(&["bd-a"]), ActionKind::Take, Path::new("/r"), 0)
            .unwrap();

        assert_eq!(f.tracker.status_of("bd-a"), ItemStatus::Closed);
        let labels = f.tracker.labels_of("bd-a");
        assert!(!labels.iter().any(|l| l.starts_with("transition:")));
        assert!(!labels.iter().any(|l| l.starts_with("stage:")));
        let kinds: Vec<String> = f.orch.events().iter().map(|e| e.kind.clone()).collect();
        assert!(kinds.contains(&"closed".to_string()));
    }

    #[test]
    fn prompt_embeds_commit_and_tracker_commands() {
        let f = fixture(
            vec![item("bd-a", &["commit:abc123"])],
            config(true, 2),
            ScriptedRunner::with_transcript(0, "VERIFICATION_RESULT:pass"),
        );
        f.orch
            .on_agent_complete(&ids(&["bd-a"]), ActionKind::Take, Path::new("/r"), 0)
            .unwrap();
        let prompts = f.runner.prompts.lock().unwrap();
        assert!(prompts[0].contains("abc123"));
        assert!(prompts[0].contains("mock pass bd-a"));
        assert!(prompts[0].contains("mock retry bd-a"));
    }

    #[test]
    fn failure_parks_in_retry_and_relaunches() {
        let f = fixture(
            vec![item("bd-a", &["commit:abc"])],
            config(true, 2),
            ScriptedRunner::with_transcript(
                0,
                "REJECTION_SUMMARY: edge case unhandled\nVERIFICATION_RESULT:fail-requirements\n",
            ),
        );
        f.orch
            .on_agent_complete(&ids(&["bd-a"]), ActionKind::Take, Path::new("/r"), 0)
            .unwrap();

        let labels = f.tracker.labels_of("bd-a");
        assert!(labels.contains(&"stage:retry".to_string()));
        assert!(labels.contains(&"attempt:1".to_string()));
        assert!(!labels.iter().any(|l| l.starts_with("commit:")));
        assert!(!labels.contains(&"transition:verification".to_string()));

        let notes = f.tracker.notes_of("bd-a");
        assert!(notes.contains("attempt 1 failed (fail-requirements)"));
        assert!(notes.contains("edge case unhandled"));

        let launched = f.sessions.launched.lock().unwrap();
        assert_eq!(launched.as_slice(), ["beat bd-a"]);
    }

    #[test]
    fn notes_keep_verifier_output_without_summary() {
        // verifier skipped the REJECTION_SUMMARY line; the raw output is
        // the only diagnostic trail and must land in the notes
        let f = fixture(
            vec![item("bd-a", &["commit:abc"])],
            config(true, 2),
            ScriptedRunner::with_transcript(
                0,
                "checked the diff\nfound a nil deref in the handler\nVERIFICATION_RESULT:fail-bugs\n",
            ),
        );
        f.orch
            .on_agent_complete(&ids(&["bd-a"]), ActionKind::Take, Path::new("/r"), 0)
            .unwrap();

        let notes = f.tracker.notes_of("bd-a");
        assert!(notes.contains("attempt 1 failed (fail-bugs)"));
        assert!(notes.contains("found a nil deref in the handler"));
    }

    #[test]
    fn notes_truncate_long_verifier_output() {
        let mut transcript = "x".repeat(5000);
        transcript.push_str("\nVERIFICATION_RESULT:fail-requirements");
        let f = fixture(
            vec![item("bd-a", &["commit:abc"])],
            config(true, 2),
            ScriptedRunner::with_transcript(0, &transcript),
        );
        f.orch
            .on_agent_complete(&ids(&["bd-a"]), ActionKind::Take, Path::new("/r"), 0)
            .unwrap();

        let notes = f.tracker.notes_of("bd-a");
        assert!(notes.contains("...(truncated)"));
        assert!(!notes.contains(&"x".repeat(2001)));
    }

    #[test]
    fn exhausted_retry_budget_stops_relaunching() {
        let f = fixture(
            vec![item("bd-a", &["commit:abc", "attempt:2"])],
            config(true, 2),
            ScriptedRunner::with_transcript(0, "VERIFICATION_RESULT:fail-bugs"),
        );
        f.orch
            .on_agent_complete(&ids(&["bd-a"]), ActionKind::Take, Path::new("/r"), 0)
            .unwrap();

        // attempt 3 exceeds the budget of 2
        assert!(f.tracker.labels_of("bd-a").contains(&"attempt:3".to_string()));
        assert!(f.sessions.launched.lock().unwrap().is_empty());
    }

    #[test]
    fn zero_budget_never_relaunches() {
        let f = fixture(
            vec![item("bd-a", &["commit:abc"])],
            config(true, 0),
            ScriptedRunner::with_transcript(0, "VERIFICATION_RESULT:fail-bugs"),
        );
        f.orch
            .on_agent_complete(&ids(&["bd-a"]), ActionKind::Take, Path::new("/r"), 0)
            .unwrap();
        assert!(f.sessions.launched.lock().unwrap().is_empty());
    }

    #[test]
    fn scene_failure_relaunches_whole_batch() {
        let f = fixture(
            vec![item("bd-a", &["commit:abc"]), item("bd-b", &["commit:def"])],
            config(true, 2),
            ScriptedRunner {
                runs: Mutex::new(vec![
                    VerifierRun {
                        exit_code: 0,
                        transcript: "VERIFICATION_RESULT:fail-requirements".to_string(),
                    },
                    VerifierRun {
                        exit_code: 0,
                        transcript: "VERIFICATION_RESULT:pass".to_string(),
                    },
                ]),
                prompts: Mutex::new(Vec::new()),
            },
        );
        f.orch
            .on_agent_complete(&ids(&["bd-a", "bd-b"]), ActionKind::Scene, Path::new("/r"), 0)
            .unwrap();
        let launched = f.sessions.launched.lock().unwrap();
        // one of the two workflows failed; it relaunches the batch
        assert_eq!(launched.len(), 1);
        assert!(launched[0].starts_with("scene "));
        assert!(launched[0].contains("bd-a"));
        assert!(launched[0].contains("bd-b"));
    }

    #[test]
    fn duplicate_workflow_is_refused() {
        let f = fixture(
            vec![item("bd-a", &["commit:abc"])],
            config(true, 2),
            ScriptedRunner::default(),
        );
        assert!(f.orch.locks.acquire("bd-a"));
        f.orch
            .on_agent_complete(&ids(&["bd-a"]), ActionKind::Take, Path::new("/r"), 0)
            .unwrap();
        assert_eq!(f.tracker.call_count(), 0);
        let kinds: Vec<String> = f.orch.events().iter().map(|e| e.kind.clone()).collect();
        assert!(kinds.contains(&"duplicate".to_string()));
    }

    #[test]
    fn lock_released_after_workflow() {
        let f = fixture(
            vec![item("bd-a", &["commit:abc"])],
            config(true, 2),
            ScriptedRunner::with_transcript(0, "VERIFICATION_RESULT:pass"),
        );
        f.orch
            .on_agent_complete(&ids(&["bd-a"]), ActionKind::Take, Path::new("/r"), 0)
            .unwrap();
        assert!(f.orch.locks.acquire("bd-a"));
    }

    #[test]
    fn missing_commit_label_parks_without_running_verifier() {
        let f = fixture(
            vec![item("bd-a", &[])],
            config(true, 2),
            ScriptedRunner::default(),
        );
        f.orch
            .on_agent_complete(&ids(&["bd-a"]), ActionKind::Take, Path::new("/r"), 0)
            .unwrap();

        assert_eq!(f.runner.run_count(), 0);
        let labels = f.tracker.labels_of("bd-a");
        assert!(labels.contains(&"stage:retry".to_string()));
        let kinds: Vec<String> = f.orch.events().iter().map(|e| e.kind.clone()).collect();
        assert!(kinds.contains(&"no-commit".to_string()));
    }

    #[test]
    fn commit_label_appearing_on_recheck_proceeds() {
        let f = fixture(
            vec![item("bd-a", &[])],
            config(true, 2),
            ScriptedRunner::with_transcript(0, "VERIFICATION_RESULT:pass"),
        );
        // label shows up before the recheck, as if the agent just wrote it
        f.tracker
            .update(
                "bd-a",
                &UpdateFields {
                    add_labels: vec!["commit:late".to_string()],
                    ..Default::default()
                },
                Path::new("/r"),
            )
            .unwrap();
        f.orch
            .on_agent_complete(&ids(&["bd-a"]), ActionKind::Take, Path::new("/r"), 0)
            .unwrap();
        assert_eq!(f.tracker.status_of("bd-a"), ItemStatus::Closed);
    }

    #[test]
    fn silent_clean_exit_counts_as_pass() {
        let f = fixture(
            vec![item("bd-a", &["commit:abc"])],
            config(true, 2),
            ScriptedRunner::with_transcript(0, "did some checking, all fine"),
        );
        f.orch
            .on_agent_complete(&ids(&["bd-a"]), ActionKind::Take, Path::new("/r"), 0)
            .unwrap();
        assert_eq!(f.tracker.status_of("bd-a"), ItemStatus::Closed);
        let kinds: Vec<String> = f.orch.events().iter().map(|e| e.kind.clone()).collect();
        assert!(kinds.contains(&"implicit-pass".to_string()));
    }

    #[test]
    fn silent_failing_exit_forces_retry_labels() {
        let f = fixture(
            vec![item("bd-a", &["commit:abc"])],
            config(true, 2),
            ScriptedRunner::with_transcript(7, "crashed halfway"),
        );
        f.orch
            .on_agent_complete(&ids(&["bd-a"]), ActionKind::Take, Path::new("/r"), 0)
            .unwrap();

        let labels = f.tracker.labels_of("bd-a");
        assert!(labels.contains(&"stage:retry".to_string()));
        assert!(!labels.contains(&"transition:verification".to_string()));
        let kinds: Vec<String> = f.orch.events().iter().map(|e| e.kind.clone()).collect();
        assert!(kinds.contains(&"error".to_string()));
    }

    #[test]
    fn transcript_line_flags_decided_terminal_events() {
        use crate::agent::Dialect;

        let mut transcript = String::new();
        // mid-stream text mentioning the marker does not decide the run
        assert!(!append_transcript_line(
            Dialect::ClaudeCode,
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"will print VERIFICATION_RESULT:pass soon"}]}}"#,
            &mut transcript,
        ));
        // terminal event without a marker does not decide it either
        assert!(!append_transcript_line(
            Dialect::ClaudeCode,
            r#"{"type":"result","result":"done, see above"}"#,
            &mut transcript,
        ));
        // terminal event with a parseable marker does
        assert!(append_transcript_line(
            Dialect::ClaudeCode,
            r#"{"type":"result","result":"VERIFICATION_RESULT:pass"}"#,
            &mut transcript,
        ));
        assert!(transcript.contains("VERIFICATION_RESULT:pass"));
    }

    #[test]
    #[cfg(unix)]
    fn agent_verifier_stops_waiting_once_verdict_reported() {
        use std::os::unix::fs::PermissionsExt;

        // fake agent: reports its verdict, then lingers well past the
        // timeout; the runner must return as soon as the verdict lands
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("claude");
        std::fs::write(
            &script,
            "#!/bin/sh\necho '{\"type\":\"result\",\"result\":\"VERIFICATION_RESULT:pass\"}'\nsleep 30 >/dev/null 2>&1\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let spec = AgentSpec {
            command: script.to_string_lossy().into_owned(),
            model: None,
            label: None,
        };
        let run = AgentVerifier
            .run(
                &spec,
                Duration::from_secs(10),
                "check",
                "bd-a",
                dir.path(),
            )
            .unwrap();
        assert_eq!(run.exit_code, 0);
        assert!(run.transcript.contains("VERIFICATION_RESULT:pass"));
    }

    #[test]
    fn entry_is_idempotent_for_preowned_items() {
        // transition label already present from a crashed run; entry adds
        // nothing but the workflow still proceeds to a verdict
        let f = fixture(
            vec![item(
                "bd-a",
                &["transition:verification", "stage:verification", "commit:abc"],
            )],
            config(true, 2),
            ScriptedRunner::with_transcript(0, "VERIFICATION_RESULT:pass"),
        );
        f.orch
            .on_agent_complete(&ids(&["bd-a"]), ActionKind::Take, Path::new("/r"), 0)
            .unwrap();
        assert_eq!(f.tracker.status_of("bd-a"), ItemStatus::Closed);
    }
}
