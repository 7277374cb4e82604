//! Session-manager port and interaction logging.
//!
//! The session manager relaunches an implementation agent after a failed
//! verification. The interaction log persists the verifier prompt and
//! every response line for later inspection; it degrades to a no-op when
//! the log file can't be created, so logging can never block a workflow.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::Context;

/// Relaunches implementation sessions for failed beats.
pub trait SessionManager: Send + Sync {
    /// Launch a fresh single-item implementation session.
    fn create_session(&self, item_id: &str, repo: &Path) -> anyhow::Result<()>;

    /// Launch a fresh batch implementation session.
    fn create_scene_session(&self, item_ids: &[String], repo: &Path) -> anyhow::Result<()>;
}

/// Production session manager: spawns the configured launcher command
/// detached and does not wait for it.
#[derive(Debug, Clone)]
pub struct DetachedSessions {
    launcher: Vec<String>,
}

impl DetachedSessions {
    /// `launcher` is the program plus fixed leading args, e.g.
    /// `["botty", "spawn", "worker"]`.
    pub fn new(launcher: Vec<String>) -> Self {
        Self { launcher }
    }

    fn spawn(&self, extra: &[&str], repo: &Path) -> anyhow::Result<()> {
        let (program, base) = self
            .launcher
            .split_first()
            .context("empty session launcher command")?;
        let mut cmd = Command::new(program);
        cmd.args(base)
            .args(extra)
            .current_dir(repo)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd.spawn()
            .with_context(|| format!("spawning session launcher {program}"))?;
        Ok(())
    }
}

impl SessionManager for DetachedSessions {
    fn create_session(&self, item_id: &str, repo: &Path) -> anyhow::Result<()> {
        self.spawn(&["--beat", item_id], repo)
    }

    fn create_scene_session(&self, item_ids: &[String], repo: &Path) -> anyhow::Result<()> {
        let joined = item_ids.join(",");
        self.spawn(&["--scene", &joined], repo)
    }
}

/// XDG-compliant cache directory for interaction logs.
fn interaction_log_dir() -> anyhow::Result<PathBuf> {
    let base = if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
        PathBuf::from(xdg)
    } else {
        dirs::home_dir()
            .context("could not determine home directory")?
            .join(".cache")
    };
    Ok(base.join("beatline").join("interactions"))
}

/// File-backed log of one verifier interaction. Construct via `start`;
/// any I/O failure yields a no-op logger instead of an error.
#[derive(Debug)]
pub struct InteractionLog {
    file: Option<File>,
}

impl InteractionLog {
    pub fn start(beat_id: &str) -> Self {
        match Self::try_start(beat_id) {
            Ok(log) => log,
            Err(e) => {
                tracing::warn!(beat_id, error = %format!("{e:#}"), "interaction log unavailable, continuing without");
                Self { file: None }
            }
        }
    }

    /// No-op logger for tests and degraded mode.
    pub fn noop() -> Self {
        Self { file: None }
    }

    fn try_start(beat_id: &str) -> anyhow::Result<Self> {
        let dir = interaction_log_dir()?;
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
        let safe_id: String = beat_id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect();
        let path = dir.join(format!("{safe_id}-{stamp}.log"));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening {}", path.display()))?;
        Ok(Self { file: Some(file) })
    }

    fn write(&mut self, tag: &str, text: &str) {
        if let Some(ref mut file) = self.file {
            let stamp = chrono::Utc::now().to_rfc3339();
            // log failures are swallowed: diagnostics never break the workflow
            let _ = writeln!(file, "[{stamp}] {tag} {text}");
        }
    }

    pub fn log_prompt(&mut self, prompt: &str) {
        self.write("PROMPT", prompt);
    }

    pub fn log_response(&mut self, line: &str) {
        self.write("RESPONSE", line);
    }

    pub fn log_end(&mut self, outcome: &str) {
        self.write("END", outcome);
    }
}

/// Run a best-effort side effect: failures are logged and swallowed.
/// Call sites use this where the return value is intentionally ignored
/// for control flow (notes appends, relaunches, diagnostics).
pub fn best_effort(what: &str, f: impl FnOnce() -> anyhow::Result<()>) {
    if let Err(e) = f() {
        tracing::warn!(what, error = %format!("{e:#}"), "best-effort operation failed");
    }
}
