use std::path::{Path, PathBuf};

use anyhow::Context;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

use crate::agent::AgentSpec;
use crate::error::ExitError;

/// Config file name constants.
pub const CONFIG_TOML: &str = ".beatline.toml";
pub const CONFIG_JSON: &str = ".beatline.json";

/// Find the config file path, preferring .beatline.toml over .beatline.json.
/// Returns None if neither exists.
pub fn find_config(dir: &Path) -> Option<PathBuf> {
    let toml_path = dir.join(CONFIG_TOML);
    if toml_path.exists() {
        return Some(toml_path);
    }
    let json_path = dir.join(CONFIG_JSON);
    if json_path.exists() {
        return Some(json_path);
    }
    None
}

/// Top-level .beatline.toml config.
///
/// Snake_case fields with camelCase aliases so legacy JSON configs from
/// the dashboard era still load.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    pub project: ProjectConfig,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub models: ModelsConfig,
}

fn default_version() -> String {
    "1".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ProjectConfig {
    pub name: String,
    /// Tracker CLI program name.
    #[serde(default = "default_tracker")]
    pub tracker: String,
}

fn default_tracker() -> String {
    "bd".to_string()
}

/// Auto-verification settings, re-read from disk on every orchestrator
/// invocation (no caching — the dashboard may flip these between runs).
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct VerificationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Verifier agent CLI command.
    #[serde(default = "default_agent")]
    pub agent: String,
    /// Model name or tier (fast | balanced | strong).
    #[serde(default = "default_model")]
    pub model: String,
    /// Auto-relaunch budget per beat; 0 or negative disables relaunch.
    #[serde(default = "default_max_retries", alias = "maxRetries")]
    pub max_retries: i32,
    /// Verifier subprocess cap in seconds.
    #[serde(default = "default_timeout_1800")]
    pub timeout: u64,
    /// Command used to relaunch an implementation session after a failed
    /// verification (program plus fixed leading args).
    #[serde(default = "default_session_launcher", alias = "sessionLauncher")]
    pub session_launcher: Vec<String>,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            agent: default_agent(),
            model: default_model(),
            max_retries: default_max_retries(),
            timeout: default_timeout_1800(),
            session_launcher: default_session_launcher(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_agent() -> String {
    "claude".to_string()
}

fn default_model() -> String {
    "balanced".to_string()
}

fn default_max_retries() -> i32 {
    2
}

fn default_timeout_1800() -> u64 {
    1800
}

fn default_session_launcher() -> Vec<String> {
    vec!["botty".to_string(), "spawn".to_string(), "worker".to_string()]
}

/// Model tier configuration for cross-provider load balancing.
///
/// Each tier maps to a list of model strings. When the verification config
/// names a tier (e.g. "fast"), `resolve_model()` randomly picks one model
/// from that tier's pool.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct ModelsConfig {
    #[serde(default = "default_tier_fast")]
    pub fast: Vec<String>,
    #[serde(default = "default_tier_balanced")]
    pub balanced: Vec<String>,
    #[serde(default = "default_tier_strong")]
    pub strong: Vec<String>,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            fast: default_tier_fast(),
            balanced: default_tier_balanced(),
            strong: default_tier_strong(),
        }
    }
}

fn default_tier_fast() -> Vec<String> {
    vec!["haiku".into()]
}

fn default_tier_balanced() -> Vec<String> {
    vec!["sonnet".into()]
}

fn default_tier_strong() -> Vec<String> {
    vec!["opus".into()]
}

impl Config {
    /// Load config from a TOML or JSON file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config = if path.extension().is_some_and(|e| e == "json")
            || path.file_name().is_some_and(|n| n == CONFIG_JSON)
        {
            serde_json::from_str(&content)
                .map_err(|e| ExitError::Config(format!("{}: {e}", path.display())))?
        } else {
            toml::from_str(&content)
                .map_err(|e| ExitError::Config(format!("{}: {e}", path.display())))?
        };
        Ok(config)
    }

    /// Resolve a model-or-tier name to a concrete model string. Tier names
    /// pick randomly from the pool; anything else passes through.
    pub fn resolve_model(&self, name: &str) -> String {
        let pool = match name {
            "fast" => &self.models.fast,
            "balanced" => &self.models.balanced,
            "strong" => &self.models.strong,
            other => return other.to_string(),
        };
        let mut rng = rand::rng();
        pool.choose(&mut rng)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /// The verifier agent spec for the current settings.
    pub fn verifier_agent(&self) -> AgentSpec {
        AgentSpec {
            command: self.verification.agent.clone(),
            model: Some(self.resolve_model(&self.verification.model)),
            label: Some("verifier".to_string()),
        }
    }
}

/// Settings source the orchestrator consumes. Implementations must
/// re-fetch on every call — settings can change between invocations.
pub trait SettingsSource: Send + Sync {
    fn load(&self) -> anyhow::Result<Config>;
}

/// File-backed settings: re-reads `.beatline.toml` from the project root
/// on every call.
#[derive(Debug, Clone)]
pub struct FileSettings {
    root: PathBuf,
}

impl FileSettings {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }
}

impl SettingsSource for FileSettings {
    fn load(&self) -> anyhow::Result<Config> {
        let path = find_config(&self.root).ok_or_else(|| {
            ExitError::Config(format!(
                "no {CONFIG_TOML} or {CONFIG_JSON} found in {}",
                self.root.display()
            ))
        })?;
        Config::load(&path)
    }
}
