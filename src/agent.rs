//! Agent adapter — abstracts over vendor CLI differences.
//!
//! Different agent CLIs speak different newline-delimited JSON dialects.
//! This module resolves which dialect a command speaks, builds the
//! prompt-mode invocation for it, and normalizes its stream events into
//! one shape the orchestrator understands.

use serde::Deserialize;
use serde_json::Value;

/// A configured agent: the CLI command plus optional model/label.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSpec {
    pub command: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

/// Stream dialect spoken by an agent CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `claude -p --output-format stream-json`
    ClaudeCode,
    /// `codex exec --json`
    Codex,
    /// Unknown CLI: pass text lines through untouched.
    Generic,
}

/// Resolve the dialect from the command name.
pub fn resolve_dialect(command: &str) -> Dialect {
    let base = command.rsplit('/').next().unwrap_or(command);
    match base {
        "claude" => Dialect::ClaudeCode,
        "codex" => Dialect::Codex,
        _ => Dialect::Generic,
    }
}

/// Build the subprocess invocation that runs `prompt` non-interactively.
pub fn build_prompt_mode_args(spec: &AgentSpec, prompt: &str) -> (String, Vec<String>) {
    let mut args = Vec::new();
    match resolve_dialect(&spec.command) {
        Dialect::ClaudeCode => {
            args.extend(
                ["--verbose", "--output-format", "stream-json"]
                    .iter()
                    .map(ToString::to_string),
            );
            if let Some(ref model) = spec.model {
                args.push("--model".to_string());
                args.push(model.clone());
            }
            args.push("-p".to_string());
            args.push(prompt.to_string());
        }
        Dialect::Codex => {
            args.push("exec".to_string());
            args.push("--json".to_string());
            if let Some(ref model) = spec.model {
                args.push("--model".to_string());
                args.push(model.clone());
            }
            args.push(prompt.to_string());
        }
        Dialect::Generic => {
            if let Some(ref model) = spec.model {
                args.push("--model".to_string());
                args.push(model.clone());
            }
            args.push(prompt.to_string());
        }
    }
    (spec.command.clone(), args)
}

/// Normalized stream event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// Assistant-visible text.
    Text(String),
    /// Tool invocation (name only; inputs stay in the raw log).
    ToolUse(String),
    /// Terminal event — the agent finished; text is the final result if
    /// the dialect carries one.
    Result(String),
}

/// Normalize one parsed JSON line for a dialect. Returns None for events
/// with nothing the orchestrator cares about.
pub fn normalize_line(dialect: Dialect, line: &Value) -> Option<AgentEvent> {
    match dialect {
        Dialect::ClaudeCode => normalize_claude(line),
        Dialect::Codex => normalize_codex(line),
        Dialect::Generic => line
            .get("text")
            .and_then(Value::as_str)
            .map(|t| AgentEvent::Text(t.to_string())),
    }
}

fn normalize_claude(event: &Value) -> Option<AgentEvent> {
    match event.get("type").and_then(Value::as_str) {
        Some("result") => {
            let text = event
                .get("result")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Some(AgentEvent::Result(text.to_string()))
        }
        Some("assistant") => {
            let content = event
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(Value::as_array)?;
            for block in content {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        if let Some(text) = block.get("text").and_then(Value::as_str) {
                            return Some(AgentEvent::Text(text.to_string()));
                        }
                    }
                    Some("tool_use") => {
                        if let Some(name) = block.get("name").and_then(Value::as_str) {
                            return Some(AgentEvent::ToolUse(name.to_string()));
                        }
                    }
                    _ => {}
                }
            }
            None
        }
        Some("text") => event
            .get("text")
            .and_then(Value::as_str)
            .map(|t| AgentEvent::Text(t.to_string())),
        _ => None,
    }
}

fn normalize_codex(event: &Value) -> Option<AgentEvent> {
    let msg = event.get("msg")?;
    match msg.get("type").and_then(Value::as_str) {
        Some("agent_message") => msg
            .get("message")
            .and_then(Value::as_str)
            .map(|t| AgentEvent::Text(t.to_string())),
        Some("task_complete") => {
            let text = msg
                .get("last_agent_message")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Some(AgentEvent::Result(text.to_string()))
        }
        _ => None,
    }
}

/// Incremental line splitter for subprocess output with arbitrary chunk
/// boundaries. Retains the trailing partial line across pushes.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: String,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns the complete lines it closed out.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.partial.push_str(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.partial.find('\n') {
            let rest = self.partial.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.partial, rest);
            line.truncate(line.trim_end_matches(['\n', '\r']).len());
            lines.push(line);
        }
        lines
    }

    /// Flush the trailing partial line, if any (call at stream end).
    pub fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.partial))
        }
    }
}
