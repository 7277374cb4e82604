//! Beads CLI backend for the tracker port.
//!
//! Shells out to `bd` with `--json` and parses its output tolerantly:
//! optional and unknown fields never fail the parse, new tracker versions
//! just flow through.

use std::path::Path;

use serde::Deserialize;

use crate::plan::{ItemKind, ItemStatus, WorkItem};
use crate::subprocess::Tool;
use crate::tracker::{
    DependencyRecord, TrackerError, TrackerErrorKind, TrackerPort, TrackerResult, UpdateFields,
};

/// Tracker backend shelling out to the beads CLI.
#[derive(Debug, Clone)]
pub struct BeadsCli {
    program: String,
}

impl Default for BeadsCli {
    fn default() -> Self {
        Self::new("bd")
    }
}

impl BeadsCli {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }

    fn run(&self, args: &[&str], repo: &Path) -> TrackerResult<String> {
        let output = Tool::new(&self.program)
            .args(args)
            .current_dir(repo)
            .run()
            .map_err(|e| {
                TrackerError::new(TrackerErrorKind::Unavailable, format!("{e:#}"))
            })?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(classify_failure(&output.stderr, output.exit_code))
        }
    }
}

/// Map a failed `bd` invocation to a structured error.
fn classify_failure(stderr: &str, code: i32) -> TrackerError {
    let lower = stderr.to_lowercase();
    let kind = if lower.contains("not found") || lower.contains("no such") {
        TrackerErrorKind::NotFound
    } else if lower.contains("invalid") || lower.contains("usage:") {
        TrackerErrorKind::InvalidInput
    } else if lower.contains("already exists") {
        TrackerErrorKind::AlreadyExists
    } else if lower.contains("locked") {
        TrackerErrorKind::Locked
    } else if lower.contains("timed out") || lower.contains("timeout") {
        TrackerErrorKind::Timeout
    } else if lower.contains("permission") {
        TrackerErrorKind::PermissionDenied
    } else if lower.contains("conflict") {
        TrackerErrorKind::Conflict
    } else {
        TrackerErrorKind::Unavailable
    };
    TrackerError::new(kind, format!("bd exited {code}: {}", stderr.trim()))
}

/// Raw `bd show --json` shape.
#[derive(Debug, Deserialize)]
struct RawItem {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default, alias = "type")]
    issue_type: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    priority: u8,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    parent: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default, alias = "acceptanceCriteria")]
    acceptance_criteria: String,
    #[serde(default)]
    notes: String,
}

impl From<RawItem> for WorkItem {
    fn from(raw: RawItem) -> Self {
        WorkItem {
            id: raw.id,
            title: raw.title,
            kind: ItemKind::from_tracker(&raw.issue_type),
            status: ItemStatus::from_tracker(&raw.status),
            priority: raw.priority.min(4),
            labels: raw.labels,
            parent: raw.parent,
            blocked_by: Vec::new(),
            description: raw.description,
            acceptance_criteria: raw.acceptance_criteria,
            notes: raw.notes,
        }
    }
}

fn parse_item(json: &str) -> TrackerResult<WorkItem> {
    let raw: RawItem = serde_json::from_str(json).map_err(|e| {
        TrackerError::new(TrackerErrorKind::InvalidInput, format!("bd show parse: {e}"))
    })?;
    Ok(raw.into())
}

fn parse_items(json: &str) -> TrackerResult<Vec<WorkItem>> {
    let raw: Vec<RawItem> = serde_json::from_str(json).map_err(|e| {
        TrackerError::new(TrackerErrorKind::InvalidInput, format!("bd list parse: {e}"))
    })?;
    Ok(raw.into_iter().map(WorkItem::from).collect())
}

fn parse_deps(json: &str) -> TrackerResult<Vec<DependencyRecord>> {
    serde_json::from_str(json).map_err(|e| {
        TrackerError::new(
            TrackerErrorKind::InvalidInput,
            format!("bd dep list parse: {e}"),
        )
    })
}

impl TrackerPort for BeadsCli {
    fn get(&self, id: &str, repo: &Path) -> TrackerResult<WorkItem> {
        let out = self.run(&["show", id, "--json"], repo)?;
        parse_item(&out)
    }

    fn update(&self, id: &str, fields: &UpdateFields, repo: &Path) -> TrackerResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut args: Vec<String> = vec!["update".to_string(), id.to_string()];
        for label in &fields.add_labels {
            args.push("--add-label".to_string());
            args.push(label.clone());
        }
        for label in &fields.remove_labels {
            args.push("--remove-label".to_string());
            args.push(label.clone());
        }
        if let Some(ref status) = fields.status {
            args.push("--status".to_string());
            args.push(status.clone());
        }
        if let Some(ref notes) = fields.notes {
            args.push("--notes".to_string());
            args.push(notes.clone());
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&arg_refs, repo)?;
        Ok(())
    }

    fn close(&self, id: &str, reason: &str, repo: &Path) -> TrackerResult<()> {
        self.run(&["close", id, "--reason", reason], repo)?;
        Ok(())
    }

    fn list(&self, repo: &Path) -> TrackerResult<Vec<WorkItem>> {
        let out = self.run(
            &["list", "--status", "open,in_progress,blocked", "--json"],
            repo,
        )?;
        parse_items(&out)
    }

    fn list_dependencies(&self, id: &str, repo: &Path) -> TrackerResult<Vec<DependencyRecord>> {
        let out = self.run(&["dep", "list", id, "--json"], repo)?;
        parse_deps(&out)
    }

    fn pass_label_command(&self, id: &str) -> String {
        format!(
            "{} update {id} --remove-label transition:verification --remove-label stage:verification",
            self.program
        )
    }

    fn retry_label_command(&self, id: &str) -> String {
        format!("{} update {id} --add-label stage:retry", self.program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_item_full() {
        let json = r#"{"id": "bd-a1", "title": "Fix login", "type": "bug", "status": "in_progress",
            "priority": 1, "labels": ["commit:abc"], "description": "broken", "notes": ""}"#;
        let item = parse_item(json).unwrap();
        assert_eq!(item.id, "bd-a1");
        assert_eq!(item.kind, ItemKind::Bug);
        assert_eq!(item.status, ItemStatus::InProgress);
        assert_eq!(item.labels, vec!["commit:abc"]);
    }

    #[test]
    fn parse_item_minimal_and_tolerant() {
        let item = parse_item(r#"{"id": "bd-x", "future_field": 42}"#).unwrap();
        assert_eq!(item.id, "bd-x");
        assert_eq!(item.kind, ItemKind::Task);
        assert_eq!(item.status, ItemStatus::Open);
    }

    #[test]
    fn parse_item_clamps_priority() {
        let item = parse_item(r#"{"id": "bd-x", "priority": 9}"#).unwrap();
        assert_eq!(item.priority, 4);
    }

    #[test]
    fn parse_item_invalid_json() {
        let err = parse_item("not json").unwrap_err();
        assert_eq!(err.kind, TrackerErrorKind::InvalidInput);
    }

    #[test]
    fn parse_deps_filters_nothing() {
        let json = r#"[{"id": "bd-a", "type": "blocks"}, {"id": "bd-b", "type": "parent-child"}]"#;
        let deps = parse_deps(json).unwrap();
        assert_eq!(deps.len(), 2);
        assert!(deps[0].is_blocking());
        assert!(!deps[1].is_blocking());
    }

    #[test]
    fn classify_failure_kinds() {
        assert_eq!(
            classify_failure("error: issue not found", 1).kind,
            TrackerErrorKind::NotFound
        );
        assert_eq!(
            classify_failure("invalid status value", 2).kind,
            TrackerErrorKind::InvalidInput
        );
        assert_eq!(
            classify_failure("database is locked", 1).kind,
            TrackerErrorKind::Locked
        );
        assert_eq!(
            classify_failure("something exploded", 1).kind,
            TrackerErrorKind::Unavailable
        );
    }

    #[test]
    fn label_commands_embed_program_and_id() {
        let cli = BeadsCli::default();
        assert_eq!(
            cli.pass_label_command("bd-a"),
            "bd update bd-a --remove-label transition:verification --remove-label stage:verification"
        );
        assert_eq!(
            cli.retry_label_command("bd-a"),
            "bd update bd-a --add-label stage:retry"
        );
    }
}
