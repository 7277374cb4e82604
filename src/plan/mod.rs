//! Dependency graph model for beat scheduling.
//!
//! Everything here is a transient projection of the tracker's current
//! snapshot — built fresh per request, never persisted.

pub mod readiness;
pub mod waves;

use serde::{Deserialize, Serialize};

/// Kind of a tracked work item ("beat").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemKind {
    Bug,
    Feature,
    Task,
    Epic,
    Chore,
    MergeRequest,
    Molecule,
    /// Human checkpoint — never auto-advanced by scheduling.
    Gate,
}

impl ItemKind {
    pub fn from_tracker(s: &str) -> Self {
        match s {
            "bug" => Self::Bug,
            "feature" => Self::Feature,
            "epic" => Self::Epic,
            "chore" => Self::Chore,
            "merge-request" | "mr" => Self::MergeRequest,
            "molecule" => Self::Molecule,
            "gate" => Self::Gate,
            _ => Self::Task,
        }
    }
}

/// Tracker status of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Open,
    #[serde(alias = "doing")]
    InProgress,
    Blocked,
    Deferred,
    Closed,
}

impl ItemStatus {
    pub fn from_tracker(s: &str) -> Self {
        match s {
            "in_progress" | "doing" => Self::InProgress,
            "blocked" => Self::Blocked,
            "deferred" => Self::Deferred,
            "closed" | "done" => Self::Closed,
            _ => Self::Open,
        }
    }

    /// Statuses that participate in the scheduling graph. Closed items are
    /// satisfied blockers; deferred items are parked outside the graph.
    pub fn schedulable(self) -> bool {
        matches!(self, Self::Open | Self::InProgress | Self::Blocked)
    }
}

/// A unit of trackable work as projected from the tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default = "default_kind", alias = "type")]
    pub kind: ItemKind,
    #[serde(default = "default_status")]
    pub status: ItemStatus,
    /// 0 is highest, 4 lowest.
    #[serde(default)]
    pub priority: u8,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub parent: Option<String>,
    /// Ids of open items that must close before this one may run.
    #[serde(default, alias = "blockedBy")]
    pub blocked_by: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "acceptanceCriteria")]
    pub acceptance_criteria: String,
    #[serde(default)]
    pub notes: String,
}

fn default_kind() -> ItemKind {
    ItemKind::Task
}

fn default_status() -> ItemStatus {
    ItemStatus::Open
}

impl WorkItem {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

/// Directed blocking edge: `blocker` must close before `blocked` may run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub blocker: String,
    pub blocked: String,
}

/// A tracker snapshot the planner consumes — the request boundary between
/// the dashboard and the core. Items are deduplicated by id upstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanSnapshot {
    #[serde(default)]
    pub items: Vec<WorkItem>,
    #[serde(default)]
    pub edges: Vec<DependencyEdge>,
}

/// Strip the tracker prefix from an id for compact display
/// ("bd-a1b2.3" -> "a1b2.3").
pub fn short_id(id: &str) -> &str {
    id.strip_prefix("bd-").unwrap_or(id)
}
