//! Tracker port — the boundary to the external issue tracker.
//!
//! The tracker is the sole source of truth for beats; this crate only
//! reads projections and writes label/status/notes mutations through this
//! port. Expected failures come back as structured `TrackerError`s, never
//! panics; exceptions stay reserved for infrastructure problems.

pub mod cli;

use crate::plan::{DependencyEdge, WorkItem};

/// Structured tracker failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerErrorKind {
    NotFound,
    InvalidInput,
    Unsupported,
    Conflict,
    Locked,
    Timeout,
    Unavailable,
    PermissionDenied,
    RateLimited,
    AlreadyExists,
}

impl TrackerErrorKind {
    /// Whether retrying the same call later can reasonably succeed.
    pub fn retryable(self) -> bool {
        matches!(
            self,
            Self::Locked | Self::Timeout | Self::Unavailable | Self::RateLimited
        )
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("tracker {kind:?}: {message}")]
pub struct TrackerError {
    pub kind: TrackerErrorKind,
    pub message: String,
}

impl TrackerError {
    pub fn new(kind: TrackerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn retryable(&self) -> bool {
        self.kind.retryable()
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;

/// Mutations for one update call. Labels are additive, `remove_labels`
/// subtractive; unset fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct UpdateFields {
    pub add_labels: Vec<String>,
    pub remove_labels: Vec<String>,
    pub status: Option<String>,
    pub notes: Option<String>,
}

impl UpdateFields {
    pub fn is_empty(&self) -> bool {
        self.add_labels.is_empty()
            && self.remove_labels.is_empty()
            && self.status.is_none()
            && self.notes.is_none()
    }
}

/// A raw dependency record as the tracker reports it.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct DependencyRecord {
    /// The blocking (or otherwise related) item.
    pub id: String,
    /// Relation type; only `blocks` participates in scheduling.
    #[serde(default, alias = "type")]
    pub dep_type: String,
}

impl DependencyRecord {
    pub fn is_blocking(&self) -> bool {
        self.dep_type == "blocks"
    }
}

/// Operations the core needs from a tracker backend.
pub trait TrackerPort: Send + Sync {
    fn get(&self, id: &str, repo: &std::path::Path) -> TrackerResult<WorkItem>;

    fn update(&self, id: &str, fields: &UpdateFields, repo: &std::path::Path)
        -> TrackerResult<()>;

    fn close(&self, id: &str, reason: &str, repo: &std::path::Path) -> TrackerResult<()>;

    /// List non-closed items for planning.
    fn list(&self, repo: &std::path::Path) -> TrackerResult<Vec<WorkItem>>;

    fn list_dependencies(
        &self,
        id: &str,
        repo: &std::path::Path,
    ) -> TrackerResult<Vec<DependencyRecord>>;

    /// CLI invocation the verifier runs to mark a pass. Embedded verbatim
    /// in the prompt.
    fn pass_label_command(&self, id: &str) -> String;

    /// CLI invocation the verifier runs to mark a failed attempt.
    fn retry_label_command(&self, id: &str) -> String;
}

/// Build the scheduling graph from a tracker: list open items, resolve
/// each item's blocking dependencies, and filter edges to the `blocks`
/// relation.
pub fn load_graph(
    tracker: &dyn TrackerPort,
    repo: &std::path::Path,
) -> TrackerResult<(Vec<WorkItem>, Vec<DependencyEdge>)> {
    let mut items = tracker.list(repo)?;
    items.retain(|i| i.status.schedulable());

    let mut edges = Vec::new();
    for item in &mut items {
        let deps = tracker.list_dependencies(&item.id, repo)?;
        item.blocked_by = deps
            .iter()
            .filter(|d| d.is_blocking())
            .map(|d| d.id.clone())
            .collect();
        for blocker in &item.blocked_by {
            edges.push(DependencyEdge {
                blocker: blocker.clone(),
                blocked: item.id.clone(),
            });
        }
    }
    Ok((items, edges))
}
