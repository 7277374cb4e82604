//! Readiness classification — why a beat is or isn't actionable right now.

use serde::Serialize;

use crate::plan::waves::WavePlan;
use crate::plan::{short_id, ItemKind, ItemStatus, WorkItem};
use crate::verify::labels::STAGE_VERIFICATION;

/// Display-facing readiness of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Runnable,
    InProgress,
    Blocked,
    Verification,
    Gate,
    Unschedulable,
}

impl Readiness {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Runnable => "runnable",
            Self::InProgress => "in progress",
            Self::Blocked => "blocked",
            Self::Verification => "verification",
            Self::Gate => "gate",
            Self::Unschedulable => "unschedulable",
        }
    }
}

/// Readiness plus a human-readable reason.
#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub readiness: Readiness,
    pub reason: String,
}

/// Classify one item. Rules apply in strict priority order; first match wins.
pub fn classify(
    item: &WorkItem,
    is_unschedulable: bool,
    awaiting_human_review: bool,
) -> Classification {
    if is_unschedulable {
        return Classification {
            readiness: Readiness::Unschedulable,
            reason: "dependency cycle detected".to_string(),
        };
    }
    if item.kind == ItemKind::Gate {
        return Classification {
            readiness: Readiness::Gate,
            reason: "requires human verification".to_string(),
        };
    }
    if awaiting_human_review {
        return Classification {
            readiness: Readiness::Verification,
            reason: "awaiting verification, not eligible for shipping".to_string(),
        };
    }
    match item.status {
        ItemStatus::InProgress => Classification {
            readiness: Readiness::InProgress,
            reason: "in progress".to_string(),
        },
        // open blockers outrank whatever the status field says
        _ if is_blocked(item) => Classification {
            readiness: Readiness::Blocked,
            reason: blocked_reason(item),
        },
        ItemStatus::Open => Classification {
            readiness: Readiness::Runnable,
            reason: "ready to ship".to_string(),
        },
        status => Classification {
            readiness: Readiness::Blocked,
            reason: format!("status is `{}`", status_str(status)),
        },
    }
}

fn is_blocked(item: &WorkItem) -> bool {
    item.status == ItemStatus::Blocked || !item.blocked_by.is_empty()
}

fn blocked_reason(item: &WorkItem) -> String {
    if item.blocked_by.is_empty() {
        "marked blocked".to_string()
    } else {
        let short: Vec<&str> = item.blocked_by.iter().map(|b| short_id(b)).collect();
        format!("blocked by {}", short.join(", "))
    }
}

fn status_str(status: ItemStatus) -> &'static str {
    match status {
        ItemStatus::Open => "open",
        ItemStatus::InProgress => "in_progress",
        ItemStatus::Blocked => "blocked",
        ItemStatus::Deferred => "deferred",
        ItemStatus::Closed => "closed",
    }
}

/// True when the item sits in the automated verification stage — done but
/// not yet shipped, waiting on the verifier (or a human) to sign off.
pub fn awaiting_verification(item: &WorkItem) -> bool {
    item.has_label(STAGE_VERIFICATION)
}

/// A classified item with its wave placement.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifiedItem {
    pub item: WorkItem,
    pub wave: Option<u32>,
    pub classification: Classification,
}

/// Tallies over the classified set, recomputed per request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub runnable: usize,
    pub in_progress: usize,
    pub blocked: usize,
    pub verification: usize,
    pub gates: usize,
    pub unschedulable: usize,
}

/// Full classified board: the plan plus per-item readiness, the runnable
/// queue head, and the summary tallies.
#[derive(Debug, Clone, Serialize)]
pub struct Board {
    pub plan: WavePlan,
    pub items: Vec<ClassifiedItem>,
    /// Head of the runnable queue: (wave asc, priority asc, id asc).
    pub recommendation: Option<WorkItem>,
    pub summary: Summary,
}

/// Classify every item in a computed plan and derive the recommendation
/// and summary.
pub fn classify_plan(plan: WavePlan) -> Board {
    let mut items = Vec::new();

    for wave in &plan.waves {
        for item in wave.items.iter().chain(wave.gate.as_ref()) {
            let c = classify(item, false, awaiting_verification(item));
            items.push(ClassifiedItem {
                item: item.clone(),
                wave: Some(wave.level),
                classification: c,
            });
        }
    }
    for item in &plan.unschedulable {
        let c = classify(item, true, awaiting_verification(item));
        items.push(ClassifiedItem {
            item: item.clone(),
            wave: None,
            classification: c,
        });
    }

    let mut runnable: Vec<&ClassifiedItem> = items
        .iter()
        .filter(|c| c.classification.readiness == Readiness::Runnable)
        .collect();
    runnable.sort_by(|a, b| {
        a.wave
            .cmp(&b.wave)
            .then_with(|| a.item.priority.cmp(&b.item.priority))
            .then_with(|| a.item.id.cmp(&b.item.id))
    });
    let recommendation = runnable.first().map(|c| c.item.clone());

    let mut summary = Summary::default();
    for c in &items {
        match c.classification.readiness {
            Readiness::Runnable => summary.runnable += 1,
            Readiness::InProgress => summary.in_progress += 1,
            Readiness::Blocked => summary.blocked += 1,
            Readiness::Verification => summary.verification += 1,
            Readiness::Gate => summary.gates += 1,
            Readiness::Unschedulable => summary.unschedulable += 1,
        }
    }

    Board {
        plan,
        items,
        recommendation,
        summary,
    }
}
