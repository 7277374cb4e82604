//! Wave planner — layered topological sort with cycle isolation.
//!
//! A wave is the set of items whose blockers all sit in earlier waves.
//! Items on or downstream of a dependency cycle never reach in-degree
//! zero; they are reported separately as unschedulable. Wave numbering is
//! a global frontier index: disconnected subgraphs share wave numbers.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::plan::{DependencyEdge, ItemKind, WorkItem};

/// One layer of the schedule.
#[derive(Debug, Clone, Serialize)]
pub struct Wave {
    /// 1-based frontier index.
    pub level: u32,
    /// Items runnable in this wave, ordered by (priority, id).
    pub items: Vec<WorkItem>,
    /// At most one gate per wave; requires human sign-off before
    /// successors proceed.
    pub gate: Option<WorkItem>,
}

/// Planner output: every input item lands in exactly one wave or in the
/// unschedulable set.
#[derive(Debug, Clone, Serialize)]
pub struct WavePlan {
    pub waves: Vec<Wave>,
    pub unschedulable: Vec<WorkItem>,
}

impl WavePlan {
    /// Wave level for an item id, if it was scheduled.
    pub fn level_of(&self, id: &str) -> Option<u32> {
        self.waves.iter().find_map(|w| {
            let in_items = w.items.iter().any(|i| i.id == id);
            let in_gate = w.gate.as_ref().is_some_and(|g| g.id == id);
            (in_items || in_gate).then_some(w.level)
        })
    }

    pub fn is_unschedulable(&self, id: &str) -> bool {
        self.unschedulable.iter().any(|i| i.id == id)
    }
}

/// Compute the wave layering for a deduplicated item list.
///
/// Blockers are the union of each item's `blocked_by` and the edge list.
/// Blockers absent from the item set (closed, deferred, unknown) are
/// treated as already satisfied.
pub fn plan_waves(items: &[WorkItem], edges: &[DependencyEdge]) -> WavePlan {
    let by_id: HashMap<&str, &WorkItem> = items.iter().map(|i| (i.id.as_str(), i)).collect();

    // blocked id -> set of open blocker ids
    let mut blockers: HashMap<&str, BTreeSet<&str>> = HashMap::new();
    for item in items {
        let entry = blockers.entry(item.id.as_str()).or_default();
        for b in &item.blocked_by {
            // Self-loops count too: an item blocking itself can never run.
            if by_id.contains_key(b.as_str()) {
                entry.insert(b.as_str());
            }
        }
    }
    for edge in edges {
        if let (Some(_), Some(blocked)) = (
            by_id.get(edge.blocker.as_str()),
            by_id.get(edge.blocked.as_str()),
        ) {
            blockers
                .entry(blocked.id.as_str())
                .or_default()
                .insert(edge.blocker.as_str());
        }
    }

    // blocker id -> ids it blocks
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for (blocked, bs) in &blockers {
        for b in bs {
            dependents.entry(b).or_default().push(blocked);
        }
    }

    let mut remaining: HashMap<&str, usize> = items
        .iter()
        .map(|i| {
            (
                i.id.as_str(),
                blockers.get(i.id.as_str()).map_or(0, BTreeSet::len),
            )
        })
        .collect();

    let mut waves = Vec::new();
    let mut level: u32 = 0;

    loop {
        let mut frontier: Vec<&WorkItem> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| by_id[*id])
            .collect();
        if frontier.is_empty() {
            break;
        }
        sort_items(&mut frontier);

        // Gates occupy the wave's dedicated slot, one per wave. Additional
        // ready gates wait for the next frontier.
        let gate = frontier.iter().find(|i| i.kind == ItemKind::Gate).copied();
        let wave_items: Vec<&WorkItem> = frontier
            .iter()
            .filter(|i| i.kind != ItemKind::Gate)
            .copied()
            .collect();

        let mut placed: Vec<&WorkItem> = wave_items.clone();
        if let Some(g) = gate {
            placed.push(g);
        }

        level += 1;
        waves.push(Wave {
            level,
            items: wave_items.iter().map(|i| (*i).clone()).collect(),
            gate: gate.cloned(),
        });

        for item in placed {
            remaining.remove(item.id.as_str());
            if let Some(deps) = dependents.get(item.id.as_str()) {
                for dep in deps {
                    if let Some(count) = remaining.get_mut(dep) {
                        *count = count.saturating_sub(1);
                    }
                }
            }
        }
    }

    // Whatever never reached in-degree zero is on or downstream of a cycle.
    let mut unschedulable: Vec<&WorkItem> = remaining.keys().map(|id| by_id[*id]).collect();
    sort_items(&mut unschedulable);

    WavePlan {
        waves,
        unschedulable: unschedulable.into_iter().cloned().collect(),
    }
}

fn sort_items(items: &mut [&WorkItem]) {
    items.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
}
