//! In-memory verification locks and the diagnostic event log.
//!
//! Both are process-lifetime structures owned by the orchestrator (no
//! module-level globals) so tests can construct isolated instances.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A lock held past this age belongs to a crashed workflow and may be
/// re-acquired.
pub const LOCK_STALE_AFTER: Duration = Duration::from_secs(10 * 60);

/// Per-item verification locks. At most one active workflow per item id;
/// check-then-act happens under one mutex guard, so concurrent workflows
/// for different items cannot race the map.
#[derive(Debug)]
pub struct VerificationLocks {
    held: Mutex<HashMap<String, Instant>>,
    stale_after: Duration,
}

impl Default for VerificationLocks {
    fn default() -> Self {
        Self::new(LOCK_STALE_AFTER)
    }
}

impl VerificationLocks {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            held: Mutex::new(HashMap::new()),
            stale_after,
        }
    }

    /// Try to acquire the lock for an item. Returns false when a live
    /// (non-stale) holder exists.
    pub fn acquire(&self, id: &str) -> bool {
        self.acquire_at(id, Instant::now())
    }

    fn acquire_at(&self, id: &str, now: Instant) -> bool {
        let Ok(mut held) = self.held.lock() else {
            return false;
        };
        if let Some(started_at) = held.get(id) {
            if now.duration_since(*started_at) < self.stale_after {
                return false;
            }
            // stale holder: a crashed workflow must not wedge the item
        }
        held.insert(id.to_string(), now);
        true
    }

    /// Release the lock. Safe to call when not held.
    pub fn release(&self, id: &str) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(id);
        }
    }

    #[cfg(test)]
    fn backdate(&self, id: &str, age: Duration) {
        if let Ok(mut held) = self.held.lock() {
            if let Some(started_at) = held.get_mut(id) {
                *started_at -= age;
            }
        }
    }
}

/// Diagnostic event recorded during verification workflows.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VerificationEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub beat_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub detail: String,
}

/// Append-only ring buffer of verification events. Oldest entries are
/// evicted past the cap; process-lifetime only.
#[derive(Debug)]
pub struct EventLog {
    events: Mutex<VecDeque<VerificationEvent>>,
    cap: usize,
}

pub const EVENT_LOG_CAP: usize = 500;

impl Default for EventLog {
    fn default() -> Self {
        Self::new(EVENT_LOG_CAP)
    }
}

impl EventLog {
    pub fn new(cap: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            cap,
        }
    }

    pub fn record(&self, kind: &str, beat_id: &str, detail: impl Into<String>) {
        let detail = detail.into();
        tracing::debug!(kind, beat_id, detail, "verification event");
        if let Ok(mut events) = self.events.lock() {
            if events.len() == self.cap {
                events.pop_front();
            }
            events.push_back(VerificationEvent {
                kind: kind.to_string(),
                beat_id: beat_id.to_string(),
                timestamp: chrono::Utc::now(),
                detail,
            });
        }
    }

    pub fn snapshot(&self) -> Vec<VerificationEvent> {
        self.events
            .lock()
            .map(|e| e.iter().cloned().collect())
            .unwrap_or_default()
    }
}
