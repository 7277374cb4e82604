//! Label-encoded verification state machine.
//!
//! The tracker has no first-class verification-state column, so workflow
//! state lives in the item's label set:
//!
//! - active verification:  `transition:verification` + `stage:verification`
//! - retry pending:        `stage:retry` + `attempt:<n>`
//! - terminal pass:        all verification labels removed, item closed
//!
//! Every transition here is a pure function from the current label set to
//! an add/remove delta; applying the delta to the tracker is the
//! orchestrator's job.

pub const TRANSITION_VERIFICATION: &str = "transition:verification";
pub const STAGE_VERIFICATION: &str = "stage:verification";
pub const STAGE_RETRY: &str = "stage:retry";
pub const COMMIT_PREFIX: &str = "commit:";
pub const ATTEMPT_PREFIX: &str = "attempt:";

/// Labels to add and remove in one tracker update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelDelta {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

impl LabelDelta {
    pub fn is_noop(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }

    /// Apply the delta to a label set (used by tests and dry runs; the
    /// tracker applies the real one).
    pub fn apply(&self, labels: &[String]) -> Vec<String> {
        let mut out: Vec<String> = labels
            .iter()
            .filter(|l| !self.remove.contains(l))
            .cloned()
            .collect();
        for add in &self.add {
            if !out.contains(add) {
                out.push(add.clone());
            }
        }
        out
    }
}

fn has(labels: &[String], label: &str) -> bool {
    labels.iter().any(|l| l == label)
}

/// Labels for entering verification. Idempotent: if the transition label
/// is already present another workflow owns the item and this is a no-op.
pub fn compute_entry_labels(labels: &[String]) -> LabelDelta {
    if has(labels, TRANSITION_VERIFICATION) {
        return LabelDelta::default();
    }
    let mut delta = LabelDelta {
        add: vec![TRANSITION_VERIFICATION.to_string()],
        remove: Vec::new(),
    };
    if !has(labels, STAGE_VERIFICATION) {
        delta.add.push(STAGE_VERIFICATION.to_string());
    }
    if has(labels, STAGE_RETRY) {
        delta.remove.push(STAGE_RETRY.to_string());
    }
    delta
}

/// Labels for a terminal pass. The caller closes the item separately.
pub fn compute_pass_labels(labels: &[String]) -> LabelDelta {
    let mut delta = LabelDelta::default();
    if has(labels, TRANSITION_VERIFICATION) {
        delta.remove.push(TRANSITION_VERIFICATION.to_string());
    }
    if has(labels, STAGE_VERIFICATION) {
        delta.remove.push(STAGE_VERIFICATION.to_string());
    }
    delta
}

/// Labels for a failed attempt: clear the active-verification markers and
/// the commit marker (the next attempt must produce a fresh commit), bump
/// the attempt counter, and park the item in the retry stage.
pub fn compute_retry_labels(labels: &[String]) -> LabelDelta {
    let mut delta = LabelDelta::default();
    if has(labels, TRANSITION_VERIFICATION) {
        delta.remove.push(TRANSITION_VERIFICATION.to_string());
    }
    if has(labels, STAGE_VERIFICATION) {
        delta.remove.push(STAGE_VERIFICATION.to_string());
    }
    if let Some(commit) = labels.iter().find(|l| l.starts_with(COMMIT_PREFIX)) {
        delta.remove.push(commit.clone());
    }
    let attempt_label = labels.iter().find(|l| l.starts_with(ATTEMPT_PREFIX));
    if let Some(label) = attempt_label {
        delta.remove.push(label.clone());
    }
    let prev = attempt_label.map_or(0, |l| extract_attempt(l));

    delta.add.push(STAGE_RETRY.to_string());
    delta.add.push(format!("{ATTEMPT_PREFIX}{}", prev + 1));
    delta
}

fn extract_attempt(label: &str) -> u32 {
    label
        .strip_prefix(ATTEMPT_PREFIX)
        .and_then(|n| n.trim().parse().ok())
        .unwrap_or(0)
}

/// Current attempt number from a label set (0 when no attempt label).
pub fn attempt_number(labels: &[String]) -> u32 {
    labels
        .iter()
        .find(|l| l.starts_with(ATTEMPT_PREFIX))
        .map_or(0, |l| extract_attempt(l))
}

/// Build the `commit:<sha>` marker label.
pub fn build_commit_label(sha: &str) -> String {
    format!("{COMMIT_PREFIX}{sha}")
}

/// Extract the commit sha from the first `commit:` label. Whitespace is
/// trimmed; an empty sha counts as absent.
pub fn extract_commit_label(labels: &[String]) -> Option<String> {
    labels
        .iter()
        .find(|l| l.starts_with(COMMIT_PREFIX))
        .map(|l| l[COMMIT_PREFIX.len()..].trim().to_string())
        .filter(|sha| !sha.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(xs: &[&str]) -> Vec<String> {
        xs.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn entry_from_clean_state() {
        let delta = compute_entry_labels(&[]);
        assert_eq!(
            delta.add,
            vec![TRANSITION_VERIFICATION, STAGE_VERIFICATION]
        );
        assert!(delta.remove.is_empty());
    }

    #[test]
    fn entry_is_idempotent() {
        // re-entry with the transition label present is a no-op
        let current = labels(&[TRANSITION_VERIFICATION, STAGE_VERIFICATION]);
        let delta = compute_entry_labels(&current);
        assert!(delta.is_noop());
    }

    #[test]
    fn entry_clears_prior_retry_marker() {
        let current = labels(&[STAGE_RETRY, "attempt:2"]);
        let delta = compute_entry_labels(&current);
        assert_eq!(delta.add, vec![TRANSITION_VERIFICATION, STAGE_VERIFICATION]);
        assert_eq!(delta.remove, vec![STAGE_RETRY]);
    }

    #[test]
    fn entry_keeps_existing_stage_label() {
        let current = labels(&[STAGE_VERIFICATION]);
        let delta = compute_entry_labels(&current);
        assert_eq!(delta.add, vec![TRANSITION_VERIFICATION]);
        assert!(delta.remove.is_empty());
    }

    #[test]
    fn pass_removes_verification_markers() {
        let current = labels(&[TRANSITION_VERIFICATION, STAGE_VERIFICATION, "commit:abc"]);
        let delta = compute_pass_labels(&current);
        assert!(delta.add.is_empty());
        assert_eq!(delta.remove, vec![TRANSITION_VERIFICATION, STAGE_VERIFICATION]);
    }

    #[test]
    fn pass_on_clean_state_is_noop() {
        let delta = compute_pass_labels(&[]);
        assert!(delta.is_noop());
    }

    #[test]
    fn retry_first_attempt() {
        let current = labels(&[TRANSITION_VERIFICATION, STAGE_VERIFICATION, "commit:deadbeef"]);
        let delta = compute_retry_labels(&current);
        assert_eq!(delta.add, vec![STAGE_RETRY.to_string(), "attempt:1".to_string()]);
        assert_eq!(
            delta.remove,
            vec![
                TRANSITION_VERIFICATION.to_string(),
                STAGE_VERIFICATION.to_string(),
                "commit:deadbeef".to_string(),
            ]
        );
    }

    #[test]
    fn retry_increments_attempt() {
        let current = labels(&[TRANSITION_VERIFICATION, STAGE_VERIFICATION, "attempt:3"]);
        let delta = compute_retry_labels(&current);
        assert!(delta.add.contains(&"attempt:4".to_string()));
        assert!(delta.remove.contains(&"attempt:3".to_string()));
    }

    #[test]
    fn repeated_retries_keep_one_attempt_label() {
        // N consecutive retries leave exactly attempt:<N>
        let mut current: Vec<String> = Vec::new();
        for n in 1..=5u32 {
            // between failures the item re-enters verification
            current = compute_entry_labels(&current).apply(&current);
            current = compute_retry_labels(&current).apply(&current);
            let attempts: Vec<&String> = current
                .iter()
                .filter(|l| l.starts_with(ATTEMPT_PREFIX))
                .collect();
            assert_eq!(attempts.len(), 1);
            assert_eq!(attempts[0], &format!("attempt:{n}"));
        }
    }

    #[test]
    fn commit_label_round_trip() {
        let built = build_commit_label("abc123");
        assert_eq!(extract_commit_label(&[built]), Some("abc123".to_string()));
    }

    #[test]
    fn commit_label_trims_and_rejects_empty() {
        assert_eq!(
            extract_commit_label(&labels(&["commit:  abc  "])),
            Some("abc".to_string())
        );
        assert_eq!(extract_commit_label(&labels(&["commit:"])), None);
        assert_eq!(extract_commit_label(&labels(&["commit:   "])), None);
        assert_eq!(extract_commit_label(&labels(&["other"])), None);
    }

    #[test]
    fn commit_label_first_match_wins() {
        let ls = labels(&["commit:first", "commit:second"]);
        assert_eq!(extract_commit_label(&ls), Some("first".to_string()));
    }

    #[test]
    fn attempt_number_defaults_to_zero() {
        assert_eq!(attempt_number(&[]), 0);
        assert_eq!(attempt_number(&labels(&["attempt:7"])), 7);
        assert_eq!(attempt_number(&labels(&["attempt:junk"])), 0);
    }
}
