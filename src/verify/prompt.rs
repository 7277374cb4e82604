//! Verifier prompt construction and output parsing.
//!
//! The verifier is an agent subprocess pointed at the repo. The prompt
//! gives it the beat's requirements, the commit to inspect, and an exact
//! reporting protocol; we then scan its raw output for the result marker.

use std::sync::OnceLock;

use crate::plan::WorkItem;

/// Outcome reported by the verifier agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    FailRequirements,
    FailBugs,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Pass => "pass",
            Verdict::FailRequirements => "fail-requirements",
            Verdict::FailBugs => "fail-bugs",
        }
    }

    pub fn is_pass(self) -> bool {
        self == Verdict::Pass
    }
}

fn re_result() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"VERIFICATION_RESULT:(pass|fail-requirements|fail-bugs)")
            .expect("valid regex")
    })
}

/// Scan raw verifier output for `VERIFICATION_RESULT:<verdict>`.
/// First match wins; returns None when the agent never reported.
pub fn parse_verifier_result(output: &str) -> Option<Verdict> {
    let caps = re_result().captures(output)?;
    match caps.get(1).map(|m| m.as_str()) {
        Some("pass") => Some(Verdict::Pass),
        Some("fail-requirements") => Some(Verdict::FailRequirements),
        Some("fail-bugs") => Some(Verdict::FailBugs),
        _ => None,
    }
}

/// Build the verification prompt for one beat.
///
/// `pass_command` and `retry_command` are backend-specific tracker CLI
/// invocations (from the tracker adapter) and must appear verbatim so the
/// agent can run them.
pub fn build_verifier_prompt(
    item: &WorkItem,
    commit_sha: &str,
    pass_command: &str,
    retry_command: &str,
) -> String {
    let acceptance = if item.acceptance_criteria.trim().is_empty() {
        "(none recorded)"
    } else {
        item.acceptance_criteria.trim()
    };
    let notes = if item.notes.trim().is_empty() {
        "(none)"
    } else {
        item.notes.trim()
    };

    format!(
        r#"You are an automated code verifier. A coding agent just completed work on the beat below and committed it. Review the commit against the requirements.

Beat:        {id}: {title}
Commit:      {commit}

Description:
{description}

Acceptance criteria:
{acceptance}

Notes:
{notes}

Protocol — follow these steps exactly:
1. Inspect commit {commit} (git show {commit}) and the surrounding code. Check that every requirement and acceptance criterion above is satisfied.
2. Check that the commit introduces no new bugs: broken callers, unhandled errors, regressions in touched code paths.
3. If any requirement is unmet OR the commit introduces a bug:
   - Run: {retry_command}
   - Output a line: REJECTION_SUMMARY: <2-4 sentences explaining what is wrong>
   - Then output exactly one line: VERIFICATION_RESULT:fail-requirements (requirement unmet) or VERIFICATION_RESULT:fail-bugs (bug introduced)
4. If the work satisfies the requirements and introduces no bugs:
   - Run: {pass_command}
   - Output exactly one line: VERIFICATION_RESULT:pass

Do not output VERIFICATION_RESULT more than once."#,
        id = item.id,
        title = item.title,
        commit = commit_sha,
        description = if item.description.trim().is_empty() {
            "(none)"
        } else {
            item.description.trim()
        },
        acceptance = acceptance,
        notes = notes,
    )
}

/// Extract the verifier's rejection summary, if it emitted one.
pub fn parse_rejection_summary(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix("REJECTION_SUMMARY:"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{ItemKind, ItemStatus};

    fn item() -> WorkItem {
        WorkItem {
            id: "bd-a1".to_string(),
            title: "Add login form".to_string(),
            kind: ItemKind::Feature,
            status: ItemStatus::InProgress,
            priority: 1,
            labels: vec!["commit:abc123".to_string()],
            parent: None,
            blocked_by: Vec::new(),
            description: "Users need to log in.".to_string(),
            acceptance_criteria: "- form validates email".to_string(),
            notes: String::new(),
        }
    }

    #[test]
    fn parse_result_mid_stream() {
        let out = "blah blah\nVERIFICATION_RESULT:fail-bugs\nmore";
        assert_eq!(parse_verifier_result(out), Some(Verdict::FailBugs));
    }

    #[test]
    fn parse_result_first_match_wins() {
        let out = "VERIFICATION_RESULT:pass\nVERIFICATION_RESULT:fail-bugs";
        assert_eq!(parse_verifier_result(out), Some(Verdict::Pass));
    }

    #[test]
    fn parse_result_absent() {
        assert_eq!(parse_verifier_result("nothing to see"), None);
        assert_eq!(parse_verifier_result("VERIFICATION_RESULT:maybe"), None);
    }

    #[test]
    fn parse_all_verdicts() {
        assert_eq!(
            parse_verifier_result("VERIFICATION_RESULT:fail-requirements"),
            Some(Verdict::FailRequirements)
        );
        assert_eq!(
            parse_verifier_result("VERIFICATION_RESULT:pass"),
            Some(Verdict::Pass)
        );
    }

    #[test]
    fn prompt_embeds_item_and_commands() {
        let prompt = build_verifier_prompt(
            &item(),
            "abc123",
            "bd update bd-a1 --remove-label stage:verification",
            "bd update bd-a1 --add-label stage:retry",
        );
        assert!(prompt.contains("bd-a1: Add login form"));
        assert!(prompt.contains("git show abc123"));
        assert!(prompt.contains("bd update bd-a1 --remove-label stage:verification"));
        assert!(prompt.contains("bd update bd-a1 --add-label stage:retry"));
        assert!(prompt.contains("form validates email"));
        assert!(prompt.contains("VERIFICATION_RESULT:pass"));
        assert!(prompt.contains("REJECTION_SUMMARY:"));
    }

    #[test]
    fn prompt_placeholders_for_empty_fields() {
        let mut it = item();
        it.description = String::new();
        it.acceptance_criteria = String::new();
        let prompt = build_verifier_prompt(&it, "abc", "p", "r");
        assert!(prompt.contains("(none recorded)"));
        assert!(prompt.contains("(none)"));
    }

    #[test]
    fn rejection_summary_extraction() {
        let out = "junk\nREJECTION_SUMMARY: The validation is missing.\nVERIFICATION_RESULT:fail-requirements";
        assert_eq!(
            parse_rejection_summary(out),
            Some("The validation is missing.".to_string())
        );
        assert_eq!(parse_rejection_summary("no summary"), None);
    }
}
