//! Conflict Resolver: reduces two heterogeneous reviewer verdicts to a
//! single decision (spec §4.9).
//!
//! Grounded on the `ensemble::voting` weighted/majority
//! resolution pattern, extended with the spec's Authority Veto domain-
//! keyword mechanism, that a plain voting module would lack.

use crate::model::{ReviewFeedback, ResolutionAction, ResolutionResult};

/// Domain keyword -> which reviewer (by role name) has authority over it.
/// "A" is the first reviewer passed to `resolve`, "B" the second.
const DOMAIN_AUTHORITY: &[(&str, &str)] = &[
    ("injection", "A"),
    ("sql injection", "A"),
    ("xss", "A"),
    ("privilege escalation", "A"),
    ("csrf", "A"),
    ("hardcoded secret", "A"),
];

const PROCESS_GAP_MARKERS: &[&str] = &[
    "not specified",
    "missing",
    "should include",
    "no mention",
    "unclear",
];

fn is_process_gap(text: &str) -> bool {
    let lower = text.to_lowercase();
    PROCESS_GAP_MARKERS.iter().any(|m| lower.contains(m))
}

fn authority_for(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    DOMAIN_AUTHORITY
        .iter()
        .find(|(kw, _)| lower.contains(kw))
        .map(|(_, who)| *who)
}

pub struct Weights {
    pub a: f64,
    pub b: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self { a: 0.6, b: 0.4 }
    }
}

/// first match wins: authority veto -> real-blocker reject -> high
/// disagreement escalate -> below-threshold reject -> approve.
pub fn resolve(a: &ReviewFeedback, b: &ReviewFeedback, weights: Option<Weights>) -> ResolutionResult {
    // 1. Authority veto
    for issue in a.blocking_issues.iter() {
        if authority_for(issue) == Some("A") && !is_process_gap(issue) {
            return ResolutionResult {
                approved: false,
                final_score: 0.0,
                decision_reason: format!("Authority Veto: A flagged {issue}"),
                blocking_issues: vec![issue.clone()],
                action: ResolutionAction::Reject,
            };
        }
    }
    for issue in b.blocking_issues.iter() {
        if authority_for(issue) == Some("B") && !is_process_gap(issue) {
            return ResolutionResult {
                approved: false,
                final_score: 0.0,
                decision_reason: format!("Authority Veto: B flagged {issue}"),
                blocking_issues: vec![issue.clone()],
                action: ResolutionAction::Reject,
            };
        }
    }

    // 2. Normalise weights
    let w = weights.unwrap_or_default();
    let sum = w.a + w.b;
    let (wa, wb) = if sum > 0.0 { (w.a / sum, w.b / sum) } else { (0.6, 0.4) };
    let weighted = a.score * wa + b.score * wb;

    // 3. Partition real blockers vs process gaps
    let real_blockers: Vec<String> = a
        .blocking_issues
        .iter()
        .chain(b.blocking_issues.iter())
        .filter(|i| !is_process_gap(i))
        .cloned()
        .collect();
    if !real_blockers.is_empty() {
        return ResolutionResult {
            approved: false,
            final_score: weighted,
            decision_reason: "Real blocking issue(s) raised".into(),
            blocking_issues: real_blockers,
            action: ResolutionAction::Reject,
        };
    }

    // 4. High disagreement
    if (a.score - b.score).abs() > 3.0 {
        return ResolutionResult {
            approved: false,
            final_score: weighted,
            decision_reason: "High disagreement between reviewers".into(),
            blocking_issues: vec![],
            action: ResolutionAction::Escalate,
        };
    }

    // 5. Below threshold
    if weighted < 6.0 {
        return ResolutionResult {
            approved: false,
            final_score: weighted,
            decision_reason: format!("Weighted score {weighted:.1} below threshold"),
            blocking_issues: vec![],
            action: ResolutionAction::Reject,
        };
    }

    // 6. Approve
    ResolutionResult {
        approved: true,
        final_score: weighted,
        decision_reason: "Approved".into(),
        blocking_issues: vec![],
        action: ResolutionAction::Approve,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feedback(score: f64, blocking: Vec<&str>) -> ReviewFeedback {
        ReviewFeedback {
            reviewer_id: "r".into(),
            cli: "cli".into(),
            approved: blocking.is_empty(),
            score,
            blocking_issues: blocking.into_iter().map(String::from).collect(),
            suggestions: vec![],
            security_findings: vec![],
        }
    }

    #[test]
    fn authority_veto_rejects_even_with_high_other_score() {
        let a = feedback(4.0, vec!["SQL injection vulnerability"]);
        let b = feedback(8.0, vec![]);
        let result = resolve(&a, &b, None);
        assert_eq!(result.action, ResolutionAction::Reject);
        assert!(result.decision_reason.contains("Authority Veto"));
    }

    #[test]
    fn process_gap_does_not_veto_or_block() {
        let a = feedback(8.0, vec!["documentation should include examples"]);
        let b = feedback(8.0, vec![]);
        let result = resolve(&a, &b, None);
        assert_eq!(result.action, ResolutionAction::Approve);
    }

    #[test]
    fn high_disagreement_escalates() {
        let a = feedback(9.0, vec![]);
        let b = feedback(5.0, vec![]);
        let result = resolve(&a, &b, None);
        assert_eq!(result.action, ResolutionAction::Escalate);
        assert!(result.decision_reason.contains("disagreement"));
    }

    #[test]
    fn below_threshold_rejects() {
        let a = feedback(5.0, vec![]);
        let b = feedback(5.0, vec![]);
        let result = resolve(&a, &b, None);
        assert_eq!(result.action, ResolutionAction::Reject);
    }

    #[test]
    fn default_weights_are_point_six_point_four() {
        let a = feedback(10.0, vec![]);
        let b = feedback(0.0, vec![]);
        let result = resolve(&a, &b, None);
        assert!((result.final_score - 6.0).abs() < 1e-9);
    }

    #[test]
    fn good_scores_approve() {
        let a = feedback(8.0, vec![]);
        let b = feedback(7.5, vec![]);
        let result = resolve(&a, &b, None);
        assert_eq!(result.action, ResolutionAction::Approve);
    }
}
