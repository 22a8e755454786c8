//! Review Cycle: execute -> parallel-review -> feedback-merge -> retry for
//! a single working task, gated by the four-eyes protocol (spec §4.10).
//!
//! Grounded on the `ensemble` fan-out/fan-in pattern for
//! concurrent reviewer dispatch, with decision-making delegated to the
//! Conflict Resolver rather than a raw vote tally.

use crate::conflict_resolver;
use crate::dispatcher::{AgentDispatcher, DispatchStatus};
use crate::model::{ReviewFeedback, ResolutionAction, TaskSpec};
use crate::registry::AgentRegistry;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewCycleStatus {
    Approved,
    NeedsChanges,
    Conflict,
    Escalated,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewCycleResult {
    pub status: ReviewCycleStatus,
    pub reason: String,
    pub iterations: u32,
    pub final_output: Option<serde_json::Value>,
    pub reviews: Vec<ReviewFeedback>,
}

#[derive(Debug, Clone)]
pub struct ReviewCycleConfig {
    pub max_iterations: u32,
    pub approval_score: f64,
    pub reviewer_ids: Vec<String>,
    pub dispatch_timeout: Duration,
}

impl ReviewCycleConfig {
    pub fn from_registry(registry: &AgentRegistry, working_agent_id: &str) -> Option<Self> {
        let reviewers = registry.reviewers_of(working_agent_id).ok()?;
        Some(Self {
            max_iterations: 3,
            approval_score: 7.0,
            reviewer_ids: reviewers.iter().map(|a| a.id.clone()).collect(),
            dispatch_timeout: Duration::from_secs(300),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CycleLogEntry {
    iteration: u32,
    status: ReviewCycleStatus,
    scores: Vec<f64>,
}

pub struct ReviewCycle<'a> {
    pub dispatcher: &'a AgentDispatcher<'a>,
    pub config: ReviewCycleConfig,
    cycle_log: std::sync::Mutex<Vec<CycleLogEntry>>,
}

const MAX_CYCLE_LOG: usize = 100;

impl<'a> ReviewCycle<'a> {
    pub fn new(dispatcher: &'a AgentDispatcher<'a>, config: ReviewCycleConfig) -> Self {
        Self {
            dispatcher,
            config,
            cycle_log: std::sync::Mutex::new(Vec::new()),
        }
    }

    fn log(&self, entry: CycleLogEntry) {
        let mut log = self.cycle_log.lock().unwrap();
        log.push(entry);
        if log.len() > MAX_CYCLE_LOG {
            let overflow = log.len() - MAX_CYCLE_LOG;
            log.drain(0..overflow);
        }
    }

    pub fn cycle_log(&self) -> Vec<(u32, ReviewCycleStatus, Vec<f64>)> {
        self.cycle_log
            .lock()
            .unwrap()
            .iter()
            .map(|e| (e.iteration, e.status, e.scores.clone()))
            .collect()
    }

    fn decide(&self, reviews: &[ReviewFeedback]) -> (ReviewCycleStatus, String) {
        let all_approved = reviews.iter().all(|r| r.approved && r.score >= self.config.approval_score);
        if all_approved {
            return (ReviewCycleStatus::Approved, "all reviewers approved".into());
        }
        let none_approved = reviews.iter().all(|r| !r.approved);
        if none_approved {
            return (ReviewCycleStatus::NeedsChanges, "no reviewer approved".into());
        }
        // mixed: run the first two through the conflict resolver
        let a = &reviews[0];
        let b = &reviews[1];
        let resolution = conflict_resolver::resolve(a, b, None);
        let status = match resolution.action {
            ResolutionAction::Approve => ReviewCycleStatus::Approved,
            ResolutionAction::Reject => ReviewCycleStatus::NeedsChanges,
            ResolutionAction::Escalate => ReviewCycleStatus::Conflict,
        };
        (status, resolution.decision_reason)
    }

    pub async fn run(&self, working_agent_id: &str, initial_task: TaskSpec) -> ReviewCycleResult {
        if self.config.reviewer_ids.len() < 2 {
            return ReviewCycleResult {
                status: ReviewCycleStatus::Error,
                reason: "No reviewers configured".into(),
                iterations: 0,
                final_output: None,
                reviews: vec![],
            };
        }

        let mut task = initial_task;
        for iteration in 1..=self.config.max_iterations {
            let dispatch = self
                .dispatcher
                .dispatch(working_agent_id, &task, iteration, false, "", self.config.dispatch_timeout)
                .await;

            let dispatch = match dispatch {
                Ok(d) => d,
                Err(e) => {
                    return ReviewCycleResult {
                        status: ReviewCycleStatus::Error,
                        reason: format!("Working agent error: {e}"),
                        iterations: iteration,
                        final_output: None,
                        reviews: vec![],
                    }
                }
            };

            if dispatch.status == DispatchStatus::Failed && dispatch.output.is_null() {
                return ReviewCycleResult {
                    status: ReviewCycleStatus::Error,
                    reason: format!("Working agent error: {}", dispatch.error.unwrap_or_default()),
                    iterations: iteration,
                    final_output: None,
                    reviews: vec![],
                };
            }

            let reviews = join_all(self.config.reviewer_ids.iter().map(|rid| {
                self.dispatcher.dispatch_review(
                    rid,
                    &task,
                    &dispatch.output,
                    &dispatch.files_created,
                    &dispatch.files_modified,
                    iteration,
                    self.config.dispatch_timeout,
                )
            }))
            .await;

            let (status, reason) = self.decide(&reviews);
            self.log(CycleLogEntry {
                iteration,
                status,
                scores: reviews.iter().map(|r| r.score).collect(),
            });

            if status == ReviewCycleStatus::Approved {
                return ReviewCycleResult {
                    status,
                    reason,
                    iterations: iteration,
                    final_output: Some(dispatch.output),
                    reviews,
                };
            }

            if status == ReviewCycleStatus::Conflict && iteration == self.config.max_iterations {
                return ReviewCycleResult {
                    status: ReviewCycleStatus::Escalated,
                    reason,
                    iterations: iteration,
                    final_output: Some(dispatch.output),
                    reviews,
                };
            }

            task.previous_feedback = reviews.into_iter().filter(|r| !r.approved).collect();
        }

        ReviewCycleResult {
            status: ReviewCycleStatus::Escalated,
            reason: format!("Max iterations ({}) exceeded without approval", self.config.max_iterations),
            iterations: self.config.max_iterations,
            final_output: None,
            reviews: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::default_registry;

    #[test]
    fn config_requires_two_reviewers_from_registry() {
        let reg = default_registry();
        let cfg = ReviewCycleConfig::from_registry(&reg, "coder-claude").unwrap();
        assert!(cfg.reviewer_ids.len() >= 2);
        assert_eq!(cfg.approval_score, 7.0);
        assert_eq!(cfg.max_iterations, 3);
    }

    #[tokio::test]
    async fn fewer_than_two_reviewers_is_an_error() {
        let reg = default_registry();
        let dispatcher = AgentDispatcher::new(&reg, ".");
        let cycle = ReviewCycle::new(
            &dispatcher,
            ReviewCycleConfig {
                max_iterations: 3,
                approval_score: 7.0,
                reviewer_ids: vec!["only-one".into()],
                dispatch_timeout: Duration::from_secs(1),
            },
        );
        let result = cycle
            .run(
                "coder-claude",
                TaskSpec {
                    id: "t1".into(),
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(result.status, ReviewCycleStatus::Error);
        assert_eq!(result.reason, "No reviewers configured");
    }

    #[test]
    fn decide_all_approved_yields_approved() {
        let reg = default_registry();
        let dispatcher = AgentDispatcher::new(&reg, ".");
        let cycle = ReviewCycle::new(
            &dispatcher,
            ReviewCycleConfig {
                max_iterations: 3,
                approval_score: 7.0,
                reviewer_ids: vec!["a".into(), "b".into()],
                dispatch_timeout: Duration::from_secs(1),
            },
        );
        let reviews = vec![
            ReviewFeedback {
                reviewer_id: "a".into(),
                cli: "cursor".into(),
                approved: true,
                score: 8.0,
                blocking_issues: vec![],
                suggestions: vec![],
                security_findings: vec![],
            },
            ReviewFeedback {
                reviewer_id: "b".into(),
                cli: "gemini".into(),
                approved: true,
                score: 7.5,
                blocking_issues: vec![],
                suggestions: vec![],
                security_findings: vec![],
            },
        ];
        let (status, _) = cycle.decide(&reviews);
        assert_eq!(status, ReviewCycleStatus::Approved);
    }

    #[test]
    fn decide_none_approved_yields_needs_changes() {
        let reg = default_registry();
        let dispatcher = AgentDispatcher::new(&reg, ".");
        let cycle = ReviewCycle::new(
            &dispatcher,
            ReviewCycleConfig {
                max_iterations: 3,
                approval_score: 7.0,
                reviewer_ids: vec!["a".into(), "b".into()],
                dispatch_timeout: Duration::from_secs(1),
            },
        );
        let reviews = vec![
            ReviewFeedback {
                reviewer_id: "a".into(),
                cli: "cursor".into(),
                approved: false,
                score: 3.0,
                blocking_issues: vec!["bad".into()],
                suggestions: vec![],
                security_findings: vec![],
            },
            ReviewFeedback {
                reviewer_id: "b".into(),
                cli: "gemini".into(),
                approved: false,
                score: 2.0,
                blocking_issues: vec!["also bad".into()],
                suggestions: vec![],
                security_findings: vec![],
            },
        ];
        let (status, _) = cycle.decide(&reviews);
        assert_eq!(status, ReviewCycleStatus::NeedsChanges);
    }
}
