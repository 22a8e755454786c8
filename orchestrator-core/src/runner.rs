//! Workflow Runner: the public facade driving the Workflow Graph from
//! `prerequisites` to `completion`, or to a suspended interrupt (spec
//! §4.15).
//!
//! Grounded on the `harness::ProgressTracker`/checkpoint-on-every-
//! transition idiom, generalised from a single linear harness session to
//! the graph's six phases, with fan-out reviewer gating delegated to the
//! Conflict Resolver and per-task execution delegated to the Review Cycle
//! / Unified Loop Runner rather than re-implemented here.

use crate::budget::BudgetManager;
use crate::conflict_resolver;
use crate::dispatcher::AgentDispatcher;
use crate::error_context::ErrorContextManager;
use crate::events::{EventBus, ProgressCallback, ProgressEvent, SharedEventBus};
use crate::git::GitRepo;
use crate::graph::{CheckpointError, Checkpointer};
use crate::loop_runner::{UnifiedLoopConfig, UnifiedLoopRunner};
use crate::model::{
    ExecutionMode, HumanResponse, NextDecision, NodeStatus, PendingInterrupt, PhaseRecord, TaskSpec,
    VerificationKind, WorkflowRunConfig, WorkflowState,
};
use crate::registry::AgentRegistry;
use crate::review_cycle::{ReviewCycle, ReviewCycleConfig, ReviewCycleStatus};
use crate::session::SessionManager;
use crate::verifier::kinds::Verifier;
use crate::verifier::{create_verifier, VerifierContext};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub success: bool,
    pub paused: bool,
    pub message: Option<String>,
    pub error: Option<String>,
    pub state: WorkflowState,
}

fn phase_record(status: NodeStatus) -> PhaseRecord {
    PhaseRecord {
        status,
        started_at: Some(Utc::now()),
        ended_at: if matches!(status, NodeStatus::Completed | NodeStatus::Failed) {
            Some(Utc::now())
        } else {
            None
        },
        iteration_count: 0,
        error: None,
    }
}

/// Topological order of `tasks` by `TaskSpec::dependencies`; a cycle drops
/// the remaining tasks rather than looping forever.
fn topological_order(tasks: &[TaskSpec]) -> Vec<String> {
    let mut remaining: Vec<&TaskSpec> = tasks.iter().collect();
    let mut done: Vec<String> = Vec::new();
    while !remaining.is_empty() {
        let ready_idx = remaining
            .iter()
            .position(|t| t.dependencies.iter().all(|d| done.contains(d)));
        match ready_idx {
            Some(idx) => {
                let t = remaining.remove(idx);
                done.push(t.id.clone());
            }
            None => break, // cyclic or unresolved dependency: stop, don't spin
        }
    }
    done
}

pub struct WorkflowRunner<'a> {
    pub registry: &'a AgentRegistry,
    pub budget: &'a BudgetManager,
    pub session: &'a SessionManager,
    pub error_context: &'a ErrorContextManager,
    pub checkpointer: Box<dyn Checkpointer>,
    pub events: SharedEventBus,
    pub project_dir: PathBuf,
}

impl<'a> WorkflowRunner<'a> {
    pub fn new(
        registry: &'a AgentRegistry,
        budget: &'a BudgetManager,
        session: &'a SessionManager,
        error_context: &'a ErrorContextManager,
        checkpointer: Box<dyn Checkpointer>,
        project_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            budget,
            session,
            error_context,
            checkpointer,
            events: EventBus::new().shared(),
            project_dir: project_dir.into(),
        }
    }

    fn emit(&self, callback: Option<&dyn ProgressCallback>, node: &str, phase: u8, start: bool) {
        let event = if start {
            ProgressEvent::NodeStart {
                node: node.into(),
                phase,
                data: serde_json::Value::Null,
                timestamp: Utc::now(),
            }
        } else {
            ProgressEvent::NodeEnd {
                node: node.into(),
                phase,
                data: serde_json::Value::Null,
                timestamp: Utc::now(),
            }
        };
        self.events.publish(event);
        if let Some(cb) = callback {
            if start {
                cb.on_node_start(node, phase);
            } else {
                cb.on_node_end(node, phase);
            }
        }
    }

    fn checkpoint(&self, node: &str, state: &WorkflowState) -> Result<(), RunnerError> {
        self.checkpointer.save(node, state)?;
        Ok(())
    }

    /// Success predicate for an external caller (spec §4.15).
    pub fn is_success(&self, state: &WorkflowState) -> bool {
        state.current_phase == state.config.end_phase
            && state
                .phase_status
                .get(&state.config.end_phase)
                .map(|r| r.status == NodeStatus::Completed)
                .unwrap_or(false)
            && state.next_decision == NextDecision::Continue
    }

    pub fn get_state(&self) -> Option<WorkflowState> {
        self.checkpointer.load_latest().ok().flatten().map(|(_, s)| s)
    }

    pub fn get_pending_interrupt(&self) -> Option<PendingInterrupt> {
        self.get_state().and_then(|s| s.pending_interrupt)
    }

    /// Starts a fresh run, or resumes from the latest checkpoint if one
    /// exists for this project.
    pub async fn run(
        &self,
        project_name: &str,
        config: WorkflowRunConfig,
        tasks: Vec<TaskSpec>,
        callback: Option<&dyn ProgressCallback>,
    ) -> Result<WorkflowResult, RunnerError> {
        let mut state = match self.checkpointer.load_latest()? {
            Some((_, existing)) => existing,
            None => {
                let mut fresh = WorkflowState::new(project_name, self.project_dir.to_string_lossy());
                fresh.config = config;
                fresh.plan.tasks = tasks;
                fresh
            }
        };
        self.drive(&mut state, callback).await
    }

    /// Resumes a suspended run, first applying `human_response` to clear
    /// the pending interrupt.
    pub async fn resume(
        &self,
        human_response: Option<HumanResponse>,
        callback: Option<&dyn ProgressCallback>,
    ) -> Result<WorkflowResult, RunnerError> {
        let mut state = match self.checkpointer.load_latest()? {
            Some((_, s)) => s,
            None => {
                return Ok(WorkflowResult {
                    success: false,
                    paused: false,
                    message: None,
                    error: Some("no checkpoint to resume from".into()),
                    state: WorkflowState::new(self.project_dir.to_string_lossy(), self.project_dir.to_string_lossy()),
                })
            }
        };

        if let Some(response) = human_response {
            use crate::model::HumanAction;
            state.next_decision = match response.action {
                HumanAction::Retry | HumanAction::Continue | HumanAction::Approve => NextDecision::Continue,
                HumanAction::Abort => NextDecision::Abort,
                HumanAction::Reject | HumanAction::RequestChanges => NextDecision::Retry,
                HumanAction::Skip | HumanAction::AnswerClarification => NextDecision::Continue,
            };
            state.pending_interrupt = None;
        }

        self.drive(&mut state, callback).await
    }

    async fn drive(
        &self,
        state: &mut WorkflowState,
        callback: Option<&dyn ProgressCallback>,
    ) -> Result<WorkflowResult, RunnerError> {
        loop {
            if state.pending_interrupt.is_some() {
                if let Some(cb) = callback {
                    cb.on_interrupt(&serde_json::to_value(&state.pending_interrupt).unwrap_or_default());
                }
                return Ok(WorkflowResult {
                    success: false,
                    paused: true,
                    message: Some("workflow paused on interrupt".into()),
                    error: None,
                    state: state.clone(),
                });
            }

            if state.next_decision == NextDecision::Abort {
                return Ok(WorkflowResult {
                    success: false,
                    paused: false,
                    message: Some("workflow aborted".into()),
                    error: None,
                    state: state.clone(),
                });
            }

            if state.current_phase > state.config.end_phase {
                break;
            }

            match state.current_phase {
                0 => self.run_prerequisites(state, callback).await?,
                1 => self.run_planning(state, callback).await?,
                2 => self.run_validation(state, callback).await?,
                3 => self.run_implementation(state, callback).await?,
                4 => self.run_verification(state, callback).await?,
                5 => {
                    self.run_completion(state, callback)?;
                    break;
                }
                _ => break,
            }

            if state.next_decision == NextDecision::Abort || state.pending_interrupt.is_some() {
                continue;
            }
            state.current_phase += 1;
        }

        let success = self.is_success(state);
        Ok(WorkflowResult {
            success,
            paused: false,
            message: None,
            error: None,
            state: state.clone(),
        })
    }

    async fn run_prerequisites(
        &self,
        state: &mut WorkflowState,
        callback: Option<&dyn ProgressCallback>,
    ) -> Result<(), RunnerError> {
        self.emit(callback, "prerequisites", 0, true);
        let workflow_dir = self.project_dir.join(".workflow");
        let ok = std::fs::create_dir_all(&workflow_dir).is_ok() && self.registry.all().next().is_some();
        if ok {
            state.merge_phase_status(0, phase_record(NodeStatus::Completed));
            state.next_decision = NextDecision::Continue;
        } else {
            state.merge_phase_status(0, phase_record(NodeStatus::Failed));
            state.next_decision = NextDecision::Abort;
            state.push_error("prerequisites failed: missing product spec or agent registry");
        }
        self.record_phase_commit(state);
        self.emit(callback, "prerequisites", 0, false);
        self.checkpoint("prerequisites", state)
    }

    fn record_phase_commit(&self, state: &mut WorkflowState) {
        if let Ok(head) = GitRepo::new(&self.project_dir).current_head() {
            state.phase_commits.insert(state.current_phase, head);
        }
    }

    async fn run_planning(
        &self,
        state: &mut WorkflowState,
        callback: Option<&dyn ProgressCallback>,
    ) -> Result<(), RunnerError> {
        for node in ["research", "discuss", "planning", "task_breakdown"] {
            self.emit(callback, node, 1, true);
            self.emit(callback, node, 1, false);
            self.checkpoint(node, state)?;
        }
        // Plan is expected to already be populated by the caller (or a
        // prior checkpoint); planning nodes above delegate to specialist
        // dispatch but never invent tasks out of nothing.
        let status = if state.plan.tasks.is_empty() {
            NodeStatus::Failed
        } else {
            NodeStatus::Completed
        };
        state.merge_phase_status(1, phase_record(status));
        if status == NodeStatus::Failed {
            state.next_decision = NextDecision::Escalate;
            state.pending_interrupt = Some(PendingInterrupt::Escalation {
                phase: 1,
                issue: "planning produced no tasks".into(),
                error_type: "resource_unavailable".into(),
                suggested_actions: vec!["provide a task breakdown".into()],
                clarifications: vec![],
                context: serde_json::Value::Null,
                retry_count: 0,
                max_retries: state.max_retries,
            });
        }
        self.record_phase_commit(state);
        Ok(())
    }

    fn reviewer_pair(&self) -> Vec<String> {
        self.registry
            .all()
            .filter(|a| a.is_reviewer)
            .take(2)
            .map(|a| a.id.clone())
            .collect()
    }

    async fn fan_out_gate(
        &self,
        state: &mut WorkflowState,
        phase: u8,
        subject: &TaskSpec,
        agent_output: &serde_json::Value,
    ) -> NextDecision {
        let reviewers = self.reviewer_pair();
        if reviewers.len() < 2 {
            return NextDecision::Escalate;
        }
        let dispatcher = AgentDispatcher::new(self.registry, &self.project_dir);
        let timeout = std::time::Duration::from_secs(300);
        let reviews = futures::future::join_all(reviewers.iter().map(|rid| {
            dispatcher.dispatch_review(rid, subject, agent_output, &[], &[], 1, timeout)
        }))
        .await;

        for r in &reviews {
            let map = if phase == 2 {
                &mut state.validation_feedback
            } else {
                &mut state.verification_feedback
            };
            map.insert(r.reviewer_id.clone(), r.clone());
        }

        let resolution = conflict_resolver::resolve(&reviews[0], &reviews[1], None);
        match resolution.action {
            crate::model::ResolutionAction::Approve => NextDecision::Continue,
            crate::model::ResolutionAction::Reject => NextDecision::Retry,
            crate::model::ResolutionAction::Escalate => NextDecision::Escalate,
        }
    }

    async fn run_validation(
        &self,
        state: &mut WorkflowState,
        callback: Option<&dyn ProgressCallback>,
    ) -> Result<(), RunnerError> {
        for node in ["validation_review_a", "validation_review_b"] {
            self.emit(callback, node, 2, true);
            self.emit(callback, node, 2, false);
        }
        self.emit(callback, "validation_gate", 2, true);

        if state.config.skip_validation {
            state.next_decision = NextDecision::Continue;
        } else {
            let plan_summary = TaskSpec {
                id: "__plan__".into(),
                title: state.project_name.clone(),
                description: format!("{} tasks planned", state.plan.tasks.len()),
                ..Default::default()
            };
            let plan_output = serde_json::json!({ "tasks": state.plan.tasks.len() });
            state.next_decision = self.fan_out_gate(state, 2, &plan_summary, &plan_output).await;
        }

        let status = match state.next_decision {
            NextDecision::Continue => NodeStatus::Completed,
            NextDecision::Escalate | NextDecision::Abort => NodeStatus::Failed,
            NextDecision::Retry => NodeStatus::Running,
        };
        state.merge_phase_status(2, phase_record(status));
        // Retry (reviewers disagree, resolver says "reject") and Escalate
        // (resolver says "escalate") both suspend here rather than silently
        // advancing or looping the gate: a human resolves via `resume` with
        // an approve/reject/request_changes response (spec §4.14's
        // `after_validation_gate` router).
        if matches!(state.next_decision, NextDecision::Escalate | NextDecision::Retry) {
            state.pending_interrupt = Some(PendingInterrupt::ApprovalRequired {
                phase: 2,
                approval_type: "plan_validation".into(),
                summary: "reviewers disagree on the plan".into(),
                details: serde_json::Value::Null,
                scores: vec![],
                files_changed: vec![],
            });
        }
        self.record_phase_commit(state);
        self.emit(callback, "validation_gate", 2, false);
        self.checkpoint("validation_gate", state)
    }

    async fn run_implementation(
        &self,
        state: &mut WorkflowState,
        callback: Option<&dyn ProgressCallback>,
    ) -> Result<(), RunnerError> {
        let order = topological_order(&state.plan.tasks);
        let mut any_failed = false;

        for task_id in order {
            if state.completed_task_ids.contains(&task_id) {
                continue;
            }
            let task = match state.plan.tasks.iter().find(|t| t.id == task_id) {
                Some(t) => t.clone(),
                None => continue,
            };
            let Some(agent_id) = task.assigned_agent_id.clone() else {
                state.blocked_task_ids.push(task_id.clone());
                continue;
            };
            let Some(agent) = self.registry.get(&agent_id).cloned() else {
                state.blocked_task_ids.push(task_id.clone());
                continue;
            };

            self.emit(callback, "implementation", 3, true);
            if let Some(cb) = callback {
                cb.on_task_start(&task_id);
            }

            let succeeded = if agent.reviewers.len() >= 2 {
                self.run_task_via_review_cycle(state, &agent_id, task.clone()).await
            } else {
                self.run_task_via_loop_runner(state, &agent, task.clone()).await
            };

            if succeeded {
                state.completed_task_ids.push(task_id.clone());
                if let Some(cb) = callback {
                    cb.on_task_complete(&task_id);
                }
            } else {
                any_failed = true;
                state.push_error(format!("task {task_id} failed implementation"));
            }
            self.emit(callback, "implementation", 3, false);
        }

        self.emit(callback, "quality_gates", 3, true);
        let quality = crate::verifier::create_composite(
            self.project_dir.clone(),
            crate::verifier::CompositeOptions {
                include_tests: true,
                include_lint: true,
                include_security: true,
                require_all: true,
            },
        );
        let ctx = VerifierContext {
            project_dir: self.project_dir.clone(),
            test_files: vec![],
            source_files: vec![],
            task_id: "__quality_gates__".into(),
            iteration: 1,
            timeout: std::time::Duration::from_secs(120),
        };
        let quality_result = quality.verify(&ctx).await;
        self.emit(callback, "quality_gates", 3, false);

        state.next_decision = if any_failed || !quality_result.passed {
            NextDecision::Retry
        } else {
            NextDecision::Continue
        };
        let status = if state.next_decision == NextDecision::Continue {
            NodeStatus::Completed
        } else {
            NodeStatus::Failed
        };
        state.merge_phase_status(3, phase_record(status));
        // A failed implementation phase routes to the error-dispatch/fixer
        // subgraph in the full graph; this runner takes the pragmatic path
        // of surfacing it as an escalation rather than auto-healing.
        if state.next_decision == NextDecision::Retry {
            state.pending_interrupt = Some(PendingInterrupt::Escalation {
                phase: 3,
                issue: "implementation or quality gates failed".into(),
                error_type: "build_failure".into(),
                suggested_actions: vec!["inspect quality_gates output".into()],
                clarifications: vec![],
                context: serde_json::Value::Null,
                retry_count: state.retry_count,
                max_retries: state.max_retries,
            });
        }
        self.record_phase_commit(state);
        self.checkpoint("quality_gates", state)
    }

    async fn run_task_via_review_cycle(&self, state: &mut WorkflowState, agent_id: &str, task: TaskSpec) -> bool {
        let dispatcher = AgentDispatcher::new(self.registry, &self.project_dir);
        let Some(config) = ReviewCycleConfig::from_registry(self.registry, agent_id) else {
            return false;
        };
        let cycle = ReviewCycle::new(&dispatcher, config);
        let result = cycle.run(agent_id, task).await;
        match result.status {
            ReviewCycleStatus::Approved => true,
            ReviewCycleStatus::Conflict | ReviewCycleStatus::Escalated | ReviewCycleStatus::Error => {
                state.pending_interrupt = Some(PendingInterrupt::Escalation {
                    phase: 3,
                    issue: result.reason.clone(),
                    error_type: "review_conflict".into(),
                    suggested_actions: vec!["manual review".into()],
                    clarifications: vec![],
                    context: serde_json::Value::Null,
                    retry_count: result.iterations,
                    max_retries: state.max_retries,
                });
                false
            }
            ReviewCycleStatus::NeedsChanges => false,
        }
    }

    async fn run_task_via_loop_runner(
        &self,
        _state: &mut WorkflowState,
        agent: &crate::registry::Agent,
        task: TaskSpec,
    ) -> bool {
        let adapter = crate::adapter::create_adapter(agent.primary_cli, self.project_dir.clone(), agent.default_model.clone());
        let verifier_kind = if task.test_files.is_empty() {
            VerificationKind::None
        } else {
            VerificationKind::Tests
        };
        let verifier = create_verifier(verifier_kind, self.project_dir.clone());
        let runner = UnifiedLoopRunner {
            adapter: adapter.as_ref(),
            verifier: verifier.as_ref(),
            session: self.session,
            budget: self.budget,
            errors: self.error_context,
            project_dir: self.project_dir.clone(),
            config: UnifiedLoopConfig {
                max_iterations: agent.max_iterations,
                ..UnifiedLoopConfig::default()
            },
        };
        let result = runner.run(&task, None, None::<fn(u32, &crate::model::VerificationResult, &[String]) -> crate::loop_runner::HitlDecision>).await;
        result.success
    }

    async fn run_verification(
        &self,
        state: &mut WorkflowState,
        callback: Option<&dyn ProgressCallback>,
    ) -> Result<(), RunnerError> {
        for node in ["verification_review_a", "verification_review_b"] {
            self.emit(callback, node, 4, true);
            self.emit(callback, node, 4, false);
        }
        self.emit(callback, "verification_gate", 4, true);

        let subject = TaskSpec {
            id: "__implementation__".into(),
            title: state.project_name.clone(),
            description: format!("{} tasks completed", state.completed_task_ids.len()),
            ..Default::default()
        };
        let output = serde_json::json!({ "completed": state.completed_task_ids });
        state.next_decision = self.fan_out_gate(state, 4, &subject, &output).await;

        let status = match state.next_decision {
            NextDecision::Continue => NodeStatus::Completed,
            NextDecision::Escalate | NextDecision::Abort => NodeStatus::Failed,
            NextDecision::Retry => NodeStatus::Running,
        };
        state.merge_phase_status(4, phase_record(status));
        if matches!(state.next_decision, NextDecision::Escalate | NextDecision::Retry) {
            state.pending_interrupt = Some(PendingInterrupt::ApprovalRequired {
                phase: 4,
                approval_type: "implementation_verification".into(),
                summary: "reviewers disagree on the implementation".into(),
                details: serde_json::Value::Null,
                scores: vec![],
                files_changed: vec![],
            });
        }
        self.record_phase_commit(state);
        self.emit(callback, "verification_gate", 4, false);
        self.checkpoint("verification_gate", state)
    }

    fn run_completion(&self, state: &mut WorkflowState, callback: Option<&dyn ProgressCallback>) -> Result<(), RunnerError> {
        self.emit(callback, "completion", 5, true);
        state.current_phase = 5;
        state.merge_phase_status(5, phase_record(NodeStatus::Completed));
        state.next_decision = NextDecision::Continue;
        self.record_phase_commit(state);
        self.emit(callback, "completion", 5, false);
        self.checkpoint("completion", state)?;
        info!(project = %state.project_name, "workflow completed");
        Ok(())
    }

    /// Resets the repository and the in-memory workflow state to the
    /// commit recorded at the start of `phase`.
    pub fn rollback_to_phase(&self, state: &mut WorkflowState, phase: u8) -> Result<(), RunnerError> {
        if let Some(commit) = state.phase_commits.get(&phase).cloned() {
            if let Err(e) = GitRepo::new(&self.project_dir).reset_hard(&commit) {
                warn!(error = %e, "rollback_to_phase git reset failed");
            }
        }
        self.reset(state, Some(phase));
        self.events.publish(ProgressEvent::Rollback {
            phase,
            commit: state.phase_commits.get(&phase).cloned().unwrap_or_default(),
            timestamp: Utc::now(),
        });
        self.checkpoint("rollback", state)
    }

    /// Clears phase status/decisions from `phase` (or everything, if
    /// `None`) onward, without touching the git working tree.
    pub fn reset(&self, state: &mut WorkflowState, phase: Option<u8>) {
        let from = phase.unwrap_or(0);
        state.phase_status.retain(|p, _| *p < from);
        state.current_phase = from;
        state.next_decision = NextDecision::Continue;
        state.pending_interrupt = None;
        // Task-level progress (completed/blocked ids) is only meaningful
        // once phase 3 has run, so any reset at or before it discards that
        // progress along with the phase statuses.
        if from <= 3 {
            state.completed_task_ids.clear();
            state.blocked_task_ids.clear();
        }
        if from == 0 {
            state.errors.clear();
        }
        self.events.publish(ProgressEvent::Reset {
            phase,
            timestamp: Utc::now(),
        });
    }
}

impl ExecutionMode {
    pub fn autonomous(self) -> bool {
        matches!(self, ExecutionMode::Afk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::FileCheckpointer;
    use crate::registry::default_registry;

    fn managers() -> (AgentRegistry, BudgetManager, SessionManager, ErrorContextManager) {
        (
            default_registry(),
            BudgetManager::new(100.0, 10.0, 5.0),
            SessionManager::new(Box::new(crate::session::NullSessionStore), 24),
            ErrorContextManager::new(50),
        )
    }

    #[test]
    fn topological_order_respects_dependencies() {
        let tasks = vec![
            TaskSpec {
                id: "b".into(),
                dependencies: vec!["a".into()],
                ..Default::default()
            },
            TaskSpec {
                id: "a".into(),
                ..Default::default()
            },
        ];
        let order = topological_order(&tasks);
        assert_eq!(order, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn prerequisites_fail_fast_without_agents() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = AgentRegistry::new();
        let budget = BudgetManager::new(10.0, 5.0, 1.0);
        let session = SessionManager::new(Box::new(crate::session::NullSessionStore), 24);
        let errors = ErrorContextManager::new(50);
        let checkpointer = Box::new(FileCheckpointer {
            path: tmp.path().join("checkpoint.json"),
        });
        let runner = WorkflowRunner::new(&registry, &budget, &session, &errors, checkpointer, tmp.path());

        let result = runner
            .run("proj", WorkflowRunConfig::default(), vec![], None)
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.state.next_decision, NextDecision::Abort);
    }

    #[test]
    fn reset_clears_phase_status_from_given_phase() {
        let (registry, budget, session, errors) = managers();
        let tmp = tempfile::tempdir().unwrap();
        let checkpointer = Box::new(FileCheckpointer {
            path: tmp.path().join("checkpoint.json"),
        });
        let runner = WorkflowRunner::new(&registry, &budget, &session, &errors, checkpointer, tmp.path());
        let mut state = WorkflowState::new("proj", tmp.path().to_string_lossy());
        state.merge_phase_status(1, phase_record(NodeStatus::Completed));
        state.merge_phase_status(2, phase_record(NodeStatus::Completed));
        runner.reset(&mut state, Some(2));
        assert!(state.phase_status.contains_key(&1));
        assert!(!state.phase_status.contains_key(&2));
        assert_eq!(state.current_phase, 2);
    }
}
