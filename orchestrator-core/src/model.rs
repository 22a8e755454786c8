//! Shared data model for the workflow orchestrator.
//!
//! These types are produced and consumed across component boundaries
//! (registry, adapters, verifiers, session/error/budget managers, the
//! review cycle and the workflow graph) so they live in one place rather
//! than duplicated per owner.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Status of a single workflow node/phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub status: NodeStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub iteration_count: u32,
    pub error: Option<String>,
}

impl Default for PhaseRecord {
    fn default() -> Self {
        Self {
            status: NodeStatus::Pending,
            started_at: None,
            ended_at: None,
            iteration_count: 0,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Hitl,
    Afk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextDecision {
    Continue,
    Retry,
    Escalate,
    Abort,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub files_to_create: Vec<String>,
    #[serde(default)]
    pub files_to_modify: Vec<String>,
    #[serde(default)]
    pub test_files: Vec<String>,
    pub assigned_agent_id: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Feedback from prior review-cycle iterations, carried forward so the
    /// working agent can see what it must fix.
    #[serde(default)]
    pub previous_feedback: Vec<ReviewFeedback>,
    /// JSON Schema the Agent Dispatcher validates agent output against
    /// (spec §4.8 step 7), when the task configures one.
    #[serde(default)]
    pub output_schema: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    pub tasks: Vec<TaskSpec>,
}

/// Interrupt payloads the graph can suspend on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PendingInterrupt {
    Escalation {
        phase: u8,
        issue: String,
        error_type: String,
        suggested_actions: Vec<String>,
        clarifications: Vec<String>,
        context: serde_json::Value,
        retry_count: u32,
        max_retries: u32,
    },
    ApprovalRequired {
        phase: u8,
        approval_type: String,
        summary: String,
        details: serde_json::Value,
        scores: Vec<f64>,
        files_changed: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HumanAction {
    Retry,
    Skip,
    Continue,
    AnswerClarification,
    Abort,
    Approve,
    Reject,
    RequestChanges,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanResponse {
    pub action: HumanAction,
    #[serde(default)]
    pub answers: HashMap<String, String>,
    pub feedback: Option<String>,
    pub reason: Option<String>,
}

/// Project/workflow-wide configuration carried in [`WorkflowState::config`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRunConfig {
    pub start_phase: u8,
    pub end_phase: u8,
    pub skip_validation: bool,
    pub project_budget_usd: f64,
    pub task_budget_usd: f64,
    pub invocation_budget_usd: f64,
}

impl Default for WorkflowRunConfig {
    fn default() -> Self {
        Self {
            start_phase: 0,
            end_phase: 5,
            skip_validation: false,
            project_budget_usd: 50.0,
            task_budget_usd: 5.0,
            invocation_budget_usd: 1.0,
        }
    }
}

/// The shared, reducer-merged state that flows through every workflow graph
/// node. See spec §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub project_name: String,
    pub project_dir: String,
    pub current_phase: u8,
    pub phase_status: HashMap<u8, PhaseRecord>,
    pub plan: Plan,
    pub tasks: HashMap<String, TaskSpec>,
    pub completed_task_ids: Vec<String>,
    pub blocked_task_ids: Vec<String>,
    pub current_task_id: Option<String>,
    pub validation_feedback: HashMap<String, ReviewFeedback>,
    pub verification_feedback: HashMap<String, ReviewFeedback>,
    pub next_decision: NextDecision,
    pub errors: Vec<String>,
    pub execution_mode: ExecutionMode,
    pub pending_interrupt: Option<PendingInterrupt>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub config: WorkflowRunConfig,
    /// Commit id recorded at the start of each phase, used by
    /// `rollback_to_phase` to reset the repository and the state together.
    #[serde(default)]
    pub phase_commits: HashMap<u8, String>,
}

impl WorkflowState {
    pub fn new(project_name: impl Into<String>, project_dir: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            project_dir: project_dir.into(),
            current_phase: 0,
            phase_status: HashMap::new(),
            plan: Plan::default(),
            tasks: HashMap::new(),
            completed_task_ids: Vec::new(),
            blocked_task_ids: Vec::new(),
            current_task_id: None,
            validation_feedback: HashMap::new(),
            verification_feedback: HashMap::new(),
            next_decision: NextDecision::Continue,
            errors: Vec::new(),
            execution_mode: ExecutionMode::Hitl,
            pending_interrupt: None,
            retry_count: 0,
            max_retries: 3,
            config: WorkflowRunConfig::default(),
            phase_commits: HashMap::new(),
        }
    }

    /// Bounded append to the error log; unbounded growth is a defect, so we
    /// cap at a generous but finite size.
    pub fn push_error(&mut self, err: impl Into<String>) {
        const MAX_ERRORS: usize = 500;
        self.errors.push(err.into());
        if self.errors.len() > MAX_ERRORS {
            let overflow = self.errors.len() - MAX_ERRORS;
            self.errors.drain(0..overflow);
        }
    }

    /// Per-phase reducer: never let a non-`failed` write clobber `completed`.
    pub fn merge_phase_status(&mut self, phase: u8, incoming: PhaseRecord) {
        match self.phase_status.get(&phase) {
            Some(existing)
                if existing.status == NodeStatus::Completed
                    && incoming.status != NodeStatus::Failed =>
            {
                // refuse to overwrite a completed phase with anything but a failure
            }
            _ => {
                self.phase_status.insert(phase, incoming);
            }
        }
    }
}

/// One CLI family's invocation outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationResult {
    pub success: bool,
    pub raw_output: String,
    pub parsed_output: Option<serde_json::Value>,
    pub completion_detected: bool,
    pub exit_code: i32,
    pub duration: std::time::Duration,
    pub error: Option<String>,
    pub files_changed: Vec<String>,
    pub session_id: Option<String>,
    pub cost_usd: Option<f64>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationKind {
    Tests,
    Lint,
    Security,
    Composite,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub passed: bool,
    pub kind: VerificationKind,
    pub summary: String,
    pub failures: Vec<String>,
    pub warnings: Vec<String>,
    pub duration: std::time::Duration,
    pub raw_output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub task_id: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub iteration: u32,
    pub is_active: bool,
    pub ttl_hours: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClassification {
    Timeout,
    SyntaxError,
    ImportError,
    TypeError,
    TestFailure,
    BuildFailure,
    LintError,
    SecurityIssue,
    ClarificationNeeded,
    RuntimeError,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub id: String,
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
    pub attempt: u32,
    pub classification: ErrorClassification,
    pub message: String,
    pub stdout_excerpt: String,
    pub stderr_excerpt: String,
    pub files_involved: Vec<String>,
    pub stack_trace: Option<String>,
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpendRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub task_id: String,
    pub agent: String,
    pub cost_usd: f64,
    pub model: Option<String>,
    pub tokens: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewFeedback {
    pub reviewer_id: String,
    pub cli: String,
    pub approved: bool,
    pub score: f64,
    pub blocking_issues: Vec<String>,
    pub suggestions: Vec<String>,
    pub security_findings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    Approve,
    Reject,
    Escalate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub approved: bool,
    pub final_score: f64,
    pub decision_reason: String,
    pub blocking_issues: Vec<String>,
    pub action: ResolutionAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRequest {
    pub task_id: String,
    pub reason: String,
    pub context: serde_json::Value,
    pub attempts_made: u32,
    pub options: Vec<String>,
    pub recommendation: Option<String>,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worktree {
    pub path: String,
    pub suffix: String,
    pub origin_commit: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactLifetime {
    Transient,
    Session,
    Persistent,
    Permanent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_status_reducer_refuses_to_clobber_completed() {
        let mut state = WorkflowState::new("proj", "/tmp/proj");
        state.merge_phase_status(
            1,
            PhaseRecord {
                status: NodeStatus::Completed,
                ..Default::default()
            },
        );
        state.merge_phase_status(
            1,
            PhaseRecord {
                status: NodeStatus::Running,
                ..Default::default()
            },
        );
        assert_eq!(state.phase_status[&1].status, NodeStatus::Completed);

        state.merge_phase_status(
            1,
            PhaseRecord {
                status: NodeStatus::Failed,
                ..Default::default()
            },
        );
        assert_eq!(state.phase_status[&1].status, NodeStatus::Failed);
    }

    #[test]
    fn error_log_is_bounded() {
        let mut state = WorkflowState::new("proj", "/tmp/proj");
        for i in 0..600 {
            state.push_error(format!("err-{i}"));
        }
        assert_eq!(state.errors.len(), 500);
        assert_eq!(state.errors.first().unwrap(), "err-100");
    }

    #[test]
    fn serde_round_trip_session_info() {
        let info = SessionInfo {
            session_id: "s1".into(),
            task_id: "t1".into(),
            created_at: Utc::now(),
            last_used_at: Utc::now(),
            iteration: 2,
            is_active: true,
            ttl_hours: 24,
        };
        let json = serde_json::to_string(&info).unwrap();
        let back: SessionInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back.session_id, info.session_id);
        assert_eq!(back.task_id, info.task_id);
        assert_eq!(back.iteration, info.iteration);
    }
}
