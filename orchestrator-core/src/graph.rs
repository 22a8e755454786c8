//! Workflow Graph: node/edge topology, conditional routing, state
//! reducers, and checkpointing (spec §4.14).
//!
//! Grounded on the `state::SharedStateStore` persist-on-boundary
//! idiom for checkpointing, generalised from an ensemble-task keyspace to
//! `(node, WorkflowState)` tuples, plus a plain data-driven topology table
//! (nodes/edges) so `workflow_definition()` (spec §6) can describe the
//! graph to a UI without re-deriving it from control flow.

use crate::model::{NextDecision, NodeStatus, WorkflowState};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub type NodeId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Default,
    Router,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRunStatus {
    Idle,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl From<NodeStatus> for NodeRunStatus {
    fn from(s: NodeStatus) -> Self {
        match s {
            NodeStatus::Pending => NodeRunStatus::Idle,
            NodeStatus::Running => NodeRunStatus::Running,
            NodeStatus::Completed => NodeRunStatus::Completed,
            NodeStatus::Failed => NodeRunStatus::Failed,
            NodeStatus::Skipped => NodeRunStatus::Skipped,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeData {
    pub label: String,
    pub status: NodeRunStatus,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub phase: u8,
    pub subgraph: Option<String>,
    pub agent: Option<String>,
    pub data: NodeData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeData {
    pub label: String,
    pub condition: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub data: EdgeData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub metadata: serde_json::Value,
}

fn node(id: &str, phase: u8, subgraph: Option<&'static str>, agent: Option<&'static str>, label: &str) -> GraphNode {
    GraphNode {
        id: id.to_string(),
        kind: NodeKind::Default,
        phase,
        subgraph: subgraph.map(|s| s.to_string()),
        agent: agent.map(|s| s.to_string()),
        data: NodeData {
            label: label.to_string(),
            status: NodeRunStatus::Idle,
            description: label.to_string(),
        },
    }
}

fn router_node(id: &str, phase: u8) -> GraphNode {
    GraphNode {
        id: id.to_string(),
        kind: NodeKind::Router,
        phase,
        subgraph: None,
        agent: None,
        data: NodeData {
            label: id.to_string(),
            status: NodeRunStatus::Idle,
            description: format!("routes after {id}"),
        },
    }
}

fn edge(source: &str, target: &str, label: &str, condition: &str) -> GraphEdge {
    GraphEdge {
        source: source.to_string(),
        target: target.to_string(),
        data: EdgeData {
            label: label.to_string(),
            condition: condition.to_string(),
        },
    }
}

/// Builds the static topology described in spec §4.14. Used both to drive
/// phase ordering and to answer `workflow_definition()` (spec §6).
pub fn default_definition() -> WorkflowDefinition {
    let mut nodes = vec![
        node("prerequisites", 0, None, None, "Prerequisites"),
        node("research", 1, Some("research"), None, "Research"),
        node("discuss", 1, None, None, "Discuss"),
        node("planning", 1, None, None, "Planning"),
        node("task_breakdown", 1, None, None, "Task Breakdown"),
        node("validation_review_a", 2, Some("validation"), Some("cursor-family"), "Validation Review A"),
        node("validation_review_b", 2, Some("validation"), Some("gemini-family"), "Validation Review B"),
        node("validation_gate", 2, Some("validation"), None, "Validation Gate"),
        node("implementation", 3, None, Some("claude-family"), "Implementation"),
        node("quality_gates", 3, Some("quality"), None, "Quality Gates"),
        node("verification_review_a", 4, Some("verification"), Some("cursor-family"), "Verification Review A"),
        node("verification_review_b", 4, Some("verification"), Some("gemini-family"), "Verification Review B"),
        node("verification_gate", 4, Some("verification"), None, "Verification Gate"),
        node("completion", 5, None, None, "Completion"),
        node("escalation", 0, None, None, "Escalation"),
        node("error_dispatch", 0, Some("fixer"), None, "Error Dispatch"),
        node("fixer_triage", 0, Some("fixer"), None, "Triage"),
        node("fixer_diagnose", 0, Some("fixer"), None, "Diagnose"),
        node("fixer_research", 0, Some("fixer"), None, "Research Fix"),
        node("fixer_apply", 0, Some("fixer"), None, "Apply Fix"),
        node("fixer_validate", 0, Some("fixer"), None, "Validate Fix"),
        node("fixer_verify", 0, Some("fixer"), None, "Verify Fix"),
    ];
    nodes.push(router_node("after_implementation", 3));
    nodes.push(router_node("after_validation_gate", 2));
    nodes.push(router_node("after_verification_gate", 4));

    let edges = vec![
        edge("prerequisites", "research", "ok", "next_decision == continue"),
        edge("prerequisites", "escalation", "abort", "next_decision == abort"),
        edge("research", "discuss", "", "unconditional"),
        edge("discuss", "planning", "", "unconditional"),
        edge("planning", "task_breakdown", "", "unconditional"),
        edge("task_breakdown", "validation_review_a", "", "unconditional"),
        edge("task_breakdown", "validation_review_b", "", "unconditional"),
        edge("validation_review_a", "validation_gate", "", "fan-in"),
        edge("validation_review_b", "validation_gate", "", "fan-in"),
        edge("validation_gate", "after_validation_gate", "", "router"),
        edge("after_validation_gate", "implementation", "approved", "resolution == approve"),
        edge("after_validation_gate", "task_breakdown", "retry", "resolution == reject"),
        edge("after_validation_gate", "escalation", "conflict", "resolution == escalate"),
        edge("implementation", "quality_gates", "", "unconditional"),
        edge("quality_gates", "after_implementation", "", "router"),
        edge("after_implementation", "verification_review_a", "ok", "next_decision == continue"),
        edge("after_implementation", "error_dispatch", "fail", "next_decision == retry"),
        edge("after_implementation", "escalation", "escalate", "next_decision == escalate"),
        edge("verification_review_a", "verification_gate", "", "fan-in"),
        edge("verification_review_b", "verification_gate", "", "fan-in"),
        edge("verification_gate", "after_verification_gate", "", "router"),
        edge("after_verification_gate", "completion", "approved", "resolution == approve"),
        edge("after_verification_gate", "implementation", "retry", "resolution == reject"),
        edge("after_verification_gate", "escalation", "conflict", "resolution == escalate"),
        edge("error_dispatch", "fixer_triage", "", "unconditional"),
        edge("fixer_triage", "fixer_diagnose", "", "unconditional"),
        edge("fixer_diagnose", "fixer_research", "", "unconditional"),
        edge("fixer_research", "fixer_apply", "", "unconditional"),
        edge("fixer_apply", "fixer_validate", "", "unconditional"),
        edge("fixer_validate", "fixer_verify", "", "unconditional"),
        edge("fixer_verify", "implementation", "healed", "next_decision == continue"),
        edge("fixer_verify", "escalation", "unhealable", "next_decision == escalate"),
    ];

    WorkflowDefinition {
        nodes,
        edges,
        metadata: serde_json::json!({ "phases": 6 }),
    }
}

/// Pure router: next node after the approval-gate nodes, consulted by the
/// runner rather than embedded in node bodies (spec §4.14 "Routers are pure
/// functions of state").
pub fn route_after_gate(state: &WorkflowState, approve: &str, retry: &str, escalate: &str) -> NodeId {
    match state.next_decision {
        NextDecision::Continue => approve.to_string(),
        NextDecision::Retry => retry.to_string(),
        NextDecision::Escalate => escalate.to_string(),
        NextDecision::Abort => "escalation".to_string(),
    }
}

pub fn route_after_implementation(state: &WorkflowState) -> NodeId {
    match state.next_decision {
        NextDecision::Continue => "verification_review_a".to_string(),
        NextDecision::Retry => "error_dispatch".to_string(),
        NextDecision::Escalate | NextDecision::Abort => "escalation".to_string(),
    }
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("io error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serde(String),
}

/// Persists `(node, state)` after every node boundary (spec §4.14). The
/// store is pluggable; this is the file-backed default.
pub trait Checkpointer: Send + Sync {
    fn save(&self, node: &str, state: &WorkflowState) -> Result<(), CheckpointError>;
    fn load_latest(&self) -> Result<Option<(String, WorkflowState)>, CheckpointError>;
}

pub struct FileCheckpointer {
    pub path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointRecord {
    node: String,
    state: WorkflowState,
}

impl Checkpointer for FileCheckpointer {
    fn save(&self, node: &str, state: &WorkflowState) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CheckpointError::Io(e.to_string()))?;
        }
        let record = CheckpointRecord {
            node: node.to_string(),
            state: state.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&record).map_err(|e| CheckpointError::Serde(e.to_string()))?;
        std::fs::write(&self.path, bytes).map_err(|e| CheckpointError::Io(e.to_string()))
    }

    fn load_latest(&self) -> Result<Option<(String, WorkflowState)>, CheckpointError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&self.path).map_err(|e| CheckpointError::Io(e.to_string()))?;
        let record: CheckpointRecord =
            serde_json::from_slice(&bytes).map_err(|e| CheckpointError::Serde(e.to_string()))?;
        Ok(Some((record.node, record.state)))
    }
}

/// Append-only-list / last-writer-wins merge of a partial state update into
/// `base`, refusing to clobber a completed phase (spec §4.14 "State
/// reducers").
pub fn merge_state(base: &mut WorkflowState, errors: Vec<String>, completed_task_ids: Vec<String>) {
    for e in errors {
        base.push_error(e);
    }
    for id in completed_task_ids {
        if !base.completed_task_ids.contains(&id) {
            base.completed_task_ids.push(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_definition_includes_every_phase() {
        let def = default_definition();
        let phases: std::collections::HashSet<u8> = def.nodes.iter().map(|n| n.phase).collect();
        for p in 0..=5u8 {
            assert!(phases.contains(&p), "missing phase {p}");
        }
    }

    #[test]
    fn router_nodes_are_tagged_router_kind() {
        let def = default_definition();
        let router = def.nodes.iter().find(|n| n.id == "after_implementation").unwrap();
        assert_eq!(router.kind, NodeKind::Router);
    }

    #[test]
    fn route_after_gate_maps_decisions() {
        let mut state = WorkflowState::new("p", "/tmp/p");
        state.next_decision = NextDecision::Continue;
        assert_eq!(route_after_gate(&state, "a", "b", "c"), "a");
        state.next_decision = NextDecision::Retry;
        assert_eq!(route_after_gate(&state, "a", "b", "c"), "b");
        state.next_decision = NextDecision::Escalate;
        assert_eq!(route_after_gate(&state, "a", "b", "c"), "c");
    }

    #[test]
    fn checkpoint_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("checkpoint.json");
        let checkpointer = FileCheckpointer { path };
        let state = WorkflowState::new("proj", "/tmp/proj");
        checkpointer.save("planning", &state).unwrap();
        let (node, loaded) = checkpointer.load_latest().unwrap().unwrap();
        assert_eq!(node, "planning");
        assert_eq!(loaded.project_name, "proj");
    }

    #[test]
    fn merge_state_dedupes_completed_tasks() {
        let mut state = WorkflowState::new("p", "/tmp/p");
        state.completed_task_ids.push("t1".into());
        merge_state(&mut state, vec!["err1".into()], vec!["t1".into(), "t2".into()]);
        assert_eq!(state.completed_task_ids, vec!["t1", "t2"]);
        assert_eq!(state.errors, vec!["err1"]);
    }
}
