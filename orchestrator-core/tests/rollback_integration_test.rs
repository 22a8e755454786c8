//! Exercises `rollback_to_phase` and `reset` against a real git repository,
//! the way `git.rs`'s own unit tests shell out to `git` in a tempdir.

use orchestrator_core::model::{NodeStatus, PhaseRecord, WorkflowRunConfig, WorkflowState};
use orchestrator_core::{
    AgentRegistry, BudgetManager, ErrorContextManager, FileCheckpointer, SessionManager,
    SessionStore, WorkflowRunner,
};
use std::process::Command;

struct NullStore;
impl SessionStore for NullStore {
    fn put(&self, _info: &orchestrator_core::SessionInfo) {}
    fn get(&self, _task_id: &str) -> Option<orchestrator_core::SessionInfo> {
        None
    }
    fn delete(&self, _task_id: &str) {}
}

fn git(dir: &std::path::Path, args: &[&str]) {
    let status = Command::new("git").args(args).current_dir(dir).status().unwrap();
    assert!(status.success(), "git {args:?} failed");
}

fn init_repo(dir: &std::path::Path) {
    git(dir, &["init", "-q"]);
    git(dir, &["config", "user.email", "t@example.com"]);
    git(dir, &["config", "user.name", "t"]);
    std::fs::write(dir.join("a.txt"), "v1").unwrap();
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "-q", "-m", "phase 0"]);
}

#[test]
fn rollback_to_phase_resets_git_and_state() {
    let tmp = tempfile::tempdir().unwrap();
    init_repo(tmp.path());
    let head_at_phase_2 = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(tmp.path())
        .output()
        .unwrap();
    let head_at_phase_2 = String::from_utf8_lossy(&head_at_phase_2.stdout).trim().to_string();

    std::fs::write(tmp.path().join("b.txt"), "v2").unwrap();
    git(tmp.path(), &["add", "-A"]);
    git(tmp.path(), &["commit", "-q", "-m", "phase 3 work"]);

    let registry = AgentRegistry::new();
    let budget = BudgetManager::new(10.0, 5.0, 1.0);
    let session = SessionManager::new(Box::new(NullStore), 24);
    let errors = ErrorContextManager::new(50);
    let checkpointer = Box::new(FileCheckpointer {
        path: tmp.path().join(".workflow").join("checkpoint.json"),
    });
    let runner = WorkflowRunner::new(&registry, &budget, &session, &errors, checkpointer, tmp.path());

    let mut state = WorkflowState::new("proj", tmp.path().to_string_lossy());
    state.config = WorkflowRunConfig::default();
    state.current_phase = 3;
    state.phase_commits.insert(2, head_at_phase_2.clone());
    state.merge_phase_status(
        2,
        PhaseRecord {
            status: NodeStatus::Completed,
            ..Default::default()
        },
    );
    state.merge_phase_status(
        3,
        PhaseRecord {
            status: NodeStatus::Completed,
            ..Default::default()
        },
    );
    state.completed_task_ids.push("t1".into());

    runner.rollback_to_phase(&mut state, 2).unwrap();

    let head_now = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(tmp.path())
        .output()
        .unwrap();
    let head_now = String::from_utf8_lossy(&head_now.stdout).trim().to_string();

    assert_eq!(head_now, head_at_phase_2);
    assert!(!tmp.path().join("b.txt").exists());
    assert_eq!(state.current_phase, 2);
    assert!(!state.phase_status.contains_key(&2));
    assert!(state.completed_task_ids.is_empty());
}
