//! Worktree Manager: isolated sibling working directories for N parallel
//! workers on one repository, merged back atomically (spec §4.12).
//!
//! Grounded on the `worktree_bridge` idiom of shelling out to
//! `git` via `std::process::Command` for short, synchronous plumbing
//! operations rather than a git library binding.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error("not a git repository: {0}")]
    NotARepo(String),
    #[error("git command failed: {0}")]
    GitFailed(String),
}

fn run_git(args: &[&str], cwd: &Path) -> Result<String, WorktreeError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .map_err(|e| WorktreeError::GitFailed(e.to_string()))?;
    if !output.status.success() {
        return Err(WorktreeError::GitFailed(
            String::from_utf8_lossy(&output.stderr).to_string(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[derive(Debug, Clone)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    pub suffix: String,
    pub origin_commit: String,
}

#[derive(Debug, Clone)]
pub struct WorktreeStatus {
    pub commit: String,
    pub dirty: bool,
}

pub struct WorktreeManager {
    project_dir: PathBuf,
    tracked: Mutex<Vec<WorktreeInfo>>,
}

impl WorktreeManager {
    pub fn new(project_dir: impl Into<PathBuf>) -> Result<Self, WorktreeError> {
        let project_dir = project_dir.into();
        run_git(&["rev-parse", "--is-inside-work-tree"], &project_dir)
            .map_err(|_| WorktreeError::NotARepo(project_dir.display().to_string()))?;
        Ok(Self {
            project_dir,
            tracked: Mutex::new(Vec::new()),
        })
    }

    pub fn create(&self, suffix: Option<String>) -> Result<WorktreeInfo, WorktreeError> {
        let suffix = suffix.unwrap_or_else(|| Uuid::new_v4().simple().to_string()[..8].to_string());
        let origin_commit = run_git(&["rev-parse", "HEAD"], &self.project_dir)?;
        let project_name = self
            .project_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "project".to_string());
        let sibling = self
            .project_dir
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(format!("{project_name}-worker-{suffix}"));

        run_git(
            &[
                "worktree",
                "add",
                sibling.to_str().unwrap_or_default(),
                &origin_commit,
            ],
            &self.project_dir,
        )?;

        let info = WorktreeInfo {
            path: sibling,
            suffix,
            origin_commit,
        };
        self.tracked.lock().unwrap().push(info.clone());
        Ok(info)
    }

    pub fn remove(&self, path: &Path, force: bool) -> Result<(), WorktreeError> {
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        let path_str = path.to_str().unwrap_or_default();
        args.push(path_str);
        run_git(&args, &self.project_dir)?;
        self.tracked.lock().unwrap().retain(|w| w.path != path);
        Ok(())
    }

    pub fn cleanup_all(&self, force: bool) -> Result<(), WorktreeError> {
        let tracked = self.tracked.lock().unwrap().clone();
        for w in tracked {
            let _ = self.remove(&w.path, force);
        }
        let _ = run_git(&["worktree", "prune"], &self.project_dir);
        Ok(())
    }

    /// Stage everything, commit (empty-tolerant), cherry-pick into the main
    /// project (empty-tolerant). A cherry-pick-empty outcome is recovered:
    /// we abort cleanly and still return the source commit id.
    pub fn merge(
        &self,
        worktree_path: &Path,
        message: &str,
    ) -> Result<String, WorktreeError> {
        run_git(&["add", "-A"], worktree_path)?;
        // --allow-empty makes the commit step itself empty-tolerant.
        let _ = run_git(&["commit", "--allow-empty", "-m", message], worktree_path);
        let commit_id = run_git(&["rev-parse", "HEAD"], worktree_path)?;

        match run_git(&["cherry-pick", "--allow-empty", &commit_id], &self.project_dir) {
            Ok(_) => Ok(commit_id),
            Err(WorktreeError::GitFailed(msg)) if msg.to_lowercase().contains("empty") => {
                let _ = run_git(&["cherry-pick", "--abort"], &self.project_dir);
                Ok(commit_id)
            }
            Err(e) => Err(e),
        }
    }

    pub fn status(&self, path: &Path) -> Result<WorktreeStatus, WorktreeError> {
        let commit = run_git(&["rev-parse", "HEAD"], path)?;
        let porcelain = run_git(&["status", "--porcelain"], path)?;
        Ok(WorktreeStatus {
            commit,
            dirty: !porcelain.is_empty(),
        })
    }
}

impl Drop for WorktreeManager {
    fn drop(&mut self) {
        let _ = self.cleanup_all(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn init_repo(dir: &Path) {
        StdCommand::new("git").arg("init").arg("-q").current_dir(dir).status().unwrap();
        StdCommand::new("git").args(["config", "user.email", "t@example.com"]).current_dir(dir).status().unwrap();
        StdCommand::new("git").args(["config", "user.name", "t"]).current_dir(dir).status().unwrap();
        std::fs::write(dir.join("a.txt"), "hello").unwrap();
        StdCommand::new("git").args(["add", "-A"]).current_dir(dir).status().unwrap();
        StdCommand::new("git").args(["commit", "-q", "-m", "init"]).current_dir(dir).status().unwrap();
    }

    #[test]
    fn non_repo_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(WorktreeManager::new(dir.path()).is_err());
    }

    #[test]
    fn create_and_cleanup_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let mgr = WorktreeManager::new(dir.path()).unwrap();
        let info = mgr.create(Some("w1".into())).unwrap();
        assert!(info.path.exists());
        mgr.cleanup_all(true).unwrap();
        assert!(!info.path.exists());
    }
}
