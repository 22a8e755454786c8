//! Thin git plumbing shared by the Worktree Manager and per-phase commit
//! recording (`rollback_to_phase`).
//!
//! Grounded on the `worktree_bridge` style of shelling out to
//! `git` synchronously rather than binding a git library.

use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git command failed: {0}")]
    CommandFailed(String),
}

fn run(args: &[&str], cwd: &Path) -> Result<String, GitError> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .map_err(|e| GitError::CommandFailed(e.to_string()))?;
    if !output.status.success() {
        return Err(GitError::CommandFailed(
            String::from_utf8_lossy(&output.stderr).to_string(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

pub struct GitRepo {
    pub dir: PathBuf,
}

impl GitRepo {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn current_head(&self) -> Result<String, GitError> {
        run(&["rev-parse", "HEAD"], &self.dir)
    }

    /// Stages everything and commits; empty-tolerant like the worktree
    /// manager's merge step.
    pub fn commit_all(&self, message: &str) -> Result<String, GitError> {
        run(&["add", "-A"], &self.dir)?;
        let _ = run(&["commit", "--allow-empty", "-m", message], &self.dir);
        self.current_head()
    }

    pub fn diff_stat(&self, from: &str, to: &str) -> Result<String, GitError> {
        run(&["diff", "--stat", from, to], &self.dir)
    }

    /// Hard-resets the working tree to `commit`. Used by `rollback_to_phase`.
    pub fn reset_hard(&self, commit: &str) -> Result<(), GitError> {
        run(&["reset", "--hard", commit], &self.dir)?;
        Ok(())
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
    fn current_head_and_commit_all_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        let repo = GitRepo::new(tmp.path());
        let head1 = repo.current_head().unwrap();
        std::fs::write(tmp.path().join("b.txt"), "world").unwrap();
        let head2 = repo.commit_all("second commit").unwrap();
        assert_ne!(head1, head2);
    }

    #[test]
    fn reset_hard_restores_prior_commit() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        let repo = GitRepo::new(tmp.path());
        let head1 = repo.current_head().unwrap();
        std::fs::write(tmp.path().join("b.txt"), "world").unwrap();
        repo.commit_all("second").unwrap();
        repo.reset_hard(&head1).unwrap();
        assert_eq!(repo.current_head().unwrap(), head1);
    }
}
