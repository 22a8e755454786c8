//! Cleanup Manager: artifact-lifetime-driven deletion (spec §4.13).
//!
//! Grounded on the resource-bookkeeping idiom shared by this crate's
//! session/harness cleanup helpers: a declarative rule table plus a small
//! set of lifecycle event handlers, each returning a structured result
//! rather than throwing on partial failure.

use crate::model::ArtifactLifetime;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct CleanupRule {
    pub glob_pattern: String,
    pub lifetime: ArtifactLifetime,
    pub max_age_hours: Option<u64>,
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupResult {
    pub files_deleted: Vec<String>,
    pub directories_deleted: Vec<String>,
    pub bytes_freed: u64,
    pub errors: Vec<String>,
    pub timestamp: chrono::DateTime<Utc>,
}

impl CleanupResult {
    fn new() -> Self {
        Self {
            timestamp: Utc::now(),
            ..Default::default()
        }
    }
}

/// The authoritative default rule table from spec §4.13.
pub fn default_rules() -> Vec<CleanupRule> {
    vec![
        CleanupRule {
            glob_pattern: "temp/**".into(),
            lifetime: ArtifactLifetime::Transient,
            max_age_hours: None,
            description: "per-iteration scratch directories".into(),
        },
        CleanupRule {
            glob_pattern: "sessions/**".into(),
            lifetime: ArtifactLifetime::Session,
            max_age_hours: None,
            description: "session artifacts".into(),
        },
        CleanupRule {
            glob_pattern: "messages/archive/**".into(),
            lifetime: ArtifactLifetime::Persistent,
            max_age_hours: Some(168),
            description: "message archives".into(),
        },
        CleanupRule {
            glob_pattern: "history/**".into(),
            lifetime: ArtifactLifetime::Persistent,
            max_age_hours: Some(168),
            description: "task history".into(),
        },
        CleanupRule {
            glob_pattern: "boards/archive/**".into(),
            lifetime: ArtifactLifetime::Persistent,
            max_age_hours: Some(720),
            description: "board archives".into(),
        },
        CleanupRule {
            glob_pattern: "audit/**".into(),
            lifetime: ArtifactLifetime::Permanent,
            max_age_hours: None,
            description: "audit trail".into(),
        },
        CleanupRule {
            glob_pattern: "phases/**".into(),
            lifetime: ArtifactLifetime::Permanent,
            max_age_hours: None,
            description: "phase-completion records".into(),
        },
    ]
}

pub struct CleanupManager {
    workflow_dir: PathBuf,
    rules: Vec<CleanupRule>,
    pub dry_run: bool,
}

impl CleanupManager {
    pub fn new(workflow_dir: impl Into<PathBuf>) -> Self {
        Self {
            workflow_dir: workflow_dir.into(),
            rules: default_rules(),
            dry_run: false,
        }
    }

    fn remove_dir(&self, path: &Path, result: &mut CleanupResult) {
        if !path.exists() {
            return;
        }
        if self.dry_run {
            result.directories_deleted.push(path.display().to_string());
            return;
        }
        let bytes = dir_size(path);
        match std::fs::remove_dir_all(path) {
            Ok(()) => {
                result.directories_deleted.push(path.display().to_string());
                result.bytes_freed += bytes;
            }
            Err(e) => result.errors.push(format!("{}: {e}", path.display())),
        }
    }

    pub fn on_agent_complete(&self, agent_id: &str, task_id: &str) -> CleanupResult {
        let mut result = CleanupResult::new();
        let dir = self.workflow_dir.join("temp").join(task_id).join(agent_id);
        self.remove_dir(&dir, &mut result);
        result
    }

    pub fn on_task_done(&self, task_id: &str, archive: bool) -> CleanupResult {
        let mut result = CleanupResult::new();
        if archive {
            let history_dir = self.workflow_dir.join("history");
            let summary = serde_json::json!({ "task_id": task_id, "archived_at": Utc::now() });
            if !self.dry_run {
                if let Err(e) = std::fs::create_dir_all(&history_dir) {
                    result.errors.push(e.to_string());
                } else {
                    let path = history_dir.join(format!("{task_id}.json"));
                    if let Err(e) = std::fs::write(&path, summary.to_string()) {
                        result.errors.push(e.to_string());
                    }
                }
            }
        }
        self.remove_dir(&self.workflow_dir.join("temp").join(task_id), &mut result);
        self.remove_dir(&self.workflow_dir.join("sessions").join(task_id), &mut result);
        result
    }

    pub fn scheduled_cleanup(&self) -> CleanupResult {
        let mut result = CleanupResult::new();
        for rule in self.rules.iter().filter(|r| r.lifetime == ArtifactLifetime::Persistent) {
            let Some(max_age) = rule.max_age_hours else {
                continue;
            };
            let base = self.workflow_dir.join(rule.glob_pattern.trim_end_matches("/**"));
            if !base.exists() {
                continue;
            }
            let Ok(entries) = std::fs::read_dir(&base) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if let Ok(meta) = entry.metadata() {
                    if let Ok(modified) = meta.modified() {
                        let age_hours = modified
                            .elapsed()
                            .map(|d| d.as_secs() / 3600)
                            .unwrap_or(0);
                        if age_hours > max_age {
                            if self.dry_run {
                                result.files_deleted.push(path.display().to_string());
                            } else if meta.is_dir() {
                                self.remove_dir(&path, &mut result);
                            } else if std::fs::remove_file(&path).is_ok() {
                                result.files_deleted.push(path.display().to_string());
                                result.bytes_freed += meta.len();
                            }
                        }
                    }
                }
            }
        }
        result
    }
}

fn dir_size(path: &Path) -> u64 {
    walk_size(path).unwrap_or(0)
}

fn walk_size(path: &Path) -> std::io::Result<u64> {
    let mut total = 0;
    if path.is_dir() {
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if meta.is_dir() {
                total += walk_size(&entry.path())?;
            } else {
                total += meta.len();
            }
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_agent_complete_deletes_transient_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let workflow_dir = tmp.path().join(".workflow");
        let agent_dir = workflow_dir.join("temp").join("t1").join("agent-a");
        std::fs::create_dir_all(&agent_dir).unwrap();
        std::fs::write(agent_dir.join("scratch.txt"), "x").unwrap();

        let mgr = CleanupManager::new(&workflow_dir);
        let result = mgr.on_agent_complete("agent-a", "t1");
        assert!(!agent_dir.exists());
        assert_eq!(result.directories_deleted.len(), 1);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn dry_run_reports_without_deleting() {
        let tmp = tempfile::tempdir().unwrap();
        let workflow_dir = tmp.path().join(".workflow");
        let agent_dir = workflow_dir.join("temp").join("t1").join("agent-a");
        std::fs::create_dir_all(&agent_dir).unwrap();

        let mut mgr = CleanupManager::new(&workflow_dir);
        mgr.dry_run = true;
        let result = mgr.on_agent_complete("agent-a", "t1");
        assert!(agent_dir.exists());
        assert_eq!(result.directories_deleted.len(), 1);
    }

    #[test]
    fn on_task_done_archives_then_deletes() {
        let tmp = tempfile::tempdir().unwrap();
        let workflow_dir = tmp.path().join(".workflow");
        std::fs::create_dir_all(workflow_dir.join("temp").join("t1")).unwrap();
        std::fs::create_dir_all(workflow_dir.join("sessions").join("t1")).unwrap();

        let mgr = CleanupManager::new(&workflow_dir);
        mgr.on_task_done("t1", true);
        assert!(workflow_dir.join("history").join("t1.json").exists());
        assert!(!workflow_dir.join("temp").join("t1").exists());
    }
}
