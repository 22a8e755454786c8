//! CLI configuration: a TOML file under the project directory, overridden
//! by the subcommand's own flags (spec §4.15, SPEC_FULL.md §1 ambient config).

use orchestrator_core::WorkflowRunConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub start_phase: u8,
    pub end_phase: u8,
    pub skip_validation: bool,
    pub autonomous: bool,
    pub project_budget_usd: f64,
    pub task_budget_usd: f64,
    pub invocation_budget_usd: f64,
    pub session_ttl_hours: u32,
    pub error_log_cap: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        let defaults = WorkflowRunConfig::default();
        Self {
            start_phase: defaults.start_phase,
            end_phase: defaults.end_phase,
            skip_validation: defaults.skip_validation,
            autonomous: false,
            project_budget_usd: defaults.project_budget_usd,
            task_budget_usd: defaults.task_budget_usd,
            invocation_budget_usd: defaults.invocation_budget_usd,
            session_ttl_hours: 24,
            error_log_cap: 50,
        }
    }
}

impl OrchestratorConfig {
    /// Loads `<project_dir>/orchestrator.toml` if present, else defaults.
    pub fn load(project_dir: &Path) -> anyhow::Result<Self> {
        let path = project_dir.join("orchestrator.toml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)?;
        let cfg: Self = toml::from_str(&raw)?;
        Ok(cfg)
    }

    pub fn workflow_run_config(&self) -> WorkflowRunConfig {
        WorkflowRunConfig {
            start_phase: self.start_phase,
            end_phase: self.end_phase,
            skip_validation: self.skip_validation,
            project_budget_usd: self.project_budget_usd,
            task_budget_usd: self.task_budget_usd,
            invocation_budget_usd: self.invocation_budget_usd,
        }
    }

    pub fn checkpoint_path(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(".workflow").join("checkpoint.json")
    }

    pub fn escalations_dir(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(".workflow").join("escalations")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_workflow_run_config_defaults() {
        let cfg = OrchestratorConfig::default();
        let wrc = cfg.workflow_run_config();
        assert_eq!(wrc.start_phase, 0);
        assert_eq!(wrc.end_phase, 5);
        assert!(!wrc.skip_validation);
    }

    #[test]
    fn load_parses_toml_overrides() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("orchestrator.toml"),
            "end_phase = 3\nskip_validation = true\nproject_budget_usd = 25.0\n",
        )
        .unwrap();
        let cfg = OrchestratorConfig::load(tmp.path()).unwrap();
        assert_eq!(cfg.end_phase, 3);
        assert!(cfg.skip_validation);
        assert_eq!(cfg.project_budget_usd, 25.0);
        assert_eq!(cfg.start_phase, 0); // untouched field keeps its default
    }

    #[test]
    fn load_without_file_returns_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = OrchestratorConfig::load(tmp.path()).unwrap();
        assert_eq!(cfg.end_phase, 5);
    }
}
