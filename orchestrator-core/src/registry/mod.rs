//! Agent Registry: a compile-time-known, immutable catalogue of agent
//! capabilities, reviewer assignments and file-write permissions.
//!
//! Grounded on the `registry::ProviderRegistry` lookup-table
//! pattern (keyed map, `get`/`all`/health-style filters) generalised from
//! model providers to external CLI agents, and on `agent_profile`'s
//! validate-then-return-typed-violation idiom for permission checks.

use ignore::gitignore::GitignoreBuilder;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// The three external CLI families this orchestrator knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CliFamily {
    /// JSON-native, session-resumable, plan-mode and budget-flag capable.
    Claude,
    /// JSON-native but stateless; prompt passed as trailing positional.
    Cursor,
    /// Plain-text completion tokens; prompt passed as trailing positional.
    Gemini,
}

impl CliFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            CliFamily::Claude => "claude",
            CliFamily::Cursor => "cursor",
            CliFamily::Gemini => "gemini",
        }
    }
}

/// An immutable registry entry. See spec §3 `Agent`.
#[derive(Debug, Clone)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub primary_cli: CliFamily,
    pub backup_cli: Option<CliFamily>,
    pub context_file_path: Option<String>,
    pub reviewers: Vec<String>,
    pub fallback_reviewer: Option<String>,
    pub can_write_files: bool,
    pub allowed_paths_globs: Vec<String>,
    pub forbidden_paths_globs: Vec<String>,
    pub max_iterations: u32,
    pub timeout: std::time::Duration,
    pub is_reviewer: bool,
    pub review_specialization: Option<String>,
    pub weight_in_conflicts: f64,
    pub supports_loop: bool,
    pub completion_patterns: Vec<String>,
    pub available_models: Vec<String>,
    pub default_model: Option<String>,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown agent id: {0}")]
    UnknownAgent(String),
}

/// Plain immutable lookup table, built once at process start and shared
/// read-only thereafter (per spec §9 "no global mutable state").
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Agent>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    pub fn register(&mut self, agent: Agent) {
        self.agents.insert(agent.id.clone(), agent);
    }

    pub fn get(&self, id: &str) -> Option<&Agent> {
        self.agents.get(id)
    }

    pub fn all(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    pub fn filter_by_cli(&self, cli: CliFamily) -> Vec<&Agent> {
        self.agents
            .values()
            .filter(|a| a.primary_cli == cli || a.backup_cli == Some(cli))
            .collect()
    }

    /// Reviewer agents assigned to `id`, resolved through the registry.
    pub fn reviewers_of(&self, id: &str) -> Result<Vec<&Agent>, RegistryError> {
        let agent = self
            .agents
            .get(id)
            .ok_or_else(|| RegistryError::UnknownAgent(id.to_string()))?;
        Ok(agent
            .reviewers
            .iter()
            .filter_map(|rid| self.agents.get(rid))
            .collect())
    }

    /// (1) deny if the agent can't write at all; (2) deny on forbidden-glob
    /// match; (3) if allow-globs are non-empty, require a match; (4) else
    /// allow. Glob semantics are gitignore-style `*`/`**`.
    pub fn is_writable_path(&self, id: &str, path: &str) -> Result<bool, RegistryError> {
        let agent = self
            .agents
            .get(id)
            .ok_or_else(|| RegistryError::UnknownAgent(id.to_string()))?;

        if !agent.can_write_files {
            return Ok(false);
        }

        if glob_set_matches(&agent.forbidden_paths_globs, path) {
            return Ok(false);
        }

        if !agent.allowed_paths_globs.is_empty() {
            return Ok(glob_set_matches(&agent.allowed_paths_globs, path));
        }

        Ok(true)
    }
}

fn glob_set_matches(globs: &[String], path: &str) -> bool {
    if globs.is_empty() {
        return false;
    }
    let mut builder = GitignoreBuilder::new(".");
    for g in globs {
        // ignore errors on individual malformed globs; they simply won't match
        let _ = builder.add_line(None, g);
    }
    match builder.build() {
        Ok(set) => set.matched(Path::new(path), false).is_ignore(),
        Err(_) => false,
    }
}

/// Builds the default two-reviewer, cross-family contract the Review Cycle
/// depends on: every non-reviewer agent should have >=2 reviewers drawn
/// from different CLI families when possible.
pub fn default_registry() -> AgentRegistry {
    let mut reg = AgentRegistry::new();

    reg.register(Agent {
        id: "coder-claude".into(),
        name: "Claude coder".into(),
        primary_cli: CliFamily::Claude,
        backup_cli: Some(CliFamily::Cursor),
        context_file_path: Some("CLAUDE.md".into()),
        reviewers: vec!["reviewer-cursor".into(), "reviewer-gemini".into()],
        fallback_reviewer: Some("reviewer-gemini".into()),
        can_write_files: true,
        allowed_paths_globs: vec![],
        forbidden_paths_globs: vec!["**/.workflow/**".into(), "**/.git/**".into()],
        max_iterations: 10,
        timeout: std::time::Duration::from_secs(600),
        is_reviewer: false,
        review_specialization: None,
        weight_in_conflicts: 0.6,
        supports_loop: true,
        completion_patterns: vec!["TASK_COMPLETE".into()],
        available_models: vec!["claude-opus".into(), "claude-sonnet".into()],
        default_model: Some("claude-sonnet".into()),
    });

    reg.register(Agent {
        id: "reviewer-cursor".into(),
        name: "Cursor reviewer".into(),
        primary_cli: CliFamily::Cursor,
        backup_cli: None,
        context_file_path: None,
        reviewers: vec![],
        fallback_reviewer: None,
        can_write_files: false,
        allowed_paths_globs: vec![],
        forbidden_paths_globs: vec!["**".into()],
        max_iterations: 1,
        timeout: std::time::Duration::from_secs(300),
        is_reviewer: true,
        review_specialization: Some("correctness".into()),
        weight_in_conflicts: 0.6,
        supports_loop: false,
        completion_patterns: vec![],
        available_models: vec!["cursor-fast".into()],
        default_model: Some("cursor-fast".into()),
    });

    reg.register(Agent {
        id: "reviewer-gemini".into(),
        name: "Gemini reviewer".into(),
        primary_cli: CliFamily::Gemini,
        backup_cli: None,
        context_file_path: None,
        reviewers: vec![],
        fallback_reviewer: None,
        can_write_files: false,
        allowed_paths_globs: vec![],
        forbidden_paths_globs: vec!["**".into()],
        max_iterations: 1,
        timeout: std::time::Duration::from_secs(300),
        is_reviewer: true,
        review_specialization: Some("security".into()),
        weight_in_conflicts: 0.4,
        supports_loop: false,
        completion_patterns: vec![],
        available_models: vec!["gemini-pro".into()],
        default_model: Some("gemini-pro".into()),
    });

    reg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_agent_lookup_is_none() {
        let reg = AgentRegistry::new();
        assert!(reg.get("nope").is_none());
    }

    #[test]
    fn write_permission_denies_when_cannot_write() {
        let mut reg = AgentRegistry::new();
        reg.register(Agent {
            can_write_files: false,
            ..sample_agent("a")
        });
        assert_eq!(reg.is_writable_path("a", "src/lib.rs").unwrap(), false);
    }

    #[test]
    fn write_permission_denies_forbidden_glob() {
        let mut reg = AgentRegistry::new();
        reg.register(Agent {
            forbidden_paths_globs: vec!["**/secrets/**".into()],
            ..sample_agent("a")
        });
        assert_eq!(
            reg.is_writable_path("a", "project/secrets/key.pem").unwrap(),
            false
        );
        assert_eq!(reg.is_writable_path("a", "project/src/lib.rs").unwrap(), true);
    }

    #[test]
    fn write_permission_requires_allow_glob_match_when_present() {
        let mut reg = AgentRegistry::new();
        reg.register(Agent {
            allowed_paths_globs: vec!["src/**".into()],
            ..sample_agent("a")
        });
        assert_eq!(reg.is_writable_path("a", "src/lib.rs").unwrap(), true);
        assert_eq!(reg.is_writable_path("a", "docs/readme.md").unwrap(), false);
    }

    #[test]
    fn default_registry_gives_every_worker_two_cross_family_reviewers() {
        let reg = default_registry();
        let reviewers = reg.reviewers_of("coder-claude").unwrap();
        assert!(reviewers.len() >= 2);
        let families: std::collections::HashSet<_> =
            reviewers.iter().map(|r| r.primary_cli).collect();
        assert!(families.len() >= 2);
    }

    fn sample_agent(id: &str) -> Agent {
        Agent {
            id: id.into(),
            name: id.into(),
            primary_cli: CliFamily::Claude,
            backup_cli: None,
            context_file_path: None,
            reviewers: vec![],
            fallback_reviewer: None,
            can_write_files: true,
            allowed_paths_globs: vec![],
            forbidden_paths_globs: vec![],
            max_iterations: 5,
            timeout: std::time::Duration::from_secs(60),
            is_reviewer: false,
            review_specialization: None,
            weight_in_conflicts: 0.5,
            supports_loop: true,
            completion_patterns: vec![],
            available_models: vec![],
            default_model: None,
        }
    }
}
