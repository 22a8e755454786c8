//! Agent Dispatcher: one-shot agent invocation for single-pass work
//! (planners, reviewers) as opposed to the iterative Unified Loop Runner
//! (spec §4.8).
//!
//! Grounded on the `notebook_bridge` invoke-then-parse pattern,
//! reused here directly via the `adapter` module's subprocess plumbing,
//! with the registry's write-permission predicate added as a pre-flight
//! gate the prior version of this idiom lacked.

use crate::adapter::{create_adapter, Adapter, AdapterRequest};
use crate::model::{IterationResult, ReviewFeedback, TaskSpec};
use crate::registry::{AgentRegistry, CliFamily};
use futures::future::join_all;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("task {task_id} assigned to agent {agent_id} is invalid: {reason}")]
    InvalidTaskAssignment {
        task_id: String,
        agent_id: String,
        reason: String,
    },
    #[error("agent {agent_id} produced invalid output: {errors:?}")]
    InvalidAgentOutput { agent_id: String, errors: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Completed,
    Partial,
    Failed,
    Blocked,
    NeedsClarification,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DispatchResult {
    pub task_id: String,
    pub agent_id: String,
    pub status: DispatchStatus,
    pub output: Value,
    pub files_created: Vec<String>,
    pub files_modified: Vec<String>,
    pub execution_time: Duration,
    pub cli_used: CliFamily,
    pub iteration: u32,
    pub error: Option<String>,
    pub needs_review: bool,
}

pub struct AgentDispatcher<'a> {
    pub registry: &'a AgentRegistry,
    pub project_dir: PathBuf,
}

impl<'a> AgentDispatcher<'a> {
    pub fn new(registry: &'a AgentRegistry, project_dir: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            project_dir: project_dir.into(),
        }
    }

    fn build_prompt(&self, agent_context: &str, task: &TaskSpec, iteration: u32, is_reviewer: bool) -> String {
        let mut prompt = String::new();
        if !agent_context.is_empty() {
            prompt.push_str(agent_context);
            prompt.push_str("\n\n");
        }
        prompt.push_str(&format!("# Task: {}\n\n{}\n\n", task.title, task.description));
        if !task.acceptance_criteria.is_empty() {
            prompt.push_str("## Acceptance Criteria\n");
            for c in &task.acceptance_criteria {
                prompt.push_str(&format!("- {c}\n"));
            }
            prompt.push('\n');
        }
        if !task.files_to_create.is_empty() {
            prompt.push_str(&format!("## Files to create\n{}\n\n", task.files_to_create.join(", ")));
        }
        if !task.files_to_modify.is_empty() {
            prompt.push_str(&format!("## Files to modify\n{}\n\n", task.files_to_modify.join(", ")));
        }
        if !task.test_files.is_empty() {
            prompt.push_str(&format!("## Test files\n{}\n\n", task.test_files.join(", ")));
        }
        if iteration > 1 && !task.previous_feedback.is_empty() {
            prompt.push_str("## Previous feedback\n");
            for fb in &task.previous_feedback {
                prompt.push_str(&format!(
                    "- [{}] score={} issues={:?} suggestions={:?}\n",
                    fb.reviewer_id, fb.score, fb.blocking_issues, fb.suggestions
                ));
            }
            prompt.push('\n');
        }
        if is_reviewer {
            prompt.push_str("Respond with JSON including `score` (0-10) and `approved` (bool).\n");
        } else {
            prompt.push_str("Emit your completion sentinel once the task is fully done.\n");
        }
        prompt
    }

    /// Best-effort JSON Schema check (spec §4.8 step 7): validates `"type"`
    /// and `"required"` against `output`, logging and skipping any other
    /// keyword rather than failing on it, since no full validator crate is
    /// in the dependency stack.
    fn validate_against_schema(output: &Value, schema: &Value) -> Vec<String> {
        let mut errors = Vec::new();
        let Some(schema_obj) = schema.as_object() else {
            return errors;
        };

        if let Some(expected_type) = schema_obj.get("type").and_then(|v| v.as_str()) {
            let actual_type = match output {
                Value::Null => "null",
                Value::Bool(_) => "boolean",
                Value::Number(_) => "number",
                Value::String(_) => "string",
                Value::Array(_) => "array",
                Value::Object(_) => "object",
            };
            if expected_type != actual_type {
                errors.push(format!("expected type \"{expected_type}\", got \"{actual_type}\""));
            }
        }

        if let Some(required) = schema_obj.get("required").and_then(|v| v.as_array()) {
            for key in required.iter().filter_map(|v| v.as_str()) {
                let present = output.get(key).is_some();
                if !present {
                    errors.push(format!("missing required field \"{key}\""));
                }
            }
        }

        for keyword in schema_obj.keys() {
            if keyword != "type" && keyword != "required" {
                tracing::debug!(keyword, "skipping unsupported schema keyword");
            }
        }

        errors
    }

    /// Splits the adapter's merged `files_changed` into created/modified
    /// buckets (spec §4.8 step 8), preferring the agent's own
    /// `files_created`/`files_modified` arrays when it reported them and
    /// falling back to treating the merged list as all-created otherwise.
    fn split_changed_files(output: &Value, files_changed: &[String]) -> (Vec<String>, Vec<String>) {
        fn string_array(output: &Value, key: &str) -> Option<Vec<String>> {
            output
                .get(key)
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter_map(|x| x.as_str().map(String::from)).collect())
        }

        let created = string_array(output, "files_created");
        let modified = string_array(output, "files_modified");
        match (created, modified) {
            (None, None) => (files_changed.to_vec(), vec![]),
            (created, modified) => (created.unwrap_or_default(), modified.unwrap_or_default()),
        }
    }

    fn parse_output(raw: &str) -> Value {
        if let Ok(v) = serde_json::from_str::<Value>(raw) {
            return v;
        }
        if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
            if end > start {
                if let Ok(v) = serde_json::from_str::<Value>(&raw[start..=end]) {
                    return v;
                }
            }
        }
        serde_json::json!({ "raw_output": raw })
    }

    async fn invoke_once(
        &self,
        family: CliFamily,
        prompt: String,
        timeout: Duration,
        model: Option<String>,
    ) -> IterationResult {
        let adapter: Box<dyn Adapter> = create_adapter(family, self.project_dir.clone(), model);
        let req = AdapterRequest {
            prompt,
            ..Default::default()
        };
        adapter
            .run_iteration(req, timeout)
            .await
            .unwrap_or_else(|e| IterationResult {
                success: false,
                raw_output: String::new(),
                parsed_output: None,
                completion_detected: false,
                exit_code: -1,
                duration: Duration::from_secs(0),
                error: Some(e.to_string()),
                files_changed: vec![],
                session_id: None,
                cost_usd: None,
                model: None,
            })
    }

    /// Dispatches `task` to `agent_id`, validating write-permission for
    /// every declared output file before invocation.
    pub async fn dispatch(
        &self,
        agent_id: &str,
        task: &TaskSpec,
        iteration: u32,
        use_backup: bool,
        agent_context: &str,
        timeout: Duration,
    ) -> Result<DispatchResult, DispatchError> {
        let agent = self
            .registry
            .get(agent_id)
            .ok_or_else(|| DispatchError::InvalidTaskAssignment {
                task_id: task.id.clone(),
                agent_id: agent_id.to_string(),
                reason: "unknown agent id".into(),
            })?;

        for path in task.files_to_create.iter().chain(task.files_to_modify.iter()) {
            let writable = self
                .registry
                .is_writable_path(agent_id, path)
                .map_err(|e| DispatchError::InvalidTaskAssignment {
                    task_id: task.id.clone(),
                    agent_id: agent_id.to_string(),
                    reason: e.to_string(),
                })?;
            if !writable {
                return Err(DispatchError::InvalidTaskAssignment {
                    task_id: task.id.clone(),
                    agent_id: agent_id.to_string(),
                    reason: format!("agent may not write {path}"),
                });
            }
        }

        let family = if use_backup {
            agent.backup_cli.unwrap_or(agent.primary_cli)
        } else {
            agent.primary_cli
        };

        let prompt = self.build_prompt(agent_context, task, iteration, agent.is_reviewer);
        let started = std::time::Instant::now();
        let mut result = self
            .invoke_once(family, prompt.clone(), timeout, agent.default_model.clone())
            .await;

        if !result.success && !use_backup && agent.backup_cli.is_some() {
            result = self
                .invoke_once(agent.backup_cli.unwrap(), prompt, timeout, agent.default_model.clone())
                .await;
        }

        let output = Self::parse_output(&result.raw_output);

        if let Some(schema) = &task.output_schema {
            let errors = Self::validate_against_schema(&output, schema);
            if !errors.is_empty() {
                return Err(DispatchError::InvalidAgentOutput {
                    agent_id: agent_id.to_string(),
                    errors,
                });
            }
        }

        let status = if !result.success {
            DispatchStatus::Failed
        } else if output.get("needs_clarification").and_then(|v| v.as_bool()) == Some(true) {
            DispatchStatus::NeedsClarification
        } else if result.completion_detected || output.get("approved").is_some() {
            DispatchStatus::Completed
        } else {
            DispatchStatus::Partial
        };

        let (files_created, files_modified) = Self::split_changed_files(&output, &result.files_changed);

        Ok(DispatchResult {
            task_id: task.id.clone(),
            agent_id: agent_id.to_string(),
            status,
            output,
            files_created,
            files_modified,
            execution_time: started.elapsed(),
            cli_used: family,
            iteration,
            error: result.error,
            needs_review: !agent.is_reviewer,
        })
    }

    /// Reviewer dispatch, parsed into a [`ReviewFeedback`] rather than a
    /// raw [`DispatchResult`]; used by the Review Cycle's fan-out.
    pub async fn dispatch_review(
        &self,
        reviewer_id: &str,
        task: &TaskSpec,
        agent_output: &Value,
        files_created: &[String],
        files_modified: &[String],
        iteration: u32,
        timeout: Duration,
    ) -> ReviewFeedback {
        let checklist = "Evaluate: correctness, test coverage, code quality, security, \
            performance, error handling. Respond with JSON {score, approved, blocking_issues[], \
            suggestions[], security_findings[]}.";
        let payload = serde_json::json!({
            "task_id": task.id,
            "title": task.title,
            "files_created": files_created,
            "files_modified": files_modified,
            "agent_output": agent_output,
            "iteration": iteration,
        });
        let prompt = format!("{checklist}\n\n{payload}");

        let agent = match self.registry.get(reviewer_id) {
            Some(a) => a,
            None => {
                return ReviewFeedback {
                    reviewer_id: reviewer_id.to_string(),
                    cli: "unknown".into(),
                    approved: false,
                    score: 0.0,
                    blocking_issues: vec!["unknown reviewer id".into()],
                    suggestions: vec![],
                    security_findings: vec![],
                }
            }
        };

        let result = self
            .invoke_once(agent.primary_cli, prompt, timeout, agent.default_model.clone())
            .await;

        if !result.success {
            return ReviewFeedback {
                reviewer_id: reviewer_id.to_string(),
                cli: agent.primary_cli.as_str().to_string(),
                approved: false,
                score: 0.0,
                blocking_issues: vec![result.error.unwrap_or_else(|| "reviewer invocation failed".into())],
                suggestions: vec![],
                security_findings: vec![],
            };
        }

        let parsed = Self::parse_output(&result.raw_output);
        ReviewFeedback {
            reviewer_id: reviewer_id.to_string(),
            cli: agent.primary_cli.as_str().to_string(),
            approved: parsed.get("approved").and_then(|v| v.as_bool()).unwrap_or(false),
            score: parsed.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0),
            blocking_issues: parsed
                .get("blocking_issues")
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter_map(|x| x.as_str().map(String::from)).collect())
                .unwrap_or_default(),
            suggestions: parsed
                .get("suggestions")
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter_map(|x| x.as_str().map(String::from)).collect())
                .unwrap_or_default(),
            security_findings: parsed
                .get("security_findings")
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter_map(|x| x.as_str().map(String::from)).collect())
                .unwrap_or_default(),
        }
    }

    /// Fan-out dispatch; a failing future becomes a failed [`DispatchResult`]
    /// rather than aborting the whole batch.
    pub async fn dispatch_parallel(
        &self,
        assignments: Vec<(String, TaskSpec)>,
        timeout: Duration,
    ) -> Vec<DispatchResult> {
        let futures = assignments.into_iter().map(|(agent_id, task)| {
            let agent_id2 = agent_id.clone();
            let task2 = task.clone();
            async move {
                match self.dispatch(&agent_id, &task, 1, false, "", timeout).await {
                    Ok(result) => result,
                    Err(e) => DispatchResult {
                        task_id: task2.id,
                        agent_id: agent_id2,
                        status: DispatchStatus::Failed,
                        output: Value::Null,
                        files_created: vec![],
                        files_modified: vec![],
                        execution_time: Duration::from_secs(0),
                        cli_used: CliFamily::Claude,
                        iteration: 1,
                        error: Some(e.to_string()),
                        needs_review: false,
                    },
                }
            }
        });
        join_all(futures).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{default_registry, Agent};

    fn sample_task() -> TaskSpec {
        TaskSpec {
            id: "t1".into(),
            title: "Add feature".into(),
            description: "implement it".into(),
            files_to_create: vec!["src/feature.rs".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn dispatch_rejects_unknown_agent() {
        let reg = default_registry();
        let dispatcher = AgentDispatcher::new(&reg, ".");
        let result = dispatcher
            .dispatch("nope", &sample_task(), 1, false, "", Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(DispatchError::InvalidTaskAssignment { .. })));
    }

    #[tokio::test]
    async fn dispatch_rejects_forbidden_write_path() {
        let mut reg = AgentRegistry::new();
        reg.register(Agent {
            id: "a".into(),
            name: "a".into(),
            primary_cli: CliFamily::Claude,
            backup_cli: None,
            context_file_path: None,
            reviewers: vec![],
            fallback_reviewer: None,
            can_write_files: true,
            allowed_paths_globs: vec![],
            forbidden_paths_globs: vec!["src/**".into()],
            max_iterations: 5,
            timeout: Duration::from_secs(60),
            is_reviewer: false,
            review_specialization: None,
            weight_in_conflicts: 0.5,
            supports_loop: true,
            completion_patterns: vec![],
            available_models: vec![],
            default_model: None,
        });
        let dispatcher = AgentDispatcher::new(&reg, ".");
        let result = dispatcher
            .dispatch("a", &sample_task(), 1, false, "", Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(DispatchError::InvalidTaskAssignment { .. })));
    }

    #[test]
    fn parse_output_falls_back_to_raw_output_wrapper() {
        let v = AgentDispatcher::parse_output("not json at all");
        assert_eq!(v["raw_output"], "not json at all");
    }

    #[test]
    fn schema_validation_flags_missing_required_field_and_wrong_type() {
        let schema = serde_json::json!({"type": "object", "required": ["summary"]});
        let output = serde_json::json!({"other": "value"});
        let errors = AgentDispatcher::validate_against_schema(&output, &schema);
        assert_eq!(errors, vec!["missing required field \"summary\"".to_string()]);

        let output = serde_json::json!(["not", "an", "object"]);
        let errors = AgentDispatcher::validate_against_schema(&output, &schema);
        assert!(errors.iter().any(|e| e.contains("expected type")));
    }

    #[test]
    fn schema_validation_passes_when_required_fields_present() {
        let schema = serde_json::json!({"type": "object", "required": ["summary"]});
        let output = serde_json::json!({"summary": "done"});
        assert!(AgentDispatcher::validate_against_schema(&output, &schema).is_empty());
    }

    #[test]
    fn split_changed_files_uses_agent_reported_buckets_when_present() {
        let output = serde_json::json!({
            "files_created": ["src/new.rs"],
            "files_modified": ["src/lib.rs"],
        });
        let (created, modified) = AgentDispatcher::split_changed_files(&output, &["src/new.rs".into(), "src/lib.rs".into()]);
        assert_eq!(created, vec!["src/new.rs".to_string()]);
        assert_eq!(modified, vec!["src/lib.rs".to_string()]);
    }

    #[test]
    fn split_changed_files_falls_back_to_merged_list_as_created() {
        let output = serde_json::json!({"raw_output": "plain text, no structure"});
        let changed = vec!["src/lib.rs".to_string()];
        let (created, modified) = AgentDispatcher::split_changed_files(&output, &changed);
        assert_eq!(created, changed);
        assert!(modified.is_empty());
    }
}
