//! Agent Adapter: a uniform invocation contract over three heterogeneous
//! external CLI families.
//!
//! Grounded on the `notebook_bridge::NotebookBridge` /
//! `KnowledgeBase` pattern — an external binary wrapped via
//! `tokio::process::Command`, a trait abstraction so the loop runner and
//! dispatcher can be tested without real subprocesses, and graceful
//! handling of missing/misbehaving binaries rather than panics.

use crate::model::IterationResult;
use crate::registry::CliFamily;
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("unknown CLI family: {0:?} (available: claude, cursor, gemini)")]
    UnknownFamily(String),
    #[error("failed to spawn subprocess: {0}")]
    Spawn(String),
    #[error("operation was cancelled")]
    Cancelled,
}

/// Declared capabilities of one adapter variant.
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub json_output: bool,
    pub session: bool,
    pub model_selection: bool,
    pub plan_mode: bool,
    pub budget_flag: bool,
    pub completion_patterns: Vec<String>,
    pub available_models: Vec<String>,
    pub default_model: Option<String>,
}

/// Arguments a caller supplies for one iteration of agent work.
#[derive(Debug, Clone, Default)]
pub struct AdapterRequest {
    pub prompt: String,
    pub model: Option<String>,
    pub max_turns: Option<u32>,
    pub allowed_tools: Vec<String>,
    pub session_id: Option<String>,
    pub resume_session: bool,
    pub budget_usd: Option<f64>,
    pub use_plan_mode: bool,
    pub fallback_model: Option<String>,
    pub json_schema_path: Option<String>,
}

#[async_trait]
pub trait Adapter: Send + Sync {
    fn family(&self) -> CliFamily;
    fn capabilities(&self) -> &Capabilities;

    /// Build the argv for this invocation (exposed for the argv-exactness
    /// property tests in spec §8).
    fn build_argv(&self, req: &AdapterRequest) -> Vec<String>;

    async fn run_iteration(
        &self,
        req: AdapterRequest,
        timeout: Duration,
    ) -> Result<IterationResult, AdapterError>;
}

/// Shared subprocess-invocation machinery: spawn with `TERM=dumb`, await
/// with a hard timeout, parse stdout, extract completion/cost/session.
async fn invoke(
    exe: &str,
    argv: &[String],
    project_dir: &PathBuf,
    timeout: Duration,
    completion_patterns: &[String],
    family: CliFamily,
    model: Option<String>,
) -> Result<IterationResult, AdapterError> {
    let started = Instant::now();
    let mut cmd = Command::new(exe);
    cmd.args(argv)
        .current_dir(project_dir)
        .env("TERM", "dumb")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| AdapterError::Spawn(e.to_string()))?;

    let wait = async {
        let mut stdout = String::new();
        let mut stderr = String::new();
        if let Some(mut out) = child.stdout.take() {
            let _ = out.read_to_string(&mut stdout).await;
        }
        if let Some(mut err) = child.stderr.take() {
            let _ = err.read_to_string(&mut stderr).await;
        }
        let status = child.wait().await;
        (status, stdout, stderr)
    };

    match tokio::time::timeout(timeout, wait).await {
        Ok((status, stdout, stderr)) => {
            let exit_code = status.ok().and_then(|s| s.code()).unwrap_or(-1);
            Ok(build_result(
                exit_code,
                stdout,
                stderr,
                started.elapsed(),
                completion_patterns,
                family,
                model,
            ))
        }
        Err(_) => {
            // graceful terminate: signal -> 5s grace -> kill
            let _ = child.start_kill();
            let grace = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
            if grace.is_err() {
                let _ = child.kill().await;
            }
            warn!(exe, ?timeout, "adapter invocation timed out");
            Ok(IterationResult {
                success: false,
                raw_output: String::new(),
                parsed_output: None,
                completion_detected: false,
                exit_code: -1,
                duration: started.elapsed(),
                error: Some(format!("Timeout after {} seconds", timeout.as_secs())),
                files_changed: vec![],
                session_id: None,
                cost_usd: None,
                model,
            })
        }
    }
}

/// Per-adapter-table completion-signal check (spec §4.2): Claude only
/// treats a JSON `status == "completed"` as completion (not `"done"`/
/// `"finished"`); Cursor accepts `"done"`/`"completed"`; Gemini accepts
/// any of the three, matching its broader text-token patterns.
fn status_signals_completion(family: CliFamily, status: &str) -> bool {
    match family {
        CliFamily::Claude => status == "completed",
        CliFamily::Cursor => matches!(status, "done" | "completed"),
        CliFamily::Gemini => matches!(status, "done" | "completed" | "finished"),
    }
}

fn build_result(
    exit_code: i32,
    stdout: String,
    stderr: String,
    duration: Duration,
    completion_patterns: &[String],
    family: CliFamily,
    model: Option<String>,
) -> IterationResult {
    let parsed = parse_json_loosely(&stdout);

    let completion_detected = completion_patterns
        .iter()
        .any(|p| stdout.to_lowercase().contains(&p.to_lowercase()))
        || parsed
            .as_ref()
            .and_then(|v| v.get("status"))
            .and_then(|s| s.as_str())
            .map(|s| status_signals_completion(family, s))
            .unwrap_or(false);

    let files_changed = parsed
        .as_ref()
        .map(|v| {
            let mut files = vec![];
            for key in ["files_modified", "files_created"] {
                if let Some(arr) = v.get(key).and_then(|a| a.as_array()) {
                    files.extend(arr.iter().filter_map(|x| x.as_str().map(String::from)));
                }
            }
            files
        })
        .unwrap_or_default();

    let cost_usd = parsed.as_ref().and_then(|v| {
        v.get("cost_usd")
            .and_then(|c| c.as_f64())
            .or_else(|| v.get("usage")?.get("cost_usd")?.as_f64())
    });

    let session_id = parsed
        .as_ref()
        .and_then(|v| {
            v.get("session_id")
                .and_then(|s| s.as_str())
                .or_else(|| v.get("metadata")?.get("session_id")?.as_str())
        })
        .map(String::from)
        .or_else(|| extract_session_id_regex(&stdout));

    IterationResult {
        success: exit_code == 0,
        raw_output: stdout,
        parsed_output: parsed,
        completion_detected,
        exit_code,
        duration,
        error: if exit_code != 0 {
            Some(stderr)
        } else {
            None
        },
        files_changed,
        session_id,
        cost_usd,
        model,
    }
}

fn parse_json_loosely(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return None;
    }
    if let Ok(v) = serde_json::from_str::<Value>(text) {
        return Some(v);
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

fn extract_session_id_regex(text: &str) -> Option<String> {
    let re = regex::Regex::new(r#"session[_-]?id["']?\s*[:=]\s*["']?([a-zA-Z0-9-]+)"#).ok()?;
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

macro_rules! adapter_struct {
    ($name:ident) => {
        pub struct $name {
            pub exe: String,
            pub project_dir: PathBuf,
            pub caps: Capabilities,
        }
    };
}

adapter_struct!(ClaudeAdapter);
adapter_struct!(CursorAdapter);
adapter_struct!(GeminiAdapter);

#[async_trait]
impl Adapter for ClaudeAdapter {
    fn family(&self) -> CliFamily {
        CliFamily::Claude
    }
    fn capabilities(&self) -> &Capabilities {
        &self.caps
    }
    fn build_argv(&self, req: &AdapterRequest) -> Vec<String> {
        let mut argv = vec!["-p".into(), req.prompt.clone(), "--output-format".into(), "json".into()];
        if let Some(model) = &req.model {
            argv.push("--model".into());
            argv.push(model.clone());
        }
        if req.use_plan_mode {
            argv.push("--permission-mode".into());
            argv.push("plan".into());
        }
        if let Some(budget) = req.budget_usd {
            argv.push("--max-budget-usd".into());
            argv.push(budget.to_string());
        }
        if req.resume_session {
            if let Some(sid) = &req.session_id {
                argv.push("--resume".into());
                argv.push(sid.clone());
            }
        } else if let Some(sid) = &req.session_id {
            argv.push("--session-id".into());
            argv.push(sid.clone());
        }
        argv
    }

    async fn run_iteration(
        &self,
        req: AdapterRequest,
        timeout: Duration,
    ) -> Result<IterationResult, AdapterError> {
        let model = req.model.clone().or_else(|| self.caps.default_model.clone());
        let argv = self.build_argv(&req);
        debug!(exe = %self.exe, ?argv, "invoking claude-family adapter");
        invoke(
            &self.exe,
            &argv,
            &self.project_dir,
            timeout,
            &self.caps.completion_patterns,
            self.family(),
            model,
        )
        .await
    }
}

#[async_trait]
impl Adapter for CursorAdapter {
    fn family(&self) -> CliFamily {
        CliFamily::Cursor
    }
    fn capabilities(&self) -> &Capabilities {
        &self.caps
    }
    fn build_argv(&self, req: &AdapterRequest) -> Vec<String> {
        let mut argv = vec!["--print".into(), "--output-format".into(), "json".into(), "--force".into()];
        if let Some(model) = &req.model {
            argv.push("--model".into());
            argv.push(model.clone());
        }
        argv.push(req.prompt.clone());
        argv
    }

    async fn run_iteration(
        &self,
        req: AdapterRequest,
        timeout: Duration,
    ) -> Result<IterationResult, AdapterError> {
        let model = req.model.clone().or_else(|| self.caps.default_model.clone());
        let argv = self.build_argv(&req);
        debug!(exe = %self.exe, ?argv, "invoking cursor-family adapter");
        invoke(
            &self.exe,
            &argv,
            &self.project_dir,
            timeout,
            &self.caps.completion_patterns,
            self.family(),
            model,
        )
        .await
    }
}

#[async_trait]
impl Adapter for GeminiAdapter {
    fn family(&self) -> CliFamily {
        CliFamily::Gemini
    }
    fn capabilities(&self) -> &Capabilities {
        &self.caps
    }
    fn build_argv(&self, req: &AdapterRequest) -> Vec<String> {
        let mut argv = vec![];
        if let Some(model) = &req.model {
            argv.push("--model".into());
            argv.push(model.clone());
        }
        argv.push("--yolo".into());
        argv.push(req.prompt.clone());
        argv
    }

    async fn run_iteration(
        &self,
        req: AdapterRequest,
        timeout: Duration,
    ) -> Result<IterationResult, AdapterError> {
        let model = req.model.clone().or_else(|| self.caps.default_model.clone());
        let argv = self.build_argv(&req);
        debug!(exe = %self.exe, ?argv, "invoking gemini-family adapter");
        invoke(
            &self.exe,
            &argv,
            &self.project_dir,
            timeout,
            &self.caps.completion_patterns,
            self.family(),
            model,
        )
        .await
    }
}

/// Construct an adapter for `family`; unknown families are rejected with a
/// typed error listing available ones.
pub fn create_adapter(
    family: CliFamily,
    project_dir: PathBuf,
    model: Option<String>,
) -> Box<dyn Adapter> {
    match family {
        CliFamily::Claude => Box::new(ClaudeAdapter {
            exe: "claude".into(),
            project_dir,
            caps: Capabilities {
                json_output: true,
                session: true,
                model_selection: true,
                plan_mode: true,
                budget_flag: true,
                completion_patterns: vec!["TASK_COMPLETE".into()],
                available_models: vec!["claude-opus".into(), "claude-sonnet".into()],
                default_model: model.or(Some("claude-sonnet".into())),
            },
        }),
        CliFamily::Cursor => Box::new(CursorAdapter {
            exe: "cursor-agent".into(),
            project_dir,
            caps: Capabilities {
                json_output: true,
                session: false,
                model_selection: true,
                plan_mode: false,
                budget_flag: false,
                completion_patterns: vec![],
                available_models: vec!["cursor-fast".into()],
                default_model: model.or(Some("cursor-fast".into())),
            },
        }),
        CliFamily::Gemini => Box::new(GeminiAdapter {
            exe: "gemini".into(),
            project_dir,
            caps: Capabilities {
                json_output: false,
                session: false,
                model_selection: true,
                plan_mode: false,
                budget_flag: false,
                completion_patterns: vec!["DONE".into(), "COMPLETE".into(), "FINISHED".into()],
                available_models: vec!["gemini-pro".into()],
                default_model: model.or(Some("gemini-pro".into())),
            },
        }),
    }
}

pub fn parse_family(name: &str) -> Result<CliFamily, AdapterError> {
    match name.to_lowercase().as_str() {
        "claude" => Ok(CliFamily::Claude),
        "cursor" => Ok(CliFamily::Cursor),
        "gemini" => Ok(CliFamily::Gemini),
        other => Err(AdapterError::UnknownFamily(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_argv_matches_the_documented_form() {
        let adapter = ClaudeAdapter {
            exe: "claude".into(),
            project_dir: PathBuf::from("."),
            caps: Capabilities {
                json_output: true,
                session: true,
                model_selection: true,
                plan_mode: true,
                budget_flag: true,
                completion_patterns: vec![],
                available_models: vec![],
                default_model: None,
            },
        };
        let req = AdapterRequest {
            prompt: "do the thing".into(),
            session_id: Some("sess-1".into()),
            resume_session: false,
            ..Default::default()
        };
        let argv = adapter.build_argv(&req);
        assert_eq!(
            argv,
            vec![
                "-p", "do the thing", "--output-format", "json", "--session-id", "sess-1"
            ]
        );
    }

    #[test]
    fn cursor_prompt_is_trailing_positional() {
        let adapter = CursorAdapter {
            exe: "cursor-agent".into(),
            project_dir: PathBuf::from("."),
            caps: Capabilities {
                json_output: true,
                session: false,
                model_selection: true,
                plan_mode: false,
                budget_flag: false,
                completion_patterns: vec![],
                available_models: vec![],
                default_model: None,
            },
        };
        let req = AdapterRequest {
            prompt: "do the thing".into(),
            ..Default::default()
        };
        let argv = adapter.build_argv(&req);
        assert_eq!(argv.last().unwrap(), "do the thing");
        assert!(argv.contains(&"--output-format".to_string()));
    }

    #[test]
    fn unknown_family_is_rejected() {
        assert!(parse_family("unknown-cli").is_err());
    }

    #[test]
    fn empty_output_yields_no_completion_and_no_parsed() {
        let result = build_result(
            0,
            String::new(),
            String::new(),
            Duration::from_secs(0),
            &[],
            CliFamily::Claude,
            None,
        );
        assert!(result.parsed_output.is_none());
        assert!(!result.completion_detected);
        assert!(result.success);
    }

    #[test]
    fn completion_pattern_match_is_case_insensitive() {
        let result = build_result(
            0,
            "all done: done".into(),
            String::new(),
            Duration::from_secs(1),
            &["DONE".into()],
            CliFamily::Gemini,
            None,
        );
        assert!(result.completion_detected);
    }

    #[test]
    fn claude_status_done_does_not_signal_completion() {
        let result = build_result(
            0,
            r#"{"status": "done"}"#.into(),
            String::new(),
            Duration::from_secs(1),
            &[],
            CliFamily::Claude,
            None,
        );
        assert!(!result.completion_detected);
    }

    #[test]
    fn claude_status_completed_signals_completion() {
        let result = build_result(
            0,
            r#"{"status": "completed"}"#.into(),
            String::new(),
            Duration::from_secs(1),
            &[],
            CliFamily::Claude,
            None,
        );
        assert!(result.completion_detected);
    }

    #[test]
    fn cursor_status_done_signals_completion() {
        let result = build_result(
            0,
            r#"{"status": "done"}"#.into(),
            String::new(),
            Duration::from_secs(1),
            &[],
            CliFamily::Cursor,
            None,
        );
        assert!(result.completion_detected);
    }

    #[test]
    fn model_is_threaded_through_to_iteration_result() {
        let result = build_result(
            0,
            String::new(),
            String::new(),
            Duration::from_secs(0),
            &[],
            CliFamily::Claude,
            Some("claude-sonnet".into()),
        );
        assert_eq!(result.model.as_deref(), Some("claude-sonnet"));
    }
}
