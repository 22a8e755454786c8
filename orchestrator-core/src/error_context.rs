//! Error-Context Manager: classifies failures and shapes them into
//! retry-prompt guidance (spec §4.5).
//!
//! Grounded on the `feedback::error_parser::RustcErrorParser`
//! cascade pattern (ordered substring/regex classification feeding a
//! category -> remediation-hint table) but reworked onto the spec's own
//! domain-specific category cascade (build/test/lint/security, not
//! rustc-internal error codes).

use crate::model::{ErrorClassification, ErrorContext};
use chrono::Utc;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Mutex;

const MAX_MESSAGE_LEN: usize = 500;
const MAX_EXCERPT_LEN: usize = 1000;
const MAX_STACK_LEN: usize = 2000;

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// Ordered cascade; first match wins. Order matters per spec §4.5.
pub fn classify(message: &str, stderr: &str, exit_code: i32) -> ErrorClassification {
    let haystack = format!("{} {}", message, stderr).to_lowercase();

    if haystack.contains("timeout") || exit_code == -1 {
        return ErrorClassification::Timeout;
    }
    if haystack.contains("syntaxerror") || haystack.contains("syntax error") || haystack.contains("unexpected token") {
        return ErrorClassification::SyntaxError;
    }
    if haystack.contains("importerror") || haystack.contains("modulenotfounderror") || haystack.contains("cannot find module") {
        return ErrorClassification::ImportError;
    }
    if haystack.contains("typeerror") || haystack.contains("type mismatch") || haystack.contains("expected type") {
        return ErrorClassification::TypeError;
    }
    if (haystack.contains("assert") || haystack.contains("assertion"))
        && (haystack.contains("test") || haystack.contains("pytest") || haystack.contains("jest"))
    {
        return ErrorClassification::TestFailure;
    }
    if haystack.contains("compil") || haystack.contains("build failed") || haystack.contains("error[e") {
        return ErrorClassification::BuildFailure;
    }
    if haystack.contains("clippy") || haystack.contains("eslint") || haystack.contains("lint") {
        return ErrorClassification::LintError;
    }
    if haystack.contains("vulnerab") || haystack.contains("injection") || haystack.contains("cve-") {
        return ErrorClassification::SecurityIssue;
    }
    if haystack.contains("unclear") || haystack.contains("please clarify") || haystack.contains("ambiguous requirement") {
        return ErrorClassification::ClarificationNeeded;
    }
    if exit_code != 0 {
        return ErrorClassification::RuntimeError;
    }
    ErrorClassification::Unknown
}

/// Union of several ordered regex patterns for file references.
pub fn extract_files(text: &str) -> Vec<String> {
    let patterns = [
        r#"File "([^"]+)", line \d+"#,          // Python traceback
        r#"at .*\(([^():]+):\d+:\d+\)"#,        // JS/TS at-frame
        r#"([A-Za-z0-9_./-]+\.[a-zA-Z0-9]+):\d+"#, // generic path:line
        r#"in ([A-Za-z0-9_./-]+\.[a-zA-Z0-9]+)"#,  // in-clause
    ];
    let mut seen = std::collections::HashSet::new();
    let mut files = vec![];
    for pat in patterns {
        if let Ok(re) = Regex::new(pat) {
            for caps in re.captures_iter(text) {
                if let Some(m) = caps.get(1) {
                    let f = m.as_str().to_string();
                    if seen.insert(f.clone()) {
                        files.push(f);
                    }
                }
            }
        }
    }
    files
}

fn suggestions_for(kind: ErrorClassification) -> Vec<String> {
    match kind {
        ErrorClassification::Timeout => vec!["Increase the invocation timeout".into(), "Break the task into smaller steps".into()],
        ErrorClassification::SyntaxError => vec!["Check for unbalanced brackets or missing semicolons".into()],
        ErrorClassification::ImportError => vec!["Verify the module/package is installed and the path is correct".into()],
        ErrorClassification::TypeError => vec!["Check argument and return types against the function signature".into()],
        ErrorClassification::TestFailure => vec!["Re-read the failing assertion and align the implementation to it".into()],
        ErrorClassification::BuildFailure => vec!["Run the build locally to inspect the full compiler diagnostic".into()],
        ErrorClassification::LintError => vec!["Apply the linter's auto-fix where available".into()],
        ErrorClassification::SecurityIssue => vec!["Do not suppress the finding; fix the underlying vulnerability".into()],
        ErrorClassification::ClarificationNeeded => vec!["Ask a clarifying question before proceeding".into()],
        ErrorClassification::RuntimeError => vec!["Reproduce locally and inspect the stack trace".into()],
        ErrorClassification::Unknown => vec![],
    }
}

pub struct ErrorContextManager {
    by_task: Mutex<HashMap<String, Vec<ErrorContext>>>,
    pub max_per_task: usize,
}

impl ErrorContextManager {
    pub fn new(max_per_task: usize) -> Self {
        Self {
            by_task: Mutex::new(HashMap::new()),
            max_per_task,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        task_id: &str,
        message: &str,
        attempt: u32,
        stderr: &str,
        stdout: &str,
        exit_code: i32,
        stack_trace: Option<&str>,
    ) -> ErrorContext {
        let classification = classify(message, stderr, exit_code);
        let combined = format!("{message}\n{stdout}\n{stderr}");
        let files_involved = extract_files(&combined);

        let mut guard = self.by_task.lock().unwrap();
        let entries = guard.entry(task_id.to_string()).or_default();
        let counter = entries.len() as u64;

        let ctx = ErrorContext {
            id: format!("err-{task_id}-{}-{counter}", Utc::now().timestamp()),
            task_id: task_id.to_string(),
            timestamp: Utc::now(),
            attempt,
            classification,
            message: truncate(message, MAX_MESSAGE_LEN),
            stdout_excerpt: truncate(stdout, MAX_EXCERPT_LEN),
            stderr_excerpt: truncate(stderr, MAX_EXCERPT_LEN),
            files_involved,
            stack_trace: stack_trace.map(|s| truncate(s, MAX_STACK_LEN)),
            suggestions: suggestions_for(classification),
        };

        entries.push(ctx.clone());
        if entries.len() > self.max_per_task {
            let overflow = entries.len() - self.max_per_task;
            entries.drain(0..overflow);
        }
        ctx
    }

    pub fn get_error_history(&self, task_id: &str) -> Vec<ErrorContext> {
        self.by_task
            .lock()
            .unwrap()
            .get(task_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns false if there was nothing to clear.
    pub fn clear_task_errors(&self, task_id: &str) -> bool {
        let mut guard = self.by_task.lock().unwrap();
        match guard.get(task_id) {
            Some(v) if !v.is_empty() => {
                guard.remove(task_id);
                true
            }
            _ => false,
        }
    }

    /// Prepends the most recent errors as "Previous Attempt N Failed"
    /// blocks, bounded by `char_budget`, followed by retry instructions.
    /// Returns `original_prompt` unchanged if there is no error history.
    pub fn build_retry_prompt(&self, task_id: &str, original_prompt: &str, char_budget: usize) -> String {
        let history = self.get_error_history(task_id);
        if history.is_empty() {
            return original_prompt.to_string();
        }

        let mut prefix = String::new();
        for err in history.iter().rev() {
            let top_suggestions: Vec<_> = err.suggestions.iter().take(3).cloned().collect();
            let block = format!(
                "--- Previous Attempt {} Failed ---\nType: {:?}\nMessage: {}\nStderr: {}\nSuggestions: {}\n\n",
                err.attempt,
                err.classification,
                truncate(&err.message, 300),
                truncate(&err.stderr_excerpt, 300),
                top_suggestions.join("; "),
            );
            if prefix.len() + block.len() > char_budget {
                break;
            }
            prefix.push_str(&block);
        }

        format!(
            "{prefix}Retry Instructions: address every failure above before attempting anything new.\n\n{original_prompt}"
        )
    }
}
