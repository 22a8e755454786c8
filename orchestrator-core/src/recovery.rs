//! Recovery Handler: category-routed error policies with exponential
//! backoff, backup-agent fallback, and persisted human escalation
//! (spec §4.11).
//!
//! Grounded on the `escalation::engine` tiered-escalation
//! cascade (deterministic, no-LLM decision routing) and
//! `escalation::state`'s bounded audit log, plus the
//! `resilience::ToolHealth` consecutive-failure/backoff bookkeeping idiom.
//! Resolves Open Question (b) in spec.md §9: the error log cap is fixed at
//! 1000 entries.

use crate::conflict_resolver::{self, Weights};
use crate::model::{EscalationRequest, ReviewFeedback, Severity};
use chrono::Utc;
use rand::Rng;
use std::collections::VecDeque;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{error, warn};

/// Implementation-chosen cap for the Recovery Handler's error log
/// (spec.md §9 Open Question (b), fixed at <=1000).
pub const MAX_ERROR_LOG: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transient,
    AgentFailure,
    ReviewConflict,
    SpecMismatch,
    BlockingSecurity,
    ResourceUnavailable,
    Timeout,
    Validation,
}

#[derive(Debug, Clone)]
pub enum RecoveryOutcome<T> {
    Recovered(T),
    UseBackup,
    Escalated(EscalationRequest),
}

pub struct BackoffConfig {
    pub base: Duration,
    pub max_cap: Duration,
    pub max_retries: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_cap: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

/// `min(base * 2^attempt, max_cap) + jitter(0..1s)`.
pub fn backoff_delay(cfg: &BackoffConfig, attempt: u32) -> Duration {
    let exp = cfg.base.as_secs_f64() * 2f64.powi(attempt as i32);
    let capped = exp.min(cfg.max_cap.as_secs_f64());
    let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
    Duration::from_secs_f64(capped + jitter)
}

pub trait EscalationSink: Send + Sync {
    fn persist(&self, request: &EscalationRequest);
}

/// Writes one JSON file per escalation event under
/// `<project>/.workflow/escalations/<task>_<timestamp>.json`.
pub struct FileEscalationSink {
    pub escalations_dir: PathBuf,
}

impl EscalationSink for FileEscalationSink {
    fn persist(&self, request: &EscalationRequest) {
        if let Err(e) = std::fs::create_dir_all(&self.escalations_dir) {
            error!(error = %e, "failed to create escalations dir");
            return;
        }
        let filename = format!(
            "{}_{}.json",
            request.task_id,
            request.timestamp.format("%Y%m%d_%H%M%S")
        );
        let path = self.escalations_dir.join(filename);
        match serde_json::to_vec_pretty(request) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(&path, bytes) {
                    error!(error = %e, path = %path.display(), "failed to write escalation file");
                }
            }
            Err(e) => error!(error = %e, "failed to serialise escalation"),
        }
    }
}

pub struct RecoveryHandler {
    sink: Box<dyn EscalationSink>,
    backoff: BackoffConfig,
    error_log: Mutex<VecDeque<String>>,
    callback: Option<Box<dyn Fn(&EscalationRequest) + Send + Sync>>,
}

impl RecoveryHandler {
    pub fn new(sink: Box<dyn EscalationSink>) -> Self {
        Self {
            sink,
            backoff: BackoffConfig::default(),
            error_log: Mutex::new(VecDeque::new()),
            callback: None,
        }
    }

    pub fn with_callback(mut self, cb: Box<dyn Fn(&EscalationRequest) + Send + Sync>) -> Self {
        self.callback = Some(cb);
        self
    }

    fn log_error(&self, msg: String) {
        let mut log = self.error_log.lock().unwrap();
        log.push_back(msg);
        if log.len() > MAX_ERROR_LOG {
            log.pop_front();
        }
    }

    fn escalate(
        &self,
        task_id: &str,
        reason: &str,
        options: Vec<String>,
        severity: Severity,
        attempts: u32,
        context: serde_json::Value,
    ) -> EscalationRequest {
        let request = EscalationRequest {
            task_id: task_id.to_string(),
            reason: reason.to_string(),
            context,
            attempts_made: attempts,
            options,
            recommendation: None,
            severity,
            timestamp: Utc::now(),
        };
        self.sink.persist(&request);
        if let Some(cb) = &self.callback {
            // callback exceptions (panics) must not bring down recovery;
            // catch_unwind keeps this a best-effort notification.
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(&request)));
            if result.is_err() {
                warn!("escalation callback panicked");
            }
        }
        self.log_error(reason.to_string());
        request
    }

    /// Transient: bounded exponential backoff around a retry callable.
    pub async fn handle_transient<T, F, Fut>(
        &self,
        task_id: &str,
        mut retry_fn: F,
    ) -> RecoveryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, String>>,
    {
        let mut last_err = String::new();
        for attempt in 0..self.backoff.max_retries {
            match retry_fn(attempt).await {
                Ok(value) => return RecoveryOutcome::Recovered(value),
                Err(e) => {
                    last_err = e;
                    let delay = backoff_delay(&self.backoff, attempt);
                    tokio::time::sleep(delay).await;
                }
            }
        }
        RecoveryOutcome::Escalated(self.escalate(
            task_id,
            "max_iterations_exceeded",
            vec!["Retry manually".into()],
            Severity::Medium,
            self.backoff.max_retries,
            serde_json::json!({ "last_error": last_err }),
        ))
    }

    pub fn handle_agent_failure(&self, task_id: &str, already_tried_backup: bool) -> RecoveryOutcome<()> {
        if !already_tried_backup {
            return RecoveryOutcome::UseBackup;
        }
        RecoveryOutcome::Escalated(self.escalate(
            task_id,
            "Agent failure after backup attempt",
            vec![
                "Retry with different agent".into(),
                "Provide manual fix".into(),
                "Skip".into(),
            ],
            Severity::Medium,
            2,
            serde_json::Value::Null,
        ))
    }

    pub fn handle_review_conflict(
        &self,
        task_id: &str,
        a: &ReviewFeedback,
        b: &ReviewFeedback,
    ) -> RecoveryOutcome<crate::model::ResolutionResult> {
        let resolution = conflict_resolver::resolve(a, b, None::<Weights>);
        match resolution.action {
            crate::model::ResolutionAction::Escalate => RecoveryOutcome::Escalated(self.escalate(
                task_id,
                &resolution.decision_reason,
                vec!["Human review required".into()],
                Severity::Medium,
                1,
                serde_json::json!({ "score_a": a.score, "score_b": b.score }),
            )),
            _ => RecoveryOutcome::Recovered(resolution),
        }
    }

    /// Never auto-modifies spec or tests; always escalates.
    pub fn handle_spec_mismatch(&self, task_id: &str) -> RecoveryOutcome<()> {
        RecoveryOutcome::Escalated(self.escalate(
            task_id,
            "Spec/test mismatch detected",
            vec![
                "Update spec to match tests".into(),
                "Rewrite tests to match spec".into(),
                "Clarify requirements".into(),
            ],
            Severity::High,
            0,
            serde_json::Value::Null,
        ))
    }

    pub fn handle_blocking_security(&self, task_id: &str, finding: &str) -> RecoveryOutcome<()> {
        RecoveryOutcome::Escalated(self.escalate(
            task_id,
            finding,
            vec!["Human security review required".into()],
            Severity::Critical,
            0,
            serde_json::Value::Null,
        ))
    }

    /// Grants one retry; escalates on a second occurrence.
    pub fn handle_timeout(&self, task_id: &str, already_retried: bool) -> RecoveryOutcome<()> {
        if !already_retried {
            return RecoveryOutcome::UseBackup; // caller interprets as "retry with extended timeout"
        }
        RecoveryOutcome::Escalated(self.escalate(
            task_id,
            "Repeated timeout",
            vec!["Extend timeout".into(), "Skip task".into()],
            Severity::Medium,
            2,
            serde_json::Value::Null,
        ))
    }

    pub fn handle_resource_unavailable(&self, task_id: &str, resource: &str) -> RecoveryOutcome<()> {
        RecoveryOutcome::Escalated(self.escalate(
            task_id,
            &format!("Resource unavailable: {resource}"),
            vec!["Wait and retry".into(), "Provision resource manually".into()],
            Severity::Medium,
            0,
            serde_json::Value::Null,
        ))
    }
}

pub fn category_for_validation_failure() -> ErrorCategory {
    // treated as agent failure per spec §7
    ErrorCategory::AgentFailure
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct MemorySink {
        written: Mutex<Vec<EscalationRequest>>,
    }
    impl EscalationSink for MemorySink {
        fn persist(&self, request: &EscalationRequest) {
            self.written.lock().unwrap().push(request.clone());
        }
    }

    #[tokio::test]
    async fn transient_recovers_without_escalation_on_eventual_success() {
        let handler = RecoveryHandler::new(Box::new(MemorySink {
            written: Mutex::new(vec![]),
        }));
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts2 = attempts.clone();
        let result = handler
            .handle_transient::<i32, _, _>("t1", move |_| {
                let attempts = attempts2.clone();
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) < 1 {
                        Err("still failing".to_string())
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        matches!(result, RecoveryOutcome::Recovered(42));
    }

    #[tokio::test]
    async fn transient_escalates_after_exhaustion() {
        let sink = Arc::new(MemorySink {
            written: Mutex::new(vec![]),
        });
        struct Wrap(Arc<MemorySink>);
        impl EscalationSink for Wrap {
            fn persist(&self, r: &EscalationRequest) {
                self.0.persist(r);
            }
        }
        let handler = RecoveryHandler::new(Box::new(Wrap(sink.clone())));
        let result = handler
            .handle_transient::<i32, _, _>("t1", |_| async { Err("nope".to_string()) })
            .await;
        assert!(matches!(result, RecoveryOutcome::Escalated(_)));
        assert_eq!(sink.written.lock().unwrap().len(), 1);
    }

    #[test]
    fn spec_mismatch_always_escalates_with_high_severity() {
        let handler = RecoveryHandler::new(Box::new(MemorySink {
            written: Mutex::new(vec![]),
        }));
        let outcome = handler.handle_spec_mismatch("t1");
        match outcome {
            RecoveryOutcome::Escalated(req) => {
                assert_eq!(req.severity, Severity::High);
                assert!(req.options.iter().any(|o| o.contains("Update spec")));
                assert!(req.options.iter().any(|o| o.contains("Rewrite tests")));
            }
            _ => panic!("expected escalation"),
        }
    }

    #[test]
    fn agent_failure_suggests_backup_before_escalating() {
        let handler = RecoveryHandler::new(Box::new(MemorySink {
            written: Mutex::new(vec![]),
        }));
        assert!(matches!(
            handler.handle_agent_failure("t1", false),
            RecoveryOutcome::UseBackup
        ));
        assert!(matches!(
            handler.handle_agent_failure("t1", true),
            RecoveryOutcome::Escalated(_)
        ));
    }

    #[test]
    fn backoff_delay_stays_within_documented_bounds() {
        let cfg = BackoffConfig::default();
        for attempt in 0..3 {
            let d = backoff_delay(&cfg, attempt).as_secs_f64();
            let base = 2f64.powi(attempt as i32);
            assert!(d >= base && d <= base + 1.0);
        }
    }
}
