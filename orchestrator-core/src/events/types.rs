//! Progress event stream types (spec §6).
//!
//! Grounded on the `EnsembleEvent` tagged-enum shape, narrowed
//! to the seven event kinds the Workflow Runner's progress callback and
//! JSON event stream actually need.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    NodeStart {
        node: String,
        phase: u8,
        data: Value,
        timestamp: DateTime<Utc>,
    },
    NodeEnd {
        node: String,
        phase: u8,
        data: Value,
        timestamp: DateTime<Utc>,
    },
    Action {
        label: String,
        data: Value,
        timestamp: DateTime<Utc>,
    },
    Interrupt {
        data: Value,
        timestamp: DateTime<Utc>,
    },
    Rollback {
        phase: u8,
        commit: String,
        timestamp: DateTime<Utc>,
    },
    Reset {
        phase: Option<u8>,
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
        node: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl ProgressEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::NodeStart { .. } => "node_start",
            ProgressEvent::NodeEnd { .. } => "node_end",
            ProgressEvent::Action { .. } => "action",
            ProgressEvent::Interrupt { .. } => "interrupt",
            ProgressEvent::Rollback { .. } => "rollback",
            ProgressEvent::Reset { .. } => "reset",
            ProgressEvent::Error { .. } => "error",
        }
    }
}

/// Synchronous progress-callback contract: handlers run on node boundaries
/// and must not block (spec §4.15).
pub trait ProgressCallback: Send + Sync {
    fn on_node_start(&self, _name: &str, _phase: u8) {}
    fn on_node_end(&self, _name: &str, _phase: u8) {}
    fn on_task_start(&self, _task_id: &str) {}
    fn on_task_complete(&self, _task_id: &str) {}
    fn on_interrupt(&self, _pending: &Value) {}
    fn on_metrics_update(&self, _tokens: u64, _cost_usd: f64, _files_created: u32, _files_modified: u32) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_matches_wire_tag() {
        let event = ProgressEvent::Reset {
            phase: Some(2),
            timestamp: Utc::now(),
        };
        assert_eq!(event.kind(), "reset");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "reset");
    }
}
