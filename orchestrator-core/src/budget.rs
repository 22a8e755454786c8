//! Budget Manager: pre-spend authorisation and post-spend accounting at
//! invocation/task/project scopes (spec §4.6).
//!
//! Grounded on the `memory::budget::TokenBudget`/
//! `CompactionTrigger` pattern — a threshold-bearing struct plus a
//! decision function — generalised from token counts to USD spend and
//! from a single budget to the spec's three nested scopes. Resolves Open
//! Question (a) in spec.md §9: this manager is the sole, pluggable-store
//! budget path; there is no parallel file-backed implementation.

use crate::model::SpendRecord;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

pub struct BudgetManager {
    project_budget: f64,
    default_task_budget: f64,
    invocation_budget: f64,
    task_budget_overrides: Mutex<HashMap<String, f64>>,
    records: Mutex<Vec<SpendRecord>>,
}

#[derive(Debug, Clone)]
pub struct BudgetSummary {
    pub by_task: HashMap<String, f64>,
    pub by_agent: HashMap<String, f64>,
    pub total: f64,
}

impl BudgetManager {
    pub fn new(project_budget: f64, default_task_budget: f64, invocation_budget: f64) -> Self {
        Self {
            project_budget,
            default_task_budget,
            invocation_budget,
            task_budget_overrides: Mutex::new(HashMap::new()),
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn set_task_budget_override(&self, task_id: &str, budget: f64) {
        self.task_budget_overrides
            .lock()
            .unwrap()
            .insert(task_id.to_string(), budget);
    }

    fn task_budget(&self, task_id: &str) -> f64 {
        self.task_budget_overrides
            .lock()
            .unwrap()
            .get(task_id)
            .copied()
            .unwrap_or(self.default_task_budget)
    }

    fn project_spent(&self) -> f64 {
        self.records.lock().unwrap().iter().map(|r| r.cost_usd).sum()
    }

    pub fn task_spent(&self, task_id: &str) -> f64 {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.task_id == task_id)
            .map(|r| r.cost_usd)
            .sum()
    }

    /// `project_spent + amount <= project_budget AND task_spent + amount <=
    /// task_budget AND amount <= invocation_budget`.
    pub fn can_spend(&self, task_id: &str, amount: f64) -> bool {
        self.project_spent() + amount <= self.project_budget
            && self.task_spent(task_id) + amount <= self.task_budget(task_id)
            && amount <= self.invocation_budget
    }

    pub fn record_spend(&self, task_id: &str, agent: &str, cost_usd: f64, model: Option<String>) -> SpendRecord {
        let record = SpendRecord {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            task_id: task_id.to_string(),
            agent: agent.to_string(),
            cost_usd,
            model,
            tokens: None,
        };
        self.records.lock().unwrap().push(record.clone());
        record
    }

    pub fn get_total_spent(&self) -> f64 {
        self.project_spent()
    }

    pub fn get_summary(&self) -> BudgetSummary {
        let records = self.records.lock().unwrap();
        let mut by_task = HashMap::new();
        let mut by_agent = HashMap::new();
        let mut total = 0.0;
        for r in records.iter() {
            *by_task.entry(r.task_id.clone()).or_insert(0.0) += r.cost_usd;
            *by_agent.entry(r.agent.clone()).or_insert(0.0) += r.cost_usd;
            total += r.cost_usd;
        }
        BudgetSummary {
            by_task,
            by_agent,
            total,
        }
    }

    pub fn reset_task_spending(&self, task_id: &str) {
        self.records.lock().unwrap().retain(|r| r.task_id != task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_spend_is_exact() {
        let mgr = BudgetManager::new(100.0, 10.0, 5.0);
        let pre_task = mgr.task_spent("t1");
        let pre_total = mgr.get_total_spent();
        mgr.record_spend("t1", "agent-a", 1.25, None);
        assert_eq!(mgr.task_spent("t1"), pre_task + 1.25);
        assert_eq!(mgr.get_total_spent(), pre_total + 1.25);
    }

    #[test]
    fn can_spend_respects_all_three_scopes() {
        let mgr = BudgetManager::new(2.0, 1.0, 0.5);
        assert!(mgr.can_spend("t1", 0.4));
        assert!(!mgr.can_spend("t1", 0.6)); // exceeds invocation budget
        mgr.record_spend("t1", "a", 0.9, None);
        assert!(!mgr.can_spend("t1", 0.2)); // exceeds task budget
    }

    #[test]
    fn task_budget_override_applies() {
        let mgr = BudgetManager::new(100.0, 1.0, 50.0);
        mgr.set_task_budget_override("t1", 20.0);
        assert!(mgr.can_spend("t1", 15.0));
    }

    #[test]
    fn reset_task_spending_clears_only_that_task() {
        let mgr = BudgetManager::new(100.0, 50.0, 50.0);
        mgr.record_spend("t1", "a", 1.0, None);
        mgr.record_spend("t2", "a", 2.0, None);
        mgr.reset_task_spending("t1");
        assert_eq!(mgr.task_spent("t1"), 0.0);
        assert_eq!(mgr.task_spent("t2"), 2.0);
    }
}
