//! Session Manager: per-task conversation continuity for adapters that
//! support resumption (spec §4.4).
//!
//! Grounded on the `harness::SessionManager` lifecycle idiom
//! (mutex-guarded state, `start`/`complete`/`pause` style transitions) but
//! restructured from one overall harness session into a mutex-guarded
//! per-task map, as the spec requires.

use crate::model::SessionInfo;
use chrono::Utc;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;

/// Write-through persistence for sessions. Implementations may back onto a
/// plain file tree or, for callers that don't need persistence, a no-op.
pub trait SessionStore: Send + Sync {
    fn put(&self, info: &SessionInfo);
    fn get(&self, task_id: &str) -> Option<SessionInfo>;
    fn delete(&self, task_id: &str);
}

/// No-op store for callers that don't need cross-process persistence.
#[derive(Default)]
pub struct NullSessionStore;

impl SessionStore for NullSessionStore {
    fn put(&self, _info: &SessionInfo) {}
    fn get(&self, _task_id: &str) -> Option<SessionInfo> {
        None
    }
    fn delete(&self, _task_id: &str) {}
}

pub struct SessionManager {
    sessions: Mutex<HashMap<String, SessionInfo>>,
    store: Box<dyn SessionStore>,
    default_ttl_hours: u32,
}

impl SessionManager {
    pub fn new(store: Box<dyn SessionStore>, default_ttl_hours: u32) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            store,
            default_ttl_hours,
        }
    }

    fn generate_id(task_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(task_id.as_bytes());
        hasher.update(Utc::now().to_rfc3339().as_bytes());
        hasher.update(uuid::Uuid::new_v4().as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        format!("{task_id}-{}", &hex[..12])
    }

    fn is_expired(info: &SessionInfo) -> bool {
        let expiry = info.last_used_at + chrono::Duration::hours(info.ttl_hours as i64);
        Utc::now() > expiry
    }

    /// Returns the active, non-expired session for `task_id`, or creates one.
    pub fn get_or_create(&self, task_id: &str) -> SessionInfo {
        let mut guard = self.sessions.lock().unwrap();
        if let Some(existing) = guard.get(task_id) {
            if existing.is_active && !Self::is_expired(existing) {
                return existing.clone();
            }
        }
        let now = Utc::now();
        let info = SessionInfo {
            session_id: Self::generate_id(task_id),
            task_id: task_id.to_string(),
            created_at: now,
            last_used_at: now,
            iteration: 0,
            is_active: true,
            ttl_hours: self.default_ttl_hours,
        };
        guard.insert(task_id.to_string(), info.clone());
        self.store.put(&info);
        info
    }

    /// Closes any existing session for `task_id`, then opens a new one.
    pub fn create(&self, task_id: &str) -> SessionInfo {
        self.close(task_id);
        self.get_or_create(task_id)
    }

    pub fn get(&self, task_id: &str) -> Option<SessionInfo> {
        let guard = self.sessions.lock().unwrap();
        match guard.get(task_id) {
            Some(info) if info.is_active && !Self::is_expired(info) => Some(info.clone()),
            _ => None,
        }
    }

    pub fn touch(&self, task_id: &str) {
        let mut guard = self.sessions.lock().unwrap();
        if let Some(info) = guard.get_mut(task_id) {
            info.last_used_at = Utc::now();
            info.iteration += 1;
            self.store.put(info);
        }
    }

    /// Idempotent: returns true the first time it deactivates a session,
    /// false if there was nothing to close.
    pub fn close(&self, task_id: &str) -> bool {
        let mut guard = self.sessions.lock().unwrap();
        match guard.get_mut(task_id) {
            Some(info) if info.is_active => {
                info.is_active = false;
                self.store.put(info);
                true
            }
            _ => false,
        }
    }

    pub fn delete(&self, task_id: &str) {
        let mut guard = self.sessions.lock().unwrap();
        guard.remove(task_id);
        self.store.delete(task_id);
    }

    /// Scans stdout with an ordered pattern list and updates the stored id
    /// to whatever the external CLI actually used.
    pub fn capture_session_id_from_output(&self, task_id: &str, raw_output: &str) {
        let patterns = [
            r#""session_id"\s*:\s*"([a-zA-Z0-9-]+)""#,
            r#"session[_-]id[:=]\s*([a-zA-Z0-9-]+)"#,
        ];
        for pat in patterns {
            if let Ok(re) = Regex::new(pat) {
                if let Some(caps) = re.captures(raw_output) {
                    if let Some(id) = caps.get(1) {
                        let mut guard = self.sessions.lock().unwrap();
                        if let Some(info) = guard.get_mut(task_id) {
                            info.session_id = id.as_str().to_string();
                            self.store.put(info);
                        }
                    }
                    return;
                }
            }
        }
    }

    /// `["--resume", id]` or empty.
    pub fn resume_args(&self, task_id: &str) -> Vec<String> {
        match self.get(task_id) {
            Some(info) if info.iteration > 0 => vec!["--resume".into(), info.session_id],
            _ => vec![],
        }
    }

    /// `["--session-id", id]` for a first invocation.
    pub fn session_id_args(&self, task_id: &str) -> Vec<String> {
        let info = self.get_or_create(task_id);
        vec!["--session-id".into(), info.session_id]
    }
}
