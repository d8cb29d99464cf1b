// Short-term session memory: append-only action history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// One recorded step of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub step: usize,
    /// Action tag ("VISION_CLICK", ...).
    pub action: String,
    /// Human-readable target or detail.
    pub detail: String,
    /// Outcome summary, when the step got as far as VERIFY.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    pub at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(step: usize, action: &str, detail: impl Into<String>) -> Self {
        Self {
            step,
            action: action.to_string(),
            detail: detail.into(),
            outcome: None,
            at: Utc::now(),
        }
    }

    pub fn with_outcome(mut self, outcome: impl Into<String>) -> Self {
        self.outcome = Some(outcome.into());
        self
    }
}

/// The slice of the external persistence contract the core consumes.
pub trait HistoryStore: Send + Sync {
    /// Last `n` rows for the session, oldest first.
    fn recent(&self, session_id: &str, n: usize) -> Vec<HistoryEntry>;
    fn append(&self, session_id: &str, entry: HistoryEntry);
}

/// In-process history store; rows are append-only per session.
#[derive(Default)]
pub struct SessionMemory {
    rows: Mutex<HashMap<String, Vec<HistoryEntry>>>,
}

impl SessionMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, session_id: &str) -> usize {
        self.rows
            .lock()
            .unwrap()
            .get(session_id)
            .map(|rows| rows.len())
            .unwrap_or(0)
    }
}

impl HistoryStore for SessionMemory {
    fn recent(&self, session_id: &str, n: usize) -> Vec<HistoryEntry> {
        let rows = self.rows.lock().unwrap();
        match rows.get(session_id) {
            Some(rows) => {
                let start = rows.len().saturating_sub(n);
                rows[start..].to_vec()
            }
            None => Vec::new(),
        }
    }

    fn append(&self, session_id: &str, entry: HistoryEntry) {
        self.rows
            .lock()
            .unwrap()
            .entry(session_id.to_string())
            .or_default()
            .push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recent_returns_tail_oldest_first() {
        let memory = SessionMemory::new();
        for step in 1..=8 {
            memory.append("s1", HistoryEntry::new(step, "SCROLL", format!("step {}", step)));
        }
        let window = memory.recent("s1", 5);
        assert_eq!(window.len(), 5);
        assert_eq!(window.first().unwrap().step, 4);
        assert_eq!(window.last().unwrap().step, 8);
    }

    #[test]
    fn sessions_are_isolated() {
        let memory = SessionMemory::new();
        memory.append("a", HistoryEntry::new(1, "DONE", ""));
        assert!(memory.recent("b", 5).is_empty());
        assert_eq!(memory.len("a"), 1);
    }
}
