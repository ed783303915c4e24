//! Read-only session view for external persisters.
//!
//! The engine exposes cheap clones of its messages, tool-call history, and
//! turn statistics; a persister calls these opportunistically and the core
//! never waits on it.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use wh_domain::event::TurnReason;
use wh_domain::message::Message;
use wh_domain::tool::ToolCallState;

/// Bounded in-memory record of every dispatched tool call, newest last.
pub struct ToolHistoryStore {
    entries: Mutex<VecDeque<ToolCallState>>,
    capacity: usize,
}

impl ToolHistoryStore {
    /// Default bound on retained tool-call records.
    pub const DEFAULT_CAPACITY: usize = 500;

    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, state: ToolCallState) {
        let mut entries = self.entries.lock();
        entries.push_back(state);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    pub fn snapshot(&self) -> Vec<ToolCallState> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for ToolHistoryStore {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

/// Cumulative per-session counters, updated by the turn controller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnStats {
    pub turns: u64,
    pub llm_calls: u64,
    pub tool_calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub last_turn_duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_turn_reason: Option<TurnReason>,
}

/// The bundle handed to an external persister.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    messages: Vec<Message>,
    tool_history: Vec<ToolCallState>,
    stats: TurnStats,
}

impl SessionSnapshot {
    pub fn new(messages: Vec<Message>, tool_history: Vec<ToolCallState>, stats: TurnStats) -> Self {
        Self {
            messages,
            tool_history,
            stats,
        }
    }

    pub fn get_messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn get_tool_history(&self) -> &[ToolCallState] {
        &self.tool_history
    }

    pub fn get_turn_stats(&self) -> &TurnStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wh_domain::tool::ToolCallStatus;

    fn state(id: &str) -> ToolCallState {
        ToolCallState {
            id: id.into(),
            name: "file-read".into(),
            arguments: serde_json::json!({}),
            status: ToolCallStatus::Success,
            output: None,
            error: None,
            error_kind: None,
            started_at_ms: 0,
            ended_at_ms: Some(1),
            parent_id: None,
            is_transparent: false,
        }
    }

    #[test]
    fn store_keeps_insertion_order() {
        let store = ToolHistoryStore::default();
        store.push(state("a"));
        store.push(state("b"));

        let ids: Vec<_> = store.snapshot().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn store_is_bounded() {
        let store = ToolHistoryStore::new(2);
        store.push(state("a"));
        store.push(state("b"));
        store.push(state("c"));

        let ids: Vec<_> = store.snapshot().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn snapshot_serializes() {
        let snapshot = SessionSnapshot::new(
            vec![Message::user("hello")],
            vec![state("t1")],
            TurnStats::default(),
        );
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["messages"][0]["content"], "hello");
        assert_eq!(json["tool_history"][0]["id"], "t1");
        assert_eq!(json["stats"]["turns"], 0);
    }
}
