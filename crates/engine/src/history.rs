//! Token-budgeted conversation state with a privileged system slot.
//!
//! The history keeps an incrementally cached token estimate and enforces
//! `max_messages` then `max_tokens` on every append by FIFO-evicting the
//! oldest non-system messages. An assistant message that carried tool
//! calls is evicted together with the tool-role messages answering it, so
//! the history never contains a tool message whose `tool_call_id` has no
//! originating assistant message.

use serde::{Deserialize, Serialize};

use wh_domain::config::HistoryConfig;
use wh_domain::message::{Message, Role};

/// Fixed per-message overhead (role tags, separators) charged by the
/// estimator, in characters.
const MESSAGE_OVERHEAD_CHARS: usize = 16;

/// A point-in-time copy of the history, restorable later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySnapshot {
    messages: Vec<Message>,
}

pub struct MessageHistory {
    messages: Vec<Message>,
    token_estimate: usize,
    config: HistoryConfig,
}

impl MessageHistory {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            messages: Vec::new(),
            token_estimate: 0,
            config,
        }
    }

    // ── Token estimate ─────────────────────────────────────────────

    /// Cheap per-message cost: characters of content plus serialized tool
    /// calls plus a fixed overhead, divided by the chars-per-token ratio,
    /// rounded up.
    fn estimate_message(&self, msg: &Message) -> usize {
        let mut chars = msg.content.len() + MESSAGE_OVERHEAD_CHARS;
        if !msg.tool_calls.is_empty() {
            chars += serde_json::to_string(&msg.tool_calls)
                .map(|s| s.len())
                .unwrap_or(0);
        }
        chars.div_ceil(self.config.chars_per_token.max(1))
    }

    pub fn estimate_tokens(&self) -> usize {
        self.token_estimate
    }

    /// Current usage as a percentage of the token budget.
    pub fn usage_percent(&self) -> f32 {
        if self.config.max_tokens == 0 {
            return 100.0;
        }
        (self.token_estimate as f32 / self.config.max_tokens as f32) * 100.0
    }

    /// Whether usage crossed the configured near-capacity fraction.
    pub fn near_capacity(&self) -> bool {
        self.usage_percent() >= self.config.near_capacity_threshold * 100.0
    }

    // ── Append / system slot ───────────────────────────────────────

    /// Append a message, keeping timestamps non-decreasing, then enforce
    /// the budgets. A `System` message routes to [`Self::replace_system`].
    pub fn append(&mut self, mut msg: Message) {
        if msg.role == Role::System {
            self.replace_system(msg.content);
            return;
        }
        if let Some(last) = self.messages.last() {
            msg.timestamp_ms = msg.timestamp_ms.max(last.timestamp_ms);
        }
        self.token_estimate += self.estimate_message(&msg);
        self.messages.push(msg);
        self.evict();
    }

    pub fn append_many(&mut self, msgs: impl IntoIterator<Item = Message>) {
        for msg in msgs {
            self.append(msg);
        }
    }

    /// Install or replace the privileged system message at index 0,
    /// adjusting the cached estimate by delta. The system message is never
    /// subject to eviction.
    pub fn replace_system(&mut self, content: String) {
        match self.messages.first_mut() {
            Some(first) if first.role == Role::System => {
                let old = first.content.len();
                first.content = content;
                let new = first.content.len();
                let per_token = self.config.chars_per_token.max(1);
                self.token_estimate = self
                    .token_estimate
                    .saturating_sub((old + MESSAGE_OVERHEAD_CHARS).div_ceil(per_token));
                self.token_estimate += (new + MESSAGE_OVERHEAD_CHARS).div_ceil(per_token);
            }
            _ => {
                let msg = Message::system(content);
                self.token_estimate += self.estimate_message(&msg);
                self.messages.insert(0, msg);
            }
        }
        self.evict();
    }

    // ── Eviction ───────────────────────────────────────────────────

    /// Enforce `max_messages` first, then `max_tokens`, dropping the
    /// oldest non-system unit each step. Stops when only the system
    /// message remains.
    fn evict(&mut self) {
        while self.len() > self.config.max_messages && self.evict_oldest_unit() {}
        while self.token_estimate > self.config.max_tokens && self.evict_oldest_unit() {}
    }

    /// Remove the oldest non-system message. When it is an assistant
    /// message with tool calls, the tool-role answers to those calls go
    /// with it (no orphan `tool_call_id`). Returns false when nothing
    /// evictable remains.
    fn evict_oldest_unit(&mut self) -> bool {
        let Some(idx) = self.messages.iter().position(|m| m.role != Role::System) else {
            return false;
        };

        let victim = self.messages.remove(idx);
        self.token_estimate = self
            .token_estimate
            .saturating_sub(self.estimate_message(&victim));

        if victim.role == Role::Assistant && !victim.tool_calls.is_empty() {
            let ids: Vec<&str> = victim.tool_calls.iter().map(|c| c.id.as_str()).collect();
            let mut i = idx;
            while i < self.messages.len() {
                let is_answer = self.messages[i].role == Role::Tool
                    && self.messages[i]
                        .tool_call_id
                        .as_deref()
                        .is_some_and(|id| ids.contains(&id));
                if is_answer {
                    let tool_msg = self.messages.remove(i);
                    self.token_estimate = self
                        .token_estimate
                        .saturating_sub(self.estimate_message(&tool_msg));
                } else {
                    i += 1;
                }
            }
        }

        tracing::debug!(role = ?victim.role, "evicted oldest history unit");
        true
    }

    // ── Accessors ──────────────────────────────────────────────────

    pub fn get_all(&self) -> &[Message] {
        &self.messages
    }

    pub fn get_tail(&self, n: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn system(&self) -> Option<&Message> {
        self.messages.first().filter(|m| m.role == Role::System)
    }

    // ── Clearing ───────────────────────────────────────────────────

    /// Drop the conversation but keep the system message.
    pub fn clear_conversation(&mut self) {
        self.messages.retain(|m| m.role == Role::System);
        self.recompute_estimate();
    }

    /// Drop everything, system message included.
    pub fn clear_all(&mut self) {
        self.messages.clear();
        self.token_estimate = 0;
    }

    // ── Snapshot / restore ─────────────────────────────────────────

    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            messages: self.messages.clone(),
        }
    }

    /// Replace the contents from a snapshot: recompute the estimate from
    /// scratch, then re-apply eviction against the current budgets.
    pub fn restore(&mut self, snapshot: HistorySnapshot) {
        self.messages = snapshot.messages;
        self.recompute_estimate();
        self.evict();
    }

    fn recompute_estimate(&mut self) {
        self.token_estimate = self
            .messages
            .iter()
            .map(|m| self.estimate_message(m))
            .sum();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
