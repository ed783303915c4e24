use serde::{Deserialize, Serialize};

/// Wall-clock milliseconds used for message stamps.
///
/// Callers that need strict monotonicity (the history) clamp against the
/// previous stamp on insertion.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// A function-call-shaped request produced by the LLM inside an assistant
/// message. The `id` is assigned by the transport and treated opaquely;
/// it must be unique within a single assistant response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in the conversation.
///
/// Invariants (enforced by the history, not by construction):
/// - at most one `System` message, always at index 0 when present;
/// - a `Tool` message references a `tool_call_id` from an earlier
///   assistant message in the same history;
/// - `content` may be empty when `tool_calls` is non-empty;
/// - `timestamp_ms` is non-decreasing in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Set on `Tool` messages: the id of the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Set on `Tool` messages: the name of the tool that produced it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    pub timestamp_ms: u64,
}

// ── Convenience constructors ───────────────────────────────────────

impl Message {
    fn base(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
            timestamp_ms: now_ms(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::base(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::base(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::base(Role::Assistant, content)
    }

    pub fn assistant_with_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::base(Role::Assistant, content)
        }
    }

    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            tool_name: Some(tool_name.into()),
            ..Self::base(Role::Tool, content)
        }
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }
}
