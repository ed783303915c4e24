use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Coarse sensitivity category attached to each tool. Drives whether a
/// permission prompt is needed and whether a call may run in parallel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    ReadOnly,
    LocalEffect,
    Destructive,
    NetworkEgress,
}

impl Sensitivity {
    /// Read-only calls are the only ones eligible for parallel dispatch.
    pub fn is_read_only(self) -> bool {
        matches!(self, Sensitivity::ReadOnly)
    }
}

/// Tool definition exposed to the LLM: name, human description, and a JSON
/// Schema for the parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// The terminal result every tool execution produces. Errors are data, not
/// panics: the orchestrator feeds them back to the LLM as tool messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ToolOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error: None,
            error_kind: None,
        }
    }

    pub fn err(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(message.into()),
            error_kind: Some(kind),
        }
    }
}

/// Runtime status of a dispatched tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    Executing,
    Success,
    Error,
    Cancelled,
}

impl ToolCallStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Cancelled)
    }
}

/// Runtime projection of a [`crate::message::ToolCall`]: created by the
/// orchestrator on dispatch, mutated by the executing tool via chunks and a
/// terminal status, retained for session snapshots.
///
/// A "transparent" state belongs to a wrapper call (e.g. a batch) whose
/// children logically replace it in any observer's view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallState {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
    pub status: ToolCallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub started_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<uuid::Uuid>,
    #[serde(default)]
    pub is_transparent: bool,
}

impl ToolCallState {
    pub fn duration_ms(&self) -> Option<u64> {
        self.ended_at_ms.map(|end| end.saturating_sub(self.started_at_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_only_is_the_only_parallel_class() {
        assert!(Sensitivity::ReadOnly.is_read_only());
        assert!(!Sensitivity::LocalEffect.is_read_only());
        assert!(!Sensitivity::Destructive.is_read_only());
        assert!(!Sensitivity::NetworkEgress.is_read_only());
    }

    #[test]
    fn outcome_constructors() {
        let ok = ToolOutcome::ok("done");
        assert!(ok.success);
        assert_eq!(ok.output.as_deref(), Some("done"));
        assert!(ok.error_kind.is_none());

        let err = ToolOutcome::err(ErrorKind::SystemError, "boom");
        assert!(!err.success);
        assert_eq!(err.error_kind, Some(ErrorKind::SystemError));
    }

    #[test]
    fn terminal_statuses() {
        assert!(!ToolCallStatus::Pending.is_terminal());
        assert!(!ToolCallStatus::Executing.is_terminal());
        assert!(ToolCallStatus::Success.is_terminal());
        assert!(ToolCallStatus::Error.is_terminal());
        assert!(ToolCallStatus::Cancelled.is_terminal());
    }

    #[test]
    fn duration_saturates_on_clock_skew() {
        let state = ToolCallState {
            id: "t1".into(),
            name: "exec".into(),
            arguments: serde_json::json!({}),
            status: ToolCallStatus::Success,
            output: None,
            error: None,
            error_kind: None,
            started_at_ms: 100,
            ended_at_ms: Some(40),
            parent_id: None,
            is_transparent: false,
        };
        assert_eq!(state.duration_ms(), Some(0));
    }
}
