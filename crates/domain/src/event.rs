use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::message::ToolCall;
use crate::tool::{Sensitivity, ToolCallStatus};

/// Why a turn reached `Idle` again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnReason {
    Completed,
    Interrupted,
    Cycle,
    Timeout,
    ValidationExhausted,
}

/// The scope a user picks when granting a permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionScope {
    /// Allow this single call only.
    Once,
    /// Allow this command prefix for the session.
    Command,
    /// Allow this path prefix for the session.
    Path,
    /// Allow the tool globally for the session.
    Session,
}

/// The closed set of activity payloads flowing over the event bus.
///
/// Observers subscribe per [`EventKind`] or with a wildcard; payload shapes
/// follow the engine contract and never grow ad hoc variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityPayload {
    TurnStart {
        turn_id: Uuid,
    },
    TurnEnd {
        turn_id: Uuid,
        interrupted: bool,
        reason: TurnReason,
    },
    AssistantMessageComplete {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    AssistantChunk {
        text: String,
    },
    ThoughtChunk {
        text: String,
    },
    ToolCallStart {
        id: String,
        name: String,
        arguments: serde_json::Value,
        #[serde(default)]
        is_transparent: bool,
    },
    ToolOutputChunk {
        id: String,
        chunk: String,
    },
    ToolCallEnd {
        id: String,
        status: ToolCallStatus,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_kind: Option<ErrorKind>,
    },
    PermissionRequest {
        request_id: Uuid,
        tool: String,
        summary: String,
        sensitivity: Sensitivity,
    },
    PermissionResponse {
        request_id: Uuid,
        approved: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scope: Option<PermissionScope>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    ModelSelectRequest {
        request_id: Uuid,
        models: Vec<String>,
    },
    ModelSelectResponse {
        request_id: Uuid,
        model: String,
    },
    ConversationClear,
    Error {
        message: String,
        kind: ErrorKind,
    },
}

/// Fieldless discriminant of [`ActivityPayload`], used as the subscription
/// key on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TurnStart,
    TurnEnd,
    AssistantMessageComplete,
    AssistantChunk,
    ThoughtChunk,
    ToolCallStart,
    ToolOutputChunk,
    ToolCallEnd,
    PermissionRequest,
    PermissionResponse,
    ModelSelectRequest,
    ModelSelectResponse,
    ConversationClear,
    Error,
}

impl ActivityPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            ActivityPayload::TurnStart { .. } => EventKind::TurnStart,
            ActivityPayload::TurnEnd { .. } => EventKind::TurnEnd,
            ActivityPayload::AssistantMessageComplete { .. } => {
                EventKind::AssistantMessageComplete
            }
            ActivityPayload::AssistantChunk { .. } => EventKind::AssistantChunk,
            ActivityPayload::ThoughtChunk { .. } => EventKind::ThoughtChunk,
            ActivityPayload::ToolCallStart { .. } => EventKind::ToolCallStart,
            ActivityPayload::ToolOutputChunk { .. } => EventKind::ToolOutputChunk,
            ActivityPayload::ToolCallEnd { .. } => EventKind::ToolCallEnd,
            ActivityPayload::PermissionRequest { .. } => EventKind::PermissionRequest,
            ActivityPayload::PermissionResponse { .. } => EventKind::PermissionResponse,
            ActivityPayload::ModelSelectRequest { .. } => EventKind::ModelSelectRequest,
            ActivityPayload::ModelSelectResponse { .. } => EventKind::ModelSelectResponse,
            ActivityPayload::ConversationClear => EventKind::ConversationClear,
            ActivityPayload::Error { .. } => EventKind::Error,
        }
    }
}

/// An event as delivered to subscribers. `parent_id` carries context scope
/// for nested agents (stamped by scoped buses).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub id: Uuid,
    pub timestamp_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    #[serde(flatten)]
    pub payload: ActivityPayload,
}

impl ActivityEvent {
    pub fn new(payload: ActivityPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp_ms: crate::message::now_ms(),
            parent_id: None,
            payload,
        }
    }

    pub fn with_parent(payload: ActivityPayload, parent_id: Uuid) -> Self {
        Self {
            parent_id: Some(parent_id),
            ..Self::new(payload)
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}
