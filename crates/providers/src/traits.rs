use serde::{Deserialize, Serialize};

use wh_domain::error::Result;
use wh_domain::message::{Message, ToolCall};
use wh_domain::tool::ToolDefinition;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The conversation messages to send.
    pub messages: Vec<Message>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Sampling temperature (0.0 – 2.0). `None` lets the provider choose.
    pub temperature: Option<f32>,
    /// Maximum tokens in the response. `None` lets the provider choose.
    pub max_tokens: Option<u32>,
    /// Model identifier override. When `None`, the provider uses its default.
    pub model: Option<String>,
}

/// A provider-agnostic chat completion response.
///
/// `validation_failed` is the transport's malformed-function-call flag:
/// the model produced tool-call JSON the adapter could not assemble. The
/// turn controller answers it with a corrective retry, so adapters should
/// set it instead of erroring.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    /// Textual content of the response.
    pub content: String,
    /// Tool calls emitted by the model.
    pub tool_calls: Vec<ToolCall>,
    /// Token usage information.
    pub usage: Option<Usage>,
    /// The model that actually produced the response.
    pub model: String,
    /// The reason the model stopped generating (e.g. "stop", "tool_calls").
    pub finish_reason: Option<String>,
    /// The model emitted function-call JSON that failed to parse.
    pub validation_failed: bool,
    /// Adapter-reported details when `validation_failed` is set.
    pub validation_errors: Vec<String>,
}

/// Token usage for a completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming seam
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Receives streaming deltas while a [`LlmProvider::send`] call is in
/// flight. The terminal contract is unchanged: the full response still
/// arrives as the return value.
///
/// Sinks must be cheap; long-running reactions schedule themselves.
pub trait ChunkSink: Send + Sync {
    /// Incremental assistant text.
    fn content(&self, text: &str);
    /// Incremental reasoning/thinking text.
    fn thought(&self, text: &str);
}

/// A sink that discards every delta. Useful for non-streaming callers
/// and tests.
pub struct NullSink;

impl ChunkSink for NullSink {
    fn content(&self, _text: &str) {}
    fn thought(&self, _text: &str) {}
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait that every LLM adapter must implement.
///
/// Cancellation contract: the engine races `send` against its interruption
/// token and drops the future on interrupt, which must abort any in-flight
/// request. Adapters therefore keep their state drop-safe.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request and wait for the full response,
    /// forwarding any streaming deltas into `sink`.
    async fn send(&self, req: ChatRequest, sink: &dyn ChunkSink) -> Result<ChatResponse>;

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}
