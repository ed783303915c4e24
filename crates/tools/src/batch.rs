//! Batch tool — the transparent wrapper that groups child tool calls.
//!
//! A *valid* batch never executes: the orchestrator replaces it with its
//! children before dispatch. This implementation therefore only runs for
//! invalid batches (missing or empty `calls`, oversized lists, malformed
//! child specs) and returns the structured error the model needs to fix
//! its request.

use serde_json::{json, Value};

use wh_domain::error::ErrorKind;
use wh_domain::tool::{Sensitivity, ToolOutcome};
use wh_engine::{Tool, ToolContext, ToolDescriptor};

pub struct BatchTool {
    descriptor: ToolDescriptor,
}

impl BatchTool {
    pub fn new(max_batch_size: usize) -> Self {
        Self {
            descriptor: ToolDescriptor::new(
                "batch",
                "Run several independent tool calls as one group.",
                json!({
                    "type": "object",
                    "properties": {
                        "calls": {
                            "type": "array",
                            "minItems": 1,
                            "maxItems": max_batch_size,
                            "items": {
                                "type": "object",
                                "properties": {
                                    "name": { "type": "string" },
                                    "arguments": { "type": "object" }
                                },
                                "required": ["name", "arguments"]
                            }
                        }
                    },
                    "required": ["calls"]
                }),
                Sensitivity::ReadOnly,
            )
            .transparent_wrapper(),
        }
    }
}

#[async_trait::async_trait]
impl Tool for BatchTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    async fn execute(&self, arguments: Value, _ctx: ToolContext<'_>) -> ToolOutcome {
        // Reaching execution means the orchestrator declined to unwrap.
        let detail = match arguments.get("calls") {
            None => "missing required 'calls' array",
            Some(Value::Array(items)) if items.is_empty() => "'calls' must not be empty",
            Some(Value::Array(_)) => {
                "'calls' is over the batch limit or a child is missing a string 'name' \
                 and object 'arguments'"
            }
            Some(_) => "'calls' must be an array",
        };
        ToolOutcome::err(
            ErrorKind::ValidationError,
            format!("invalid batch arguments: {detail}"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wh_engine::{InterruptToken, NullOutput};

    async fn run(args: Value) -> ToolOutcome {
        let tool = BatchTool::new(10);
        let output = NullOutput;
        let interrupt = InterruptToken::new();
        tool.execute(
            args,
            ToolContext {
                output: &output,
                interrupt: &interrupt,
            },
        )
        .await
    }

    #[test]
    fn descriptor_is_a_transparent_wrapper() {
        let tool = BatchTool::new(10);
        assert!(tool.descriptor().is_transparent_wrapper);
        assert!(!tool.descriptor().requires_confirmation);
    }

    #[tokio::test]
    async fn missing_calls_is_reported() {
        let outcome = run(json!({})).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("missing required 'calls'"));
    }

    #[tokio::test]
    async fn empty_calls_is_reported() {
        let outcome = run(json!({ "calls": [] })).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("must not be empty"));
    }

    #[tokio::test]
    async fn non_array_calls_is_reported() {
        let outcome = run(json!({ "calls": "read everything" })).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(ErrorKind::ValidationError));
    }
}
