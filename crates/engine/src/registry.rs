//! Tool registry — descriptors, the execution trait, and name → callable
//! resolution.
//!
//! The engine defines *how* tools run; the tools themselves are external.
//! Consumers implement [`Tool`] and register instances here. Registration
//! validates the name format and compiles the argument schema once.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use serde_json::Value;

use wh_domain::error::{Error, Result};
use wh_domain::tool::{Sensitivity, ToolDefinition, ToolOutcome};

use crate::interrupt::InterruptToken;
use crate::schema::ArgumentSchema;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Descriptor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Static metadata describing one tool.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub parameters: Value,
    pub sensitivity: Sensitivity,
    pub requires_confirmation: bool,
    /// A wrapper (e.g. batch) whose children replace it in observer views.
    pub is_transparent_wrapper: bool,
    pub visible_in_chat: bool,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        sensitivity: Sensitivity,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            sensitivity,
            // Anything that can touch the world defaults to confirmed.
            requires_confirmation: !sensitivity.is_read_only(),
            is_transparent_wrapper: false,
            visible_in_chat: true,
        }
    }

    pub fn with_confirmation(mut self, requires_confirmation: bool) -> Self {
        self.requires_confirmation = requires_confirmation;
        self
    }

    pub fn transparent_wrapper(mut self) -> Self {
        self.is_transparent_wrapper = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible_in_chat = false;
        self
    }

    /// The shape exposed to the LLM.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execution trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Receives incremental output while a tool runs; the orchestrator backs
/// this with `TOOL_OUTPUT_CHUNK` events.
pub trait OutputSink: Send + Sync {
    fn chunk(&self, text: &str);
}

/// A sink that discards chunks (tests, fire-and-forget execution).
pub struct NullOutput;

impl OutputSink for NullOutput {
    fn chunk(&self, _text: &str) {}
}

/// Ambient services handed to an executing tool. Tools never touch the
/// message history; they communicate through their return value and the
/// output sink, and poll `interrupt` at their own blocking points.
pub struct ToolContext<'a> {
    pub output: &'a dyn OutputSink,
    pub interrupt: &'a InterruptToken,
}

/// The execution entry point every tool implements.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> &ToolDescriptor;

    async fn execute(&self, arguments: Value, ctx: ToolContext<'_>) -> ToolOutcome;

    /// Optional compact preview of a result for UI surfaces.
    fn result_preview(&self, _outcome: &ToolOutcome) -> Option<String> {
        None
    }

    /// Optional one-line subtext describing a call (e.g. the command).
    fn subtext(&self, _arguments: &Value) -> Option<String> {
        None
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    schema: ArgumentSchema,
}

/// Name-keyed tool store consulted by the orchestrator.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
}

/// Lowercase kebab-case segments, optionally dotted: `exec`,
/// `file-read`, `memory.search`.
fn name_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        regex::Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*(\.[a-z0-9]+(-[a-z0-9]+)*)*$")
            .expect("tool name pattern is valid")
    })
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Fails on a malformed name, a duplicate name, or an
    /// uncompilable argument schema.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<()> {
        let descriptor = tool.descriptor().clone();
        if !name_pattern().is_match(&descriptor.name) {
            return Err(Error::Config(format!(
                "invalid tool name '{}': expected lowercase kebab-case segments",
                descriptor.name
            )));
        }

        let schema = ArgumentSchema::compile(&descriptor.parameters)?;

        let mut tools = self.tools.write();
        if tools.contains_key(&descriptor.name) {
            return Err(Error::Config(format!(
                "tool '{}' is already registered",
                descriptor.name
            )));
        }
        tracing::debug!(tool = %descriptor.name, sensitivity = ?descriptor.sensitivity, "tool registered");
        tools.insert(
            descriptor.name.clone(),
            RegisteredTool {
                tool,
                schema,
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().get(name).map(|r| r.tool.clone())
    }

    pub fn descriptor(&self, name: &str) -> Option<ToolDescriptor> {
        self.tools.read().get(name).map(|r| r.tool.descriptor().clone())
    }

    /// Validate call arguments against the tool's compiled schema.
    pub fn validate_args(&self, name: &str, args: &Value) -> std::result::Result<(), Vec<String>> {
        match self.tools.read().get(name) {
            Some(registered) => registered.schema.validate(args),
            None => Err(vec![format!("unknown tool: '{name}'")]),
        }
    }

    /// The definitions advertised to the LLM, name-sorted for a stable
    /// request shape.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let tools = self.tools.read();
        let mut defs: Vec<ToolDefinition> = tools
            .values()
            .map(|r| r.tool.descriptor().definition())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
