//! Turn controller — the outer loop that drives one user turn.
//!
//! `send_message` appends the user input, then loops: assemble history
//! plus any pending ephemeral reminders, call the LLM (racing the
//! interruption token), validate the response, dispatch tool calls
//! through the orchestrator, and repeat until the model answers with
//! content only or a terminal condition fires (interruption, cycle,
//! duration cap, loop cap, validation exhaustion).
//!
//! Terminal paths return a canonical user-visible string so downstream
//! UIs render consistently. Ephemeral reminders live outside the durable
//! history and are delivered to at most one LLM call each.

use std::sync::Arc;
use std::time::Duration;

use tracing::Instrument;
use uuid::Uuid;

use wh_domain::config::EngineConfig;
use wh_domain::error::ErrorKind;
use wh_domain::event::{ActivityPayload, TurnReason};
use wh_domain::message::Message;
use wh_providers::{ChatRequest, ChunkSink, LlmProvider};

use crate::bus::{EventBus, ScopedBus};
use crate::checkpoint::{CheckpointTracker, CYCLE_WARNING, VALIDATION_REMINDER};
use crate::cycle::{CycleSignal, ThinkingCycleDetector, ToolCycleDetector};
use crate::history::MessageHistory;
use crate::interrupt::InterruptToken;
use crate::orchestrator::{DispatchContext, ToolOrchestrator};
use crate::permission::PermissionGate;
use crate::registry::ToolRegistry;
use crate::snapshot::{SessionSnapshot, ToolHistoryStore, TurnStats};
use crate::timing::TurnClock;
use crate::trust::TrustCache;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Canonical terminal strings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const INTERRUPTED_TEXT: &str = "[turn aborted: permission denied or interrupted by user]";
pub const TIMEOUT_TEXT: &str = "[turn aborted: duration cap exceeded]";
pub const CYCLE_TEXT: &str = "[turn aborted: repeated activity without progress]";
pub const VALIDATION_EXHAUSTED_TEXT: &str =
    "[turn aborted: the model kept producing malformed tool calls]";
pub const LOOP_LIMIT_TEXT: &str = "[turn aborted: tool loop limit reached]";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming sink
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Forwards provider streaming deltas onto the bus.
struct BusChunkSink {
    bus: ScopedBus,
}

impl ChunkSink for BusChunkSink {
    fn content(&self, text: &str) {
        self.bus.emit(ActivityPayload::AssistantChunk {
            text: text.to_owned(),
        });
    }

    fn thought(&self, text: &str) {
        self.bus.emit(ActivityPayload::ThoughtChunk {
            text: text.to_owned(),
        });
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Builder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Wires an [`Agent`] with explicit collaborators; anything not provided
/// gets a fresh default.
pub struct AgentBuilder {
    provider: Arc<dyn LlmProvider>,
    config: EngineConfig,
    bus: Option<EventBus>,
    registry: Option<Arc<ToolRegistry>>,
    trust: Option<Arc<TrustCache>>,
    system_prompt: Option<String>,
    session_id: Option<Uuid>,
}

impl AgentBuilder {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            config: EngineConfig::default(),
            bus: None,
            registry: None,
            trust: None,
            system_prompt: None,
            session_id: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn trust(mut self, trust: Arc<TrustCache>) -> Self {
        self.trust = Some(trust);
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// The scope id stamped as `parent_id` on every event this agent
    /// emits. Nested agents pass their own id here.
    pub fn session_id(mut self, id: Uuid) -> Self {
        self.session_id = Some(id);
        self
    }

    pub fn build(self) -> Agent {
        let session_id = self.session_id.unwrap_or_else(Uuid::new_v4);
        let bus = self.bus.unwrap_or_default();
        let scoped = bus.scoped(session_id);
        let registry = self.registry.unwrap_or_default();
        let trust = self.trust.unwrap_or_default();
        let tool_history = Arc::new(ToolHistoryStore::default());

        let gate = Arc::new(PermissionGate::new(
            bus.scoped(session_id),
            trust.clone(),
            Duration::from_secs(self.config.turn.permission_timeout_secs),
        ));
        let orchestrator = ToolOrchestrator::new(
            registry.clone(),
            gate,
            scoped.clone(),
            tool_history.clone(),
            self.config.tools.clone(),
            self.config.preview.clone(),
            self.config.history.chars_per_token,
        );

        let mut history = MessageHistory::new(self.config.history.clone());
        if let Some(prompt) = self.system_prompt {
            history.replace_system(prompt);
        }

        Agent {
            provider: self.provider,
            registry,
            trust,
            scoped,
            bus,
            history,
            orchestrator,
            interrupt: InterruptToken::new(),
            tool_cycles: ToolCycleDetector::new(self.config.cycle.clone()),
            thinking_cycles: ThinkingCycleDetector::new(self.config.cycle.clone()),
            checkpoint: CheckpointTracker::new(
                self.config.checkpoint.clone(),
                self.config.history.chars_per_token,
            ),
            tool_history,
            stats: TurnStats::default(),
            reminders: Vec::new(),
            session_id,
            config: self.config,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The turn controller. Exclusively owns its message history and
/// interruption token; everything else is shared through `Arc`s injected
/// at build time.
pub struct Agent {
    provider: Arc<dyn LlmProvider>,
    registry: Arc<ToolRegistry>,
    trust: Arc<TrustCache>,
    bus: EventBus,
    scoped: ScopedBus,
    history: MessageHistory,
    orchestrator: ToolOrchestrator,
    interrupt: InterruptToken,
    tool_cycles: ToolCycleDetector,
    thinking_cycles: ThinkingCycleDetector,
    checkpoint: CheckpointTracker,
    tool_history: Arc<ToolHistoryStore>,
    stats: TurnStats,
    /// Ephemeral reminders pending for the next LLM call only. Never part
    /// of the durable history.
    reminders: Vec<Message>,
    session_id: Uuid,
    config: EngineConfig,
}

impl Agent {
    pub fn builder(provider: Arc<dyn LlmProvider>) -> AgentBuilder {
        AgentBuilder::new(provider)
    }

    // ── Entry point ────────────────────────────────────────────────

    /// Run one full turn and return the final assistant text (or a
    /// canonical terminal string). Never panics and never returns an
    /// error: failures become text the caller can render.
    pub async fn send_message(&mut self, user_text: &str) -> String {
        let turn_id = Uuid::new_v4();
        let span = tracing::info_span!("turn", %turn_id, session_id = %self.session_id);
        self.run_turn_outer(user_text, turn_id).instrument(span).await
    }

    async fn run_turn_outer(&mut self, user_text: &str, turn_id: Uuid) -> String {
        tracing::debug!("turn started");
        self.stats.turns += 1;
        self.scoped.emit(ActivityPayload::TurnStart { turn_id });

        let clock = TurnClock::start(self.config.turn.duration_cap_minutes);
        let (reason, text) = self.run_turn(user_text, &clock).await;

        // Cleanup: drop unconsumed reminders, expire per-turn grants, and
        // leave the token observable when the turn did not complete.
        self.reminders.clear();
        self.trust.end_turn();
        if reason != TurnReason::Completed {
            self.interrupt.interrupt();
        }

        self.stats.last_turn_duration_ms = clock.elapsed_ms();
        self.stats.last_turn_reason = Some(reason);

        self.scoped.emit(ActivityPayload::TurnEnd {
            turn_id,
            interrupted: reason != TurnReason::Completed,
            reason,
        });
        tracing::debug!(?reason, duration_ms = clock.elapsed_ms(), "turn finished");
        text
    }

    // ── The loop ───────────────────────────────────────────────────

    async fn run_turn(&mut self, user_text: &str, clock: &TurnClock) -> (TurnReason, String) {
        self.interrupt.clear();
        self.tool_cycles.reset();
        self.thinking_cycles.reset();
        self.reminders.clear();

        self.history.append(Message::user(user_text));
        self.checkpoint.start_turn(user_text);

        let mut validation_attempts = 0usize;
        let mut loops = 0usize;

        loop {
            if clock.exceeded() {
                return (TurnReason::Timeout, TIMEOUT_TEXT.into());
            }
            if self.interrupt.is_interrupted() {
                return (TurnReason::Interrupted, INTERRUPTED_TEXT.into());
            }

            // Assemble history plus pending reminders; each reminder is
            // delivered to exactly one call.
            let mut messages = self.history.get_all().to_vec();
            messages.extend(self.reminders.drain(..));
            let request = ChatRequest {
                messages,
                tools: self.registry.definitions(),
                ..ChatRequest::default()
            };

            let sink = BusChunkSink {
                bus: self.scoped.clone(),
            };
            // Primary suspension point: racing the token aborts the
            // transport by dropping its future.
            let result = tokio::select! {
                _ = self.interrupt.cancelled() => {
                    return (TurnReason::Interrupted, INTERRUPTED_TEXT.into());
                }
                result = self.provider.send(request, &sink) => result,
            };
            self.stats.llm_calls += 1;

            let response = match result {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!(error = %e, "LLM transport failed");
                    self.scoped.emit(ActivityPayload::Error {
                        message: e.to_string(),
                        kind: ErrorKind::TransportError,
                    });
                    return (TurnReason::Interrupted, format!("error talking to model: {e}"));
                }
            };
            if let Some(usage) = response.usage {
                self.stats.prompt_tokens += u64::from(usage.prompt_tokens);
                self.stats.completion_tokens += u64::from(usage.completion_tokens);
            }

            // Malformed function-call JSON: retry with a corrective note.
            if response.validation_failed && self.config.turn.validation_retry_enabled {
                validation_attempts += 1;
                if validation_attempts > self.config.turn.max_validation_retries {
                    return (TurnReason::ValidationExhausted, VALIDATION_EXHAUSTED_TEXT.into());
                }
                tracing::warn!(
                    attempt = validation_attempts,
                    errors = ?response.validation_errors,
                    "malformed tool-call JSON; re-calling with corrective reminder"
                );
                self.reminders.push(Message::system(VALIDATION_REMINDER));
                continue;
            }
            validation_attempts = 0;

            let assistant = if response.tool_calls.is_empty() {
                Message::assistant(&response.content)
            } else {
                Message::assistant_with_calls(&response.content, response.tool_calls.clone())
            };
            self.history.append(assistant);
            self.scoped.emit(ActivityPayload::AssistantMessageComplete {
                content: response.content.clone(),
                tool_calls: response.tool_calls.clone(),
            });

            // Content-only response completes the turn.
            if response.tool_calls.is_empty() {
                return (TurnReason::Completed, response.content);
            }

            // Feed both cycle detectors before dispatching.
            if !response.content.is_empty() {
                match self.thinking_cycles.record(&response.content) {
                    CycleSignal::Warn => self.push_cycle_warning(),
                    CycleSignal::Terminate => return (TurnReason::Cycle, CYCLE_TEXT.into()),
                    CycleSignal::None => {}
                }
            }
            match self.tool_cycles.record(&response.tool_calls) {
                CycleSignal::Warn => self.push_cycle_warning(),
                CycleSignal::Terminate => return (TurnReason::Cycle, CYCLE_TEXT.into()),
                CycleSignal::None => {}
            }

            let dispatch_ctx = DispatchContext {
                interrupt: self.interrupt.clone(),
                context_usage_percent: self.history.usage_percent(),
            };
            let report = self
                .orchestrator
                .dispatch(response.tool_calls, &dispatch_ctx)
                .await;
            self.stats.tool_calls += report.messages.len() as u64;
            self.history.append_many(report.messages);

            // Denial or external abort during dispatch ends the turn.
            if self.interrupt.is_interrupted() {
                return (TurnReason::Interrupted, INTERRUPTED_TEXT.into());
            }

            self.checkpoint.record_successes(report.successful_calls);
            if let Some(text) = self.checkpoint.due() {
                self.reminders.push(Message::system(text));
            }

            loops += 1;
            if loops >= self.config.turn.max_tool_loops {
                tracing::warn!(loops, "tool loop limit reached; force-stopping turn");
                return (TurnReason::Interrupted, LOOP_LIMIT_TEXT.into());
            }
        }
    }

    fn push_cycle_warning(&mut self) {
        if !self.reminders.iter().any(|m| m.content == CYCLE_WARNING) {
            self.reminders.push(Message::system(CYCLE_WARNING));
        }
    }

    // ── Observability surface ──────────────────────────────────────

    /// Whether the last turn ended without completing.
    pub fn was_interrupted(&self) -> bool {
        self.stats
            .last_turn_reason
            .is_some_and(|r| r != TurnReason::Completed)
    }

    /// Handle for out-of-band aborts: a UI holds a clone and calls
    /// `interrupt()` when the user hits escape.
    pub fn interrupt_handle(&self) -> InterruptToken {
        self.interrupt.clone()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn history(&self) -> &MessageHistory {
        &self.history
    }

    /// Drop the conversation (the system prompt survives) and announce it.
    pub fn clear_conversation(&mut self) {
        self.history.clear_conversation();
        self.scoped.emit(ActivityPayload::ConversationClear);
    }

    // ── Session snapshot adapter (read-only, for persisters) ───────

    pub fn get_messages(&self) -> Vec<Message> {
        self.history.get_all().to_vec()
    }

    pub fn get_tool_history(&self) -> Vec<wh_domain::tool::ToolCallState> {
        self.tool_history.snapshot()
    }

    pub fn get_turn_stats(&self) -> TurnStats {
        self.stats.clone()
    }

    pub fn session_snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::new(
            self.get_messages(),
            self.get_tool_history(),
            self.get_turn_stats(),
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use wh_domain::error::Result;
    use wh_domain::message::Role;
    use wh_providers::ChatResponse;

    struct FixedProvider {
        content: &'static str,
    }

    #[async_trait::async_trait]
    impl LlmProvider for FixedProvider {
        async fn send(&self, _req: ChatRequest, sink: &dyn ChunkSink) -> Result<ChatResponse> {
            sink.content(self.content);
            Ok(ChatResponse {
                content: self.content.into(),
                model: "fixed".into(),
                ..ChatResponse::default()
            })
        }

        fn provider_id(&self) -> &str {
            "fixed"
        }
    }

    fn agent_with(content: &'static str) -> Agent {
        Agent::builder(Arc::new(FixedProvider { content })).build()
    }

    #[tokio::test]
    async fn builder_installs_system_prompt() {
        let agent = Agent::builder(Arc::new(FixedProvider { content: "hi" }))
            .system_prompt("be terse")
            .build();
        let messages = agent.get_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, "be terse");
    }

    #[tokio::test]
    async fn fresh_agent_reports_no_interruption() {
        let agent = agent_with("hi");
        assert!(!agent.was_interrupted());
        assert_eq!(agent.get_turn_stats().turns, 0);
    }

    #[tokio::test]
    async fn clear_conversation_keeps_system_and_announces() {
        let mut agent = Agent::builder(Arc::new(FixedProvider { content: "ok" }))
            .system_prompt("rules")
            .build();
        agent.send_message("hello").await;
        assert!(agent.get_messages().len() > 1);

        let cleared = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = cleared.clone();
        let _sub = agent
            .bus()
            .subscribe(wh_domain::event::EventKind::ConversationClear, move |_| {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
            });

        agent.clear_conversation();
        let messages = agent.get_messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_system());
        assert!(cleared.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn chunk_sink_forwards_assistant_deltas() {
        let mut agent = agent_with("streamed");
        let chunks = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = chunks.clone();
        let _sub = agent.bus().subscribe(
            wh_domain::event::EventKind::AssistantChunk,
            move |event| {
                if let ActivityPayload::AssistantChunk { text } = &event.payload {
                    sink.lock().push(text.clone());
                }
            },
        );

        agent.send_message("go").await;
        assert_eq!(*chunks.lock(), vec!["streamed"]);
    }
}
