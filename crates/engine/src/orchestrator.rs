//! Tool orchestrator — fans a batch of tool calls out to individual
//! tools, coordinates per-call lifecycle events, gates each call behind
//! the permission protocol, and merges results back into tool-role
//! messages.
//!
//! Ordering guarantee: result messages always reflect the input call
//! order, regardless of parallel completion order, so the LLM's next
//! input is deterministic. Tool failures never escape `dispatch`; they
//! travel back to the model as structured tool messages.

use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::Instrument;

use wh_domain::config::{PreviewConfig, ToolDispatchConfig};
use wh_domain::error::ErrorKind;
use wh_domain::event::ActivityPayload;
use wh_domain::message::{now_ms, Message, ToolCall};
use wh_domain::tool::{ToolCallState, ToolCallStatus, ToolOutcome};

use crate::bus::ScopedBus;
use crate::interrupt::InterruptToken;
use crate::permission::{Decision, PermissionGate};
use crate::preview;
use crate::registry::{OutputSink, Tool, ToolContext, ToolRegistry};
use crate::snapshot::ToolHistoryStore;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatch surface
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-dispatch inputs borrowed from the turn controller.
pub struct DispatchContext {
    pub interrupt: InterruptToken,
    /// Current history usage, drives the preview truncation tier.
    pub context_usage_percent: f32,
}

/// What a dispatch produced.
pub struct DispatchReport {
    /// Tool-role messages in the same order as the input calls. Denied
    /// and never-started calls contribute no message.
    pub messages: Vec<Message>,
    /// Number of calls whose outcome was successful.
    pub successful_calls: usize,
    /// A permission denial stopped the dispatch.
    pub denied: bool,
}

pub struct ToolOrchestrator {
    registry: Arc<ToolRegistry>,
    gate: Arc<PermissionGate>,
    bus: ScopedBus,
    tool_history: Arc<ToolHistoryStore>,
    config: ToolDispatchConfig,
    preview_config: PreviewConfig,
    chars_per_token: usize,
}

/// One validated entry of the dispatch plan.
enum Planned {
    Run {
        call: ToolCall,
        tool: Arc<dyn Tool>,
        transparent: bool,
        read_only: bool,
    },
    Invalid {
        call: ToolCall,
        errors: Vec<String>,
    },
}

/// Terminal record for one slot, before message assembly.
struct SlotResult {
    outcome: ToolOutcome,
    status: ToolCallStatus,
    started_at_ms: u64,
    ended_at_ms: u64,
    /// Denied calls surface no tool-role message.
    emit_message: bool,
}

impl ToolOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ToolRegistry>,
        gate: Arc<PermissionGate>,
        bus: ScopedBus,
        tool_history: Arc<ToolHistoryStore>,
        config: ToolDispatchConfig,
        preview_config: PreviewConfig,
        chars_per_token: usize,
    ) -> Self {
        Self {
            registry,
            gate,
            bus,
            tool_history,
            config,
            preview_config,
            chars_per_token: chars_per_token.max(1),
        }
    }

    // ── Entry point ────────────────────────────────────────────────

    /// Validate, gate, and execute a batch of calls, producing tool-role
    /// messages in input order.
    pub async fn dispatch(&self, calls: Vec<ToolCall>, ctx: &DispatchContext) -> DispatchReport {
        let calls = self.unwrap_batches(calls);
        let plan = self.build_plan(calls);

        let mut slots: Vec<Option<SlotResult>> = Vec::new();
        slots.resize_with(plan.len(), || None);
        let mut denied = false;

        let mut idx = 0;
        'dispatch: while idx < plan.len() {
            // Poll the token between calls: once set, no further
            // TOOL_CALL_START may fire.
            if ctx.interrupt.is_interrupted() {
                break;
            }

            // Contiguous read-only runs fan out concurrently.
            if self.config.parallel_tools && is_parallel_eligible(&plan[idx]) {
                let mut segment = vec![idx];
                let mut next = idx + 1;
                while next < plan.len() && is_parallel_eligible(&plan[next]) {
                    segment.push(next);
                    next += 1;
                }

                // Gate sequentially in input order; prompts never overlap.
                let mut approved: Vec<usize> = Vec::new();
                for &i in &segment {
                    let Planned::Run {
                        call, tool, transparent, ..
                    } = &plan[i]
                    else {
                        continue;
                    };
                    self.emit_start(call, *transparent);
                    match self
                        .gate
                        .check(tool.descriptor(), &call.arguments, &ctx.interrupt)
                        .await
                    {
                        Decision::Allow => approved.push(i),
                        Decision::Deny { reason } => {
                            slots[i] = Some(self.denied_slot(reason));
                            // Already-announced siblings end as cancelled.
                            for &j in &approved {
                                slots[j] = Some(self.cancelled_slot("dispatch stopped by denial"));
                            }
                            approved.clear();
                            denied = true;
                            ctx.interrupt.interrupt();
                            self.finish_segment(&plan, &segment, &mut slots, ctx);
                            break 'dispatch;
                        }
                    }
                }

                let semaphore = Arc::new(Semaphore::new(self.config.max_parallel.max(1)));
                let futures: Vec<_> = approved
                    .iter()
                    .map(|&i| {
                        let Planned::Run { call, tool, .. } = &plan[i] else {
                            unreachable!("approved entries are always Run");
                        };
                        let call = call.clone();
                        let tool = tool.clone();
                        let interrupt = ctx.interrupt.clone();
                        let semaphore = semaphore.clone();
                        let bus = self.bus.clone();
                        async move {
                            let permit = semaphore.acquire_owned().await;
                            if permit.is_err() || interrupt.is_interrupted() {
                                return (i, interrupted_slot());
                            }
                            (i, execute_tool(&bus, &call, tool, &interrupt).await)
                        }
                    })
                    .collect();

                for (i, slot) in join_all(futures).await {
                    slots[i] = Some(slot);
                }
                self.finish_segment(&plan, &segment, &mut slots, ctx);
                idx = next;
                continue;
            }

            // Sequential path: side-effectful or invalid entries, one at a
            // time.
            match &plan[idx] {
                Planned::Invalid { call, errors } => {
                    self.emit_start(call, false);
                    let joined = errors.join("; ");
                    tracing::warn!(tool = %call.name, error = %joined, "tool call failed validation");
                    slots[idx] = Some(validation_slot(joined));
                    self.finish_segment(&plan, &[idx], &mut slots, ctx);
                }
                Planned::Run {
                    call, tool, transparent, ..
                } => {
                    self.emit_start(call, *transparent);
                    match self
                        .gate
                        .check(tool.descriptor(), &call.arguments, &ctx.interrupt)
                        .await
                    {
                        Decision::Deny { reason } => {
                            slots[idx] = Some(self.denied_slot(reason));
                            denied = true;
                            ctx.interrupt.interrupt();
                            self.finish_segment(&plan, &[idx], &mut slots, ctx);
                            break 'dispatch;
                        }
                        Decision::Allow => {
                            let slot =
                                execute_tool(&self.bus, call, tool.clone(), &ctx.interrupt).await;
                            slots[idx] = Some(slot);
                            self.finish_segment(&plan, &[idx], &mut slots, ctx);
                        }
                    }
                }
            }
            idx += 1;
        }

        self.assemble_report(plan, slots, denied)
    }

    // ── Planning ───────────────────────────────────────────────────

    /// Replace valid batch-wrapper calls with their children; invalid
    /// batches pass through so the wrapper tool returns its structured
    /// error.
    fn unwrap_batches(&self, calls: Vec<ToolCall>) -> Vec<ToolCall> {
        let mut out = Vec::with_capacity(calls.len());
        for call in calls {
            let is_wrapper = self
                .registry
                .descriptor(&call.name)
                .is_some_and(|d| d.is_transparent_wrapper);
            if !is_wrapper {
                out.push(call);
                continue;
            }

            match parse_batch_children(&call, self.config.max_batch_size) {
                Some(children) => {
                    tracing::debug!(
                        wrapper = %call.name,
                        children = children.len(),
                        "unwrapped batch call"
                    );
                    out.extend(children);
                }
                None => out.push(call),
            }
        }
        out
    }

    fn build_plan(&self, calls: Vec<ToolCall>) -> Vec<Planned> {
        calls
            .into_iter()
            .map(|call| {
                let Some(tool) = self.registry.get(&call.name) else {
                    return Planned::Invalid {
                        errors: vec![format!("unknown tool: '{}'", call.name)],
                        call,
                    };
                };
                if let Err(errors) = self.registry.validate_args(&call.name, &call.arguments) {
                    return Planned::Invalid {
                        call,
                        errors,
                    };
                }
                let descriptor = tool.descriptor();
                Planned::Run {
                    transparent: descriptor.is_transparent_wrapper,
                    read_only: descriptor.sensitivity.is_read_only(),
                    call,
                    tool,
                }
            })
            .collect()
    }

    // ── Event + state plumbing ─────────────────────────────────────

    fn emit_start(&self, call: &ToolCall, transparent: bool) {
        self.bus.emit(ActivityPayload::ToolCallStart {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            is_transparent: transparent,
        });
    }

    /// Emit TOOL_CALL_END and record tool history for every announced
    /// call of a finished segment, in input order.
    fn finish_segment(
        &self,
        plan: &[Planned],
        indices: &[usize],
        slots: &mut [Option<SlotResult>],
        ctx: &DispatchContext,
    ) {
        for &i in indices {
            let Some(slot) = &slots[i] else {
                continue;
            };
            let call = plan[i].call();
            let transparent = matches!(plan[i], Planned::Run { transparent: true, .. });

            self.bus.emit(ActivityPayload::ToolCallEnd {
                id: call.id.clone(),
                status: slot.status,
                duration_ms: slot.ended_at_ms.saturating_sub(slot.started_at_ms),
                error_kind: slot.outcome.error_kind,
            });

            // The state keeps a usage-budgeted preview; the full output
            // travels in the tool-role message.
            let output_preview = slot.outcome.output.as_deref().map(|out| {
                preview::preview(
                    out,
                    ctx.context_usage_percent,
                    &self.preview_config,
                    self.chars_per_token,
                )
            });
            self.tool_history.push(ToolCallState {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
                status: slot.status,
                output: output_preview,
                error: slot.outcome.error.clone(),
                error_kind: slot.outcome.error_kind,
                started_at_ms: slot.started_at_ms,
                ended_at_ms: Some(slot.ended_at_ms),
                parent_id: Some(self.bus.parent_id()),
                is_transparent: transparent,
            });
        }
    }

    fn denied_slot(&self, reason: String) -> SlotResult {
        let now = now_ms();
        SlotResult {
            outcome: ToolOutcome::err(ErrorKind::PermissionDenied, reason),
            status: ToolCallStatus::Cancelled,
            started_at_ms: now,
            ended_at_ms: now,
            emit_message: false,
        }
    }

    fn cancelled_slot(&self, reason: &str) -> SlotResult {
        let now = now_ms();
        SlotResult {
            outcome: ToolOutcome::err(ErrorKind::Interrupted, reason),
            status: ToolCallStatus::Cancelled,
            started_at_ms: now,
            ended_at_ms: now,
            emit_message: false,
        }
    }

    // ── Result assembly ────────────────────────────────────────────

    fn assemble_report(
        &self,
        plan: Vec<Planned>,
        slots: Vec<Option<SlotResult>>,
        denied: bool,
    ) -> DispatchReport {
        let mut messages = Vec::new();
        let mut successful_calls = 0;

        for (entry, slot) in plan.iter().zip(slots) {
            let Some(slot) = slot else {
                continue;
            };
            if slot.outcome.success {
                successful_calls += 1;
            }
            if !slot.emit_message {
                continue;
            }

            let call = entry.call();
            let content = if slot.outcome.success {
                slot.outcome.output.clone().unwrap_or_default()
            } else {
                // Structured error the model can read and recover from.
                serde_json::json!({
                    "error": slot.outcome.error.clone().unwrap_or_else(|| "tool failed".into()),
                    "error_kind": slot.outcome.error_kind,
                })
                .to_string()
            };
            messages.push(Message::tool_result(&call.id, &call.name, content));
        }

        DispatchReport {
            messages,
            successful_calls,
            denied,
        }
    }
}

impl Planned {
    fn call(&self) -> &ToolCall {
        match self {
            Planned::Run { call, .. } | Planned::Invalid { call, .. } => call,
        }
    }
}

fn is_parallel_eligible(entry: &Planned) -> bool {
    matches!(entry, Planned::Run { read_only: true, .. })
}

// ── Execution helpers ──────────────────────────────────────────────

/// Streams tool output chunks onto the bus as they are produced.
struct BusOutput {
    bus: ScopedBus,
    call_id: String,
}

impl OutputSink for BusOutput {
    fn chunk(&self, text: &str) {
        self.bus.emit(ActivityPayload::ToolOutputChunk {
            id: self.call_id.clone(),
            chunk: text.to_owned(),
        });
    }
}

async fn execute_tool(
    bus: &ScopedBus,
    call: &ToolCall,
    tool: Arc<dyn Tool>,
    interrupt: &InterruptToken,
) -> SlotResult {
    let started_at_ms = now_ms();
    let sink = BusOutput {
        bus: bus.clone(),
        call_id: call.id.clone(),
    };
    let span = tracing::info_span!("tool.call", tool_name = %call.name, call_id = %call.id);
    let outcome = tool
        .execute(
            call.arguments.clone(),
            ToolContext {
                output: &sink,
                interrupt,
            },
        )
        .instrument(span)
        .await;

    let status = if outcome.success {
        ToolCallStatus::Success
    } else if outcome.error_kind == Some(ErrorKind::Interrupted) {
        ToolCallStatus::Cancelled
    } else {
        ToolCallStatus::Error
    };

    SlotResult {
        outcome,
        status,
        started_at_ms,
        ended_at_ms: now_ms(),
        emit_message: true,
    }
}

fn interrupted_slot() -> SlotResult {
    let now = now_ms();
    SlotResult {
        outcome: ToolOutcome::err(ErrorKind::Interrupted, "interrupted before execution"),
        status: ToolCallStatus::Cancelled,
        started_at_ms: now,
        ended_at_ms: now,
        emit_message: false,
    }
}

fn validation_slot(error: String) -> SlotResult {
    let now = now_ms();
    SlotResult {
        outcome: ToolOutcome::err(ErrorKind::ValidationError, error),
        status: ToolCallStatus::Error,
        started_at_ms: now,
        ended_at_ms: now,
        emit_message: true,
    }
}

/// Extract a valid batch's children, or `None` when the wrapper must run
/// itself and report the problem.
fn parse_batch_children(wrapper: &ToolCall, max_batch_size: usize) -> Option<Vec<ToolCall>> {
    let items = wrapper.arguments.get("calls")?.as_array()?;
    if items.is_empty() || items.len() > max_batch_size {
        return None;
    }

    let mut children = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let name = item.get("name")?.as_str()?;
        let arguments = item.get("arguments")?;
        if !arguments.is_object() {
            return None;
        }
        children.push(ToolCall {
            id: format!("{}:{}", wrapper.id, i),
            name: name.to_owned(),
            arguments: arguments.clone(),
        });
    }
    Some(children)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
