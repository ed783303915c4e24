//! Permission gate — classifies a tool call's sensitivity and turns an
//! asynchronous user choice on the event bus into a synchronous decision
//! at the call site.
//!
//! On a trust-cache miss for a confirmation-requiring call, the gate emits
//! `PERMISSION_REQUEST`, parks a oneshot waiter keyed by `request_id`, and
//! races it against the interruption token and a timeout. Interruption and
//! timeout both count as deny, so the system never blocks indefinitely.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use uuid::Uuid;

use wh_domain::event::{ActivityPayload, EventKind, PermissionScope};
use wh_domain::tool::Sensitivity;

use crate::bus::{ScopedBus, Subscription};
use crate::interrupt::InterruptToken;
use crate::registry::ToolDescriptor;
use crate::trust::{CallFacts, TrustCache, TrustGrant, TrustLifetime, TrustScope};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Leading command tokens that escalate a shell-style call to
/// `Destructive` regardless of the tool's declared class.
const DESTRUCTIVE_COMMANDS: &[&str] = &[
    "rm", "rmdir", "dd", "mkfs", "shred", "truncate", "chown", "chmod", "kill", "killall",
    "pkill", "shutdown", "reboot", "halt", "sudo",
];

/// The gate's view of one call: effective sensitivity, the argument facts
/// matched against trust scopes, and a one-line summary for the prompt.
#[derive(Debug, Clone)]
pub struct CallClass {
    pub sensitivity: Sensitivity,
    pub facts: CallFacts,
    pub summary: String,
}

/// Classify a call from its declared sensitivity plus its arguments: a
/// `command` string is inspected for destructive leading tokens, a `path`
/// string becomes the path fact for prefix grants.
pub fn classify(descriptor: &ToolDescriptor, arguments: &Value) -> CallClass {
    let command = arguments
        .get("command")
        .and_then(Value::as_str)
        .map(str::to_owned);
    let path = arguments
        .get("path")
        .and_then(Value::as_str)
        .map(str::to_owned);

    let mut sensitivity = descriptor.sensitivity;
    if let Some(cmd) = command.as_deref() {
        let leading = cmd.split_whitespace().next().unwrap_or("");
        if DESTRUCTIVE_COMMANDS.contains(&leading) {
            sensitivity = Sensitivity::Destructive;
        }
    }

    let detail = command
        .as_deref()
        .or(path.as_deref())
        .map(str::to_owned)
        .unwrap_or_else(|| compact_args(arguments));
    let summary = if detail.is_empty() {
        descriptor.name.clone()
    } else {
        format!("{}: {}", descriptor.name, truncate(&detail, 120))
    };

    CallClass {
        sensitivity,
        facts: CallFacts {
            command,
            path,
        },
        summary,
    }
}

fn compact_args(arguments: &Value) -> String {
    match arguments {
        Value::Object(map) if map.is_empty() => String::new(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_owned();
    }
    let cut: String = s.chars().take(max_chars).collect();
    format!("{cut}…")
}

/// Whether this call must be confirmed when no grant covers it.
fn needs_confirmation(descriptor: &ToolDescriptor, class: &CallClass) -> bool {
    descriptor.requires_confirmation
        || matches!(
            class.sensitivity,
            Sensitivity::Destructive | Sensitivity::NetworkEgress
        )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The decision returned to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { reason: String },
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

struct Answer {
    approved: bool,
    scope: Option<PermissionScope>,
    reason: Option<String>,
}

/// Gates sensitive tool calls behind the prompt protocol.
pub struct PermissionGate {
    bus: ScopedBus,
    trust: Arc<TrustCache>,
    pending: Arc<Mutex<HashMap<Uuid, oneshot::Sender<Answer>>>>,
    timeout: Duration,
    _subscription: Subscription,
}

impl PermissionGate {
    /// Create a gate wired to the bus: it subscribes to
    /// `PERMISSION_RESPONSE` events and correlates them to parked waiters
    /// by `request_id`.
    pub fn new(bus: ScopedBus, trust: Arc<TrustCache>, timeout: Duration) -> Self {
        let pending: Arc<Mutex<HashMap<Uuid, oneshot::Sender<Answer>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let waiters = pending.clone();
        let subscription = bus.subscribe(EventKind::PermissionResponse, move |event| {
            if let ActivityPayload::PermissionResponse {
                request_id,
                approved,
                scope,
                reason,
            } = &event.payload
            {
                if let Some(tx) = waiters.lock().remove(request_id) {
                    let _ = tx.send(Answer {
                        approved: *approved,
                        scope: *scope,
                        reason: reason.clone(),
                    });
                }
            }
        });

        Self {
            bus,
            trust,
            pending,
            timeout,
            _subscription: subscription,
        }
    }

    /// Decide whether a call may run. Consults the trust cache first; on a
    /// miss, suspends on the prompt protocol.
    pub async fn check(
        &self,
        descriptor: &ToolDescriptor,
        arguments: &Value,
        interrupt: &InterruptToken,
    ) -> Decision {
        let class = classify(descriptor, arguments);

        if !needs_confirmation(descriptor, &class) {
            return Decision::Allow;
        }
        if self.trust.is_trusted(&descriptor.name, &class.facts) {
            tracing::debug!(tool = %descriptor.name, "trust cache hit; skipping prompt");
            return Decision::Allow;
        }

        self.prompt(descriptor, &class, interrupt).await
    }

    async fn prompt(
        &self,
        descriptor: &ToolDescriptor,
        class: &CallClass,
        interrupt: &InterruptToken,
    ) -> Decision {
        let request_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id, tx);

        self.bus.emit(ActivityPayload::PermissionRequest {
            request_id,
            tool: descriptor.name.clone(),
            summary: class.summary.clone(),
            sensitivity: class.sensitivity,
        });
        tracing::debug!(%request_id, tool = %descriptor.name, "permission prompt emitted");

        let answer = tokio::select! {
            _ = interrupt.cancelled() => {
                self.pending.lock().remove(&request_id);
                return Decision::Deny {
                    reason: "interrupted before a decision".into(),
                };
            }
            _ = tokio::time::sleep(self.timeout) => {
                self.pending.lock().remove(&request_id);
                return Decision::Deny {
                    reason: "permission request timed out".into(),
                };
            }
            answer = rx => answer,
        };

        match answer {
            Ok(answer) if answer.approved => {
                self.persist_grant(&descriptor.name, class, answer.scope);
                Decision::Allow
            }
            Ok(answer) => Decision::Deny {
                reason: answer.reason.unwrap_or_else(|| "denied by user".into()),
            },
            // The responder dropped without answering.
            Err(_) => Decision::Deny {
                reason: "permission responder went away".into(),
            },
        }
    }

    /// Cache the user's choice so matching calls skip the prompt. A `Once`
    /// (or absent) scope allows only the current call and caches nothing.
    fn persist_grant(&self, tool: &str, class: &CallClass, scope: Option<PermissionScope>) {
        let scope = match scope {
            None | Some(PermissionScope::Once) => return,
            Some(PermissionScope::Command) => match class.facts.command.as_deref() {
                Some(cmd) => TrustScope::CommandPrefix {
                    prefix: cmd.split_whitespace().next().unwrap_or(cmd).to_owned(),
                },
                None => TrustScope::Global,
            },
            Some(PermissionScope::Path) => match class.facts.path.as_deref() {
                Some(path) => TrustScope::PathPrefix {
                    prefix: path.to_owned(),
                },
                None => TrustScope::Global,
            },
            Some(PermissionScope::Session) => TrustScope::Global,
        };
        self.trust
            .insert(TrustGrant::new(tool, scope, TrustLifetime::Session));
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn exec_descriptor() -> ToolDescriptor {
        ToolDescriptor::new(
            "exec",
            "run a shell command",
            json!({ "type": "object" }),
            Sensitivity::LocalEffect,
        )
    }

    fn read_descriptor() -> ToolDescriptor {
        ToolDescriptor::new(
            "file-read",
            "read a file",
            json!({ "type": "object" }),
            Sensitivity::ReadOnly,
        )
    }

    /// Auto-responds to every permission request on the bus.
    fn auto_responder(
        bus: &EventBus,
        approved: bool,
        scope: Option<PermissionScope>,
    ) -> (Subscription, Arc<AtomicUsize>) {
        let prompts = Arc::new(AtomicUsize::new(0));
        let seen = prompts.clone();
        let responder_bus = bus.clone();
        let sub = bus.subscribe(EventKind::PermissionRequest, move |event| {
            if let ActivityPayload::PermissionRequest { request_id, .. } = &event.payload {
                seen.fetch_add(1, Ordering::SeqCst);
                responder_bus.emit(ActivityPayload::PermissionResponse {
                    request_id: *request_id,
                    approved,
                    scope,
                    reason: (!approved).then(|| "nope".into()),
                });
            }
        });
        (sub, prompts)
    }

    fn gate_on(bus: &EventBus, trust: Arc<TrustCache>) -> PermissionGate {
        PermissionGate::new(bus.scoped(Uuid::new_v4()), trust, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn read_only_unconfirmed_tool_is_allowed_without_prompt() {
        let bus = EventBus::new();
        let (_responder, prompts) = auto_responder(&bus, false, None);
        let gate = gate_on(&bus, Arc::new(TrustCache::new()));

        let decision = gate
            .check(&read_descriptor(), &json!({ "path": "a.txt" }), &InterruptToken::new())
            .await;

        assert!(decision.is_allow());
        assert_eq!(prompts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn approval_allows_the_call() {
        let bus = EventBus::new();
        let (_responder, prompts) = auto_responder(&bus, true, Some(PermissionScope::Once));
        let gate = gate_on(&bus, Arc::new(TrustCache::new()));

        let decision = gate
            .check(&exec_descriptor(), &json!({ "command": "ls" }), &InterruptToken::new())
            .await;

        assert!(decision.is_allow());
        assert_eq!(prompts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn denial_returns_the_reason() {
        let bus = EventBus::new();
        let (_responder, _) = auto_responder(&bus, false, None);
        let gate = gate_on(&bus, Arc::new(TrustCache::new()));

        let decision = gate
            .check(&exec_descriptor(), &json!({ "command": "rm -rf /" }), &InterruptToken::new())
            .await;

        assert_eq!(
            decision,
            Decision::Deny {
                reason: "nope".into()
            }
        );
    }

    #[tokio::test]
    async fn session_scope_suppresses_future_prompts() {
        let bus = EventBus::new();
        let (_responder, prompts) = auto_responder(&bus, true, Some(PermissionScope::Session));
        let trust = Arc::new(TrustCache::new());
        let gate = gate_on(&bus, trust.clone());
        let interrupt = InterruptToken::new();

        let args = json!({ "command": "git status" });
        assert!(gate.check(&exec_descriptor(), &args, &interrupt).await.is_allow());
        assert!(gate.check(&exec_descriptor(), &args, &interrupt).await.is_allow());

        assert_eq!(prompts.load(Ordering::SeqCst), 1);
        assert_eq!(trust.len(), 1);
    }

    #[tokio::test]
    async fn command_scope_grants_the_leading_token() {
        let bus = EventBus::new();
        let (_responder, prompts) = auto_responder(&bus, true, Some(PermissionScope::Command));
        let gate = gate_on(&bus, Arc::new(TrustCache::new()));
        let interrupt = InterruptToken::new();

        assert!(gate
            .check(&exec_descriptor(), &json!({ "command": "git status" }), &interrupt)
            .await
            .is_allow());
        // Same leading token: covered by the cached grant.
        assert!(gate
            .check(&exec_descriptor(), &json!({ "command": "git push" }), &interrupt)
            .await
            .is_allow());
        assert_eq!(prompts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_counts_as_deny() {
        let bus = EventBus::new();
        let gate = PermissionGate::new(
            bus.scoped(Uuid::new_v4()),
            Arc::new(TrustCache::new()),
            Duration::from_millis(20),
        );

        let decision = gate
            .check(&exec_descriptor(), &json!({ "command": "ls" }), &InterruptToken::new())
            .await;

        assert!(matches!(decision, Decision::Deny { reason } if reason.contains("timed out")));
    }

    #[tokio::test]
    async fn interruption_counts_as_deny() {
        let bus = EventBus::new();
        let gate = gate_on(&bus, Arc::new(TrustCache::new()));
        let interrupt = InterruptToken::new();
        interrupt.interrupt();

        let decision = gate
            .check(&exec_descriptor(), &json!({ "command": "ls" }), &interrupt)
            .await;

        assert!(matches!(decision, Decision::Deny { reason } if reason.contains("interrupted")));
    }

    #[test]
    fn destructive_commands_escalate_classification() {
        let class = classify(&exec_descriptor(), &json!({ "command": "rm -rf /tmp/x" }));
        assert_eq!(class.sensitivity, Sensitivity::Destructive);
        assert_eq!(class.facts.command.as_deref(), Some("rm -rf /tmp/x"));

        let benign = classify(&exec_descriptor(), &json!({ "command": "cargo check" }));
        assert_eq!(benign.sensitivity, Sensitivity::LocalEffect);
    }

    #[test]
    fn summary_prefers_command_then_path() {
        let class = classify(&exec_descriptor(), &json!({ "command": "ls -la" }));
        assert_eq!(class.summary, "exec: ls -la");

        let class = classify(&read_descriptor(), &json!({ "path": "src/lib.rs" }));
        assert_eq!(class.summary, "file-read: src/lib.rs");
        assert_eq!(class.facts.path.as_deref(), Some("src/lib.rs"));
    }
}
