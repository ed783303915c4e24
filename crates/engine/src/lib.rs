//! Wheelhouse engine — the execution core of a terminal coding assistant.
//!
//! The [`turn::Agent`] drives a multi-turn conversation with an LLM,
//! dispatches tool invocations through the [`orchestrator`], gates
//! sensitive actions behind the [`permission`] protocol backed by the
//! [`trust`] cache, and broadcasts fine-grained activity over the typed
//! [`bus`].
//!
//! Collaborators are injected explicitly (no global registry): build an
//! agent with [`turn::AgentBuilder`], register [`registry::Tool`]
//! implementations, subscribe observers on the bus, and call
//! [`turn::Agent::send_message`].

pub mod bus;
pub mod checkpoint;
pub mod cycle;
pub mod history;
pub mod interrupt;
pub mod orchestrator;
pub mod permission;
pub mod preview;
pub mod registry;
pub mod schema;
pub mod snapshot;
pub mod timing;
pub mod trust;
pub mod turn;

pub use bus::{EventBus, ScopedBus, Subscription};
pub use history::{HistorySnapshot, MessageHistory};
pub use interrupt::{InterruptRegistry, InterruptToken};
pub use orchestrator::{DispatchContext, DispatchReport, ToolOrchestrator};
pub use permission::{Decision, PermissionGate};
pub use registry::{NullOutput, OutputSink, Tool, ToolContext, ToolDescriptor, ToolRegistry};
pub use snapshot::{SessionSnapshot, ToolHistoryStore, TurnStats};
pub use trust::{CallFacts, TrustCache, TrustGrant, TrustLifetime, TrustScope};
pub use turn::{Agent, AgentBuilder};
