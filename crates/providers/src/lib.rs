//! LLM transport seam for the Wheelhouse engine.
//!
//! The engine only ever sees [`LlmProvider`]: a request in, a terminal
//! [`ChatResponse`] out, with optional streaming deltas through a
//! [`ChunkSink`]. Concrete HTTP adapters live outside this workspace.

mod traits;

pub use traits::{ChatRequest, ChatResponse, ChunkSink, LlmProvider, NullSink, Usage};
