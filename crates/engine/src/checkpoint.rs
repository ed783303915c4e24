//! Ephemeral reminders — one-shot system nudges assembled into the next
//! LLM request but never written to the durable history.
//!
//! Three producers: the goal checkpoint (restate the user's original
//! request every K successful tool calls), the validation-retry corrective
//! note, and the cycle warning. All are purged at turn end by virtue of
//! living outside the history.

use wh_domain::config::CheckpointConfig;

/// Corrective note appended when the transport flags malformed tool-call
/// JSON.
pub const VALIDATION_REMINDER: &str = "The previous response contained malformed tool-call \
     JSON and was discarded. Re-issue the tool call as well-formed JSON matching the tool's \
     parameter schema.";

/// One-shot warning injected when a cycle detector fires.
pub const CYCLE_WARNING: &str = "A loop was detected: the same tool call or reasoning is \
     being repeated without progress. Change approach, or stop and summarize what is known.";

/// Tracks successful tool calls and produces the periodic goal
/// restatement.
pub struct CheckpointTracker {
    config: CheckpointConfig,
    chars_per_token: usize,
    initial_prompt: String,
    successful_calls: usize,
    restated_at: usize,
}

impl CheckpointTracker {
    pub fn new(config: CheckpointConfig, chars_per_token: usize) -> Self {
        Self {
            config,
            chars_per_token: chars_per_token.max(1),
            initial_prompt: String::new(),
            successful_calls: 0,
            restated_at: 0,
        }
    }

    /// Capture the user's original prompt at the start of a turn.
    pub fn start_turn(&mut self, prompt: &str) {
        self.initial_prompt = prompt.to_owned();
        self.successful_calls = 0;
        self.restated_at = 0;
    }

    /// Record completed tool calls from one dispatch.
    pub fn record_successes(&mut self, count: usize) {
        self.successful_calls += count;
    }

    /// Produce the restatement reminder when the interval elapsed and the
    /// prompt is substantial enough to be worth restating. At most one
    /// reminder per interval.
    pub fn due(&mut self) -> Option<String> {
        if self.config.interval == 0 {
            return None;
        }
        if self.successful_calls < self.restated_at + self.config.interval {
            return None;
        }

        let prompt_tokens = self.initial_prompt.len().div_ceil(self.chars_per_token);
        if prompt_tokens < self.config.min_prompt_tokens {
            // Trivial prompts are not worth repeating.
            self.restated_at = self.successful_calls;
            return None;
        }

        self.restated_at = self.successful_calls;
        let max_chars = self.config.max_prompt_tokens * self.chars_per_token;
        let goal = crate::preview::truncate_str(&self.initial_prompt, max_chars);
        Some(format!(
            "Checkpoint: many tool calls have run since the user's request. The original \
             request was: \"{goal}\". Stay focused on completing it."
        ))
    }
}
