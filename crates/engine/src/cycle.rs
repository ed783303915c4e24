//! Degenerate-loop detection.
//!
//! Two detectors feed the turn controller:
//!
//! - **Tool-call cycles**: a sliding window of tool-call signatures
//!   (`sha256` over the name and canonicalized arguments). A signature
//!   repeated past the threshold signals a cycle.
//! - **Thinking cycles**: sentence fragments from recent assistant text,
//!   grouped by Jaccard word-set similarity. A group reaching the
//!   repetition threshold signals a cycle.
//!
//! The first signal warrants a warning reminder; once the configured
//! warning budget is spent, a further signal terminates the turn.

use std::collections::{HashSet, VecDeque};

use sha2::{Digest, Sha256};

use wh_domain::config::CycleConfig;
use wh_domain::message::ToolCall;

/// What the turn controller should do about a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleSignal {
    None,
    /// Inject a one-shot "change approach" reminder.
    Warn,
    /// End the turn with reason `cycle`.
    Terminate,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Canonicalization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Serialize a JSON value with object keys sorted recursively and array
/// order preserved, so semantically identical arguments hash identically.
pub fn canonical_json(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        leaf => out.push_str(&leaf.to_string()),
    }
}

fn signature(call: &ToolCall) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(call.name.as_bytes());
    hasher.update([0]);
    hasher.update(canonical_json(&call.arguments).as_bytes());
    hasher.finalize().into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool-call cycle detector
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ToolCycleDetector {
    window: VecDeque<[u8; 32]>,
    config: CycleConfig,
    warnings_issued: usize,
}

impl ToolCycleDetector {
    pub fn new(config: CycleConfig) -> Self {
        Self {
            window: VecDeque::new(),
            config,
            warnings_issued: 0,
        }
    }

    /// Reset per-turn state.
    pub fn reset(&mut self) {
        self.window.clear();
        self.warnings_issued = 0;
    }

    /// Record a batch of tool calls and report whether any of the *newly
    /// recorded* signatures now repeats past the threshold. Only fresh
    /// signatures are considered, so a model that changes approach after a
    /// warning is not punished for stale window contents.
    pub fn record(&mut self, calls: &[ToolCall]) -> CycleSignal {
        let fresh: Vec<[u8; 32]> = calls.iter().map(signature).collect();
        for sig in &fresh {
            self.window.push_back(*sig);
            while self.window.len() > self.config.tool_call_window {
                self.window.pop_front();
            }
        }

        let repeated = fresh.iter().any(|sig| {
            let count = self.window.iter().filter(|s| *s == sig).count();
            count >= self.config.tool_call_threshold
        });
        if !repeated {
            return CycleSignal::None;
        }

        if self.warnings_issued < self.config.max_warnings {
            self.warnings_issued += 1;
            tracing::warn!("repeated tool-call signature detected; warning the model");
            CycleSignal::Warn
        } else {
            tracing::warn!("tool-call cycle persisted past warnings; terminating turn");
            CycleSignal::Terminate
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Thinking cycle detector
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How many recent fragments to keep for similarity grouping.
const FRAGMENT_WINDOW: usize = 40;
/// Fragments shorter than this carry too little signal to compare.
const MIN_FRAGMENT_CHARS: usize = 20;

pub struct ThinkingCycleDetector {
    fragments: VecDeque<HashSet<String>>,
    config: CycleConfig,
    warnings_issued: usize,
}

impl ThinkingCycleDetector {
    pub fn new(config: CycleConfig) -> Self {
        Self {
            fragments: VecDeque::new(),
            config,
            warnings_issued: 0,
        }
    }

    pub fn reset(&mut self) {
        self.fragments.clear();
        self.warnings_issued = 0;
    }

    /// Record one assistant message's text and report repetition across
    /// the recent fragment window.
    pub fn record(&mut self, content: &str) -> CycleSignal {
        let mut repeated = false;
        for fragment in split_fragments(content) {
            let words = word_set(&fragment);
            if words.is_empty() {
                continue;
            }

            let similar = self
                .fragments
                .iter()
                .filter(|prior| jaccard(prior, &words) >= self.config.thinking_similarity)
                .count();
            // The new fragment itself counts toward the group size.
            if similar + 1 >= self.config.thinking_repetition {
                repeated = true;
            }

            self.fragments.push_back(words);
            while self.fragments.len() > FRAGMENT_WINDOW {
                self.fragments.pop_front();
            }
        }

        if !repeated {
            return CycleSignal::None;
        }

        if self.warnings_issued < self.config.max_warnings {
            self.warnings_issued += 1;
            tracing::warn!("repetitive assistant output detected; warning the model");
            CycleSignal::Warn
        } else {
            tracing::warn!("thinking cycle persisted past warnings; terminating turn");
            CycleSignal::Terminate
        }
    }
}

/// Split text into sentence/question/action fragments.
fn split_fragments(content: &str) -> Vec<String> {
    content
        .split(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| s.chars().count() >= MIN_FRAGMENT_CHARS)
        .map(str::to_owned)
        .collect()
}

fn word_set(fragment: &str) -> HashSet<String> {
    fragment
        .split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f32;
    let union = a.union(b).count() as f32;
    intersection / union
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn read_call(path: &str) -> ToolCall {
        ToolCall {
            id: uuid::Uuid::new_v4().to_string(),
            name: "file-read".into(),
            arguments: json!({ "path": path }),
        }
    }

    #[test]
    fn canonicalization_sorts_keys_and_keeps_array_order() {
        let a = json!({ "b": 1, "a": [3, 1, 2] });
        let b = json!({ "a": [3, 1, 2], "b": 1 });
        let c = json!({ "a": [1, 2, 3], "b": 1 });

        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_ne!(canonical_json(&a), canonical_json(&c));
        assert_eq!(canonical_json(&a), r#"{"a":[3,1,2],"b":1}"#);
    }

    #[test]
    fn identical_calls_share_a_signature_despite_differing_ids() {
        let a = read_call("x");
        let b = read_call("x");
        assert_ne!(a.id, b.id);
        assert_eq!(signature(&a), signature(&b));
        assert_ne!(signature(&a), signature(&read_call("y")));
    }

    #[test]
    fn warns_at_threshold_then_terminates() {
        let config = CycleConfig {
            tool_call_threshold: 4,
            max_warnings: 1,
            ..CycleConfig::default()
        };
        let mut detector = ToolCycleDetector::new(config);

        for _ in 0..3 {
            assert_eq!(detector.record(&[read_call("x")]), CycleSignal::None);
        }
        assert_eq!(detector.record(&[read_call("x")]), CycleSignal::Warn);
        assert_eq!(detector.record(&[read_call("x")]), CycleSignal::Terminate);
    }

    #[test]
    fn changing_approach_after_warning_avoids_termination() {
        let mut detector = ToolCycleDetector::new(CycleConfig::default());

        for _ in 0..4 {
            detector.record(&[read_call("x")]);
        }
        // A different signature right after the warning: no signal, even
        // though the old repeats still sit in the window.
        assert_eq!(detector.record(&[read_call("fresh")]), CycleSignal::None);
    }

    #[test]
    fn window_bounds_memory_of_old_signatures() {
        let config = CycleConfig {
            tool_call_window: 4,
            tool_call_threshold: 3,
            ..CycleConfig::default()
        };
        let mut detector = ToolCycleDetector::new(config);

        detector.record(&[read_call("x"), read_call("x")]);
        // Push the old repeats out of the tiny window.
        detector.record(&[read_call("a"), read_call("b"), read_call("c"), read_call("d")]);
        assert_eq!(detector.record(&[read_call("x")]), CycleSignal::None);
    }

    #[test]
    fn reset_clears_turn_state() {
        let mut detector = ToolCycleDetector::new(CycleConfig::default());
        for _ in 0..4 {
            detector.record(&[read_call("x")]);
        }
        detector.reset();
        for _ in 0..3 {
            assert_eq!(detector.record(&[read_call("x")]), CycleSignal::None);
        }
    }

    #[test]
    fn repeated_sentences_trigger_thinking_warning() {
        let config = CycleConfig {
            thinking_repetition: 3,
            ..CycleConfig::default()
        };
        let mut detector = ThinkingCycleDetector::new(config);

        let text = "Let me try reading the configuration file again now.";
        assert_eq!(detector.record(text), CycleSignal::None);
        assert_eq!(detector.record(text), CycleSignal::None);
        assert_eq!(detector.record(text), CycleSignal::Warn);
        assert_eq!(detector.record(text), CycleSignal::Terminate);
    }

    #[test]
    fn distinct_sentences_do_not_group() {
        let mut detector = ThinkingCycleDetector::new(CycleConfig::default());
        assert_eq!(
            detector.record("First I will inspect the repository layout carefully."),
            CycleSignal::None
        );
        assert_eq!(
            detector.record("Next the failing test needs a closer look in isolation."),
            CycleSignal::None
        );
        assert_eq!(
            detector.record("Finally the fix lands behind the feature flag as planned."),
            CycleSignal::None
        );
    }

    #[test]
    fn near_identical_wording_groups_by_jaccard() {
        let config = CycleConfig {
            thinking_similarity: 0.7,
            thinking_repetition: 2,
            ..CycleConfig::default()
        };
        let mut detector = ThinkingCycleDetector::new(config);

        assert_eq!(
            detector.record("I will check the server logs for the error."),
            CycleSignal::None
        );
        // Same words, one swap: similarity stays above the threshold.
        assert_eq!(
            detector.record("I will check the server logs for that error."),
            CycleSignal::Warn
        );
    }

    #[test]
    fn short_fragments_are_ignored() {
        let mut detector = ThinkingCycleDetector::new(CycleConfig {
            thinking_repetition: 2,
            ..CycleConfig::default()
        });
        for _ in 0..5 {
            assert_eq!(detector.record("Ok. Done. Yes."), CycleSignal::None);
        }
    }
}
