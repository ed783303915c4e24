use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level engine config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The fixed configuration surface consulted by the engine core.
///
/// Every field has a serde default so a partial (or empty) TOML document
/// deserializes into a working configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub tools: ToolDispatchConfig,
    #[serde(default)]
    pub cycle: CycleConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub turn: TurnConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// History budget
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "d_200")]
    pub max_messages: usize,
    #[serde(default = "d_100_000")]
    pub max_tokens: usize,
    /// Characters-per-token ratio used by the cheap estimator.
    #[serde(default = "d_4")]
    pub chars_per_token: usize,
    /// Usage fraction above which the context counts as near capacity.
    #[serde(default = "d_0_85")]
    pub near_capacity_threshold: f32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_messages: 200,
            max_tokens: 100_000,
            chars_per_token: 4,
            near_capacity_threshold: 0.85,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDispatchConfig {
    /// When true, read-only calls in one batch run concurrently.
    #[serde(default = "d_true")]
    pub parallel_tools: bool,
    /// Fan-out cap for concurrent read-only calls.
    #[serde(default = "d_4")]
    pub max_parallel: usize,
    /// Maximum children a batch wrapper may carry and still unwrap.
    #[serde(default = "d_10")]
    pub max_batch_size: usize,
}

impl Default for ToolDispatchConfig {
    fn default() -> Self {
        Self {
            parallel_tools: true,
            max_parallel: 4,
            max_batch_size: 10,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cycle detection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleConfig {
    /// Sliding window of recent tool-call signatures.
    #[serde(default = "d_20")]
    pub tool_call_window: usize,
    /// Identical signatures within the window that trigger a signal.
    #[serde(default = "d_4")]
    pub tool_call_threshold: usize,
    /// Jaccard word-set similarity above which two fragments group.
    #[serde(default = "d_0_7")]
    pub thinking_similarity: f32,
    /// Group size that counts as a thinking cycle.
    #[serde(default = "d_3")]
    pub thinking_repetition: usize,
    /// Warnings injected before a sustained cycle terminates the turn.
    #[serde(default = "d_1")]
    pub max_warnings: usize,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            tool_call_window: 20,
            tool_call_threshold: 4,
            thinking_similarity: 0.7,
            thinking_repetition: 3,
            max_warnings: 1,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Checkpoint reminders
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Successful tool calls between goal restatements.
    #[serde(default = "d_10")]
    pub interval: usize,
    /// Prompts shorter than this (estimated tokens) are never restated.
    #[serde(default = "d_10")]
    pub min_prompt_tokens: usize,
    /// Restatements are truncated to this many estimated tokens.
    #[serde(default = "d_500")]
    pub max_prompt_tokens: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            interval: 10,
            min_prompt_tokens: 10,
            max_prompt_tokens: 500,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    /// Maximum number of tool-call loops before the turn force-stops.
    #[serde(default = "d_25")]
    pub max_tool_loops: usize,
    /// Optional wall-clock cap for one turn, in minutes.
    #[serde(default)]
    pub duration_cap_minutes: Option<u64>,
    /// Re-call the LLM with a corrective reminder on malformed tool JSON.
    #[serde(default = "d_true")]
    pub validation_retry_enabled: bool,
    /// Bound on consecutive validation retries before the turn ends.
    #[serde(default = "d_3")]
    pub max_validation_retries: usize,
    /// How long a permission prompt may wait before it counts as denied.
    #[serde(default = "d_300")]
    pub permission_timeout_secs: u64,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            max_tool_loops: 25,
            duration_cap_minutes: None,
            validation_retry_enabled: true,
            max_validation_retries: 3,
            permission_timeout_secs: 300,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Result previews
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Preview budgets keyed to context usage. The raw tool output always goes
/// to the history in full; these caps only shape UI-facing previews.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewConfig {
    #[serde(default = "d_20")]
    pub preview_lines: usize,
    #[serde(default = "d_2000")]
    pub max_tokens_normal: usize,
    #[serde(default = "d_1000")]
    pub max_tokens_moderate: usize,
    #[serde(default = "d_500")]
    pub max_tokens_aggressive: usize,
    #[serde(default = "d_200")]
    pub max_tokens_critical: usize,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            preview_lines: 20,
            max_tokens_normal: 2000,
            max_tokens_moderate: 1000,
            max_tokens_aggressive: 500,
            max_tokens_critical: 200,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Serde default helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn d_true() -> bool {
    true
}
fn d_1() -> usize {
    1
}
fn d_3() -> usize {
    3
}
fn d_4() -> usize {
    4
}
fn d_10() -> usize {
    10
}
fn d_20() -> usize {
    20
}
fn d_25() -> usize {
    25
}
fn d_200() -> usize {
    200
}
fn d_500() -> usize {
    500
}
fn d_1000() -> usize {
    1000
}
fn d_2000() -> usize {
    2000
}
fn d_100_000() -> usize {
    100_000
}
fn d_300() -> u64 {
    300
}
fn d_0_7() -> f32 {
    0.7
}
fn d_0_85() -> f32 {
    0.85
}
