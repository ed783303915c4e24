//! Output preview budgets.
//!
//! The raw tool output always reaches the history in full; previews shown
//! in lifecycle events are truncated against a budget keyed to current
//! context usage. Four tiers tighten the budget as the context fills up.

use wh_domain::config::PreviewConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewTier {
    Normal,
    Moderate,
    Aggressive,
    Critical,
}

impl PreviewTier {
    /// Pick a tier from the context usage percentage.
    pub fn for_usage(percent: f32) -> Self {
        if percent < 50.0 {
            PreviewTier::Normal
        } else if percent < 70.0 {
            PreviewTier::Moderate
        } else if percent < 85.0 {
            PreviewTier::Aggressive
        } else {
            PreviewTier::Critical
        }
    }

    pub fn max_tokens(self, config: &PreviewConfig) -> usize {
        match self {
            PreviewTier::Normal => config.max_tokens_normal,
            PreviewTier::Moderate => config.max_tokens_moderate,
            PreviewTier::Aggressive => config.max_tokens_aggressive,
            PreviewTier::Critical => config.max_tokens_critical,
        }
    }
}

/// Truncate to a character budget, marking the cut.
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_owned();
    }
    let cut: String = s.chars().take(max_chars).collect();
    format!("{cut}… [truncated]")
}

/// Build the UI-facing preview of a tool output: cap the line count, then
/// the character budget derived from the tier's token allowance.
pub fn preview(
    output: &str,
    usage_percent: f32,
    config: &PreviewConfig,
    chars_per_token: usize,
) -> String {
    let tier = PreviewTier::for_usage(usage_percent);
    let max_chars = tier.max_tokens(config) * chars_per_token.max(1);

    let mut lines = output.lines();
    let kept: Vec<&str> = lines.by_ref().take(config.preview_lines).collect();
    let line_capped = if lines.next().is_some() {
        format!("{}\n… [truncated]", kept.join("\n"))
    } else {
        kept.join("\n")
    };

    truncate_str(&line_capped, max_chars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_follow_usage_bands() {
        assert_eq!(PreviewTier::for_usage(0.0), PreviewTier::Normal);
        assert_eq!(PreviewTier::for_usage(49.9), PreviewTier::Normal);
        assert_eq!(PreviewTier::for_usage(50.0), PreviewTier::Moderate);
        assert_eq!(PreviewTier::for_usage(70.0), PreviewTier::Aggressive);
        assert_eq!(PreviewTier::for_usage(85.0), PreviewTier::Critical);
        assert_eq!(PreviewTier::for_usage(120.0), PreviewTier::Critical);
    }

    #[test]
    fn truncate_is_noop_under_budget() {
        assert_eq!(truncate_str("short", 10), "short");
    }

    #[test]
    fn truncate_marks_the_cut() {
        let out = truncate_str("abcdefghij", 4);
        assert!(out.starts_with("abcd"));
        assert!(out.ends_with("[truncated]"));
    }

    #[test]
    fn preview_caps_lines_first() {
        let config = PreviewConfig {
            preview_lines: 2,
            ..PreviewConfig::default()
        };
        let out = preview("one\ntwo\nthree\nfour", 0.0, &config, 4);
        assert!(out.contains("one\ntwo"));
        assert!(out.contains("[truncated]"));
        assert!(!out.contains("three"));
    }

    #[test]
    fn critical_tier_shrinks_budget() {
        let config = PreviewConfig::default();
        let long = "x".repeat(config.max_tokens_normal * 4 + 100);

        let normal = preview(&long, 10.0, &config, 4);
        let critical = preview(&long, 95.0, &config, 4);
        assert!(critical.len() < normal.len());
    }
}
