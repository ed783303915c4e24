use wh_domain::config::EngineConfig;

#[test]
fn empty_document_yields_working_defaults() {
    let config: EngineConfig = toml::from_str("").unwrap();
    assert_eq!(config.history.max_messages, 200);
    assert_eq!(config.history.max_tokens, 100_000);
    assert_eq!(config.tools.max_batch_size, 10);
    assert!(config.tools.parallel_tools);
    assert_eq!(config.cycle.tool_call_window, 20);
    assert_eq!(config.cycle.tool_call_threshold, 4);
    assert_eq!(config.checkpoint.interval, 10);
    assert_eq!(config.turn.max_tool_loops, 25);
    assert!(config.turn.duration_cap_minutes.is_none());
}

#[test]
fn partial_section_keeps_sibling_defaults() {
    let toml_str = r#"
[history]
max_messages = 50

[turn]
duration_cap_minutes = 5
validation_retry_enabled = false
"#;
    let config: EngineConfig = toml::from_str(toml_str).unwrap();
    assert_eq!(config.history.max_messages, 50);
    assert_eq!(config.history.max_tokens, 100_000);
    assert_eq!(config.turn.duration_cap_minutes, Some(5));
    assert!(!config.turn.validation_retry_enabled);
    assert_eq!(config.turn.max_validation_retries, 3);
}

#[test]
fn preview_tiers_are_monotonic_by_default() {
    let config = EngineConfig::default();
    let p = &config.preview;
    assert!(p.max_tokens_normal > p.max_tokens_moderate);
    assert!(p.max_tokens_moderate > p.max_tokens_aggressive);
    assert!(p.max_tokens_aggressive > p.max_tokens_critical);
}
