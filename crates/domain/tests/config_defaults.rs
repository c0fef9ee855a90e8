use tether_domain::config::{Config, PruningMode, ThinkingMode};

#[test]
fn default_provider_is_openai_style() {
    let config = Config::default();
    assert_eq!(config.llm.base_url, "https://api.openai.com/v1");
    assert_eq!(config.llm.thinking_mode, ThinkingMode::Off);
}

#[test]
fn explicit_llm_block_parses() {
    let toml_str = r#"
[llm]
base_url = "https://api.anthropic.com/v1"
model = "claude-sonnet-4"
temperature = 0.2
max_tokens = 4096
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.llm.base_url, "https://api.anthropic.com/v1");
    assert_eq!(config.llm.model, "claude-sonnet-4");
    assert_eq!(config.llm.max_tokens, 4096);
    // Untouched sections keep their defaults.
    assert_eq!(config.compaction.keep_messages, 30);
    assert_eq!(config.pulse.interval_ms, 1_000);
}

#[test]
fn pruning_section_round_trips() {
    let toml_str = r#"
[pruning]
mode = "cache-ttl"
keep_last_assistants = 5

[pruning.soft_trim]
head_chars = 1000
tail_chars = 500

[pruning.hard_clear]
enabled = false
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.pruning.mode, PruningMode::CacheTtl);
    assert_eq!(config.pruning.keep_last_assistants, 5);
    assert_eq!(config.pruning.soft_trim.head_chars, 1_000);
    assert_eq!(config.pruning.soft_trim.tail_chars, 500);
    assert!(!config.pruning.hard_clear.enabled);
}

#[test]
fn context_override_is_optional() {
    let config = Config::default();
    assert!(config.context.context_tokens.is_none());

    let config: Config = toml::from_str("[context]\ncontext_tokens = 32768").unwrap();
    assert_eq!(config.context.context_tokens, Some(32_768));
}

#[test]
fn serialized_config_parses_back() {
    let config = Config::default();
    let toml_str = toml::to_string(&config).unwrap();
    let parsed: Config = toml::from_str(&toml_str).unwrap();
    assert_eq!(parsed.recall.limit, config.recall.limit);
    assert_eq!(parsed.truncation.max_bytes, config.truncation.max_bytes);
}
