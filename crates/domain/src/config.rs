use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub pruning: PruningConfig,
    #[serde(default)]
    pub compaction: CompactionConfig,
    #[serde(default)]
    pub pulse: PulseConfig,
    #[serde(default)]
    pub tool_loop: ToolLoopConfig,
    #[serde(default)]
    pub truncation: TruncationConfig,
    #[serde(default)]
    pub recall: RecallConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
}

impl Config {
    /// Load config from a TOML file. A missing file yields the defaults.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Storage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for durable state (sessions, pulse events, tasks).
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,
    /// Cache path holding the boot-time system prompt for new sessions.
    #[serde(default)]
    pub bootstrap_prompt_path: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_path: d_state_path(),
            bootstrap_prompt_path: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider base URL. The provider kind is inferred from it.
    #[serde(default = "d_base_url")]
    pub base_url: String,
    /// Environment variable holding the API key.
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,
    /// Default model identifier.
    #[serde(default = "d_model")]
    pub model: String,
    /// Per-request timeout in seconds for top-level calls.
    #[serde(default = "d_120")]
    pub http_timeout_secs: u64,
    #[serde(default = "d_temp")]
    pub temperature: f32,
    #[serde(default = "d_1000")]
    pub max_tokens: u32,
    #[serde(default)]
    pub thinking_mode: ThinkingMode,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: d_base_url(),
            api_key_env: d_api_key_env(),
            model: d_model(),
            http_timeout_secs: 120,
            temperature: 0.7,
            max_tokens: 1000,
            thinking_mode: ThinkingMode::Off,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingMode {
    #[default]
    Off,
    On,
    Stream,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context window management
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Overrides the provider-advertised context window when set.
    #[serde(default)]
    pub context_tokens: Option<usize>,
    /// Tokens left free below the window.
    #[serde(default = "d_1024")]
    pub reserve_tokens: usize,
    /// Tokens reserved for the next user turn.
    #[serde(default = "d_800")]
    pub soft_tokens: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            context_tokens: None,
            reserve_tokens: 1024,
            soft_tokens: 800,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context pruning (cache-ttl model)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruningConfig {
    #[serde(default)]
    pub mode: PruningMode,
    /// Number of recent assistant messages whose tool results are protected.
    #[serde(default = "d_3u")]
    pub keep_last_assistants: usize,
    /// Only prune tool results longer than this many chars.
    #[serde(default = "d_2000u")]
    pub min_prunable_tool_chars: usize,
    #[serde(default)]
    pub soft_trim: SoftTrimConfig,
    #[serde(default)]
    pub hard_clear: HardClearConfig,
}

impl Default for PruningConfig {
    fn default() -> Self {
        Self {
            mode: PruningMode::CacheTtl,
            keep_last_assistants: 3,
            min_prunable_tool_chars: 2_000,
            soft_trim: SoftTrimConfig::default(),
            hard_clear: HardClearConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PruningMode {
    Off,
    #[default]
    CacheTtl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoftTrimConfig {
    /// Chars to keep from the head.
    #[serde(default = "d_1500")]
    pub head_chars: usize,
    /// Chars to keep from the tail.
    #[serde(default = "d_1500")]
    pub tail_chars: usize,
}

impl Default for SoftTrimConfig {
    fn default() -> Self {
        Self {
            head_chars: 1_500,
            tail_chars: 1_500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardClearConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_placeholder")]
    pub placeholder: String,
}

impl Default for HardClearConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            placeholder: d_placeholder(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Fraction of the context window that triggers compaction.
    #[serde(default = "d_07")]
    pub threshold: f64,
    /// Number of trailing messages preserved on compaction.
    #[serde(default = "d_30u")]
    pub keep_messages: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            keep_messages: 30,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pulse scheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PulseConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Tick interval in milliseconds.
    #[serde(default = "d_1000_u64")]
    pub interval_ms: u64,
    /// Whether normal/low events may be processed through the LLM.
    #[serde(default = "d_true")]
    pub llm_enabled: bool,
    #[serde(default = "d_100u")]
    pub max_queue_size: usize,
    /// Completed events older than this are purged.
    #[serde(default = "d_24")]
    pub cleanup_hours: u64,
    #[serde(default)]
    pub session_reset_enabled: bool,
    #[serde(default = "d_60")]
    pub session_reset_mins: u64,
}

impl Default for PulseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 1_000,
            llm_enabled: true,
            max_queue_size: 100,
            cleanup_hours: 24,
            session_reset_enabled: false,
            session_reset_mins: 60,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool loop detection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolLoopConfig {
    /// Total calls inside the window that declare a loop.
    #[serde(default = "d_20u")]
    pub max_calls: usize,
    /// Sliding window in seconds.
    #[serde(default = "d_300")]
    pub time_window_secs: u64,
    /// Consecutive identical-name calls that declare a loop.
    #[serde(default = "d_10u")]
    pub same_tool_limit: usize,
}

impl Default for ToolLoopConfig {
    fn default() -> Self {
        Self {
            max_calls: 20,
            time_window_secs: 300,
            same_tool_limit: 10,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool result truncation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruncationConfig {
    #[serde(default = "d_15000u")]
    pub max_bytes: usize,
    #[serde(default = "d_500u")]
    pub max_lines: usize,
    /// When true, truncate before loop-detector accounting.
    #[serde(default)]
    pub truncate_before: bool,
}

impl Default for TruncationConfig {
    fn default() -> Self {
        Self {
            max_bytes: 15_000,
            max_lines: 500,
            truncate_before: false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Memory recall
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallConfig {
    #[serde(default = "d_3u")]
    pub limit: usize,
    #[serde(default = "d_03f")]
    pub min_score: f64,
    /// Inject recall candidates on every turn, not only on triggers.
    #[serde(default)]
    pub auto_recall: bool,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            limit: 3,
            min_score: 0.3,
            auto_recall: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "d_memory_url")]
    pub base_url: String,
    #[serde(default = "d_8000")]
    pub timeout_ms: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            base_url: d_memory_url(),
            timeout_ms: 8_000,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Realtime (live) sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Live model override; a provider default is used when unset.
    #[serde(default)]
    pub model: Option<String>,
    /// API key used when no environment variable is present.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Sessions idle longer than this are evicted by the janitor.
    #[serde(default = "d_600")]
    pub idle_secs: u64,
    /// Janitor sweep interval in seconds.
    #[serde(default = "d_60")]
    pub janitor_interval_secs: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            model: None,
            api_key: None,
            idle_secs: 600,
            janitor_interval_secs: 60,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_state_path() -> PathBuf {
    PathBuf::from("./data")
}
fn d_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn d_api_key_env() -> String {
    "TETHER_API_KEY".to_string()
}
fn d_model() -> String {
    "gpt-4o-mini".to_string()
}
fn d_memory_url() -> String {
    "http://localhost:8230".to_string()
}
fn d_placeholder() -> String {
    "[tool result cleared]".to_string()
}
fn d_true() -> bool {
    true
}
fn d_temp() -> f32 {
    0.7
}
fn d_07() -> f64 {
    0.7
}
fn d_03f() -> f64 {
    0.3
}
fn d_3u() -> usize {
    3
}
fn d_10u() -> usize {
    10
}
fn d_20u() -> usize {
    20
}
fn d_30u() -> usize {
    30
}
fn d_100u() -> usize {
    100
}
fn d_500u() -> usize {
    500
}
fn d_1500() -> usize {
    1_500
}
fn d_2000u() -> usize {
    2_000
}
fn d_15000u() -> usize {
    15_000
}
fn d_24() -> u64 {
    24
}
fn d_60() -> u64 {
    60
}
fn d_120() -> u64 {
    120
}
fn d_300() -> u64 {
    300
}
fn d_600() -> u64 {
    600
}
fn d_800() -> usize {
    800
}
fn d_1000() -> u32 {
    1_000
}
fn d_1000_u64() -> u64 {
    1_000
}
fn d_1024() -> usize {
    1_024
}
fn d_8000() -> u64 {
    8_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = Config::default();
        assert_eq!(c.context.reserve_tokens, 1024);
        assert_eq!(c.context.soft_tokens, 800);
        assert_eq!(c.compaction.threshold, 0.7);
        assert_eq!(c.compaction.keep_messages, 30);
        assert_eq!(c.pulse.interval_ms, 1_000);
        assert_eq!(c.pulse.max_queue_size, 100);
        assert_eq!(c.pulse.cleanup_hours, 24);
        assert_eq!(c.tool_loop.max_calls, 20);
        assert_eq!(c.tool_loop.same_tool_limit, 10);
        assert_eq!(c.tool_loop.time_window_secs, 300);
        assert_eq!(c.truncation.max_bytes, 15_000);
        assert_eq!(c.truncation.max_lines, 500);
        assert_eq!(c.recall.limit, 3);
        assert_eq!(c.recall.min_score, 0.3);
        assert_eq!(c.llm.http_timeout_secs, 120);
        assert_eq!(c.llm.max_tokens, 1000);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let c: Config = toml::from_str(
            r#"
            [compaction]
            keep_messages = 10

            [pulse]
            interval_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(c.compaction.keep_messages, 10);
        assert_eq!(c.compaction.threshold, 0.7);
        assert_eq!(c.pulse.interval_ms, 250);
        assert!(c.pulse.enabled);
    }

    #[test]
    fn pruning_mode_kebab_case() {
        let c: PruningConfig = toml::from_str(r#"mode = "cache-ttl""#).unwrap();
        assert_eq!(c.mode, PruningMode::CacheTtl);
        let c: PruningConfig = toml::from_str(r#"mode = "off""#).unwrap();
        assert_eq!(c.mode, PruningMode::Off);
    }
}
