//! Configuration for the bridge.
//!
//! Maps directly to `mcbridge.toml`. Every field has a serde default so a
//! partial config file is always valid; the sample written on first run
//! spells out the fields that genuinely need editing (gateway address,
//! tokens, log path).

use serde::{Deserialize, Serialize};

/// Top-level bridge configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Chat gateway connection settings.
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Server log tailing settings.
    #[serde(default)]
    pub log: LogConfig,
    /// Conversational memory settings.
    #[serde(default)]
    pub memory: MemoryConfig,
    /// AI responder settings.
    #[serde(default)]
    pub ai: AiConfig,
    /// Server-management API settings (status command).
    #[serde(default)]
    pub server_api: ServerApiConfig,
}

impl BridgeConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns [`crate::BridgeError::Config`] if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> crate::error::Result<Self> {
        toml::from_str(toml_str).map_err(|e| crate::BridgeError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Chat gateway connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// WebSocket URL of the gateway.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// Bearer token sent on the handshake.
    #[serde(default)]
    pub token: String,
    /// Numeric identity of the bot account; mentions of this id direct a
    /// group message at the bot.
    #[serde(default)]
    pub self_id: String,
    /// Group the bridge announces server events into.
    #[serde(default)]
    pub announce_group: String,
    /// Prefix that directs a group message at the bot (alternative to a
    /// mention).
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    /// Minimum reconnect backoff in milliseconds.
    #[serde(default = "default_backoff_min_ms")]
    pub backoff_min_ms: u64,
    /// Maximum reconnect backoff in milliseconds.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Deadline for correlated gateway API calls in milliseconds.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Grace period for draining in-flight calls on shutdown, milliseconds.
    #[serde(default = "default_drain_grace_ms")]
    pub drain_grace_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            token: String::new(),
            self_id: String::new(),
            announce_group: String::new(),
            command_prefix: default_command_prefix(),
            backoff_min_ms: default_backoff_min_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            drain_grace_ms: default_drain_grace_ms(),
        }
    }
}

/// Server log tailing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Path to the server's live log file.
    #[serde(default = "default_log_path")]
    pub path: String,
    /// Poll interval while waiting for new data, milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Lines longer than this are rejected as malformed.
    #[serde(default = "default_max_line_len")]
    pub max_line_len: usize,
    /// How long to keep retrying a vanished/unreadable log file before
    /// declaring the stream dead, milliseconds.
    #[serde(default = "default_reopen_timeout_ms")]
    pub reopen_timeout_ms: u64,
    /// Window within which a repeated join/leave for the same player is
    /// not re-announced, seconds.
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: default_log_path(),
            poll_interval_ms: default_poll_interval_ms(),
            max_line_len: default_max_line_len(),
            reopen_timeout_ms: default_reopen_timeout_ms(),
            dedup_window_secs: default_dedup_window_secs(),
        }
    }
}

/// Conversational memory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Directory holding the per-user long-term record streams.
    #[serde(default = "default_memory_dir")]
    pub dir: String,
    /// Short-term (session) record capacity per user.
    #[serde(default = "default_short_term_capacity")]
    pub short_term_capacity: usize,
    /// Most-recent turns handed to the AI responder as context.
    #[serde(default = "default_context_turns")]
    pub context_turns: usize,
    /// Interval between periodic short-term → long-term checkpoints,
    /// seconds. Bounds crash loss to one interval.
    #[serde(default = "default_checkpoint_interval_secs")]
    pub checkpoint_interval_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            dir: default_memory_dir(),
            short_term_capacity: default_short_term_capacity(),
            context_turns: default_context_turns(),
            checkpoint_interval_secs: default_checkpoint_interval_secs(),
        }
    }
}

/// AI responder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// Base URL of an OpenAI-compatible API. Empty disables the responder.
    #[serde(default)]
    pub base_url: String,
    /// API key.
    #[serde(default)]
    pub api_key: String,
    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,
    /// System prompt prepended to every completion.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Per-request deadline in milliseconds.
    #[serde(default = "default_ai_timeout_ms")]
    pub timeout_ms: u64,
    /// Maximum tokens per reply.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Reply sent to the user when the AI call fails or times out.
    #[serde(default = "default_fallback_reply")]
    pub fallback_reply: String,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            model: default_model(),
            system_prompt: default_system_prompt(),
            timeout_ms: default_ai_timeout_ms(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            fallback_reply: default_fallback_reply(),
        }
    }
}

/// Server-management API settings.
///
/// The bridge only uses this for the status command; an empty base URL
/// disables it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerApiConfig {
    /// Base URL of the management API.
    #[serde(default)]
    pub base_url: String,
    /// API key passed as a query parameter.
    #[serde(default)]
    pub api_key: String,
    /// Daemon the server instance runs under.
    #[serde(default)]
    pub daemon_id: String,
    /// Instance UUID.
    #[serde(default)]
    pub instance_uuid: String,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_ws_url() -> String {
    "ws://127.0.0.1:3011/".to_string()
}

fn default_command_prefix() -> String {
    "!".to_string()
}

fn default_backoff_min_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    60_000
}

fn default_call_timeout_ms() -> u64 {
    10_000
}

fn default_drain_grace_ms() -> u64 {
    5_000
}

fn default_log_path() -> String {
    "logs/latest.log".to_string()
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_max_line_len() -> usize {
    8 * 1024
}

fn default_reopen_timeout_ms() -> u64 {
    30_000
}

fn default_dedup_window_secs() -> u64 {
    300
}

fn default_memory_dir() -> String {
    "memory".to_string()
}

fn default_short_term_capacity() -> usize {
    50
}

fn default_context_turns() -> usize {
    20
}

fn default_checkpoint_interval_secs() -> u64 {
    300
}

fn default_model() -> String {
    "qwen3-max".to_string()
}

fn default_system_prompt() -> String {
    "You are a helpful assistant for a Minecraft server community.".to_string()
}

fn default_ai_timeout_ms() -> u64 {
    30_000
}

fn default_max_tokens() -> u32 {
    512
}

fn default_temperature() -> f32 {
    0.7
}

fn default_fallback_reply() -> String {
    "Sorry, I couldn't think of a reply just now. Please try again.".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = BridgeConfig::from_toml("").expect("empty config is valid");
        assert_eq!(config.gateway.ws_url, "ws://127.0.0.1:3011/");
        assert_eq!(config.memory.short_term_capacity, 50);
        assert_eq!(config.log.poll_interval_ms, 500);
    }

    #[test]
    fn partial_section_fills_rest() {
        let config = BridgeConfig::from_toml(
            r#"
            [memory]
            short_term_capacity = 8

            [gateway]
            ws_url = "ws://gateway.example:3011/"
            token = "secret"
            "#,
        )
        .expect("valid config");
        assert_eq!(config.memory.short_term_capacity, 8);
        assert_eq!(config.memory.context_turns, 20);
        assert_eq!(config.gateway.ws_url, "ws://gateway.example:3011/");
        assert_eq!(config.gateway.token, "secret");
    }

    #[test]
    fn invalid_toml_is_a_config_error() {
        let err = BridgeConfig::from_toml("[gateway").expect_err("must fail");
        assert!(matches!(err, crate::BridgeError::Config(_)));
    }
}
