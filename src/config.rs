//! Configuration loading and validation.
//!
//! Configuration is a single YAML file. A sibling `config.local.yaml` is
//! deep-merged over the base (local wins), then every string value has its
//! `${VAR}` references expanded from the environment before the typed
//! structs are deserialized.

use crate::error::{ConfigError, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Maximum gateway subprocess timeout in seconds; larger requests are clamped.
pub const GATEWAY_MAX_TIMEOUT_SECS: u64 = 600;

/// Ciana configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub agent: AgentConfig,
    pub provider: ProviderConfig,
    pub channels: ChannelsConfig,
    pub scheduler: SchedulerConfig,
    /// Opaque MCP server definitions, passed through to the agent collaborator.
    pub mcp_servers: HashMap<String, serde_yaml::Value>,
    pub skills: SkillsConfig,
    pub web: WebConfig,
    pub transcription: TranscriptionConfig,
    pub gateway: GatewayConfig,
    pub model_router: ModelRouterConfig,
    /// Opaque Claude-Code bridge settings, consumed by the bridge collaborator.
    pub claude_code: serde_yaml::Value,
    pub logging: LoggingConfig,
}

/// Agent workspace settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub workspace: PathBuf,
    pub data_dir: PathBuf,
    pub max_tool_iterations: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("./workspace"),
            data_dir: PathBuf::from("./data"),
            max_tool_iterations: 20,
        }
    }
}

/// Default LLM provider settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub name: String,
    pub model: String,
    pub api_key: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub base_url: Option<String>,
}

/// Per-channel adapter settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub telegram: TelegramConfig,
}

/// Telegram adapter settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub enabled: bool,
    pub token: String,
    /// Group-chat trigger prefix that addresses the bot.
    pub trigger: String,
    /// Empty list allows everyone.
    pub allowed_users: Vec<String>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token: String::new(),
            trigger: "@Ciana".to_string(),
            allowed_users: Vec::new(),
        }
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Seconds between polls of the task file. Values below 1 are raised to 1.
    pub poll_interval: u64,
    pub data_file: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            poll_interval: 60,
            data_file: PathBuf::from("./data/scheduled_tasks.json"),
        }
    }
}

/// Skill-loading settings (consumed by the agent collaborator).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SkillsConfig {
    pub enabled: bool,
    pub directory: PathBuf,
}

impl Default for SkillsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: PathBuf::from("./skills"),
        }
    }
}

/// Web tool settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub brave_api_key: Option<String>,
    pub fetch_timeout: u64,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            brave_api_key: None,
            fetch_timeout: 30,
        }
    }
}

/// Audio transcription settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// One of "groq" or "openai".
    pub provider: String,
    pub model: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub timeout: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            provider: "groq".to_string(),
            model: "whisper-large-v3".to_string(),
            api_key: String::new(),
            base_url: None,
            timeout: 30,
        }
    }
}

/// Host gateway settings, shared by server and client.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub enabled: bool,
    /// Gateway URL as seen from the agent process.
    pub url: String,
    pub token: String,
    pub port: u16,
    /// Subprocess timeout applied when a request asks for 0.
    pub default_timeout: u64,
    pub bridges: HashMap<String, BridgeConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            token: String::new(),
            port: 9842,
            default_timeout: 30,
            bridges: HashMap::new(),
        }
    }
}

/// A named policy scope in the gateway.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Command basenames this bridge may execute.
    pub allowed_commands: Vec<String>,
    /// Directories (and their subtrees) this bridge may run in.
    pub allowed_cwd: Vec<PathBuf>,
}

/// Model tier-router settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelRouterConfig {
    pub enabled: bool,
    pub default_tier: String,
    pub tiers: HashMap<String, TierConfig>,
}

impl Default for ModelRouterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            default_tier: "standard".to_string(),
            tiers: HashMap::new(),
        }
    }
}

/// One model tier. Unset fields inherit from the `provider` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    pub provider: Option<String>,
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"];

impl LoggingConfig {
    /// Map the configured level to a tracing env-filter directive.
    pub fn env_filter_directive(&self) -> &'static str {
        match self.level.to_ascii_uppercase().as_str() {
            "DEBUG" => "debug",
            "WARNING" => "warn",
            "ERROR" | "CRITICAL" => "error",
            _ => "info",
        }
    }
}

impl Config {
    /// Load configuration from `path`, merging an optional sibling
    /// `config.local.yaml` over it and expanding `${VAR}` references.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Load {
            path: path.display().to_string(),
            source: Arc::new(source),
        })?;

        let mut value: serde_yaml::Value = serde_yaml::from_str(&raw)
            .map_err(|error| ConfigError::Parse(error.to_string()))?;

        let local_path = local_config_path(path);
        if local_path.exists() {
            let local_raw =
                std::fs::read_to_string(&local_path).map_err(|source| ConfigError::Load {
                    path: local_path.display().to_string(),
                    source: Arc::new(source),
                })?;
            let local: serde_yaml::Value = serde_yaml::from_str(&local_raw)
                .map_err(|error| ConfigError::Parse(error.to_string()))?;
            deep_merge(&mut value, local);
            tracing::info!(path = %local_path.display(), "merged local config overrides");
        }

        expand_env(&mut value);

        let mut config: Config = serde_yaml::from_value(value)
            .map_err(|error| ConfigError::Parse(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&mut self) -> Result<()> {
        if let Some(temperature) = self.provider.temperature
            && !(0.0..=2.0).contains(&temperature)
        {
            return Err(ConfigError::Invalid(format!(
                "provider.temperature must be within 0..=2, got {temperature}"
            ))
            .into());
        }

        if !matches!(self.transcription.provider.as_str(), "groq" | "openai") {
            return Err(ConfigError::Invalid(format!(
                "transcription.provider must be 'groq' or 'openai', got '{}'",
                self.transcription.provider
            ))
            .into());
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_uppercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "logging.level must be one of {LOG_LEVELS:?}, got '{}'",
                self.logging.level
            ))
            .into());
        }

        if self.scheduler.poll_interval < 1 {
            tracing::warn!(
                poll_interval = self.scheduler.poll_interval,
                "scheduler.poll_interval below 1s, raising to 1s"
            );
            self.scheduler.poll_interval = 1;
        }

        if self.model_router.enabled {
            if self.model_router.default_tier.is_empty() {
                return Err(
                    ConfigError::MissingKey("model_router.default_tier".to_string()).into(),
                );
            }
            if !self
                .model_router
                .tiers
                .contains_key(&self.model_router.default_tier)
            {
                return Err(ConfigError::Invalid(format!(
                    "model_router.default_tier '{}' is not defined in model_router.tiers",
                    self.model_router.default_tier
                ))
                .into());
            }
        }

        Ok(())
    }
}

/// Path of the local override file next to the base config.
fn local_config_path(base: &Path) -> PathBuf {
    base.with_file_name("config.local.yaml")
}

/// Deep-merge `overlay` into `base`: mappings merge key-wise recursively,
/// everything else is replaced by the overlay value.
fn deep_merge(base: &mut serde_yaml::Value, overlay: serde_yaml::Value) {
    match (base, overlay) {
        (serde_yaml::Value::Mapping(base_map), serde_yaml::Value::Mapping(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key, overlay_value);
                    }
                }
            }
        }
        (base_slot, overlay_value) => *base_slot = overlay_value,
    }
}

/// Replace `${VAR}` in every string with the environment value, or empty
/// when the variable is unset.
fn expand_env(value: &mut serde_yaml::Value) {
    static ENV_PATTERN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let pattern = ENV_PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("static regex"));

    match value {
        serde_yaml::Value::String(text) => {
            if text.contains("${") {
                let expanded = pattern.replace_all(text, |caps: &regex::Captures<'_>| {
                    std::env::var(&caps[1]).unwrap_or_default()
                });
                *text = expanded.into_owned();
            }
        }
        serde_yaml::Value::Mapping(map) => {
            for (_, entry) in map.iter_mut() {
                expand_env(entry);
            }
        }
        serde_yaml::Value::Sequence(entries) => {
            for entry in entries.iter_mut() {
                expand_env(entry);
            }
        }
        _ => {}
    }
}
