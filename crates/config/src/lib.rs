//! Configuration loading, validation, and management for Reagent.
//!
//! Loads configuration from `~/.reagent/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use reagent_core::action::ActionKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.reagent/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the text generator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// OpenAI-compatible endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Loop budgets and timeouts
    #[serde(default)]
    pub engine: EngineConfig,

    /// Goal-achievement shortcuts
    #[serde(default)]
    pub reflection: ReflectionConfig,

    /// Coordination database
    #[serde(default)]
    pub storage: StorageConfig,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("engine", &self.engine)
            .field("reflection", &self.reflection)
            .field("storage", &self.storage)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Actions beyond this per decision are dropped
    #[serde(default = "default_max_actions")]
    pub max_actions_per_batch: usize,

    /// Process-wide cap on concurrently executing actions
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,

    /// Decision attempts before giving up on a malformed model
    #[serde(default = "default_parse_retries")]
    pub parse_retries: u32,

    /// Conversation messages included in the decision prompt
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Past iterations rendered into the decision prompt
    #[serde(default = "default_execution_history_window")]
    pub execution_history_window: usize,

    /// Conversation messages included in generate actions
    #[serde(default = "default_generation_history_window")]
    pub generation_history_window: usize,

    #[serde(default = "default_true")]
    pub fast_path: bool,

    #[serde(default = "default_true")]
    pub anomaly_guard: bool,

    #[serde(default = "default_generation_timeout")]
    pub generation_timeout_secs: u64,

    #[serde(default = "default_token_delay_min")]
    pub token_delay_min_ms: u64,

    #[serde(default = "default_token_delay_max")]
    pub token_delay_max_ms: u64,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_max_actions() -> usize {
    5
}
fn default_worker_pool_size() -> usize {
    5
}
fn default_confirmation_timeout() -> u64 {
    60
}
fn default_parse_retries() -> u32 {
    3
}
fn default_history_window() -> usize {
    10
}
fn default_execution_history_window() -> usize {
    3
}
fn default_generation_history_window() -> usize {
    20
}
fn default_generation_timeout() -> u64 {
    120
}
fn default_token_delay_min() -> u64 {
    15
}
fn default_token_delay_max() -> u64 {
    25
}
fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_actions_per_batch: default_max_actions(),
            worker_pool_size: default_worker_pool_size(),
            confirmation_timeout_secs: default_confirmation_timeout(),
            parse_retries: default_parse_retries(),
            history_window: default_history_window(),
            execution_history_window: default_execution_history_window(),
            generation_history_window: default_generation_history_window(),
            fast_path: true,
            anomaly_guard: true,
            generation_timeout_secs: default_generation_timeout(),
            token_delay_min_ms: default_token_delay_min(),
            token_delay_max_ms: default_token_delay_max(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionConfig {
    /// A lone successful result of one of these kinds counts as goal achieved
    #[serde(default = "default_shortcut_kinds")]
    pub shortcut_kinds: Vec<ActionKind>,

    /// Achieved results of these kinds still need a user-facing summary
    #[serde(default = "default_summary_kinds")]
    pub summary_kinds: Vec<ActionKind>,

    /// Ask the model to judge ambiguous batches
    #[serde(default = "default_true")]
    pub judge_with_model: bool,
}

fn default_shortcut_kinds() -> Vec<ActionKind> {
    ActionKind::ALL.to_vec()
}
fn default_summary_kinds() -> Vec<ActionKind> {
    vec![ActionKind::ToolCall, ActionKind::Retrieve]
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            shortcut_kinds: default_shortcut_kinds(),
            summary_kinds: default_summary_kinds(),
            judge_with_model: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file shared by the engine and the approve/reject/stop commands
    #[serde(default = "default_database")]
    pub database: String,
}

fn default_database() -> String {
    AppConfig::config_dir()
        .join("reagent.db")
        .to_string_lossy()
        .into_owned()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path, then apply environment
    /// overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        // Environment variable overrides (highest priority)
        if config.api_key.is_none() {
            config.api_key = std::env::var("REAGENT_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(model) = std::env::var("REAGENT_MODEL") {
            config.default_model = model;
        }

        if let Ok(base_url) = std::env::var("REAGENT_BASE_URL") {
            config.base_url = base_url;
        }

        if let Ok(database) = std::env::var("REAGENT_DATABASE") {
            config.storage.database = database;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".reagent")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        let engine = &self.engine;
        if engine.max_iterations == 0 {
            return Err(ConfigError::ValidationError("engine.max_iterations must be > 0".into()));
        }
        if engine.max_actions_per_batch == 0 || engine.worker_pool_size == 0 {
            return Err(ConfigError::ValidationError(
                "engine.max_actions_per_batch and engine.worker_pool_size must be > 0".into(),
            ));
        }
        if engine.parse_retries == 0 {
            return Err(ConfigError::ValidationError("engine.parse_retries must be > 0".into()));
        }
        if engine.confirmation_timeout_secs == 0 || engine.generation_timeout_secs == 0 {
            return Err(ConfigError::ValidationError("engine timeouts must be > 0".into()));
        }
        if engine.token_delay_min_ms > engine.token_delay_max_ms {
            return Err(ConfigError::ValidationError(
                "engine.token_delay_min_ms must not exceed engine.token_delay_max_ms".into(),
            ));
        }

        Ok(())
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `reagent config`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            engine: EngineConfig::default(),
            reflection: ReflectionConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
