//! Configuration management
//!
//! This module handles loading, validation, and management of the Steward configuration.
//! Configuration is stored in TOML format at ~/.steward/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory
//! - **llm**: Model provider settings and call timeouts
//! - **permissions**: Allowed path roots and per-handler operation scopes
//! - **integrations**: Third-party integration toggles (all off by default)
//! - **execution**: Plan execution mode, concurrency, timeouts, audit cap
//! - **feedback**: Planning hint retrieval and embedding backend
//!
//! Every field has a serde default, so a partial file (or an empty one) loads.
//!
//! # Examples
//!
//! ```no_run
//! use steward_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Default provider: {}", config.llm.default_provider);
//! # Ok(())
//! # }
//! ```

use sdk::errors::StewardError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::permissions::Operation;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Core settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Model provider configuration
    #[serde(default)]
    pub llm: LLMConfig,

    /// Access-control settings
    #[serde(default)]
    pub permissions: PermissionsConfig,

    /// Third-party integration toggles
    #[serde(default)]
    pub integrations: IntegrationsConfig,

    /// Plan execution settings
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Feedback loop settings
    #[serde(default)]
    pub feedback: FeedbackConfig,
}

/// Core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Model provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Provider tried first (ollama, openai)
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Sensitivity score above which local providers are preferred (0.0-1.0)
    #[serde(default = "default_sensitivity_threshold")]
    pub sensitivity_threshold: f64,

    /// Per-call timeout for local providers, in seconds
    #[serde(default = "default_local_timeout")]
    pub local_timeout_secs: u64,

    /// Per-call timeout for cloud providers, in seconds
    #[serde(default = "default_cloud_timeout")]
    pub cloud_timeout_secs: u64,

    #[serde(default)]
    pub ollama: OllamaConfig,

    #[serde(default)]
    pub openai: OpenAIConfig,
}

/// Ollama provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    #[serde(default = "default_ollama_model")]
    pub model: String,

    /// Model used for feedback embeddings
    #[serde(default = "default_ollama_embedding_model")]
    pub embedding_model: String,
}

/// OpenAI-compatible provider configuration
///
/// The provider is only registered when the environment variable named by
/// `api_key_env` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    #[serde(default = "default_openai_model")]
    pub model: String,

    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,
}

/// Access-control configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionsConfig {
    /// Whitelisted path roots (supports ~ expansion, relative to the working directory)
    #[serde(default = "default_allowed_paths")]
    pub allowed_paths: Vec<PathBuf>,

    /// Per-handler scope overrides; handlers not listed keep their built-in scope
    #[serde(default)]
    pub operation_scopes: BTreeMap<String, Vec<Operation>>,
}

/// Integration toggles keyed by integration name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationsConfig {
    #[serde(flatten)]
    pub flags: BTreeMap<String, bool>,
}

/// How independent plan steps are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Sequential,
    Concurrent,
}

/// What happens when a HIGH_RISK action needs confirmation and no one is asked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmPolicy {
    /// Prompt on the terminal
    Ask,
    /// Approve without asking
    Approve,
    /// Decline without asking
    Deny,
    /// Run the preview form when one exists, otherwise decline
    DryRun,
}

/// Plan execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_execution_mode")]
    pub mode: ExecutionMode,

    /// Worker pool size for concurrent mode
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Timeout for each execution-boundary call, in seconds
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,

    /// Byte ceiling for audit result payloads
    #[serde(default = "default_result_cap")]
    pub result_cap_bytes: usize,

    #[serde(default = "default_confirm_policy")]
    pub confirm: ConfirmPolicy,

    /// Lint command lines with shellcheck when it is installed
    #[serde(default = "default_static_analysis")]
    pub static_analysis: bool,

    /// Run approved HIGH_RISK commands under firejail when it is installed
    #[serde(default)]
    pub sandbox: bool,
}

/// Embedding backend for feedback similarity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    /// Offline hashed bag-of-words vectors
    Hashing,
    /// Ollama `/api/embeddings`
    Ollama,
}

/// Feedback loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    /// Number of prior similar queries injected into the planning prompt
    #[serde(default = "default_hint_count")]
    pub hint_count: usize,

    /// Records rated below this are never used as hints
    #[serde(default = "default_min_rating")]
    pub min_rating: u8,

    #[serde(default = "default_embedder")]
    pub embedder: EmbedderKind,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.steward/data")
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_sensitivity_threshold() -> f64 {
    0.6
}

fn default_local_timeout() -> u64 {
    120
}

fn default_cloud_timeout() -> u64 {
    30
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_ollama_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_allowed_paths() -> Vec<PathBuf> {
    ["~/Documents", "~/Downloads", "~/Desktop", "."]
        .iter()
        .map(PathBuf::from)
        .collect()
}

fn default_execution_mode() -> ExecutionMode {
    ExecutionMode::Sequential
}

fn default_max_concurrency() -> usize {
    4
}

fn default_step_timeout() -> u64 {
    30
}

fn default_result_cap() -> usize {
    2000
}

fn default_confirm_policy() -> ConfirmPolicy {
    ConfirmPolicy::Ask
}

fn default_static_analysis() -> bool {
    true
}

fn default_hint_count() -> usize {
    3
}

fn default_min_rating() -> u8 {
    3
}

fn default_embedder() -> EmbedderKind {
    EmbedderKind::Hashing
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            sensitivity_threshold: default_sensitivity_threshold(),
            local_timeout_secs: default_local_timeout(),
            cloud_timeout_secs: default_cloud_timeout(),
            ollama: OllamaConfig::default(),
            openai: OpenAIConfig::default(),
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
            embedding_model: default_ollama_embedding_model(),
        }
    }
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            model: default_openai_model(),
            api_key_env: default_openai_key_env(),
        }
    }
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            allowed_paths: default_allowed_paths(),
            operation_scopes: BTreeMap::new(),
        }
    }
}

impl Default for IntegrationsConfig {
    fn default() -> Self {
        let flags = ["gmail", "calendar", "custom_api"]
            .iter()
            .map(|name| (name.to_string(), false))
            .collect();
        Self { flags }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: default_execution_mode(),
            max_concurrency: default_max_concurrency(),
            step_timeout_secs: default_step_timeout(),
            result_cap_bytes: default_result_cap(),
            confirm: default_confirm_policy(),
            static_analysis: default_static_analysis(),
            sandbox: false,
        }
    }
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            hint_count: default_hint_count(),
            min_rating: default_min_rating(),
            embedder: default_embedder(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.steward/config.toml)
    ///
    /// If the file doesn't exist, a default configuration is written there.
    ///
    /// # Errors
    ///
    /// Returns `StewardError::ConfigInvalid` if the file cannot be read,
    /// parsed, or fails validation.
    pub fn load_or_create() -> Result<Self, StewardError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, StewardError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| StewardError::ConfigInvalid(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&contents)
    }

    /// Parse and validate configuration text
    pub fn from_toml(contents: &str) -> Result<Self, StewardError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| StewardError::ConfigInvalid(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    fn create_default(path: &Path) -> Result<Self, StewardError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                StewardError::ConfigInvalid(format!("Failed to create config directory: {}", e))
            })?;
        }

        let config = Self::default();

        let toml_string = toml::to_string_pretty(&config).map_err(|e| {
            StewardError::ConfigInvalid(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(path, toml_string)
            .map_err(|e| StewardError::ConfigInvalid(format!("Failed to write config file: {}", e)))?;

        let mut config = config;
        config.validate_and_process()?;
        Ok(config)
    }

    /// Get the default configuration file path (~/.steward/config.toml)
    pub fn default_config_path() -> Result<PathBuf, StewardError> {
        let home = dirs::home_dir().ok_or_else(|| {
            StewardError::ConfigKeyMissing("Could not determine home directory".to_string())
        })?;

        Ok(home.join(".steward").join("config.toml"))
    }

    /// Whether an integration has been explicitly switched on
    pub fn integration_enabled(&self, name: &str) -> bool {
        self.integrations.flags.get(name).copied().unwrap_or(false)
    }

    /// Validate values and expand `~` in paths
    fn validate_and_process(&mut self) -> Result<(), StewardError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(StewardError::ConfigInvalid(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        let valid_providers = ["ollama", "openai"];
        if !valid_providers.contains(&self.llm.default_provider.as_str()) {
            return Err(StewardError::ConfigInvalid(format!(
                "Invalid default provider '{}'. Must be one of: {}",
                self.llm.default_provider,
                valid_providers.join(", ")
            )));
        }

        if !(0.0..=1.0).contains(&self.llm.sensitivity_threshold) {
            return Err(StewardError::ConfigInvalid(
                "sensitivity_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.execution.max_concurrency == 0 {
            return Err(StewardError::ConfigInvalid(
                "execution.max_concurrency must be at least 1".to_string(),
            ));
        }

        if self.execution.step_timeout_secs == 0 {
            return Err(StewardError::ConfigInvalid(
                "execution.step_timeout_secs must be at least 1".to_string(),
            ));
        }

        if self.execution.result_cap_bytes < 64 {
            return Err(StewardError::ConfigInvalid(
                "execution.result_cap_bytes must be at least 64".to_string(),
            ));
        }

        if !(1..=5).contains(&self.feedback.min_rating) {
            return Err(StewardError::ConfigInvalid(
                "feedback.min_rating must be between 1 and 5".to_string(),
            ));
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        self.permissions.allowed_paths = self
            .permissions
            .allowed_paths
            .iter()
            .map(|p| expand_path(p))
            .collect::<Result<_, _>>()?;

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
pub fn expand_path(path: &Path) -> Result<PathBuf, StewardError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| StewardError::ConfigInvalid("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or_else(|| {
            StewardError::ConfigKeyMissing("Could not determine home directory".to_string())
        })?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir().ok_or_else(|| {
            StewardError::ConfigKeyMissing("Could not determine home directory".to_string())
        })
    } else {
        Ok(path.to_path_buf())
    }
}
