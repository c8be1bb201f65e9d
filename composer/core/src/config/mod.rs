//! TOML Configuration File Support
//!
//! Centralized configuration for the Composer, supporting a TOML file at
//! `~/.config/composer/composer.toml`.
//!
//! # Configuration Priority
//!
//! Values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [limits]
//! max_input_length = 4000
//! guest_daily_message_limit = 5
//! auth_daily_message_limit = 1000
//! pro_daily_message_limit = 5
//! remaining_query_alert_threshold = 2
//! daily_file_upload_limit = 5
//!
//! [models]
//! default_model = "gpt-4.1-nano"
//!
//! [[models.catalog]]
//! id = "gpt-4.1"
//! pro = true
//! file_upload = true
//!
//! [prompts]
//! default_system_prompt = "You are a concise assistant."
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default maximum input length in characters
pub const DEFAULT_MAX_INPUT_LENGTH: usize = 4000;

/// Default model id
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Default system prompt
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a thoughtful, clear assistant. Keep answers \
calm, minimal and grounded. Ask a good question when the request is ambiguous, prefer plain \
words over flourish, and help the user think clearly and move forward.";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Model Catalog
// =============================================================================

/// A selectable model
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Model id sent to the backend
    pub id: String,
    /// Premium tier, counted against the pro quota
    #[serde(default)]
    pub pro: bool,
    /// Accepts file attachments
    #[serde(default)]
    pub file_upload: bool,
}

impl ModelSpec {
    fn free(id: &str, file_upload: bool) -> Self {
        Self {
            id: id.to_string(),
            pro: false,
            file_upload,
        }
    }

    fn pro(id: &str, file_upload: bool) -> Self {
        Self {
            id: id.to_string(),
            pro: true,
            file_upload,
        }
    }
}

/// The set of models a user can pick from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCatalog {
    models: Vec<ModelSpec>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self {
            models: vec![
                ModelSpec::free("deepseek-r1", true),
                ModelSpec::free("pixtral-large-latest", true),
                ModelSpec::free("mistral-large-latest", false),
                ModelSpec::free("gpt-4.1-nano", true),
                ModelSpec::pro("gpt-4.1", true),
                ModelSpec::pro("gpt-4.1-mini", true),
                ModelSpec::pro("gemini-2.5-pro-preview-03-25", true),
                ModelSpec::pro("gemini-2.0-flash-001", true),
                ModelSpec::pro("gemini-1.5-pro", true),
                ModelSpec::pro("gemini-1.5-flash", true),
                ModelSpec::pro("claude-3-7-sonnet-20250219", true),
                ModelSpec::pro("claude-3-5-haiku-20241022", true),
                ModelSpec::pro("claude-3-opus-20240229", true),
                ModelSpec::pro("grok-3", false),
                ModelSpec::pro("grok-3-mini", false),
                ModelSpec::pro("grok-3-fast", false),
            ],
        }
    }
}

impl ModelCatalog {
    /// Build a catalog from explicit entries
    #[must_use]
    pub fn new(models: Vec<ModelSpec>) -> Self {
        Self { models }
    }

    /// Look up a model by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ModelSpec> {
        self.models.iter().find(|m| m.id == id)
    }

    /// Whether the model counts against the pro quota (unknown ids do not)
    #[must_use]
    pub fn is_pro(&self, id: &str) -> bool {
        self.get(id).is_some_and(|m| m.pro)
    }

    /// Whether the model accepts attachments (unknown ids do not)
    #[must_use]
    pub fn supports_file_upload(&self, id: &str) -> bool {
        self.get(id).is_some_and(|m| m.file_upload)
    }

    /// All entries
    #[must_use]
    pub fn models(&self) -> &[ModelSpec] {
        &self.models
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Limits section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsToml {
    /// Maximum input length in characters
    pub max_input_length: Option<usize>,
    /// Daily messages for guests
    pub guest_daily_message_limit: Option<u32>,
    /// Daily messages for signed-in users
    pub auth_daily_message_limit: Option<u32>,
    /// Daily messages on pro models
    pub pro_daily_message_limit: Option<u32>,
    /// Remaining-count at which a heads-up is shown
    pub remaining_query_alert_threshold: Option<u32>,
    /// Files per submission batch
    pub daily_file_upload_limit: Option<usize>,
}

/// Models section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsToml {
    /// Model used when neither conversation nor user picked one
    pub default_model: Option<String>,
    /// Replacement catalog
    pub catalog: Option<Vec<ModelSpec>>,
}

/// Prompts section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptsToml {
    /// Fallback system prompt
    pub default_system_prompt: Option<String>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposerToml {
    /// Limits section
    pub limits: LimitsToml,
    /// Models section
    pub models: ModelsToml,
    /// Prompts section
    pub prompts: PromptsToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Constants the Composer consumes
#[derive(Clone, Debug)]
pub struct ComposerConfig {
    /// Maximum input length in characters
    pub max_input_length: usize,
    /// Daily message quota for guests
    pub guest_daily_message_limit: u32,
    /// Daily message quota for signed-in users
    pub auth_daily_message_limit: u32,
    /// Daily message quota on pro models
    pub pro_daily_message_limit: u32,
    /// Show a heads-up once this many (or fewer) messages remain
    pub remaining_query_alert_threshold: u32,
    /// Maximum files in one submission
    pub daily_file_upload_limit: usize,
    /// Default model id
    pub default_model: String,
    /// Default system prompt
    pub default_system_prompt: String,
    /// Selectable models
    pub catalog: ModelCatalog,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    pub(crate) source: ConfigSource,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            max_input_length: DEFAULT_MAX_INPUT_LENGTH,
            guest_daily_message_limit: 5,
            auth_daily_message_limit: 1000,
            pro_daily_message_limit: 5,
            remaining_query_alert_threshold: 2,
            daily_file_upload_limit: 5,
            default_model: DEFAULT_MODEL.to_string(),
            default_system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            catalog: ModelCatalog::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ComposerConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Daily quota for an identity
    #[must_use]
    pub fn daily_limit(&self, authenticated: bool) -> u32 {
        if authenticated {
            self.auth_daily_message_limit
        } else {
            self.guest_daily_message_limit
        }
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Reject values the Composer cannot run with
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_input_length == 0 {
            return Err(ConfigError::ValidationError(
                "max_input_length must be greater than 0".to_string(),
            ));
        }
        if self.default_model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "default_model must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/composer/composer.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("composer").join("composer.toml"))
}

/// Load configuration from the default path, then the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be read, parsed or
/// validated. A missing config file is not an error.
pub fn load_config() -> Result<ComposerConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path, then the environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read, parsed or
/// validated.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ComposerConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration with an explicit environment lookup
///
/// # Errors
///
/// Same as [`load_config_from_path`].
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<ComposerConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = ComposerConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ComposerToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);
    config.validate()?;

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ComposerConfig, toml: ComposerToml) {
    let limits = toml.limits;
    if let Some(length) = limits.max_input_length {
        config.max_input_length = length;
    }
    if let Some(limit) = limits.guest_daily_message_limit {
        config.guest_daily_message_limit = limit;
    }
    if let Some(limit) = limits.auth_daily_message_limit {
        config.auth_daily_message_limit = limit;
    }
    if let Some(limit) = limits.pro_daily_message_limit {
        config.pro_daily_message_limit = limit;
    }
    if let Some(threshold) = limits.remaining_query_alert_threshold {
        config.remaining_query_alert_threshold = threshold;
    }
    if let Some(files) = limits.daily_file_upload_limit {
        config.daily_file_upload_limit = files;
    }

    if let Some(model) = toml.models.default_model {
        config.default_model = model;
    }
    if let Some(catalog) = toml.models.catalog {
        config.catalog = ModelCatalog::new(catalog);
    }

    if let Some(prompt) = toml.prompts.default_system_prompt {
        config.default_system_prompt = prompt;
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config<F>(config: &mut ComposerConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(length) = env("COMPOSER_MAX_INPUT_LENGTH").and_then(|v| v.parse().ok()) {
        config.max_input_length = length;
        config.source = ConfigSource::Env;
    }
    if let Some(limit) = env("COMPOSER_GUEST_DAILY_LIMIT").and_then(|v| v.parse().ok()) {
        config.guest_daily_message_limit = limit;
        config.source = ConfigSource::Env;
    }
    if let Some(limit) = env("COMPOSER_AUTH_DAILY_LIMIT").and_then(|v| v.parse().ok()) {
        config.auth_daily_message_limit = limit;
        config.source = ConfigSource::Env;
    }
    if let Some(limit) = env("COMPOSER_PRO_DAILY_LIMIT").and_then(|v| v.parse().ok()) {
        config.pro_daily_message_limit = limit;
        config.source = ConfigSource::Env;
    }
    if let Some(model) = env("COMPOSER_DEFAULT_MODEL") {
        config.default_model = model;
        config.source = ConfigSource::Env;
    }
    if let Some(prompt) = env("COMPOSER_SYSTEM_PROMPT") {
        config.default_system_prompt = prompt;
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Default model override
    pub default_model: Option<String>,
    /// Max input length override
    pub max_input_length: Option<usize>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set default model override
    #[must_use]
    pub fn with_default_model(mut self, model: String) -> Self {
        self.default_model = Some(model);
        self
    }

    /// Set max input length override
    #[must_use]
    pub fn with_max_input_length(mut self, length: usize) -> Self {
        self.max_input_length = Some(length);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut ComposerConfig) {
        if self.default_model.is_some() || self.max_input_length.is_some() {
            config.source = ConfigSource::Cli;
        }
        if let Some(ref model) = self.default_model {
            config.default_model = model.clone();
        }
        if let Some(length) = self.max_input_length {
            config.max_input_length = length;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
