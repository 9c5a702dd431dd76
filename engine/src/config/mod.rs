//! Configuration management
//!
//! This module handles loading, validation, and management of the datachat
//! configuration. Configuration is stored in TOML format at
//! ~/.datachat/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level
//! - **service**: Azure OpenAI endpoint, API version, model deployment
//! - **auth**: Credential mode and identifiers (secrets live in the keychain)
//! - **agent**: Name and instructions given to the remote analysis agent
//! - **artifact**: Bundled dataset path and upload limits
//! - **run**: Run timeout and polling interval
//! - **retry**: Backoff for transient network failures
//! - **session**: Cleanup policy
//!
//! # Environment Overrides
//!
//! `DATACHAT_ENDPOINT` and `DATACHAT_MODEL` take precedence over the file.
//!
//! # Examples
//!
//! ```no_run
//! use datachat_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Endpoint: {}", config.service.endpoint);
//! println!("Model: {}", config.service.model);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Remote agent service settings
    pub service: ServiceConfig,

    /// Authentication settings
    #[serde(default)]
    pub auth: AuthConfig,

    /// Remote agent settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Dataset upload settings
    #[serde(default)]
    pub artifact: ArtifactConfig,

    /// Run settings
    #[serde(default)]
    pub run: RunConfig,

    /// Retry settings
    #[serde(default)]
    pub retry: RetryConfig,

    /// Session lifecycle settings
    #[serde(default)]
    pub session: SessionConfig,
}

/// Core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Remote agent service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Azure OpenAI resource endpoint, e.g. https://my-resource.openai.azure.com
    pub endpoint: String,

    /// API version query parameter
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Model deployment name used for the agent
    #[serde(default = "default_model")]
    pub model: String,
}

/// How the client proves its identity to the service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Entra ID service principal (tenant, client id, client secret)
    ServicePrincipal,

    /// Ambient credentials from the environment
    Default,

    /// Static resource key
    ApiKey,
}

/// Authentication configuration
///
/// Client secrets and API keys are never stored here; they come from the OS
/// keychain or environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Credential mode
    #[serde(default = "default_auth_mode")]
    pub mode: AuthMode,

    /// Entra ID tenant (service_principal mode)
    #[serde(default)]
    pub tenant_id: Option<String>,

    /// Application (client) id (service_principal mode)
    #[serde(default)]
    pub client_id: Option<String>,

    /// Token authority base URL
    #[serde(default = "default_authority")]
    pub authority: String,

    /// OAuth scope requested for the service
    #[serde(default = "default_scope")]
    pub scope: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: default_auth_mode(),
            tenant_id: None,
            client_id: None,
            authority: default_authority(),
            scope: default_scope(),
        }
    }
}

/// Remote agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Display name of the provisioned agent
    #[serde(default = "default_agent_name")]
    pub name: String,

    /// Natural-language instructions given to the agent
    #[serde(default = "default_instructions")]
    pub instructions: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            instructions: default_instructions(),
        }
    }
}

/// Dataset upload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Dataset loaded when `chat` is started without `--file` (supports ~ expansion)
    #[serde(default)]
    pub default_path: Option<PathBuf>,

    /// Largest accepted upload in bytes
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,

    /// Accepted file extensions, lowercase, without the dot
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            default_path: None,
            max_bytes: default_max_bytes(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

/// Run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Seconds to wait for one question to be answered
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Delay between run status polls in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl RunConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Retry configuration for upload and run calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one (1 disables retries)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff delay in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Backoff cap in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionConfig {
    /// Also delete the uploaded dataset when a session ends
    #[serde(default)]
    pub delete_artifact_on_end: bool,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_api_version() -> String {
    "2024-05-01-preview".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_auth_mode() -> AuthMode {
    AuthMode::ServicePrincipal
}

fn default_authority() -> String {
    "https://login.microsoftonline.com".to_string()
}

fn default_scope() -> String {
    "https://cognitiveservices.azure.com/.default".to_string()
}

fn default_agent_name() -> String {
    "datachat-analyst".to_string()
}

fn default_instructions() -> String {
    "You are a data analyst. Use the code interpreter to load the attached file \
     and answer questions about it. Show the numbers you computed."
        .to_string()
}

fn default_max_bytes() -> u64 {
    20 * 1024 * 1024
}

fn default_allowed_extensions() -> Vec<String> {
    ["csv", "tsv", "txt", "json"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    8000
}

impl Config {
    /// Load configuration from the default location (~/.datachat/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or written, TOML parsing
    /// fails, or validation fails.
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse, apply environment overrides, and validate
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.apply_env_overrides();
        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default_config();

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Wrote default configuration to {:?}", path);

        config.apply_env_overrides();
        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.datachat/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".datachat").join("config.toml"))
    }

    /// Create a default configuration
    ///
    /// The endpoint is a placeholder; validation accepts it so that a fresh
    /// install can write its config file, and `doctor` flags it.
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig::default(),
            service: ServiceConfig {
                endpoint: PLACEHOLDER_ENDPOINT.to_string(),
                api_version: default_api_version(),
                model: default_model(),
            },
            auth: AuthConfig::default(),
            agent: AgentConfig::default(),
            artifact: ArtifactConfig::default(),
            run: RunConfig::default(),
            retry: RetryConfig::default(),
            session: SessionConfig::default(),
        }
    }

    /// True while the endpoint still holds the value written on first run
    pub fn has_placeholder_endpoint(&self) -> bool {
        self.service.endpoint == PLACEHOLDER_ENDPOINT
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(endpoint) = std::env::var("DATACHAT_ENDPOINT") {
            if !endpoint.trim().is_empty() {
                self.service.endpoint = endpoint.trim().to_string();
            }
        }
        if let Ok(model) = std::env::var("DATACHAT_MODEL") {
            if !model.trim().is_empty() {
                self.service.model = model.trim().to_string();
            }
        }
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates enumerated and numeric fields
    /// - Normalizes the endpoint (no trailing slash)
    /// - Checks service principal identifiers are present
    /// - Expands ~ in the default artifact path
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        let endpoint = self.service.endpoint.trim().trim_end_matches('/');
        if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
            return Err(EngineError::Config(format!(
                "service.endpoint must be an http(s) URL, got '{}'",
                self.service.endpoint
            )));
        }
        self.service.endpoint = endpoint.to_string();

        if self.service.model.trim().is_empty() {
            return Err(EngineError::Config(
                "service.model must not be empty".to_string(),
            ));
        }
        if self.service.api_version.trim().is_empty() {
            return Err(EngineError::Config(
                "service.api_version must not be empty".to_string(),
            ));
        }

        if self.auth.mode == AuthMode::ServicePrincipal && !self.has_placeholder_endpoint() {
            if self.auth.tenant_id.as_deref().map_or(true, str::is_empty) {
                return Err(EngineError::Config(
                    "auth.tenant_id is required for service_principal mode".to_string(),
                ));
            }
            if self.auth.client_id.as_deref().map_or(true, str::is_empty) {
                return Err(EngineError::Config(
                    "auth.client_id is required for service_principal mode".to_string(),
                ));
            }
        }
        self.auth.authority = self.auth.authority.trim_end_matches('/').to_string();

        if self.agent.instructions.trim().is_empty() {
            return Err(EngineError::Config(
                "agent.instructions must not be empty".to_string(),
            ));
        }

        if self.artifact.max_bytes == 0 {
            return Err(EngineError::Config(
                "artifact.max_bytes must be greater than 0".to_string(),
            ));
        }
        self.artifact.allowed_extensions = self
            .artifact
            .allowed_extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect();

        if let Some(path) = &self.artifact.default_path {
            self.artifact.default_path = Some(expand_path(path)?);
        }

        if self.run.timeout_secs == 0 {
            return Err(EngineError::Config(
                "run.timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.run.poll_interval_ms == 0 {
            return Err(EngineError::Config(
                "run.poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(EngineError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(EngineError::Config(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".to_string(),
            ));
        }

        Ok(())
    }
}

const PLACEHOLDER_ENDPOINT: &str = "https://YOUR-RESOURCE.openai.azure.com";

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
