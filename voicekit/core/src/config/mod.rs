//! TOML Configuration File Support
//!
//! Centralized configuration loading for hosts of the conversation core,
//! backed by a TOML file at `~/.config/smartvoicekit/voicekit.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [api]
//! base_url = "https://assistant.example.com/api/v1"
//! client_metadata = "voicekit-console/0.1"
//! request_timeout_ms = 15000
//!
//! [history]
//! page_size = 20
//! sort_order = "descending"
//! error_group_min_run = 4
//!
//! [session]
//! welcome_message = "Hi! Ask me anything."
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::conversation::SortOrder;

/// Environment variable overriding [`ApiConfig::base_url`]
pub const ENV_API_URL: &str = "VOICEKIT_API_URL";
/// Environment variable overriding [`HistoryConfig::page_size`]
pub const ENV_PAGE_SIZE: &str = "VOICEKIT_PAGE_SIZE";
/// Environment variable overriding [`ApiConfig::request_timeout`]
pub const ENV_TIMEOUT_MS: &str = "VOICEKIT_TIMEOUT_MS";
/// Environment variable overriding [`ApiConfig::client_metadata`]
pub const ENV_CLIENT_METADATA: &str = "VOICEKIT_CLIENT_METADATA";

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

// =============================================================================
// Configuration Source Tracking
// =============================================================================

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
// TOML Configuration Structures
// =============================================================================

/// `[api]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiToml {
    /// Backend base URL
    pub base_url: Option<String>,

    /// Value of the `X-Client-Metadata` header
    pub client_metadata: Option<String>,

    /// Per-request timeout in milliseconds
    pub request_timeout_ms: Option<u64>,
}

/// `[history]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryToml {
    /// Entries per page
    pub page_size: Option<usize>,

    /// Layout order of days and entries
    pub sort_order: Option<SortOrder>,

    /// Shortest run of consecutive errors that collapses into a group
    pub error_group_min_run: Option<usize>,
}

/// `[session]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionToml {
    /// Message shown once to a new user
    pub welcome_message: Option<String>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceKitToml {
    /// Backend section
    pub api: ApiToml,

    /// History section
    pub history: HistoryToml,

    /// Session section
    pub session: SessionToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Backend access settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiConfig {
    /// Backend base URL, without trailing slash
    pub base_url: String,
    /// Value of the `X-Client-Metadata` header
    pub client_metadata: String,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api/v1".to_string(),
            client_metadata: concat!("voicekit/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// History browsing settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryConfig {
    /// Entries per page
    pub page_size: usize,
    /// Layout order
    pub sort_order: SortOrder,
    /// Shortest error run that collapses into a group
    pub error_group_min_run: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            sort_order: SortOrder::Ascending,
            error_group_min_run: 4,
        }
    }
}

/// Session behaviour
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionConfig {
    /// Message shown once to a new user; `None` disables it
    pub welcome_message: Option<String>,
}

/// Centralized configuration
///
/// Use [`load_config`] to load it with proper priority handling.
#[derive(Clone, Debug, Default)]
pub struct VoiceKitConfig {
    /// Backend access
    pub api: ApiConfig,

    /// History browsing
    pub history: HistoryConfig,

    /// Session behaviour
    pub session: SessionConfig,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    source: Option<ConfigSource>,
}

impl VoiceKitConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the highest-priority source that contributed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source.unwrap_or(ConfigSource::Default)
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = Some(source);
    }

    /// Reject values the core cannot work with
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.base_url.is_empty() {
            return Err(ConfigError::ValidationError("api.base_url is empty".into()));
        }
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://") {
            return Err(ConfigError::ValidationError(format!(
                "api.base_url must be an http(s) URL, got {}",
                self.api.base_url
            )));
        }
        if self.history.page_size == 0 {
            return Err(ConfigError::ValidationError(
                "history.page_size must be positive".into(),
            ));
        }
        if self.history.error_group_min_run == 0 {
            return Err(ConfigError::ValidationError(
                "history.error_group_min_run must be positive".into(),
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
/// Returns `$XDG_CONFIG_HOME/smartvoicekit/voicekit.toml` or
/// `~/.config/smartvoicekit/voicekit.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("smartvoicekit").join("voicekit.toml"))
}

/// Load configuration from all sources with proper priority
///
/// CLI overrides are not handled here; apply [`ConfigOverrides`] after.
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<VoiceKitConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// If `path` is `None`, only defaults and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<VoiceKitConfig, ConfigError> {
    let mut config = load_file_layer(path)?;
    apply_env_config(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn load_file_layer(path: Option<PathBuf>) -> Result<VoiceKitConfig, ConfigError> {
    let mut config = VoiceKitConfig::default();

    let Some(config_path) = path else {
        return Ok(config);
    };
    if !config_path.exists() {
        tracing::debug!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return Ok(config);
    }

    let toml_content =
        std::fs::read_to_string(&config_path).map_err(|e| ConfigError::ReadError {
            path: config_path.clone(),
            source: e,
        })?;
    let toml_config: VoiceKitToml = toml::from_str(&toml_content)?;
    apply_toml_config(&mut config, &toml_config);
    config.config_file_path = Some(config_path.clone());
    config.source = Some(ConfigSource::File);

    tracing::info!(
        path = %config_path.display(),
        "Loaded configuration from file"
    );
    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut VoiceKitConfig, toml: &VoiceKitToml) {
    if let Some(ref url) = toml.api.base_url {
        config.api.base_url = url.trim_end_matches('/').to_string();
    }
    if let Some(ref metadata) = toml.api.client_metadata {
        config.api.client_metadata = metadata.clone();
    }
    if let Some(ms) = toml.api.request_timeout_ms {
        config.api.request_timeout = Duration::from_millis(ms);
    }

    if let Some(size) = toml.history.page_size {
        config.history.page_size = size;
    }
    if let Some(order) = toml.history.sort_order {
        config.history.sort_order = order;
    }
    if let Some(run) = toml.history.error_group_min_run {
        config.history.error_group_min_run = run;
    }

    if toml.session.welcome_message.is_some() {
        config.session.welcome_message = toml.session.welcome_message.clone();
    }
}

/// Apply environment overrides, reading variables through `lookup`
fn apply_env_config<F>(config: &mut VoiceKitConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup(ENV_API_URL) {
        config.api.base_url = url.trim_end_matches('/').to_string();
        config.source = Some(ConfigSource::Env);
    }
    if let Some(metadata) = lookup(ENV_CLIENT_METADATA) {
        config.api.client_metadata = metadata;
        config.source = Some(ConfigSource::Env);
    }
    if let Some(timeout) = lookup(ENV_TIMEOUT_MS) {
        if let Ok(ms) = timeout.parse::<u64>() {
            config.api.request_timeout = Duration::from_millis(ms);
            config.source = Some(ConfigSource::Env);
        } else {
            tracing::warn!(value = %timeout, "Ignoring unparsable {}", ENV_TIMEOUT_MS);
        }
    }
    if let Some(size) = lookup(ENV_PAGE_SIZE) {
        if let Ok(n) = size.parse::<usize>() {
            config.history.page_size = n;
            config.source = Some(ConfigSource::Env);
        } else {
            tracing::warn!(value = %size, "Ignoring unparsable {}", ENV_PAGE_SIZE);
        }
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Base URL override
    pub base_url: Option<String>,

    /// Page size override
    pub page_size: Option<usize>,

    /// Request timeout override (milliseconds)
    pub request_timeout_ms: Option<u64>,

    /// Sort order override
    pub sort_order: Option<SortOrder>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set base URL override
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set page size override
    #[must_use]
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    /// Set request timeout override
    #[must_use]
    pub fn with_request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout_ms = Some(ms);
        self
    }

    /// Set sort order override
    #[must_use]
    pub fn with_sort_order(mut self, order: SortOrder) -> Self {
        self.sort_order = Some(order);
        self
    }

    /// Whether any override is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.base_url.is_none()
            && self.page_size.is_none()
            && self.request_timeout_ms.is_none()
            && self.sort_order.is_none()
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut VoiceKitConfig) {
        if self.is_empty() {
            return;
        }
        config.source = Some(ConfigSource::Cli);

        if let Some(ref url) = self.base_url {
            config.api.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(size) = self.page_size {
            config.history.page_size = size;
        }
        if let Some(ms) = self.request_timeout_ms {
            config.api.request_timeout = Duration::from_millis(ms);
        }
        if let Some(order) = self.sort_order {
            config.history.sort_order = order;
        }
    }
}

// =============================================================================
// Context
// =============================================================================

/// Everything a host hands to the core instead of process-wide singletons
#[derive(Clone, Debug)]
pub struct VoiceKitContext {
    /// Resolved configuration
    pub config: VoiceKitConfig,
    /// Where persisted flags live
    pub preferences_path: PathBuf,
}

impl VoiceKitContext {
    /// Build a context with the default preferences location
    ///
    /// Falls back to the working directory when no config dir is known.
    #[must_use]
    pub fn new(config: VoiceKitConfig) -> Self {
        let preferences_path = dirs::config_dir()
            .map(|p| p.join("smartvoicekit").join("preferences.toml"))
            .unwrap_or_else(|| PathBuf::from("voicekit-preferences.toml"));
        Self {
            config,
            preferences_path,
        }
    }

    /// Use `path` for persisted flags
    #[must_use]
    pub fn with_preferences_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.preferences_path = path.into();
        self
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = VoiceKitConfig::default();

        assert_eq!(config.history.page_size, 20);
        assert_eq!(config.history.sort_order, SortOrder::Ascending);
        assert_eq!(config.history.error_group_min_run, 4);
        assert_eq!(config.api.request_timeout, Duration::from_secs(15));
        assert!(config.session.welcome_message.is_none());
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.to_string_lossy().contains("smartvoicekit"));
            assert!(p.to_string_lossy().ends_with("voicekit.toml"));
        }
    }

    #[test]
    fn test_parse_valid_toml() {
        let file = write_toml(
            r#"
[api]
base_url = "https://assistant.example.com/api/v1/"
client_metadata = "console/1.0"
request_timeout_ms = 2500

[history]
page_size = 50
sort_order = "descending"
error_group_min_run = 3

[session]
welcome_message = "Hello"
"#,
        );

        let config = load_file_layer(Some(file.path().to_path_buf())).unwrap();

        assert_eq!(config.api.base_url, "https://assistant.example.com/api/v1");
        assert_eq!(config.api.client_metadata, "console/1.0");
        assert_eq!(config.api.request_timeout, Duration::from_millis(2500));
        assert_eq!(config.history.page_size, 50);
        assert_eq!(config.history.sort_order, SortOrder::Descending);
        assert_eq!(config.history.error_group_min_run, 3);
        assert_eq!(config.session.welcome_message.as_deref(), Some("Hello"));
        assert_eq!(config.source(), ConfigSource::File);
        assert_eq!(config.config_file_path.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_parse_partial_toml_keeps_defaults() {
        let file = write_toml("[history]\npage_size = 7\n");

        let config = load_file_layer(Some(file.path().to_path_buf())).unwrap();

        assert_eq!(config.history.page_size, 7);
        assert_eq!(config.history.error_group_min_run, 4);
        assert_eq!(config.api, ApiConfig::default());
    }

    #[test]
    fn test_missing_file_graceful() {
        let path = PathBuf::from("/nonexistent/path/voicekit.toml");
        let config = load_file_layer(Some(path)).unwrap();

        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.config_file_path.is_none());
    }

    #[test]
    fn test_malformed_toml_error() {
        let file = write_toml("[history\npage_size = \"many\"\n");

        let result = load_config_from_path(Some(file.path().to_path_buf()));
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_env_overrides_file() {
        let file = write_toml(
            r#"
[api]
base_url = "https://file.example.com"

[history]
page_size = 10
"#,
        );
        let mut config = load_file_layer(Some(file.path().to_path_buf())).unwrap();

        apply_env_config(
            &mut config,
            env(&[
                (ENV_API_URL, "https://env.example.com/"),
                (ENV_PAGE_SIZE, "30"),
            ]),
        );

        assert_eq!(config.api.base_url, "https://env.example.com");
        assert_eq!(config.history.page_size, 30);
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_unparsable_env_is_ignored() {
        let mut config = VoiceKitConfig::default();

        apply_env_config(&mut config, env(&[(ENV_TIMEOUT_MS, "soon")]));

        assert_eq!(config.api.request_timeout, Duration::from_secs(15));
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_cli_overrides_env() {
        let mut config = VoiceKitConfig::default();
        apply_env_config(&mut config, env(&[(ENV_API_URL, "https://env.example.com")]));

        ConfigOverrides::new()
            .with_base_url("https://cli.example.com")
            .with_sort_order(SortOrder::Descending)
            .apply(&mut config);

        assert_eq!(config.api.base_url, "https://cli.example.com");
        assert_eq!(config.history.sort_order, SortOrder::Descending);
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[test]
    fn test_config_overrides_empty_no_change() {
        let mut config = VoiceKitConfig::default();

        ConfigOverrides::new().apply(&mut config);

        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = VoiceKitConfig::default();
        config.history.page_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(msg)) if msg.contains("page_size")
        ));

        let mut config = VoiceKitConfig::default();
        config.api.base_url = "ftp://nope".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_context_preferences_path() {
        let context =
            VoiceKitContext::new(VoiceKitConfig::default()).with_preferences_path("/tmp/prefs.toml");
        assert_eq!(context.preferences_path, PathBuf::from("/tmp/prefs.toml"));
    }

    #[test]
    fn test_config_source_display() {
        assert_eq!(format!("{}", ConfigSource::Cli), "CLI");
        assert_eq!(format!("{}", ConfigSource::Env), "environment");
        assert_eq!(format!("{}", ConfigSource::File), "config file");
        assert_eq!(format!("{}", ConfigSource::Default), "default");
    }
}
