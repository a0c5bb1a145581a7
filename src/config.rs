use anyhow::{Context, Result};
use dirs::config_dir;
use path_clean::PathClean;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::SyncError;
use crate::granularity::Granularity;
use crate::retry::BackoffPolicy;

/// Environment variable naming the document for `export` and `diff`
pub const DOCUMENT_ID_ENV: &str = "GOOGLE_DOCUMENT_ID";

/// Environment variable pointing at the OAuth client secrets file
pub const CLIENT_SECRETS_ENV: &str = "GOOGLE_OAUTH_CLIENT_SECRETS";

/// Environment variable holding a ready-made access token
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_ACCESS_TOKEN";

/// Main configuration structure for docsentry
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Directory for current-content exports
    #[serde(default = "default_export_directory")]
    pub export_directory: String,

    /// Root directory for per-document revision history
    #[serde(default = "default_revisions_directory")]
    pub revisions_directory: String,

    /// Directory for diff reports
    #[serde(default = "default_diffs_directory")]
    pub diffs_directory: String,

    /// Documents synchronized by `docsentry revisions` when no ids are given
    #[serde(default)]
    pub documents: Vec<DocumentConfig>,

    /// OAuth settings
    #[serde(default)]
    pub auth: AuthConfig,

    /// Rate-limit retry behavior
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Advanced settings
    #[serde(default)]
    pub advanced: AdvancedConfig,
}

/// A tracked document
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct DocumentConfig {
    /// Remote document id (from the document URL)
    pub doc_id: String,

    /// Storage folder label; the doc id is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_name: Option<String>,

    /// Revision sampling; invalid values fall back to `all`
    #[serde(default, deserialize_with = "lenient_granularity")]
    pub granularity: Granularity,
}

impl DocumentConfig {
    pub fn new(doc_id: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            folder_name: None,
            granularity: Granularity::All,
        }
    }
}

fn lenient_granularity<'de, D>(deserializer: D) -> std::result::Result<Granularity, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value
        .map(|v| Granularity::parse_lenient(&v))
        .unwrap_or_default())
}

/// OAuth configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuthConfig {
    /// Client secrets JSON; falls back to `GOOGLE_OAUTH_CLIENT_SECRETS`
    pub client_secrets: Option<String>,

    /// Where the OAuth token is persisted
    #[serde(default = "default_token_file")]
    pub token_file: String,

    /// Seconds to wait for browser authorization
    #[serde(default = "default_auth_timeout")]
    pub timeout: u64,
}

/// Retry configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"

    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,
}

/// Advanced configuration options
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AdvancedConfig {
    /// Set snapshot mtimes to the revision time
    #[serde(default = "default_true")]
    pub preserve_timestamps: bool,
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_export_directory() -> String {
    "${HOME}/docsentry/exports".to_string()
}
fn default_revisions_directory() -> String {
    "${HOME}/docsentry/revisions".to_string()
}
fn default_diffs_directory() -> String {
    "${HOME}/docsentry/diffs".to_string()
}
fn default_token_file() -> String {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        format!("{}/docsentry/token.json", data_home)
    } else if let Ok(home) = std::env::var("HOME") {
        format!("{}/.local/share/docsentry/token.json", home)
    } else {
        "token.json".to_string()
    }
}
fn default_auth_timeout() -> u64 {
    120
}
fn default_max_attempts() -> u32 {
    5
}
fn default_initial_delay_ms() -> u64 {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations
impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_secrets: None,
            token_file: default_token_file(),
            timeout: default_auth_timeout(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            color: default_true(),
        }
    }
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            preserve_timestamps: default_true(),
        }
    }
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Ok(Self::load_permissive(&config_path))
        } else {
            let mut config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;
            config.expand_paths()?;

            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        // Expand environment variables in paths
        config.expand_paths()?;

        Ok(config)
    }

    /// Load configuration, treating an unreadable or malformed file as absent
    pub fn load_permissive(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!("Ignoring configuration at {:?}: {:#}", path, e);
                let mut config = Self::default();
                if let Err(e) = config.expand_paths() {
                    warn!("Failed to expand default paths: {:#}", e);
                }
                config
            }
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("docsentry").join("config.yml"))
    }

    /// Expand environment variables and `~` in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.export_directory = expand_path(&self.export_directory)
            .context("Failed to expand export_directory path")?;

        self.revisions_directory = expand_path(&self.revisions_directory)
            .context("Failed to expand revisions_directory path")?;

        self.diffs_directory = expand_path(&self.diffs_directory)
            .context("Failed to expand diffs_directory path")?;

        self.auth.token_file =
            expand_path(&self.auth.token_file).context("Failed to expand token_file path")?;

        if let Some(secrets) = &self.auth.client_secrets {
            self.auth.client_secrets =
                Some(expand_path(secrets).context("Failed to expand client_secrets path")?);
        }

        Ok(())
    }

    pub fn export_dir(&self) -> PathBuf {
        PathBuf::from(&self.export_directory)
    }

    pub fn revisions_dir(&self) -> PathBuf {
        PathBuf::from(&self.revisions_directory)
    }

    pub fn diffs_dir(&self) -> PathBuf {
        PathBuf::from(&self.diffs_directory)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth.timeout)
    }

    /// Backoff policy for Drive API calls
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.initial_delay_ms),
        )
    }

    /// Client secrets path from the config file or `GOOGLE_OAUTH_CLIENT_SECRETS`
    pub fn client_secrets_path(&self) -> Result<PathBuf, SyncError> {
        match &self.auth.client_secrets {
            Some(path) => Ok(PathBuf::from(path)),
            None => required_env(CLIENT_SECRETS_ENV).map(PathBuf::from),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            export_directory: default_export_directory(),
            revisions_directory: default_revisions_directory(),
            diffs_directory: default_diffs_directory(),
            documents: Vec::new(),
            auth: AuthConfig::default(),
            retry: RetryConfig::default(),
            logging: LoggingConfig::default(),
            advanced: AdvancedConfig::default(),
        }
    }
}

fn expand_path(path: &str) -> Result<String> {
    let expanded = shellexpand::full(path)?;
    Ok(PathBuf::from(expanded.as_ref())
        .clean()
        .to_string_lossy()
        .into_owned())
}

/// Read a required environment variable, explaining how to set it when missing
pub fn required_env(var_name: &str) -> Result<String, SyncError> {
    match std::env::var(var_name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(SyncError::Config(format!(
            "Missing required environment variable: {var_name}\n\
             Please set it before running the CLI, e.g.\n  \
             export {var_name}='example-value'"
        ))),
    }
}
