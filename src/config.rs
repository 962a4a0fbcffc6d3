//! Factory configuration module.
//!
//! Handles loading, validating, and merging `site-factory.toml`. Stock
//! defaults are serialized to a TOML value, the user file is merged on top
//! key by key, and the result is deserialized with unknown keys rejected.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [paths]
//! data_dir = "data"           # Site, page, job and lock records
//! output_dir = "output"       # Built releases, one directory per site
//!
//! [remote]
//! kind = "ssh"                # "ssh" or "local"
//! host = "203.0.113.10"       # Required for ssh deploys
//! user = "deploy"
//! credential = "~/.ssh/id_rsa"
//! web_root = "/var/www/sites"
//! proxy_available_dir = "/etc/nginx/sites-available"
//! proxy_enabled_dir = "/etc/nginx/sites-enabled"
//! operation_timeout_secs = 300
//!
//! [deploy]
//! retention = 3               # Releases kept on the remote
//! tls_email = "ops@example.com"
//!
//! [jobs]
//! workers = 4                 # Omit for auto = CPU cores
//!
//! [content]
//! endpoint = "https://api.openai.com/v1/chat/completions"
//! model = "gpt-4o-mini"
//! api_key_env = "OPENAI_API_KEY"
//! max_retries = 2
//! concurrency = 5
//! request_timeout_secs = 120
//! ```
//!
//! ## Partial Configuration
//!
//! Config files are sparse. Override just the values you want:
//!
//! ```toml
//! [remote]
//! host = "203.0.113.10"
//! ```
//!
//! Unknown keys are rejected to catch typos early. Secrets never live in the
//! file: `credential` is a path to a key, and the synthesis API key is read
//! from the environment variable named by `api_key_env`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Factory configuration loaded from `site-factory.toml`.
///
/// All fields have defaults. User config files need only specify the values
/// they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FactoryConfig {
    pub paths: PathsConfig,
    pub remote: RemoteConfig,
    pub deploy: DeployConfig,
    pub jobs: JobsConfig,
    pub content: ContentConfig,
}

impl FactoryConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.deploy.retention == 0 {
            return Err(ConfigError::Validation(
                "deploy.retention must be at least 1".into(),
            ));
        }
        if self.remote.operation_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "remote.operation_timeout_secs must be non-zero".into(),
            ));
        }
        if self.content.concurrency == 0 {
            return Err(ConfigError::Validation(
                "content.concurrency must be at least 1".into(),
            ));
        }
        if self.jobs.workers == Some(0) {
            return Err(ConfigError::Validation(
                "jobs.workers must be at least 1 when set".into(),
            ));
        }
        if self.remote.kind == RemoteKind::Ssh
            && self.remote.host.as_deref().is_some_and(|h| h.trim().is_empty())
        {
            return Err(ConfigError::Validation(
                "remote.host must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Local directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("output"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteKind {
    #[default]
    Ssh,
    /// Filesystem target on this machine; proxy reloads are recorded, not run.
    Local,
}

/// Deploy target settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConfig {
    pub kind: RemoteKind,
    pub host: Option<String>,
    pub user: String,
    /// Path to the SSH private key. A reference, never the key itself.
    pub credential: String,
    pub web_root: String,
    pub proxy_available_dir: String,
    pub proxy_enabled_dir: String,
    /// Upper bound for any single remote operation.
    pub operation_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            kind: RemoteKind::Ssh,
            host: None,
            user: "deploy".to_string(),
            credential: "~/.ssh/id_rsa".to_string(),
            web_root: "/var/www/sites".to_string(),
            proxy_available_dir: "/etc/nginx/sites-available".to_string(),
            proxy_enabled_dir: "/etc/nginx/sites-enabled".to_string(),
            operation_timeout_secs: 300,
        }
    }
}

/// Release promotion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeployConfig {
    /// Number of releases kept on the remote, including the live one.
    pub retention: usize,
    /// Contact address passed to the certificate bootstrap.
    pub tls_email: Option<String>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            retention: 3,
            tls_email: None,
        }
    }
}

/// Background job settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JobsConfig {
    /// Maximum number of concurrent jobs across all sites.
    /// When absent, defaults to the number of CPU cores.
    pub workers: Option<usize>,
}

/// Resolve the effective job worker count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &JobsConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.workers.map(|n| n.min(cores)).unwrap_or(cores)
}

/// Content synthesis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContentConfig {
    /// OpenAI-compatible chat completions URL.
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Extra attempts after a response that is not a JSON object.
    pub max_retries: u32,
    /// Concurrent synthesis calls during bulk generation.
    pub concurrency: usize,
    pub request_timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_retries: 2,
            concurrency: 5,
            request_timeout_secs: 120,
            max_tokens: 8192,
            temperature: 0.7,
        }
    }
}

// =============================================================================
// Loading
// =============================================================================

/// Stock defaults as a TOML value, the base every user file merges onto.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(FactoryConfig::default())?)
}

/// Deep-merge two TOML values. Tables merge key by key; anything else in
/// the overlay replaces the base.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<FactoryConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: FactoryConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from the given file path, falling back to stock defaults
/// when the file is absent.
pub fn load_config(path: &Path) -> Result<FactoryConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `site-factory.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Site Factory Configuration
# ==========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Local paths
# ---------------------------------------------------------------------------
[paths]
# Site, page, history, job and lock records.
data_dir = "data"

# Built releases: output/{site_id}_{slug}/v{n}/
output_dir = "output"

# ---------------------------------------------------------------------------
# Deploy target
# ---------------------------------------------------------------------------
[remote]
# "ssh" deploys over ssh/rsync; "local" deploys into web_root on this machine.
kind = "ssh"

# Host to deploy to (required for ssh).
# host = "203.0.113.10"

user = "deploy"

# Path to the private key used for ssh. Never put the key itself here.
credential = "~/.ssh/id_rsa"

# Releases land in {web_root}/{domain}/releases/v{n}, live at {domain}/current.
web_root = "/var/www/sites"

# Reverse proxy config directories.
proxy_available_dir = "/etc/nginx/sites-available"
proxy_enabled_dir = "/etc/nginx/sites-enabled"

# Upper bound in seconds for any single remote operation.
operation_timeout_secs = 300

# ---------------------------------------------------------------------------
# Promotion
# ---------------------------------------------------------------------------
[deploy]
# Releases kept on the remote, including the live one.
retention = 3

# Contact address for the one-time certificate bootstrap.
# tls_email = "ops@example.com"

# ---------------------------------------------------------------------------
# Background jobs
# ---------------------------------------------------------------------------
[jobs]
# Maximum concurrent jobs across all sites.
# Omit or comment out to auto-detect (= number of CPU cores).
# workers = 4

# ---------------------------------------------------------------------------
# Content synthesis
# ---------------------------------------------------------------------------
[content]
# OpenAI-compatible chat completions endpoint.
endpoint = "https://api.openai.com/v1/chat/completions"
model = "gpt-4o-mini"

# Environment variable holding the API key.
api_key_env = "OPENAI_API_KEY"

# Extra attempts when a response is not a JSON object.
max_retries = 2

# Concurrent synthesis calls during bulk generation.
concurrency = 5

request_timeout_secs = 120
max_tokens = 8192
temperature = 0.7
"##
}
