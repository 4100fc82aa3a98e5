// Configuration loading and parsing (config/client.toml).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

const CLIENT_CONFIG: &str = "client.toml";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// client.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub flags: FlagsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Minimum time the loading indicator stays visible once raised.
    pub min_loading_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_loading_ms: crate::loading::DEFAULT_MIN_DURATION.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlagsConfig {
    pub poll_interval_ms: u64,
}

impl Default for FlagsConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: crate::flags::DEFAULT_POLL_INTERVAL.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// SQLite file holding the token and judge snapshot. Defaults to the
    /// platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_request_timeout_secs() -> u64 {
    15
}

impl Config {
    pub fn min_loading(&self) -> Duration {
        Duration::from_millis(self.session.min_loading_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.flags.poll_interval_ms)
    }

    /// Where the session database lives.
    pub fn storage_path(&self) -> PathBuf {
        if let Some(path) = &self.storage.path {
            return path.clone();
        }
        directories::ProjectDirs::from("dev", "openhack", "openhack-judge")
            .map(|dirs| dirs.data_dir().join("session.db"))
            .unwrap_or_else(|| PathBuf::from("session.db"))
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate `config/client.toml` relative to `base_dir`.
///
/// Does not copy defaults; prefer `load_config()`.
pub(crate) fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join(CLIENT_CONFIG);
    let text = read_file(&path)?;
    let config = parse_config(&text, &path)?;
    validate(&config)?;
    Ok(config)
}

pub fn parse_config(text: &str, path: &Path) -> Result<Config, ConfigError> {
    toml::from_str(text).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Seed `config/client.toml` from `defaults/client.toml` if it is missing.
///
/// Returns the seeded path, or `None` when a config already exists. An
/// existing config is never overwritten.
pub fn seed_client_config(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let target = base_dir.join("config").join(CLIENT_CONFIG);
    if target.exists() {
        return Ok(None);
    }

    let source = base_dir.join("defaults").join(CLIENT_CONFIG);
    let defaults = std::fs::read(&source).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!(
            "no config at {} and no defaults at {}: {e}",
            target.display(),
            source.display()
        ),
    })?;

    if let Some(dir) = target.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("cannot create {}: {e}", dir.display()),
        })?;
    }
    std::fs::write(&target, defaults).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("cannot write {}: {e}", target.display()),
    })?;

    Ok(Some(target))
}

/// Load config relative to the current working directory, copying defaults
/// first.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    load_config_in(&cwd)
}

/// Like `load_config()` but rooted at `base_dir`.
pub fn load_config_in(base_dir: &Path) -> Result<Config, ConfigError> {
    seed_client_config(base_dir)?;
    load_config_from(base_dir)
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

pub fn validate(config: &Config) -> Result<(), ConfigError> {
    let url = config.api.base_url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::ValidationError {
            field: "api.base_url".into(),
            message: format!("must start with http:// or https://, got {url:?}"),
        });
    }

    let positive: &[(&str, u64)] = &[
        ("api.request_timeout_secs", config.api.request_timeout_secs),
        ("session.min_loading_ms", config.session.min_loading_ms),
        ("flags.poll_interval_ms", config.flags.poll_interval_ms),
    ];
    for (name, val) in positive {
        if *val == 0 {
            return Err(ConfigError::ValidationError {
                field: name.to_string(),
                message: "must be > 0".into(),
            });
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
