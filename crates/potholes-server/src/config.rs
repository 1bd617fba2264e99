//! Service configuration.
//!
//! Settings live in `potholes-config.yaml` (or the file named by
//! `POTHOLES_CONFIG`). Every section is optional: a missing file or section
//! yields a self-contained development setup with an in-memory store, blank
//! map tiles and geocoding turned off. Deployment-specific values can then be
//! overridden from the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use potholes_db::MIN_POOL_SIZE;
use potholes_share::DEFAULT_STYLE;
use serde::Deserialize;

use crate::server::ServerConfig;

/// Default configuration file name, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "potholes-config.yaml";

/// Environment variable naming an alternative configuration file.
pub const CONFIG_PATH_ENV: &str = "POTHOLES_CONFIG";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value was present but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServiceConfig {
    /// Listen address.
    #[serde(default)]
    pub server: ServerConfig,

    /// Report store selection.
    #[serde(default)]
    pub store: StoreConfig,

    /// Share image collaborators.
    #[serde(default)]
    pub share: ShareConfig,

    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Load the configuration file named by `POTHOLES_CONFIG`, falling back
    /// to [`DEFAULT_CONFIG_PATH`], then apply process environment overrides.
    ///
    /// A missing file is not an error; defaults are used instead.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string. No environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Apply environment overrides read through `lookup`.
    ///
    /// - `HOST`, `PORT` override `server`
    /// - `DATABASE_URL` sets `store.database_url` and selects `postgres`
    /// - `TILE_ENDPOINT`, `GEOCODE_ENDPOINT`, `SHARE_PIN_URL` override `share`
    /// - `LOG_FORMAT` (`pretty` or `json`) overrides `logging.format`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `PORT` or `LOG_FORMAT` cannot be
    /// parsed.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| ConfigError::Invalid(format!("invalid PORT {port:?}: {e}")))?;
        }
        if let Some(url) = lookup("DATABASE_URL") {
            self.store.backend = StoreKind::Postgres;
            self.store.database_url = Some(url);
        }
        if let Some(endpoint) = lookup("TILE_ENDPOINT") {
            self.share.tile_endpoint = Some(endpoint);
        }
        if let Some(endpoint) = lookup("GEOCODE_ENDPOINT") {
            self.share.geocode_endpoint = Some(endpoint);
        }
        if let Some(url) = lookup("SHARE_PIN_URL") {
            self.share.pin_url = Some(url);
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.format = match format.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "invalid LOG_FORMAT {other:?}: expected pretty or json"
                    )));
                }
            };
        }
        Ok(())
    }

    /// Check cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the `postgres` backend has no
    /// database URL, or the pool is too small for the change listener.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.backend == StoreKind::Postgres {
            if self.store.database_url.is_none() {
                return Err(ConfigError::Invalid(String::from(
                    "store.backend is postgres but no database_url is set",
                )));
            }
            if self.store.max_connections < MIN_POOL_SIZE {
                return Err(ConfigError::Invalid(format!(
                    "store.max_connections must be at least {MIN_POOL_SIZE}, got {}",
                    self.store.max_connections
                )));
            }
        }
        Ok(())
    }
}

/// Which report store to run against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Process-local store.
    #[default]
    Memory,
    /// `PostgreSQL` with `LISTEN/NOTIFY` change streams.
    Postgres,
}

/// Report store settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    /// Selected adapter.
    #[serde(default)]
    pub backend: StoreKind,

    /// `PostgreSQL` URL, required for the `postgres` backend.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Pool size, including the connection held by the change listener.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Pool acquire timeout in seconds.
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreKind::default(),
            database_url: None,
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }
}

impl StoreConfig {
    /// Pool acquire timeout.
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

const fn default_max_connections() -> u32 {
    10
}

const fn default_acquire_timeout_secs() -> u64 {
    5
}

/// Share image collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ShareConfig {
    /// Static map proxy. Blank tiles when unset.
    #[serde(default)]
    pub tile_endpoint: Option<String>,

    /// Reverse geocoding proxy. Geocoding is off when unset.
    #[serde(default)]
    pub geocode_endpoint: Option<String>,

    /// Map style identifier.
    #[serde(default = "default_style")]
    pub style: String,

    /// Pin image URL for single-report markers.
    #[serde(default)]
    pub pin_url: Option<String>,

    /// Regular-weight font file overriding the bundled face.
    #[serde(default)]
    pub font_regular: Option<PathBuf>,

    /// Bold font file. When unset, a configured regular face is reused,
    /// otherwise the bundled bold face.
    #[serde(default)]
    pub font_bold: Option<PathBuf>,

    /// Per-request timeout for tile and geocode calls, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            tile_endpoint: None,
            geocode_endpoint: None,
            style: default_style(),
            pin_url: None,
            font_regular: None,
            font_bold: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ShareConfig {
    /// Per-request timeout for outbound HTTP calls.
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_style() -> String {
    DEFAULT_STYLE.to_owned()
}

const fn default_request_timeout_ms() -> u64 {
    10_000
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    String::from("info")
}
