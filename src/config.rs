//! Settings file and environment configuration for rafflescope.
//!
//! The file is either named explicitly or discovered with `prefer` in the
//! usual config locations (`rafflescope.toml`, `rafflescope.yaml`, ...).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scrapers::config::validate_sites;
use crate::scrapers::{BrowserEngineConfig, SiteConfig};

/// Overrides `cache_dir`.
pub const CACHE_DIR_ENV: &str = "RAFFLESCOPE_CACHE_DIR";

/// Base name `prefer` searches for when no settings file is given.
pub const CONFIG_NAME: &str = "rafflescope";

/// Errors raised while loading or validating settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {format} config {path}: {reason}")]
    Parse {
        path: PathBuf,
        format: &'static str,
        reason: String,
    },

    #[error("unsupported config format `{0}` (expected json, toml or yaml)")]
    UnsupportedFormat(String),

    #[error("no rafflescope settings file found in the standard config locations")]
    NotFound,

    #[error("invalid site `{site}`: {reason}")]
    InvalidSite { site: String, reason: String },

    #[error("duplicate site name `{0}`")]
    DuplicateSite(String),
}

/// Run-wide settings plus the configured sites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Directory for cached renders.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Lifetime of a cached render in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Upper bound for one ingestion run.
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
    /// Sites extracted concurrently.
    #[serde(default = "default_max_site_workers")]
    pub max_site_workers: usize,
    /// Timeout for plain HTTP requests, login included.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Retries for listing fetches before a site is aborted.
    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,
    #[serde(default)]
    pub browser: BrowserEngineConfig,
    #[serde(default)]
    pub sites: Vec<SiteConfig>,
    /// File the settings were read from.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rafflescope")
        .join("renders")
}

fn default_cache_ttl_secs() -> u64 {
    600
}

fn default_run_timeout_secs() -> u64 {
    300
}

fn default_max_site_workers() -> usize {
    4
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_fetch_retries() -> u32 {
    2
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            cache_ttl_secs: default_cache_ttl_secs(),
            run_timeout_secs: default_run_timeout_secs(),
            max_site_workers: default_max_site_workers(),
            request_timeout_secs: default_request_timeout_secs(),
            fetch_retries: default_fetch_retries(),
            browser: BrowserEngineConfig::default(),
            sites: Vec::new(),
            source_path: None,
        }
    }
}

impl Settings {
    /// Find the settings file with `prefer` and load it.
    pub async fn discover() -> Result<Self, ConfigError> {
        let found = prefer::load(CONFIG_NAME)
            .await
            .map_err(|_| ConfigError::NotFound)?;
        let path = found
            .source_path()
            .map(|p| p.to_path_buf())
            .ok_or(ConfigError::NotFound)?;
        Self::load(&path).await
    }

    /// Load settings from `path`, apply environment overrides and validate.
    ///
    /// The format follows the extension: `.json`, `.toml`, `.yaml`/`.yml`.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let mut settings = Self::parse_from(&contents, &ext, path)?;
        settings.source_path = Some(path.to_path_buf());

        let settings = settings.with_env_overrides();
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings text in the format named by `ext`. No overrides, no
    /// validation.
    pub fn parse(contents: &str, ext: &str) -> Result<Self, ConfigError> {
        Self::parse_from(contents, ext, Path::new(""))
    }

    fn parse_from(contents: &str, ext: &str, path: &Path) -> Result<Self, ConfigError> {
        let parse_error = |format: &'static str, reason: String| ConfigError::Parse {
            path: path.to_path_buf(),
            format,
            reason,
        };
        match ext {
            "json" => serde_json::from_str(contents).map_err(|e| parse_error("JSON", e.to_string())),
            "toml" => toml::from_str(contents).map_err(|e| parse_error("TOML", e.to_string())),
            "yaml" | "yml" => {
                serde_yaml::from_str(contents).map_err(|e| parse_error("YAML", e.to_string()))
            }
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }

    /// Apply environment overrides: `RAFFLESCOPE_CACHE_DIR` and the browser's
    /// `BROWSER_URL`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(dir) = std::env::var(CACHE_DIR_ENV).ok().filter(|v| !v.is_empty()) {
            self.cache_dir = PathBuf::from(dir);
        }
        self.browser = self.browser.with_env_overrides();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_site_workers == 0 {
            return Err(ConfigError::InvalidSite {
                site: "<settings>".to_string(),
                reason: "max_site_workers must be at least 1".to_string(),
            });
        }
        validate_sites(&self.sites)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
