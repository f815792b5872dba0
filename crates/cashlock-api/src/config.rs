//! # Service Configuration
//!
//! Two layers:
//!
//! - [`AppConfig`]: process settings from environment variables (`PORT`,
//!   `DATABASE_URL`, `CASHLOCK_CONFIG`, `CERTIFICATION_SIGNING_KEY_HEX`,
//!   `LOG_FORMAT`).
//! - [`EngineConfig`]: the reconciliation rules, read from the YAML file
//!   named by `CASHLOCK_CONFIG`. Every section is optional and falls back
//!   to its documented defaults.
//!
//! ## Security Invariant
//!
//! `AppConfig`'s `Debug` output never shows the database URL or the
//! signing key.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use cashlock_certify::CertificationSettings;
use cashlock_matching::{IntercompanyGroups, MatchingError, PolicyBook};
use cashlock_trust::TrustThresholds;

/// Configuration failure at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// `PORT` is not a valid port number.
    #[error("PORT must be a port number, got {0:?}")]
    InvalidPort(String),

    /// `LOG_FORMAT` is neither `text` nor `json`.
    #[error("LOG_FORMAT must be text or json, got {0:?}")]
    InvalidLogFormat(String),

    /// The engine configuration file could not be read.
    #[error("cannot read engine config {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The engine configuration is not valid YAML for [`EngineConfig`].
    #[error("invalid engine config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A matching policy is out of range.
    #[error(transparent)]
    Policy(#[from] MatchingError),
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(ConfigError::InvalidLogFormat(s.to_string())),
        }
    }
}

/// Process settings.
#[derive(Clone, Default)]
pub struct AppConfig {
    /// Listen port.
    pub port: u16,
    /// PostgreSQL URL; in-memory only when absent.
    pub database_url: Option<String>,
    /// Path of the YAML engine configuration.
    pub engine_config_path: Option<PathBuf>,
    /// Hex-encoded Ed25519 seed for certification artifacts.
    pub signing_key_hex: Option<String>,
    /// Directory certification jobs may read export files from. Exports
    /// can only be uploaded inline when unset.
    pub export_dir: Option<PathBuf>,
    /// Log output format.
    pub log_format: LogFormat,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("engine_config_path", &self.engine_config_path)
            .field(
                "signing_key_hex",
                &self.signing_key_hex.as_ref().map(|_| "[REDACTED]"),
            )
            .field("export_dir", &self.export_dir)
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl AppConfig {
    /// Default listen port.
    pub const DEFAULT_PORT: u16 = 8080;

    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`, which returns the value of a
    /// variable when it is set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let set = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let port = match set("PORT") {
            Some(p) => p
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidPort(p.clone()))?,
            None => Self::DEFAULT_PORT,
        };
        let log_format = match set("LOG_FORMAT") {
            Some(f) => LogFormat::parse(&f)?,
            None => LogFormat::Text,
        };
        Ok(Self {
            port,
            database_url: set("DATABASE_URL"),
            engine_config_path: set("CASHLOCK_CONFIG").map(PathBuf::from),
            signing_key_hex: set("CERTIFICATION_SIGNING_KEY_HEX"),
            export_dir: set("CASHLOCK_EXPORT_DIR").map(PathBuf::from),
            log_format,
        })
    }
}

/// Reconciliation rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default and entity/currency-scoped matching policies.
    pub policies: PolicyBook,
    /// Trust metric thresholds and lock gates.
    pub thresholds: TrustThresholds,
    /// External certification settings.
    pub certification: CertificationSettings,
    /// Entities that move money between each other.
    pub intercompany_groups: IntercompanyGroups,
}

impl EngineConfig {
    /// Parse and validate YAML.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.policies.validate()?;
        Ok(config)
    }

    /// Read and validate a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml_str(&yaml)?;
        tracing::info!(
            path = %path.display(),
            scoped_policies = config.policies.scoped.len(),
            intercompany_groups = config.intercompany_groups.groups().len(),
            "engine config loaded"
        );
        Ok(config)
    }

    /// The file named in `app`, or defaults.
    pub fn for_app(app: &AppConfig) -> Result<Self, ConfigError> {
        match &app.engine_config_path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}
