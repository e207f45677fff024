//! Configuration loading: TOML file with environment variable overrides.
//!
//! Looks for `unitwork.toml` in the working directory. Every field has a
//! sensible default so the file is optional. Environment variables take
//! precedence over file values.

use serde::Deserialize;
use unitwork_app::{ConflictPolicy, UnitOfWorkOptions};

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database settings.
    pub database: DatabaseConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Unit-of-work behaviour.
    pub unit_of_work: UnitOfWorkConfig,
}

/// `SQLite` database configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `SQLite` connection URL or file path.
    pub url: String,
    /// Upper bound on pooled connections.
    pub max_connections: u32,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

/// Conflict policy as spelled in the config file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicySetting {
    #[default]
    LastWriterWins,
    DetectConflicts,
}

impl From<ConflictPolicySetting> for ConflictPolicy {
    fn from(setting: ConflictPolicySetting) -> Self {
        match setting {
            ConflictPolicySetting::LastWriterWins => Self::LastWriterWins,
            ConflictPolicySetting::DetectConflicts => Self::DetectConflicts,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct UnitOfWorkConfig {
    pub conflict_policy: ConflictPolicySetting,
    /// Identity stamped into `created_by` / `modified_by`.
    pub committer: String,
}

impl Config {
    /// Load configuration from `unitwork.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// resulting configuration is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("unitwork.toml")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("UNITWORK_DATABASE_URL") {
            self.database.url = val;
        }
        if let Ok(val) = std::env::var("UNITWORK_COMMITTER") {
            self.unit_of_work.committer = val;
        }
        if let Ok(val) = std::env::var("UNITWORK_LOG") {
            self.logging.filter = val;
        }
        if let Ok(val) = std::env::var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "database url must not be empty".to_string(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Validation(
                "max_connections must be non-zero".to_string(),
            ));
        }
        if self.unit_of_work.committer.trim().is_empty() {
            return Err(ConfigError::Validation(
                "committer must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Storage adapter configuration derived from `[database]`.
    #[must_use]
    pub fn storage(&self) -> unitwork_adapter_storage_sqlite_sqlx::Config {
        unitwork_adapter_storage_sqlite_sqlx::Config {
            database_url: self.database.url.clone(),
            max_connections: self.database.max_connections,
        }
    }

    #[must_use]
    pub fn unit_of_work_options(&self) -> UnitOfWorkOptions {
        UnitOfWorkOptions {
            conflict_policy: self.unit_of_work.conflict_policy.into(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:unitwork.db?mode=rwc".to_string(),
            max_connections: 4,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "unitwork_demo=info,unitwork_app=info".to_string(),
        }
    }
}

impl Default for UnitOfWorkConfig {
    fn default() -> Self {
        Self {
            conflict_policy: ConflictPolicySetting::default(),
            committer: "unitwork-demo".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
