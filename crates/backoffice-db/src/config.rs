//! # Back Office Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     BACKOFFICE_DB_PATH=/srv/backoffice.db                              │
//! │     BACKOFFICE_POS_DB_PATH=/srv/pos.db                                 │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/accounts/backoffice.toml (Linux)                         │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "backoffice.db"
//! max_connections = 5
//!
//! [pos]
//! path = "pos.db"
//!
//! [filing]
//! start_year = 2024
//! grace_days = 15
//!
//! [alerts]
//! unreconciled_days = 1
//! variance_threshold = "50.00"
//! min_weekday_sales = "500.00"
//!
//! [logging]
//! filter = "info,backoffice=debug,sqlx=warn"
//! ```

use backoffice_core::calendar::FilingCalendar;
use backoffice_core::reporting::AlertThresholds;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::pool::DbConfig;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("backoffice.db")
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Where the till software keeps its database. Opened read-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PosSettings {
    #[serde(default = "default_pos_path")]
    pub path: PathBuf,
}

fn default_pos_path() -> PathBuf {
    PathBuf::from("pos.db")
}

impl Default for PosSettings {
    fn default() -> Self {
        PosSettings {
            path: default_pos_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// `tracing_subscriber::EnvFilter` directives. `RUST_LOG` wins.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "info,backoffice=debug,sqlx=warn".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        LoggingSettings {
            filter: default_log_filter(),
        }
    }
}

// =============================================================================
// Config
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackofficeConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub pos: PosSettings,

    #[serde(default)]
    pub filing: FilingCalendar,

    #[serde(default)]
    pub alerts: AlertThresholds,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl BackofficeConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (backoffice.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading back office config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Rejects settings the reports and pools can't work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        self.filing
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("filing: {}", e)))?;

        if self.alerts.unreconciled_days < 0 {
            return Err(ConfigError::Invalid(
                "alerts.unreconciled_days must not be negative".into(),
            ));
        }
        if self.alerts.variance_threshold.is_negative() || self.alerts.min_weekday_sales.is_negative() {
            return Err(ConfigError::Invalid(
                "alert amounts must not be negative".into(),
            ));
        }

        Ok(())
    }

    /// Applies overrides looked up by environment variable name.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("BACKOFFICE_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Some(path) = lookup("BACKOFFICE_POS_DB_PATH") {
            debug!(path = %path, "Overriding POS database path from environment");
            self.pos.path = PathBuf::from(path);
        }

        if let Some(year) = lookup("BACKOFFICE_VAT_START_YEAR") {
            match year.parse::<i32>() {
                Ok(y) => self.filing.start_year = y,
                Err(_) => warn!(value = %year, "Ignoring invalid BACKOFFICE_VAT_START_YEAR"),
            }
        }

        if let Some(days) = lookup("BACKOFFICE_VAT_GRACE_DAYS") {
            match days.parse::<u32>() {
                Ok(d) => self.filing.grace_days = d,
                Err(_) => warn!(value = %days, "Ignoring invalid BACKOFFICE_VAT_GRACE_DAYS"),
            }
        }

        if let Some(filter) = lookup("BACKOFFICE_LOG") {
            self.logging.filter = filter;
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "backoffice", "accounts")
            .map(|dirs| dirs.config_dir().join("backoffice.toml"))
    }

    /// Pool settings for the back office database.
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.database.path).max_connections(self.database.max_connections)
    }

    /// Pool settings for the read-only POS database.
    pub fn pos_db_config(&self) -> DbConfig {
        DbConfig::pos(&self.pos.path)
    }
}
