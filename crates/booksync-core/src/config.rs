//! Engine configuration.
//!
//! All settings live in a single `config.toml` at
//! `~/.config/booksync/config.toml` by default. Every section is optional and
//! falls back to its defaults.
//!
//! ```toml
//! [scheduling]
//! minimum_advance_minutes = 60
//! timezone = "America/Bogota"
//!
//! [sync]
//! enabled_providers = ["google_calendar"]
//! provider_timeout_secs = 10
//!
//! [google]
//! calendar_id = "primary"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::appointment::DEFAULT_MINIMUM_ADVANCE_MINUTES;
use crate::slots::DEFAULT_STEP_MINUTES;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`EngineConfig`].
    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scheduling: SchedulingSettings,
    pub slots: SlotSettings,
    pub sync: SyncSettings,
    pub sweep: SweepSettings,
    /// Google Calendar settings. The provider is only built when present.
    pub google: Option<GoogleSettings>,
    pub logging: LoggingSettings,
}

impl EngineConfig {
    /// Loads configuration from the default path, or defaults when absent.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("booksync")
    }
}

/// Booking rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingSettings {
    /// Minimum notice before a new appointment may start.
    pub minimum_advance_minutes: i64,
    /// IANA timezone used for local days, weekdays and business hours.
    pub timezone: Tz,
}

impl Default for SchedulingSettings {
    fn default() -> Self {
        Self {
            minimum_advance_minutes: DEFAULT_MINIMUM_ADVANCE_MINUTES,
            timezone: chrono_tz::UTC,
        }
    }
}

impl SchedulingSettings {
    /// Returns the minimum advance as a chrono duration.
    pub fn minimum_advance(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.minimum_advance_minutes)
    }
}

/// Free-slot defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotSettings {
    pub business_start: NaiveTime,
    pub business_end: NaiveTime,
    pub step_minutes: i64,
    pub default_duration_minutes: i64,
}

impl Default for SlotSettings {
    fn default() -> Self {
        Self {
            business_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            business_end: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or_default(),
            step_minutes: DEFAULT_STEP_MINUTES,
            default_duration_minutes: 60,
        }
    }
}

/// Provider synchronization settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Provider tags to sync with. Empty enables every registered provider.
    pub enabled_providers: Vec<String>,
    /// Upper bound for a single provider call.
    pub provider_timeout_secs: u64,
    /// Capacity of the background sync queue.
    pub queue_capacity: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enabled_providers: Vec::new(),
            provider_timeout_secs: 10,
            queue_capacity: 256,
        }
    }
}

impl SyncSettings {
    /// Returns whether `provider_type` takes part in sync.
    pub fn is_enabled(&self, provider_type: &str) -> bool {
        self.enabled_providers.is_empty()
            || self.enabled_providers.iter().any(|p| p == provider_type)
    }

    /// Returns the provider call timeout.
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }
}

/// Retry sweep schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepSettings {
    pub interval_secs: u64,
    /// Jitter as a fraction of the interval (0.0-1.0).
    pub jitter_fraction: f64,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub backoff_multiplier: f64,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            jitter_fraction: 0.1,
            initial_backoff_secs: 5,
            max_backoff_secs: 300,
            backoff_multiplier: 2.0,
        }
    }
}

/// Google Calendar provider settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleSettings {
    /// API base URL; the public endpoint when unset.
    pub base_url: Option<String>,
    pub calendar_id: String,
    /// HTTP request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for GoogleSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            calendar_id: "primary".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default level when `RUST_LOG` is not set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}
