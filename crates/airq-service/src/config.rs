//! Server configuration.
//!
//! Configuration is read from a TOML file, then individual values can be
//! overridden from the command line or environment (see [`Overrides`]).
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:8000"
//!
//! [storage]
//! csv_path = "/var/lib/airq/air_quality_data.csv"
//! # database = "/var/lib/airq/airq.db"
//!
//! [buffer]
//! flush_size = 10
//! flush_interval_secs = 10
//!
//! [retention]
//! max_per_device = 1000
//!
//! [thresholds]
//! co_high = 50.0
//! butane_high = 10.0
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use airq_store::{CsvSink, RecordStore, RetentionPolicy, SqliteStore};
use airq_types::ThresholdConfig;
use serde::{Deserialize, Serialize};

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server settings.
    pub server: ServerConfig,
    /// Storage backend selection.
    pub storage: StorageConfig,
    /// Ingestion buffer settings.
    pub buffer: BufferConfig,
    /// Per-device retention cap.
    pub retention: RetentionPolicy,
    /// Alert thresholds.
    pub thresholds: ThresholdConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Apply command line and environment overrides on top of the file values.
    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(bind) = &overrides.bind {
            self.server.bind = bind.clone();
        }
        if let Some(database) = &overrides.database {
            self.storage.database = Some(database.clone());
        }
        if let Some(csv_path) = &overrides.csv_path {
            self.storage.csv_path = csv_path.clone();
        }
        if let Some(n) = overrides.flush_size {
            self.buffer.flush_size = n;
        }
        if let Some(secs) = overrides.flush_interval {
            self.buffer.flush_interval_secs = secs;
        }
        if let Some(n) = overrides.max_pending {
            self.buffer.max_pending = n;
        }
        if let Some(n) = overrides.retention_max {
            self.retention.max_per_device = n;
        }

        let t = &mut self.thresholds;
        let pairs = [
            (&mut t.co_high, overrides.co_high),
            (&mut t.butane_high, overrides.butane_high),
            (&mut t.temperature_min, overrides.temp_min),
            (&mut t.temperature_max, overrides.temp_max),
            (&mut t.humidity_min, overrides.humidity_min),
            (&mut t.humidity_max, overrides.humidity_max),
        ];
        for (slot, value) in pairs {
            if let Some(value) = value {
                *slot = value;
            }
        }
    }

    /// Validate the configuration and return any errors.
    ///
    /// This checks:
    /// - Server bind address is valid (host:port format)
    /// - Storage paths are not empty
    /// - Buffer sizes and flush interval are within bounds
    /// - Retention cap is at least one record
    /// - Thresholds are finite with ordered ranges
    ///
    /// # Example
    ///
    /// ```
    /// use airq_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.server.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.buffer.validate());

        if self.retention.max_per_device == 0 {
            errors.push(ValidationError {
                field: "retention.max_per_device".to_string(),
                message: "retention cap must keep at least one record".to_string(),
            });
        }

        errors.extend(
            self.thresholds
                .validate()
                .into_iter()
                .map(|e| ValidationError {
                    field: format!("thresholds.{}", e.field()),
                    message: e.to_string(),
                }),
        );

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8000").
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.bind.is_empty() {
            errors.push(ValidationError {
                field: "server.bind".to_string(),
                message: "bind address cannot be empty".to_string(),
            });
            return errors;
        }

        let Some((_, port_str)) = self.bind.rsplit_once(':') else {
            errors.push(ValidationError {
                field: "server.bind".to_string(),
                message: format!(
                    "invalid bind address '{}': expected format 'host:port'",
                    self.bind
                ),
            });
            return errors;
        };

        match port_str.parse::<u16>() {
            Ok(0) => errors.push(ValidationError {
                field: "server.bind".to_string(),
                message: "port cannot be 0".to_string(),
            }),
            Err(_) => errors.push(ValidationError {
                field: "server.bind".to_string(),
                message: format!("invalid port '{}': must be a number 1-65535", port_str),
            }),
            Ok(_) => {}
        }

        errors
    }
}

/// Storage backend selection.
///
/// When `database` is set the transactional SQLite backend is used and
/// `csv_path` is ignored; otherwise records go to the CSV append sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    /// CSV sink file.
    pub csv_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: None,
            csv_path: airq_store::default_csv_path(),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        match &self.database {
            Some(path) if path.as_os_str().is_empty() => errors.push(ValidationError {
                field: "storage.database".to_string(),
                message: "database path cannot be empty".to_string(),
            }),
            Some(_) => {}
            None if self.csv_path.as_os_str().is_empty() => errors.push(ValidationError {
                field: "storage.csv_path".to_string(),
                message: "CSV path cannot be empty".to_string(),
            }),
            None => {}
        }

        errors
    }

    /// Open the configured backend.
    pub fn open(&self) -> airq_store::Result<Box<dyn RecordStore>> {
        match &self.database {
            Some(path) => Ok(Box::new(SqliteStore::open(path)?)),
            None => Ok(Box::new(CsvSink::open(&self.csv_path)?)),
        }
    }
}

/// Minimum flush interval in seconds.
pub const MIN_FLUSH_INTERVAL: u64 = 1;
/// Maximum flush interval in seconds (1 hour).
pub const MAX_FLUSH_INTERVAL: u64 = 3600;

/// Ingestion buffer settings. Only used by backends that stage writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Pending record count that triggers an immediate flush.
    pub flush_size: usize,
    /// Seconds between periodic flushes.
    pub flush_interval_secs: u64,
    /// Pending record count beyond which new readings are refused.
    pub max_pending: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            flush_size: 10,
            flush_interval_secs: 10,
            max_pending: 10_000,
        }
    }
}

impl BufferConfig {
    /// Periodic flush interval.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    /// Validate buffer configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.flush_size == 0 {
            errors.push(ValidationError {
                field: "buffer.flush_size".to_string(),
                message: "flush size must be at least 1".to_string(),
            });
        }

        if self.flush_interval_secs < MIN_FLUSH_INTERVAL {
            errors.push(ValidationError {
                field: "buffer.flush_interval_secs".to_string(),
                message: format!(
                    "flush interval {} is too short (minimum {} second)",
                    self.flush_interval_secs, MIN_FLUSH_INTERVAL
                ),
            });
        } else if self.flush_interval_secs > MAX_FLUSH_INTERVAL {
            errors.push(ValidationError {
                field: "buffer.flush_interval_secs".to_string(),
                message: format!(
                    "flush interval {} is too long (maximum {} seconds / 1 hour)",
                    self.flush_interval_secs, MAX_FLUSH_INTERVAL
                ),
            });
        }

        if self.max_pending < self.flush_size {
            errors.push(ValidationError {
                field: "buffer.max_pending".to_string(),
                message: format!(
                    "max pending {} is smaller than flush size {}",
                    self.max_pending, self.flush_size
                ),
            });
        }

        errors
    }
}

/// Values that override the configuration file.
///
/// Each can be given as a flag or through its environment variable.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct Overrides {
    /// Bind address (host:port)
    #[arg(short, long, env = "AIRQ_BIND")]
    pub bind: Option<String>,

    /// Use the SQLite backend with this database file
    #[arg(long, env = "AIRQ_DATABASE")]
    pub database: Option<PathBuf>,

    /// CSV sink file (used when no database is set)
    #[arg(long, env = "AIRQ_CSV_PATH")]
    pub csv_path: Option<PathBuf>,

    /// Pending records that trigger a flush
    #[arg(long, env = "AIRQ_FLUSH_SIZE")]
    pub flush_size: Option<usize>,

    /// Seconds between periodic flushes
    #[arg(long, env = "AIRQ_FLUSH_INTERVAL")]
    pub flush_interval: Option<u64>,

    /// Pending records beyond which readings are refused
    #[arg(long, env = "AIRQ_MAX_PENDING")]
    pub max_pending: Option<usize>,

    /// Records kept per device (SQLite only)
    #[arg(long, env = "AIRQ_RETENTION_MAX")]
    pub retention_max: Option<u64>,

    /// CO alert threshold in ppm
    #[arg(long, env = "AIRQ_CO_HIGH")]
    pub co_high: Option<f64>,

    /// Butane alert threshold in ppm
    #[arg(long, env = "AIRQ_BUTANE_HIGH")]
    pub butane_high: Option<f64>,

    /// Lowest acceptable temperature
    #[arg(long, env = "AIRQ_TEMP_MIN", allow_hyphen_values = true)]
    pub temp_min: Option<f64>,

    /// Highest acceptable temperature
    #[arg(long, env = "AIRQ_TEMP_MAX", allow_hyphen_values = true)]
    pub temp_max: Option<f64>,

    /// Lowest acceptable relative humidity
    #[arg(long, env = "AIRQ_HUMIDITY_MIN")]
    pub humidity_min: Option<f64>,

    /// Highest acceptable relative humidity
    #[arg(long, env = "AIRQ_HUMIDITY_MAX")]
    pub humidity_max: Option<f64>,
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `server.bind` or `thresholds.co_high`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("airq")
        .join("server.toml")
}
