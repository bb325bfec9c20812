//! Configuration loading using Figment.
//!
//! Configuration is merged from:
//! 1. `config/fluoro_acq.toml` (or an explicit path)
//! 2. Environment variables prefixed with `FLUORO_ACQ_`, nested keys split on `__`
//!    (e.g. `FLUORO_ACQ_SERIAL__PORT=/dev/ttyUSB1`)
//!
//! # Example
//! ```no_run
//! use fluoro_acq::config::FluoroConfig;
//!
//! let config = FluoroConfig::load()?;
//! config.validate()?;
//! let acquisition = config.acquisition_config();
//! println!("Gating period: {}", acquisition.gating_period);
//! # Ok::<(), fluoro_acq::error::ConfigError>(())
//! ```

use crate::acquisition::AcquisitionConfig;
use crate::error::ConfigError;
use crate::protocol::GatingPeriod;
use crate::transport::SerialSettings;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/fluoro_acq.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "FLUORO_ACQ_";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FluoroConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Serial line settings
    pub serial: SerialSettings,
    /// Detector and loop settings
    #[serde(default)]
    pub acquisition: AcquisitionSettings,
    /// Sample log settings
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Detector and acquisition loop settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionSettings {
    /// Gating period, e.g. "250ms" or 250
    #[serde(default = "default_gating_period")]
    pub gating_period: GatingPeriod,
    /// Switch the high voltage on before acquiring
    #[serde(default)]
    pub high_voltage: bool,
    /// Discard the first frame after the clear command
    #[serde(default)]
    pub discard_after_clear: bool,
    /// Depth of the live display queue
    #[serde(default = "default_observer_capacity")]
    pub observer_capacity: usize,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            gating_period: default_gating_period(),
            high_voltage: false,
            discard_after_clear: false,
            observer_capacity: default_observer_capacity(),
        }
    }
}

/// Sample log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageFormat {
    /// `"<value>, <unix_timestamp>"` lines
    #[default]
    Log,
    /// Headed CSV with RFC 3339 timestamps
    Csv,
}

impl std::str::FromStr for StorageFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "log" => Ok(StorageFormat::Log),
            "csv" => Ok(StorageFormat::Csv),
            other => Err(ConfigError::Invalid(format!(
                "Invalid storage format '{other}'. Must be one of: log, csv"
            ))),
        }
    }
}

/// Sample log configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory that receives one file per session
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// File format
    #[serde(default)]
    pub format: StorageFormat,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            format: StorageFormat::default(),
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_gating_period() -> GatingPeriod {
    GatingPeriod::Ms250
}

fn default_observer_capacity() -> usize {
    1024
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl FluoroConfig {
    /// Configuration for `port` with every other value at its default.
    pub fn for_port(port: impl Into<String>) -> Self {
        Self {
            application: ApplicationConfig::default(),
            serial: SerialSettings::new(port),
            acquisition: AcquisitionSettings::default(),
            storage: StorageConfig::default(),
        }
    }

    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment.
    ///
    /// A missing file is not an error as long as the environment supplies
    /// the required keys (at least `serial.port`).
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Ok(Self::figment(path).extract()?)
    }

    /// The merged provider stack, exposed so callers can layer overrides.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(DefaultsOnly::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.application.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        if self.serial.port.trim().is_empty() {
            return Err(ConfigError::Invalid("serial.port must not be empty".into()));
        }

        if self.serial.baud_rate == 0 {
            return Err(ConfigError::Invalid(
                "serial.baud_rate must be greater than zero".into(),
            ));
        }

        if self.serial.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "serial.timeout_ms must be greater than zero".into(),
            ));
        }

        if self.acquisition.observer_capacity == 0 {
            return Err(ConfigError::Invalid(
                "acquisition.observer_capacity must be greater than zero".into(),
            ));
        }

        Ok(())
    }

    /// Settings handed to [`crate::acquisition::start`].
    pub fn acquisition_config(&self) -> AcquisitionConfig {
        AcquisitionConfig::new(self.acquisition.gating_period)
            .with_high_voltage(self.acquisition.high_voltage)
            .with_read_timeout(Duration::from_millis(self.serial.timeout_ms))
            .with_discard_after_clear(self.acquisition.discard_after_clear)
    }
}

/// Defaults for every section except `serial`, which has no sensible port.
#[derive(Debug, Default, Serialize)]
struct DefaultsOnly {
    application: ApplicationConfig,
    acquisition: AcquisitionSettings,
    storage: StorageConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validation() {
        let mut config = FluoroConfig::for_port("/dev/ttyUSB0");
        assert!(config.validate().is_ok());

        config.application.log_level = "verbose".to_string();
        assert!(config.validate().is_err());

        config.application.log_level = "DEBUG".to_string();
        assert!(config.validate().is_ok());

        config.serial.timeout_ms = 0;
        assert!(config.validate().is_err());

        config.serial.timeout_ms = 1000;
        config.acquisition.observer_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_acquisition_config_mapping() {
        let mut config = FluoroConfig::for_port("COM3");
        config.acquisition.gating_period = GatingPeriod::Ms500;
        config.acquisition.high_voltage = true;
        config.serial.timeout_ms = 250;

        let acquisition = config.acquisition_config();
        assert_eq!(acquisition.gating_period, GatingPeriod::Ms500);
        assert!(acquisition.high_voltage);
        assert_eq!(acquisition.read_timeout, Duration::from_millis(250));
        assert!(!acquisition.discard_after_clear);
    }

    #[test]
    fn test_parse_full_toml() {
        let config: FluoroConfig = toml::from_str(
            r#"
            [application]
            log_level = "debug"

            [serial]
            port = "/dev/ttyUSB0"
            timeout_ms = 500

            [acquisition]
            gating_period = "1000ms"
            high_voltage = true

            [storage]
            output_dir = "runs"
            format = "csv"
            "#,
        )
        .unwrap();

        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.acquisition.gating_period, GatingPeriod::Ms1000);
        assert_eq!(config.acquisition.observer_capacity, 1024);
        assert_eq!(config.storage.format, StorageFormat::Csv);
        assert_eq!(config.storage.output_dir, PathBuf::from("runs"));
    }

    #[test]
    fn test_invalid_period_is_rejected() {
        let result: Result<FluoroConfig, _> = toml::from_str(
            r#"
            [serial]
            port = "/dev/ttyUSB0"

            [acquisition]
            gating_period = "300ms"
            "#,
        );
        let err = result.unwrap_err().to_string();
        assert!(err.contains("invalid gating period '300ms'"), "{err}");
    }

    #[test]
    fn test_storage_format_from_str() {
        assert_eq!("CSV".parse::<StorageFormat>().unwrap(), StorageFormat::Csv);
        assert_eq!("log".parse::<StorageFormat>().unwrap(), StorageFormat::Log);
        assert!("hdf5".parse::<StorageFormat>().is_err());
    }
}
