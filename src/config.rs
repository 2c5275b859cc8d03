//! Driver configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via BFMC_CONFIG or --config)
//! 3. Environment variables
//! 4. Command-line flags
//!
//! Validation runs once, after the flags are applied.

use bfmc_protocol::{DEFAULT_BAUD_RATE, DEFAULT_SERIAL_DEVICE};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default raw traffic capture file.
pub const DEFAULT_HISTORY_FILE: &str = "historyFile.txt";

/// Driver configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial link configuration.
    pub serial: SerialConfig,
    /// SPI link configuration.
    pub spi: SpiConfig,
    /// Raw traffic capture.
    pub history: HistoryConfig,
    /// Acknowledgement timeouts.
    pub timeouts: TimeoutConfig,
}

impl Config {
    /// Loads configuration from `path` (if any), then applies environment
    /// variable overrides.
    ///
    /// The result is not validated; callers apply their own overrides first
    /// and then call [`Config::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Applies overrides from `lookup`, which maps a variable name to its value.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        self.serial.apply_overrides(&lookup);
        self.spi.apply_overrides(&lookup);
        self.history.apply_overrides(&lookup);
        self.timeouts.apply_overrides(&lookup);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.serial.baud_rate == 0 {
            return Err(ConfigError::Validation("serial.baud_rate must be > 0".into()));
        }
        if self.serial.tcp.is_none() && self.serial.device.is_empty() {
            return Err(ConfigError::Validation(
                "either serial.device or serial.tcp must be set".into(),
            ));
        }
        if self.timeouts.ack_ms == 0 || self.timeouts.motion_ms == 0 {
            return Err(ConfigError::Validation("timeouts must be > 0".into()));
        }
        Ok(())
    }
}

/// Serial link configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Serial device path.
    pub device: String,
    pub baud_rate: u32,
    /// TCP serial bridge. Takes precedence over `device` when set.
    pub tcp: Option<SocketAddr>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_SERIAL_DEVICE.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            tcp: None,
        }
    }
}

impl SerialConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(device) = lookup("BFMC_SERIAL_DEVICE") {
            self.device = device;
        }
        if let Some(baud) = lookup("BFMC_BAUD_RATE") {
            if let Ok(parsed) = baud.parse() {
                self.baud_rate = parsed;
            }
        }
        if let Some(addr) = lookup("BFMC_SERIAL_TCP") {
            if let Ok(parsed) = addr.parse() {
                self.tcp = Some(parsed);
            }
        }
    }
}

/// SPI link configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpiConfig {
    /// spidev character device. SPI sends are unavailable when unset.
    pub device: Option<PathBuf>,
}

impl SpiConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(device) = lookup("BFMC_SPI_DEVICE") {
            self.device = (!device.is_empty()).then(|| PathBuf::from(device));
        }
    }
}

/// Raw traffic capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Capture file. Capture is disabled when unset.
    pub file: Option<PathBuf>,
    /// Also capture outgoing bytes.
    pub log_outgoing: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            file: Some(PathBuf::from(DEFAULT_HISTORY_FILE)),
            log_outgoing: false,
        }
    }
}

impl HistoryConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        // An empty value disables capture.
        if let Some(file) = lookup("BFMC_HISTORY_FILE") {
            self.file = (!file.is_empty()).then(|| PathBuf::from(file));
        }
        if let Some(enabled) = lookup("BFMC_LOG_OUTGOING") {
            self.log_outgoing = enabled == "1" || enabled.to_lowercase() == "true";
        }
    }
}

/// Acknowledgement timeouts in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub ack_ms: u64,
    /// Applies to move, brake and spline.
    pub motion_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            ack_ms: 1000,
            motion_ms: 3000,
        }
    }
}

impl TimeoutConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(ms) = lookup("BFMC_ACK_TIMEOUT_MS") {
            if let Ok(parsed) = ms.parse() {
                self.ack_ms = parsed;
            }
        }
        if let Some(ms) = lookup("BFMC_MOTION_TIMEOUT_MS") {
            if let Ok(parsed) = ms.parse() {
                self.motion_ms = parsed;
            }
        }
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_ms)
    }

    pub fn motion_timeout(&self) -> Duration {
        Duration::from_millis(self.motion_ms)
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("configuration validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.serial.device, "/dev/ttyACM0");
        assert_eq!(config.serial.baud_rate, 460_800);
        assert!(config.serial.tcp.is_none());
        assert!(config.spi.device.is_none());
        assert_eq!(
            config.history.file.as_deref(),
            Some(Path::new("historyFile.txt"))
        );
        assert_eq!(config.timeouts.ack_timeout(), Duration::from_secs(1));
        assert_eq!(config.timeouts.motion_timeout(), Duration::from_secs(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bfmc.yaml");
        std::fs::write(
            &path,
            "serial:\n  device: /dev/ttyUSB1\n  baud_rate: 115200\nspi:\n  device: /dev/spidev0.0\ntimeouts:\n  motion_ms: 5000\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.serial.device, "/dev/ttyUSB1");
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(
            config.spi.device.as_deref(),
            Some(Path::new("/dev/spidev0.0"))
        );
        assert_eq!(config.timeouts.motion_ms, 5000);
        // Missing sections keep their defaults.
        assert_eq!(config.timeouts.ack_ms, 1000);
        assert!(config.history.file.is_some());
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/nonexistent/bfmc.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_invalid_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bfmc.yaml");
        std::fs::write(&path, "serial: [not, a, map]\n").unwrap();
        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bfmc.yaml"));
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        config.apply_overrides(lookup_from(&[
            ("BFMC_SERIAL_DEVICE", "/dev/ttyUSB0"),
            ("BFMC_BAUD_RATE", "115200"),
            ("BFMC_SERIAL_TCP", "192.168.1.20:7000"),
            ("BFMC_SPI_DEVICE", "/dev/spidev0.1"),
            ("BFMC_HISTORY_FILE", ""),
            ("BFMC_LOG_OUTGOING", "true"),
            ("BFMC_ACK_TIMEOUT_MS", "250"),
            ("BFMC_MOTION_TIMEOUT_MS", "not-a-number"),
        ]));

        assert_eq!(config.serial.device, "/dev/ttyUSB0");
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.serial.tcp, Some("192.168.1.20:7000".parse().unwrap()));
        assert_eq!(
            config.spi.device.as_deref(),
            Some(Path::new("/dev/spidev0.1"))
        );
        assert!(config.history.file.is_none());
        assert!(config.history.log_outgoing);
        assert_eq!(config.timeouts.ack_ms, 250);
        assert_eq!(config.timeouts.motion_ms, 3000);
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.serial.baud_rate = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = Config::default();
        config.serial.device.clear();
        assert!(config.validate().is_err());
        config.serial.tcp = Some("127.0.0.1:7000".parse().unwrap());
        assert!(config.validate().is_ok());

        let mut config = Config::default();
        config.timeouts.ack_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_leaves_validation_to_caller() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bfmc.yaml");
        std::fs::write(&path, "serial:\n  device: \"\"\n  baud_rate: 0\n").unwrap();

        let mut config = Config::load(Some(&path)).unwrap();
        assert!(config.validate().is_err());

        // Flags applied after loading repair the file's settings.
        config.serial.tcp = Some("127.0.0.1:7000".parse().unwrap());
        config.serial.baud_rate = 115_200;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut config = Config::default();
        config.serial.tcp = Some("127.0.0.1:7000".parse().unwrap());
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.serial.tcp, config.serial.tcp);
        assert_eq!(parsed.history.file, config.history.file);
    }
}
