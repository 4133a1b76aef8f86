//! # Host Configuration
//!
//! Serial target, receive-loop timing, print pacing and event queue sizing.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyUSB0"
//! baud = 115200
//! read_timeout_ms = 100
//!
//! [job]
//! pacing_delay_ms = 50
//! pause_poll_ms = 100
//!
//! [events]
//! capacity = 1024
//! ```
//!
//! Every section and field is optional; missing values fall back to the
//! defaults below.
//!
//! ```rust
//! use marlin_host::config::HostConfig;
//! let config: HostConfig = toml::from_str("[serial]\nbaud = 250000").unwrap();
//! assert_eq!(config.serial.baud, 250000);
//! assert_eq!(config.job.pacing_delay_ms, 50);
//! assert!(config.validate().is_ok());
//! ```

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Baud rates offered to the user when picking a connection target.
pub const STANDARD_BAUD_RATES: [u32; 7] = [9600, 14400, 19200, 38400, 57600, 115200, 250000];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct for the serial link, print pacing and event delivery.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HostConfig {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub job: JobConfig,
    #[serde(default)]
    pub events: EventConfig,
}

/// Serial connection target and receive-loop timing.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SerialConfig {
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default = "default_baud")]
    pub baud: u32,
    /// Upper bound on a single blocking read; also the worst-case disconnect latency.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud: default_baud(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Print streaming parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobConfig {
    /// Delay after each streamed line. No flow control exists, so this is the only backpressure.
    #[serde(default = "default_pacing_delay_ms")]
    pub pacing_delay_ms: u64,
    #[serde(default = "default_pause_poll_ms")]
    pub pause_poll_ms: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            pacing_delay_ms: default_pacing_delay_ms(),
            pause_poll_ms: default_pause_poll_ms(),
        }
    }
}

impl JobConfig {
    pub fn pacing_delay(&self) -> Duration {
        Duration::from_millis(self.pacing_delay_ms)
    }

    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventConfig {
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

impl HostConfig {
    /// Check values that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_standard_baud(self.serial.baud) {
            return Err(ConfigError::Invalid(format!(
                "baud rate {} is not one of {:?}",
                self.serial.baud, STANDARD_BAUD_RATES
            )));
        }
        if self.serial.read_timeout_ms == 0 || self.serial.read_timeout_ms >= 1000 {
            return Err(ConfigError::Invalid(format!(
                "read_timeout_ms must be between 1 and 999, got {}",
                self.serial.read_timeout_ms
            )));
        }
        if self.job.pause_poll_ms == 0 {
            return Err(ConfigError::Invalid("pause_poll_ms must be > 0".to_string()));
        }
        if self.events.capacity == 0 {
            return Err(ConfigError::Invalid("events.capacity must be > 0".to_string()));
        }
        Ok(())
    }
}

pub fn is_standard_baud(baud: u32) -> bool {
    STANDARD_BAUD_RATES.contains(&baud)
}

fn default_baud() -> u32 { 115200 }
fn default_read_timeout_ms() -> u64 { 100 }
fn default_pacing_delay_ms() -> u64 { 50 }
fn default_pause_poll_ms() -> u64 { 100 }
fn default_event_capacity() -> usize { 1024 }

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<HostConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                Err(ConfigError::Toml(e))
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            Err(ConfigError::Io(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_values() {
        let config = HostConfig::default();
        assert_eq!(config.serial.port, None);
        assert_eq!(config.serial.baud, 115200);
        assert_eq!(config.serial.read_timeout(), Duration::from_millis(100));
        assert_eq!(config.job.pacing_delay(), Duration::from_millis(50));
        assert_eq!(config.job.pause_poll(), Duration::from_millis(100));
        assert_eq!(config.events.capacity, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config_success() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("printer.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "[serial]\nport = '/dev/ttyACM0'\nbaud = 250000\n\n[job]\npacing_delay_ms = 20").unwrap();
        file.flush().unwrap();
        let config = load_config(file_path.to_str().unwrap()).unwrap();
        assert_eq!(config.serial.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.serial.baud, 250000);
        assert_eq!(config.job.pacing_delay_ms, 20);
        // Defaults for missing fields
        assert_eq!(config.job.pause_poll_ms, 100);
        assert_eq!(config.serial.read_timeout_ms, 100);
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("nonexistent_file.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("bad.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "not a valid toml").unwrap();
        file.flush().unwrap();
        let result = load_config(file_path.to_str().unwrap());
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_validate_rejects_nonstandard_baud() {
        let mut config = HostConfig::default();
        config.serial.baud = 12345;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        for baud in STANDARD_BAUD_RATES {
            config.serial.baud = baud;
            assert!(config.validate().is_ok());
        }
    }

    #[test]
    fn test_validate_read_timeout_must_be_sub_second() {
        let mut config = HostConfig::default();
        config.serial.read_timeout_ms = 1000;
        assert!(config.validate().is_err());
        config.serial.read_timeout_ms = 0;
        assert!(config.validate().is_err());
        config.serial.read_timeout_ms = 999;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_capacity() {
        let mut config = HostConfig::default();
        config.events.capacity = 0;
        assert!(config.validate().is_err());
    }
}
