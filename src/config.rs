//! Scanner configuration: connection parameters, manufacturer hint, data
//! directory, and adapter timeouts, optionally loaded from a TOML file.
//!
//! Grounded on the data-directory resolution in
//! `original_source/obd/uds/paths.py` (a `project_root`-relative `data/`
//! directory) and the retrieval pack's widespread use of `toml` + `serde`
//! for this purpose (see DESIGN.md).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the adapter is reached: a serial device path or a BLE peripheral
/// address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortConfig {
    /// USB-serial device path, e.g. `/dev/ttyUSB0` or `COM3`.
    Serial(String),
    /// BLE peripheral address, platform-dependent format.
    Ble(String),
}

impl Default for PortConfig {
    fn default() -> Self {
        PortConfig::Serial("/dev/ttyUSB0".to_string())
    }
}

/// Top-level scanner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// How to reach the physical adapter.
    pub port: PortConfig,
    /// Baud rate for serial connections; ignored for BLE.
    pub baud_rate: u32,
    /// Optional manufacturer hint, used to select the DTC database overlay
    /// and the UDS discovery signature catalog.
    pub manufacturer: Option<String>,
    /// Directory holding `dtc_*.csv` and `data/uds/*.json` reference data.
    pub data_dir: PathBuf,
    /// Whether the ELM driver requests headers-on (`ATH1`) by default.
    pub headers_on: bool,
    /// Overall per-command timeout, in milliseconds.
    pub command_timeout_ms: u64,
    /// Silence-break timeout once meaningful data has arrived, in
    /// milliseconds.
    pub silence_timeout_ms: u64,
    /// Minimum elapsed time before a silence-break is allowed to fire, in
    /// milliseconds.
    pub min_wait_before_silence_ms: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            port: PortConfig::default(),
            baud_rate: 38_400,
            manufacturer: None,
            data_dir: default_data_dir(),
            headers_on: true,
            command_timeout_ms: 4_000,
            silence_timeout_ms: 250,
            min_wait_before_silence_ms: 750,
        }
    }
}

impl ScannerConfig {
    /// Loads a config from a TOML file, filling in any field the file
    /// doesn't set with [ScannerConfig::default]'s value.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let cfg: ScannerConfig = toml::from_str(&text)?;
        Ok(cfg)
    }

    /// The overall per-command timeout as a [Duration].
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// The silence-break timeout as a [Duration].
    pub fn silence_timeout(&self) -> Duration {
        Duration::from_millis(self.silence_timeout_ms)
    }

    /// The minimum pre-silence-break wait as a [Duration].
    pub fn min_wait_before_silence(&self) -> Duration {
        Duration::from_millis(self.min_wait_before_silence_ms)
    }
}

/// `./data` relative to the current working directory, mirroring the
/// `project_root`-relative resolution in `original_source/obd/uds/paths.py`.
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

/// Error loading or parsing a [ScannerConfig].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file couldn't be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The config file's TOML was malformed or didn't match the schema.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_has_sane_timeouts() {
        let cfg = ScannerConfig::default();
        assert_eq!(cfg.command_timeout(), Duration::from_secs(4));
        assert!(cfg.headers_on);
    }

    #[test]
    fn parses_partial_toml_over_defaults() {
        let toml_text = r#"
            baud_rate = 115200
            manufacturer = "Jeep"

            [port]
            serial = "/dev/ttyUSB1"
        "#;
        let cfg: ScannerConfig = toml::from_str(toml_text).unwrap();
        assert_eq!(cfg.baud_rate, 115200);
        assert_eq!(cfg.manufacturer.as_deref(), Some("Jeep"));
        assert_eq!(cfg.port, PortConfig::Serial("/dev/ttyUSB1".to_string()));
        // Untouched fields keep their defaults.
        assert_eq!(cfg.command_timeout_ms, ScannerConfig::default().command_timeout_ms);
    }
}
