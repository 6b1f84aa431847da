//! Rig configuration using Figment
//!
//! Configuration is assembled from (lowest to highest precedence):
//! 1. Built-in defaults matching the bench firmware
//! 2. `config/fluoro_daq.toml` (optional)
//! 3. Environment variables prefixed with `FLUORO_DAQ_`, using `__` between sections
//!
//! ```text
//! FLUORO_DAQ_APPLICATION__LOG_LEVEL=debug
//! FLUORO_DAQ_RIG__PIGMENT=chlorophyll
//! FLUORO_DAQ_SERIAL__PORT=/dev/ttyUSB1
//! ```
//!
//! Everything is read once at startup. The resulting [`OperatingMode`] is immutable for
//! the lifetime of the process.
//!
//! # Example
//!
//! ```toml
//! [rig]
//! pigment = "phycocyanin"
//! calibration = false
//! sdk_mode = "real"
//!
//! [serial]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//!
//! [timing]
//! optical_settle_ms = 286
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::hardware::{BulbCurrent, Gain};
use crate::instrument::at_protocol::{NumericPolicy, ResponseMode};
use crate::measurement::sequencer::{OperatingMode, SequencerSettings};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/fluoro_daq.toml";

const ENV_PREFIX: &str = "FLUORO_DAQ_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Merging or deserializing the layered sources failed
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),
    /// A value is out of range
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RigConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Measurement target and hardware backend
    #[serde(default)]
    pub rig: RigSection,
    /// Link to the companion AT device
    #[serde(default)]
    pub serial: SerialConfig,
    /// AT protocol behaviour
    #[serde(default)]
    pub protocol: ProtocolConfig,
    /// Optical front-end settings shared by both sensors
    #[serde(default)]
    pub sensor: SensorConfig,
    /// Sequencer delays
    #[serde(default)]
    pub timing: TimingConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "fluoro_daq".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Pigment the rig is set up to estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pigment {
    /// Phycocyanin, read from the visible-band direct sensor
    #[default]
    Phycocyanin,
    /// Chlorophyll, read from the NIR companion device
    Chlorophyll,
}

/// Hardware backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdkMode {
    /// Simulated sensor and simulated AT device
    #[default]
    Mock,
    /// Real serial hardware
    Real,
}

/// Measurement target selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RigSection {
    /// Pigment to estimate
    #[serde(default)]
    pub pigment: Pigment,
    /// Calibration run: excite with the companion LED instead of the bulb
    #[serde(default)]
    pub calibration: bool,
    /// Hardware backend
    #[serde(default)]
    pub sdk_mode: SdkMode,
}

/// Serial link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Serial port (e.g., "/dev/ttyUSB0")
    #[serde(default = "default_serial_port")]
    pub port: String,
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
        }
    }
}

/// AT protocol configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Wait after each command before reading the reply
    #[serde(default = "default_response_settle")]
    pub response_settle_ms: u64,
    /// Pause after the initial `AT` handshake
    #[serde(default = "default_handshake_delay")]
    pub handshake_delay_ms: u64,
    /// How unparseable channel fields are handled
    #[serde(default)]
    pub numeric_policy: NumericPolicy,
    /// Keep reading until "OK" for at most this long (unset = single drain)
    #[serde(default)]
    pub ack_timeout_ms: Option<u64>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            response_settle_ms: default_response_settle(),
            handshake_delay_ms: default_handshake_delay(),
            numeric_policy: NumericPolicy::default(),
            ack_timeout_ms: None,
        }
    }
}

/// Optical front-end configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Gain code, 0 (1x) to 3 (64x)
    #[serde(default = "default_gain")]
    pub gain: u8,
    /// Integration time in 2.8 ms ticks, 1 to 255
    #[serde(default = "default_integration_time")]
    pub integration_time: u8,
    /// Bulb drive code, 0 (12.5 mA) to 3 (100 mA)
    #[serde(default = "default_bulb_current")]
    pub bulb_current: u8,
    /// Raw `ATLEDC` register byte for the companion LED
    #[serde(default = "default_led_current")]
    pub led_current: u8,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            gain: default_gain(),
            integration_time: default_integration_time(),
            bulb_current: default_bulb_current(),
            led_current: default_led_current(),
        }
    }
}

/// Sequencer timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Settle time between an illumination change and acquisition
    #[serde(default = "default_optical_settle")]
    pub optical_settle_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            optical_settle_ms: default_optical_settle(),
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_serial_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_response_settle() -> u64 {
    300
}

fn default_handshake_delay() -> u64 {
    1000
}

fn default_gain() -> u8 {
    3
}

fn default_integration_time() -> u8 {
    255
}

fn default_bulb_current() -> u8 {
    3
}

fn default_led_current() -> u8 {
    0x30
}

fn default_optical_settle() -> u64 {
    286
}

// ============================================================================
// Loading and validation
// ============================================================================

impl RigConfig {
    /// Load configuration from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load and validate configuration from a specific file path.
    ///
    /// A missing file is not an error; defaults and environment overrides still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::extract_from(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Merge defaults, the file at `path` and the environment without validating.
    ///
    /// For callers that apply their own overrides (command-line flags) before calling
    /// [`RigConfig::validate`].
    pub fn extract_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ConfigError::LoadError(Box::new(e)))
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Gain and bulb current codes are in 0..=3
    /// - Integration time is non-zero
    /// - Baud rate is non-zero, and a port is named when running on real hardware
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        Gain::from_code(self.sensor.gain).ok_or_else(|| {
            ConfigError::ValidationError(format!(
                "Gain code {} out of range (0-3)",
                self.sensor.gain
            ))
        })?;

        BulbCurrent::from_code(self.sensor.bulb_current).ok_or_else(|| {
            ConfigError::ValidationError(format!(
                "Bulb current code {} out of range (0-3)",
                self.sensor.bulb_current
            ))
        })?;

        if self.sensor.integration_time == 0 {
            return Err(ConfigError::ValidationError(
                "Integration time must be between 1 and 255".to_string(),
            ));
        }

        if self.serial.baud_rate == 0 {
            return Err(ConfigError::ValidationError(
                "Baud rate must be greater than zero".to_string(),
            ));
        }

        if self.rig.sdk_mode == SdkMode::Real && self.serial.port.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "A serial port is required when sdk_mode = \"real\"".to_string(),
            ));
        }

        Ok(())
    }

    /// Operating mode derived from the pigment and calibration flags.
    pub fn operating_mode(&self) -> OperatingMode {
        OperatingMode::from_flags(self.rig.pigment, self.rig.calibration)
    }

    /// How the protocol client should read replies.
    pub fn response_mode(&self) -> ResponseMode {
        match self.protocol.ack_timeout_ms {
            Some(ms) => ResponseMode::UntilAck(Duration::from_millis(ms)),
            None => ResponseMode::BestEffort,
        }
    }

    /// Sequencer settings; call after [`RigConfig::validate`].
    pub fn sequencer_settings(&self) -> SequencerSettings {
        SequencerSettings {
            optical_settle: Duration::from_millis(self.timing.optical_settle_ms),
            handshake_delay: Duration::from_millis(self.protocol.handshake_delay_ms),
            gain: Gain::from_code(self.sensor.gain).unwrap_or_default(),
            integration_time: self.sensor.integration_time,
            bulb_current: BulbCurrent::from_code(self.sensor.bulb_current).unwrap_or_default(),
            led_current: self.sensor.led_current,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = RigConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.operating_mode(), OperatingMode::Phycocyanin);
        assert_eq!(config.response_mode(), ResponseMode::BestEffort);

        let settings = config.sequencer_settings();
        assert_eq!(settings.optical_settle, Duration::from_millis(286));
        assert_eq!(settings.led_current, 0x30);
        assert_eq!(settings.gain, Gain::X64);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = RigConfig::default();
        config.application.log_level = "chatty".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_zero_integration_time_rejected() {
        let mut config = RigConfig::default();
        config.sensor.integration_time = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_gain_out_of_range_rejected() {
        let mut config = RigConfig::default();
        config.sensor.gain = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_real_mode_needs_port() {
        let mut config = RigConfig::default();
        config.rig.sdk_mode = SdkMode::Real;
        config.serial.port = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[rig]
pigment = "chlorophyll"
calibration = true

[serial]
port = "/dev/ttyACM3"

[protocol]
numeric_policy = "strict"
ack_timeout_ms = 750

[timing]
optical_settle_ms = 150
"#
        )
        .unwrap();

        let config = RigConfig::load_from(file.path()).unwrap();
        assert_eq!(config.operating_mode(), OperatingMode::Chlorophyll);
        assert_eq!(config.serial.port, "/dev/ttyACM3");
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.protocol.numeric_policy, NumericPolicy::Strict);
        assert_eq!(
            config.response_mode(),
            ResponseMode::UntilAck(Duration::from_millis(750))
        );
        assert_eq!(
            config.sequencer_settings().optical_settle,
            Duration::from_millis(150)
        );
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = RigConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.protocol.response_settle_ms, 300);
        assert_eq!(config.rig.sdk_mode, SdkMode::Mock);
    }

    #[test]
    fn test_invalid_file_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sensor]\ngain = 9").unwrap();
        assert!(matches!(
            RigConfig::load_from(file.path()),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_cli_overrides_apply_before_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[rig]\nsdk_mode = \"real\"\n\n[serial]\nport = \"\"").unwrap();

        assert!(RigConfig::load_from(file.path()).is_err());

        let mut config = RigConfig::extract_from(file.path()).unwrap();
        assert_eq!(config.rig.sdk_mode, SdkMode::Real);
        assert!(config.validate().is_err());

        config.serial.port = "/dev/ttyUSB2".to_string();
        assert!(config.validate().is_ok());

        let mut config = RigConfig::extract_from(file.path()).unwrap();
        config.rig.sdk_mode = SdkMode::Mock;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_environment_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "fluoro_daq.toml",
                r#"
[rig]
pigment = "phycocyanin"

[sensor]
led_current = 48
"#,
            )?;
            jail.set_env("FLUORO_DAQ_RIG__PIGMENT", "chlorophyll");
            jail.set_env("FLUORO_DAQ_SENSOR__LED_CURRENT", "16");

            let config =
                RigConfig::load_from("fluoro_daq.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.rig.pigment, Pigment::Chlorophyll);
            assert_eq!(config.sensor.led_current, 16);
            assert_eq!(config.sensor.integration_time, 255);
            Ok(())
        });
    }
}
