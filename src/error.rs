//! Custom error types for the rig.
//!
//! Two enums cover everything that can go wrong:
//!
//! - **`ProtocolError`**: raised by the AT protocol client. Transport failures from the
//!   byte channel, out-of-range command arguments, and (only under the strict numeric
//!   policy) a channel field that is not a number.
//! - **`RigError`**: the application-level error. Only `SensorUnavailable` is fatal at
//!   runtime; every other failure during a measurement cycle is downgraded to a logged
//!   acquisition issue by the sequencer.
//!
//! Both use `#[from]` so `?` composes across the protocol, config and sensor layers.

use thiserror::Error;

use crate::config::ConfigError;

/// Convenience alias for results using the rig error type.
pub type RigResult<T> = std::result::Result<T, RigError>;

/// Errors raised while talking to the companion AT device.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The byte channel failed to write or read
    #[error("Transport error: {0}")]
    Transport(#[from] anyhow::Error),

    /// A command argument is outside the range the device accepts
    #[error("Invalid argument for {command}: {value} (expected {expected})")]
    InvalidArgument {
        /// Command mnemonic, e.g. `ATGAIN`
        command: &'static str,
        /// Rejected value
        value: u32,
        /// Accepted range
        expected: &'static str,
    },

    /// A channel field is not a number (strict policy only)
    #[error("Malformed channel field {index}: '{token}'")]
    MalformedField {
        /// Slot the field would have filled
        index: usize,
        /// Raw field text
        token: String,
    },
}

/// Application error type.
#[derive(Error, Debug)]
pub enum RigError {
    /// The direct sensor did not answer at startup
    #[error("Direct sensor unavailable: {0}")]
    SensorUnavailable(String),

    /// The direct sensor rejected a configuration call
    #[error("Direct sensor fault: {0}")]
    Sensor(String),

    /// Companion device exchange failed
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The build lacks a cargo feature the configuration asks for
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl RigError {
    /// Whether the rig must stop taking measurements.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RigError::SensorUnavailable(_) | RigError::Config(_) | RigError::FeatureNotEnabled(_)
        )
    }
}
