//! Differential measurement results
//!
//! A cycle acquires every channel twice, with the excitation source on and off, and
//! keeps the difference. Negative differences carry no physical meaning here (the
//! sample cannot emit less than ambient), so they are floored at zero.

pub mod sequencer;

pub use sequencer::{DifferentialSequencer, OperatingMode, SequencerSettings};

use std::fmt;
use thiserror::Error;

use crate::hardware::SensorType;
use crate::instrument::at_protocol::{ChannelBuffer, CHANNEL_COUNT};

/// Excitation state during an acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Illumination {
    /// Source driven
    On,
    /// Source dark, ambient only
    Off,
}

impl fmt::Display for Illumination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Illumination::On => write!(f, "on"),
            Illumination::Off => write!(f, "off"),
        }
    }
}

/// `x` if positive, otherwise `0.0`.
pub fn clamp_to_zero(x: f64) -> f64 {
    if x <= 0.0 {
        0.0
    } else {
        x
    }
}

/// Per-channel `on - off`, unclamped.
pub fn differential(on: &ChannelBuffer, off: &ChannelBuffer) -> ChannelBuffer {
    std::array::from_fn(|i| on[i] - off[i])
}

/// Per-channel `on - off`, floored at zero.
pub fn clamped_differential(on: &ChannelBuffer, off: &ChannelBuffer) -> ChannelBuffer {
    differential(on, off).map(clamp_to_zero)
}

/// Something that degraded a cycle without stopping it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AcquisitionIssue {
    /// The direct sensor reported an unexpected hardware identity
    #[error("{phase} phase: sensor reported {found}, expected AS7262")]
    IdentityMismatch {
        /// Phase that was zero-filled
        phase: Illumination,
        /// Identity the sensor reported
        found: SensorType,
    },

    /// A direct sensor call failed during acquisition
    #[error("{phase} phase: sensor fault: {message}")]
    SensorFault {
        /// Phase that was zero-filled
        phase: Illumination,
        /// Driver error text
        message: String,
    },

    /// The companion device read failed
    #[error("{phase} phase: protocol fault: {message}")]
    Protocol {
        /// Phase that was zero-filled
        phase: Illumination,
        /// Protocol error text
        message: String,
    },

    /// Switching the excitation source failed; the phase was still acquired
    #[error("{phase} phase: illumination change failed: {message}")]
    IlluminationFault {
        /// Phase whose illumination change failed
        phase: Illumination,
        /// Error text
        message: String,
    },
}

/// One labelled channel value.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelReading {
    /// Wavelength tag, e.g. `"450nm"`
    pub label: &'static str,
    /// Non-negative differential value
    pub value: f64,
}

/// Outcome of one cycle: labelled values in channel order plus any issues.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementResult {
    readings: Vec<ChannelReading>,
    issues: Vec<AcquisitionIssue>,
}

impl MeasurementResult {
    /// Pair `labels` with `values` position by position.
    pub fn new(labels: &[&'static str; CHANNEL_COUNT], values: ChannelBuffer) -> Self {
        Self {
            readings: labels
                .iter()
                .zip(values)
                .map(|(&label, value)| ChannelReading { label, value })
                .collect(),
            issues: Vec::new(),
        }
    }

    /// Attach the issues met during the cycle.
    pub fn with_issues(mut self, issues: Vec<AcquisitionIssue>) -> Self {
        self.issues = issues;
        self
    }

    /// Readings in channel order.
    pub fn readings(&self) -> &[ChannelReading] {
        &self.readings
    }

    /// Values in channel order.
    pub fn values(&self) -> Vec<f64> {
        self.readings.iter().map(|r| r.value).collect()
    }

    /// Value for a label.
    pub fn get(&self, label: &str) -> Option<f64> {
        self.readings
            .iter()
            .find(|r| r.label == label)
            .map(|r| r.value)
    }

    /// Issues met during the cycle.
    pub fn issues(&self) -> &[AcquisitionIssue] {
        &self.issues
    }

    /// Whether any phase fell back to zeros or lost its illumination change.
    pub fn is_degraded(&self) -> bool {
        !self.issues.is_empty()
    }
}

impl fmt::Display for MeasurementResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, reading) in self.readings.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {:.2}", reading.label, reading.value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LABELS: [&str; 6] = ["a", "b", "c", "d", "e", "f"];

    #[test]
    fn test_clamp_to_zero() {
        assert_eq!(clamp_to_zero(3.5), 3.5);
        assert_eq!(clamp_to_zero(0.0), 0.0);
        assert_eq!(clamp_to_zero(-0.0).to_bits(), 0.0f64.to_bits());
        assert_eq!(clamp_to_zero(-1e-9), 0.0);
        assert_eq!(clamp_to_zero(f64::MIN), 0.0);
    }

    #[test]
    fn test_differential_example() {
        let on = [10.5, 8.0, -1.0, 0.0, 20.0, 5.5];
        let off = [2.0, 9.0, 0.5, 0.0, 18.0, 6.0];

        assert_eq!(differential(&on, &off), [8.5, -1.0, -1.5, 0.0, 2.0, -0.5]);
        assert_eq!(
            clamped_differential(&on, &off),
            [8.5, 0.0, 0.0, 0.0, 2.0, 0.0]
        );
    }

    #[test]
    fn test_result_lookup_and_order() {
        let result = MeasurementResult::new(&LABELS, [1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(result.get("c"), Some(3.0));
        assert_eq!(result.get("z"), None);
        assert_eq!(result.values(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(result.readings()[5].label, "f");
        assert!(!result.is_degraded());
    }

    #[test]
    fn test_console_line() {
        let result = MeasurementResult::new(
            &["450nm", "500nm", "550nm", "570nm", "600nm", "650nm"],
            [8.5, 0.0, 0.0, 0.0, 2.0, 1234.5678],
        );
        assert_eq!(
            result.to_string(),
            "450nm: 8.50, 500nm: 0.00, 550nm: 0.00, 570nm: 0.00, 600nm: 2.00, 650nm: 1234.57"
        );
    }

    #[test]
    fn test_issue_display() {
        let issue = AcquisitionIssue::IdentityMismatch {
            phase: Illumination::Off,
            found: SensorType::As7263,
        };
        assert_eq!(
            issue.to_string(),
            "off phase: sensor reported AS7263, expected AS7262"
        );
        let result = MeasurementResult::new(&LABELS, [0.0; 6]).with_issues(vec![issue]);
        assert!(result.is_degraded());
    }
}
