//! Core library for the fluoro_daq rig.
//!
//! The rig estimates pigment concentration from the difference between two acquisitions,
//! one with the excitation source on and one with it off. This library contains the AT
//! protocol client for the companion spectral device, the direct sensor interface, the
//! differential sequencer, and the configuration and logging plumbing used by the
//! `fluoro_daq` binary.

pub mod adapters;
pub mod config;
pub mod error;
pub mod hardware;
pub mod instrument;
pub mod logging;
pub mod measurement;

pub use config::RigConfig;
pub use error::{ProtocolError, RigError, RigResult};
pub use measurement::{DifferentialSequencer, MeasurementResult, OperatingMode};
