//! Instrument protocol clients.

pub mod at_protocol;

pub use at_protocol::{AtClient, ChannelBuffer, Command, NumericPolicy, ResponseMode};
