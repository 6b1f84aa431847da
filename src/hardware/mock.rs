//! Mock Hardware Implementations
//!
//! Simulated devices for running the rig without the optical bench.
//!
//! # Available Mocks
//!
//! - `MockSpectralSensor` - direct sensor whose readings follow the bulb state
//! - `simulated_at_device` - companion AT device behind a [`MockAdapter`]
//!
//! Both report a fixed ambient level when dark and ambient plus a pigment response when
//! lit, with optional uniform noise.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{BulbCurrent, Gain, SensorType, SpectralSensor, VisibleChannel};
use crate::adapters::MockAdapter;
use crate::instrument::at_protocol::{ChannelBuffer, CHANNEL_COUNT};

/// Ambient level seen by the visible sensor, 450-650 nm.
pub const VISIBLE_DARK: ChannelBuffer = [35.0, 42.0, 50.0, 48.0, 44.0, 40.0];

/// Visible sensor under bulb excitation with a phycocyanin-bearing sample.
pub const VISIBLE_LIT: ChannelBuffer = [310.0, 262.5, 215.0, 190.0, 236.0, 281.25];

/// Ambient level seen by the NIR companion, 610-860 nm.
pub const NIR_DARK: ChannelBuffer = [120.0, 95.0, 80.0, 60.0, 45.0, 30.0];

/// NIR companion under LED excitation with a chlorophyll-bearing sample.
pub const NIR_LIT: ChannelBuffer = [182.0, 415.5, 262.0, 91.0, 70.25, 48.0];

fn jitter(values: ChannelBuffer, amplitude: f64) -> ChannelBuffer {
    if amplitude <= 0.0 {
        return values;
    }
    let mut rng = rand::thread_rng();
    values.map(|v| v + rng.gen_range(-amplitude..=amplitude))
}

struct SensorState {
    begin_fails: bool,
    bulb_on: bool,
    bulb_current: BulbCurrent,
    gain: Gain,
    integration_time: u8,
    indicator_on: bool,
    version: SensorType,
    version_script: VecDeque<SensorType>,
    measurement_script: VecDeque<ChannelBuffer>,
    lit: ChannelBuffer,
    dark: ChannelBuffer,
    latched: ChannelBuffer,
    noise: f64,
    call_log: Vec<String>,
}

/// Simulated AS7262 direct sensor.
///
/// Clones share state, so a test can hand one clone to the sequencer and inspect the
/// other.
///
/// # Example
///
/// ```rust,ignore
/// let sensor = MockSpectralSensor::new().with_readings([10.0; 6], [2.0; 6]);
/// sensor.clone().enable_bulb().await?;
/// assert!(sensor.bulb_enabled());
/// ```
#[derive(Clone)]
pub struct MockSpectralSensor {
    state: Arc<Mutex<SensorState>>,
}

impl Default for MockSpectralSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSpectralSensor {
    /// AS7262 with the stock visible readings and no noise.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SensorState {
                begin_fails: false,
                bulb_on: false,
                bulb_current: BulbCurrent::Ma12_5,
                gain: Gain::X1,
                integration_time: 0,
                indicator_on: true,
                version: SensorType::As7262,
                version_script: VecDeque::new(),
                measurement_script: VecDeque::new(),
                lit: VISIBLE_LIT,
                dark: VISIBLE_DARK,
                latched: [0.0; CHANNEL_COUNT],
                noise: 0.0,
                call_log: Vec::new(),
            })),
        }
    }

    /// Readings returned while the bulb is on and off.
    pub fn with_readings(self, lit: ChannelBuffer, dark: ChannelBuffer) -> Self {
        {
            let mut state = self.state();
            state.lit = lit;
            state.dark = dark;
        }
        self
    }

    /// Identity reported once any scripted identities are used up.
    pub fn with_version(self, version: SensorType) -> Self {
        self.state().version = version;
        self
    }

    /// Uniform noise of +/- `amplitude` on every reading.
    pub fn with_noise(self, amplitude: f64) -> Self {
        self.state().noise = amplitude;
        self
    }

    /// Make `begin` fail as if nothing answered on the bus.
    pub fn failing_begin(self) -> Self {
        self.state().begin_fails = true;
        self
    }

    /// Identities for the next `version` calls, in order.
    pub fn queue_versions<I: IntoIterator<Item = SensorType>>(&self, versions: I) {
        self.state().version_script.extend(versions);
    }

    /// Readings for the next conversions, in order, regardless of bulb state.
    pub fn queue_measurements<I: IntoIterator<Item = ChannelBuffer>>(&self, readings: I) {
        self.state().measurement_script.extend(readings);
    }

    /// Whether the bulb output is on.
    pub fn bulb_enabled(&self) -> bool {
        self.state().bulb_on
    }

    /// Whether the indicator LED is on.
    pub fn indicator_enabled(&self) -> bool {
        self.state().indicator_on
    }

    /// Gain, integration time and bulb current currently applied.
    pub fn front_end(&self) -> (Gain, u8, BulbCurrent) {
        let state = self.state();
        (state.gain, state.integration_time, state.bulb_current)
    }

    /// Driver calls so far, e.g. `"set_gain(3)"`.
    pub fn call_log(&self) -> Vec<String> {
        self.state().call_log.clone()
    }

    fn state(&self) -> MutexGuard<'_, SensorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn log_call(&self, call: String) -> MutexGuard<'_, SensorState> {
        let mut state = self.state();
        state.call_log.push(call);
        state
    }
}

#[async_trait]
impl SpectralSensor for MockSpectralSensor {
    async fn begin(&mut self) -> Result<()> {
        let state = self.log_call("begin".to_string());
        if state.begin_fails {
            return Err(anyhow!("No response from sensor at 0x49"));
        }
        Ok(())
    }

    async fn set_gain(&mut self, gain: Gain) -> Result<()> {
        self.log_call(format!("set_gain({})", gain.code())).gain = gain;
        Ok(())
    }

    async fn set_integration_time(&mut self, ticks: u8) -> Result<()> {
        self.log_call(format!("set_integration_time({ticks})"))
            .integration_time = ticks;
        Ok(())
    }

    async fn disable_indicator(&mut self) -> Result<()> {
        self.log_call("disable_indicator".to_string()).indicator_on = false;
        Ok(())
    }

    async fn enable_bulb(&mut self) -> Result<()> {
        self.log_call("enable_bulb".to_string()).bulb_on = true;
        Ok(())
    }

    async fn disable_bulb(&mut self) -> Result<()> {
        self.log_call("disable_bulb".to_string()).bulb_on = false;
        Ok(())
    }

    async fn set_bulb_current(&mut self, current: BulbCurrent) -> Result<()> {
        self.log_call(format!("set_bulb_current({})", current.code()))
            .bulb_current = current;
        Ok(())
    }

    async fn take_measurements(&mut self) -> Result<()> {
        let mut state = self.log_call("take_measurements".to_string());
        let reading = match state.measurement_script.pop_front() {
            Some(scripted) => scripted,
            None if state.bulb_on => jitter(state.lit, state.noise),
            None => jitter(state.dark, state.noise),
        };
        state.latched = reading;
        Ok(())
    }

    async fn version(&mut self) -> Result<SensorType> {
        let mut state = self.log_call("version".to_string());
        let version = state.version_script.pop_front().unwrap_or(state.version);
        Ok(version)
    }

    async fn calibrated(&mut self, channel: VisibleChannel) -> Result<f64> {
        Ok(self.state().latched[channel.index()])
    }
}

/// Companion AT device simulation.
///
/// Acknowledges every `AT` command with `OK`, tracks the `ATLED1` state, and answers
/// `ATCDATA` with six comma-separated values (lit or dark) followed by `OK`.
pub fn simulated_at_device(lit: ChannelBuffer, dark: ChannelBuffer, noise: f64) -> MockAdapter {
    let mut led_on = false;
    MockAdapter::with_responder(move |line| {
        let reply = match line {
            "ATLED1=100" => {
                led_on = true;
                "OK\r\n".to_string()
            }
            "ATLED1=0" => {
                led_on = false;
                "OK\r\n".to_string()
            }
            "ATCDATA" => {
                let values = jitter(if led_on { lit } else { dark }, noise);
                let fields: Vec<String> = values.iter().map(|v| format!("{v:.2}")).collect();
                format!("{}\r\nOK\r\n", fields.join(","))
            }
            cmd if cmd.starts_with("AT") => "OK\r\n".to_string(),
            _ => "ERROR\r\n".to_string(),
        };
        Some(reply.into_bytes())
    })
}
