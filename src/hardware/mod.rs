//! Direct spectral sensor interface
//!
//! The visible-band sensor (AS7262 class) sits on a register-level bus and is driven
//! through the [`SpectralSensor`] trait. The crate does not ship a register driver;
//! deployments provide one, and [`mock::MockSpectralSensor`] stands in for tests and
//! bench simulation.

pub mod mock;

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;

/// Identity reported by the sensor's hardware version register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorType {
    /// XYZ tristimulus variant
    As7261,
    /// Six-channel visible variant (450-650 nm)
    As7262,
    /// Six-channel NIR variant (610-860 nm)
    As7263,
    /// Any other hardware version byte
    Unknown(u8),
}

impl SensorType {
    /// Decode the hardware version byte.
    pub fn from_hw_version(byte: u8) -> Self {
        match byte {
            0x3D => SensorType::As7261,
            0x3E => SensorType::As7262,
            0x3F => SensorType::As7263,
            other => SensorType::Unknown(other),
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorType::As7261 => write!(f, "AS7261"),
            SensorType::As7262 => write!(f, "AS7262"),
            SensorType::As7263 => write!(f, "AS7263"),
            SensorType::Unknown(byte) => write!(f, "unknown (0x{byte:02X})"),
        }
    }
}

/// Analog gain shared by the direct sensor and the `ATGAIN` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Gain {
    /// 1x
    X1,
    /// 3.7x
    X3_7,
    /// 16x
    X16,
    /// 64x
    #[default]
    X64,
}

impl Gain {
    /// Register code, 0..=3.
    pub fn code(self) -> u8 {
        match self {
            Gain::X1 => 0,
            Gain::X3_7 => 1,
            Gain::X16 => 2,
            Gain::X64 => 3,
        }
    }

    /// Inverse of [`Gain::code`].
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Gain::X1),
            1 => Some(Gain::X3_7),
            2 => Some(Gain::X16),
            3 => Some(Gain::X64),
            _ => None,
        }
    }
}

/// Drive current for the sensor's bulb output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BulbCurrent {
    /// 12.5 mA
    Ma12_5,
    /// 25 mA
    Ma25,
    /// 50 mA
    Ma50,
    /// 100 mA
    #[default]
    Ma100,
}

impl BulbCurrent {
    /// Register code, 0..=3.
    pub fn code(self) -> u8 {
        match self {
            BulbCurrent::Ma12_5 => 0,
            BulbCurrent::Ma25 => 1,
            BulbCurrent::Ma50 => 2,
            BulbCurrent::Ma100 => 3,
        }
    }

    /// Inverse of [`BulbCurrent::code`].
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(BulbCurrent::Ma12_5),
            1 => Some(BulbCurrent::Ma25),
            2 => Some(BulbCurrent::Ma50),
            3 => Some(BulbCurrent::Ma100),
            _ => None,
        }
    }
}

/// The six calibrated channels of the visible sensor, in read order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibleChannel {
    /// 450 nm
    Violet,
    /// 500 nm
    Blue,
    /// 550 nm
    Green,
    /// 570 nm
    Yellow,
    /// 600 nm
    Orange,
    /// 650 nm
    Red,
}

impl VisibleChannel {
    /// All channels in acquisition order.
    pub const ALL: [VisibleChannel; 6] = [
        VisibleChannel::Violet,
        VisibleChannel::Blue,
        VisibleChannel::Green,
        VisibleChannel::Yellow,
        VisibleChannel::Orange,
        VisibleChannel::Red,
    ];

    /// Position in [`VisibleChannel::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Register-level spectral sensor driver.
#[async_trait]
pub trait SpectralSensor: Send {
    /// Probe and initialise the device. An error means the bus or device is absent.
    async fn begin(&mut self) -> Result<()>;

    /// Set analog gain.
    async fn set_gain(&mut self, gain: Gain) -> Result<()>;

    /// Set integration time in 2.8 ms ticks.
    async fn set_integration_time(&mut self, ticks: u8) -> Result<()>;

    /// Turn off the on-board indicator LED.
    async fn disable_indicator(&mut self) -> Result<()>;

    /// Switch the bulb output on.
    async fn enable_bulb(&mut self) -> Result<()>;

    /// Switch the bulb output off.
    async fn disable_bulb(&mut self) -> Result<()>;

    /// Set the bulb drive current.
    async fn set_bulb_current(&mut self, current: BulbCurrent) -> Result<()>;

    /// Run a one-shot conversion and latch the results.
    async fn take_measurements(&mut self) -> Result<()>;

    /// Read the hardware identity.
    async fn version(&mut self) -> Result<SensorType>;

    /// Calibrated value of one channel from the last conversion.
    async fn calibrated(&mut self, channel: VisibleChannel) -> Result<f64>;
}

#[async_trait]
impl<S: SpectralSensor + ?Sized> SpectralSensor for Box<S> {
    async fn begin(&mut self) -> Result<()> {
        (**self).begin().await
    }

    async fn set_gain(&mut self, gain: Gain) -> Result<()> {
        (**self).set_gain(gain).await
    }

    async fn set_integration_time(&mut self, ticks: u8) -> Result<()> {
        (**self).set_integration_time(ticks).await
    }

    async fn disable_indicator(&mut self) -> Result<()> {
        (**self).disable_indicator().await
    }

    async fn enable_bulb(&mut self) -> Result<()> {
        (**self).enable_bulb().await
    }

    async fn disable_bulb(&mut self) -> Result<()> {
        (**self).disable_bulb().await
    }

    async fn set_bulb_current(&mut self, current: BulbCurrent) -> Result<()> {
        (**self).set_bulb_current(current).await
    }

    async fn take_measurements(&mut self) -> Result<()> {
        (**self).take_measurements().await
    }

    async fn version(&mut self) -> Result<SensorType> {
        (**self).version().await
    }

    async fn calibrated(&mut self, channel: VisibleChannel) -> Result<f64> {
        (**self).calibrated(channel).await
    }
}
