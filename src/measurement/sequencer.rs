//! On/off differential sequencer
//!
//! One cycle runs `Idle -> on acquisition -> off acquisition -> computed` with no state
//! carried into the next cycle:
//!
//! 1. switch the excitation source on (sensor bulb or companion LED, per mode)
//! 2. wait the optical settle time, then acquire six channels
//! 3. switch the source off, wait again, acquire again
//! 4. subtract and floor at zero
//!
//! The settle delays are physically coupled to the integration time and are always
//! awaited in full. Acquisition failures never abort a cycle: the affected phase reads
//! as zeros and the failure is recorded on the result.

use std::fmt;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{clamped_differential, AcquisitionIssue, Illumination, MeasurementResult};
use crate::adapters::Adapter;
use crate::config::Pigment;
use crate::error::{RigError, RigResult};
use crate::hardware::{BulbCurrent, Gain, SensorType, SpectralSensor, VisibleChannel};
use crate::instrument::at_protocol::{AtClient, ChannelBuffer, Command, CHANNEL_COUNT};

/// Default wait between an illumination change and acquisition.
pub const OPTICAL_SETTLE: Duration = Duration::from_millis(286);

/// Default pause after the initial `AT` handshake.
pub const HANDSHAKE_DELAY: Duration = Duration::from_millis(1000);

/// Identity the direct sensor must report for its values to be used.
pub const EXPECTED_SENSOR: SensorType = SensorType::As7262;

/// Labels for direct-sensor acquisition.
pub const VISIBLE_LABELS: [&str; CHANNEL_COUNT] =
    ["450nm", "500nm", "550nm", "570nm", "600nm", "650nm"];

/// Labels for companion-device acquisition.
pub const NIR_LABELS: [&str; CHANNEL_COUNT] =
    ["610nm", "680nm", "730nm", "760nm", "810nm", "860nm"];

/// Which source provides excitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IlluminationPath {
    /// Direct sensor's bulb output
    SensorBulb,
    /// Companion device LED driver, via `ATLED1`/`ATLEDC`
    DeviceLed,
}

/// Which sensor provides channel values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionPath {
    /// Calibrated getters of the direct sensor
    DirectSensor,
    /// `ATCDATA` on the companion device
    ProtocolDevice,
}

/// Measurement configuration, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    /// Phycocyanin: bulb excitation, direct-sensor acquisition
    Phycocyanin,
    /// Phycocyanin calibration: companion LED excitation, direct-sensor acquisition
    PhycocyaninCalibration,
    /// Chlorophyll: companion LED excitation, companion acquisition
    Chlorophyll,
}

impl OperatingMode {
    /// Map the pigment target and calibration flag onto a mode.
    ///
    /// The calibration flag has no effect for chlorophyll.
    pub fn from_flags(pigment: Pigment, calibration: bool) -> Self {
        match (pigment, calibration) {
            (Pigment::Phycocyanin, false) => OperatingMode::Phycocyanin,
            (Pigment::Phycocyanin, true) => OperatingMode::PhycocyaninCalibration,
            (Pigment::Chlorophyll, _) => OperatingMode::Chlorophyll,
        }
    }

    /// Excitation source for this mode.
    pub fn illumination_path(self) -> IlluminationPath {
        match self {
            OperatingMode::Phycocyanin => IlluminationPath::SensorBulb,
            OperatingMode::PhycocyaninCalibration | OperatingMode::Chlorophyll => {
                IlluminationPath::DeviceLed
            }
        }
    }

    /// Data source for this mode.
    pub fn acquisition_path(self) -> AcquisitionPath {
        match self {
            OperatingMode::Phycocyanin | OperatingMode::PhycocyaninCalibration => {
                AcquisitionPath::DirectSensor
            }
            OperatingMode::Chlorophyll => AcquisitionPath::ProtocolDevice,
        }
    }

    /// Channel labels, in acquisition order.
    pub fn channel_labels(self) -> &'static [&'static str; CHANNEL_COUNT] {
        match self.acquisition_path() {
            AcquisitionPath::DirectSensor => &VISIBLE_LABELS,
            AcquisitionPath::ProtocolDevice => &NIR_LABELS,
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatingMode::Phycocyanin => write!(f, "phycocyanin"),
            OperatingMode::PhycocyaninCalibration => write!(f, "phycocyanin-calibration"),
            OperatingMode::Chlorophyll => write!(f, "chlorophyll"),
        }
    }
}

/// Timing and front-end settings for the sequencer.
#[derive(Debug, Clone, PartialEq)]
pub struct SequencerSettings {
    /// Wait after each illumination change
    pub optical_settle: Duration,
    /// Pause after the startup handshake
    pub handshake_delay: Duration,
    /// Gain applied to both sensors at startup
    pub gain: Gain,
    /// Integration time applied to both sensors at startup
    pub integration_time: u8,
    /// Bulb drive current while illuminated
    pub bulb_current: BulbCurrent,
    /// `ATLEDC` byte while illuminated
    pub led_current: u8,
}

impl Default for SequencerSettings {
    fn default() -> Self {
        Self {
            optical_settle: OPTICAL_SETTLE,
            handshake_delay: HANDSHAKE_DELAY,
            gain: Gain::X64,
            integration_time: 255,
            bulb_current: BulbCurrent::Ma100,
            led_current: 0x30,
        }
    }
}

fn sensor_fault(e: anyhow::Error) -> RigError {
    RigError::Sensor(format!("{e:#}"))
}

/// Drives both sensors through startup and measurement cycles.
pub struct DifferentialSequencer<S: SpectralSensor, A: Adapter> {
    sensor: S,
    device: AtClient<A>,
    settings: SequencerSettings,
}

impl<S: SpectralSensor, A: Adapter> DifferentialSequencer<S, A> {
    /// Sequencer over a direct sensor and a companion-device client.
    pub fn new(sensor: S, device: AtClient<A>, settings: SequencerSettings) -> Self {
        Self {
            sensor,
            device,
            settings,
        }
    }

    /// The direct sensor.
    pub fn sensor(&self) -> &S {
        &self.sensor
    }

    /// The companion-device client.
    pub fn device(&self) -> &AtClient<A> {
        &self.device
    }

    /// Bring both sensors into the measurement configuration.
    ///
    /// # Errors
    ///
    /// [`RigError::SensorUnavailable`] when the direct sensor does not answer. The rig
    /// must not run cycles after any error from this call.
    pub async fn initialize(&mut self, mode: OperatingMode) -> RigResult<()> {
        info!(%mode, "Initializing rig");
        let bulb_excitation = mode.illumination_path() == IlluminationPath::SensorBulb;

        self.sensor
            .begin()
            .await
            .map_err(|e| RigError::SensorUnavailable(format!("{e:#}")))?;
        self.sensor
            .set_gain(self.settings.gain)
            .await
            .map_err(sensor_fault)?;
        self.sensor
            .set_integration_time(self.settings.integration_time)
            .await
            .map_err(sensor_fault)?;
        self.sensor.disable_indicator().await.map_err(sensor_fault)?;
        if !bulb_excitation {
            self.sensor.disable_bulb().await.map_err(sensor_fault)?;
        }

        self.device.send_command(&Command::Handshake, None).await?;
        sleep(self.settings.handshake_delay).await;
        self.device
            .send_command(
                &Command::integration_time(self.settings.integration_time)?,
                None,
            )
            .await?;
        self.device
            .send_command(&Command::SetGain(self.settings.gain), None)
            .await?;
        if bulb_excitation {
            // companion LED stays dark for the whole run
            self.device
                .send_command(&Command::SetLed(false), None)
                .await?;
        }

        info!(%mode, "Rig ready");
        Ok(())
    }

    /// Run one on/off cycle and return the clamped differential.
    pub async fn run_cycle(&mut self, mode: OperatingMode) -> MeasurementResult {
        let mut issues = Vec::new();

        let lit = self.run_phase(mode, Illumination::On, &mut issues).await;
        let dark = self.run_phase(mode, Illumination::Off, &mut issues).await;

        let values = clamped_differential(&lit, &dark);
        debug!(%mode, ?lit, ?dark, ?values, "Cycle computed");

        MeasurementResult::new(mode.channel_labels(), values).with_issues(issues)
    }

    async fn run_phase(
        &mut self,
        mode: OperatingMode,
        phase: Illumination,
        issues: &mut Vec<AcquisitionIssue>,
    ) -> ChannelBuffer {
        let path = mode.illumination_path();
        if let Err(e) = self.set_illumination(path, phase).await {
            let issue = AcquisitionIssue::IlluminationFault {
                phase,
                message: e.to_string(),
            };
            warn!(%issue, "Illumination change failed");
            issues.push(issue);
        }

        sleep(self.settings.optical_settle).await;

        match self.acquire(mode.acquisition_path(), phase).await {
            Ok(values) => values,
            Err(issue) => {
                warn!(%issue, "Acquisition unavailable, using zeros");
                issues.push(issue);
                [0.0; CHANNEL_COUNT]
            }
        }
    }

    async fn set_illumination(
        &mut self,
        path: IlluminationPath,
        state: Illumination,
    ) -> RigResult<()> {
        debug!(?path, %state, "Setting illumination");
        match (path, state) {
            (IlluminationPath::SensorBulb, Illumination::On) => {
                self.sensor.enable_bulb().await.map_err(sensor_fault)?;
                self.sensor
                    .set_bulb_current(self.settings.bulb_current)
                    .await
                    .map_err(sensor_fault)?;
            }
            (IlluminationPath::SensorBulb, Illumination::Off) => {
                self.sensor.disable_bulb().await.map_err(sensor_fault)?;
            }
            (IlluminationPath::DeviceLed, Illumination::On) => {
                self.device
                    .send_command(&Command::SetLed(true), None)
                    .await?;
                self.device
                    .send_command(&Command::SetLedCurrent(self.settings.led_current), None)
                    .await?;
            }
            (IlluminationPath::DeviceLed, Illumination::Off) => {
                self.device
                    .send_command(&Command::SetLed(false), None)
                    .await?;
            }
        }
        Ok(())
    }

    async fn acquire(
        &mut self,
        path: AcquisitionPath,
        phase: Illumination,
    ) -> Result<ChannelBuffer, AcquisitionIssue> {
        match path {
            AcquisitionPath::DirectSensor => self.read_direct(phase).await,
            AcquisitionPath::ProtocolDevice => {
                self.device
                    .query_channels()
                    .await
                    .map_err(|e| AcquisitionIssue::Protocol {
                        phase,
                        message: e.to_string(),
                    })
            }
        }
    }

    async fn read_direct(
        &mut self,
        phase: Illumination,
    ) -> Result<ChannelBuffer, AcquisitionIssue> {
        let fault = |e: anyhow::Error| AcquisitionIssue::SensorFault {
            phase,
            message: format!("{e:#}"),
        };

        self.sensor.take_measurements().await.map_err(fault)?;

        let found = self.sensor.version().await.map_err(fault)?;
        if found != EXPECTED_SENSOR {
            return Err(AcquisitionIssue::IdentityMismatch { phase, found });
        }

        let mut values = [0.0; CHANNEL_COUNT];
        for channel in VisibleChannel::ALL {
            values[channel.index()] = self.sensor.calibrated(channel).await.map_err(fault)?;
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockAdapter;
    use crate::hardware::mock::MockSpectralSensor;
    use tracing_test::traced_test;

    #[test]
    fn test_mode_from_flags() {
        assert_eq!(
            OperatingMode::from_flags(Pigment::Phycocyanin, false),
            OperatingMode::Phycocyanin
        );
        assert_eq!(
            OperatingMode::from_flags(Pigment::Phycocyanin, true),
            OperatingMode::PhycocyaninCalibration
        );
        assert_eq!(
            OperatingMode::from_flags(Pigment::Chlorophyll, false),
            OperatingMode::Chlorophyll
        );
        assert_eq!(
            OperatingMode::from_flags(Pigment::Chlorophyll, true),
            OperatingMode::Chlorophyll
        );
    }

    #[test]
    fn test_mode_paths_and_labels() {
        let mode = OperatingMode::PhycocyaninCalibration;
        assert_eq!(mode.illumination_path(), IlluminationPath::DeviceLed);
        assert_eq!(mode.acquisition_path(), AcquisitionPath::DirectSensor);
        assert_eq!(mode.channel_labels()[0], "450nm");
        assert_eq!(OperatingMode::Chlorophyll.channel_labels()[5], "860nm");
        assert_eq!(
            OperatingMode::Phycocyanin.illumination_path(),
            IlluminationPath::SensorBulb
        );
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_identity_mismatch_is_logged_not_fatal() {
        let sensor = MockSpectralSensor::new().with_version(SensorType::Unknown(0x00));
        let client = AtClient::new(MockAdapter::new());
        let mut sequencer =
            DifferentialSequencer::new(sensor, client, SequencerSettings::default());

        let result = sequencer.run_cycle(OperatingMode::Phycocyanin).await;

        assert_eq!(result.values(), vec![0.0; CHANNEL_COUNT]);
        assert_eq!(result.issues().len(), 2);
        assert!(logs_contain("Acquisition unavailable"));
        assert!(logs_contain("expected AS7262"));
    }
}
