//! Differential sequencer against simulated sensors.
//!
//! Run with: cargo test --test sequencer_test

use fluoro_daq::adapters::MockAdapter;
use fluoro_daq::config::Pigment;
use fluoro_daq::hardware::mock::{
    simulated_at_device, MockSpectralSensor, NIR_DARK, NIR_LIT, VISIBLE_LIT,
};
use fluoro_daq::hardware::SensorType;
use fluoro_daq::instrument::AtClient;
use fluoro_daq::measurement::sequencer::{NIR_LABELS, VISIBLE_LABELS};
use fluoro_daq::measurement::{
    AcquisitionIssue, DifferentialSequencer, Illumination, OperatingMode, SequencerSettings,
};
use fluoro_daq::RigError;
use std::time::Duration;
use tokio::time::Instant;

fn rig(
    sensor: &MockSpectralSensor,
    device: &MockAdapter,
) -> DifferentialSequencer<MockSpectralSensor, MockAdapter> {
    DifferentialSequencer::new(
        sensor.clone(),
        AtClient::new(device.clone()),
        SequencerSettings::default(),
    )
}

fn quiet_device() -> MockAdapter {
    simulated_at_device(NIR_LIT, NIR_DARK, 0.0)
}

#[tokio::test(start_paused = true)]
async fn test_worked_example_clamps_negatives() {
    let sensor = MockSpectralSensor::new();
    sensor.queue_measurements([
        [10.5, 8.0, -1.0, 0.0, 20.0, 5.5],
        [2.0, 9.0, 0.5, 0.0, 18.0, 6.0],
    ]);
    let device = quiet_device();
    let mut sequencer = rig(&sensor, &device);

    let result = sequencer.run_cycle(OperatingMode::Phycocyanin).await;

    assert_eq!(result.values(), vec![8.5, 0.0, 0.0, 0.0, 2.0, 0.0]);
    assert!(!result.is_degraded());
    assert_eq!(
        result.to_string(),
        "450nm: 8.50, 500nm: 0.00, 550nm: 0.00, 570nm: 0.00, 600nm: 2.00, 650nm: 0.00"
    );
}

#[tokio::test(start_paused = true)]
async fn test_phycocyanin_cycle_drives_bulb() {
    let sensor = MockSpectralSensor::new();
    let device = quiet_device();
    let mut sequencer = rig(&sensor, &device);

    let start = Instant::now();
    let result = sequencer.run_cycle(OperatingMode::Phycocyanin).await;

    assert!(start.elapsed() >= Duration::from_millis(2 * 286));
    assert_eq!(
        sensor.call_log(),
        vec![
            "enable_bulb",
            "set_bulb_current(3)",
            "take_measurements",
            "version",
            "disable_bulb",
            "take_measurements",
            "version",
        ]
    );
    assert!(!sensor.bulb_enabled());
    assert!(device.written().is_empty());

    let labels: Vec<&str> = result.readings().iter().map(|r| r.label).collect();
    assert_eq!(labels, VISIBLE_LABELS.to_vec());
    assert!(result.values().iter().all(|&v| v > 0.0));
}

#[tokio::test(start_paused = true)]
async fn test_chlorophyll_cycle_uses_companion_device() {
    let sensor = MockSpectralSensor::new();
    let device = quiet_device();
    let mut sequencer = rig(&sensor, &device);

    let result = sequencer.run_cycle(OperatingMode::Chlorophyll).await;

    assert_eq!(
        device.written_commands(),
        vec!["ATLED1=100", "ATLEDC=0x30", "ATCDATA", "ATLED1=0", "ATCDATA"]
    );
    assert!(sensor.call_log().is_empty());

    let labels: Vec<&str> = result.readings().iter().map(|r| r.label).collect();
    assert_eq!(labels, NIR_LABELS.to_vec());
    assert_eq!(result.values(), vec![62.0, 320.5, 182.0, 31.0, 25.25, 18.0]);
    assert_eq!(result.get("680nm"), Some(320.5));
}

#[tokio::test(start_paused = true)]
async fn test_calibration_cycle_mixes_paths() {
    let sensor = MockSpectralSensor::new();
    sensor.queue_measurements([[5.0; 6], [1.0; 6]]);
    let device = quiet_device();
    let mut sequencer = rig(&sensor, &device);

    let result = sequencer
        .run_cycle(OperatingMode::PhycocyaninCalibration)
        .await;

    assert_eq!(result.values(), vec![4.0; 6]);
    assert_eq!(
        device.written_commands(),
        vec!["ATLED1=100", "ATLEDC=0x30", "ATLED1=0"]
    );
    assert!(!sensor.call_log().iter().any(|call| call.contains("bulb")));
    assert_eq!(result.readings()[0].label, "450nm");
}

#[tokio::test(start_paused = true)]
async fn test_identity_mismatch_zeroes_only_that_phase() {
    let sensor = MockSpectralSensor::new();
    sensor.queue_versions([SensorType::As7262, SensorType::As7263]);
    let device = quiet_device();
    let mut sequencer = rig(&sensor, &device);

    let result = sequencer.run_cycle(OperatingMode::Phycocyanin).await;

    assert_eq!(result.values(), VISIBLE_LIT.to_vec());
    assert!(result.is_degraded());
    assert_eq!(
        result.issues(),
        &[AcquisitionIssue::IdentityMismatch {
            phase: Illumination::Off,
            found: SensorType::As7263,
        }]
    );

    // the next cycle is unaffected
    let result = sequencer.run_cycle(OperatingMode::Phycocyanin).await;
    assert!(!result.is_degraded());
}

#[tokio::test(start_paused = true)]
async fn test_led_write_failure_degrades_cycle() {
    let sensor = MockSpectralSensor::new();
    let device = quiet_device();
    device.inject_write_failure();
    let mut sequencer = rig(&sensor, &device);

    let result = sequencer.run_cycle(OperatingMode::Chlorophyll).await;

    assert_eq!(result.values(), vec![0.0; 6]);
    assert!(matches!(
        result.issues(),
        [AcquisitionIssue::IlluminationFault {
            phase: Illumination::On,
            ..
        }]
    ));
    assert_eq!(
        device.written_commands(),
        vec!["ATCDATA", "ATLED1=0", "ATCDATA"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_startup_sequence_with_bulb_excitation() {
    let sensor = MockSpectralSensor::new();
    let device = quiet_device();
    let mut sequencer = rig(&sensor, &device);

    let start = Instant::now();
    sequencer
        .initialize(OperatingMode::Phycocyanin)
        .await
        .unwrap();

    assert!(start.elapsed() >= Duration::from_millis(4 * 300 + 1000));
    assert_eq!(
        sensor.call_log(),
        vec![
            "begin",
            "set_gain(3)",
            "set_integration_time(255)",
            "disable_indicator",
        ]
    );
    assert!(!sensor.indicator_enabled());
    assert_eq!(
        device.written_commands(),
        vec!["AT", "ATINTTIME=255", "ATGAIN=3", "ATLED1=0"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_startup_sequence_with_led_excitation() {
    let sensor = MockSpectralSensor::new();
    let device = quiet_device();
    let mut sequencer = rig(&sensor, &device);

    sequencer
        .initialize(OperatingMode::from_flags(Pigment::Chlorophyll, true))
        .await
        .unwrap();

    assert_eq!(sensor.call_log().last().map(String::as_str), Some("disable_bulb"));
    assert_eq!(
        device.written_commands(),
        vec!["AT", "ATINTTIME=255", "ATGAIN=3"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_missing_sensor_is_fatal() {
    let sensor = MockSpectralSensor::new().failing_begin();
    let device = quiet_device();
    let mut sequencer = rig(&sensor, &device);

    let err = sequencer
        .initialize(OperatingMode::Chlorophyll)
        .await
        .unwrap_err();

    assert!(matches!(err, RigError::SensorUnavailable(_)));
    assert!(err.is_fatal());
    assert_eq!(sensor.call_log(), vec!["begin"]);
    assert!(device.written().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_front_end_settings_applied() {
    let sensor = MockSpectralSensor::new();
    let device = quiet_device();
    let settings = SequencerSettings {
        integration_time: 100,
        led_current: 0x0F,
        ..SequencerSettings::default()
    };
    let mut sequencer =
        DifferentialSequencer::new(sensor.clone(), AtClient::new(device.clone()), settings);

    sequencer
        .initialize(OperatingMode::PhycocyaninCalibration)
        .await
        .unwrap();
    sequencer
        .run_cycle(OperatingMode::PhycocyaninCalibration)
        .await;

    let commands = device.written_commands();
    assert!(commands.contains(&"ATINTTIME=100".to_string()));
    assert!(commands.contains(&"ATLEDC=0x0F".to_string()));
    assert_eq!(sensor.front_end().1, 100);
}
