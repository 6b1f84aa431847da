//! fluoro_daq command-line entry point.
//!
//! Loads configuration, brings up both sensors, then prints one differential reading per
//! cycle until the requested number of cycles is reached (or forever).
//!
//! ```bash
//! cargo run -- --mock --cycles 5
//! RUST_LOG=fluoro_daq=debug cargo run -- --config config/fluoro_daq.toml
//! ```

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

use fluoro_daq::adapters::Adapter;
use fluoro_daq::config::{RigConfig, SdkMode, DEFAULT_CONFIG_PATH};
use fluoro_daq::hardware::mock::{simulated_at_device, MockSpectralSensor, NIR_DARK, NIR_LIT};
use fluoro_daq::hardware::SpectralSensor;
use fluoro_daq::instrument::AtClient;
use fluoro_daq::logging;
use fluoro_daq::measurement::DifferentialSequencer;
use fluoro_daq::RigError;

const SIMULATED_NOISE: f64 = 0.5;

/// Differential fluorescence acquisition for the pigment rig.
#[derive(Parser, Debug)]
#[command(name = "fluoro_daq", version, about)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Stop after this many cycles
    #[arg(short = 'n', long)]
    cycles: Option<u64>,

    /// Use the simulated sensor and AT device
    #[arg(long)]
    mock: bool,

    /// Serial port of the companion AT device
    #[arg(long)]
    port: Option<String>,
}

type Backend = (Box<dyn SpectralSensor>, Box<dyn Adapter>);

#[cfg(feature = "instrument_serial")]
fn open_serial(config: &RigConfig) -> Result<Box<dyn Adapter>> {
    let mut adapter = fluoro_daq::adapters::SerialAdapter::new(
        config.serial.port.clone(),
        config.serial.baud_rate,
    );
    adapter.connect()?;
    Ok(Box::new(adapter))
}

#[cfg(not(feature = "instrument_serial"))]
fn open_serial(_config: &RigConfig) -> Result<Box<dyn Adapter>> {
    Err(RigError::FeatureNotEnabled("instrument_serial".to_string()).into())
}

fn build_backend(config: &RigConfig) -> Result<Backend> {
    match config.rig.sdk_mode {
        SdkMode::Mock => {
            let sensor = MockSpectralSensor::new().with_noise(SIMULATED_NOISE);
            let device = simulated_at_device(NIR_LIT, NIR_DARK, SIMULATED_NOISE);
            Ok((Box::new(sensor), Box::new(device)))
        }
        SdkMode::Real => {
            let _device = open_serial(config)?;
            Err(RigError::SensorUnavailable(
                "no register-level driver for the direct sensor is linked into this build"
                    .to_string(),
            )
            .into())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = RigConfig::extract_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    if cli.mock {
        config.rig.sdk_mode = SdkMode::Mock;
    }
    if let Some(port) = cli.port {
        config.serial.port = port;
    }
    config.validate()?;

    logging::init_from_config(&config.application).map_err(|e| anyhow!(e))?;

    let mode = config.operating_mode();
    info!(
        name = %config.application.name,
        %mode,
        sdk_mode = ?config.rig.sdk_mode,
        "Starting acquisition"
    );

    let (sensor, device) = match build_backend(&config) {
        Ok(backend) => backend,
        Err(e) => {
            error!(error = %e, "Rig halted; no measurements will be taken");
            return Err(e);
        }
    };

    let client = AtClient::new(device)
        .with_response_settle(Duration::from_millis(config.protocol.response_settle_ms))
        .with_numeric_policy(config.protocol.numeric_policy)
        .with_response_mode(config.response_mode());
    let mut sequencer = DifferentialSequencer::new(sensor, client, config.sequencer_settings());

    if let Err(e) = sequencer.initialize(mode).await {
        error!(error = %e, "Rig halted; no measurements will be taken");
        return Err(e.into());
    }

    let mut completed: u64 = 0;
    while cli.cycles.map_or(true, |limit| completed < limit) {
        let result = sequencer.run_cycle(mode).await;
        println!("{result}");
        completed += 1;
    }

    info!(cycles = completed, "Acquisition finished");
    Ok(())
}
