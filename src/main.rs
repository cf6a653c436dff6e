//! CLI entry point: `run_calibration`
//!
//! Runs a setpoint sequence on the calibration rig and writes the collected
//! data to `<output-dir>/<start time>_calibration.csv`.
//!
//! # Usage
//!
//! ```bash
//! run_calibration -s setpoints.csv --o2-source-fraction 1.0
//! run_calibration -s setpoints.csv --o2-source-fraction 0.21 --loop --ysi-port /dev/ttyUSB2
//! run_calibration -s setpoints.csv --o2-source-fraction 1.0 --dry-run --skip-equilibration
//! ```

use anyhow::{Context, Result};
use calibration_rig::calibration::{
    read_setpoint_sequence_file, run_calibration, Rig, RunOptions, Setpoint,
};
use calibration_rig::config::{RigConfig, DEFAULT_CONFIG_PATH};
use calibration_rig::hardware::{SerialTransport, SimulatedRig, Transport};
use calibration_rig::logging::{self, LogFormat, LoggingConfig};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "run_calibration")]
#[command(about = "Run a dissolved-oxygen calibration sequence", long_about = None)]
struct Cli {
    /// Setpoint sequence CSV
    #[arg(short = 's', long = "setpoint-sequence-filepath")]
    setpoint_sequence_filepath: PathBuf,

    /// O2 fraction of the gas connected to the mixer's O2 source inlet
    #[arg(long = "o2-source-fraction")]
    o2_source_fraction: f64,

    /// Seconds between readings while holding at a setpoint
    #[arg(long)]
    collection_interval: Option<f64>,

    /// Repeat the sequence until stopped
    #[arg(long = "loop")]
    loop_sequence: bool,

    #[arg(long)]
    water_bath_port: Option<String>,

    #[arg(long)]
    gas_mixer_port: Option<String>,

    #[arg(long)]
    ysi_port: Option<String>,

    /// Configuration file (default: config/calibration.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory the calibration CSV is written to
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Start holding as soon as each setpoint is commanded
    #[arg(long)]
    skip_equilibration: bool,

    /// Hand the water bath back to its front panel when done
    #[arg(long)]
    return_to_local_control: bool,

    /// Drive a simulated rig instead of the serial ports
    #[arg(long)]
    dry_run: bool,

    /// trace, debug, info, warn or error
    #[arg(long)]
    log_level: Option<String>,

    /// pretty, compact or json
    #[arg(long, default_value = "pretty")]
    log_format: String,
}

impl Cli {
    /// Layer the command line over the loaded configuration.
    fn apply_to(&self, config: &mut RigConfig) {
        if let Some(level) = &self.log_level {
            config.log_level.clone_from(level);
        }
        if let Some(interval) = self.collection_interval {
            config.collection_interval_secs = interval;
        }
        if let Some(port) = &self.water_bath_port {
            config.ports.water_bath.clone_from(port);
        }
        if let Some(port) = &self.gas_mixer_port {
            config.ports.gas_mixer.clone_from(port);
        }
        if let Some(port) = &self.ysi_port {
            config.ports.ysi.clone_from(port);
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir.clone_from(dir);
        }
        if self.skip_equilibration {
            config.equilibration.enabled = false;
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => RigConfig::load_from(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => RigConfig::load()
            .with_context(|| format!("loading configuration from {DEFAULT_CONFIG_PATH}"))?,
    };
    cli.apply_to(&mut config);
    config.validate().context("invalid configuration")?;

    let format: LogFormat = cli.log_format.parse()?;
    logging::init(LoggingConfig::from_rig_config(&config)?.with_format(format))?;

    let setpoints = read_setpoint_sequence_file(&cli.setpoint_sequence_filepath).with_context(|| {
        format!(
            "reading setpoint sequence {}",
            cli.setpoint_sequence_filepath.display()
        )
    })?;

    let mut options = RunOptions::from_config(&config, cli.o2_source_fraction);
    options.passes = if cli.loop_sequence { None } else { Some(1) };
    options.return_to_local_control = cli.return_to_local_control;
    options.validate().context("invalid --o2-source-fraction")?;

    let path = if cli.dry_run {
        info!("Dry run: driving the simulated rig");
        let sim = Arc::new(SimulatedRig::with_source_gas_o2_fraction(
            cli.o2_source_fraction,
        ));
        run(sim, &config, &setpoints, &options)?
    } else {
        run(Arc::new(SerialTransport::new()), &config, &setpoints, &options)?
    };

    println!("Calibration data written to {}", path.display());
    Ok(())
}

fn run<T: Transport + Clone>(
    transport: T,
    config: &RigConfig,
    setpoints: &[Setpoint],
    options: &RunOptions,
) -> Result<PathBuf> {
    info!(
        water_bath = %config.ports.water_bath,
        gas_mixer = %config.ports.gas_mixer,
        ysi = %config.ports.ysi,
        setpoints = setpoints.len(),
        "Starting calibration run"
    );
    let rig = Rig::new(transport, &config.ports);
    run_calibration(&rig, setpoints, options).context("calibration run failed")
}
