//! The calibration run loop.

use super::data_logging::{CalibrationLog, DataCollector, EquilibrationStatus};
use super::equilibrate::{wait_for_do_equilibration, wait_for_temperature_equilibration};
use super::setpoints::{validate_setpoints, Setpoint};
use super::status::check_status;
use super::Rig;
use crate::config::{EquilibrationConfig, RigConfig};
use crate::error::{RigError, RigResult};
use crate::hardware::gas_mixer::o2_source_gas_fraction;
use crate::hardware::water_bath::SettingsBitfield;
use crate::hardware::Transport;
use crate::validation::is_fraction;
use chrono::Local;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{error, info, info_span, warn};

// =============================================================================
// Options
// =============================================================================

/// How a run is carried out.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// O2 fraction of the gas connected to the mixer's second inlet
    pub o2_source_gas_fraction: f64,
    /// Time between samples while holding at a setpoint
    pub collection_interval: Duration,
    /// Passes over the sequence; `None` repeats until the process is stopped
    pub passes: Option<u64>,
    /// Directory the calibration CSV is created in
    pub output_dir: PathBuf,
    /// When to stop waiting and start holding
    pub equilibration: EquilibrationConfig,
    /// Hand the bath back to its front panel at the end
    pub return_to_local_control: bool,
}

impl RunOptions {
    /// Options for a single pass, taking the rest from `config`.
    pub fn from_config(config: &RigConfig, o2_source_gas_fraction: f64) -> Self {
        Self {
            o2_source_gas_fraction,
            collection_interval: config.collection_interval(),
            passes: Some(1),
            output_dir: config.output_dir.clone(),
            equilibration: config.equilibration.clone(),
            return_to_local_control: false,
        }
    }

    /// Reject options no rig could run with.
    ///
    /// # Errors
    /// [`RigError::Configuration`] if the O2 source gas fraction is outside [0, 1].
    pub fn validate(&self) -> RigResult<()> {
        is_fraction(self.o2_source_gas_fraction).map_err(|e| {
            RigError::Configuration(format!(
                "o2 source gas fraction {}: {e}",
                self.o2_source_gas_fraction
            ))
        })
    }

    /// Samples taken while holding at `setpoint`, one collection interval apart.
    pub fn samples_per_hold(&self, setpoint: &Setpoint) -> u64 {
        let interval = self.collection_interval.as_secs_f64();
        if interval <= 0.0 {
            return 1;
        }
        let samples = (setpoint.hold_duration().as_secs_f64() / interval).floor() as u64;
        samples.max(1)
    }
}

// =============================================================================
// Run
// =============================================================================

/// Run `setpoints` on `rig`, logging to a new CSV in `options.output_dir`.
///
/// The whole sequence is validated before any device is touched. Once the
/// rig has been started it is always shut down, whether the run finishes
/// or fails.
///
/// Returns the path of the CSV written.
///
/// # Errors
/// - [`RigError::Configuration`] for an impossible O2 source gas fraction
/// - [`RigError::InvalidSetpoints`] before anything is sent
/// - [`RigError::CalibrationAbort`]
///   when a pre-flight status check fails
/// - Any device error, unretried
pub fn run_calibration<T: Transport>(
    rig: &Rig<T>,
    setpoints: &[Setpoint],
    options: &RunOptions,
) -> RigResult<PathBuf> {
    options.validate()?;
    validate_setpoints(setpoints, options.o2_source_gas_fraction)?;

    let mut log = CalibrationLog::create(&options.output_dir, &Local::now())?;
    let path = log.path().to_path_buf();

    let outcome = {
        let mut collector = DataCollector::new(rig, &mut log, options.o2_source_gas_fraction);
        run_sequence(&mut collector, setpoints, options)
    };
    let shutdown = shut_down(rig, options.return_to_local_control);

    match (outcome, shutdown) {
        (Ok(()), Ok(())) => {
            info!(path = %path.display(), rows = log.rows_written(), "Calibration run complete");
            Ok(path)
        }
        (Err(e), Ok(())) => Err(e),
        (Ok(()), Err(e)) => Err(e),
        (Err(e), Err(shutdown_error)) => {
            error!(error = %shutdown_error, "Shut down after failed run also failed");
            Err(e)
        }
    }
}

fn run_sequence<T: Transport>(
    collector: &mut DataCollector<'_, T>,
    setpoints: &[Setpoint],
    options: &RunOptions,
) -> RigResult<()> {
    collector.rig().water_bath.initialize()?;

    if setpoints.is_empty() {
        warn!("Setpoint sequence is empty; nothing to do");
        return Ok(());
    }

    let mut previous_temperature = None;
    let mut loop_count = 0;
    while options.passes.map_or(true, |passes| loop_count < passes) {
        for (index, setpoint) in setpoints.iter().enumerate() {
            let _span = info_span!("setpoint", loop_count, index).entered();
            run_setpoint(collector, setpoint, loop_count, previous_temperature, options)?;
            previous_temperature = Some(setpoint.temperature);
        }
        loop_count += 1;
    }
    Ok(())
}

fn run_setpoint<T: Transport>(
    collector: &mut DataCollector<'_, T>,
    setpoint: &Setpoint,
    loop_count: u64,
    previous_temperature: Option<f64>,
    options: &RunOptions,
) -> RigResult<()> {
    let rig = collector.rig();
    check_status(rig)?;

    info!(
        temperature = setpoint.temperature,
        flow_rate_slpm = setpoint.flow_rate_slpm,
        o2_target_gas_fraction = setpoint.o2_target_gas_fraction,
        hold_time = setpoint.hold_time,
        "Moving to setpoint"
    );
    let source_fraction =
        o2_source_gas_fraction(setpoint.o2_target_gas_fraction, options.o2_source_gas_fraction)?;
    rig.gas_mixer
        .start_constant_flow_mix(setpoint.flow_rate_slpm, source_fraction)?;
    rig.water_bath.set_setpoint(setpoint.temperature)?;

    let equilibration = &options.equilibration;
    if equilibration.enabled {
        // Temperature only moves when the setpoint changes it
        if previous_temperature != Some(setpoint.temperature) {
            wait_for_temperature_equilibration(collector, setpoint, loop_count, equilibration)?;
        }
        wait_for_do_equilibration(collector, setpoint, loop_count, equilibration)?;
    }

    let samples = options.samples_per_hold(setpoint);
    info!(samples, interval = ?options.collection_interval, "Holding at setpoint");
    for sample in 0..samples {
        collector.collect_data_to_csv(setpoint, loop_count, EquilibrationStatus::Equilibrated)?;
        if sample + 1 < samples {
            thread::sleep(options.collection_interval);
        }
    }
    Ok(())
}

// =============================================================================
// Shut down
// =============================================================================

/// Stop the gas flow and turn the bath off.
///
/// The bath is turned off even if stopping the flow fails; the first error is
/// returned. With `return_to_local_control` the bath's front panel is also
/// handed back.
pub fn shut_down<T: Transport>(rig: &Rig<T>, return_to_local_control: bool) -> RigResult<()> {
    info!("Shutting down calibration rig");
    let stop_flow = rig.gas_mixer.stop_flow();
    if let Err(e) = &stop_flow {
        error!(error = %e, "Failed to stop gas flow");
    }

    let bath_off = if return_to_local_control {
        rig.water_bath.return_to_local_control()
    } else {
        rig.water_bath
            .send_settings(&SettingsBitfield::unit_off())
            .map(|_| ())
    };
    if let Err(e) = &bath_off {
        error!(error = %e, "Failed to turn water bath off");
    }

    stop_flow.and(bath_off)
}
