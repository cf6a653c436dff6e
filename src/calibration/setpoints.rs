//! Setpoint sequence loading and validation.
//!
//! A sequence file is a CSV with a header row and one setpoint per line:
//!
//! ```csv
//! temperature,flow_rate_slpm,o2_target_gas_fraction,hold_time
//! 15,2.5,0.1,300
//! 25,2.5,0.2,300
//! ```
//!
//! Rows run in file order. Extra columns are ignored; missing or
//! unparseable ones fail the load.

use crate::error::{RigError, RigResult};
use crate::hardware::gas_mixer::mix_validation_errors;
use crate::hardware::water_bath::temperature_validation_errors;
use crate::validation::is_fraction;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// One target operating condition of the rig.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Setpoint {
    /// Water bath temperature, °C
    pub temperature: f64,
    /// Total gas flow out of the mixer, SLPM
    pub flow_rate_slpm: f64,
    /// O2 fraction of the gas bubbled through the bath, 0-1
    pub o2_target_gas_fraction: f64,
    /// Dwell at the setpoint, seconds
    pub hold_time: f64,
}

impl Setpoint {
    /// Hold time as a `Duration`; zero if the value is unusable.
    pub fn hold_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.hold_time).unwrap_or_default()
    }
}

/// Parse a sequence from any CSV source.
pub fn read_setpoint_sequence<R: Read>(reader: R) -> RigResult<Vec<Setpoint>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    reader
        .deserialize()
        .collect::<Result<Vec<Setpoint>, _>>()
        .map_err(RigError::from)
}

/// Load the sequence at `path`, preserving row order.
pub fn read_setpoint_sequence_file(path: impl AsRef<Path>) -> RigResult<Vec<Setpoint>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)?;
    let setpoints = read_setpoint_sequence(file)?;
    info!(path = %path.display(), count = setpoints.len(), "Loaded setpoint sequence");
    Ok(setpoints)
}

/// Everything wrong with a single setpoint.
pub fn setpoint_errors(setpoint: &Setpoint, source_gas_o2_fraction: f64) -> Vec<String> {
    let mut errors = Vec::new();
    if is_fraction(setpoint.o2_target_gas_fraction).is_err() {
        errors.push("O2 target gas fraction not within [0, 1]".to_string());
    }
    if !setpoint.hold_time.is_finite() || setpoint.hold_time < 0.0 {
        errors.push("hold time must be a non-negative number of seconds".to_string());
    }
    errors.extend(mix_validation_errors(
        setpoint.flow_rate_slpm,
        source_gas_o2_fraction,
        setpoint.o2_target_gas_fraction,
    ));
    errors.extend(temperature_validation_errors(setpoint.temperature));
    errors
}

/// `(index, errors)` for every setpoint that cannot be run. Indices are
/// 0-based positions in the sequence.
pub fn setpoint_validation_errors(
    setpoints: &[Setpoint],
    source_gas_o2_fraction: f64,
) -> Vec<(usize, Vec<String>)> {
    setpoints
        .iter()
        .enumerate()
        .map(|(index, setpoint)| (index, setpoint_errors(setpoint, source_gas_o2_fraction)))
        .filter(|(_, errors)| !errors.is_empty())
        .collect()
}

/// Refuse the whole sequence if any setpoint is invalid.
pub fn validate_setpoints(setpoints: &[Setpoint], source_gas_o2_fraction: f64) -> RigResult<()> {
    let errors = setpoint_validation_errors(setpoints, source_gas_o2_fraction);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(RigError::InvalidSetpoints(errors))
    }
}
