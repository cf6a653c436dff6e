//! Calibration sequencing
//!
//! Drives the rig through a sequence of setpoints read from CSV. For each
//! setpoint the gas mixer and water bath are commanded, the run optionally
//! waits for the YSI readings to settle, and then samples every device at a
//! fixed interval for the setpoint's hold time. Every sample becomes one row
//! of the calibration CSV.
//!
//! All waiting is blocking. Device errors are not retried; they end the run
//! after the rig has been shut down.

pub mod data_logging;
pub mod equilibrate;
pub mod run;
pub mod setpoints;
pub mod status;

pub use data_logging::{
    get_all_sensor_data, output_filename, CalibrationLog, CalibrationRow, DataCollector,
    EquilibrationStatus, SensorData,
};
pub use equilibrate::{
    is_field_equilibrated, wait_for_do_equilibration, wait_for_temperature_equilibration,
};
pub use run::{run_calibration, shut_down, RunOptions};
pub use setpoints::{
    read_setpoint_sequence, read_setpoint_sequence_file, setpoint_validation_errors,
    validate_setpoints, Setpoint,
};
pub use status::check_status;

use crate::config::PortsConfig;
use crate::hardware::gas_mixer::GasMixer;
use crate::hardware::water_bath::WaterBath;
use crate::hardware::ysi::Ysi;
use crate::hardware::Transport;

/// The three devices of the rig, sharing one transport.
#[derive(Debug, Clone)]
pub struct Rig<T> {
    /// Temperature control
    pub water_bath: WaterBath<T>,
    /// O2/N2 mix control
    pub gas_mixer: GasMixer<T>,
    /// Reference DO probe
    pub ysi: Ysi<T>,
}

impl<T: Transport + Clone> Rig<T> {
    /// Handles for each device on its configured port.
    pub fn new(transport: T, ports: &PortsConfig) -> Self {
        Self {
            water_bath: WaterBath::new(transport.clone(), ports.water_bath.as_str()),
            gas_mixer: GasMixer::new(transport.clone(), ports.gas_mixer.as_str()),
            ysi: Ysi::new(transport, ports.ysi.as_str()),
        }
    }
}
