//! Thermo Scientific NESLAB RTE 17 temperature-controlled water bath.
//!
//! Reference: NESLAB RTE Series manual, "NC Serial Communications Protocol"
//!
//! Protocol Overview:
//! - Format: binary packets (see [`packet`]) over RS-232
//! - Baud: 19200, 8N1, no flow control
//! - Half-duplex: every command gets exactly one reply
//! - Values: qualifier byte + signed 16-bit integer (see [`codec`])
//!
//! The bath must be switched to "Serial" on its front panel before it will
//! answer. Run [`initialize`] once per session before trusting any reading.
//!
//! # Example Usage
//!
//! ```no_run
//! use calibration_rig::hardware::water_bath::WaterBath;
//! use calibration_rig::hardware::SerialTransport;
//!
//! fn main() -> calibration_rig::error::RigResult<()> {
//!     let bath = WaterBath::new(SerialTransport::new(), "/dev/ttyUSB0");
//!     bath.initialize()?;
//!
//!     let setpoint = bath.set_setpoint(27.85)?;
//!     let temperature = bath.read_temperature()?;
//!     println!("Bath at {temperature:.2} C, heading for {setpoint:.2} C");
//!
//!     bath.return_to_local_control()
//! }
//! ```

pub mod codec;
pub mod command;
pub mod packet;
pub mod settings;
pub mod setpoint;
pub mod status;

pub use codec::{decode, encode, Precision, REPORTING_PRECISION};
pub use command::Command;
pub use packet::SerialPacket;
pub use settings::{
    initialize, return_to_local_control, send_settings_command_and_parse_response,
    SettingsBitfield, Switch, SwitchCode,
};
pub use setpoint::temperature_validation_errors;
pub use status::{assert_status_ok, get_water_bath_status, WaterBathStatus};

use crate::error::RigResult;
use crate::hardware::{LineSettings, Transport};
use packet::REPLY_END;
use std::time::Duration;
use tracing::{debug, instrument};

/// Line parameters mandated by the bath firmware.
pub const LINE: LineSettings = LineSettings::new(19200, Duration::from_millis(100));

/// Send a data-plane `command` (with `data` for set commands) and return the
/// value the bath replies with.
///
/// For set commands the reply echoes the value the bath actually stored.
#[instrument(skip(transport))]
pub fn send_command_and_parse_response<T: Transport + ?Sized>(
    transport: &T,
    port: &str,
    command: Command,
    data: Option<f64>,
) -> RigResult<f64> {
    let request = encode(command, data)?;
    let raw = transport.exchange(port, &LINE, &request, &REPLY_END)?;
    let value = decode(command, &raw)?;
    debug!(%command, value, "Water bath replied");
    Ok(value)
}

/// A water bath on a specific port.
///
/// Holds no session state: every method is one (or two) exchanges on the
/// underlying transport.
#[derive(Debug, Clone)]
pub struct WaterBath<T> {
    transport: T,
    port: String,
}

impl<T: Transport> WaterBath<T> {
    /// Bath on `port`.
    pub fn new(transport: T, port: impl Into<String>) -> Self {
        Self {
            transport,
            port: port.into(),
        }
    }

    /// Port name.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// See [`initialize`].
    pub fn initialize(&self) -> RigResult<SettingsBitfield> {
        initialize(&self.transport, &self.port)
    }

    /// See [`send_settings_command_and_parse_response`].
    pub fn send_settings(&self, settings: &SettingsBitfield) -> RigResult<SettingsBitfield> {
        send_settings_command_and_parse_response(&self.transport, &self.port, settings)
    }

    /// See [`send_command_and_parse_response`].
    pub fn send_command(&self, command: Command, data: Option<f64>) -> RigResult<f64> {
        send_command_and_parse_response(&self.transport, &self.port, command, data)
    }

    /// Temperature measured by the bath's internal sensor, °C.
    pub fn read_temperature(&self) -> RigResult<f64> {
        self.send_command(Command::ReadInternalTemperature, None)
    }

    /// Temperature of the external probe, °C.
    pub fn read_external_temperature(&self) -> RigResult<f64> {
        self.send_command(Command::ReadExternalSensor, None)
    }

    /// Control setpoint, °C.
    pub fn read_setpoint(&self) -> RigResult<f64> {
        self.send_command(Command::ReadSetpoint, None)
    }

    /// Set the control setpoint and return the value the bath stored.
    pub fn set_setpoint(&self, temperature: f64) -> RigResult<f64> {
        self.send_command(Command::SetSetpoint, Some(temperature))
    }

    /// See [`get_water_bath_status`].
    pub fn status(&self) -> RigResult<WaterBathStatus> {
        get_water_bath_status(&self.transport, &self.port)
    }

    /// See [`assert_status_ok`].
    pub fn assert_status_ok(&self) -> RigResult<()> {
        assert_status_ok(&self.transport, &self.port)
    }

    /// See [`return_to_local_control`].
    pub fn return_to_local_control(&self) -> RigResult<()> {
        return_to_local_control(&self.transport, &self.port)
    }
}
