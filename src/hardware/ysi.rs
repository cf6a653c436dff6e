//! YSI reference probe driver
//!
//! The YSI provides the reference dissolved oxygen, temperature and barometric
//! pressure readings that the rig's sensors are calibrated against.
//!
//! Protocol Overview:
//! - Format: ASCII, `$ADC <command>\r\n`
//! - Baud: 57600, 8N1, no flow control
//! - Reply: `$<value>\r\n$ACK\r\n`, e.g. `$49.9\r\n$ACK\r\n`

use crate::error::{RigError, RigResult};
use crate::hardware::{LineSettings, ResponseEnd, Transport};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Line parameters of the probe.
pub const LINE: LineSettings = LineSettings::new(57600, Duration::from_secs(1));

const RESPONSE_INITIATOR: &str = "$";
const RESPONSE_TERMINATOR: &str = "\r\n$ACK\r\n";

/// Every reply ends with an acknowledgement line.
pub const REPLY_END: ResponseEnd = ResponseEnd::Terminator(RESPONSE_TERMINATOR.as_bytes());

/// Readings the probe is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YsiCommand {
    /// Barometric pressure, mmHg
    BarometricPressureMmhg,
    /// Barometric pressure, kPa
    BarometricPressureKpa,
    /// Dissolved oxygen, % saturation
    DoPercentSaturation,
    /// Dissolved oxygen, mg/L
    DoMgPerL,
    /// Temperature, °C
    TemperatureC,
}

impl YsiCommand {
    /// Sensor request as the YSI names it.
    pub const fn request(self) -> &'static str {
        match self {
            YsiCommand::BarometricPressureMmhg => "Get Normal SENSOR_BAR_MMHG",
            YsiCommand::BarometricPressureKpa => "Get Normal SENSOR_BAR_KPA",
            YsiCommand::DoPercentSaturation => "Get Normal SENSOR_DO_PERCENT_SAT",
            YsiCommand::DoMgPerL => "Get Normal SENSOR_DO_MG_L",
            YsiCommand::TemperatureC => "Get Normal SENSOR_TEMP_C",
        }
    }

    /// ADC command line for this reading.
    pub fn to_bytes(self) -> Vec<u8> {
        format!("$ADC {}\r\n", self.request()).into_bytes()
    }
}

impl fmt::Display for YsiCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.request())
    }
}

/// The standard complement of readings logged with every sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct YsiReadings {
    /// mmHg
    pub barometric_pressure_mmhg: f64,
    /// mg/L
    pub do_mg_per_l: f64,
    /// % saturation
    pub do_percent_saturation: f64,
    /// °C
    pub temperature_c: f64,
}

/// Parse a `$<value>\r\n$ACK\r\n` reply.
pub fn parse_response(raw: &[u8]) -> RigResult<f64> {
    let text = String::from_utf8_lossy(raw);
    let value = text
        .strip_prefix(RESPONSE_INITIATOR)
        .ok_or_else(|| {
            RigError::Protocol(format!(
                "YSI response {text:?} is missing the initiator {RESPONSE_INITIATOR:?}"
            ))
        })?
        .strip_suffix(RESPONSE_TERMINATOR)
        .ok_or_else(|| {
            RigError::Protocol(format!(
                "YSI response {text:?} is missing the terminator {RESPONSE_TERMINATOR:?}"
            ))
        })?;

    value.trim().parse::<f64>().map_err(|_| {
        RigError::Protocol(format!(
            "{value:?} from within YSI response {text:?} could not be converted to a number"
        ))
    })
}

/// Request one reading from the probe on `port`.
pub fn get_sensor_reading<T: Transport + ?Sized>(
    transport: &T,
    port: &str,
    command: YsiCommand,
) -> RigResult<f64> {
    let raw = transport.exchange(port, &LINE, &command.to_bytes(), &REPLY_END)?;
    let value = parse_response(&raw)?;
    debug!(%command, value, "YSI reading");
    Ok(value)
}

/// Read pressure, DO (both units) and temperature, in that order.
pub fn get_standard_sensor_values<T: Transport + ?Sized>(
    transport: &T,
    port: &str,
) -> RigResult<YsiReadings> {
    Ok(YsiReadings {
        barometric_pressure_mmhg: get_sensor_reading(
            transport,
            port,
            YsiCommand::BarometricPressureMmhg,
        )?,
        do_mg_per_l: get_sensor_reading(transport, port, YsiCommand::DoMgPerL)?,
        do_percent_saturation: get_sensor_reading(transport, port, YsiCommand::DoPercentSaturation)?,
        temperature_c: get_sensor_reading(transport, port, YsiCommand::TemperatureC)?,
    })
}

/// A YSI probe on a specific port.
#[derive(Debug, Clone)]
pub struct Ysi<T> {
    transport: T,
    port: String,
}

impl<T: Transport> Ysi<T> {
    /// Probe on `port`.
    pub fn new(transport: T, port: impl Into<String>) -> Self {
        Self {
            transport,
            port: port.into(),
        }
    }

    /// See [`get_sensor_reading`].
    pub fn reading(&self, command: YsiCommand) -> RigResult<f64> {
        get_sensor_reading(&self.transport, &self.port, command)
    }

    /// See [`get_standard_sensor_values`].
    pub fn standard_sensor_values(&self) -> RigResult<YsiReadings> {
        get_standard_sensor_values(&self.transport, &self.port)
    }
}
