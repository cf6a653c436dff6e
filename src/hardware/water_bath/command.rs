//! Data-plane command vocabulary of the NESLAB bath.

use crate::error::RigError;
use std::fmt;
use std::str::FromStr;

/// "Read Status": five bytes of fault/state flags.
pub const READ_STATUS_COMMAND: u8 = 0x09;
/// "Set On/Off Array": the eight-position settings bitfield.
pub const SET_ON_OFF_ARRAY_COMMAND: u8 = 0x81;
/// Command byte the bath uses for its error reply.
pub const ERROR_RESPONSE_COMMAND: u8 = 0x0F;

/// Commands that carry (or return) a single qualified numeric value.
///
/// Read commands send no data and return the value. Set commands send the
/// value and the bath echoes what it stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Bath reservoir temperature
    ReadInternalTemperature,
    /// External probe temperature
    ReadExternalSensor,
    /// Control setpoint
    ReadSetpoint,
    /// Low temperature alarm limit
    ReadLowTemperatureLimit,
    /// High temperature alarm limit
    ReadHighTemperatureLimit,
    /// Heating P term
    ReadHeatProportionalBand,
    /// Heating I term
    ReadHeatIntegral,
    /// Heating D term
    ReadHeatDerivative,
    /// Cooling P term
    ReadCoolProportionalBand,
    /// Cooling I term
    ReadCoolIntegral,
    /// Cooling D term
    ReadCoolDerivative,
    /// Limited to the range of the bath
    SetSetpoint,
    /// Low temperature alarm limit
    SetLowTemperatureLimit,
    /// High temperature alarm limit
    SetHighTemperatureLimit,
    /// P = 0.1-99.9
    SetHeatProportionalBand,
    /// I = 0-9.99
    SetHeatIntegral,
    /// D = 0-5.0
    SetHeatDerivative,
    /// P = 0.1-99.9
    SetCoolProportionalBand,
    /// I = 0-9.99
    SetCoolIntegral,
    /// D = 0-5.0
    SetCoolDerivative,
}

impl Command {
    /// Every command, reads first.
    pub const ALL: [Command; 20] = [
        Command::ReadInternalTemperature,
        Command::ReadExternalSensor,
        Command::ReadSetpoint,
        Command::ReadLowTemperatureLimit,
        Command::ReadHighTemperatureLimit,
        Command::ReadHeatProportionalBand,
        Command::ReadHeatIntegral,
        Command::ReadHeatDerivative,
        Command::ReadCoolProportionalBand,
        Command::ReadCoolIntegral,
        Command::ReadCoolDerivative,
        Command::SetSetpoint,
        Command::SetLowTemperatureLimit,
        Command::SetHighTemperatureLimit,
        Command::SetHeatProportionalBand,
        Command::SetHeatIntegral,
        Command::SetHeatDerivative,
        Command::SetCoolProportionalBand,
        Command::SetCoolIntegral,
        Command::SetCoolDerivative,
    ];

    /// Command byte on the wire.
    pub const fn code(self) -> u8 {
        match self {
            Command::ReadInternalTemperature => 0x20,
            Command::ReadExternalSensor => 0x21,
            Command::ReadSetpoint => 0x70,
            Command::ReadLowTemperatureLimit => 0x40,
            Command::ReadHighTemperatureLimit => 0x60,
            Command::ReadHeatProportionalBand => 0x71,
            Command::ReadHeatIntegral => 0x72,
            Command::ReadHeatDerivative => 0x73,
            Command::ReadCoolProportionalBand => 0x74,
            Command::ReadCoolIntegral => 0x75,
            Command::ReadCoolDerivative => 0x76,
            Command::SetSetpoint => 0xF0,
            Command::SetLowTemperatureLimit => 0xC0,
            Command::SetHighTemperatureLimit => 0xE0,
            Command::SetHeatProportionalBand => 0xF1,
            Command::SetHeatIntegral => 0xF2,
            Command::SetHeatDerivative => 0xF3,
            Command::SetCoolProportionalBand => 0xF4,
            Command::SetCoolIntegral => 0xF5,
            Command::SetCoolDerivative => 0xF6,
        }
    }

    /// Name as printed in the bath manual.
    pub const fn name(self) -> &'static str {
        match self {
            Command::ReadInternalTemperature => "Read Internal Temperature",
            Command::ReadExternalSensor => "Read External Sensor",
            Command::ReadSetpoint => "Read Setpoint",
            Command::ReadLowTemperatureLimit => "Read Low Temperature Limit",
            Command::ReadHighTemperatureLimit => "Read High Temperature Limit",
            Command::ReadHeatProportionalBand => "Read Heat Proportional Band",
            Command::ReadHeatIntegral => "Read Heat Integral",
            Command::ReadHeatDerivative => "Read Heat Derivative",
            Command::ReadCoolProportionalBand => "Read Cool Proportional Band",
            Command::ReadCoolIntegral => "Read Cool Integral",
            Command::ReadCoolDerivative => "Read Cool Derivative",
            Command::SetSetpoint => "Set Setpoint",
            Command::SetLowTemperatureLimit => "Set Low Temperature Limit",
            Command::SetHighTemperatureLimit => "Set High Temperature Limit",
            Command::SetHeatProportionalBand => "Set Heat Proportional Band",
            Command::SetHeatIntegral => "Set Heat Integral",
            Command::SetHeatDerivative => "Set Heat Derivative",
            Command::SetCoolProportionalBand => "Set Cool Proportional Band",
            Command::SetCoolIntegral => "Set Cool Integral",
            Command::SetCoolDerivative => "Set Cool Derivative",
        }
    }

    /// Set commands carry a value; read commands don't.
    pub const fn is_set(self) -> bool {
        self.code() & 0x80 != 0
    }

    /// Look up a command by its wire byte.
    pub fn from_code(code: u8) -> Option<Command> {
        Command::ALL.into_iter().find(|command| command.code() == code)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Command {
    type Err = RigError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .into_iter()
            .find(|command| command.name().eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| RigError::Protocol(format!("Unknown water bath command '{name}'")))
    }
}
