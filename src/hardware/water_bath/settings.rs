//! The bath's "Set On/Off Array" settings bitfield and session initialization.
//!
//! The command carries eight data bytes, one per switch, each `0` (off),
//! `1` (on) or `2` (no change). The bath answers with the resulting state of
//! all eight switches.

use super::codec::{parse_reply, Precision, REPORTING_PRECISION};
use super::command::SET_ON_OFF_ARRAY_COMMAND;
use super::packet::{SerialPacket, REPLY_END};
use super::LINE;
use crate::error::{RigError, RigResult};
use crate::hardware::Transport;
use std::fmt;
use tracing::{debug, info, instrument};

/// State requested for (or reported by) one switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwitchCode {
    /// Switch off
    Off,
    /// Switch on
    On,
    /// Leave the switch as it is.
    Unchanged,
}

impl SwitchCode {
    /// Wire code: 0, 1 or 2.
    pub const fn code(self) -> u8 {
        match self {
            SwitchCode::Off => 0,
            SwitchCode::On => 1,
            SwitchCode::Unchanged => 2,
        }
    }

    /// `On` or `Off`.
    pub const fn from_bool(on: bool) -> Self {
        if on {
            SwitchCode::On
        } else {
            SwitchCode::Off
        }
    }
}

impl TryFrom<u8> for SwitchCode {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(SwitchCode::Off),
            1 => Ok(SwitchCode::On),
            2 => Ok(SwitchCode::Unchanged),
            other => Err(other),
        }
    }
}

/// Switch positions in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Switch {
    /// Turn the unit on or off
    UnitOnOff,
    /// On: use the external probe for control. Off: use the internal sensor
    ExternalSensorEnable,
    /// On: shut down on faults. Off: continue to run
    FaultsEnabled,
    /// Silence the audible alarm
    Mute,
    /// Restart after a power failure
    AutoRestart,
    /// On: report and accept values at 0.01 precision. Off: 0.1
    HighPrecisionEnable,
    /// Cool across the full temperature range
    FullRangeCoolEnable,
    /// On: serial control. Off: local (front panel) control
    SerialCommEnable,
}

impl Switch {
    /// Every switch, in wire order.
    pub const ALL: [Switch; 8] = [
        Switch::UnitOnOff,
        Switch::ExternalSensorEnable,
        Switch::FaultsEnabled,
        Switch::Mute,
        Switch::AutoRestart,
        Switch::HighPrecisionEnable,
        Switch::FullRangeCoolEnable,
        Switch::SerialCommEnable,
    ];

    /// 0-based position in the on/off array.
    pub const fn position(self) -> usize {
        self as usize
    }
}

/// The eight switch codes of the on/off array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SettingsBitfield([SwitchCode; 8]);

impl SettingsBitfield {
    /// All switches left as they are.
    pub const fn unchanged() -> Self {
        Self([SwitchCode::Unchanged; 8])
    }

    /// Turn the unit off, leaving everything else.
    pub fn unit_off() -> Self {
        Self::unchanged().with_code(Switch::UnitOnOff, SwitchCode::Off)
    }

    /// Hand control back to the front panel, leaving everything else.
    pub fn serial_off() -> Self {
        Self::unchanged().with_code(Switch::SerialCommEnable, SwitchCode::Off)
    }

    /// Build from raw codes in wire order.
    ///
    /// # Errors
    /// [`RigError::InvalidSetting`] for the first code outside `{0, 1, 2}`
    /// (positions are reported 1-based, as in the manual).
    pub fn from_codes(codes: [u8; 8]) -> RigResult<Self> {
        let mut switches = [SwitchCode::Unchanged; 8];
        for (index, code) in codes.into_iter().enumerate() {
            switches[index] = SwitchCode::try_from(code).map_err(|code| {
                RigError::InvalidSetting {
                    position: index + 1,
                    code,
                }
            })?;
        }
        Ok(Self(switches))
    }

    /// Request `code` for `switch`.
    pub fn with_code(mut self, switch: Switch, code: SwitchCode) -> Self {
        self.0[switch.position()] = code;
        self
    }

    /// Request `switch` to be on or off.
    pub fn with(self, switch: Switch, on: bool) -> Self {
        self.with_code(switch, SwitchCode::from_bool(on))
    }

    /// Code held for `switch`.
    pub fn get(&self, switch: Switch) -> SwitchCode {
        self.0[switch.position()]
    }

    /// Whether `switch` is on.
    pub fn is_on(&self, switch: Switch) -> bool {
        self.get(switch) == SwitchCode::On
    }

    /// All codes in wire order.
    pub fn codes(&self) -> &[SwitchCode; 8] {
        &self.0
    }

    /// Canonical wire encoding.
    pub fn to_data_bytes(&self) -> [u8; 8] {
        self.0.map(SwitchCode::code)
    }

    /// Decode the data bytes of a settings reply.
    ///
    /// # Errors
    /// [`RigError::Protocol`] if there aren't eight valid codes.
    pub fn from_reply_data(data: &[u8]) -> RigResult<Self> {
        let codes: [u8; 8] = data.try_into().map_err(|_| {
            RigError::Protocol(format!(
                "Settings reply must carry 8 data bytes, got {}",
                data.len()
            ))
        })?;
        Self::from_codes(codes)
            .map_err(|e| RigError::Protocol(format!("Settings reply is invalid: {e}")))
    }
}

impl Default for SettingsBitfield {
    fn default() -> Self {
        Self::unchanged()
    }
}

impl fmt::Display for SettingsBitfield {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let codes: Vec<String> = self.0.iter().map(|c| c.code().to_string()).collect();
        write!(f, "[{}]", codes.join(", "))
    }
}

/// Send a settings command and return the bitfield the bath echoes back.
#[instrument(skip(transport, settings), fields(settings = %settings))]
pub fn send_settings_command_and_parse_response<T: Transport + ?Sized>(
    transport: &T,
    port: &str,
    settings: &SettingsBitfield,
) -> RigResult<SettingsBitfield> {
    let packet = SerialPacket::new(SET_ON_OFF_ARRAY_COMMAND, settings.to_data_bytes().to_vec())?;
    let raw = transport.exchange(port, &LINE, &packet.to_bytes(), &REPLY_END)?;
    let reply = parse_reply(&raw)?;

    if reply.command != SET_ON_OFF_ARRAY_COMMAND {
        return Err(RigError::Protocol(format!(
            "Settings reply echoes command byte 0x{:02X}",
            reply.command
        )));
    }

    let echoed = SettingsBitfield::from_reply_data(&reply.data)?;
    debug!(echoed = %echoed, "Water bath settings");
    Ok(echoed)
}

/// Settings sent by [`initialize`].
///
/// Serial comms have to be on already or the bath would not be listening, so
/// that switch is left untouched and only verified.
pub fn initialization_settings() -> SettingsBitfield {
    SettingsBitfield::unchanged()
        .with(Switch::UnitOnOff, true)
        .with(Switch::ExternalSensorEnable, false)
        .with(
            Switch::HighPrecisionEnable,
            REPORTING_PRECISION == Precision::Hundredth,
        )
}

/// Checks that the echoed settings match what the rest of the crate assumes.
pub fn initialization_errors(settings: &SettingsBitfield) -> Vec<String> {
    let high_precision = REPORTING_PRECISION == Precision::Hundredth;
    let checks = [
        ("Water bath isn't turned on", settings.is_on(Switch::UnitOnOff)),
        (
            "Internal sensor isn't enabled",
            settings.get(Switch::ExternalSensorEnable) == SwitchCode::Off,
        ),
        (
            "Precision isn't 0.01",
            settings.is_on(Switch::HighPrecisionEnable) == high_precision,
        ),
        (
            "Serial comms aren't enabled; switch the front panel to 'Serial'",
            settings.is_on(Switch::SerialCommEnable),
        ),
    ];

    checks
        .iter()
        .filter(|(_, ok)| !ok)
        .map(|(message, _)| message.to_string())
        .collect()
}

/// Force the bath into the configuration the codec relies on and verify it.
///
/// Must run once per session before any other exchange is trusted.
///
/// # Errors
/// [`RigError::Initialization`] listing every check the echoed settings failed.
#[instrument(skip(transport))]
pub fn initialize<T: Transport + ?Sized>(transport: &T, port: &str) -> RigResult<SettingsBitfield> {
    let echoed = send_settings_command_and_parse_response(transport, port, &initialization_settings())?;

    let errors = initialization_errors(&echoed);
    if !errors.is_empty() {
        return Err(RigError::Initialization(errors));
    }

    info!(settings = %echoed, "Water bath initialized");
    Ok(echoed)
}

/// Return the bath to local keypad control: unit off, then serial off.
#[instrument(skip(transport))]
pub fn return_to_local_control<T: Transport + ?Sized>(transport: &T, port: &str) -> RigResult<()> {
    send_settings_command_and_parse_response(transport, port, &SettingsBitfield::unit_off())?;
    send_settings_command_and_parse_response(transport, port, &SettingsBitfield::serial_off())?;
    info!("Water bath returned to local control");
    Ok(())
}
