//! "Read Status" decoding.
//!
//! The reply carries five data bytes read MSB first. The first 37 bits are the
//! flags below, in manual order; the last three bits are unused. A flashing LED
//! is also reported as on.

use super::codec::parse_reply;
use super::command::READ_STATUS_COMMAND;
use super::packet::{SerialPacket, REPLY_END};
use super::LINE;
use crate::error::{RigError, RigResult};
use crate::hardware::Transport;
use std::fmt;
use tracing::debug;

/// Names of the status flags, in wire order.
pub const STATUS_FLAGS: [&str; 37] = [
    // Byte 1
    "rtd1_open_fault",
    "rtd1_shorted_fault",
    "rtd1_open",
    "rtd1_shorted",
    "rtd3_open_fault",
    "rtd3_shorted_fault",
    "rtd3_open",
    "rtd3_shorted",
    // Byte 2
    "rtd2_open_fault",
    "rtd2_shorted_fault",
    "rtd2_open_warn",
    "rtd2_shorted_warn",
    "rtd2_open",
    "rtd2_shorted",
    "refrig_high_temp",
    "htc_fault",
    // Byte 3
    "high_fixed_temp_fault",
    "low_fixed_temp_fault",
    "high_temp_fault",
    "low_temp_fault",
    "low_level_fault",
    "high_temp_warn",
    "low_temp_warn",
    "low_level_warn",
    // Byte 4
    "buzzer_on",
    "alarm_muted",
    "unit_faulted",
    "unit_stopping",
    "unit_on",
    "pump_on",
    "compressor_on",
    "heater_on",
    // Byte 5
    "rtd2_controlling",
    "heat_led_flashing",
    "heat_led_on",
    "cool_led_flashing",
    "cool_led_on",
];

const STATUS_DATA_BYTES: usize = 5;
const ERROR_MARKERS: [&str; 4] = ["fault", "warn", "shorted", "refrig_high_temp"];

/// Whether a raised `flag` is something to worry about.
pub fn is_error_flag(flag: &str) -> bool {
    ERROR_MARKERS.iter().any(|marker| flag.contains(marker))
}

/// Decoded status registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaterBathStatus {
    bits: [bool; 37],
}

impl Default for WaterBathStatus {
    fn default() -> Self {
        Self { bits: [false; 37] }
    }
}

impl WaterBathStatus {
    /// Decode the five data bytes of a status reply.
    pub fn from_data(data: &[u8]) -> RigResult<Self> {
        if data.len() != STATUS_DATA_BYTES {
            return Err(RigError::Protocol(format!(
                "Status reply must carry {STATUS_DATA_BYTES} data bytes, got {}",
                data.len()
            )));
        }

        let mut bits = [false; 37];
        for (index, bit) in bits.iter_mut().enumerate() {
            *bit = data[index / 8] & (0x80 >> (index % 8)) != 0;
        }
        Ok(Self { bits })
    }

    /// Build a status with the named flags raised.
    ///
    /// Unknown names are ignored.
    pub fn with_flags(flags: &[&str]) -> Self {
        let mut status = Self::default();
        for flag in flags {
            if let Some(index) = STATUS_FLAGS.iter().position(|name| name == flag) {
                status.bits[index] = true;
            }
        }
        status
    }

    /// Encode back to the five wire bytes.
    pub fn to_data(&self) -> [u8; STATUS_DATA_BYTES] {
        let mut data = [0u8; STATUS_DATA_BYTES];
        for (index, _) in self.bits.iter().enumerate().filter(|(_, bit)| **bit) {
            data[index / 8] |= 0x80 >> (index % 8);
        }
        data
    }

    /// Whether `flag` is raised; unknown names are never set.
    pub fn is_set(&self, flag: &str) -> bool {
        STATUS_FLAGS
            .iter()
            .position(|name| *name == flag)
            .is_some_and(|index| self.bits[index])
    }

    /// Every raised flag.
    pub fn active(&self) -> Vec<&'static str> {
        STATUS_FLAGS
            .iter()
            .zip(self.bits)
            .filter(|(_, bit)| *bit)
            .map(|(name, _)| *name)
            .collect()
    }

    /// Raised flags that indicate a fault or warning.
    pub fn errors(&self) -> Vec<&'static str> {
        self.active().into_iter().filter(|flag| is_error_flag(flag)).collect()
    }
}

impl fmt::Display for WaterBathStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.active().join(", "))
    }
}

/// Read the current status registers.
pub fn get_water_bath_status<T: Transport + ?Sized>(
    transport: &T,
    port: &str,
) -> RigResult<WaterBathStatus> {
    let packet = SerialPacket::new(READ_STATUS_COMMAND, Vec::new())?;
    let raw = transport.exchange(port, &LINE, &packet.to_bytes(), &REPLY_END)?;
    let reply = parse_reply(&raw)?;
    if reply.command != READ_STATUS_COMMAND {
        return Err(RigError::Protocol(format!(
            "Status reply echoes command byte 0x{:02X}",
            reply.command
        )));
    }

    let status = WaterBathStatus::from_data(&reply.data)?;
    debug!(status = %status, "Water bath status");
    Ok(status)
}

/// Fail if any fault or warning flag is raised.
///
/// # Errors
/// [`RigError::WaterBathStatus`] with the names of the raised error flags.
pub fn assert_status_ok<T: Transport + ?Sized>(transport: &T, port: &str) -> RigResult<()> {
    let errors = get_water_bath_status(transport, port)?.errors();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(RigError::WaterBathStatus(
            errors.into_iter().map(str::to_string).collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_status_has_no_flags_raised() {
        let status = WaterBathStatus::default();
        assert!(status.active().is_empty());
        assert_eq!(status.to_data(), [0u8; 5]);
        assert_eq!(status, WaterBathStatus::with_flags(&[]));
    }

    #[test]
    fn decodes_status_observed_while_running() {
        let packet =
            SerialPacket::from_bytes(b"\xCA\x00\x01\x09\x05\x00\x00\x00\x0E\x08\xDA").unwrap();
        let status = WaterBathStatus::from_data(&packet.data).unwrap();
        assert_eq!(
            status.active(),
            vec!["unit_on", "pump_on", "compressor_on", "cool_led_on"]
        );
        assert!(status.errors().is_empty());
    }

    #[test]
    fn errors_pick_faults_and_warnings() {
        let status = WaterBathStatus::with_flags(&[
            "rtd2_open_warn",
            "low_level_fault",
            "rtd2_shorted",
            "pump_on",
        ]);
        assert_eq!(
            status.errors(),
            vec!["rtd2_open_warn", "rtd2_shorted", "low_level_fault"]
        );
    }

    #[test]
    fn error_markers_select_expected_flags() {
        let error_flags: Vec<&str> = STATUS_FLAGS
            .iter()
            .copied()
            .filter(|flag| is_error_flag(flag))
            .collect();
        assert!(error_flags.contains(&"refrig_high_temp"));
        assert!(error_flags.contains(&"htc_fault"));
        assert!(error_flags.contains(&"rtd1_shorted"));
        assert!(!error_flags.contains(&"rtd1_open"));
        assert!(!error_flags.contains(&"unit_on"));
        assert!(!error_flags.contains(&"cool_led_on"));
        assert!(error_flags.contains(&"unit_faulted"));
        assert_eq!(error_flags.len(), 22);
    }

    #[test]
    fn data_round_trips() {
        let status = WaterBathStatus::with_flags(&["rtd1_open_fault", "cool_led_on", "heater_on"]);
        assert_eq!(WaterBathStatus::from_data(&status.to_data()).unwrap(), status);
    }

    #[test]
    fn wrong_length_is_protocol_error() {
        assert!(matches!(
            WaterBathStatus::from_data(&[0, 0, 0]),
            Err(RigError::Protocol(_))
        ));
    }
}
