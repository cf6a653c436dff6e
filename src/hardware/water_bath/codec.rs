//! Encoding of data-plane commands and decoding of the bath's replies.
//!
//! When the bath sends data, a qualifier byte comes first, followed by a two
//! byte signed integer (MSB first). The qualifier gives precision and units:
//!
//! | qualifier | precision | units |
//! |---|---|---|
//! | 0x10 | 0.1 | none |
//! | 0x11 | 0.1 | °C |
//! | 0x20 | 0.01 | none |
//! | 0x21 | 0.01 | °C |
//!
//! e.g. 62.5 °C at 0.1 precision arrives as `11 02 71` (625 = 0x0271).
//!
//! Set commands carry no qualifier. The value is sent as the same two byte
//! integer, pre-scaled by the precision the bath is configured for. We always
//! run the bath at 0.01 precision (see `initialize`), so a reply in any other
//! precision means the bath was reconfigured behind our back.

use super::command::{Command, ERROR_RESPONSE_COMMAND};
use super::packet::SerialPacket;
use crate::error::{RigError, RigResult};
use crate::hardware::hex;

/// Reporting precision of numeric values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    /// 0.1
    Tenth,
    /// 0.01
    Hundredth,
}

impl Precision {
    /// Precision named by a qualifier byte, ignoring units.
    pub fn from_qualifier(qualifier: u8) -> Option<Self> {
        match qualifier {
            0x10 | 0x11 => Some(Precision::Tenth),
            0x20 | 0x21 => Some(Precision::Hundredth),
            _ => None,
        }
    }

    /// Integer counts per unit.
    pub const fn scale(self) -> f64 {
        match self {
            Precision::Tenth => 10.0,
            Precision::Hundredth => 100.0,
        }
    }

    /// Smallest representable change.
    pub fn step(self) -> f64 {
        1.0 / self.scale()
    }
}

/// Precision the bath is initialized to and that set commands are encoded with.
pub const REPORTING_PRECISION: Precision = Precision::Hundredth;

/// Build the command packet for `command`.
///
/// Read commands must not carry data; set commands must.
///
/// # Errors
/// [`RigError::Protocol`] if data presence doesn't match the command, or the
/// value is not finite or doesn't fit in a signed 16-bit count.
pub fn encode_packet(command: Command, data: Option<f64>) -> RigResult<SerialPacket> {
    let data_bytes = match (command.is_set(), data) {
        (false, None) => Vec::new(),
        (true, Some(value)) => encode_value(command, value)?.to_vec(),
        (false, Some(value)) => {
            return Err(RigError::Protocol(format!(
                "'{command}' is a read command and takes no data (got {value})"
            )))
        }
        (true, None) => {
            return Err(RigError::Protocol(format!(
                "'{command}' is a set command and requires a value"
            )))
        }
    };

    SerialPacket::new(command.code(), data_bytes)
}

/// Encode `command` (plus optional value) into the bytes sent to the bath.
pub fn encode(command: Command, data: Option<f64>) -> RigResult<Vec<u8>> {
    Ok(encode_packet(command, data)?.to_bytes())
}

fn encode_value(command: Command, value: f64) -> RigResult<[u8; 2]> {
    let counts = (value * REPORTING_PRECISION.scale()).round();
    if !counts.is_finite() || counts < f64::from(i16::MIN) || counts > f64::from(i16::MAX) {
        return Err(RigError::Protocol(format!(
            "Value {value} for '{command}' cannot be encoded at precision {}",
            REPORTING_PRECISION.step()
        )));
    }
    // Range checked above
    Ok((counts as i16).to_be_bytes())
}

/// Parse a raw reply and surface the bath's error packet as an error.
pub fn parse_reply(raw: &[u8]) -> RigResult<SerialPacket> {
    let packet = SerialPacket::from_bytes(raw)?;
    check_for_error_response(&packet)?;
    Ok(packet)
}

/// Decode the bath's reply to `command` into a value.
///
/// # Errors
/// - [`RigError::Protocol`] if the reply is malformed, echoes a different command,
///   or doesn't carry exactly qualifier + two bytes
/// - [`RigError::BathErrorResponse`] if the bath rejected the command
/// - [`RigError::PrecisionMismatch`] if the bath isn't reporting at 0.01
pub fn decode(command: Command, raw: &[u8]) -> RigResult<f64> {
    let packet = parse_reply(raw)?;

    if packet.command != command.code() {
        return Err(RigError::Protocol(format!(
            "Reply to '{command}' echoes command byte 0x{:02X}, expected 0x{:02X}",
            packet.command,
            command.code()
        )));
    }

    parse_qualified_value(&packet.data, REPORTING_PRECISION)
}

/// Parse qualifier + signed 16-bit value, requiring `expected` precision.
pub fn parse_qualified_value(data: &[u8], expected: Precision) -> RigResult<f64> {
    let [qualifier, msb, lsb] = data else {
        return Err(RigError::Protocol(format!(
            "Expected 3 data bytes (qualifier + value), got [{}]",
            hex(data)
        )));
    };

    let precision = Precision::from_qualifier(*qualifier).ok_or_else(|| {
        RigError::Protocol(format!("Unknown qualifier byte 0x{qualifier:02X}"))
    })?;

    if precision != expected {
        return Err(RigError::PrecisionMismatch {
            reported: precision.step(),
            expected: expected.step(),
        });
    }

    let counts = i16::from_be_bytes([*msb, *lsb]);
    Ok(f64::from(counts) / precision.scale())
}

fn check_for_error_response(packet: &SerialPacket) -> RigResult<()> {
    if packet.command != ERROR_RESPONSE_COMMAND {
        return Ok(());
    }

    let error = match packet.data.first() {
        Some(0x01) => "Bad Command",
        Some(0x03) => "Bad Checksum",
        _ => "Unknown",
    };

    Err(RigError::BathErrorResponse {
        error: error.to_string(),
        echoed_command: packet.data.get(1).copied().unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(command: u8, data: &[u8]) -> Vec<u8> {
        SerialPacket::new(command, data.to_vec()).unwrap().to_bytes()
    }

    #[test]
    fn encodes_read_commands_without_data() {
        let cases: [(Command, &[u8]); 11] = [
            (Command::ReadInternalTemperature, b"\xCA\x00\x01\x20\x00\xDE"),
            (Command::ReadExternalSensor, b"\xCA\x00\x01\x21\x00\xDD"),
            (Command::ReadSetpoint, b"\xCA\x00\x01\x70\x00\x8E"),
            (Command::ReadLowTemperatureLimit, b"\xCA\x00\x01\x40\x00\xBE"),
            (Command::ReadHighTemperatureLimit, b"\xCA\x00\x01\x60\x00\x9E"),
            (Command::ReadHeatProportionalBand, b"\xCA\x00\x01\x71\x00\x8D"),
            (Command::ReadHeatIntegral, b"\xCA\x00\x01\x72\x00\x8C"),
            (Command::ReadHeatDerivative, b"\xCA\x00\x01\x73\x00\x8B"),
            (Command::ReadCoolProportionalBand, b"\xCA\x00\x01\x74\x00\x8A"),
            (Command::ReadCoolIntegral, b"\xCA\x00\x01\x75\x00\x89"),
            (Command::ReadCoolDerivative, b"\xCA\x00\x01\x76\x00\x88"),
        ];
        for (command, expected) in cases {
            assert_eq!(hex(&encode(command, None).unwrap()), hex(expected), "{command}");
        }
    }

    #[test]
    fn encodes_setpoints_at_hundredth_precision() {
        let cases: [(f64, &[u8]); 4] = [
            (3.00, b"\xCA\x00\x01\xF0\x02\x01\x2C\xDF"),
            (6.25, b"\xCA\x00\x01\xF0\x02\x02\x71\x99"),
            (30.0, b"\xCA\x00\x01\xF0\x02\x0B\xB8\x49"),
            (62.5, b"\xCA\x00\x01\xF0\x02\x18\x6A\x8A"),
        ];
        for (value, expected) in cases {
            assert_eq!(
                hex(&encode(Command::SetSetpoint, Some(value)).unwrap()),
                hex(expected),
                "{value}"
            );
        }
    }

    #[test]
    fn negative_values_use_twos_complement() {
        let bytes = encode(Command::SetLowTemperatureLimit, Some(-10.5)).unwrap();
        assert_eq!(&bytes[5..7], &(-1050i16).to_be_bytes());
    }

    #[test]
    fn data_presence_must_match_command_kind() {
        assert!(matches!(
            encode(Command::ReadSetpoint, Some(1.0)),
            Err(RigError::Protocol(_))
        ));
        assert!(matches!(
            encode(Command::SetSetpoint, None),
            Err(RigError::Protocol(_))
        ));
        assert!(matches!(
            encode(Command::SetSetpoint, Some(f64::NAN)),
            Err(RigError::Protocol(_))
        ));
        assert!(matches!(
            encode(Command::SetSetpoint, Some(400.0)),
            Err(RigError::Protocol(_))
        ));
    }

    #[test]
    fn parses_qualified_values() {
        let cases: [(&[u8], Precision, f64); 6] = [
            (b"\x11\x02\x71", Precision::Tenth, 62.5),
            (b"\x11\x01\x2C", Precision::Tenth, 30.0),
            (b"\x10\x02\x71", Precision::Tenth, 62.5),
            (b"\x21\x02\x71", Precision::Hundredth, 6.25),
            (b"\x21\x01\x2C", Precision::Hundredth, 3.00),
            (b"\x20\x01\x2C", Precision::Hundredth, 3.00),
        ];
        for (data, precision, expected) in cases {
            assert_eq!(parse_qualified_value(data, precision).unwrap(), expected);
        }
    }

    #[test]
    fn precision_mismatch_is_reported() {
        for (data, expected) in [
            (&b"\x11\x01\x2C"[..], Precision::Hundredth),
            (&b"\x21\x01\x2C"[..], Precision::Tenth),
        ] {
            assert!(matches!(
                parse_qualified_value(data, expected),
                Err(RigError::PrecisionMismatch { .. })
            ));
        }
    }

    #[test]
    fn wrong_data_length_or_qualifier_is_protocol_error() {
        assert!(matches!(
            parse_qualified_value(b"\x21\x01", Precision::Hundredth),
            Err(RigError::Protocol(_))
        ));
        assert!(matches!(
            parse_qualified_value(b"\x33\x01\x2C", Precision::Hundredth),
            Err(RigError::Protocol(_))
        ));
    }

    #[test]
    fn set_setpoint_acknowledgment_recovers_value() {
        for value in [27.85, 0.01, 99.99, 3.0, -5.25] {
            let command = encode_packet(Command::SetSetpoint, Some(value)).unwrap();
            let mut echoed = vec![0x21];
            echoed.extend_from_slice(&command.data);
            let value_back = decode(Command::SetSetpoint, &reply(0xF0, &echoed)).unwrap();
            assert_eq!(value_back, value);
        }
    }

    #[test]
    fn decode_rejects_mismatched_echo() {
        let raw = reply(0x21, b"\x21\x0A\xE1");
        assert!(matches!(
            decode(Command::ReadInternalTemperature, &raw),
            Err(RigError::Protocol(_))
        ));
    }

    #[test]
    fn decode_surfaces_error_packets() {
        let err = decode(Command::ReadSetpoint, b"\xCA\x00\x01\x0F\x02\x01\x99\x53").unwrap_err();
        match err {
            RigError::BathErrorResponse {
                error,
                echoed_command,
            } => {
                assert_eq!(error, "Bad Command");
                assert_eq!(echoed_command, 0x99);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = decode(Command::ReadSetpoint, &reply(0x0F, b"\x03\x70")).unwrap_err();
        assert!(err.to_string().contains("Bad Checksum"));
    }

    #[test]
    fn decode_of_empty_reply_is_protocol_error() {
        assert!(matches!(
            decode(Command::ReadInternalTemperature, b""),
            Err(RigError::Protocol(_))
        ));
    }
}
