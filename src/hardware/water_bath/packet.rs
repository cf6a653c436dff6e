//! NC serial protocol framing.
//!
//! The framing of the communications packet in both directions is:
//!
//! ```text
//! Prefix     0xCA (RS-232)
//! Addr-MSB   0x00
//! Addr-LSB   0x01 for RS-232
//! Command    command byte
//! n d-bytes  number of data bytes to follow (0x00 to 0x08)
//! d-byte 1..n
//! Checksum   bitwise inversion of the one byte sum of Addr-MSB through d-byte n
//! ```
//!
//! The bath is half-duplex: it only ever speaks in reply to a packet from us,
//! echoing prefix, address and command byte.

use crate::error::{RigError, RigResult};
use crate::hardware::hex;
use crate::hardware::ResponseEnd;
use std::fmt;

/// First byte of every RS-232 packet.
pub const PREFIX: u8 = 0xCA;
/// Device address, high byte.
pub const DEVICE_ADDRESS_MSB: u8 = 0x00;
/// Device address, low byte.
pub const DEVICE_ADDRESS_LSB: u8 = 0x01;
/// Longest data field of any packet.
pub const MAX_DATA_BYTES: usize = 8;

const HEADER_LEN: usize = 5;

/// How to tell when a bath reply has fully arrived.
pub const REPLY_END: ResponseEnd = ResponseEnd::LengthPrefixed {
    count_index: HEADER_LEN - 1,
    overhead: HEADER_LEN + 1,
    max_len: HEADER_LEN + MAX_DATA_BYTES + 1,
};

/// A validated packet. Prefix and address are fixed for RS-232, so only the
/// command byte and the data are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPacket {
    /// Command byte
    pub command: u8,
    /// Data bytes, at most [`MAX_DATA_BYTES`]
    pub data: Vec<u8>,
}

impl SerialPacket {
    /// Build a packet for `command` carrying `data`.
    ///
    /// # Errors
    /// [`RigError::Protocol`] if more than eight data bytes are given.
    pub fn new(command: u8, data: impl Into<Vec<u8>>) -> RigResult<Self> {
        let data = data.into();
        if data.len() > MAX_DATA_BYTES {
            return Err(RigError::Protocol(format!(
                "Packets carry at most {MAX_DATA_BYTES} data bytes, got {}",
                data.len()
            )));
        }
        Ok(Self { command, data })
    }

    /// Parse and validate raw bytes received from the bath.
    pub fn from_bytes(bytes: &[u8]) -> RigResult<Self> {
        if bytes.len() < HEADER_LEN + 1 {
            return Err(invalid(bytes, vec![format!(
                "packet too short ({} bytes)",
                bytes.len()
            )]));
        }

        let data = &bytes[HEADER_LEN..bytes.len() - 1];
        let declared_count = usize::from(bytes[4]);
        let checksum = bytes[bytes.len() - 1];
        let expected_checksum = checksum_of(&bytes[1..bytes.len() - 1]);

        let checks = [
            ("prefix", usize::from(bytes[0]), usize::from(PREFIX)),
            ("addr msb", usize::from(bytes[1]), usize::from(DEVICE_ADDRESS_MSB)),
            ("addr lsb", usize::from(bytes[2]), usize::from(DEVICE_ADDRESS_LSB)),
            ("data bytes count", declared_count, data.len()),
            ("checksum", usize::from(checksum), usize::from(expected_checksum)),
        ];
        let errors: Vec<String> = checks
            .iter()
            .filter(|(_, actual, expected)| actual != expected)
            .map(|(name, actual, expected)| {
                format!("{name} actual (0x{actual:02X}) != expected (0x{expected:02X})")
            })
            .collect();

        if !errors.is_empty() {
            return Err(invalid(bytes, errors));
        }

        Self::new(bytes[3], data)
    }

    /// Everything between prefix and checksum.
    fn message_bytes(&self) -> Vec<u8> {
        let mut message = Vec::with_capacity(HEADER_LEN - 1 + self.data.len());
        message.extend_from_slice(&[DEVICE_ADDRESS_MSB, DEVICE_ADDRESS_LSB, self.command]);
        // new() caps data at eight bytes
        message.push(self.data.len() as u8);
        message.extend_from_slice(&self.data);
        message
    }

    /// Checksum over address, command, count and data.
    pub fn checksum(&self) -> u8 {
        checksum_of(&self.message_bytes())
    }

    /// Full packet as sent on the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        let message = self.message_bytes();
        let checksum = checksum_of(&message);
        let mut bytes = Vec::with_capacity(message.len() + 2);
        bytes.push(PREFIX);
        bytes.extend_from_slice(&message);
        bytes.push(checksum);
        bytes
    }
}

impl fmt::Display for SerialPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex(&self.to_bytes()))
    }
}

/// One byte sum of `message`, XORed with 0xFF.
pub fn checksum_of(message: &[u8]) -> u8 {
    message.iter().fold(0u8, |sum, byte| sum.wrapping_add(*byte)) ^ 0xFF
}

fn invalid(bytes: &[u8], errors: Vec<String>) -> RigError {
    RigError::Protocol(format!(
        "Unable to parse response from water bath. Response bytes: [{}]. Errors: {}. \
         Possible solution: ensure the bath is in 'serial communication' mode",
        hex(bytes),
        errors.join(", ")
    ))
}
