//! Hardware drivers for the calibration rig.
//!
//! Every device on the rig sits behind a serial link and follows a strict
//! one-command/one-reply exchange. Drivers never open ports themselves: they
//! build command bytes, hand them to a [`Transport`] together with the port
//! name, the device's fixed line settings and a description of where the reply
//! ends, and then parse the raw reply.
//!
//! - [`serial_port::SerialTransport`] talks to real hardware via `serialport`.
//! - [`simulated::SimulatedRig`] emulates all three devices in memory; it backs
//!   `--dry-run` and the integration tests.
//! - [`scripted::ScriptedTransport`] replays canned replies for driver tests.
//!
//! # Devices
//!
//! - [`water_bath`]: Thermo Scientific NESLAB RTE temperature-controlled bath
//!   (binary NC serial protocol).
//! - [`gas_mixer`]: Alicat mix controller feeding N2 and an O2 source gas
//!   (ASCII, `\r` terminated).
//! - [`ysi`]: YSI reference probe for DO, temperature and barometric pressure.

pub mod gas_mixer;
pub mod scripted;
pub mod serial_port;
pub mod simulated;
pub mod water_bath;
pub mod ysi;

pub use scripted::ScriptedTransport;
pub use serial_port::{LineSettings, ResponseEnd, SerialTransport};
pub use simulated::{SimulatedDevice, SimulatedRig};

use crate::error::RigResult;
use std::sync::Arc;

/// A half-duplex command/response link to a device.
///
/// Implementations must guarantee that a given port is never used by two
/// in-flight exchanges at the same time.
pub trait Transport: Send + Sync {
    /// Write `command` to `port` and block until the reply is complete per `end`.
    ///
    /// # Errors
    /// - [`RigError::Port`](crate::error::RigError::Port) if the port cannot be used
    /// - [`RigError::Timeout`](crate::error::RigError::Timeout) if the reply is not
    ///   complete before `line.timeout` elapses (including when nothing arrives)
    fn exchange(
        &self,
        port: &str,
        line: &LineSettings,
        command: &[u8],
        end: &ResponseEnd,
    ) -> RigResult<Vec<u8>>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn exchange(
        &self,
        port: &str,
        line: &LineSettings,
        command: &[u8],
        end: &ResponseEnd,
    ) -> RigResult<Vec<u8>> {
        (**self).exchange(port, line, command, end)
    }
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn exchange(
        &self,
        port: &str,
        line: &LineSettings,
        command: &[u8],
        end: &ResponseEnd,
    ) -> RigResult<Vec<u8>> {
        (**self).exchange(port, line, command, end)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn exchange(
        &self,
        port: &str,
        line: &LineSettings,
        command: &[u8],
        end: &ResponseEnd,
    ) -> RigResult<Vec<u8>> {
        (**self).exchange(port, line, command, end)
    }
}

/// Format bytes as `0xCA 0x00 0x01 ...` for log lines and error messages.
pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|byte| format!("0x{byte:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
