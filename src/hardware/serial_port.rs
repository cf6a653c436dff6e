//! Blocking serial transport.
//!
//! Each exchange opens the named port, writes the command, reads until the
//! reply is complete or the deadline passes, and closes the port again. No
//! connection is kept between calls, so a device that is power-cycled or
//! re-plugged between setpoints is picked up on the next exchange.
//!
//! The line configuration (baud rate, 8N1, no flow control) is mandated by each
//! device's firmware and is therefore fixed per driver rather than configurable.

use super::{hex, Transport};
use crate::error::{RigError, RigResult};
use serialport::{DataBits, FlowControl, Parity, StopBits};
use std::collections::HashMap;
use std::io::{ErrorKind, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Fixed line parameters of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSettings {
    /// Communication speed (e.g. 19200)
    pub baud_rate: u32,
    /// Deadline for the complete reply, measured from the end of the write
    pub timeout: Duration,
}

impl LineSettings {
    /// Line at `baud_rate` with a reply deadline of `timeout`.
    pub const fn new(baud_rate: u32, timeout: Duration) -> Self {
        Self { baud_rate, timeout }
    }
}

/// Describes where a device reply ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseEnd {
    /// Reply is complete once the buffer ends with these bytes.
    Terminator(&'static [u8]),
    /// Reply carries its own length: the byte at `count_index` is the number of
    /// data bytes, and `overhead` bytes of framing surround them. `max_len`
    /// caps the read if the count byte is garbage.
    LengthPrefixed {
        /// Index of the data byte count
        count_index: usize,
        /// Framing bytes around the data
        overhead: usize,
        /// Longest possible reply
        max_len: usize,
    },
}

impl ResponseEnd {
    /// Whether `buffer` holds a complete reply.
    pub fn is_complete(&self, buffer: &[u8]) -> bool {
        match self {
            ResponseEnd::Terminator(terminator) => {
                !buffer.is_empty() && buffer.ends_with(terminator)
            }
            ResponseEnd::LengthPrefixed {
                count_index,
                overhead,
                max_len,
            } => {
                if buffer.len() >= *max_len {
                    return true;
                }
                buffer
                    .get(*count_index)
                    .is_some_and(|count| buffer.len() >= overhead + usize::from(*count))
            }
        }
    }
}

/// One mutex per port name, so two exchanges never share a port.
#[derive(Debug, Default)]
pub struct PortLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PortLocks {
    /// Get (or create) the lock guarding `port`.
    pub fn lock_for(&self, port: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(port.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// [`Transport`] over real serial ports.
///
/// Cheap to share: wrap it in an `Arc` and hand clones to every driver.
#[derive(Debug, Default)]
pub struct SerialTransport {
    locks: PortLocks,
}

impl SerialTransport {
    /// Transport with no ports locked yet.
    pub fn new() -> Self {
        Self::default()
    }

    fn read_reply(
        port: &str,
        connection: &mut dyn serialport::SerialPort,
        line: &LineSettings,
        end: &ResponseEnd,
    ) -> RigResult<Vec<u8>> {
        let deadline = Instant::now() + line.timeout;
        let mut reply = Vec::new();
        let mut chunk = [0u8; 64];

        while !end.is_complete(&reply) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(RigError::Timeout {
                    port: port.to_string(),
                    received: reply.len(),
                });
            }

            connection
                .set_timeout(remaining)
                .map_err(|source| port_error(port, source))?;

            match connection.read(&mut chunk) {
                Ok(count) => reply.extend_from_slice(&chunk[..count]),
                Err(e) if e.kind() == ErrorKind::TimedOut => {
                    trace!(port, received = reply.len(), "serial read timed out");
                }
                Err(e) => return Err(port_error(port, e.into())),
            }
        }

        Ok(reply)
    }
}

impl Transport for SerialTransport {
    fn exchange(
        &self,
        port: &str,
        line: &LineSettings,
        command: &[u8],
        end: &ResponseEnd,
    ) -> RigResult<Vec<u8>> {
        let lock = self.locks.lock_for(port);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        debug!(port, command = %hex(command), "Serial command");

        let mut connection = serialport::new(port, line.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(line.timeout)
            .open()
            .map_err(|source| port_error(port, source))?;

        connection
            .write_all(command)
            .and_then(|()| connection.flush())
            .map_err(|e| port_error(port, e.into()))?;

        let reply = Self::read_reply(port, connection.as_mut(), line, end)?;

        debug!(port, reply = %hex(&reply), "Serial response");
        Ok(reply)
    }
}

fn port_error(port: &str, source: serialport::Error) -> RigError {
    RigError::Port {
        port: port.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BATH_REPLY: ResponseEnd = ResponseEnd::LengthPrefixed {
        count_index: 4,
        overhead: 6,
        max_len: 14,
    };

    #[test]
    fn terminator_end_requires_full_terminator() {
        let end = ResponseEnd::Terminator(b"\r\n$ACK\r\n");
        assert!(!end.is_complete(b""));
        assert!(!end.is_complete(b"$49.9\r\n"));
        assert!(end.is_complete(b"$49.9\r\n$ACK\r\n"));
    }

    #[test]
    fn length_prefixed_end_waits_for_count_and_checksum() {
        assert!(!BATH_REPLY.is_complete(b""));
        assert!(!BATH_REPLY.is_complete(b"\xCA\x00\x01\x20"));
        assert!(!BATH_REPLY.is_complete(b"\xCA\x00\x01\x20\x03\x11\x02\x71"));
        assert!(BATH_REPLY.is_complete(b"\xCA\x00\x01\x20\x03\x11\x02\x71\x57"));
        assert!(BATH_REPLY.is_complete(b"\xCA\x00\x01\x20\x00\xDE"));
    }

    #[test]
    fn length_prefixed_end_caps_at_max_len() {
        let garbage = [0xFFu8; 14];
        assert!(BATH_REPLY.is_complete(&garbage));
    }

    #[test]
    fn port_locks_are_shared_per_name() {
        let locks = PortLocks::default();
        let a = locks.lock_for("COM21");
        let b = locks.lock_for("COM21");
        let c = locks.lock_for("COM22");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn missing_port_is_a_port_error() {
        let transport = SerialTransport::new();
        let result = transport.exchange(
            "/dev/this-port-does-not-exist",
            &LineSettings::new(19200, Duration::from_millis(10)),
            b"\xCA\x00\x01\x20\x00\xDE",
            &BATH_REPLY,
        );
        assert!(matches!(result, Err(RigError::Port { .. })));
    }

    #[cfg(unix)]
    mod pty {
        use super::*;
        use crate::hardware::water_bath::{decode, Command, SerialPacket};
        use serialport::TTYPort;

        const LINE: LineSettings = LineSettings::new(19200, Duration::from_millis(200));

        fn read_setpoint_reply() -> Vec<u8> {
            SerialPacket::new(0x70, vec![0x21, 0x0A, 0xE1])
                .unwrap()
                .to_bytes()
        }

        #[test]
        fn complete_reply_is_returned() {
            let (mut device, mut host) = TTYPort::pair().unwrap();
            device.write_all(&read_setpoint_reply()).unwrap();

            let reply = SerialTransport::read_reply("pty", &mut host, &LINE, &BATH_REPLY).unwrap();

            assert_eq!(reply, read_setpoint_reply());
            assert_eq!(decode(Command::ReadSetpoint, &reply).unwrap(), 27.85);
        }

        #[test]
        fn partial_reply_times_out_with_byte_count() {
            let (mut device, mut host) = TTYPort::pair().unwrap();
            device.write_all(&read_setpoint_reply()[..4]).unwrap();

            let result = SerialTransport::read_reply("pty", &mut host, &LINE, &BATH_REPLY);

            assert!(matches!(
                result,
                Err(RigError::Timeout { ref port, received: 4 }) if port == "pty"
            ));
        }

        #[test]
        fn silent_device_times_out_empty() {
            let (_device, mut host) = TTYPort::pair().unwrap();

            let started = Instant::now();
            let result = SerialTransport::read_reply("pty", &mut host, &LINE, &BATH_REPLY);

            assert!(matches!(result, Err(RigError::Timeout { received: 0, .. })));
            assert!(started.elapsed() >= LINE.timeout);
        }
    }
}
