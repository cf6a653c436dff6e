//! Custom error types for the calibration rig.
//!
//! `RigError` is the single error type returned by the library. It is built with
//! `thiserror`, so every variant carries a human readable message and underlying
//! sources (`serialport`, `csv`, `figment`, I/O) convert with `?`.
//!
//! ## Error Hierarchy
//!
//! - **Transport**: `Port` (the named serial port cannot be opened or used) and
//!   `Timeout` (no complete reply before the read deadline).
//! - **Protocol**: `Protocol` (reply bytes do not have the shape expected for the
//!   command issued), `BathErrorResponse` (the bath answered with its error packet)
//!   and `PrecisionMismatch` (the bath reports with a different precision than the
//!   one used to encode set commands).
//! - **Settings**: `InvalidSetting` (an on/off array position holds a code outside
//!   `{0, 1, 2}`) and `Initialization` (the bath did not echo the configuration
//!   `initialize` asked for).
//! - **Device health**: `WaterBathStatus`, `UnexpectedMixerResponse`, `GasMixerStatus`.
//! - **Run control**: `InvalidSetpoints` and `CalibrationAbort`, raised by the
//!   calibration loop before it commands any hardware for a setpoint.
//! - **Plumbing**: `Config`, `Configuration`, `Csv`, `Io`.
//!
//! Nothing here is retried. Every failure propagates to the caller of the public
//! entry points, and the CLI turns it into a non-zero exit.

use thiserror::Error;

/// Convenience alias for results using the rig error type.
pub type RigResult<T> = std::result::Result<T, RigError>;

/// Every way an exchange with the rig, or a run, can fail.
#[derive(Error, Debug)]
pub enum RigError {
    /// The port could not be opened, configured, written or read.
    #[error("Serial port '{port}' could not be opened or used: {source}")]
    Port {
        /// Port name as configured
        port: String,
        /// Underlying serial error
        #[source]
        source: serialport::Error,
    },

    /// No complete reply arrived before the line timeout.
    #[error("Timed out waiting for a complete reply on '{port}' ({received} bytes received)")]
    Timeout {
        /// Port name as configured
        port: String,
        /// Bytes that did arrive
        received: usize,
    },

    /// A reply was malformed.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The bath answered with an error packet.
    #[error("Water bath responded with error '{error}' (command byte echoed as 0x{echoed_command:02X})")]
    BathErrorResponse {
        /// Error name decoded from the reply
        error: String,
        /// Command byte the bath echoed back
        echoed_command: u8,
    },

    /// The bath reports at a precision commands are not encoded for.
    #[error(
        "Water bath reports with precision {reported} but commands are encoded with {expected}. \
         Run initialize() to set the bath to the expected precision"
    )]
    PrecisionMismatch {
        /// Precision of the reply
        reported: f64,
        /// Precision commands are encoded with
        expected: f64,
    },

    /// A settings code outside 0..=2.
    #[error("Invalid setting code {code} at position {position} (valid codes: 0 = off, 1 = on, 2 = unchanged)")]
    InvalidSetting {
        /// 1-based position in the settings array
        position: usize,
        /// Offending code
        code: u8,
    },

    /// Settings read back after initialization were not as requested.
    #[error("Water bath initialization failed: {}", .0.join("; "))]
    Initialization(Vec<String>),

    /// Error flags raised in the bath status.
    #[error("Water bath status reports problems: {}", .0.join(", "))]
    WaterBathStatus(Vec<String>),

    /// The mixer replied with something other than the expected echo.
    #[error("Unexpected gas mixer response to '{command}': expected '{expected}', got '{actual}'")]
    UnexpectedMixerResponse {
        /// Command sent, without the carriage return
        command: String,
        /// Reply that was expected
        expected: String,
        /// Reply that arrived
        actual: String,
    },

    /// The mixer reports an alarm or a bad state.
    #[error("Gas mixer status reports problems: {}", .0.join(", "))]
    GasMixerStatus(Vec<String>),

    /// `(index, reasons)` for each setpoint that cannot be run.
    #[error("Setpoint sequence contains invalid setpoints: {}", format_setpoint_errors(.0))]
    InvalidSetpoints(Vec<(usize, Vec<String>)>),

    /// A pre-flight status check failed.
    #[error("Calibration aborted: {}", .0.join("; "))]
    CalibrationAbort(Vec<String>),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but holds unusable values.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Reading setpoints or writing calibration rows failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for RigError {
    fn from(err: figment::Error) -> Self {
        RigError::Config(Box::new(err))
    }
}

fn format_setpoint_errors(errors: &[(usize, Vec<String>)]) -> String {
    errors
        .iter()
        .map(|(row, problems)| format!("row {row}: {}", problems.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}
