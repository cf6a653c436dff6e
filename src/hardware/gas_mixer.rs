//! Alicat mix controller driver
//!
//! The rig has one mix controller (device id `A`) feeding two MFCs:
//! - MFC 1 is connected to a nitrogen supply
//! - MFC 2 is connected to the "O2 source gas", which may be pure O2 or a
//!   premix of O2 in N2
//!
//! Protocol Overview:
//! - Format: ASCII command/response, device id prefix
//! - Baud: 19200, 8N1, no flow control
//! - Terminator: CR (\r) in both directions
//! - Mix fractions are exchanged in parts per billion
//!
//! # Example Usage
//!
//! ```no_run
//! use calibration_rig::hardware::gas_mixer::GasMixer;
//! use calibration_rig::hardware::SerialTransport;
//!
//! fn main() -> calibration_rig::error::RigResult<()> {
//!     let mixer = GasMixer::new(SerialTransport::new(), "/dev/ttyUSB1");
//!
//!     // 2.5 SLPM total, half of it from the O2 source gas
//!     mixer.start_constant_flow_mix(2.5, 0.5)?;
//!     println!("{:?}", mixer.status()?);
//!     mixer.stop_flow()
//! }
//! ```

use crate::error::{RigError, RigResult};
use crate::hardware::{LineSettings, ResponseEnd, Transport};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Line parameters of the mix controller.
pub const LINE: LineSettings = LineSettings::new(19200, Duration::from_millis(60));

/// Every mixer reply ends with a carriage return.
pub const REPLY_END: ResponseEnd = ResponseEnd::Terminator(b"\r");

/// The mixer on the rig is configured with device id "A".
pub const DEVICE_ID: &str = "A";

/// In status fields this bit flags low feed pressure: a cylinder is
/// exhausted, disconnected, or a line is kinked.
pub const LOW_FEED_PRESSURE_ALARM_BIT: u32 = 0x0000_8000;

const ONE_BILLION: f64 = 1_000_000_000.0;

/// Unit codes the status parser assumes: mmHg and SLPM.
pub const EXPECTED_PRESSURE_UNITS: &str = "14";
/// Flow unit code for SLPM.
pub const EXPECTED_FLOW_UNITS: &str = "7";

/// Mixer limits per MFC, SLPM.
pub const O2_SOURCE_FLOW_RANGE_SLPM: (f64, f64) = (0.05, 2.5);
/// N2 MFC range, SLPM.
pub const N2_FLOW_RANGE_SLPM: (f64, f64) = (0.2, 10.0);

/// Space separated fields of a QMXS ("query mixer status") reply.
///
/// The trailing fields repeat per MFC; the rig has two.
const STATUS_FIELDS: [&str; 24] = [
    "device_id",
    "version",
    "mix_status",
    "mix_alarm",
    "pressure_units",
    "flow_units",
    "volume_units",
    "num_ports",
    "mix_alarm_enable",
    "gas_analyzer_alarm_enable",
    "mix_pressure",
    "mix_flow",
    "mix_volume",
    "gas_analyzer",
    "status_1",
    "pressure_1",
    "flow_1",
    "total_volume_1",
    "total_fraction_1",
    "status_2",
    "pressure_2",
    "flow_2",
    "total_volume_2",
    "total_fraction_2",
];

/// Mixer run state, as returned by `MXRS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixState {
    /// EMO is active
    EmergencyMotionOff,
    /// Stopped; configuration prevents starting
    InvalidConfiguration,
    /// Flow is running
    Mixing,
    /// Stopped; can be started
    StoppedOk,
    /// Alarm active, external indicators quieted
    AlarmQuieted,
    /// Alarm active and indicating
    AlarmActive,
}

impl MixState {
    /// State for an `MXRS` code, `None` if unknown.
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => MixState::EmergencyMotionOff,
            1 => MixState::InvalidConfiguration,
            2 => MixState::Mixing,
            3 => MixState::StoppedOk,
            4 => MixState::AlarmQuieted,
            5 => MixState::AlarmActive,
            _ => return None,
        })
    }

    /// Wire code of this state.
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Manual's description of the state.
    pub const fn description(self) -> &'static str {
        match self {
            MixState::EmergencyMotionOff => "Emergency Motion Off (EMO) is active.",
            MixState::InvalidConfiguration => {
                "Mixing is stopped and cannot be started because of an invalid configuration, \
                 usually an invalid mix fraction."
            }
            MixState::Mixing => "Device is mixing.",
            MixState::StoppedOk => "Mixing is stopped but can be started when desired.",
            MixState::AlarmQuieted => {
                "At least one alarm is active, but external indicators have been quieted."
            }
            MixState::AlarmActive => {
                "At least one alarm is active and triggering external indicators."
            }
        }
    }
}

/// Parsed QMXS reply.
#[derive(Debug, Clone, PartialEq)]
pub struct MixerStatus {
    /// Total flow out of the mixer
    pub flow_rate_slpm: f64,
    /// Pressure at the mix outlet, mmHg
    pub mix_pressure_mmhg: f64,
    /// Either inlet reports low feed pressure
    pub low_feed_pressure_alarm: bool,
    /// N2 inlet reports low feed pressure
    pub low_feed_pressure_alarm_n2: bool,
    /// O2 source inlet reports low feed pressure
    pub low_feed_pressure_alarm_o2_source_gas: bool,
    /// Fraction of the mix drawn from the N2 supply
    pub n2_fraction_in_mix: f64,
    /// Fraction of the mix drawn from the O2 source gas. Not the O2 fraction of
    /// the mix unless the source gas is pure O2.
    pub o2_source_gas_fraction_in_mix: f64,
}

impl MixerStatus {
    /// Names of the raised low feed pressure alarms.
    pub fn errors(&self) -> Vec<String> {
        [
            ("low feed pressure alarm", self.low_feed_pressure_alarm),
            ("low feed pressure alarm - N2", self.low_feed_pressure_alarm_n2),
            (
                "low feed pressure alarm - O2 source gas",
                self.low_feed_pressure_alarm_o2_source_gas,
            ),
        ]
        .into_iter()
        .filter(|(_, raised)| *raised)
        .map(|(name, _)| name.to_string())
        .collect()
    }
}

/// Send one command (without terminator) and return the reply without it.
pub fn send_command_and_get_response<T: Transport + ?Sized>(
    transport: &T,
    port: &str,
    command: &str,
) -> RigResult<String> {
    let request = format!("{command}\r");
    let raw = transport.exchange(port, &LINE, request.as_bytes(), &REPLY_END)?;
    let response = String::from_utf8_lossy(&raw)
        .trim_end_matches('\r')
        .to_string();
    debug!(command, response = %response, "Gas mixer replied");
    Ok(response)
}

fn send_sequence_with_expected_responses<T: Transport + ?Sized>(
    transport: &T,
    port: &str,
    sequence: &[(String, String)],
) -> RigResult<()> {
    for (command, expected) in sequence {
        let response = send_command_and_get_response(transport, port, command)?;
        if response != *expected {
            return Err(RigError::UnexpectedMixerResponse {
                command: command.clone(),
                expected: expected.clone(),
                actual: response,
            });
        }
    }
    Ok(())
}

/// Check an `MXRS` reply against the run state we asked for.
fn assert_mix_state(command: &str, response: &str, expected: MixState) -> RigResult<()> {
    let actual = response
        .strip_prefix(DEVICE_ID)
        .map(str::trim)
        .and_then(|code| code.parse::<u8>().ok());

    if actual == Some(expected.code()) {
        return Ok(());
    }

    let actual_description = actual
        .and_then(MixState::from_code)
        .map_or("unknown mix state", MixState::description);
    Err(RigError::UnexpectedMixerResponse {
        command: command.to_string(),
        expected: format!("{DEVICE_ID} {} ({})", expected.code(), expected.description()),
        actual: format!("{response} ({actual_description})"),
    })
}

fn fraction_to_ppb(fraction: f64) -> u64 {
    // Callers keep fraction within [0, 1]
    (fraction.clamp(0.0, 1.0) * ONE_BILLION).round() as u64
}

fn parse_flow_fraction(field: &str) -> Result<f64, String> {
    // All dashes before the mixer has run or after a communication error
    if field.chars().all(|c| c == '-') {
        return Ok(0.0);
    }
    field
        .parse::<i64>()
        .map(|ppb| ppb as f64 / ONE_BILLION)
        .map_err(|e| format!("fraction '{field}': {e}"))
}

fn has_low_feed_pressure(field: &str) -> Result<bool, String> {
    field
        .parse::<u32>()
        .map(|alarm| alarm & LOW_FEED_PRESSURE_ALARM_BIT != 0)
        .map_err(|e| format!("alarm '{field}': {e}"))
}

fn parse_float(field: &str) -> Result<f64, String> {
    field
        .parse::<f64>()
        .map_err(|e| format!("value '{field}': {e}"))
}

fn status_field<'a>(values: &[&'a str], name: &str) -> &'a str {
    STATUS_FIELDS
        .iter()
        .position(|field| *field == name)
        .and_then(|index| values.get(index).copied())
        .unwrap_or_default()
}

/// Parse the reply to `A QMXS`.
pub fn parse_mixer_status(response: &str) -> RigResult<MixerStatus> {
    let command = format!("{DEVICE_ID} QMXS");
    let unexpected = |expected: &str| RigError::UnexpectedMixerResponse {
        command: command.clone(),
        expected: expected.to_string(),
        actual: response.to_string(),
    };

    if response.trim().is_empty() {
        return Err(unexpected("a mixer status (No response received)"));
    }

    let values: Vec<&str> = response.split_whitespace().collect();
    if values.len() < STATUS_FIELDS.len() {
        return Err(unexpected(&format!(
            "{} space separated status fields",
            STATUS_FIELDS.len()
        )));
    }
    let field = |name: &str| status_field(&values, name);

    if field("pressure_units") != EXPECTED_PRESSURE_UNITS || field("flow_units") != EXPECTED_FLOW_UNITS {
        return Err(unexpected(&format!(
            "pressure units {EXPECTED_PRESSURE_UNITS} (mmHg) and flow units {EXPECTED_FLOW_UNITS} (SLPM)"
        )));
    }

    let parse = || -> Result<MixerStatus, String> {
        Ok(MixerStatus {
            flow_rate_slpm: parse_float(field("mix_flow"))?,
            mix_pressure_mmhg: parse_float(field("mix_pressure"))?,
            low_feed_pressure_alarm: has_low_feed_pressure(field("mix_alarm"))?,
            low_feed_pressure_alarm_n2: has_low_feed_pressure(field("status_1"))?,
            low_feed_pressure_alarm_o2_source_gas: has_low_feed_pressure(field("status_2"))?,
            n2_fraction_in_mix: parse_flow_fraction(field("total_fraction_1"))?,
            o2_source_gas_fraction_in_mix: parse_flow_fraction(field("total_fraction_2"))?,
        })
    };

    parse().map_err(|e| unexpected(&format!("a parseable mixer status ({e})")))
}

/// Query the mixer status.
pub fn get_mixer_status<T: Transport + ?Sized>(transport: &T, port: &str) -> RigResult<MixerStatus> {
    let response = send_command_and_get_response(transport, port, &format!("{DEVICE_ID} QMXS"))?;
    parse_mixer_status(&response)
}

/// Fail if any low feed pressure alarm is raised.
pub fn assert_status_ok<T: Transport + ?Sized>(transport: &T, port: &str) -> RigResult<()> {
    let errors = get_mixer_status(transport, port)?.errors();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(RigError::GasMixerStatus(errors))
    }
}

/// Fraction of the mix that must come from the O2 source gas to reach
/// `target_o2_fraction`.
///
/// # Errors
/// [`RigError::Configuration`] if the source gas is too lean to reach the target.
pub fn o2_source_gas_fraction(target_o2_fraction: f64, source_gas_o2_fraction: f64) -> RigResult<f64> {
    let fraction = target_o2_fraction / source_gas_o2_fraction;
    if !fraction.is_finite() || !(0.0..=1.0).contains(&fraction) {
        return Err(RigError::Configuration(format!(
            "Target O2 fraction {:.2}% cannot be mixed from a source gas with {:.2}% O2",
            target_o2_fraction * 100.0,
            source_gas_o2_fraction * 100.0
        )));
    }
    Ok(fraction)
}

/// Reasons a setpoint's mix cannot be produced by the mixer.
pub fn mix_validation_errors(
    flow_rate_slpm: f64,
    source_gas_o2_fraction: f64,
    target_o2_fraction: f64,
) -> Vec<String> {
    let o2_source_flow = flow_rate_slpm * target_o2_fraction / source_gas_o2_fraction;
    let n2_flow = flow_rate_slpm - o2_source_flow;
    let (o2_min, o2_max) = O2_SOURCE_FLOW_RANGE_SLPM;
    let (n2_min, n2_max) = N2_FLOW_RANGE_SLPM;

    [
        (
            "setpoint gas O2 fraction too high".to_string(),
            target_o2_fraction > source_gas_o2_fraction,
        ),
        (format!("O2 flow rate > {o2_max} SLPM"), o2_source_flow > o2_max),
        (format!("O2 flow rate < {o2_min} SLPM"), o2_source_flow < o2_min),
        (format!("N2 flow rate > {n2_max} SLPM"), n2_flow > n2_max),
        (format!("N2 flow rate < {n2_min} SLPM"), n2_flow < n2_min),
    ]
    .into_iter()
    .filter(|(_, failed)| *failed)
    .map(|(error, _)| error)
    .collect()
}

/// Start a constant flow mix. Also resets any alarms.
///
/// # Arguments
/// * `flow_rate_slpm` - total flow out of the mixer
/// * `o2_source_gas_fraction_in_mix` - fraction of the flow drawn from the O2 source gas
///
/// # Errors
/// [`RigError::UnexpectedMixerResponse`] on the first reply that doesn't match;
/// the remaining commands are not sent.
#[instrument(skip(transport))]
pub fn start_constant_flow_mix<T: Transport + ?Sized>(
    transport: &T,
    port: &str,
    flow_rate_slpm: f64,
    o2_source_gas_fraction_in_mix: f64,
) -> RigResult<()> {
    let o2_ppb = fraction_to_ppb(o2_source_gas_fraction_in_mix);
    let n2_ppb = 1_000_000_000 - o2_ppb;

    let sequence = [
        // Run mode: constant flow
        (format!("{DEVICE_ID} MXRM 3"), format!("{DEVICE_ID} 3")),
        (
            format!("{DEVICE_ID} MXRFF {flow_rate_slpm}"),
            format!("{DEVICE_ID} {flow_rate_slpm:.2} 7 SLPM"),
        ),
        (
            format!("{DEVICE_ID} MXMF {n2_ppb}, {o2_ppb}"),
            format!("{DEVICE_ID} {n2_ppb} {o2_ppb}"),
        ),
    ];
    send_sequence_with_expected_responses(transport, port, &sequence)?;

    let start = format!("{DEVICE_ID} MXRS 1");
    let response = send_command_and_get_response(transport, port, &start)?;
    assert_mix_state(&start, &response, MixState::Mixing)?;

    info!(flow_rate_slpm, o2_source_gas_fraction_in_mix, "Gas mixer started");
    Ok(())
}

/// Stop the flow. The mixer should report it is stopped and ready to start.
#[instrument(skip(transport))]
pub fn stop_flow<T: Transport + ?Sized>(transport: &T, port: &str) -> RigResult<()> {
    let stop = format!("{DEVICE_ID} MXRS 2");
    let response = send_command_and_get_response(transport, port, &stop)?;
    assert_mix_state(&stop, &response, MixState::StoppedOk)?;
    info!("Gas mixer stopped");
    Ok(())
}

/// A mix controller on a specific port.
#[derive(Debug, Clone)]
pub struct GasMixer<T> {
    transport: T,
    port: String,
}

impl<T: Transport> GasMixer<T> {
    /// Mixer on `port`.
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

    /// See [`start_constant_flow_mix`].
    pub fn start_constant_flow_mix(
        &self,
        flow_rate_slpm: f64,
        o2_source_gas_fraction_in_mix: f64,
    ) -> RigResult<()> {
        start_constant_flow_mix(
            &self.transport,
            &self.port,
            flow_rate_slpm,
            o2_source_gas_fraction_in_mix,
        )
    }

    /// See [`stop_flow`].
    pub fn stop_flow(&self) -> RigResult<()> {
        stop_flow(&self.transport, &self.port)
    }

    /// See [`get_mixer_status`].
    pub fn status(&self) -> RigResult<MixerStatus> {
        get_mixer_status(&self.transport, &self.port)
    }

    /// See [`assert_status_ok`].
    pub fn assert_status_ok(&self) -> RigResult<()> {
        assert_status_ok(&self.transport, &self.port)
    }
}
