//! Simulated Calibration Rig
//!
//! Emulates the water bath, gas mixer and YSI probe in memory, speaking the
//! same wire protocols as the real devices. It backs `--dry-run` and the
//! integration tests.
//!
//! Replies are routed by the shape of the command rather than the port name:
//! NC packets (prefix 0xCA) go to the bath, `$ADC` requests to the YSI and
//! anything starting with the mixer's device id to the gas mixer.
//!
//! The physics are idealised:
//! - With the unit on, the bath sits exactly at its setpoint
//! - Dissolved oxygen follows the current mix instantly, at the saturation
//!   concentration for the bath temperature
//! - Barometric pressure is a constant 760 mmHg
//!
//! # Example
//!
//! ```
//! use calibration_rig::hardware::water_bath::WaterBath;
//! use calibration_rig::hardware::SimulatedRig;
//!
//! let rig = SimulatedRig::new();
//! let bath = WaterBath::new(&rig, "COM21");
//! bath.initialize().unwrap();
//! bath.set_setpoint(27.85).unwrap();
//! assert_eq!(bath.read_temperature().unwrap(), 27.85);
//! ```

use super::gas_mixer::{self, DEVICE_ID, LOW_FEED_PRESSURE_ALARM_BIT};
use super::water_bath::command::{
    Command, ERROR_RESPONSE_COMMAND, READ_STATUS_COMMAND, SET_ON_OFF_ARRAY_COMMAND,
};
use super::water_bath::packet::{SerialPacket, PREFIX};
use super::water_bath::{Precision, Switch, WaterBathStatus};
use super::{hex, LineSettings, ResponseEnd, Transport};
use crate::error::{RigError, RigResult};
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// O2 fraction of air; DO is reported against it as 100 % saturation.
const AIR_O2_FRACTION: f64 = 0.2095;
const STANDARD_PRESSURE_MMHG: f64 = 760.0;
const MMHG_PER_KPA: f64 = 7.500_62;
const AMBIENT_TEMPERATURE_C: f64 = 22.0;

/// Which simulated device a command is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimulatedDevice {
    /// NESLAB water bath
    WaterBath,
    /// Alicat gas mixer
    GasMixer,
    /// YSI probe
    Ysi,
}

#[derive(Debug, Clone)]
struct BathState {
    /// Actual on/off state of the eight switches
    switches: [bool; 8],
    setpoint: f64,
    low_limit: f64,
    high_limit: f64,
    /// Heat P, I, D then cool P, I, D
    pid: [f64; 6],
    raised_flags: Vec<&'static str>,
}

impl BathState {
    fn precision(&self) -> Precision {
        if self.switches[Switch::HighPrecisionEnable.position()] {
            Precision::Hundredth
        } else {
            Precision::Tenth
        }
    }

    fn unit_on(&self) -> bool {
        self.switches[Switch::UnitOnOff.position()]
    }

    fn temperature(&self) -> f64 {
        if self.unit_on() {
            self.setpoint
        } else {
            AMBIENT_TEMPERATURE_C
        }
    }
}

impl Default for BathState {
    fn default() -> Self {
        // Front panel already switched to "Serial", unit off, 0.1 precision
        let mut switches = [false; 8];
        switches[Switch::FaultsEnabled.position()] = true;
        switches[Switch::SerialCommEnable.position()] = true;
        Self {
            switches,
            setpoint: 25.0,
            low_limit: -24.0,
            high_limit: 150.0,
            pid: [0.6, 0.6, 0.0, 0.6, 0.6, 0.0],
            raised_flags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct MixerState {
    run_mode: u8,
    flow_rate_slpm: f64,
    /// N2 and O2 source gas fractions, parts per billion; `None` until set
    fractions_ppb: Option<(u64, u64)>,
    mixing: bool,
    low_feed_pressure_n2: bool,
    low_feed_pressure_o2_source_gas: bool,
}

#[derive(Debug)]
struct RigState {
    bath: BathState,
    mixer: MixerState,
    source_gas_o2_fraction: f64,
    silent: HashSet<SimulatedDevice>,
}

/// In-memory calibration rig. See the module docs.
#[derive(Debug)]
pub struct SimulatedRig {
    state: Mutex<RigState>,
}

impl Default for SimulatedRig {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedRig {
    /// A rig with pure O2 as the source gas.
    pub fn new() -> Self {
        Self::with_source_gas_o2_fraction(1.0)
    }

    /// A rig whose mixer is fed a source gas with this O2 fraction.
    pub fn with_source_gas_o2_fraction(source_gas_o2_fraction: f64) -> Self {
        Self {
            state: Mutex::new(RigState {
                bath: BathState::default(),
                mixer: MixerState::default(),
                source_gas_o2_fraction,
                silent: HashSet::new(),
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, RigState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop (or resume) answering on `device`, like an unplugged cable.
    pub fn set_silent(&self, device: SimulatedDevice, silent: bool) {
        let mut state = self.state();
        if silent {
            state.silent.insert(device);
        } else {
            state.silent.remove(&device);
        }
    }

    /// Flip the bath's front panel between "Serial" and local control.
    pub fn set_front_panel_serial(&self, serial: bool) {
        self.state().bath.switches[Switch::SerialCommEnable.position()] = serial;
    }

    /// Raise a status flag on the bath (see `water_bath::status::STATUS_FLAGS`).
    pub fn raise_bath_flag(&self, flag: &'static str) {
        self.state().bath.raised_flags.push(flag);
    }

    /// Raise or clear the low feed pressure alarm of each inlet.
    pub fn set_low_feed_pressure(&self, n2: bool, o2_source_gas: bool) {
        let mut state = self.state();
        state.mixer.low_feed_pressure_n2 = n2;
        state.mixer.low_feed_pressure_o2_source_gas = o2_source_gas;
    }

    /// Current bath setpoint, °C.
    pub fn bath_setpoint(&self) -> f64 {
        self.state().bath.setpoint
    }

    /// Actual state of a bath switch.
    pub fn bath_switch(&self, switch: Switch) -> bool {
        self.state().bath.switches[switch.position()]
    }

    /// Whether the mixer is flowing.
    pub fn is_mixing(&self) -> bool {
        self.state().mixer.mixing
    }

    /// Mixer total flow setpoint, SLPM.
    pub fn mixer_flow_rate(&self) -> f64 {
        self.state().mixer.flow_rate_slpm
    }

    fn route(command: &[u8]) -> Option<SimulatedDevice> {
        if command.first() == Some(&PREFIX) {
            Some(SimulatedDevice::WaterBath)
        } else if command.starts_with(b"$ADC ") {
            Some(SimulatedDevice::Ysi)
        } else if command.starts_with(DEVICE_ID.as_bytes()) {
            Some(SimulatedDevice::GasMixer)
        } else {
            None
        }
    }
}

impl Transport for SimulatedRig {
    fn exchange(
        &self,
        port: &str,
        _line: &LineSettings,
        command: &[u8],
        _end: &ResponseEnd,
    ) -> RigResult<Vec<u8>> {
        let mut state = self.state();
        debug!(port, command = %hex(command), "Simulated command");

        let device = Self::route(command).filter(|device| !state.silent.contains(device));
        let reply = match device {
            Some(SimulatedDevice::WaterBath) => state.bath_reply(command),
            Some(SimulatedDevice::GasMixer) => state.mixer_reply(command),
            Some(SimulatedDevice::Ysi) => state.ysi_reply(command),
            None => {
                return Err(RigError::Timeout {
                    port: port.to_string(),
                    received: 0,
                })
            }
        };

        debug!(port, reply = %hex(&reply), "Simulated response");
        Ok(reply)
    }
}

fn bath_value_reply(command: u8, value: f64, precision: Precision) -> Vec<u8> {
    let qualifier = match precision {
        Precision::Tenth => 0x11,
        Precision::Hundredth => 0x21,
    };
    let counts = (value * precision.scale()).round() as i16;
    let [msb, lsb] = counts.to_be_bytes();
    packet_bytes(command, vec![qualifier, msb, lsb])
}

fn bath_error_reply(error_code: u8, command: u8) -> Vec<u8> {
    packet_bytes(ERROR_RESPONSE_COMMAND, vec![error_code, command])
}

fn packet_bytes(command: u8, data: Vec<u8>) -> Vec<u8> {
    // Simulator replies never exceed eight data bytes
    SerialPacket { command, data }.to_bytes()
}

/// Saturated DO in fresh water at 760 mmHg, mg/L.
fn saturated_do_mg_per_l(temperature_c: f64) -> f64 {
    let t = temperature_c;
    14.652 - 0.410_22 * t + 0.007_991 * t.powi(2) - 0.000_077_774 * t.powi(3)
}

impl RigState {
    fn bath_reply(&mut self, raw: &[u8]) -> Vec<u8> {
        let packet = match SerialPacket::from_bytes(raw) {
            Ok(packet) => packet,
            Err(_) => return bath_error_reply(0x03, raw.get(3).copied().unwrap_or_default()),
        };
        let bath = &mut self.bath;

        match packet.command {
            SET_ON_OFF_ARRAY_COMMAND if packet.data.len() == 8 => {
                for (switch, code) in bath.switches.iter_mut().zip(&packet.data) {
                    match code {
                        0 => *switch = false,
                        1 => *switch = true,
                        _ => {}
                    }
                }
                let data = bath.switches.iter().map(|on| u8::from(*on)).collect();
                packet_bytes(SET_ON_OFF_ARRAY_COMMAND, data)
            }
            READ_STATUS_COMMAND => {
                let mut flags = bath.raised_flags.clone();
                if bath.unit_on() {
                    flags.extend(["unit_on", "pump_on", "compressor_on", "cool_led_on"]);
                }
                let status = WaterBathStatus::with_flags(&flags);
                packet_bytes(READ_STATUS_COMMAND, status.to_data().to_vec())
            }
            code => match Command::from_code(code) {
                Some(command) if command.is_set() => {
                    let [msb, lsb] = match packet.data.as_slice() {
                        [msb, lsb] => [*msb, *lsb],
                        _ => return bath_error_reply(0x01, code),
                    };
                    let precision = bath.precision();
                    let value = f64::from(i16::from_be_bytes([msb, lsb])) / precision.scale();
                    if let Some(slot) = bath.value_slot(command) {
                        *slot = value;
                    }
                    bath_value_reply(code, value, precision)
                }
                Some(command) => {
                    let value = bath.read_value(command);
                    bath_value_reply(code, value, bath.precision())
                }
                None => bath_error_reply(0x01, code),
            },
        }
    }

    fn mixer_reply(&mut self, raw: &[u8]) -> Vec<u8> {
        let text = String::from_utf8_lossy(raw);
        let mut words = text.trim_end_matches('\r').split_whitespace().skip(1);
        let mnemonic = words.next().unwrap_or_default();
        let args: Vec<&str> = words.collect();
        let mixer = &mut self.mixer;

        let reply = match (mnemonic, args.as_slice()) {
            ("MXRM", [mode]) => match mode.parse::<u8>() {
                Ok(mode) => {
                    mixer.run_mode = mode;
                    format!("{DEVICE_ID} {mode}")
                }
                Err(_) => format!("{DEVICE_ID} ?"),
            },
            ("MXRFF", [flow]) => match flow.parse::<f64>() {
                Ok(flow) => {
                    mixer.flow_rate_slpm = flow;
                    format!("{DEVICE_ID} {flow:.2} 7 SLPM")
                }
                Err(_) => format!("{DEVICE_ID} ?"),
            },
            ("MXMF", [n2, o2]) => {
                match (n2.trim_end_matches(',').parse::<u64>(), o2.parse::<u64>()) {
                    (Ok(n2), Ok(o2)) => {
                        mixer.fractions_ppb = Some((n2, o2));
                        format!("{DEVICE_ID} {n2} {o2}")
                    }
                    _ => format!("{DEVICE_ID} ?"),
                }
            }
            ("MXRS", ["1"]) => {
                let state = if mixer.low_feed_pressure_n2 || mixer.low_feed_pressure_o2_source_gas {
                    gas_mixer::MixState::AlarmActive
                } else if mixer.run_mode == 3
                    && mixer.fractions_ppb.is_some_and(|(n2, o2)| n2 + o2 == 1_000_000_000)
                {
                    mixer.mixing = true;
                    gas_mixer::MixState::Mixing
                } else {
                    gas_mixer::MixState::InvalidConfiguration
                };
                format!("{DEVICE_ID} {}", state.code())
            }
            ("MXRS", ["2"]) => {
                mixer.mixing = false;
                format!("{DEVICE_ID} {}", gas_mixer::MixState::StoppedOk.code())
            }
            ("QMXS", []) => mixer.status_line(),
            _ => format!("{DEVICE_ID} ?"),
        };

        format!("{reply}\r").into_bytes()
    }

    fn ysi_reply(&self, raw: &[u8]) -> Vec<u8> {
        let text = String::from_utf8_lossy(raw);
        let request = text.trim_end().trim_start_matches("$ADC ").to_string();

        let temperature = self.bath.temperature();
        let o2_fraction = self.o2_fraction_in_bath();
        let percent_saturation = o2_fraction / AIR_O2_FRACTION * 100.0;

        let value = match request.as_str() {
            "Get Normal SENSOR_BAR_MMHG" => STANDARD_PRESSURE_MMHG,
            "Get Normal SENSOR_BAR_KPA" => STANDARD_PRESSURE_MMHG / MMHG_PER_KPA,
            "Get Normal SENSOR_DO_PERCENT_SAT" => percent_saturation,
            "Get Normal SENSOR_DO_MG_L" => {
                saturated_do_mg_per_l(temperature) * percent_saturation / 100.0
            }
            "Get Normal SENSOR_TEMP_C" => temperature,
            _ => return b"$NAK\r\n".to_vec(),
        };

        format!("${value:.3}\r\n$ACK\r\n").into_bytes()
    }

    fn o2_fraction_in_bath(&self) -> f64 {
        match (self.mixer.mixing, self.mixer.fractions_ppb) {
            (true, Some((_, o2_ppb))) => {
                o2_ppb as f64 / 1_000_000_000.0 * self.source_gas_o2_fraction
            }
            _ => AIR_O2_FRACTION,
        }
    }
}

impl BathState {
    fn value_slot(&mut self, command: Command) -> Option<&mut f64> {
        Some(match command {
            Command::SetSetpoint => &mut self.setpoint,
            Command::SetLowTemperatureLimit => &mut self.low_limit,
            Command::SetHighTemperatureLimit => &mut self.high_limit,
            Command::SetHeatProportionalBand => &mut self.pid[0],
            Command::SetHeatIntegral => &mut self.pid[1],
            Command::SetHeatDerivative => &mut self.pid[2],
            Command::SetCoolProportionalBand => &mut self.pid[3],
            Command::SetCoolIntegral => &mut self.pid[4],
            Command::SetCoolDerivative => &mut self.pid[5],
            _ => return None,
        })
    }

    fn read_value(&self, command: Command) -> f64 {
        match command {
            Command::ReadInternalTemperature | Command::ReadExternalSensor => self.temperature(),
            Command::ReadSetpoint => self.setpoint,
            Command::ReadLowTemperatureLimit => self.low_limit,
            Command::ReadHighTemperatureLimit => self.high_limit,
            Command::ReadHeatProportionalBand => self.pid[0],
            Command::ReadHeatIntegral => self.pid[1],
            Command::ReadHeatDerivative => self.pid[2],
            Command::ReadCoolProportionalBand => self.pid[3],
            Command::ReadCoolIntegral => self.pid[4],
            Command::ReadCoolDerivative => self.pid[5],
            _ => 0.0,
        }
    }
}

impl MixerState {
    fn status_line(&self) -> String {
        let alarm = |raised: bool| {
            if raised {
                LOW_FEED_PRESSURE_ALARM_BIT | 0x1000
            } else {
                0x1000
            }
        };
        let any_low = self.low_feed_pressure_n2 || self.low_feed_pressure_o2_source_gas;
        let (flow, fractions) = if self.mixing {
            (self.flow_rate_slpm, self.fractions_ppb)
        } else {
            (0.0, self.fractions_ppb)
        };
        let fraction = |ppb: Option<u64>| {
            ppb.map_or_else(|| "-".repeat(10), |ppb| format!("+{ppb:010}"))
        };
        let (n2_ppb, o2_ppb) = match fractions {
            Some((n2, o2)) => (Some(n2), Some(o2)),
            None => (None, None),
        };
        let o2_flow = o2_ppb.map_or(0.0, |ppb| flow * ppb as f64 / 1_000_000_000.0);

        format!(
            "{DEVICE_ID} 0 {mix_status} {mix_alarm:05} {pressure_units} {flow_units} 4 2 Y - \
             {pressure:+06.2} {flow:+06.2} +0001463 ---------- \
             {status_1:05} +020.6 {n2_flow:+06.2} +923 {n2_fraction} \
             {status_2:05} +017.2 {o2_flow:+06.3} +540 {o2_fraction}",
            mix_status = if self.mixing { 2 } else { 6 },
            mix_alarm = alarm(any_low),
            pressure_units = gas_mixer::EXPECTED_PRESSURE_UNITS,
            flow_units = gas_mixer::EXPECTED_FLOW_UNITS,
            pressure = if self.mixing { 0.19 } else { -0.01 },
            status_1 = alarm(self.low_feed_pressure_n2),
            n2_flow = flow - o2_flow,
            n2_fraction = fraction(n2_ppb),
            status_2 = alarm(self.low_feed_pressure_o2_source_gas),
            o2_fraction = fraction(o2_ppb),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::gas_mixer::GasMixer;
    use crate::hardware::water_bath::WaterBath;
    use crate::hardware::ysi::Ysi;

    #[test]
    fn bath_reports_configured_precision() {
        let rig = SimulatedRig::new();
        let bath = WaterBath::new(&rig, "COM21");

        // Fresh bath reports at 0.1
        assert!(matches!(
            bath.read_setpoint(),
            Err(RigError::PrecisionMismatch { .. })
        ));

        bath.initialize().unwrap();
        assert_eq!(bath.set_setpoint(27.85).unwrap(), 27.85);
        assert_eq!(bath.read_setpoint().unwrap(), 27.85);
        assert_eq!(bath.read_temperature().unwrap(), 27.85);
        assert!(bath.status().unwrap().is_set("unit_on"));
    }

    #[test]
    fn bath_in_local_mode_fails_initialization() {
        let rig = SimulatedRig::new();
        rig.set_front_panel_serial(false);
        assert!(matches!(
            WaterBath::new(&rig, "COM21").initialize(),
            Err(RigError::Initialization(_))
        ));
    }

    #[test]
    fn raised_flags_fail_status_check() {
        let rig = SimulatedRig::new();
        rig.raise_bath_flag("low_level_warn");
        match WaterBath::new(&rig, "COM21").assert_status_ok() {
            Err(RigError::WaterBathStatus(errors)) => assert_eq!(errors, vec!["low_level_warn"]),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn mixer_runs_and_reports_status() {
        let rig = SimulatedRig::with_source_gas_o2_fraction(0.5);
        let mixer = GasMixer::new(&rig, "COM22");

        mixer.start_constant_flow_mix(2.5, 0.4).unwrap();
        assert!(rig.is_mixing());

        let status = mixer.status().unwrap();
        assert_eq!(status.flow_rate_slpm, 2.5);
        assert_eq!(status.o2_source_gas_fraction_in_mix, 0.4);
        assert_eq!(status.n2_fraction_in_mix, 0.6);
        mixer.assert_status_ok().unwrap();

        // 0.4 of a 50 % O2 source gas
        let readings = Ysi::new(&rig, "COM11").standard_sensor_values().unwrap();
        let expected_saturation = 0.2 / AIR_O2_FRACTION * 100.0;
        assert!((readings.do_percent_saturation - expected_saturation).abs() < 1e-3);

        mixer.stop_flow().unwrap();
        assert!(!rig.is_mixing());
    }

    #[test]
    fn low_feed_pressure_blocks_mixing() {
        let rig = SimulatedRig::new();
        rig.set_low_feed_pressure(true, false);
        let mixer = GasMixer::new(&rig, "COM22");

        assert!(matches!(
            mixer.start_constant_flow_mix(2.5, 0.2),
            Err(RigError::UnexpectedMixerResponse { .. })
        ));
        assert!(matches!(
            mixer.assert_status_ok(),
            Err(RigError::GasMixerStatus(_))
        ));
    }

    #[test]
    fn silent_device_times_out() {
        let rig = SimulatedRig::new();
        rig.set_silent(SimulatedDevice::Ysi, true);
        assert!(matches!(
            Ysi::new(&rig, "COM11").standard_sensor_values(),
            Err(RigError::Timeout { received: 0, .. })
        ));
    }

    #[test]
    fn corrupted_bath_packet_gets_error_reply() {
        let rig = SimulatedRig::new();
        let reply = rig
            .exchange(
                "COM21",
                &crate::hardware::water_bath::LINE,
                b"\xCA\x00\x01\x20\x00\x00",
                &crate::hardware::water_bath::packet::REPLY_END,
            )
            .unwrap();
        assert!(matches!(
            crate::hardware::water_bath::decode(Command::ReadInternalTemperature, &reply),
            Err(RigError::BathErrorResponse { ref error, .. }) if error == "Bad Checksum"
        ));
    }
}
