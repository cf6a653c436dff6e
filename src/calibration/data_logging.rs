//! Calibration CSV output
//!
//! One row per sample, appended and flushed immediately so the file can be
//! tailed during a run. The header is written only when the file is empty,
//! so reopening an existing log continues it.

use super::{Rig, Setpoint};
use crate::error::RigResult;
use crate::hardware::gas_mixer::MixerStatus;
use crate::hardware::ysi::YsiReadings;
use crate::hardware::Transport;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Where the run is when a row is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EquilibrationStatus {
    /// Holding at the setpoint
    #[serde(rename = "equilibrated")]
    Equilibrated,
    /// Waiting for the bath temperature to settle
    #[serde(rename = "waiting for temperature")]
    Temperature,
    /// Waiting for dissolved oxygen to settle
    #[serde(rename = "waiting for do")]
    Do,
}

impl EquilibrationStatus {
    /// Value written to the CSV.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Equilibrated => "equilibrated",
            Self::Temperature => "waiting for temperature",
            Self::Do => "waiting for do",
        }
    }
}

impl fmt::Display for EquilibrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reading of every device.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorData {
    /// Mixer flow, pressure and alarms
    pub gas_mixer: MixerStatus,
    /// Bath reservoir temperature, °C
    pub water_bath_internal_temperature: f64,
    /// Bath external sensor temperature, °C
    pub water_bath_external_temperature: f64,
    /// Reference probe readings
    pub ysi: YsiReadings,
}

/// Read every device once, mixer first.
pub fn get_all_sensor_data<T: Transport>(rig: &Rig<T>) -> RigResult<SensorData> {
    Ok(SensorData {
        gas_mixer: rig.gas_mixer.status()?,
        water_bath_internal_temperature: rig.water_bath.read_temperature()?,
        water_bath_external_temperature: rig.water_bath.read_external_temperature()?,
        ysi: rig.ysi.standard_sensor_values()?,
    })
}

/// A row of the calibration CSV. Field order is column order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationRow {
    /// Pass over the sequence, from 0
    #[serde(rename = "loop count")]
    pub loop_count: u64,
    /// Phase the row was taken in
    #[serde(rename = "equilibration status")]
    pub equilibration_status: EquilibrationStatus,
    /// Setpoint bath temperature, °C
    #[serde(rename = "setpoint temperature (C)")]
    pub setpoint_temperature: f64,
    /// Setpoint hold time, seconds
    #[serde(rename = "setpoint hold time seconds")]
    pub setpoint_hold_time: f64,
    /// Setpoint total flow, SLPM
    #[serde(rename = "setpoint flow rate (SLPM)")]
    pub setpoint_flow_rate_slpm: f64,
    /// Setpoint O2 fraction of the mix
    #[serde(rename = "setpoint target gas fraction")]
    pub setpoint_o2_target_gas_fraction: f64,
    /// O2 fraction of the source gas
    #[serde(rename = "o2 source gas fraction")]
    pub o2_source_gas_fraction: f64,
    /// Local time the row was taken
    pub timestamp: DateTime<Local>,

    /// Mixer flow setpoint, SLPM
    #[serde(rename = "gas mixer flow rate (SLPM)")]
    pub gas_mixer_flow_rate_slpm: f64,
    /// Mixer outlet pressure, mmHg
    #[serde(rename = "gas mixer mix pressure (mmHg)")]
    pub gas_mixer_mix_pressure_mmhg: f64,
    /// Any low feed pressure alarm
    #[serde(rename = "gas mixer low feed pressure alarm")]
    pub gas_mixer_low_feed_pressure_alarm: bool,
    /// Low feed pressure on the N2 inlet
    #[serde(rename = "gas mixer low feed pressure alarm - N2")]
    pub gas_mixer_low_feed_pressure_alarm_n2: bool,
    /// Low feed pressure on the O2 source inlet
    #[serde(rename = "gas mixer low feed pressure alarm - O2 source gas")]
    pub gas_mixer_low_feed_pressure_alarm_o2_source_gas: bool,
    /// N2 share of the mix
    #[serde(rename = "gas mixer N2 fraction in mix")]
    pub gas_mixer_n2_fraction_in_mix: f64,
    /// O2 source gas share of the mix
    #[serde(rename = "gas mixer O2 source gas fraction in mix")]
    pub gas_mixer_o2_source_gas_fraction_in_mix: f64,

    /// Bath reservoir temperature, °C
    #[serde(rename = "water bath internal temperature (C)")]
    pub water_bath_internal_temperature: f64,
    /// Bath external sensor temperature, °C
    #[serde(rename = "water bath external sensor temperature (C)")]
    pub water_bath_external_temperature: f64,

    /// YSI barometric pressure, mmHg
    #[serde(rename = "YSI barometric pressure (mmHg)")]
    pub ysi_barometric_pressure_mmhg: f64,
    /// YSI dissolved oxygen, mg/L
    #[serde(rename = "YSI DO (mg/L)")]
    pub ysi_do_mg_per_l: f64,
    /// YSI dissolved oxygen, % saturation
    #[serde(rename = "YSI DO (% sat)")]
    pub ysi_do_percent_saturation: f64,
    /// YSI temperature, °C
    #[serde(rename = "YSI temperature (C)")]
    pub ysi_temperature_c: f64,
}

impl CalibrationRow {
    /// Combine a setpoint and one sensor reading into a row stamped now.
    pub fn new(
        setpoint: &Setpoint,
        o2_source_gas_fraction: f64,
        loop_count: u64,
        equilibration_status: EquilibrationStatus,
        sensors: &SensorData,
    ) -> Self {
        let mixer = &sensors.gas_mixer;
        Self {
            loop_count,
            equilibration_status,
            setpoint_temperature: setpoint.temperature,
            setpoint_hold_time: setpoint.hold_time,
            setpoint_flow_rate_slpm: setpoint.flow_rate_slpm,
            setpoint_o2_target_gas_fraction: setpoint.o2_target_gas_fraction,
            o2_source_gas_fraction,
            timestamp: Local::now(),
            gas_mixer_flow_rate_slpm: mixer.flow_rate_slpm,
            gas_mixer_mix_pressure_mmhg: mixer.mix_pressure_mmhg,
            gas_mixer_low_feed_pressure_alarm: mixer.low_feed_pressure_alarm,
            gas_mixer_low_feed_pressure_alarm_n2: mixer.low_feed_pressure_alarm_n2,
            gas_mixer_low_feed_pressure_alarm_o2_source_gas: mixer
                .low_feed_pressure_alarm_o2_source_gas,
            gas_mixer_n2_fraction_in_mix: mixer.n2_fraction_in_mix,
            gas_mixer_o2_source_gas_fraction_in_mix: mixer.o2_source_gas_fraction_in_mix,
            water_bath_internal_temperature: sensors.water_bath_internal_temperature,
            water_bath_external_temperature: sensors.water_bath_external_temperature,
            ysi_barometric_pressure_mmhg: sensors.ysi.barometric_pressure_mmhg,
            ysi_do_mg_per_l: sensors.ysi.do_mg_per_l,
            ysi_do_percent_saturation: sensors.ysi.do_percent_saturation,
            ysi_temperature_c: sensors.ysi.temperature_c,
        }
    }
}

/// `2018-01-01--12-01-01_calibration.csv` for a run started at that time.
pub fn output_filename(start: &DateTime<Local>) -> String {
    format!("{}_calibration.csv", start.format("%Y-%m-%d--%H-%M-%S"))
}

/// Append-only CSV writer for calibration rows.
pub struct CalibrationLog {
    writer: csv::Writer<File>,
    path: PathBuf,
    rows_written: u64,
}

impl CalibrationLog {
    /// Start a new log in `output_dir`, named after `start`.
    pub fn create(output_dir: impl AsRef<Path>, start: &DateTime<Local>) -> RigResult<Self> {
        let output_dir = output_dir.as_ref();
        std::fs::create_dir_all(output_dir)?;
        Self::open(output_dir.join(output_filename(start)))
    }

    /// Append to `path`, writing the header first if the file is empty.
    pub fn open(path: impl Into<PathBuf>) -> RigResult<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let is_empty = file.metadata()?.len() == 0;

        let writer = csv::WriterBuilder::new()
            .has_headers(is_empty)
            .from_writer(file);

        info!(path = %path.display(), "Writing calibration data");
        Ok(Self {
            writer,
            path,
            rows_written: 0,
        })
    }

    /// File being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows written through this handle.
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Write `row` and flush it to disk.
    pub fn append(&mut self, row: &CalibrationRow) -> RigResult<()> {
        self.writer.serialize(row)?;
        self.writer.flush()?;
        self.rows_written += 1;
        Ok(())
    }
}

/// Samples the rig and logs each reading as a row.
pub struct DataCollector<'a, T> {
    rig: &'a Rig<T>,
    log: &'a mut CalibrationLog,
    o2_source_gas_fraction: f64,
}

impl<'a, T: Transport> DataCollector<'a, T> {
    /// Collector writing to `log`.
    pub fn new(rig: &'a Rig<T>, log: &'a mut CalibrationLog, o2_source_gas_fraction: f64) -> Self {
        Self {
            rig,
            log,
            o2_source_gas_fraction,
        }
    }

    /// Read every device and append one row.
    pub fn collect_data_to_csv(
        &mut self,
        setpoint: &Setpoint,
        loop_count: u64,
        equilibration_status: EquilibrationStatus,
    ) -> RigResult<CalibrationRow> {
        let sensors = get_all_sensor_data(self.rig)?;
        let row = CalibrationRow::new(
            setpoint,
            self.o2_source_gas_fraction,
            loop_count,
            equilibration_status,
            &sensors,
        );
        self.log.append(&row)?;
        debug!(
            %equilibration_status,
            ysi_temperature_c = row.ysi_temperature_c,
            ysi_do_mg_per_l = row.ysi_do_mg_per_l,
            "Collected sample"
        );
        Ok(row)
    }

    /// Rig being sampled.
    pub fn rig(&self) -> &Rig<T> {
        self.rig
    }

    /// Log rows are appended to.
    pub fn log(&self) -> &CalibrationLog {
        self.log
    }
}
