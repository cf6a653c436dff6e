//! End-to-end calibration runs against the simulated rig.

use calibration_rig::calibration::{read_setpoint_sequence_file, run_calibration, Rig, RunOptions};
use calibration_rig::config::{EquilibrationConfig, PortsConfig, RigConfig};
use calibration_rig::hardware::water_bath::Switch;
use calibration_rig::hardware::{SimulatedDevice, SimulatedRig};
use calibration_rig::RigError;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

const SEQUENCE: &str = "\
temperature,flow_rate_slpm,o2_target_gas_fraction,hold_time
35,2.5,0.2,0.02
15,2.5,0.05,0.01
25,3.0,0.1,0
";

fn write_sequence(dir: &TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join("setpoints.csv");
    fs::write(&path, contents).unwrap();
    path
}

fn quick_options(output_dir: &Path) -> RunOptions {
    let config = RigConfig {
        collection_interval_secs: 0.01,
        output_dir: output_dir.to_path_buf(),
        equilibration: EquilibrationConfig {
            enabled: false,
            ..EquilibrationConfig::default()
        },
        ..RigConfig::default()
    };
    RunOptions::from_config(&config, 1.0)
}

fn read_rows(path: &Path) -> (csv::StringRecord, Vec<csv::StringRecord>) {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let headers = reader.headers().unwrap().clone();
    let rows = reader.records().map(Result::unwrap).collect();
    (headers, rows)
}

fn column<'a>(headers: &csv::StringRecord, rows: &'a [csv::StringRecord], name: &str) -> Vec<&'a str> {
    let index = headers.iter().position(|header| header == name).unwrap();
    rows.iter().map(|row| &row[index]).collect()
}

// =============================================================================
// Setpoint files
// =============================================================================

#[test]
fn test_sequence_file_keeps_row_order() {
    let dir = TempDir::new().unwrap();
    let path = write_sequence(&dir, SEQUENCE);

    let setpoints = read_setpoint_sequence_file(&path).unwrap();

    let temperatures: Vec<f64> = setpoints.iter().map(|s| s.temperature).collect();
    assert_eq!(temperatures, vec![35.0, 15.0, 25.0]);
    assert_eq!(setpoints[1].o2_target_gas_fraction, 0.05);
    assert_eq!(setpoints[2].flow_rate_slpm, 3.0);
}

#[test]
fn test_missing_sequence_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        read_setpoint_sequence_file(dir.path().join("nope.csv")),
        Err(RigError::Io(_))
    ));
}

// =============================================================================
// Full runs
// =============================================================================

#[test]
fn test_dry_run_writes_one_row_per_sample() {
    let dir = TempDir::new().unwrap();
    let setpoints = read_setpoint_sequence_file(write_sequence(&dir, SEQUENCE)).unwrap();
    let sim = SimulatedRig::new();
    let rig = Rig::new(&sim, &PortsConfig::default());
    let output_dir = dir.path().join("out");

    let path = run_calibration(&rig, &setpoints, &quick_options(&output_dir)).unwrap();

    assert_eq!(path.parent().unwrap(), output_dir);
    let filename = path.file_name().unwrap().to_string_lossy();
    assert!(filename.ends_with("_calibration.csv"), "{filename}");

    let (headers, rows) = read_rows(&path);
    // 0.02 s / 0.01 s = 2 samples, then 1 each (floor of one sample)
    assert_eq!(rows.len(), 4);
    assert_eq!(
        column(&headers, &rows, "setpoint temperature (C)"),
        vec!["35.0", "35.0", "15.0", "25.0"]
    );
    assert_eq!(
        column(&headers, &rows, "water bath internal temperature (C)"),
        vec!["35.0", "35.0", "15.0", "25.0"]
    );
    assert_eq!(
        column(&headers, &rows, "gas mixer flow rate (SLPM)"),
        vec!["2.5", "2.5", "2.5", "3.0"]
    );
    assert!(column(&headers, &rows, "o2 source gas fraction")
        .iter()
        .all(|fraction| *fraction == "1.0"));

    // Rig is left safe
    assert!(!sim.is_mixing());
    assert!(!sim.bath_switch(Switch::UnitOnOff));
}

#[test]
fn test_lean_source_gas_scales_the_mix() {
    let dir = TempDir::new().unwrap();
    let sim = SimulatedRig::with_source_gas_o2_fraction(0.5);
    let rig = Rig::new(&sim, &PortsConfig::default());
    let mut options = quick_options(dir.path());
    options.o2_source_gas_fraction = 0.5;

    let setpoints = read_setpoint_sequence_file(write_sequence(
        &dir,
        "temperature,flow_rate_slpm,o2_target_gas_fraction,hold_time\n20,2.5,0.2,0\n",
    ))
    .unwrap();
    let path = run_calibration(&rig, &setpoints, &options).unwrap();

    let (headers, rows) = read_rows(&path);
    let source_fraction: f64 = column(&headers, &rows, "gas mixer O2 source gas fraction in mix")[0]
        .parse()
        .unwrap();
    assert!((source_fraction - 0.4).abs() < 1e-9);
}

#[test]
fn test_invalid_sequence_is_rejected_before_start() {
    let dir = TempDir::new().unwrap();
    let setpoints = read_setpoint_sequence_file(write_sequence(
        &dir,
        "temperature,flow_rate_slpm,o2_target_gas_fraction,hold_time\n\
         20,2.5,0.2,0\n\
         -5,2.5,0.2,0\n\
         20,0.1,0.2,0\n",
    ))
    .unwrap();
    let sim = SimulatedRig::new();
    let rig = Rig::new(&sim, &PortsConfig::default());

    let error = run_calibration(&rig, &setpoints, &quick_options(dir.path())).unwrap_err();

    let RigError::InvalidSetpoints(invalid) = &error else {
        panic!("unexpected error {error}");
    };
    let rows: Vec<usize> = invalid.iter().map(|(index, _)| *index).collect();
    assert_eq!(rows, vec![1, 2]);
    assert!(error.to_string().contains("temperature < 0 C"));
    assert!(!sim.bath_switch(Switch::UnitOnOff));
}

#[test]
fn test_bath_in_local_mode_fails_initialization() {
    let dir = TempDir::new().unwrap();
    let sim = SimulatedRig::new();
    sim.set_front_panel_serial(false);
    let rig = Rig::new(&sim, &PortsConfig::default());
    let setpoints = read_setpoint_sequence_file(write_sequence(&dir, SEQUENCE)).unwrap();

    let result = run_calibration(&rig, &setpoints, &quick_options(dir.path()));

    match result {
        Err(RigError::Initialization(errors)) => {
            assert!(errors.iter().any(|e| e.contains("Serial comms aren't enabled")));
        }
        other => panic!("expected initialization error, got {other:?}"),
    }
}

#[test]
fn test_status_alarm_aborts_run() {
    let dir = TempDir::new().unwrap();
    let sim = SimulatedRig::new();
    sim.set_low_feed_pressure(false, true);
    let rig = Rig::new(&sim, &PortsConfig::default());
    let setpoints = read_setpoint_sequence_file(write_sequence(&dir, SEQUENCE)).unwrap();

    let result = run_calibration(&rig, &setpoints, &quick_options(dir.path()));

    match result {
        Err(RigError::CalibrationAbort(problems)) => {
            assert!(problems[0].contains("low feed pressure alarm - O2 source gas"));
        }
        other => panic!("expected abort, got {other:?}"),
    }
    assert!(!sim.bath_switch(Switch::UnitOnOff));
}

#[test]
fn test_silent_probe_times_out_and_shuts_down() {
    let dir = TempDir::new().unwrap();
    let sim = SimulatedRig::new();
    sim.set_silent(SimulatedDevice::Ysi, true);
    let rig = Rig::new(&sim, &PortsConfig::default());
    let setpoints = read_setpoint_sequence_file(write_sequence(&dir, SEQUENCE)).unwrap();

    let result = run_calibration(&rig, &setpoints, &quick_options(dir.path()));

    match result {
        Err(RigError::Timeout { port, received }) => {
            assert_eq!(port, PortsConfig::default().ysi);
            assert_eq!(received, 0);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(!sim.is_mixing());
    assert!(!sim.bath_switch(Switch::UnitOnOff));
}

#[test]
fn test_equilibrated_run_logs_waiting_rows() {
    let dir = TempDir::new().unwrap();
    let sim = SimulatedRig::new();
    let rig = Rig::new(&sim, &PortsConfig::default());
    let mut options = quick_options(dir.path());
    options.equilibration = EquilibrationConfig {
        enabled: true,
        temperature_min_stable_time: Duration::from_millis(20),
        do_min_stable_time: Duration::from_millis(20),
        poll_interval: Duration::from_millis(5),
        ..EquilibrationConfig::default()
    };
    let setpoints = read_setpoint_sequence_file(write_sequence(&dir, SEQUENCE)).unwrap();

    let path = run_calibration(&rig, &setpoints, &options).unwrap();

    let (headers, rows) = read_rows(&path);
    let statuses = column(&headers, &rows, "equilibration status");
    assert!(statuses.contains(&"waiting for temperature"));
    assert!(statuses.contains(&"waiting for do"));
    assert_eq!(statuses.iter().filter(|s| **s == "equilibrated").count(), 4);
}
