//! Waiting for the bath to settle at a setpoint.
//!
//! The YSI is sampled every poll interval, with every sample logged. A reading
//! counts as equilibrated once the samples span at least the minimum stable
//! time and, within the trailing window of that length, max - min is no more
//! than the allowed variation.

use super::data_logging::{CalibrationRow, DataCollector, EquilibrationStatus};
use super::Setpoint;
use crate::config::EquilibrationConfig;
use crate::error::RigResult;
use crate::hardware::Transport;
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

/// Whether `samples` (oldest first) have been stable for `min_stable_time`.
pub fn is_field_equilibrated(
    samples: &[(Instant, f64)],
    max_variation: f64,
    min_stable_time: Duration,
) -> bool {
    let (Some((oldest, _)), Some((newest, _))) = (samples.first(), samples.last()) else {
        return false;
    };
    if newest.duration_since(*oldest) < min_stable_time {
        return false;
    }

    let window_start = newest.checked_sub(min_stable_time).unwrap_or(*oldest);
    let (min, max) = samples
        .iter()
        .filter(|(taken, _)| *taken >= window_start)
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), (_, value)| {
            (min.min(*value), max.max(*value))
        });

    // Rounded so that e.g. 0.1 + 0.2 - 0.2 compares equal to 0.1
    let variation = ((max - min) * 1e5).round() / 1e5;
    variation <= max_variation
}

struct Criterion {
    status: EquilibrationStatus,
    max_variation: f64,
    min_stable_time: Duration,
    field: fn(&CalibrationRow) -> f64,
}

fn wait_for_equilibration<T: Transport>(
    collector: &mut DataCollector<'_, T>,
    setpoint: &Setpoint,
    loop_count: u64,
    criterion: &Criterion,
    poll_interval: Duration,
) -> RigResult<f64> {
    let mut samples = Vec::new();
    loop {
        let row = collector.collect_data_to_csv(setpoint, loop_count, criterion.status)?;
        let value = (criterion.field)(&row);
        samples.push((Instant::now(), value));

        if is_field_equilibrated(&samples, criterion.max_variation, criterion.min_stable_time) {
            return Ok(value);
        }
        thread::sleep(poll_interval);
    }
}

/// Block until the YSI temperature is stable.
pub fn wait_for_temperature_equilibration<T: Transport>(
    collector: &mut DataCollector<'_, T>,
    setpoint: &Setpoint,
    loop_count: u64,
    config: &EquilibrationConfig,
) -> RigResult<()> {
    info!(
        target_temperature = setpoint.temperature,
        "Waiting for water bath temperature equilibration"
    );
    let criterion = Criterion {
        status: EquilibrationStatus::Temperature,
        max_variation: config.temperature_max_variation,
        min_stable_time: config.temperature_min_stable_time,
        field: |row| row.ysi_temperature_c,
    };
    let temperature =
        wait_for_equilibration(collector, setpoint, loop_count, &criterion, config.poll_interval)?;
    info!(ysi_temperature_c = temperature, "Water bath temperature equilibrated");
    Ok(())
}

/// Block until the YSI dissolved oxygen reading is stable.
pub fn wait_for_do_equilibration<T: Transport>(
    collector: &mut DataCollector<'_, T>,
    setpoint: &Setpoint,
    loop_count: u64,
    config: &EquilibrationConfig,
) -> RigResult<()> {
    info!("Waiting for DO equilibration");
    let criterion = Criterion {
        status: EquilibrationStatus::Do,
        max_variation: config.do_max_variation,
        min_stable_time: config.do_min_stable_time,
        field: |row| row.ysi_do_mg_per_l,
    };
    let do_mg_per_l =
        wait_for_equilibration(collector, setpoint, loop_count, &criterion, config.poll_interval)?;
    info!(ysi_do_mg_per_l = do_mg_per_l, "DO equilibrated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{CalibrationLog, Rig};
    use crate::config::PortsConfig;
    use crate::hardware::SimulatedRig;
    use tempfile::TempDir;

    fn series(start: Instant, points: &[(u64, f64)]) -> Vec<(Instant, f64)> {
        points
            .iter()
            .map(|(secs, value)| (start + Duration::from_secs(*secs), *value))
            .collect()
    }

    const FIVE_MINUTES: Duration = Duration::from_secs(300);

    #[test]
    fn not_enough_data() {
        let start = Instant::now();
        assert!(!is_field_equilibrated(&[], 0.1, FIVE_MINUTES));
        let samples = series(start, &[(0, 20.0), (120, 20.0), (299, 20.0)]);
        assert!(!is_field_equilibrated(&samples, 0.1, FIVE_MINUTES));
    }

    #[test]
    fn stable_window_is_equilibrated() {
        let start = Instant::now();
        let samples = series(start, &[(0, 20.0), (150, 20.05), (300, 20.1)]);
        assert!(is_field_equilibrated(&samples, 0.1, FIVE_MINUTES));
    }

    #[test]
    fn variation_within_window_is_not() {
        let start = Instant::now();
        let samples = series(start, &[(0, 20.0), (150, 20.2), (300, 20.0)]);
        assert!(!is_field_equilibrated(&samples, 0.1, FIVE_MINUTES));
    }

    #[test]
    fn samples_before_window_are_ignored() {
        let start = Instant::now();
        let samples = series(start, &[(0, 15.0), (100, 19.0), (200, 20.0), (400, 20.03), (500, 20.01)]);
        assert!(is_field_equilibrated(&samples, 0.03, FIVE_MINUTES));
    }

    #[test]
    fn floating_point_error_is_rounded_away() {
        let start = Instant::now();
        let samples = series(start, &[(0, 0.2), (300, 0.1 + 0.2)]);
        assert!(is_field_equilibrated(&samples, 0.1, FIVE_MINUTES));
    }

    #[test]
    fn waits_log_rows_with_status() {
        let dir = TempDir::new().unwrap();
        let sim = SimulatedRig::new();
        let rig = Rig::new(&sim, &PortsConfig::default());
        rig.water_bath.initialize().unwrap();
        rig.water_bath.set_setpoint(30.0).unwrap();

        let config = EquilibrationConfig {
            temperature_min_stable_time: Duration::from_millis(20),
            do_min_stable_time: Duration::from_millis(20),
            poll_interval: Duration::from_millis(5),
            ..EquilibrationConfig::default()
        };
        let setpoint = Setpoint {
            temperature: 30.0,
            flow_rate_slpm: 2.5,
            o2_target_gas_fraction: 0.2,
            hold_time: 0.0,
        };

        let mut log = CalibrationLog::open(dir.path().join("eq.csv")).unwrap();
        let mut collector = DataCollector::new(&rig, &mut log, 1.0);
        wait_for_temperature_equilibration(&mut collector, &setpoint, 0, &config).unwrap();
        wait_for_do_equilibration(&mut collector, &setpoint, 0, &config).unwrap();
        drop(collector);

        let mut reader = csv::Reader::from_path(log.path()).unwrap();
        let statuses: Vec<String> = reader
            .records()
            .map(|record| record.unwrap()[1].to_string())
            .collect();
        assert!(statuses.len() >= 4);
        assert_eq!(statuses[0], "waiting for temperature");
        assert_eq!(statuses.last().unwrap(), "waiting for do");
    }
}
