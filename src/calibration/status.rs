//! Pre-flight status check, run before every setpoint.

use super::Rig;
use crate::error::{RigError, RigResult};
use crate::hardware::Transport;
use tracing::{debug, error};

/// Check the gas mixer and water bath are good to go.
///
/// Both devices are always checked. Any status error, or any failure to
/// read status at all, is logged and collected into
/// [`RigError::CalibrationAbort`].
pub fn check_status<T: Transport>(rig: &Rig<T>) -> RigResult<()> {
    let mut problems = Vec::new();

    for (device, result) in [
        ("Gas mixer", rig.gas_mixer.assert_status_ok()),
        ("Water bath", rig.water_bath.assert_status_ok()),
    ] {
        if let Err(e) = result {
            error!(device, error = %e, "Status check failed");
            problems.push(format!("{device}: {e}"));
        }
    }

    if problems.is_empty() {
        debug!("Clean status check");
        Ok(())
    } else {
        Err(RigError::CalibrationAbort(problems))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortsConfig;
    use crate::hardware::water_bath::SettingsBitfield;
    use crate::hardware::{SimulatedDevice, SimulatedRig};
    use tracing_test::traced_test;

    fn started(sim: &SimulatedRig) -> Rig<&SimulatedRig> {
        let rig = Rig::new(sim, &PortsConfig::default());
        rig.water_bath.initialize().unwrap();
        rig
    }

    #[test]
    fn clean_rig_passes() {
        let sim = SimulatedRig::new();
        assert!(check_status(&started(&sim)).is_ok());
    }

    #[test]
    #[traced_test]
    fn collects_problems_from_both_devices() {
        let sim = SimulatedRig::new();
        let rig = started(&sim);
        sim.set_low_feed_pressure(true, false);
        sim.raise_bath_flag("high_temp_fault");

        let Err(RigError::CalibrationAbort(problems)) = check_status(&rig) else {
            panic!("expected abort");
        };
        assert_eq!(problems.len(), 2);
        assert!(problems[0].starts_with("Gas mixer"));
        assert!(problems[0].contains("low feed pressure alarm - N2"));
        assert!(problems[1].starts_with("Water bath"));
        assert!(problems[1].contains("high_temp_fault"));
        assert!(logs_contain("Status check failed"));
    }

    #[test]
    fn silent_device_aborts() {
        let sim = SimulatedRig::new();
        let rig = started(&sim);
        sim.set_silent(SimulatedDevice::WaterBath, true);

        let Err(RigError::CalibrationAbort(problems)) = check_status(&rig) else {
            panic!("expected abort");
        };
        assert_eq!(problems.len(), 1);
        assert!(problems[0].starts_with("Water bath"));
    }

    #[test]
    fn bath_turned_off_is_not_a_status_error() {
        let sim = SimulatedRig::new();
        let rig = started(&sim);
        rig.water_bath.send_settings(&SettingsBitfield::unit_off()).unwrap();
        assert!(check_status(&rig).is_ok());
    }
}
