//! Water bath protocol behaviour through the public entry points.

use calibration_rig::hardware::water_bath::packet::REPLY_END;
use calibration_rig::hardware::water_bath::{
    decode, encode, initialize, send_command_and_parse_response, Command, SerialPacket,
    SettingsBitfield, WaterBath, LINE,
};
use calibration_rig::hardware::{ScriptedTransport, SerialTransport, SimulatedRig, Transport};
use calibration_rig::RigError;

#[test]
fn test_setpoint_round_trips_at_two_decimals() {
    let rig = SimulatedRig::new();
    let bath = WaterBath::new(&rig, "COM21");
    bath.initialize().unwrap();

    for temperature in [27.85, 0.01, -10.5, 99.99] {
        assert_eq!(bath.set_setpoint(temperature).unwrap(), temperature);
        assert_eq!(
            send_command_and_parse_response(&rig, "COM21", Command::ReadSetpoint, None).unwrap(),
            temperature
        );
    }
}

#[test]
fn test_encoded_set_command_decodes_to_the_same_value() {
    let rig = SimulatedRig::new();
    let bath = WaterBath::new(&rig, "COM21");
    bath.initialize().unwrap();

    let command = encode(Command::SetSetpoint, Some(27.85)).unwrap();
    let reply = rig.exchange("COM21", &LINE, &command, &REPLY_END).unwrap();
    assert_eq!(decode(Command::SetSetpoint, &reply).unwrap(), 27.85);
}

#[test]
fn test_every_valid_settings_tuple_constructs() {
    for n in 0..3u32.pow(8) {
        let mut codes = [0u8; 8];
        let mut rest = n;
        for code in codes.iter_mut() {
            *code = (rest % 3) as u8;
            rest /= 3;
        }
        assert!(SettingsBitfield::from_codes(codes).is_ok(), "{codes:?}");
    }
}

#[test]
fn test_out_of_range_code_is_invalid_setting() {
    for position in 0..8 {
        let mut codes = [2u8; 8];
        codes[position] = 3;
        assert!(matches!(
            SettingsBitfield::from_codes(codes),
            Err(RigError::InvalidSetting { position: p, code: 3 }) if p == position + 1
        ));
    }
}

#[test]
fn test_recovery_presets() {
    assert_eq!(
        SettingsBitfield::unit_off().to_data_bytes(),
        [0, 2, 2, 2, 2, 2, 2, 2]
    );
    assert_eq!(
        SettingsBitfield::serial_off().to_data_bytes(),
        [2, 2, 2, 2, 2, 2, 2, 0]
    );
}

#[test]
fn test_initialize_rejects_wrong_precision_echo() {
    // Unit on, internal sensor, serial on, but still at 0.1 precision
    let echoed = SettingsBitfield::from_codes([1, 0, 1, 0, 0, 0, 0, 1]).unwrap();
    let transport = ScriptedTransport::new().reply(
        SerialPacket::new(0x81, echoed.to_data_bytes().to_vec())
            .unwrap()
            .to_bytes(),
    );
    match initialize(&transport, "COM21") {
        Err(RigError::Initialization(errors)) => {
            assert_eq!(errors, vec!["Precision isn't 0.01".to_string()]);
        }
        other => panic!("expected initialization error, got {other:?}"),
    }
}

#[test]
fn test_no_reply_is_timeout_not_empty_result() {
    let transport = ScriptedTransport::new();
    let result =
        send_command_and_parse_response(&transport, "COM21", Command::ReadInternalTemperature, None);
    assert!(matches!(result, Err(RigError::Timeout { received: 0, .. })));
}

#[test]
fn test_unopenable_port_is_port_error() {
    let bath = WaterBath::new(
        SerialTransport::new(),
        "/dev/calibration-rig-does-not-exist",
    );
    assert!(matches!(bath.read_temperature(), Err(RigError::Port { .. })));
}
