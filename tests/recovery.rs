//! Error paths: play timeouts, fatal gating, overflowing compositions and
//! missing modules.
//!
//! These run against `SimulatedFpga` configured to misbehave (stalled
//! sequencer, absent modules, pacing tighter than the board accepts).

use std::time::Duration;

use kosmos::config::PacingConfig;
use kosmos::{
    msg, ButtonStimuli, EmulatorKind, KeyId, Kosmos, KosmosConfig, KosmosError, Module,
    SimulatedFpga,
};

#[test]
fn timed_out_play_requires_reset_before_next_play() {
    let sim = SimulatedFpga::new().with_stall(true);
    let (kosmos, sim) = Kosmos::simulated_with(sim, KosmosConfig::default()).unwrap();
    let dt = kosmos.dt();
    let galvanic = kosmos.galvanic_emulator().unwrap();

    dt.sequencer()
        .compose(|| galvanic.key_press(KeyId::PLAY_PAUSE))
        .unwrap();
    let err = dt
        .sequencer()
        .play_sequence(Duration::from_millis(20))
        .unwrap_err();
    assert!(matches!(err, KosmosError::PlayTimeout(_)));
    assert!(dt.reset_required());

    // Every further play is refused, even once the board would answer
    sim.set_stall(false);
    assert!(matches!(
        galvanic.key_press(KeyId::VOLUME_UP),
        Err(KosmosError::ResetRequired)
    ));

    kosmos.reset_all().unwrap();
    assert!(!dt.reset_required());
    assert_eq!(dt.pes().length(), 0);
    assert!(galvanic.closed_cells().is_empty());

    sim.clear_traces();
    galvanic.key_press(KeyId::VOLUME_UP).unwrap();
    assert_eq!(sim.matrix_wire(), vec![(4, 0)]);
    assert_eq!(sim.kbd_pending(msg::KBD_MATRIX), 0);
}

#[test]
fn underrun_records_fatal_and_gates_plays_until_cleared() {
    // 1 µs pacing is well under what the simulated KBD modules accept
    let config = KosmosConfig {
        pacing: PacingConfig {
            kbd_update_delay_ns: 1_000,
            ..PacingConfig::default()
        },
        ..KosmosConfig::default()
    };
    let (kosmos, _sim) = Kosmos::simulated(config).unwrap();
    let dt = kosmos.dt();
    let gtech = kosmos.gtech_emulator().unwrap();

    gtech
        .multiple_keys_press(&[KeyId::KEYBOARD_A, KeyId::KEYBOARD_B], None)
        .unwrap();

    let module = dt.kbd_gtech().unwrap();
    let status = module.status(false).unwrap();
    assert!(status.common.underrun);
    assert!(dt.fatal().get().is_none());

    let err = module.status(true).unwrap_err();
    assert!(matches!(err, KosmosError::SanityChecks(_)));
    assert!(dt.fatal().get().is_some());
    assert!(kosmos.check_fatal().is_err());

    assert!(matches!(
        gtech.key_release(KeyId::KEYBOARD_A),
        Err(KosmosError::Fatal(_))
    ));

    assert!(kosmos.clear_fatal().is_some());
    assert!(kosmos.clear_fatal().is_none());
    kosmos.reset_all().unwrap();
    assert!(!module.status(true).unwrap().common.underrun);
}

#[test]
fn overflowing_keystroke_leaves_no_partial_sequence() {
    let (kosmos, sim) = Kosmos::simulated(KosmosConfig::default()).unwrap();
    let dt = kosmos.dt();
    let galvanic = kosmos.galvanic_emulator().unwrap();
    let matrix = dt.kbd_matrix().unwrap();
    galvanic.key_press(KeyId::NEXT_TRACK).unwrap();
    sim.clear_traces();

    // 300 repeats need 1200 matrix entries, the list holds 512
    let err = galvanic
        .keystroke_with(KeyId::PLAY_PAUSE, Duration::from_millis(1), 300, Duration::from_millis(1))
        .unwrap_err();
    assert!(matches!(err, KosmosError::BufferFull { .. }));
    assert_eq!(dt.pes().length(), 0);
    assert_eq!(matrix.length(), 0);
    assert!(galvanic.is_pressed(KeyId::NEXT_TRACK));
    assert!(!galvanic.is_pressed(KeyId::PLAY_PAUSE));
    assert!(sim.pes_trace().is_empty());

    galvanic.key_press(KeyId::VOLUME_UP).unwrap();
    assert_eq!(sim.matrix_trace().len(), 2);
    assert_eq!(galvanic.closed_cells().len(), 2);
    assert!(kosmos.check_fatal().is_ok());
}

#[test]
fn failed_composition_keeps_what_was_queued_before_it() {
    let (kosmos, sim) = Kosmos::simulated(KosmosConfig::default()).unwrap();
    let dt = kosmos.dt();
    let dual = kosmos.dual_emulator().unwrap();
    let seq = dt.sequencer();

    seq.set_offline_mode(true);
    dual.key_press(KeyId::KEYBOARD_A).unwrap();
    let pes_before = dt.pes().length();
    let gtech_before = dt.kbd_gtech().unwrap().length();

    // A fused press of 600 chain updates overflows the 512-entry list
    let overflow = vec![KeyId::KEYBOARD_C; 600];
    assert!(dual.multiple_keys_press(&overflow, None).is_err());
    assert_eq!(dual.gtech().level(KeyId::KEYBOARD_C), Some(0));
    assert!(dual.gtech().level(KeyId::KEYBOARD_A).unwrap() > 0);
    assert_eq!(dt.kbd_gtech().unwrap().length(), gtech_before);
    assert_eq!(dt.pes().length(), pes_before);

    let err = seq
        .compose(|| {
            dual.key_press(KeyId::PLAY_PAUSE)?;
            dual.key_press(KeyId::KEYBOARD_B)?;
            Err::<(), _>(KosmosError::InvalidParameter("abandoned".into()))
        })
        .unwrap_err();
    assert!(matches!(err, KosmosError::InvalidParameter(_)));
    assert!(seq.offline_mode());
    assert_eq!(dt.pes().length(), pes_before);
    assert_eq!(dt.kbd_gtech().unwrap().length(), gtech_before);
    assert_eq!(dt.kbd_matrix().unwrap().length(), 0);

    seq.set_offline_mode(false);
    seq.play_if_online().unwrap();
    assert!(sim.matrix_wire().is_empty());
    assert_eq!(sim.gtech_wire().len(), 1);
    assert_eq!(dt.kbd_gtech().unwrap().status(true).unwrap().send_count, 1);
}

#[test]
fn reset_all_is_idempotent() {
    let (kosmos, sim) = Kosmos::simulated(KosmosConfig::default()).unwrap();
    let dual = kosmos.dual_emulator().unwrap();

    dual.key_press(KeyId::KEYBOARD_SPACE_BAR).unwrap();
    assert!(!sim.gtech_wire().is_empty());

    kosmos.reset_all().unwrap();
    kosmos.reset_all().unwrap();
    assert!(sim.gtech_wire().is_empty());
    assert_eq!(dual.gtech().level(KeyId::KEYBOARD_SPACE_BAR), Some(0));

    for module in kosmos.dt().modules() {
        let status = module.status_common(true).unwrap();
        assert_eq!(status.buffer_count, 0, "{}", module.name());
        assert!(!status.underrun && !status.overrun, "{}", module.name());
    }
}

#[test]
fn absent_optional_modules_are_reported_not_fatal() {
    let sim = SimulatedFpga::new()
        .without(msg::I2C_SPY)
        .without(msg::OPTICAL_SENSOR);
    let (kosmos, _sim) = Kosmos::simulated_with(sim, KosmosConfig::default()).unwrap();
    let dt = kosmos.dt();

    assert!(dt.i2c_spy().is_none());
    assert!(dt.optical_sensor().is_none());
    assert!(dt.rgb_spy().is_some());
    assert!(!dt.module_names().contains(&"I2C_SPY"));
    assert!(matches!(
        dt.require_i2c_spy(),
        Err(KosmosError::ModuleAbsent("I2C_SPY"))
    ));

    assert_eq!(kosmos.discover_emulator(EmulatorKind::I2cSpy, 1), None);
    assert!(matches!(
        kosmos.require_device(EmulatorKind::OpticalSensor, 1),
        Err(KosmosError::DeviceMissing { required: 1, found: 0, .. })
    ));

    // The rest of the board keeps working
    kosmos.reset_all().unwrap();
    assert!(kosmos.check_fatal().is_ok());
}

#[test]
fn galvanic_only_board_refuses_dual_emulator() {
    let sim = SimulatedFpga::new().without(msg::KBD_GTECH);
    let (kosmos, _sim) = Kosmos::simulated_with(sim, KosmosConfig::default()).unwrap();

    assert!(matches!(
        kosmos.dual_emulator(),
        Err(KosmosError::ModuleAbsent("KBD_GTECH"))
    ));
    assert!(kosmos.gtech_emulator().is_err());
    assert!(kosmos.galvanic_emulator().is_ok());
}
