//! End-to-end scenarios against the in-process board simulator.
//!
//! Each test builds a `Kosmos` runtime over `SimulatedFpga`, drives it
//! through the public API and checks what the simulated modules executed.

use std::sync::Arc;
use std::time::Duration;

use kosmos::i2c_spy::{I2cFrame, I2cMode};
use kosmos::kbd::{GtechEntry, KbdCommand, KbdEntry, MatrixEntry};
use kosmos::module::DownloadModule;
use kosmos::rgb_spy::parser::{ReferenceEffect, RgbColor, RgbSample};
use kosmos::{
    ButtonStimuli, KeyId, Kosmos, KosmosConfig, PesActionEvent, PesInstruction, PesResumeEvent,
    SimulatedFpga,
};

fn board() -> (Kosmos, Arc<SimulatedFpga>) {
    Kosmos::simulated(KosmosConfig::default()).unwrap()
}

fn matrix_commands(trace: &[(u64, MatrixEntry)]) -> Vec<KbdCommand> {
    trace.iter().map(|(_, e)| e.command()).collect()
}

fn gtech_commands(trace: &[(u64, GtechEntry)]) -> Vec<KbdCommand> {
    trace.iter().map(|(_, e)| e.command()).collect()
}

// ── Single galvanic keystroke ──

#[test]
fn galvanic_keystroke_updates_and_sends_twice() {
    let (kosmos, sim) = board();
    let galvanic = kosmos.galvanic_emulator().unwrap();

    galvanic.keystroke(KeyId::PLAY_PAUSE).unwrap();

    let trace = sim.matrix_trace();
    assert_eq!(
        matrix_commands(&trace),
        vec![KbdCommand::Update, KbdCommand::Send, KbdCommand::Update, KbdCommand::Send]
    );
    assert_eq!(trace[0].1, MatrixEntry::update(0, 0, true));
    assert_eq!(trace[2].1, MatrixEntry::update(0, 0, false));
    // Release comes a full hold time (50 ms at 100 MHz) after the press
    assert!(trace[2].0 - trace[1].0 >= 5_000_000);

    assert!(sim.gtech_trace().is_empty());
    assert!(sim.matrix_wire().is_empty());
    assert!(!galvanic.is_pressed(KeyId::PLAY_PAUSE));
}

#[test]
fn keystroke_of_foreign_key_is_rejected_before_anything_is_queued() {
    let (kosmos, sim) = board();
    let galvanic = kosmos.galvanic_emulator().unwrap();

    assert!(galvanic.keystroke(KeyId::KEYBOARD_A).is_err());
    assert_eq!(kosmos.dt().pes().length(), 0);
    assert!(sim.pes_trace().is_empty());
}

// ── Fused bi-modal press ──

#[test]
fn fused_dual_press_composes_one_combined_commit() {
    let (kosmos, sim) = board();
    let dual = kosmos.dual_emulator().unwrap();
    let dt = kosmos.dt();
    let keys = [KeyId::PLAY_PAUSE, KeyId::VOLUME_UP, KeyId::KEYBOARD_A, KeyId::KEYBOARD_B];

    dt.sequencer()
        .compose(|| dual.multiple_keys_press(&keys, None))
        .unwrap();

    let staged = [KbdCommand::Update, KbdCommand::Update, KbdCommand::Send];
    assert_eq!(dt.kbd_matrix().unwrap().commands(), staged);
    assert_eq!(dt.kbd_gtech().unwrap().commands(), staged);

    let pacing = PesInstruction::Delay(400);
    let matrix_triplet = [
        PesInstruction::Execute(PesActionEvent::KBD_MATRIX_SEND),
        PesInstruction::Wait(PesResumeEvent::KBD_MATRIX_READY),
        pacing,
    ];
    let gtech_triplet = [
        PesInstruction::Execute(PesActionEvent::KBD_GTECH_SEND),
        PesInstruction::Wait(PesResumeEvent::KBD_GTECH_READY),
        pacing,
    ];
    let mut expected = Vec::new();
    expected.extend(matrix_triplet);
    expected.extend(matrix_triplet);
    expected.extend(gtech_triplet);
    expected.extend(gtech_triplet);
    expected.push(PesInstruction::Execute(
        PesActionEvent::KBD_MATRIX_SEND | PesActionEvent::KBD_GTECH_SEND,
    ));
    expected.push(PesInstruction::Wait(
        PesResumeEvent::KBD_MATRIX_READY | PesResumeEvent::KBD_GTECH_READY,
    ));
    assert_eq!(dt.pes().instructions(), expected);

    // Nothing reached the board while composing
    assert!(sim.pes_trace().is_empty());

    dt.sequencer().play_sequence(Duration::from_secs(1)).unwrap();
    assert_eq!(sim.matrix_wire(), vec![(0, 0), (4, 0)]);
    let levels = sim.gtech_wire();
    assert_eq!(levels.get(&0), Some(&kosmos_keyboard::DEFAULT_PRESS_LEVEL));
    assert_eq!(levels.get(&1), Some(&kosmos_keyboard::DEFAULT_PRESS_LEVEL));
    assert_eq!(dt.pes().length(), 0);
}

#[test]
fn fused_commit_fires_both_sends_on_one_cycle() {
    let (kosmos, sim) = board();
    let dual = kosmos.dual_emulator().unwrap();

    dual.multiple_keys_press(&[KeyId::NEXT_TRACK, KeyId::KEYBOARD_C], None)
        .unwrap();

    let matrix = sim.matrix_trace();
    let gtech = sim.gtech_trace();
    let (matrix_send, _) = matrix.last().copied().unwrap();
    let (gtech_send, _) = gtech.last().copied().unwrap();
    assert_eq!(matrix_send, gtech_send);

    // PES runs strictly in order
    let pes = sim.pes_trace();
    assert!(pes.windows(2).all(|w| w[0].0 < w[1].0));
    assert_eq!(pes.iter().filter(|(_, i)| i.is_execute()).count(), 3);
}

#[test]
fn staggered_press_of_every_key_one_cycle_apart() {
    let (kosmos, sim) = board();
    let dt = kosmos.dt();
    let dual = kosmos.dual_emulator().unwrap();
    let layout = dual.layout();
    let all_keys: Vec<KeyId> = layout
        .galvanic_keys()
        .map(|(key, _, _)| key)
        .chain(layout.analog_keys().map(|(key, _)| key))
        .collect();
    let matrix_keys = layout.galvanic_keys().count();
    let chain_keys = layout.analog_keys().count();
    let one_cycle = Duration::from_nanos(1_000_000_000 / dt.core_clock_hz());

    dual.multiple_keys_press(&all_keys, Some(one_cycle)).unwrap();
    assert_eq!(sim.matrix_wire().len(), matrix_keys);
    assert_eq!(sim.gtech_wire().len(), chain_keys);

    dual.multiple_keys_release(&all_keys, Some(one_cycle)).unwrap();
    assert!(sim.matrix_wire().is_empty());
    assert!(sim.gtech_wire().is_empty());

    let matrix = dt.kbd_matrix().unwrap().status(false).unwrap();
    let gtech = dt.kbd_gtech().unwrap().status(false).unwrap();
    assert!(!matrix.common.underrun && !gtech.common.underrun);
    assert_eq!(matrix.update_count as usize, 2 * matrix_keys);
    assert_eq!(gtech.update_count as usize, 2 * chain_keys);
    assert!(kosmos.check_fatal().is_ok());
}

#[test]
fn pes_runs_delays_and_events_in_order_with_exact_gaps() {
    let (kosmos, sim) = board();
    let dt = kosmos.dt();
    let matrix = dt.kbd_matrix().unwrap();
    let gtech = dt.kbd_gtech().unwrap();
    let pes = dt.pes();
    let (a, b) = (1_000u64, 250u64);
    let both_send = PesActionEvent::KBD_MATRIX_SEND | PesActionEvent::KBD_GTECH_SEND;
    let both_ready = PesResumeEvent::KBD_MATRIX_READY | PesResumeEvent::KBD_GTECH_READY;

    dt.sequencer()
        .compose(|| {
            matrix.append(MatrixEntry::update(0, 0, true))?;
            matrix.append(MatrixEntry::send())?;
            gtech.append(GtechEntry::update(0, kosmos_keyboard::DEFAULT_PRESS_LEVEL))?;
            gtech.append(GtechEntry::send())?;

            pes.delay_cycles(a)?;
            pes.execute(PesActionEvent::KBD_MATRIX_SEND)?;
            pes.delay_cycles(b)?;
            pes.wait(PesResumeEvent::KBD_MATRIX_READY)?;
            pes.execute(PesActionEvent::KBD_GTECH_SEND)?;
            pes.wait(PesResumeEvent::KBD_GTECH_READY)?;
            pes.delay_cycles(400)?;
            pes.execute(both_send)?;
            pes.wait(both_ready)
        })
        .unwrap();
    dt.sequencer().play_sequence(Duration::from_secs(1)).unwrap();

    let trace = sim.pes_trace();
    let instructions: Vec<PesInstruction> = trace.iter().map(|(_, i)| *i).collect();
    assert_eq!(
        instructions,
        vec![
            PesInstruction::Delay(a as u32),
            PesInstruction::Execute(PesActionEvent::KBD_MATRIX_SEND),
            PesInstruction::Delay(b as u32),
            PesInstruction::Wait(PesResumeEvent::KBD_MATRIX_READY),
            PesInstruction::Execute(PesActionEvent::KBD_GTECH_SEND),
            PesInstruction::Wait(PesResumeEvent::KBD_GTECH_READY),
            PesInstruction::Delay(400),
            PesInstruction::Execute(both_send),
            PesInstruction::Wait(both_ready),
        ]
    );

    let start = trace[0].0;
    let cycles: Vec<u64> = trace.iter().map(|(c, _)| c - start).collect();
    // A delay lasts its own length, every other instruction one cycle
    assert_eq!(cycles[..4], [0, a, a + 1, a + 1 + b]);
    let fused_cycle = trace[7].0;
    assert_eq!(cycles[7], a + 1 + b + 1 + 1 + 1 + 400);

    // Both modules saw the fused EXECUTE on the same cycle
    let matrix_status = matrix.status(true).unwrap();
    let gtech_status = gtech.status(true).unwrap();
    assert_eq!(matrix_status.last_action_cycle as u64, fused_cycle);
    assert_eq!(gtech_status.last_action_cycle as u64, fused_cycle);
    assert_eq!(matrix_status.send_count, 1);
    assert_eq!(gtech_status.send_count, 1);
    assert_eq!(sim.matrix_wire(), vec![(0, 0)]);
}

#[test]
fn fn_alias_presses_fn_and_base_together() {
    let (kosmos, sim) = board();
    let dual = kosmos.dual_emulator().unwrap();

    dual.key_press(KeyId::FN_KEYBOARD_F1).unwrap();
    // FN_KEY at (0,1), F1 at (4,1)
    assert_eq!(sim.matrix_wire(), vec![(0, 1), (4, 1)]);
    assert_eq!(
        matrix_commands(&sim.matrix_trace()),
        vec![KbdCommand::Update, KbdCommand::Update, KbdCommand::Send]
    );

    dual.key_release(KeyId::FN_KEYBOARD_F1).unwrap();
    assert!(sim.matrix_wire().is_empty());
}

// ── Fastest pacing ──

#[test]
fn back_to_back_keystrokes_never_underrun() {
    let (kosmos, sim) = board();
    let dual = kosmos.dual_emulator().unwrap();

    dual.keystroke_with(KeyId::PLAY_PAUSE, Duration::ZERO, 40, Duration::ZERO)
        .unwrap();
    dual.keystroke_with(KeyId::KEYBOARD_D, Duration::ZERO, 40, Duration::ZERO)
        .unwrap();

    assert_eq!(sim.matrix_trace().len(), 160);
    assert_eq!(sim.gtech_trace().len(), 160);

    let dt = kosmos.dt();
    let matrix = dt.kbd_matrix().unwrap().status(true).unwrap();
    let gtech = dt.kbd_gtech().unwrap().status(true).unwrap();
    assert!(!matrix.common.underrun && !gtech.common.underrun);
    assert_eq!(matrix.update_count, 80);
    assert_eq!(gtech.send_count, 80);
    assert!(kosmos.check_fatal().is_ok());
}

// ── Release all ──

#[test]
fn release_all_empties_both_modules() {
    let (kosmos, sim) = board();
    let dual = kosmos.dual_emulator().unwrap();
    let dt = kosmos.dt();

    dual.multiple_keys_press(&[KeyId::VOLUME_DOWN, KeyId::KEYBOARD_SPACE_BAR], None)
        .unwrap();
    assert!(dual.galvanic().is_pressed(KeyId::VOLUME_DOWN));
    assert!(!sim.gtech_wire().is_empty());

    dual.release_all(Duration::from_millis(1)).unwrap();

    let matrix = dt.kbd_matrix().unwrap().status(true).unwrap();
    let gtech = dt.kbd_gtech().unwrap().status(true).unwrap();
    assert_eq!(matrix.common.buffer_count, 0);
    assert_eq!(gtech.common.buffer_count, 0);
    assert_eq!(matrix.reset_count, 1);
    assert_eq!(gtech.reset_count, 1);

    assert!(sim.matrix_wire().is_empty());
    assert!(sim.gtech_wire().is_empty());
    assert!(dual.galvanic().closed_cells().is_empty());
    assert_eq!(dual.gtech().level(KeyId::KEYBOARD_SPACE_BAR), Some(0));
}

// ── Gtech levels ──

#[test]
fn analog_levels_need_analog_mode() {
    let (kosmos, sim) = board();
    let gtech = kosmos.gtech_emulator().unwrap();

    assert!(gtech.key_press_level(KeyId::KEYBOARD_B, 17).is_err());

    gtech.func_mode_analog().unwrap();
    gtech.key_press_level(KeyId::KEYBOARD_B, 17).unwrap();
    assert_eq!(sim.gtech_wire().get(&1), Some(&17));
    assert_eq!(gtech.level(KeyId::KEYBOARD_B), Some(17));

    kosmos.reset_all().unwrap();
    assert!(!gtech.is_analog());
    assert_eq!(gtech.level(KeyId::KEYBOARD_B), Some(0));
}

// ── I²C spy ──

#[test]
fn i2c_mode_switch_and_reset_back_to_raw() {
    let (kosmos, sim) = board();
    let dt = kosmos.dt();
    let spy = dt.require_i2c_spy().unwrap();
    let frame = I2cFrame::new(1_000, 0x50, false, vec![0x10, 0x20, 0x30]);

    let status = spy.set_mode(I2cMode::Frame).unwrap();
    assert_eq!(status.mode, Some(I2cMode::Frame));

    sim.inject_i2c(&frame);
    spy.flush().unwrap();
    let capture = spy.download(None).unwrap();
    assert_eq!(capture.mode(), I2cMode::Frame);
    assert_eq!(capture.len(), 10);
    assert_eq!(capture.transactions(), vec![frame.clone()]);

    dt.reset_all().unwrap();
    assert_eq!(spy.mode(), I2cMode::Raw);
    assert_eq!(spy.status(true).unwrap().mode, Some(I2cMode::Raw));

    sim.inject_i2c(&frame);
    spy.flush().unwrap();
    let capture = spy.download(None).unwrap();
    assert_eq!(capture.mode(), I2cMode::Raw);
    assert_eq!(capture.len(), 4);
    assert_eq!(capture.transactions(), vec![frame]);
}

#[test]
fn i2c_download_beyond_capture_underruns() {
    let (kosmos, sim) = board();
    let spy = kosmos.dt().require_i2c_spy().unwrap();

    sim.inject_i2c(&I2cFrame::new(0, 0x20, true, vec![1]));
    spy.flush().unwrap();
    let err = spy.download(Some(5)).unwrap_err();
    assert!(err.is_underrun());
}

#[test]
fn short_download_keeps_multi_frame_capture_intact() {
    let (kosmos, sim) = board();
    let spy = kosmos.dt().require_i2c_spy().unwrap();
    // Address plus 34 data bytes: 35 records, more than one READ frame holds
    let frame = I2cFrame::new(500, 0x50, false, (0..34u8).collect::<Vec<u8>>());

    sim.inject_i2c(&frame);
    spy.flush().unwrap();
    assert_eq!(spy.status(true).unwrap().common.buffer_count, 35);

    let err = spy.download(Some(36)).unwrap_err();
    assert!(err.is_underrun());
    assert_eq!(spy.status(true).unwrap().common.buffer_count, 35);

    let capture = spy.download(None).unwrap();
    assert_eq!(capture.len(), 35);
    assert_eq!(capture.transactions(), vec![frame]);
    assert_eq!(spy.status(true).unwrap().common.buffer_count, 0);
}

// ── RGB spy ──

#[test]
fn rgb_samples_are_only_captured_while_started() {
    let (kosmos, sim) = board();
    let spy = kosmos.dt().require_rgb_spy().unwrap();
    let samples: Vec<RgbSample> = (0..3)
        .map(|led| RgbSample::new(100, led, RgbColor::new(255, 0, led)))
        .collect();

    sim.inject_rgb(&samples);
    assert!(spy.start_capture().unwrap().is_capturing());
    sim.inject_rgb(&samples);
    assert!(!spy.stop_capture().unwrap().is_capturing());
    sim.inject_rgb(&samples);

    spy.flush().unwrap();
    assert_eq!(spy.download(None).unwrap(), samples);
}

// ── Optical sensor ──

#[test]
fn optical_sensor_registers_follow_commands() {
    let (kosmos, sim) = board();
    let sensor = kosmos.dt().require_optical_sensor().unwrap();

    assert_eq!(sensor.read("PRODUCT_ID").unwrap(), 0x42);
    sensor.inject_motion(3, -2).unwrap();
    assert_eq!(sensor.read("DELTA_X").unwrap(), 3);
    assert_eq!(sensor.read("DELTA_Y").unwrap(), 0xFE);
    assert_eq!(sim.optical_register(0x02), Some(0x80));

    kosmos.reset_all().unwrap();
    assert_eq!(sensor.read("MOTION").unwrap(), 0);
}

#[test]
fn rgb_capture_is_verified_against_a_static_effect() {
    let (kosmos, sim) = board();
    let spy = kosmos.dt().require_rgb_spy().unwrap();
    let red = RgbColor::new(255, 0, 0);
    let mut samples: Vec<RgbSample> = (0..4).map(|led| RgbSample::new(10, led, red)).collect();
    samples.push(RgbSample::new(20, 4, RgbColor::new(0, 0, 255)));

    spy.start_capture().unwrap();
    sim.inject_rgb(&samples);
    spy.stop_capture().unwrap();
    spy.flush().unwrap();

    let result = spy
        .capture_and_verify(&ReferenceEffect::Static(red), 2)
        .unwrap();
    assert_eq!(result.checked, 5);
    assert!(!result.is_ok());
    assert_eq!(result.mismatches.len(), 1);
    assert_eq!(result.mismatches[0].sample.led, 4);
}
