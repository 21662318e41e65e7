//! Module models of the simulated board
//!
//! Each model answers the opcodes of one FPGA module and keeps just enough
//! state to produce faithful status replies. [`SimState::dispatch`] routes a
//! decoded request; the sequencer START runs the uploaded PES program to
//! completion on the spot.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use kosmos_transport::{cmd, msg, ReplyCode};
use tracing::{debug, trace};
use zerocopy::byteorder::little_endian::{U16, U32};

use crate::i2c_spy::{i2c_cmd, I2cFrame, I2cMode, RawI2cSpyTail, I2C_SPY_SETTINGS};
use crate::kbd::{
    gtech_cmd, FuncMode, GtechEntry, KbdCommand, KbdEntry, MatrixEntry, RawKbdTail, KBD_GTECH_SETTINGS,
    KBD_MATRIX_SETTINGS,
};
use crate::module::status::{encode_with_tail, CommonStatus};
use crate::module::{ModuleSettings, UploadEntry};
use crate::optical_sensor::{default_register_map, optical_cmd, OPTICAL_SENSOR_SETTINGS};
use crate::pes::cpu::{RawCpuTail, PES_CPU_SETTINGS};
use crate::pes::{CpuEvent, PesActionEvent, PesInstruction, PES_SETTINGS};
use crate::regmap::{CommandRole, RegisterMap};
use crate::rgb_spy::parser::RgbSample;
use crate::rgb_spy::{RawRgbSpyTail, RGB_SAMPLE_SIZE, RGB_SPY_SETTINGS};
use crate::sequencer::{state as seq_state, RawSequencerTail, SEQUENCER_SETTINGS};

/// Reply payload, or the error code to answer with
pub(crate) type Handled = std::result::Result<Vec<u8>, ReplyCode>;

/// Revision reported by default
pub const SIM_FPGA_REVISION: u16 = 0x0102;

/// Minimum spacing of two KBD UPDATEs before the module FIFO underruns
pub const SIM_KBD_MIN_UPDATE_GAP: u64 = 400;

/// LEDs on the simulated RGB bus
pub const SIM_LED_COUNT: u8 = 16;

/// Bus time of one I²C byte in raw-mode timestamps
pub const SIM_I2C_CYCLES_PER_BYTE: u32 = 250;

fn common(settings: &ModuleSettings, state: u8, underrun: bool, overrun: bool, buffer: usize, fifo: usize) -> CommonStatus {
    CommonStatus {
        msg_id: settings.msg_id,
        instance_id: settings.instance_id,
        state,
        underrun,
        overrun,
        buffer_count: buffer.min(u16::MAX as usize) as u16,
        fifo_count: fifo.min(u16::MAX as usize) as u16,
    }
}

/// `Some(n)` if `opcode` is `WRITE_ONE + n - 1`
fn write_count(opcode: u8) -> Option<usize> {
    (cmd::WRITE_ONE..=cmd::WRITE_MAX)
        .contains(&opcode)
        .then(|| (opcode - cmd::WRITE_ONE) as usize + 1)
}

/// `Some(n)` if `opcode` is `READ_ONE + n - 1`
fn read_count(opcode: u8) -> Option<usize> {
    (cmd::READ_ONE..=cmd::READ_MAX)
        .contains(&opcode)
        .then(|| (opcode - cmd::READ_ONE) as usize + 1)
}

/// Decode a WRITE payload of exactly `n` entries
fn decode_write<E: UploadEntry>(opcode: u8, payload: &[u8]) -> std::result::Result<Vec<E>, ReplyCode> {
    let n = write_count(opcode).ok_or(ReplyCode::UnknownCommand)?;
    if payload.len() != n * E::SIZE {
        return Err(ReplyCode::BadPayload);
    }
    E::decode_all(payload).ok_or(ReplyCode::BadPayload)
}

// ============================================================================
// KBD modules
// ============================================================================

/// Shadow-map cell an entry stages, with its value (0 = open / released)
pub trait SimKbdEntry: KbdEntry {
    fn cell(&self) -> (u8, u8);
    fn value(&self) -> u8;
}

impl SimKbdEntry for MatrixEntry {
    fn cell(&self) -> (u8, u8) {
        (self.col, self.row)
    }

    fn value(&self) -> u8 {
        self.closed as u8
    }
}

impl SimKbdEntry for GtechEntry {
    fn cell(&self) -> (u8, u8) {
        (self.chain_id, 0)
    }

    fn value(&self) -> u8 {
        self.level
    }
}

pub struct SimKbd<E> {
    settings: ModuleSettings,
    buffer: VecDeque<E>,
    shadow: BTreeMap<(u8, u8), u8>,
    wire: BTreeMap<(u8, u8), u8>,
    executed: Vec<(u64, E)>,
    underrun: bool,
    overrun: bool,
    update_count: u16,
    send_count: u16,
    reset_count: u16,
    last_action_cycle: u64,
    last_update_cycle: Option<u64>,
    func_mode: FuncMode,
    min_update_gap: u64,
}

impl<E: SimKbdEntry> SimKbd<E> {
    fn new(settings: ModuleSettings, min_update_gap: u64) -> Self {
        Self {
            settings,
            buffer: VecDeque::new(),
            shadow: BTreeMap::new(),
            wire: BTreeMap::new(),
            executed: Vec::new(),
            underrun: false,
            overrun: false,
            update_count: 0,
            send_count: 0,
            reset_count: 0,
            last_action_cycle: 0,
            last_update_cycle: None,
            func_mode: FuncMode::Legacy,
            min_update_gap,
        }
    }

    fn capacity(&self) -> usize {
        self.settings.buffer_size.unwrap_or(0) as usize
    }

    fn status(&self) -> Vec<u8> {
        let header = common(
            &self.settings,
            self.settings.state_reset_or_stop,
            self.underrun,
            self.overrun,
            self.buffer.len(),
            0,
        );
        encode_with_tail(
            &header,
            &RawKbdTail {
                func_mode: self.func_mode as u8,
                reserved: 0,
                update_count: U16::new(self.update_count),
                send_count: U16::new(self.send_count),
                reset_count: U16::new(self.reset_count),
                last_action_cycle: U32::new(self.last_action_cycle as u32),
            },
        )
    }

    fn reset(&mut self) {
        *self = Self::new(self.settings, self.min_update_gap);
    }

    /// A new play starts: real time has passed since the last UPDATE
    fn start_run(&mut self) {
        self.last_update_cycle = None;
    }

    /// Consume the next entry on an action event at `cycle`
    fn action(&mut self, cycle: u64) {
        self.last_action_cycle = cycle;
        let Some(entry) = self.buffer.pop_front() else {
            debug!("{}: action on empty buffer at cycle {}", self.settings.name, cycle);
            self.underrun = true;
            return;
        };
        match entry.command() {
            KbdCommand::Update => {
                if let Some(last) = self.last_update_cycle {
                    if cycle - last < self.min_update_gap {
                        debug!(
                            "{}: UPDATE {} cycles after the previous one",
                            self.settings.name,
                            cycle - last
                        );
                        self.underrun = true;
                    }
                }
                self.last_update_cycle = Some(cycle);
                match entry.value() {
                    0 => self.shadow.remove(&entry.cell()),
                    v => self.shadow.insert(entry.cell(), v),
                };
                self.update_count = self.update_count.wrapping_add(1);
            }
            KbdCommand::Send => {
                self.wire = self.shadow.clone();
                self.send_count = self.send_count.wrapping_add(1);
            }
            KbdCommand::Reset => {
                self.shadow.clear();
                self.wire.clear();
                self.last_update_cycle = None;
                self.reset_count = self.reset_count.wrapping_add(1);
            }
        }
        self.executed.push((cycle, entry));
    }

    fn handle(&mut self, opcode: u8, payload: &[u8]) -> Handled {
        match opcode {
            cmd::STATUS => Ok(self.status()),
            cmd::RESET => {
                self.reset();
                Ok(self.status())
            }
            cmd::WRITE_ONE..=cmd::WRITE_MAX => {
                let entries = decode_write::<E>(opcode, payload)?;
                if self.buffer.len() + entries.len() > self.capacity() {
                    self.overrun = true;
                    return Err(ReplyCode::Overrun);
                }
                self.buffer.extend(entries);
                Ok(Vec::new())
            }
            _ => Err(ReplyCode::UnknownCommand),
        }
    }

    pub fn executed(&self) -> &[(u64, E)] {
        &self.executed
    }

    pub fn wire(&self) -> &BTreeMap<(u8, u8), u8> {
        &self.wire
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

// ============================================================================
// I²C spy
// ============================================================================

pub struct SimI2c {
    mode: I2cMode,
    fifo: Vec<u8>,
    buffer: Vec<u8>,
    dropped: u16,
    overrun: bool,
}

impl SimI2c {
    fn new() -> Self {
        Self {
            mode: I2cMode::Raw,
            fifo: Vec::new(),
            buffer: Vec::new(),
            dropped: 0,
            overrun: false,
        }
    }

    fn unit(&self) -> usize {
        self.mode.unit_size()
    }

    fn status(&self) -> Vec<u8> {
        let header = common(
            &I2C_SPY_SETTINGS,
            I2C_SPY_SETTINGS.state_reset_or_stop,
            false,
            self.overrun,
            self.buffer.len() / self.unit(),
            self.fifo.len() / self.unit(),
        );
        encode_with_tail(
            &header,
            &RawI2cSpyTail {
                mode: self.mode as u8,
                reserved: 0,
                dropped: U16::new(self.dropped),
            },
        )
    }

    fn set_mode(&mut self, mode: I2cMode) {
        *self = Self::new();
        self.mode = mode;
    }

    /// Capture a frame the way the current mode stores it
    fn capture(&mut self, frame: &I2cFrame) {
        let mut bytes = Vec::new();
        match self.mode {
            I2cMode::Raw => {
                for record in frame.to_records(SIM_I2C_CYCLES_PER_BYTE) {
                    bytes.extend_from_slice(zerocopy::IntoBytes::as_bytes(&record.to_raw()));
                }
            }
            I2cMode::Frame => frame.encode(&mut bytes),
        }
        let unit = self.unit();
        let fifo_units = I2C_SPY_SETTINGS.fifo_size.unwrap_or(0) as usize;
        for chunk in bytes.chunks(unit) {
            self.fifo.extend_from_slice(chunk);
            if self.fifo.len() / unit >= fifo_units {
                self.flush_fifo();
            }
        }
    }

    /// Move the FIFO into the buffer; units that do not fit are dropped
    fn flush_fifo(&mut self) {
        let unit = self.unit();
        let capacity = (self.mode.buffer_capacity() as usize - 1) * unit;
        let room = capacity.saturating_sub(self.buffer.len());
        let fifo = std::mem::take(&mut self.fifo);
        let kept = fifo.len().min(room);
        self.buffer.extend_from_slice(&fifo[..kept]);
        if kept < fifo.len() {
            let lost = (fifo.len() - kept) / unit;
            self.dropped = self.dropped.saturating_add(lost as u16);
            self.overrun = true;
        }
    }

    fn handle(&mut self, opcode: u8) -> Handled {
        match opcode {
            cmd::STATUS => Ok(self.status()),
            cmd::RESET => {
                self.set_mode(I2cMode::Raw);
                Ok(self.status())
            }
            i2c_cmd::MODE_RAW => {
                self.set_mode(I2cMode::Raw);
                Ok(self.status())
            }
            i2c_cmd::MODE_FRAME => {
                self.set_mode(I2cMode::Frame);
                Ok(self.status())
            }
            cmd::READ_ONE..=cmd::READ_MAX => {
                let n = read_count(opcode).ok_or(ReplyCode::UnknownCommand)?;
                let len = n * self.unit();
                if self.buffer.len() < len {
                    return Err(ReplyCode::Underrun);
                }
                Ok(self.buffer.drain(..len).collect())
            }
            _ => Err(ReplyCode::UnknownCommand),
        }
    }
}

// ============================================================================
// RGB spy
// ============================================================================

pub struct SimRgb {
    capturing: bool,
    fifo: Vec<RgbSample>,
    buffer: VecDeque<RgbSample>,
    overrun: bool,
}

impl SimRgb {
    fn new() -> Self {
        Self {
            capturing: false,
            fifo: Vec::new(),
            buffer: VecDeque::new(),
            overrun: false,
        }
    }

    fn status(&self) -> Vec<u8> {
        let state = if self.capturing {
            RGB_SPY_SETTINGS.state_started
        } else {
            RGB_SPY_SETTINGS.state_reset_or_stop
        };
        let header = common(
            &RGB_SPY_SETTINGS,
            state,
            false,
            self.overrun,
            self.buffer.len(),
            self.fifo.len(),
        );
        encode_with_tail(
            &header,
            &RawRgbSpyTail {
                led_count: SIM_LED_COUNT,
                reserved: [0; 3],
            },
        )
    }

    fn capture(&mut self, sample: RgbSample) {
        if !self.capturing {
            return;
        }
        self.fifo.push(sample);
        if self.fifo.len() >= RGB_SPY_SETTINGS.fifo_size.unwrap_or(0) as usize {
            self.flush_fifo();
        }
    }

    fn flush_fifo(&mut self) {
        let capacity = RGB_SPY_SETTINGS.buffer_size.unwrap_or(0) as usize - 1;
        for sample in self.fifo.drain(..) {
            if self.buffer.len() < capacity {
                self.buffer.push_back(sample);
            } else {
                self.overrun = true;
            }
        }
    }

    fn handle(&mut self, opcode: u8) -> Handled {
        match opcode {
            cmd::STATUS => Ok(self.status()),
            cmd::RESET => {
                *self = Self::new();
                Ok(self.status())
            }
            cmd::START => {
                self.capturing = true;
                Ok(self.status())
            }
            cmd::STOP => {
                self.capturing = false;
                Ok(self.status())
            }
            cmd::READ_ONE..=cmd::READ_MAX => {
                let n = read_count(opcode).ok_or(ReplyCode::UnknownCommand)?;
                if self.buffer.len() < n {
                    return Err(ReplyCode::Underrun);
                }
                let mut out = Vec::with_capacity(n * RGB_SAMPLE_SIZE);
                for sample in self.buffer.drain(..n) {
                    out.extend_from_slice(zerocopy::IntoBytes::as_bytes(&sample.to_raw()));
                }
                Ok(out)
            }
            _ => Err(ReplyCode::UnknownCommand),
        }
    }
}

// ============================================================================
// Optical sensor
// ============================================================================

pub struct SimOptical {
    map: RegisterMap,
    regs: BTreeMap<u8, u8>,
}

impl SimOptical {
    fn new() -> Option<Self> {
        let map = default_register_map().ok()?;
        let mut sensor = Self {
            map,
            regs: BTreeMap::new(),
        };
        sensor.reset();
        Some(sensor)
    }

    fn reset(&mut self) {
        self.regs = self
            .map
            .registers()
            .map(|def| (def.addr(), def.register().reset_value as u8))
            .collect();
    }

    fn status(&self) -> Vec<u8> {
        let header = common(&OPTICAL_SENSOR_SETTINGS, 0, false, false, 0, 0);
        zerocopy::IntoBytes::as_bytes(&header.to_raw()).to_vec()
    }

    fn handle(&mut self, opcode: u8, payload: &[u8]) -> Handled {
        match (opcode, payload) {
            (cmd::STATUS, _) => Ok(self.status()),
            (cmd::RESET, _) => {
                self.reset();
                Ok(self.status())
            }
            (optical_cmd::REG_READ, [addr]) => {
                self.regs.get(addr).map(|v| vec![*v]).ok_or(ReplyCode::BadPayload)
            }
            (optical_cmd::REG_COMMAND, [index, value]) => {
                let (addr, role) = self.map.cmd2reg(*index).ok_or(ReplyCode::BadPayload)?;
                let reg = self.regs.entry(addr).or_default();
                match role {
                    CommandRole::Write => *reg = *value,
                    CommandRole::Set => *reg |= *value,
                    CommandRole::Clear => *reg &= !*value,
                }
                Ok(vec![*reg])
            }
            (optical_cmd::REG_READ | optical_cmd::REG_COMMAND, _) => Err(ReplyCode::BadPayload),
            _ => Err(ReplyCode::UnknownCommand),
        }
    }

    pub fn register(&self, addr: u8) -> Option<u8> {
        self.regs.get(&addr).copied()
    }
}

// ============================================================================
// Board
// ============================================================================

pub struct SimState {
    pub(crate) present: BTreeSet<u8>,
    pub(crate) revision: u16,
    pub(crate) stall: bool,
    seq_state: u8,
    pc: u16,
    cycle: u64,
    program: Vec<PesInstruction>,
    pes_trace: Vec<(u64, PesInstruction)>,
    cpu_last_event: u8,
    cpu_handled: u16,
    pub(crate) kbd_matrix: SimKbd<MatrixEntry>,
    pub(crate) kbd_gtech: SimKbd<GtechEntry>,
    pub(crate) i2c: SimI2c,
    pub(crate) rgb: SimRgb,
    pub(crate) optical: Option<SimOptical>,
}

impl SimState {
    pub fn new() -> Self {
        let optical = SimOptical::new();
        let mut present: BTreeSet<u8> = [
            msg::SEQUENCER,
            msg::PES,
            msg::PES_CPU,
            msg::KBD_MATRIX,
            msg::KBD_GTECH,
            msg::I2C_SPY,
            msg::RGB_SPY,
        ]
        .into_iter()
        .collect();
        if optical.is_some() {
            present.insert(msg::OPTICAL_SENSOR);
        }

        Self {
            present,
            revision: SIM_FPGA_REVISION,
            stall: false,
            seq_state: seq_state::IDLE,
            pc: 0,
            cycle: 0,
            program: Vec::new(),
            pes_trace: Vec::new(),
            cpu_last_event: 0,
            cpu_handled: 0,
            kbd_matrix: SimKbd::new(KBD_MATRIX_SETTINGS, SIM_KBD_MIN_UPDATE_GAP),
            kbd_gtech: SimKbd::new(KBD_GTECH_SETTINGS, SIM_KBD_MIN_UPDATE_GAP),
            i2c: SimI2c::new(),
            rgb: SimRgb::new(),
            optical,
        }
    }

    pub(crate) fn set_kbd_min_update_gap(&mut self, cycles: u64) {
        self.kbd_matrix.min_update_gap = cycles;
        self.kbd_gtech.min_update_gap = cycles;
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn pes_trace(&self) -> &[(u64, PesInstruction)] {
        &self.pes_trace
    }

    pub(crate) fn clear_traces(&mut self) {
        self.pes_trace.clear();
        self.kbd_matrix.executed.clear();
        self.kbd_gtech.executed.clear();
    }

    /// Route one request to its module
    pub fn dispatch(&mut self, msg_id: u8, opcode: u8, payload: &[u8]) -> Handled {
        if !self.present.contains(&msg_id) {
            return Err(ReplyCode::UnknownModule);
        }
        match msg_id {
            msg::SEQUENCER => self.handle_sequencer(opcode),
            msg::PES => self.handle_pes(opcode, payload),
            msg::PES_CPU => self.handle_cpu(opcode),
            msg::KBD_MATRIX => self.kbd_matrix.handle(opcode, payload),
            msg::KBD_GTECH => match opcode {
                gtech_cmd::FUNC_MODE_LEGACY => {
                    self.kbd_gtech.func_mode = FuncMode::Legacy;
                    Ok(self.kbd_gtech.status())
                }
                gtech_cmd::FUNC_MODE_ANALOG => {
                    self.kbd_gtech.func_mode = FuncMode::Analog;
                    Ok(self.kbd_gtech.status())
                }
                _ => self.kbd_gtech.handle(opcode, payload),
            },
            msg::I2C_SPY => self.i2c.handle(opcode),
            msg::RGB_SPY => self.rgb.handle(opcode),
            msg::OPTICAL_SENSOR => match self.optical.as_mut() {
                Some(optical) => optical.handle(opcode, payload),
                None => Err(ReplyCode::UnknownModule),
            },
            _ => Err(ReplyCode::UnknownModule),
        }
    }

    // ------------------------------------------------------------------------
    // Sequencer, PES and CPU events
    // ------------------------------------------------------------------------

    fn sequencer_status(&self) -> Vec<u8> {
        let header = common(&SEQUENCER_SETTINGS, self.seq_state, false, false, 0, 0);
        encode_with_tail(
            &header,
            &RawSequencerTail {
                fpga_revision: U16::new(self.revision),
                pc: U16::new(self.pc),
                cycle: U32::new(self.cycle as u32),
            },
        )
    }

    fn handle_sequencer(&mut self, opcode: u8) -> Handled {
        match opcode {
            cmd::STATUS => Ok(self.sequencer_status()),
            cmd::RESET => {
                self.seq_state = seq_state::IDLE;
                self.pc = 0;
                self.program.clear();
                Ok(self.sequencer_status())
            }
            cmd::START => {
                if self.stall {
                    debug!("Simulated sequencer stalled");
                    self.seq_state = seq_state::RUNNING;
                } else {
                    self.run_program();
                }
                Ok(self.sequencer_status())
            }
            cmd::STOP => {
                self.seq_state = seq_state::IDLE;
                Ok(self.sequencer_status())
            }
            _ => Err(ReplyCode::UnknownCommand),
        }
    }

    fn handle_pes(&mut self, opcode: u8, payload: &[u8]) -> Handled {
        let status = |program: &Vec<PesInstruction>| {
            zerocopy::IntoBytes::as_bytes(
                &common(&PES_SETTINGS, 0, false, false, program.len(), 0).to_raw(),
            )
            .to_vec()
        };
        match opcode {
            cmd::STATUS => Ok(status(&self.program)),
            cmd::RESET => {
                self.program.clear();
                Ok(status(&self.program))
            }
            cmd::WRITE_ONE..=cmd::WRITE_MAX => {
                let instructions = decode_write::<PesInstruction>(opcode, payload)?;
                let capacity = PES_SETTINGS.buffer_size.unwrap_or(0) as usize;
                if self.program.len() + instructions.len() > capacity {
                    return Err(ReplyCode::Overrun);
                }
                self.program.extend(instructions);
                Ok(Vec::new())
            }
            _ => Err(ReplyCode::UnknownCommand),
        }
    }

    fn handle_cpu(&mut self, opcode: u8) -> Handled {
        match opcode {
            cmd::STATUS => {}
            cmd::RESET => {
                self.cpu_last_event = 0;
                self.cpu_handled = 0;
            }
            _ => return Err(ReplyCode::UnknownCommand),
        }
        let header = common(&PES_CPU_SETTINGS, 0, false, false, 0, 0);
        Ok(encode_with_tail(
            &header,
            &RawCpuTail {
                last_event: self.cpu_last_event,
                reserved: 0,
                handled: U16::new(self.cpu_handled),
            },
        ))
    }

    /// Execute the uploaded program, consuming it
    fn run_program(&mut self) {
        let program = std::mem::take(&mut self.program);
        self.kbd_matrix.start_run();
        self.kbd_gtech.start_run();
        self.seq_state = seq_state::RUNNING;

        for (pc, instruction) in program.iter().enumerate() {
            trace!("PES @{}: {}", self.cycle, instruction);
            self.pes_trace.push((self.cycle, *instruction));
            match *instruction {
                PesInstruction::Execute(actions) => {
                    if actions.contains(PesActionEvent::KBD_MATRIX_SEND) && self.present.contains(&msg::KBD_MATRIX) {
                        self.kbd_matrix.action(self.cycle);
                    }
                    if actions.contains(PesActionEvent::KBD_GTECH_SEND) && self.present.contains(&msg::KBD_GTECH) {
                        self.kbd_gtech.action(self.cycle);
                    }
                }
                PesInstruction::CpuAction(event) => {
                    match event {
                        CpuEvent::FlushI2cSpyFifo => self.i2c.flush_fifo(),
                        CpuEvent::FlushRgbSpyFifo => self.rgb.flush_fifo(),
                    }
                    self.cpu_last_event = event as u8;
                    self.cpu_handled = self.cpu_handled.wrapping_add(1);
                }
                PesInstruction::Wait(_) | PesInstruction::Delay(_) => {}
            }
            self.cycle += instruction.cycles();
            self.pc = (pc + 1) as u16;
        }

        self.seq_state = seq_state::DONE;
        debug!("Simulated PES ran {} instructions, now at cycle {}", program.len(), self.cycle);
    }

    // ------------------------------------------------------------------------
    // Stimuli from the device under test
    // ------------------------------------------------------------------------

    pub(crate) fn inject_i2c(&mut self, frame: &I2cFrame) {
        self.i2c.capture(frame);
    }

    pub(crate) fn inject_rgb(&mut self, samples: &[RgbSample]) {
        for sample in samples {
            self.rgb.capture(*sample);
        }
    }
}

impl Default for SimState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::status::ModuleStatus;

    #[test]
    fn test_absent_module() {
        let mut state = SimState::new();
        state.present.remove(&msg::RGB_SPY);
        assert_eq!(state.dispatch(msg::RGB_SPY, cmd::STATUS, &[]), Err(ReplyCode::UnknownModule));
        assert_eq!(state.dispatch(0x7F, cmd::STATUS, &[]), Err(ReplyCode::UnknownModule));
    }

    #[test]
    fn test_write_length_and_capacity() {
        let mut state = SimState::new();
        // WRITE_N for two entries with one entry of payload
        let opcode = cmd::WRITE_ONE + 1;
        assert_eq!(
            state.dispatch(msg::KBD_MATRIX, opcode, &[1, 0, 0, 1]),
            Err(ReplyCode::BadPayload)
        );

        let entry = [2u8, 0, 0, 0];
        let frame: Vec<u8> = entry.iter().copied().cycle().take(16 * 4).collect();
        for _ in 0..32 {
            assert!(state.dispatch(msg::KBD_MATRIX, cmd::WRITE_MAX, &frame).is_ok());
        }
        assert_eq!(state.kbd_matrix.pending(), 512);
        assert_eq!(
            state.dispatch(msg::KBD_MATRIX, cmd::WRITE_ONE, &entry),
            Err(ReplyCode::Overrun)
        );
    }

    #[test]
    fn test_updates_too_close_underrun() {
        let mut kbd = SimKbd::<MatrixEntry>::new(KBD_MATRIX_SETTINGS, 100);
        kbd.buffer.extend([MatrixEntry::update(0, 0, true), MatrixEntry::update(1, 0, true)]);
        kbd.action(10);
        kbd.action(50);
        assert!(kbd.underrun);

        let mut kbd = SimKbd::<MatrixEntry>::new(KBD_MATRIX_SETTINGS, 100);
        kbd.buffer.extend([
            MatrixEntry::update(0, 0, true),
            MatrixEntry::update(1, 0, true),
            MatrixEntry::send(),
        ]);
        kbd.action(10);
        kbd.action(110);
        kbd.action(111);
        assert!(!kbd.underrun);
        assert_eq!(kbd.wire().len(), 2);
    }

    #[test]
    fn test_i2c_frame_mode_counts_bytes() {
        let mut state = SimState::new();
        state.dispatch(msg::I2C_SPY, i2c_cmd::MODE_FRAME, &[]).unwrap();
        state.inject_i2c(&I2cFrame::new(0, 0x50, false, vec![1, 2, 3]));
        let status = crate::i2c_spy::I2cSpyStatus::parse(&state.i2c.status()).unwrap();
        assert_eq!(status.mode, Some(I2cMode::Frame));
        assert_eq!(status.common.fifo_count, 10);
        state.i2c.flush_fifo();
        assert_eq!(state.dispatch(msg::I2C_SPY, cmd::READ_ONE + 9, &[]).unwrap().len(), 10);
        assert_eq!(state.dispatch(msg::I2C_SPY, cmd::READ_ONE, &[]), Err(ReplyCode::Underrun));
    }
}
