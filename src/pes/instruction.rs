//! PES instruction encoding
//!
//! One little-endian `u32` per instruction:
//!
//! ```text
//! 31..28  opcode   1 EXECUTE, 2 WAIT, 3 DELAY, 4 CPU_ACTION
//! 27..0   argument action bits, resume bits, cycle count or CPU event
//! ```

use std::fmt;

use super::cpu::CpuEvent;
use super::events::{PesActionEvent, PesResumeEvent};
use crate::module::UploadEntry;

/// Opcode values
pub mod opcode {
    pub const EXECUTE: u32 = 0x1;
    pub const WAIT: u32 = 0x2;
    pub const DELAY: u32 = 0x3;
    pub const CPU_ACTION: u32 = 0x4;
}

const OPCODE_SHIFT: u32 = 28;

/// Largest argument an instruction can carry
pub const ARG_MASK: u32 = (1 << OPCODE_SHIFT) - 1;

/// Longest single DELAY, in cycles
pub const MAX_DELAY_CYCLES: u32 = ARG_MASK;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PesInstruction {
    Execute(PesActionEvent),
    Wait(PesResumeEvent),
    /// Busy-wait for this many core cycles (at most [`MAX_DELAY_CYCLES`])
    Delay(u32),
    CpuAction(CpuEvent),
}

impl PesInstruction {
    pub fn to_word(self) -> u32 {
        let (op, arg) = match self {
            Self::Execute(e) => (opcode::EXECUTE, e.bits()),
            Self::Wait(e) => (opcode::WAIT, e.bits()),
            Self::Delay(cycles) => (opcode::DELAY, cycles),
            Self::CpuAction(ev) => (opcode::CPU_ACTION, ev as u32),
        };
        (op << OPCODE_SHIFT) | (arg & ARG_MASK)
    }

    pub fn from_word(word: u32) -> Option<Self> {
        let arg = word & ARG_MASK;
        match word >> OPCODE_SHIFT {
            opcode::EXECUTE => PesActionEvent::from_bits(arg).map(Self::Execute),
            opcode::WAIT => PesResumeEvent::from_bits(arg).map(Self::Wait),
            opcode::DELAY => Some(Self::Delay(arg)),
            opcode::CPU_ACTION => u8::try_from(arg)
                .ok()
                .and_then(CpuEvent::from_u8)
                .map(Self::CpuAction),
            _ => None,
        }
    }

    /// Core cycles the instruction itself takes on the FPGA
    pub fn cycles(self) -> u64 {
        match self {
            Self::Delay(n) => n as u64,
            _ => 1,
        }
    }

    pub fn is_execute(self) -> bool {
        matches!(self, Self::Execute(_))
    }

    pub fn is_wait(self) -> bool {
        matches!(self, Self::Wait(_))
    }

    pub fn is_delay(self) -> bool {
        matches!(self, Self::Delay(_))
    }
}

impl fmt::Display for PesInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Execute(e) => write!(f, "EXECUTE({e:?})"),
            Self::Wait(e) => write!(f, "WAIT({e:?})"),
            Self::Delay(n) => write!(f, "DELAY({n})"),
            Self::CpuAction(ev) => write!(f, "CPU({ev:?})"),
        }
    }
}

impl UploadEntry for PesInstruction {
    const SIZE: usize = 4;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_word().to_le_bytes());
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        let word: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
        Self::from_word(u32::from_le_bytes(word))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_layout() {
        let exec = PesInstruction::Execute(
            PesActionEvent::KBD_MATRIX_SEND | PesActionEvent::KBD_GTECH_SEND,
        );
        assert_eq!(exec.to_word(), 0x1000_0003);
        assert_eq!(PesInstruction::Delay(400).to_word(), 0x3000_0190);
        assert_eq!(
            PesInstruction::CpuAction(CpuEvent::FlushI2cSpyFifo).to_word(),
            0x4000_0001
        );
        assert_eq!(PesInstruction::from_word(0x2000_0002), Some(PesInstruction::Wait(PesResumeEvent::KBD_GTECH_READY)));
    }

    #[test]
    fn test_invalid_words() {
        assert_eq!(PesInstruction::from_word(0x0000_0001), None);
        assert_eq!(PesInstruction::from_word(0x1000_8000), None);
        assert_eq!(PesInstruction::from_word(0x4000_00FF), None);
    }

    #[test]
    fn test_entry_encoding_is_little_endian() {
        let mut out = Vec::new();
        PesInstruction::Delay(0x0102_0304).encode(&mut out);
        assert_eq!(out, vec![0x04, 0x03, 0x02, 0x31]);
        assert_eq!(
            PesInstruction::decode(&out),
            Some(PesInstruction::Delay(0x0102_0304))
        );
    }
}
