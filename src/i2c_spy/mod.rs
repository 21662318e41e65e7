//! I²C spy
//!
//! Producer module capturing the traffic of one I²C bus in one of two modes:
//!
//! - **Raw**: one 8-byte [`I2cSpyReg`] record per bus byte. Counts (status,
//!   `size()`, `download(count)`) are in records.
//! - **Frame**: the FPGA groups bytes into frames and the buffer is a byte
//!   stream. Counts are in bytes.
//!
//! Bytes still sitting in the FIFO only become visible to `download` after a
//! `FLUSH_FIFO` CPU action, see [`I2cSpy::flush`].

pub mod parser;

pub use parser::{
    assemble_transactions, parse_frames, parse_raw, FrameParser, I2cBusEvent, I2cEventKind, I2cFlags,
    I2cFrame, I2cRecord, I2cSpyReg, I2C_SPY_REG_SIZE,
};

use std::sync::Arc;

use kosmos_transport::{msg, FpgaLink, TransportError};
use parking_lot::Mutex;
use tracing::debug;
use zerocopy::byteorder::little_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::Result;
use crate::fatal::KosmosFatalError;
use crate::module::download::{self, DownloadModule};
use crate::module::status::{self, CommonStatus, ModuleStatus};
use crate::module::{Module, ModuleCore, ModuleSettings};
use crate::pes::{CpuEvent, PesResumeEvent};

/// Raw-mode buffer size, in records
pub const RAW_BUFFER_RECORDS: u16 = 4096;

/// Frame-mode buffer size, in bytes
pub const FRAME_BUFFER_BYTES: u16 = 16384;

pub const I2C_SPY_SETTINGS: ModuleSettings = ModuleSettings::new("I2C_SPY", msg::I2C_SPY)
    .with_buffer(RAW_BUFFER_RECORDS)
    .with_fifo(64)
    .optional();

/// I²C spy opcodes
pub mod i2c_cmd {
    pub const MODE_RAW: u8 = 0x40;
    pub const MODE_FRAME: u8 = 0x41;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum I2cMode {
    #[default]
    Raw = 0,
    Frame = 1,
}

impl I2cMode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Raw),
            1 => Some(Self::Frame),
            _ => None,
        }
    }

    /// Bytes per counted unit
    pub fn unit_size(self) -> usize {
        match self {
            Self::Raw => I2C_SPY_REG_SIZE,
            Self::Frame => 1,
        }
    }

    /// Remote buffer capacity, in units
    pub fn buffer_capacity(self) -> u16 {
        match self {
            Self::Raw => RAW_BUFFER_RECORDS,
            Self::Frame => FRAME_BUFFER_BYTES,
        }
    }
}

impl std::str::FromStr for I2cMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "frame" => Ok(Self::Frame),
            _ => Err(format!("unknown I2C spy mode '{s}' (expected raw or frame)")),
        }
    }
}

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct RawI2cSpyTail {
    pub mode: u8,
    pub reserved: u8,
    /// Units dropped because the buffer was full
    pub dropped: U16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I2cSpyStatus {
    pub common: CommonStatus,
    pub mode: Option<I2cMode>,
    pub dropped: u16,
}

impl ModuleStatus for I2cSpyStatus {
    fn parse(payload: &[u8]) -> std::result::Result<Self, TransportError> {
        let (common, tail) = status::parse_with_tail::<RawI2cSpyTail>(payload)?;
        Ok(Self {
            common,
            mode: I2cMode::from_u8(tail.mode),
            dropped: tail.dropped.get(),
        })
    }

    fn common(&self) -> &CommonStatus {
        &self.common
    }

    fn buffer_capacity(&self, settings: &ModuleSettings) -> Option<u16> {
        match self.mode {
            Some(mode) => Some(mode.buffer_capacity()),
            None => settings.buffer_size,
        }
    }
}

/// Downloaded capture, typed by mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum I2cCapture {
    Raw(Vec<I2cRecord>),
    Frame(Vec<u8>),
}

impl I2cCapture {
    pub fn mode(&self) -> I2cMode {
        match self {
            Self::Raw(_) => I2cMode::Raw,
            Self::Frame(_) => I2cMode::Frame,
        }
    }

    /// Units held (records or bytes)
    pub fn len(&self) -> usize {
        match self {
            Self::Raw(records) => records.len(),
            Self::Frame(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reassembled transactions, whatever the mode
    pub fn transactions(&self) -> Vec<I2cFrame> {
        match self {
            Self::Raw(records) => assemble_transactions(&parse_raw(records)),
            Self::Frame(bytes) => parse_frames(bytes),
        }
    }
}

// ============================================================================
// Module
// ============================================================================

#[derive(Debug)]
pub struct I2cSpy {
    core: ModuleCore,
    mode: Mutex<I2cMode>,
}

impl I2cSpy {
    pub fn new(link: Arc<FpgaLink>, fatal: Arc<KosmosFatalError>) -> Self {
        Self {
            core: ModuleCore::new(I2C_SPY_SETTINGS, link, fatal),
            mode: Mutex::new(I2cMode::Raw),
        }
    }

    /// Locally selected mode
    pub fn mode(&self) -> I2cMode {
        *self.mode.lock()
    }

    /// Switch mode: update the local mode, send the mode command and check
    /// that the reply reports the same mode
    pub fn set_mode(&self, mode: I2cMode) -> Result<I2cSpyStatus> {
        *self.mode.lock() = mode;
        let opcode = match mode {
            I2cMode::Raw => i2c_cmd::MODE_RAW,
            I2cMode::Frame => i2c_cmd::MODE_FRAME,
        };
        debug!("I2C_SPY: switching to {:?} mode", mode);
        self.core.status_command(opcode, None, true).and_then(|s| self.check_mode(s, true))
    }

    fn check_mode(&self, status: I2cSpyStatus, sanity_checks: bool) -> Result<I2cSpyStatus> {
        let local = self.mode();
        if status.mode != Some(local) {
            self.core.check(
                vec![format!("remote mode {:?} != local {:?}", status.mode, local)],
                sanity_checks,
            )?;
        }
        Ok(status)
    }

    pub fn status(&self, sanity_checks: bool) -> Result<I2cSpyStatus> {
        let status = self.core.status(sanity_checks)?;
        self.check_mode(status, sanity_checks)
    }

    /// Queue a FIFO flush through the PES and play it when online
    pub fn flush(&self) -> Result<()> {
        let dt = self.core.dt()?;
        let pes = dt.pes();
        pes.action(CpuEvent::FlushI2cSpyFifo)?;
        pes.wait(PesResumeEvent::PES_CPU_DONE)?;
        dt.sequencer().play_if_online()
    }
}

impl Module for I2cSpy {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn status_common(&self, sanity_checks: bool) -> Result<CommonStatus> {
        Ok(self.status(sanity_checks)?.common)
    }

    /// Reset also brings the local mode back to raw
    fn reset_module(&self, sanity_checks: bool) -> Result<()> {
        *self.mode.lock() = I2cMode::Raw;
        let status = self.core.reset::<I2cSpyStatus>(sanity_checks)?;
        self.check_mode(status, sanity_checks)?;
        self.core.fire_reset_callbacks();
        Ok(())
    }
}

impl DownloadModule for I2cSpy {
    type Capture = I2cCapture;

    /// Producer size in the current mode's unit
    fn size(&self) -> usize {
        download::producer_size(Some(self.mode().buffer_capacity()))
    }

    fn download(&self, count: Option<usize>) -> Result<I2cCapture> {
        let mode = self.mode();
        let available = self.status(true)?.common.buffer_count as usize;
        let count = count.unwrap_or(available);
        download::check_count(&self.core, count, self.size())?;
        download::check_available(&self.core, count, available)?;
        let bytes = download::read_units(&self.core, mode.unit_size(), count)?;
        Ok(match mode {
            I2cMode::Raw => I2cCapture::Raw(parser::decode_records(&bytes)),
            I2cMode::Frame => I2cCapture::Frame(bytes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units_per_mode() {
        assert_eq!(I2cMode::Raw.unit_size(), 8);
        assert_eq!(I2cMode::Frame.unit_size(), 1);
        assert_eq!("FRAME".parse::<I2cMode>(), Ok(I2cMode::Frame));
        assert!("bytes".parse::<I2cMode>().is_err());
    }

    #[test]
    fn test_capacity_follows_reported_mode() {
        let common = CommonStatus {
            msg_id: msg::I2C_SPY,
            instance_id: 0,
            state: 0,
            underrun: false,
            overrun: false,
            buffer_count: 10_000,
            fifo_count: 0,
        };
        let frame = I2cSpyStatus {
            common,
            mode: Some(I2cMode::Frame),
            dropped: 0,
        };
        assert!(status::status_reply_errors(&frame, &I2C_SPY_SETTINGS).is_empty());
        let raw = I2cSpyStatus {
            mode: Some(I2cMode::Raw),
            ..frame
        };
        assert_eq!(status::status_reply_errors(&raw, &I2C_SPY_SETTINGS).len(), 1);
    }

    #[test]
    fn test_capture_transactions() {
        let frame = I2cFrame::new(5, 0x36, true, vec![9]);
        let mut bytes = Vec::new();
        frame.encode(&mut bytes);
        assert_eq!(I2cCapture::Frame(bytes).transactions(), vec![frame.clone()]);
        assert_eq!(I2cCapture::Raw(frame.to_records(10)).transactions(), vec![frame]);
    }
}
