//! CPU-events module
//!
//! The PES hands `CPU_ACTION` instructions to the board CPU, which performs
//! housekeeping that has no event bit of its own (FIFO flushes) and asserts
//! `PES_CPU_DONE` when finished.

use std::sync::Arc;

use kosmos_transport::{msg, FpgaLink, TransportError};
use zerocopy::byteorder::little_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::Result;
use crate::fatal::KosmosFatalError;
use crate::module::status::{self, CommonStatus, ModuleStatus};
use crate::module::{Module, ModuleCore, ModuleSettings};

pub const PES_CPU_SETTINGS: ModuleSettings = ModuleSettings::new("PES_CPU", msg::PES_CPU);

/// Actions the CPU performs on request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CpuEvent {
    /// Move the I²C spy FIFO into its buffer
    FlushI2cSpyFifo = 1,
    /// Move the RGB spy FIFO into its buffer
    FlushRgbSpyFifo = 2,
}

impl CpuEvent {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::FlushI2cSpyFifo),
            2 => Some(Self::FlushRgbSpyFifo),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct RawCpuTail {
    pub last_event: u8,
    pub reserved: u8,
    pub handled: U16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PesCpuStatus {
    pub common: CommonStatus,
    /// Last event handled, if any
    pub last_event: Option<CpuEvent>,
    pub handled: u16,
}

impl ModuleStatus for PesCpuStatus {
    fn parse(payload: &[u8]) -> std::result::Result<Self, TransportError> {
        let (common, tail) = status::parse_with_tail::<RawCpuTail>(payload)?;
        Ok(Self {
            common,
            last_event: CpuEvent::from_u8(tail.last_event),
            handled: tail.handled.get(),
        })
    }

    fn common(&self) -> &CommonStatus {
        &self.common
    }
}

#[derive(Debug)]
pub struct PesCpu {
    core: ModuleCore,
}

impl PesCpu {
    pub fn new(link: Arc<FpgaLink>, fatal: Arc<KosmosFatalError>) -> Self {
        Self {
            core: ModuleCore::new(PES_CPU_SETTINGS, link, fatal),
        }
    }

    pub fn status(&self, sanity_checks: bool) -> Result<PesCpuStatus> {
        self.core.status(sanity_checks)
    }
}

impl Module for PesCpu {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn status_common(&self, sanity_checks: bool) -> Result<CommonStatus> {
        Ok(self.status(sanity_checks)?.common)
    }

    fn reset_module(&self, sanity_checks: bool) -> Result<()> {
        self.core.reset::<PesCpuStatus>(sanity_checks)?;
        self.core.fire_reset_callbacks();
        Ok(())
    }
}
