//! RGB spy
//!
//! Producer module sampling the LED controller output of the device under
//! test. Sampling runs between `start_capture` and `stop_capture`; each LED
//! update is stored as one 8-byte sample.

pub mod parser;

pub use parser::{
    group_frames, verify, ReferenceEffect, RgbColor, RgbFrame, RgbMismatch, RgbSample, RgbVerification,
    RGB_SAMPLE_SIZE,
};

use std::sync::Arc;

use kosmos_transport::{msg, FpgaLink, TransportError};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::Result;
use crate::fatal::KosmosFatalError;
use crate::module::download::{self, DownloadModule};
use crate::module::status::{self, CommonStatus, ModuleStatus};
use crate::module::{Module, ModuleCore, ModuleSettings};
use crate::pes::{CpuEvent, PesResumeEvent};

pub const RGB_SPY_SETTINGS: ModuleSettings = ModuleSettings::new("RGB_SPY", msg::RGB_SPY)
    .with_buffer(1024)
    .with_fifo(32)
    .optional();

#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct RawRgbSpyTail {
    pub led_count: u8,
    pub reserved: [u8; 3],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbSpyStatus {
    pub common: CommonStatus,
    /// LEDs on the spied bus
    pub led_count: u8,
}

impl RgbSpyStatus {
    pub fn is_capturing(&self) -> bool {
        self.common.state == RGB_SPY_SETTINGS.state_started
    }
}

impl ModuleStatus for RgbSpyStatus {
    fn parse(payload: &[u8]) -> std::result::Result<Self, TransportError> {
        let (common, tail) = status::parse_with_tail::<RawRgbSpyTail>(payload)?;
        Ok(Self {
            common,
            led_count: tail.led_count,
        })
    }

    fn common(&self) -> &CommonStatus {
        &self.common
    }
}

#[derive(Debug)]
pub struct RgbSpy {
    core: ModuleCore,
}

impl RgbSpy {
    pub fn new(link: Arc<FpgaLink>, fatal: Arc<KosmosFatalError>) -> Self {
        Self {
            core: ModuleCore::new(RGB_SPY_SETTINGS, link, fatal),
        }
    }

    pub fn status(&self, sanity_checks: bool) -> Result<RgbSpyStatus> {
        self.core.status(sanity_checks)
    }

    pub fn start_capture(&self) -> Result<RgbSpyStatus> {
        self.core.status_command(self.core.settings().cmds.start, None, true)
    }

    pub fn stop_capture(&self) -> Result<RgbSpyStatus> {
        self.core.status_command(self.core.settings().cmds.stop, None, true)
    }

    /// Queue a FIFO flush through the PES and play it when online
    pub fn flush(&self) -> Result<()> {
        let dt = self.core.dt()?;
        dt.pes().action(CpuEvent::FlushRgbSpyFifo)?;
        dt.pes().wait(PesResumeEvent::PES_CPU_DONE)?;
        dt.sequencer().play_if_online()
    }

    /// Download everything and check it against `effect`
    pub fn capture_and_verify(&self, effect: &ReferenceEffect, tolerance: u8) -> Result<RgbVerification> {
        let samples = self.download(None)?;
        Ok(verify(&samples, effect, tolerance))
    }
}

impl Module for RgbSpy {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn status_common(&self, sanity_checks: bool) -> Result<CommonStatus> {
        Ok(self.status(sanity_checks)?.common)
    }

    fn reset_module(&self, sanity_checks: bool) -> Result<()> {
        self.core.reset::<RgbSpyStatus>(sanity_checks)?;
        self.core.fire_reset_callbacks();
        Ok(())
    }
}

impl DownloadModule for RgbSpy {
    type Capture = Vec<RgbSample>;

    fn size(&self) -> usize {
        download::producer_size(self.core.settings().buffer_size)
    }

    fn download(&self, count: Option<usize>) -> Result<Vec<RgbSample>> {
        let available = self.status(true)?.common.buffer_count as usize;
        let count = count.unwrap_or(available);
        download::check_count(&self.core, count, self.size())?;
        download::check_available(&self.core, count, available)?;
        let bytes = download::read_units(&self.core, RGB_SAMPLE_SIZE, count)?;
        Ok(parser::decode_samples(&bytes))
    }
}
