//! Programmable Event Sequencer
//!
//! The PES module owns the shared instruction list. Emulators and tests
//! append `EXECUTE` / `WAIT` / `DELAY` / `CPU_ACTION` instructions; the
//! [`Sequencer`](crate::sequencer::Sequencer) uploads and runs them.

pub mod cpu;
pub mod events;
pub mod instruction;

pub use cpu::{CpuEvent, PesCpu};
pub use events::{combine, PesActionEvent, PesResumeEvent};
pub use instruction::{PesInstruction, MAX_DELAY_CYCLES};

use std::sync::Arc;
use std::time::Duration;

use kosmos_transport::{msg, FpgaLink};

use crate::error::{KosmosError, Result};
use crate::fatal::KosmosFatalError;
use crate::module::{CommonStatus, Module, ModuleCore, ModuleSettings, UploadBuffer, UploadModule};

pub const PES_SETTINGS: ModuleSettings = ModuleSettings::new("PES", msg::PES)
    .with_buffer(2048)
    .with_fifo(16);

#[derive(Debug)]
pub struct Pes {
    core: ModuleCore,
    buffer: UploadBuffer<PesInstruction>,
    core_clock_hz: u64,
}

impl Pes {
    pub fn new(link: Arc<FpgaLink>, fatal: Arc<KosmosFatalError>, core_clock_hz: u64) -> Self {
        let capacity = PES_SETTINGS.buffer_size.unwrap_or(0) as usize;
        Self {
            core: ModuleCore::new(PES_SETTINGS, link, fatal),
            buffer: UploadBuffer::new(PES_SETTINGS.name, capacity),
            core_clock_hz,
        }
    }

    pub fn core_clock_hz(&self) -> u64 {
        self.core_clock_hz
    }

    // ========================================================================
    // Instructions
    // ========================================================================

    /// Fire action events on one FPGA cycle
    pub fn execute(&self, action: PesActionEvent) -> Result<()> {
        if action.is_empty() {
            return Err(KosmosError::InvalidParameter("EXECUTE with no action event".into()));
        }
        self.buffer.append(PesInstruction::Execute(action))
    }

    /// Fire the union of several action events on one FPGA cycle
    pub fn execute_all(&self, actions: impl IntoIterator<Item = PesActionEvent>) -> Result<()> {
        self.execute(combine(actions))
    }

    /// Suspend the PES until the resume events assert
    pub fn wait(&self, resume: PesResumeEvent) -> Result<()> {
        if resume.is_empty() {
            return Err(KosmosError::InvalidParameter("WAIT with no resume event".into()));
        }
        self.buffer.append(PesInstruction::Wait(resume))
    }

    pub fn wait_all(&self, resumes: impl IntoIterator<Item = PesResumeEvent>) -> Result<()> {
        self.wait(combine(resumes))
    }

    /// Busy-wait for `delay`, rounded up to whole core cycles
    pub fn delay(&self, delay: Duration) -> Result<()> {
        self.delay_cycles(self.duration_to_cycles(delay))
    }

    /// Busy-wait for `seconds`
    pub fn delay_s(&self, seconds: f64) -> Result<()> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(KosmosError::InvalidParameter(format!("invalid delay {seconds} s")));
        }
        self.delay(Duration::from_secs_f64(seconds))
    }

    /// Busy-wait for `cycles`; long delays span several instructions and a
    /// zero delay adds nothing
    pub fn delay_cycles(&self, cycles: u64) -> Result<()> {
        let mut remaining = cycles;
        let mut chunks = Vec::new();
        while remaining > 0 {
            let n = remaining.min(MAX_DELAY_CYCLES as u64);
            chunks.push(PesInstruction::Delay(n as u32));
            remaining -= n;
        }
        self.buffer.extend(chunks)
    }

    /// Request a CPU-side action
    pub fn action(&self, event: CpuEvent) -> Result<()> {
        self.buffer.append(PesInstruction::CpuAction(event))
    }

    // ========================================================================
    // Local list
    // ========================================================================

    pub fn instructions(&self) -> Vec<PesInstruction> {
        self.buffer.snapshot()
    }

    pub fn length(&self) -> usize {
        self.buffer.len()
    }

    pub fn messages(&self) -> Vec<(u8, Vec<u8>)> {
        self.buffer.messages(&self.core.settings().cmds)
    }

    /// Cycles spent in DELAY instructions of the local list
    pub fn total_delay_cycles(&self) -> u64 {
        self.buffer
            .snapshot()
            .iter()
            .filter(|i| i.is_delay())
            .map(|i| i.cycles())
            .sum()
    }

    pub fn queued_delay(&self) -> Duration {
        self.cycles_to_duration(self.total_delay_cycles())
    }

    pub fn duration_to_cycles(&self, duration: Duration) -> u64 {
        let cycles = (duration.as_nanos() * self.core_clock_hz as u128).div_ceil(1_000_000_000);
        u64::try_from(cycles).unwrap_or(u64::MAX)
    }

    pub fn cycles_to_duration(&self, cycles: u64) -> Duration {
        let nanos = (cycles as u128 * 1_000_000_000) / self.core_clock_hz.max(1) as u128;
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    pub fn status(&self, sanity_checks: bool) -> Result<CommonStatus> {
        self.core.status(sanity_checks)
    }
}

impl Module for Pes {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn status_common(&self, sanity_checks: bool) -> Result<CommonStatus> {
        self.status(sanity_checks)
    }

    fn reset_module(&self, sanity_checks: bool) -> Result<()> {
        self.core.reset::<CommonStatus>(sanity_checks)?;
        self.buffer.clear();
        self.core.fire_reset_callbacks();
        Ok(())
    }
}

impl UploadModule for Pes {
    fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn send(&self) -> Result<usize> {
        self.buffer.send(&self.core)
    }

    fn clear(&self) {
        self.buffer.clear();
    }

    fn truncate(&self, len: usize) {
        self.buffer.truncate(len);
    }
}
