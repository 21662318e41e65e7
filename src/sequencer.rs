//! Sequencer: offline composition and atomic play
//!
//! While offline, every instruction contributed by modules stays in the
//! host-side lists. `play_sequence` uploads them all, starts the PES and
//! blocks until the sequencer reports completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use kosmos_transport::{msg, FpgaLink, TransportError};
use tracing::{debug, warn};
use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::{KosmosError, Result};
use crate::fatal::KosmosFatalError;
use crate::module::status::{self, CommonStatus, ModuleStatus};
use crate::module::{Module, ModuleCore, ModuleSettings, UploadModule};

/// Sequencer state codes
pub mod state {
    pub const IDLE: u8 = 0x00;
    pub const RUNNING: u8 = 0x01;
    pub const DONE: u8 = 0x02;
}

pub const SEQUENCER_SETTINGS: ModuleSettings =
    ModuleSettings::new("SEQUENCER", msg::SEQUENCER).with_extra_states(&[state::DONE]);

/// Extra time granted to every play on top of the queued delays
pub const PLAY_TIMEOUT_MARGIN: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct RawSequencerTail {
    pub fpga_revision: U16,
    pub pc: U16,
    pub cycle: U32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencerStatus {
    pub common: CommonStatus,
    pub fpga_revision: u16,
    /// Index of the next PES instruction
    pub pc: u16,
    /// Core cycle counter (wraps)
    pub cycle: u32,
}

impl SequencerStatus {
    pub fn is_done(&self) -> bool {
        self.common.state == state::DONE
    }
}

impl ModuleStatus for SequencerStatus {
    fn parse(payload: &[u8]) -> std::result::Result<Self, TransportError> {
        let (common, tail) = status::parse_with_tail::<RawSequencerTail>(payload)?;
        Ok(Self {
            common,
            fpga_revision: tail.fpga_revision.get(),
            pc: tail.pc.get(),
            cycle: tail.cycle.get(),
        })
    }

    fn common(&self) -> &CommonStatus {
        &self.common
    }
}

#[derive(Debug)]
pub struct Sequencer {
    core: ModuleCore,
    offline_mode: AtomicBool,
    poll_interval: Duration,
}

impl Sequencer {
    pub fn new(link: Arc<FpgaLink>, fatal: Arc<KosmosFatalError>, poll_interval: Duration) -> Self {
        Self {
            core: ModuleCore::new(SEQUENCER_SETTINGS, link, fatal),
            offline_mode: AtomicBool::new(false),
            poll_interval,
        }
    }

    pub fn status(&self, sanity_checks: bool) -> Result<SequencerStatus> {
        self.core.status(sanity_checks)
    }

    // ------------------------------------------------------------------------
    // Offline mode
    // ------------------------------------------------------------------------

    pub fn offline_mode(&self) -> bool {
        self.offline_mode.load(Ordering::SeqCst)
    }

    pub fn set_offline_mode(&self, offline: bool) {
        self.offline_mode.store(offline, Ordering::SeqCst);
    }

    /// Run `f` with offline mode forced on, then restore the previous mode
    ///
    /// When `f` fails, every entry it queued on the PES and the KBD lists is
    /// dropped again, so the lists hold exactly what they held before.
    pub fn compose<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        let marks = self.core.dt().ok().map(|dt| {
            let mut lists: Vec<Arc<dyn UploadModule>> = dt.upload_modules();
            lists.push(dt.pes().clone());
            lists
                .into_iter()
                .map(|m| {
                    let len = m.pending();
                    (m, len)
                })
                .collect::<Vec<_>>()
        });

        let previous = self.offline_mode.swap(true, Ordering::SeqCst);
        let result = f();
        self.offline_mode.store(previous, Ordering::SeqCst);

        if result.is_err() {
            for (list, len) in marks.into_iter().flatten() {
                let dropped = list.pending().saturating_sub(len);
                if dropped > 0 {
                    debug!("{}: dropping {} entries of a failed composition", list.name(), dropped);
                    list.truncate(len);
                }
            }
        }
        result
    }

    // ------------------------------------------------------------------------
    // Play
    // ------------------------------------------------------------------------

    /// Play the queued sequence unless offline; the timeout covers every
    /// queued delay plus [`PLAY_TIMEOUT_MARGIN`]
    pub fn play_if_online(&self) -> Result<()> {
        if self.offline_mode() {
            return Ok(());
        }
        let dt = self.core.dt()?;
        let timeout = PLAY_TIMEOUT_MARGIN + dt.pes().queued_delay();
        self.play_sequence(timeout)
    }

    /// Upload every pending list, run the PES and wait for completion
    pub fn play_sequence(&self, timeout: Duration) -> Result<()> {
        let dt = self.core.dt()?;
        dt.check_fatal()?;
        if dt.reset_required() {
            return Err(KosmosError::ResetRequired);
        }

        let uploads = dt.upload_modules();
        let pes = dt.pes();
        if pes.pending() == 0 && uploads.iter().all(|m| m.pending() == 0) {
            debug!("Empty sequence, nothing to play");
            return Ok(());
        }

        for module in uploads.iter().filter(|m| m.pending() > 0) {
            module.send()?;
        }
        let instructions = pes.send()?;

        let start = Instant::now();
        let _: SequencerStatus =
            self.core
                .status_command(self.core.settings().cmds.start, None, true)?;
        debug!("Sequence of {} instructions started", instructions);

        loop {
            let status = self.status(true)?;
            if status.is_done() {
                debug!(
                    "Sequence done in {:.3}ms (cycle {})",
                    start.elapsed().as_secs_f64() * 1000.0,
                    status.cycle
                );
                break;
            }
            if start.elapsed() >= timeout {
                warn!("Sequence did not complete within {:?}", timeout);
                dt.flag_reset_required();
                return Err(KosmosError::PlayTimeout(timeout));
            }
            std::thread::sleep(self.poll_interval);
        }

        for module in &uploads {
            module.clear();
        }
        pes.clear();
        Ok(())
    }
}

impl Module for Sequencer {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn status_common(&self, sanity_checks: bool) -> Result<CommonStatus> {
        Ok(self.status(sanity_checks)?.common)
    }

    fn reset_module(&self, sanity_checks: bool) -> Result<()> {
        self.core.reset::<SequencerStatus>(sanity_checks)?;
        self.core.fire_reset_callbacks();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_tail_layout() {
        let common = CommonStatus {
            msg_id: msg::SEQUENCER,
            instance_id: 0,
            state: state::DONE,
            underrun: false,
            overrun: false,
            buffer_count: 0,
            fifo_count: 0,
        };
        let tail = RawSequencerTail {
            fpga_revision: U16::new(0x0203),
            pc: U16::new(7),
            cycle: U32::new(1234),
        };
        let payload = status::encode_with_tail(&common, &tail);
        assert_eq!(payload.len(), 16);
        let parsed = SequencerStatus::parse(&payload).unwrap();
        assert!(parsed.is_done());
        assert_eq!(parsed.fpga_revision, 0x0203);
        assert_eq!(parsed.pc, 7);
        assert_eq!(parsed.cycle, 1234);
    }

    #[test]
    fn test_compose_restores_mode() {
        let link = Arc::new(FpgaLink::new(Arc::new(crate::simulator::SimulatedFpga::new())));
        let seq = Sequencer::new(link, Arc::new(KosmosFatalError::new()), Duration::from_millis(1));
        assert!(!seq.offline_mode());
        let inside = seq.compose(|| Ok(seq.offline_mode())).unwrap();
        assert!(inside);
        assert!(!seq.offline_mode());

        seq.set_offline_mode(true);
        assert!(seq
            .compose(|| -> Result<()> { Err(KosmosError::ResetRequired) })
            .is_err());
        assert!(seq.offline_mode());
    }
}
