//! KBD modules: galvanic matrix and Gtech optical-switch chain
//!
//! Both modules consume one 4-byte entry from their buffer each time their
//! PES action bit fires:
//!
//! - `UPDATE` stages a change in the module shadow map
//! - `SEND` commits the shadow map to the wire
//! - `RESET` clears the shadow map and idles the wire
//!
//! Galvanic entries are `[command, column, row, closed]`; Gtech entries are
//! `[command, chain_id, level, 0]`.

use std::fmt;
use std::sync::Arc;

use kosmos_transport::{msg, FpgaLink, TransportError};
use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::{KosmosError, Result};
use crate::fatal::KosmosFatalError;
use crate::module::status::{self, CommonStatus, ModuleStatus};
use crate::module::{Module, ModuleCore, ModuleSettings, UploadBuffer, UploadEntry, UploadModule};
use crate::pes::{PesActionEvent, PesResumeEvent};

pub const KBD_MATRIX_SETTINGS: ModuleSettings = ModuleSettings::new("KBD_MATRIX", msg::KBD_MATRIX)
    .with_buffer(512)
    .with_fifo(16)
    .optional();

pub const KBD_GTECH_SETTINGS: ModuleSettings = ModuleSettings::new("KBD_GTECH", msg::KBD_GTECH)
    .with_buffer(512)
    .with_fifo(16)
    .optional();

/// Gtech-specific opcodes
pub mod gtech_cmd {
    pub const FUNC_MODE_LEGACY: u8 = 0x40;
    pub const FUNC_MODE_ANALOG: u8 = 0x41;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum KbdCommand {
    Update = 1,
    Send = 2,
    Reset = 3,
}

impl KbdCommand {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Update),
            2 => Some(Self::Send),
            3 => Some(Self::Reset),
            _ => None,
        }
    }
}

/// Gtech function mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FuncMode {
    /// Digital press/release only
    Legacy = 0,
    /// Intermediate displacement levels honored
    Analog = 1,
}

impl FuncMode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Legacy),
            1 => Some(Self::Analog),
            _ => None,
        }
    }
}

// ============================================================================
// Entries
// ============================================================================

/// Entry type of a KBD module
pub trait KbdEntry: UploadEntry {
    fn command(&self) -> KbdCommand;
    fn send() -> Self;
    fn reset() -> Self;
}

/// Galvanic matrix entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixEntry {
    pub command: KbdCommand,
    pub col: u8,
    pub row: u8,
    pub closed: bool,
}

impl MatrixEntry {
    pub fn update(col: u8, row: u8, closed: bool) -> Self {
        Self {
            command: KbdCommand::Update,
            col,
            row,
            closed,
        }
    }
}

impl KbdEntry for MatrixEntry {
    fn command(&self) -> KbdCommand {
        self.command
    }

    fn send() -> Self {
        Self {
            command: KbdCommand::Send,
            col: 0,
            row: 0,
            closed: false,
        }
    }

    fn reset() -> Self {
        Self {
            command: KbdCommand::Reset,
            ..Self::send()
        }
    }
}

impl UploadEntry for MatrixEntry {
    const SIZE: usize = 4;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&[self.command as u8, self.col, self.row, self.closed as u8]);
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        let [command, col, row, closed]: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
        Some(Self {
            command: KbdCommand::from_u8(command)?,
            col,
            row,
            closed: closed != 0,
        })
    }
}

/// Gtech chain entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GtechEntry {
    pub command: KbdCommand,
    pub chain_id: u8,
    pub level: u8,
}

impl GtechEntry {
    pub fn update(chain_id: u8, level: u8) -> Self {
        Self {
            command: KbdCommand::Update,
            chain_id,
            level,
        }
    }
}

impl KbdEntry for GtechEntry {
    fn command(&self) -> KbdCommand {
        self.command
    }

    fn send() -> Self {
        Self {
            command: KbdCommand::Send,
            chain_id: 0,
            level: 0,
        }
    }

    fn reset() -> Self {
        Self {
            command: KbdCommand::Reset,
            ..Self::send()
        }
    }
}

impl UploadEntry for GtechEntry {
    const SIZE: usize = 4;

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&[self.command as u8, self.chain_id, self.level, 0]);
    }

    fn decode(bytes: &[u8]) -> Option<Self> {
        let [command, chain_id, level, _]: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
        Some(Self {
            command: KbdCommand::from_u8(command)?,
            chain_id,
            level,
        })
    }
}

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct RawKbdTail {
    pub func_mode: u8,
    pub reserved: u8,
    pub update_count: U16,
    pub send_count: U16,
    pub reset_count: U16,
    pub last_action_cycle: U32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KbdStatus {
    pub common: CommonStatus,
    pub func_mode: u8,
    /// Entries consumed since reset, per command
    pub update_count: u16,
    pub send_count: u16,
    pub reset_count: u16,
    /// Core cycle of the last action event the module handled
    pub last_action_cycle: u32,
}

impl ModuleStatus for KbdStatus {
    fn parse(payload: &[u8]) -> std::result::Result<Self, TransportError> {
        let (common, tail) = status::parse_with_tail::<RawKbdTail>(payload)?;
        Ok(Self {
            common,
            func_mode: tail.func_mode,
            update_count: tail.update_count.get(),
            send_count: tail.send_count.get(),
            reset_count: tail.reset_count.get(),
            last_action_cycle: tail.last_action_cycle.get(),
        })
    }

    fn common(&self) -> &CommonStatus {
        &self.common
    }
}

// ============================================================================
// Module
// ============================================================================

pub struct KbdModule<E> {
    core: ModuleCore,
    buffer: UploadBuffer<E>,
    send_event: PesActionEvent,
    ready_event: PesResumeEvent,
}

/// Galvanic key-matrix module
pub type KbdMatrix = KbdModule<MatrixEntry>;

/// Gtech optical-switch module
pub type KbdGtech = KbdModule<GtechEntry>;

impl<E> fmt::Debug for KbdModule<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KbdModule")
            .field("name", &self.core.name())
            .field("send_event", &self.send_event)
            .finish()
    }
}

impl<E: KbdEntry> KbdModule<E> {
    fn with_settings(
        settings: ModuleSettings,
        link: Arc<FpgaLink>,
        fatal: Arc<KosmosFatalError>,
        send_event: PesActionEvent,
        ready_event: PesResumeEvent,
    ) -> Self {
        Self {
            buffer: UploadBuffer::new(settings.name, settings.buffer_size.unwrap_or(0) as usize),
            core: ModuleCore::new(settings, link, fatal),
            send_event,
            ready_event,
        }
    }

    /// Action bit that makes the module consume its next entry
    pub fn send_event(&self) -> PesActionEvent {
        self.send_event
    }

    /// Resume bit asserted once the module has handled its entry
    pub fn ready_event(&self) -> PesResumeEvent {
        self.ready_event
    }

    pub fn append(&self, entry: E) -> Result<()> {
        self.buffer.append(entry)
    }

    pub fn extend(&self, entries: impl IntoIterator<Item = E>) -> Result<()> {
        self.buffer.extend(entries)
    }

    pub fn length(&self) -> usize {
        self.buffer.len()
    }

    pub fn entries(&self) -> Vec<E> {
        self.buffer.snapshot()
    }

    /// Commands of the pending entries, in order
    pub fn commands(&self) -> Vec<KbdCommand> {
        self.buffer.snapshot().iter().map(|e| e.command()).collect()
    }

    pub fn messages(&self) -> Vec<(u8, Vec<u8>)> {
        self.buffer.messages(&self.core.settings().cmds)
    }

    pub fn status(&self, sanity_checks: bool) -> Result<KbdStatus> {
        self.core.status(sanity_checks)
    }
}

impl KbdMatrix {
    pub fn new(link: Arc<FpgaLink>, fatal: Arc<KosmosFatalError>) -> Self {
        Self::with_settings(
            KBD_MATRIX_SETTINGS,
            link,
            fatal,
            PesActionEvent::KBD_MATRIX_SEND,
            PesResumeEvent::KBD_MATRIX_READY,
        )
    }
}

impl KbdGtech {
    pub fn new(link: Arc<FpgaLink>, fatal: Arc<KosmosFatalError>) -> Self {
        Self::with_settings(
            KBD_GTECH_SETTINGS,
            link,
            fatal,
            PesActionEvent::KBD_GTECH_SEND,
            PesResumeEvent::KBD_GTECH_READY,
        )
    }

    /// Switch the module function mode and check the reply
    pub fn set_func_mode(&self, mode: FuncMode) -> Result<KbdStatus> {
        let opcode = match mode {
            FuncMode::Legacy => gtech_cmd::FUNC_MODE_LEGACY,
            FuncMode::Analog => gtech_cmd::FUNC_MODE_ANALOG,
        };
        let status: KbdStatus = self.core.status_command(opcode, None, true)?;
        if FuncMode::from_u8(status.func_mode) != Some(mode) {
            let errors = vec![format!(
                "remote function mode {} != requested {:?}",
                status.func_mode, mode
            )];
            self.core.check(errors, true)?;
        }
        Ok(status)
    }

    pub fn func_mode(&self) -> Result<FuncMode> {
        let status = self.status(true)?;
        FuncMode::from_u8(status.func_mode).ok_or_else(|| {
            KosmosError::UnexpectedReply(format!("unknown function mode {}", status.func_mode))
        })
    }
}

impl<E: KbdEntry> Module for KbdModule<E> {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn status_common(&self, sanity_checks: bool) -> Result<CommonStatus> {
        Ok(self.status(sanity_checks)?.common)
    }

    fn reset_module(&self, sanity_checks: bool) -> Result<()> {
        self.core.reset::<KbdStatus>(sanity_checks)?;
        self.buffer.clear();
        self.core.fire_reset_callbacks();
        Ok(())
    }
}

impl<E: KbdEntry> UploadModule for KbdModule<E> {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_entry_bytes() {
        let mut out = Vec::new();
        MatrixEntry::update(3, 5, true).encode(&mut out);
        MatrixEntry::send().encode(&mut out);
        MatrixEntry::reset().encode(&mut out);
        assert_eq!(out, vec![1, 3, 5, 1, 2, 0, 0, 0, 3, 0, 0, 0]);
        let decoded = MatrixEntry::decode_all(&out).unwrap();
        assert_eq!(decoded[0], MatrixEntry::update(3, 5, true));
        assert_eq!(decoded[2].command(), KbdCommand::Reset);
    }

    #[test]
    fn test_gtech_entry_bytes() {
        let mut out = Vec::new();
        GtechEntry::update(7, 40).encode(&mut out);
        assert_eq!(out, vec![1, 7, 40, 0]);
        assert_eq!(GtechEntry::decode(&out), Some(GtechEntry::update(7, 40)));
        assert_eq!(GtechEntry::decode(&[9, 0, 0, 0]), None);
    }

    #[test]
    fn test_status_tail_size() {
        assert_eq!(std::mem::size_of::<RawKbdTail>(), 12);
    }
}
