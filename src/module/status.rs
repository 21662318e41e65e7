//! Status replies
//!
//! Every status (and reset) reply starts with the same 8-byte header:
//!
//! ```text
//! msg_id | instance_id | state | flags | buffer_count (u16 LE) | fifo_count (u16 LE)
//! ```
//!
//! followed by a module-specific tail declared next to each module.

use kosmos_transport::{read_struct, TransportError};
use serde::Serialize;
use zerocopy::byteorder::little_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::settings::ModuleSettings;

/// Status flag bits
pub mod flags {
    /// A module consumed from an empty buffer since the last reset
    pub const UNDERRUN: u8 = 0x01;
    /// Data was dropped because the buffer was full
    pub const OVERRUN: u8 = 0x02;
}

#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct RawStatusHeader {
    pub msg_id: u8,
    pub instance_id: u8,
    pub state: u8,
    pub flags: u8,
    pub buffer_count: U16,
    pub fifo_count: U16,
}

pub const STATUS_HEADER_SIZE: usize = std::mem::size_of::<RawStatusHeader>();

/// Decoded common status header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommonStatus {
    pub msg_id: u8,
    pub instance_id: u8,
    pub state: u8,
    pub underrun: bool,
    pub overrun: bool,
    pub buffer_count: u16,
    pub fifo_count: u16,
}

impl CommonStatus {
    pub fn to_raw(&self) -> RawStatusHeader {
        let mut f = 0;
        if self.underrun {
            f |= flags::UNDERRUN;
        }
        if self.overrun {
            f |= flags::OVERRUN;
        }
        RawStatusHeader {
            msg_id: self.msg_id,
            instance_id: self.instance_id,
            state: self.state,
            flags: f,
            buffer_count: U16::new(self.buffer_count),
            fifo_count: U16::new(self.fifo_count),
        }
    }
}

impl From<RawStatusHeader> for CommonStatus {
    fn from(raw: RawStatusHeader) -> Self {
        Self {
            msg_id: raw.msg_id,
            instance_id: raw.instance_id,
            state: raw.state,
            underrun: raw.flags & flags::UNDERRUN != 0,
            overrun: raw.flags & flags::OVERRUN != 0,
            buffer_count: raw.buffer_count.get(),
            fifo_count: raw.fifo_count.get(),
        }
    }
}

/// A module's parsed status reply
pub trait ModuleStatus: Sized + Clone + std::fmt::Debug + Send {
    fn parse(payload: &[u8]) -> Result<Self, TransportError>;

    fn common(&self) -> &CommonStatus;

    /// Capacity `buffer_count` is checked against
    fn buffer_capacity(&self, settings: &ModuleSettings) -> Option<u16> {
        settings.buffer_size
    }
}

impl ModuleStatus for CommonStatus {
    fn parse(payload: &[u8]) -> Result<Self, TransportError> {
        read_struct::<RawStatusHeader>(payload).map(Self::from)
    }

    fn common(&self) -> &CommonStatus {
        self
    }
}

/// Parse the common header and a module tail
pub fn parse_with_tail<T: FromBytes>(payload: &[u8]) -> Result<(CommonStatus, T), TransportError> {
    let common = CommonStatus::parse(payload)?;
    let tail = read_struct::<T>(&payload[STATUS_HEADER_SIZE..])?;
    Ok((common, tail))
}

/// Serialize a header and tail into a status payload
pub fn encode_with_tail<T: IntoBytes + Immutable>(common: &CommonStatus, tail: &T) -> Vec<u8> {
    let mut out = common.to_raw().as_bytes().to_vec();
    out.extend_from_slice(tail.as_bytes());
    out
}

/// Checks every status reply must pass (`is_status_reply_valid`)
pub fn status_reply_errors<S: ModuleStatus>(status: &S, settings: &ModuleSettings) -> Vec<String> {
    let common = status.common();
    let mut errors = Vec::new();

    if common.msg_id != settings.msg_id {
        errors.push(format!(
            "remote msg id 0x{:02X} != local 0x{:02X}",
            common.msg_id, settings.msg_id
        ));
    }
    if common.instance_id != settings.instance_id {
        errors.push(format!(
            "remote instance id {} != local {}",
            common.instance_id, settings.instance_id
        ));
    }
    if let Some(capacity) = status.buffer_capacity(settings) {
        if common.buffer_count > capacity {
            errors.push(format!(
                "buffer count {} exceeds buffer size {}",
                common.buffer_count, capacity
            ));
        }
    }
    if let Some(fifo_size) = settings.fifo_size {
        if common.fifo_count > fifo_size {
            errors.push(format!(
                "FIFO count {} exceeds FIFO size {}",
                common.fifo_count, fifo_size
            ));
        }
    }
    if !settings.is_known_state(common.state) {
        errors.push(format!("unknown state code {}", common.state));
    }
    if common.underrun {
        errors.push("underrun flag set".to_string());
    }
    if common.overrun {
        errors.push("overrun flag set".to_string());
    }
    errors
}

/// Checks for a reset reply (`is_reset_reply_valid`): status checks plus
/// empty buffer and FIFO in the RESET_OR_STOP state
pub fn reset_reply_errors<S: ModuleStatus>(status: &S, settings: &ModuleSettings) -> Vec<String> {
    let common = status.common();
    let mut errors = status_reply_errors(status, settings);
    if common.buffer_count != 0 {
        errors.push(format!("buffer count {} after reset", common.buffer_count));
    }
    if common.fifo_count != 0 {
        errors.push(format!("FIFO count {} after reset", common.fifo_count));
    }
    if common.state != settings.state_reset_or_stop {
        errors.push(format!(
            "state {} after reset, expected {}",
            common.state, settings.state_reset_or_stop
        ));
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    const SETTINGS: ModuleSettings = ModuleSettings::new("KBD_MATRIX", 0x10)
        .with_buffer(64)
        .with_fifo(8);

    fn status(buffer_count: u16) -> CommonStatus {
        CommonStatus {
            msg_id: 0x10,
            instance_id: 0,
            state: 0,
            underrun: false,
            overrun: false,
            buffer_count,
            fifo_count: 0,
        }
    }

    #[test]
    fn test_header_layout() {
        assert_eq!(STATUS_HEADER_SIZE, 8);
        let mut s = status(0x0102);
        s.underrun = true;
        let raw = s.to_raw();
        assert_eq!(raw.as_bytes(), &[0x10, 0, 0, 0x01, 0x02, 0x01, 0, 0]);
        assert_eq!(CommonStatus::parse(raw.as_bytes()).unwrap(), s);
    }

    #[test]
    fn test_short_status_rejected() {
        assert!(CommonStatus::parse(&[0x10, 0, 0]).is_err());
    }

    #[test]
    fn test_all_mismatches_reported() {
        let mut s = status(65);
        s.msg_id = 0x11;
        s.fifo_count = 9;
        s.state = 9;
        s.overrun = true;
        let errors = status_reply_errors(&s, &SETTINGS);
        assert_eq!(errors.len(), 5, "{errors:?}");
    }

    #[test]
    fn test_reset_reply_requires_empty_buffers() {
        assert!(reset_reply_errors(&status(0), &SETTINGS).is_empty());
        let mut s = status(3);
        s.state = 1;
        assert_eq!(reset_reply_errors(&s, &SETTINGS).len(), 2);
    }
}
