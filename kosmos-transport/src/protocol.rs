//! Frame format, message ids and opcodes of the Kosmos control link
//!
//! ```text
//! request: A5 | msg_id | msg_cmd | len (u16 LE) | payload | crc16 (u16 LE)
//! reply:   5A | msg_id | msg_cmd | code | len (u16 LE) | payload | crc16 (u16 LE)
//! ```
//!
//! The CRC is CRC-16/CCITT-FALSE over every byte between the start byte and
//! the CRC itself.

use zerocopy::byteorder::little_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::TransportError;

/// Start-of-frame byte for host → FPGA frames
pub const REQUEST_SOF: u8 = 0xA5;
/// Start-of-frame byte for FPGA → host frames
pub const REPLY_SOF: u8 = 0x5A;
/// Largest payload a single frame may carry
pub const MAX_PAYLOAD: usize = 4096;
/// Size of the trailing CRC
pub const CRC_SIZE: usize = 2;

/// FPGA module message ids
pub mod msg {
    pub const SEQUENCER: u8 = 0x01;
    pub const PES: u8 = 0x02;
    pub const PES_CPU: u8 = 0x03;
    pub const KBD_MATRIX: u8 = 0x10;
    pub const KBD_GTECH: u8 = 0x11;
    pub const I2C_SPY: u8 = 0x20;
    pub const RGB_SPY: u8 = 0x21;
    pub const OPTICAL_SENSOR: u8 = 0x30;

    /// Get human-readable name for a message id
    pub fn name(id: u8) -> &'static str {
        match id {
            SEQUENCER => "SEQUENCER",
            PES => "PES",
            PES_CPU => "PES_CPU",
            KBD_MATRIX => "KBD_MATRIX",
            KBD_GTECH => "KBD_GTECH",
            I2C_SPY => "I2C_SPY",
            RGB_SPY => "RGB_SPY",
            OPTICAL_SENSOR => "OPTICAL_SENSOR",
            _ => "UNKNOWN",
        }
    }
}

/// Opcodes shared by every module that supports the operation
pub mod cmd {
    pub const STATUS: u8 = 0x00;
    pub const RESET: u8 = 0x01;
    pub const START: u8 = 0x02;
    pub const STOP: u8 = 0x03;
    /// Write one entry; `WRITE_ONE + n - 1` writes `n` entries
    pub const WRITE_ONE: u8 = 0x10;
    pub const WRITE_MAX: u8 = 0x1F;
    /// Read one entry; `READ_ONE + n - 1` reads `n` entries
    pub const READ_ONE: u8 = 0x20;
    pub const READ_MAX: u8 = 0x3F;
    /// First opcode available for module-specific commands
    pub const MODULE_SPECIFIC: u8 = 0x40;

    /// Get human-readable name for a common opcode
    pub fn name(cmd: u8) -> &'static str {
        match cmd {
            STATUS => "STATUS",
            RESET => "RESET",
            START => "START",
            STOP => "STOP",
            WRITE_ONE..=WRITE_MAX => "WRITE_N",
            READ_ONE..=READ_MAX => "READ_N",
            _ => "MODULE_CMD",
        }
    }
}

/// Reply status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplyCode {
    Ok = 0x00,
    Underrun = 0x01,
    Overrun = 0x02,
    UnknownModule = 0x03,
    UnknownCommand = 0x04,
    BadPayload = 0x05,
}

impl ReplyCode {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(Self::Ok),
            0x01 => Some(Self::Underrun),
            0x02 => Some(Self::Overrun),
            0x03 => Some(Self::UnknownModule),
            0x04 => Some(Self::UnknownCommand),
            0x05 => Some(Self::BadPayload),
            _ => None,
        }
    }
}

/// Fixed request header
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct RequestHeader {
    pub sof: u8,
    pub msg_id: u8,
    pub msg_cmd: u8,
    pub len: U16,
}

/// Fixed reply header
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct ReplyHeader {
    pub sof: u8,
    pub msg_id: u8,
    pub msg_cmd: u8,
    pub code: u8,
    pub len: U16,
}

pub const REQUEST_HEADER_SIZE: usize = std::mem::size_of::<RequestHeader>();
pub const REPLY_HEADER_SIZE: usize = std::mem::size_of::<ReplyHeader>();

/// A decoded request frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub msg_id: u8,
    pub msg_cmd: u8,
    pub payload: Vec<u8>,
}

/// A decoded reply frame, before the reply code is turned into an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReply {
    pub msg_id: u8,
    pub msg_cmd: u8,
    pub code: u8,
    pub payload: Vec<u8>,
}

/// CRC-16/CCITT-FALSE (poly 0x1021, init 0xFFFF, no reflection)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16(&frame[1..]);
    frame.extend_from_slice(&crc.to_le_bytes());
}

fn check_crc(frame: &[u8]) -> Result<(), TransportError> {
    let body_end = frame.len() - CRC_SIZE;
    let expected = crc16(&frame[1..body_end]);
    let actual = u16::from_le_bytes([frame[body_end], frame[body_end + 1]]);
    if expected != actual {
        return Err(TransportError::CrcMismatch { expected, actual });
    }
    Ok(())
}

fn check_payload_len(len: usize) -> Result<u16, TransportError> {
    if len > MAX_PAYLOAD {
        return Err(TransportError::MalformedFrame(format!(
            "payload of {len} bytes exceeds {MAX_PAYLOAD}"
        )));
    }
    Ok(len as u16)
}

/// Build a complete request frame
pub fn build_request(msg_id: u8, msg_cmd: u8, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
    let header = RequestHeader {
        sof: REQUEST_SOF,
        msg_id,
        msg_cmd,
        len: U16::new(check_payload_len(payload.len())?),
    };
    let mut frame = Vec::with_capacity(REQUEST_HEADER_SIZE + payload.len() + CRC_SIZE);
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(payload);
    append_crc(&mut frame);
    Ok(frame)
}

/// Build a complete reply frame
pub fn build_reply(
    msg_id: u8,
    msg_cmd: u8,
    code: ReplyCode,
    payload: &[u8],
) -> Result<Vec<u8>, TransportError> {
    let header = ReplyHeader {
        sof: REPLY_SOF,
        msg_id,
        msg_cmd,
        code: code as u8,
        len: U16::new(check_payload_len(payload.len())?),
    };
    let mut frame = Vec::with_capacity(REPLY_HEADER_SIZE + payload.len() + CRC_SIZE);
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(payload);
    append_crc(&mut frame);
    Ok(frame)
}

/// Parse and CRC-check a request frame
pub fn parse_request(frame: &[u8]) -> Result<Request, TransportError> {
    let (header, rest) = RequestHeader::read_from_prefix(frame)
        .map_err(|_| TransportError::MalformedFrame(format!("{} byte request", frame.len())))?;
    if header.sof != REQUEST_SOF {
        return Err(TransportError::MalformedFrame(format!(
            "bad request start byte 0x{:02X}",
            header.sof
        )));
    }
    let len = header.len.get() as usize;
    if rest.len() != len + CRC_SIZE {
        return Err(TransportError::MalformedFrame(format!(
            "request declares {len} payload bytes, frame carries {}",
            rest.len().saturating_sub(CRC_SIZE)
        )));
    }
    check_crc(frame)?;
    Ok(Request {
        msg_id: header.msg_id,
        msg_cmd: header.msg_cmd,
        payload: rest[..len].to_vec(),
    })
}

/// Parse and CRC-check a reply frame
pub fn parse_reply(frame: &[u8]) -> Result<RawReply, TransportError> {
    let (header, rest) = ReplyHeader::read_from_prefix(frame)
        .map_err(|_| TransportError::MalformedFrame(format!("{} byte reply", frame.len())))?;
    if header.sof != REPLY_SOF {
        return Err(TransportError::MalformedFrame(format!(
            "bad reply start byte 0x{:02X}",
            header.sof
        )));
    }
    let len = header.len.get() as usize;
    if rest.len() != len + CRC_SIZE {
        return Err(TransportError::MalformedFrame(format!(
            "reply declares {len} payload bytes, frame carries {}",
            rest.len().saturating_sub(CRC_SIZE)
        )));
    }
    check_crc(frame)?;
    Ok(RawReply {
        msg_id: header.msg_id,
        msg_cmd: header.msg_cmd,
        code: header.code,
        payload: rest[..len].to_vec(),
    })
}

/// Reassembles reply frames from a byte stream.
///
/// Bytes before a reply start byte are discarded so the assembler
/// resynchronises after line noise.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buf: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of buffered bytes not yet returned as a frame
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete frame, if one is buffered
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        match self.buf.iter().position(|&b| b == REPLY_SOF) {
            Some(0) => {}
            Some(skip) => {
                tracing::debug!("Discarding {} bytes before reply start", skip);
                self.buf.drain(..skip);
            }
            None => {
                self.buf.clear();
                return None;
            }
        }

        if self.buf.len() < REPLY_HEADER_SIZE {
            return None;
        }
        let len = u16::from_le_bytes([self.buf[4], self.buf[5]]) as usize;
        if len > MAX_PAYLOAD {
            // Not a real header: drop the start byte and resync
            self.buf.remove(0);
            return self.next_frame();
        }
        let total = REPLY_HEADER_SIZE + len + CRC_SIZE;
        if self.buf.len() < total {
            return None;
        }
        Some(self.buf.drain(..total).collect())
    }
}

/// Format bytes as a compact hex string for logs
pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16_check_value() {
        assert_eq!(crc16(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_request_layout() {
        let frame = build_request(msg::KBD_MATRIX, cmd::WRITE_ONE, &[1, 2, 3, 4]).unwrap();
        assert_eq!(&frame[..5], &[REQUEST_SOF, 0x10, 0x10, 4, 0]);
        assert_eq!(&frame[5..9], &[1, 2, 3, 4]);
        assert_eq!(frame.len(), 5 + 4 + 2);

        let req = parse_request(&frame).unwrap();
        assert_eq!(req.msg_id, msg::KBD_MATRIX);
        assert_eq!(req.payload, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_corrupted_reply_is_rejected() {
        let mut frame = build_reply(msg::PES, cmd::STATUS, ReplyCode::Ok, &[9; 8]).unwrap();
        frame[7] ^= 0xFF;
        assert!(matches!(
            parse_reply(&frame),
            Err(TransportError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_reply_is_rejected() {
        let frame = build_reply(msg::PES, cmd::STATUS, ReplyCode::Ok, &[9; 8]).unwrap();
        assert!(matches!(
            parse_reply(&frame[..frame.len() - 3]),
            Err(TransportError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_oversized_payload_is_refused() {
        let payload = vec![0u8; MAX_PAYLOAD + 1];
        assert!(build_request(msg::PES, cmd::WRITE_MAX, &payload).is_err());
    }

    #[test]
    fn test_assembler_splits_and_resyncs() {
        let a = build_reply(msg::PES, cmd::STATUS, ReplyCode::Ok, &[1, 2]).unwrap();
        let b = build_reply(msg::I2C_SPY, cmd::READ_ONE, ReplyCode::Underrun, &[]).unwrap();

        let mut asm = FrameAssembler::new();
        asm.push(&[0x00, 0x13]); // line noise
        asm.push(&a[..4]);
        assert!(asm.next_frame().is_none());
        asm.push(&a[4..]);
        asm.push(&b);

        assert_eq!(asm.next_frame().unwrap(), a);
        let second = asm.next_frame().unwrap();
        let reply = parse_reply(&second).unwrap();
        assert_eq!(reply.code, ReplyCode::Underrun as u8);
        assert!(asm.next_frame().is_none());
        assert_eq!(asm.pending(), 0);
    }

    #[test]
    fn test_reply_code_roundtrip() {
        for code in 0..=5u8 {
            assert_eq!(ReplyCode::from_u8(code).unwrap() as u8, code);
        }
        assert!(ReplyCode::from_u8(0x42).is_none());
    }
}
