//! I²C capture parsers
//!
//! Raw mode records carry one bus byte each with its bus conditions; they are
//! turned into timestamped [`I2cBusEvent`]s and assembled into transactions.
//! Frame mode bytes are already grouped by the FPGA and only need splitting,
//! which [`FrameParser`] does incrementally.

use bitflags::bitflags;
use zerocopy::byteorder::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

bitflags! {
    /// Bus conditions attached to a raw record
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct I2cFlags: u8 {
        const START = 0x01;
        const STOP = 0x02;
        const ACK = 0x04;
        const ADDRESS = 0x08;
        const REPEATED_START = 0x10;
    }
}

/// On-wire raw record (`i2c_spy_reg_t`)
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct I2cSpyReg {
    pub timestamp: U32,
    pub data: u8,
    pub flags: u8,
    pub reserved: [u8; 2],
}

pub const I2C_SPY_REG_SIZE: usize = std::mem::size_of::<I2cSpyReg>();

/// Decoded raw record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct I2cRecord {
    /// Core cycle of the byte's last bit
    pub timestamp: u32,
    pub data: u8,
    pub flags: I2cFlags,
}

impl I2cRecord {
    pub fn new(timestamp: u32, data: u8, flags: I2cFlags) -> Self {
        Self {
            timestamp,
            data,
            flags,
        }
    }

    pub fn to_raw(self) -> I2cSpyReg {
        I2cSpyReg {
            timestamp: U32::new(self.timestamp),
            data: self.data,
            flags: self.flags.bits(),
            reserved: [0; 2],
        }
    }
}

impl From<I2cSpyReg> for I2cRecord {
    fn from(raw: I2cSpyReg) -> Self {
        Self {
            timestamp: raw.timestamp.get(),
            data: raw.data,
            flags: I2cFlags::from_bits_truncate(raw.flags),
        }
    }
}

/// Split raw-mode bytes into records
pub fn decode_records(bytes: &[u8]) -> Vec<I2cRecord> {
    bytes
        .chunks_exact(I2C_SPY_REG_SIZE)
        .filter_map(|chunk| I2cSpyReg::read_from_bytes(chunk).ok())
        .map(I2cRecord::from)
        .collect()
}

// ============================================================================
// Raw events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum I2cEventKind {
    Start,
    RepeatedStart,
    Address { addr: u8, read: bool },
    Data(u8),
    Ack,
    Nack,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct I2cBusEvent {
    pub timestamp: u32,
    pub kind: I2cEventKind,
}

/// Expand raw records into bus events
pub fn parse_raw(records: &[I2cRecord]) -> Vec<I2cBusEvent> {
    let mut events = Vec::with_capacity(records.len() * 3);
    for r in records {
        let mut push = |kind| {
            events.push(I2cBusEvent {
                timestamp: r.timestamp,
                kind,
            })
        };
        if r.flags.contains(I2cFlags::REPEATED_START) {
            push(I2cEventKind::RepeatedStart);
        } else if r.flags.contains(I2cFlags::START) {
            push(I2cEventKind::Start);
        }
        if r.flags.contains(I2cFlags::ADDRESS) {
            push(I2cEventKind::Address {
                addr: r.data >> 1,
                read: r.data & 1 != 0,
            });
        } else {
            push(I2cEventKind::Data(r.data));
        }
        push(if r.flags.contains(I2cFlags::ACK) {
            I2cEventKind::Ack
        } else {
            I2cEventKind::Nack
        });
        if r.flags.contains(I2cFlags::STOP) {
            push(I2cEventKind::Stop);
        }
    }
    events
}

// ============================================================================
// Transactions
// ============================================================================

/// One addressed transfer between (repeated) START and STOP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I2cFrame {
    pub timestamp: u32,
    /// 7-bit address
    pub address: u8,
    pub read: bool,
    /// A NACK was seen on the address or a data byte
    pub nack: bool,
    pub data: Vec<u8>,
}

impl I2cFrame {
    pub fn new(timestamp: u32, address: u8, read: bool, data: impl Into<Vec<u8>>) -> Self {
        Self {
            timestamp,
            address,
            read,
            nack: false,
            data: data.into(),
        }
    }

    pub fn with_nack(mut self, nack: bool) -> Self {
        self.nack = nack;
        self
    }

    /// Frame-mode encoding
    pub fn encode(&self, out: &mut Vec<u8>) {
        let header = RawFrameHeader {
            data_len: self.data.len().min(u8::MAX as usize) as u8,
            timestamp: U32::new(self.timestamp),
            addr_rw: (self.address << 1) | self.read as u8,
            status: self.nack as u8,
        };
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.data[..header.data_len as usize]);
    }

    /// Raw-mode records: address byte with START, data bytes, STOP on the last
    pub fn to_records(&self, cycles_per_byte: u32) -> Vec<I2cRecord> {
        let mut records = Vec::with_capacity(self.data.len() + 1);
        let ack = if self.nack { I2cFlags::empty() } else { I2cFlags::ACK };
        records.push(I2cRecord::new(
            self.timestamp,
            (self.address << 1) | self.read as u8,
            I2cFlags::START | I2cFlags::ADDRESS | ack,
        ));
        for (i, &byte) in self.data.iter().enumerate() {
            let ts = self
                .timestamp
                .wrapping_add(cycles_per_byte.wrapping_mul(i as u32 + 1));
            records.push(I2cRecord::new(ts, byte, I2cFlags::ACK));
        }
        if let Some(last) = records.last_mut() {
            last.flags |= I2cFlags::STOP;
        }
        records
    }
}

/// Group bus events into transactions; an unterminated trailing transaction
/// is returned as well
pub fn assemble_transactions(events: &[I2cBusEvent]) -> Vec<I2cFrame> {
    let mut frames = Vec::new();
    let mut current: Option<I2cFrame> = None;

    for event in events {
        match event.kind {
            I2cEventKind::Start | I2cEventKind::RepeatedStart => {
                frames.extend(current.take());
                current = Some(I2cFrame::new(event.timestamp, 0, false, Vec::new()));
            }
            I2cEventKind::Address { addr, read } => {
                if let Some(frame) = current.as_mut() {
                    frame.address = addr;
                    frame.read = read;
                }
            }
            I2cEventKind::Data(byte) => {
                if let Some(frame) = current.as_mut() {
                    frame.data.push(byte);
                }
            }
            I2cEventKind::Nack => {
                if let Some(frame) = current.as_mut() {
                    frame.nack = true;
                }
            }
            I2cEventKind::Ack => {}
            I2cEventKind::Stop => frames.extend(current.take()),
        }
    }
    frames.extend(current);
    frames
}

// ============================================================================
// Frame mode
// ============================================================================

#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct RawFrameHeader {
    pub data_len: u8,
    pub timestamp: U32,
    pub addr_rw: u8,
    /// Bit 0: NACK seen
    pub status: u8,
}

pub const FRAME_HEADER_SIZE: usize = std::mem::size_of::<RawFrameHeader>();

/// Incremental frame-mode parser; keeps an incomplete trailing frame until
/// the rest arrives
#[derive(Debug, Default)]
pub struct FrameParser {
    pending: Vec<u8>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes held back waiting for the end of a frame
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<I2cFrame> {
        self.pending.extend_from_slice(bytes);
        let mut frames = Vec::new();
        let mut offset = 0;

        while let Ok((header, rest)) = RawFrameHeader::read_from_prefix(&self.pending[offset..]) {
            let len = header.data_len as usize;
            if rest.len() < len {
                break;
            }
            frames.push(I2cFrame {
                timestamp: header.timestamp.get(),
                address: header.addr_rw >> 1,
                read: header.addr_rw & 1 != 0,
                nack: header.status & 1 != 0,
                data: rest[..len].to_vec(),
            });
            offset += FRAME_HEADER_SIZE + len;
        }

        self.pending.drain(..offset);
        frames
    }
}

/// Parse a complete frame-mode capture
pub fn parse_frames(bytes: &[u8]) -> Vec<I2cFrame> {
    FrameParser::new().push(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_frame() -> I2cFrame {
        I2cFrame::new(1000, 0x50, false, vec![0x10, 0xAA])
    }

    #[test]
    fn test_record_layout() {
        assert_eq!(I2C_SPY_REG_SIZE, 8);
        let r = I2cRecord::new(0x0102_0304, 0xA0, I2cFlags::START | I2cFlags::ADDRESS);
        assert_eq!(r.to_raw().as_bytes(), &[4, 3, 2, 1, 0xA0, 0x09, 0, 0]);
    }

    #[test]
    fn test_raw_events() {
        let records = write_frame().to_records(90);
        let events = parse_raw(&records);
        let kinds: Vec<I2cEventKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                I2cEventKind::Start,
                I2cEventKind::Address { addr: 0x50, read: false },
                I2cEventKind::Ack,
                I2cEventKind::Data(0x10),
                I2cEventKind::Ack,
                I2cEventKind::Data(0xAA),
                I2cEventKind::Ack,
                I2cEventKind::Stop,
            ]
        );
        assert_eq!(events.last().unwrap().timestamp, 1180);
    }

    #[test]
    fn test_transactions_split_on_repeated_start() {
        let records = vec![
            I2cRecord::new(0, 0xA0, I2cFlags::START | I2cFlags::ADDRESS | I2cFlags::ACK),
            I2cRecord::new(1, 0x00, I2cFlags::ACK),
            I2cRecord::new(2, 0xA1, I2cFlags::REPEATED_START | I2cFlags::ADDRESS | I2cFlags::ACK),
            I2cRecord::new(3, 0x42, I2cFlags::STOP),
        ];
        let frames = assemble_transactions(&parse_raw(&records));
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], I2cFrame::new(0, 0x50, false, vec![0x00]));
        assert_eq!(frames[1], I2cFrame::new(2, 0x50, true, vec![0x42]).with_nack(true));
    }

    #[test]
    fn test_frame_parser_keeps_partial_frame() {
        let mut bytes = Vec::new();
        write_frame().encode(&mut bytes);
        I2cFrame::new(2000, 0x20, true, vec![1, 2, 3])
            .with_nack(true)
            .encode(&mut bytes);

        let mut parser = FrameParser::new();
        let split = FRAME_HEADER_SIZE + 2 + 4;
        let first = parser.push(&bytes[..split]);
        assert_eq!(first, vec![write_frame()]);
        assert_eq!(parser.pending(), 4);

        let second = parser.push(&bytes[split..]);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].address, 0x20);
        assert!(second[0].read && second[0].nack);
        assert_eq!(second[0].data, vec![1, 2, 3]);
        assert_eq!(parser.pending(), 0);
    }
}
