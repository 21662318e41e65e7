//! Transport error types

use thiserror::Error;

use crate::protocol::ReplyCode;

/// Errors that can occur while exchanging frames with the FPGA
#[derive(Error, Debug)]
pub enum TransportError {
    // Link errors
    #[error("Kosmos board not reachable: {0}")]
    Unreachable(String),

    #[error("Link disconnected")]
    Disconnected,

    #[error("Communication timeout")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Framing errors
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("CRC mismatch: expected 0x{expected:04X}, got 0x{actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },

    #[error(
        "Reply does not match request: expected {expected_id:#04x}/{expected_cmd:#04x}, \
         got {actual_id:#04x}/{actual_cmd:#04x}"
    )]
    EchoMismatch {
        expected_id: u8,
        expected_cmd: u8,
        actual_id: u8,
        actual_cmd: u8,
    },

    // Error replies from the FPGA
    #[error("Underrun: module {msg_id:#04x} holds fewer entries than requested by command {msg_cmd:#04x}")]
    UnderrunPayload { msg_id: u8, msg_cmd: u8 },

    #[error("Overrun: module {msg_id:#04x} cannot accept the payload of command {msg_cmd:#04x}")]
    OverrunPayload { msg_id: u8, msg_cmd: u8 },

    #[error("Unknown module {0:#04x}")]
    UnknownModule(u8),

    #[error("Module {msg_id:#04x} does not implement command {msg_cmd:#04x}")]
    UnknownCommand { msg_id: u8, msg_cmd: u8 },

    #[error("Module {msg_id:#04x} rejected the payload of command {msg_cmd:#04x}")]
    BadPayload { msg_id: u8, msg_cmd: u8 },

    #[error("Unexpected reply code {0:#04x}")]
    UnexpectedReplyCode(u8),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransportError {
    /// Map a non-OK reply code to the matching error.
    pub fn from_reply(code: ReplyCode, msg_id: u8, msg_cmd: u8) -> Option<Self> {
        match code {
            ReplyCode::Ok => None,
            ReplyCode::Underrun => Some(Self::UnderrunPayload { msg_id, msg_cmd }),
            ReplyCode::Overrun => Some(Self::OverrunPayload { msg_id, msg_cmd }),
            ReplyCode::UnknownModule => Some(Self::UnknownModule(msg_id)),
            ReplyCode::UnknownCommand => Some(Self::UnknownCommand { msg_id, msg_cmd }),
            ReplyCode::BadPayload => Some(Self::BadPayload { msg_id, msg_cmd }),
        }
    }

    /// True if the link itself is gone and no further exchange can succeed.
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            Self::Disconnected | Self::Unreachable(_) | Self::Io(_) | Self::Timeout
        )
    }
}
