//! Runtime error types

use std::time::Duration;

use kosmos_keyboard::{KeyId, LayoutError};
use kosmos_transport::TransportError;
use thiserror::Error;

use crate::regmap::RegisterMapError;

/// Every mismatch between a status reply and the local expectations of one
/// module, reported together
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{module}: {} status sanity check(s) failed\n  - {}", .errors.len(), .errors.join("\n  - "))]
pub struct ModuleStatusSanityChecksError {
    pub module: String,
    pub errors: Vec<String>,
}

/// Errors from the Kosmos runtime
#[derive(Error, Debug)]
pub enum KosmosError {
    /// Link, framing or error reply
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    SanityChecks(#[from] ModuleStatusSanityChecksError),

    /// A download asked for more records than the remote buffer holds
    #[error("Underrun: {module} holds fewer than {requested} entries")]
    Underrun { module: String, requested: usize },

    /// The local upload list already holds as many entries as the remote buffer
    #[error("{module} local buffer is full ({capacity} entries)")]
    BufferFull { module: String, capacity: usize },

    #[error("Layout error: {0}")]
    Layout(#[from] LayoutError),

    #[error("Register map error: {0}")]
    RegisterMap(#[from] RegisterMapError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Key {key} is not driven by the {emulator} emulator")]
    KeyNotInLayout { key: KeyId, emulator: &'static str },

    /// An optional module was required but is not present on this board
    #[error("Module not present: {0}")]
    ModuleAbsent(&'static str),

    #[error("{kind} requires {required} device(s), found {found}")]
    DeviceMissing {
        kind: String,
        required: usize,
        found: usize,
    },

    #[error("{0} is already bound to a device tree")]
    AlreadyBound(&'static str),

    #[error("{0} is not bound to a device tree")]
    NotBound(&'static str),

    #[error("Sequence did not complete within {0:?}")]
    PlayTimeout(Duration),

    #[error("A previous sequence timed out; reset_all() is required before the next play")]
    ResetRequired,

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    /// A sanity check failed earlier and has not been cleared
    #[error("Fatal error pending: {0}")]
    Fatal(String),
}

impl KosmosError {
    /// True if the error came from an underrun, either detected locally or
    /// replied by the FPGA
    pub fn is_underrun(&self) -> bool {
        matches!(
            self,
            Self::Underrun { .. } | Self::Transport(TransportError::UnderrunPayload { .. })
        )
    }
}

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, KosmosError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanity_error_lists_every_mismatch() {
        let err = ModuleStatusSanityChecksError {
            module: "KBD_MATRIX".into(),
            errors: vec!["msg id 0x11 != 0x10".into(), "buffer count 600 > 512".into()],
        };
        let text = err.to_string();
        assert!(text.starts_with("KBD_MATRIX: 2 status sanity check(s) failed"));
        assert!(text.contains("\n  - msg id 0x11 != 0x10"));
        assert!(text.contains("\n  - buffer count 600 > 512"));
    }

    #[test]
    fn test_underrun_classification() {
        let local = KosmosError::Underrun {
            module: "I2C_SPY".into(),
            requested: 3,
        };
        let remote = KosmosError::from(TransportError::UnderrunPayload {
            msg_id: 0x20,
            msg_cmd: 0x22,
        });
        assert!(local.is_underrun());
        assert!(remote.is_underrun());
        assert!(!KosmosError::ResetRequired.is_underrun());
    }
}
