//! Transport layer for the Kosmos FPGA test controller
//!
//! This crate moves typed control frames between the host and the FPGA
//! modules of a Kosmos board:
//!
//! - TCP link to the board's control daemon
//! - any in-process model implementing [`Transport`]
//!
//! ```text
//! [TcpTransport / simulator]  ← implements Transport (raw frames)
//!            |
//!   [PrinterTransport]        ← optional frame logging
//!            |
//!        [FpgaLink]           ← request/reply pairing, timeout, error replies
//!            |
//!   [modules / device tree]
//! ```

pub mod error;
pub mod link;
pub mod printer;
pub mod protocol;
pub mod tcp;
pub mod types;

pub use error::TransportError;
pub use link::{read_struct, FpgaLink};
pub use printer::{FrameFilter, PrinterConfig, PrinterTransport};
pub use protocol::{cmd, msg, ReplyCode};
pub use tcp::TcpTransport;
pub use types::{LinkStats, TransportInfo, TransportType};

use std::time::Duration;

/// The raw transport trait - every link backend implements this
///
/// A transport only knows how to move whole frames. Pairing requests with
/// replies, timeouts and error replies are handled by [`FpgaLink`].
pub trait Transport: Send + Sync {
    /// Write one complete request frame
    fn send_frame(&self, frame: &[u8]) -> Result<(), TransportError>;

    /// Read one complete reply frame
    ///
    /// Returns `TransportError::Timeout` if nothing arrives within `timeout`.
    fn read_frame(&self, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Get link information
    fn info(&self) -> &TransportInfo;

    /// Check if the link is still up
    fn is_connected(&self) -> bool;

    /// Close the link
    fn close(&self) -> Result<(), TransportError>;

    /// Drop reply frames that arrived without a pending request
    fn discard_pending(&self) {}
}
