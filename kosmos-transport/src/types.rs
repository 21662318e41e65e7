//! Common types for the transport layer

use std::time::Duration;

/// Transport type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    /// TCP connection to the board's control daemon
    Tcp,
    /// In-process model of the board
    Simulated,
}

impl TransportType {
    /// Check if this transport talks to real hardware
    pub fn is_hardware(&self) -> bool {
        matches!(self, Self::Tcp)
    }
}

/// Link identification information
#[derive(Debug, Clone)]
pub struct TransportInfo {
    /// Transport type
    pub transport_type: TransportType,
    /// Peer address or identifier (transport-specific)
    pub endpoint: String,
    /// Board name if known
    pub board_name: Option<String>,
}

impl TransportInfo {
    pub fn new(transport_type: TransportType, endpoint: impl Into<String>) -> Self {
        Self {
            transport_type,
            endpoint: endpoint.into(),
            board_name: None,
        }
    }
}

/// Round-trip statistics kept by [`crate::FpgaLink`]
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkStats {
    /// Number of completed request/reply exchanges
    pub exchanges: u64,
    /// Number of exchanges that ended in an error
    pub errors: u64,
    /// Average round trip over the recent window
    pub average_latency: Duration,
}
