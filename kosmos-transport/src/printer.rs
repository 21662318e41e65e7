//! PrinterTransport middleware for tracing link traffic
//!
//! Wraps any Transport implementation and logs every frame passing through
//! it with decoded module and command names.
//!
//! # Example
//!
//! ```ignore
//! use kosmos_transport::{PrinterConfig, PrinterTransport, TcpTransport};
//!
//! let transport = TcpTransport::connect("10.0.0.2:7000", timeout)?;
//! let monitored = PrinterTransport::wrap(Arc::new(transport), PrinterConfig::default());
//! ```

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::protocol::{self, cmd, msg};
use crate::{Transport, TransportError, TransportInfo};

/// Frame filter for selective display
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FrameFilter {
    #[default]
    All,
    /// Only frames addressed to one module
    Module(u8),
}

impl FromStr for FrameFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" | "" => Ok(Self::All),
            s => {
                let hex_str = s.strip_prefix("msg=").unwrap_or(s);
                let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
                u8::from_str_radix(hex_str, 16)
                    .map(Self::Module)
                    .map_err(|e| format!("Invalid module id: {}", e))
            }
        }
    }
}

/// Configuration for the PrinterTransport
#[derive(Debug, Clone, Default)]
pub struct PrinterConfig {
    /// Show raw hex dump alongside decoded output
    pub show_hex: bool,
    /// Filter for selective display
    pub filter: FrameFilter,
}

impl PrinterConfig {
    pub fn with_hex(mut self, show: bool) -> Self {
        self.show_hex = show;
        self
    }

    pub fn with_filter(mut self, filter: FrameFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// Transport middleware that logs all requests and replies
pub struct PrinterTransport {
    inner: Arc<dyn Transport>,
    config: PrinterConfig,
}

impl PrinterTransport {
    /// Wrap a transport with logging middleware
    pub fn wrap(transport: Arc<dyn Transport>, config: PrinterConfig) -> Arc<dyn Transport> {
        Arc::new(Self {
            inner: transport,
            config,
        })
    }

    fn should_show(&self, msg_id: u8) -> bool {
        match self.config.filter {
            FrameFilter::All => true,
            FrameFilter::Module(id) => id == msg_id,
        }
    }

    fn print_request(&self, frame: &[u8]) {
        match protocol::parse_request(frame) {
            Ok(req) => {
                if !self.should_show(req.msg_id) {
                    return;
                }
                info!(
                    ">>> {} {} (0x{:02X}) {} bytes",
                    msg::name(req.msg_id),
                    cmd::name(req.msg_cmd),
                    req.msg_cmd,
                    req.payload.len()
                );
            }
            Err(e) => info!(">>> undecodable request: {}", e),
        }
        if self.config.show_hex {
            info!("    HEX {}", protocol::hex(frame));
        }
    }

    fn print_reply(&self, frame: &[u8]) {
        match protocol::parse_reply(frame) {
            Ok(reply) => {
                if !self.should_show(reply.msg_id) {
                    return;
                }
                let code = protocol::ReplyCode::from_u8(reply.code)
                    .map(|c| format!("{c:?}"))
                    .unwrap_or_else(|| format!("code 0x{:02X}", reply.code));
                info!(
                    "<<< {} {} (0x{:02X}) {} {} bytes",
                    msg::name(reply.msg_id),
                    cmd::name(reply.msg_cmd),
                    reply.msg_cmd,
                    code,
                    reply.payload.len()
                );
            }
            Err(e) => info!("<<< undecodable reply: {}", e),
        }
        if self.config.show_hex {
            info!("    HEX {}", protocol::hex(frame));
        }
    }
}

impl Transport for PrinterTransport {
    fn send_frame(&self, frame: &[u8]) -> Result<(), TransportError> {
        self.print_request(frame);
        self.inner.send_frame(frame)
    }

    fn read_frame(&self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let result = self.inner.read_frame(timeout);
        match &result {
            Ok(frame) => self.print_reply(frame),
            Err(e) => info!("<<< ERR {}", e),
        }
        result
    }

    fn info(&self) -> &TransportInfo {
        self.inner.info()
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn close(&self) -> Result<(), TransportError> {
        self.inner.close()
    }

    fn discard_pending(&self) {
        self.inner.discard_pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_parsing() {
        assert_eq!(FrameFilter::from_str("all").unwrap(), FrameFilter::All);
        assert_eq!(
            FrameFilter::from_str("0x20").unwrap(),
            FrameFilter::Module(msg::I2C_SPY)
        );
        assert_eq!(
            FrameFilter::from_str("msg=11").unwrap(),
            FrameFilter::Module(msg::KBD_GTECH)
        );
        assert!(FrameFilter::from_str("bogus").is_err());
    }
}
