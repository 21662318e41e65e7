//! Request/reply layer
//!
//! `FpgaLink` wraps a raw `Transport` (which only moves frames) and adds the
//! control-link semantics: one reply per request, echo matching, reply
//! timeout and mapping of error replies.
//!
//! The transport is synchronous and nothing is retried: the caller decides
//! how to recover.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};
use zerocopy::FromBytes;

use crate::error::TransportError;
use crate::protocol::{self, msg, ReplyCode};
use crate::types::{LinkStats, TransportInfo};
use crate::Transport;

/// Default time to wait for a reply frame
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_millis(500);

/// Number of samples kept for the latency average
const LATENCY_WINDOW_SIZE: usize = 32;

struct LatencyTracker {
    samples: VecDeque<u64>,
    window_size: usize,
    exchanges: u64,
    errors: u64,
}

impl LatencyTracker {
    fn new(window_size: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(window_size),
            window_size,
            exchanges: 0,
            errors: 0,
        }
    }

    fn record(&mut self, latency_us: u64) {
        if self.samples.len() >= self.window_size {
            self.samples.pop_front();
        }
        self.samples.push_back(latency_us);
        self.exchanges += 1;
    }

    fn average(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let avg = self.samples.iter().sum::<u64>() / self.samples.len() as u64;
        Duration::from_micros(avg)
    }
}

/// The singleton control link to one Kosmos board.
///
/// Requests are serialized: the exchange lock is held from sending the
/// request until its reply has been read.
pub struct FpgaLink {
    inner: Arc<dyn Transport>,
    reply_timeout: Mutex<Duration>,
    exchange_lock: Mutex<LatencyTracker>,
}

impl FpgaLink {
    /// Create a link over a raw transport
    pub fn new(inner: Arc<dyn Transport>) -> Self {
        Self::with_timeout(inner, DEFAULT_REPLY_TIMEOUT)
    }

    /// Create a link with a custom reply timeout
    pub fn with_timeout(inner: Arc<dyn Transport>, reply_timeout: Duration) -> Self {
        Self {
            inner,
            reply_timeout: Mutex::new(reply_timeout),
            exchange_lock: Mutex::new(LatencyTracker::new(LATENCY_WINDOW_SIZE)),
        }
    }

    /// Access the wrapped raw transport.
    pub fn inner(&self) -> &Arc<dyn Transport> {
        &self.inner
    }

    pub fn info(&self) -> &TransportInfo {
        self.inner.info()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    pub fn reply_timeout(&self) -> Duration {
        *self.reply_timeout.lock()
    }

    pub fn set_reply_timeout(&self, timeout: Duration) {
        *self.reply_timeout.lock() = timeout;
    }

    /// Round-trip statistics
    pub fn stats(&self) -> LinkStats {
        let tracker = self.exchange_lock.lock();
        LinkStats {
            exchanges: tracker.exchanges,
            errors: tracker.errors,
            average_latency: tracker.average(),
        }
    }

    // ========================================================================
    // Exchanges
    // ========================================================================

    /// Send a control command and return the reply payload.
    ///
    /// Control replies carry the module's fixed-size status struct.
    pub fn send_control_message(
        &self,
        msg_id: u8,
        msg_cmd: u8,
        payload: Option<&[u8]>,
    ) -> Result<Vec<u8>, TransportError> {
        self.exchange(msg_id, msg_cmd, payload.unwrap_or(&[]))
    }

    /// Send a data command (entries to upload, or a read request) and
    /// return the reply payload.
    pub fn send_data_message(
        &self,
        msg_id: u8,
        msg_cmd: u8,
        payload: &[u8],
    ) -> Result<Vec<u8>, TransportError> {
        self.exchange(msg_id, msg_cmd, payload)
    }

    /// Send a request and wait for its reply.
    pub fn exchange(
        &self,
        msg_id: u8,
        msg_cmd: u8,
        payload: &[u8],
    ) -> Result<Vec<u8>, TransportError> {
        let frame = protocol::build_request(msg_id, msg_cmd, payload)?;
        let timeout = self.reply_timeout();

        let mut tracker = self.exchange_lock.lock();
        let start = Instant::now();
        let result = self.exchange_locked(&frame, msg_id, msg_cmd, timeout);
        match &result {
            Ok(_) => tracker.record(start.elapsed().as_micros() as u64),
            Err(e) => {
                tracker.errors += 1;
                if e.is_link_failure() {
                    warn!(
                        "{} command 0x{:02X} failed after {:.2}ms: {}",
                        msg::name(msg_id),
                        msg_cmd,
                        start.elapsed().as_secs_f64() * 1000.0,
                        e
                    );
                }
            }
        }
        result
    }

    fn exchange_locked(
        &self,
        frame: &[u8],
        msg_id: u8,
        msg_cmd: u8,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        self.inner.discard_pending();
        self.inner.send_frame(frame)?;

        let raw = self.inner.read_frame(timeout)?;
        let reply = protocol::parse_reply(&raw)?;

        if reply.msg_id != msg_id || reply.msg_cmd != msg_cmd {
            return Err(TransportError::EchoMismatch {
                expected_id: msg_id,
                expected_cmd: msg_cmd,
                actual_id: reply.msg_id,
                actual_cmd: reply.msg_cmd,
            });
        }

        let code = ReplyCode::from_u8(reply.code)
            .ok_or(TransportError::UnexpectedReplyCode(reply.code))?;
        if let Some(err) = TransportError::from_reply(code, msg_id, msg_cmd) {
            debug!(
                "{} command 0x{:02X} answered with {:?}",
                msg::name(msg_id),
                msg_cmd,
                code
            );
            return Err(err);
        }

        Ok(reply.payload)
    }
}

/// Parse a fixed-size struct from the start of a reply payload
pub fn read_struct<T: FromBytes>(payload: &[u8]) -> Result<T, TransportError> {
    T::read_from_prefix(payload)
        .map(|(value, _)| value)
        .map_err(|_| {
            TransportError::MalformedFrame(format!(
                "reply payload of {} bytes is shorter than {} bytes",
                payload.len(),
                std::mem::size_of::<T>()
            ))
        })
}

impl Drop for FpgaLink {
    fn drop(&mut self) {
        let tracker = self.exchange_lock.lock();
        if !tracker.samples.is_empty() {
            debug!(
                "FpgaLink dropping - {} exchanges, avg latency: {:.3}ms",
                tracker.exchanges,
                tracker.average().as_secs_f64() * 1000.0
            );
        }
    }
}
