//! In-process model of a Kosmos board
//!
//! [`SimulatedFpga`] implements [`Transport`], so the whole runtime (link,
//! device tree, emulators, spies) runs against it unchanged. Replies are
//! produced synchronously when the request frame is written.
//!
//! ```ignore
//! let sim = Arc::new(SimulatedFpga::new().without(msg::KBD_GTECH));
//! let link = Arc::new(FpgaLink::new(sim.clone()));
//! let dt = DeviceTree::discover(link, &KosmosConfig::default())?;
//! ```

pub mod state;

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use kosmos_transport::protocol::{build_reply, parse_request};
use kosmos_transport::{msg, ReplyCode, Transport, TransportError, TransportInfo, TransportType};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::i2c_spy::I2cFrame;
use crate::kbd::{GtechEntry, MatrixEntry};
use crate::pes::PesInstruction;
use crate::rgb_spy::parser::RgbSample;

pub use state::{SimState, SIM_FPGA_REVISION, SIM_KBD_MIN_UPDATE_GAP, SIM_LED_COUNT};

pub struct SimulatedFpga {
    info: TransportInfo,
    state: Mutex<SimState>,
    replies: Mutex<VecDeque<Vec<u8>>>,
    connected: AtomicBool,
}

impl std::fmt::Debug for SimulatedFpga {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SimulatedFpga")
            .field("present", &state.present)
            .field("revision", &state.revision)
            .field("cycle", &state.cycle())
            .finish()
    }
}

impl Default for SimulatedFpga {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedFpga {
    /// Board with every module present
    pub fn new() -> Self {
        let mut info = TransportInfo::new(TransportType::Simulated, "simulator");
        info.board_name = Some("Kosmos simulator".to_string());
        Self {
            info,
            state: Mutex::new(SimState::new()),
            replies: Mutex::new(VecDeque::new()),
            connected: AtomicBool::new(true),
        }
    }

    /// Remove a module; requests to it get an unknown-module reply
    pub fn without(self, msg_id: u8) -> Self {
        self.state.lock().present.remove(&msg_id);
        self
    }

    pub fn with_revision(self, revision: u16) -> Self {
        self.state.lock().revision = revision;
        self
    }

    /// Sequencer START leaves the sequencer running forever
    pub fn with_stall(self, stall: bool) -> Self {
        self.set_stall(stall);
        self
    }

    /// Cycles two KBD UPDATEs must be apart to avoid an underrun
    pub fn with_kbd_min_update_gap(self, cycles: u64) -> Self {
        self.state.lock().set_kbd_min_update_gap(cycles);
        self
    }

    pub fn set_stall(&self, stall: bool) {
        self.state.lock().stall = stall;
    }

    /// Present a transaction on the spied I²C bus
    pub fn inject_i2c(&self, frame: &I2cFrame) {
        self.state.lock().inject_i2c(frame);
    }

    /// Present samples on the spied RGB bus; dropped unless capturing
    pub fn inject_rgb(&self, samples: &[RgbSample]) {
        self.state.lock().inject_rgb(samples);
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    /// Core cycle counter
    pub fn cycle(&self) -> u64 {
        self.state.lock().cycle()
    }

    /// Every PES instruction executed, with the cycle it started on
    pub fn pes_trace(&self) -> Vec<(u64, PesInstruction)> {
        self.state.lock().pes_trace().to_vec()
    }

    /// KBD_MATRIX entries consumed by action events
    pub fn matrix_trace(&self) -> Vec<(u64, MatrixEntry)> {
        self.state.lock().kbd_matrix.executed().to_vec()
    }

    /// KBD_GTECH entries consumed by action events
    pub fn gtech_trace(&self) -> Vec<(u64, GtechEntry)> {
        self.state.lock().kbd_gtech.executed().to_vec()
    }

    pub fn clear_traces(&self) {
        self.state.lock().clear_traces();
    }

    /// Matrix cells the device under test currently sees closed
    pub fn matrix_wire(&self) -> Vec<(u8, u8)> {
        self.state.lock().kbd_matrix.wire().keys().copied().collect()
    }

    /// Chain levels the device under test currently sees, released chains omitted
    pub fn gtech_wire(&self) -> BTreeMap<u8, u8> {
        self.state
            .lock()
            .kbd_gtech
            .wire()
            .iter()
            .map(|(&(chain, _), &level)| (chain, level))
            .collect()
    }

    /// Entries uploaded to a KBD module and not yet consumed
    pub fn kbd_pending(&self, msg_id: u8) -> usize {
        let state = self.state.lock();
        match msg_id {
            msg::KBD_MATRIX => state.kbd_matrix.pending(),
            msg::KBD_GTECH => state.kbd_gtech.pending(),
            _ => 0,
        }
    }

    /// Current value of an optical sensor register
    pub fn optical_register(&self, addr: u8) -> Option<u8> {
        self.state.lock().optical.as_ref()?.register(addr)
    }
}

impl Transport for SimulatedFpga {
    fn send_frame(&self, frame: &[u8]) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        let req = parse_request(frame)?;
        let handled = self.state.lock().dispatch(req.msg_id, req.msg_cmd, &req.payload);
        let reply = match handled {
            Ok(payload) => build_reply(req.msg_id, req.msg_cmd, ReplyCode::Ok, &payload)?,
            Err(code) => {
                debug!(
                    "Simulator: {} {} -> {:?}",
                    msg::name(req.msg_id),
                    req.msg_cmd,
                    code
                );
                build_reply(req.msg_id, req.msg_cmd, code, &[])?
            }
        };
        self.replies.lock().push_back(reply);
        Ok(())
    }

    fn read_frame(&self, _timeout: Duration) -> Result<Vec<u8>, TransportError> {
        self.replies.lock().pop_front().ok_or(TransportError::Timeout)
    }

    fn info(&self) -> &TransportInfo {
        &self.info
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn discard_pending(&self) {
        let mut replies = self.replies.lock();
        if !replies.is_empty() {
            warn!("Simulator: discarding {} stale replies", replies.len());
            replies.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kosmos_transport::{cmd, FpgaLink};
    use std::sync::Arc;

    #[test]
    fn test_status_exchange() {
        let sim = Arc::new(SimulatedFpga::new().with_revision(0x0300));
        let link = FpgaLink::new(sim.clone());
        let payload = link.send_control_message(msg::SEQUENCER, cmd::STATUS, None).unwrap();
        assert_eq!(payload.len(), 16);
        assert_eq!(u16::from_le_bytes([payload[8], payload[9]]), 0x0300);
    }

    #[test]
    fn test_absent_module_reply() {
        let sim = Arc::new(SimulatedFpga::new().without(msg::RGB_SPY));
        let link = FpgaLink::new(sim);
        let err = link.send_control_message(msg::RGB_SPY, cmd::STATUS, None).unwrap_err();
        assert!(matches!(err, TransportError::UnknownModule(_)));
    }

    #[test]
    fn test_closed_link_refuses_frames() {
        let sim = SimulatedFpga::new();
        sim.close().unwrap();
        assert!(!sim.is_connected());
        assert!(sim.send_frame(&[]).is_err());
    }
}
