//! Module framework
//!
//! Every FPGA block is driven through a [`ModuleCore`]: its frozen settings,
//! the shared link, the late-bound device tree and the reset callbacks.
//! Concrete modules wrap a core and implement [`Module`]; modules with a
//! host-side instruction list also implement [`UploadModule`].

pub mod download;
pub mod settings;
pub mod status;
pub mod upload;

pub use download::DownloadModule;
pub use settings::{ModuleCommands, ModuleSettings};
pub use status::{CommonStatus, ModuleStatus};
pub use upload::{UploadBuffer, UploadEntry};

use std::sync::{Arc, OnceLock, Weak};

use kosmos_transport::FpgaLink;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::device_tree::DeviceTree;
use crate::error::{KosmosError, ModuleStatusSanityChecksError, Result};
use crate::fatal::KosmosFatalError;

/// Callback fired after a module reset
///
/// The module only keeps a weak reference: a callback lives as long as its
/// owner holds the `Arc`.
pub type ResetCallback = Arc<dyn Fn() + Send + Sync>;

type WeakResetCallback = Weak<dyn Fn() + Send + Sync>;

/// State shared by every module implementation
pub struct ModuleCore {
    settings: ModuleSettings,
    link: Arc<FpgaLink>,
    fatal: Arc<KosmosFatalError>,
    dt: OnceLock<Weak<DeviceTree>>,
    reset_callbacks: Mutex<Vec<WeakResetCallback>>,
}

impl std::fmt::Debug for ModuleCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCore")
            .field("settings", &self.settings)
            .field("bound", &self.is_bound())
            .finish()
    }
}

impl ModuleCore {
    pub fn new(settings: ModuleSettings, link: Arc<FpgaLink>, fatal: Arc<KosmosFatalError>) -> Self {
        Self {
            settings,
            link,
            fatal,
            dt: OnceLock::new(),
            reset_callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn settings(&self) -> &ModuleSettings {
        &self.settings
    }

    pub fn name(&self) -> &'static str {
        self.settings.name
    }

    pub fn link(&self) -> &Arc<FpgaLink> {
        &self.link
    }

    // ------------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------------

    pub fn send_control(&self, msg_cmd: u8, payload: Option<&[u8]>) -> Result<Vec<u8>> {
        Ok(self
            .link
            .send_control_message(self.settings.msg_id, msg_cmd, payload)?)
    }

    pub fn send_data(&self, msg_cmd: u8, payload: &[u8]) -> Result<Vec<u8>> {
        Ok(self
            .link
            .send_data_message(self.settings.msg_id, msg_cmd, payload)?)
    }

    /// Send a control command whose reply is the module status
    pub fn status_command<S: ModuleStatus>(
        &self,
        msg_cmd: u8,
        payload: Option<&[u8]>,
        sanity_checks: bool,
    ) -> Result<S> {
        let reply = self.send_control(msg_cmd, payload)?;
        let status = S::parse(&reply)?;
        self.check(status::status_reply_errors(&status, &self.settings), sanity_checks)?;
        Ok(status)
    }

    /// Issue STATUS and validate the reply
    pub fn status<S: ModuleStatus>(&self, sanity_checks: bool) -> Result<S> {
        self.status_command(self.settings.cmds.status, None, sanity_checks)
    }

    /// Issue RESET and validate the reply; callbacks are fired separately by
    /// [`ModuleCore::fire_reset_callbacks`] once host state is cleared
    pub fn reset<S: ModuleStatus>(&self, sanity_checks: bool) -> Result<S> {
        let reply = self.send_control(self.settings.cmds.reset, None)?;
        let status = S::parse(&reply)?;
        self.check(status::reset_reply_errors(&status, &self.settings), sanity_checks)?;
        debug!("{}: reset", self.name());
        Ok(status)
    }

    /// Turn a list of sanity-check failures into an error, or a warning when
    /// checks are disabled
    pub fn check(&self, errors: Vec<String>, sanity_checks: bool) -> Result<()> {
        if errors.is_empty() {
            return Ok(());
        }
        let err = ModuleStatusSanityChecksError {
            module: self.name().to_string(),
            errors,
        };
        if sanity_checks {
            self.fatal.record(&err);
            Err(err.into())
        } else {
            warn!("{} (sanity checks disabled)", err);
            Ok(())
        }
    }

    // ------------------------------------------------------------------------
    // Reset callbacks
    // ------------------------------------------------------------------------

    /// Register a callback; registering the same `Arc` twice is a no-op.
    /// Callbacks whose owner is gone are pruned on the way.
    pub fn register_reset_callback(&self, callback: &ResetCallback) {
        let weak = Arc::downgrade(callback);
        let mut callbacks = self.reset_callbacks.lock();
        callbacks.retain(|c| c.strong_count() > 0);
        if !callbacks.iter().any(|c| Weak::ptr_eq(c, &weak)) {
            callbacks.push(weak);
        }
    }

    /// Live callbacks
    pub fn reset_callback_count(&self) -> usize {
        let mut callbacks = self.reset_callbacks.lock();
        callbacks.retain(|c| c.strong_count() > 0);
        callbacks.len()
    }

    pub fn fire_reset_callbacks(&self) {
        let live: Vec<ResetCallback> = {
            let mut callbacks = self.reset_callbacks.lock();
            callbacks.retain(|c| c.strong_count() > 0);
            callbacks.iter().filter_map(Weak::upgrade).collect()
        };
        for callback in live {
            callback();
        }
    }

    // ------------------------------------------------------------------------
    // Device tree binding
    // ------------------------------------------------------------------------

    pub fn bind(&self, dt: &Arc<DeviceTree>) -> Result<()> {
        self.dt
            .set(Arc::downgrade(dt))
            .map_err(|_| KosmosError::AlreadyBound(self.name()))
    }

    pub fn is_bound(&self) -> bool {
        self.dt.get().is_some()
    }

    /// The parent device tree
    pub fn dt(&self) -> Result<Arc<DeviceTree>> {
        self.dt
            .get()
            .and_then(Weak::upgrade)
            .ok_or(KosmosError::NotBound(self.name()))
    }
}

/// Contract shared by every module
pub trait Module: Send + Sync {
    fn core(&self) -> &ModuleCore;

    fn name(&self) -> &'static str {
        self.core().name()
    }

    fn instance_id(&self) -> u8 {
        self.core().settings().instance_id
    }

    fn msg_id(&self) -> u8 {
        self.core().settings().msg_id
    }

    /// Whether the device tree tolerates the module's absence
    fn optional(&self) -> bool {
        self.core().settings().optional
    }

    /// Common part of the module status
    fn status_common(&self, sanity_checks: bool) -> Result<CommonStatus>;

    /// Restore host and FPGA state to power-on defaults, then fire the reset
    /// callbacks
    fn reset_module(&self, sanity_checks: bool) -> Result<()>;

    fn register_reset_callback(&self, callback: &ResetCallback) {
        self.core().register_reset_callback(callback);
    }

    /// Bind the parent tree; must happen exactly once
    fn init_device_tree(&self, dt: &Arc<DeviceTree>) -> Result<()> {
        self.core().bind(dt)
    }
}

/// A module fed from a host-side list
pub trait UploadModule: Module {
    /// Entries waiting in the local list
    fn pending(&self) -> usize;

    /// Flush the local list to the FPGA
    fn send(&self) -> Result<usize>;

    fn clear(&self);

    /// Keep only the first `len` pending entries
    fn truncate(&self, len: usize);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::SimulatedFpga;
    use kosmos_transport::msg;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SETTINGS: ModuleSettings = ModuleSettings::new("KBD_MATRIX", msg::KBD_MATRIX)
        .with_buffer(512)
        .with_fifo(16);

    fn core() -> ModuleCore {
        let sim = Arc::new(SimulatedFpga::new());
        let link = Arc::new(FpgaLink::new(sim));
        ModuleCore::new(SETTINGS, link, Arc::new(KosmosFatalError::new()))
    }

    #[test]
    fn test_status_and_reset() {
        let core = core();
        let status: CommonStatus = core.status(true).unwrap();
        assert_eq!(status.msg_id, msg::KBD_MATRIX);
        let status: CommonStatus = core.reset(true).unwrap();
        assert_eq!(status.buffer_count, 0);
        assert_eq!(status.fifo_count, 0);
    }

    #[test]
    fn test_callbacks_are_idempotent_and_ordered() {
        let core = core();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let first: ResetCallback = Arc::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        core.register_reset_callback(&first);
        core.register_reset_callback(&first.clone());
        assert_eq!(core.reset_callback_count(), 1);

        core.fire_reset_callbacks();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_callbacks_are_pruned() {
        let core = core();
        let hits = Arc::new(AtomicUsize::new(0));
        let kept: ResetCallback = {
            let h = hits.clone();
            Arc::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            })
        };
        core.register_reset_callback(&kept);
        for _ in 0..100 {
            let h = hits.clone();
            let transient: ResetCallback = Arc::new(move || {
                h.fetch_add(100, Ordering::SeqCst);
            });
            core.register_reset_callback(&transient);
        }
        assert_eq!(core.reset_callback_count(), 1);

        core.fire_reset_callbacks();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        drop(kept);
        assert_eq!(core.reset_callback_count(), 0);
        core.fire_reset_callbacks();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sanity_failure_is_recorded() {
        let sim = Arc::new(SimulatedFpga::new());
        let link = Arc::new(FpgaLink::new(sim));
        let fatal = Arc::new(KosmosFatalError::new());
        // Local msg id disagrees with the module that answers
        let wrong = ModuleSettings::new("WRONG", msg::KBD_MATRIX);
        let wrong = ModuleSettings {
            instance_id: 3,
            ..wrong
        };
        let core = ModuleCore::new(wrong, link, fatal.clone());

        let err = core.status::<CommonStatus>(true).unwrap_err();
        assert!(matches!(err, KosmosError::SanityChecks(_)));
        assert!(fatal.is_set());

        fatal.clear();
        assert!(core.status::<CommonStatus>(false).is_ok());
        assert!(!fatal.is_set());
    }

    #[test]
    fn test_unbound_core() {
        let core = core();
        assert!(!core.is_bound());
        assert!(matches!(core.dt(), Err(KosmosError::NotBound("KBD_MATRIX"))));
    }
}
