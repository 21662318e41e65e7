//! Device tree
//!
//! One registry per board. Discovery probes every known module slot with a
//! STATUS request: a module answering `UNKNOWN_MODULE` is absent, which is
//! only acceptable for optional slots. The tree owns every module; modules
//! hold a weak back-reference bound once right after discovery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kosmos_transport::{FpgaLink, TransportError};
use tracing::{debug, info, warn};

use crate::config::KosmosConfig;
use crate::error::{KosmosError, Result};
use crate::fatal::KosmosFatalError;
use crate::i2c_spy::I2cSpy;
use crate::kbd::{KbdGtech, KbdMatrix};
use crate::module::{Module, ModuleCore, UploadModule};
use crate::optical_sensor::OpticalSensor;
use crate::pes::{Pes, PesCpu};
use crate::rgb_spy::RgbSpy;
use crate::sequencer::Sequencer;

pub struct DeviceTree {
    link: Arc<FpgaLink>,
    fatal: Arc<KosmosFatalError>,
    sequencer: Arc<Sequencer>,
    pes: Arc<Pes>,
    pes_cpu: Arc<PesCpu>,
    kbd_matrix: Option<Arc<KbdMatrix>>,
    kbd_gtech: Option<Arc<KbdGtech>>,
    i2c_spy: Option<Arc<I2cSpy>>,
    rgb_spy: Option<Arc<RgbSpy>>,
    optical_sensor: Option<Arc<OpticalSensor>>,
    fpga_revision: u16,
    kbd_update_delay: Duration,
    reset_required: AtomicBool,
}

impl std::fmt::Debug for DeviceTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceTree")
            .field("fpga_revision", &self.fpga_revision)
            .field("modules", &self.module_names())
            .finish()
    }
}

/// Probe a slot: `Ok(false)` if the FPGA does not know the module
fn probe(core: &ModuleCore) -> Result<bool> {
    match core.send_control(core.settings().cmds.status, None) {
        Ok(_) => Ok(true),
        Err(KosmosError::Transport(TransportError::UnknownModule(_))) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Keep a probed module, drop it if absent and optional
fn present<M: Module>(module: M) -> Result<Option<Arc<M>>> {
    if probe(module.core())? {
        debug!("Found {}", module.name());
        return Ok(Some(Arc::new(module)));
    }
    if module.optional() {
        debug!("{} not present", module.name());
        Ok(None)
    } else {
        Err(KosmosError::ModuleAbsent(module.name()))
    }
}

fn required<M: Module>(module: M) -> Result<Arc<M>> {
    let name = module.name();
    present(module)?.ok_or(KosmosError::ModuleAbsent(name))
}

impl DeviceTree {
    /// Enumerate the modules of the board behind `link`
    pub fn discover(link: Arc<FpgaLink>, config: &KosmosConfig) -> Result<Arc<Self>> {
        let fatal = Arc::new(KosmosFatalError::new());
        let sequencer = required(Sequencer::new(
            link.clone(),
            fatal.clone(),
            config.link.poll_interval(),
        ))?;
        let fpga_revision = sequencer.status(false)?.fpga_revision;
        let pes = required(Pes::new(link.clone(), fatal.clone(), config.core_clock_hz))?;
        let pes_cpu = required(PesCpu::new(link.clone(), fatal.clone()))?;
        let kbd_matrix = present(KbdMatrix::new(link.clone(), fatal.clone()))?;
        let kbd_gtech = present(KbdGtech::new(link.clone(), fatal.clone()))?;
        let i2c_spy = present(I2cSpy::new(link.clone(), fatal.clone()))?;
        let rgb_spy = present(RgbSpy::new(link.clone(), fatal.clone()))?;
        let optical_sensor = present(OpticalSensor::new(link.clone(), fatal.clone())?)?;

        let kbd_update_delay = config.pacing.kbd_update_delay(fpga_revision);

        let dt = Arc::new(Self {
            link,
            fatal,
            sequencer,
            pes,
            pes_cpu,
            kbd_matrix,
            kbd_gtech,
            i2c_spy,
            rgb_spy,
            optical_sensor,
            fpga_revision,
            kbd_update_delay,
            reset_required: AtomicBool::new(false),
        });

        for module in dt.modules() {
            module.init_device_tree(&dt)?;
        }

        info!(
            "Kosmos FPGA rev 0x{:04X}: {}",
            fpga_revision,
            dt.module_names().join(", ")
        );
        Ok(dt)
    }

    // ========================================================================
    // Handles
    // ========================================================================

    pub fn fpga_transport(&self) -> &Arc<FpgaLink> {
        &self.link
    }

    pub fn sequencer(&self) -> &Arc<Sequencer> {
        &self.sequencer
    }

    pub fn pes(&self) -> &Arc<Pes> {
        &self.pes
    }

    pub fn pes_cpu(&self) -> &Arc<PesCpu> {
        &self.pes_cpu
    }

    pub fn kbd_matrix(&self) -> Option<&Arc<KbdMatrix>> {
        self.kbd_matrix.as_ref()
    }

    pub fn kbd_gtech(&self) -> Option<&Arc<KbdGtech>> {
        self.kbd_gtech.as_ref()
    }

    pub fn i2c_spy(&self) -> Option<&Arc<I2cSpy>> {
        self.i2c_spy.as_ref()
    }

    pub fn rgb_spy(&self) -> Option<&Arc<RgbSpy>> {
        self.rgb_spy.as_ref()
    }

    pub fn optical_sensor(&self) -> Option<&Arc<OpticalSensor>> {
        self.optical_sensor.as_ref()
    }

    pub fn require_kbd_matrix(&self) -> Result<&Arc<KbdMatrix>> {
        self.kbd_matrix().ok_or(KosmosError::ModuleAbsent("KBD_MATRIX"))
    }

    pub fn require_kbd_gtech(&self) -> Result<&Arc<KbdGtech>> {
        self.kbd_gtech().ok_or(KosmosError::ModuleAbsent("KBD_GTECH"))
    }

    pub fn require_i2c_spy(&self) -> Result<&Arc<I2cSpy>> {
        self.i2c_spy().ok_or(KosmosError::ModuleAbsent("I2C_SPY"))
    }

    pub fn require_rgb_spy(&self) -> Result<&Arc<RgbSpy>> {
        self.rgb_spy().ok_or(KosmosError::ModuleAbsent("RGB_SPY"))
    }

    pub fn require_optical_sensor(&self) -> Result<&Arc<OpticalSensor>> {
        self.optical_sensor()
            .ok_or(KosmosError::ModuleAbsent("OPTICAL_SENSOR"))
    }

    /// Every present module, leaves first and the sequencer last
    pub fn modules(&self) -> Vec<Arc<dyn Module>> {
        let mut modules: Vec<Arc<dyn Module>> = Vec::new();
        if let Some(m) = &self.optical_sensor {
            modules.push(m.clone());
        }
        if let Some(m) = &self.rgb_spy {
            modules.push(m.clone());
        }
        if let Some(m) = &self.i2c_spy {
            modules.push(m.clone());
        }
        if let Some(m) = &self.kbd_gtech {
            modules.push(m.clone());
        }
        if let Some(m) = &self.kbd_matrix {
            modules.push(m.clone());
        }
        modules.push(self.pes.clone());
        modules.push(self.pes_cpu.clone());
        modules.push(self.sequencer.clone());
        modules
    }

    pub fn module_names(&self) -> Vec<&'static str> {
        self.modules().iter().map(|m| m.name()).collect()
    }

    /// Upload modules other than the PES, in upload order
    pub fn upload_modules(&self) -> Vec<Arc<dyn UploadModule>> {
        let mut modules: Vec<Arc<dyn UploadModule>> = Vec::new();
        if let Some(m) = &self.kbd_matrix {
            modules.push(m.clone());
        }
        if let Some(m) = &self.kbd_gtech {
            modules.push(m.clone());
        }
        modules
    }

    /// Reset every present module in dependency order
    pub fn reset_all(&self) -> Result<()> {
        for module in self.modules() {
            module.reset_module(true)?;
        }
        self.reset_required.store(false, Ordering::SeqCst);
        debug!("All modules reset");
        Ok(())
    }

    // ========================================================================
    // Board state
    // ========================================================================

    pub fn fpga_revision(&self) -> u16 {
        self.fpga_revision
    }

    pub fn core_clock_hz(&self) -> u64 {
        self.pes.core_clock_hz()
    }

    /// Pacing delay inserted after every KBD UPDATE on this board
    pub fn kbd_update_delay(&self) -> Duration {
        self.kbd_update_delay
    }

    pub fn fatal(&self) -> &Arc<KosmosFatalError> {
        &self.fatal
    }

    pub fn check_fatal(&self) -> Result<()> {
        self.fatal.check()
    }

    /// A play timed out and `reset_all` has not run since
    pub fn reset_required(&self) -> bool {
        self.reset_required.load(Ordering::SeqCst)
    }

    pub fn flag_reset_required(&self) {
        if !self.reset_required.swap(true, Ordering::SeqCst) {
            warn!("Device tree flagged: reset_all() required before the next play");
        }
    }
}
