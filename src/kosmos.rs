//! Runtime root
//!
//! [`Kosmos`] owns the configuration and the discovered device tree, and
//! hands out emulators for the modules the board carries.

use std::sync::Arc;

use kosmos_keyboard::{layouts, KeyboardLayout};
use kosmos_transport::{FpgaLink, PrinterConfig, PrinterTransport, TcpTransport, Transport};
use tracing::{info, warn};

use crate::config::KosmosConfig;
use crate::device_tree::DeviceTree;
use crate::emulator::{
    ButtonStimuli, DualKeyMatrixEmulator, GalvanicKeyMatrixEmulator, GtechKeyMatrixEmulator,
    KeyMatrixVariant,
};
use crate::error::{KosmosError, Result};
use crate::simulator::SimulatedFpga;

/// Device kinds a test can ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmulatorKind {
    KeyMatrix,
    GtechKeyMatrix,
    DualKeyMatrix,
    I2cSpy,
    RgbSpy,
    OpticalSensor,
}

impl EmulatorKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::KeyMatrix => "KeyMatrix",
            Self::GtechKeyMatrix => "GtechKeyMatrix",
            Self::DualKeyMatrix => "DualKeyMatrix",
            Self::I2cSpy => "I2cSpy",
            Self::RgbSpy => "RgbSpy",
            Self::OpticalSensor => "OpticalSensor",
        }
    }
}

impl std::fmt::Display for EmulatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

pub struct Kosmos {
    config: KosmosConfig,
    dt: Arc<DeviceTree>,
}

impl std::fmt::Debug for Kosmos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kosmos")
            .field("endpoint", &self.dt.fpga_transport().info().endpoint)
            .field("modules", &self.dt.module_names())
            .finish()
    }
}

impl Kosmos {
    /// Connect to the board at `config.link.address` and discover its modules
    pub fn connect(config: KosmosConfig) -> Result<Self> {
        config.validate()?;
        let tcp = TcpTransport::connect(&config.link.address, config.link.connect_timeout())?;
        Self::with_transport(Arc::new(tcp), config)
    }

    /// Run on an already opened transport
    pub fn with_transport(transport: Arc<dyn Transport>, config: KosmosConfig) -> Result<Self> {
        let transport = if config.link.trace_frames {
            PrinterTransport::wrap(
                transport,
                PrinterConfig::default().with_hex(config.link.show_hex),
            )
        } else {
            transport
        };
        let link = Arc::new(FpgaLink::with_timeout(transport, config.link.reply_timeout()));
        let dt = DeviceTree::discover(link, &config)?;
        info!(
            "Kosmos ready: FPGA revision 0x{:04X}, modules {:?}",
            dt.fpga_revision(),
            dt.module_names()
        );
        Ok(Self { config, dt })
    }

    /// Run on the in-process simulator; the simulator handle is returned
    /// for stimulus injection and inspection
    pub fn simulated(config: KosmosConfig) -> Result<(Self, Arc<SimulatedFpga>)> {
        Self::simulated_with(SimulatedFpga::new(), config)
    }

    pub fn simulated_with(sim: SimulatedFpga, config: KosmosConfig) -> Result<(Self, Arc<SimulatedFpga>)> {
        let sim = Arc::new(sim);
        let kosmos = Self::with_transport(sim.clone(), config)?;
        Ok((kosmos, sim))
    }

    pub fn dt(&self) -> &Arc<DeviceTree> {
        &self.dt
    }

    pub fn config(&self) -> &KosmosConfig {
        &self.config
    }

    /// Layout from `layout_file` if set, the named built-in otherwise
    pub fn layout(&self) -> Result<KeyboardLayout> {
        let layout = match &self.config.layout_file {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .map_err(|e| KosmosError::Config(format!("read {}: {e}", path.display())))?;
                KeyboardLayout::from_toml_str(&content)?
            }
            None => layouts::builtin(&self.config.layout)?,
        };
        layout.validate()?;
        Ok(layout)
    }

    // ------------------------------------------------------------------------
    // Device discovery
    // ------------------------------------------------------------------------

    fn device_count(&self, kind: EmulatorKind) -> usize {
        let dt = &self.dt;
        let present = match kind {
            EmulatorKind::KeyMatrix => dt.kbd_matrix().is_some(),
            EmulatorKind::GtechKeyMatrix => dt.kbd_gtech().is_some(),
            EmulatorKind::DualKeyMatrix => dt.kbd_matrix().is_some() && dt.kbd_gtech().is_some(),
            EmulatorKind::I2cSpy => dt.i2c_spy().is_some(),
            EmulatorKind::RgbSpy => dt.rgb_spy().is_some(),
            EmulatorKind::OpticalSensor => dt.optical_sensor().is_some(),
        };
        present as usize
    }

    /// Number of `kind` devices, or `None` if fewer than `min_count`
    pub fn discover_emulator(&self, kind: EmulatorKind, min_count: usize) -> Option<usize> {
        let found = self.device_count(kind);
        (found >= min_count).then_some(found)
    }

    /// Like [`discover_emulator`](Self::discover_emulator), failing with
    /// [`KosmosError::DeviceMissing`] so the harness can skip the test
    pub fn require_device(&self, kind: EmulatorKind, min_count: usize) -> Result<usize> {
        self.discover_emulator(kind, min_count).ok_or_else(|| {
            let found = self.device_count(kind);
            warn!("{} requires {} device(s), found {}", kind, min_count, found);
            KosmosError::DeviceMissing {
                kind: kind.to_string(),
                required: min_count,
                found,
            }
        })
    }

    // ------------------------------------------------------------------------
    // Emulators
    // ------------------------------------------------------------------------

    pub fn galvanic_emulator(&self) -> Result<GalvanicKeyMatrixEmulator> {
        let emu = GalvanicKeyMatrixEmulator::new(&self.dt, Arc::new(self.layout()?))?;
        emu.set_verbose(self.config.verbose);
        Ok(emu)
    }

    pub fn gtech_emulator(&self) -> Result<GtechKeyMatrixEmulator> {
        let emu = GtechKeyMatrixEmulator::new(&self.dt, Arc::new(self.layout()?))?;
        emu.set_verbose(self.config.verbose);
        Ok(emu)
    }

    pub fn dual_emulator(&self) -> Result<DualKeyMatrixEmulator> {
        let emu = DualKeyMatrixEmulator::new(&self.dt, Arc::new(self.layout()?))?;
        emu.set_verbose(self.config.verbose);
        Ok(emu)
    }

    /// Emulator matching the board: dual when both KBD modules are present,
    /// otherwise whichever one is
    pub fn key_matrix(&self) -> Result<KeyMatrixVariant> {
        let layout = Arc::new(self.layout()?);
        let variant = match (self.dt.kbd_matrix().is_some(), self.dt.kbd_gtech().is_some()) {
            (true, true) => KeyMatrixVariant::Dual(DualKeyMatrixEmulator::new(&self.dt, layout)?),
            (true, false) => KeyMatrixVariant::Galvanic(GalvanicKeyMatrixEmulator::new(&self.dt, layout)?),
            (false, true) => KeyMatrixVariant::Gtech(GtechKeyMatrixEmulator::new(&self.dt, layout)?),
            (false, false) => {
                return Err(KosmosError::DeviceMissing {
                    kind: EmulatorKind::KeyMatrix.to_string(),
                    required: 1,
                    found: 0,
                })
            }
        };
        variant.set_verbose(self.config.verbose);
        Ok(variant)
    }

    // ------------------------------------------------------------------------
    // Board-wide operations
    // ------------------------------------------------------------------------

    pub fn check_fatal(&self) -> Result<()> {
        self.dt.check_fatal()
    }

    /// Clear a recorded fatal error, returning its message
    pub fn clear_fatal(&self) -> Option<String> {
        let cleared = self.dt.fatal().clear();
        if let Some(msg) = &cleared {
            info!("Cleared fatal error: {}", msg);
        }
        cleared
    }

    pub fn reset_all(&self) -> Result<()> {
        self.dt.reset_all()
    }
}
