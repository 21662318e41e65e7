//! Dual keymatrix emulator
//!
//! Boards mixing galvanic and optical switches: every key is routed to the
//! emulator that owns it. Multi-key operations stage each side separately
//! and commit both in one `EXECUTE(SEND | SEND)` followed by one
//! `WAIT(READY | READY)`, so the device under test never observes one side
//! without the other.

use std::sync::Arc;

use kosmos_keyboard::{KeyId, KeyboardLayout};

use super::{
    commit, ButtonStimuli, GalvanicKeyMatrixEmulator, GtechKeyMatrixEmulator, KeyChange, MatrixSide,
    ShadowState,
};
use crate::device_tree::DeviceTree;
use crate::error::{KosmosError, Result};
use crate::pes::Pes;
use crate::sequencer::Sequencer;

const NAME: &str = "dual";

/// Emulator owning a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmulatorSide {
    Galvanic,
    Gtech,
}

pub struct DualKeyMatrixEmulator {
    galvanic: GalvanicKeyMatrixEmulator,
    gtech: GtechKeyMatrixEmulator,
    layout: Arc<KeyboardLayout>,
}

impl std::fmt::Debug for DualKeyMatrixEmulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DualKeyMatrixEmulator")
            .field("layout", &self.layout.name)
            .field("galvanic", &self.galvanic)
            .field("gtech", &self.gtech)
            .finish()
    }
}

impl DualKeyMatrixEmulator {
    /// Both KBD modules must be present; the layout must partition every key
    /// between the matrix and the chain
    pub fn new(dt: &DeviceTree, layout: Arc<KeyboardLayout>) -> Result<Self> {
        layout.validate()?;
        Ok(Self {
            galvanic: GalvanicKeyMatrixEmulator::new(dt, layout.clone())?,
            gtech: GtechKeyMatrixEmulator::new(dt, layout.clone())?,
            layout,
        })
    }

    pub fn galvanic(&self) -> &GalvanicKeyMatrixEmulator {
        &self.galvanic
    }

    pub fn gtech(&self) -> &GtechKeyMatrixEmulator {
        &self.gtech
    }

    /// Which emulator drives `key`
    pub fn key_id_2_emu(&self, key: KeyId) -> Result<EmulatorSide> {
        if self.galvanic.owns(key) {
            Ok(EmulatorSide::Galvanic)
        } else if self.gtech.owns(key) {
            Ok(EmulatorSide::Gtech)
        } else {
            Err(KosmosError::KeyNotInLayout { key, emulator: NAME })
        }
    }

    pub fn emulator(&self, side: EmulatorSide) -> &dyn ButtonStimuli {
        match side {
            EmulatorSide::Galvanic => &self.galvanic,
            EmulatorSide::Gtech => &self.gtech,
        }
    }
}

impl ButtonStimuli for DualKeyMatrixEmulator {
    fn name(&self) -> &'static str {
        NAME
    }

    fn layout(&self) -> &KeyboardLayout {
        &self.layout
    }

    fn sequencer(&self) -> &Arc<Sequencer> {
        self.galvanic.sequencer()
    }

    fn pes(&self) -> &Arc<Pes> {
        self.galvanic.pes()
    }

    fn verbose(&self) -> bool {
        self.galvanic.verbose() || self.gtech.verbose()
    }

    fn set_verbose(&self, verbose: bool) {
        self.galvanic.set_verbose(verbose);
        self.gtech.set_verbose(verbose);
    }

    fn owns(&self, key: KeyId) -> bool {
        self.key_id_2_emu(key).is_ok()
    }

    /// Matrix updates first, then chain updates, then one fused commit of
    /// every side involved
    ///
    /// The caller's order is kept among the keys of one module but not across
    /// modules: a chain key listed before a matrix key is still staged after it.
    fn stage_changes(&self, changes: &[KeyChange]) -> Result<()> {
        let mut matrix = Vec::new();
        let mut chain = Vec::new();
        for &(key, pressed) in changes {
            match self.key_id_2_emu(key)? {
                EmulatorSide::Galvanic => matrix.push((key, pressed)),
                EmulatorSide::Gtech => chain.push((key, pressed)),
            }
        }

        let mut sides: Vec<&dyn MatrixSide> = Vec::with_capacity(2);
        if !matrix.is_empty() {
            for &(key, pressed) in &matrix {
                self.galvanic.stage_update(key, pressed)?;
            }
            sides.push(&self.galvanic);
        }
        if !chain.is_empty() {
            for &(key, pressed) in &chain {
                self.gtech.stage_update(key, pressed)?;
            }
            sides.push(&self.gtech);
        }
        commit(self.pes(), &sides, false)
    }

    fn stage_release_all(&self) -> Result<()> {
        let sides: [&dyn MatrixSide; 2] = [&self.galvanic, &self.gtech];
        commit(self.pes(), &sides, true)
    }

    fn shadow(&self) -> ShadowState {
        ShadowState {
            closed: self.galvanic.shadow().closed,
            levels: self.gtech.shadow().levels,
        }
    }

    fn restore_shadow(&self, shadow: ShadowState) {
        let ShadowState { closed, levels } = shadow;
        self.galvanic.restore_shadow(ShadowState {
            closed,
            ..ShadowState::default()
        });
        self.gtech.restore_shadow(ShadowState {
            levels,
            ..ShadowState::default()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KosmosConfig;
    use crate::simulator::SimulatedFpga;
    use kosmos_keyboard::layouts;
    use kosmos_transport::{msg, FpgaLink};

    fn tree(sim: SimulatedFpga) -> Arc<DeviceTree> {
        let link = Arc::new(FpgaLink::new(Arc::new(sim)));
        DeviceTree::discover(link, &KosmosConfig::default()).unwrap()
    }

    #[test]
    fn test_key_id_2_emu() {
        let dt = tree(SimulatedFpga::new());
        let dual = DualKeyMatrixEmulator::new(&dt, Arc::new(layouts::media_dual())).unwrap();
        assert_eq!(dual.key_id_2_emu(KeyId::PLAY_PAUSE).unwrap(), EmulatorSide::Galvanic);
        assert_eq!(dual.key_id_2_emu(KeyId::KEYBOARD_A).unwrap(), EmulatorSide::Gtech);
        assert!(dual.key_id_2_emu(KeyId::KEYBOARD_Z).is_err());
        assert_eq!(dual.emulator(EmulatorSide::Gtech).name(), "gtech");
    }

    #[test]
    fn test_verbose_propagates() {
        let dt = tree(SimulatedFpga::new());
        let dual = DualKeyMatrixEmulator::new(&dt, Arc::new(layouts::media_dual())).unwrap();
        dual.set_verbose(true);
        assert!(dual.galvanic().verbose());
        assert!(dual.gtech().verbose());
        dual.set_verbose(false);
        assert!(!dual.verbose());
    }

    #[test]
    fn test_needs_both_modules() {
        let dt = tree(SimulatedFpga::new().without(msg::KBD_GTECH));
        let err = DualKeyMatrixEmulator::new(&dt, Arc::new(layouts::media_dual())).unwrap_err();
        assert!(matches!(err, KosmosError::ModuleAbsent("KBD_GTECH")));
    }

    #[test]
    fn test_invalid_layout_rejected() {
        let dt = tree(SimulatedFpga::new());
        let layout = layouts::media_dual().with_cell(KeyId::KEYBOARD_Z, 0, 0);
        assert!(matches!(
            DualKeyMatrixEmulator::new(&dt, Arc::new(layout)),
            Err(KosmosError::Layout(_))
        ));
    }
}
