//! Galvanic keymatrix emulator: one analog switch per row/column cell

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kosmos_keyboard::{KeyId, KeyboardLayout};
use parking_lot::Mutex;
use tracing::debug;

use super::{commit, stage_entry, ButtonStimuli, KeyChange, MatrixSide, ShadowState};
use crate::device_tree::DeviceTree;
use crate::error::{KosmosError, Result};
use crate::kbd::{KbdEntry, KbdMatrix, MatrixEntry};
use crate::module::{Module, ResetCallback};
use crate::pes::{Pes, PesActionEvent, PesResumeEvent};
use crate::sequencer::Sequencer;

const NAME: &str = "galvanic";

pub struct GalvanicKeyMatrixEmulator {
    module: Arc<KbdMatrix>,
    sequencer: Arc<Sequencer>,
    pes: Arc<Pes>,
    layout: Arc<KeyboardLayout>,
    update_delay: Duration,
    verbose: AtomicBool,
    /// Cells closed by the staged entries
    closed: Arc<Mutex<BTreeSet<(u8, u8)>>>,
    /// Registered on the module, which holds it weakly
    _on_reset: ResetCallback,
}

impl std::fmt::Debug for GalvanicKeyMatrixEmulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GalvanicKeyMatrixEmulator")
            .field("layout", &self.layout.name)
            .field("closed", &*self.closed.lock())
            .finish()
    }
}

impl GalvanicKeyMatrixEmulator {
    pub fn new(dt: &DeviceTree, layout: Arc<KeyboardLayout>) -> Result<Self> {
        layout.validate()?;
        let module = dt.require_kbd_matrix()?.clone();

        let closed = Arc::new(Mutex::new(BTreeSet::new()));
        let shadow = closed.clone();
        let on_reset: ResetCallback = Arc::new(move || shadow.lock().clear());
        module.register_reset_callback(&on_reset);

        Ok(Self {
            module,
            sequencer: dt.sequencer().clone(),
            pes: dt.pes().clone(),
            layout,
            update_delay: dt.kbd_update_delay(),
            verbose: AtomicBool::new(false),
            closed,
            _on_reset: on_reset,
        })
    }

    pub fn module(&self) -> &Arc<KbdMatrix> {
        &self.module
    }

    pub fn closed_cells(&self) -> Vec<(u8, u8)> {
        self.closed.lock().iter().copied().collect()
    }

    pub fn is_pressed(&self, key: KeyId) -> bool {
        self.layout
            .position(key)
            .is_some_and(|cell| self.closed.lock().contains(&cell))
    }
}

impl MatrixSide for GalvanicKeyMatrixEmulator {
    fn stage_update(&self, key: KeyId, pressed: bool) -> Result<()> {
        let (col, row) = self.layout.position(key).ok_or(KosmosError::KeyNotInLayout {
            key,
            emulator: NAME,
        })?;
        debug!("KBD_MATRIX UPDATE {} ({},{}) closed={}", key, col, row, pressed);
        self.module.append(MatrixEntry::update(col, row, pressed))?;
        {
            let mut closed = self.closed.lock();
            if pressed {
                closed.insert((col, row));
            } else {
                closed.remove(&(col, row));
            }
        }
        stage_entry(&self.pes, self.send_event(), self.ready_event(), self.update_delay)
    }

    fn queue_send(&self) -> Result<()> {
        self.module.append(MatrixEntry::send())
    }

    fn queue_reset(&self) -> Result<()> {
        self.closed.lock().clear();
        self.module.append(MatrixEntry::reset())
    }

    fn send_event(&self) -> PesActionEvent {
        self.module.send_event()
    }

    fn ready_event(&self) -> PesResumeEvent {
        self.module.ready_event()
    }
}

impl ButtonStimuli for GalvanicKeyMatrixEmulator {
    fn name(&self) -> &'static str {
        NAME
    }

    fn layout(&self) -> &KeyboardLayout {
        &self.layout
    }

    fn sequencer(&self) -> &Arc<Sequencer> {
        &self.sequencer
    }

    fn pes(&self) -> &Arc<Pes> {
        &self.pes
    }

    fn verbose(&self) -> bool {
        self.verbose.load(Ordering::Relaxed)
    }

    fn set_verbose(&self, verbose: bool) {
        self.verbose.store(verbose, Ordering::Relaxed);
    }

    fn owns(&self, key: KeyId) -> bool {
        self.layout.is_galvanic(key)
    }

    fn stage_changes(&self, changes: &[KeyChange]) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        for &(key, pressed) in changes {
            self.stage_update(key, pressed)?;
        }
        commit(&self.pes, &[self as &dyn MatrixSide], false)
    }

    fn stage_release_all(&self) -> Result<()> {
        commit(&self.pes, &[self as &dyn MatrixSide], true)
    }

    fn shadow(&self) -> ShadowState {
        ShadowState {
            closed: self.closed.lock().clone(),
            ..ShadowState::default()
        }
    }

    fn restore_shadow(&self, shadow: ShadowState) {
        *self.closed.lock() = shadow.closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KosmosConfig;
    use crate::simulator::SimulatedFpga;
    use kosmos_keyboard::layouts;
    use kosmos_transport::FpgaLink;

    fn tree() -> Arc<DeviceTree> {
        let link = Arc::new(FpgaLink::new(Arc::new(SimulatedFpga::new())));
        DeviceTree::discover(link, &KosmosConfig::default()).unwrap()
    }

    #[test]
    fn test_dropped_emulators_release_their_reset_hook() {
        let dt = tree();
        let layout = Arc::new(layouts::media_dual());
        let matrix = dt.kbd_matrix().unwrap().clone();

        for _ in 0..100 {
            drop(GalvanicKeyMatrixEmulator::new(&dt, layout.clone()).unwrap());
        }
        assert_eq!(matrix.core().reset_callback_count(), 0);

        let emulator = GalvanicKeyMatrixEmulator::new(&dt, layout).unwrap();
        assert_eq!(matrix.core().reset_callback_count(), 1);
        drop(emulator);
        assert_eq!(matrix.core().reset_callback_count(), 0);
    }

    #[test]
    fn test_reset_clears_live_shadow() {
        let dt = tree();
        let emulator = GalvanicKeyMatrixEmulator::new(&dt, Arc::new(layouts::media_dual())).unwrap();
        emulator.key_press(KeyId::PLAY_PAUSE).unwrap();
        assert!(emulator.is_pressed(KeyId::PLAY_PAUSE));

        emulator.module().reset_module(true).unwrap();
        assert!(emulator.closed_cells().is_empty());
    }
}
