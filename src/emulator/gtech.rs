//! Gtech keymatrix emulator: optical switches on an analog chain
//!
//! Each key is addressed by its chain index and driven to a displacement
//! level, `0` being released. In legacy mode the module only honors fully
//! pressed or released keys; analog mode accepts any level.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kosmos_keyboard::{KeyId, KeyboardLayout, DEFAULT_PRESS_LEVEL, RELEASED_LEVEL};
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{commit, stage_entry, ButtonStimuli, KeyChange, MatrixSide, ShadowState};
use crate::device_tree::DeviceTree;
use crate::error::{KosmosError, Result};
use crate::kbd::{FuncMode, GtechEntry, KbdEntry, KbdGtech};
use crate::module::{Module, ResetCallback};
use crate::pes::{Pes, PesActionEvent, PesResumeEvent};
use crate::sequencer::Sequencer;

const NAME: &str = "gtech";

pub struct GtechKeyMatrixEmulator {
    module: Arc<KbdGtech>,
    sequencer: Arc<Sequencer>,
    pes: Arc<Pes>,
    layout: Arc<KeyboardLayout>,
    update_delay: Duration,
    verbose: AtomicBool,
    press_level: AtomicU8,
    analog: Arc<AtomicBool>,
    /// chain id -> staged level, released chains omitted
    levels: Arc<Mutex<BTreeMap<u8, u8>>>,
    _on_reset: ResetCallback,
}

impl std::fmt::Debug for GtechKeyMatrixEmulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GtechKeyMatrixEmulator")
            .field("layout", &self.layout.name)
            .field("analog", &self.is_analog())
            .field("levels", &*self.levels.lock())
            .finish()
    }
}

impl GtechKeyMatrixEmulator {
    pub fn new(dt: &DeviceTree, layout: Arc<KeyboardLayout>) -> Result<Self> {
        layout.validate()?;
        let module = dt.require_kbd_gtech()?.clone();

        let levels = Arc::new(Mutex::new(BTreeMap::new()));
        let analog = Arc::new(AtomicBool::new(false));
        let (shadow, mode) = (levels.clone(), analog.clone());
        let on_reset: ResetCallback = Arc::new(move || {
            shadow.lock().clear();
            mode.store(false, Ordering::SeqCst);
        });
        module.register_reset_callback(&on_reset);

        Ok(Self {
            module,
            sequencer: dt.sequencer().clone(),
            pes: dt.pes().clone(),
            layout,
            update_delay: dt.kbd_update_delay(),
            verbose: AtomicBool::new(false),
            press_level: AtomicU8::new(DEFAULT_PRESS_LEVEL),
            analog,
            levels,
            _on_reset: on_reset,
        })
    }

    pub fn module(&self) -> &Arc<KbdGtech> {
        &self.module
    }

    pub fn press_level(&self) -> u8 {
        self.press_level.load(Ordering::SeqCst)
    }

    /// Level used by `key_press`
    pub fn set_press_level(&self, level: u8) -> Result<()> {
        if level == RELEASED_LEVEL {
            return Err(KosmosError::InvalidParameter(
                "press level must be above the released level".into(),
            ));
        }
        self.press_level.store(level, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_analog(&self) -> bool {
        self.analog.load(Ordering::SeqCst)
    }

    /// Switch the FPGA module to analog mode
    pub fn func_mode_analog(&self) -> Result<()> {
        self.module.set_func_mode(FuncMode::Analog)?;
        self.analog.store(true, Ordering::SeqCst);
        info!("KBD_GTECH in analog mode");
        Ok(())
    }

    pub fn func_mode_legacy(&self) -> Result<()> {
        self.module.set_func_mode(FuncMode::Legacy)?;
        self.analog.store(false, Ordering::SeqCst);
        info!("KBD_GTECH in legacy mode");
        Ok(())
    }

    /// Staged level of `key`
    pub fn level(&self, key: KeyId) -> Option<u8> {
        let chain_id = self.layout.chain_id(key)?;
        Some(
            self.levels
                .lock()
                .get(&chain_id)
                .copied()
                .unwrap_or(RELEASED_LEVEL),
        )
    }

    /// Drive `key` to an arbitrary displacement level; intermediate levels
    /// need analog mode
    pub fn key_press_level(&self, key: KeyId, level: u8) -> Result<()> {
        if !self.owns(key) {
            return Err(KosmosError::KeyNotInLayout { key, emulator: NAME });
        }
        if !self.is_analog() && level != RELEASED_LEVEL && level != self.press_level() {
            return Err(KosmosError::InvalidParameter(format!(
                "level {level} needs analog mode (legacy accepts {RELEASED_LEVEL} or {})",
                self.press_level()
            )));
        }
        if self.verbose() {
            info!("{}: key_press_level {} -> {}", NAME, key, level);
        }
        self.compose_atomic(&mut || {
            self.stage_level(key, level)?;
            commit(&self.pes, &[self as &dyn MatrixSide], false)
        })?;
        self.sequencer.play_if_online()
    }

    fn stage_level(&self, key: KeyId, level: u8) -> Result<()> {
        let chain_id = self.layout.chain_id(key).ok_or(KosmosError::KeyNotInLayout {
            key,
            emulator: NAME,
        })?;
        debug!("KBD_GTECH UPDATE {} chain {} level {}", key, chain_id, level);
        self.module.append(GtechEntry::update(chain_id, level))?;
        {
            let mut levels = self.levels.lock();
            if level == RELEASED_LEVEL {
                levels.remove(&chain_id);
            } else {
                levels.insert(chain_id, level);
            }
        }
        stage_entry(&self.pes, self.send_event(), self.ready_event(), self.update_delay)
    }
}

impl MatrixSide for GtechKeyMatrixEmulator {
    fn stage_update(&self, key: KeyId, pressed: bool) -> Result<()> {
        let level = if pressed {
            self.press_level()
        } else {
            RELEASED_LEVEL
        };
        self.stage_level(key, level)
    }

    fn queue_send(&self) -> Result<()> {
        self.module.append(GtechEntry::send())
    }

    fn queue_reset(&self) -> Result<()> {
        self.levels.lock().clear();
        self.module.append(GtechEntry::reset())
    }

    fn send_event(&self) -> PesActionEvent {
        self.module.send_event()
    }

    fn ready_event(&self) -> PesResumeEvent {
        self.module.ready_event()
    }
}

impl ButtonStimuli for GtechKeyMatrixEmulator {
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
        self.layout.is_analog(key)
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
            levels: self.levels.lock().clone(),
            ..ShadowState::default()
        }
    }

    fn restore_shadow(&self, shadow: ShadowState) {
        *self.levels.lock() = shadow.levels;
    }
}
