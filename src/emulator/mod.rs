//! Keymatrix emulators
//!
//! Three emulators drive keys of the device under test through the KBD
//! modules: [`GalvanicKeyMatrixEmulator`] closes row/column cells,
//! [`GtechKeyMatrixEmulator`] sets analog displacement levels and
//! [`DualKeyMatrixEmulator`] routes every key to whichever of the two owns it.
//!
//! All of them share the [`ButtonStimuli`] surface. Every operation is built
//! offline (through [`Sequencer::compose`]) and then played as one sequence
//! when the sequencer is online, so a keystroke is always atomic. An
//! operation that fails while staging leaves the lists and the shadow maps
//! as it found them.
//!
//! Each key change is staged as a KBD `UPDATE` entry plus a PES triplet
//! `EXECUTE(send) / WAIT(ready) / DELAY(pacing)`; a commit appends a `SEND`
//! entry to every involved module and fires all their action bits in one
//! `EXECUTE`, followed by one `WAIT` on all their ready bits.

pub mod dual;
pub mod galvanic;
pub mod gtech;

pub use dual::{DualKeyMatrixEmulator, EmulatorSide};
pub use galvanic::GalvanicKeyMatrixEmulator;
pub use gtech::GtechKeyMatrixEmulator;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use kosmos_keyboard::{CompoundStep, KeyId, KeyboardLayout};
use tracing::info;

use crate::error::{KosmosError, Result};
use crate::pes::{Pes, PesActionEvent, PesResumeEvent};
use crate::sequencer::{Sequencer, PLAY_TIMEOUT_MARGIN};

/// Hold time of [`ButtonStimuli::keystroke`]
pub const DEFAULT_KEYSTROKE_DURATION: Duration = Duration::from_millis(50);

/// Gap after the release of [`ButtonStimuli::keystroke`]
pub const DEFAULT_KEYSTROKE_DELAY: Duration = Duration::from_millis(50);

/// One key state change: `(key, pressed)`
pub type KeyChange = (KeyId, bool);

/// Staged key state of an emulator
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShadowState {
    /// Closed matrix cells `(col, row)`
    pub closed: BTreeSet<(u8, u8)>,
    /// chain id -> level
    pub levels: BTreeMap<u8, u8>,
}

// ============================================================================
// ButtonStimuli
// ============================================================================

/// Key press/release surface shared by every keymatrix emulator
///
/// Implementors provide the staging primitives; the operations are default
/// methods composed from them.
pub trait ButtonStimuli: Send + Sync {
    fn name(&self) -> &'static str;

    fn layout(&self) -> &KeyboardLayout;

    fn sequencer(&self) -> &Arc<Sequencer>;

    fn pes(&self) -> &Arc<Pes>;

    fn verbose(&self) -> bool;

    fn set_verbose(&self, verbose: bool);

    /// Whether this emulator drives `key` (Fn aliases and compound keys are
    /// expanded before this is asked)
    fn owns(&self, key: KeyId) -> bool;

    /// Queue an `UPDATE` per change, then one fused commit
    fn stage_changes(&self, changes: &[KeyChange]) -> Result<()>;

    /// Clear the shadow maps and queue a `RESET` on every module, with one
    /// fused `EXECUTE` / `WAIT`
    fn stage_release_all(&self) -> Result<()>;

    fn shadow(&self) -> ShadowState;

    fn restore_shadow(&self, shadow: ShadowState);

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    fn key_press(&self, key: KeyId) -> Result<()> {
        self.trace(format_args!("key_press {key}"));
        let commits = self.expand(key, true)?;
        self.compose_atomic(&mut || commits.iter().try_for_each(|c| self.stage_changes(c)))?;
        self.sequencer().play_if_online()
    }

    fn key_release(&self, key: KeyId) -> Result<()> {
        self.trace(format_args!("key_release {key}"));
        let commits = self.expand(key, false)?;
        self.compose_atomic(&mut || commits.iter().try_for_each(|c| self.stage_changes(c)))?;
        self.sequencer().play_if_online()
    }

    /// Press and release once with the default timings
    fn keystroke(&self, key: KeyId) -> Result<()> {
        self.keystroke_with(key, DEFAULT_KEYSTROKE_DURATION, 1, DEFAULT_KEYSTROKE_DELAY)
    }

    /// Press, hold `duration`, release, wait `delay`; `repeat` times in one
    /// sequence
    fn keystroke_with(&self, key: KeyId, duration: Duration, repeat: u32, delay: Duration) -> Result<()> {
        self.trace(format_args!(
            "keystroke {key} x{repeat} ({duration:?} down, {delay:?} up)"
        ));
        let press = self.expand(key, true)?;
        let release = self.expand(key, false)?;
        let pes = self.pes();
        self.compose_atomic(&mut || {
            for _ in 0..repeat {
                press.iter().try_for_each(|c| self.stage_changes(c))?;
                pes.delay(duration)?;
                release.iter().try_for_each(|c| self.stage_changes(c))?;
                pes.delay(delay)?;
            }
            Ok(())
        })?;
        self.sequencer().play_if_online()
    }

    /// Press several keys: one fused commit when `delay` is `None`,
    /// otherwise one commit per key separated by `delay`
    fn multiple_keys_press(&self, keys: &[KeyId], delay: Option<Duration>) -> Result<()> {
        self.trace(format_args!("multiple_keys_press {keys:?} delay={delay:?}"));
        self.set_keys(keys, true, delay)
    }

    fn multiple_keys_release(&self, keys: &[KeyId], delay: Option<Duration>) -> Result<()> {
        self.trace(format_args!("multiple_keys_release {keys:?} delay={delay:?}"));
        self.set_keys(keys, false, delay)
    }

    /// Release everything, then wait `post_delay`
    fn release_all(&self, post_delay: Duration) -> Result<()> {
        self.trace(format_args!("release_all post_delay={post_delay:?}"));
        self.compose_atomic(&mut || {
            self.stage_release_all()?;
            self.pes().delay(post_delay)
        })?;
        if self.sequencer().offline_mode() {
            return Ok(());
        }
        self.sequencer()
            .play_sequence(PLAY_TIMEOUT_MARGIN + post_delay)
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    /// Compose `stage` offline as one unit: if it fails, the sequencer drops
    /// what it queued and the shadow maps go back to their previous state
    fn compose_atomic(&self, stage: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        let shadow = self.shadow();
        let result = self.sequencer().compose(stage);
        if result.is_err() {
            self.restore_shadow(shadow);
        }
        result
    }

    /// Key changes of `key`, one inner list per commit
    fn expand(&self, key: KeyId, pressed: bool) -> Result<Vec<Vec<KeyChange>>> {
        expand_key(self.layout(), |k| self.owns(k), self.name(), key, pressed)
    }

    fn set_keys(&self, keys: &[KeyId], pressed: bool, delay: Option<Duration>) -> Result<()> {
        let mut expanded = Vec::with_capacity(keys.len());
        for &key in keys {
            expanded.push(self.expand(key, pressed)?);
        }

        match delay {
            None => {
                let mut fused = Vec::new();
                for (key, commits) in keys.iter().zip(expanded) {
                    if commits.len() > 1 {
                        return Err(KosmosError::InvalidParameter(format!(
                            "compound key {key} cannot be part of a fused press"
                        )));
                    }
                    fused.extend(commits.into_iter().flatten());
                }
                self.compose_atomic(&mut || self.stage_changes(&fused))?;
            }
            Some(delay) => {
                self.compose_atomic(&mut || {
                    for commits in &expanded {
                        commits.iter().try_for_each(|c| self.stage_changes(c))?;
                        self.pes().delay(delay)?;
                    }
                    Ok(())
                })?;
            }
        }
        self.sequencer().play_if_online()
    }

    fn trace(&self, op: fmt::Arguments<'_>) {
        if self.verbose() {
            info!("{}: {}", self.name(), op);
        }
    }
}

/// Expand Fn aliases and compound shortcuts into the commits that drive them
///
/// A compound key presses the steps before its first release and releases
/// the rest, one commit per step. An Fn alias presses the Fn key and the base
/// key in one commit and releases them in reverse order.
pub fn expand_key(
    layout: &KeyboardLayout,
    owns: impl Fn(KeyId) -> bool,
    emulator: &'static str,
    key: KeyId,
    pressed: bool,
) -> Result<Vec<Vec<KeyChange>>> {
    let commits = if let Some(steps) = key.compound_sequence() {
        let split = steps
            .iter()
            .position(|s| matches!(s, CompoundStep::Release(_)))
            .unwrap_or(steps.len());
        let half = if pressed { &steps[..split] } else { &steps[split..] };
        half.iter()
            .map(|step| match *step {
                CompoundStep::Press(k) => vec![(k, true)],
                CompoundStep::Release(k) => vec![(k, false)],
            })
            .collect()
    } else if let Some(base) = layout.fn_base(key) {
        let fn_key = layout
            .fn_key
            .ok_or(KosmosError::KeyNotInLayout { key, emulator })?;
        if pressed {
            vec![vec![(fn_key, true), (base, true)]]
        } else {
            vec![vec![(base, false), (fn_key, false)]]
        }
    } else {
        vec![vec![(key, pressed)]]
    };

    if let Some(&(missing, _)) = commits.iter().flatten().find(|(k, _)| !owns(*k)) {
        return Err(KosmosError::KeyNotInLayout {
            key: missing,
            emulator,
        });
    }
    Ok(commits)
}

// ============================================================================
// Module sides
// ============================================================================

/// One KBD module as seen by the emulators
pub(crate) trait MatrixSide {
    /// Queue an `UPDATE` and its pacing triplet
    fn stage_update(&self, key: KeyId, pressed: bool) -> Result<()>;

    fn queue_send(&self) -> Result<()>;

    /// Clear the shadow map and queue a `RESET`
    fn queue_reset(&self) -> Result<()>;

    fn send_event(&self) -> PesActionEvent;

    fn ready_event(&self) -> PesResumeEvent;
}

/// PES side of one staged entry: consume it, wait for the module, pace
pub(crate) fn stage_entry(
    pes: &Pes,
    send: PesActionEvent,
    ready: PesResumeEvent,
    pacing: Duration,
) -> Result<()> {
    pes.execute(send)?;
    pes.wait(ready)?;
    pes.delay(pacing)
}

/// Queue `SEND` (or `RESET`) on every side and fire them on one cycle
pub(crate) fn commit(pes: &Pes, sides: &[&dyn MatrixSide], reset: bool) -> Result<()> {
    if sides.is_empty() {
        return Ok(());
    }
    for side in sides {
        if reset {
            side.queue_reset()?;
        } else {
            side.queue_send()?;
        }
    }
    pes.execute_all(sides.iter().map(|s| s.send_event()))?;
    pes.wait_all(sides.iter().map(|s| s.ready_event()))
}

// ============================================================================
// KeyMatrixVariant
// ============================================================================

/// Whichever emulator fits the board and layout
pub enum KeyMatrixVariant {
    Galvanic(GalvanicKeyMatrixEmulator),
    Gtech(GtechKeyMatrixEmulator),
    Dual(DualKeyMatrixEmulator),
}

impl KeyMatrixVariant {
    fn inner(&self) -> &dyn ButtonStimuli {
        match self {
            Self::Galvanic(e) => e,
            Self::Gtech(e) => e,
            Self::Dual(e) => e,
        }
    }

    /// Analog side, if the variant has one
    pub fn gtech(&self) -> Option<&GtechKeyMatrixEmulator> {
        match self {
            Self::Galvanic(_) => None,
            Self::Gtech(e) => Some(e),
            Self::Dual(e) => Some(e.gtech()),
        }
    }

    pub fn galvanic(&self) -> Option<&GalvanicKeyMatrixEmulator> {
        match self {
            Self::Galvanic(e) => Some(e),
            Self::Gtech(_) => None,
            Self::Dual(e) => Some(e.galvanic()),
        }
    }
}

impl fmt::Debug for KeyMatrixVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("KeyMatrixVariant").field(&self.name()).finish()
    }
}

impl ButtonStimuli for KeyMatrixVariant {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn layout(&self) -> &KeyboardLayout {
        self.inner().layout()
    }

    fn sequencer(&self) -> &Arc<Sequencer> {
        self.inner().sequencer()
    }

    fn pes(&self) -> &Arc<Pes> {
        self.inner().pes()
    }

    fn verbose(&self) -> bool {
        self.inner().verbose()
    }

    fn set_verbose(&self, verbose: bool) {
        self.inner().set_verbose(verbose)
    }

    fn owns(&self, key: KeyId) -> bool {
        self.inner().owns(key)
    }

    fn stage_changes(&self, changes: &[KeyChange]) -> Result<()> {
        self.inner().stage_changes(changes)
    }

    fn stage_release_all(&self) -> Result<()> {
        self.inner().stage_release_all()
    }

    fn shadow(&self) -> ShadowState {
        self.inner().shadow()
    }

    fn restore_shadow(&self, shadow: ShadowState) {
        self.inner().restore_shadow(shadow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kosmos_keyboard::layouts;

    fn galvanic_only(layout: &KeyboardLayout) -> impl Fn(KeyId) -> bool + '_ {
        move |k| layout.is_galvanic(k)
    }

    #[test]
    fn test_expand_plain_key() {
        let layout = layouts::media_dual();
        let commits = expand_key(&layout, galvanic_only(&layout), "test", KeyId::PLAY_PAUSE, true).unwrap();
        assert_eq!(commits, vec![vec![(KeyId::PLAY_PAUSE, true)]]);
    }

    #[test]
    fn test_expand_fn_alias() {
        let layout = layouts::media_dual();
        let press = expand_key(&layout, galvanic_only(&layout), "test", KeyId::FN_KEYBOARD_F1, true).unwrap();
        assert_eq!(press, vec![vec![(KeyId::FN_KEY, true), (KeyId::KEYBOARD_F1, true)]]);
        let release = expand_key(&layout, galvanic_only(&layout), "test", KeyId::FN_KEYBOARD_F1, false).unwrap();
        assert_eq!(release, vec![vec![(KeyId::KEYBOARD_F1, false), (KeyId::FN_KEY, false)]]);
    }

    #[test]
    fn test_expand_compound_halves() {
        let layout = layouts::media_dual();
        let owns = galvanic_only(&layout);
        let press = expand_key(&layout, &owns, "test", KeyId::COMPOUND_CTRL_ALT_DEL, true).unwrap();
        assert_eq!(press.len(), 3);
        assert_eq!(press[0], vec![(KeyId::KEYBOARD_LEFT_CONTROL, true)]);
        assert_eq!(press[2], vec![(KeyId::KEYBOARD_DELETE_FORWARD, true)]);

        let release = expand_key(&layout, &owns, "test", KeyId::COMPOUND_CTRL_ALT_DEL, false).unwrap();
        assert_eq!(release.len(), 3);
        assert_eq!(release[2], vec![(KeyId::KEYBOARD_LEFT_CONTROL, false)]);
    }

    #[test]
    fn test_expand_rejects_foreign_keys() {
        let layout = layouts::media_dual();
        let err = expand_key(&layout, galvanic_only(&layout), "galvanic", KeyId::KEYBOARD_A, true).unwrap_err();
        assert!(matches!(
            err,
            KosmosError::KeyNotInLayout {
                key: KeyId::KEYBOARD_A,
                emulator: "galvanic"
            }
        ));

        // Ctrl+C needs KEYBOARD_C, which sits on the analog chain
        let err = expand_key(&layout, galvanic_only(&layout), "galvanic", KeyId::COMPOUND_CTRL_C, true).unwrap_err();
        assert!(matches!(err, KosmosError::KeyNotInLayout { key: KeyId::KEYBOARD_C, .. }));
    }
}
