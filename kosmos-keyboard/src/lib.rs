//! Key catalogue and layouts for the Kosmos keyboard emulators
//!
//! This crate is independent of the FPGA link: it names every stimulus a
//! test can drive and describes where each key lives on the emulated
//! matrix (galvanic cell or analog chain index).

pub mod error;
pub mod key_id;
pub mod layout;
pub mod layouts;
pub mod modifiers;

pub use error::LayoutError;
pub use key_id::{CompoundStep, KeyId};
pub use layout::{KeyKind, KeyboardLayout, MatrixPosition};
pub use modifiers::ModifierGroup;

/// Default Gtech displacement level for a fully pressed key
pub const DEFAULT_PRESS_LEVEL: u8 = 40;

/// Gtech displacement level of a released key
pub const RELEASED_LEVEL: u8 = 0;
