// Kosmos instrumentation runtime - Shared Library
// Module framework, PES sequencer, device tree, spies and key-matrix emulators

pub mod config;
pub mod device_tree;
pub mod emulator;
pub mod error;
pub mod fatal;
pub mod i2c_spy;
pub mod kbd;
pub mod kosmos;
pub mod module;
pub mod optical_sensor;
pub mod pes;
pub mod regmap;
pub mod rgb_spy;
pub mod sequencer;
pub mod simulator;

pub use config::KosmosConfig;
pub use device_tree::DeviceTree;
pub use emulator::{
    ButtonStimuli, DualKeyMatrixEmulator, EmulatorSide, GalvanicKeyMatrixEmulator,
    GtechKeyMatrixEmulator, KeyMatrixVariant, ShadowState,
};
pub use error::{KosmosError, ModuleStatusSanityChecksError, Result};
pub use fatal::KosmosFatalError;
pub use kosmos::{EmulatorKind, Kosmos};
pub use module::{Module, ModuleSettings, ModuleStatus};
pub use pes::{CpuEvent, PesActionEvent, PesInstruction, PesResumeEvent};
pub use sequencer::{Sequencer, PLAY_TIMEOUT_MARGIN};
pub use simulator::SimulatedFpga;

pub use kosmos_keyboard::{KeyId, KeyboardLayout};
pub use kosmos_transport::{msg, FpgaLink, Transport, TransportError};
