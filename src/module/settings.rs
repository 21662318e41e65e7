//! Frozen per-module settings

use kosmos_transport::cmd;

/// Opcodes a module answers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleCommands {
    pub status: u8,
    pub reset: u8,
    pub start: u8,
    pub stop: u8,
    pub write_one: u8,
    pub write_max: u8,
    pub read_one: u8,
    pub read_max: u8,
}

impl ModuleCommands {
    pub const STANDARD: Self = Self {
        status: cmd::STATUS,
        reset: cmd::RESET,
        start: cmd::START,
        stop: cmd::STOP,
        write_one: cmd::WRITE_ONE,
        write_max: cmd::WRITE_MAX,
        read_one: cmd::READ_ONE,
        read_max: cmd::READ_MAX,
    };

    /// Entries carried by the largest write frame
    pub fn max_write_entries(&self) -> usize {
        (self.write_max - self.write_one) as usize + 1
    }

    /// Entries carried by the largest read frame
    pub fn max_read_entries(&self) -> usize {
        (self.read_max - self.read_one) as usize + 1
    }

    /// Write opcode for `n` entries
    pub fn write_n(&self, n: usize) -> u8 {
        debug_assert!(n >= 1 && n <= self.max_write_entries());
        self.write_one + (n - 1) as u8
    }

    /// Read opcode for `n` entries
    pub fn read_n(&self, n: usize) -> u8 {
        debug_assert!(n >= 1 && n <= self.max_read_entries());
        self.read_one + (n - 1) as u8
    }
}

/// Module state codes shared by every module
pub mod state {
    pub const RESET_OR_STOP: u8 = 0x00;
    pub const STARTED: u8 = 0x01;
}

/// Static description of one module class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleSettings {
    /// Human-readable name
    pub name: &'static str,
    pub instance_id: u8,
    pub msg_id: u8,
    /// Remote buffer size in entries
    pub buffer_size: Option<u16>,
    /// Remote FIFO size in entries
    pub fifo_size: Option<u16>,
    /// Whether the device tree tolerates the module's absence
    pub optional: bool,
    pub state_reset_or_stop: u8,
    pub state_started: u8,
    /// Further states beyond the two above
    pub extra_states: &'static [u8],
    pub cmds: ModuleCommands,
}

impl ModuleSettings {
    pub const fn new(name: &'static str, msg_id: u8) -> Self {
        Self {
            name,
            instance_id: 0,
            msg_id,
            buffer_size: None,
            fifo_size: None,
            optional: false,
            state_reset_or_stop: state::RESET_OR_STOP,
            state_started: state::STARTED,
            extra_states: &[],
            cmds: ModuleCommands::STANDARD,
        }
    }

    pub const fn with_buffer(mut self, buffer_size: u16) -> Self {
        self.buffer_size = Some(buffer_size);
        self
    }

    pub const fn with_fifo(mut self, fifo_size: u16) -> Self {
        self.fifo_size = Some(fifo_size);
        self
    }

    pub const fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub const fn with_extra_states(mut self, states: &'static [u8]) -> Self {
        self.extra_states = states;
        self
    }

    /// Check if `state` is one of the module's known state codes
    pub fn is_known_state(&self, state: u8) -> bool {
        state == self.state_reset_or_stop
            || state == self.state_started
            || self.extra_states.contains(&state)
    }
}
