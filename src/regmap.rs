//! Register-file model
//!
//! Describes the registers and commands of an FPGA block. Registers are
//! either written directly through one command, or (masked registers)
//! through a SET/CLR command pair where each bit of a tri-state pattern
//! says whether the write sets it (`1`), clears it (`0`) or leaves it (`x`).
//!
//! A [`RegisterMap`] is validated once at construction and read-only after.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegisterMapError {
    #[error("Register 0x{0:02X} defined twice")]
    DuplicateRegister(u8),

    #[error("Command {0} defined twice")]
    DuplicateCommand(u8),

    #[error("No register at address 0x{0:02X}")]
    UnknownRegister(u8),

    #[error("No command with index {0}")]
    UnknownCommand(u8),

    #[error("Name `{name}` does not match `{defined}` at {location}")]
    NameMismatch {
        name: String,
        defined: String,
        location: String,
    },

    #[error("Register `{0}` has no name entry")]
    UnnamedRegister(String),

    #[error("Register 0x{0:02X} has no reg2cmd entry")]
    MissingCommand(u8),

    #[error("Register 0x{0:02X}: reg2cmd entry does not match the register kind")]
    KindMismatch(u8),

    #[error("Invalid mask `{mask}` for {width}-bit register `{register}`")]
    InvalidMask {
        register: String,
        mask: String,
        width: u8,
    },

    #[error("Value 0x{value:X} does not fit in {width} bits")]
    ValueOutOfRange { value: u32, width: u8 },

    #[error("Unknown register or command name `{0}`")]
    UnknownName(String),
}

type Result<T> = std::result::Result<T, RegisterMapError>;

/// Normalize a name for comparison: case-insensitive, ignoring hyphens,
/// underscores and spaces
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

// ============================================================================
// Values
// ============================================================================

/// Value type of a register or command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Bool,
    U8,
    U16,
    U32,
    /// Bitfield of the given width
    Bits(u8),
}

impl ValueType {
    pub fn width(self) -> u8 {
        match self {
            Self::Bool => 1,
            Self::U8 => 8,
            Self::U16 => 16,
            Self::U32 => 32,
            Self::Bits(w) => w.min(32),
        }
    }

    pub fn max(self) -> u32 {
        width_mask(self.width())
    }

    pub fn check(self, value: u32) -> Result<u32> {
        if value > self.max() {
            return Err(RegisterMapError::ValueOutOfRange {
                value,
                width: self.width(),
            });
        }
        Ok(value)
    }
}

fn width_mask(width: u8) -> u32 {
    if width >= 32 {
        u32::MAX
    } else {
        (1u32 << width) - 1
    }
}

/// Working value of a directly written register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegVal {
    value_type: ValueType,
    reset_value: u32,
    value: u32,
}

impl RegVal {
    pub fn new(value_type: ValueType, reset_value: u32) -> Result<Self> {
        let reset_value = value_type.check(reset_value)?;
        Ok(Self {
            value_type,
            reset_value,
            value: reset_value,
        })
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn width(&self) -> u8 {
        self.value_type.width()
    }

    /// Replace the bits selected by `mask` with those of `value`
    pub fn set(&mut self, value: u32, mask: u32) -> Result<()> {
        let value = self.value_type.check(value)?;
        let mask = mask & self.value_type.max();
        self.value = (self.value & !mask) | (value & mask);
        Ok(())
    }

    /// Restore the bits selected by `mask` to the reset value
    pub fn reset(&mut self, mask: u32) {
        let mask = mask & self.value_type.max();
        self.value = (self.value & !mask) | (self.reset_value & mask);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tri {
    X,
    Zero,
    One,
}

/// Working value of a masked register: a value plus the tri-state write
/// pattern that will be sent through the SET/CLR command pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskedRegVal {
    reg: RegVal,
    /// Index 0 is bit 0
    pattern: Vec<Tri>,
}

impl MaskedRegVal {
    /// Build from a pattern string written MSB first, e.g. `"xx10"`
    pub fn new(value_type: ValueType, reset_value: u32, mask: &str) -> Result<Self> {
        let reg = RegVal::new(value_type, reset_value)?;
        let pattern = parse_mask(mask, value_type.width()).ok_or_else(|| {
            RegisterMapError::InvalidMask {
                register: String::new(),
                mask: mask.to_string(),
                width: value_type.width(),
            }
        })?;
        Ok(Self { reg, pattern })
    }

    pub fn value(&self) -> u32 {
        self.reg.value()
    }

    pub fn width(&self) -> u8 {
        self.reg.width()
    }

    /// Stage `value` on the bits selected by `mask`
    pub fn set(&mut self, value: u32, mask: u32) -> Result<()> {
        self.reg.set(value, mask)?;
        for (bit, tri) in self.pattern.iter_mut().enumerate() {
            if mask & (1 << bit) != 0 {
                *tri = if value & (1 << bit) != 0 { Tri::One } else { Tri::Zero };
            }
        }
        Ok(())
    }

    /// Restore the bits selected by `mask` and stop writing them
    pub fn reset(&mut self, mask: u32) {
        self.reg.reset(mask);
        for (bit, tri) in self.pattern.iter_mut().enumerate() {
            if mask & (1 << bit) != 0 {
                *tri = Tri::X;
            }
        }
    }

    fn bits(&self, want: Tri) -> u32 {
        self.pattern
            .iter()
            .enumerate()
            .filter(|(_, t)| **t == want)
            .fold(0, |acc, (bit, _)| acc | (1 << bit))
    }

    /// Bits the SET command will set
    pub fn set_mask(&self) -> u32 {
        self.bits(Tri::One)
    }

    /// Bits the CLR command will clear
    pub fn clr_mask(&self) -> u32 {
        self.bits(Tri::Zero)
    }

    /// Bits left untouched
    pub fn dont_care_mask(&self) -> u32 {
        self.bits(Tri::X)
    }

    /// Pattern string, MSB first
    pub fn mask_string(&self) -> String {
        self.pattern
            .iter()
            .rev()
            .map(|t| match t {
                Tri::X => 'x',
                Tri::Zero => '0',
                Tri::One => '1',
            })
            .collect()
    }
}

fn parse_mask(mask: &str, width: u8) -> Option<Vec<Tri>> {
    if mask.chars().count() != width as usize {
        return None;
    }
    mask.chars()
        .rev()
        .map(|c| match c {
            'x' | 'X' => Some(Tri::X),
            '0' => Some(Tri::Zero),
            '1' => Some(Tri::One),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Definitions
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Register {
    pub addr: u8,
    pub name: String,
    pub value_type: ValueType,
    pub reset_value: u32,
    pub description: String,
}

impl Register {
    pub fn new(addr: u8, name: &str, value_type: ValueType, reset_value: u32) -> Self {
        Self {
            addr,
            name: name.to_string(),
            value_type,
            reset_value,
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn reg_val(&self) -> Result<RegVal> {
        RegVal::new(self.value_type, self.reset_value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskedRegister {
    pub register: Register,
    /// Default tri-state pattern, MSB first
    pub mask: String,
}

impl MaskedRegister {
    pub fn reg_val(&self) -> Result<MaskedRegVal> {
        MaskedRegVal::new(
            self.register.value_type,
            self.register.reset_value,
            &self.mask,
        )
    }
}

/// A register of either kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterDef {
    Direct(Register),
    Masked(MaskedRegister),
}

impl RegisterDef {
    pub fn register(&self) -> &Register {
        match self {
            Self::Direct(r) => r,
            Self::Masked(m) => &m.register,
        }
    }

    pub fn addr(&self) -> u8 {
        self.register().addr
    }

    pub fn name(&self) -> &str {
        &self.register().name
    }

    pub fn is_masked(&self) -> bool {
        matches!(self, Self::Masked(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub index: u8,
    pub name: String,
    pub value_type: ValueType,
    pub value: u32,
    pub description: String,
}

impl Command {
    pub fn new(index: u8, name: &str, value_type: ValueType) -> Self {
        Self {
            index,
            name: name.to_string(),
            value_type,
            value: 0,
            description: String::new(),
        }
    }

    /// Set the command argument, enforcing the value type
    pub fn set(&mut self, value: u32) -> Result<()> {
        self.value = self.value_type.check(value)?;
        Ok(())
    }
}

/// How a register is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegCommands {
    Direct(u8),
    Masked { set: u8, clr: u8 },
}

impl fmt::Display for RegCommands {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(i) => write!(f, "{i}"),
            Self::Masked { set, clr } => write!(f, "({set}, {clr})"),
        }
    }
}

// ============================================================================
// Register map
// ============================================================================

/// Validated register and command file of one module
#[derive(Debug, Clone)]
pub struct RegisterMap {
    defs: BTreeMap<u8, RegisterDef>,
    cmds: BTreeMap<u8, Command>,
    registers: BTreeMap<String, u8>,
    commands: BTreeMap<String, u8>,
    reg2cmd: BTreeMap<u8, RegCommands>,
}

impl RegisterMap {
    pub fn builder() -> RegisterMapBuilder {
        RegisterMapBuilder::default()
    }

    /// Register by name (normalized comparison)
    pub fn register(&self, name: &str) -> Result<&RegisterDef> {
        self.registers
            .get(&normalize_name(name))
            .and_then(|addr| self.defs.get(addr))
            .ok_or_else(|| RegisterMapError::UnknownName(name.to_string()))
    }

    pub fn register_at(&self, addr: u8) -> Option<&RegisterDef> {
        self.defs.get(&addr)
    }

    pub fn command(&self, name: &str) -> Result<&Command> {
        self.commands
            .get(&normalize_name(name))
            .and_then(|index| self.cmds.get(index))
            .ok_or_else(|| RegisterMapError::UnknownName(name.to_string()))
    }

    pub fn command_at(&self, index: u8) -> Option<&Command> {
        self.cmds.get(&index)
    }

    /// Commands used to write the register at `addr`
    pub fn reg2cmd(&self, addr: u8) -> Option<RegCommands> {
        self.reg2cmd.get(&addr).copied()
    }

    /// Register written by a command, with whether the command is the CLR
    /// half of a masked pair
    pub fn cmd2reg(&self, index: u8) -> Option<(u8, CommandRole)> {
        self.reg2cmd.iter().find_map(|(&addr, cmds)| match *cmds {
            RegCommands::Direct(i) if i == index => Some((addr, CommandRole::Write)),
            RegCommands::Masked { set, .. } if set == index => Some((addr, CommandRole::Set)),
            RegCommands::Masked { clr, .. } if clr == index => Some((addr, CommandRole::Clear)),
            _ => None,
        })
    }

    pub fn registers(&self) -> impl Iterator<Item = &RegisterDef> {
        self.defs.values()
    }

    pub fn commands(&self) -> impl Iterator<Item = &Command> {
        self.cmds.values()
    }
}

/// What a command does to its register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandRole {
    Write,
    Set,
    Clear,
}

#[derive(Debug, Default)]
pub struct RegisterMapBuilder {
    defs: Vec<RegisterDef>,
    cmds: Vec<Command>,
    registers: Vec<(String, u8)>,
    commands: Vec<(String, u8)>,
    reg2cmd: Vec<(u8, RegCommands)>,
}

impl RegisterMapBuilder {
    pub fn define(mut self, def: RegisterDef) -> Self {
        self.defs.push(def);
        self
    }

    pub fn define_command(mut self, cmd: Command) -> Self {
        self.cmds.push(cmd);
        self
    }

    /// Name → address entry
    pub fn register(mut self, name: &str, addr: u8) -> Self {
        self.registers.push((name.to_string(), addr));
        self
    }

    /// Name → command index entry
    pub fn command(mut self, name: &str, index: u8) -> Self {
        self.commands.push((name.to_string(), index));
        self
    }

    pub fn reg2cmd(mut self, addr: u8, cmds: RegCommands) -> Self {
        self.reg2cmd.push((addr, cmds));
        self
    }

    /// Validate and freeze
    pub fn build(self) -> Result<RegisterMap> {
        let mut defs = BTreeMap::new();
        for def in self.defs {
            if let RegisterDef::Masked(m) = &def {
                m.register.value_type.check(m.register.reset_value)?;
                if parse_mask(&m.mask, m.register.value_type.width()).is_none() {
                    return Err(RegisterMapError::InvalidMask {
                        register: m.register.name.clone(),
                        mask: m.mask.clone(),
                        width: m.register.value_type.width(),
                    });
                }
            } else {
                def.register().value_type.check(def.register().reset_value)?;
            }
            let addr = def.addr();
            if defs.insert(addr, def).is_some() {
                return Err(RegisterMapError::DuplicateRegister(addr));
            }
        }

        let mut cmds = BTreeMap::new();
        for cmd in self.cmds {
            let index = cmd.index;
            if cmds.insert(index, cmd).is_some() {
                return Err(RegisterMapError::DuplicateCommand(index));
            }
        }

        let mut registers = BTreeMap::new();
        for (name, addr) in self.registers {
            let def = defs
                .get(&addr)
                .ok_or(RegisterMapError::UnknownRegister(addr))?;
            if normalize_name(&name) != normalize_name(def.name()) {
                return Err(RegisterMapError::NameMismatch {
                    name,
                    defined: def.name().to_string(),
                    location: format!("register 0x{addr:02X}"),
                });
            }
            registers.insert(normalize_name(&name), addr);
        }
        for def in defs.values() {
            if !registers.contains_key(&normalize_name(def.name())) {
                return Err(RegisterMapError::UnnamedRegister(def.name().to_string()));
            }
        }

        let mut commands = BTreeMap::new();
        for (name, index) in self.commands {
            let cmd: &Command = cmds
                .get(&index)
                .ok_or(RegisterMapError::UnknownCommand(index))?;
            if normalize_name(&name) != normalize_name(&cmd.name) {
                return Err(RegisterMapError::NameMismatch {
                    name,
                    defined: cmd.name.clone(),
                    location: format!("command {index}"),
                });
            }
            commands.insert(normalize_name(&name), index);
        }

        let mut reg2cmd = BTreeMap::new();
        for (addr, entry) in self.reg2cmd {
            let def = defs
                .get(&addr)
                .ok_or(RegisterMapError::UnknownRegister(addr))?;
            let referenced = match entry {
                RegCommands::Direct(i) if !def.is_masked() => vec![i],
                RegCommands::Masked { set, clr } if def.is_masked() => vec![set, clr],
                _ => return Err(RegisterMapError::KindMismatch(addr)),
            };
            for index in referenced {
                if !cmds.contains_key(&index) {
                    return Err(RegisterMapError::UnknownCommand(index));
                }
            }
            reg2cmd.insert(addr, entry);
        }
        for &addr in defs.keys() {
            if !reg2cmd.contains_key(&addr) {
                return Err(RegisterMapError::MissingCommand(addr));
            }
        }

        Ok(RegisterMap {
            defs,
            cmds,
            registers,
            commands,
            reg2cmd,
        })
    }
}
