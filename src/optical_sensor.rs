//! Optical sensor emulator
//!
//! Register-file module standing in for the mouse sensor of the device under
//! test. Registers are read by address; writes go through the command table
//! of the [`RegisterMap`] (one command for direct registers, a SET/CLR pair
//! for masked ones). Every access answers with the register's 1-byte value.

use std::sync::Arc;

use kosmos_transport::{msg, FpgaLink};
use tracing::debug;

use crate::error::{KosmosError, Result};
use crate::fatal::KosmosFatalError;
use crate::module::{CommonStatus, Module, ModuleCore, ModuleSettings};
use crate::regmap::{
    Command, MaskedRegVal, MaskedRegister, RegCommands, Register, RegisterDef, RegisterMap,
    RegisterMapError, ValueType,
};

pub const OPTICAL_SENSOR_SETTINGS: ModuleSettings =
    ModuleSettings::new("OPTICAL_SENSOR", msg::OPTICAL_SENSOR).optional();

/// Optical sensor opcodes
pub mod optical_cmd {
    /// Payload `[addr]`, reply `[value]`
    pub const REG_READ: u8 = 0x40;
    /// Payload `[command index, value]`, reply `[register value]`
    pub const REG_COMMAND: u8 = 0x41;
}

/// Register addresses of the default map
pub mod reg {
    pub const PRODUCT_ID: u8 = 0x00;
    pub const MOTION: u8 = 0x02;
    pub const DELTA_X: u8 = 0x03;
    pub const DELTA_Y: u8 = 0x04;
    pub const CONFIG: u8 = 0x0F;
    pub const RESOLUTION: u8 = 0x10;
}

/// Motion pending bit of the MOTION register
pub const MOTION_PENDING: u8 = 0x80;

/// Register and command file of the emulated sensor
pub fn default_register_map() -> std::result::Result<RegisterMap, RegisterMapError> {
    let direct = [
        (reg::PRODUCT_ID, "PRODUCT_ID", 0x42, 0),
        (reg::MOTION, "MOTION", 0x00, 1),
        (reg::DELTA_X, "DELTA_X", 0x00, 2),
        (reg::DELTA_Y, "DELTA_Y", 0x00, 3),
        (reg::RESOLUTION, "RESOLUTION", 0x10, 6),
    ];

    let mut builder = RegisterMap::builder();
    for (addr, name, reset, index) in direct {
        builder = builder
            .define(RegisterDef::Direct(Register::new(addr, name, ValueType::U8, reset)))
            .define_command(Command::new(index, &format!("WRITE_{name}"), ValueType::U8))
            .register(name, addr)
            .command(&format!("WRITE_{name}"), index)
            .reg2cmd(addr, RegCommands::Direct(index));
    }

    builder
        .define(RegisterDef::Masked(MaskedRegister {
            register: Register::new(reg::CONFIG, "CONFIG", ValueType::U8, 0x00)
                .with_description("Power and lift-detection switches"),
            mask: "xxxxxxxx".into(),
        }))
        .define_command(Command::new(4, "SET_CONFIG", ValueType::U8))
        .define_command(Command::new(5, "CLR_CONFIG", ValueType::U8))
        .register("CONFIG", reg::CONFIG)
        .command("SET_CONFIG", 4)
        .command("CLR_CONFIG", 5)
        .reg2cmd(reg::CONFIG, RegCommands::Masked { set: 4, clr: 5 })
        .build()
}

#[derive(Debug)]
pub struct OpticalSensor {
    core: ModuleCore,
    map: RegisterMap,
}

impl OpticalSensor {
    pub fn new(link: Arc<FpgaLink>, fatal: Arc<KosmosFatalError>) -> Result<Self> {
        Ok(Self::with_register_map(link, fatal, default_register_map()?))
    }

    pub fn with_register_map(link: Arc<FpgaLink>, fatal: Arc<KosmosFatalError>, map: RegisterMap) -> Self {
        Self {
            core: ModuleCore::new(OPTICAL_SENSOR_SETTINGS, link, fatal),
            map,
        }
    }

    pub fn register_map(&self) -> &RegisterMap {
        &self.map
    }

    pub fn status(&self, sanity_checks: bool) -> Result<CommonStatus> {
        self.core.status(sanity_checks)
    }

    pub fn read(&self, name: &str) -> Result<u8> {
        let addr = self.map.register(name)?.addr();
        self.read_at(addr)
    }

    pub fn read_at(&self, addr: u8) -> Result<u8> {
        let reply = self.core.send_data(optical_cmd::REG_READ, &[addr])?;
        single_byte(&reply)
    }

    /// Write a direct register
    pub fn write(&self, name: &str, value: u32) -> Result<u8> {
        let def = self.map.register(name)?;
        let RegCommands::Direct(index) = self
            .map
            .reg2cmd(def.addr())
            .ok_or(RegisterMapError::MissingCommand(def.addr()))?
        else {
            return Err(RegisterMapError::KindMismatch(def.addr()).into());
        };
        def.register().value_type.check(value)?;
        self.command(index, value)
    }

    /// Working value of a masked register, starting from its default pattern
    pub fn masked_value(&self, name: &str) -> Result<MaskedRegVal> {
        match self.map.register(name)? {
            RegisterDef::Masked(m) => Ok(m.reg_val()?),
            RegisterDef::Direct(r) => Err(RegisterMapError::KindMismatch(r.addr).into()),
        }
    }

    /// Write a masked register through its SET/CLR pair; bits left `x` are
    /// not touched
    pub fn write_masked(&self, name: &str, value: &MaskedRegVal) -> Result<u8> {
        let def = self.map.register(name)?;
        let RegCommands::Masked { set, clr } = self
            .map
            .reg2cmd(def.addr())
            .ok_or(RegisterMapError::MissingCommand(def.addr()))?
        else {
            return Err(RegisterMapError::KindMismatch(def.addr()).into());
        };

        let mut result = None;
        if value.set_mask() != 0 {
            result = Some(self.command(set, value.set_mask())?);
        }
        if value.clr_mask() != 0 {
            result = Some(self.command(clr, value.clr_mask())?);
        }
        match result {
            Some(v) => Ok(v),
            None => self.read_at(def.addr()),
        }
    }

    /// Report one motion event: deltas, then the motion pending bit
    pub fn inject_motion(&self, dx: i8, dy: i8) -> Result<()> {
        self.write("DELTA_X", dx as u8 as u32)?;
        self.write("DELTA_Y", dy as u8 as u32)?;
        self.write("MOTION", MOTION_PENDING as u32)?;
        Ok(())
    }

    fn command(&self, index: u8, value: u32) -> Result<u8> {
        let mut cmd = self
            .map
            .command_at(index)
            .cloned()
            .ok_or(RegisterMapError::UnknownCommand(index))?;
        cmd.set(value)?;
        debug!("OPTICAL_SENSOR: {} <- 0x{:02X}", cmd.name, cmd.value);
        let reply = self
            .core
            .send_data(optical_cmd::REG_COMMAND, &[index, cmd.value as u8])?;
        single_byte(&reply)
    }
}

fn single_byte(reply: &[u8]) -> Result<u8> {
    match reply {
        [value] => Ok(*value),
        other => Err(KosmosError::UnexpectedReply(format!(
            "register access returned {} bytes",
            other.len()
        ))),
    }
}

impl Module for OpticalSensor {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    fn status_common(&self, sanity_checks: bool) -> Result<CommonStatus> {
        self.status(sanity_checks)
    }

    fn reset_module(&self, sanity_checks: bool) -> Result<()> {
        self.core.reset::<CommonStatus>(sanity_checks)?;
        self.core.fire_reset_callbacks();
        Ok(())
    }
}
