// CLI definitions using clap

use clap::{Parser, Subcommand};
use kosmos::i2c_spy::I2cMode;
use kosmos::KeyId;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kosmos")]
#[command(author, version, about = "Kosmos FPGA test controller")]
#[command(propagate_version = true)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Run against the in-process board simulator
    #[arg(long, global = true)]
    pub simulate: bool,

    /// Log every emulator operation
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Board address (host:port), overrides the configuration
    #[arg(long, global = true)]
    pub address: Option<String>,

    /// Print every control frame
    #[arg(long, global = true)]
    pub monitor: bool,

    /// Show raw hex dump alongside decoded frames
    #[arg(long, global = true)]
    pub hex: bool,

    /// Machine-readable output
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show FPGA revision and the status of every module
    #[command(visible_aliases = ["st", "s"])]
    Status,

    /// Reset every module
    Reset,

    /// Press and release a key
    #[command(visible_aliases = ["key", "k"])]
    Keystroke {
        /// KEY_ID name (e.g. KEYBOARD_A, COMPOUND_CTRL_C)
        key: KeyId,
        /// Hold time in milliseconds
        #[arg(long, default_value_t = 50)]
        duration: u64,
        /// Number of keystrokes
        #[arg(long, default_value_t = 1)]
        repeat: u32,
        /// Pause after each release in milliseconds
        #[arg(long, default_value_t = 50)]
        delay: u64,
    },

    /// Release every key on every emulator
    #[command(visible_alias = "ra")]
    ReleaseAll,

    /// Download what the I²C spy captured
    #[command(visible_alias = "i2c")]
    I2cDump {
        /// Capture mode (raw or frame); switching clears the capture
        #[arg(long)]
        mode: Option<I2cMode>,
        /// Units to read (records or bytes); everything if omitted
        #[arg(long)]
        count: Option<usize>,
    },

    /// Capture LED samples from the RGB spy
    #[command(visible_alias = "rgb")]
    RgbCapture {
        /// Capture window in milliseconds
        #[arg(long, default_value_t = 100)]
        duration: u64,
    },

    /// List KEY_ID names
    Keys {
        /// Only names containing this text
        filter: Option<String>,
    },
}
