//! Command handlers for the CLI application.
//!
//! - `query`: read-only commands (status, keys)
//! - `emulate`: key-matrix commands (keystroke, release-all, reset)
//! - `capture`: spy downloads (i2c-dump, rgb-capture)

pub mod capture;
pub mod emulate;
pub mod query;

use anyhow::{Context, Result};
use kosmos::{Kosmos, KosmosConfig};
use serde::Serialize;
use tracing::{debug, info};

use crate::cli::Cli;

pub struct Session {
    pub kosmos: Kosmos,
    pub json: bool,
}

/// Configuration file plus command-line overrides
pub fn load_config(cli: &Cli) -> Result<KosmosConfig> {
    let mut config = KosmosConfig::load_or_default(cli.config.as_deref())
        .with_context(|| "loading configuration")?;
    if cli.verbose {
        config.verbose = true;
    }
    if let Some(address) = &cli.address {
        config.link.address = address.clone();
    }
    config.link.trace_frames |= cli.monitor;
    config.link.show_hex |= cli.hex;
    Ok(config)
}

pub fn open(cli: &Cli) -> Result<Session> {
    let config = load_config(cli)?;
    if cli.simulate {
        info!("Using the in-process board simulator");
        let (kosmos, _sim) = Kosmos::simulated(config)?;
        return Ok(Session {
            kosmos,
            json: cli.json,
        });
    }
    let address = config.link.address.clone();
    let kosmos = Kosmos::connect(config).with_context(|| format!("connecting to {address}"))?;
    debug!("Connected: {:?}", kosmos);
    Ok(Session {
        kosmos,
        json: cli.json,
    })
}

/// Print `value` as pretty JSON
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
