//! Key-matrix commands

use std::time::Duration;

use anyhow::{Context, Result};
use kosmos::{ButtonStimuli, KeyId};

use super::{print_json, Session};

pub fn keystroke(session: &Session, key: KeyId, duration: u64, repeat: u32, delay: u64) -> Result<()> {
    let emulator = session.kosmos.key_matrix()?;
    emulator
        .keystroke_with(
            key,
            Duration::from_millis(duration),
            repeat,
            Duration::from_millis(delay),
        )
        .with_context(|| format!("keystroke {key} on the {} emulator", emulator.name()))?;

    if session.json {
        return print_json(&serde_json::json!({
            "key": key,
            "emulator": emulator.name(),
            "repeat": repeat,
        }));
    }
    println!("{key} x{repeat} on the {} emulator", emulator.name());
    Ok(())
}

pub fn release_all(session: &Session) -> Result<()> {
    let emulator = session.kosmos.key_matrix()?;
    emulator.release_all(Duration::ZERO)?;
    if !session.json {
        println!("All keys released ({})", emulator.name());
    }
    Ok(())
}

pub fn reset(session: &Session) -> Result<()> {
    if let Some(fatal) = session.kosmos.clear_fatal() {
        println!("Cleared fatal error: {fatal}");
    }
    session.kosmos.reset_all()?;
    if !session.json {
        println!("Reset {} module(s)", session.kosmos.dt().modules().len());
    }
    Ok(())
}
