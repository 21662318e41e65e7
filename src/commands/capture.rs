//! Spy downloads

use std::time::Duration;

use anyhow::Result;
use kosmos::i2c_spy::{I2cCapture, I2cMode};
use kosmos::module::DownloadModule;
use serde::Serialize;

use super::{print_json, Session};

#[derive(Serialize)]
struct I2cTransaction {
    timestamp: u32,
    address: u8,
    read: bool,
    nack: bool,
    data: Vec<u8>,
}

pub fn i2c_dump(session: &Session, mode: Option<I2cMode>, count: Option<usize>) -> Result<()> {
    let spy = session.kosmos.dt().require_i2c_spy()?;
    if let Some(mode) = mode {
        spy.set_mode(mode)?;
    }
    spy.flush()?;
    let capture = spy.download(count)?;

    let transactions: Vec<I2cTransaction> = capture
        .transactions()
        .into_iter()
        .map(|f| I2cTransaction {
            timestamp: f.timestamp,
            address: f.address,
            read: f.read,
            nack: f.nack,
            data: f.data,
        })
        .collect();

    if session.json {
        return print_json(&transactions);
    }

    let unit = match &capture {
        I2cCapture::Raw(_) => "record(s)",
        I2cCapture::Frame(_) => "byte(s)",
    };
    println!("{:?} mode: {} {}", capture.mode(), capture.len(), unit);
    for t in &transactions {
        let data: Vec<String> = t.data.iter().map(|b| format!("{b:02X}")).collect();
        println!(
            "  @{:>10}  0x{:02X} {}{}  [{}]",
            t.timestamp,
            t.address,
            if t.read { "R" } else { "W" },
            if t.nack { " NACK" } else { "" },
            data.join(" ")
        );
    }
    Ok(())
}

pub fn rgb_capture(session: &Session, duration: u64) -> Result<()> {
    let spy = session.kosmos.dt().require_rgb_spy()?;
    let status = spy.start_capture()?;
    println!("Capturing {} LED(s) for {} ms", status.led_count, duration);
    std::thread::sleep(Duration::from_millis(duration));
    spy.stop_capture()?;
    spy.flush()?;
    let samples = spy.download(None)?;

    if session.json {
        return print_json(&samples);
    }
    for s in &samples {
        println!("  @{:>10}  LED {:>3}  {}", s.timestamp, s.led, s.color);
    }
    println!("{} sample(s)", samples.len());
    Ok(())
}
