//! Read-only commands

use anyhow::Result;
use kosmos::module::CommonStatus;
use kosmos::{KeyId, Module};
use kosmos_keyboard::ModifierGroup;
use serde::Serialize;

use super::{print_json, Session};

#[derive(Serialize)]
struct BoardReport {
    endpoint: String,
    fpga_revision: u16,
    core_clock_hz: u64,
    reset_required: bool,
    fatal: Option<String>,
    exchanges: u64,
    link_errors: u64,
    average_latency_us: u128,
    modules: Vec<ModuleReport>,
}

#[derive(Serialize)]
struct ModuleReport {
    name: &'static str,
    #[serde(flatten)]
    status: CommonStatus,
}

/// FPGA revision and module status table
pub fn status(session: &Session) -> Result<()> {
    let dt = session.kosmos.dt();
    let mut modules = Vec::new();
    for module in dt.modules() {
        modules.push(ModuleReport {
            name: module.name(),
            status: module.status_common(false)?,
        });
    }
    let stats = dt.fpga_transport().stats();
    let report = BoardReport {
        endpoint: dt.fpga_transport().info().endpoint.clone(),
        fpga_revision: dt.fpga_revision(),
        core_clock_hz: dt.core_clock_hz(),
        reset_required: dt.reset_required(),
        fatal: dt.fatal().get(),
        exchanges: stats.exchanges,
        link_errors: stats.errors,
        average_latency_us: stats.average_latency.as_micros(),
        modules,
    };

    if session.json {
        return print_json(&report);
    }

    println!("Kosmos board at {}", report.endpoint);
    println!("  FPGA revision:  0x{:04X}", report.fpga_revision);
    println!("  Core clock:     {} Hz", report.core_clock_hz);
    println!(
        "  Link:           {} exchange(s), {} error(s), {} us average",
        report.exchanges, report.link_errors, report.average_latency_us
    );
    if report.reset_required {
        println!("  Reset required: yes (a sequence timed out)");
    }
    if let Some(fatal) = &report.fatal {
        println!("  Fatal error:    {fatal}");
    }
    println!();
    println!(
        "  {:<16} {:>4} {:>5} {:>6} {:>6} {:>5}  flags",
        "module", "id", "state", "buffer", "fifo", "inst"
    );
    for m in &report.modules {
        let mut flags = Vec::new();
        if m.status.underrun {
            flags.push("UNDERRUN");
        }
        if m.status.overrun {
            flags.push("OVERRUN");
        }
        println!(
            "  {:<16} 0x{:02X} {:>5} {:>6} {:>6} {:>5}  {}",
            m.name,
            m.status.msg_id,
            m.status.state,
            m.status.buffer_count,
            m.status.fifo_count,
            m.status.instance_id,
            flags.join(" ")
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct KeyEntry {
    name: &'static str,
    id: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    modifier: Option<String>,
}

/// KEY_ID catalogue, optionally filtered by name
pub fn keys(filter: Option<&str>, json: bool) -> Result<()> {
    let filter = filter.map(|f| f.to_ascii_uppercase());
    let entries: Vec<KeyEntry> = KeyId::ALL
        .iter()
        .filter(|k| filter.as_deref().map_or(true, |f| k.name().contains(f)))
        .map(|k| KeyEntry {
            name: k.name(),
            id: k.id(),
            modifier: ModifierGroup::of(*k).map(|g| format!("{g:?}").to_uppercase()),
        })
        .collect();

    if json {
        return print_json(&entries);
    }
    for entry in &entries {
        match &entry.modifier {
            Some(group) => println!("0x{:04X}  {}  [{}]", entry.id, entry.name, group),
            None => println!("0x{:04X}  {}", entry.id, entry.name),
        }
    }
    println!("{} key(s)", entries.len());
    Ok(())
}
