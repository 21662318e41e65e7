//! Reading captured records back from producer modules

use kosmos_transport::TransportError;
use tracing::debug;

use super::ModuleCore;
use crate::error::{KosmosError, Result};

/// A module whose remote buffer is drained by the host
pub trait DownloadModule: super::Module {
    type Capture;

    /// Largest `count` a single download accepts
    fn size(&self) -> usize;

    /// Fetch `count` units, or everything the remote buffer holds if `None`
    fn download(&self, count: Option<usize>) -> Result<Self::Capture>;
}

/// Usable capacity of a producer ring: one slot tells empty from full
pub fn producer_size(buffer_size: Option<u16>) -> usize {
    buffer_size.map(|s| s.saturating_sub(1) as usize).unwrap_or(0)
}

/// Check a requested count against `size`
pub fn check_count(core: &ModuleCore, count: usize, size: usize) -> Result<()> {
    if count > size {
        return Err(KosmosError::InvalidParameter(format!(
            "{}: download count {} exceeds size {}",
            core.name(),
            count,
            size
        )));
    }
    Ok(())
}

/// Refuse a download the remote buffer cannot fill
///
/// Checked before the first READ: units consumed by earlier frames of a
/// failed download could not be handed back.
pub fn check_available(core: &ModuleCore, count: usize, available: usize) -> Result<()> {
    if count > available {
        debug!("{}: {} units requested, {} captured", core.name(), count, available);
        return Err(KosmosError::Underrun {
            module: core.name().to_string(),
            requested: count,
        });
    }
    Ok(())
}

/// Read `count` units of `unit_size` bytes with READ frames of up to
/// `READ_MAX - READ_ONE + 1` units each
pub fn read_units(core: &ModuleCore, unit_size: usize, count: usize) -> Result<Vec<u8>> {
    let cmds = core.settings().cmds;
    let mut out = Vec::with_capacity(unit_size * count);
    let mut remaining = count;

    while remaining > 0 {
        let n = remaining.min(cmds.max_read_entries());
        let payload = core
            .link()
            .send_data_message(core.settings().msg_id, cmds.read_n(n), &[])
            .map_err(|e| match e {
                TransportError::UnderrunPayload { .. } => KosmosError::Underrun {
                    module: core.name().to_string(),
                    requested: count,
                },
                other => KosmosError::Transport(other),
            })?;
        if payload.len() != n * unit_size {
            return Err(KosmosError::UnexpectedReply(format!(
                "{}: read of {} units returned {} bytes, expected {}",
                core.name(),
                n,
                payload.len(),
                n * unit_size
            )));
        }
        out.extend_from_slice(&payload);
        remaining -= n;
    }

    debug!("{}: downloaded {} units", core.name(), count);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_producer_size_reserves_one_slot() {
        assert_eq!(producer_size(Some(1024)), 1023);
        assert_eq!(producer_size(Some(0)), 0);
        assert_eq!(producer_size(None), 0);
    }

    #[test]
    fn test_check_available_refuses_short_buffers() {
        use crate::fatal::KosmosFatalError;
        use crate::module::ModuleSettings;
        use crate::simulator::SimulatedFpga;
        use kosmos_transport::{msg, FpgaLink};
        use std::sync::Arc;

        let link = Arc::new(FpgaLink::new(Arc::new(SimulatedFpga::new())));
        let core = ModuleCore::new(
            ModuleSettings::new("I2C_SPY", msg::I2C_SPY),
            link,
            Arc::new(KosmosFatalError::new()),
        );
        assert!(check_available(&core, 35, 35).is_ok());
        assert!(check_available(&core, 0, 0).is_ok());
        let err = check_available(&core, 36, 35).unwrap_err();
        assert!(matches!(err, KosmosError::Underrun { requested: 36, .. }));
    }
}
