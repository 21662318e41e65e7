//! Runtime configuration
//!
//! Loaded from a TOML file; every field has a default so an empty file (or
//! no file at all) gives a usable configuration.
//!
//! ```toml
//! fw_id = "MPK25"
//! verbose = true
//! core_clock_hz = 100000000
//! layout = "media-dual"
//!
//! [link]
//! address = "192.168.1.50:7000"
//! reply_timeout_ms = 500
//!
//! [pacing]
//! kbd_update_delay_ns = 4000
//!
//! [[pacing.revisions]]
//! fpga_revision = 0x0203
//! kbd_update_delay_ns = 6000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KosmosError, Result};

/// Default FPGA core clock
pub const DEFAULT_CORE_CLOCK_HZ: u64 = 100_000_000;

/// Minimum delay after each KBD UPDATE when no revision entry matches
pub const DEFAULT_KBD_UPDATE_DELAY_NS: u64 = 4_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KosmosConfig {
    /// Product firmware identifier passed in by the test configuration
    pub fw_id: Option<String>,
    /// Log every emulator operation
    pub verbose: bool,
    pub core_clock_hz: u64,
    /// Built-in layout name
    pub layout: String,
    /// TOML layout file; overrides `layout`
    pub layout_file: Option<PathBuf>,
    pub link: LinkConfig,
    pub pacing: PacingConfig,
}

impl Default for KosmosConfig {
    fn default() -> Self {
        Self {
            fw_id: None,
            verbose: false,
            core_clock_hz: DEFAULT_CORE_CLOCK_HZ,
            layout: "media-dual".to_string(),
            layout_file: None,
            link: LinkConfig::default(),
            pacing: PacingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// `host:port` of the board's control daemon
    pub address: String,
    pub connect_timeout_ms: u64,
    pub reply_timeout_ms: u64,
    /// Interval between sequencer status polls while a sequence plays
    pub poll_interval_ms: u64,
    /// Log every frame (decoded)
    pub trace_frames: bool,
    /// Add hex dumps to the frame log
    pub show_hex: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:7000".to_string(),
            connect_timeout_ms: 2_000,
            reply_timeout_ms: 500,
            poll_interval_ms: 1,
            trace_frames: false,
            show_hex: false,
        }
    }
}

impl LinkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// KBD pacing per FPGA revision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub kbd_update_delay_ns: u64,
    pub revisions: Vec<RevisionPacing>,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            kbd_update_delay_ns: DEFAULT_KBD_UPDATE_DELAY_NS,
            revisions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionPacing {
    pub fpga_revision: u16,
    pub kbd_update_delay_ns: u64,
}

impl PacingConfig {
    /// Pacing delay to insert after every KBD UPDATE on this revision
    pub fn kbd_update_delay(&self, fpga_revision: u16) -> Duration {
        let ns = self
            .revisions
            .iter()
            .find(|r| r.fpga_revision == fpga_revision)
            .map(|r| r.kbd_update_delay_ns)
            .unwrap_or(self.kbd_update_delay_ns);
        Duration::from_nanos(ns)
    }
}

impl KosmosConfig {
    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| KosmosError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Load from a file if given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| KosmosError::Config(format!("parse TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.core_clock_hz == 0 {
            return Err(KosmosError::Config("core_clock_hz must be non-zero".into()));
        }
        if self.link.reply_timeout_ms == 0 {
            return Err(KosmosError::Config("link.reply_timeout_ms must be non-zero".into()));
        }
        let mut seen = std::collections::BTreeSet::new();
        for r in &self.pacing.revisions {
            if !seen.insert(r.fpga_revision) {
                return Err(KosmosError::Config(format!(
                    "duplicate pacing entry for FPGA revision 0x{:04X}",
                    r.fpga_revision
                )));
            }
        }
        Ok(())
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.link.address = address.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = KosmosConfig::from_toml_str("").unwrap();
        assert_eq!(config, KosmosConfig::default());
        assert_eq!(
            config.pacing.kbd_update_delay(0x0100),
            Duration::from_micros(4)
        );
    }

    #[test]
    fn test_revision_table() {
        let config = KosmosConfig::from_toml_str(
            r#"
fw_id = "MPK25"
verbose = true

[link]
address = "10.0.0.2:7000"

[pacing]
kbd_update_delay_ns = 5000

[[pacing.revisions]]
fpga_revision = 0x0203
kbd_update_delay_ns = 8000
"#,
        )
        .unwrap();
        assert_eq!(config.fw_id.as_deref(), Some("MPK25"));
        assert!(config.verbose);
        assert_eq!(config.link.address, "10.0.0.2:7000");
        assert_eq!(config.link.reply_timeout_ms, 500);
        assert_eq!(config.pacing.kbd_update_delay(0x0203), Duration::from_micros(8));
        assert_eq!(config.pacing.kbd_update_delay(0x0204), Duration::from_micros(5));
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(KosmosConfig::from_toml_str("core_clock_hz = 0").is_err());
        assert!(KosmosConfig::from_toml_str("verbose = \"yes\"").is_err());
        let dup = r#"
[[pacing.revisions]]
fpga_revision = 1
kbd_update_delay_ns = 1
[[pacing.revisions]]
fpga_revision = 1
kbd_update_delay_ns = 2
"#;
        assert!(matches!(
            KosmosConfig::from_toml_str(dup),
            Err(KosmosError::Config(_))
        ));
    }
}
