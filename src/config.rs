//! Per-target configuration.
//!
//! Loaded by the session layer from YAML target descriptions; everything
//! here has a default so a bare `TargetConfig::default()` works for a
//! single-core target with no working area.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Scratch RAM the target lends to the debugger for downloaded algorithms.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct WorkingAreaConfig {
    /// Physical base address of the region.
    pub base: u32,
    /// Region size in bytes.
    pub size: u32,
}

/// Static description of one debug target.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    /// Core index within the SoC (selects the per-core debug block).
    #[serde(default)]
    pub core_id: u8,

    /// Explicit debug-register base address. When absent, the Cortex-A9
    /// backend falls back to the OMAP-style `0x80000000 | (core_id << 13)`
    /// layout.
    #[serde(default)]
    pub debug_base: Option<u32>,

    /// Working-area pool for downloaded algorithms.
    #[serde(default)]
    pub working_area: Option<WorkingAreaConfig>,

    /// Poll for target-initiated debug messages while the core runs.
    #[serde(default)]
    pub enable_debug_messages: bool,
}

impl TargetConfig {
    /// Parse a target description from YAML.
    pub fn from_yaml(text: &str) -> Result<Self, Error> {
        serde_yaml::from_str(text).map_err(|e| Error::Other(e.into()))
    }
}
