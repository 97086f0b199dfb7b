//! Task configuration.
//!
//! A small JSON document controls how a batch is processed; every field
//! has a default so partial documents work. Command-line flags override
//! whatever the file says.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::units::SignalUnits;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TaskConfig {
    /// Read-noise model flag: 0 leaves noise in place, 1 separates it by
    /// smoothing before the correction.
    pub noise_model: i64,

    /// Signal units of the input planes; `None` auto-detects from each
    /// extension's `BUNIT`.
    pub units: Option<SignalUnits>,

    /// Output files are named `<stem>_<suffix>.fits` next to each input.
    pub output_suffix: String,

    /// Write the intermediate signal/noise planes and a per-column trace
    /// next to the output.
    pub debug_artifacts: bool,

    /// Trap calibration file to use instead of each exposure's `PCTETAB`
    /// keyword.
    pub reference_override: Option<PathBuf>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        TaskConfig {
            noise_model: 1,
            units: None,
            output_suffix: "cte".into(),
            debug_artifacts: false,
            reference_override: None,
        }
    }
}

impl TaskConfig {
    /// Save to JSON file
    pub fn save_to_file(&self, path: &Path) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Load from JSON file
    pub fn load_from_file(path: &Path) -> Result<Self, std::io::Error> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}
