//! Engine tunables with load/save to a JSON file. Every field is
//! defaulted so a partial config file still deserializes.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;

/// Tilt correction disabled; any nonzero tilt below a positive
/// threshold is left alone, and a negative threshold means never level.
pub const DEFAULT_TILT_THRESHOLD: f64 = -1.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Minimum absolute tilt, in degrees, before a frame is leveled.
    /// Negative disables leveling entirely.
    pub tilt_threshold: f64,
    /// Sliding-window length for pupil smoothing during ingestion.
    pub pupil_window: usize,
    /// Sliding-window length for full-landmark smoothing.
    pub landmark_window: usize,
    /// Export every Nth frame of the active clip.
    pub csv_step: usize,
    /// Emit first/second differences of the sagittal profile. Never
    /// affects landmark selection; analysis output only.
    pub compute_derivatives: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tilt_threshold: DEFAULT_TILT_THRESHOLD,
            pupil_window: 2,
            landmark_window: 2,
            csv_step: 1,
            compute_derivatives: false,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&raw)?;
        info!(path = %path.display(), "loaded engine config");
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw)?;
        Ok(())
    }
}
