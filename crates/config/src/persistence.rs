#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Persistence {
    /// Short-term telemetry snapshot. Relative paths are resolved against
    /// `system.data_dir`.
    pub short_term_path: PathBuf,

    /// Long-term (per-minute peak) telemetry snapshot.
    pub long_term_path: PathBuf,

    pub save_on_shutdown: bool,
}

impl Default for Persistence {
    fn default() -> Self {
        Self {
            short_term_path: PathBuf::from("run/telemetry.json"),
            long_term_path: PathBuf::from("run/longterm.json"),
            save_on_shutdown: true,
        }
    }
}
