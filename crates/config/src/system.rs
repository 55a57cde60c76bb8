#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct System {
    /// Directory holding persisted state (telemetry snapshots, blocklist).
    pub data_dir: PathBuf,

    /// Root of the per-interface sysfs tree. An interface is wireless when
    /// `<sys_class_net>/<name>/wireless` exists.
    pub sys_class_net: PathBuf,
}

impl Default for System {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/routerd"),
            sys_class_net: PathBuf::from("/sys/class/net"),
        }
    }
}
