#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Threats {
    /// Maximum number of events kept in memory; oldest are evicted first.
    pub ledger_capacity: usize,

    /// Privileged helper invoked as `<script> block_ip <addr>`. Falls back
    /// to nft, then iptables, when missing.
    pub block_script: PathBuf,

    /// Relative paths are resolved against `system.data_dir`.
    pub blocklist_file: PathBuf,
}

impl Default for Threats {
    fn default() -> Self {
        Self {
            ledger_capacity: 500,
            block_script: PathBuf::from("/opt/routergeist/scripts/privileged/assign_roles.sh"),
            blocklist_file: PathBuf::from("blocked_ips.json"),
        }
    }
}
