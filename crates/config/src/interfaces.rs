#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::{path::PathBuf, time::Duration};

/// An upstream wireless network the router may join as WAN.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Upstream {
    pub ssid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
}

impl Upstream {
    pub fn new(ssid: impl Into<String>, passphrase: Option<String>) -> Self {
        Self {
            ssid: ssid.into(),
            passphrase,
        }
    }
}

impl std::fmt::Debug for Upstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upstream")
            .field("ssid", &self.ssid)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Interfaces {
    /// Interval between interface scans.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub poll_interval: Duration,

    /// Upstream networks, tried in declared order when joining.
    pub upstreams: Vec<Upstream>,

    /// Privileged script that brings up the AP/NAT stack.
    pub apply_script: PathBuf,

    /// Router description handed to `apply_script`.
    pub router_config: PathBuf,
}

impl Default for Interfaces {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            upstreams: Vec::new(),
            apply_script: PathBuf::from("/opt/routergeist/scripts/privileged/apply_router.sh"),
            router_config: PathBuf::from("/var/lib/routerd/run/router_config.json"),
        }
    }
}
