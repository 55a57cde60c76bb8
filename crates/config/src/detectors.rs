#![forbid(unsafe_code)]

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::{path::PathBuf, time::Duration};

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Detectors {
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub flow_interval: Duration,

    /// Connections to a single remote address, in one snapshot, that raise
    /// a flow anomaly.
    pub flow_rate_threshold: usize,

    /// Nominal window reported in flow anomaly messages. Thresholds are
    /// evaluated against the latest snapshot only.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub flow_window: Duration,

    pub uncommon_ports: Vec<u16>,

    pub uncommon_port_threshold: usize,

    #[serde_as(as = "serde_with::DurationMilliSeconds")]
    pub activity_interval: Duration,

    /// LAN subnet whose clients are classified. Unset disables the
    /// activity classifier.
    pub lan_cidr: Option<Ipv4Net>,

    pub conntrack_path: PathBuf,

    /// Upper bound on conntrack lines read per tick.
    pub conntrack_line_limit: usize,

    pub dns_log: PathBuf,

    pub dns_capacity: usize,

    /// Structured (EVE JSON) alert log; preferred when present.
    pub ids_eve_log: PathBuf,

    /// Plain-text alert log, used only when `ids_eve_log` is absent.
    pub ids_fast_log: PathBuf,

    #[serde_as(as = "serde_with::DurationMilliSeconds")]
    pub tail_poll_interval: Duration,

    /// Case-insensitive substrings marking a domain as a streaming provider.
    pub streaming_domains: Vec<String>,
}

impl Default for Detectors {
    fn default() -> Self {
        Self {
            flow_interval: Duration::from_secs(2),
            flow_rate_threshold: 80,
            flow_window: Duration::from_secs(60),
            uncommon_ports: vec![23, 2323, 3389, 4444, 6667, 1337, 31337],
            uncommon_port_threshold: 5,
            activity_interval: Duration::from_millis(500),
            lan_cidr: None,
            conntrack_path: PathBuf::from("/proc/net/nf_conntrack"),
            conntrack_line_limit: 5000,
            dns_log: PathBuf::from("/var/log/dnsmasq.log"),
            dns_capacity: 5000,
            ids_eve_log: PathBuf::from("/var/log/suricata/eve.json"),
            ids_fast_log: PathBuf::from("/var/log/suricata/fast.log"),
            tail_poll_interval: Duration::from_millis(500),
            streaming_domains: [
                "youtube",
                "netflix",
                "hulu",
                "twitch",
                "disney",
                "spotify",
                "primevideo",
                "vimeo",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}
