#![forbid(unsafe_code)]

use crate::clock::Clock;
use crate::detectors::DnsMonitor;
use crate::error::Error;
use crate::tasks::pause;
use ipnet::Ipv4Net;
use kernel::conntrack::{self, Flow, Transport};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// History consulted for each client's top domains.
pub const DNS_WINDOW: Duration = Duration::from_secs(600);
pub const TOP_DOMAINS: usize = 5;

const DOWNLOAD_TLS_FLOWS: usize = 8;
const DOWNLOAD_FLOWS: usize = 20;
const ACTIVE_FLOWS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Activity {
    Idle,
    Active,
    Downloading,
    Streaming,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowCounts {
    pub flows: usize,
    pub tcp443: usize,
    pub udp443: usize,
}

/// Label a client from its flow counts and recent domains.
pub fn classify(counts: &FlowCounts, top_domains: &[String], streaming: &[String]) -> Activity {
    let streams_domain = top_domains.iter().any(|domain| {
        let domain = domain.to_lowercase();
        streaming
            .iter()
            .any(|provider| domain.contains(&provider.to_lowercase()))
    });
    if counts.udp443 >= 1 || streams_domain {
        Activity::Streaming
    } else if counts.tcp443 + counts.udp443 >= DOWNLOAD_TLS_FLOWS || counts.flows >= DOWNLOAD_FLOWS {
        Activity::Downloading
    } else if counts.flows >= ACTIVE_FLOWS {
        Activity::Active
    } else {
        Activity::Idle
    }
}

/// Per-client flow counts for flows originating inside `lan`.
pub fn tally(flows: &[Flow], lan: Ipv4Net) -> BTreeMap<IpAddr, FlowCounts> {
    let mut clients: BTreeMap<IpAddr, FlowCounts> = BTreeMap::new();
    for flow in flows {
        let IpAddr::V4(src) = flow.src else {
            continue;
        };
        if !lan.contains(&src) {
            continue;
        }
        let counts = clients.entry(flow.src).or_default();
        counts.flows += 1;
        if flow.is_tls(Transport::Tcp) {
            counts.tcp443 += 1;
        }
        if flow.is_tls(Transport::Udp) {
            counts.udp443 += 1;
        }
    }
    clients
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientActivity {
    pub ip: IpAddr,
    pub activity: Activity,
    pub flows: usize,
    pub udp443: usize,
    pub tcp443: usize,
    pub top_domains: Vec<String>,
    pub ts: f64,
}

pub struct ActivityMonitor {
    dns: Arc<DnsMonitor>,
    clock: Arc<dyn Clock>,
    lan: Option<Ipv4Net>,
    conntrack_path: PathBuf,
    line_limit: usize,
    streaming_domains: Vec<String>,
    interval: Duration,
    snapshot: Mutex<BTreeMap<IpAddr, ClientActivity>>,
}

impl ActivityMonitor {
    pub fn new(dns: Arc<DnsMonitor>, clock: Arc<dyn Clock>, settings: &config::Detectors) -> Self {
        Self {
            dns,
            clock,
            lan: settings.lan_cidr,
            conntrack_path: settings.conntrack_path.clone(),
            line_limit: settings.conntrack_line_limit,
            streaming_domains: settings.streaming_domains.clone(),
            interval: settings.activity_interval,
            snapshot: Mutex::new(BTreeMap::new()),
        }
    }

    /// Rebuild the snapshot from the connection table. Without a LAN subnet
    /// nothing is sampled and the snapshot is left as it is.
    pub async fn tick(&self) -> Result<usize, Error> {
        let Some(lan) = self.lan else {
            return Ok(0);
        };
        let flows = conntrack::read_table(&self.conntrack_path, self.line_limit).await?;
        Ok(self.replace(&flows, lan))
    }

    /// Replace the snapshot with one derived from `flows`.
    pub fn replace(&self, flows: &[Flow], lan: Ipv4Net) -> usize {
        let now = self.clock.now();
        let mut top = self.dns.top_by_client(DNS_WINDOW, TOP_DOMAINS);
        let snapshot: BTreeMap<IpAddr, ClientActivity> = tally(flows, lan)
            .into_iter()
            .map(|(ip, counts)| {
                let top_domains: Vec<String> = top
                    .remove(&ip)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(domain, _)| domain)
                    .collect();
                let activity = classify(&counts, &top_domains, &self.streaming_domains);
                let client = ClientActivity {
                    ip,
                    activity,
                    flows: counts.flows,
                    udp443: counts.udp443,
                    tcp443: counts.tcp443,
                    top_domains,
                    ts: now,
                };
                (ip, client)
            })
            .collect();
        let clients = snapshot.len();
        *self.snapshot.lock() = snapshot;
        trace!(clients, "activity snapshot replaced");
        clients
    }

    pub fn snapshot(&self) -> Vec<ClientActivity> {
        self.snapshot.lock().values().cloned().collect()
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            if let Err(err) = self.tick().await {
                debug!(%err, "connection table read failed");
            }
            if !pause(self.clock.as_ref(), &cancel, self.interval).await {
                break;
            }
        }
    }
}
