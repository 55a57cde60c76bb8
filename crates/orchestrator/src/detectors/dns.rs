#![forbid(unsafe_code)]

use crate::clock::Clock;
use crate::detectors::{LineSink, LogTailer};
use crate::error::Error;
use async_trait::async_trait;
use itertools::Itertools;
use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Resolver log line, e.g. `query[A] example.com from 192.168.50.51`.
const QUERY_PATTERN: &str = r"query\[[A-Z]+\]\s+([a-zA-Z0-9_.-]+)\s+from\s+([0-9a-fA-F:.]+)";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DnsObservation {
    pub ts: f64,
    pub domain: String,
    pub client: IpAddr,
}

#[derive(Debug, Default)]
struct DnsState {
    ring: VecDeque<DnsObservation>,
    /// Outlives ring eviction.
    first_seen: HashMap<String, f64>,
}

/// Recent DNS queries per client, fed from the resolver log.
pub struct DnsMonitor {
    clock: Arc<dyn Clock>,
    capacity: usize,
    pattern: Regex,
    state: Mutex<DnsState>,
}

impl DnsMonitor {
    pub fn new(clock: Arc<dyn Clock>, capacity: usize) -> Result<Self, Error> {
        Ok(Self {
            clock,
            capacity: capacity.max(1),
            pattern: Regex::new(QUERY_PATTERN)?,
            state: Mutex::new(DnsState::default()),
        })
    }

    /// Extract `(domain, client)` from a resolver log line. The domain is
    /// lower-cased.
    pub fn parse_line(&self, line: &str) -> Option<(String, IpAddr)> {
        let captures = self.pattern.captures(line)?;
        let domain = captures.get(1)?.as_str().to_ascii_lowercase();
        let client = captures.get(2)?.as_str().parse().ok()?;
        Some((domain, client))
    }

    /// Record a query seen now.
    pub fn record(&self, domain: String, client: IpAddr) {
        let ts = self.clock.now();
        let mut state = self.state.lock();
        state.first_seen.entry(domain.clone()).or_insert(ts);
        if state.ring.len() == self.capacity {
            state.ring.pop_front();
        }
        state.ring.push_back(DnsObservation { ts, domain, client });
    }

    /// The `limit` most recent observations, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<DnsObservation> {
        let state = self.state.lock();
        let skip = state.ring.len().saturating_sub(limit);
        state.ring.iter().skip(skip).cloned().collect()
    }

    /// `(domain, ts)` per client within `window`, oldest first.
    pub fn by_client(&self, window: Duration) -> BTreeMap<IpAddr, Vec<(String, f64)>> {
        let cutoff = self.clock.now() - window.as_secs_f64();
        let state = self.state.lock();
        let mut grouped: BTreeMap<IpAddr, Vec<(String, f64)>> = BTreeMap::new();
        for observation in state.ring.iter().filter(|o| o.ts >= cutoff) {
            grouped
                .entry(observation.client)
                .or_default()
                .push((observation.domain.clone(), observation.ts));
        }
        grouped
    }

    /// Most queried domains per client within `window`, by count descending
    /// and then by name.
    pub fn top_by_client(
        &self,
        window: Duration,
        limit: usize,
    ) -> BTreeMap<IpAddr, Vec<(String, usize)>> {
        let cutoff = self.clock.now() - window.as_secs_f64();
        let counts: HashMap<IpAddr, HashMap<String, usize>> = {
            let state = self.state.lock();
            let mut counts: HashMap<IpAddr, HashMap<String, usize>> = HashMap::new();
            for observation in state.ring.iter().filter(|o| o.ts >= cutoff) {
                *counts
                    .entry(observation.client)
                    .or_default()
                    .entry(observation.domain.clone())
                    .or_default() += 1;
            }
            counts
        };

        counts
            .into_iter()
            .map(|(client, domains)| {
                let top = domains
                    .into_iter()
                    .sorted_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)))
                    .take(limit)
                    .collect();
                (client, top)
            })
            .collect()
    }

    /// Domains first seen within `window`, newest first.
    pub fn new_domains(&self, window: Duration) -> Vec<(f64, String)> {
        let cutoff = self.clock.now() - window.as_secs_f64();
        let state = self.state.lock();
        state
            .first_seen
            .iter()
            .filter(|(_, ts)| **ts >= cutoff)
            .map(|(domain, ts)| (*ts, domain.clone()))
            .sorted_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Follow the resolver log at `path`. Without the log the monitor stays
    /// empty.
    pub async fn run(self: Arc<Self>, path: &Path, poll: Duration, cancel: CancellationToken) {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            info!(path = %path.display(), "resolver log absent, DNS monitor disabled");
            return;
        }
        let result = match LogTailer::open(path).await {
            Ok(tailer) => {
                let clock = Arc::clone(&self.clock);
                tailer
                    .follow(self.as_ref(), clock.as_ref(), poll, &cancel)
                    .await
            }
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            warn!(path = %path.display(), %err, "DNS monitor stopped");
        }
    }
}

#[async_trait]
impl LineSink for DnsMonitor {
    async fn line(&self, line: &str) {
        if let Some((domain, client)) = self.parse_line(line) {
            self.record(domain, client);
        }
    }
}
