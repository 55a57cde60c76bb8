#![forbid(unsafe_code)]

use crate::clock::Clock;
use crate::detectors::EventSink;
use crate::error::Error;
use crate::tasks::pause;
use async_trait::async_trait;
use kernel::CommandRunner;
use kernel::command::args;
use kernel::sockets::{self, RemoteEndpoint};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const SOURCE: &str = "flow_monitor";

/// Point-in-time list of connections with a remote peer.
#[async_trait]
pub trait ConnectionSource: Send + Sync {
    async fn endpoints(&self) -> Result<Vec<RemoteEndpoint>, Error>;
}

/// `ss -ntu`, falling back to the kernel socket tables.
pub struct SystemConnections {
    runner: Arc<dyn CommandRunner>,
}

impl SystemConnections {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl ConnectionSource for SystemConnections {
    async fn endpoints(&self) -> Result<Vec<RemoteEndpoint>, Error> {
        let listed = match self.runner.run("ss", &args(&["-ntu"])).await {
            Ok(output) => output.into_stdout("ss"),
            Err(err) => Err(err),
        };
        match listed {
            Ok(out) => Ok(sockets::parse_ss(&out)),
            Err(err) => {
                debug!(%err, "ss unavailable, reading socket tables");
                Ok(tokio::task::spawn_blocking(sockets::socket_table_endpoints).await??)
            }
        }
    }
}

/// Thresholds applied to each snapshot.
#[derive(Debug, Clone)]
pub struct FlowRules {
    pub rate_threshold: usize,
    pub uncommon_ports: Vec<u16>,
    pub uncommon_port_threshold: usize,
    /// Only used to label messages.
    pub window: Duration,
}

impl From<&config::Detectors> for FlowRules {
    fn from(settings: &config::Detectors) -> Self {
        Self {
            rate_threshold: settings.flow_rate_threshold,
            uncommon_ports: settings.uncommon_ports.clone(),
            uncommon_port_threshold: settings.uncommon_port_threshold,
            window: settings.flow_window,
        }
    }
}

/// Findings for one connection snapshot, ordered by address: every
/// high-rate message first, then every uncommon-port message.
///
/// Counts come from this snapshot alone; nothing accumulates across calls.
pub fn evaluate(endpoints: &[RemoteEndpoint], rules: &FlowRules) -> Vec<String> {
    let mut per_addr: BTreeMap<IpAddr, usize> = BTreeMap::new();
    let mut uncommon: BTreeMap<IpAddr, usize> = BTreeMap::new();
    for endpoint in endpoints {
        *per_addr.entry(endpoint.addr).or_default() += 1;
        if rules.uncommon_ports.contains(&endpoint.port) {
            *uncommon.entry(endpoint.addr).or_default() += 1;
        }
    }

    let window = rules.window.as_secs();
    let rate = per_addr
        .into_iter()
        .filter(|(_, count)| *count >= rules.rate_threshold)
        .map(|(addr, count)| {
            format!("Flow anomaly: high outbound connection rate to {addr} count={count} in ~{window}s")
        });
    let ports = uncommon
        .into_iter()
        .filter(|(_, count)| *count >= rules.uncommon_port_threshold)
        .map(|(addr, count)| {
            format!(
                "Flow anomaly: repeated connections to uncommon service from local host to {addr} occurrences={count}"
            )
        });
    rate.chain(ports).collect()
}

pub struct FlowMonitor {
    source: Arc<dyn ConnectionSource>,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    rules: FlowRules,
    interval: Duration,
}

impl FlowMonitor {
    pub fn new(
        source: Arc<dyn ConnectionSource>,
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        rules: FlowRules,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            sink,
            clock,
            rules,
            interval,
        }
    }

    /// Take one snapshot and forward its findings. Returns how many were sent.
    pub async fn tick(&self) -> Result<usize, Error> {
        let endpoints = self.source.endpoints().await?;
        let findings = evaluate(&endpoints, &self.rules);
        for message in &findings {
            self.sink.submit(SOURCE, message).await;
        }
        Ok(findings.len())
    }

    pub async fn run(self, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            if let Err(err) = self.tick().await {
                debug!(%err, "connection snapshot failed");
            }
            if !pause(self.clock.as_ref(), &cancel, self.interval).await {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn endpoint(addr: &str, port: u16) -> RemoteEndpoint {
        RemoteEndpoint {
            addr: addr.parse().unwrap(),
            port,
        }
    }

    fn rules() -> FlowRules {
        FlowRules::from(&config::Detectors::default())
    }

    #[test]
    fn rate_threshold_is_inclusive() {
        let mut endpoints = vec![endpoint("203.0.113.1", 443); 80];
        endpoints.extend(vec![endpoint("203.0.113.2", 443); 79]);
        assert_eq!(
            evaluate(&endpoints, &rules()),
            vec!["Flow anomaly: high outbound connection rate to 203.0.113.1 count=80 in ~60s"]
        );
    }

    #[test]
    fn uncommon_ports_counted_per_address() {
        let mut endpoints = vec![endpoint("198.51.100.4", 4444); 3];
        endpoints.extend(vec![endpoint("198.51.100.4", 23); 2]);
        endpoints.extend(vec![endpoint("198.51.100.5", 3389); 4]);
        endpoints.push(endpoint("198.51.100.5", 443));
        assert_eq!(
            evaluate(&endpoints, &rules()),
            vec![
                "Flow anomaly: repeated connections to uncommon service from local host to 198.51.100.4 occurrences=5"
            ]
        );
    }

    #[test]
    fn quiet_snapshot_has_no_findings() {
        assert!(evaluate(&[endpoint("10.0.0.1", 80)], &rules()).is_empty());
    }
}
