#![forbid(unsafe_code)]

use crate::error::Error;
use crate::persistence::write_private;
use async_trait::async_trait;
use kernel::CommandRunner;
use kernel::command::is_root;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Drops traffic from an address at the host firewall.
#[async_trait]
pub trait Blocker: Send + Sync {
    async fn block(&self, ip: IpAddr) -> Result<(), Error>;
}

/// Tries the privileged helper script, then nftables, then iptables.
pub struct FirewallBlocker {
    runner: Arc<dyn CommandRunner>,
    script: PathBuf,
    privileged: bool,
}

impl FirewallBlocker {
    pub fn new(runner: Arc<dyn CommandRunner>, script: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            script: script.into(),
            privileged: is_root(),
        }
    }

    pub fn with_privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    /// Run commands in order until one fails. Returns how many succeeded.
    async fn run_all(&self, commands: &[Vec<String>]) -> usize {
        for (applied, argv) in commands.iter().enumerate() {
            let (program, args) = self.elevate(argv);
            match self.runner.run(program, &args).await {
                Ok(output) if output.success => {}
                Ok(output) => {
                    debug!(%program, ?args, stderr = output.stderr.trim(), "firewall command failed");
                    return applied;
                }
                Err(err) => {
                    debug!(%program, %err, "firewall command unavailable");
                    return applied;
                }
            }
        }
        commands.len()
    }

    /// Run one backend's rules. A backend that accepted some of its rules
    /// counts as applied so a second backend is never layered on top.
    async fn apply_backend(&self, ip: IpAddr, backend: &str, rules: &[Vec<String>]) -> bool {
        let applied = self.run_all(rules).await;
        if applied == rules.len() {
            info!(%ip, backend, "address blocked");
            true
        } else if applied > 0 {
            warn!(%ip, backend, applied, total = rules.len(), "block only partially applied");
            true
        } else {
            false
        }
    }

    fn elevate<'a>(&self, argv: &'a [String]) -> (&'a str, Vec<String>) {
        match argv.split_first() {
            Some((program, rest)) if self.privileged => (program.as_str(), rest.to_vec()),
            _ => ("sudo", std::iter::once("-n".to_owned()).chain(argv.iter().cloned()).collect()),
        }
    }
}

fn owned(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| (*part).to_owned()).collect()
}

#[async_trait]
impl Blocker for FirewallBlocker {
    async fn block(&self, ip: IpAddr) -> Result<(), Error> {
        let addr = ip.to_string();

        if tokio::fs::try_exists(&self.script).await.unwrap_or(false) {
            let script = self.script.display().to_string();
            let rules = [owned(&["/bin/bash", &script, "block_ip", &addr])];
            if self.apply_backend(ip, "helper script", &rules).await {
                return Ok(());
            }
        }

        let family = if ip.is_ipv4() { "ip" } else { "ip6" };
        let nft: Vec<Vec<String>> = ["input", "forward"]
            .into_iter()
            .map(|chain| {
                owned(&["nft", "add", "rule", "inet", "filter", chain, family, "saddr", &addr, "drop"])
            })
            .collect();
        if self.apply_backend(ip, "nftables", &nft).await {
            return Ok(());
        }

        let iptables = if ip.is_ipv4() { "iptables" } else { "ip6tables" };
        let legacy: Vec<Vec<String>> = ["INPUT", "FORWARD"]
            .into_iter()
            .map(|chain| owned(&[iptables, "-I", chain, "-s", &addr, "-j", "DROP"]))
            .collect();
        if self.apply_backend(ip, iptables, &legacy).await {
            return Ok(());
        }

        Err(Error::Action(format!("no firewall backend accepted a block for {ip}")))
    }
}

/// Addresses blocked so far, persisted as a sorted JSON array.
#[derive(Debug, Default)]
pub struct Blocklist {
    path: Option<PathBuf>,
    entries: Mutex<BTreeSet<IpAddr>>,
    writer: tokio::sync::Mutex<()>,
}

impl Blocklist {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the list at `path`. A missing or unreadable file starts empty.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice::<BTreeSet<IpAddr>>(&raw).unwrap_or_else(|err| {
                warn!(path = %path.display(), %err, "ignoring malformed blocklist");
                BTreeSet::new()
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(err) => {
                warn!(path = %path.display(), %err, "blocklist unreadable");
                BTreeSet::new()
            }
        };
        Self {
            path: Some(path),
            entries: Mutex::new(entries),
            writer: tokio::sync::Mutex::new(()),
        }
    }

    /// Record `ip`. Returns whether it was new.
    pub async fn insert(&self, ip: IpAddr) -> Result<bool, Error> {
        let _writer = self.writer.lock().await;
        let snapshot = {
            let mut entries = self.entries.lock();
            if !entries.insert(ip) {
                return Ok(false);
            }
            entries.clone()
        };
        if let Some(path) = self.path.clone() {
            let bytes = serde_json::to_vec(&snapshot)?;
            tokio::task::spawn_blocking(move || write_private(&path, &bytes)).await??;
        }
        Ok(true)
    }

    pub fn entries(&self) -> Vec<IpAddr> {
        self.entries.lock().iter().copied().collect()
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.entries.lock().contains(&ip)
    }
}
