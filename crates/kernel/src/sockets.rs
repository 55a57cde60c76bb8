//! Point-in-time snapshot of connections with a remote peer.

use crate::Error;
use std::net::{IpAddr, SocketAddr};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemoteEndpoint {
    pub addr: IpAddr,
    pub port: u16,
}

impl RemoteEndpoint {
    fn from_socket(addr: SocketAddr) -> Option<Self> {
        let ip = addr.ip().to_canonical();
        if ip.is_unspecified() || addr.port() == 0 {
            return None;
        }
        Some(Self {
            addr: ip,
            port: addr.port(),
        })
    }
}

/// Peer endpoints from `ss -ntu` output. Unparseable rows are skipped.
pub fn parse_ss(output: &str) -> Vec<RemoteEndpoint> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 5 {
                return None;
            }
            parse_peer(parts[parts.len() - 1])
        })
        .collect()
}

/// `1.2.3.4:443`, `[2001:db8::1]:443`, `[::ffff:1.2.3.4]:443` or
/// `[fe80::1%wlan0]:22`.
fn parse_peer(peer: &str) -> Option<RemoteEndpoint> {
    let (host, port) = match peer.strip_prefix('[') {
        Some(rest) => {
            let (host, port) = rest.split_once("]:")?;
            (host, port)
        }
        None => peer.rsplit_once(':')?,
    };
    let host = host.split('%').next()?;
    let addr: IpAddr = host.parse().ok()?;
    let port: u16 = port.parse().ok()?;
    RemoteEndpoint::from_socket(SocketAddr::new(addr, port))
}

/// Same snapshot read straight from the kernel socket tables, for hosts
/// without `ss`.
pub fn socket_table_endpoints() -> Result<Vec<RemoteEndpoint>, Error> {
    let mut remotes = Vec::new();
    remotes.extend(procfs::net::tcp()?.into_iter().map(|e| e.remote_address));
    remotes.extend(procfs::net::udp()?.into_iter().map(|e| e.remote_address));
    // v6 tables are absent when IPv6 is disabled
    match procfs::net::tcp6() {
        Ok(entries) => remotes.extend(entries.into_iter().map(|e| e.remote_address)),
        Err(err) => debug!(%err, "tcp6 table unavailable"),
    }
    match procfs::net::udp6() {
        Ok(entries) => remotes.extend(entries.into_iter().map(|e| e.remote_address)),
        Err(err) => debug!(%err, "udp6 table unavailable"),
    }
    Ok(remotes
        .into_iter()
        .filter_map(RemoteEndpoint::from_socket)
        .collect())
}
